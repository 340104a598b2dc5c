use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use ahash::AHashMap;
use quarry_query_parser::{Location, ParsedQuery};
use serde::Serialize;

use crate::constraints::Constrainable;
use crate::frecency::FrecencyTracker;
use crate::git::format_vcs_status;
use crate::path_utils::to_forward_slashes;

/// Files above this size are still indexed but flagged so consumers can
/// treat them differently (grep skips them by default via `max_file_size`).
pub const LARGE_FILE_THRESHOLD: u64 = 10 * 1024 * 1024;

/// One indexed file. Immutable per scan except for the frecency snapshot
/// and VCS status, which the index owner refreshes in place.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub path: PathBuf,
    /// Relative to the base path, always `/`-separated - the haystack for
    /// fuzzy matching and constraint filtering.
    pub relative_path: String,
    pub relative_path_lower: String,
    pub file_name: String,
    pub file_name_lower: String,
    /// Byte index where the file name starts within `relative_path`.
    pub file_name_start_index: u16,
    pub extension: String,
    pub size: u64,
    /// Unix seconds of the last modification, 0 when unknown.
    pub modified: u64,
    pub is_binary: bool,
    pub is_large: bool,
    pub vcs_status: Option<git2::Status>,
    pub access_frecency_score: i64,
    pub modification_frecency_score: i64,
    pub total_frecency_score: i64,
}

/// Detect if a file is binary by checking for NUL bytes in the first 512
/// bytes. The same heuristic git and grep use - simple, fast, sufficient.
#[inline]
fn detect_binary(path: &Path, size: u64) -> bool {
    if size == 0 {
        return false;
    }

    let Ok(mut file) = std::fs::File::open(path) else {
        return false;
    };

    let mut buf = [0u8; 512];
    let n = file.read(&mut buf).unwrap_or(0);
    buf[..n].contains(&0)
}

impl FileEntry {
    pub fn new(path: PathBuf, base_path: &Path, vcs_status: Option<git2::Status>) -> Self {
        let relative_path = to_forward_slashes(
            pathdiff::diff_paths(&path, base_path)
                .unwrap_or_else(|| path.clone())
                .to_string_lossy()
                .into_owned(),
        );

        let file_name = path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .into_owned();

        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();

        let (size, modified) = match std::fs::metadata(&path) {
            Ok(metadata) => {
                let modified = metadata
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
                    .map_or(0, |d| d.as_secs());
                (metadata.len(), modified)
            }
            Err(_) => (0, 0),
        };

        let is_binary = detect_binary(&path, size);
        let file_name_start_index =
            relative_path.len().saturating_sub(file_name.len()).min(u16::MAX as usize) as u16;

        Self {
            relative_path_lower: relative_path.to_lowercase(),
            file_name_lower: file_name.to_lowercase(),
            file_name_start_index,
            path,
            relative_path,
            file_name,
            extension,
            size,
            modified,
            is_binary,
            is_large: size > LARGE_FILE_THRESHOLD,
            vcs_status,
            access_frecency_score: 0,
            modification_frecency_score: 0,
            total_frecency_score: 0,
        }
    }

    pub fn refresh_frecency(&mut self, tracker: &FrecencyTracker) {
        let (access, modification) = tracker.score_for(&self.path, self.modified);
        self.access_frecency_score = access;
        self.modification_frecency_score = modification;
        self.total_frecency_score = access + modification;
    }

    /// Wire-shaped projection of this entry.
    pub fn projection(&self) -> FileEntryProjection {
        FileEntryProjection {
            path: self.path.to_string_lossy().into_owned(),
            relative_path: self.relative_path.clone(),
            file_name: self.file_name.clone(),
            extension: self.extension.clone(),
            size_bytes: self.size,
            modified_unix_seconds: self.modified,
            is_binary: self.is_binary,
            vcs_status: format_vcs_status(self.vcs_status),
            frecency_access: self.access_frecency_score,
            frecency_modification: self.modification_frecency_score,
            frecency_total: self.total_frecency_score,
        }
    }
}

impl Constrainable for FileEntry {
    #[inline]
    fn relative_path(&self) -> &str {
        &self.relative_path
    }

    #[inline]
    fn relative_path_lower(&self) -> &str {
        &self.relative_path_lower
    }

    #[inline]
    fn file_name(&self) -> &str {
        &self.file_name
    }

    #[inline]
    fn vcs_status(&self) -> Option<git2::Status> {
        self.vcs_status
    }
}

/// Snake_case, JSON-shaped view of a [`FileEntry`].
#[derive(Debug, Clone, Serialize)]
pub struct FileEntryProjection {
    pub path: String,
    pub relative_path: String,
    pub file_name: String,
    pub extension: String,
    pub size_bytes: u64,
    pub modified_unix_seconds: u64,
    pub is_binary: bool,
    pub vcs_status: &'static str,
    pub frecency_access: i64,
    pub frecency_modification: i64,
    pub frecency_total: i64,
}

/// Per-item score decomposition. Penalties are carried as negative values so
/// `total` is always the plain sum of the components.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreBreakdown {
    pub total: i32,
    pub base_score: i32,
    pub filename_bonus: i32,
    pub special_filename_bonus: i32,
    pub frecency_boost: i32,
    pub distance_penalty: i32,
    pub current_file_penalty: i32,
    pub combo_match_boost: i32,
    pub exact_match: bool,
    pub match_type: &'static str,
}

/// Page selection for fuzzy search. `page_size == 0` is rejected at the
/// facade; internally 0 means "everything" for callers that want the full
/// ranking.
#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub page_index: usize,
    pub page_size: usize,
}

impl Pagination {
    #[inline]
    pub fn offset(&self) -> usize {
        self.page_index.saturating_mul(self.page_size)
    }
}

/// Combo counts for one normalised query: selected path -> selection count.
pub type ComboCounts = AHashMap<PathBuf, u32>;

/// Everything the scorer needs for one search call.
#[derive(Debug, Clone)]
pub struct ScoringContext<'a> {
    pub raw_query: &'a str,
    pub parsed_query: ParsedQuery<'a>,
    /// Relative path of the file currently open in the consumer, if any.
    pub current_file: Option<&'a str>,
    pub max_typos: u16,
    pub max_threads: usize,
    pub combo_counts: Option<&'a ComboCounts>,
    pub combo_boost_multiplier: i32,
    pub min_combo_count: u32,
    pub frecency_boost_ceiling: i32,
    pub special_filenames: &'a crate::score::SpecialFilenames,
    pub pagination: Pagination,
}

/// Result of one paginated fuzzy search.
#[derive(Debug, Clone, Default)]
pub struct SearchResult<'a> {
    pub items: Vec<&'a FileEntry>,
    pub scores: Vec<ScoreBreakdown>,
    pub total_matched: usize,
    pub total_files: usize,
    pub location: Option<Location>,
}

/// JSON-shaped search result payload.
#[derive(Debug, Serialize)]
pub struct SearchResultPayload {
    pub items: Vec<FileEntryProjection>,
    pub scores: Vec<ScoreBreakdown>,
    pub total_matched: usize,
    pub total_files: usize,
    pub location: Option<LocationPayload>,
}

impl SearchResult<'_> {
    pub fn into_payload(self) -> SearchResultPayload {
        SearchResultPayload {
            items: self.items.iter().map(|e| e.projection()).collect(),
            scores: self.scores,
            total_matched: self.total_matched,
            total_files: self.total_files,
            location: self.location.map(LocationPayload::from),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PositionPayload {
    pub line: u32,
    pub col: u32,
}

/// Wire shape for a parsed location suffix:
/// `{line, col?}` or `{start: {line, col}, end: {line, col}}`.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(untagged)]
pub enum LocationPayload {
    Point {
        line: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        col: Option<u32>,
    },
    Span {
        start: PositionPayload,
        end: PositionPayload,
    },
}

impl From<Location> for LocationPayload {
    fn from(location: Location) -> Self {
        match location {
            Location::Line(line) => LocationPayload::Point { line, col: None },
            Location::Position { line, col } => LocationPayload::Point {
                line,
                col: Some(col),
            },
            Location::Range { start, end } => LocationPayload::Span {
                start: PositionPayload { line: start, col: 0 },
                end: PositionPayload { line: end, col: 0 },
            },
        }
    }
}
