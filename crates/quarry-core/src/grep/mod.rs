//! Live content grep over the file index.
//!
//! Files are visited in frecency order - the files the user touches most are
//! searched first, so the first page is usually the page they wanted. The
//! cursor is an opaque offset into that walk order; page boundaries always
//! fall between files, which keeps pagination free of server-side state and
//! duplicates.
//!
//! Literal and regex modes run through ripgrep's `grep-searcher` over the
//! mmap'd file; fuzzy mode aligns each line with the Smith-Waterman scorer
//! in [`line_score`].

pub mod line_score;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use grep_matcher::{Match, Matcher, NoCaptures, NoError};
use grep_searcher::{Searcher, SearcherBuilder, Sink, SinkMatch};
use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::constraints::FileFilter;
use crate::error::{Error, Result};
use crate::git::is_modified_status;
use crate::mmap_cache::MmapCache;
use crate::types::{FileEntry, FileEntryProjection};
use line_score::score_line;
use quarry_query_parser::{GrepConfig, ParsedQuery, QueryParser};

/// Maximum bytes of a matched line kept for display. Prevents minified
/// bundles and huge single-line files from blowing up the payload.
const MAX_LINE_DISPLAY_LEN: usize = 512;

/// Files processed per parallel batch. Small enough that the time budget
/// and page limit are honoured promptly, large enough to keep rayon fed.
const BATCH_SIZE: usize = 64;

/// How many changed files the empty-query welcome state returns.
const WELCOME_STATE_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrepMode {
    #[default]
    Literal,
    Regex,
    Fuzzy,
}

impl GrepMode {
    pub fn parse(name: &str) -> Self {
        match name {
            "regex" => GrepMode::Regex,
            "fuzzy" => GrepMode::Fuzzy,
            _ => GrepMode::Literal,
        }
    }
}

/// Opaque pagination token: a position in the frecency-ordered walk.
/// Two cursors address the same resume point iff their raw values are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct GrepCursor(u64);

impl GrepCursor {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn into_raw(self) -> u64 {
        self.0
    }

    #[inline]
    fn offset(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct GrepOptions {
    pub max_file_size: u64,
    pub max_matches_per_file: usize,
    pub smart_case: bool,
    pub cursor: Option<GrepCursor>,
    pub page_limit: usize,
    pub mode: GrepMode,
    /// Wall-clock budget in milliseconds; 0 means unlimited. The budget can
    /// stop the walk early but never below `page_limit / 2` collected
    /// matches while more exist.
    pub time_budget_ms: u64,
}

impl Default for GrepOptions {
    fn default() -> Self {
        Self {
            max_file_size: 10 * 1024 * 1024,
            max_matches_per_file: 200,
            smart_case: true,
            cursor: None,
            page_limit: 50,
            mode: GrepMode::Literal,
            time_budget_ms: 0,
        }
    }
}

/// A single content match within a file.
#[derive(Debug, Clone)]
pub struct GrepMatch {
    /// Index into the deduplicated `files` vec of the [`GrepResult`].
    pub file_index: usize,
    /// 1-based line number; 0 is the welcome-state sentinel.
    pub line_number: u64,
    /// 0-based byte column of the first match within `line_content`.
    pub col: usize,
    /// Absolute byte offset of the matched line from the start of the file,
    /// so a preview can seek directly instead of scanning from the top.
    pub byte_offset: u64,
    /// The matched line, truncated to `MAX_LINE_DISPLAY_LEN`.
    pub line_content: String,
    /// Byte spans `(start, end)` within `line_content` for each match.
    pub match_ranges: Vec<(u32, u32)>,
    /// Alignment score, fuzzy mode only.
    pub fuzzy_score: Option<u16>,
}

#[derive(Debug, Clone, Default)]
pub struct GrepResult<'a> {
    pub matches: Vec<GrepMatch>,
    /// Deduplicated file references for the returned matches.
    pub files: Vec<&'a FileEntry>,
    /// Matches found before the pagination cutoff.
    pub total_matched: usize,
    /// Files actually opened during this call.
    pub total_files_searched: usize,
    /// Total number of indexed files.
    pub total_files: usize,
    /// Files eligible after constraint, size, and binary filtering.
    pub filtered_file_count: usize,
    /// Where the next page resumes; `None` when the walk is exhausted.
    pub next_cursor: Option<GrepCursor>,
    /// Set when a regex failed to compile and literal matching was used.
    pub regex_fallback_error: Option<String>,
}

/// JSON-shaped grep match: file projection inlined per item.
#[derive(Debug, Serialize)]
pub struct GrepMatchPayload {
    pub file: FileEntryProjection,
    pub line_number: u64,
    pub col: usize,
    pub byte_offset: u64,
    pub line_content: String,
    pub match_ranges: Vec<(u32, u32)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fuzzy_score: Option<u16>,
}

#[derive(Debug, Serialize)]
pub struct GrepResultPayload {
    pub items: Vec<GrepMatchPayload>,
    pub total_matched: usize,
    pub total_files_searched: usize,
    pub total_files: usize,
    pub filtered_file_count: usize,
    pub next_cursor: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regex_fallback_error: Option<String>,
}

impl GrepResult<'_> {
    pub fn into_payload(self) -> GrepResultPayload {
        let files: Vec<FileEntryProjection> =
            self.files.iter().map(|f| f.projection()).collect();
        GrepResultPayload {
            items: self
                .matches
                .into_iter()
                .map(|m| GrepMatchPayload {
                    file: files[m.file_index].clone(),
                    line_number: m.line_number,
                    col: m.col,
                    byte_offset: m.byte_offset,
                    line_content: m.line_content,
                    match_ranges: m.match_ranges,
                    fuzzy_score: m.fuzzy_score,
                })
                .collect(),
            total_matched: self.total_matched,
            total_files_searched: self.total_files_searched,
            total_files: self.total_files,
            filtered_file_count: self.filtered_file_count,
            next_cursor: self.next_cursor.map(GrepCursor::into_raw),
            regex_fallback_error: self.regex_fallback_error,
        }
    }
}

// ── Matchers ───────────────────────────────────────────────────────────

/// Wrapper around `regex::bytes::Regex` implementing the `grep_matcher`
/// trait required by `grep-searcher`.
struct PatternMatcher {
    regex: regex::bytes::Regex,
}

impl Matcher for PatternMatcher {
    type Captures = NoCaptures;
    type Error = NoError;

    #[inline]
    fn find_at(&self, haystack: &[u8], at: usize) -> std::result::Result<Option<Match>, NoError> {
        Ok(self
            .regex
            .find_at(haystack, at)
            .map(|m| Match::new(m.start(), m.end())))
    }

    #[inline]
    fn new_captures(&self) -> std::result::Result<NoCaptures, NoError> {
        Ok(NoCaptures::new())
    }
}

enum LineMatcher {
    /// Literal (pre-escaped) or user regex; runs through grep-searcher.
    Pattern {
        regex: regex::bytes::Regex,
        multiline: bool,
    },
    /// Per-line Smith-Waterman alignment.
    Fuzzy {
        needle: String,
        case_sensitive: bool,
    },
}

fn smart_case_insensitive(pattern: &str, smart_case: bool) -> bool {
    smart_case && !pattern.chars().any(|c| c.is_uppercase())
}

/// Build the literal-mode regex: input escaped, smart case applied, a typed
/// `\n` switches the searcher to multiline.
fn build_literal_regex(pattern: &str, smart_case: bool) -> Option<(regex::bytes::Regex, bool)> {
    if pattern.is_empty() {
        return None;
    }

    let multiline = pattern.contains("\\n");
    let effective = if multiline {
        pattern.replace("\\n", "\n")
    } else {
        pattern.to_string()
    };

    let regex = regex::bytes::RegexBuilder::new(&regex::escape(&effective))
        .case_insensitive(smart_case_insensitive(pattern, smart_case))
        .unicode(false)
        .build()
        .ok()?;
    Some((regex, multiline))
}

fn build_matcher(
    pattern: &str,
    options: &GrepOptions,
) -> (Option<LineMatcher>, Option<String>) {
    match options.mode {
        GrepMode::Literal => (
            build_literal_regex(pattern, options.smart_case)
                .map(|(regex, multiline)| LineMatcher::Pattern { regex, multiline }),
            None,
        ),
        GrepMode::Regex => {
            let built = regex::bytes::RegexBuilder::new(pattern)
                .case_insensitive(smart_case_insensitive(pattern, options.smart_case))
                .build();
            match built {
                Ok(regex) => (
                    Some(LineMatcher::Pattern {
                        regex,
                        multiline: false,
                    }),
                    None,
                ),
                Err(e) => (
                    // surface the compile error, match literally instead
                    build_literal_regex(pattern, options.smart_case)
                        .map(|(regex, multiline)| LineMatcher::Pattern { regex, multiline }),
                    Some(e.to_string()),
                ),
            }
        }
        GrepMode::Fuzzy => (
            Some(LineMatcher::Fuzzy {
                needle: pattern.to_string(),
                case_sensitive: !smart_case_insensitive(pattern, options.smart_case),
            }),
            None,
        ),
    }
}

// ── Sink (collects matches from grep-searcher) ─────────────────────────

struct CollectSink<'r> {
    matches: Vec<GrepMatch>,
    max_matches: usize,
    /// For locating match positions within matched lines.
    regex: &'r regex::bytes::Regex,
}

impl Sink for CollectSink<'_> {
    type Error = std::io::Error;

    fn matched(
        &mut self,
        _searcher: &Searcher,
        mat: &SinkMatch<'_>,
    ) -> std::result::Result<bool, Self::Error> {
        if self.matches.len() >= self.max_matches {
            return Ok(false);
        }

        let line_str = String::from_utf8_lossy(mat.bytes());
        let trimmed = line_str.trim_end_matches(['\n', '\r']);
        let display = truncate_display(trimmed);
        let display_len = display.len() as u32;

        // Match positions found here, during the search, so no post-pass
        // regex run is needed.
        let mut match_ranges = Vec::new();
        let mut col = 0usize;
        for (i, m) in self.regex.find_iter(display.as_bytes()).enumerate() {
            if i == 0 {
                col = m.start();
            }
            match_ranges.push((
                (m.start() as u32).min(display_len),
                (m.end() as u32).min(display_len),
            ));
        }

        self.matches.push(GrepMatch {
            file_index: 0, // remapped after the walk
            line_number: mat.line_number().unwrap_or(0),
            col,
            byte_offset: mat.absolute_byte_offset(),
            line_content: display.to_string(),
            match_ranges,
            fuzzy_score: None,
        });

        Ok(true)
    }
}

/// Floor to a char boundary so truncation never splits a multi-byte
/// UTF-8 sequence.
fn truncate_display(line: &str) -> &str {
    if line.len() <= MAX_LINE_DISPLAY_LEN {
        return line;
    }
    let mut end = MAX_LINE_DISPLAY_LEN;
    while end > 0 && !line.is_char_boundary(end) {
        end -= 1;
    }
    &line[..end]
}

// ── Main search ────────────────────────────────────────────────────────

pub fn parse_grep_query(query: &str) -> ParsedQuery<'_> {
    QueryParser::new(GrepConfig).parse(query)
}

/// Run a grep over `files` (assumed to be the index snapshot).
///
/// `cancelled` is polled at batch boundaries; a destroyed handle turns an
/// in-flight call into `Err(Cancelled)`.
pub fn grep_search<'a>(
    files: &'a [FileEntry],
    query: &str,
    options: &GrepOptions,
    mmap_cache: &MmapCache,
    cancelled: Option<&AtomicBool>,
) -> Result<GrepResult<'a>> {
    let total_files = files.len();
    let parsed = parse_grep_query(query);
    let pattern = parsed.grep_text();

    if pattern.is_empty() {
        return Ok(welcome_state(files, &parsed, total_files));
    }

    let (matcher, regex_fallback_error) = build_matcher(&pattern, options);
    let Some(matcher) = matcher else {
        return Ok(GrepResult {
            total_files,
            regex_fallback_error,
            ..Default::default()
        });
    };

    // Eligibility: the hard filters, then the query's own constraints.
    let constraint_filter = FileFilter::compile(&parsed.constraints);
    let mut eligible: Vec<&FileEntry> = files
        .iter()
        .filter(|f| !f.is_binary && f.size > 0 && f.size <= options.max_file_size)
        .filter(|f| {
            constraint_filter
                .as_ref()
                .is_none_or(|filter| filter.matches(*f))
        })
        .collect();

    // The walk order is frecency-descending with path as tie-break,
    // snapshotted here - the cursor is only meaningful within this order.
    glidesort::sort_by(&mut eligible, |a, b| {
        b.total_frecency_score
            .cmp(&a.total_frecency_score)
            .then_with(|| a.relative_path.cmp(&b.relative_path))
    });

    let filtered_file_count = eligible.len();
    let start = options.cursor.map_or(0, GrepCursor::offset);
    let page_limit = options.page_limit.max(1);

    debug!(
        pattern,
        filtered_file_count,
        start,
        page_limit,
        mode = ?options.mode,
        "Starting grep walk"
    );

    let deadline = (options.time_budget_ms > 0)
        .then(|| Instant::now() + Duration::from_millis(options.time_budget_ms));

    let mut per_file: Vec<(usize, Vec<GrepMatch>)> = Vec::new();
    let mut total_files_searched = 0usize;
    let mut collected = 0usize;
    let mut idx = start.min(eligible.len());

    while idx < eligible.len() {
        if cancelled.is_some_and(|c| c.load(Ordering::Relaxed)) {
            return Err(Error::Cancelled);
        }

        let end = (idx + BATCH_SIZE).min(eligible.len());
        let chunk = &eligible[idx..end];

        let chunk_results: Vec<(usize, Vec<GrepMatch>)> = chunk
            .par_iter()
            .enumerate()
            .filter_map(|(chunk_idx, file)| {
                let matches = search_file(file, &matcher, options, mmap_cache);
                if matches.is_empty() {
                    None
                } else {
                    Some((idx + chunk_idx, matches))
                }
            })
            .collect();

        total_files_searched += chunk.len();
        collected += chunk_results.iter().map(|(_, m)| m.len()).sum::<usize>();
        per_file.extend(chunk_results);
        idx = end;

        if collected >= page_limit {
            break;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) && collected >= page_limit / 2 {
            debug!(collected, "Grep time budget expired");
            break;
        }
    }

    // Page assembly: fill up to page_limit, never splitting a file across
    // pages. A file that overflows the remaining capacity has its excess
    // dropped and the cursor resumes at the file after it.
    let mut matches: Vec<GrepMatch> = Vec::with_capacity(page_limit.min(collected));
    let mut next_cursor: Option<GrepCursor> = None;

    for (walk_idx, file_matches) in per_file {
        if matches.len() >= page_limit {
            next_cursor = Some(GrepCursor(walk_idx as u64));
            break;
        }

        let capacity = page_limit - matches.len();
        if file_matches.len() > capacity {
            matches.extend(assign_file_indices(file_matches.into_iter().take(capacity), walk_idx));
            next_cursor = Some(GrepCursor(walk_idx as u64 + 1));
            break;
        }
        matches.extend(assign_file_indices(file_matches.into_iter(), walk_idx));
    }

    if next_cursor.is_none() && idx < eligible.len() {
        next_cursor = Some(GrepCursor(idx as u64));
    }

    // Dedup the referenced files and remap the per-match indices.
    let mut result_files: Vec<&'a FileEntry> = Vec::new();
    let mut last_walk_idx = usize::MAX;
    for m in &mut matches {
        if m.file_index != last_walk_idx {
            last_walk_idx = m.file_index;
            result_files.push(eligible[m.file_index]);
        }
        m.file_index = result_files.len() - 1;
    }

    Ok(GrepResult {
        matches,
        files: result_files,
        total_matched: collected,
        total_files_searched,
        total_files,
        filtered_file_count,
        next_cursor,
        regex_fallback_error,
    })
}

/// Tag a file's matches with its walk index; remapped to the dedup'd files
/// vec at the end of the walk.
fn assign_file_indices(
    matches: impl Iterator<Item = GrepMatch>,
    walk_idx: usize,
) -> impl Iterator<Item = GrepMatch> {
    matches.map(move |mut m| {
        m.file_index = walk_idx;
        m
    })
}

fn search_file(
    file: &FileEntry,
    matcher: &LineMatcher,
    options: &GrepOptions,
    mmap_cache: &MmapCache,
) -> Vec<GrepMatch> {
    let mmap = mmap_cache.get_or_insert(&file.path, file.size);
    let fallback;
    let bytes: &[u8] = match &mmap {
        Some(mmap) => mmap,
        None => {
            // mmap can fail on exotic filesystems; a buffered read still works
            match std::fs::read(&file.path) {
                Ok(contents) => {
                    fallback = contents;
                    &fallback
                }
                Err(_) => return Vec::new(),
            }
        }
    };

    match matcher {
        LineMatcher::Pattern { regex, multiline } => {
            let pattern_matcher = PatternMatcher {
                regex: regex.clone(),
            };
            let mut sink = CollectSink {
                matches: Vec::new(),
                max_matches: options.max_matches_per_file,
                regex,
            };

            let mut searcher = SearcherBuilder::new()
                .line_number(true)
                .multi_line(*multiline)
                .build();
            let _ = searcher.search_slice(&pattern_matcher, bytes, &mut sink);
            sink.matches
        }
        LineMatcher::Fuzzy {
            needle,
            case_sensitive,
        } => fuzzy_search_slice(needle, *case_sensitive, bytes, options.max_matches_per_file),
    }
}

fn fuzzy_search_slice(
    needle: &str,
    case_sensitive: bool,
    bytes: &[u8],
    max_matches: usize,
) -> Vec<GrepMatch> {
    let mut matches = Vec::new();
    let mut line_start = 0usize;
    let mut line_number = 0u64;

    for newline in memchr::memchr_iter(b'\n', bytes) {
        line_number += 1;
        if let Some(m) = fuzzy_match_line(
            needle,
            case_sensitive,
            line_start,
            &bytes[line_start..newline],
            line_number,
        ) {
            matches.push(m);
            if matches.len() >= max_matches {
                return matches;
            }
        }
        line_start = newline + 1;
    }

    if line_start < bytes.len() {
        line_number += 1;
        if let Some(m) = fuzzy_match_line(
            needle,
            case_sensitive,
            line_start,
            &bytes[line_start..],
            line_number,
        ) {
            matches.push(m);
        }
    }

    matches
}

fn fuzzy_match_line(
    needle: &str,
    case_sensitive: bool,
    line_start: usize,
    line_bytes: &[u8],
    line_number: u64,
) -> Option<GrepMatch> {
    let line_str = String::from_utf8_lossy(line_bytes);
    let trimmed = line_str.trim_end_matches('\r');
    let aligned = score_line(needle, trimmed, case_sensitive)?;

    let display = truncate_display(trimmed);
    let display_len = display.len() as u32;
    let match_ranges: Vec<(u32, u32)> = aligned
        .ranges
        .into_iter()
        .filter(|(start, _)| *start < display_len)
        .map(|(start, end)| (start, end.min(display_len)))
        .collect();
    let col = match_ranges.first().map_or(0, |(start, _)| *start as usize);

    Some(GrepMatch {
        file_index: 0,
        line_number,
        col,
        byte_offset: line_start as u64,
        line_content: display.to_string(),
        match_ranges,
        fuzzy_score: Some(aligned.score),
    })
}

/// Empty pattern: VCS-modified and untracked files in frecency order, one
/// sentinel match per file. The useful "what am I working on" state.
fn welcome_state<'a>(
    files: &'a [FileEntry],
    parsed: &ParsedQuery<'_>,
    total_files: usize,
) -> GrepResult<'a> {
    let is_changed = |f: &FileEntry| {
        f.vcs_status
            .is_some_and(|s| is_modified_status(s) || s.contains(git2::Status::WT_NEW))
    };

    let constraint_filter = FileFilter::compile(&parsed.constraints);
    let mut changed: Vec<&FileEntry> = files
        .iter()
        .filter(|f| is_changed(f))
        .filter(|f| {
            constraint_filter
                .as_ref()
                .is_none_or(|filter| filter.matches(*f))
        })
        .collect();

    glidesort::sort_by(&mut changed, |a, b| {
        b.total_frecency_score
            .cmp(&a.total_frecency_score)
            .then_with(|| a.relative_path.cmp(&b.relative_path))
    });
    let filtered_file_count = changed.len();
    changed.truncate(WELCOME_STATE_LIMIT);

    let matches: Vec<GrepMatch> = changed
        .iter()
        .enumerate()
        .map(|(i, _)| GrepMatch {
            file_index: i,
            line_number: 0,
            col: 0,
            byte_offset: 0,
            line_content: String::new(),
            match_ranges: Vec::new(),
            fuzzy_score: None,
        })
        .collect();

    GrepResult {
        total_matched: matches.len(),
        matches,
        files: changed,
        total_files_searched: 0,
        total_files,
        filtered_file_count,
        next_cursor: None,
        regex_fallback_error: None,
    }
}
