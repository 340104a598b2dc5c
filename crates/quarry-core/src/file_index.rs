//! The in-memory file table: concurrent initial scan, swap-on-completion
//! publication, watcher-driven incremental updates, and the generation
//! counter consumers use to detect staleness.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use ahash::AHashMap;
use ignore::{WalkBuilder, WalkState};
use rayon::prelude::*;
use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::frecency::FrecencyTracker;
use crate::git::{GitStatusCache, scan_status_options};
use crate::mmap_cache::MmapCache;
use crate::types::FileEntry;

/// Scan lifecycle. `Restarting` marks a scan that was cancelled so a new
/// one (possibly over a different base path) can take over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Scanning,
    Restarting,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ScanProgress {
    pub scanned_files_count: usize,
    pub is_scanning: bool,
    /// Set when the last scan failed to make any progress.
    pub last_error: Option<String>,
}

#[derive(Debug)]
struct ScanStatus {
    state: ScanState,
    last_error: Option<String>,
}

/// Scan coordination shared between the index, the scanner thread, and
/// `wait_for_scan` callers.
#[derive(Debug)]
pub struct ScanSignals {
    status: Mutex<ScanStatus>,
    completed: Condvar,
    scanned_count: AtomicUsize,
    cancel: AtomicBool,
}

impl ScanSignals {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            status: Mutex::new(ScanStatus {
                state: ScanState::Idle,
                last_error: None,
            }),
            completed: Condvar::new(),
            scanned_count: AtomicUsize::new(0),
            cancel: AtomicBool::new(false),
        })
    }

    /// Move to `Scanning` unless a scan is already running.
    /// Returns false when one is.
    pub fn begin_scan(&self) -> bool {
        let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        if status.state == ScanState::Scanning {
            return false;
        }
        status.state = ScanState::Scanning;
        status.last_error = None;
        self.scanned_count.store(0, Ordering::Relaxed);
        self.cancel.store(false, Ordering::Relaxed);
        true
    }

    pub fn finish_scan(&self, error: Option<String>) {
        let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        status.state = ScanState::Idle;
        status.last_error = error;
        self.completed.notify_all();
    }

    /// Ask the in-flight scan to stop at the next directory boundary.
    pub fn request_restart(&self) {
        self.cancel.store(true, Ordering::Relaxed);
        let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        if status.state == ScanState::Scanning {
            status.state = ScanState::Restarting;
        }
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> ScanState {
        self.status.lock().unwrap_or_else(|e| e.into_inner()).state
    }

    pub fn is_scanning(&self) -> bool {
        self.state() != ScanState::Idle
    }

    pub fn progress(&self) -> ScanProgress {
        let status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        ScanProgress {
            scanned_files_count: self.scanned_count.load(Ordering::Relaxed),
            is_scanning: status.state != ScanState::Idle,
            last_error: status.last_error.clone(),
        }
    }

    /// Block until the scan completes or the timeout elapses.
    /// Returns true when the index is idle.
    pub fn wait_for_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        while status.state != ScanState::Idle {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return false;
            };
            let (guard, result) = self
                .completed
                .wait_timeout(status, remaining)
                .unwrap_or_else(|e| e.into_inner());
            status = guard;
            if result.timed_out() && status.state != ScanState::Idle {
                return false;
            }
        }
        true
    }
}

/// The prepared table a scan publishes: entries in canonical order plus the
/// O(1) path lookup.
#[derive(Debug, Clone, Default)]
pub struct FileTable {
    pub files: Vec<FileEntry>,
    pub path_to_index: AHashMap<PathBuf, usize>,
    pub git_workdir: Option<PathBuf>,
}

impl FileTable {
    /// Canonical order: frecency descending, relative path ascending.
    /// This is also the grep walk order.
    fn sort_and_reindex(&mut self) {
        self.files.par_sort_unstable_by(|a, b| {
            b.total_frecency_score
                .cmp(&a.total_frecency_score)
                .then_with(|| a.relative_path.cmp(&b.relative_path))
        });

        self.path_to_index = self
            .files
            .iter()
            .enumerate()
            .map(|(idx, file)| (file.path.clone(), idx))
            .collect();
    }
}

pub struct FileIndex {
    base_path: PathBuf,
    table: FileTable,
    generation: u64,
    signals: Arc<ScanSignals>,
}

impl std::fmt::Debug for FileIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileIndex")
            .field("base_path", &self.base_path)
            .field("files", &self.table.files.len())
            .field("generation", &self.generation)
            .field("state", &self.signals.state())
            .finish()
    }
}

impl FileIndex {
    pub fn new(base_path: PathBuf, signals: Arc<ScanSignals>) -> Result<Self> {
        if !base_path.exists() {
            return Err(Error::NotFound(base_path));
        }
        if !base_path.is_dir() {
            return Err(Error::InvalidArgument(format!(
                "base path is not a directory: {}",
                base_path.display()
            )));
        }

        Ok(Self {
            base_path,
            table: FileTable::default(),
            generation: 0,
            signals,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn git_workdir(&self) -> Option<&Path> {
        self.table.git_workdir.as_deref()
    }

    /// Entries in canonical (frecency-descending) order.
    pub fn files(&self) -> &[FileEntry] {
        &self.table.files
    }

    /// Monotone counter bumped on every published rescan and every applied
    /// watcher batch. Consumers caching positions must re-check it.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn signals(&self) -> &Arc<ScanSignals> {
        &self.signals
    }

    pub fn entry_by_path(&self, path: &Path) -> Option<&FileEntry> {
        self.table
            .path_to_index
            .get(path)
            .and_then(|&idx| self.table.files.get(idx))
    }

    /// Swap in a freshly scanned table.
    pub fn publish_scan(&mut self, table: FileTable) {
        self.table = table;
        self.generation += 1;
    }

    /// Swap the base path for a restart; the table empties until the new
    /// scan publishes.
    pub fn swap_base_path(&mut self, base_path: PathBuf) {
        self.base_path = base_path;
        self.table = FileTable::default();
        self.generation += 1;
    }

    /// Apply one debounced watcher batch as a single transaction: removals,
    /// then upserts, one generation bump, one re-sort. Returns the paths
    /// whose VCS status needs a refresh.
    pub fn apply_watcher_batch(
        &mut self,
        removed: &[PathBuf],
        changed: &[PathBuf],
        frecency: Option<&FrecencyTracker>,
        mmap_cache: &MmapCache,
    ) -> Vec<PathBuf> {
        let mut status_refresh = Vec::with_capacity(changed.len());
        let mut dirty = false;

        if !removed.is_empty() {
            let mut exact: ahash::AHashSet<&Path> = ahash::AHashSet::new();
            let mut dir_prefixes: Vec<&Path> = Vec::new();
            for path in removed {
                mmap_cache.invalidate(path);
                if self.table.path_to_index.contains_key(path) {
                    exact.insert(path.as_path());
                } else {
                    // a removed directory arrives as one event for its path
                    dir_prefixes.push(path.as_path());
                }
            }

            let before = self.table.files.len();
            self.table.files.retain(|f| {
                !exact.contains(f.path.as_path())
                    && !dir_prefixes.iter().any(|dir| f.path.starts_with(dir))
            });

            if self.table.files.len() != before {
                dirty = true;
                // upserts below need fresh indices
                self.table.path_to_index = self
                    .table
                    .files
                    .iter()
                    .enumerate()
                    .map(|(idx, file)| (file.path.clone(), idx))
                    .collect();
            }
        }

        for path in changed {
            mmap_cache.invalidate(path);

            if let Some(&idx) = self.table.path_to_index.get(path) {
                let entry = &mut self.table.files[idx];
                let modified = std::fs::metadata(path)
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .and_then(|t| t.duration_since(std::time::SystemTime::UNIX_EPOCH).ok())
                    .map_or(0, |d| d.as_secs());
                if modified > entry.modified {
                    entry.modified = modified;
                    if let Some(tracker) = frecency {
                        tracker.track_modification(path, modified);
                        entry.refresh_frecency(tracker);
                    }
                }
            } else {
                let mut entry = FileEntry::new(path.clone(), &self.base_path, None);
                if let Some(tracker) = frecency {
                    entry.refresh_frecency(tracker);
                }
                self.table
                    .path_to_index
                    .insert(path.clone(), self.table.files.len());
                self.table.files.push(entry);
            }

            status_refresh.push(path.clone());
            dirty = true;
        }

        if dirty {
            self.table.sort_and_reindex();
            self.generation += 1;
        }

        status_refresh
    }

    /// Fold a status snapshot into the entries. Returns how many entries
    /// were updated.
    pub fn update_vcs_statuses(
        &mut self,
        statuses: GitStatusCache,
        frecency: Option<&FrecencyTracker>,
    ) -> usize {
        debug!(statuses_count = statuses.statuses_len(), "Updating VCS statuses");

        let mut updated = 0;
        for (path, status) in statuses {
            let Some(&idx) = self.table.path_to_index.get(&path) else {
                // statuses can reference files the ignore rules excluded
                continue;
            };
            let entry = &mut self.table.files[idx];
            entry.vcs_status = Some(status);
            if let Some(tracker) = frecency {
                entry.refresh_frecency(tracker);
            }
            updated += 1;
        }
        updated
    }

    pub fn refresh_single_frecency(&mut self, path: &Path, tracker: &FrecencyTracker) {
        if let Some(&idx) = self.table.path_to_index.get(path) {
            self.table.files[idx].refresh_frecency(tracker);
        }
    }
}

/// Walk the base path and prepare a [`FileTable`]: parallel ignore-aware
/// walk, VCS status sweep on its own thread, frecency applied, canonical
/// sort. Returns `Err` only when no progress at all was possible.
pub fn scan_filesystem(
    base_path: &Path,
    include_hidden: bool,
    signals: &ScanSignals,
    frecency: Option<&FrecencyTracker>,
) -> Result<FileTable> {
    let scan_start = Instant::now();
    info!("SCAN: starting parallel filesystem walk and VCS status sweep");

    std::thread::scope(|s| {
        // The status sweep is effectively a second tree traversal; on large
        // repos it costs hundreds of milliseconds, so it runs concurrently.
        let git_handle = s.spawn(|| {
            let git_workdir = git2::Repository::discover(base_path)
                .ok()
                .and_then(|repo| repo.workdir().map(Path::to_path_buf));

            if let Some(ref workdir) = git_workdir {
                debug!("Git repository found at: {}", workdir.display());
            } else {
                debug!("No git repository found for: {}", base_path.display());
            }

            let status_cache =
                GitStatusCache::read_git_status(git_workdir.as_deref(), &mut scan_status_options());

            (git_workdir, status_cache)
        });

        let walker = WalkBuilder::new(base_path)
            .hidden(!include_hidden)
            .git_ignore(true)
            .git_exclude(true)
            .git_global(true)
            .ignore(true)
            .follow_links(false)
            .build_parallel();

        let files = Mutex::new(Vec::new());
        let skipped = AtomicUsize::new(0);
        walker.run(|| {
            let files = &files;
            let skipped = &skipped;
            let base_path = base_path.to_path_buf();

            Box::new(move |result| {
                if signals.cancel_requested() {
                    return WalkState::Quit;
                }

                let entry = match result {
                    Ok(entry) => entry,
                    Err(e) => {
                        skipped.fetch_add(1, Ordering::Relaxed);
                        debug!(error = %e, "Skipping unreadable entry");
                        return WalkState::Continue;
                    }
                };

                if entry.file_type().is_some_and(|ft| ft.is_file()) {
                    let path = entry.path();
                    if is_git_metadata_file(path) {
                        return WalkState::Continue;
                    }

                    // VCS status is folded in after the sweep joins
                    let file_entry = FileEntry::new(path.to_path_buf(), &base_path, None);
                    if let Ok(mut files) = files.lock() {
                        files.push(file_entry);
                        signals.scanned_count.fetch_add(1, Ordering::Relaxed);
                    }
                }
                WalkState::Continue
            })
        });

        let mut files = files.into_inner().unwrap_or_else(|e| e.into_inner());
        let skipped = skipped.load(Ordering::Relaxed);
        info!(
            files = files.len(),
            skipped,
            "SCAN: walk completed in {:?}",
            scan_start.elapsed()
        );

        if signals.cancel_requested() {
            return Err(Error::Cancelled);
        }

        let (git_workdir, git_cache) = git_handle.join().map_err(|_| {
            error!("VCS status thread panicked");
            Error::Internal("status sweep thread panicked".into())
        })?;

        if files.is_empty() && skipped > 0 {
            return Err(Error::ScanFailed(format!(
                "no entries readable under {} ({skipped} skipped)",
                base_path.display()
            )));
        }

        files.par_iter_mut().for_each(|file| {
            if let Some(git_cache) = &git_cache {
                file.vcs_status = git_cache.lookup_status(&file.path);
            }
            if let Some(tracker) = frecency {
                file.refresh_frecency(tracker);
            }
        });

        let mut table = FileTable {
            files,
            path_to_index: AHashMap::new(),
            git_workdir,
        };
        table.sort_and_reindex();

        info!(
            total = table.files.len(),
            "SCAN: completed in {:?}",
            scan_start.elapsed()
        );
        Ok(table)
    })
}

/// Pre-fault the mmap cache for every eligible file so the first grep does
/// not pay mapping and page-fault costs. Runs on the rayon pool.
pub fn warmup_mmaps(files: &[FileEntry], mmap_cache: &MmapCache) {
    let warmup_start = Instant::now();
    let warmed = AtomicUsize::new(0);

    files.par_iter().for_each(|file| {
        if file.is_binary || file.size == 0 {
            return;
        }

        if let Some(mmap) = mmap_cache.get_or_insert(&file.path, file.size) {
            // Touch the first byte: the page fault kicks off kernel
            // readahead, cheaper than madvise and portable.
            let _ = std::hint::black_box(mmap.first());
            warmed.fetch_add(1, Ordering::Relaxed);
        }
    });

    info!(
        warmed = warmed.load(Ordering::Relaxed),
        total = files.len(),
        "Mmap warmup completed in {:?}",
        warmup_start.elapsed()
    );
}

#[inline]
fn is_git_metadata_file(path: &Path) -> bool {
    path.components().any(|c| c.as_os_str() == ".git")
}
