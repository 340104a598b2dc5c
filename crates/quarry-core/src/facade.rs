//! The public engine handle.
//!
//! One [`Quarry`] per indexed tree; handles are independent, any number can
//! coexist in a process. Reads (`search`, `live_grep`, progress queries) run
//! concurrently; mutators serialise on the subsystem locks. `scan_files`,
//! `restart_index`, and the persistence half of `track_access` are
//! fire-and-forget.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::file_index::{
    FileIndex, ScanProgress, ScanSignals, scan_filesystem, warmup_mmaps,
};
use crate::frecency::FrecencyTracker;
use crate::git::{GitStatusCache, refresh_status_options};
use crate::grep::{GrepOptions, GrepResultPayload, grep_search};
use crate::health::{HealthReport, StoreHealth, vcs_health};
use crate::history::QueryHistory;
use crate::mmap_cache::MmapCache;
use crate::score::{
    DEFAULT_FRECENCY_BOOST_CEILING, DEFAULT_SPECIAL_FILENAMES, SpecialFilenames, clamp_query,
    match_and_score_files,
};
use crate::types::{Pagination, ScoringContext, SearchResultPayload};
use crate::watcher::{IndexWatcher, WatcherContext};
use crate::{SharedFrecency, SharedHistory, SharedIndex};

#[derive(Debug, Clone, Deserialize)]
pub struct LogOptions {
    pub log_file_path: PathBuf,
    #[serde(default)]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InitOptions {
    pub base_path: PathBuf,
    /// Omit to keep frecency in memory only.
    #[serde(default)]
    pub frecency_db_path: Option<PathBuf>,
    /// Omit to keep query history in memory only.
    #[serde(default)]
    pub history_db_path: Option<PathBuf>,
    /// Skip LMDB file locks and syncs; faster, loses the latest writes on
    /// a crash.
    #[serde(default)]
    pub use_unsafe_no_lock: bool,
    /// Pre-map every eligible file once the scan publishes.
    #[serde(default)]
    pub warmup_mmap_cache: bool,
    /// Index dot-files too.
    #[serde(default)]
    pub include_hidden: bool,
    /// Override the entry-point basenames that get the special bonus.
    #[serde(default)]
    pub special_filenames: Option<Vec<String>>,
    #[serde(default)]
    pub log: Option<LogOptions>,
}

impl InitOptions {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            frecency_db_path: None,
            history_db_path: None,
            use_unsafe_no_lock: false,
            warmup_mmap_cache: false,
            include_hidden: false,
            special_filenames: None,
            log: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchOptions {
    /// 0 means the shared rayon pool.
    pub max_threads: usize,
    /// Relative path of the currently open file, deprioritised in results.
    pub current_file: Option<String>,
    pub combo_boost_multiplier: i32,
    pub min_combo_count: u32,
    pub page_index: usize,
    pub page_size: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            max_threads: 0,
            current_file: None,
            combo_boost_multiplier: 100,
            min_combo_count: 3,
            page_index: 0,
            page_size: 100,
        }
    }
}

/// State shared with the scanner thread, the watcher, and fire-and-forget
/// operations. The watcher and spawned threads hold only `Weak` references
/// to it, so dropping the handle tears everything down.
struct Shared {
    index: SharedIndex,
    frecency: SharedFrecency,
    history: SharedHistory,
    mmap_cache: Arc<MmapCache>,
    signals: Arc<ScanSignals>,
    watcher: Mutex<Option<IndexWatcher>>,
    include_hidden: bool,
    warmup_mmap_cache: bool,
    destroyed: AtomicBool,
}

pub struct Quarry {
    shared: Arc<Shared>,
    special_filenames: Arc<SpecialFilenames>,
    _log_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

impl std::fmt::Debug for Quarry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Quarry")
            .field("destroyed", &self.shared.destroyed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Quarry {
    pub fn create(options: InitOptions) -> Result<Self> {
        let log_guard = match &options.log {
            Some(log) => Some(crate::log::init_tracing(
                &log.log_file_path,
                log.log_level.as_deref(),
            )?),
            None => None,
        };

        if options.base_path.as_os_str().is_empty() {
            return Err(Error::InvalidArgument("base_path is empty".into()));
        }
        let base_path = crate::path_utils::canonicalize(&options.base_path)
            .map_err(|_| Error::NotFound(options.base_path.clone()))?;

        info!(
            base_path = %base_path.display(),
            warmup = options.warmup_mmap_cache,
            "Creating engine"
        );

        let frecency = open_frecency(options.frecency_db_path.as_deref(), options.use_unsafe_no_lock);
        let history = open_history(options.history_db_path.as_deref(), options.use_unsafe_no_lock);

        let signals = ScanSignals::new();
        let index = FileIndex::new(base_path, Arc::clone(&signals))?;

        let shared = Arc::new(Shared {
            index: Arc::new(RwLock::new(Some(index))),
            frecency: Arc::new(RwLock::new(Some(frecency))),
            history: Arc::new(RwLock::new(Some(history))),
            mmap_cache: Arc::new(MmapCache::new(crate::types::LARGE_FILE_THRESHOLD)),
            signals,
            watcher: Mutex::new(None),
            include_hidden: options.include_hidden,
            warmup_mmap_cache: options.warmup_mmap_cache,
            destroyed: AtomicBool::new(false),
        });

        spawn_scan(Arc::downgrade(&shared));

        let special_filenames = match options.special_filenames {
            Some(patterns) => Arc::new(SpecialFilenames::new(patterns)),
            None => Arc::new(DEFAULT_SPECIAL_FILENAMES.clone()),
        };

        Ok(Self {
            shared,
            special_filenames,
            _log_guard: log_guard,
        })
    }

    /// Paginated fuzzy filename search.
    pub fn search(&self, query: &str, options: &SearchOptions) -> Result<SearchResultPayload> {
        self.ensure_alive()?;
        if options.page_size == 0 {
            return Err(Error::InvalidArgument("page_size must be positive".into()));
        }

        let query = clamp_query(query);

        // One history round-trip per search; O(1) per candidate afterwards.
        let combo_counts = {
            let history = self
                .shared
                .history
                .read()
                .map_err(|_| Error::poisoned("history"))?;
            history
                .as_ref()
                .and_then(|h| h.combo_counts_for(query))
        };

        let index_guard = self
            .shared
            .index
            .read()
            .map_err(|_| Error::poisoned("index"))?;
        let index = index_guard.as_ref().ok_or(Error::Cancelled)?;
        let files = index.files();

        let parsed = quarry_query_parser::QueryParser::default().parse(query);
        let effective_len = parsed.fuzzy_parts().first().map_or(0, |p| p.len());
        // short queries match nearly everything; keep typo tolerance tight
        let max_typos = (effective_len as u16 / 4).clamp(2, 6);

        let context = ScoringContext {
            raw_query: query,
            parsed_query: parsed,
            current_file: options.current_file.as_deref(),
            max_typos,
            max_threads: options.max_threads,
            combo_counts: combo_counts.as_ref(),
            combo_boost_multiplier: options.combo_boost_multiplier,
            min_combo_count: options.min_combo_count,
            frecency_boost_ceiling: DEFAULT_FRECENCY_BOOST_CEILING,
            special_filenames: &self.special_filenames,
            pagination: Pagination {
                page_index: options.page_index,
                page_size: options.page_size,
            },
        };

        let location = context.parsed_query.location;
        let (items, scores, total_matched) =
            run_in_pool(options.max_threads, || match_and_score_files(files, &context));

        self.ensure_alive()?;

        let result = crate::types::SearchResult {
            items,
            scores,
            total_matched,
            total_files: files.len(),
            location,
        };
        Ok(result.into_payload())
    }

    /// Paginated live content grep.
    pub fn live_grep(&self, query: &str, options: &GrepOptions) -> Result<GrepResultPayload> {
        self.ensure_alive()?;
        if options.page_limit == 0 {
            return Err(Error::InvalidArgument("page_limit must be positive".into()));
        }

        let index_guard = self
            .shared
            .index
            .read()
            .map_err(|_| Error::poisoned("index"))?;
        let index = index_guard.as_ref().ok_or(Error::Cancelled)?;
        let files = index.files();

        let result = grep_search(
            files,
            query,
            options,
            &self.shared.mmap_cache,
            Some(&self.shared.destroyed),
        )?;

        Ok(result.into_payload())
    }

    /// Request a fresh scan; returns immediately.
    pub fn scan_files(&self) -> Result<()> {
        self.ensure_alive()?;
        spawn_scan(Arc::downgrade(&self.shared));
        Ok(())
    }

    pub fn is_scanning(&self) -> Result<bool> {
        self.ensure_alive()?;
        Ok(self.shared.signals.is_scanning())
    }

    pub fn scan_progress(&self) -> Result<ScanProgress> {
        self.ensure_alive()?;
        Ok(self.shared.signals.progress())
    }

    /// Block until the current scan finishes. Returns `true` when idle.
    pub fn wait_for_scan(&self, timeout_ms: u64) -> Result<bool> {
        self.ensure_alive()?;
        Ok(self
            .shared
            .signals
            .wait_for_idle(Duration::from_millis(timeout_ms)))
    }

    /// Cancel current activity, swap the base path, and rescan. Returns
    /// immediately; progress is observable through `scan_progress`.
    pub fn restart_index(&self, new_base_path: impl AsRef<Path>) -> Result<()> {
        self.ensure_alive()?;
        let new_base_path = crate::path_utils::canonicalize(new_base_path.as_ref())
            .map_err(|_| Error::NotFound(new_base_path.as_ref().to_path_buf()))?;
        if !new_base_path.is_dir() {
            return Err(Error::InvalidArgument(format!(
                "base path is not a directory: {}",
                new_base_path.display()
            )));
        }

        let weak = Arc::downgrade(&self.shared);
        std::thread::spawn(move || run_restart(weak, new_base_path));
        Ok(())
    }

    /// Record a file access for frecency. The in-memory score updates
    /// before returning; the store write happens in the background.
    pub fn track_access(&self, absolute_path: impl AsRef<Path>) -> Result<()> {
        self.ensure_alive()?;
        let path = crate::path_utils::canonicalize(absolute_path.as_ref())
            .unwrap_or_else(|_| absolute_path.as_ref().to_path_buf());

        let record = {
            let frecency = self
                .shared
                .frecency
                .read()
                .map_err(|_| Error::poisoned("frecency"))?;
            let Some(tracker) = frecency.as_ref() else {
                return Err(Error::Cancelled);
            };
            tracker.bump_access(&path)
        };

        // Lock order everywhere is index before frecency; reacquire the
        // tracker under the index lock to refresh the affected entry.
        if let Ok(mut index) = self.shared.index.write() {
            if let Some(ref mut index) = *index {
                if let Ok(frecency) = self.shared.frecency.read() {
                    if let Some(tracker) = frecency.as_ref() {
                        index.refresh_single_frecency(&path, tracker);
                    }
                }
            }
        }

        let weak = Arc::downgrade(&self.shared);
        std::thread::spawn(move || {
            let Some(shared) = weak.upgrade() else { return };
            if let Ok(frecency) = shared.frecency.read() {
                if let Some(tracker) = frecency.as_ref() {
                    tracker.persist_record(&path, record);
                }
            }
        });

        Ok(())
    }

    /// Re-read every VCS status. Returns how many entries changed.
    pub fn refresh_vcs_status(&self) -> Result<usize> {
        self.ensure_alive()?;
        refresh_vcs_blocking(&self.shared)
    }

    /// Record that `query` led to `selected_path` being opened.
    pub fn track_query(
        &self,
        query: &str,
        selected_path: impl AsRef<Path>,
    ) -> Result<()> {
        self.ensure_alive()?;
        let path = crate::path_utils::canonicalize(selected_path.as_ref())
            .unwrap_or_else(|_| selected_path.as_ref().to_path_buf());

        let mut history = self
            .shared
            .history
            .write()
            .map_err(|_| Error::poisoned("history"))?;
        if let Some(history) = history.as_mut() {
            history.track_completion(query, &path);
        }
        Ok(())
    }

    /// Cycle through previous queries; `offset = 0` is the most recent.
    pub fn historical_query(&self, offset: usize) -> Result<Option<String>> {
        self.ensure_alive()?;
        let history = self
            .shared
            .history
            .read()
            .map_err(|_| Error::poisoned("history"))?;
        Ok(history.as_ref().and_then(|h| h.historical_query(offset)))
    }

    pub fn health_check(&self, test_path: Option<&Path>) -> HealthReport {
        let index_health = self.shared.index.read().ok().and_then(|guard| {
            guard.as_ref().map(|index| {
                let progress = self.shared.signals.progress();
                crate::health::IndexHealth {
                    base_path: index.base_path().to_string_lossy().into_owned(),
                    is_scanning: progress.is_scanning,
                    indexed_files: index.files().len(),
                    generation: index.generation(),
                    scan_error: progress.last_error,
                }
            })
        });

        let base_dir = self
            .shared
            .index
            .read()
            .ok()
            .and_then(|g| g.as_ref().map(|i| i.base_path().to_path_buf()));
        let probe = test_path
            .map(Path::to_path_buf)
            .or(base_dir)
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_default());

        HealthReport {
            version: env!("CARGO_PKG_VERSION"),
            vcs: vcs_health(&probe),
            index: index_health,
            frecency: Some(store_health(
                self.shared.frecency.read().ok().as_deref(),
                |t: &FrecencyTracker| (t.is_persistent(), t.health()),
            )),
            history: Some(store_health(
                self.shared.history.read().ok().as_deref(),
                |h: &QueryHistory| (h.is_persistent(), h.health()),
            )),
        }
    }

    /// Tear the engine down: cancel background activity, stop the watcher,
    /// retire the subsystems. In-flight calls observing this return
    /// `Cancelled`. Idempotent.
    pub fn destroy(&self) {
        if self.shared.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("Destroying engine");
        self.shared.signals.request_restart();

        if let Ok(mut watcher) = self.shared.watcher.lock() {
            if let Some(watcher) = watcher.take() {
                watcher.stop();
            }
        }

        if let Ok(mut index) = self.shared.index.write() {
            *index = None;
        }
        if let Ok(mut frecency) = self.shared.frecency.write() {
            *frecency = None;
        }
        if let Ok(mut history) = self.shared.history.write() {
            *history = None;
        }
        self.shared.mmap_cache.clear();
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.shared.destroyed.load(Ordering::Relaxed) {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

impl Drop for Quarry {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn open_frecency(db_path: Option<&Path>, unsafe_no_lock: bool) -> FrecencyTracker {
    match db_path {
        Some(path) => match FrecencyTracker::new(path, unsafe_no_lock) {
            Ok(tracker) => tracker,
            Err(e) => {
                warn!(error = %e, "Frecency store unavailable, falling back to in-memory");
                FrecencyTracker::ephemeral()
            }
        },
        None => FrecencyTracker::ephemeral(),
    }
}

fn open_history(db_path: Option<&Path>, unsafe_no_lock: bool) -> QueryHistory {
    match db_path {
        Some(path) => match QueryHistory::new(path, unsafe_no_lock) {
            Ok(history) => history,
            Err(e) => {
                warn!(error = %e, "History store unavailable, falling back to in-memory");
                QueryHistory::ephemeral()
            }
        },
        None => QueryHistory::ephemeral(),
    }
}

fn store_health<T>(
    guard: Option<&Option<T>>,
    probe: impl FnOnce(&T) -> (bool, Option<Result<crate::health::DbHealth>>),
) -> StoreHealth {
    match guard.and_then(|g| g.as_ref()) {
        Some(store) => {
            let (persistent, health) = probe(store);
            let (db, error) = match health {
                Some(Ok(db)) => (Some(db), None),
                Some(Err(e)) => (None, Some(e.to_string())),
                None => (None, None),
            };
            StoreHealth {
                initialized: true,
                persistent,
                db,
                error,
            }
        }
        None => StoreHealth {
            initialized: false,
            persistent: false,
            db: None,
            error: None,
        },
    }
}

fn run_in_pool<R: Send>(max_threads: usize, f: impl FnOnce() -> R + Send) -> R {
    if max_threads == 0 {
        return f();
    }
    match rayon::ThreadPoolBuilder::new()
        .num_threads(max_threads)
        .build()
    {
        Ok(pool) => pool.install(f),
        Err(_) => f(),
    }
}

/// Transition to `Scanning` synchronously, then run the scan on its own
/// thread - a `wait_for_scan` issued right after this call must block.
fn spawn_scan(shared: Weak<Shared>) {
    let Some(strong) = shared.upgrade() else { return };
    if strong.destroyed.load(Ordering::Relaxed) {
        return;
    }
    if !strong.signals.begin_scan() {
        return; // a scan is already running
    }
    drop(strong);
    std::thread::spawn(move || {
        if let Some(shared) = shared.upgrade() {
            scan_body(&shared);
        }
    });
}

/// The scan itself; `begin_scan` has already succeeded.
fn scan_body(shared: &Arc<Shared>) {
    let base_path = {
        let Ok(guard) = shared.index.read() else {
            shared.signals.finish_scan(Some("index lock poisoned".into()));
            return;
        };
        match guard.as_ref() {
            Some(index) => index.base_path().to_path_buf(),
            None => {
                shared.signals.finish_scan(None);
                return;
            }
        }
    };

    let scan_result = catch_unwind(AssertUnwindSafe(|| {
        let frecency_guard = shared.frecency.read().ok();
        let frecency = frecency_guard.as_ref().and_then(|g| g.as_ref());
        scan_filesystem(
            &base_path,
            shared.include_hidden,
            &shared.signals,
            frecency,
        )
    }));

    match scan_result {
        Err(_) => {
            error!("Scan thread panicked");
            shared
                .signals
                .finish_scan(Some("internal error: scan thread panicked".into()));
        }
        Ok(Err(Error::Cancelled)) => {
            info!("Scan cancelled");
            shared.signals.finish_scan(None);
        }
        Ok(Err(e)) => {
            error!(error = %e, "Scan failed");
            shared.signals.finish_scan(Some(e.to_string()));
        }
        Ok(Ok(table)) => {
            let published = {
                match shared.index.write() {
                    Ok(mut guard) => match guard.as_mut() {
                        Some(index) => {
                            index.publish_scan(table);
                            true
                        }
                        None => false,
                    },
                    Err(_) => false,
                }
            };
            shared.signals.finish_scan(None);

            if published {
                ensure_watcher(shared);

                if shared.warmup_mmap_cache {
                    // post-scan phase; queries are already live
                    if let Ok(guard) = shared.index.read() {
                        if let Some(index) = guard.as_ref() {
                            warmup_mmaps(index.files(), &shared.mmap_cache);
                        }
                    }
                }
            }
        }
    }
}

fn run_restart(shared: Weak<Shared>, new_base_path: PathBuf) {
    let Some(shared) = shared.upgrade() else { return };
    if shared.destroyed.load(Ordering::Relaxed) {
        return;
    }

    info!(new_base_path = %new_base_path.display(), "Restarting index");
    shared.signals.request_restart();
    shared.signals.wait_for_idle(Duration::from_secs(60));

    if let Ok(mut watcher) = shared.watcher.lock() {
        if let Some(watcher) = watcher.take() {
            watcher.stop();
        }
    }
    shared.mmap_cache.clear();

    if let Ok(mut guard) = shared.index.write() {
        if let Some(index) = guard.as_mut() {
            index.swap_base_path(new_base_path);
        }
    }

    if shared.signals.begin_scan() {
        scan_body(&shared);
    }
}

fn ensure_watcher(shared: &Arc<Shared>) {
    if shared.destroyed.load(Ordering::Relaxed) {
        return;
    }
    {
        let Ok(watcher) = shared.watcher.lock() else { return };
        if watcher.is_some() {
            return;
        }
    }

    let (base_path, git_workdir) = {
        let Ok(guard) = shared.index.read() else { return };
        let Some(index) = guard.as_ref() else { return };
        (
            index.base_path().to_path_buf(),
            index.git_workdir().map(Path::to_path_buf),
        )
    };

    let rescan_weak = Arc::downgrade(shared);
    let refresh_weak = Arc::downgrade(shared);
    let context = WatcherContext {
        index: Arc::downgrade(&shared.index),
        frecency: Arc::downgrade(&shared.frecency),
        mmap_cache: Arc::downgrade(&shared.mmap_cache),
        git_workdir,
        rescan: Box::new(move || spawn_scan(rescan_weak.clone())),
        refresh_vcs: Box::new(move || {
            let weak = refresh_weak.clone();
            std::thread::spawn(move || {
                if let Some(shared) = weak.upgrade() {
                    if let Err(e) = refresh_vcs_blocking(&shared) {
                        error!(error = %e, "Debounced VCS refresh failed");
                    }
                }
            });
        }),
    };

    match IndexWatcher::new(base_path, context) {
        Ok(new_watcher) => {
            if let Ok(mut watcher) = shared.watcher.lock() {
                *watcher = Some(new_watcher);
            }
        }
        Err(e) => error!(error = %e, "Failed to initialize file watcher"),
    }
}

/// Fetch all statuses without holding the index lock, then fold them in
/// under the shortest possible write lock.
fn refresh_vcs_blocking(shared: &Shared) -> Result<usize> {
    let workdir = {
        let guard = shared.index.read().map_err(|_| Error::poisoned("index"))?;
        let index = guard.as_ref().ok_or(Error::Cancelled)?;
        index.git_workdir().map(Path::to_path_buf)
    };

    let Some(statuses) =
        GitStatusCache::read_git_status(workdir.as_deref(), &mut refresh_status_options())
    else {
        return Ok(0);
    };

    let mut guard = shared.index.write().map_err(|_| Error::poisoned("index"))?;
    let index = guard.as_mut().ok_or(Error::Cancelled)?;

    let frecency_guard = shared.frecency.read().map_err(|_| Error::poisoned("frecency"))?;
    let frecency = frecency_guard.as_ref();
    Ok(index.update_vcs_statuses(statuses, frecency))
}
