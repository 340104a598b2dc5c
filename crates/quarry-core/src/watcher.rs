//! Filesystem watcher feeding the index.
//!
//! Raw notify events go through `notify-debouncer-full`, which coalesces
//! them per path inside the debounce window (latest event wins), so bursts
//! never queue unboundedly. The callback holds only weak references to the
//! index and caches - events arriving after retirement are discarded.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use git2::Repository;
use notify::event::{AccessKind, AccessMode};
use notify::{Config, EventKind, RecursiveMode};
use notify_debouncer_full::{
    DebounceEventResult, DebouncedEvent, RecommendedCache, new_debouncer_opt,
};
use tracing::{Level, debug, error, info, warn};

use crate::error::Result;
use crate::file_index::FileIndex;
use crate::frecency::FrecencyTracker;
use crate::git::GitStatusCache;
use crate::mmap_cache::MmapCache;

type Debouncer = notify_debouncer_full::Debouncer<notify::RecommendedWatcher, RecommendedCache>;

const DEBOUNCE_TIMEOUT: Duration = Duration::from_millis(100);

/// Above this many affected paths a batch is cheaper to handle as a full
/// rescan than as individual updates.
const MAX_PATHS_THRESHOLD: usize = 1024;

/// Everything the event handler needs, weakly referenced so the watcher
/// never extends the lifetime of a retired index.
pub(crate) struct WatcherContext {
    pub index: Weak<RwLock<Option<FileIndex>>>,
    pub frecency: Weak<RwLock<Option<FrecencyTracker>>>,
    pub mmap_cache: Weak<MmapCache>,
    pub git_workdir: Option<PathBuf>,
    /// Full-rescan trigger installed by the facade.
    pub rescan: Box<dyn Fn() + Send + Sync>,
    /// Full VCS status refresh trigger installed by the facade.
    pub refresh_vcs: Box<dyn Fn() + Send + Sync>,
}

pub struct IndexWatcher {
    debouncer: Mutex<Option<Debouncer>>,
}

impl IndexWatcher {
    pub(crate) fn new(base_path: PathBuf, context: WatcherContext) -> Result<Self> {
        info!("Initializing watcher for path: {}", base_path.display());

        // Following symlinks spawns event storms for symlinked trees that
        // may even be ignored; stay on the real files.
        let config = Config::default().with_follow_symlinks(false);
        let context = Arc::new(context);

        let mut debouncer = new_debouncer_opt(
            DEBOUNCE_TIMEOUT,
            Some(DEBOUNCE_TIMEOUT / 2),
            {
                let context = Arc::clone(&context);
                move |result: DebounceEventResult| match result {
                    Ok(events) => handle_debounced_events(events, &context),
                    Err(errors) => error!(?errors, "File watcher errors"),
                }
            },
            RecommendedCache::new(),
            config,
        )
        .map_err(|e| crate::error::Error::Internal(format!("watcher init: {e}")))?;

        debouncer
            .watch(base_path.as_path(), RecursiveMode::Recursive)
            .map_err(|e| crate::error::Error::Internal(format!("watcher start: {e}")))?;

        Ok(Self {
            debouncer: Mutex::new(Some(debouncer)),
        })
    }

    pub fn stop(&self) {
        let taken = self
            .debouncer
            .lock()
            .map(|mut debouncer| debouncer.take())
            .unwrap_or(None);
        if let Some(debouncer) = taken {
            drop(debouncer);
            info!("File watcher stopped");
        }
    }
}

impl Drop for IndexWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

#[tracing::instrument(name = "fs_events", skip_all, level = Level::DEBUG)]
fn handle_debounced_events(events: Vec<DebouncedEvent>, context: &WatcherContext) {
    // The handler runs on the debouncer thread and will be called often -
    // keep index lock times minimal.
    let Some(index) = context.index.upgrade() else {
        return; // index retired, nothing to update
    };
    let Some(mmap_cache) = context.mmap_cache.upgrade() else {
        return;
    };

    let repo = context
        .git_workdir
        .as_ref()
        .and_then(|p| Repository::open(p).ok());

    let mut need_full_rescan = false;
    let mut need_full_status_refresh = false;
    let mut removed: Vec<PathBuf> = Vec::new();
    let mut changed: Vec<PathBuf> = Vec::new();
    let mut affected_paths = 0usize;

    for debounced in &events {
        // Reacting to reads would make our own previews and greps feed the
        // watcher in a loop.
        if matches!(
            debounced.event.kind,
            EventKind::Access(
                AccessKind::Read
                    | AccessKind::Open(_)
                    | AccessKind::Close(AccessMode::Read | AccessMode::Execute)
            )
        ) {
            continue;
        }

        debug!(event = ?debounced.event, "Processing FS event");
        for path in &debounced.event.paths {
            if is_ignore_definition_path(path) {
                info!("Ignore rules changed: {}", path.display());
                need_full_rescan = true;
                break;
            }

            if is_git_path(path) {
                if is_dotgit_change_affecting_status(path, repo.as_ref()) {
                    need_full_status_refresh = true;
                }
                continue;
            }

            if !should_include_file(path, repo.as_ref()) {
                if !path.exists() {
                    removed.push(path.clone());
                }
                continue;
            }

            if path.exists() {
                changed.push(path.clone());
            } else {
                removed.push(path.clone());
            }
        }

        affected_paths += debounced.event.paths.len();
        if affected_paths > MAX_PATHS_THRESHOLD {
            warn!(
                affected_paths,
                "Oversized event batch, escalating to full rescan"
            );
            need_full_rescan = true;
        }

        if need_full_rescan {
            break;
        }
    }

    if need_full_rescan {
        mmap_cache.clear();
        (context.rescan)();
        return;
    }

    if need_full_status_refresh {
        info!("VCS metadata changed, refreshing all statuses");
        (context.refresh_vcs)();
    }

    changed.sort_unstable();
    changed.dedup();
    removed.sort_unstable();
    removed.dedup();

    if removed.is_empty() && changed.is_empty() {
        return;
    }

    debug!(
        removed = removed.len(),
        changed = changed.len(),
        "Applying watcher batch"
    );

    // One write transaction per batch: one generation bump.
    let status_refresh = {
        let Ok(mut guard) = index.write() else {
            error!("Index lock poisoned, dropping watcher batch");
            return;
        };
        let Some(ref mut index) = *guard else {
            return; // retired between upgrade and lock
        };

        let frecency_arc = context.frecency.upgrade();
        let frecency_guard = frecency_arc.as_ref().and_then(|f| f.read().ok());
        let frecency = frecency_guard.as_deref().and_then(|g| g.as_ref());

        index.apply_watcher_batch(&removed, &changed, frecency, &mmap_cache)
    };

    let Some(repo) = repo else {
        return;
    };
    if status_refresh.is_empty() {
        return;
    }

    // Status lookup happens outside the index lock; only folding the result
    // back in takes the write lock again.
    let statuses = match GitStatusCache::git_status_for_paths(&repo, &status_refresh) {
        Ok(statuses) => statuses,
        Err(e) => {
            error!(?e, "Failed to query VCS status for watcher batch");
            return;
        }
    };

    if let Ok(mut guard) = index.write() {
        if let Some(ref mut index) = *guard {
            let frecency_arc = context.frecency.upgrade();
            let frecency_guard = frecency_arc.as_ref().and_then(|f| f.read().ok());
            let frecency = frecency_guard.as_deref().and_then(|g| g.as_ref());
            index.update_vcs_statuses(statuses, frecency);
        }
    }
}

fn should_include_file(path: &Path, repo: Option<&Repository>) -> bool {
    if !path.is_file() || is_git_path(path) {
        return false;
    }

    // Outside a repository every file counts; inside one, ignored files
    // must not sneak past the scan filters through the watcher.
    repo.is_none_or(|repo| repo.is_path_ignored(path) == Ok(false))
}

#[inline]
fn is_git_path(path: &Path) -> bool {
    path.components().any(|c| c.as_os_str() == ".git")
}

/// Does a change under `.git` affect per-file status? Object and log writes
/// do not; index, HEAD, refs, and merge-state files do.
fn is_dotgit_change_affecting_status(changed: &Path, repo: Option<&Repository>) -> bool {
    let Some(repo) = repo else {
        return false;
    };

    let git_dir = repo.path();
    let Ok(rel) = changed.strip_prefix(git_dir) else {
        return false;
    };

    if rel.starts_with("objects") || rel.starts_with("logs") || rel.starts_with("hooks") {
        return false;
    }
    if rel == Path::new("index") || rel == Path::new("index.lock") {
        return true;
    }
    if rel == Path::new("HEAD") {
        return true;
    }
    if rel.starts_with("refs") || rel == Path::new("packed-refs") {
        return true;
    }
    if rel == Path::new("info/exclude") || rel == Path::new("info/sparse-checkout") {
        return true;
    }

    matches!(
        rel.file_name().and_then(|f| f.to_str()),
        Some("MERGE_HEAD" | "CHERRY_PICK_HEAD" | "REVERT_HEAD")
    )
}

fn is_ignore_definition_path(path: &Path) -> bool {
    matches!(
        path.file_name().and_then(|f| f.to_str()),
        Some(".ignore" | ".gitignore")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignore_definitions_detected() {
        assert!(is_ignore_definition_path(Path::new("/repo/.gitignore")));
        assert!(is_ignore_definition_path(Path::new("/repo/sub/.ignore")));
        assert!(!is_ignore_definition_path(Path::new("/repo/src/main.rs")));
    }

    #[test]
    fn git_paths_detected() {
        assert!(is_git_path(Path::new("/repo/.git/index")));
        assert!(is_git_path(Path::new("/repo/sub/.git/HEAD")));
        assert!(!is_git_path(Path::new("/repo/src/git.rs")));
    }

    #[test]
    fn files_outside_a_repo_are_included() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain.txt");
        std::fs::write(&file, "x").unwrap();
        assert!(should_include_file(&file, None));
        assert!(!should_include_file(&dir.path().join("missing.txt"), None));
    }
}
