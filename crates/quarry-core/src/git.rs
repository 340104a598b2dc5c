//! VCS status integration on top of libgit2.
//!
//! A status sweep produces a [`GitStatusCache`] snapshot keyed by absolute
//! path; the file index folds it into the entries. Reads never block on a
//! refresh - a refresh in flight simply means queries see the previous
//! snapshot.

use std::{
    fmt::Debug,
    path::{Path, PathBuf},
};

use git2::{Repository, Status, StatusOptions};
use tracing::debug;

use crate::error::Result;

/// Snapshot of one git status query. Files absent from the snapshot are
/// clean unless `include_unmodified` was requested.
#[derive(Debug, Clone)]
pub struct GitStatusCache(Vec<(PathBuf, Status)>);

impl IntoIterator for GitStatusCache {
    type Item = (PathBuf, Status);
    type IntoIter = std::vec::IntoIter<Self::Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl GitStatusCache {
    pub fn statuses_len(&self) -> usize {
        self.0.len()
    }

    pub fn lookup_status(&self, full_path: &Path) -> Option<Status> {
        self.0
            .binary_search_by(|(path, _)| path.as_path().cmp(full_path))
            .ok()
            .and_then(|idx| self.0.get(idx).map(|(_, status)| *status))
    }

    #[tracing::instrument(skip(repo, status_options))]
    fn read_status_impl(repo: &Repository, status_options: &mut StatusOptions) -> Result<Self> {
        let statuses = repo.statuses(Some(status_options))?;
        let Some(workdir) = repo.workdir() else {
            return Ok(Self(vec![])); // bare repo
        };

        let mut entries = Vec::with_capacity(statuses.len());
        for entry in &statuses {
            if let Some(entry_path) = entry.path() {
                entries.push((workdir.join(entry_path), entry.status()));
            }
        }

        // lookup_status binary-searches
        entries.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));

        Ok(Self(entries))
    }

    pub fn read_git_status(
        git_workdir: Option<&Path>,
        status_options: &mut StatusOptions,
    ) -> Option<Self> {
        let git_workdir = git_workdir?;
        let repository = Repository::open(git_workdir).ok()?;

        match Self::read_status_impl(&repository, status_options) {
            Ok(status) => Some(status),
            Err(e) => {
                tracing::error!(?e, "Failed to read git status");
                None
            }
        }
    }

    /// Targeted status query for a handful of paths, used by the watcher.
    /// A single path goes through `status_file` directly - pathspec walks
    /// the whole tree and is far too slow for the per-event case.
    #[tracing::instrument(skip(repo), level = tracing::Level::DEBUG)]
    pub fn git_status_for_paths<TPath: AsRef<Path> + Debug>(
        repo: &Repository,
        paths: &[TPath],
    ) -> Result<Self> {
        if paths.is_empty() {
            return Ok(Self(vec![]));
        }

        let Some(workdir) = repo.workdir() else {
            return Ok(Self(vec![]));
        };

        if paths.len() == 1 {
            let full_path = paths[0].as_ref();
            let relative_path = full_path.strip_prefix(workdir).map_err(|e| {
                crate::error::Error::Internal(format!(
                    "path {} outside workdir: {e}",
                    full_path.display()
                ))
            })?;
            let status = repo.status_file(relative_path)?;

            return Ok(Self(vec![(full_path.to_path_buf(), status)]));
        }

        let mut status_options = StatusOptions::new();
        status_options
            .include_untracked(true)
            .recurse_untracked_dirs(true)
            // partial reads must report every requested file, clean included
            .include_unmodified(true);

        for path in paths {
            if let Ok(relative) = path.as_ref().strip_prefix(workdir) {
                status_options.pathspec(relative);
            }
        }

        let cache = Self::read_status_impl(repo, &mut status_options)?;
        debug!(status_len = cache.statuses_len(), "Multiple files git status");

        Ok(cache)
    }
}

/// Options for the scan-time sweep: untracked included, unmodified excluded
/// to keep the sweep cheap (missing entries are treated as clean).
pub fn scan_status_options() -> StatusOptions {
    let mut options = StatusOptions::new();
    options
        .include_untracked(true)
        .recurse_untracked_dirs(true)
        .exclude_submodules(true);
    options
}

/// Options for an explicit refresh: unmodified files included so statuses
/// cleared by commits and stashes are correctly reset.
pub fn refresh_status_options() -> StatusOptions {
    let mut options = StatusOptions::new();
    options
        .include_untracked(true)
        .recurse_untracked_dirs(true)
        .include_unmodified(true)
        .exclude_submodules(true);
    options
}

#[inline]
pub fn is_modified_status(status: Status) -> bool {
    status.intersects(
        Status::WT_MODIFIED
            | Status::INDEX_MODIFIED
            | Status::WT_NEW
            | Status::INDEX_NEW
            | Status::WT_RENAMED,
    )
}

/// Render a status for the wire. `None` means the file never appeared in a
/// status sweep, which is clean inside a repository and unknown outside one -
/// the caller distinguishes by whether a workdir was found at all.
pub fn format_vcs_status(status: Option<Status>) -> &'static str {
    match status {
        None => "clean",
        Some(status) => {
            if status.contains(Status::CONFLICTED) {
                "conflicted"
            } else if status.contains(Status::WT_NEW) {
                "untracked"
            } else if status.contains(Status::WT_MODIFIED) {
                "modified"
            } else if status.contains(Status::WT_DELETED) {
                "deleted"
            } else if status.contains(Status::WT_RENAMED) {
                "renamed"
            } else if status.contains(Status::INDEX_NEW) {
                "staged_new"
            } else if status.contains(Status::INDEX_MODIFIED) {
                "staged_modified"
            } else if status.contains(Status::INDEX_DELETED) {
                "staged_deleted"
            } else if status.contains(Status::IGNORED) {
                "ignored"
            } else if status.contains(Status::CURRENT) || status.is_empty() {
                "clean"
            } else {
                "unknown"
            }
        }
    }
}
