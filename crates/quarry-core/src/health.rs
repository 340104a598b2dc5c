//! Health reporting for the engine and its databases.

use std::path::Path;

use serde::Serialize;

use crate::error::Result;
use crate::store::KvStore;

/// Health information about one KV database.
#[derive(Debug, Clone, Serialize)]
pub struct DbHealth {
    pub path: String,
    pub disk_size_bytes: u64,
    pub entry_counts: Vec<(&'static str, u64)>,
}

impl DbHealth {
    pub(crate) fn of(store: &KvStore, label: &'static str) -> Result<Self> {
        Ok(Self {
            path: store.path().to_string_lossy().into_owned(),
            disk_size_bytes: store.size_on_disk()?,
            entry_counts: vec![(label, store.entry_count()?)],
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VcsHealth {
    pub available: bool,
    pub libgit2_version: String,
    pub repository_found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexHealth {
    pub base_path: String,
    pub is_scanning: bool,
    pub indexed_files: usize,
    pub generation: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreHealth {
    pub initialized: bool,
    pub persistent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db: Option<DbHealth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The full health payload. `index` and the store sections are absent for
/// handle-less checks, which only probe the version and the VCS library.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub version: &'static str,
    pub vcs: VcsHealth,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<IndexHealth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frecency: Option<StoreHealth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<StoreHealth>,
}

pub fn vcs_health(test_path: &Path) -> VcsHealth {
    let version = git2::Version::get();
    let (major, minor, rev) = version.libgit2_version();
    let libgit2_version = format!("{major}.{minor}.{rev}");

    match git2::Repository::discover(test_path) {
        Ok(repo) => VcsHealth {
            available: true,
            libgit2_version,
            repository_found: true,
            workdir: repo.workdir().map(|w| w.to_string_lossy().into_owned()),
            error: None,
        },
        Err(e) => VcsHealth {
            available: true,
            libgit2_version,
            repository_found: false,
            workdir: None,
            error: Some(e.message().to_string()),
        },
    }
}

/// Health check without an engine handle: version and VCS availability only.
pub fn standalone_health_check(test_path: Option<&Path>) -> HealthReport {
    let cwd;
    let test_path = match test_path {
        Some(path) => path,
        None => {
            cwd = std::env::current_dir().unwrap_or_default();
            &cwd
        }
    };

    HealthReport {
        version: env!("CARGO_PKG_VERSION"),
        vcs: vcs_health(test_path),
        index: None,
        frecency: None,
        history: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standalone_report_has_version_and_vcs() {
        let report = standalone_health_check(None);
        assert!(!report.version.is_empty());
        assert!(report.vcs.available);
        assert!(report.index.is_none());
    }

    #[test]
    fn report_serializes_snake_case() {
        let report = standalone_health_check(None);
        let value = serde_json::to_value(&report).unwrap();
        assert!(value.get("version").is_some());
        assert!(value.get("vcs").is_some());
        assert!(value["vcs"].get("libgit2_version").is_some());
    }
}
