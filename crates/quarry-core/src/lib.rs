//! quarry-core - file index, fuzzy filename search, and live content grep
//! with persistent frecency ranking.
//!
//! The public surface is the [`Quarry`] handle: create one per indexed
//! tree, search and grep against it concurrently, destroy it when done.
//! All state is instance-based - any number of handles coexist in one
//! process.
//!
//! ```no_run
//! use quarry_core::{InitOptions, Quarry, SearchOptions};
//!
//! let quarry = Quarry::create(InitOptions::new("/path/to/repo"))?;
//! quarry.wait_for_scan(5_000)?;
//!
//! let result = quarry.search("main", &SearchOptions::default())?;
//! for item in &result.items {
//!     println!("{}", item.relative_path);
//! }
//! # Ok::<(), quarry_core::Error>(())
//! ```

pub mod constraints;
mod error;
pub mod facade;
pub mod file_index;
pub mod frecency;
pub mod git;
pub mod grep;
pub mod health;
pub mod history;
mod log;
pub mod mmap_cache;
pub mod path_utils;
pub mod score;
mod store;
pub mod types;
mod watcher;

use std::sync::{Arc, RwLock};

use file_index::FileIndex;
use frecency::FrecencyTracker;
use history::QueryHistory;

/// `None` inside the lock means the subsystem was retired by `destroy`.
pub type SharedIndex = Arc<RwLock<Option<FileIndex>>>;
pub type SharedFrecency = Arc<RwLock<Option<FrecencyTracker>>>;
pub type SharedHistory = Arc<RwLock<Option<QueryHistory>>>;

pub use error::{Error, Result};
pub use facade::{InitOptions, LogOptions, Quarry, SearchOptions};
pub use file_index::{ScanProgress, ScanState};
pub use grep::{
    GrepCursor, GrepMatch, GrepMode, GrepOptions, GrepResult, GrepResultPayload,
};
pub use health::{HealthReport, standalone_health_check};
pub use quarry_query_parser::{
    Constraint, FuzzyQuery, Location, ParsedQuery, QueryParser, parse_location,
};
pub use score::SpecialFilenames;
pub use types::{
    FileEntry, FileEntryProjection, Pagination, ScoreBreakdown, SearchResult, SearchResultPayload,
};
