//! Fast, zero-allocation query parser for the quarry search engine.
//!
//! Takes a raw search query and extracts structured constraints while
//! preserving the free text for fuzzy or literal matching:
//! - Zero allocations for queries with ≤8 constraints (SmallVec)
//! - Single-pass parsing with minimal branching
//! - Location suffixes (`file:12`, `file:12:4`, `file:10-20`) split off
//!   and surfaced separately
//!
//! # Examples
//!
//! ```
//! use quarry_query_parser::{Constraint, FuzzyQuery, QueryParser};
//!
//! let parser = QueryParser::default();
//!
//! let result = parser.parse("name *.rs");
//! assert_eq!(result.fuzzy_query, FuzzyQuery::Text("name"));
//! assert!(matches!(result.constraints[0], Constraint::Extension("rs")));
//!
//! let result = parser.parse("!*.rs main");
//! match &result.constraints[0] {
//!     Constraint::Not(inner) => assert!(matches!(**inner, Constraint::Extension("rs"))),
//!     other => panic!("expected Not, got {other:?}"),
//! }
//! ```

mod config;
mod constraints;
mod glob_detect;
pub mod location;
mod parser;

pub use config::{FileSearchConfig, GrepConfig, ParserConfig};
pub use constraints::{Constraint, VcsStatusFilter};
pub use glob_detect::has_wildcards;
pub use location::{Location, parse_location};
pub use parser::{FuzzyQuery, ParsedQuery, QueryParser};

// Re-export SmallVec so downstream crates can name the constraint buffer
pub use smallvec::SmallVec;

/// Type alias for constraint vector - stack-allocated for ≤8 constraints
pub type ConstraintVec<'a> = SmallVec<[Constraint<'a>; 8]>;
