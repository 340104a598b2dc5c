use crate::constraints::Constraint;
use crate::glob_detect;

/// Parser configuration trait - each search mode customizes which constraint
/// syntaxes are live and how aggressively globs are detected.
pub trait ParserConfig {
    fn enable_glob(&self) -> bool {
        true
    }

    /// Should parse extension shortcuts (e.g., *.rs)
    fn enable_extension(&self) -> bool {
        true
    }

    /// Should parse exclusion patterns (e.g., !test)
    fn enable_exclude(&self) -> bool {
        true
    }

    /// Should parse path segments (e.g., /src/)
    fn enable_path_segments(&self) -> bool {
        true
    }

    /// Should parse type constraints (e.g., type:rust)
    fn enable_type_filter(&self) -> bool {
        true
    }

    /// Should parse VCS status (e.g., status:modified)
    fn enable_vcs_status(&self) -> bool {
        true
    }

    /// Decide whether a wildcard-bearing token is a glob in this mode.
    fn is_glob_pattern(&self, token: &str) -> bool {
        glob_detect::is_file_glob(token)
    }

    /// Custom constraint parsers for mode-specific needs
    fn parse_custom<'a>(&self, _input: &'a str) -> Option<Constraint<'a>> {
        None
    }
}

/// Default configuration for filename search - all features enabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileSearchConfig;

impl ParserConfig for FileSearchConfig {
    // All defaults enabled
}

/// Configuration for content grep. Extension and path filters stay on so
/// `fn main *.rs` restricts the searched files, but glob detection is
/// conservative (grep text is full of `?`, `[` and `*`) and VCS status
/// filters are off.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrepConfig;

impl ParserConfig for GrepConfig {
    fn enable_vcs_status(&self) -> bool {
        false
    }

    fn enable_type_filter(&self) -> bool {
        false
    }

    fn is_glob_pattern(&self, token: &str) -> bool {
        glob_detect::is_grep_glob(token)
    }
}
