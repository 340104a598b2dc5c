//! Path helpers shared by the index and the scorer.

use std::path::{Path, PathBuf};

/// Canonicalize a path, resolving symlinks and producing an absolute path.
///
/// On Windows, `dunce::canonicalize` avoids the `\\?\` extended-length
/// prefix that `std::fs::canonicalize` produces, which many consumers
/// cannot open. Elsewhere this is plain `std::fs::canonicalize`.
#[cfg(windows)]
pub fn canonicalize(path: impl AsRef<Path>) -> std::io::Result<PathBuf> {
    dunce::canonicalize(path)
}

#[cfg(not(windows))]
pub fn canonicalize(path: impl AsRef<Path>) -> std::io::Result<PathBuf> {
    std::fs::canonicalize(path)
}

/// Relative paths in the index always use `/`, even where the native
/// separator is `\` - matching and constraint filtering rely on it.
#[cfg(windows)]
pub fn to_forward_slashes(path: String) -> String {
    path.replace('\\', "/")
}

#[cfg(not(windows))]
#[inline]
pub fn to_forward_slashes(path: String) -> String {
    path
}

/// Penalty for matches that start far from the file name: -2 per path
/// segment between the match start and the filename segment, clamped.
/// A match inside the file name itself costs nothing.
pub fn match_depth_penalty(relative_path: &str, match_start: usize, file_name_start: usize) -> i32 {
    if match_start >= file_name_start {
        return 0;
    }

    let between = &relative_path[match_start.min(relative_path.len())..file_name_start];
    let segments = between.bytes().filter(|&b| b == b'/').count() as i32;

    (-2 * segments).max(-20)
}
