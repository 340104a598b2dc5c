//! Location suffix parsing: `file:12`, `file:12:4`, `file:10-20`.
//!
//! The suffix is stripped off the query before fuzzy matching and surfaced
//! separately so the caller can jump to the right line after opening.

/// A parsed location suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// `:12` - jump to a line
    Line(u32),
    /// `:12:4` - jump to line and column
    Position { line: u32, col: u32 },
    /// `:10-20` - a line range
    Range { start: u32, end: u32 },
}

/// Split a trailing location suffix off `input`.
///
/// Returns the remaining text (possibly empty, for bare suffixes like
/// `":42"`) and the parsed location. Inputs without a valid suffix are
/// returned unchanged.
pub fn parse_location(input: &str) -> (&str, Option<Location>) {
    let Some(last_colon) = input.rfind(':') else {
        return (input, None);
    };

    let tail = &input[last_colon + 1..];
    if tail.is_empty() {
        return (input, None);
    }

    // `:10-20` line range
    if let Some((start, end)) = tail.split_once('-') {
        if let (Ok(start), Ok(end)) = (start.parse::<u32>(), end.parse::<u32>()) {
            return (&input[..last_colon], Some(Location::Range { start, end }));
        }
        return (input, None);
    }

    let Ok(number) = tail.parse::<u32>() else {
        return (input, None);
    };

    // `:12:4` - the segment before the last colon may be the line number
    let head = &input[..last_colon];
    if let Some(prev_colon) = head.rfind(':') {
        if let Ok(line) = head[prev_colon + 1..].parse::<u32>() {
            return (
                &input[..prev_colon],
                Some(Location::Position { line, col: number }),
            );
        }
    }

    (head, Some(Location::Line(number)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(parse_location("main"), ("main", None));
        assert_eq!(parse_location(""), ("", None));
    }

    #[test]
    fn line_suffix() {
        assert_eq!(
            parse_location("main.rs:42"),
            ("main.rs", Some(Location::Line(42)))
        );
    }

    #[test]
    fn line_and_column_suffix() {
        assert_eq!(
            parse_location("main.rs:12:4"),
            ("main.rs", Some(Location::Position { line: 12, col: 4 }))
        );
    }

    #[test]
    fn range_suffix() {
        assert_eq!(
            parse_location("main.rs:10-20"),
            ("main.rs", Some(Location::Range { start: 10, end: 20 }))
        );
    }

    #[test]
    fn bare_suffix_leaves_empty_query() {
        assert_eq!(parse_location(":42"), ("", Some(Location::Line(42))));
    }

    #[test]
    fn non_numeric_tail_is_not_a_location() {
        assert_eq!(parse_location("std::io"), ("std::io", None));
        assert_eq!(parse_location("a:b"), ("a:b", None));
        assert_eq!(parse_location("main.rs:"), ("main.rs:", None));
        assert_eq!(parse_location("main.rs:1x"), ("main.rs:1x", None));
        assert_eq!(parse_location("main.rs:1-x"), ("main.rs:1-x", None));
    }
}
