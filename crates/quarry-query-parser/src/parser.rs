use crate::ConstraintVec;
use crate::config::ParserConfig;
use crate::constraints::{Constraint, TextPartsBuffer, VcsStatusFilter};
use crate::glob_detect::has_wildcards;
use crate::location::{Location, parse_location};

/// The free-text part of a query, after constraint tokens were stripped.
#[derive(Debug, Clone, PartialEq)]
pub enum FuzzyQuery<'a> {
    /// Multiple whitespace-separated parts; every part must match.
    Parts(TextPartsBuffer<'a>),
    /// Single token (the common case).
    Text(&'a str),
    Empty,
}

/// A fully parsed query: constraints, fuzzy text, and an optional trailing
/// location suffix.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedQuery<'a> {
    /// Parsed constraints (stack-allocated for ≤8 constraints)
    pub constraints: ConstraintVec<'a>,
    pub fuzzy_query: FuzzyQuery<'a>,
    /// Parsed location (e.g., file:12:4 -> line 12, col 4)
    pub location: Option<Location>,
}

impl<'a> ParsedQuery<'a> {
    /// Iterate the fuzzy parts regardless of representation.
    pub fn fuzzy_parts(&self) -> &[&'a str] {
        match &self.fuzzy_query {
            FuzzyQuery::Parts(parts) => parts.as_slice(),
            FuzzyQuery::Text(t) => std::slice::from_ref(t),
            FuzzyQuery::Empty => &[],
        }
    }

    /// Rebuild the grep pattern by joining all non-constraint text tokens.
    ///
    /// Backslash-escaped tokens (e.g. `\*.rs`) are included as literal text
    /// with the leading `\` stripped - the backslash is only an escape signal
    /// to the parser and should not appear in the final pattern.
    pub fn grep_text(&self) -> String {
        match &self.fuzzy_query {
            FuzzyQuery::Empty => String::new(),
            FuzzyQuery::Text(t) => strip_leading_backslash(t).to_string(),
            FuzzyQuery::Parts(parts) => parts
                .iter()
                .map(|t| strip_leading_backslash(t))
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

/// Strip the leading `\` from a backslash-escaped token.
#[inline]
fn strip_leading_backslash(token: &str) -> &str {
    if token.starts_with('\\') && token.len() > 1 {
        &token[1..]
    } else {
        token
    }
}

/// Main query parser - zero-cost wrapper around a mode configuration.
#[derive(Debug)]
pub struct QueryParser<C: ParserConfig> {
    config: C,
}

impl Default for QueryParser<crate::FileSearchConfig> {
    fn default() -> Self {
        Self::new(crate::FileSearchConfig)
    }
}

impl<C: ParserConfig> QueryParser<C> {
    pub fn new(config: C) -> Self {
        Self { config }
    }

    pub fn parse<'a>(&self, query: &'a str) -> ParsedQuery<'a> {
        let query = query.trim();
        let mut constraints = ConstraintVec::new();
        let mut text_parts = TextPartsBuffer::new();

        for token in query.split_whitespace() {
            match parse_token(token, &self.config, true) {
                Some(constraint) => constraints.push(constraint),
                None => text_parts.push(token),
            }
        }

        // The location suffix, if any, sits on the last text token:
        // "search file:12" -> fuzzy "search file", location Line(12)
        let location = match text_parts.last_mut() {
            Some(last) => {
                let (without_loc, loc) = parse_location(*last);
                if loc.is_some() {
                    *last = without_loc;
                }
                loc
            }
            None => None,
        };

        // Location extraction can leave empty residue ("\":42\"")
        text_parts.retain(|part| !part.is_empty());

        let fuzzy_query = match text_parts.len() {
            0 => FuzzyQuery::Empty,
            1 => FuzzyQuery::Text(text_parts[0]),
            _ => FuzzyQuery::Parts(text_parts),
        };

        ParsedQuery {
            constraints,
            fuzzy_query,
            location,
        }
    }
}

#[inline]
fn parse_token<'a, C: ParserConfig>(
    token: &'a str,
    config: &C,
    allow_negation: bool,
) -> Option<Constraint<'a>> {
    // Backslash escape: \token is literal text, skip all constraint parsing.
    // The leading \ is stripped when the search text is rebuilt.
    if token.starts_with('\\') && token.len() > 1 {
        return None;
    }

    let first_byte = token.as_bytes().first()?;

    match first_byte {
        b'*' if config.enable_extension() => {
            // Incomplete patterns like "*" or "*." are noise
            if token == "*" || token == "*." {
                return None;
            }

            // *.rs is an extension shortcut unless the rest carries more
            // wildcards (*.test.* is a glob, not an extension)
            if let Some(ext) = token.strip_prefix("*.") {
                if !has_wildcards(ext) {
                    return Some(Constraint::Extension(ext));
                }
            }
            if config.enable_glob() && config.is_glob_pattern(token) {
                return Some(Constraint::Glob(token));
            }
            None
        }
        b'!' if allow_negation && config.enable_exclude() => parse_negation(token, config),
        b'/' if config.enable_path_segments() => parse_path_segment(token),
        _ if config.enable_path_segments() && token.ends_with('/') => {
            // Trailing slash syntax: www/ -> PathSegment("www")
            parse_path_segment_trailing(token)
        }
        _ => {
            if config.enable_glob() && config.is_glob_pattern(token) {
                return Some(Constraint::Glob(token));
            }

            if let Some(colon_idx) = token.bytes().position(|b| b == b':') {
                let key = &token[..colon_idx];
                let value = &token[colon_idx + 1..];

                match key {
                    "type" if config.enable_type_filter() => {
                        return Some(Constraint::FileType(value));
                    }
                    "status" | "st" | "g" | "git" if config.enable_vcs_status() => {
                        return parse_vcs_status(value);
                    }
                    _ => {}
                }
            }

            config.parse_custom(token)
        }
    }
}

/// `!*.rs` -> Not(Extension("rs")), `!test` -> Not(Text("test")).
/// Any constraint type can be negated; bare text falls back to a path
/// substring exclusion.
#[inline]
fn parse_negation<'a, C: ParserConfig>(token: &'a str, config: &C) -> Option<Constraint<'a>> {
    if token.len() <= 1 {
        return None;
    }

    let inner_token = &token[1..];
    let inner = parse_token(inner_token, config, false)
        .unwrap_or(Constraint::Text(inner_token));
    Some(Constraint::Not(Box::new(inner)))
}

/// `/src/` or `/lib` -> PathSegment
#[inline]
fn parse_path_segment(token: &str) -> Option<Constraint<'_>> {
    let segment = token.trim_start_matches('/').trim_end_matches('/');
    if segment.is_empty() {
        None
    } else {
        Some(Constraint::PathSegment(segment))
    }
}

/// `www/` -> PathSegment("www"); multi-segment tokens are left to glob/text
#[inline]
fn parse_path_segment_trailing(token: &str) -> Option<Constraint<'_>> {
    let segment = token.trim_end_matches('/');
    if !segment.is_empty() && !segment.contains('/') {
        Some(Constraint::PathSegment(segment))
    } else {
        None
    }
}

/// `modified|m|untracked|u|staged|s|clean` - prefixes accepted
#[inline]
fn parse_vcs_status(value: &str) -> Option<Constraint<'_>> {
    if value.is_empty() || value == "*" {
        return None;
    }

    if "modified".starts_with(value) {
        return Some(Constraint::VcsStatus(VcsStatusFilter::Modified));
    }
    if "untracked".starts_with(value) {
        return Some(Constraint::VcsStatus(VcsStatusFilter::Untracked));
    }
    if "staged".starts_with(value) {
        return Some(Constraint::VcsStatus(VcsStatusFilter::Staged));
    }
    if "clean".starts_with(value) {
        return Some(Constraint::VcsStatus(VcsStatusFilter::Unmodified));
    }

    None
}
