//! Heuristics deciding whether a token should be treated as a glob pattern.
//!
//! Filename search and content grep want different answers: in a filename
//! query `a*b` is almost certainly a glob, while in a grep query it is just
//! text the user wants to find. The [`ParserConfig`](crate::ParserConfig)
//! implementations pick the heuristic that fits their mode.

/// True if the token contains any character the glob engine gives meaning to.
#[inline]
pub fn has_wildcards(token: &str) -> bool {
    token
        .bytes()
        .any(|b| matches!(b, b'*' | b'?' | b'[' | b'{'))
}

/// Liberal detection for filename queries: any wildcard makes it a glob.
#[inline]
pub fn is_file_glob(token: &str) -> bool {
    has_wildcards(token)
}

/// Conservative detection for grep queries. Only path-shaped patterns
/// (`src/**/*.rs`) and brace groups (`{src,lib}`) count; `foo?`, `arr[0]`
/// and `a*b` stay literal text.
#[inline]
pub fn is_grep_glob(token: &str) -> bool {
    if token.contains('/') && has_wildcards(token) {
        return true;
    }
    token.starts_with('{') && token.contains('}')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcards_detected() {
        assert!(has_wildcards("*.rs"));
        assert!(has_wildcards("foo?"));
        assert!(has_wildcards("arr[0]"));
        assert!(has_wildcards("{a,b}"));
        assert!(!has_wildcards("plain_text"));
    }

    #[test]
    fn grep_globs_require_path_shape() {
        assert!(is_grep_glob("src/**/*.rs"));
        assert!(is_grep_glob("{src,lib}"));
        assert!(!is_grep_glob("a*b"));
        assert!(!is_grep_glob("foo?"));
        assert!(!is_grep_glob("arr[0]"));
    }

    #[test]
    fn file_globs_are_liberal() {
        assert!(is_file_glob("**/*.rs"));
        assert!(is_file_glob("*.test.*"));
        assert!(!is_file_glob("main"));
    }
}
