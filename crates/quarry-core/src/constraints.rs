//! Query constraint filtering.
//!
//! Parsed constraints are compiled once per query into a [`FileFilter`]:
//! extension sets, path segments, globs, text exclusions, and VCS
//! predicates each land in their own slot with a polarity flag. Candidates
//! are then tested in a single pass per item, cheapest checks first. The
//! fuzzy scorer and the grep engine share the filter through the
//! [`Constrainable`] trait.

use globset::GlobMatcher;
use quarry_query_parser::{Constraint, VcsStatusFilter};
use smallvec::SmallVec;

use crate::git::is_modified_status;

/// Minimum candidate count before the filter pass moves onto the rayon
/// pool; below this, thread dispatch costs more than it saves.
const PAR_THRESHOLD: usize = 10_000;

/// Trait for items the filter can test.
pub trait Constrainable {
    /// The item's relative path (e.g. "src/main.rs"), `/`-separated.
    fn relative_path(&self) -> &str;

    /// Lowercased relative path for case-insensitive matching.
    fn relative_path_lower(&self) -> &str;

    /// The file name component (e.g. "main.rs").
    fn file_name(&self) -> &str;

    /// The VCS status of this item, if known.
    fn vcs_status(&self) -> Option<git2::Status>;
}

/// Does the file name carry `ext` as its final dot-separated component?
/// Hidden files (".rs") and bare names have no extension.
#[inline]
pub fn extension_matches(file_name: &str, ext: &str) -> bool {
    match file_name.rsplit_once('.') {
        Some((stem, candidate)) => !stem.is_empty() && candidate.eq_ignore_ascii_case(ext),
        None => false,
    }
}

/// Whole-segment directory match. The file name itself is never a segment:
/// `lib/src` does not contain the segment "src".
#[inline]
pub fn path_has_segment(path: &str, segment: &str) -> bool {
    match path.rsplit_once('/') {
        Some((directories, _file_name)) => directories
            .split('/')
            .any(|part| part.eq_ignore_ascii_case(segment)),
        None => false,
    }
}

fn status_satisfies(filter: VcsStatusFilter, status: Option<git2::Status>) -> bool {
    let Some(status) = status else {
        // never seen in a status sweep means clean
        return matches!(filter, VcsStatusFilter::Unmodified);
    };

    match filter {
        VcsStatusFilter::Modified => is_modified_status(status),
        VcsStatusFilter::Untracked => status.contains(git2::Status::WT_NEW),
        VcsStatusFilter::Staged => {
            let staged = git2::Status::INDEX_NEW
                | git2::Status::INDEX_MODIFIED
                | git2::Status::INDEX_DELETED
                | git2::Status::INDEX_RENAMED
                | git2::Status::INDEX_TYPECHANGE;
            status.intersects(staged)
        }
        VcsStatusFilter::Unmodified => status.is_empty(),
    }
}

/// A query's constraints, compiled into directly testable form.
///
/// Polarity is a plain `bool` per slot entry (`true` = the predicate must
/// NOT hold). Extensions are the one OR-combined family (`*.rs *.ts` keeps
/// either kind); everything else must hold simultaneously.
#[derive(Debug, Default)]
pub struct FileFilter<'q> {
    /// `*.rs` - keep a file if it carries any of these.
    wanted_extensions: SmallVec<[&'q str; 4]>,
    /// `!*.rs` - drop a file carrying any of these.
    rejected_extensions: SmallVec<[&'q str; 4]>,
    /// `(segment, negated)` - every entry must hold.
    segments: SmallVec<[(&'q str, bool); 4]>,
    /// `(lowercased substring, negated)` - tested against the lowercased
    /// relative path.
    substrings: SmallVec<[(String, bool); 2]>,
    /// `(compiled matcher, negated)` - `None` is a pattern that failed to
    /// compile and therefore matches nothing.
    globs: SmallVec<[(Option<GlobMatcher>, bool); 2]>,
    /// VCS predicates with polarity.
    vcs: SmallVec<[(VcsStatusFilter, bool); 2]>,
}

impl<'q> FileFilter<'q> {
    /// Compile a constraint list. `None` when there is nothing to filter on.
    pub fn compile(constraints: &[Constraint<'q>]) -> Option<Self> {
        if constraints.is_empty() {
            return None;
        }

        let mut filter = FileFilter::default();
        for constraint in constraints {
            // peel negation wrappers; each layer flips the polarity
            let mut negated = false;
            let mut inner = constraint;
            while let Constraint::Not(wrapped) = inner {
                negated = !negated;
                inner = wrapped.as_ref();
            }

            match inner {
                Constraint::Extension(ext) => {
                    if negated {
                        filter.rejected_extensions.push(*ext);
                    } else {
                        filter.wanted_extensions.push(*ext);
                    }
                }
                Constraint::Glob(pattern) => {
                    let compiled = globset::Glob::new(pattern)
                        .ok()
                        .map(|glob| glob.compile_matcher());
                    filter.globs.push((compiled, negated));
                }
                Constraint::PathSegment(segment) => filter.segments.push((*segment, negated)),
                Constraint::VcsStatus(status) => filter.vcs.push((*status, negated)),
                Constraint::Text(text) => filter.substrings.push((text.to_lowercase(), negated)),
                // type: filters have no file-table meaning yet
                Constraint::FileType(_) => {}
                Constraint::Not(_) => unreachable!("negations peeled above"),
            }
        }

        Some(filter)
    }

    /// Test one candidate against every compiled slot.
    pub fn matches<T: Constrainable>(&self, item: &T) -> bool {
        if !self.wanted_extensions.is_empty()
            && !self
                .wanted_extensions
                .iter()
                .any(|ext| extension_matches(item.file_name(), ext))
        {
            return false;
        }

        if self
            .rejected_extensions
            .iter()
            .any(|ext| extension_matches(item.file_name(), ext))
        {
            return false;
        }

        for (segment, negated) in &self.segments {
            if path_has_segment(item.relative_path(), segment) == *negated {
                return false;
            }
        }

        for (substring, negated) in &self.substrings {
            if item.relative_path_lower().contains(substring.as_str()) == *negated {
                return false;
            }
        }

        for (filter, negated) in &self.vcs {
            if status_satisfies(*filter, item.vcs_status()) == *negated {
                return false;
            }
        }

        for (matcher, negated) in &self.globs {
            let hit = matcher
                .as_ref()
                .is_some_and(|m| m.is_match(item.relative_path()));
            if hit == *negated {
                return false;
            }
        }

        true
    }

    /// Filter a candidate slice, parallel above [`PAR_THRESHOLD`].
    pub fn apply<'a, T: Constrainable + Sync>(&self, items: &'a [T]) -> Vec<&'a T> {
        if items.len() >= PAR_THRESHOLD {
            use rayon::prelude::*;
            items.par_iter().filter(|item| self.matches(*item)).collect()
        } else {
            items.iter().filter(|item| self.matches(*item)).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_query_parser::QueryParser;

    struct Item {
        relative_path: String,
        relative_path_lower: String,
        file_name: String,
        vcs_status: Option<git2::Status>,
    }

    impl Item {
        fn new(path: &str) -> Self {
            Self {
                relative_path: path.to_string(),
                relative_path_lower: path.to_lowercase(),
                file_name: path.rsplit('/').next().unwrap_or(path).to_string(),
                vcs_status: None,
            }
        }

        fn with_status(path: &str, status: git2::Status) -> Self {
            let mut item = Self::new(path);
            item.vcs_status = Some(status);
            item
        }
    }

    impl Constrainable for Item {
        fn relative_path(&self) -> &str {
            &self.relative_path
        }
        fn relative_path_lower(&self) -> &str {
            &self.relative_path_lower
        }
        fn file_name(&self) -> &str {
            &self.file_name
        }
        fn vcs_status(&self) -> Option<git2::Status> {
            self.vcs_status
        }
    }

    fn kept(query: &str, items: &[Item]) -> Vec<String> {
        let parsed = QueryParser::default().parse(query);
        let filter = FileFilter::compile(&parsed.constraints).expect("query has constraints");
        filter
            .apply(items)
            .into_iter()
            .map(|item| item.relative_path.clone())
            .collect()
    }

    #[test]
    fn extension_rules() {
        assert!(extension_matches("parser.rs", "rs"));
        assert!(extension_matches("PARSER.RS", "rs"));
        assert!(extension_matches("snapshot.test.ts", "ts"));

        assert!(!extension_matches("parser.rs", "ts"));
        assert!(!extension_matches("parsers", "rs"));
        assert!(!extension_matches(".gitignore", "gitignore"));
        assert!(!extension_matches("rs", "rs"));
        assert!(!extension_matches("parser.rsx", "rs"));
    }

    #[test]
    fn directory_segments_never_match_the_file_name() {
        assert!(path_has_segment("src/lib.rs", "src"));
        assert!(path_has_segment("app/SRC/lib.rs", "src"));
        assert!(path_has_segment("one/two/three/x.rs", "two"));

        assert!(!path_has_segment("lib/src", "src"));
        assert!(!path_has_segment("source/lib.rs", "src"));
        assert!(!path_has_segment("mysrc/lib.rs", "src"));
        assert!(!path_has_segment("src", "src"));
        assert!(!path_has_segment("", "src"));
    }

    #[test]
    fn empty_constraint_list_compiles_to_nothing() {
        assert!(FileFilter::compile(&[]).is_none());
    }

    #[test]
    fn extensions_combine_with_or() {
        let items = [Item::new("a.rs"), Item::new("b.ts"), Item::new("c.md")];
        assert_eq!(kept("*.rs *.ts", &items), ["a.rs", "b.ts"]);
    }

    #[test]
    fn negated_extension_drops_matching_files() {
        let items = [Item::new("a.rs"), Item::new("b.ts")];
        assert_eq!(kept("query !*.rs", &items), ["b.ts"]);
    }

    #[test]
    fn segments_and_text_exclusions_stack() {
        let items = [
            Item::new("src/app.rs"),
            Item::new("src/test_util.rs"),
            Item::new("lib/app.rs"),
        ];
        assert_eq!(kept("query /src/ !test", &items), ["src/app.rs"]);
    }

    #[test]
    fn globs_match_against_the_relative_path() {
        let items = [
            Item::new("src/deep/mod.rs"),
            Item::new("src/deep/mod.ts"),
            Item::new("lib/mod.rs"),
        ];
        assert_eq!(kept("query src/**/*.rs", &items), ["src/deep/mod.rs"]);
        assert_eq!(
            kept("query !src/**/*.rs", &items),
            ["src/deep/mod.ts", "lib/mod.rs"]
        );
    }

    #[test]
    fn unparseable_glob_matches_nothing() {
        let items = [Item::new("a[1.rs"), Item::new("plain.rs")];
        // "a[" never compiles; the positive glob therefore rejects everything
        let parsed = QueryParser::default().parse("query a[");
        if let Some(filter) = FileFilter::compile(&parsed.constraints) {
            assert!(filter.apply(&items).is_empty());
        }
    }

    #[test]
    fn vcs_predicates_honour_polarity() {
        let items = [
            Item::with_status("dirty.rs", git2::Status::WT_MODIFIED),
            Item::with_status("fresh.rs", git2::Status::WT_NEW),
            Item::new("clean.rs"),
        ];

        assert_eq!(kept("query status:untracked", &items), ["fresh.rs"]);
        assert_eq!(kept("query !status:modified", &items), ["clean.rs"]);
        assert_eq!(kept("query status:clean", &items), ["clean.rs"]);
    }
}
