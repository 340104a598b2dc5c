//! Multi-signal fuzzy scoring and ranking.
//!
//! The base match comes from `neo_frizbee` (SIMD Smith-Waterman with typo
//! tolerance); on top of it sit the filename bonuses, the frecency boost,
//! the combo boost for `(query, file)` pairs picked together before, and
//! the match-depth / current-file penalties. Ranking is deterministic
//! regardless of thread count: total descending, relative path ascending.

use ahash::{AHashMap, AHashSet};
use neo_frizbee::Scoring;
use once_cell::sync::Lazy;
use rayon::prelude::*;

use crate::constraints::FileFilter;
use crate::git::is_modified_status;
use crate::path_utils::match_depth_penalty;
use crate::types::{FileEntry, ScoreBreakdown, ScoringContext};

/// Queries longer than this are truncated (at a char boundary) before
/// matching - a pathological query must not blow up the matcher.
pub const MAX_QUERY_LEN: usize = 256;

/// Default ceiling for the frecency boost so heavily-accessed files cannot
/// drown out clearly better matches.
pub const DEFAULT_FRECENCY_BOOST_CEILING: i32 = 120;

pub fn clamp_query(query: &str) -> &str {
    if query.len() <= MAX_QUERY_LEN {
        return query;
    }
    let mut end = MAX_QUERY_LEN;
    while end > 0 && !query.is_char_boundary(end) {
        end -= 1;
    }
    &query[..end]
}

/// Basenames that act as module entry points and deserve a small bonus.
/// Entries ending in `*` match as case-insensitive prefixes.
#[derive(Debug, Clone)]
pub struct SpecialFilenames {
    exact: AHashSet<String>,
    prefixes: Vec<String>,
}

impl SpecialFilenames {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut exact = AHashSet::new();
        let mut prefixes = Vec::new();
        for pattern in patterns {
            let pattern = pattern.as_ref().to_lowercase();
            match pattern.strip_suffix('*') {
                Some(prefix) if !prefix.is_empty() => prefixes.push(prefix.to_string()),
                _ => {
                    exact.insert(pattern);
                }
            }
        }
        Self { exact, prefixes }
    }

    #[inline]
    pub fn matches(&self, file_name_lower: &str) -> bool {
        self.exact.contains(file_name_lower)
            || self.prefixes.iter().any(|p| file_name_lower.starts_with(p))
    }
}

pub static DEFAULT_SPECIAL_FILENAMES: Lazy<SpecialFilenames> = Lazy::new(|| {
    SpecialFilenames::new([
        "mod.rs",
        "lib.rs",
        "main.rs",
        "index.js",
        "index.jsx",
        "index.ts",
        "index.tsx",
        "index.mjs",
        "index.cjs",
        "index.vue",
        "__init__.py",
        "__main__.py",
        "main.go",
        "main.c",
        "index.php",
        "main.rb",
        "index.rb",
        "README*",
    ])
});

/// Candidate set - either the whole index (borrowed, zero allocation) or
/// the constraint-filtered subset.
enum Candidates<'a> {
    All(&'a [FileEntry]),
    Filtered(Vec<&'a FileEntry>),
}

impl<'a> Candidates<'a> {
    /// Relative paths in original casing: neo_frizbee lowercases internally
    /// for comparison but keeps the original for capitalization bonuses.
    fn haystack(&self) -> Vec<&'a str> {
        match self {
            Candidates::All(s) => s.iter().map(|f| f.relative_path.as_str()).collect(),
            Candidates::Filtered(v) => v.iter().map(|f| f.relative_path.as_str()).collect(),
        }
    }

    #[inline]
    fn get(&self, index: usize) -> &'a FileEntry {
        match self {
            Candidates::All(s) => &s[index],
            Candidates::Filtered(v) => v[index],
        }
    }
}

/// A candidate that survived the fuzzy match, in the scorer's own shape.
/// Decoupled from the matcher's result type so multi-part merging owns its
/// accumulator and downstream heuristics don't depend on engine internals.
#[derive(Debug, Clone, Copy)]
struct PathMatch {
    index: usize,
    score: u16,
    match_start: u16,
    exact: bool,
}

impl PathMatch {
    #[inline]
    fn from_engine(m: neo_frizbee::Match) -> Self {
        Self {
            index: m.index as usize,
            score: m.score,
            match_start: m.match_start_index,
            exact: m.exact,
        }
    }
}

/// One batched pass of a single part over the whole candidate list, with
/// the typo budget clamped to the part length.
fn match_one_part(
    part: &str,
    haystack: &[&str],
    base: &neo_frizbee::Config,
) -> Vec<neo_frizbee::Match> {
    let mut config = base.clone();
    config.max_typos = base.max_typos.map(|t| t.min(part.len() as u16));
    neo_frizbee::match_list(part, haystack, &config)
}

/// Match every fuzzy part against the candidates. Parts shorter than two
/// chars carry no signal and are skipped.
///
/// Multi-part queries run one batched pass per part and intersect the
/// rounds by candidate index: a path survives only when every part matched
/// it, its score is the sum over rounds, and the positional fields come
/// from the first part (which drives the filename heuristics downstream).
fn match_fuzzy_parts(
    fuzzy_parts: &[&str],
    candidates: &Candidates<'_>,
    options: &neo_frizbee::Config,
) -> Vec<PathMatch> {
    let mut parts = fuzzy_parts.iter().copied().filter(|p| p.len() >= 2);
    let Some(first) = parts.next() else {
        return vec![];
    };

    let haystack = candidates.haystack();
    let mut survivors: Vec<PathMatch> = match_one_part(first, &haystack, options)
        .into_iter()
        .map(PathMatch::from_engine)
        .collect();

    for part in parts {
        if survivors.is_empty() {
            break;
        }

        let mut round_scores: AHashMap<usize, u16> = AHashMap::with_capacity(survivors.len());
        for m in match_one_part(part, &haystack, options) {
            round_scores.insert(m.index as usize, m.score);
        }

        survivors.retain_mut(|survivor| match round_scores.get(&survivor.index) {
            Some(&round_score) => {
                survivor.score = survivor.score.saturating_add(round_score);
                true
            }
            None => false,
        });
    }

    survivors
}

pub fn match_and_score_files<'a>(
    files: &'a [FileEntry],
    context: &ScoringContext<'_>,
) -> (Vec<&'a FileEntry>, Vec<ScoreBreakdown>, usize) {
    if files.is_empty() {
        return (vec![], vec![], 0);
    }

    let parsed = &context.parsed_query;
    let candidates: Candidates<'a> = match FileFilter::compile(&parsed.constraints) {
        Some(filter) => {
            let kept = filter.apply(files);
            if kept.is_empty() {
                return (vec![], vec![], 0);
            }
            Candidates::Filtered(kept)
        }
        None => Candidates::All(files),
    };

    let fuzzy_parts = parsed.fuzzy_parts();
    if fuzzy_parts.iter().all(|p| p.len() < 2) {
        return score_by_frecency(&candidates, context);
    }

    let has_uppercase = fuzzy_parts
        .iter()
        .any(|p| p.chars().any(|c| c.is_uppercase()));
    let query_contains_path_separator = fuzzy_parts.iter().any(|p| p.contains('/'));

    let options = neo_frizbee::Config {
        prefilter: true,
        max_typos: Some(context.max_typos),
        sort: false,
        scoring: Scoring {
            capitalization_bonus: if has_uppercase { 8 } else { 0 },
            matching_case_bonus: if has_uppercase { 4 } else { 0 },
            ..Default::default()
        },
    };

    let path_matches = match_fuzzy_parts(fuzzy_parts, &candidates, &options);

    let results: Vec<_> = path_matches
        .into_iter()
        .filter(|m| m.score > 0)
        .map(|path_match| {
            let file = candidates.get(path_match.index);
            let base_score = path_match.score as i32;

            let frecency_boost =
                (file.total_frecency_score as i32).clamp(0, context.frecency_boost_ceiling);

            let is_filename_match = !query_contains_path_separator
                && path_match.match_start >= file.file_name_start_index;

            let mut special_filename_bonus = 0;
            let filename_bonus = if path_match.exact && is_filename_match {
                // exact match on the file name itself - 40% bonus
                base_score / 5 * 2
            } else if is_filename_match {
                // fuzzy match starting within the filename portion; capped
                // so huge base scores don't let the bonus displace plainly
                // better path matches
                (base_score / 6).min(30)
            } else if context.special_filenames.matches(&file.file_name_lower) {
                // entry-point files get a nudge, deliberately smaller than
                // the filename bonus so server.rs still beats server/mod.rs
                special_filename_bonus = base_score * 5 / 100;
                0
            } else {
                0
            };

            let distance_penalty = match_depth_penalty(
                &file.relative_path,
                path_match.match_start as usize,
                file.file_name_start_index as usize,
            );

            let current_file_penalty = current_file_penalty(file, base_score, context);
            let combo_match_boost = combo_boost(file, context);

            let total = base_score
                .saturating_add(filename_bonus)
                .saturating_add(special_filename_bonus)
                .saturating_add(frecency_boost)
                .saturating_add(combo_match_boost)
                .saturating_add(distance_penalty)
                .saturating_add(current_file_penalty);

            let score = ScoreBreakdown {
                total,
                base_score,
                filename_bonus,
                special_filename_bonus,
                frecency_boost,
                distance_penalty,
                current_file_penalty,
                combo_match_boost,
                exact_match: path_match.exact,
                match_type: if path_match.exact && is_filename_match {
                    "exact_filename"
                } else if is_filename_match {
                    "fuzzy_filename"
                } else {
                    "fuzzy_path"
                },
            };

            (file, score)
        })
        .collect();

    sort_and_paginate(results, context)
}

/// Ranking for empty match queries: the frecency-sorted prefix of the
/// candidate set, every candidate counted in `total_matched`.
fn score_by_frecency<'a>(
    candidates: &Candidates<'a>,
    context: &ScoringContext<'_>,
) -> (Vec<&'a FileEntry>, Vec<ScoreBreakdown>, usize) {
    let score_file = |file: &'a FileEntry| {
        let frecency_boost =
            (file.total_frecency_score as i32).clamp(0, context.frecency_boost_ceiling);
        let combo_match_boost = combo_boost(file, context);
        let current_file_penalty = current_file_penalty(file, frecency_boost.max(1), context);
        let total = frecency_boost
            .saturating_add(combo_match_boost)
            .saturating_add(current_file_penalty);

        let score = ScoreBreakdown {
            total,
            base_score: 0,
            filename_bonus: 0,
            special_filename_bonus: 0,
            frecency_boost,
            distance_penalty: 0,
            current_file_penalty,
            combo_match_boost,
            exact_match: false,
            match_type: "frecency",
        };

        (file, score)
    };

    let results: Vec<_> = match candidates {
        Candidates::All(s) => s.par_iter().map(&score_file).collect(),
        Candidates::Filtered(v) => v.iter().map(|&file| score_file(file)).collect(),
    };

    sort_and_paginate(results, context)
}

#[inline]
fn current_file_penalty(file: &FileEntry, base_score: i32, context: &ScoringContext<'_>) -> i32 {
    match context.current_file {
        // the file being edited is the least useful search result; when it
        // carries local modifications the user may still want to jump back,
        // so only half the score is taken
        Some(current) if file.relative_path == current => match file.vcs_status {
            Some(status) if is_modified_status(status) => -(base_score / 2),
            _ => -base_score,
        },
        _ => 0,
    }
}

#[inline]
fn combo_boost(file: &FileEntry, context: &ScoringContext<'_>) -> i32 {
    if context.combo_boost_multiplier == 0 {
        return 0;
    }

    let count = context
        .combo_counts
        .and_then(|counts| counts.get(&file.path))
        .copied()
        .unwrap_or(0);

    if count >= context.min_combo_count.max(1) {
        (count as i32).saturating_mul(context.combo_boost_multiplier)
    } else {
        0
    }
}

/// Sort by total descending with relative path as the deterministic
/// tie-break, then slice out the requested page.
fn sort_and_paginate<'a>(
    mut results: Vec<(&'a FileEntry, ScoreBreakdown)>,
    context: &ScoringContext<'_>,
) -> (Vec<&'a FileEntry>, Vec<ScoreBreakdown>, usize) {
    let total_matched = results.len();
    if total_matched == 0 {
        return (vec![], vec![], 0);
    }

    let offset = context.pagination.offset();
    let limit = if context.pagination.page_size > 0 {
        context.pagination.page_size
    } else {
        total_matched
    };

    if offset >= total_matched {
        tracing::debug!(offset, total_matched, "Pagination past the last page");
        return (vec![], vec![], total_matched);
    }

    let compare = |a: &(&FileEntry, ScoreBreakdown), b: &(&FileEntry, ScoreBreakdown)| {
        b.1.total
            .cmp(&a.1.total)
            .then_with(|| a.0.relative_path.cmp(&b.0.relative_path))
    };

    let items_needed = offset.saturating_add(limit).min(total_matched);
    // Partial sort pays off when only a small prefix of a large result set
    // is needed; select_nth partitions, the final sort stays small.
    if items_needed < total_matched / 2 && total_matched > 100 {
        results.select_nth_unstable_by(items_needed - 1, compare);
        results.truncate(items_needed);
    }

    glidesort::sort_by(&mut results, compare);

    if results.len() > limit || offset > 0 {
        let page_end = (offset + limit).min(results.len());
        results.drain(..offset);
        results.truncate(page_end - offset);
    }

    let (items, scores): (Vec<&FileEntry>, Vec<ScoreBreakdown>) = results.into_iter().unzip();
    (items, scores, total_matched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Pagination;
    use quarry_query_parser::QueryParser;
    use std::path::PathBuf;

    fn entry(path: &str) -> FileEntry {
        let file_name = path.rsplit('/').next().unwrap_or(path).to_string();
        FileEntry {
            path: PathBuf::from(format!("/base/{path}")),
            relative_path: path.to_string(),
            relative_path_lower: path.to_lowercase(),
            file_name_start_index: path.len().saturating_sub(file_name.len()) as u16,
            file_name_lower: file_name.to_lowercase(),
            extension: file_name.rsplit('.').next().unwrap_or("").to_string(),
            file_name,
            size: 1,
            modified: 0,
            is_binary: false,
            is_large: false,
            vcs_status: None,
            access_frecency_score: 0,
            modification_frecency_score: 0,
            total_frecency_score: 0,
        }
    }

    fn context<'a>(query: &'a str, parsed: quarry_query_parser::ParsedQuery<'a>) -> ScoringContext<'a> {
        ScoringContext {
            raw_query: query,
            parsed_query: parsed,
            current_file: None,
            max_typos: 2,
            max_threads: 1,
            combo_counts: None,
            combo_boost_multiplier: 100,
            min_combo_count: 3,
            frecency_boost_ceiling: DEFAULT_FRECENCY_BOOST_CEILING,
            special_filenames: &DEFAULT_SPECIAL_FILENAMES,
            pagination: Pagination {
                page_index: 0,
                page_size: 0,
            },
        }
    }

    fn search<'a>(
        files: &'a [FileEntry],
        query: &str,
    ) -> (Vec<&'a FileEntry>, Vec<ScoreBreakdown>, usize) {
        let parser = QueryParser::default();
        let parsed = parser.parse(query);
        match_and_score_files(files, &context(query, parsed))
    }

    #[test]
    fn empty_index_matches_nothing() {
        let (items, scores, total) = search(&[], "main");
        assert!(items.is_empty());
        assert!(scores.is_empty());
        assert_eq!(total, 0);
    }

    #[test]
    fn unrelated_entries_do_not_outrank_the_match() {
        let files = vec![entry("src/main.rs"), entry("docs/zzz.txt")];
        let (items, _, total) = search(&files, "main");
        assert!(total >= 1);
        assert_eq!(items[0].relative_path, "src/main.rs");
    }

    #[test]
    fn filename_match_beats_directory_match() {
        let files = vec![
            entry("config/deep/nested/other.toml"),
            entry("src/config.rs"),
        ];
        let (items, scores, _) = search(&files, "config");
        assert_eq!(items[0].relative_path, "src/config.rs");
        assert!(scores[0].filename_bonus > 0);
    }

    #[test]
    fn special_filename_bonus_applies() {
        let files = vec![entry("src/main.rs"), entry("src/maintain.rs")];
        let (items, scores, total) = search(&files, "mai");
        assert_eq!(total, 2);
        assert_eq!(items[0].relative_path, "src/main.rs");
        let main_idx = items
            .iter()
            .position(|f| f.relative_path == "src/main.rs")
            .unwrap();
        assert!(
            scores[main_idx].special_filename_bonus > 0
                || scores[main_idx].filename_bonus > 0
        );
    }

    #[test]
    fn frecency_boost_is_capped() {
        let mut hot = entry("src/hot.rs");
        hot.total_frecency_score = 10_000;
        let files = vec![hot, entry("src/hothot.rs")];
        let (_, scores, _) = search(&files, "hot");
        for score in &scores {
            assert!(score.frecency_boost <= DEFAULT_FRECENCY_BOOST_CEILING);
        }
    }

    #[test]
    fn empty_query_lists_by_frecency() {
        let mut a = entry("src/a.rs");
        a.total_frecency_score = 10;
        let mut b = entry("src/b.rs");
        b.total_frecency_score = 90;
        let files = vec![a, b];

        let (items, scores, total) = search(&files, "");
        assert_eq!(total, 2);
        assert_eq!(items[0].relative_path, "src/b.rs");
        assert_eq!(scores[0].match_type, "frecency");
    }

    #[test]
    fn ties_break_by_relative_path() {
        let files = vec![entry("src/b.rs"), entry("src/a.rs"), entry("src/c.rs")];
        let (items, _, _) = search(&files, "");
        let paths: Vec<_> = items.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(paths, ["src/a.rs", "src/b.rs", "src/c.rs"]);
    }

    #[test]
    fn current_file_is_deprioritised() {
        let files = vec![entry("src/main.rs"), entry("src/main_loop.rs")];
        let parser = QueryParser::default();
        let parsed = parser.parse("main");
        let mut ctx = context("main", parsed);
        ctx.current_file = Some("src/main.rs");

        let (items, scores, _) = match_and_score_files(&files, &ctx);
        assert_eq!(items[0].relative_path, "src/main_loop.rs");
        let main_idx = items
            .iter()
            .position(|f| f.relative_path == "src/main.rs")
            .unwrap();
        assert!(scores[main_idx].current_file_penalty < 0);
    }

    #[test]
    fn combo_boost_requires_threshold() {
        let files = vec![entry("tests/t.rs"), entry("tests/t_helper.rs")];
        let parser = QueryParser::default();

        let mut counts = crate::types::ComboCounts::default();
        counts.insert(PathBuf::from("/base/tests/t.rs"), 2);

        let parsed = parser.parse("tests");
        let mut ctx = context("tests", parsed);
        ctx.combo_counts = Some(&counts);
        let (_, scores, _) = match_and_score_files(&files, &ctx);
        assert!(scores.iter().all(|s| s.combo_match_boost == 0));

        counts.insert(PathBuf::from("/base/tests/t.rs"), 3);
        let parsed = parser.parse("tests");
        let mut ctx = context("tests", parsed);
        ctx.combo_counts = Some(&counts);
        let (items, scores, _) = match_and_score_files(&files, &ctx);
        assert_eq!(items[0].relative_path, "tests/t.rs");
        assert_eq!(scores[0].combo_match_boost, 300);
    }

    #[test]
    fn extension_constraint_filters_candidates() {
        let files = vec![entry("src/main.rs"), entry("src/main.ts")];
        let (items, _, total) = search(&files, "main *.rs");
        assert_eq!(total, 1);
        assert_eq!(items[0].relative_path, "src/main.rs");
    }

    #[test]
    fn location_suffix_does_not_change_items() {
        let files = vec![entry("src/main.rs"), entry("src/lib.rs")];
        let (plain_items, _, plain_total) = search(&files, "main");
        let (loc_items, _, loc_total) = search(&files, "main:10");

        assert_eq!(plain_total, loc_total);
        let plain: Vec<_> = plain_items.iter().map(|f| &f.relative_path).collect();
        let with_loc: Vec<_> = loc_items.iter().map(|f| &f.relative_path).collect();
        assert_eq!(plain, with_loc);
    }

    #[test]
    fn pagination_is_stable() {
        let files: Vec<FileEntry> = (0..25).map(|i| entry(&format!("src/f{i:02}.rs"))).collect();
        let parser = QueryParser::default();

        let mut all = Vec::new();
        for page_index in 0..3 {
            let parsed = parser.parse("");
            let mut ctx = context("", parsed);
            ctx.pagination = Pagination {
                page_index,
                page_size: 10,
            };
            let (items, _, total) = match_and_score_files(&files, &ctx);
            assert_eq!(total, 25);
            all.extend(items.iter().map(|f| f.relative_path.clone()));
        }

        assert_eq!(all.len(), 25);
        let mut dedup = all.clone();
        dedup.sort();
        dedup.dedup();
        assert_eq!(dedup.len(), 25, "pages must not overlap");
    }

    #[test]
    fn page_past_the_end_is_empty_but_keeps_total() {
        let files = vec![entry("src/a.rs"), entry("src/b.rs")];
        let parser = QueryParser::default();
        let parsed = parser.parse("");
        let mut ctx = context("", parsed);
        ctx.pagination = Pagination {
            page_index: 9,
            page_size: 10,
        };
        let (items, _, total) = match_and_score_files(&files, &ctx);
        assert!(items.is_empty());
        assert_eq!(total, 2);
    }

    #[test]
    fn query_clamping_respects_char_boundaries() {
        let long: String = "я".repeat(300);
        let clamped = clamp_query(&long);
        assert!(clamped.len() <= MAX_QUERY_LEN);
        assert!(long.starts_with(clamped));
    }

    #[test]
    fn special_filename_patterns() {
        let set = SpecialFilenames::new(["mod.rs", "README*"]);
        assert!(set.matches("mod.rs"));
        assert!(set.matches("readme.md"));
        assert!(set.matches("readme"));
        assert!(!set.matches("module.rs"));
    }
}
