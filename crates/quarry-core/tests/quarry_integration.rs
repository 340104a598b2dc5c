use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tempfile::TempDir;

use quarry_core::types::LocationPayload;
use quarry_core::{Error, GrepMode, GrepOptions, InitOptions, Quarry, SearchOptions};

fn write(base: &Path, rel: &str, contents: &str) -> PathBuf {
    let path = base.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, contents).unwrap();
    path
}

/// The standard fixture tree from the ranking scenarios.
fn fixture_tree() -> TempDir {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "src/main.rs", "fn main() {\n    run();\n}\n");
    write(tmp.path(), "src/lib.rs", "pub fn run() {}\n");
    write(tmp.path(), "README.md", "# demo project\n");
    write(tmp.path(), "tests/t.rs", "#[test]\nfn smoke() {}\n");
    tmp
}

fn engine(tmp: &TempDir) -> Quarry {
    let quarry = Quarry::create(InitOptions::new(tmp.path())).unwrap();
    assert!(quarry.wait_for_scan(10_000).unwrap(), "scan must finish");
    quarry
}

fn abs(tmp: &TempDir, rel: &str) -> PathBuf {
    tmp.path().canonicalize().unwrap().join(rel)
}

#[test]
fn scan_indexes_the_whole_tree() {
    let tmp = fixture_tree();
    let quarry = engine(&tmp);

    let progress = quarry.scan_progress().unwrap();
    assert!(!progress.is_scanning);
    assert_eq!(progress.scanned_files_count, 4);
    assert!(progress.last_error.is_none());

    let result = quarry.search("", &SearchOptions::default()).unwrap();
    assert_eq!(result.total_files, 4);
    assert_eq!(result.total_matched, 4);
}

#[test]
fn special_filename_ranking_prefers_main() {
    let tmp = fixture_tree();
    let quarry = engine(&tmp);

    let result = quarry.search("mai", &SearchOptions::default()).unwrap();
    assert!(!result.items.is_empty());
    assert_eq!(result.items[0].relative_path, "src/main.rs");
}

#[test]
fn location_suffix_is_split_off_the_query() {
    let tmp = fixture_tree();
    let quarry = engine(&tmp);

    let result = quarry
        .search("README.md:10", &SearchOptions::default())
        .unwrap();
    assert_eq!(result.items[0].relative_path, "README.md");
    match result.location {
        Some(LocationPayload::Point { line, col }) => {
            assert_eq!(line, 10);
            assert_eq!(col, None);
        }
        other => panic!("expected a line location, got {other:?}"),
    }

    // the suffix must not change which items match
    let plain = quarry.search("README.md", &SearchOptions::default()).unwrap();
    let plain_paths: Vec<_> = plain.items.iter().map(|i| &i.relative_path).collect();
    let with_loc = quarry
        .search("README.md:10", &SearchOptions::default())
        .unwrap();
    let loc_paths: Vec<_> = with_loc.items.iter().map(|i| &i.relative_path).collect();
    assert_eq!(plain_paths, loc_paths);
    assert_eq!(plain.total_matched, with_loc.total_matched);

    // a bare suffix is a frecency listing plus the location
    let bare = quarry.search(":42", &SearchOptions::default()).unwrap();
    assert_eq!(bare.total_matched, 4);
    match bare.location {
        Some(LocationPayload::Point { line, .. }) => assert_eq!(line, 42),
        other => panic!("expected a line location, got {other:?}"),
    }
}

#[test]
fn tracked_accesses_drive_the_empty_query_ranking() {
    let tmp = fixture_tree();
    let quarry = engine(&tmp);
    let main_rs = abs(&tmp, "src/main.rs");

    for _ in 0..5 {
        quarry.track_access(&main_rs).unwrap();
    }

    let result = quarry.search("", &SearchOptions::default()).unwrap();
    assert_eq!(result.items[0].relative_path, "src/main.rs");
    assert!(result.items[0].frecency_access > 0);
}

#[test]
fn combo_boost_applies_at_the_threshold() {
    let tmp = fixture_tree();
    let quarry = engine(&tmp);
    let t_rs = abs(&tmp, "tests/t.rs");

    for _ in 0..3 {
        quarry.track_query("tests", &t_rs).unwrap();
    }

    let options = SearchOptions::default();
    let result = quarry.search("tests", &options).unwrap();

    assert_eq!(result.items[0].relative_path, "tests/t.rs");
    assert_eq!(
        result.scores[0].combo_match_boost,
        3 * options.combo_boost_multiplier
    );
}

#[test]
fn combo_boost_below_threshold_is_zero() {
    let tmp = fixture_tree();
    let quarry = engine(&tmp);
    let t_rs = abs(&tmp, "tests/t.rs");

    quarry.track_query("tests", &t_rs).unwrap();
    quarry.track_query("tests", &t_rs).unwrap();

    let result = quarry.search("tests", &SearchOptions::default()).unwrap();
    for score in &result.scores {
        assert_eq!(score.combo_match_boost, 0);
    }
}

#[test]
fn query_history_cycles_most_recent_first() {
    let tmp = fixture_tree();
    let quarry = engine(&tmp);
    let main_rs = abs(&tmp, "src/main.rs");

    quarry.track_query("first query", &main_rs).unwrap();
    quarry.track_query("Second Query", &main_rs).unwrap();

    assert_eq!(
        quarry.historical_query(0).unwrap().as_deref(),
        Some("second query")
    );
    assert_eq!(
        quarry.historical_query(1).unwrap().as_deref(),
        Some("first query")
    );
    assert_eq!(quarry.historical_query(2).unwrap(), None);
}

#[test]
fn live_grep_finds_single_occurrence() {
    let tmp = fixture_tree();
    let quarry = engine(&tmp);

    let result = quarry
        .live_grep("fn main", &GrepOptions::default())
        .unwrap();

    assert_eq!(result.total_matched, 1);
    let item = &result.items[0];
    assert_eq!(item.file.relative_path, "src/main.rs");
    assert_eq!(item.line_number, 1);
    assert_eq!(item.match_ranges, vec![(0, 7)]);
    assert!(result.next_cursor.is_none());
}

#[test]
fn live_grep_cursor_walk_through_the_facade() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "a.rs", "TODO first\n");
    write(tmp.path(), "b.rs", "TODO second\n");
    write(tmp.path(), "c.rs", "TODO third\n");
    let quarry = engine(&tmp);

    let mut options = GrepOptions {
        page_limit: 2,
        ..GrepOptions::default()
    };

    let first = quarry.live_grep("TODO", &options).unwrap();
    assert_eq!(first.items.len(), 2);
    let cursor = first.next_cursor.expect("one file left");

    options.cursor = Some(quarry_core::GrepCursor::from_raw(cursor));
    let second = quarry.live_grep("TODO", &options).unwrap();
    assert_eq!(second.items.len(), 1);
    assert!(second.next_cursor.is_none());

    let mut paths: Vec<_> = first
        .items
        .iter()
        .chain(second.items.iter())
        .map(|i| i.file.relative_path.clone())
        .collect();
    paths.sort();
    assert_eq!(paths, ["a.rs", "b.rs", "c.rs"]);
}

#[test]
fn fuzzy_grep_carries_scores() {
    let tmp = fixture_tree();
    let quarry = engine(&tmp);

    let options = GrepOptions {
        mode: GrepMode::Fuzzy,
        ..GrepOptions::default()
    };
    let result = quarry.live_grep("fn main", &options).unwrap();
    assert!(!result.items.is_empty());
    assert!(result.items[0].fuzzy_score.is_some());
}

#[test]
fn invalid_regex_surfaces_fallback_error() {
    let tmp = fixture_tree();
    let quarry = engine(&tmp);

    let options = GrepOptions {
        mode: GrepMode::Regex,
        ..GrepOptions::default()
    };
    let result = quarry.live_grep("main(", &options).unwrap();
    assert!(result.regex_fallback_error.is_some());
    // literal fallback still finds "main(" in src/main.rs
    assert_eq!(result.total_matched, 1);
}

#[test]
fn page_size_zero_is_an_invalid_argument() {
    let tmp = fixture_tree();
    let quarry = engine(&tmp);

    let options = SearchOptions {
        page_size: 0,
        ..SearchOptions::default()
    };
    assert!(matches!(
        quarry.search("main", &options),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn page_past_the_end_keeps_total_matched() {
    let tmp = fixture_tree();
    let quarry = engine(&tmp);

    let options = SearchOptions {
        page_index: 9,
        page_size: 10,
        ..SearchOptions::default()
    };
    let result = quarry.search("", &options).unwrap();
    assert!(result.items.is_empty());
    assert_eq!(result.total_matched, 4);
}

#[test]
fn empty_tree_returns_empty_results() {
    let tmp = TempDir::new().unwrap();
    let quarry = engine(&tmp);

    let result = quarry.search("anything", &SearchOptions::default()).unwrap();
    assert!(result.items.is_empty());
    assert_eq!(result.total_matched, 0);

    let grep = quarry.live_grep("anything", &GrepOptions::default()).unwrap();
    assert!(grep.items.is_empty());
    assert_eq!(grep.total_matched, 0);
}

#[test]
fn multiple_handles_coexist_independently() {
    let tmp_a = TempDir::new().unwrap();
    write(tmp_a.path(), "alpha.rs", "alpha\n");
    let tmp_b = TempDir::new().unwrap();
    write(tmp_b.path(), "beta.rs", "beta\n");

    let quarry_a = engine(&tmp_a);
    let quarry_b = engine(&tmp_b);

    let result_a = quarry_a.search("", &SearchOptions::default()).unwrap();
    let result_b = quarry_b.search("", &SearchOptions::default()).unwrap();

    assert_eq!(result_a.items[0].relative_path, "alpha.rs");
    assert_eq!(result_b.items[0].relative_path, "beta.rs");
}

#[test]
fn destroy_turns_calls_into_cancelled() {
    let tmp = fixture_tree();
    let quarry = engine(&tmp);

    quarry.destroy();
    quarry.destroy(); // idempotent

    assert!(matches!(
        quarry.search("main", &SearchOptions::default()),
        Err(Error::Cancelled)
    ));
    assert!(matches!(
        quarry.live_grep("main", &GrepOptions::default()),
        Err(Error::Cancelled)
    ));
    assert!(matches!(quarry.scan_files(), Err(Error::Cancelled)));
}

#[test]
fn restart_index_switches_trees() {
    let tmp_a = TempDir::new().unwrap();
    write(tmp_a.path(), "old_tree.rs", "old\n");
    let tmp_b = TempDir::new().unwrap();
    write(tmp_b.path(), "new_tree.rs", "new\n");

    let quarry = engine(&tmp_a);
    let before = quarry.search("", &SearchOptions::default()).unwrap();
    assert_eq!(before.items[0].relative_path, "old_tree.rs");

    quarry.restart_index(tmp_b.path()).unwrap();

    // restart is fire-and-forget; poll until the new tree publishes
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        quarry.wait_for_scan(1_000).unwrap();
        let result = quarry.search("", &SearchOptions::default()).unwrap();
        if result
            .items
            .first()
            .is_some_and(|i| i.relative_path == "new_tree.rs")
        {
            break;
        }
        assert!(Instant::now() < deadline, "restart did not publish in time");
        std::thread::sleep(Duration::from_millis(25));
    }
}

#[test]
fn restart_into_missing_path_is_not_found() {
    let tmp = fixture_tree();
    let quarry = engine(&tmp);
    assert!(matches!(
        quarry.restart_index("/definitely/not/a/path"),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn frecency_persists_across_engine_instances() {
    let tmp = fixture_tree();
    let db = TempDir::new().unwrap();
    let main_rs;

    {
        let mut options = InitOptions::new(tmp.path());
        options.frecency_db_path = Some(db.path().join("frecency"));
        let quarry = Quarry::create(options).unwrap();
        assert!(quarry.wait_for_scan(10_000).unwrap());

        main_rs = abs(&tmp, "src/main.rs");
        for _ in 0..4 {
            quarry.track_access(&main_rs).unwrap();
        }
        // background persistence may still be in flight when the handle drops
        std::thread::sleep(Duration::from_millis(200));
    }

    let mut options = InitOptions::new(tmp.path());
    options.frecency_db_path = Some(db.path().join("frecency"));
    let quarry = Quarry::create(options).unwrap();
    assert!(quarry.wait_for_scan(10_000).unwrap());

    let result = quarry.search("", &SearchOptions::default()).unwrap();
    assert_eq!(result.items[0].relative_path, "src/main.rs");
    assert!(result.items[0].frecency_access > 0);
}

#[test]
fn history_persists_across_engine_instances() {
    let tmp = fixture_tree();
    let db = TempDir::new().unwrap();

    {
        let mut options = InitOptions::new(tmp.path());
        options.history_db_path = Some(db.path().join("history"));
        let quarry = Quarry::create(options).unwrap();
        assert!(quarry.wait_for_scan(10_000).unwrap());
        quarry
            .track_query("persisted query", &abs(&tmp, "src/lib.rs"))
            .unwrap();
    }

    let mut options = InitOptions::new(tmp.path());
    options.history_db_path = Some(db.path().join("history"));
    let quarry = Quarry::create(options).unwrap();
    assert_eq!(
        quarry.historical_query(0).unwrap().as_deref(),
        Some("persisted query")
    );
}

#[test]
fn health_check_reports_engine_state() {
    let tmp = fixture_tree();
    let quarry = engine(&tmp);

    let report = quarry.health_check(None);
    assert!(!report.version.is_empty());
    assert!(report.vcs.available);

    let index = report.index.expect("index health present");
    assert_eq!(index.indexed_files, 4);
    assert!(!index.is_scanning);
    assert!(index.generation >= 1);

    let frecency = report.frecency.expect("frecency health present");
    assert!(frecency.initialized);
    assert!(!frecency.persistent, "no db path was configured");
}

#[test]
fn standalone_health_check_needs_no_handle() {
    let report = quarry_core::standalone_health_check(None);
    assert!(!report.version.is_empty());
    assert!(report.index.is_none());
}

#[test]
fn current_file_is_pushed_down() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "src/config.rs", "a\n");
    write(tmp.path(), "src/config_loader.rs", "b\n");
    let quarry = engine(&tmp);

    let options = SearchOptions {
        current_file: Some("src/config.rs".to_string()),
        ..SearchOptions::default()
    };
    let result = quarry.search("config", &options).unwrap();
    assert_eq!(result.items[0].relative_path, "src/config_loader.rs");
}

#[test]
fn search_results_carry_score_breakdowns() {
    let tmp = fixture_tree();
    let quarry = engine(&tmp);

    let result = quarry.search("main", &SearchOptions::default()).unwrap();
    assert_eq!(result.items.len(), result.scores.len());
    let score = &result.scores[0];
    assert!(score.base_score > 0);
    assert_eq!(
        score.total,
        score.base_score
            + score.filename_bonus
            + score.special_filename_bonus
            + score.frecency_boost
            + score.combo_match_boost
            + score.distance_penalty
            + score.current_file_penalty
    );
}

#[test]
fn payloads_serialize_to_snake_case_json() {
    let tmp = fixture_tree();
    let quarry = engine(&tmp);

    let search = quarry.search("main", &SearchOptions::default()).unwrap();
    let value = serde_json::to_value(&search).unwrap();
    assert!(value.get("total_matched").is_some());
    assert!(value["items"][0].get("relative_path").is_some());
    assert!(value["scores"][0].get("special_filename_bonus").is_some());

    let grep = quarry.live_grep("fn main", &GrepOptions::default()).unwrap();
    let value = serde_json::to_value(&grep).unwrap();
    assert!(value.get("filtered_file_count").is_some());
    assert!(value["items"][0].get("line_number").is_some());
    assert!(value["items"][0]["file"].get("vcs_status").is_some());
}
