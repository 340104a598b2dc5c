//! Query-completion history: which file a query led to, and the recency
//! ordered log of past queries.
//!
//! Two key spaces inside one KV database:
//! - `c|<query>|<path>` -> little-endian u32 selection count
//! - `h|<seq>` -> query string, seq fixed-width big-endian so a range scan
//!   yields chronological order
//!
//! Both spaces are mirrored in memory at open: combo lookups are O(1) for
//! the scorer and `historical_query(offset)` never touches the store.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use ahash::AHashMap;
use tracing::warn;

use crate::error::Result;
use crate::health::DbHealth;
use crate::store::KvStore;
use crate::types::ComboCounts;

const MAX_HISTORY_ENTRIES: usize = 128;

const COMBO_PREFIX: &[u8] = b"c|";
const HISTORY_PREFIX: &[u8] = b"h|";

pub struct QueryHistory {
    store: Option<KvStore>,
    combos: AHashMap<String, ComboCounts>,
    /// `(seq, query)` pairs, oldest first; capped at `MAX_HISTORY_ENTRIES`.
    log: VecDeque<(u64, String)>,
    next_seq: u64,
}

impl std::fmt::Debug for QueryHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryHistory")
            .field("persistent", &self.store.is_some())
            .field("combo_queries", &self.combos.len())
            .field("log_len", &self.log.len())
            .finish()
    }
}

/// Canonical form used for combo keys and the history log: trimmed,
/// lowercased, inner whitespace runs collapsed to single spaces.
pub fn normalize_query(query: &str) -> String {
    let mut normalized = String::with_capacity(query.len());
    for part in query.split_whitespace() {
        if !normalized.is_empty() {
            normalized.push(' ');
        }
        for c in part.chars() {
            normalized.extend(c.to_lowercase());
        }
    }
    normalized
}

impl QueryHistory {
    pub fn new(db_path: &Path, unsafe_no_lock: bool) -> Result<Self> {
        let store = KvStore::open(db_path, unsafe_no_lock)?;

        let mut combos: AHashMap<String, ComboCounts> = AHashMap::new();
        for (key, value) in store.scan(COMBO_PREFIX)? {
            let Some((query, path)) = split_combo_key(&key) else {
                continue;
            };
            let Ok(count_bytes) = <[u8; 4]>::try_from(value.as_slice()) else {
                continue;
            };
            combos
                .entry(query)
                .or_default()
                .insert(path, u32::from_le_bytes(count_bytes));
        }

        let mut log = VecDeque::new();
        for (key, value) in store.scan(HISTORY_PREFIX)? {
            let Ok(seq_bytes) = <[u8; 8]>::try_from(&key[HISTORY_PREFIX.len()..]) else {
                continue;
            };
            log.push_back((
                u64::from_be_bytes(seq_bytes),
                String::from_utf8_lossy(&value).into_owned(),
            ));
        }
        let next_seq = log.back().map_or(0, |(seq, _)| seq + 1);

        let mut history = Self {
            store: Some(store),
            combos,
            log,
            next_seq,
        };
        history.evict_over_cap();
        Ok(history)
    }

    /// A history without persistence, used when the store is unavailable.
    pub fn ephemeral() -> Self {
        Self {
            store: None,
            combos: AHashMap::new(),
            log: VecDeque::new(),
            next_seq: 0,
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.store.is_some()
    }

    /// Record that `query` ended with `selected_path` being picked.
    pub fn track_completion(&mut self, query: &str, selected_path: &Path) {
        let normalized = normalize_query(query);
        if normalized.is_empty() {
            return;
        }

        let count = {
            let entry = self
                .combos
                .entry(normalized.clone())
                .or_default()
                .entry(selected_path.to_path_buf())
                .or_insert(0);
            *entry = entry.saturating_add(1);
            *entry
        };
        self.persist_combo(&normalized, selected_path, count);

        // Deduplicate against the most recent entry only - older duplicates
        // keep their place in the log.
        if self.log.back().is_some_and(|(_, last)| *last == normalized) {
            return;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.log.push_back((seq, normalized.clone()));
        if let Some(store) = &self.store {
            if let Err(e) = store.put(&history_key(seq), normalized.as_bytes()) {
                warn!(query = %normalized, error = %e, "Failed to persist history entry");
            }
        }

        self.evict_over_cap();
    }

    /// Selection count for `(query, candidate)` - O(1), used by the scorer.
    pub fn combo_count(&self, query: &str, candidate: &Path) -> u32 {
        self.combos
            .get(&normalize_query(query))
            .and_then(|counts| counts.get(candidate))
            .copied()
            .unwrap_or(0)
    }

    /// All combo counts for one query, cloned out so the caller can release
    /// the history lock before scoring.
    pub fn combo_counts_for(&self, query: &str) -> Option<ComboCounts> {
        self.combos.get(&normalize_query(query)).cloned()
    }

    /// `offset = 0` is the most recent query, 1 the one before it, and so on.
    pub fn historical_query(&self, offset: usize) -> Option<String> {
        let index = self.log.len().checked_sub(offset + 1)?;
        self.log.get(index).map(|(_, query)| query.clone())
    }

    pub fn log_len(&self) -> usize {
        self.log.len()
    }

    fn evict_over_cap(&mut self) {
        while self.log.len() > MAX_HISTORY_ENTRIES {
            let Some((seq, _)) = self.log.pop_front() else {
                break;
            };
            if let Some(store) = &self.store {
                if let Err(e) = store.delete(&history_key(seq)) {
                    warn!(seq, error = %e, "Failed to evict history entry");
                }
            }
        }
    }

    fn persist_combo(&self, query: &str, path: &Path, count: u32) {
        let Some(store) = &self.store else { return };
        let key = combo_key(query, path);
        if let Err(e) = store.put(&key, &count.to_le_bytes()) {
            warn!(%query, ?path, error = %e, "Failed to persist combo count");
        }
    }

    pub fn health(&self) -> Option<Result<DbHealth>> {
        self.store
            .as_ref()
            .map(|store| DbHealth::of(store, "history_entries"))
    }
}

fn combo_key(query: &str, path: &Path) -> Vec<u8> {
    let path = path.to_string_lossy();
    let mut key = Vec::with_capacity(COMBO_PREFIX.len() + query.len() + 1 + path.len());
    key.extend_from_slice(COMBO_PREFIX);
    key.extend_from_slice(query.as_bytes());
    key.push(b'|');
    key.extend_from_slice(path.as_bytes());
    key
}

/// Inverse of [`combo_key`]. The path sits after the last `|` - normalized
/// queries may contain `|`, paths with one are vanishingly rare.
fn split_combo_key(key: &[u8]) -> Option<(String, PathBuf)> {
    let body = key.strip_prefix(COMBO_PREFIX)?;
    let sep = body.iter().rposition(|&b| b == b'|')?;
    let query = String::from_utf8_lossy(&body[..sep]).into_owned();
    let path = PathBuf::from(String::from_utf8_lossy(&body[sep + 1..]).into_owned());
    Some((query, path))
}

fn history_key(seq: u64) -> [u8; 10] {
    let mut key = [0u8; 10];
    key[..2].copy_from_slice(HISTORY_PREFIX);
    key[2..].copy_from_slice(&seq.to_be_bytes());
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_rules() {
        assert_eq!(normalize_query("  Foo   BAR "), "foo bar");
        assert_eq!(normalize_query("main"), "main");
        assert_eq!(normalize_query("   "), "");
    }

    #[test]
    fn completion_counts_accumulate() {
        let mut history = QueryHistory::ephemeral();
        let file = PathBuf::from("/p/src/main.rs");

        history.track_completion("main", &file);
        history.track_completion("Main ", &file);
        assert_eq!(history.combo_count("main", &file), 2);
        assert_eq!(history.combo_count("main", Path::new("/p/other.rs")), 0);
        assert_eq!(history.combo_count("other", &file), 0);
    }

    #[test]
    fn history_dedups_against_most_recent_only() {
        let mut history = QueryHistory::ephemeral();
        let file = PathBuf::from("/p/a.rs");

        history.track_completion("one", &file);
        history.track_completion("one", &file);
        history.track_completion("two", &file);
        history.track_completion("one", &file);

        assert_eq!(history.historical_query(0).as_deref(), Some("one"));
        assert_eq!(history.historical_query(1).as_deref(), Some("two"));
        assert_eq!(history.historical_query(2).as_deref(), Some("one"));
        assert_eq!(history.historical_query(3), None);
    }

    #[test]
    fn eviction_keeps_offsets_stable() {
        let mut history = QueryHistory::ephemeral();
        let file = PathBuf::from("/p/a.rs");

        for i in 0..(MAX_HISTORY_ENTRIES + 10) {
            history.track_completion(&format!("query {i}"), &file);
        }

        assert_eq!(history.log_len(), MAX_HISTORY_ENTRIES);
        let newest = format!("query {}", MAX_HISTORY_ENTRIES + 9);
        assert_eq!(history.historical_query(0), Some(newest));
        assert_eq!(
            history.historical_query(MAX_HISTORY_ENTRIES - 1),
            Some("query 10".to_string())
        );
        assert_eq!(history.historical_query(MAX_HISTORY_ENTRIES), None);
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let file = PathBuf::from("/p/src/lib.rs");

        {
            let mut history = QueryHistory::new(dir.path(), false).unwrap();
            history.track_completion("lib", &file);
            history.track_completion("lib", &file);
            history.track_completion("other query", &file);
        }

        let history = QueryHistory::new(dir.path(), false).unwrap();
        assert_eq!(history.combo_count("lib", &file), 2);
        assert_eq!(history.historical_query(0).as_deref(), Some("other query"));
        assert_eq!(history.historical_query(1).as_deref(), Some("lib"));
    }

    #[test]
    fn combo_key_roundtrip() {
        let key = combo_key("fn main", Path::new("/a/b.rs"));
        let (query, path) = split_combo_key(&key).unwrap();
        assert_eq!(query, "fn main");
        assert_eq!(path, PathBuf::from("/a/b.rs"));
    }
}
