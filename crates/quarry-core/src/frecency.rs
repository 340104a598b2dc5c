//! Persistent frecency tracking: how often and how recently each file was
//! accessed or modified.
//!
//! Records live in the KV store and are mirrored in memory, so the query
//! path never waits on LMDB and a failed persist only costs durability.
//! Scores are integer-quantised bucket weights - pure functions of the
//! record plus the current wall-clock, so equal inputs always rank equally.
//!
//! Decay horizons: the access weight halves roughly every three days and
//! reaches zero after 90 days; the modification weight halves roughly every
//! two days and reaches zero after 30 days.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use ahash::AHashMap;
use parking_lot::RwLock;
use tracing::warn;

use crate::error::Result;
use crate::health::DbHealth;
use crate::store::KvStore;

const HOUR: u64 = 3600;
const DAY: u64 = 24 * HOUR;

/// One persisted record: 20 bytes, fixed-width little-endian
/// `(access_count: u32, last_access: u64, modification: u64)`.
/// The encoding is part of the on-disk format and must stay stable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrecencyRecord {
    pub access_count: u32,
    pub last_access_unix: u64,
    pub modification_unix: u64,
}

impl FrecencyRecord {
    const ENCODED_LEN: usize = 20;

    fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut buf = [0u8; Self::ENCODED_LEN];
        buf[0..4].copy_from_slice(&self.access_count.to_le_bytes());
        buf[4..12].copy_from_slice(&self.last_access_unix.to_le_bytes());
        buf[12..20].copy_from_slice(&self.modification_unix.to_le_bytes());
        buf
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::ENCODED_LEN {
            return None;
        }
        Some(Self {
            access_count: u32::from_le_bytes(bytes[0..4].try_into().ok()?),
            last_access_unix: u64::from_le_bytes(bytes[4..12].try_into().ok()?),
            modification_unix: u64::from_le_bytes(bytes[12..20].try_into().ok()?),
        })
    }
}

pub struct FrecencyTracker {
    /// `None` when the store failed to open - the tracker keeps working
    /// in memory only.
    store: Option<KvStore>,
    records: RwLock<AHashMap<PathBuf, FrecencyRecord>>,
}

impl std::fmt::Debug for FrecencyTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrecencyTracker")
            .field("persistent", &self.store.is_some())
            .field("records", &self.records.read().len())
            .finish()
    }
}

impl FrecencyTracker {
    pub fn new(db_path: &Path, unsafe_no_lock: bool) -> Result<Self> {
        let store = KvStore::open(db_path, unsafe_no_lock)?;

        let mut records = AHashMap::new();
        for (key, value) in store.scan(b"")? {
            let Some(record) = FrecencyRecord::decode(&value) else {
                continue;
            };
            let path = PathBuf::from(String::from_utf8_lossy(&key).into_owned());
            records.insert(path, record);
        }

        Ok(Self {
            store: Some(store),
            records: RwLock::new(records),
        })
    }

    /// A tracker without persistence, used when the store is unavailable.
    pub fn ephemeral() -> Self {
        Self {
            store: None,
            records: RwLock::new(AHashMap::new()),
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.store.is_some()
    }

    /// Record one access. The in-memory record updates unconditionally;
    /// a failed persist is logged and otherwise ignored.
    pub fn track_access(&self, path: &Path) {
        let record = self.bump_access(path);
        self.persist_record(path, record);
    }

    /// The in-memory half of [`track_access`](Self::track_access); callers
    /// that must not block on the store persist the returned record later
    /// via [`persist_record`](Self::persist_record).
    pub fn bump_access(&self, path: &Path) -> FrecencyRecord {
        let now = unix_now();
        let mut records = self.records.write();
        let record = records.entry(path.to_path_buf()).or_default();
        record.access_count = record.access_count.saturating_add(1);
        record.last_access_unix = now;
        *record
    }

    pub fn persist_record(&self, path: &Path, record: FrecencyRecord) {
        self.persist(path, record);
    }

    /// Record a modification timestamp observed by the watcher or scanner.
    pub fn track_modification(&self, path: &Path, modified_unix: u64) {
        let record = {
            let mut records = self.records.write();
            let record = records.entry(path.to_path_buf()).or_default();
            if modified_unix <= record.modification_unix {
                return;
            }
            record.modification_unix = modified_unix;
            *record
        };

        self.persist(path, record);
    }

    fn persist(&self, path: &Path, record: FrecencyRecord) {
        let Some(store) = &self.store else { return };
        let key = path.to_string_lossy();
        if let Err(e) = store.put(key.as_bytes(), &record.encode()) {
            warn!(?path, error = %e, "Failed to persist frecency record");
        }
    }

    pub fn record_for(&self, path: &Path) -> Option<FrecencyRecord> {
        self.records.read().get(path).copied()
    }

    /// Pure score derivation: `(access_score, modification_score)`.
    /// `modification_unix` comes from the file's metadata; the persisted
    /// modification timestamp is used when it is fresher.
    pub fn score_for(&self, path: &Path, modification_unix: u64) -> (i64, i64) {
        let now = unix_now();
        let record = self.record_for(path).unwrap_or_default();
        let modification = modification_unix.max(record.modification_unix);
        (
            access_score(record.access_count, record.last_access_unix, now),
            modification_score(modification, now),
        )
    }

    pub fn health(&self) -> Option<Result<DbHealth>> {
        self.store
            .as_ref()
            .map(|store| DbHealth::of(store, "frecency_records"))
    }
}

#[inline]
fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

/// Sublinear growth in the access count, bucketed exponential decay in the
/// elapsed time. Untouched for 90 days rounds to zero.
pub fn access_score(access_count: u32, last_access_unix: u64, now: u64) -> i64 {
    if access_count == 0 {
        return 0;
    }

    let elapsed = now.saturating_sub(last_access_unix);
    let recency_weight: i64 = match elapsed {
        e if e < HOUR => 100,
        e if e < 4 * HOUR => 80,
        e if e < DAY => 60,
        e if e < 3 * DAY => 40,
        e if e < 7 * DAY => 25,
        e if e < 14 * DAY => 12,
        e if e < 30 * DAY => 6,
        e if e < 90 * DAY => 2,
        _ => 0,
    };

    let count_factor = i64::from(access_count.isqrt().clamp(1, 10));
    recency_weight * count_factor
}

/// Bucketed exponential decay from the modification timestamp. Untouched
/// for 30 days rounds to zero.
pub fn modification_score(modification_unix: u64, now: u64) -> i64 {
    if modification_unix == 0 {
        return 0;
    }

    let elapsed = now.saturating_sub(modification_unix);
    match elapsed {
        e if e < 2 * HOUR => 50,
        e if e < DAY => 30,
        e if e < 2 * DAY => 25,
        e if e < 4 * DAY => 12,
        e if e < 7 * DAY => 8,
        e if e < 14 * DAY => 4,
        e if e < 30 * DAY => 1,
        _ => 0,
    }
}
