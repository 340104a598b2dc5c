//! Crash-safe embedded key-value store on LMDB (via `heed`).
//!
//! One environment per database path, a single untyped byte-keyed database
//! inside it. Writes are atomic per key; range scans run over the sorted
//! primary key. The `unsafe_no_lock` mode trades fsync discipline for
//! throughput where losing the latest writes is acceptable.

use std::fs;
use std::path::Path;

use heed::types::Bytes;
use heed::{Database, Env, EnvFlags, EnvOpenOptions};

use crate::error::{Error, Result};

#[derive(Debug)]
pub struct KvStore {
    env: Env,
    db: Database<Bytes, Bytes>,
}

impl KvStore {
    /// Open (creating if absent) the database at `path`.
    ///
    /// Fails with `StoreUnavailable` when the directory cannot be created or
    /// the environment cannot be opened - callers are expected to keep
    /// operating without persistence in that case.
    pub fn open(path: &Path, unsafe_no_lock: bool) -> Result<Self> {
        fs::create_dir_all(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                Error::PermissionDenied(format!("cannot create {}", path.display()))
            } else {
                Error::Internal(format!("cannot create {}: {e}", path.display()))
            }
        })?;

        let env = unsafe {
            let mut opts = EnvOpenOptions::new();
            opts.max_dbs(4);
            if unsafe_no_lock {
                opts.flags(EnvFlags::NO_LOCK | EnvFlags::NO_SYNC | EnvFlags::NO_META_SYNC);
            }
            opts.open(path).map_err(Error::StoreUnavailable)?
        };

        // A crashed reader can pin stale pages forever; clear them up front.
        env.clear_stale_readers().map_err(Error::StoreUnavailable)?;

        let mut wtxn = env.write_txn().map_err(Error::StoreUnavailable)?;
        let db = env
            .create_database(&mut wtxn, Some("kv"))
            .map_err(Error::StoreUnavailable)?;
        wtxn.commit().map_err(Error::StoreUnavailable)?;

        Ok(Self { env, db })
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let rtxn = self.env.read_txn().map_err(store_err)?;
        let value = self.db.get(&rtxn, key).map_err(store_err)?;
        Ok(value.map(<[u8]>::to_vec))
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut wtxn = self.env.write_txn().map_err(store_err)?;
        self.db.put(&mut wtxn, key, value).map_err(store_err)?;
        wtxn.commit().map_err(store_err)
    }

    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        let mut wtxn = self.env.write_txn().map_err(store_err)?;
        let existed = self.db.delete(&mut wtxn, key).map_err(store_err)?;
        wtxn.commit().map_err(store_err)?;
        Ok(existed)
    }

    /// All entries whose key starts with `prefix`, in key order.
    /// An empty prefix walks the whole database.
    pub fn scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let rtxn = self.env.read_txn().map_err(store_err)?;

        let mut entries = Vec::new();
        if prefix.is_empty() {
            for item in self.db.iter(&rtxn).map_err(store_err)? {
                let (key, value) = item.map_err(store_err)?;
                entries.push((key.to_vec(), value.to_vec()));
            }
        } else {
            for item in self.db.prefix_iter(&rtxn, prefix).map_err(store_err)? {
                let (key, value) = item.map_err(store_err)?;
                entries.push((key.to_vec(), value.to_vec()));
            }
        }
        Ok(entries)
    }

    pub fn entry_count(&self) -> Result<u64> {
        let rtxn = self.env.read_txn().map_err(store_err)?;
        self.db.len(&rtxn).map_err(store_err)
    }

    pub fn size_on_disk(&self) -> Result<u64> {
        self.env.real_disk_size().map_err(store_err)
    }

    pub fn path(&self) -> &Path {
        self.env.path()
    }

    /// Dropping the store closes the environment; `close` just makes the
    /// intent explicit at call sites.
    pub fn close(self) {}
}

#[inline]
fn store_err(e: heed::Error) -> Error {
    Error::StoreUnavailable(e)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store() -> (tempfile::TempDir, KvStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = KvStore::open(dir.path(), true).unwrap();
        (dir, store)
    }

    #[test]
    fn roundtrip_and_delete() {
        let (_dir, store) = open_store();

        assert_eq!(store.get(b"missing").unwrap(), None);
        store.put(b"k", b"v").unwrap();
        assert_eq!(store.get(b"k").unwrap().as_deref(), Some(&b"v"[..]));

        assert!(store.delete(b"k").unwrap());
        assert!(!store.delete(b"k").unwrap());
        assert_eq!(store.get(b"k").unwrap(), None);
    }

    #[test]
    fn prefix_scan_is_ordered_and_bounded() {
        let (_dir, store) = open_store();

        store.put(b"c|a", b"1").unwrap();
        store.put(b"c|b", b"2").unwrap();
        store.put(b"d|a", b"3").unwrap();
        store.put(b"b|z", b"4").unwrap();

        let entries = store.scan(b"c|").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, b"c|a");
        assert_eq!(entries[1].0, b"c|b");
    }

    #[test]
    fn values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = KvStore::open(dir.path(), false).unwrap();
            store.put(b"persisted", b"yes").unwrap();
        }
        let store = KvStore::open(dir.path(), false).unwrap();
        assert_eq!(
            store.get(b"persisted").unwrap().as_deref(),
            Some(&b"yes"[..])
        );
    }

    #[test]
    fn scan_with_empty_prefix_returns_everything() {
        let (_dir, store) = open_store();
        store.put(b"a", b"1").unwrap();
        store.put(b"b", b"2").unwrap();
        assert_eq!(store.scan(b"").unwrap().len(), 2);
        assert_eq!(store.entry_count().unwrap(), 2);
    }
}
