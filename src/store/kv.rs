//-
// Copyright (c) 2024, Jason Lingle
//
// This file is part of Mailsump.
//
// Mailsump is free software: you can  redistribute it and/or modify it under
// the terms of  the GNU General Public  License as published  by the Free
// Software Foundation, either version  3 of the License, or (at your option)
// any later version.
//
// Mailsump is distributed  in the hope that  it will be useful,  but WITHOUT
// ANY WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or
// FITNESS FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License
// for more details.
//
// You should have received a copy of the GNU General Public License along
// with Mailsump. If not, see <http://www.gnu.org/licenses/>.

//! The ordered key-value capability the message store is built on.
//!
//! Two backends exist: an in-process ordered map for the default
//! ephemeral mode, and a redb database for the on-disk mode. The
//! message store holds whichever one the configuration selected behind
//! `dyn KvBackend` and never knows the difference.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::Path;
use std::sync::RwLock;

use redb::{Database, Durability, ReadableTable, TableDefinition};

use crate::support::error::Error;

/// Operations the message store requires of a backend.
///
/// All operations are safe under concurrent callers. `put` and `delete`
/// apply their whole batch atomically: a reader observes either none or
/// all of a batch, and a failed batch leaves nothing behind.
///
/// For scans, `limit` 0 means unlimited.
pub trait KvBackend: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error>;

    fn put(&self, batch: &[(Vec<u8>, Vec<u8>)]) -> Result<(), Error>;

    fn delete(&self, batch: &[Vec<u8>]) -> Result<(), Error>;

    /// Write `key = value` only if `guard` currently exists, in one
    /// atomic step. Returns whether the write was applied.
    fn put_guarded(
        &self,
        guard: &[u8],
        key: &[u8],
        value: &[u8],
    ) -> Result<bool, Error>;

    /// Keys and values under `prefix` in lexicographic (or reverse)
    /// order, skipping `offset` entries.
    fn scan(
        &self,
        prefix: &[u8],
        reverse: bool,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error>;

    /// Like `scan` but fetches keys only.
    fn scan_keys(
        &self,
        prefix: &[u8],
        reverse: bool,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Vec<u8>>, Error>;

    fn count(&self, prefix: &[u8]) -> Result<usize, Error>;

    fn close(&self) -> Result<(), Error>;
}

/// The first key strictly above every key starting with `prefix`, or
/// `None` if no such key exists.
fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(&last) = end.last() {
        if last < 0xff {
            *end.last_mut().unwrap() = last + 1;
            return Some(end);
        }
        end.pop();
    }
    None
}

fn effective_limit(limit: usize) -> usize {
    if limit == 0 {
        usize::MAX
    } else {
        limit
    }
}

/// Backend holding everything in an ordered map in process memory.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend::default()
    }

    fn ranged<R>(
        &self,
        prefix: &[u8],
        reverse: bool,
        limit: usize,
        offset: usize,
        map_entry: impl Fn((&Vec<u8>, &Vec<u8>)) -> R,
    ) -> Vec<R> {
        let map = self.map.read().unwrap();
        let upper = prefix_end(prefix);
        let bounds = (
            Bound::Included(prefix),
            match upper.as_deref() {
                Some(end) => Bound::Excluded(end),
                None => Bound::Unbounded,
            },
        );
        let range = map.range::<[u8], _>(bounds);

        let take = effective_limit(limit);
        if reverse {
            range.rev().skip(offset).take(take).map(map_entry).collect()
        } else {
            range.skip(offset).take(take).map(map_entry).collect()
        }
    }
}

impl KvBackend for MemoryBackend {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.map.read().unwrap().get(key).cloned())
    }

    fn put(&self, batch: &[(Vec<u8>, Vec<u8>)]) -> Result<(), Error> {
        let mut map = self.map.write().unwrap();
        for (k, v) in batch {
            map.insert(k.clone(), v.clone());
        }
        Ok(())
    }

    fn delete(&self, batch: &[Vec<u8>]) -> Result<(), Error> {
        let mut map = self.map.write().unwrap();
        for k in batch {
            map.remove(k);
        }
        Ok(())
    }

    fn put_guarded(
        &self,
        guard: &[u8],
        key: &[u8],
        value: &[u8],
    ) -> Result<bool, Error> {
        let mut map = self.map.write().unwrap();
        if !map.contains_key(guard) {
            return Ok(false);
        }
        map.insert(key.to_vec(), value.to_vec());
        Ok(true)
    }

    fn scan(
        &self,
        prefix: &[u8],
        reverse: bool,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error> {
        Ok(self.ranged(prefix, reverse, limit, offset, |(k, v)| {
            (k.clone(), v.clone())
        }))
    }

    fn scan_keys(
        &self,
        prefix: &[u8],
        reverse: bool,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Vec<u8>>, Error> {
        Ok(self.ranged(prefix, reverse, limit, offset, |(k, _)| k.clone()))
    }

    fn count(&self, prefix: &[u8]) -> Result<usize, Error> {
        Ok(self.ranged(prefix, false, 0, 0, |_| ()).len())
    }

    fn close(&self) -> Result<(), Error> {
        Ok(())
    }
}

const TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("mail");

fn backend_err(e: impl Into<redb::Error>) -> Error {
    Error::Backend(e.into())
}

/// Backend persisting to a single redb database file.
///
/// Batches are write transactions with eventual durability: commits are
/// atomic, but the fsync is deferred. For a sink whose contents are
/// transient by design, losing the last moments before a crash is a
/// fair trade for not paying an fsync per delivered message.
pub struct RedbBackend {
    db: Database,
}

impl RedbBackend {
    pub fn open(path: &Path) -> Result<Self, Error> {
        let db = Database::create(path).map_err(backend_err)?;

        // Materialise the table immediately so that read transactions
        // can open it before the first write
        let txn = db.begin_write().map_err(backend_err)?;
        {
            txn.open_table(TABLE).map_err(backend_err)?;
        }
        txn.commit().map_err(backend_err)?;

        Ok(RedbBackend { db })
    }

    fn write_txn(&self) -> Result<redb::WriteTransaction, Error> {
        let mut txn = self.db.begin_write().map_err(backend_err)?;
        txn.set_durability(Durability::Eventual);
        Ok(txn)
    }
}

impl KvBackend for RedbBackend {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        let txn = self.db.begin_read().map_err(backend_err)?;
        let table = txn.open_table(TABLE).map_err(backend_err)?;
        let value = table.get(key).map_err(backend_err)?;
        Ok(value.map(|guard| guard.value().to_vec()))
    }

    fn put(&self, batch: &[(Vec<u8>, Vec<u8>)]) -> Result<(), Error> {
        let txn = self.write_txn()?;
        {
            let mut table = txn.open_table(TABLE).map_err(backend_err)?;
            for (k, v) in batch {
                table
                    .insert(k.as_slice(), v.as_slice())
                    .map_err(backend_err)?;
            }
        }
        txn.commit().map_err(backend_err)
    }

    fn delete(&self, batch: &[Vec<u8>]) -> Result<(), Error> {
        let txn = self.write_txn()?;
        {
            let mut table = txn.open_table(TABLE).map_err(backend_err)?;
            for k in batch {
                table.remove(k.as_slice()).map_err(backend_err)?;
            }
        }
        txn.commit().map_err(backend_err)
    }

    fn put_guarded(
        &self,
        guard: &[u8],
        key: &[u8],
        value: &[u8],
    ) -> Result<bool, Error> {
        let txn = self.write_txn()?;
        let applied = {
            let mut table = txn.open_table(TABLE).map_err(backend_err)?;
            if table.get(guard).map_err(backend_err)?.is_some() {
                table.insert(key, value).map_err(backend_err)?;
                true
            } else {
                false
            }
        };

        if applied {
            txn.commit().map_err(backend_err)?;
        } else {
            txn.abort().map_err(backend_err)?;
        }
        Ok(applied)
    }

    fn scan(
        &self,
        prefix: &[u8],
        reverse: bool,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error> {
        self.ranged(prefix, reverse, limit, offset, |k, v| {
            (k.to_vec(), v.to_vec())
        })
    }

    fn scan_keys(
        &self,
        prefix: &[u8],
        reverse: bool,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Vec<u8>>, Error> {
        self.ranged(prefix, reverse, limit, offset, |k, _| k.to_vec())
    }

    fn count(&self, prefix: &[u8]) -> Result<usize, Error> {
        Ok(self.ranged(prefix, false, 0, 0, |_, _| ())?.len())
    }

    fn close(&self) -> Result<(), Error> {
        // Dropping the Database flushes and closes the file; there is
        // nothing to do eagerly
        Ok(())
    }
}

impl RedbBackend {
    fn ranged<R>(
        &self,
        prefix: &[u8],
        reverse: bool,
        limit: usize,
        offset: usize,
        map_entry: impl Fn(&[u8], &[u8]) -> R,
    ) -> Result<Vec<R>, Error> {
        let txn = self.db.begin_read().map_err(backend_err)?;
        let table = txn.open_table(TABLE).map_err(backend_err)?;

        let upper = prefix_end(prefix);
        let bounds = (
            Bound::Included(prefix),
            match upper.as_deref() {
                Some(end) => Bound::Excluded(end),
                None => Bound::Unbounded,
            },
        );
        let range = table.range::<&[u8]>(bounds).map_err(backend_err)?;

        let mut out = Vec::new();
        let take = effective_limit(limit);
        if reverse {
            for item in range.rev().skip(offset).take(take) {
                let (key, value) = item.map_err(backend_err)?;
                out.push(map_entry(key.value(), value.value()));
            }
        } else {
            for item in range.skip(offset).take(take) {
                let (key, value) = item.map_err(backend_err)?;
                out.push(map_entry(key.value(), value.value()));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod test {
    use tempfile::TempDir;

    use super::*;

    fn with_backends(test: impl Fn(&dyn KvBackend)) {
        test(&MemoryBackend::new());

        let dir = TempDir::new().unwrap();
        let backend = RedbBackend::open(&dir.path().join("kv.redb")).unwrap();
        test(&backend);
    }

    fn k(s: &str) -> Vec<u8> {
        s.as_bytes().to_vec()
    }

    fn seed(kv: &dyn KvBackend) {
        kv.put(&[
            (k("a/1"), k("v1")),
            (k("a/2"), k("v2")),
            (k("a/3"), k("v3")),
            (k("b/1"), k("w1")),
        ])
        .unwrap();
    }

    #[test]
    fn put_get_delete() {
        with_backends(|kv| {
            seed(kv);
            assert_eq!(Some(k("v2")), kv.get(b"a/2").unwrap());
            assert_eq!(None, kv.get(b"a/9").unwrap());

            kv.delete(&[k("a/2"), k("a/9")]).unwrap();
            assert_eq!(None, kv.get(b"a/2").unwrap());
            assert_eq!(Some(k("v1")), kv.get(b"a/1").unwrap());
        });
    }

    #[test]
    fn overwrite_keeps_latest() {
        with_backends(|kv| {
            kv.put(&[(k("x"), k("old"))]).unwrap();
            kv.put(&[(k("x"), k("new"))]).unwrap();
            assert_eq!(Some(k("new")), kv.get(b"x").unwrap());
        });
    }

    #[test]
    fn scan_respects_prefix_order_and_paging() {
        with_backends(|kv| {
            seed(kv);

            let all = kv.scan(b"a/", false, 0, 0).unwrap();
            assert_eq!(
                vec![(k("a/1"), k("v1")), (k("a/2"), k("v2")), (k("a/3"), k("v3"))],
                all
            );

            let rev = kv.scan_keys(b"a/", true, 0, 0).unwrap();
            assert_eq!(vec![k("a/3"), k("a/2"), k("a/1")], rev);

            let page = kv.scan_keys(b"a/", true, 1, 1).unwrap();
            assert_eq!(vec![k("a/2")], page);

            assert!(kv.scan(b"c/", false, 0, 0).unwrap().is_empty());
            assert_eq!(3, kv.count(b"a/").unwrap());
            assert_eq!(4, kv.count(b"").unwrap());
        });
    }

    #[test]
    fn scan_does_not_leak_past_prefix() {
        with_backends(|kv| {
            // "a/" scans must not see "a0..." even though it sorts right
            // after every "a/..." key
            kv.put(&[(k("a/1"), k("v")), (k("a0"), k("x"))]).unwrap();
            assert_eq!(vec![k("a/1")], kv.scan_keys(b"a/", false, 0, 0).unwrap());
        });
    }

    #[test]
    fn guarded_put_requires_guard() {
        with_backends(|kv| {
            seed(kv);
            assert!(kv.put_guarded(b"a/1", b"a/1.flag", b"1").unwrap());
            assert_eq!(Some(k("1")), kv.get(b"a/1.flag").unwrap());

            assert!(!kv.put_guarded(b"gone", b"orphan", b"1").unwrap());
            assert_eq!(None, kv.get(b"orphan").unwrap());
        });
    }

    #[test]
    fn batches_are_atomic_over_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kv.redb");

        {
            let kv = RedbBackend::open(&path).unwrap();
            seed(&kv);
            kv.close().unwrap();
        }

        let kv = RedbBackend::open(&path).unwrap();
        assert_eq!(4, kv.count(b"").unwrap());
        assert_eq!(Some(k("v3")), kv.get(b"a/3").unwrap());
    }

    #[test]
    fn test_prefix_end() {
        assert_eq!(Some(k("a0")), prefix_end(b"a/"));
        assert_eq!(Some(k("b")), prefix_end(b"a\xff"));
        assert_eq!(None, prefix_end(b""));
        assert_eq!(None, prefix_end(b"\xff\xff"));
    }
}
