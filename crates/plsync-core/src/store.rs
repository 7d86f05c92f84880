//! Persistent pending-commit state using redb.
//!
//! # Table design
//!
//! `PENDING` holds at most one entry per router, keyed by the router's
//! management address, with a JSON-encoded [`PendingCommit`] as the value.
//!
//! `AUDIT` is append-only and uses a composite key:
//! ```text
//! [ router bytes | 0x00 | timestamp_ms: u64 BE | seq: u64 BE | uuid: 16 bytes ]
//! ```
//! All records for one router are contiguous and in time order, so
//! `audit_for` is a single prefix range scan. `seq` comes from a counter in
//! `META` and keeps records written within the same millisecond in order.

use std::path::Path;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use uuid::Uuid;

use crate::commit::{AuditRecord, PendingCommit};
use crate::error::{PlsyncError, Result};
use crate::types::CommitState;

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

/// Key: router id. Value: JSON-encoded PendingCommit.
const PENDING: TableDefinition<&str, &[u8]> = TableDefinition::new("pending");

/// Key: router | 0x00 | ts_ms BE | seq BE | uuid. Value: JSON-encoded AuditRecord.
const AUDIT: TableDefinition<&[u8], &[u8]> = TableDefinition::new("audit");

const META: TableDefinition<&str, u64> = TableDefinition::new("meta");
const AUDIT_SEQ: &str = "audit_seq";

fn store_err(e: impl std::fmt::Display) -> PlsyncError {
    PlsyncError::Store(e.to_string())
}

// ---------------------------------------------------------------------------
// Key helpers
// ---------------------------------------------------------------------------

fn audit_key(router: &str, at: DateTime<Utc>, seq: u64, id: Uuid) -> Vec<u8> {
    let mut key = Vec::with_capacity(router.len() + 1 + 8 + 8 + 16);
    key.extend_from_slice(router.as_bytes());
    key.push(0x00);
    key.extend_from_slice(&(at.timestamp_millis().max(0) as u64).to_be_bytes());
    key.extend_from_slice(&seq.to_be_bytes());
    key.extend_from_slice(id.as_bytes());
    key
}

/// `[start, end)` covering every audit key of `router`.
fn audit_prefix_bounds(router: &str) -> (Vec<u8>, Vec<u8>) {
    let mut start = router.as_bytes().to_vec();
    let mut end = start.clone();
    start.push(0x00);
    end.push(0x01);
    (start, end)
}

// ---------------------------------------------------------------------------
// Reservation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reservation {
    Granted,
    /// A `pending` entry already holds the router.
    Held(PendingCommit),
}

// ---------------------------------------------------------------------------
// PendingCommitStore
// ---------------------------------------------------------------------------

pub struct PendingCommitStore {
    db: Database,
}

impl PendingCommitStore {
    /// Open or create the database at `path`, creating its tables.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            crate::io::ensure_dir(parent)?;
        }
        let db = Database::create(path).map_err(store_err)?;
        let wt = db.begin_write().map_err(store_err)?;
        wt.open_table(PENDING).map_err(store_err)?;
        wt.open_table(AUDIT).map_err(store_err)?;
        wt.open_table(META).map_err(store_err)?;
        wt.commit().map_err(store_err)?;
        Ok(Self { db })
    }

    pub fn get(&self, router: &str) -> Result<Option<PendingCommit>> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(PENDING).map_err(store_err)?;
        match table.get(router).map_err(store_err)? {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }

    /// Insert or replace the entry for `entry.router`.
    pub fn put(&self, entry: &PendingCommit) -> Result<()> {
        let value = serde_json::to_vec(entry)?;
        let wt = self.db.begin_write().map_err(store_err)?;
        {
            let mut table = wt.open_table(PENDING).map_err(store_err)?;
            table
                .insert(entry.router.as_str(), value.as_slice())
                .map_err(store_err)?;
        }
        wt.commit().map_err(store_err)?;
        Ok(())
    }

    /// Remove the entry for `router`, returning it if there was one.
    pub fn delete(&self, router: &str) -> Result<Option<PendingCommit>> {
        let wt = self.db.begin_write().map_err(store_err)?;
        let removed = {
            let mut table = wt.open_table(PENDING).map_err(store_err)?;
            let old = table.remove(router).map_err(store_err)?;
            match old {
                Some(v) => Some(serde_json::from_slice::<PendingCommit>(v.value())?),
                None => None,
            }
        };
        wt.commit().map_err(store_err)?;
        Ok(removed)
    }

    /// All entries, ordered by router id.
    pub fn list(&self) -> Result<Vec<PendingCommit>> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(PENDING).map_err(store_err)?;
        let mut entries = Vec::new();
        for item in table.iter().map_err(store_err)? {
            let (_, v) = item.map_err(store_err)?;
            entries.push(serde_json::from_slice(v.value())?);
        }
        Ok(entries)
    }

    /// Write `entry` unless the router is held by a `pending` entry.
    ///
    /// The check and the write happen in one write transaction; redb allows
    /// a single writer at a time, so two reservations cannot both succeed.
    pub fn reserve(&self, entry: &PendingCommit) -> Result<Reservation> {
        let value = serde_json::to_vec(entry)?;
        let wt = self.db.begin_write().map_err(store_err)?;
        {
            let mut table = wt.open_table(PENDING).map_err(store_err)?;
            let existing = match table.get(entry.router.as_str()).map_err(store_err)? {
                Some(v) => Some(serde_json::from_slice::<PendingCommit>(v.value())?),
                None => None,
            };
            if let Some(existing) = existing {
                if existing.state == CommitState::Pending {
                    // Dropping the transaction aborts it.
                    return Ok(Reservation::Held(existing));
                }
            }
            table
                .insert(entry.router.as_str(), value.as_slice())
                .map_err(store_err)?;
        }
        wt.commit().map_err(store_err)?;
        Ok(Reservation::Granted)
    }

    pub fn append_audit(&self, record: &AuditRecord) -> Result<()> {
        let value = serde_json::to_vec(record)?;
        let wt = self.db.begin_write().map_err(store_err)?;
        {
            let mut meta = wt.open_table(META).map_err(store_err)?;
            let seq = match meta.get(AUDIT_SEQ).map_err(store_err)? {
                Some(v) => v.value() + 1,
                None => 0,
            };
            meta.insert(AUDIT_SEQ, seq).map_err(store_err)?;

            let key = audit_key(&record.router, record.at, seq, record.id);
            let mut table = wt.open_table(AUDIT).map_err(store_err)?;
            table
                .insert(key.as_slice(), value.as_slice())
                .map_err(store_err)?;
        }
        wt.commit().map_err(store_err)?;
        Ok(())
    }

    /// Audit trail of one router, oldest first.
    pub fn audit_for(&self, router: &str) -> Result<Vec<AuditRecord>> {
        let (start, end) = audit_prefix_bounds(router);
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(AUDIT).map_err(store_err)?;
        let mut records = Vec::new();
        for item in table
            .range(start.as_slice()..end.as_slice())
            .map_err(store_err)?
        {
            let (_, v) = item.map_err(store_err)?;
            records.push(serde_json::from_slice(v.value())?);
        }
        Ok(records)
    }

    /// Every audit record, oldest first.
    pub fn audit_all(&self) -> Result<Vec<AuditRecord>> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(AUDIT).map_err(store_err)?;
        let mut records: Vec<AuditRecord> = Vec::new();
        for item in table.iter().map_err(store_err)? {
            let (_, v) = item.map_err(store_err)?;
            records.push(serde_json::from_slice(v.value())?);
        }
        records.sort_by_key(|r| r.at);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::AuditEvent;
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> PendingCommitStore {
        PendingCommitStore::open(&dir.path().join("state").join("commits.redb")).unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn entry(router: &str, state: CommitState) -> PendingCommit {
        PendingCommit::new(router, "edge", "d1g3st", t0(), 3, state)
    }

    #[test]
    fn put_get_delete() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        assert!(store.get("10.0.0.1").unwrap().is_none());

        let e = entry("10.0.0.1", CommitState::Pending);
        store.put(&e).unwrap();
        assert_eq!(store.get("10.0.0.1").unwrap(), Some(e.clone()));

        assert_eq!(store.delete("10.0.0.1").unwrap(), Some(e));
        assert!(store.get("10.0.0.1").unwrap().is_none());
        assert!(store.delete("10.0.0.1").unwrap().is_none());
    }

    #[test]
    fn put_replaces_existing_entry() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        store.put(&entry("10.0.0.1", CommitState::Pending)).unwrap();
        store.put(&entry("10.0.0.1", CommitState::Unknown)).unwrap();
        let list = store.list().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].state, CommitState::Unknown);
    }

    #[test]
    fn entries_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = open(&dir);
            store.put(&entry("10.0.0.2", CommitState::Pending)).unwrap();
        }
        let store = open(&dir);
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn reserve_refuses_pending_but_overwrites_unknown() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);

        let first = entry("10.0.0.1", CommitState::Pending);
        assert_eq!(store.reserve(&first).unwrap(), Reservation::Granted);

        let second = PendingCommit::new("10.0.0.1", "edge", "other", t0(), 5, CommitState::Pending);
        assert_eq!(
            store.reserve(&second).unwrap(),
            Reservation::Held(first.clone())
        );
        assert_eq!(store.get("10.0.0.1").unwrap(), Some(first));

        store.put(&entry("10.0.0.1", CommitState::Unknown)).unwrap();
        assert_eq!(store.reserve(&second).unwrap(), Reservation::Granted);
        assert_eq!(store.get("10.0.0.1").unwrap().unwrap().digest, "other");
    }

    #[test]
    fn concurrent_reservations_yield_one_winner() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        let barrier = std::sync::Barrier::new(8);
        let granted = std::sync::atomic::AtomicUsize::new(0);
        std::thread::scope(|s| {
            for i in 0..8 {
                let (store, barrier, granted) = (&store, &barrier, &granted);
                s.spawn(move || {
                    let e = PendingCommit::new(
                        "10.0.0.9",
                        "edge",
                        format!("digest-{i}"),
                        t0(),
                        3,
                        CommitState::Pending,
                    );
                    barrier.wait();
                    if store.reserve(&e).unwrap() == Reservation::Granted {
                        granted.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    }
                });
            }
        });
        assert_eq!(granted.into_inner(), 1);
    }

    #[test]
    fn audit_scan_is_per_router_and_time_ordered() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        let a = entry("10.0.0.1", CommitState::Pending);
        // "10.0.0.10" shares the "10.0.0.1" prefix; the separator keeps them apart.
        let b = entry("10.0.0.10", CommitState::Pending);

        store
            .append_audit(&AuditRecord::new(
                &a,
                AuditEvent::Confirmed,
                CommitState::Confirmed,
                t0() + Duration::minutes(2),
                None,
            ))
            .unwrap();
        store
            .append_audit(&AuditRecord::new(
                &a,
                AuditEvent::Applied,
                CommitState::Pending,
                t0(),
                None,
            ))
            .unwrap();
        store
            .append_audit(&AuditRecord::new(
                &b,
                AuditEvent::Applied,
                CommitState::Pending,
                t0() + Duration::minutes(1),
                None,
            ))
            .unwrap();

        let events: Vec<AuditEvent> = store
            .audit_for("10.0.0.1")
            .unwrap()
            .into_iter()
            .map(|r| r.event)
            .collect();
        assert_eq!(events, vec![AuditEvent::Applied, AuditEvent::Confirmed]);
        assert_eq!(store.audit_for("10.0.0.10").unwrap().len(), 1);

        let all = store.audit_all().unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].at <= w[1].at));
    }
}
