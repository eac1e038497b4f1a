//! In-process master store.
//!
//! Implements the exact upsert and repair contract of the networked master
//! against plain JSON rows behind a mutex. Integration tests drive whole
//! multi-device scenarios through it, and it doubles as an offline
//! simulation target. Keeping it in lockstep with
//! [`super::master::HttpMasterStore`] is what makes the engine's conflict
//! policy testable without a server.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{NaiveDateTime, Utc};
use serde_json::{Value, json};

use crate::error::SyncError;
use crate::identity;
use crate::models::{SyncMeta, SyncModel};
use crate::store::{MasterStore, ParentKey, TableKind, UpsertOutcome};

#[derive(Default)]
struct MemTable {
    next_id: i32,
    rows: Vec<Value>,
}

#[derive(Default)]
pub struct MemoryMasterStore {
    tables: Mutex<HashMap<TableKind, MemTable>>,
}

fn id_of(row: &Value) -> i32 {
    row.get("id").and_then(Value::as_i64).unwrap_or(0) as i32
}

fn uuid_of(row: &Value) -> Option<&str> {
    row.get("uuid").and_then(Value::as_str)
}

fn is_tombstoned(row: &Value) -> bool {
    row.get("deleted").and_then(Value::as_bool).unwrap_or(false)
}

fn ts_of(row: &Value) -> NaiveDateTime {
    row.get("updated_at")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}

fn touch(row: &mut Value) {
    row["updated_at"] = json!(Utc::now().naive_utc());
}

impl MemoryMasterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a raw row bypassing upsert validation. For seeding legacy
    /// states (blank names, null uuids) that the regular write path would
    /// reject.
    pub fn inject_raw(&self, table: TableKind, mut row: Value) {
        let mut tables = self.tables.lock().unwrap();
        let t = tables.entry(table).or_default();
        let mut rid = id_of(&row);
        if rid <= 0 || t.rows.iter().any(|r| id_of(r) == rid) {
            rid = t.next_id.max(1);
            row["id"] = json!(rid);
        }
        t.next_id = t.next_id.max(rid + 1);
        t.rows.push(row);
    }

    fn with_table<R>(&self, table: TableKind, f: impl FnOnce(&mut MemTable) -> R) -> R {
        let mut tables = self.tables.lock().unwrap();
        f(tables.entry(table).or_default())
    }
}

impl MasterStore for MemoryMasterStore {
    fn ping(&self) -> Result<(), SyncError> {
        Ok(())
    }

    fn fetch_since<M: SyncModel>(
        &self,
        since: Option<NaiveDateTime>,
    ) -> Result<Vec<M>, SyncError> {
        self.with_table(M::TABLE, |t| {
            let mut rows: Vec<Value> = t
                .rows
                .iter()
                .filter(|r| match since {
                    Some(at) => ts_of(r) > at,
                    None => true,
                })
                .cloned()
                .collect();
            rows.sort_by(|a, b| ts_of(a).cmp(&ts_of(b)));
            rows.into_iter()
                .map(|r| serde_json::from_value(r).map_err(SyncError::from))
                .collect()
        })
    }

    fn fetch_snapshot<M: SyncModel>(&self) -> Result<Vec<M>, SyncError> {
        self.with_table(M::TABLE, |t| {
            let mut rows = t.rows.clone();
            rows.sort_by_key(id_of);
            rows.into_iter()
                .map(|r| serde_json::from_value(r).map_err(SyncError::from))
                .collect()
        })
    }

    fn list_live<M: SyncModel>(&self) -> Result<Vec<M>, SyncError> {
        self.with_table(M::TABLE, |t| {
            let mut rows: Vec<Value> = t
                .rows
                .iter()
                .filter(|r| !is_tombstoned(r))
                .cloned()
                .collect();
            rows.sort_by_key(id_of);
            rows.into_iter()
                .map(|r| serde_json::from_value(r).map_err(SyncError::from))
                .collect()
        })
    }

    fn upsert<M: SyncModel>(&self, rec: &M) -> Result<UpsertOutcome, SyncError> {
        let mut value = serde_json::to_value(rec)?;
        let display = M::TABLE.display_field();
        let blank = value
            .get(display)
            .and_then(Value::as_str)
            .map(|s| s.trim().is_empty())
            .unwrap_or(true);
        if blank {
            return Err(SyncError::Validation {
                table: M::TABLE.name(),
                uuid: rec.uuid().unwrap_or("-").to_string(),
                reason: format!("required field '{}' is empty", display),
            });
        }

        self.with_table(M::TABLE, |t| {
            let incoming_uuid = rec.uuid().filter(|u| !identity::is_missing_uuid(Some(u)));
            if let Some(u) = incoming_uuid {
                if let Some(pos) = t.rows.iter().position(|r| uuid_of(r) == Some(u)) {
                    if rec.updated_at() >= ts_of(&t.rows[pos]) {
                        // Master keeps its own id; everything else is the
                        // incoming version.
                        value["id"] = json!(id_of(&t.rows[pos]));
                        t.rows[pos] = value;
                        return Ok(UpsertOutcome::Updated);
                    }
                    return Ok(UpsertOutcome::SkippedOlder);
                }
            }

            let want = id_of(&value);
            let free = want > 0 && !t.rows.iter().any(|r| id_of(r) == want);
            let assigned = if free { want } else { t.next_id.max(1) };
            value["id"] = json!(assigned);
            t.next_id = t.next_id.max(assigned + 1);
            t.rows.push(value);
            Ok(UpsertOutcome::Inserted)
        })
    }

    fn count(&self, table: TableKind) -> Result<i64, SyncError> {
        Ok(self.with_table(table, |t| t.rows.len() as i64))
    }

    fn soft_delete(&self, table: TableKind, id: i32) -> Result<(), SyncError> {
        self.with_table(table, |t| {
            match t.rows.iter_mut().find(|r| id_of(r) == id) {
                Some(row) => {
                    row["deleted"] = json!(true);
                    touch(row);
                    Ok(())
                }
                None => Err(SyncError::Integrity(format!(
                    "no {} record with id {}",
                    table, id
                ))),
            }
        })
    }

    fn hard_delete(&self, table: TableKind, id: i32) -> Result<(), SyncError> {
        self.with_table(table, |t| {
            t.rows.retain(|r| id_of(r) != id);
            Ok(())
        })
    }

    fn set_parent(
        &self,
        table: TableKind,
        id: i32,
        fk: ParentKey,
        parent_id: i32,
    ) -> Result<(), SyncError> {
        self.with_table(table, |t| {
            match t.rows.iter_mut().find(|r| id_of(r) == id) {
                Some(row) => {
                    row[fk.column()] = json!(parent_id);
                    touch(row);
                    Ok(())
                }
                None => Err(SyncError::Integrity(format!(
                    "no {} record with id {}",
                    table, id
                ))),
            }
        })
    }

    fn reassign_parent(
        &self,
        table: TableKind,
        fk: ParentKey,
        from: i32,
        to: i32,
    ) -> Result<usize, SyncError> {
        self.with_table(table, |t| {
            let mut changed = 0;
            for row in t.rows.iter_mut() {
                if row.get(fk.column()).and_then(Value::as_i64) == Some(from as i64) {
                    row[fk.column()] = json!(to);
                    touch(row);
                    changed += 1;
                }
            }
            Ok(changed)
        })
    }

    fn purge_null_identities(&self, table: TableKind) -> Result<usize, SyncError> {
        self.with_table(table, |t| {
            let before = t.rows.len();
            t.rows.retain(|r| !identity::is_missing_uuid(uuid_of(r)));
            Ok(before - t.rows.len())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Customer;

    fn customer(uuid: &str, name: &str, updated_at: NaiveDateTime) -> Customer {
        Customer {
            id: 0,
            uuid: Some(uuid.into()),
            device_id: Some("dev".into()),
            customer_name: name.into(),
            city: String::new(),
            contact_person: String::new(),
            synced: Some(false),
            deleted: false,
            created_at: updated_at,
            updated_at,
        }
    }

    fn at(secs: i64) -> NaiveDateTime {
        chrono::DateTime::from_timestamp(secs, 0).unwrap().naive_utc()
    }

    #[test]
    fn upsert_inserts_then_updates_on_newer_or_equal() {
        let master = MemoryMasterStore::new();
        let c = customer("u1", "Acme", at(100));
        assert_eq!(master.upsert(&c).expect("insert"), UpsertOutcome::Inserted);

        // Equal timestamp still overwrites: the pushing device wins the tie.
        let mut same = customer("u1", "Acme GmbH", at(100));
        same.id = 99;
        assert_eq!(master.upsert(&same).expect("update"), UpsertOutcome::Updated);
        let live: Vec<Customer> = master.list_live().expect("live");
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].customer_name, "Acme GmbH");
        // The master keeps its own id even when the incoming copy disagrees.
        assert_eq!(live[0].id, 1);

        let older = customer("u1", "Stale", at(50));
        assert_eq!(
            master.upsert(&older).expect("skip"),
            UpsertOutcome::SkippedOlder
        );
    }

    #[test]
    fn upsert_rejects_blank_display_field() {
        let master = MemoryMasterStore::new();
        let c = customer("u1", "  ", at(100));
        match master.upsert(&c) {
            Err(SyncError::Validation { table, .. }) => assert_eq!(table, "customers"),
            other => panic!("expected validation error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn upsert_keeps_incoming_id_when_free() {
        let master = MemoryMasterStore::new();
        let mut c = customer("u1", "Acme", at(100));
        c.id = 10;
        master.upsert(&c).expect("insert");
        let mut d = customer("u2", "Beta", at(100));
        d.id = 10;
        master.upsert(&d).expect("insert");
        let live: Vec<Customer> = master.list_live().expect("live");
        let ids: Vec<i32> = live.iter().map(|r| r.id).collect();
        assert!(ids.contains(&10));
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
    }

    #[test]
    fn soft_delete_bumps_updated_at() {
        let master = MemoryMasterStore::new();
        let c = customer("u1", "Acme", at(100));
        master.upsert(&c).expect("insert");
        master.soft_delete(TableKind::Customers, 1).expect("soft delete");
        let snap: Vec<Customer> = master.fetch_snapshot().expect("snapshot");
        assert!(snap[0].deleted);
        assert!(snap[0].updated_at > at(100));
        // Still present: tombstoned, not removed.
        assert_eq!(master.count(TableKind::Customers).expect("count"), 1);
    }

    #[test]
    fn purge_null_identities_removes_only_broken_rows() {
        let master = MemoryMasterStore::new();
        master.upsert(&customer("u1", "Acme", at(100))).expect("insert");
        master.inject_raw(
            TableKind::Customers,
            json!({
                "uuid": null, "device_id": null, "customer_name": "Ghost",
                "city": "", "contact_person": "", "synced": null,
                "deleted": false, "created_at": at(1), "updated_at": at(1),
            }),
        );
        master.inject_raw(
            TableKind::Customers,
            json!({
                "id": 0, "uuid": "null", "device_id": null, "customer_name": "Ghost2",
                "city": "", "contact_person": "", "synced": null,
                "deleted": false, "created_at": at(1), "updated_at": at(1),
            }),
        );
        let purged = master
            .purge_null_identities(TableKind::Customers)
            .expect("purge");
        assert_eq!(purged, 2);
        assert_eq!(master.count(TableKind::Customers).expect("count"), 1);
    }
}
