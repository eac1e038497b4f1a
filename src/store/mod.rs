//! Store adapters and their contracts.
//!
//! The engine drives exactly two stores: the device-local SQLite store
//! ([`local::LocalStore`]) and the shared master store behind the
//! [`MasterStore`] trait. The HTTP adapter ([`master::HttpMasterStore`])
//! talks to the real networked master; [`memory::MemoryMasterStore`]
//! implements the same contract in-process for tests and simulation.

pub mod local;
pub mod master;
pub mod memory;

pub use local::LocalStore;
pub use master::HttpMasterStore;
pub use memory::MemoryMasterStore;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::models::SyncModel;

/// The synchronized entity types, declared parents before children. Sync and
/// reconciliation iterate tables in this order so parent rows land before
/// the rows referencing them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    Customers,
    PmSessions,
    Cabinets,
    Nodes,
    Measurements,
}

impl TableKind {
    pub const ALL: [TableKind; 5] = [
        TableKind::Customers,
        TableKind::PmSessions,
        TableKind::Cabinets,
        TableKind::Nodes,
        TableKind::Measurements,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TableKind::Customers => "customers",
            TableKind::PmSessions => "pm_sessions",
            TableKind::Cabinets => "cabinets",
            TableKind::Nodes => "nodes",
            TableKind::Measurements => "measurements",
        }
    }

    /// The human-entered field the master store requires to be non-empty.
    pub fn display_field(self) -> &'static str {
        match self {
            TableKind::Customers => "customer_name",
            TableKind::PmSessions => "title",
            TableKind::Cabinets => "cabinet_name",
            TableKind::Nodes => "node_address",
            TableKind::Measurements => "label",
        }
    }

    /// Fallback display value used by the explicit defaulting pass.
    pub fn fallback_display(self) -> &'static str {
        match self {
            TableKind::Customers => "Unnamed Customer",
            TableKind::PmSessions => "Untitled Session",
            TableKind::Cabinets => "Unnamed Cabinet",
            TableKind::Nodes => "Unknown Address",
            TableKind::Measurements => "Unlabeled",
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TableKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customers" => Ok(TableKind::Customers),
            "pm_sessions" => Ok(TableKind::PmSessions),
            "cabinets" => Ok(TableKind::Cabinets),
            "nodes" => Ok(TableKind::Nodes),
            "measurements" => Ok(TableKind::Measurements),
            other => Err(format!(
                "unknown table '{}' (expected one of: customers, pm_sessions, cabinets, nodes, measurements)",
                other
            )),
        }
    }
}

/// Foreign-key columns that reference a parent table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParentKey {
    Customer,
    Session,
    Cabinet,
    Node,
}

impl ParentKey {
    pub fn column(self) -> &'static str {
        match self {
            ParentKey::Customer => "customer_id",
            ParentKey::Session => "pm_session_id",
            ParentKey::Cabinet => "cabinet_id",
            ParentKey::Node => "node_id",
        }
    }
}

/// Per-table record counts used by status and the safety guard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCounts {
    pub total: i64,
    pub tombstoned: i64,
    pub unsynced: i64,
}

/// What an upsert against the master did with the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// The master already holds a newer version; the record was ignored.
    SkippedOlder,
}

/// Row selector for the operator-facing `delete-records` escape hatch.
#[derive(Debug, Clone, Default)]
pub struct DeleteFilter {
    pub uuid: Option<String>,
    pub name_like: Option<String>,
    pub include_deleted: bool,
}

/// Contract of the shared master store.
///
/// Upsert semantics the implementation must provide: records match by
/// `uuid`; an absent uuid never matches. On insert the incoming `id` is kept
/// when that id is free, otherwise a fresh one is assigned. On match the
/// incoming record overwrites the stored one iff its `updated_at` is newer
/// or equal, keeping the stored row's own `id`. A record whose display field
/// is empty is rejected with a validation error. Master-side soft deletes
/// and foreign-key reassignments bump `updated_at` so they propagate to
/// devices on the next pull.
pub trait MasterStore: Send + Sync {
    /// Cheap reachability probe; never mutates data.
    fn ping(&self) -> Result<(), SyncError>;

    /// Records with `updated_at` strictly newer than `since` (all records
    /// when `since` is `None`), ordered by `updated_at`.
    fn fetch_since<M: SyncModel>(
        &self,
        since: Option<NaiveDateTime>,
    ) -> Result<Vec<M>, SyncError>;

    /// The complete table, tombstones included. Used by full refresh and
    /// orphan cleanup.
    fn fetch_snapshot<M: SyncModel>(&self) -> Result<Vec<M>, SyncError>;

    /// Non-tombstoned records only. Used by reconciliation jobs.
    fn list_live<M: SyncModel>(&self) -> Result<Vec<M>, SyncError>;

    fn upsert<M: SyncModel>(&self, rec: &M) -> Result<UpsertOutcome, SyncError>;

    fn count(&self, table: TableKind) -> Result<i64, SyncError>;

    /// Tombstone one master record and bump its `updated_at`.
    fn soft_delete(&self, table: TableKind, id: i32) -> Result<(), SyncError>;

    /// Physically remove one master record. Reserved for reconciliation
    /// jobs; ordinary sync never hard-deletes.
    fn hard_delete(&self, table: TableKind, id: i32) -> Result<(), SyncError>;

    /// Point one record's foreign key at a different parent.
    fn set_parent(
        &self,
        table: TableKind,
        id: i32,
        fk: ParentKey,
        parent_id: i32,
    ) -> Result<(), SyncError>;

    /// Repoint every record whose foreign key is `from` to `to`; returns the
    /// number of records changed.
    fn reassign_parent(
        &self,
        table: TableKind,
        fk: ParentKey,
        from: i32,
        to: i32,
    ) -> Result<usize, SyncError>;

    /// Hard-delete rows whose uuid is NULL, empty, or the literal string
    /// `"null"`; returns the number removed.
    fn purge_null_identities(&self, table: TableKind) -> Result<usize, SyncError>;
}

impl<S: MasterStore> MasterStore for Arc<S> {
    fn ping(&self) -> Result<(), SyncError> {
        (**self).ping()
    }

    fn fetch_since<M: SyncModel>(
        &self,
        since: Option<NaiveDateTime>,
    ) -> Result<Vec<M>, SyncError> {
        (**self).fetch_since(since)
    }

    fn fetch_snapshot<M: SyncModel>(&self) -> Result<Vec<M>, SyncError> {
        (**self).fetch_snapshot()
    }

    fn list_live<M: SyncModel>(&self) -> Result<Vec<M>, SyncError> {
        (**self).list_live()
    }

    fn upsert<M: SyncModel>(&self, rec: &M) -> Result<UpsertOutcome, SyncError> {
        (**self).upsert(rec)
    }

    fn count(&self, table: TableKind) -> Result<i64, SyncError> {
        (**self).count(table)
    }

    fn soft_delete(&self, table: TableKind, id: i32) -> Result<(), SyncError> {
        (**self).soft_delete(table, id)
    }

    fn hard_delete(&self, table: TableKind, id: i32) -> Result<(), SyncError> {
        (**self).hard_delete(table, id)
    }

    fn set_parent(
        &self,
        table: TableKind,
        id: i32,
        fk: ParentKey,
        parent_id: i32,
    ) -> Result<(), SyncError> {
        (**self).set_parent(table, id, fk, parent_id)
    }

    fn reassign_parent(
        &self,
        table: TableKind,
        fk: ParentKey,
        from: i32,
        to: i32,
    ) -> Result<usize, SyncError> {
        (**self).reassign_parent(table, fk, from, to)
    }

    fn purge_null_identities(&self, table: TableKind) -> Result<usize, SyncError> {
        (**self).purge_null_identities(table)
    }
}
