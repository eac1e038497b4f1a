//! Typed records for the synchronized tables.
//!
//! Every synchronized record carries the same sync metadata columns next to
//! its domain fields: `uuid` (the only cross-store identity), `device_id`
//! (informational), `synced` (dirty flag), `deleted` (tombstone) and the two
//! timestamps. The [`SyncMeta`] trait gives the engine uniform access to
//! those columns; [`SyncModel`] ties a record type to its [`TableKind`].
//!
//! `uuid` and `synced` are nullable on purpose: stores migrated from the
//! pre-sync era contain rows without either, and the cleanup jobs need to
//! see them as-is.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::schema::{cabinets, customers, measurements, nodes, pm_sessions};
use crate::store::TableKind;

/// Uniform access to the sync metadata columns of a record.
pub trait SyncMeta {
    fn local_id(&self) -> i32;
    fn uuid(&self) -> Option<&str>;
    fn set_uuid(&mut self, uuid: String);
    fn set_device_id(&mut self, device_id: String);
    fn synced(&self) -> Option<bool>;
    fn set_synced(&mut self, synced: bool);
    fn deleted(&self) -> bool;
    fn set_deleted(&mut self, deleted: bool);
    fn created_at(&self) -> NaiveDateTime;
    fn set_created_at(&mut self, at: NaiveDateTime);
    fn updated_at(&self) -> NaiveDateTime;
    fn set_updated_at(&mut self, at: NaiveDateTime);
}

/// A record type belonging to one synchronized table.
pub trait SyncModel:
    SyncMeta + Clone + Serialize + DeserializeOwned + Send + 'static
{
    const TABLE: TableKind;
}

macro_rules! impl_sync_meta {
    ($model:ty) => {
        impl SyncMeta for $model {
            fn local_id(&self) -> i32 {
                self.id
            }
            fn uuid(&self) -> Option<&str> {
                self.uuid.as_deref()
            }
            fn set_uuid(&mut self, uuid: String) {
                self.uuid = Some(uuid);
            }
            fn set_device_id(&mut self, device_id: String) {
                self.device_id = Some(device_id);
            }
            fn synced(&self) -> Option<bool> {
                self.synced
            }
            fn set_synced(&mut self, synced: bool) {
                self.synced = Some(synced);
            }
            fn deleted(&self) -> bool {
                self.deleted
            }
            fn set_deleted(&mut self, deleted: bool) {
                self.deleted = deleted;
            }
            fn created_at(&self) -> NaiveDateTime {
                self.created_at
            }
            fn set_created_at(&mut self, at: NaiveDateTime) {
                self.created_at = at;
            }
            fn updated_at(&self) -> NaiveDateTime {
                self.updated_at
            }
            fn set_updated_at(&mut self, at: NaiveDateTime) {
                self.updated_at = at;
            }
        }
    };
}

#[derive(Queryable, Identifiable, Selectable, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[diesel(table_name = customers)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Customer {
    pub id: i32,
    pub uuid: Option<String>,
    pub device_id: Option<String>,
    pub customer_name: String,
    pub city: String,
    pub contact_person: String,
    pub synced: Option<bool>,
    pub deleted: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable, AsChangeset, Debug, Clone)]
#[diesel(table_name = customers)]
#[diesel(treat_none_as_null = true)]
pub struct NewCustomer {
    pub id: Option<i32>,
    pub uuid: Option<String>,
    pub device_id: Option<String>,
    pub customer_name: String,
    pub city: String,
    pub contact_person: String,
    pub synced: Option<bool>,
    pub deleted: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<&Customer> for NewCustomer {
    fn from(c: &Customer) -> Self {
        NewCustomer {
            id: Some(c.id),
            uuid: c.uuid.clone(),
            device_id: c.device_id.clone(),
            customer_name: c.customer_name.clone(),
            city: c.city.clone(),
            contact_person: c.contact_person.clone(),
            synced: c.synced,
            deleted: c.deleted,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

#[derive(Queryable, Identifiable, Selectable, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[diesel(table_name = pm_sessions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct PmSession {
    pub id: i32,
    pub uuid: Option<String>,
    pub device_id: Option<String>,
    pub customer_id: i32,
    pub title: String,
    pub technician: String,
    pub session_date: NaiveDateTime,
    pub synced: Option<bool>,
    pub deleted: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable, AsChangeset, Debug, Clone)]
#[diesel(table_name = pm_sessions)]
#[diesel(treat_none_as_null = true)]
pub struct NewPmSession {
    pub id: Option<i32>,
    pub uuid: Option<String>,
    pub device_id: Option<String>,
    pub customer_id: i32,
    pub title: String,
    pub technician: String,
    pub session_date: NaiveDateTime,
    pub synced: Option<bool>,
    pub deleted: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<&PmSession> for NewPmSession {
    fn from(s: &PmSession) -> Self {
        NewPmSession {
            id: Some(s.id),
            uuid: s.uuid.clone(),
            device_id: s.device_id.clone(),
            customer_id: s.customer_id,
            title: s.title.clone(),
            technician: s.technician.clone(),
            session_date: s.session_date,
            synced: s.synced,
            deleted: s.deleted,
            created_at: s.created_at,
            updated_at: s.updated_at,
        }
    }
}

#[derive(Queryable, Identifiable, Selectable, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[diesel(table_name = cabinets)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Cabinet {
    pub id: i32,
    pub uuid: Option<String>,
    pub device_id: Option<String>,
    pub customer_id: i32,
    pub pm_session_id: i32,
    pub cabinet_name: String,
    pub location: String,
    pub synced: Option<bool>,
    pub deleted: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable, AsChangeset, Debug, Clone)]
#[diesel(table_name = cabinets)]
#[diesel(treat_none_as_null = true)]
pub struct NewCabinet {
    pub id: Option<i32>,
    pub uuid: Option<String>,
    pub device_id: Option<String>,
    pub customer_id: i32,
    pub pm_session_id: i32,
    pub cabinet_name: String,
    pub location: String,
    pub synced: Option<bool>,
    pub deleted: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<&Cabinet> for NewCabinet {
    fn from(c: &Cabinet) -> Self {
        NewCabinet {
            id: Some(c.id),
            uuid: c.uuid.clone(),
            device_id: c.device_id.clone(),
            customer_id: c.customer_id,
            pm_session_id: c.pm_session_id,
            cabinet_name: c.cabinet_name.clone(),
            location: c.location.clone(),
            synced: c.synced,
            deleted: c.deleted,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

#[derive(Queryable, Identifiable, Selectable, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[diesel(table_name = nodes)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Node {
    pub id: i32,
    pub uuid: Option<String>,
    pub device_id: Option<String>,
    pub cabinet_id: i32,
    pub node_address: String,
    pub node_type: String,
    pub performance_index: Option<f32>,
    pub synced: Option<bool>,
    pub deleted: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable, AsChangeset, Debug, Clone)]
#[diesel(table_name = nodes)]
#[diesel(treat_none_as_null = true)]
pub struct NewNode {
    pub id: Option<i32>,
    pub uuid: Option<String>,
    pub device_id: Option<String>,
    pub cabinet_id: i32,
    pub node_address: String,
    pub node_type: String,
    pub performance_index: Option<f32>,
    pub synced: Option<bool>,
    pub deleted: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<&Node> for NewNode {
    fn from(n: &Node) -> Self {
        NewNode {
            id: Some(n.id),
            uuid: n.uuid.clone(),
            device_id: n.device_id.clone(),
            cabinet_id: n.cabinet_id,
            node_address: n.node_address.clone(),
            node_type: n.node_type.clone(),
            performance_index: n.performance_index,
            synced: n.synced,
            deleted: n.deleted,
            created_at: n.created_at,
            updated_at: n.updated_at,
        }
    }
}

#[derive(Queryable, Identifiable, Selectable, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[diesel(table_name = measurements)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Measurement {
    pub id: i32,
    pub uuid: Option<String>,
    pub device_id: Option<String>,
    pub node_id: i32,
    pub label: String,
    pub value: f32,
    pub unit: String,
    pub synced: Option<bool>,
    pub deleted: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable, AsChangeset, Debug, Clone)]
#[diesel(table_name = measurements)]
#[diesel(treat_none_as_null = true)]
pub struct NewMeasurement {
    pub id: Option<i32>,
    pub uuid: Option<String>,
    pub device_id: Option<String>,
    pub node_id: i32,
    pub label: String,
    pub value: f32,
    pub unit: String,
    pub synced: Option<bool>,
    pub deleted: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<&Measurement> for NewMeasurement {
    fn from(m: &Measurement) -> Self {
        NewMeasurement {
            id: Some(m.id),
            uuid: m.uuid.clone(),
            device_id: m.device_id.clone(),
            node_id: m.node_id,
            label: m.label.clone(),
            value: m.value,
            unit: m.unit.clone(),
            synced: m.synced,
            deleted: m.deleted,
            created_at: m.created_at,
            updated_at: m.updated_at,
        }
    }
}

impl_sync_meta!(Customer);
impl_sync_meta!(PmSession);
impl_sync_meta!(Cabinet);
impl_sync_meta!(Node);
impl_sync_meta!(Measurement);

impl SyncModel for Customer {
    const TABLE: TableKind = TableKind::Customers;
}
impl SyncModel for PmSession {
    const TABLE: TableKind = TableKind::PmSessions;
}
impl SyncModel for Cabinet {
    const TABLE: TableKind = TableKind::Cabinets;
}
impl SyncModel for Node {
    const TABLE: TableKind = TableKind::Nodes;
}
impl SyncModel for Measurement {
    const TABLE: TableKind = TableKind::Measurements;
}
