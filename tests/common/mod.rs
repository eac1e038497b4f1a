#![allow(dead_code)]

//! Two-device test harness: each device is a full engine over its own
//! in-memory SQLite store, all sharing one in-process master.

use std::sync::Arc;

use chrono::NaiveDateTime;

use cabsync::identity;
use cabsync::models::{Cabinet, Customer, Measurement, Node, PmSession, SyncMeta, SyncModel};
use cabsync::store::local::{LocalStore, LocalTable};
use cabsync::{MemoryMasterStore, SyncEngine};

pub type Device = SyncEngine<Arc<MemoryMasterStore>>;

pub fn master() -> Arc<MemoryMasterStore> {
    Arc::new(MemoryMasterStore::new())
}

pub fn device(master: &Arc<MemoryMasterStore>) -> Device {
    let local = LocalStore::open_in_memory().expect("open local store");
    SyncEngine::new(local, Arc::clone(master)).expect("engine")
}

pub fn ts(secs: i64) -> NaiveDateTime {
    chrono::DateTime::from_timestamp(secs, 0)
        .expect("timestamp")
        .naive_utc()
}

/// Stamp a record as locally created and persist it, returning the stored
/// copy (with its assigned id).
pub fn create_local<M>(dev: &Device, rec: M) -> M
where
    M: SyncModel,
    LocalStore: LocalTable<M>,
{
    let stamped = identity::prepare_new(rec, dev.device_id());
    dev.local().insert_local(&stamped).expect("insert local");
    dev.local()
        .find_by_uuid(stamped.uuid().expect("uuid"))
        .expect("query")
        .expect("present")
}

/// Stamp a local mutation and persist it.
pub fn update_local<M>(dev: &Device, rec: M)
where
    M: SyncModel,
    LocalStore: LocalTable<M>,
{
    let stamped = identity::prepare_update(rec);
    dev.local().update_local(&stamped).expect("update local");
}

/// Tombstone a record locally.
pub fn delete_local<M>(dev: &Device, rec: M)
where
    M: SyncModel,
    LocalStore: LocalTable<M>,
{
    let stamped = identity::mark_deleted(rec);
    dev.local().update_local(&stamped).expect("delete local");
}

// -- record builders (unstamped unless noted) ------------------------------

pub fn customer(name: &str) -> Customer {
    Customer {
        id: 0,
        uuid: None,
        device_id: None,
        customer_name: name.into(),
        city: "Linz".into(),
        contact_person: String::new(),
        synced: None,
        deleted: false,
        created_at: NaiveDateTime::default(),
        updated_at: NaiveDateTime::default(),
    }
}

pub fn session(customer_id: i32, title: &str) -> PmSession {
    PmSession {
        id: 0,
        uuid: None,
        device_id: None,
        customer_id,
        title: title.into(),
        technician: "fk".into(),
        session_date: ts(1_700_000_000),
        synced: None,
        deleted: false,
        created_at: NaiveDateTime::default(),
        updated_at: NaiveDateTime::default(),
    }
}

pub fn cabinet(customer_id: i32, pm_session_id: i32, name: &str) -> Cabinet {
    Cabinet {
        id: 0,
        uuid: None,
        device_id: None,
        customer_id,
        pm_session_id,
        cabinet_name: name.into(),
        location: "hall 2".into(),
        synced: None,
        deleted: false,
        created_at: NaiveDateTime::default(),
        updated_at: NaiveDateTime::default(),
    }
}

pub fn node(cabinet_id: i32, address: &str) -> Node {
    Node {
        id: 0,
        uuid: None,
        device_id: None,
        cabinet_id,
        node_address: address.into(),
        node_type: "PNOZ".into(),
        performance_index: Some(0.97),
        synced: None,
        deleted: false,
        created_at: NaiveDateTime::default(),
        updated_at: NaiveDateTime::default(),
    }
}

pub fn measurement(node_id: i32, label: &str) -> Measurement {
    Measurement {
        id: 0,
        uuid: None,
        device_id: None,
        node_id,
        label: label.into(),
        value: 42.0,
        unit: "ms".into(),
        synced: None,
        deleted: false,
        created_at: NaiveDateTime::default(),
        updated_at: NaiveDateTime::default(),
    }
}

// -- fully specified records for seeding the master directly ---------------

pub fn customer_rec(id: i32, uuid: &str, name: &str, at: NaiveDateTime) -> Customer {
    let mut rec = customer(name);
    rec.id = id;
    rec.uuid = Some(uuid.into());
    rec.device_id = Some("seed".into());
    rec.synced = Some(false);
    rec.created_at = at;
    rec.updated_at = at;
    rec
}

pub fn session_rec(
    id: i32,
    uuid: &str,
    customer_id: i32,
    title: &str,
    at: NaiveDateTime,
) -> PmSession {
    let mut rec = session(customer_id, title);
    rec.id = id;
    rec.uuid = Some(uuid.into());
    rec.device_id = Some("seed".into());
    rec.synced = Some(false);
    rec.created_at = at;
    rec.updated_at = at;
    rec
}

pub fn cabinet_rec(
    id: i32,
    uuid: &str,
    customer_id: i32,
    pm_session_id: i32,
    name: &str,
    at: NaiveDateTime,
) -> Cabinet {
    let mut rec = cabinet(customer_id, pm_session_id, name);
    rec.id = id;
    rec.uuid = Some(uuid.into());
    rec.device_id = Some("seed".into());
    rec.synced = Some(false);
    rec.created_at = at;
    rec.updated_at = at;
    rec
}

pub fn node_rec(id: i32, uuid: &str, cabinet_id: i32, address: &str, at: NaiveDateTime) -> Node {
    let mut rec = node(cabinet_id, address);
    rec.id = id;
    rec.uuid = Some(uuid.into());
    rec.device_id = Some("seed".into());
    rec.synced = Some(false);
    rec.created_at = at;
    rec.updated_at = at;
    rec
}

pub fn measurement_rec(
    id: i32,
    uuid: &str,
    node_id: i32,
    label: &str,
    at: NaiveDateTime,
) -> Measurement {
    let mut rec = measurement(node_id, label);
    rec.id = id;
    rec.uuid = Some(uuid.into());
    rec.device_id = Some("seed".into());
    rec.synced = Some(false);
    rec.created_at = at;
    rec.updated_at = at;
    rec
}
