//! Identity & lifecycle stamping.
//!
//! Every record entering a store passes through here first: creation stamps
//! a uuid, the owning device and a dirty flag; updates and deletions reset
//! the dirty flag and touch `updated_at`. The uuid is assigned exactly once
//! and is the only identity compared across stores.

use chrono::{NaiveDateTime, Utc};
use uuid::Uuid;

use crate::models::SyncMeta;

/// True when a uuid value is unusable for cross-store matching: absent,
/// empty, or the literal string `"null"` left behind by pre-identity
/// exports.
pub fn is_missing_uuid(uuid: Option<&str>) -> bool {
    match uuid {
        None => true,
        Some(s) => s.is_empty() || s == "null",
    }
}

/// Assign a fresh uuid iff the record has none. Idempotent; returns whether
/// an assignment happened.
pub fn ensure_uuid(rec: &mut impl SyncMeta) -> bool {
    if is_missing_uuid(rec.uuid()) {
        rec.set_uuid(Uuid::new_v4().to_string());
        true
    } else {
        false
    }
}

/// Stamp a record for first persistence: uuid (kept if already present),
/// owning device, dirty, not deleted. Timestamps still at the Unix epoch
/// count as unset and default to now.
pub fn prepare_new<M: SyncMeta>(mut rec: M, device_id: &str) -> M {
    let now = Utc::now().naive_utc();
    ensure_uuid(&mut rec);
    rec.set_device_id(device_id.to_string());
    rec.set_synced(false);
    rec.set_deleted(false);
    if rec.created_at() == NaiveDateTime::default() {
        rec.set_created_at(now);
    }
    rec.set_updated_at(now);
    rec
}

/// Stamp a local mutation. Every local change must pass through here before
/// persistence; this is the sole mechanism that marks a record as needing a
/// push.
pub fn prepare_update<M: SyncMeta>(mut rec: M) -> M {
    rec.set_synced(false);
    rec.set_updated_at(Utc::now().naive_utc());
    rec
}

/// Tombstone a record. Deletion is an ordinary field change that propagates
/// through sync like any other; nothing is removed here.
pub fn mark_deleted<M: SyncMeta>(mut rec: M) -> M {
    rec.set_deleted(true);
    rec.set_synced(false);
    rec.set_updated_at(Utc::now().naive_utc());
    rec
}

/// True iff the record holds changes the master has not confirmed.
pub fn needs_sync(rec: &impl SyncMeta) -> bool {
    !rec.synced().unwrap_or(false)
}

/// Build a device identifier from hostname, current time and a random
/// suffix. Collisions are tolerated; `device_id` is informational and never
/// used as a uniqueness key.
pub fn generate_device_id() -> String {
    let host = sysinfo::System::host_name().unwrap_or_else(|| "unknown-host".to_string());
    let stamp = Utc::now().format("%Y%m%d%H%M%S");
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", host, stamp, &suffix[..6])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Customer;

    fn blank_customer() -> Customer {
        Customer {
            id: 0,
            uuid: None,
            device_id: None,
            customer_name: "Acme-001".into(),
            city: String::new(),
            contact_person: String::new(),
            synced: None,
            deleted: false,
            created_at: NaiveDateTime::default(),
            updated_at: NaiveDateTime::default(),
        }
    }

    #[test]
    fn missing_uuid_variants() {
        assert!(is_missing_uuid(None));
        assert!(is_missing_uuid(Some("")));
        assert!(is_missing_uuid(Some("null")));
        assert!(!is_missing_uuid(Some("4a3b2c")));
    }

    #[test]
    fn ensure_uuid_is_idempotent() {
        let mut c = blank_customer();
        assert!(ensure_uuid(&mut c));
        let first = c.uuid.clone();
        assert!(!ensure_uuid(&mut c));
        assert_eq!(c.uuid, first);
    }

    #[test]
    fn prepare_new_stamps_metadata() {
        let c = prepare_new(blank_customer(), "tablet-1");
        assert!(c.uuid.is_some());
        assert_eq!(c.device_id.as_deref(), Some("tablet-1"));
        assert_eq!(c.synced, Some(false));
        assert!(!c.deleted);
        assert!(c.created_at > NaiveDateTime::default());
        assert_eq!(c.created_at, c.updated_at);
        assert!(needs_sync(&c));
    }

    #[test]
    fn prepare_new_keeps_existing_uuid_and_created_at() {
        let mut c = blank_customer();
        c.uuid = Some("keep-me".into());
        c.created_at = chrono::NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        let stamped = prepare_new(c.clone(), "tablet-1");
        assert_eq!(stamped.uuid.as_deref(), Some("keep-me"));
        assert_eq!(stamped.created_at, c.created_at);
    }

    #[test]
    fn mark_deleted_keeps_the_record() {
        let c = mark_deleted(prepare_new(blank_customer(), "tablet-1"));
        assert!(c.deleted);
        assert_eq!(c.synced, Some(false));
        assert!(c.uuid.is_some());
    }

    #[test]
    fn needs_sync_on_absent_flag() {
        let mut c = blank_customer();
        assert!(needs_sync(&c));
        c.synced = Some(true);
        assert!(!needs_sync(&c));
        c.synced = Some(false);
        assert!(needs_sync(&c));
    }

    #[test]
    fn device_ids_are_distinct() {
        let a = generate_device_id();
        let b = generate_device_id();
        assert_ne!(a, b);
    }
}
