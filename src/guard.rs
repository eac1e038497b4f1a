//! Pre-flight safety checks.
//!
//! Heuristics that catch the two misconfigurations observed to precede data
//! loss in the field: a device pointed at the wrong master (empty local
//! store, populated master) and a master bloated with stale or duplicated
//! data. The result is advisory; the orchestrator refuses destructive
//! operations only while the caller has not acknowledged the warnings.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::SyncError;
use crate::store::local::LocalStore;
use crate::store::{MasterStore, TableKind};

/// Master exceeding local by this multiple counts as suspicious.
pub const MASTER_EXCESS_FACTOR: i64 = 5;

#[derive(Debug, Clone, Serialize)]
pub struct SafetyReport {
    pub safe: bool,
    pub warnings: Vec<String>,
    pub local_counts: BTreeMap<String, i64>,
    pub master_counts: BTreeMap<String, i64>,
    pub unsynced_counts: BTreeMap<String, i64>,
}

/// Compare local and master record counts for every synchronized table.
pub fn safety_check<S: MasterStore>(
    local: &LocalStore,
    master: &S,
) -> Result<SafetyReport, SyncError> {
    let mut warnings = Vec::new();
    let mut local_counts = BTreeMap::new();
    let mut master_counts = BTreeMap::new();
    let mut unsynced_counts = BTreeMap::new();

    for table in TableKind::ALL {
        let counts = local.counts_for(table)?;
        let master_total = master.count(table)?;
        local_counts.insert(table.name().to_string(), counts.total);
        master_counts.insert(table.name().to_string(), master_total);
        unsynced_counts.insert(table.name().to_string(), counts.unsynced);

        if counts.total == 0 && master_total > 0 {
            warnings.push(format!(
                "{}: local store is empty while master holds {} records; \
                 this device may be pointed at the wrong master",
                table, master_total
            ));
        } else if counts.total > 0 && master_total >= counts.total * MASTER_EXCESS_FACTOR {
            warnings.push(format!(
                "{}: master holds {} records against {} local; \
                 master data may be stale or duplicated",
                table, master_total, counts.total
            ));
        }
    }

    if !warnings.is_empty() {
        log::warn!("safety check raised {} warning(s)", warnings.len());
    }

    Ok(SafetyReport {
        safe: warnings.is_empty(),
        warnings,
        local_counts,
        master_counts,
        unsynced_counts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity;
    use crate::models::Customer;
    use crate::store::MemoryMasterStore;
    use crate::store::local::LocalTable;
    use chrono::NaiveDateTime;

    fn customer(name: &str) -> Customer {
        identity::prepare_new(
            Customer {
                id: 0,
                uuid: None,
                device_id: None,
                customer_name: name.into(),
                city: String::new(),
                contact_person: String::new(),
                synced: None,
                deleted: false,
                created_at: NaiveDateTime::default(),
                updated_at: NaiveDateTime::default(),
            },
            "test-device",
        )
    }

    #[test]
    fn empty_everywhere_is_safe() {
        let local = LocalStore::open_in_memory().expect("open");
        let master = MemoryMasterStore::new();
        let report = safety_check(&local, &master).expect("check");
        assert!(report.safe);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn empty_local_with_populated_master_warns() {
        let local = LocalStore::open_in_memory().expect("open");
        let master = MemoryMasterStore::new();
        master.upsert(&customer("Acme")).expect("seed master");
        let report = safety_check(&local, &master).expect("check");
        assert!(!report.safe);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("customers"));
    }

    #[test]
    fn master_excess_warns() {
        let local = LocalStore::open_in_memory().expect("open");
        let master = MemoryMasterStore::new();
        local.insert_local(&customer("Only one")).expect("seed local");
        for i in 0..MASTER_EXCESS_FACTOR {
            master
                .upsert(&customer(&format!("Dup {}", i)))
                .expect("seed master");
        }
        let report = safety_check(&local, &master).expect("check");
        assert!(!report.safe);
        assert!(report.warnings[0].contains("stale or duplicated"));
    }
}
