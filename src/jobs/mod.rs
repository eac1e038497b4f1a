//! Reconciliation jobs.
//!
//! Batch, idempotent repairs run against the master store, independent of
//! the sync sessions. The conflict policy keeps devices converging, but it
//! cannot stop two offline devices from creating the same real-world entity
//! twice or from leaving children behind when their parent is merged away;
//! these jobs compensate for exactly those races. Each reports the affected
//! ids and never resolves ambiguity on its own.

pub mod dedup;
pub mod fk_rules;
pub mod orphans;

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::SyncError;
use crate::store::{MasterStore, TableKind};

#[derive(Debug, Default, Serialize)]
pub struct NullCleanupReport {
    pub deleted_by_table: BTreeMap<String, usize>,
}

/// Hard-delete master rows whose uuid is missing, empty or the literal
/// `"null"`. Such rows predate the identity module and can never be matched
/// by any store; they only feed the duplicate mess.
pub fn cleanup_null_identities<S: MasterStore>(master: &S) -> Result<NullCleanupReport, SyncError> {
    let mut report = NullCleanupReport::default();
    for table in TableKind::ALL {
        let n = master.purge_null_identities(table)?;
        if n > 0 {
            log::info!("null-identity cleanup: {} row(s) removed from {}", n, table);
        }
        report.deleted_by_table.insert(table.name().to_string(), n);
    }
    Ok(report)
}
