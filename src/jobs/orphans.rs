//! Orphan cleanup.
//!
//! Children whose foreign key points at no live parent are unreachable from
//! any screen and unrecoverable; they are hard-deleted. Runs strictly after
//! parent merges and deletions are final, walking the relationships in
//! dependency order so a purge higher up is observed lower down in the same
//! pass.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::error::SyncError;
use crate::models::{Cabinet, Customer, Measurement, Node, PmSession, SyncMeta, SyncModel};
use crate::store::MasterStore;

#[derive(Debug, Default, Serialize)]
pub struct OrphanReport {
    pub deleted_by_table: BTreeMap<String, usize>,
}

pub fn purge_orphans<S: MasterStore>(master: &S) -> Result<OrphanReport, SyncError> {
    let mut report = OrphanReport::default();

    let live_customers = live_ids::<Customer, S>(master)?;
    purge::<PmSession, S>(master, &live_customers, |s| s.customer_id, &mut report)?;
    purge::<Cabinet, S>(master, &live_customers, |c| c.customer_id, &mut report)?;

    let live_sessions = live_ids::<PmSession, S>(master)?;
    purge::<Cabinet, S>(master, &live_sessions, |c| c.pm_session_id, &mut report)?;

    let live_cabinets = live_ids::<Cabinet, S>(master)?;
    purge::<Node, S>(master, &live_cabinets, |n| n.cabinet_id, &mut report)?;

    let live_nodes = live_ids::<Node, S>(master)?;
    purge::<Measurement, S>(master, &live_nodes, |m| m.node_id, &mut report)?;

    Ok(report)
}

fn live_ids<M: SyncModel, S: MasterStore>(master: &S) -> Result<HashSet<i32>, SyncError> {
    Ok(master
        .list_live::<M>()?
        .iter()
        .map(|m| m.local_id())
        .collect())
}

fn purge<C: SyncModel, S: MasterStore>(
    master: &S,
    live_parents: &HashSet<i32>,
    parent_of: impl Fn(&C) -> i32,
    report: &mut OrphanReport,
) -> Result<(), SyncError> {
    // Tombstoned children are orphans too; take the full snapshot.
    let children = master.fetch_snapshot::<C>()?;
    let mut removed = 0usize;
    for child in &children {
        if !live_parents.contains(&parent_of(child)) {
            master.hard_delete(C::TABLE, child.local_id())?;
            removed += 1;
        }
    }
    if removed > 0 {
        log::info!("orphan cleanup: {} {} record(s) removed", removed, C::TABLE);
    }
    *report
        .deleted_by_table
        .entry(C::TABLE.name().to_string())
        .or_default() += removed;
    Ok(())
}
