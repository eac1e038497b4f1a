//! Duplicate merging.
//!
//! Two flavors, matching how duplicates actually arise:
//!
//! - *Siblings* (cabinets within one session, nodes within one cabinet):
//!   the copies share their parent, so the smallest id survives and the
//!   rest are hard-deleted; no foreign keys need rewriting.
//! - *Parents* (customers): children may hang off every copy, so all
//!   dependent tables are repointed at the keeper before the losers are
//!   tombstoned. Losers are soft-deleted, never hard-removed, so the merge
//!   propagates to devices.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::SyncError;
use crate::models::{Cabinet, Customer, Node, SyncMeta, SyncModel};
use crate::store::{MasterStore, ParentKey, TableKind};

#[derive(Debug, Serialize)]
pub struct SiblingMergeReport {
    pub table: String,
    pub duplicate_groups: usize,
    pub removed_ids: Vec<i32>,
}

#[derive(Debug, Serialize)]
pub struct MergedGroup {
    pub key: String,
    pub kept_id: i32,
    pub merged_ids: Vec<i32>,
}

#[derive(Debug, Default, Serialize)]
pub struct ParentMergeReport {
    pub groups: Vec<MergedGroup>,
    pub reassigned_children: BTreeMap<String, usize>,
}

#[derive(Debug, Serialize)]
pub struct DedupReport {
    pub parents: ParentMergeReport,
    pub siblings: Vec<SiblingMergeReport>,
}

fn norm(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Parents first, so sibling grouping already sees the merged parent ids.
pub fn run_all<S: MasterStore>(master: &S) -> Result<DedupReport, SyncError> {
    let parents = merge_duplicate_customers(master)?;
    let siblings = merge_sibling_duplicates(master)?;
    Ok(DedupReport { parents, siblings })
}

/// Merge live customers sharing a business name. The oldest copy survives;
/// every dependent table is repointed before the losers are tombstoned.
pub fn merge_duplicate_customers<S: MasterStore>(
    master: &S,
) -> Result<ParentMergeReport, SyncError> {
    let live = master.list_live::<Customer>()?;
    let mut groups: BTreeMap<String, Vec<&Customer>> = BTreeMap::new();
    for customer in &live {
        let key = norm(&customer.customer_name);
        if key.is_empty() {
            // A blank name is no natural key.
            continue;
        }
        groups.entry(key).or_default().push(customer);
    }

    let mut report = ParentMergeReport::default();
    for (key, mut members) in groups {
        if members.len() < 2 {
            continue;
        }
        members.sort_by_key(|c| (c.created_at, c.id));
        let keeper = members[0];
        let mut merged_ids = Vec::new();
        for loser in &members[1..] {
            // Children move to the keeper in every dependent table before
            // the loser is tombstoned, or they would point at a dead id.
            let sessions = master.reassign_parent(
                TableKind::PmSessions,
                ParentKey::Customer,
                loser.id,
                keeper.id,
            )?;
            let cabinets = master.reassign_parent(
                TableKind::Cabinets,
                ParentKey::Customer,
                loser.id,
                keeper.id,
            )?;
            *report
                .reassigned_children
                .entry(TableKind::PmSessions.name().to_string())
                .or_default() += sessions;
            *report
                .reassigned_children
                .entry(TableKind::Cabinets.name().to_string())
                .or_default() += cabinets;
            master.soft_delete(TableKind::Customers, loser.id)?;
            merged_ids.push(loser.id);
            log::info!(
                "merged duplicate customer {} into {} ('{}')",
                loser.id,
                keeper.id,
                key
            );
        }
        report.groups.push(MergedGroup {
            key,
            kept_id: keeper.id,
            merged_ids,
        });
    }
    Ok(report)
}

/// Merge duplicated equipment rows within one parent.
pub fn merge_sibling_duplicates<S: MasterStore>(
    master: &S,
) -> Result<Vec<SiblingMergeReport>, SyncError> {
    let cabinets = merge_siblings::<Cabinet, S, _>(master, |c| {
        let name = norm(&c.cabinet_name);
        (!name.is_empty()).then(|| format!("{}|{}", c.pm_session_id, name))
    })?;
    let nodes = merge_siblings::<Node, S, _>(master, |n| {
        let address = norm(&n.node_address);
        (!address.is_empty()).then(|| format!("{}|{}", n.cabinet_id, address))
    })?;
    Ok(vec![cabinets, nodes])
}

fn merge_siblings<M, S, F>(master: &S, natural_key: F) -> Result<SiblingMergeReport, SyncError>
where
    M: SyncModel,
    S: MasterStore,
    F: Fn(&M) -> Option<String>,
{
    let live = master.list_live::<M>()?;
    let mut groups: BTreeMap<String, Vec<&M>> = BTreeMap::new();
    for rec in &live {
        if let Some(key) = natural_key(rec) {
            groups.entry(key).or_default().push(rec);
        }
    }

    let mut duplicate_groups = 0usize;
    let mut removed_ids = Vec::new();
    for (_, mut members) in groups {
        if members.len() < 2 {
            continue;
        }
        duplicate_groups += 1;
        members.sort_by_key(|m| m.local_id());
        for dupe in &members[1..] {
            master.hard_delete(M::TABLE, dupe.local_id())?;
            removed_ids.push(dupe.local_id());
        }
    }
    if !removed_ids.is_empty() {
        log::info!(
            "removed {} duplicate {} record(s) in {} group(s)",
            removed_ids.len(),
            M::TABLE,
            duplicate_groups
        );
    }
    Ok(SiblingMergeReport {
        table: M::TABLE.name().to_string(),
        duplicate_groups,
        removed_ids,
    })
}
