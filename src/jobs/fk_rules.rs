//! Pattern-based foreign-key correction.
//!
//! Some fleets accumulate cabinets filed under the wrong customer (typoed
//! names, pre-merge imports). An operator-supplied rule table maps a
//! cabinet-name pattern to the customer it belongs to; each rule resolves
//! its customer by exact case-insensitive name and its cabinets by a
//! case-insensitive regex over the human-entered name field. Matching on
//! free text is ambiguous by construction, so anything that does not
//! resolve uniquely is reported and left untouched, never guessed.
//!
//! This is deliberately a flat rule table evaluated once per run, not a
//! rules engine.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::models::{Cabinet, Customer};
use crate::store::{MasterStore, ParentKey, TableKind};

/// One correction rule: cabinets matching `pattern` belong to the customer
/// named `customer_name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FkRule {
    pub pattern: String,
    pub customer_name: String,
}

#[derive(Debug, Serialize)]
pub struct FkChange {
    pub cabinet_id: i32,
    pub cabinet_name: String,
    pub from_customer: i32,
    pub to_customer: i32,
}

#[derive(Debug, Default, Serialize)]
pub struct FkCorrectionReport {
    pub reassigned: Vec<FkChange>,
    /// Rules or cabinets that could not be uniquely resolved, verbatim.
    pub ambiguous: Vec<String>,
}

pub fn load_rules(path: &Path) -> Result<Vec<FkRule>, SyncError> {
    let raw = fs::read_to_string(path).map_err(|e| {
        SyncError::Configuration(format!("cannot read rules {}: {}", path.display(), e))
    })?;
    Ok(serde_json::from_str(&raw)?)
}

struct ResolvedRule {
    regex: Regex,
    target_id: i32,
}

pub fn correct_foreign_keys<S: MasterStore>(
    master: &S,
    rules: &[FkRule],
) -> Result<FkCorrectionReport, SyncError> {
    let customers = master.list_live::<Customer>()?;
    let cabinets = master.list_live::<Cabinet>()?;
    let mut report = FkCorrectionReport::default();

    let mut resolved = Vec::new();
    for rule in rules {
        let target = match resolve_customer(&customers, &rule.customer_name) {
            Ok(target) => target,
            Err(e) => {
                report
                    .ambiguous
                    .push(format!("rule '{}': {}", rule.pattern, e));
                continue;
            }
        };
        match RegexBuilder::new(&rule.pattern).case_insensitive(true).build() {
            Ok(regex) => resolved.push(ResolvedRule {
                regex,
                target_id: target.id,
            }),
            Err(e) => report
                .ambiguous
                .push(format!("rule '{}': invalid pattern: {}", rule.pattern, e)),
        }
    }

    for cabinet in &cabinets {
        let targets: BTreeSet<i32> = resolved
            .iter()
            .filter(|r| r.regex.is_match(&cabinet.cabinet_name))
            .map(|r| r.target_id)
            .collect();
        match targets.len() {
            0 => {}
            1 => {
                let target = *targets.first().unwrap_or(&cabinet.customer_id);
                if cabinet.customer_id != target {
                    master.set_parent(TableKind::Cabinets, cabinet.id, ParentKey::Customer, target)?;
                    log::info!(
                        "fk correction: cabinet {} '{}' moved from customer {} to {}",
                        cabinet.id,
                        cabinet.cabinet_name,
                        cabinet.customer_id,
                        target
                    );
                    report.reassigned.push(FkChange {
                        cabinet_id: cabinet.id,
                        cabinet_name: cabinet.cabinet_name.clone(),
                        from_customer: cabinet.customer_id,
                        to_customer: target,
                    });
                }
            }
            n => report.ambiguous.push(format!(
                "cabinet {} '{}' matches rules for {} different customers; left untouched",
                cabinet.id, cabinet.cabinet_name, n
            )),
        }
    }
    Ok(report)
}

fn resolve_customer<'a>(
    customers: &'a [Customer],
    name: &str,
) -> Result<&'a Customer, SyncError> {
    let matches: Vec<&Customer> = customers
        .iter()
        .filter(|c| c.customer_name.trim().eq_ignore_ascii_case(name.trim()))
        .collect();
    match matches.len() {
        1 => Ok(matches[0]),
        0 => Err(SyncError::AmbiguousMatch(format!(
            "no live customer named '{}'",
            name
        ))),
        n => Err(SyncError::AmbiguousMatch(format!(
            "'{}' matches {} live customers (ids {:?})",
            name,
            n,
            matches.iter().map(|c| c.id).collect::<Vec<_>>()
        ))),
    }
}
