//! Audit trail for destructive operations.
//!
//! Full refreshes, operator deletes, migrations and reconciliation runs
//! leave a row in the local `audit_log` table so a wiped or rewritten store
//! can be traced back to the action that did it.

use chrono::Utc;
use diesel::prelude::*;

use crate::error::SyncError;
use crate::schema::audit_log;
use crate::store::local::LocalStore;

#[derive(Insertable)]
#[diesel(table_name = audit_log)]
struct NewAuditEntry<'a> {
    actor: &'a str,
    action_type: &'a str,
    target: Option<&'a str>,
    details: Option<&'a str>,
    created_at: chrono::NaiveDateTime,
}

pub fn record(
    local: &LocalStore,
    actor: &str,
    action_type: &str,
    target: Option<&str>,
    details: Option<&str>,
) -> Result<(), SyncError> {
    let mut conn = local.conn()?;
    let entry = NewAuditEntry {
        actor,
        action_type,
        target,
        details,
        created_at: Utc::now().naive_utc(),
    };
    diesel::insert_into(audit_log::table)
        .values(&entry)
        .execute(&mut conn)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_are_appended() {
        let local = LocalStore::open_in_memory().expect("open");
        record(&local, "tablet-1", "full_refresh", None, Some("5 tables")).expect("audit");
        record(&local, "tablet-1", "delete_records", Some("cabinets"), None).expect("audit");

        let mut conn = local.conn().expect("conn");
        let n: i64 = audit_log::table.count().get_result(&mut conn).expect("count");
        assert_eq!(n, 2);
    }
}
