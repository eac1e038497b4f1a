//! End-to-end sync properties over two (or three) devices and one master.

mod common;

use cabsync::models::{Cabinet, Customer};
use cabsync::store::local::LocalTable;
use cabsync::store::TableKind;
use cabsync::sync::Guarded;
use cabsync::{MasterStore, SyncError};

use common::*;

fn expect_ok<T>(result: Guarded<T>) -> T {
    match result {
        Guarded::Ok(report) => report,
        Guarded::Blocked { warnings } => panic!("unexpectedly blocked: {:?}", warnings),
    }
}

#[test]
fn push_then_pull_converges_across_devices() {
    let master = master();
    let dev_a = device(&master);
    let dev_b = device(&master);

    let created = create_local(&dev_a, customer("Acme-001"));
    expect_ok(dev_a.push(false).expect("push"));

    dev_b.pull().expect("pull");
    let mirrored: Customer = dev_b
        .local()
        .find_by_uuid(created.uuid.as_deref().expect("uuid"))
        .expect("query")
        .expect("present on device B");

    // Field-for-field equal, id and device_id aside.
    assert_eq!(mirrored.customer_name, created.customer_name);
    assert_eq!(mirrored.city, created.city);
    assert_eq!(mirrored.uuid, created.uuid);
    assert_eq!(mirrored.updated_at, created.updated_at);
    assert_eq!(mirrored.deleted, created.deleted);
    assert_eq!(mirrored.synced, Some(true));

    // A's own copy was confirmed by the master too.
    let back: Customer = dev_a
        .local()
        .find_by_uuid(created.uuid.as_deref().expect("uuid"))
        .expect("query")
        .expect("present on device A");
    assert_eq!(back.synced, Some(true));
}

#[test]
fn pull_and_push_are_idempotent() {
    let master = master();
    let dev_a = device(&master);
    let dev_b = device(&master);

    create_local(&dev_a, customer("One"));
    create_local(&dev_a, customer("Two"));
    let first_push = expect_ok(dev_a.push(false).expect("push"));
    assert_eq!(first_push.pushed_by_table["customers"], 2);

    let second_push = expect_ok(dev_a.push(false).expect("push again"));
    assert_eq!(second_push.pushed_by_table["customers"], 0);

    let first_pull = dev_b.pull().expect("pull");
    assert_eq!(first_pull.inserted_by_table["customers"], 2);

    let second_pull = dev_b.pull().expect("pull again");
    assert_eq!(second_pull.inserted_by_table["customers"], 0);
    assert_eq!(second_pull.updated_by_table["customers"], 0);
}

#[test]
fn tombstones_propagate_and_never_hard_delete() {
    let master = master();
    let dev_a = device(&master);
    let dev_b = device(&master);

    let created = create_local(&dev_a, customer("Doomed"));
    expect_ok(dev_a.push(false).expect("push"));
    dev_b.pull().expect("pull");

    delete_local(&dev_a, created.clone());
    expect_ok(dev_a.push(true).expect("push tombstone"));

    dev_b.pull().expect("pull tombstone");
    let mirrored: Customer = dev_b
        .local()
        .find_by_uuid(created.uuid.as_deref().expect("uuid"))
        .expect("query")
        .expect("tombstone still present");
    assert!(mirrored.deleted);

    // Nothing was hard-removed anywhere.
    let counts = dev_b.local().counts_for(TableKind::Customers).expect("counts");
    assert_eq!(counts.total, 1);
    assert_eq!(counts.tombstoned, 1);
    assert_eq!(master.count(TableKind::Customers).expect("count"), 1);
}

#[test]
fn equal_timestamps_resolve_toward_master() {
    let master = master();
    let dev_a = device(&master);
    let dev_b = device(&master);

    // A publishes its version with a pinned timestamp.
    let stamp = ts(1_750_000_000);
    let published = customer_rec(0, "tie-uuid", "Master Value", stamp);
    dev_a.local().insert_local(&published).expect("insert");
    expect_ok(dev_a.push(false).expect("push"));

    // B independently holds a dirty copy of the same record, same
    // timestamp, different content.
    let mut rival = customer_rec(0, "tie-uuid", "Local Value", stamp);
    rival.synced = Some(false);
    dev_b.local().insert_local(&rival).expect("insert rival");

    dev_b.pull().expect("pull");
    let settled: Customer = dev_b
        .local()
        .find_by_uuid("tie-uuid")
        .expect("query")
        .expect("present");
    assert_eq!(settled.customer_name, "Master Value");
    assert_eq!(settled.synced, Some(true));
}

#[test]
fn clean_equal_timestamp_copy_is_left_alone() {
    let master = master();
    let dev_a = device(&master);
    let dev_b = device(&master);

    let stamp = ts(1_750_000_000);
    dev_a
        .local()
        .insert_local(&customer_rec(0, "tie-uuid", "Same Everywhere", stamp))
        .expect("insert");
    expect_ok(dev_a.push(false).expect("push"));

    dev_b.pull().expect("first pull");
    // Wipe the cursor so the same batch is redelivered.
    dev_b.local().reset_cursors().expect("reset");
    let redelivered = dev_b.pull().expect("second pull");
    assert_eq!(redelivered.inserted_by_table["customers"], 0);
    assert_eq!(redelivered.updated_by_table["customers"], 0);
}

#[test]
fn blank_display_name_is_rejected_then_defaulted() {
    let master = master();
    let dev_a = device(&master);
    let dev_c = device(&master);

    let cust = create_local(&dev_a, customer("Acme-001"));
    let sess = create_local(&dev_a, session(cust.id, "Q3 inspection"));
    create_local(&dev_a, cabinet(cust.id, sess.id, ""));

    let report = expect_ok(dev_a.push(false).expect("push"));
    assert_eq!(report.pushed_by_table["customers"], 1);
    assert_eq!(report.pushed_by_table["pm_sessions"], 1);
    assert_eq!(report.pushed_by_table["cabinets"], 0);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].table, "cabinets");

    // The offending record stays dirty; the batch made forward progress.
    let counts = dev_a.local().counts_for(TableKind::Cabinets).expect("counts");
    assert_eq!(counts.unsynced, 1);

    // Explicit defaulting pass, then retry.
    let fixed = dev_a.default_blank_names().expect("fix names");
    assert_eq!(fixed["cabinets"], 1);
    let retry = expect_ok(dev_a.push(true).expect("push again"));
    assert_eq!(retry.pushed_by_table["cabinets"], 1);
    assert!(retry.errors.is_empty());

    // A third device sees the corrected value.
    dev_c.pull().expect("pull");
    let mirrored: Vec<Cabinet> = dev_c.local().all_rows().expect("rows");
    assert_eq!(mirrored.len(), 1);
    assert_eq!(mirrored[0].cabinet_name, "Unnamed Cabinet");
}

#[test]
fn misrouted_device_is_blocked_until_acknowledged() {
    let master = master();
    let dev_a = device(&master);
    let dev_b = device(&master);

    create_local(&dev_a, customer("Existing"));
    expect_ok(dev_a.push(false).expect("push"));

    // B is empty while the master is not: suspicious, push blocked.
    match dev_b.push(false).expect("push") {
        Guarded::Blocked { warnings } => {
            assert!(warnings.iter().any(|w| w.contains("customers")));
        }
        Guarded::Ok(_) => panic!("expected the guard to block"),
    }

    // Acknowledging proceeds (and pushes nothing).
    let report = expect_ok(dev_b.push(true).expect("push forced"));
    assert_eq!(report.pushed_by_table["customers"], 0);
}

#[test]
fn full_refresh_requires_confirmation_and_rebaselines() {
    let master = master();
    let dev_a = device(&master);
    let dev_b = device(&master);

    create_local(&dev_a, customer("Canonical"));
    expect_ok(dev_a.push(false).expect("push"));

    // B holds junk that never synced.
    create_local(&dev_b, customer("Junk A"));
    create_local(&dev_b, customer("Junk B"));

    match dev_b.full_refresh(false).expect("refresh") {
        Guarded::Blocked { warnings } => assert!(!warnings.is_empty()),
        Guarded::Ok(_) => panic!("unconfirmed refresh must be blocked"),
    }

    let report = match dev_b.full_refresh(true).expect("refresh confirmed") {
        Guarded::Ok(report) => report,
        Guarded::Blocked { warnings } => panic!("confirmed refresh blocked: {:?}", warnings),
    };
    assert_eq!(report.replaced_by_table["customers"], 1);

    let rows: Vec<Customer> = dev_b.local().all_rows().expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].customer_name, "Canonical");
    let counts = dev_b.local().counts_for(TableKind::Customers).expect("counts");
    assert_eq!(counts.unsynced, 0);

    // Cursor is at the snapshot: the next pull is a no-op.
    let pull = dev_b.pull().expect("pull");
    assert_eq!(pull.inserted_by_table["customers"], 0);
    assert_eq!(pull.updated_by_table["customers"], 0);
}

#[test]
fn initial_migration_republishes_everything() {
    let master = master();
    let dev_a = device(&master);

    // Legacy rows: no uuid, already marked synced by an old app version.
    let mut legacy = customer("Legacy Plant");
    legacy.synced = Some(true);
    dev_a.local().insert_local(&legacy).expect("insert");

    let report = dev_a.initial_migration().expect("migration");
    assert_eq!(report.uuids_assigned, 1);
    assert_eq!(report.records_marked, 1);

    let push = expect_ok(dev_a.push(false).expect("push"));
    assert_eq!(push.pushed_by_table["customers"], 1);
    assert_eq!(master.count(TableKind::Customers).expect("count"), 1);
}

#[test]
fn shutdown_lets_session_finish_and_refuses_new_ones() {
    let master = master();
    let dev_a = device(&master);
    create_local(&dev_a, customer("Acme"));
    expect_ok(dev_a.push(false).expect("push"));

    dev_a.shutdown();
    match dev_a.pull() {
        Err(SyncError::ShuttingDown) => {}
        other => panic!("expected ShuttingDown, got {:?}", other),
    }
}
