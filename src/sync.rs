//! The sync orchestrator.
//!
//! One [`SyncEngine`] per process owns the device's local store and one
//! master-store adapter, and serializes sync sessions through an internal
//! single-flight guard: interleaved pull/push against the same local store
//! would corrupt cursor bookkeeping and dirty flags. There is no implicit
//! global instance; callers hold the engine and pass it by reference.
//!
//! A session walks the tables in parent-before-child order:
//!
//! ```text
//! Idle -> Connecting -> { Pulling -> Merging } -> { Selecting-Dirty -> Pushing } -> Idle
//! ```
//!
//! Conflict policy: latest `updated_at` wins; on equal timestamps the
//! master wins (a dirty local row with an equal timestamp is overwritten on
//! pull, and a push overwrites a master row with an equal timestamp). Both
//! directions converge toward the master's eventual state. Deletions are
//! ordinary field changes (`deleted = 1`); ordinary sync never hard-deletes
//! anything.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{NaiveDateTime, Utc};
use serde::Serialize;

use crate::audit;
use crate::error::SyncError;
use crate::guard::{self, SafetyReport};
use crate::identity;
use crate::models::{Cabinet, Customer, Measurement, Node, PmSession, SyncMeta, SyncModel};
use crate::settings::MasterSettings;
use crate::store::local::{LocalStore, LocalTable};
use crate::store::master::HttpMasterStore;
use crate::store::{DeleteFilter, MasterStore, TableCounts, TableKind};

/// A failure confined to one record (or one table), collected into the
/// operation report instead of aborting the batch.
#[derive(Debug, Clone, Serialize)]
pub struct RecordError {
    pub table: String,
    pub uuid: Option<String>,
    pub message: String,
}

#[derive(Debug, Default, Serialize)]
pub struct PullReport {
    pub inserted_by_table: BTreeMap<String, usize>,
    pub updated_by_table: BTreeMap<String, usize>,
    pub errors: Vec<RecordError>,
}

#[derive(Debug, Default, Serialize)]
pub struct PushReport {
    pub pushed_by_table: BTreeMap<String, usize>,
    pub errors: Vec<RecordError>,
}

#[derive(Debug, Serialize)]
pub struct FullSyncReport {
    pub pull: PullReport,
    pub push: PushReport,
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub configured: bool,
    pub reachable: bool,
    pub device_id: Option<String>,
    pub tables: BTreeMap<String, TableCounts>,
}

#[derive(Debug, Default, Serialize)]
pub struct RefreshReport {
    pub replaced_by_table: BTreeMap<String, usize>,
}

#[derive(Debug, Default, Serialize)]
pub struct MigrationReport {
    pub uuids_assigned: usize,
    pub records_marked: usize,
}

#[derive(Debug, Serialize)]
pub struct DeviceInfo {
    pub device_id: String,
    pub host: String,
    pub platform: String,
    pub ip_address: Option<String>,
}

/// Outcome of an operation subject to the safety guard. The caller decides
/// whether to acknowledge the warnings and retry.
#[derive(Debug)]
pub enum Guarded<T> {
    Ok(T),
    Blocked { warnings: Vec<String> },
}

#[derive(Debug, PartialEq)]
enum TableOutcome {
    Continue,
    /// Master went away mid-session; stop after the current table.
    Abort,
}

enum Applied {
    Inserted,
    Updated,
    Unchanged,
}

impl StatusReport {
    /// Status for a device that has never been configured: local counts
    /// only, nothing reachable.
    pub fn unconfigured(local: &LocalStore) -> Result<Self, SyncError> {
        let mut tables = BTreeMap::new();
        for table in TableKind::ALL {
            tables.insert(table.name().to_string(), local.counts_for(table)?);
        }
        Ok(StatusReport {
            configured: false,
            reachable: false,
            device_id: local.meta_get("device_id")?,
            tables,
        })
    }
}

/// Verify a master target with a live connection test, then persist it.
/// The target is never committed untested.
pub fn configure(local: &LocalStore, target: MasterSettings) -> Result<HttpMasterStore, SyncError> {
    let master = HttpMasterStore::connect(&target)?;
    master.ping()?;
    target.save()?;
    audit::record(local, &local.device_id()?, "configure", Some(&target.url), None)?;
    log::info!("master store configured: {}", target.url);
    Ok(master)
}

pub struct SyncEngine<S: MasterStore> {
    local: LocalStore,
    master: S,
    device_id: String,
    session: Mutex<()>,
    shutdown: AtomicBool,
}

impl<S: MasterStore> SyncEngine<S> {
    pub fn new(local: LocalStore, master: S) -> Result<Self, SyncError> {
        let device_id = local.device_id()?;
        Ok(SyncEngine {
            local,
            master,
            device_id,
            session: Mutex::new(()),
            shutdown: AtomicBool::new(false),
        })
    }

    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    pub fn master(&self) -> &S {
        &self.master
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Stop accepting new sync sessions. The in-flight session, if any,
    /// finishes its current table and returns normally.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        log::info!("sync engine shutting down; new sessions refused");
    }

    fn begin_session(&self) -> Result<MutexGuard<'_, ()>, SyncError> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(SyncError::ShuttingDown);
        }
        let session = self.session.lock().unwrap();
        // Re-check: shutdown may have arrived while we queued on the lock.
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(SyncError::ShuttingDown);
        }
        Ok(session)
    }

    /// Reachability probe with bounded timeouts; mutates nothing.
    pub fn test_connection(&self) -> Result<(), SyncError> {
        self.master.ping()
    }

    // -- pull --------------------------------------------------------------

    /// Fetch every master record newer than the per-table cursor and merge
    /// it into the local store.
    pub fn pull(&self) -> Result<PullReport, SyncError> {
        let _session = self.begin_session()?;
        self.master.ping()?;
        let mut report = PullReport::default();
        self.pull_all(&mut report)?;
        Ok(report)
    }

    fn pull_all(&self, report: &mut PullReport) -> Result<(), SyncError> {
        if self.pull_table::<Customer>(report)? == TableOutcome::Abort {
            return Ok(());
        }
        if self.pull_table::<PmSession>(report)? == TableOutcome::Abort {
            return Ok(());
        }
        if self.pull_table::<Cabinet>(report)? == TableOutcome::Abort {
            return Ok(());
        }
        if self.pull_table::<Node>(report)? == TableOutcome::Abort {
            return Ok(());
        }
        self.pull_table::<Measurement>(report)?;
        Ok(())
    }

    fn pull_table<M: SyncModel>(&self, report: &mut PullReport) -> Result<TableOutcome, SyncError>
    where
        LocalStore: LocalTable<M>,
    {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(SyncError::ShuttingDown);
        }
        let table = M::TABLE;
        let cursor = self.local.cursor(table)?;
        let batch: Vec<M> = match self.master.fetch_since(cursor) {
            Ok(batch) => batch,
            Err(SyncError::Connectivity(msg)) => {
                log::warn!("pull {}: master unreachable: {}", table, msg);
                report.errors.push(RecordError {
                    table: table.name().to_string(),
                    uuid: None,
                    message: format!("pull aborted: {}", msg),
                });
                return Ok(TableOutcome::Abort);
            }
            Err(e) => return Err(e),
        };

        let mut inserted = 0usize;
        let mut updated = 0usize;
        let mut failed = 0usize;
        let mut max_seen: Option<NaiveDateTime> = None;

        for rec in &batch {
            let ts = rec.updated_at();
            if max_seen.is_none_or(|m| ts > m) {
                max_seen = Some(ts);
            }
            if identity::is_missing_uuid(rec.uuid()) {
                // Unmatchable; the null-identity cleanup job removes these
                // master-side.
                log::debug!("pull {}: skipping record without uuid", table);
                continue;
            }
            match self.apply_remote(cursor, rec) {
                Ok(Applied::Inserted) => inserted += 1,
                Ok(Applied::Updated) => updated += 1,
                Ok(Applied::Unchanged) => {}
                Err(e) => {
                    failed += 1;
                    report.errors.push(RecordError {
                        table: table.name().to_string(),
                        uuid: rec.uuid().map(String::from),
                        message: e.to_string(),
                    });
                }
            }
        }

        // The cursor only advances once the whole batch is durably applied;
        // a partial batch is redelivered next pull, which is idempotent.
        if failed == 0 {
            if let Some(ts) = max_seen {
                self.local.set_cursor(table, ts)?;
            }
        } else {
            log::warn!(
                "pull {}: {} record(s) failed; cursor not advanced",
                table,
                failed
            );
        }

        report
            .inserted_by_table
            .insert(table.name().to_string(), inserted);
        report
            .updated_by_table
            .insert(table.name().to_string(), updated);
        log::info!(
            "pull {}: {} fetched, {} inserted, {} updated",
            table,
            batch.len(),
            inserted,
            updated
        );
        Ok(TableOutcome::Continue)
    }

    fn apply_remote<M: SyncModel>(
        &self,
        cursor: Option<NaiveDateTime>,
        rec: &M,
    ) -> Result<Applied, SyncError>
    where
        LocalStore: LocalTable<M>,
    {
        match self.local.find_by_uuid(rec.uuid().unwrap_or(""))? {
            None => {
                if cursor.is_none() && rec.deleted() {
                    // First pull: don't materialize deletes the device
                    // never saw.
                    return Ok(Applied::Unchanged);
                }
                self.local.insert_remote(rec)?;
                Ok(Applied::Inserted)
            }
            Some(local_copy) => {
                let newer = rec.updated_at() > local_copy.updated_at();
                let tie_to_master = rec.updated_at() == local_copy.updated_at()
                    && identity::needs_sync(&local_copy);
                if newer || tie_to_master {
                    self.local.overwrite_remote(local_copy.local_id(), rec)?;
                    Ok(Applied::Updated)
                } else {
                    // Local is newer (or an already-converged tie); it will
                    // be pushed if dirty.
                    Ok(Applied::Unchanged)
                }
            }
        }
    }

    // -- push --------------------------------------------------------------

    /// Upsert every dirty local record into the master. Per-record failures
    /// are collected; the batch always makes forward progress on the
    /// records that succeed.
    pub fn push(&self, acknowledge_warnings: bool) -> Result<Guarded<PushReport>, SyncError> {
        let _session = self.begin_session()?;
        self.master.ping()?;
        if !acknowledge_warnings {
            let safety = guard::safety_check(&self.local, &self.master)?;
            if !safety.safe {
                return Ok(Guarded::Blocked {
                    warnings: safety.warnings,
                });
            }
        }
        let mut report = PushReport::default();
        self.push_all(&mut report)?;
        Ok(Guarded::Ok(report))
    }

    fn push_all(&self, report: &mut PushReport) -> Result<(), SyncError> {
        if self.push_table::<Customer>(report)? == TableOutcome::Abort {
            return Ok(());
        }
        if self.push_table::<PmSession>(report)? == TableOutcome::Abort {
            return Ok(());
        }
        if self.push_table::<Cabinet>(report)? == TableOutcome::Abort {
            return Ok(());
        }
        if self.push_table::<Node>(report)? == TableOutcome::Abort {
            return Ok(());
        }
        self.push_table::<Measurement>(report)?;
        Ok(())
    }

    fn push_table<M: SyncModel>(&self, report: &mut PushReport) -> Result<TableOutcome, SyncError>
    where
        LocalStore: LocalTable<M>,
    {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(SyncError::ShuttingDown);
        }
        let table = M::TABLE;
        let dirty: Vec<M> = self.local.unsynced()?;
        let mut pushed = 0usize;

        for rec in &dirty {
            if identity::is_missing_uuid(rec.uuid()) {
                report.errors.push(RecordError {
                    table: table.name().to_string(),
                    uuid: None,
                    message: format!(
                        "record id {} has no uuid; run initial-migration first",
                        rec.local_id()
                    ),
                });
                continue;
            }
            match self.master.upsert(rec) {
                Ok(_) => {
                    // Only after the confirmed round-trip; a timeout costs
                    // a retry, never the dirty flag.
                    self.local.mark_synced(rec.local_id())?;
                    pushed += 1;
                }
                Err(SyncError::Connectivity(msg)) => {
                    log::warn!("push {}: master unreachable: {}", table, msg);
                    report.errors.push(RecordError {
                        table: table.name().to_string(),
                        uuid: rec.uuid().map(String::from),
                        message: format!("push aborted: {}", msg),
                    });
                    report
                        .pushed_by_table
                        .insert(table.name().to_string(), pushed);
                    return Ok(TableOutcome::Abort);
                }
                Err(
                    e @ (SyncError::Validation { .. }
                    | SyncError::Master { .. }
                    | SyncError::Integrity(_)),
                ) => {
                    report.errors.push(RecordError {
                        table: table.name().to_string(),
                        uuid: rec.uuid().map(String::from),
                        message: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        report
            .pushed_by_table
            .insert(table.name().to_string(), pushed);
        log::info!("push {}: {} dirty, {} pushed", table, dirty.len(), pushed);
        Ok(TableOutcome::Continue)
    }

    // -- combined operations -----------------------------------------------

    /// Pull, then push. Pulling first minimizes the chance of pushing a
    /// record the master has already re-deleted elsewhere.
    pub fn full_sync(
        &self,
        acknowledge_warnings: bool,
    ) -> Result<Guarded<FullSyncReport>, SyncError> {
        let _session = self.begin_session()?;
        self.master.ping()?;
        if !acknowledge_warnings {
            let safety = guard::safety_check(&self.local, &self.master)?;
            if !safety.safe {
                return Ok(Guarded::Blocked {
                    warnings: safety.warnings,
                });
            }
        }
        let mut pull = PullReport::default();
        self.pull_all(&mut pull)?;
        let mut push = PushReport::default();
        self.push_all(&mut push)?;
        Ok(Guarded::Ok(FullSyncReport { pull, push }))
    }

    /// Destructive re-baseline: replace all local synchronized data with
    /// the master snapshot. Requires explicit confirmation; unacknowledged
    /// safety warnings are returned instead of being acted on.
    pub fn full_refresh(&self, confirmed: bool) -> Result<Guarded<RefreshReport>, SyncError> {
        let _session = self.begin_session()?;
        self.master.ping()?;
        let safety = guard::safety_check(&self.local, &self.master)?;
        if !confirmed {
            let mut warnings = safety.warnings;
            warnings.push(
                "full refresh replaces all local data with the master snapshot; \
                 explicit confirmation required"
                    .to_string(),
            );
            return Ok(Guarded::Blocked { warnings });
        }
        for warning in &safety.warnings {
            log::warn!("full refresh proceeding despite: {}", warning);
        }

        self.local.reset_cursors()?;
        let mut report = RefreshReport::default();
        self.refresh_table::<Customer>(&mut report)?;
        self.refresh_table::<PmSession>(&mut report)?;
        self.refresh_table::<Cabinet>(&mut report)?;
        self.refresh_table::<Node>(&mut report)?;
        self.refresh_table::<Measurement>(&mut report)?;

        audit::record(
            &self.local,
            &self.device_id,
            "full_refresh",
            None,
            Some(&format!("{:?}", report.replaced_by_table)),
        )?;
        log::info!("full refresh complete: {:?}", report.replaced_by_table);
        Ok(Guarded::Ok(report))
    }

    fn refresh_table<M: SyncModel>(&self, report: &mut RefreshReport) -> Result<(), SyncError>
    where
        LocalStore: LocalTable<M>,
    {
        let table = M::TABLE;
        let snapshot: Vec<M> = self.master.fetch_snapshot()?;
        LocalTable::<M>::wipe(&self.local)?;
        let mut max_seen: Option<NaiveDateTime> = None;
        let mut replaced = 0usize;
        for rec in &snapshot {
            if identity::is_missing_uuid(rec.uuid()) {
                log::debug!("refresh {}: skipping record without uuid", table);
                continue;
            }
            self.local.insert_remote(rec)?;
            replaced += 1;
            let ts = rec.updated_at();
            if max_seen.is_none_or(|m| ts > m) {
                max_seen = Some(ts);
            }
        }
        // Re-baseline the cursor at the snapshot so the next pull is
        // incremental again.
        if let Some(ts) = max_seen {
            self.local.set_cursor(table, ts)?;
        }
        report
            .replaced_by_table
            .insert(table.name().to_string(), replaced);
        Ok(())
    }

    // -- bootstrap & migration ---------------------------------------------

    /// Assign uuids to legacy rows lacking one. Idempotent.
    pub fn generate_missing_uuids(&self) -> Result<usize, SyncError> {
        let _session = self.begin_session()?;
        self.assign_uuids_all()
    }

    /// One-time bootstrap for a device whose data predates sync: give every
    /// row a uuid, then force everything dirty so the next push republishes
    /// the entire local state.
    pub fn initial_migration(&self) -> Result<MigrationReport, SyncError> {
        let _session = self.begin_session()?;
        let uuids_assigned = self.assign_uuids_all()?;
        let mut records_marked = 0usize;
        records_marked += LocalTable::<Customer>::mark_all_unsynced(&self.local)?;
        records_marked += LocalTable::<PmSession>::mark_all_unsynced(&self.local)?;
        records_marked += LocalTable::<Cabinet>::mark_all_unsynced(&self.local)?;
        records_marked += LocalTable::<Node>::mark_all_unsynced(&self.local)?;
        records_marked += LocalTable::<Measurement>::mark_all_unsynced(&self.local)?;

        audit::record(
            &self.local,
            &self.device_id,
            "initial_migration",
            None,
            Some(&format!(
                "{} uuids assigned, {} records marked",
                uuids_assigned, records_marked
            )),
        )?;
        log::info!(
            "initial migration: {} uuids assigned, {} records marked for push",
            uuids_assigned,
            records_marked
        );
        Ok(MigrationReport {
            uuids_assigned,
            records_marked,
        })
    }

    fn assign_uuids_all(&self) -> Result<usize, SyncError> {
        let mut total = 0usize;
        total += LocalTable::<Customer>::assign_missing_uuids(&self.local)?;
        total += LocalTable::<PmSession>::assign_missing_uuids(&self.local)?;
        total += LocalTable::<Cabinet>::assign_missing_uuids(&self.local)?;
        total += LocalTable::<Node>::assign_missing_uuids(&self.local)?;
        total += LocalTable::<Measurement>::assign_missing_uuids(&self.local)?;
        Ok(total)
    }

    // -- read-only & operator surface --------------------------------------

    /// Per-table counts and reachability; never mutates state.
    pub fn status(&self) -> Result<StatusReport, SyncError> {
        let reachable = self.master.ping().is_ok();
        let mut tables = BTreeMap::new();
        for table in TableKind::ALL {
            tables.insert(table.name().to_string(), self.local.counts_for(table)?);
        }
        Ok(StatusReport {
            configured: true,
            reachable,
            device_id: Some(self.device_id.clone()),
            tables,
        })
    }

    pub fn safety_check(&self) -> Result<SafetyReport, SyncError> {
        self.master.ping()?;
        guard::safety_check(&self.local, &self.master)
    }

    /// Operator escape hatch: tombstone local records matching the filter.
    /// The deletion propagates like any other change; nothing is
    /// hard-deleted here. Audited.
    pub fn delete_records(
        &self,
        table: TableKind,
        filter: &DeleteFilter,
    ) -> Result<usize, SyncError> {
        let _session = self.begin_session()?;
        if filter.uuid.is_none() && filter.name_like.is_none() {
            return Err(SyncError::Configuration(
                "refusing to delete without a filter; pass a uuid or a name pattern".to_string(),
            ));
        }
        let n = self
            .local
            .soft_delete_matching_in(table, filter, Utc::now().naive_utc())?;
        audit::record(
            &self.local,
            &self.device_id,
            "delete_records",
            Some(table.name()),
            Some(&format!("{:?} matched {}", filter, n)),
        )?;
        log::warn!("operator delete: {} record(s) tombstoned in {}", n, table);
        Ok(n)
    }

    /// The explicit defaulting pass for master-side validation failures:
    /// replace empty display fields with a fallback and mark the rows dirty
    /// for the next push.
    pub fn default_blank_names(&self) -> Result<BTreeMap<String, usize>, SyncError> {
        let _session = self.begin_session()?;
        let now = Utc::now().naive_utc();
        let mut fixed = BTreeMap::new();
        fixed.insert(
            TableKind::Customers.name().to_string(),
            LocalTable::<Customer>::default_blank_display(
                &self.local,
                TableKind::Customers.fallback_display(),
                now,
            )?,
        );
        fixed.insert(
            TableKind::PmSessions.name().to_string(),
            LocalTable::<PmSession>::default_blank_display(
                &self.local,
                TableKind::PmSessions.fallback_display(),
                now,
            )?,
        );
        fixed.insert(
            TableKind::Cabinets.name().to_string(),
            LocalTable::<Cabinet>::default_blank_display(
                &self.local,
                TableKind::Cabinets.fallback_display(),
                now,
            )?,
        );
        fixed.insert(
            TableKind::Nodes.name().to_string(),
            LocalTable::<Node>::default_blank_display(
                &self.local,
                TableKind::Nodes.fallback_display(),
                now,
            )?,
        );
        fixed.insert(
            TableKind::Measurements.name().to_string(),
            LocalTable::<Measurement>::default_blank_display(
                &self.local,
                TableKind::Measurements.fallback_display(),
                now,
            )?,
        );
        let total: usize = fixed.values().sum();
        if total > 0 {
            audit::record(
                &self.local,
                &self.device_id,
                "default_blank_names",
                None,
                Some(&format!("{} record(s) defaulted", total)),
            )?;
        }
        Ok(fixed)
    }

    pub fn device_info(&self) -> Result<DeviceInfo, SyncError> {
        collect_device_info(&self.local)
    }
}

/// Identity and platform facts for this device; needs no master store.
pub fn collect_device_info(local: &LocalStore) -> Result<DeviceInfo, SyncError> {
    Ok(DeviceInfo {
        device_id: local.device_id()?,
        host: sysinfo::System::host_name().unwrap_or_else(|| "unknown".to_string()),
        platform: format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
        ip_address: local_ip_address::local_ip().ok().map(|ip| ip.to_string()),
    })
}
