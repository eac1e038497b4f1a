//! Device-local SQLite store.
//!
//! Thin Diesel wrapper owning the connection pool, the embedded schema
//! migrations, the per-table sync primitives and the `sync_metadata`
//! key/value table holding pull cursors and the persisted device id. The
//! local store is owned exclusively by its device; nothing here talks to
//! the network.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use uuid::Uuid;

use crate::error::SyncError;
use crate::models::{
    Cabinet, Customer, Measurement, NewCabinet, NewCustomer, NewMeasurement, NewNode,
    NewPmSession, Node, PmSession,
};
use crate::store::{DeleteFilter, TableCounts, TableKind};

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;
pub type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

const CURSOR_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";
const DEVICE_ID_KEY: &str = "device_id";

diesel::define_sql_function! {
    fn last_insert_rowid() -> diesel::sql_types::Integer;
}

/// Per-table sync primitives of the local store. Implemented for every
/// synchronized table by [`local_table_impl!`]; the orchestrator works
/// against this interface only.
pub trait LocalTable<M> {
    /// First record carrying this uuid, tombstoned or not.
    fn find_by_uuid(&self, uuid: &str) -> Result<Option<M>, SyncError>;

    /// Insert a record created on this device; returns the assigned id.
    /// Callers stamp the record through [`crate::identity::prepare_new`]
    /// first.
    fn insert_local(&self, rec: &M) -> Result<i32, SyncError>;

    /// Persist a locally modified record verbatim. Callers stamp it through
    /// [`crate::identity::prepare_update`] or
    /// [`crate::identity::mark_deleted`] first.
    fn update_local(&self, rec: &M) -> Result<(), SyncError>;

    /// Insert a record received from the master, keeping the master's id
    /// when that id is free locally. The stored row is marked synced.
    fn insert_remote(&self, rec: &M) -> Result<(), SyncError>;

    /// Overwrite all fields of a local row with the master's version and
    /// mark it synced.
    fn overwrite_remote(&self, local_id: i32, rec: &M) -> Result<(), SyncError>;

    /// Records holding changes the master has not confirmed (tombstoned
    /// ones included — deletions must propagate).
    fn unsynced(&self) -> Result<Vec<M>, SyncError>;

    fn all_rows(&self) -> Result<Vec<M>, SyncError>;

    fn mark_synced(&self, local_id: i32) -> Result<(), SyncError>;

    fn counts(&self) -> Result<TableCounts, SyncError>;

    /// Delete every row. Only full refresh uses this.
    fn wipe(&self) -> Result<usize, SyncError>;

    /// Give a uuid to legacy rows lacking one; returns how many were fixed.
    fn assign_missing_uuids(&self) -> Result<usize, SyncError>;

    /// Force `synced = 0` on all rows so the next push republishes the
    /// table.
    fn mark_all_unsynced(&self) -> Result<usize, SyncError>;

    /// Tombstone rows matching the operator filter; returns how many.
    fn soft_delete_matching(
        &self,
        filter: &DeleteFilter,
        now: NaiveDateTime,
    ) -> Result<usize, SyncError>;

    /// Replace empty display values with a fallback and mark the rows
    /// dirty. The explicit defaulting pass for master-side validation
    /// failures; the sync path itself never rewrites data.
    fn default_blank_display(
        &self,
        fallback: &str,
        now: NaiveDateTime,
    ) -> Result<usize, SyncError>;
}

pub struct LocalStore {
    pool: DbPool,
}

impl LocalStore {
    /// Open (creating and migrating if needed) the device store at `path`.
    pub fn open(path: &str) -> Result<Self, SyncError> {
        if let Some(dir) = std::path::Path::new(path).parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir).map_err(|e| {
                    SyncError::Configuration(format!("cannot create {}: {}", dir.display(), e))
                })?;
            }
        }
        let manager = ConnectionManager::<SqliteConnection>::new(path);
        let pool = Pool::builder().build(manager)?;
        let store = LocalStore { pool };
        store.run_migrations()?;
        Ok(store)
    }

    /// In-memory store for tests and simulation. The pool is pinned to a
    /// single connection so the `:memory:` database is actually shared.
    pub fn open_in_memory() -> Result<Self, SyncError> {
        let manager = ConnectionManager::<SqliteConnection>::new(":memory:");
        let pool = Pool::builder().max_size(1).build(manager)?;
        let store = LocalStore { pool };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<(), SyncError> {
        let mut conn = self.conn()?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| SyncError::Migration(e.to_string()))?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> Result<DbConn, SyncError> {
        Ok(self.pool.get()?)
    }

    // -- sync_metadata -----------------------------------------------------

    pub fn meta_get(&self, meta_key: &str) -> Result<Option<String>, SyncError> {
        use crate::schema::sync_metadata::dsl;
        let mut conn = self.conn()?;
        let found = dsl::sync_metadata
            .find(meta_key)
            .select(dsl::value)
            .first::<String>(&mut conn)
            .optional()?;
        Ok(found)
    }

    pub fn meta_set(&self, meta_key: &str, meta_value: &str) -> Result<(), SyncError> {
        use crate::schema::sync_metadata::dsl;
        let mut conn = self.conn()?;
        diesel::replace_into(dsl::sync_metadata)
            .values((dsl::key.eq(meta_key), dsl::value.eq(meta_value)))
            .execute(&mut conn)?;
        Ok(())
    }

    /// Last-pull cursor for one table, if any pull ever completed.
    pub fn cursor(&self, table: TableKind) -> Result<Option<NaiveDateTime>, SyncError> {
        let raw = self.meta_get(&cursor_key(table))?;
        match raw {
            None => Ok(None),
            Some(s) => NaiveDateTime::parse_from_str(&s, CURSOR_FORMAT)
                .map(Some)
                .map_err(|e| SyncError::Integrity(format!("corrupt cursor for {}: {}", table, e))),
        }
    }

    pub fn set_cursor(&self, table: TableKind, at: NaiveDateTime) -> Result<(), SyncError> {
        self.meta_set(&cursor_key(table), &at.format(CURSOR_FORMAT).to_string())
    }

    /// Drop all pull cursors (full refresh re-baseline).
    pub fn reset_cursors(&self) -> Result<(), SyncError> {
        use crate::schema::sync_metadata::dsl;
        let mut conn = self.conn()?;
        diesel::delete(dsl::sync_metadata.filter(dsl::key.like("cursor:%")))
            .execute(&mut conn)?;
        Ok(())
    }

    /// The persisted device id, generated and stored on first use.
    pub fn device_id(&self) -> Result<String, SyncError> {
        if let Some(existing) = self.meta_get(DEVICE_ID_KEY)? {
            return Ok(existing);
        }
        let fresh = crate::identity::generate_device_id();
        self.meta_set(DEVICE_ID_KEY, &fresh)?;
        log::info!("assigned device id {}", fresh);
        Ok(fresh)
    }

    // -- table dispatch ----------------------------------------------------

    pub fn counts_for(&self, table: TableKind) -> Result<TableCounts, SyncError> {
        match table {
            TableKind::Customers => LocalTable::<Customer>::counts(self),
            TableKind::PmSessions => LocalTable::<PmSession>::counts(self),
            TableKind::Cabinets => LocalTable::<Cabinet>::counts(self),
            TableKind::Nodes => LocalTable::<Node>::counts(self),
            TableKind::Measurements => LocalTable::<Measurement>::counts(self),
        }
    }

    pub fn soft_delete_matching_in(
        &self,
        table: TableKind,
        filter: &DeleteFilter,
        now: NaiveDateTime,
    ) -> Result<usize, SyncError> {
        match table {
            TableKind::Customers => LocalTable::<Customer>::soft_delete_matching(self, filter, now),
            TableKind::PmSessions => {
                LocalTable::<PmSession>::soft_delete_matching(self, filter, now)
            }
            TableKind::Cabinets => LocalTable::<Cabinet>::soft_delete_matching(self, filter, now),
            TableKind::Nodes => LocalTable::<Node>::soft_delete_matching(self, filter, now),
            TableKind::Measurements => {
                LocalTable::<Measurement>::soft_delete_matching(self, filter, now)
            }
        }
    }
}

fn cursor_key(table: TableKind) -> String {
    format!("cursor:{}", table.name())
}

fn missing_uuid_filter() -> &'static str {
    "uuid IS NULL OR uuid = '' OR uuid = 'null'"
}

macro_rules! local_table_impl {
    ($table:ident, $model:ty, $new:ty, $display:ident) => {
        impl LocalTable<$model> for LocalStore {
            fn find_by_uuid(&self, uuid_val: &str) -> Result<Option<$model>, SyncError> {
                use crate::schema::$table::dsl;
                let mut conn = self.conn()?;
                let found = dsl::$table
                    .filter(dsl::uuid.eq(uuid_val))
                    .order(dsl::id.asc())
                    .select(<$model>::as_select())
                    .first::<$model>(&mut conn)
                    .optional()?;
                Ok(found)
            }

            fn insert_local(&self, rec: &$model) -> Result<i32, SyncError> {
                use crate::schema::$table::dsl;
                let mut conn = self.conn()?;
                let mut row = <$new>::from(rec);
                row.id = None;
                diesel::insert_into(dsl::$table)
                    .values(&row)
                    .execute(&mut conn)?;
                let assigned: i32 = diesel::select(last_insert_rowid()).get_result(&mut conn)?;
                Ok(assigned)
            }

            fn update_local(&self, rec: &$model) -> Result<(), SyncError> {
                use crate::schema::$table::dsl;
                let mut conn = self.conn()?;
                let row = <$new>::from(rec);
                diesel::update(dsl::$table.find(rec.id))
                    .set(&row)
                    .execute(&mut conn)?;
                Ok(())
            }

            fn insert_remote(&self, rec: &$model) -> Result<(), SyncError> {
                use crate::schema::$table::dsl;
                let mut conn = self.conn()?;
                let mut row = <$new>::from(rec);
                row.synced = Some(true);
                if let Some(want) = row.id {
                    let taken: i64 = dsl::$table
                        .filter(dsl::id.eq(want))
                        .count()
                        .get_result(&mut conn)?;
                    if taken > 0 {
                        // Another record grabbed this id while the device
                        // was offline; a fresh id is assigned and the FK
                        // drift is left to the reconciliation jobs.
                        row.id = None;
                    }
                }
                diesel::insert_into(dsl::$table)
                    .values(&row)
                    .execute(&mut conn)?;
                Ok(())
            }

            fn overwrite_remote(&self, local_id: i32, rec: &$model) -> Result<(), SyncError> {
                use crate::schema::$table::dsl;
                let mut conn = self.conn()?;
                let mut row = <$new>::from(rec);
                row.synced = Some(true);
                diesel::update(dsl::$table.find(local_id))
                    .set(&row)
                    .execute(&mut conn)?;
                Ok(())
            }

            fn unsynced(&self) -> Result<Vec<$model>, SyncError> {
                use crate::schema::$table::dsl;
                let mut conn = self.conn()?;
                let rows = dsl::$table
                    .filter(dsl::synced.is_null().or(dsl::synced.eq(false)))
                    .order(dsl::id.asc())
                    .select(<$model>::as_select())
                    .load::<$model>(&mut conn)?;
                Ok(rows)
            }

            fn all_rows(&self) -> Result<Vec<$model>, SyncError> {
                use crate::schema::$table::dsl;
                let mut conn = self.conn()?;
                let rows = dsl::$table
                    .order(dsl::id.asc())
                    .select(<$model>::as_select())
                    .load::<$model>(&mut conn)?;
                Ok(rows)
            }

            fn mark_synced(&self, local_id: i32) -> Result<(), SyncError> {
                use crate::schema::$table::dsl;
                let mut conn = self.conn()?;
                diesel::update(dsl::$table.find(local_id))
                    .set(dsl::synced.eq(Some(true)))
                    .execute(&mut conn)?;
                Ok(())
            }

            fn counts(&self) -> Result<TableCounts, SyncError> {
                use crate::schema::$table::dsl;
                let mut conn = self.conn()?;
                let total: i64 = dsl::$table.count().get_result(&mut conn)?;
                let tombstoned: i64 = dsl::$table
                    .filter(dsl::deleted.eq(true))
                    .count()
                    .get_result(&mut conn)?;
                let unsynced: i64 = dsl::$table
                    .filter(dsl::synced.is_null().or(dsl::synced.eq(false)))
                    .count()
                    .get_result(&mut conn)?;
                Ok(TableCounts {
                    total,
                    tombstoned,
                    unsynced,
                })
            }

            fn wipe(&self) -> Result<usize, SyncError> {
                use crate::schema::$table::dsl;
                let mut conn = self.conn()?;
                let n = diesel::delete(dsl::$table).execute(&mut conn)?;
                Ok(n)
            }

            fn assign_missing_uuids(&self) -> Result<usize, SyncError> {
                use crate::schema::$table::dsl;
                let mut conn = self.conn()?;
                let targets: Vec<i32> = dsl::$table
                    .filter(diesel::dsl::sql::<diesel::sql_types::Bool>(
                        missing_uuid_filter(),
                    ))
                    .select(dsl::id)
                    .load(&mut conn)?;
                for rid in &targets {
                    diesel::update(dsl::$table.find(*rid))
                        .set(dsl::uuid.eq(Uuid::new_v4().to_string()))
                        .execute(&mut conn)?;
                }
                Ok(targets.len())
            }

            fn mark_all_unsynced(&self) -> Result<usize, SyncError> {
                use crate::schema::$table::dsl;
                let mut conn = self.conn()?;
                let n = diesel::update(dsl::$table)
                    .set(dsl::synced.eq(Some(false)))
                    .execute(&mut conn)?;
                Ok(n)
            }

            fn soft_delete_matching(
                &self,
                filter: &DeleteFilter,
                now: NaiveDateTime,
            ) -> Result<usize, SyncError> {
                use crate::schema::$table::dsl;
                let mut conn = self.conn()?;
                let mut query = dsl::$table
                    .select(<$model>::as_select())
                    .into_boxed::<diesel::sqlite::Sqlite>();
                if let Some(u) = &filter.uuid {
                    query = query.filter(dsl::uuid.eq(u.clone()));
                }
                if let Some(pat) = &filter.name_like {
                    query = query.filter(dsl::$display.like(format!("%{}%", pat)));
                }
                if !filter.include_deleted {
                    query = query.filter(dsl::deleted.eq(false));
                }
                let rows: Vec<$model> = query.load(&mut conn)?;
                for row in &rows {
                    diesel::update(dsl::$table.find(row.id))
                        .set((
                            dsl::deleted.eq(true),
                            dsl::synced.eq(Some(false)),
                            dsl::updated_at.eq(now),
                        ))
                        .execute(&mut conn)?;
                }
                Ok(rows.len())
            }

            fn default_blank_display(
                &self,
                fallback: &str,
                now: NaiveDateTime,
            ) -> Result<usize, SyncError> {
                use crate::schema::$table::dsl;
                let mut conn = self.conn()?;
                let n = diesel::update(
                    dsl::$table
                        .filter(dsl::$display.eq(""))
                        .filter(dsl::deleted.eq(false)),
                )
                .set((
                    dsl::$display.eq(fallback),
                    dsl::synced.eq(Some(false)),
                    dsl::updated_at.eq(now),
                ))
                .execute(&mut conn)?;
                Ok(n)
            }
        }
    };
}

local_table_impl!(customers, Customer, NewCustomer, customer_name);
local_table_impl!(pm_sessions, PmSession, NewPmSession, title);
local_table_impl!(cabinets, Cabinet, NewCabinet, cabinet_name);
local_table_impl!(nodes, Node, NewNode, node_address);
local_table_impl!(measurements, Measurement, NewMeasurement, label);
