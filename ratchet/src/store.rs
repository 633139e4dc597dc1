//! Database access and the bookkeeping protocol.
//!
//! The bookkeeping table holds one row per applied migration plus, while a
//! migrator is working, the reservation row with id [`RESERVED_ID`]. The
//! reservation insert relies on the unique key on `id`: whichever actor's
//! insert succeeds owns the migration set until it deletes the row again.
//! Contenders must not wait; they surface [`MigrateResult::Ignored`].

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::{params, Connection};
use tracing::warn;

use crate::config::{CancellationToken, Config, DbSpec, ModifySqlFn};
use crate::error::Error;
use crate::migration::{separator_regex, split_statements, Direction, Migration, MigrationConn};

/// Bookkeeping id of the reservation row. Never valid for a migration.
pub const RESERVED_ID: i64 = -1;

/// Result of one store-level migration step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrateResult {
    /// The migration ran (or was already recorded) under this actor's
    /// reservation.
    Success,
    /// Another actor holds the reservation; nothing was done.
    Ignored,
}

/// Persistence backend for migration bookkeeping and execution.
///
/// The built-in implementation is [`SqliteStore`]; tests may supply a fake.
pub trait Store {
    /// Open the connection and ensure the bookkeeping table exists.
    /// Idempotent.
    fn connect(&mut self) -> Result<(), Error>;

    /// Close the connection if the store owns it. Connections supplied by
    /// the caller are never closed.
    fn disconnect(&mut self) -> Result<(), Error>;

    /// Ids of all applied migrations (the reservation row is not one).
    fn completed_ids(&mut self) -> Result<HashSet<i64>, Error>;

    /// Run one migration forward and record it. See the module docs for
    /// the reservation discipline.
    fn migrate_up(&mut self, migration: &dyn Migration) -> Result<MigrateResult, Error>;

    /// Run one migration backward and erase its record.
    fn migrate_down(&mut self, migration: &dyn Migration) -> Result<MigrateResult, Error>;

    /// Run the init script. Not a migration: never recorded, applied only
    /// on explicit request.
    fn init(&mut self, script: &str) -> Result<(), Error>;
}

enum Handle {
    Owned(Connection),
    Shared(Arc<Mutex<Connection>>),
}

/// Everything a migration step needs besides the connection itself.
struct StoreCtx {
    table: String,
    modify_sql: Option<Arc<ModifySqlFn>>,
    cancel: CancellationToken,
    command_separator: String,
    init_in_transaction: bool,
}

impl StoreCtx {
    fn migration_conn<'a>(&'a self, conn: &'a Connection) -> MigrationConn<'a> {
        MigrationConn::new(conn, self.modify_sql.as_deref(), &self.cancel)
    }

    fn apply_hook(&self, statement: &str) -> Vec<String> {
        match &self.modify_sql {
            Some(hook) => hook(statement),
            None => vec![statement.to_string()],
        }
    }
}

/// The built-in SQLite-backed store.
pub struct SqliteStore {
    db: DbSpec,
    table: String,
    modify_sql: Option<Arc<ModifySqlFn>>,
    cancel: CancellationToken,
    command_separator: String,
    init_in_transaction: bool,
    handle: Option<Handle>,
}

impl SqliteStore {
    pub fn new(config: &Config) -> Self {
        Self {
            db: config.db.clone(),
            table: config.migration_table_name.clone(),
            modify_sql: config.modify_sql.clone(),
            cancel: config.cancellation.clone(),
            command_separator: config.command_separator.clone(),
            init_in_transaction: config.init_in_transaction,
            handle: None,
        }
    }

    fn ctx(&self) -> StoreCtx {
        StoreCtx {
            table: self.table.clone(),
            modify_sql: self.modify_sql.clone(),
            cancel: self.cancel.clone(),
            command_separator: self.command_separator.clone(),
            init_in_transaction: self.init_in_transaction,
        }
    }

    fn with_handle<T>(
        &mut self,
        f: impl FnOnce(&mut Connection) -> Result<T, Error>,
    ) -> Result<T, Error> {
        match self.handle.as_mut() {
            Some(Handle::Owned(conn)) => f(conn),
            Some(Handle::Shared(shared)) => {
                let mut guard = shared
                    .lock()
                    .map_err(|_| Error::Generic("database connection mutex poisoned".into()))?;
                f(&mut guard)
            }
            None => Err(Error::Generic("store is not connected".into())),
        }
    }

    /// Attempt to insert the reservation row. Returns `true` when this
    /// actor acquired the reservation, `false` when another actor holds it.
    pub fn mark_reserved(&mut self) -> Result<bool, Error> {
        let ctx = self.ctx();
        self.with_handle(|conn| Self::mark_reserved_inner(conn, &ctx))
    }

    /// Delete the reservation row.
    pub fn mark_unreserved(&mut self) -> Result<(), Error> {
        let ctx = self.ctx();
        self.with_handle(|conn| Self::mark_unreserved_inner(conn, &ctx))
    }

    /// Whether the given migration id is recorded as applied.
    pub fn completed(&mut self, id: i64) -> Result<bool, Error> {
        let ctx = self.ctx();
        self.with_handle(|conn| Self::completed_inner(conn, &ctx.table, id))
    }

    fn ensure_table(conn: &Connection, ctx: &StoreCtx) -> Result<(), Error> {
        // The existence probe and the CREATE TABLE each run as their own
        // top-level statement; a failed probe must not poison the
        // transaction that creates the table.
        if Self::table_exists(conn, &ctx.table)? {
            return Ok(());
        }
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (id BIGINT UNIQUE NOT NULL, applied TIMESTAMP, description VARCHAR(1024))",
            ctx.table
        );
        for statement in ctx.apply_hook(&ddl) {
            conn.execute_batch(&statement)?;
        }
        Ok(())
    }

    fn table_exists(conn: &Connection, table: &str) -> Result<bool, Error> {
        let mut stmt =
            conn.prepare("SELECT name FROM sqlite_master WHERE type='table' AND name=?1")?;
        Ok(stmt.exists([table])?)
    }

    fn mark_reserved_inner(conn: &Connection, ctx: &StoreCtx) -> Result<bool, Error> {
        let sql = format!("INSERT INTO {} (id) VALUES (?1)", ctx.table);
        match conn.execute(&sql, [RESERVED_ID]) {
            Ok(_) => Ok(true),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn mark_unreserved_inner(conn: &Connection, ctx: &StoreCtx) -> Result<(), Error> {
        conn.execute(
            &format!("DELETE FROM {} WHERE id = ?1", ctx.table),
            [RESERVED_ID],
        )?;
        Ok(())
    }

    fn completed_inner(conn: &Connection, table: &str, id: i64) -> Result<bool, Error> {
        let mut stmt = conn.prepare(&format!("SELECT 1 FROM {table} WHERE id = ?1"))?;
        Ok(stmt.exists([id])?)
    }

    fn record_applied(
        conn: &Connection,
        ctx: &StoreCtx,
        migration: &dyn Migration,
    ) -> Result<(), Error> {
        let description: String = migration.name().chars().take(1024).collect();
        conn.execute(
            &format!(
                "INSERT INTO {} (id, applied, description) VALUES (?1, ?2, ?3)",
                ctx.table
            ),
            params![migration.id(), Utc::now().to_rfc3339(), description],
        )?;
        Ok(())
    }

    fn erase_record(conn: &Connection, ctx: &StoreCtx, id: i64) -> Result<(), Error> {
        conn.execute(&format!("DELETE FROM {} WHERE id = ?1", ctx.table), [id])?;
        Ok(())
    }

    /// Best-effort reverse execution on a plain (non-transactional)
    /// connection after a failed transactional migration. Errors are
    /// logged, never propagated; the transaction rollback is the primary
    /// guarantee.
    fn back_out(
        conn: &Connection,
        ctx: &StoreCtx,
        migration: &dyn Migration,
        direction: Direction,
    ) {
        let result = match direction {
            Direction::Up => migration.up(&ctx.migration_conn(conn)),
            Direction::Down => migration.down(&ctx.migration_conn(conn)),
        };
        if let Err(e) = result {
            warn!(
                id = migration.id(),
                error = %e,
                "best-effort back-out failed"
            );
        }
    }

    fn run_step(
        conn: &mut Connection,
        ctx: &StoreCtx,
        migration: &dyn Migration,
        direction: Direction,
    ) -> Result<(), Error> {
        let id = migration.id();
        let transactional = match direction {
            Direction::Up => migration.transactional_up(),
            Direction::Down => migration.transactional_down(),
        };

        if transactional {
            let tx = conn.transaction()?;
            if Self::step_is_settled(&tx, ctx, id, direction)? {
                tx.commit()?;
                return Ok(());
            }
            let run = match direction {
                Direction::Up => migration.up(&ctx.migration_conn(&tx)),
                Direction::Down => migration.down(&ctx.migration_conn(&tx)),
            };
            match run {
                Ok(()) => {
                    match direction {
                        Direction::Up => Self::record_applied(&tx, ctx, migration)?,
                        Direction::Down => Self::erase_record(&tx, ctx, id)?,
                    }
                    tx.commit()?;
                    Ok(())
                }
                Err(e) => {
                    if let Err(rollback) = tx.rollback() {
                        warn!(id, error = %rollback, "transaction rollback failed");
                    }
                    // Cancellation unwinds without the reverse pass.
                    if !matches!(e, Error::Cancelled) {
                        Self::back_out(conn, ctx, migration, direction.reverse());
                    }
                    Err(e)
                }
            }
        } else {
            if Self::step_is_settled(conn, ctx, id, direction)? {
                return Ok(());
            }
            match direction {
                Direction::Up => {
                    migration.up(&ctx.migration_conn(conn))?;
                    Self::record_applied(conn, ctx, migration)
                }
                Direction::Down => {
                    migration.down(&ctx.migration_conn(conn))?;
                    Self::erase_record(conn, ctx, id)
                }
            }
        }
    }

    /// Whether there is nothing left to do for this step: an up step is
    /// settled once the id is recorded, a down step once it is not.
    fn step_is_settled(
        conn: &Connection,
        ctx: &StoreCtx,
        id: i64,
        direction: Direction,
    ) -> Result<bool, Error> {
        let completed = Self::completed_inner(conn, &ctx.table, id)?;
        Ok(match direction {
            Direction::Up => completed,
            Direction::Down => !completed,
        })
    }

    fn migrate(
        &mut self,
        migration: &dyn Migration,
        direction: Direction,
    ) -> Result<MigrateResult, Error> {
        let ctx = self.ctx();
        self.with_handle(|conn| {
            if !Self::mark_reserved_inner(conn, &ctx)? {
                return Ok(MigrateResult::Ignored);
            }
            let result = Self::run_step(conn, &ctx, migration, direction);
            // Release on every path; stray errors here are logged only.
            if let Err(e) = Self::mark_unreserved_inner(conn, &ctx) {
                warn!(id = migration.id(), error = %e, "failed to release reservation");
            }
            result.map(|()| MigrateResult::Success)
        })
    }
}

impl Store for SqliteStore {
    fn connect(&mut self) -> Result<(), Error> {
        if self.handle.is_none() {
            let handle = match &self.db {
                DbSpec::Path(path) => Handle::Owned(Connection::open(path)?),
                DbSpec::InMemory => Handle::Owned(Connection::open_in_memory()?),
                DbSpec::Shared(conn) => Handle::Shared(Arc::clone(conn)),
            };
            self.handle = Some(handle);
        }
        let ctx = self.ctx();
        self.with_handle(|conn| Self::ensure_table(conn, &ctx))
    }

    fn disconnect(&mut self) -> Result<(), Error> {
        match self.handle.take() {
            Some(Handle::Owned(conn)) => {
                if let Err((_conn, e)) = conn.close() {
                    return Err(Error::Database(e));
                }
            }
            // Caller-owned connections are never closed here.
            Some(Handle::Shared(_)) | None => {}
        }
        Ok(())
    }

    fn completed_ids(&mut self) -> Result<HashSet<i64>, Error> {
        let ctx = self.ctx();
        self.with_handle(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT id FROM {} WHERE id != ?1", ctx.table))?;
            let ids = stmt
                .query_map([RESERVED_ID], |row| row.get(0))?
                .collect::<Result<HashSet<i64>, _>>()?;
            Ok(ids)
        })
    }

    fn migrate_up(&mut self, migration: &dyn Migration) -> Result<MigrateResult, Error> {
        self.migrate(migration, Direction::Up)
    }

    fn migrate_down(&mut self, migration: &dyn Migration) -> Result<MigrateResult, Error> {
        self.migrate(migration, Direction::Down)
    }

    fn init(&mut self, script: &str) -> Result<(), Error> {
        let ctx = self.ctx();
        self.with_handle(|conn| {
            let separator = separator_regex(&ctx.command_separator)?;
            let statements = split_statements(&separator, script);
            if ctx.init_in_transaction {
                let tx = conn.transaction()?;
                {
                    let mconn = ctx.migration_conn(&tx);
                    for statement in &statements {
                        mconn.execute_sql(statement)?;
                    }
                }
                tx.commit()?;
                Ok(())
            } else {
                let mconn = ctx.migration_conn(conn);
                for statement in &statements {
                    mconn.execute_sql(statement)?;
                }
                Ok(())
            }
        })
    }
}
