//! `ratchet` is a file-first database schema migration engine.
//!
//! Migrations are plain SQL files named `<id>-<name>.up.sql` /
//! `<id>-<name>.down.sql` in a migration directory (or inside a zip/JAR
//! archive), where `<id>` is ordinarily a UTC `yyyyMMddHHmmss` stamp.
//! Applied migrations are recorded in a bookkeeping table in the target
//! database, and a reservation row in that same table guarantees that at
//! most one migrator in a cluster mutates schema at a time: contenders
//! observe [`Outcome::Ignored`] instead of waiting.
//!
//! # Example
//!
//! SQL migrations live on disk; code migrations can be registered
//! programmatically when a migration needs a live connection:
//!
//! ```
//! use ratchet::{CodeMigration, Config, DbSpec, Migrator};
//!
//! let config = Config::new(DbSpec::InMemory)
//!     .with_migration(
//!         CodeMigration::new(20240101120000, "create-users")
//!             .with_up(|conn| {
//!                 conn.execute("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)", [])?;
//!                 Ok(())
//!             })
//!             .with_down(|conn| {
//!                 conn.execute("DROP TABLE users", [])?;
//!                 Ok(())
//!             }),
//!     )
//!     .with_migration(
//!         CodeMigration::new(20240102090000, "add-user-email")
//!             .with_up(|conn| {
//!                 conn.execute("ALTER TABLE users ADD COLUMN email TEXT", [])?;
//!                 Ok(())
//!             }),
//!     );
//!
//! let mut migrator = Migrator::new(config);
//! let outcome = migrator.migrate().unwrap();
//! assert!(outcome.is_done());
//! ```
//!
//! # Migration files
//!
//! A script may contain several statements separated by a line beginning
//! with `--;;`; line comments and blank lines are stripped before
//! execution:
//!
//! ```sql
//! -- create the quux table
//! CREATE TABLE quux (id INTEGER PRIMARY KEY);
//! --;;
//! CREATE TABLE quux2 (id INTEGER PRIMARY KEY);
//! ```
//!
//! Adding `.no-tx` before the extension (`…up.no-tx.sql`) runs that side
//! without a surrounding transaction, for statements that cannot run
//! inside one.
//!
//! # Concurrency
//!
//! The reservation row (bookkeeping id `-1`) is the sole cross-process
//! mutex. It is inserted before a migration runs and deleted on every
//! exit path; its uniqueness constraint decides which actor proceeds. A
//! crashed migrator leaves the row behind on purpose; an operator
//! deletes it once the crash is understood.
//!
//! # Outcomes
//!
//! Engine operations return [`Outcome`]: `Done`, `Ignored` (another actor
//! holds the reservation) or `Failed` (a migration errored; earlier
//! migrations in the batch stay applied). Fatal conditions (connection
//! failures, a missing migration directory, cancellation through a
//! [`CancellationToken`]) surface as `Err`.

mod config;
mod discovery;
mod engine;
mod error;
mod macros;
mod migration;
pub mod planner;
mod store;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{
    CancellationToken, Config, DbSpec, KindFactory, ModifySqlFn, DEFAULT_COMMAND_SEPARATOR,
    DEFAULT_INIT_SCRIPT, DEFAULT_MIGRATION_DIR, DEFAULT_MIGRATION_TABLE_NAME,
    DEFAULT_PARENT_MIGRATION_DIR,
};
pub use discovery::{find_migrations, MigrationSource, RawMigration, RawPayload};
pub use engine::{Migrator, Outcome};
pub use error::Error;
pub use migration::{
    CodeMigration, Direction, Migration, MigrationConn, SqlMigration, SqlPayload,
};
pub use store::{MigrateResult, SqliteStore, Store, RESERVED_ID};
