use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::discovery::RawMigration;
use crate::error::Error;
use crate::migration::Migration;

/// Default name of the directory holding migration files.
pub const DEFAULT_MIGRATION_DIR: &str = "migrations";

/// Default filesystem parent tried when the migration directory is not found
/// as a plain relative path first.
pub const DEFAULT_PARENT_MIGRATION_DIR: &str = "resources";

/// Default name of the bookkeeping table.
pub const DEFAULT_MIGRATION_TABLE_NAME: &str = "schema_migrations";

/// Default init script filename. The init script is excluded from discovery
/// and only runs on explicit request.
pub const DEFAULT_INIT_SCRIPT: &str = "init.sql";

/// Default statement separator line for SQL migration files.
pub const DEFAULT_COMMAND_SEPARATOR: &str = "--;;";

/// Hook applied to each SQL statement before execution, including the DDL
/// that creates the bookkeeping table. Returns the statement(s) to execute
/// in its place; return a single-element vector to keep one statement.
pub type ModifySqlFn = dyn Fn(&str) -> Vec<String> + Send + Sync;

/// Constructor callback for a registered migration kind. Receives the
/// grouped raw files for one migration id and builds the migration object.
pub type KindFactory = dyn Fn(RawMigration) -> Result<Box<dyn Migration>, Error> + Send + Sync;

/// Cooperative cancellation flag threaded through a migration run.
///
/// The engine checks the token between migrations, and each SQL statement
/// dispatch checks it again before executing. Cancelling mid-statement is
/// best-effort: the current statement runs to completion, then the run
/// unwinds with [`Error::Cancelled`], rolling back any in-flight
/// transaction and releasing the reservation row.
///
/// Tokens are cheaply cloneable; all clones observe the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. All clones of this token observe the request.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub(crate) fn check(&self) -> Result<(), Error> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Connection specification for the built-in store.
#[derive(Clone, Debug)]
pub enum DbSpec {
    /// Open a connection to the database file at this path. The store owns
    /// the connection and closes it on disconnect.
    Path(PathBuf),
    /// Open an in-memory database. The database is dropped when the store
    /// disconnects, so this is mainly useful for tests and doc examples.
    InMemory,
    /// Use a caller-owned connection (or one checked out of a pool). The
    /// store never closes it; disconnect only releases the store's handle.
    Shared(Arc<Mutex<Connection>>),
}

/// Configuration for a [`Migrator`](crate::Migrator).
///
/// Built with [`Config::new`] and the `with_*` methods:
///
/// ```
/// use ratchet::{Config, DbSpec};
///
/// let config = Config::new(DbSpec::InMemory)
///     .with_migration_dir("migrations")
///     .with_migration_table_name("schema_migrations")
///     .with_command_separator("--;;");
/// ```
pub struct Config {
    pub(crate) db: DbSpec,
    pub(crate) migration_dir: String,
    pub(crate) parent_migration_dir: String,
    pub(crate) migration_table_name: String,
    pub(crate) init_script: String,
    pub(crate) init_in_transaction: bool,
    pub(crate) exclude_scripts: HashSet<String>,
    pub(crate) modify_sql: Option<Arc<ModifySqlFn>>,
    pub(crate) command_separator: String,
    pub(crate) cancellation: CancellationToken,
    pub(crate) kinds: HashMap<String, Arc<KindFactory>>,
    pub(crate) code_migrations: Vec<Arc<dyn Migration>>,
}

// Manual Debug impl since hooks and migrations don't implement Debug
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("db", &self.db)
            .field("migration_dir", &self.migration_dir)
            .field("parent_migration_dir", &self.parent_migration_dir)
            .field("migration_table_name", &self.migration_table_name)
            .field("init_script", &self.init_script)
            .field("init_in_transaction", &self.init_in_transaction)
            .field("exclude_scripts", &self.exclude_scripts)
            .field("modify_sql", &self.modify_sql.is_some())
            .field("command_separator", &self.command_separator)
            .field("registered_kinds", &self.kinds.keys().collect::<Vec<_>>())
            .field("code_migrations", &self.code_migrations.len())
            .finish()
    }
}

impl Config {
    /// Create a configuration with the given connection specification and
    /// defaults for everything else.
    pub fn new(db: DbSpec) -> Self {
        Self {
            db,
            migration_dir: DEFAULT_MIGRATION_DIR.to_string(),
            parent_migration_dir: DEFAULT_PARENT_MIGRATION_DIR.to_string(),
            migration_table_name: DEFAULT_MIGRATION_TABLE_NAME.to_string(),
            init_script: DEFAULT_INIT_SCRIPT.to_string(),
            init_in_transaction: true,
            exclude_scripts: HashSet::new(),
            modify_sql: None,
            command_separator: DEFAULT_COMMAND_SEPARATOR.to_string(),
            cancellation: CancellationToken::new(),
            kinds: HashMap::new(),
            code_migrations: Vec::new(),
        }
    }

    /// Set the migration directory to search. Defaults to `migrations`.
    ///
    /// The value may be a plain directory name (resolved under the parent
    /// directory first, then as a relative path), an absolute path, or an
    /// `<archive>!<dir>` pair naming a directory inside a zip/JAR archive.
    pub fn with_migration_dir(mut self, dir: impl Into<String>) -> Self {
        self.migration_dir = dir.into();
        self
    }

    /// Set the filesystem parent tried when resolving the migration
    /// directory. Defaults to `resources`.
    pub fn with_parent_migration_dir(mut self, dir: impl Into<String>) -> Self {
        self.parent_migration_dir = dir.into();
        self
    }

    /// Set a custom name for the bookkeeping table.
    /// Defaults to `schema_migrations`.
    pub fn with_migration_table_name(mut self, name: impl Into<String>) -> Self {
        self.migration_table_name = name.into();
        self
    }

    /// Set the init script filename. Defaults to `init.sql`. The script is
    /// always excluded from migration discovery.
    pub fn with_init_script(mut self, name: impl Into<String>) -> Self {
        self.init_script = name.into();
        self
    }

    /// Run the init script inside a transaction. Defaults to `true`.
    pub fn with_init_in_transaction(mut self, in_transaction: bool) -> Self {
        self.init_in_transaction = in_transaction;
        self
    }

    /// Add filenames to skip during discovery, on top of the init script
    /// which is always skipped.
    pub fn with_exclude_scripts<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_scripts.extend(names.into_iter().map(Into::into));
        self
    }

    /// Set a hook applied to each SQL statement before execution. The hook
    /// also sees the bookkeeping table DDL and the init script statements.
    pub fn with_modify_sql_fn<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str) -> Vec<String> + Send + Sync + 'static,
    {
        self.modify_sql = Some(Arc::new(hook));
        self
    }

    /// Set the statement separator for SQL migration files. Defaults to
    /// `--;;`. A separator is a line beginning with this string.
    pub fn with_command_separator(mut self, separator: impl Into<String>) -> Self {
        self.command_separator = separator.into();
        self
    }

    /// Use the given cancellation token for runs driven by this
    /// configuration. By default a fresh, never-cancelled token is used.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// The cancellation token runs driven by this configuration observe.
    /// Clone it and call [`CancellationToken::cancel`] to stop a run.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Add a code migration to the set, merged with discovered migrations.
    /// Ids must be unique across both sources.
    pub fn with_migration(mut self, migration: impl Migration + 'static) -> Self {
        self.code_migrations.push(Arc::new(migration));
        self
    }

    /// Register a constructor for a custom migration kind. Discovered files
    /// whose extension matches `extension` are handed to `factory`; `sql`
    /// is built in.
    pub fn register_kind<F>(mut self, extension: impl Into<String>, factory: F) -> Self
    where
        F: Fn(RawMigration) -> Result<Box<dyn Migration>, Error> + Send + Sync + 'static,
    {
        self.kinds.insert(extension.into(), Arc::new(factory));
        self
    }

    /// All filenames discovery must skip: the configured exclusions plus
    /// the init script.
    pub(crate) fn excluded_scripts(&self) -> HashSet<&str> {
        let mut excluded: HashSet<&str> =
            self.exclude_scripts.iter().map(String::as_str).collect();
        excluded.insert(self.init_script.as_str());
        excluded
    }
}
