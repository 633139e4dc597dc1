use std::sync::LazyLock;

use regex::Regex;
use rusqlite::Connection;

use crate::config::{CancellationToken, ModifySqlFn};
use crate::error::Error;

/// Direction of a migration side effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub(crate) fn reverse(self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }
}

/// A single unit of schema change.
///
/// Implementations know how to run their `up` and `down` side effects given
/// the store's lent connection handle. The built-in kinds are
/// [`SqlMigration`] (parsed from files) and [`CodeMigration`] (user
/// callbacks); custom kinds register a constructor through
/// [`Config::register_kind`](crate::Config::register_kind).
pub trait Migration: Send + Sync {
    /// Globally-ordering identifier, ordinarily a UTC `yyyyMMddHHmmss`
    /// stamp taken from the filename. `-1` is reserved for the store's
    /// reservation row and never valid here.
    fn id(&self) -> i64;

    /// Human-readable name, copied into the bookkeeping `description`
    /// column when the migration is recorded.
    fn name(&self) -> &str;

    /// Apply the migration's forward side effects.
    fn up(&self, conn: &MigrationConn<'_>) -> Result<(), Error>;

    /// Apply the migration's reverse side effects. A migration without a
    /// down side should succeed without doing anything.
    fn down(&self, conn: &MigrationConn<'_>) -> Result<(), Error>;

    /// Whether `up` runs inside a store-managed transaction.
    fn transactional_up(&self) -> bool {
        true
    }

    /// Whether `down` runs inside a store-managed transaction.
    fn transactional_down(&self) -> bool {
        true
    }
}

impl std::fmt::Debug for dyn Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migration")
            .field("id", &self.id())
            .field("name", &self.name())
            .finish()
    }
}

/// The store's connection handle, lent into a migration for the duration of
/// one side-effect call.
///
/// SQL kinds should dispatch statements through [`execute_sql`], which
/// applies the configured `modify_sql` hook and observes cancellation
/// before each statement. Code kinds may use the [`raw`] connection
/// directly.
///
/// [`execute_sql`]: MigrationConn::execute_sql
/// [`raw`]: MigrationConn::raw
pub struct MigrationConn<'a> {
    conn: &'a Connection,
    modify_sql: Option<&'a ModifySqlFn>,
    cancel: &'a CancellationToken,
}

impl<'a> MigrationConn<'a> {
    pub(crate) fn new(
        conn: &'a Connection,
        modify_sql: Option<&'a ModifySqlFn>,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            conn,
            modify_sql,
            cancel,
        }
    }

    /// The live database connection. When the migration is transactional
    /// this is the connection with the store's transaction open on it, so
    /// plain statements execute inside that transaction.
    pub fn raw(&self) -> &Connection {
        self.conn
    }

    /// Dispatch one SQL statement, first applying the `modify_sql` hook
    /// (which may expand it into several statements) and checking for
    /// cancellation before each resulting statement runs.
    pub fn execute_sql(&self, statement: &str) -> Result<(), Error> {
        match self.modify_sql {
            Some(hook) => {
                for modified in hook(statement) {
                    self.cancel.check()?;
                    self.conn.execute_batch(&modified)?;
                }
            }
            None => {
                self.cancel.check()?;
                self.conn.execute_batch(statement)?;
            }
        }
        Ok(())
    }
}

static COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^--.*$").expect("comment pattern is valid")
});

/// Compile the statement separator pattern for a configured separator
/// string. A separator is a whole line beginning with the string.
pub(crate) fn separator_regex(separator: &str) -> Result<Regex, Error> {
    Regex::new(&format!(r"(?m)^{}.*\n", regex::escape(separator)))
        .map_err(|e| Error::Generic(format!("invalid command separator {separator:?}: {e}")))
}

/// Split a migration script into executable statements: cut on separator
/// lines, strip line comments and blank lines from each fragment, and drop
/// fragments that end up empty.
pub(crate) fn split_statements(separator: &Regex, sql: &str) -> Vec<String> {
    separator
        .split(sql)
        .map(|fragment| {
            let without_comments = COMMENT_RE.replace_all(fragment, "");
            without_comments
                .lines()
                .filter(|line| !line.trim().is_empty())
                .collect::<Vec<_>>()
                .join("\n")
        })
        .filter(|statement| !statement.trim().is_empty())
        .collect()
}

/// One side of a SQL migration as read from disk or an archive.
#[derive(Debug, Clone)]
pub struct SqlPayload {
    pub content: String,
    /// False when the file carried the `.no-tx` marker.
    pub transactional: bool,
}

/// A migration whose side effects are SQL scripts.
///
/// Scripts are split into statement batches on the configured separator
/// line (default `--;;`); each statement is dispatched through the
/// `modify_sql` hook. Either side may be absent.
pub struct SqlMigration {
    id: i64,
    name: String,
    up: Option<SqlPayload>,
    down: Option<SqlPayload>,
    separator: Regex,
}

impl SqlMigration {
    pub fn new(
        id: i64,
        name: impl Into<String>,
        up: Option<SqlPayload>,
        down: Option<SqlPayload>,
        command_separator: &str,
    ) -> Result<Self, Error> {
        Ok(Self {
            id,
            name: name.into(),
            up,
            down,
            separator: separator_regex(command_separator)?,
        })
    }

    fn run(&self, payload: Option<&SqlPayload>, conn: &MigrationConn<'_>) -> Result<(), Error> {
        if let Some(payload) = payload {
            for statement in split_statements(&self.separator, &payload.content) {
                conn.execute_sql(&statement)?;
            }
        }
        Ok(())
    }
}

impl Migration for SqlMigration {
    fn id(&self) -> i64 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn up(&self, conn: &MigrationConn<'_>) -> Result<(), Error> {
        self.run(self.up.as_ref(), conn)
    }

    fn down(&self, conn: &MigrationConn<'_>) -> Result<(), Error> {
        self.run(self.down.as_ref(), conn)
    }

    fn transactional_up(&self) -> bool {
        self.up.as_ref().map_or(true, |p| p.transactional)
    }

    fn transactional_down(&self) -> bool {
        self.down.as_ref().map_or(true, |p| p.transactional)
    }
}

type CodeFn = dyn Fn(&Connection) -> Result<(), Error> + Send + Sync;

/// A migration whose side effects are user-supplied callbacks receiving
/// the live connection.
///
/// ```
/// use ratchet::CodeMigration;
///
/// let migration = CodeMigration::new(20240101120000, "create-users")
///     .with_up(|conn| {
///         conn.execute("CREATE TABLE users (id INTEGER PRIMARY KEY)", [])?;
///         Ok(())
///     })
///     .with_down(|conn| {
///         conn.execute("DROP TABLE users", [])?;
///         Ok(())
///     });
/// ```
pub struct CodeMigration {
    id: i64,
    name: String,
    up_fn: Option<Box<CodeFn>>,
    down_fn: Option<Box<CodeFn>>,
    transactional: bool,
}

impl CodeMigration {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            up_fn: None,
            down_fn: None,
            transactional: true,
        }
    }

    pub fn with_up<F>(mut self, up: F) -> Self
    where
        F: Fn(&Connection) -> Result<(), Error> + Send + Sync + 'static,
    {
        self.up_fn = Some(Box::new(up));
        self
    }

    pub fn with_down<F>(mut self, down: F) -> Self
    where
        F: Fn(&Connection) -> Result<(), Error> + Send + Sync + 'static,
    {
        self.down_fn = Some(Box::new(down));
        self
    }

    /// Run outside a store-managed transaction. Back-out on failure is then
    /// the callback's responsibility.
    pub fn without_transaction(mut self) -> Self {
        self.transactional = false;
        self
    }
}

impl Migration for CodeMigration {
    fn id(&self) -> i64 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn up(&self, conn: &MigrationConn<'_>) -> Result<(), Error> {
        match &self.up_fn {
            Some(up) => up(conn.raw()),
            None => Ok(()),
        }
    }

    fn down(&self, conn: &MigrationConn<'_>) -> Result<(), Error> {
        match &self.down_fn {
            Some(down) => down(conn.raw()),
            None => Ok(()),
        }
    }

    fn transactional_up(&self) -> bool {
        self.transactional
    }

    fn transactional_down(&self) -> bool {
        self.transactional
    }
}
