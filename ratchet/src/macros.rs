//! Convenience macro for defining code migrations from plain SQL.

/// Define a simple SQL-only code migration.
///
/// This reduces boilerplate for programmatic migrations that are just SQL
/// statements, without writing files to a migration directory.
///
/// # Basic Usage
///
/// ```
/// use ratchet::sql_migration;
///
/// sql_migration!(CreateUsersTable, 20240101120000, "create-users-table",
///     up: "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
///     down: "DROP TABLE users"
/// );
/// ```
///
/// This expands to a struct `CreateUsersTable` implementing
/// [`Migration`](crate::Migration), suitable for
/// [`Config::with_migration`](crate::Config::with_migration).
///
/// # Up-Only Migrations
///
/// Omit the `down` clause when there is nothing to roll back; rolling the
/// migration back then only removes its bookkeeping row:
///
/// ```
/// use ratchet::sql_migration;
///
/// sql_migration!(SeedPlans, 20240102090000, "seed-plans",
///     up: "INSERT INTO plans (name) VALUES ('free'), ('pro')"
/// );
/// ```
///
/// # Multiple Statements
///
/// Use an array for several statements per side:
///
/// ```
/// use ratchet::sql_migration;
///
/// sql_migration!(InitialSchema, 20240101120000, "initial-schema",
///     up: [
///         "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)",
///         "CREATE INDEX idx_users_name ON users(name)"
///     ],
///     down: [
///         "DROP INDEX idx_users_name",
///         "DROP TABLE users"
///     ]
/// );
/// ```
#[macro_export]
macro_rules! sql_migration {
    ($name:ident, $id:expr, $desc:expr, up: [$($up:expr),+ $(,)?], down: [$($down:expr),+ $(,)?]) => {
        pub struct $name;

        impl $crate::Migration for $name {
            fn id(&self) -> i64 {
                $id
            }

            fn name(&self) -> &str {
                $desc
            }

            fn up(&self, conn: &$crate::MigrationConn<'_>) -> Result<(), $crate::Error> {
                $(conn.execute_sql($up)?;)+
                Ok(())
            }

            fn down(&self, conn: &$crate::MigrationConn<'_>) -> Result<(), $crate::Error> {
                $(conn.execute_sql($down)?;)+
                Ok(())
            }
        }
    };
    ($name:ident, $id:expr, $desc:expr, up: [$($up:expr),+ $(,)?]) => {
        pub struct $name;

        impl $crate::Migration for $name {
            fn id(&self) -> i64 {
                $id
            }

            fn name(&self) -> &str {
                $desc
            }

            fn up(&self, conn: &$crate::MigrationConn<'_>) -> Result<(), $crate::Error> {
                $(conn.execute_sql($up)?;)+
                Ok(())
            }

            fn down(&self, _conn: &$crate::MigrationConn<'_>) -> Result<(), $crate::Error> {
                Ok(())
            }
        }
    };
    ($name:ident, $id:expr, $desc:expr, up: $up:expr, down: $down:expr) => {
        $crate::sql_migration!($name, $id, $desc, up: [$up], down: [$down]);
    };
    ($name:ident, $id:expr, $desc:expr, up: $up:expr) => {
        $crate::sql_migration!($name, $id, $desc, up: [$up]);
    };
}

#[cfg(test)]
mod tests {
    use crate::config::CancellationToken;
    use crate::migration::{Migration, MigrationConn};
    use rusqlite::Connection;

    sql_migration!(CreateWidgets, 20240101120000, "create-widgets",
        up: "CREATE TABLE widgets (id INTEGER PRIMARY KEY)",
        down: "DROP TABLE widgets"
    );

    sql_migration!(SeedWidgets, 20240102090000, "seed-widgets",
        up: [
            "INSERT INTO widgets (id) VALUES (1)",
            "INSERT INTO widgets (id) VALUES (2)"
        ]
    );

    #[test]
    fn macro_migrations_execute_their_sql() {
        let conn = Connection::open_in_memory().unwrap();
        let cancel = CancellationToken::new();
        let mconn = MigrationConn::new(&conn, None, &cancel);

        CreateWidgets.up(&mconn).unwrap();
        SeedWidgets.up(&mconn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM widgets", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);

        // up-only migration rolls back without side effects
        SeedWidgets.down(&mconn).unwrap();
        CreateWidgets.down(&mconn).unwrap();
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='widgets'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 0);
    }

    #[test]
    fn macro_migrations_report_identity() {
        assert_eq!(CreateWidgets.id(), 20240101120000);
        assert_eq!(CreateWidgets.name(), "create-widgets");
    }
}
