//! Orchestration of migration batches.
//!
//! A [`Migrator`] loads the migration set, asks the store for the
//! completed ids, computes a work list with the [`planner`](crate::planner)
//! and drives the list through the store one migration at a time. The
//! engine is strictly sequential; the reservation protocol depends on it.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::discovery::{self, MigrationSource};
use crate::error::Error;
use crate::migration::{Direction, Migration};
use crate::planner::{self, Step};
use crate::store::{MigrateResult, SqliteStore, Store};

/// Observable result of one engine operation.
///
/// `Done` means the batch ran to the end (possibly applying nothing).
/// `Ignored` means another actor held the reservation and the batch was
/// abandoned without changes. `Failed` carries the error that stopped the
/// batch; earlier migrations in the batch remain applied.
///
/// Fatal conditions (connection failures, a missing migration directory,
/// cancellation) are returned as `Err` instead.
#[derive(Debug)]
#[must_use]
pub enum Outcome {
    Done,
    Ignored,
    Failed(Error),
}

impl Outcome {
    pub fn is_done(&self) -> bool {
        matches!(self, Outcome::Done)
    }

    pub fn is_ignored(&self) -> bool {
        matches!(self, Outcome::Ignored)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }

    /// Panic unless the outcome is `Done`. For tests and startup code
    /// where anything else is a bug.
    pub fn unwrap_done(self) {
        if !self.is_done() {
            panic!("expected Outcome::Done, got {self:?}");
        }
    }
}

/// The migration engine.
///
/// ```
/// use ratchet::{CodeMigration, Config, DbSpec, Migrator};
///
/// let config = Config::new(DbSpec::InMemory).with_migration(
///     CodeMigration::new(20240101120000, "create-users")
///         .with_up(|conn| {
///             conn.execute("CREATE TABLE users (id INTEGER PRIMARY KEY)", [])?;
///             Ok(())
///         })
///         .with_down(|conn| {
///             conn.execute("DROP TABLE users", [])?;
///             Ok(())
///         }),
/// );
/// let mut migrator = Migrator::new(config);
/// let outcome = migrator.migrate().unwrap();
/// assert!(outcome.is_done());
/// ```
pub struct Migrator {
    config: Config,
    store: Box<dyn Store>,
}

impl Migrator {
    /// Create a migrator backed by the built-in SQLite store.
    pub fn new(config: Config) -> Self {
        let store = Box::new(SqliteStore::new(&config));
        Self { config, store }
    }

    /// Create a migrator with a custom store backend.
    pub fn with_store(config: Config, store: Box<dyn Store>) -> Self {
        Self { config, store }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The full migration set: discovered files merged with code
    /// migrations from the configuration.
    fn load_migrations(&self) -> Result<BTreeMap<i64, Arc<dyn Migration>>, Error> {
        let mut migrations = match discovery::find_migrations(&self.config) {
            Ok(migrations) => migrations,
            // A purely programmatic migration set needs no directory.
            Err(Error::DirectoryNotFound(_)) if !self.config.code_migrations.is_empty() => {
                BTreeMap::new()
            }
            Err(e) => return Err(e),
        };
        for migration in &self.config.code_migrations {
            let id = migration.id();
            if migrations.insert(id, Arc::clone(migration)).is_some() {
                return Err(Error::Generic(format!("duplicate migration id {id}")));
            }
        }
        Ok(migrations)
    }

    fn run_plan<F>(
        &mut self,
        migrations: &BTreeMap<i64, Arc<dyn Migration>>,
        plan_fn: F,
    ) -> Result<Outcome, Error>
    where
        F: FnOnce(&[i64], &std::collections::HashSet<i64>) -> Vec<Step>,
    {
        self.store.connect()?;
        let result = self.plan_and_execute(migrations, plan_fn);
        if let Err(e) = self.store.disconnect() {
            warn!(error = %e, "failed to close store connection");
        }
        result
    }

    fn plan_and_execute<F>(
        &mut self,
        migrations: &BTreeMap<i64, Arc<dyn Migration>>,
        plan_fn: F,
    ) -> Result<Outcome, Error>
    where
        F: FnOnce(&[i64], &std::collections::HashSet<i64>) -> Vec<Step>,
    {
        let completed = self.store.completed_ids()?;
        let all: Vec<i64> = migrations.keys().copied().collect();
        let plan = plan_fn(&all, &completed);
        self.execute(migrations, plan)
    }

    fn execute(
        &mut self,
        migrations: &BTreeMap<i64, Arc<dyn Migration>>,
        plan: Vec<Step>,
    ) -> Result<Outcome, Error> {
        for (id, direction) in plan {
            self.config.cancellation.check()?;
            let Some(migration) = migrations.get(&id) else {
                warn!(id, "skipping migration recorded in the database but not on disk");
                continue;
            };
            let direction_label = match direction {
                Direction::Up => "up",
                Direction::Down => "down",
            };
            let span = tracing::info_span!(
                "migration",
                id,
                name = migration.name(),
                direction = direction_label
            );
            let _span = span.entered();
            info!("starting");
            let result = match direction {
                Direction::Up => self.store.migrate_up(migration.as_ref()),
                Direction::Down => self.store.migrate_down(migration.as_ref()),
            };
            match result {
                Ok(MigrateResult::Success) => info!("finished"),
                Ok(MigrateResult::Ignored) => {
                    info!("reservation held by another actor, stopping");
                    return Ok(Outcome::Ignored);
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    error!(error = %e, "migration failed, stopping the batch");
                    return Ok(Outcome::Failed(e));
                }
            }
        }
        Ok(Outcome::Done)
    }

    /// Apply all pending migrations in ascending id order.
    pub fn migrate(&mut self) -> Result<Outcome, Error> {
        let migrations = self.load_migrations()?;
        self.run_plan(&migrations, planner::migrate)
    }

    /// Apply pending migrations with ids strictly below `target`.
    pub fn migrate_until_just_before(&mut self, target: i64) -> Result<Outcome, Error> {
        let migrations = self.load_migrations()?;
        self.run_plan(&migrations, |all, completed| {
            planner::migrate_until_just_before(all, completed, target)
        })
    }

    /// Apply the listed migrations in the given order, skipping ids that
    /// are unknown or already applied.
    pub fn up(&mut self, ids: &[i64]) -> Result<Outcome, Error> {
        let migrations = self.load_migrations()?;
        self.run_plan(&migrations, |all, completed| {
            planner::up(all, completed, ids)
        })
    }

    /// Roll back the listed migrations in the given order, skipping ids
    /// that are unknown or not applied.
    pub fn down(&mut self, ids: &[i64]) -> Result<Outcome, Error> {
        let migrations = self.load_migrations()?;
        self.run_plan(&migrations, |all, completed| {
            planner::down(all, completed, ids)
        })
    }

    /// Roll back the most recently applied migration.
    pub fn rollback(&mut self) -> Result<Outcome, Error> {
        let migrations = self.load_migrations()?;
        self.run_plan(&migrations, |_all, completed| planner::rollback(completed))
    }

    /// Roll back applied migrations with ids strictly above `target`, most
    /// recent first.
    pub fn rollback_until_just_after(&mut self, target: i64) -> Result<Outcome, Error> {
        let migrations = self.load_migrations()?;
        self.run_plan(&migrations, |_all, completed| {
            planner::rollback_until_just_after(completed, target)
        })
    }

    /// Roll back everything, then apply the full set from scratch.
    pub fn reset(&mut self) -> Result<Outcome, Error> {
        let migrations = self.load_migrations()?;
        self.run_plan(&migrations, planner::reset)
    }

    /// Names of pending migrations in the order `migrate` would apply
    /// them, without executing anything.
    pub fn pending_list(&mut self) -> Result<Vec<String>, Error> {
        let migrations = self.load_migrations()?;
        self.store.connect()?;
        let completed = self.store.completed_ids();
        if let Err(e) = self.store.disconnect() {
            warn!(error = %e, "failed to close store connection");
        }
        let completed = completed?;
        let all: Vec<i64> = migrations.keys().copied().collect();
        Ok(planner::migrate(&all, &completed)
            .into_iter()
            .map(|(id, _)| migrations[&id].name().to_string())
            .collect())
    }

    /// All known migrations as (id, name), ascending. Needs no database.
    pub fn migration_list(&self) -> Result<Vec<(i64, String)>, Error> {
        let migrations = self.load_migrations()?;
        Ok(migrations
            .iter()
            .map(|(id, m)| (*id, m.name().to_string()))
            .collect())
    }

    /// Applied migrations as (id, name), ascending. Ids recorded in the
    /// database but unknown to the migration set keep their id with an
    /// empty name.
    pub fn applied_list(&mut self) -> Result<Vec<(i64, String)>, Error> {
        let migrations = self.load_migrations()?;
        self.store.connect()?;
        let completed = self.store.completed_ids();
        if let Err(e) = self.store.disconnect() {
            warn!(error = %e, "failed to close store connection");
        }
        let mut ids: Vec<i64> = completed?.into_iter().collect();
        ids.sort_unstable();
        Ok(ids
            .into_iter()
            .map(|id| {
                let name = migrations
                    .get(&id)
                    .map(|m| m.name().to_string())
                    .unwrap_or_default();
                (id, name)
            })
            .collect())
    }

    /// Run the configured init script. The script is not a migration: it
    /// is applied on explicit request only and never recorded.
    pub fn init(&mut self) -> Result<(), Error> {
        let source = discovery::resolve_source(&self.config)?;
        let script = discovery::read_script(&source, &self.config.init_script)?;
        self.store.connect()?;
        let result = self.store.init(&script);
        if let Err(e) = self.store.disconnect() {
            warn!(error = %e, "failed to close store connection");
        }
        result
    }

    /// Create an empty up/down migration file pair named after `name`,
    /// stamped with the current UTC time. Returns the two paths.
    pub fn create(&self, name: &str) -> Result<(PathBuf, PathBuf), Error> {
        let dir = match discovery::resolve_source(&self.config) {
            Ok(MigrationSource::Directory(dir)) => dir,
            Ok(MigrationSource::Archive { .. }) => {
                return Err(Error::Generic(
                    "cannot create migration files inside an archive".into(),
                ));
            }
            Err(Error::DirectoryNotFound(_)) => {
                let dir =
                    Path::new(&self.config.parent_migration_dir).join(&self.config.migration_dir);
                fs::create_dir_all(&dir)?;
                dir
            }
            Err(e) => return Err(e),
        };
        let stamp = Utc::now().format("%Y%m%d%H%M%S");
        let slug = kebab_case(name);
        if slug.is_empty() {
            return Err(Error::Generic(format!("unusable migration name {name:?}")));
        }
        let up = dir.join(format!("{stamp}-{slug}.up.sql"));
        let down = dir.join(format!("{stamp}-{slug}.down.sql"));
        fs::write(&up, "")?;
        fs::write(&down, "")?;
        info!(up = %up.display(), down = %down.display(), "created migration files");
        Ok((up, down))
    }
}

/// Lowercase `name` and collapse anything that isn't alphanumeric into
/// single dashes.
fn kebab_case(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_alphanumeric() {
            for lower in c.to_lowercase() {
                slug.push(lower);
            }
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestHarness;

    const CREATE_FOO: i64 = 20111202110600;
    const CREATE_BAR: i64 = 20111202113000;
    const MULTIPLE: i64 = 20120827170200;

    /// The canonical three-migration set used across the scenarios.
    fn seed_standard_set(harness: &TestHarness) {
        harness
            .write_migration(
                "20111202110600-create-foo.up.sql",
                "CREATE TABLE foo (id INTEGER);",
            )
            .unwrap();
        harness
            .write_migration("20111202110600-create-foo.down.sql", "DROP TABLE foo;")
            .unwrap();
        harness
            .write_migration(
                "20111202113000-create-bar.up.sql",
                "CREATE TABLE bar (id INTEGER);",
            )
            .unwrap();
        harness
            .write_migration("20111202113000-create-bar.down.sql", "DROP TABLE bar;")
            .unwrap();
        harness
            .write_migration(
                "20120827170200-multiple-statements.up.sql",
                "CREATE TABLE quux (id INTEGER);\n--;;\nCREATE TABLE quux2 (id INTEGER);\n",
            )
            .unwrap();
        harness
            .write_migration(
                "20120827170200-multiple-statements.down.sql",
                "DROP TABLE quux;\n--;;\nDROP TABLE quux2;\n",
            )
            .unwrap();
    }

    #[test]
    fn migrate_applies_the_full_set() {
        let harness = TestHarness::new();
        seed_standard_set(&harness);
        let mut migrator = harness.migrator();

        let outcome = migrator.migrate().unwrap();
        assert!(outcome.is_done());

        for table in ["foo", "bar", "quux", "quux2"] {
            harness.assert_table_exists(table).unwrap();
        }
        assert_eq!(
            harness.completed_ids().unwrap(),
            vec![CREATE_FOO, CREATE_BAR, MULTIPLE]
        );
        assert!(!harness.reservation_held().unwrap());
    }

    #[test]
    fn migrate_twice_applies_nothing_new() {
        let harness = TestHarness::new();
        seed_standard_set(&harness);
        let mut migrator = harness.migrator();
        migrator.migrate().unwrap().unwrap_done();
        let snapshot = harness.capture_schema().unwrap();

        migrator.migrate().unwrap().unwrap_done();
        harness.assert_schema_matches(&snapshot).unwrap();
        assert_eq!(
            harness.completed_ids().unwrap(),
            vec![CREATE_FOO, CREATE_BAR, MULTIPLE]
        );
    }

    #[test]
    fn down_rolls_back_a_single_migration() {
        let harness = TestHarness::new();
        seed_standard_set(&harness);
        let mut migrator = harness.migrator();
        migrator.migrate().unwrap().unwrap_done();

        migrator.down(&[CREATE_FOO]).unwrap().unwrap_done();

        let tables = harness.table_names().unwrap();
        assert!(!tables.contains(&"foo".to_string()));
        for table in ["bar", "quux", "quux2"] {
            harness.assert_table_exists(table).unwrap();
        }
        assert_eq!(harness.completed_ids().unwrap(), vec![CREATE_BAR, MULTIPLE]);
    }

    #[test]
    fn rollback_until_just_after_keeps_the_target() {
        let harness = TestHarness::new();
        seed_standard_set(&harness);
        let mut migrator = harness.migrator();
        migrator.migrate().unwrap().unwrap_done();

        migrator
            .rollback_until_just_after(CREATE_FOO)
            .unwrap()
            .unwrap_done();

        harness.assert_table_exists("foo").unwrap();
        let tables = harness.table_names().unwrap();
        for table in ["bar", "quux", "quux2"] {
            assert!(!tables.contains(&table.to_string()), "{table} should be gone");
        }
        assert_eq!(harness.completed_ids().unwrap(), vec![CREATE_FOO]);
    }

    #[test]
    fn migrate_until_just_before_stops_at_the_target() {
        let harness = TestHarness::new();
        seed_standard_set(&harness);
        let mut migrator = harness.migrator();

        migrator
            .migrate_until_just_before(MULTIPLE)
            .unwrap()
            .unwrap_done();

        harness.assert_table_exists("foo").unwrap();
        harness.assert_table_exists("bar").unwrap();
        let tables = harness.table_names().unwrap();
        assert!(!tables.contains(&"quux".to_string()));
        assert!(!tables.contains(&"quux2".to_string()));
    }

    #[test]
    fn migrate_is_ignored_while_the_reservation_is_held() {
        let harness = TestHarness::new();
        seed_standard_set(&harness);
        let mut migrator = harness.migrator();
        // materialize the bookkeeping table without applying anything
        assert!(migrator.pending_list().unwrap().len() == 3);
        harness.hold_reservation().unwrap();

        let outcome = migrator.migrate().unwrap();
        assert!(outcome.is_ignored());
        let tables = harness.table_names().unwrap();
        assert!(!tables.contains(&"foo".to_string()));
        assert!(harness.completed_ids().unwrap().is_empty());
    }

    #[test]
    fn a_broken_migration_backs_out_and_fails_the_batch() {
        let harness = TestHarness::new();
        harness
            .write_migration(
                "20120827170200-multiple-statements.up.sql",
                "CREATE TABLE quux2 (id INTEGER);\n--;;\nCREATE TABLE quux3 (id INTEGER;\n",
            )
            .unwrap();
        harness
            .write_migration(
                "20120827170200-multiple-statements.down.sql",
                "DROP TABLE IF EXISTS quux2;\n--;;\nDROP TABLE IF EXISTS quux3;\n",
            )
            .unwrap();
        let mut migrator = harness.migrator();

        let outcome = migrator.migrate().unwrap();
        assert!(outcome.is_failed());

        let tables = harness.table_names().unwrap();
        assert!(!tables.contains(&"quux2".to_string()));
        assert!(!tables.contains(&"quux3".to_string()));
        assert!(harness.completed_ids().unwrap().is_empty());
        assert!(!harness.reservation_held().unwrap());
    }

    #[test]
    fn a_failure_stops_the_batch_but_keeps_earlier_migrations() {
        let harness = TestHarness::new();
        harness
            .write_migration("1-ok.up.sql", "CREATE TABLE ok (id INTEGER);")
            .unwrap();
        harness
            .write_migration("2-bad.up.sql", "nonsense;")
            .unwrap();
        harness
            .write_migration("3-never.up.sql", "CREATE TABLE never (id INTEGER);")
            .unwrap();
        let mut migrator = harness.migrator();

        let outcome = migrator.migrate().unwrap();
        assert!(outcome.is_failed());
        harness.assert_table_exists("ok").unwrap();
        let tables = harness.table_names().unwrap();
        assert!(!tables.contains(&"never".to_string()));
        assert_eq!(harness.completed_ids().unwrap(), vec![1]);
        assert!(!harness.reservation_held().unwrap());
    }

    #[test]
    fn cancellation_during_the_first_hook_call_unwinds_cleanly() {
        let harness = TestHarness::new();
        seed_standard_set(&harness);
        let config = harness.config();
        let token = config.cancellation();
        let config = config.with_modify_sql_fn(move |statement| {
            token.cancel();
            vec![statement.to_string()]
        });
        let mut migrator = Migrator::new(config);

        let result = migrator.migrate();
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(harness.completed_ids().unwrap().is_empty());
        assert!(!harness.reservation_held().unwrap());
    }

    #[test]
    fn up_then_down_then_up_round_trips() {
        let harness = TestHarness::new();
        seed_standard_set(&harness);
        let mut migrator = harness.migrator();
        migrator.up(&[CREATE_FOO]).unwrap().unwrap_done();
        let snapshot = harness.capture_schema().unwrap();

        migrator.down(&[CREATE_FOO]).unwrap().unwrap_done();
        assert!(harness.completed_ids().unwrap().is_empty());

        migrator.up(&[CREATE_FOO]).unwrap().unwrap_done();
        harness.assert_schema_matches(&snapshot).unwrap();
        assert_eq!(harness.completed_ids().unwrap(), vec![CREATE_FOO]);
    }

    #[test]
    fn up_skips_unknown_and_applied_ids() {
        let harness = TestHarness::new();
        seed_standard_set(&harness);
        let mut migrator = harness.migrator();
        migrator.up(&[CREATE_FOO]).unwrap().unwrap_done();
        // unknown id and the already-applied id are both skipped
        migrator.up(&[999, CREATE_FOO, CREATE_BAR]).unwrap().unwrap_done();
        assert_eq!(harness.completed_ids().unwrap(), vec![CREATE_FOO, CREATE_BAR]);
    }

    #[test]
    fn reset_rebuilds_from_scratch() {
        let harness = TestHarness::new();
        seed_standard_set(&harness);
        let mut migrator = harness.migrator();
        migrator
            .migrate_until_just_before(MULTIPLE)
            .unwrap()
            .unwrap_done();
        harness.execute("INSERT INTO foo (id) VALUES (42)").unwrap();

        migrator.reset().unwrap().unwrap_done();

        for table in ["foo", "bar", "quux", "quux2"] {
            harness.assert_table_exists(table).unwrap();
        }
        // the old contents are gone: foo was dropped and recreated
        let count: i64 = harness.query_one("SELECT COUNT(*) FROM foo").unwrap();
        assert_eq!(count, 0);
        assert_eq!(
            harness.completed_ids().unwrap(),
            vec![CREATE_FOO, CREATE_BAR, MULTIPLE]
        );
    }

    #[test]
    fn pending_list_reports_names_without_executing() {
        let harness = TestHarness::new();
        seed_standard_set(&harness);
        let mut migrator = harness.migrator();
        migrator.up(&[CREATE_FOO]).unwrap().unwrap_done();

        let pending = migrator.pending_list().unwrap();
        assert_eq!(pending, vec!["create-bar", "multiple-statements"]);
        let tables = harness.table_names().unwrap();
        assert!(!tables.contains(&"bar".to_string()));
    }

    #[test]
    fn applied_list_pairs_ids_with_names() {
        let harness = TestHarness::new();
        seed_standard_set(&harness);
        let mut migrator = harness.migrator();
        migrator.up(&[CREATE_BAR]).unwrap().unwrap_done();
        assert_eq!(
            migrator.applied_list().unwrap(),
            vec![(CREATE_BAR, "create-bar".to_string())]
        );
    }

    #[test]
    fn init_runs_the_init_script_only_on_request() {
        let harness = TestHarness::new();
        harness
            .write_migration("init.sql", "CREATE TABLE base (id INTEGER);")
            .unwrap();
        seed_standard_set(&harness);
        let mut migrator = harness.migrator();

        migrator.migrate().unwrap().unwrap_done();
        let tables = harness.table_names().unwrap();
        assert!(!tables.contains(&"base".to_string()));

        migrator.init().unwrap();
        harness.assert_table_exists("base").unwrap();
        // still not recorded as a migration
        assert_eq!(
            harness.completed_ids().unwrap(),
            vec![CREATE_FOO, CREATE_BAR, MULTIPLE]
        );
    }

    #[test]
    fn code_migrations_merge_with_discovered_ones() {
        use crate::migration::CodeMigration;

        let harness = TestHarness::new();
        seed_standard_set(&harness);
        let config = harness.config().with_migration(
            CodeMigration::new(20130101000000, "create-baz")
                .with_up(|conn| {
                    conn.execute("CREATE TABLE baz (id INTEGER)", [])?;
                    Ok(())
                })
                .with_down(|conn| {
                    conn.execute("DROP TABLE baz", [])?;
                    Ok(())
                }),
        );
        let mut migrator = Migrator::new(config);
        migrator.migrate().unwrap().unwrap_done();
        harness.assert_table_exists("baz").unwrap();
        assert_eq!(
            harness.completed_ids().unwrap(),
            vec![CREATE_FOO, CREATE_BAR, MULTIPLE, 20130101000000]
        );
    }

    #[test]
    fn duplicate_ids_across_sources_are_rejected() {
        use crate::migration::CodeMigration;

        let harness = TestHarness::new();
        seed_standard_set(&harness);
        let config = harness
            .config()
            .with_migration(CodeMigration::new(CREATE_FOO, "create-foo-again"));
        let mut migrator = Migrator::new(config);
        assert!(matches!(migrator.migrate(), Err(Error::Generic(_))));
    }

    #[test]
    fn missing_directory_is_fatal_for_migrate() {
        use crate::config::{Config, DbSpec};

        let mut migrator = Migrator::new(
            Config::new(DbSpec::InMemory).with_migration_dir("/definitely/not/here"),
        );
        assert!(matches!(
            migrator.migrate(),
            Err(Error::DirectoryNotFound(_))
        ));
    }

    #[test]
    fn migrations_under_a_path_with_spaces_apply() {
        let harness = TestHarness::new();
        let spaced = harness.dir_path().join("my migrations");
        fs::create_dir_all(&spaced).unwrap();
        fs::write(
            spaced.join("20111202110600-create-foo.up.sql"),
            "CREATE TABLE foo (id INTEGER);",
        )
        .unwrap();
        let config = harness
            .config()
            .with_migration_dir(spaced.to_string_lossy().into_owned());
        let mut migrator = Migrator::new(config);
        migrator.migrate().unwrap().unwrap_done();
        harness.assert_table_exists("foo").unwrap();
    }

    #[test]
    fn create_writes_a_timestamped_file_pair() {
        let harness = TestHarness::new();
        let migrator = harness.migrator();
        let (up, down) = migrator.create("Add User Email").unwrap();
        assert!(up.is_file());
        assert!(down.is_file());
        let up_name = up.file_name().unwrap().to_string_lossy().into_owned();
        assert!(up_name.ends_with("-add-user-email.up.sql"));
        let stamp = &up_name[..14];
        assert!(stamp.chars().all(|c| c.is_ascii_digit()));
        assert!(down
            .file_name()
            .unwrap()
            .to_string_lossy()
            .ends_with("-add-user-email.down.sql"));
    }

    #[test]
    fn kebab_case_collapses_separators() {
        assert_eq!(kebab_case("Add User  Email"), "add-user-email");
        assert_eq!(kebab_case("create_foo"), "create-foo");
        assert_eq!(kebab_case("  spaced  "), "spaced");
        assert_eq!(kebab_case("???"), "");
    }
}
