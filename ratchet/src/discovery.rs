//! Locating and parsing migration files.
//!
//! The migration directory is resolved in order: an `<archive>!<dir>` pair
//! naming a directory inside a zip/JAR archive, then `<parent>/<name>` on
//! the filesystem, then `<name>` as a plain relative path. Paths are
//! percent-decoded and backslash-normalized before use.
//!
//! Filenames follow `<digits>-<name>.(up|down).sql`, with an optional
//! `.no-tx` marker before the extension for the non-transactional variant.
//! The up and down files for one id group into a single migration; files
//! that don't match the pattern are ignored with a warning.

use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use percent_encoding::percent_decode_str;
use regex::Regex;
use tracing::warn;

use crate::config::Config;
use crate::error::Error;
use crate::migration::{Migration, SqlMigration, SqlPayload};

static FILENAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)-(.+)\.(up|down)(\.no-tx)?\.([A-Za-z0-9]+)$")
        .expect("filename pattern is valid")
});

/// One side of a migration as read from the source, before kind
/// construction.
#[derive(Debug, Clone)]
pub struct RawPayload {
    pub content: String,
    /// False when the filename carried the `.no-tx` marker.
    pub transactional: bool,
}

/// All files grouped under one migration id, handed to kind factories.
#[derive(Debug, Clone)]
pub struct RawMigration {
    pub id: i64,
    /// The `<name>` segment of the filename, verbatim.
    pub name: String,
    /// The trailing extension, lowercased. Selects the migration kind.
    pub extension: String,
    pub up: Option<RawPayload>,
    pub down: Option<RawPayload>,
}

/// Where migration files were found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationSource {
    Directory(PathBuf),
    Archive { archive: PathBuf, dir: String },
}

/// Percent-decode a configured path and normalize backslashes to forward
/// slashes.
fn normalize_path(raw: &str) -> Result<String, Error> {
    let decoded = percent_decode_str(raw)
        .decode_utf8()
        .map_err(|e| Error::Generic(format!("invalid percent-encoding in path {raw:?}: {e}")))?;
    Ok(decoded.replace('\\', "/"))
}

/// Resolve the configured migration directory to a concrete source.
pub fn resolve_source(config: &Config) -> Result<MigrationSource, Error> {
    let dir = normalize_path(&config.migration_dir)?;

    if let Some((archive, inner)) = dir.split_once('!') {
        let archive = PathBuf::from(archive);
        if !archive.is_file() {
            return Err(Error::DirectoryNotFound(config.migration_dir.clone()));
        }
        let inner = inner.trim_matches('/').to_string();
        return Ok(MigrationSource::Archive { archive, dir: inner });
    }

    let parent = normalize_path(&config.parent_migration_dir)?;
    let under_parent = Path::new(&parent).join(&dir);
    if under_parent.is_dir() {
        return Ok(MigrationSource::Directory(under_parent));
    }

    let plain = PathBuf::from(&dir);
    if plain.is_dir() {
        return Ok(MigrationSource::Directory(plain));
    }

    Err(Error::DirectoryNotFound(config.migration_dir.clone()))
}

/// Read one named script (e.g. the init script) from the source.
pub(crate) fn read_script(source: &MigrationSource, name: &str) -> Result<String, Error> {
    match source {
        MigrationSource::Directory(dir) => {
            let path = dir.join(name);
            if !path.is_file() {
                return Err(Error::Generic(format!(
                    "script {name:?} not found in {}",
                    dir.display()
                )));
            }
            Ok(fs::read_to_string(path)?)
        }
        MigrationSource::Archive { archive, dir } => {
            let file = fs::File::open(archive)?;
            let mut zip = zip::ZipArchive::new(file)?;
            let entry_name = format!("{dir}/{name}");
            let mut entry = zip.by_name(&entry_name).map_err(|_| {
                Error::Generic(format!(
                    "script {entry_name:?} not found in {}",
                    archive.display()
                ))
            })?;
            let mut content = String::new();
            entry.read_to_string(&mut content)?;
            Ok(content)
        }
    }
}

/// List migration file candidates as (file name, content) pairs.
fn list_entries(source: &MigrationSource) -> Result<Vec<(String, String)>, Error> {
    match source {
        MigrationSource::Directory(dir) => {
            let mut entries = Vec::new();
            for entry in fs::read_dir(dir)? {
                let entry = entry?;
                if !entry.file_type()?.is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().into_owned();
                let content = fs::read_to_string(entry.path())?;
                entries.push((name, content));
            }
            Ok(entries)
        }
        MigrationSource::Archive { archive, dir } => {
            let file = fs::File::open(archive)?;
            let mut zip = zip::ZipArchive::new(file)?;
            let prefix = Regex::new(&format!("^{}/.+", regex::escape(dir)))
                .map_err(|e| Error::Generic(format!("invalid archive directory {dir:?}: {e}")))?;
            let mut entries = Vec::new();
            for index in 0..zip.len() {
                let mut entry = zip.by_index(index)?;
                if entry.is_dir() {
                    continue;
                }
                let name = entry.name().replace('\\', "/");
                if !prefix.is_match(&name) {
                    continue;
                }
                let stripped = name[dir.len() + 1..].to_string();
                if stripped.contains('/') {
                    continue;
                }
                let mut content = String::new();
                entry.read_to_string(&mut content)?;
                entries.push((stripped, content));
            }
            Ok(entries)
        }
    }
}

/// Discover migrations under the configured directory, keyed and ordered
/// by id.
pub fn find_migrations(config: &Config) -> Result<BTreeMap<i64, Arc<dyn Migration>>, Error> {
    let source = resolve_source(config)?;
    migrations_from_source(config, &source)
}

pub(crate) fn migrations_from_source(
    config: &Config,
    source: &MigrationSource,
) -> Result<BTreeMap<i64, Arc<dyn Migration>>, Error> {
    let excluded = config.excluded_scripts();
    let mut grouped: BTreeMap<i64, RawMigration> = BTreeMap::new();

    for (file_name, content) in list_entries(source)? {
        if excluded.contains(file_name.as_str()) {
            continue;
        }
        let Some(caps) = FILENAME_RE.captures(&file_name) else {
            warn!(file = %file_name, "skipping file that does not look like a migration");
            continue;
        };
        let id: i64 = match caps[1].parse() {
            Ok(id) => id,
            Err(_) => {
                warn!(file = %file_name, "skipping migration with out-of-range id");
                continue;
            }
        };
        let name = caps[2].to_string();
        let direction = caps[3].to_string();
        let transactional = caps.get(4).is_none();
        let extension = caps[5].to_lowercase();

        let entry = grouped.entry(id).or_insert_with(|| RawMigration {
            id,
            name: name.clone(),
            extension: extension.clone(),
            up: None,
            down: None,
        });
        if entry.name != name {
            return Err(Error::Generic(format!(
                "conflicting names for migration {id}: {:?} and {name:?}",
                entry.name
            )));
        }
        if entry.extension != extension {
            return Err(Error::Generic(format!(
                "conflicting kinds for migration {id}: {:?} and {extension:?}",
                entry.extension
            )));
        }
        let payload = RawPayload {
            content,
            transactional,
        };
        let side = match direction.as_str() {
            "up" => &mut entry.up,
            _ => &mut entry.down,
        };
        if side.is_some() {
            return Err(Error::Generic(format!(
                "duplicate {direction} file for migration {id}"
            )));
        }
        *side = Some(payload);
    }

    let mut migrations: BTreeMap<i64, Arc<dyn Migration>> = BTreeMap::new();
    for (id, raw) in grouped {
        if raw.extension == "sql" {
            let migration = SqlMigration::new(
                raw.id,
                raw.name,
                raw.up.map(|p| SqlPayload {
                    content: p.content,
                    transactional: p.transactional,
                }),
                raw.down.map(|p| SqlPayload {
                    content: p.content,
                    transactional: p.transactional,
                }),
                &config.command_separator,
            )?;
            migrations.insert(id, Arc::new(migration));
        } else if let Some(factory) = config.kinds.get(&raw.extension) {
            migrations.insert(id, Arc::from(factory(raw)?));
        } else {
            warn!(
                id,
                extension = %raw.extension,
                "skipping migration with unregistered kind"
            );
        }
    }
    Ok(migrations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbSpec;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    fn config_for(dir: &Path) -> Config {
        Config::new(DbSpec::InMemory).with_migration_dir(dir.to_string_lossy().into_owned())
    }

    #[test]
    fn groups_up_and_down_files_by_id() {
        let tmp = tempfile::tempdir().unwrap();
        write_file(
            tmp.path(),
            "20111202110600-create-foo.up.sql",
            "CREATE TABLE foo (id INTEGER);",
        );
        write_file(
            tmp.path(),
            "20111202110600-create-foo.down.sql",
            "DROP TABLE foo;",
        );
        write_file(
            tmp.path(),
            "20111202113000-create-bar.up.sql",
            "CREATE TABLE bar (id INTEGER);",
        );

        let migrations = find_migrations(&config_for(tmp.path())).unwrap();
        assert_eq!(
            migrations.keys().copied().collect::<Vec<_>>(),
            vec![20111202110600, 20111202113000]
        );
        assert_eq!(migrations[&20111202110600].name(), "create-foo");
        assert_eq!(migrations[&20111202113000].name(), "create-bar");
    }

    #[test]
    fn ignores_files_that_do_not_match_the_pattern() {
        let tmp = tempfile::tempdir().unwrap();
        write_file(tmp.path(), "README.md", "not a migration");
        write_file(tmp.path(), "no-id.up.sql", "SELECT 1;");
        write_file(
            tmp.path(),
            "20111202110600-create-foo.up.sql",
            "CREATE TABLE foo (id INTEGER);",
        );

        let migrations = find_migrations(&config_for(tmp.path())).unwrap();
        assert_eq!(migrations.len(), 1);
    }

    #[test]
    fn skips_ids_that_overflow() {
        let tmp = tempfile::tempdir().unwrap();
        write_file(
            tmp.path(),
            "99999999999999999999999999-too-big.up.sql",
            "SELECT 1;",
        );
        let migrations = find_migrations(&config_for(tmp.path())).unwrap();
        assert!(migrations.is_empty());
    }

    #[test]
    fn excludes_the_init_script_and_configured_scripts() {
        let tmp = tempfile::tempdir().unwrap();
        write_file(tmp.path(), "init.sql", "CREATE TABLE base (id INTEGER);");
        write_file(tmp.path(), "seed.sql", "INSERT INTO base VALUES (1);");
        write_file(
            tmp.path(),
            "20111202110600-create-foo.up.sql",
            "CREATE TABLE foo (id INTEGER);",
        );

        let config = config_for(tmp.path()).with_exclude_scripts(["seed.sql"]);
        let migrations = find_migrations(&config).unwrap();
        assert_eq!(migrations.len(), 1);
    }

    #[test]
    fn no_tx_marker_sets_the_transactional_flag() {
        let tmp = tempfile::tempdir().unwrap();
        write_file(
            tmp.path(),
            "20111202110600-bulk-load.up.no-tx.sql",
            "SELECT 1;",
        );
        write_file(
            tmp.path(),
            "20111202110600-bulk-load.down.sql",
            "SELECT 1;",
        );

        let migrations = find_migrations(&config_for(tmp.path())).unwrap();
        let migration = &migrations[&20111202110600];
        assert!(!migration.transactional_up());
        assert!(migration.transactional_down());
    }

    #[test]
    fn duplicate_side_for_one_id_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        write_file(tmp.path(), "1-a.up.sql", "SELECT 1;");
        write_file(tmp.path(), "1-a.up.no-tx.sql", "SELECT 1;");
        let result = find_migrations(&config_for(tmp.path()));
        assert!(matches!(result, Err(Error::Generic(_))));
    }

    #[test]
    fn missing_directory_is_fatal() {
        let config = Config::new(DbSpec::InMemory).with_migration_dir("/does/not/exist");
        let result = find_migrations(&config);
        assert!(matches!(result, Err(Error::DirectoryNotFound(_))));
    }

    #[test]
    fn resolves_under_the_parent_directory_first() {
        let tmp = tempfile::tempdir().unwrap();
        let parent = tmp.path().join("resources");
        let dir = parent.join("migrations");
        fs::create_dir_all(&dir).unwrap();
        write_file(&dir, "1-a.up.sql", "SELECT 1;");

        let config = Config::new(DbSpec::InMemory)
            .with_migration_dir("migrations")
            .with_parent_migration_dir(parent.to_string_lossy().into_owned());
        let source = resolve_source(&config).unwrap();
        assert_eq!(source, MigrationSource::Directory(dir));
    }

    #[test]
    fn decodes_percent_encoded_directories_with_spaces() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("my migrations");
        fs::create_dir_all(&dir).unwrap();
        write_file(
            &dir,
            "20111202110600-create-foo.up.sql",
            "CREATE TABLE foo (id INTEGER);",
        );

        let encoded = dir.to_string_lossy().replace(' ', "%20");
        let config = Config::new(DbSpec::InMemory).with_migration_dir(encoded);
        let migrations = find_migrations(&config).unwrap();
        assert_eq!(migrations.len(), 1);
    }

    fn write_archive(path: &Path, entries: &[(&str, &str)]) {
        let file = fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for (name, content) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn archive_discovery_matches_filesystem_discovery() {
        let tmp = tempfile::tempdir().unwrap();
        let entries = [
            (
                "migrations/20111202110600-create-foo.up.sql",
                "CREATE TABLE foo (id INTEGER);",
            ),
            (
                "migrations/20111202110600-create-foo.down.sql",
                "DROP TABLE foo;",
            ),
            (
                "migrations/20111202113000-create-bar.up.sql",
                "CREATE TABLE bar (id INTEGER);",
            ),
            ("migrations/init.sql", "CREATE TABLE base (id INTEGER);"),
            ("other/ignored.txt", "not a migration"),
        ];

        // filesystem copy
        let dir = tmp.path().join("migrations");
        fs::create_dir_all(&dir).unwrap();
        for (name, content) in &entries {
            if let Some(rest) = name.strip_prefix("migrations/") {
                write_file(&dir, rest, content);
            }
        }
        let from_fs =
            find_migrations(&config_for(&dir)).unwrap();

        // archive copy
        let archive = tmp.path().join("app.jar");
        write_archive(&archive, &entries);
        let config = Config::new(DbSpec::InMemory)
            .with_migration_dir(format!("{}!migrations", archive.to_string_lossy()));
        let from_archive = find_migrations(&config).unwrap();

        assert_eq!(
            from_fs.keys().collect::<Vec<_>>(),
            from_archive.keys().collect::<Vec<_>>()
        );
        for (id, migration) in &from_fs {
            assert_eq!(migration.name(), from_archive[id].name());
        }
    }

    #[test]
    fn reads_the_init_script_from_an_archive() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("app.jar");
        write_archive(
            &archive,
            &[("migrations/init.sql", "CREATE TABLE base (id INTEGER);")],
        );
        let config = Config::new(DbSpec::InMemory)
            .with_migration_dir(format!("{}!migrations", archive.to_string_lossy()));
        let source = resolve_source(&config).unwrap();
        let script = read_script(&source, "init.sql").unwrap();
        assert_eq!(script, "CREATE TABLE base (id INTEGER);");
    }

    #[test]
    fn unregistered_kind_is_skipped_with_a_warning() {
        let tmp = tempfile::tempdir().unwrap();
        write_file(tmp.path(), "1-custom.up.edn", "{}");
        let migrations = find_migrations(&config_for(tmp.path())).unwrap();
        assert!(migrations.is_empty());
    }

    #[test]
    fn registered_kind_constructs_the_migration() {
        use crate::migration::MigrationConn;

        struct NoopMigration {
            id: i64,
            name: String,
        }
        impl Migration for NoopMigration {
            fn id(&self) -> i64 {
                self.id
            }
            fn name(&self) -> &str {
                &self.name
            }
            fn up(&self, _conn: &MigrationConn<'_>) -> Result<(), Error> {
                Ok(())
            }
            fn down(&self, _conn: &MigrationConn<'_>) -> Result<(), Error> {
                Ok(())
            }
        }

        let tmp = tempfile::tempdir().unwrap();
        write_file(tmp.path(), "7-custom.up.noop", "");
        let config = config_for(tmp.path()).register_kind("noop", |raw| {
            Ok(Box::new(NoopMigration {
                id: raw.id,
                name: raw.name,
            }))
        });
        let migrations = find_migrations(&config).unwrap();
        assert_eq!(migrations[&7].name(), "custom");
    }
}
