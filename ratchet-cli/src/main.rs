//! Command-line front-end for ratchet database migrations.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use ratchet::{Config, DbSpec, Error, Migrator, Outcome};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ratchet", version, about = "Database schema migration tool")]
struct Cli {
    /// Path to the SQLite database file.
    #[arg(long, global = true, env = "RATCHET_DATABASE", default_value = "ratchet.db")]
    db: PathBuf,

    /// Migration directory name, or <archive>!<dir> for archives.
    #[arg(long, global = true, env = "RATCHET_MIGRATION_DIR", default_value = "migrations")]
    dir: String,

    /// Filesystem parent tried when resolving the migration directory.
    #[arg(long, global = true, default_value = "resources")]
    parent_dir: String,

    /// Bookkeeping table name.
    #[arg(long, global = true, default_value = "schema_migrations")]
    table: String,

    /// Init script filename.
    #[arg(long, global = true, default_value = "init.sql")]
    init_script: String,

    /// Run the init script without a surrounding transaction.
    #[arg(long, global = true)]
    init_no_transaction: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the init script against the database.
    Init,
    /// Create an empty up/down migration file pair.
    Create {
        /// Human-readable migration name; kebab-cased into the filename.
        name: String,
    },
    /// Apply all pending migrations.
    Migrate {
        /// Stop before this migration id.
        #[arg(long = "until-just-before")]
        until_just_before: Option<i64>,
    },
    /// Roll back the most recently applied migration.
    Rollback {
        /// Roll back everything applied after this migration id.
        #[arg(long = "until-just-after")]
        until_just_after: Option<i64>,
    },
    /// Roll back everything, then migrate from scratch.
    Reset,
    /// Apply specific migrations by id.
    Up {
        #[arg(required = true)]
        ids: Vec<i64>,
    },
    /// Roll back specific migrations by id.
    Down {
        #[arg(required = true)]
        ids: Vec<i64>,
    },
    /// List migrations. Defaults to pending.
    List {
        /// Every migration in the migration directory.
        #[arg(long, conflicts_with_all = ["pending", "applied"])]
        available: bool,
        /// Migrations not yet applied.
        #[arg(long, conflicts_with = "applied")]
        pending: bool,
        /// Migrations recorded as applied.
        #[arg(long)]
        applied: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, Error> {
    let config = Config::new(DbSpec::Path(cli.db))
        .with_migration_dir(cli.dir)
        .with_parent_migration_dir(cli.parent_dir)
        .with_migration_table_name(cli.table)
        .with_init_script(cli.init_script)
        .with_init_in_transaction(!cli.init_no_transaction);
    let mut migrator = Migrator::new(config);

    let outcome = match cli.command {
        Commands::Init => {
            migrator.init()?;
            println!("init script applied");
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Create { name } => {
            let (up, down) = migrator.create(&name)?;
            println!("created {}", up.display());
            println!("created {}", down.display());
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Migrate {
            until_just_before: Some(target),
        } => migrator.migrate_until_just_before(target)?,
        Commands::Migrate { .. } => migrator.migrate()?,
        Commands::Rollback {
            until_just_after: Some(target),
        } => migrator.rollback_until_just_after(target)?,
        Commands::Rollback { .. } => migrator.rollback()?,
        Commands::Reset => migrator.reset()?,
        Commands::Up { ids } => migrator.up(&ids)?,
        Commands::Down { ids } => migrator.down(&ids)?,
        Commands::List {
            available,
            applied,
            ..
        } => {
            if available {
                for (id, name) in migrator.migration_list()? {
                    println!("{id}  {name}");
                }
            } else if applied {
                for (id, name) in migrator.applied_list()? {
                    println!("{id}  {name}");
                }
            } else {
                let pending = migrator.pending_list()?;
                if pending.is_empty() {
                    println!("nothing pending");
                }
                for name in pending {
                    println!("{name}");
                }
            }
            return Ok(ExitCode::SUCCESS);
        }
    };

    Ok(match outcome {
        Outcome::Done => ExitCode::SUCCESS,
        Outcome::Ignored => {
            println!("another migrator holds the reservation; nothing done");
            ExitCode::SUCCESS
        }
        Outcome::Failed(e) => {
            eprintln!("migration failed: {e}");
            ExitCode::FAILURE
        }
    })
}
