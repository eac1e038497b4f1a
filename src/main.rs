//! CabSync command-line interface.
//!
//! ```text
//! cabsync setup
//! cabsync configure <url>
//! cabsync status
//! cabsync pull | push [--force] | sync [--force]
//! cabsync refresh --yes
//! cabsync migrate
//! cabsync check
//! cabsync cleanup-null | dedup | orphans | fk-fix <rules.json>
//! cabsync fix-names
//! cabsync delete <table> [--uuid <uuid>] [--name-like <pattern>]
//! cabsync device
//! cabsync watch [--interval-secs N]
//! ```

use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use flexi_logger::{Cleanup, Criterion, Duplicate, FileSpec, Logger, LoggerHandle, Naming};
use serde::Serialize;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

use cabsync::jobs::{self, dedup, fk_rules, orphans};
use cabsync::settings::{self, MasterSettings};
use cabsync::store::{DeleteFilter, TableKind};
use cabsync::sync::{self, Guarded, StatusReport};
use cabsync::{HttpMasterStore, LocalStore, SyncEngine, audit, service};

#[derive(Parser, Debug)]
#[command(
    name = "cabsync",
    version,
    about = "Offline-first sync for cabinet maintenance tablets"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the local store and assign this device its identity.
    Setup,

    /// Verify a master store target with a live connection test, then save it.
    Configure { url: String },

    /// Per-table counts and master reachability.
    Status,

    /// Fetch master changes into the local store.
    Pull,

    /// Publish dirty local records to the master.
    Push {
        /// Proceed despite safety-guard warnings.
        #[arg(long)]
        force: bool,
    },

    /// Pull, then push.
    Sync {
        /// Proceed despite safety-guard warnings.
        #[arg(long)]
        force: bool,
    },

    /// Replace all local data with the master snapshot (destructive).
    Refresh {
        /// Confirm the wipe.
        #[arg(long)]
        yes: bool,
    },

    /// Assign uuids to legacy rows and mark everything for push.
    Migrate,

    /// Run the pre-flight safety checks.
    Check,

    /// Remove master rows without a usable uuid.
    CleanupNull,

    /// Merge duplicate customers, cabinets and nodes on the master.
    Dedup,

    /// Hard-delete master records whose parent is gone.
    Orphans,

    /// Apply a foreign-key correction rule file against the master.
    FkFix { rules: PathBuf },

    /// Replace empty display names locally and mark them for push.
    FixNames,

    /// Tombstone local records matching a filter (audited).
    Delete {
        table: String,
        #[arg(long)]
        uuid: Option<String>,
        #[arg(long)]
        name_like: Option<String>,
    },

    /// Show this device's identity.
    Device,

    /// Sync on a timer until interrupted.
    Watch {
        #[arg(long, default_value_t = service::DEFAULT_INTERVAL_SECS)]
        interval_secs: u64,
    },
}

fn init_logging() -> Result<LoggerHandle> {
    let log_dir = settings::base_dir().join("logs");
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let attempt = Logger::try_with_str("info")?
            .log_to_file(
                FileSpec::default()
                    .directory(&log_dir)
                    .basename("cabsync")
                    .suffix("log"),
            )
            .rotate(
                Criterion::Size(5_000_000),
                Naming::Numbers,
                Cleanup::KeepLogFiles(10),
            )
            .duplicate_to_stderr(Duplicate::Warn)
            .start();
        if let Ok(handle) = attempt {
            return Ok(handle);
        }
    }
    // No writable base dir (e.g. a fresh shell); log to stderr only.
    Ok(Logger::try_with_str("info")?.start()?)
}

fn open_local() -> Result<LocalStore> {
    LocalStore::open(&settings::database_url()).context("opening local store")
}

fn build_engine() -> Result<SyncEngine<HttpMasterStore>> {
    let local = open_local()?;
    let master_settings = MasterSettings::load()?
        .ok_or_else(|| anyhow!("master store not configured; run `cabsync configure <url>` first"))?;
    let master = HttpMasterStore::connect(&master_settings)?;
    Ok(SyncEngine::new(local, master)?)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_warnings(warnings: &[String]) -> Result<()> {
    let mut stderr = StandardStream::stderr(ColorChoice::Auto);
    stderr.set_color(ColorSpec::new().set_fg(Some(Color::Yellow)).set_bold(true))?;
    for warning in warnings {
        writeln!(stderr, "warning: {}", warning)?;
    }
    stderr.reset()?;
    Ok(())
}

fn print_guarded<T: Serialize>(result: Guarded<T>, retry_hint: &str) -> Result<()> {
    match result {
        Guarded::Ok(report) => print_json(&report),
        Guarded::Blocked { warnings } => {
            print_warnings(&warnings)?;
            eprintln!("blocked by safety guard; {}", retry_hint);
            std::process::exit(2);
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _logger = init_logging()?;

    match cli.command {
        Commands::Setup => {
            let local = open_local()?;
            let device_id = local.device_id()?;
            println!(
                "local store ready at {} (device {})",
                settings::database_url(),
                device_id
            );
        }

        Commands::Configure { url } => {
            let local = open_local()?;
            sync::configure(&local, MasterSettings::new(url)).context("configuring master store")?;
            println!("master store configured");
        }

        Commands::Status => {
            let local = open_local()?;
            let report = match MasterSettings::load()? {
                Some(master_settings) => {
                    let master = HttpMasterStore::connect(&master_settings)?;
                    SyncEngine::new(local, master)?.status()?
                }
                None => StatusReport::unconfigured(&local)?,
            };
            print_json(&report)?;
        }

        Commands::Pull => {
            let engine = build_engine()?;
            print_json(&engine.pull()?)?;
        }

        Commands::Push { force } => {
            let engine = build_engine()?;
            print_guarded(engine.push(force)?, "re-run with --force to acknowledge")?;
        }

        Commands::Sync { force } => {
            let engine = build_engine()?;
            print_guarded(engine.full_sync(force)?, "re-run with --force to acknowledge")?;
        }

        Commands::Refresh { yes } => {
            let engine = build_engine()?;
            print_guarded(engine.full_refresh(yes)?, "re-run with --yes to confirm")?;
        }

        Commands::Migrate => {
            let engine = build_engine()?;
            print_json(&engine.initial_migration()?)?;
        }

        Commands::Check => {
            let engine = build_engine()?;
            let report = engine.safety_check()?;
            print_warnings(&report.warnings)?;
            print_json(&report)?;
        }

        Commands::CleanupNull => {
            let engine = build_engine()?;
            let report = jobs::cleanup_null_identities(engine.master())?;
            audit::record(
                engine.local(),
                engine.device_id(),
                "cleanup_null_identities",
                None,
                Some(&format!("{:?}", report.deleted_by_table)),
            )?;
            print_json(&report)?;
        }

        Commands::Dedup => {
            let engine = build_engine()?;
            let report = dedup::run_all(engine.master())?;
            audit::record(
                engine.local(),
                engine.device_id(),
                "merge_duplicates",
                None,
                Some(&format!("{} parent group(s)", report.parents.groups.len())),
            )?;
            print_json(&report)?;
        }

        Commands::Orphans => {
            let engine = build_engine()?;
            let report = orphans::purge_orphans(engine.master())?;
            audit::record(
                engine.local(),
                engine.device_id(),
                "purge_orphans",
                None,
                Some(&format!("{:?}", report.deleted_by_table)),
            )?;
            print_json(&report)?;
        }

        Commands::FkFix { rules } => {
            let engine = build_engine()?;
            let rules = fk_rules::load_rules(&rules)?;
            let report = fk_rules::correct_foreign_keys(engine.master(), &rules)?;
            audit::record(
                engine.local(),
                engine.device_id(),
                "fk_correction",
                None,
                Some(&format!("{} reassigned", report.reassigned.len())),
            )?;
            if !report.ambiguous.is_empty() {
                print_warnings(&report.ambiguous)?;
            }
            print_json(&report)?;
        }

        Commands::FixNames => {
            let engine = build_engine()?;
            print_json(&engine.default_blank_names()?)?;
        }

        Commands::Delete {
            table,
            uuid,
            name_like,
        } => {
            let engine = build_engine()?;
            let table = TableKind::from_str(&table).map_err(|e| anyhow!(e))?;
            let filter = DeleteFilter {
                uuid,
                name_like,
                include_deleted: false,
            };
            let n = engine.delete_records(table, &filter)?;
            println!("{} record(s) tombstoned in {}", n, table);
        }

        Commands::Device => {
            let local = open_local()?;
            print_json(&sync::collect_device_info(&local)?)?;
        }

        Commands::Watch { interval_secs } => {
            let engine = Arc::new(build_engine()?);
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("starting runtime")?;
            runtime.block_on(service::run_autosync(
                engine,
                Duration::from_secs(interval_secs),
            ));
        }
    }

    Ok(())
}
