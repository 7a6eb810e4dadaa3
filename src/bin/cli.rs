//! Binary entry point for the episignal store CLI.
#![forbid(unsafe_code)]

#[path = "cli/config.rs"]
mod config;

use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use episignal::{
    acquisition::{delete_versions, DeletionInput, LoadOptions},
    admin::{
        checkpoint, repair_staging_sequence, stats, verify, CheckpointMode, VerifyLevel,
    },
    cli::import_export::{run_export, run_import, ExportConfig, ImportConfig},
    meta::{refresh, retrieve, AggregateOptions},
    store::{StoreOptions, StoreSession, Synchronous},
};
use tracing_subscriber::EnvFilter;

use config::{CliConfig, Profile};

const DEFAULT_LOG_FILTER: &str = "warn";

#[derive(Parser, Debug)]
#[command(
    name = "episignal",
    version,
    about = "Load, reconcile and summarize versioned epidemiological signals",
    disable_help_subcommand = true
)]
struct Cli {
    #[command(flatten)]
    open: OpenArgs,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct OpenArgs {
    #[arg(
        long,
        global = true,
        env = "EPISIGNAL_DB",
        value_name = "PATH",
        help = "Database file (defaults to the profile or config database)"
    )]
    db: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        env = "EPISIGNAL_CONFIG",
        value_name = "FILE",
        help = "CLI config file"
    )]
    config: Option<PathBuf>,

    #[arg(long, global = true, help = "Config profile to apply")]
    profile: Option<String>,

    #[arg(long, global = true, value_enum, help = "SQLite synchronous mode override")]
    synchronous: Option<SynchronousArg>,

    #[arg(long, global = true, value_name = "MS", help = "Busy timeout override")]
    busy_timeout_ms: Option<u64>,
}

#[derive(Args, Debug)]
struct LoadCmd {
    #[arg(value_name = "CSV", help = "Observation file to load")]
    input: PathBuf,

    #[arg(long, value_name = "ROWS", help = "Rows per staged batch")]
    batch_size: Option<usize>,

    #[arg(long, help = "Commit after every batch instead of once")]
    commit_partial: bool,

    #[arg(long, help = "Create the database if it does not exist")]
    create: bool,
}

#[derive(Subcommand, Debug)]
enum MetaCommand {
    #[command(about = "Recompute metadata and store a new snapshot")]
    Refresh {
        #[arg(long, help = "Aggregation worker threads")]
        workers: Option<usize>,
    },

    #[command(about = "Print the current metadata snapshot")]
    Show {
        #[arg(long, help = "Only this source")]
        source: Option<String>,

        #[arg(long, help = "Only this signal")]
        signal: Option<String>,
    },

    #[command(about = "Write the current metadata snapshot to CSV")]
    Export {
        #[arg(value_name = "FILE")]
        out: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Load observations from CSV through the staging area")]
    Load(LoadCmd),

    #[command(about = "Delete specific versions listed in a CSV file")]
    Delete {
        #[arg(value_name = "CSV")]
        input: PathBuf,
    },

    #[command(subcommand, about = "Metadata cache commands")]
    Meta(MetaCommand),

    #[command(about = "Print table counts and file sizes")]
    Stats,

    #[command(about = "Check the latest projection against history")]
    Verify {
        #[arg(
            long,
            value_enum,
            default_value_t = VerifyLevelArg::Full,
            help = "Verification level"
        )]
        level: VerifyLevelArg,
    },

    #[command(about = "Clear staging and move its id counter past stored ids")]
    RepairStaging,

    #[command(about = "Checkpoint the write-ahead log")]
    Checkpoint {
        #[arg(
            long,
            value_enum,
            default_value_t = CheckpointModeArg::Truncate,
            help = "Checkpoint mode"
        )]
        mode: CheckpointModeArg,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum SynchronousArg {
    Full,
    Normal,
    Off,
}

impl From<SynchronousArg> for Synchronous {
    fn from(mode: SynchronousArg) -> Self {
        match mode {
            SynchronousArg::Full => Synchronous::Full,
            SynchronousArg::Normal => Synchronous::Normal,
            SynchronousArg::Off => Synchronous::Off,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CheckpointModeArg {
    Passive,
    Truncate,
}

impl From<CheckpointModeArg> for CheckpointMode {
    fn from(mode: CheckpointModeArg) -> Self {
        match mode {
            CheckpointModeArg::Passive => CheckpointMode::Passive,
            CheckpointModeArg::Truncate => CheckpointMode::Truncate,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum VerifyLevelArg {
    Fast,
    Full,
}

impl From<VerifyLevelArg> for VerifyLevel {
    fn from(level: VerifyLevelArg) -> Self {
        match level {
            VerifyLevelArg::Fast => VerifyLevel::Fast,
            VerifyLevelArg::Full => VerifyLevel::Full,
        }
    }
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = CliConfig::load(cli.open.config.clone())?;
    init_logging(config.log_filter());
    let profile = config
        .resolve_profile(cli.open.profile.as_deref())?
        .cloned()
        .unwrap_or_default();
    let db_path = resolve_db_path(&cli.open, &profile, &config)?;
    let open_opts = build_open_options(&cli.open, &profile);

    match cli.command {
        Command::Load(cmd) => {
            let load = LoadOptions {
                batch_size: cmd
                    .batch_size
                    .or(profile.batch_size)
                    .unwrap_or(LoadOptions::default().batch_size),
                commit_partial: cmd.commit_partial || profile.commit_partial.unwrap_or(false),
            };
            let import_cfg = ImportConfig {
                db_path,
                create_if_missing: cmd.create,
                input: cmd.input,
                load,
            };
            let summary = run_import(&import_cfg, &open_opts)?;
            emit(cli.format, &summary.load, || {
                println!(
                    "Loaded {} rows in {} batches ({} rows were not the newest issue)",
                    summary.rows_read, summary.load.batches, summary.load.not_latest
                );
            })?;
        }
        Command::Delete { input } => {
            let mut session = StoreSession::open(&db_path, &open_opts)?;
            let report = delete_versions(&mut session, DeletionInput::File(input))?;
            emit(cli.format, &report, || {
                println!(
                    "Deleted {} of {} requested versions ({} latest rows removed, {} recomputed)",
                    report.history_deleted,
                    report.requested,
                    report.latest_deleted,
                    report.latest_recomputed
                );
            })?;
        }
        Command::Meta(MetaCommand::Refresh { workers }) => {
            let session = StoreSession::open(&db_path, &open_opts)?;
            let opts = AggregateOptions {
                workers: workers.or(profile.workers),
            };
            let report = refresh(&session, &opts)?;
            emit(cli.format, &report, || {
                println!(
                    "Stored metadata snapshot {} with {} groups in {:.2} ms",
                    report.timestamp, report.groups, report.duration_ms
                );
            })?;
        }
        Command::Meta(MetaCommand::Show { source, signal }) => {
            let session = StoreSession::open(&db_path, &open_opts)?;
            let Some(snapshot) = retrieve(&session)? else {
                return Err("no metadata snapshot stored (run `meta refresh` first)".into());
            };
            let entries: Vec<_> = snapshot
                .entries()
                .iter()
                .filter(|e| source.as_deref().map_or(true, |s| e.source == s))
                .filter(|e| signal.as_deref().map_or(true, |s| e.signal == s))
                .collect();
            emit(cli.format, &entries, || {
                println!("Snapshot {} ({} groups)", snapshot.timestamp(), entries.len());
                for e in &entries {
                    println!(
                        "  {}/{} {} {}: time {}..{} locations={} max_issue={} lag {}..{} mean={} stdev={}",
                        e.source,
                        e.signal,
                        e.time_type,
                        e.geo_type,
                        e.min_time,
                        e.max_time,
                        e.num_locations,
                        e.max_issue,
                        e.min_lag,
                        e.max_lag,
                        fmt_opt(e.mean_value),
                        fmt_opt(e.stdev_value)
                    );
                }
            })?;
        }
        Command::Meta(MetaCommand::Export { out }) => {
            let export_cfg = ExportConfig { db_path, out };
            let summary = run_export(&export_cfg, &open_opts)?;
            emit(cli.format, &summary, || {
                println!(
                    "Exported {} metadata rows from snapshot {}",
                    summary.rows_exported, summary.snapshot_timestamp
                );
            })?;
        }
        Command::Stats => {
            let report = stats(&db_path, &open_opts)?;
            emit(cli.format, &report, || print_stats_text(&report))?;
        }
        Command::Verify { level } => {
            let report = verify(&db_path, &open_opts, level.into())?;
            emit(cli.format, &report, || print_verify_text(&report))?;
            if !report.success {
                std::process::exit(2);
            }
        }
        Command::RepairStaging => {
            let report = repair_staging_sequence(&db_path, &open_opts)?;
            emit(cli.format, &report, || {
                println!(
                    "Cleared {} staged rows; sequence {} -> {}{}",
                    report.staging_cleared,
                    report
                        .previous_sequence
                        .map_or_else(|| "none".to_string(), |s| s.to_string()),
                    report.sequence,
                    if report.advanced { " (advanced)" } else { "" }
                );
            })?;
        }
        Command::Checkpoint { mode } => {
            let report = checkpoint(&db_path, &open_opts, mode.into())?;
            emit(cli.format, &report, || {
                println!(
                    "Checkpoint ({}) completed in {:.2} ms: {} of {} frames copied{}",
                    report.mode,
                    report.duration_ms,
                    report.checkpointed_frames,
                    report.wal_frames,
                    if report.busy { " (busy)" } else { "" }
                );
            })?;
        }
    }

    Ok(())
}

fn init_logging(configured: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(configured.unwrap_or(DEFAULT_LOG_FILTER)))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();
}

fn resolve_db_path(
    args: &OpenArgs,
    profile: &Profile,
    config: &CliConfig,
) -> Result<PathBuf, Box<dyn Error>> {
    args.db
        .clone()
        .or_else(|| profile.database.clone())
        .or_else(|| config.default_db_path().cloned())
        .ok_or_else(|| "no database given (use --db, EPISIGNAL_DB or a config profile)".into())
}

fn build_open_options(args: &OpenArgs, profile: &Profile) -> StoreOptions {
    let mut opts = StoreOptions::default();
    if let Some(mode) = args.synchronous.or(profile.synchronous) {
        opts.synchronous = mode.into();
    }
    if let Some(ms) = args.busy_timeout_ms.or(profile.busy_timeout_ms) {
        opts.busy_timeout = Duration::from_millis(ms);
    }
    opts
}

fn emit<T, F>(format: OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: serde::Serialize,
    F: FnOnce(),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(),
    }
    Ok(())
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

fn print_stats_text(report: &episignal::admin::StatsReport) {
    let t = &report.tables;
    println!(
        "Tables: history={} latest={} staging={} signal_dims={} geo_dims={} meta_snapshots={}",
        t.history_rows, t.latest_rows, t.staging_rows, t.signal_dims, t.geo_dims, t.meta_snapshots
    );
    println!(
        "Sequence: staging={} newest_snapshot={}",
        report
            .sequence
            .staging_sequence
            .map_or_else(|| "none".to_string(), |s| s.to_string()),
        report
            .sequence
            .newest_snapshot
            .map_or_else(|| "none".to_string(), |s| s.to_string())
    );
    println!(
        "Filesystem: db_size={} wal_size={} db_path={} wal_path={}",
        report.filesystem.db_size_bytes,
        report.filesystem.wal_size_bytes,
        report.filesystem.db_path,
        report.filesystem.wal_path
    );
}

fn print_verify_text(report: &episignal::admin::VerifyReport) {
    println!(
        "Verify ({:?}) => success={} history={} latest={} staging={} missing={} stale={} orphaned={}",
        report.level,
        report.success,
        report.counts.history_rows,
        report.counts.latest_rows,
        report.counts.staging_rows,
        report.counts.missing_latest,
        report.counts.stale_latest,
        report.counts.orphaned_latest,
    );
    for finding in &report.findings {
        println!("- {:?}: {}", finding.severity, finding.message);
    }
}
