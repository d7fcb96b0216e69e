//! trackmig - migrate tracker records between systems
//!
//! Exit codes: 0 completed, 1 completed with failures or halted, 2 paused.

use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use trackmig_core::{write_template, MappingColumns, UserMapping};
use trackmig_engine::prelude::*;
use trackmig_engine::{Checkpoint, SourceReader};

mod config;

use config::CliConfig;

fn cli() -> Command {
    Command::new("trackmig")
        .version(trackmig_engine::VERSION)
        .about("Migrate tracker records between systems")
        .subcommand_required(true)
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("run")
                .about("Run or resume a migration")
                .arg(
                    Arg::new("config")
                        .long("config")
                        .short('c')
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Path to the TOML configuration"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the run summary as JSON"),
                )
                .arg(
                    Arg::new("dry-run")
                        .long("dry-run")
                        .action(ArgAction::SetTrue)
                        .help("Look up records but never create them"),
                ),
        )
        .subcommand(
            Command::new("export-users")
                .about("Write a mapping template listing every source assignee")
                .arg(
                    Arg::new("config")
                        .long("config")
                        .short('c')
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Path to the TOML configuration"),
                )
                .arg(
                    Arg::new("out")
                        .long("out")
                        .short('o')
                        .value_parser(value_parser!(PathBuf))
                        .help("Template path (default: the configured mapping path)"),
                ),
        )
        .subcommand(
            Command::new("check-mapping")
                .about("Validate a user mapping table")
                .arg(
                    Arg::new("path")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("CSV file with a header row"),
                )
                .arg(
                    Arg::new("source-column")
                        .long("source-column")
                        .help("Header of the source-user column (default: first column)"),
                )
                .arg(
                    Arg::new("dest-column")
                        .long("dest-column")
                        .help("Header of the destination-user column (default: second column)"),
                ),
        )
        .subcommand(
            Command::new("checkpoint")
                .about("Inspect or clear the checkpoint of a source")
                .arg(
                    Arg::new("dir")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Checkpoint directory"),
                )
                .arg(Arg::new("source-id").required(true).help("Source identifier"))
                .arg(
                    Arg::new("clear")
                        .long("clear")
                        .action(ArgAction::SetTrue)
                        .help("Delete the checkpoint so the next run starts over"),
                ),
        )
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let matches = cli().get_matches();
    init_logging(matches.get_flag("log-json"));

    match matches.subcommand() {
        Some(("run", args)) => run(args).await,
        Some(("export-users", args)) => export_users(args).await,
        Some(("check-mapping", args)) => check_mapping(args),
        Some(("checkpoint", args)) => checkpoint(args).await,
        _ => Ok(ExitCode::SUCCESS),
    }
}

fn exit_code(status: &FinalStatus) -> u8 {
    match status {
        FinalStatus::Completed => 0,
        FinalStatus::CompletedWithFailures | FinalStatus::Failed { .. } => 1,
        FinalStatus::Paused => 2,
    }
}

async fn run(args: &ArgMatches) -> Result<ExitCode> {
    let path = args
        .get_one::<PathBuf>("config")
        .context("--config is required")?;
    let mut config = CliConfig::load(path)?;
    if args.get_flag("dry-run") {
        config.migration = config.migration.with_dry_run(true);
    }

    let source = SnapshotSource::from_export_file(
        config.source.id.clone(),
        &config.source.export_path,
        config.source.page_size,
    )
    .await
    .with_context(|| format!("loading source export {}", config.source.export_path.display()))?;
    let destination = JsonLedgerDestination::open(
        config.destination.ledger_path.clone(),
        config.destination.key_prefix.clone(),
    )
    .await
    .with_context(|| format!("opening ledger {}", config.destination.ledger_path.display()))?;
    let checkpoints = FileCheckpointStore::new(config.migration.checkpoint_dir.clone());

    let coordinator = MigrationCoordinator::new(
        config.migration,
        Arc::new(source),
        Arc::new(destination),
        Arc::new(checkpoints),
    );

    let token = coordinator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing in-flight writes");
            token.cancel();
        }
    });

    let summary = coordinator.run().await?;
    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print!("{}", summary.generate_text());
    }
    Ok(ExitCode::from(exit_code(&summary.final_status)))
}

async fn export_users(args: &ArgMatches) -> Result<ExitCode> {
    let path = args
        .get_one::<PathBuf>("config")
        .context("--config is required")?;
    let config = CliConfig::load(path)?;
    let out = args
        .get_one::<PathBuf>("out")
        .cloned()
        .unwrap_or_else(|| config.migration.mapping.path.clone());

    let written = write_user_template(&config, &out).await?;
    println!("Wrote {written} users to {}", out.display());
    println!("Fill in the destination column, then run `trackmig check-mapping`.");
    Ok(ExitCode::SUCCESS)
}

/// Collect the distinct assignees of the configured source into a fresh template
async fn write_user_template(config: &CliConfig, out: &Path) -> Result<usize> {
    let source = SnapshotSource::from_export_file(
        config.source.id.clone(),
        &config.source.export_path,
        config.source.page_size,
    )
    .await
    .with_context(|| format!("loading source export {}", config.source.export_path.display()))?;

    let mut reader = SourceReader::new(
        Arc::new(source),
        config.migration.query.clone(),
        config.migration.retry.clone(),
    );
    let users = reader.assignees().await.context("listing source records")?;
    if users.is_empty() {
        warn!(source = %config.source.id, "no assigned records found");
    }
    Ok(write_template(out, &config.migration.mapping.columns, &users)?)
}

fn check_mapping(args: &ArgMatches) -> Result<ExitCode> {
    let path = args
        .get_one::<PathBuf>("path")
        .context("mapping path is required")?;
    let columns = MappingColumns {
        source_column: args.get_one::<String>("source-column").cloned(),
        dest_column: args.get_one::<String>("dest-column").cloned(),
    };

    let mapping = UserMapping::from_path(path, &columns)?;
    println!("Mapping {}", path.display());
    println!("  Users:        {}", mapping.len());
    println!("  Duplicates:   {}", mapping.duplicates());
    println!("  Skipped rows: {}", mapping.skipped_rows());
    if mapping.is_empty() {
        warn!("mapping has no usable rows; every assigned record would be skipped");
        return Ok(ExitCode::from(1));
    }
    Ok(ExitCode::SUCCESS)
}

async fn checkpoint(args: &ArgMatches) -> Result<ExitCode> {
    let dir = args
        .get_one::<PathBuf>("dir")
        .context("checkpoint directory is required")?;
    let source_id = args
        .get_one::<String>("source-id")
        .context("source id is required")?;
    let store = FileCheckpointStore::new(dir.clone());

    if args.get_flag("clear") {
        store.clear(source_id).await?;
        info!(source = %source_id, "checkpoint cleared");
        return Ok(ExitCode::SUCCESS);
    }

    match store.load(source_id).await? {
        Some(checkpoint) => print_checkpoint(&checkpoint),
        None => println!("No active checkpoint for `{source_id}`"),
    }
    Ok(ExitCode::SUCCESS)
}

fn print_checkpoint(checkpoint: &Checkpoint) {
    println!("Checkpoint for `{}`", checkpoint.source_id);
    println!("  Pages completed: {}", checkpoint.pages_completed);
    println!("  Processed:       {}", checkpoint.processed_count);
    match (&checkpoint.last_page_token, checkpoint.source_exhausted) {
        (_, true) => println!("  Next page:       (source exhausted)"),
        (Some(token), false) => println!("  Next page:       {}", token.as_str()),
        (None, false) => println!("  Next page:       (first page)"),
    }
    println!("  Failed keys:     {}", checkpoint.failed_keys.len());
    for key in &checkpoint.failed_keys {
        println!("    {key}");
    }
    println!("  Updated:         {}", checkpoint.updated_at.to_rfc3339());
}
