//! testpub CLI - Publish test result documents.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use testpub::config::{self, Config};
use testpub::diagnostics::TracingSink;
use testpub::model::RunContext;
use testpub::publisher::AttachmentMode;
use testpub::report;
use testpub::service::InMemoryService;
use testpub::Orchestrator;

/// Base url the dry-run service reports for published runs.
const DRY_RUN_BASE_URL: &str = "https://dry-run.invalid/runs";

#[derive(Parser)]
#[command(name = "testpub")]
#[command(about = "Publish test result documents to a test-management service", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "testpub.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse result files and show the runs that would be published
    Parse {
        /// Result documents (.trx)
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Publish result files (dry run against the recording service)
    Publish {
        /// Result documents (.trx)
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Override results per batch
        #[arg(long)]
        batch_size: Option<usize>,

        /// Upload run attachments as one archive
        #[arg(long)]
        archive: bool,

        /// Exit non-zero when any published test failed
        #[arg(long)]
        fail_on_failed_tests: bool,

        /// Publish each document as its own run
        #[arg(long)]
        no_merge: bool,

        /// Write the recorded service calls as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Validate configuration file
    Validate,

    /// Initialize a new configuration file
    Init,
}

/// Run context overrides shared by `parse` and `publish`.
#[derive(clap::Args)]
struct RunArgs {
    /// Run title
    #[arg(long)]
    run_name: Option<String>,

    /// Build platform
    #[arg(long)]
    platform: Option<String>,

    /// Build configuration (flavor)
    #[arg(long)]
    configuration: Option<String>,

    /// Run owner
    #[arg(long)]
    owner: Option<String>,

    /// Build id; 0 publishes without build information
    #[arg(long)]
    build_id: Option<i64>,
}

impl RunArgs {
    fn apply(self, mut context: RunContext) -> RunContext {
        if self.run_name.is_some() {
            context.run_name = self.run_name;
        }
        if self.platform.is_some() {
            context.platform = self.platform;
        }
        if self.configuration.is_some() {
            context.configuration = self.configuration;
        }
        if self.owner.is_some() {
            context.owner = self.owner;
        }
        if let Some(build_id) = self.build_id {
            context.build_id = build_id;
        }
        context
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Parse { files, format, run } => {
            parse_files(&cli.config, &files, &format, run, cli.verbose)
        }
        Commands::Publish {
            files,
            batch_size,
            archive,
            fail_on_failed_tests,
            no_merge,
            output,
            run,
        } => {
            let mut config = config::load_config_or_default(&cli.config)?;
            if let Some(batch_size) = batch_size {
                anyhow::ensure!(batch_size >= 1, "--batch-size must be at least 1");
                config.publish.batch_size = batch_size;
            }
            if archive {
                config.publish.attachment_mode = AttachmentMode::Archive;
            }
            if fail_on_failed_tests {
                config.publish.fail_on_failed_tests = true;
            }
            if no_merge {
                config.publish.merge_results = false;
            }
            publish_files(config, &files, run, output).await
        }
        Commands::Validate => validate_config(&cli.config),
        Commands::Init => init_config(&cli.config),
    }
}

fn parse_files(
    config_path: &Path,
    files: &[PathBuf],
    format: &str,
    run: RunArgs,
    verbose: bool,
) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let context = run.apply(config.run.clone());

    let orchestrator = Orchestrator::new(config, InMemoryService::new(), Arc::new(TracingSink));
    let context = orchestrator.prepare_context(context);
    let runs = orchestrator.parse_runs(files, &context)?;

    match format {
        "json" => {
            let json = serde_json::to_string_pretty(&runs)?;
            println!("{}", json);
        }
        _ => {
            for run in &runs {
                report::print_run(run, verbose);
            }
        }
    }

    Ok(())
}

async fn publish_files(
    config: Config,
    files: &[PathBuf],
    run: RunArgs,
    output: Option<PathBuf>,
) -> Result<()> {
    let context = run.apply(config.run.clone());
    let service = InMemoryService::new().with_base_url(DRY_RUN_BASE_URL);
    let orchestrator = Orchestrator::new(config, service, Arc::new(TracingSink));

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling publish");
            on_interrupt.cancel();
        }
    });

    let result = orchestrator.publish_files(files, context, &cancel).await;

    // Recorded calls are written even when publishing failed
    if let Some(path) = &output {
        let json = serde_json::to_string_pretty(&orchestrator.service().calls())?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Wrote service calls to {}", path.display());
    }

    let summary = result?;
    report::print_summary(&summary);
    std::process::exit(summary.exit_code());
}

fn validate_config(config_path: &Path) -> Result<()> {
    match config::load_config(config_path) {
        Ok(config) => {
            println!("Configuration is valid!");
            println!();
            println!("Settings:");
            println!("  Batch size: {}", config.publish.batch_size);
            let mode = match config.publish.attachment_mode {
                AttachmentMode::Individual => "individual",
                AttachmentMode::Archive => "archive",
            };
            println!("  Attachment mode: {}", mode);
            println!("  Merge results: {}", config.publish.merge_results);
            println!("  Fail on failed tests: {}", config.publish.fail_on_failed_tests);
            println!(
                "  Hierarchy limits: {} levels, {} per level",
                config.limits.max_hierarchy_level, config.limits.max_sub_results_per_level
            );

            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn init_config(config_path: &Path) -> Result<()> {
    if config_path.exists() {
        eprintln!(
            "{} already exists. Remove it first or edit manually.",
            config_path.display()
        );
        std::process::exit(1);
    }

    let config = format!(
        "# testpub configuration file\n\n{}",
        config::default_config_toml()?
    );
    std::fs::write(config_path, config)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;
    println!("Created {}", config_path.display());
    println!();
    println!("Edit the configuration as needed, then run:");
    println!("  testpub publish <results.trx>");

    Ok(())
}
