//! CLI command definitions, routing, and tracing setup.

use std::io::{BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use enricher_core::session;
use enricher_core::{
    PipelineController, PipelineParts, PipelineState, ProgressReporter, RunSummary, StopReason,
};
use enricher_remote::{HttpLookupProvider, acquirer_from_config};
use enricher_shared::{
    AppConfig, CheckpointState, Counters, EnrichmentStatus, RunSettings, init_config,
    load_config, load_config_from,
};
use enricher_storage::{CheckpointStore, CsvRecordSource};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Records processed by `--test`.
const TEST_MODE_LIMIT: u64 = 5;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Enricher: add directory contact details to a CSV list, resumably.
#[derive(Parser)]
#[command(
    name = "enricher",
    version,
    about = "Enrich a CSV list with contact details from a remote directory API.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Also append log lines to this file.
    #[arg(long, global = true, env = "ENRICHER_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Config file (defaults to ~/.enricher/enricher.toml).
    #[arg(long, global = true, env = "ENRICHER_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Enrich the input list, resuming from a checkpoint when one exists.
    Run(RunArgs),

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args)]
pub(crate) struct RunArgs {
    /// Input CSV (overrides files.input).
    #[arg(long)]
    pub input: Option<PathBuf>,

    /// Output CSV (overrides files.output).
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Checkpoint file (overrides files.checkpoint).
    #[arg(long)]
    pub checkpoint: Option<PathBuf>,

    /// Test mode: stop after 5 records.
    #[arg(long, conflicts_with = "limit")]
    pub test: bool,

    /// Stop after N records in this session.
    #[arg(long, value_name = "N")]
    pub limit: Option<u64>,

    /// Resume from an existing checkpoint without asking.
    #[arg(long, conflicts_with = "restart")]
    pub resume: bool,

    /// Discard any existing checkpoint and start over without asking.
    #[arg(long)]
    pub restart: bool,
}

impl RunArgs {
    fn limit(&self) -> Option<u64> {
        if self.test {
            Some(TEST_MODE_LIMIT)
        } else {
            self.limit
        }
    }
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) -> Result<()> {
    use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

    let filter = match cli.verbose {
        0 => "enricher=info",
        1 => "enricher=debug",
        _ => "enricher=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    layers.push(match cli.log_format {
        LogFormat::Text => fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .boxed(),
        LogFormat::Json => fmt::layer().json().with_writer(std::io::stderr).boxed(),
    });

    if let Some(path) = &cli.log_file {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .wrap_err_with(|| format!("cannot create log directory {}", parent.display()))?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .wrap_err_with(|| format!("cannot open log file {}", path.display()))?;
        let layer = match cli.log_format {
            LogFormat::Text => fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .boxed(),
            LogFormat::Json => fmt::layer().json().with_writer(Arc::new(file)).boxed(),
        };
        layers.push(layer);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .init();
    Ok(())
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run(ref args) => cmd_run(cli.config.as_deref(), args).await,
        Command::Config { ref action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(cli.config.as_deref()).await,
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    Ok(config)
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

async fn cmd_run(config_path: Option<&Path>, args: &RunArgs) -> Result<()> {
    let config = resolve_config(config_path)?;
    let input = args.input.clone().unwrap_or_else(|| config.files.input.clone());
    let output = args.output.clone().unwrap_or_else(|| config.files.output.clone());
    let checkpoint_path = args
        .checkpoint
        .clone()
        .unwrap_or_else(|| config.files.checkpoint.clone());

    let mut settings = RunSettings::from(&config);
    settings.limit = args.limit();

    info!(
        input = %input.display(),
        output = %output.display(),
        checkpoint = %checkpoint_path.display(),
        limit = ?settings.limit,
        "preparing run"
    );

    let source = CsvRecordSource::open(&input, &config.csv)?;
    let mut store = CheckpointStore::new(&checkpoint_path);

    // --restart also recovers from an unreadable checkpoint.
    let existing = if args.restart {
        None
    } else {
        store.load().map_err(|e| {
            eyre!("{e}\nRerun with --restart to discard the checkpoint and start over.")
        })?
    };

    let (sink, checkpoint) = match existing {
        Some(state) if should_resume(&state, source.len() as u64, args)? => {
            session::resume(&source, state, &output, &config.csv)?
        }
        _ => session::start_fresh(&source, &mut store, &output, &config.csv)?,
    };

    let provider = Arc::new(HttpLookupProvider::new(&config.api)?);
    let parts = PipelineParts {
        source,
        sink,
        store,
        checkpoint,
        provider,
        acquirer: acquirer_from_config(&config.credential),
    };

    let cancel = CancellationToken::new();
    spawn_signal_listener(cancel.clone());

    let reporter = CliProgress::new();
    let mut pipeline = PipelineController::new(parts, settings, cancel);
    let result = pipeline.run(&reporter).await;

    match result {
        Ok(summary) => {
            print_summary(&summary, &output);
            Ok(())
        }
        Err(e) => {
            reporter.abandon();
            let saved = pipeline
                .checkpoint()
                .last_processed_index
                .map_or_else(|| "no records".to_string(), |i| format!("{} record(s)", i + 1));
            Err(e).wrap_err_with(|| {
                format!(
                    "run failed; {saved} committed, checkpoint saved in {}",
                    checkpoint_path.display()
                )
            })
        }
    }
}

/// Decide resume vs restart for an existing checkpoint.
fn should_resume(state: &CheckpointState, total: u64, args: &RunArgs) -> Result<bool> {
    if args.resume {
        return Ok(true);
    }

    let next_row = state.next_index() + 1;
    println!();
    println!("  Checkpoint found (run {})", state.run_id);
    println!(
        "  Processed: {} of {total}, last id {}",
        state.counters.processed,
        state.last_processed_id.as_deref().unwrap_or("-")
    );
    println!("  Updated:   {}", state.last_updated.format("%Y-%m-%d %H:%M:%S"));

    if !std::io::stdin().is_terminal() {
        info!("stdin is not a terminal, resuming");
        return Ok(true);
    }

    print!("  Resume from row {next_row}? (Y/n) ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(parse_resume_answer(&answer))
}

/// Empty, `y` and `yes` resume; anything else restarts.
fn parse_resume_answer(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "" | "y" | "yes")
}

fn spawn_signal_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        warn!("interrupt received, stopping after the current record");
        cancel.cancel();
    });
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn print_summary(summary: &RunSummary, output: &Path) {
    let c = &summary.counters;
    let state = match summary.stop_reason {
        None => "completed".to_string(),
        Some(StopReason::LimitReached) => "suspended (record limit reached)".to_string(),
        Some(StopReason::Cancelled) => "suspended (interrupted)".to_string(),
    };

    println!();
    println!("  Run {}: {state}", summary.run_id);
    println!("  This session:     {}", summary.session_processed);
    println!("  Total processed:  {}", c.processed);
    println!("  Found:            {} ({:.1}%)", c.found, c.percent(c.found));
    println!("  Not found:        {} ({:.1}%)", c.not_found, c.percent(c.not_found));
    println!(
        "  Multiple matches: {} ({:.1}%)",
        c.multiple_matches,
        c.percent(c.multiple_matches)
    );
    println!("  Errors:           {} ({:.1}%)", c.errors, c.percent(c.errors));
    println!("  Started:          {}", summary.started_at.format("%Y-%m-%d %H:%M:%S"));
    println!("  Finished:         {}", summary.finished_at.format("%Y-%m-%d %H:%M:%S"));
    println!("  Output:           {}", output.display());
    println!("  Time:             {:.1}s", summary.elapsed.as_secs_f64());
    if summary.state == PipelineState::Suspended {
        println!("  Run again to resume where this session stopped.");
    }
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif bar.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::hidden();
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({eta}) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
        bar.set_style(style);
        Self { bar }
    }

    fn abandon(&self) {
        self.bar.abandon();
    }
}

impl ProgressReporter for CliProgress {
    fn started(&self, next_index: u64, total: Option<u64>) {
        self.bar
            .set_draw_target(indicatif::ProgressDrawTarget::stderr());
        if let Some(total) = total {
            self.bar.set_length(total);
        }
        self.bar.set_position(next_index);
        self.bar.enable_steady_tick(std::time::Duration::from_millis(120));
    }

    fn record_committed(&self, index: u64, id: &str, status: EnrichmentStatus, counters: &Counters) {
        self.bar.set_position(index + 1);
        self.bar.set_message(format!(
            "{id} {status} | found {} | errors {}",
            counters.found, counters.errors
        ));
    }

    fn done(&self, _summary: &RunSummary) {
        self.bar.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
