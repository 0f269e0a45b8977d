//! tagsync CLI: reconcile Readwise tags with an Obsidian vault
//!
//! Commands: sync, autotag, completions

mod config;
mod readwise;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tagsync_core::change::ProposedChange;
use tagsync_core::planner::{bind_renames_to, expand_to_notes, plan};
use tagsync_core::tag::{TagInventory, TagSourceKind};
use tagsync_report::{format_report, write_csv, OutputFormat, Report};
use tagsync_vault::autotag::{autotag_changes, compile_rules};
use tagsync_vault::engine::{Engine, Mode};
use tagsync_vault::loader::{unparsable_notes, vault_inventory, Vault};

use crate::config::AppConfig;
use crate::readwise::ReadwiseClient;

const EXIT_FAILURE: u8 = 1;
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "tagsync")]
#[command(version)]
#[command(about = "Reconcile Readwise tags with an Obsidian vault")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Match Readwise tags against vault tags and propose renames and adds
    Sync(RunArgs),
    /// Derive tags from regex rules and add them to notes
    Autotag(RunArgs),
    /// Print shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(clap::Args, Debug, Clone)]
struct RunArgs {
    /// Configuration file (default: ./config.yaml)
    #[arg(long, short)]
    config: Option<PathBuf>,
    /// Write changes to notes
    #[arg(long)]
    apply: bool,
    /// Preview only; wins over --apply
    #[arg(long)]
    dry_run: bool,
    /// Debug logging
    #[arg(long, short)]
    verbose: bool,
    /// Preview format
    #[arg(long, value_enum, default_value_t = FormatArg::Table)]
    format: FormatArg,
    /// CSV export path (default: proposal_csv from the config)
    #[arg(long)]
    export: Option<PathBuf>,
    /// Notes processed in parallel
    #[arg(long)]
    workers: Option<usize>,
}

impl RunArgs {
    fn mode(&self) -> Mode {
        if self.apply && !self.dry_run {
            Mode::Apply
        } else {
            Mode::DryRun
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Table,
    Markdown,
    Json,
}

impl From<FormatArg> for OutputFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Table => Self::Table,
            FormatArg::Markdown => Self::Markdown,
            FormatArg::Json => Self::Json,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Completions { shell } => {
            clap_complete::generate(*shell, &mut Cli::command(), "tagsync", &mut std::io::stdout());
            return ExitCode::SUCCESS;
        }
        Commands::Sync(args) => {
            init_tracing(args.verbose);
            run_sync(args).await
        }
        Commands::Autotag(args) => {
            init_tracing(args.verbose);
            run_autotag(args).await
        }
    };
    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

async fn run_sync(args: &RunArgs) -> anyhow::Result<ExitCode> {
    let config = AppConfig::load(args.config.as_deref())?;
    let client = ReadwiseClient::from_env(&config.api_url, &config.token_env)?;
    let remote = client.fetch_tags().await?;

    let vault = Vault::open(config.vault_path()?)?;
    let notes = vault.load_notes()?;
    let source = TagInventory::collect(TagSourceKind::Remote, remote);
    let target = vault_inventory(&notes);
    info!(
        remote = source.len(),
        vault = target.len(),
        threshold = config.reconcile.similarity_threshold,
        "planning"
    );

    let proposals = plan(&source, &target, &config.reconcile)?;
    let mut changes = expand_to_notes(&proposals, &target, config.mutation.rewrite_inline_tags);
    let unreadable: Vec<_> = unparsable_notes(&notes).into_iter().map(|(id, _)| id).collect();
    changes.extend(bind_renames_to(&proposals, &unreadable));
    execute(args, &config, vault, &changes).await
}

async fn run_autotag(args: &RunArgs) -> anyhow::Result<ExitCode> {
    let config = AppConfig::load(args.config.as_deref())?;
    let rules = compile_rules(&config.auto_tags);
    if rules.is_empty() {
        warn!("no usable auto_tags rules configured");
    }

    let vault = Vault::open(config.vault_path()?)?;
    let notes = vault.load_notes()?;
    let changes = autotag_changes(&rules, &notes);
    execute(args, &config, vault, &changes).await
}

async fn execute(
    args: &RunArgs,
    config: &AppConfig,
    vault: Vault,
    changes: &[ProposedChange],
) -> anyhow::Result<ExitCode> {
    let mode = args.mode();
    let engine = Engine::new(vault, mode, config.mutation);

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    let listener = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, finishing notes in progress");
            flag.store(true, Ordering::SeqCst);
        }
    });
    let workers = args.workers.unwrap_or(config.workers);
    let results = engine.execute_batch(changes, workers, Arc::clone(&cancel)).await;
    listener.abort();

    let report = Report::new(mode, &results);
    let format = OutputFormat::from(args.format);
    print!("{}", format_report(&report, format));
    if !matches!(format, OutputFormat::Json) {
        println!("\n{}", report.summary);
    }

    let export = args.export.as_ref().unwrap_or(&config.proposal_csv);
    write_csv(&report.rows, export)
        .with_context(|| format!("writing proposal export {}", export.display()))?;
    info!(path = %export.display(), "wrote proposal export");

    if mode == Mode::Apply {
        for line in report.failure_lines() {
            eprintln!("failed: {line}");
        }
        info!("apply complete: {}", report.summary);
    } else {
        info!("dry run complete, no files were modified");
    }

    if cancel.load(Ordering::SeqCst) {
        return Ok(ExitCode::from(EXIT_INTERRUPTED));
    }
    if mode == Mode::Apply && report.summary.failed > 0 {
        return Ok(ExitCode::from(EXIT_FAILURE));
    }
    Ok(ExitCode::SUCCESS)
}
