//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use newsagent_core::{
    ChunkOptions, CrewRunner, IngestProgress, PipelineReport, PipelineState, ProgressReporter,
    StageStats, ingest_dir, query_index, rate_limiter,
};
use newsagent_retrieval::GeminiEmbedder;
use newsagent_shared::{
    AppConfig, ResearchMode, check_setup, init_config, load_config, load_config_from,
};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// newsagent: research a topic and write an article about it.
#[derive(Parser)]
#[command(
    name = "newsagent",
    version,
    about = "Research a topic from a local knowledge base and the web, then write an article.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.newsagent/newsagent.toml).
    #[arg(long, global = true, env = "NEWSAGENT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

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
    /// Research a topic and write the article.
    Run {
        /// Topic to research.
        #[arg(short, long)]
        topic: String,

        /// Article output path (overrides config).
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Research mode: agent or guided (overrides config).
        #[arg(short, long)]
        mode: Option<ResearchMode>,
    },

    /// Rebuild the knowledge base from a documents directory.
    Ingest {
        /// Documents directory (overrides config).
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// Query the knowledge base directly.
    Query {
        /// Query text.
        text: String,

        /// Number of chunks to return.
        #[arg(short, default_value = "3")]
        k: usize,
    },

    /// Check that keys and the knowledge base are in place.
    Check,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
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
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "newsagent=info",
        1 => "newsagent=debug",
        _ => "newsagent=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Run { topic, out, mode } => cmd_run(config_path, &topic, out, mode).await,
        Command::Ingest { dir } => cmd_ingest(config_path, dir).await,
        Command::Query { text, k } => cmd_query(config_path, &text, k).await,
        Command::Check => cmd_check(config_path),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    };
    Ok(config)
}

/// Print setup issues as instructions. Returns false if any were found.
fn report_setup(config: &AppConfig) -> bool {
    let issues = check_setup(config);
    if issues.is_empty() {
        return true;
    }
    eprintln!();
    eprintln!("  Setup incomplete:");
    for issue in &issues {
        eprintln!("  - {}", issue.instruction());
    }
    eprintln!();
    false
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(
    config_path: Option<&Path>,
    topic: &str,
    out: Option<PathBuf>,
    mode: Option<ResearchMode>,
) -> Result<()> {
    let mut config = resolve_config(config_path)?;
    if let Some(out) = out {
        config.paths.output_path = out;
    }
    if let Some(mode) = mode {
        config.pipeline.research_mode = mode;
    }

    if !report_setup(&config) {
        return Err(eyre!("setup incomplete, fix the issues above and retry"));
    }

    info!(topic, mode = ?config.pipeline.research_mode, "starting run");

    let mut runner = CrewRunner::from_config(&config).await?;
    let reporter = CliProgress::spinner();
    let result = runner.run(topic, &reporter).await;
    reporter.finish();
    let report = match result {
        Ok(report) => report,
        Err(e) if e.is_stage_bound() => {
            eprintln!();
            eprintln!("  Run stopped: {e}");
            eprintln!("  The article file was not updated. Stage bounds live under [pipeline] in the config.");
            eprintln!();
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };

    println!();
    println!("  Article written!");
    println!("  Topic:    {}", report.article.topic);
    println!("  Path:     {}", report.output_path.display());
    print_stage(&report.research);
    print_stage(&report.writing);
    if let Some(used_web) = report.used_web {
        println!("  Web:      {}", if used_web { "used" } else { "not needed" });
    }
    println!("  Time:     {:.1}s", report.elapsed.as_secs_f64());
    println!();

    Ok(())
}

fn print_stage(stats: &StageStats) {
    let tools = if stats.tool_calls.is_empty() {
        "no tools".to_string()
    } else {
        stats.tool_calls.join(", ")
    };
    println!(
        "  {:<9} {} rounds, {}, {:.1}s{}",
        format!("{}:", capitalize(stats.name)),
        stats.rounds,
        tools,
        stats.elapsed.as_secs_f64(),
        if stats.partial { " (partial)" } else { "" }
    );
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

async fn cmd_ingest(config_path: Option<&Path>, dir: Option<PathBuf>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let dir = dir.unwrap_or_else(|| config.paths.documents_dir.clone());

    let embedder = GeminiEmbedder::from_config(&config)?;
    let limiter = rate_limiter(&config);

    info!(dir = %dir.display(), "ingesting documents");

    let reporter = CliProgress::bar();
    let result = ingest_dir(
        &dir,
        &config.paths.index_path,
        &embedder,
        &limiter,
        ChunkOptions::from(&config.ingest),
        &reporter,
    )
    .await;
    reporter.finish();
    let report = result?;

    println!();
    println!("  Knowledge base rebuilt!");
    println!("  Documents:  {}", report.documents);
    println!("  Chunks:     {}", report.chunks);
    if report.duplicates_skipped > 0 {
        println!("  Duplicates: {} skipped", report.duplicates_skipped);
    }
    println!("  Index:      {}", report.index_path.display());
    println!("  Time:       {:.1}s", report.elapsed.as_secs_f64());
    println!();

    Ok(())
}

async fn cmd_query(config_path: Option<&Path>, text: &str, k: usize) -> Result<()> {
    let config = resolve_config(config_path)?;
    let embedder = Arc::new(GeminiEmbedder::from_config(&config)?);

    let results = query_index(&config.paths.index_path, embedder, text, k).await?;
    if results.is_empty() {
        println!("No matching chunks.");
        return Ok(());
    }

    for (i, scored) in results.iter().enumerate() {
        let snippet: String = scored.chunk.text.chars().take(200).collect();
        println!(
            "{}. [{}] score {:.3}\n   {}\n",
            i + 1,
            scored.chunk.source_name(),
            scored.score,
            snippet.replace('\n', " ")
        );
    }
    Ok(())
}

fn cmd_check(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    if report_setup(&config) {
        println!("Ready: keys found and knowledge base at {}", config.paths.index_path.display());
        Ok(())
    } else {
        Err(eyre!("setup incomplete"))
    }
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using indicatif spinners/bars.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn spinner() -> Self {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            bar.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
        }
        bar.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { bar }
    }

    fn bar() -> Self {
        let bar = ProgressBar::new(0);
        if let Ok(style) =
            ProgressStyle::with_template("{spinner:.cyan} Embedding [{bar:30}] {pos}/{len} chunks")
        {
            bar.set_style(style.progress_chars("=> "));
        }
        Self { bar }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn state_changed(&self, state: PipelineState) {
        let message = match state {
            PipelineState::Pending => "Starting",
            PipelineState::Researching => "Researching",
            PipelineState::Written => "Saving article",
            PipelineState::Done => "Done",
            PipelineState::Failed => "Failed",
        };
        self.bar.set_message(message);
    }

    fn stage_started(&self, name: &str) {
        self.bar.set_message(format!("Running {name} stage"));
    }

    fn done(&self, _report: &PipelineReport) {
        self.bar.finish_and_clear();
    }
}

impl IngestProgress for CliProgress {
    fn chunk_embedded(&self, current: usize, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_position(current as u64);
    }
}
