//! CLI command definitions, routing, and tracing setup.

use std::ops::Range;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use coursepack_core::{
    BatchSummary, MaterializeOutcome, Materializer, OrderingState, ProgressReporter, assemble,
    run_batch, verify, write_reports,
};
use coursepack_fetch::HttpFetcher;
use coursepack_render::ChromeRenderer;
use coursepack_shared::{
    AppConfig, Manifest, PipelineContext, Resource, init_config, load_config, load_config_from,
    load_manifest,
};
use coursepack_storage::FsArtifactStore;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// coursepack: turn a course manifest into one bookmarked PDF.
#[derive(Parser)]
#[command(
    name = "coursepack",
    version,
    about = "Download, render and merge course resources into a single outlined PDF.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file to use instead of ~/.coursepack/coursepack.toml.
    #[arg(long, global = true, env = "COURSEPACK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
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

/// Top-level commands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Materialize a slice of the subject's resources into the cache.
    Materialize {
        /// Subject name (selects manifest_<subject>.json).
        subject: String,

        /// First manifest position to process.
        #[arg(long, default_value_t = 0)]
        start: usize,

        /// Number of positions to process.
        #[arg(long, default_value_t = 10)]
        count: usize,
    },
    /// Merge every cached artifact into the subject's outlined PDF.
    Assemble {
        /// Subject name.
        subject: String,
    },
    /// Check the merged PDF against the manifest and write the QA report.
    Verify {
        /// Subject name.
        subject: String,
    },
    /// Manage configuration.
    Config {
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
        0 => "coursepack=info",
        1 => "coursepack=debug",
        _ => "coursepack=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
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
        Command::Materialize {
            subject,
            start,
            count,
        } => cmd_materialize(config_path, &subject, start, count).await,
        Command::Assemble { subject } => cmd_assemble(config_path, &subject),
        Command::Verify { subject } => cmd_verify(config_path, &subject),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path),
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

/// Resolve the subject's paths and load its manifest. A missing or invalid
/// manifest is a setup failure.
fn prepare(config_path: Option<&Path>, subject: &str) -> Result<(PipelineContext, Manifest)> {
    let config = resolve_config(config_path)?;
    let ctx = PipelineContext::new(&config, subject)?;
    let manifest = load_manifest(&ctx.manifest_path)?;
    info!(
        subject,
        manifest = %ctx.manifest_path.display(),
        units = manifest.unit_count(),
        resources = manifest.resource_count(),
        "manifest loaded"
    );
    Ok((ctx, manifest))
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_materialize(
    config_path: Option<&Path>,
    subject: &str,
    start: usize,
    count: usize,
) -> Result<()> {
    let (ctx, manifest) = prepare(config_path, subject)?;

    let store = FsArtifactStore::create(&ctx.cache_dir)?;
    let fetcher = HttpFetcher::new(&ctx.fetch)?;
    let renderer = ChromeRenderer::new(&ctx.render, &ctx.fetch.user_agent);

    let materializer = Materializer::new(&ctx, &fetcher, &renderer, &store);
    let reporter = CliProgress::new();
    let summary = run_batch(&materializer, &manifest, start, count, &reporter).await?;

    print_batch_summary(&ctx, &summary);
    Ok(())
}

fn print_batch_summary(ctx: &PipelineContext, summary: &BatchSummary) {
    println!();
    if summary.range.is_empty() {
        println!("  Nothing to do: start index is past the end of the manifest.");
        println!();
        return;
    }
    println!(
        "  Batch {}..{} for '{}' finished",
        summary.range.start, summary.range.end, ctx.subject
    );
    println!("  Materialized: {}", summary.materialized);
    println!("  Cached:       {}", summary.cached);
    println!("  Failed:       {}", summary.failed.len());
    for failure in &summary.failed {
        println!(
            "    [{}] {} ({}): {}",
            failure.position, failure.title, failure.reason, failure.message
        );
    }
    if !summary.incomplete_typeset.is_empty() {
        println!("  Math typesetting incomplete at: {:?}", summary.incomplete_typeset);
    }
    println!("  Cache:        {}", ctx.cache_dir.display());
    println!("  Time:         {:.1}s", summary.elapsed.as_secs_f64());
    println!();
}

fn cmd_assemble(config_path: Option<&Path>, subject: &str) -> Result<()> {
    let (ctx, manifest) = prepare(config_path, subject)?;
    let store = FsArtifactStore::open(&ctx.cache_dir)?;

    let result = assemble(&ctx, &manifest, &store)?;

    println!();
    match &result.output {
        Some(path) => {
            println!("  Merged document written!");
            println!("  Path:     {}", path.display());
        }
        None => println!("  No usable artifacts; nothing was written."),
    }
    println!("  Pages:    {}", result.total_pages);
    println!("  Included: {}/{}", result.included, manifest.resource_count());
    println!("  Skipped:  {}", result.skipped.len());
    for skipped in &result.skipped {
        println!(
            "    [{}] {} / {} ({})",
            skipped.position,
            skipped.unit,
            skipped.title,
            skipped.reason.as_str()
        );
    }
    if result.ordering == OrderingState::Unrecorded {
        println!("  Warning:  cache has no ordering ledger; order was not verified");
    }
    println!();
    Ok(())
}

fn cmd_verify(config_path: Option<&Path>, subject: &str) -> Result<()> {
    let (ctx, manifest) = prepare(config_path, subject)?;

    let report = verify(&ctx, &manifest)?;
    write_reports(&report, &ctx.report_json_path, &ctx.report_html_path)?;

    println!();
    println!("  QA report for '{}'", report.subject);
    for check in &report.checks {
        let status = if check.skipped {
            "SKIP"
        } else if check.passed {
            "PASS"
        } else {
            "FAIL"
        };
        println!("  [{status}] {:<18} {}", check.name, check.message);
    }
    println!();
    println!("  JSON: {}", ctx.report_json_path.display());
    println!("  HTML: {}", ctx.report_html_path.display());
    println!();
    Ok(())
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

/// CLI progress reporter using an indicatif bar.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template("{spinner:.cyan} [{pos}/{len}] {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        bar.set_style(style);
        Self { bar }
    }
}

impl ProgressReporter for CliProgress {
    fn batch_started(&self, range: &Range<usize>, total: usize) {
        self.bar.set_length(range.len() as u64);
        self.bar.set_message(format!(
            "positions {}..{} of {total}",
            range.start, range.end
        ));
        self.bar.enable_steady_tick(std::time::Duration::from_millis(80));
    }

    fn resource_started(&self, position: usize, resource: &Resource) {
        self.bar.set_message(format!(
            "#{position} {} ({})",
            resource.text, resource.kind
        ));
    }

    fn resource_finished(&self, position: usize, outcome: &MaterializeOutcome) {
        if let MaterializeOutcome::Failed(failure) = outcome {
            self.bar.println(format!("  #{position} failed: {failure}"));
        }
        self.bar.inc(1);
    }

    fn done(&self, _summary: &BatchSummary) {
        self.bar.finish_and_clear();
    }
}
