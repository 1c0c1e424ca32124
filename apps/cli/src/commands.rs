//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use docmodules_core::{PipelineDeps, ProgressReporter, RunConfig, RunReport};
use docmodules_crawler::build_fetcher;
use docmodules_extractor::OllamaClient;
use docmodules_shared::{
    AppConfig, CrawlConfig, ExtractConfig, NormalizeConfig, Renderer, init_config, load_config,
    load_config_from,
};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// docmodules: map a product's documentation into modules and submodules.
#[derive(Parser)]
#[command(
    name = "docmodules",
    version,
    about = "Crawl documentation sites and extract a module/submodule hierarchy with a local LLM.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.docmodules/docmodules.toml.
    #[arg(long, global = true, env = "DOCMODULES_CONFIG")]
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
    /// Crawl documentation URLs and extract their modules.
    Extract(ExtractArgs),

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Flags for `extract`. Unset flags fall back to the config file.
#[derive(clap::Args)]
pub(crate) struct ExtractArgs {
    /// Seed documentation URLs.
    #[arg(required = true)]
    pub urls: Vec<String>,

    /// Maximum link hops from a seed.
    #[arg(short, long)]
    pub depth: Option<u32>,

    /// Model name on the inference server.
    #[arg(short, long)]
    pub model: Option<String>,

    /// Output file, or `-` for stdout.
    #[arg(short, long)]
    pub out: Option<String>,

    /// Maximum concurrent fetches.
    #[arg(long)]
    pub concurrency: Option<u32>,

    /// Page renderer: browser or http.
    #[arg(long)]
    pub renderer: Option<Renderer>,

    /// Fetch every page from the network.
    #[arg(long)]
    pub no_cache: bool,

    /// Page cache directory.
    #[arg(long)]
    pub cache_dir: Option<String>,

    /// Extra host allowed for traversal (repeatable).
    #[arg(long = "allow-domain")]
    pub allow_domains: Vec<String>,

    /// Stop crawling after this many seconds.
    #[arg(long)]
    pub time_budget: Option<u64>,

    /// Inference server base URL.
    #[arg(long, env = "DOCMODULES_MODEL_ENDPOINT")]
    pub model_endpoint: Option<String>,

    /// Ceiling for one model call, in seconds.
    #[arg(long)]
    pub model_timeout: Option<u64>,
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
        0 => "warn,docmodules=info",
        1 => "warn,docmodules=debug",
        _ => "info,docmodules=trace",
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

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
    let config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };

    match cli.command {
        Command::Extract(args) => cmd_extract(config, args).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(&config).await,
        },
    }
}

// ---------------------------------------------------------------------------
// extract
// ---------------------------------------------------------------------------

/// Layer command-line flags over the loaded config.
fn apply_overrides(config: &mut AppConfig, args: &ExtractArgs) {
    if let Some(depth) = args.depth {
        config.defaults.crawl_depth = depth;
    }
    if let Some(concurrency) = args.concurrency {
        config.defaults.crawl_concurrency = concurrency;
    }
    if let Some(out) = &args.out {
        config.defaults.output_path = out.clone();
    }
    if let Some(renderer) = args.renderer {
        config.crawl.renderer = renderer;
    }
    if args.no_cache {
        config.crawl.use_cache = false;
    }
    if let Some(dir) = &args.cache_dir {
        config.crawl.cache_dir = dir.clone();
    }
    config.crawl.allowed_domains.extend(args.allow_domains.iter().cloned());
    if let Some(secs) = args.time_budget {
        config.crawl.time_budget_secs = secs;
    }
    if let Some(model) = &args.model {
        config.model.default_model = model.clone();
    }
    if let Some(endpoint) = &args.model_endpoint {
        config.model.endpoint = endpoint.clone();
    }
    if let Some(secs) = args.model_timeout {
        config.model.timeout_secs = secs;
    }
}

fn parse_seeds(urls: &[String]) -> Result<Vec<Url>> {
    urls.iter()
        .map(|raw| {
            let url = Url::parse(raw).map_err(|e| eyre!("invalid URL '{raw}': {e}"))?;
            match url.scheme() {
                "http" | "https" => Ok(url),
                other => Err(eyre!("unsupported URL scheme '{other}' in '{raw}'")),
            }
        })
        .collect()
}

async fn cmd_extract(mut config: AppConfig, args: ExtractArgs) -> Result<()> {
    apply_overrides(&mut config, &args);
    let seeds = parse_seeds(&args.urls)?;

    let to_stdout = config.defaults.output_path == "-";
    let output = (!to_stdout).then(|| PathBuf::from(&config.defaults.output_path));

    let run_config = RunConfig {
        seeds,
        output,
        crawl: CrawlConfig::from(&config),
        normalize: NormalizeConfig::from(&config),
        extract: ExtractConfig::from(&config),
    };

    info!(
        seeds = run_config.seeds.len(),
        depth = run_config.crawl.max_depth,
        model = %config.model.default_model,
        renderer = ?run_config.crawl.renderer,
        "extracting modules"
    );

    // Fail fast on a missing model before spending time crawling.
    let model = OllamaClient::new(
        config.model.endpoint.as_str(),
        config.model.default_model.as_str(),
        run_config.extract.model_timeout,
    )?
    .with_temperature(config.model.temperature);
    model
        .ensure_available()
        .await
        .wrap_err("model pre-flight check failed")?;

    let fetcher = build_fetcher(&run_config.crawl).await?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight fetches");
            on_interrupt.cancel();
        }
    });

    let reporter = CliProgress::new();
    let deps = PipelineDeps {
        fetcher,
        model: Arc::new(model),
        cancel,
    };
    let report = docmodules_core::run(&run_config, deps, &reporter).await?;

    if to_stdout {
        println!("{}", serde_json::to_string_pretty(&report.result)?);
    }
    print_summary(&report);
    Ok(())
}

fn print_summary(report: &RunReport) {
    eprintln!();
    eprintln!("  Extraction complete.");
    eprintln!("  Run:        {}", report.run_id);
    eprintln!(
        "  Pages:      {} fetched ({} cached), {} failed",
        report.pages_fetched, report.cache_hits, report.fetch_errors
    );
    if let Some(reason) = report.stopped_early {
        eprintln!("  Stopped:    {reason:?}");
    }
    eprintln!(
        "  Documents:  {} extracted, {} too short",
        report.documents,
        report.excluded.len()
    );
    if !report.failed_units.is_empty() {
        eprintln!("  Failed:     {} model batches", report.failed_units.len());
    }
    eprintln!(
        "  Modules:    {} ({} submodules)",
        report.result.len(),
        report.result.submodule_count()
    );
    if let Some(path) = &report.output_path {
        eprintln!("  Output:     {}", path.display());
    }
    eprintln!("  Time:       {:.1}s", report.elapsed.as_secs_f64());
    eprintln!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn crawled(&self, pages: usize, errors: usize) {
        self.spinner
            .println(format!("  crawled {pages} pages ({errors} failed)"));
    }

    fn normalized(&self, kept: usize, excluded: usize) {
        self.spinner
            .println(format!("  {kept} documents ready ({excluded} too short)"));
    }

    fn done(&self, _report: &RunReport) {
        self.spinner.finish_and_clear();
    }
}

impl Drop for CliProgress {
    fn drop(&mut self) {
        if !self.spinner.is_finished() {
            self.spinner.finish_and_clear();
        }
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

async fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}
