//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

use novelpack_browser::StaticBrowser;
use novelpack_core::{
    BuildConfig, DownloadConfig, NovelResult, ProgressReporter, build_from_cache, download_novel,
    find_novel_directories, update_covers_for_novels,
};
use novelpack_crawler::{AdapterRegistry, ChapterEvent};
use novelpack_epub::{FontCatalog, PackagingMode};
use novelpack_shared::{
    AppConfig, Configuration, CoverUpdateReport, FetchConfig, expand_home, init_config,
    load_config,
};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// novelpack: turn web novels into EPUB packages.
#[derive(Parser)]
#[command(
    name = "novelpack",
    version,
    about = "Download web novels into EPUB packages with an embedded font.",
    long_about = None,
)]
pub(crate) struct Cli {
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

/// Options shared by `download` and `build`.
#[derive(clap::Args)]
pub(crate) struct PackageArgs {
    /// Novel title; names the output directory and the combined package.
    #[arg(short, long)]
    pub title: String,

    /// Author written into package metadata.
    #[arg(short, long)]
    pub author: Option<String>,

    /// One package per volume instead of a combined one.
    #[arg(long)]
    pub separated: bool,

    /// Font family from the catalog (see `novelpack fonts`).
    #[arg(long)]
    pub font: Option<String>,

    /// Saving root; the novel gets its own directory below it.
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// First volume to include (1-based).
    #[arg(long)]
    pub start: Option<u32>,

    /// Last volume to include; 0 or absent means the last one.
    #[arg(long)]
    pub end: Option<u32>,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Discover, fetch, and package a novel.
    Download {
        /// Listing page of the novel.
        url: String,

        #[command(flatten)]
        package: PackageArgs,
    },

    /// Rebuild packages from cached chapters, without network access.
    Build {
        #[command(flatten)]
        package: PackageArgs,
    },

    /// Patch covers into the packages of one or more novel directories.
    Covers {
        /// Novel directories; defaults to every directory under the saving root.
        dirs: Vec<PathBuf>,

        /// Print the reports as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List the font catalog.
    Fonts,

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
        0 => "novelpack=info",
        1 => "novelpack=debug",
        _ => "novelpack=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

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
    match cli.command {
        Command::Download { url, package } => cmd_download(&url, &package).await,
        Command::Build { package } => cmd_build(&package).await,
        Command::Covers { dirs, json } => cmd_covers(dirs, json).await,
        Command::Fonts => cmd_fonts().await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

/// Paths and packaging options resolved from config + flags.
struct Resolved {
    novel: Configuration,
    author: String,
    cache_root: PathBuf,
    fonts_dir: PathBuf,
    mode: PackagingMode,
}

fn resolve(config: &AppConfig, args: &PackageArgs) -> Resolved {
    let defaults = &config.defaults;
    let saving_directory = args
        .out
        .clone()
        .unwrap_or_else(|| expand_home(&defaults.saving_dir));
    let mode = if args.separated || defaults.separated {
        PackagingMode::Separated
    } else {
        PackagingMode::Combined
    };
    Resolved {
        novel: Configuration {
            novel_title: args.title.clone(),
            saving_directory,
            start_volume: args.start,
            end_volume: args.end,
            chosen_font: args.font.clone(),
        },
        author: args.author.clone().unwrap_or_else(|| defaults.author.clone()),
        cache_root: expand_home(&defaults.cache_dir),
        fonts_dir: expand_home(&defaults.fonts_dir),
        mode,
    }
}

async fn cmd_download(url: &str, args: &PackageArgs) -> Result<()> {
    let config = load_config()?;
    let parsed = Url::parse(url).map_err(|e| eyre!("invalid URL '{url}': {e}"))?;
    let resolved = resolve(&config, args);
    let fetch = FetchConfig::from(&config);
    let browser = Arc::new(StaticBrowser::launch(&fetch)?);

    let download = DownloadConfig {
        source_url: parsed.to_string(),
        novel: resolved.novel,
        author: resolved.author,
        cache_root: resolved.cache_root,
        fonts_dir: resolved.fonts_dir,
        mode: resolved.mode,
        fetch,
    };

    info!(url, title = %args.title, mode = ?download.mode, "downloading novel");

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, finishing in-flight chapters");
            on_interrupt.cancel();
        }
    });

    let reporter = CliProgress::new();
    let result = download_novel(
        &download,
        &AdapterRegistry::new(),
        browser,
        &cancel,
        &reporter,
    )
    .await;
    reporter.spinner.finish_and_clear();

    print_result(&result?);
    Ok(())
}

async fn cmd_build(args: &PackageArgs) -> Result<()> {
    let config = load_config()?;
    let resolved = resolve(&config, args);
    let build = BuildConfig {
        novel: resolved.novel,
        author: resolved.author,
        cache_root: resolved.cache_root,
        fonts_dir: resolved.fonts_dir,
        mode: resolved.mode,
    };

    info!(title = %args.title, "building from cache");

    let reporter = CliProgress::new();
    let result = build_from_cache(&build, &reporter).await;
    reporter.spinner.finish_and_clear();

    print_result(&result?);
    Ok(())
}

fn print_result(result: &NovelResult) {
    let report = &result.report;
    println!();
    println!("  {} packaged!", result.novel.title);
    println!("  Volumes:   {}", result.volumes.len());
    println!("  Fetched:   {}", report.fetched);
    println!("  Cached:    {}", report.cached);
    println!("  Failed:    {}", report.failed);
    for (chapter_id, error) in &report.failures {
        println!("    chapter {chapter_id}: {error}");
    }
    for artifact in &result.artifacts {
        println!("  Package:   {}", artifact.display());
    }
    println!("  Time:      {:.1}s", result.elapsed.as_secs_f64());
    println!();
}

async fn cmd_covers(dirs: Vec<PathBuf>, json: bool) -> Result<()> {
    let dirs = if dirs.is_empty() {
        let config = load_config()?;
        let root = expand_home(&config.defaults.saving_dir);
        let found = find_novel_directories(&root).await?;
        if found.is_empty() {
            return Err(eyre!(
                "no novels found under '{}'. Check the saving directory.",
                root.display()
            ));
        }
        found
    } else {
        dirs
    };

    let reports = update_covers_for_novels(&dirs).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    for report in &reports {
        print_cover_report(report);
    }
    let updated: usize = reports.iter().map(|r| r.updated.len()).sum();
    let missing: usize = reports.iter().map(|r| r.missing.len()).sum();
    let failed: usize = reports.iter().map(|r| r.failed.len()).sum();
    println!("  Novels: {}  Updated: {updated}  Missing: {missing}  Failed: {failed}", reports.len());
    println!();
    Ok(())
}

fn print_cover_report(report: &CoverUpdateReport) {
    println!();
    println!("  {}", report.novel_name);
    if !report.has_volumes && report.failed.is_empty() {
        println!("    no packages found");
        return;
    }
    if report.has_volumes && report.covers_folder_missing {
        println!("    covers folder missing");
    }
    for name in &report.updated {
        println!("    updated  {name}");
    }
    for name in &report.missing {
        println!("    missing  {name}");
    }
    for (name, error) in &report.failed {
        println!("    failed   {name}: {error}");
    }
}

async fn cmd_fonts() -> Result<()> {
    let config = load_config()?;
    let dir = expand_home(&config.defaults.fonts_dir);
    let catalog = FontCatalog::load(&dir)?;
    if catalog.is_empty() {
        println!("No fonts installed in {}", dir.display());
        println!("Add one directory per family containing Index.ttf.");
        return Ok(());
    }
    for (i, entry) in catalog.entries().iter().enumerate() {
        let marker = if i == 0 { " (default)" } else { "" };
        println!("  {}{marker}  {}", entry.name, display_relative(&entry.path, &dir));
    }
    Ok(())
}

fn display_relative(path: &Path, base: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .display()
        .to_string()
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
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
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn discovered(&self, volumes: usize, chapters: usize) {
        self.spinner
            .set_message(format!("Found {volumes} volumes, {chapters} chapters"));
    }

    fn chapter_done(&self, event: &ChapterEvent, current: usize, total: usize) {
        let status = match event {
            ChapterEvent::Cached { chapter_id, .. } => format!("cached {chapter_id}"),
            ChapterEvent::Fetched { chapter_id, .. } => format!("fetched {chapter_id}"),
            ChapterEvent::Failed { chapter_id, .. } => format!("failed {chapter_id}"),
            ChapterEvent::Cancelled { chapter_id, .. } => format!("skipped {chapter_id}"),
        };
        self.spinner
            .set_message(format!("Chapters [{current}/{total}] {status}"));
    }

    fn done(&self, _result: &NovelResult) {
        self.spinner.finish_and_clear();
    }
}
