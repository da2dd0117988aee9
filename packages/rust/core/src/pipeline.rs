//! End-to-end workflows: URL → discovery → fetch (cache-aware) → EPUB, and
//! cache → EPUB without any network access.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use novelpack_browser::{Browser, SessionPool};
use novelpack_crawler::{
    AdapterRegistry, ChapterEvent, FetchEngine, FetchObserver, FetchReport, VolumeDiscoverer,
};
use novelpack_epub::{EpubAssembler, Font, FontCatalog, PackagingMode};
use novelpack_shared::{Configuration, FetchConfig, Novel, NovelPackError, Result, Volume};
use novelpack_storage::{ChapterCache, NovelLayout};

/// Configuration for [`download_novel`].
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Listing page of the novel.
    pub source_url: String,
    /// Title, saving root, volume range, and font.
    pub novel: Configuration,
    /// Author written into package metadata.
    pub author: String,
    /// Root of the chapter cache.
    pub cache_root: PathBuf,
    /// Directory scanned for the font catalog.
    pub fonts_dir: PathBuf,
    pub mode: PackagingMode,
    pub fetch: FetchConfig,
}

/// Configuration for [`build_from_cache`].
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub novel: Configuration,
    pub author: String,
    pub cache_root: PathBuf,
    pub fonts_dir: PathBuf,
    pub mode: PackagingMode,
}

/// Result of a workflow run.
#[derive(Debug)]
pub struct NovelResult {
    /// Title and the directory the artifacts were written to.
    pub novel: Novel,
    /// Volumes in discovery order with their chapters.
    pub volumes: Vec<Volume>,
    /// Per-chapter outcome counts.
    pub report: FetchReport,
    /// Written packages.
    pub artifacts: Vec<PathBuf>,
    /// Total elapsed time.
    pub elapsed: Duration,
}

/// Progress callback for reporting workflow status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called once discovery knows the amount of work.
    fn discovered(&self, volumes: usize, chapters: usize);
    /// Called for every chapter outcome.
    fn chapter_done(&self, event: &ChapterEvent, current: usize, total: usize);
    /// Called when the workflow completes.
    fn done(&self, result: &NovelResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn discovered(&self, _volumes: usize, _chapters: usize) {}
    fn chapter_done(&self, _event: &ChapterEvent, _current: usize, _total: usize) {}
    fn done(&self, _result: &NovelResult) {}
}

/// Discover, fetch, and package one novel.
///
/// 1. Pick the site adapter and load the font (fail fast)
/// 2. Discover volumes in the requested range
/// 3. Fetch every chapter, cache first
/// 4. Assemble the packages into the novel directory
///
/// Cancelling `cancel` stops the fetch; nothing is packaged and
/// [`NovelPackError::Cancelled`] is returned. Fetched chapters stay cached.
#[instrument(skip_all, fields(url = %config.source_url, title = %config.novel.novel_title))]
pub async fn download_novel(
    config: &DownloadConfig,
    registry: &AdapterRegistry,
    browser: Arc<dyn Browser>,
    cancel: &CancellationToken,
    progress: &dyn ProgressReporter,
) -> Result<NovelResult> {
    let start = Instant::now();
    let adapter = registry.for_url(&config.source_url)?;
    let layout = NovelLayout::new(
        &config.novel.novel_title,
        &config.novel.saving_directory,
        &config.cache_root,
    );
    info!(adapter = adapter.name(), novel_dir = %layout.novel_dir().display(), "starting download");

    // --- Phase 1: Font ---
    progress.phase("Loading font");
    let font = open_font(&config.fonts_dir, config.novel.chosen_font.clone()).await?;

    // --- Phase 2: Discovery ---
    progress.phase("Discovering volumes");
    let pool = SessionPool::new(browser, config.fetch.session_limit);
    let mut session = pool.acquire(&config.source_url).await?;
    let discovered = VolumeDiscoverer::new(adapter.as_ref(), &layout, config.fetch.wait_timeout)
        .discover(session.page_mut(), config.novel.range())
        .await;
    if let Err(e) = session.close().await {
        debug!(error = %e, "closing listing page failed");
    }
    let volumes = discovered?;
    if volumes.is_empty() {
        return Err(NovelPackError::validation(
            "no volumes found in the requested range",
        ));
    }
    let chapters = volumes.iter().map(Volume::chapter_count).sum();
    progress.discovered(volumes.len(), chapters);

    // --- Phase 3: Fetch ---
    progress.phase("Fetching chapters");
    let engine = FetchEngine::new(
        adapter,
        pool,
        ChapterCache::for_layout(&layout),
        &config.fetch,
    );
    let observer = ProgressObserver {
        inner: progress,
        done: AtomicUsize::new(0),
        total: chapters,
    };
    let outcome = engine.run(volumes, cancel, &observer).await?;
    if cancel.is_cancelled() {
        warn!(
            fetched = outcome.report.fetched,
            cancelled = outcome.report.cancelled,
            "download cancelled, skipping packaging"
        );
        return Err(NovelPackError::Cancelled);
    }

    // --- Phase 4: Package ---
    progress.phase("Packaging");
    let novel_dir = layout.ensure_novel_dir().await?.to_path_buf();
    let (volumes, artifacts) = package(
        font,
        config.author.clone(),
        config.novel.novel_title.clone(),
        outcome.volumes,
        novel_dir.clone(),
        config.mode,
    )
    .await?;

    let result = NovelResult {
        novel: Novel {
            title: config.novel.novel_title.clone(),
            saving_directory: novel_dir,
        },
        volumes,
        report: outcome.report,
        artifacts,
        elapsed: start.elapsed(),
    };
    progress.done(&result);

    info!(
        fetched = result.report.fetched,
        cached = result.report.cached,
        failed = result.report.failed,
        artifacts = result.artifacts.len(),
        elapsed_ms = result.elapsed.as_millis(),
        "download complete"
    );
    Ok(result)
}

/// Rebuild packages from cached chapters only.
#[instrument(skip_all, fields(title = %config.novel.novel_title))]
pub async fn build_from_cache(
    config: &BuildConfig,
    progress: &dyn ProgressReporter,
) -> Result<NovelResult> {
    let start = Instant::now();
    let layout = NovelLayout::new(
        &config.novel.novel_title,
        &config.novel.saving_directory,
        &config.cache_root,
    );

    progress.phase("Loading font");
    let font = open_font(&config.fonts_dir, config.novel.chosen_font.clone()).await?;

    progress.phase("Reading cache");
    let cached = ChapterCache::for_layout(&layout).load_volumes(&layout).await?;
    let last_id = cached.iter().map(|v| v.id).max().unwrap_or(0);
    let (first, last) = config.novel.range().resolve(last_id);
    let volumes: Vec<Volume> = cached
        .into_iter()
        .filter(|v| (first..=last).contains(&v.id))
        .collect();
    let chapters: usize = volumes.iter().map(Volume::chapter_count).sum();
    if chapters == 0 {
        return Err(NovelPackError::validation(format!(
            "no cached chapters for `{}` under {}",
            config.novel.novel_title,
            layout.cache_dir().display()
        )));
    }
    progress.discovered(volumes.len(), chapters);
    info!(volumes = volumes.len(), chapters, "cache loaded");

    progress.phase("Packaging");
    let novel_dir = layout.ensure_novel_dir().await?.to_path_buf();
    let (volumes, artifacts) = package(
        font,
        config.author.clone(),
        config.novel.novel_title.clone(),
        volumes,
        novel_dir.clone(),
        config.mode,
    )
    .await?;

    let result = NovelResult {
        novel: Novel {
            title: config.novel.novel_title.clone(),
            saving_directory: novel_dir,
        },
        volumes,
        report: FetchReport {
            cached: chapters,
            ..FetchReport::default()
        },
        artifacts,
        elapsed: start.elapsed(),
    };
    progress.done(&result);
    info!(artifacts = result.artifacts.len(), "build complete");
    Ok(result)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Forwards engine events to a [`ProgressReporter`] with a running count.
struct ProgressObserver<'a> {
    inner: &'a dyn ProgressReporter,
    done: AtomicUsize,
    total: usize,
}

impl FetchObserver for ProgressObserver<'_> {
    fn on_chapter(&self, event: &ChapterEvent) {
        let current = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        self.inner.chapter_done(event, current, self.total);
    }
}

async fn open_font(fonts_dir: &Path, name: Option<String>) -> Result<Font> {
    let dir = fonts_dir.to_path_buf();
    tokio::task::spawn_blocking(move || FontCatalog::load(&dir)?.open(name.as_deref()))
        .await
        .map_err(|e| NovelPackError::Packaging(format!("font task failed: {e}")))?
}

async fn package(
    font: Font,
    author: String,
    title: String,
    volumes: Vec<Volume>,
    out_dir: PathBuf,
    mode: PackagingMode,
) -> Result<(Vec<Volume>, Vec<PathBuf>)> {
    tokio::task::spawn_blocking(move || {
        let artifacts = EpubAssembler::new(&font, author).assemble(&title, &volumes, &out_dir, mode)?;
        Ok((volumes, artifacts))
    })
    .await
    .map_err(|e| NovelPackError::Packaging(format!("packaging task failed: {e}")))?
}
