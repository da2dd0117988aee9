//! Bounded, cache-aware fetch engine.
//!
//! Volumes fan out under one bound, chapters within a volume under another,
//! and every remote page comes from a shared [`SessionPool`]. A chapter that
//! fails is logged and left without lines; it never cancels its siblings or
//! its volume. Results come back in discovery order whatever the completion
//! order was.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use novelpack_browser::SessionPool;
use novelpack_shared::{Chapter, FetchConfig, Line, NovelPackError, Result, Volume};
use novelpack_storage::{ChapterCache, SaveOutcome};

use crate::adapters::SiteAdapter;

// ---------------------------------------------------------------------------
// Events and reports
// ---------------------------------------------------------------------------

/// What happened to one chapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChapterEvent {
    /// Served from the cache, no remote call.
    Cached { volume_id: u32, chapter_id: u32 },
    /// Fetched remotely (and cached).
    Fetched { volume_id: u32, chapter_id: u32 },
    /// Fetch failed; the chapter has no lines.
    Failed {
        volume_id: u32,
        chapter_id: u32,
        error: String,
    },
    /// Not attempted because the run was cancelled.
    Cancelled { volume_id: u32, chapter_id: u32 },
}

/// Receives chapter events as they happen, on the caller's task.
pub trait FetchObserver: Send + Sync {
    fn on_chapter(&self, event: &ChapterEvent);
}

impl FetchObserver for () {
    fn on_chapter(&self, _event: &ChapterEvent) {}
}

/// Summary of a completed fetch run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchReport {
    /// Chapters fetched remotely.
    pub fetched: usize,
    /// Chapters served from the cache.
    pub cached: usize,
    /// Chapters that failed.
    pub failed: usize,
    /// Chapters skipped because of cancellation.
    pub cancelled: usize,
    /// Failures as (chapter id, error message).
    pub failures: Vec<(u32, String)>,
    /// Wall-clock duration of the run.
    pub duration: Duration,
}

impl FetchReport {
    fn record(&mut self, event: &ChapterEvent) {
        match event {
            ChapterEvent::Cached { .. } => self.cached += 1,
            ChapterEvent::Fetched { .. } => self.fetched += 1,
            ChapterEvent::Failed {
                chapter_id, error, ..
            } => {
                self.failed += 1;
                self.failures.push((*chapter_id, error.clone()));
            }
            ChapterEvent::Cancelled { .. } => self.cancelled += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.fetched + self.cached + self.failed + self.cancelled
    }
}

/// Populated volumes plus the run summary.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    /// Volumes in discovery order, chapters in discovery order.
    pub volumes: Vec<Volume>,
    pub report: FetchReport,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Schedules chapter fetches under the volume, chapter, and session bounds.
pub struct FetchEngine {
    shared: Arc<Shared>,
    volume_limit: usize,
}

/// State every task needs.
struct Shared {
    adapter: Arc<dyn SiteAdapter>,
    pool: SessionPool,
    cache: ChapterCache,
    chapter_limit: usize,
    wait: Duration,
}

impl FetchEngine {
    pub fn new(
        adapter: Arc<dyn SiteAdapter>,
        pool: SessionPool,
        cache: ChapterCache,
        config: &FetchConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                adapter,
                pool,
                cache,
                chapter_limit: config.chapter_concurrency.max(1),
                wait: config.wait_timeout,
            }),
            volume_limit: config.volume_concurrency.max(1),
        }
    }

    /// Populate every chapter of `volumes`, from the cache when possible.
    ///
    /// Cancelling `cancel` stops scheduling new chapters; chapters already
    /// in flight finish. Per-chapter outcomes are reported to `observer`.
    #[instrument(skip_all, fields(adapter = self.shared.adapter.name(), volumes = volumes.len()))]
    pub async fn run(
        &self,
        volumes: Vec<Volume>,
        cancel: &CancellationToken,
        observer: &dyn FetchObserver,
    ) -> Result<FetchOutcome> {
        let started = Instant::now();
        let volume_permits = Arc::new(Semaphore::new(self.volume_limit));
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();

        info!(
            volume_concurrency = self.volume_limit,
            chapter_concurrency = self.shared.chapter_limit,
            session_limit = self.shared.pool.limit(),
            "starting fetch"
        );

        // Skeletons stand in for volumes whose task dies.
        let mut slots: Vec<Volume> = volumes.clone();
        let mut tasks = JoinSet::new();

        for (pos, volume) in volumes.into_iter().enumerate() {
            let shared = Arc::clone(&self.shared);
            let permits = Arc::clone(&volume_permits);
            let events = events_tx.clone();
            let token = cancel.child_token();

            tasks.spawn(async move {
                let _permit = tokio::select! {
                    permit = permits.acquire_owned() => permit.ok(),
                    _ = token.cancelled() => None,
                };
                (pos, fetch_volume(shared, volume, token, events).await)
            });
        }
        drop(events_tx);

        let mut report = FetchReport::default();
        loop {
            tokio::select! {
                Some(event) = events_rx.recv() => {
                    report.record(&event);
                    observer.on_chapter(&event);
                }
                Some(joined) = tasks.join_next() => match joined {
                    Ok((pos, volume)) => slots[pos] = volume,
                    Err(e) => warn!(error = %e, "volume task aborted"),
                },
                else => break,
            }
        }

        // Chapters of aborted volume tasks never reported anything.
        let reported = report.total();
        let expected: usize = slots.iter().map(Volume::chapter_count).sum();
        if reported < expected {
            warn!(missing = expected - reported, "chapters without outcome");
        }

        report.duration = started.elapsed();
        info!(
            fetched = report.fetched,
            cached = report.cached,
            failed = report.failed,
            cancelled = report.cancelled,
            duration_ms = report.duration.as_millis(),
            "fetch completed"
        );

        Ok(FetchOutcome {
            volumes: slots,
            report,
        })
    }
}

// ---------------------------------------------------------------------------
// Volume / chapter tasks
// ---------------------------------------------------------------------------

#[instrument(skip_all, fields(volume_id = volume.id, title = %volume.title))]
async fn fetch_volume(
    shared: Arc<Shared>,
    volume: Volume,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<ChapterEvent>,
) -> Volume {
    info!(chapters = volume.chapter_count(), "volume started");

    let Volume {
        id,
        title,
        path,
        cache_path,
        chapters,
    } = volume;
    let header = Arc::new(Volume {
        id,
        title,
        path,
        cache_path,
        chapters: Vec::new(),
    });

    let chapter_permits = Arc::new(Semaphore::new(shared.chapter_limit));
    let mut slots = chapters.clone();
    let mut tasks = JoinSet::new();

    for (pos, chapter) in chapters.into_iter().enumerate() {
        let shared = Arc::clone(&shared);
        let header = Arc::clone(&header);
        let permits = Arc::clone(&chapter_permits);
        let events = events.clone();
        let cancel = cancel.clone();

        tasks.spawn(async move {
            let permit = tokio::select! {
                permit = permits.acquire_owned() => permit.ok(),
                _ = cancel.cancelled() => None,
            };
            let chapter_id = chapter.chapter_id;
            let (chapter, event) = match permit {
                Some(_permit) => fetch_chapter(&shared, &header, chapter, &cancel).await,
                None => (
                    chapter,
                    ChapterEvent::Cancelled {
                        volume_id: header.id,
                        chapter_id,
                    },
                ),
            };
            let _ = events.send(event);
            (pos, chapter)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((pos, chapter)) => slots[pos] = chapter,
            Err(e) => {
                warn!(error = %e, "chapter task aborted");
            }
        }
    }

    info!("volume completed");
    let header = Arc::unwrap_or_clone(header);
    Volume {
        chapters: slots,
        ..header
    }
}

/// Cache first, then one remote attempt. Never fails: errors become events.
async fn fetch_chapter(
    shared: &Shared,
    volume: &Volume,
    chapter: Chapter,
    cancel: &CancellationToken,
) -> (Chapter, ChapterEvent) {
    let volume_id = volume.id;
    let chapter_id = chapter.chapter_id;

    match shared.cache.load(volume, &chapter).await {
        Ok(Some(cached)) => {
            debug!(chapter_id, "cache hit");
            return (
                chapter.with_lines(cached.lines),
                ChapterEvent::Cached {
                    volume_id,
                    chapter_id,
                },
            );
        }
        Ok(None) => {}
        Err(e) => warn!(chapter_id, error = %e, "unreadable cache entry, refetching"),
    }

    if cancel.is_cancelled() {
        return (
            chapter,
            ChapterEvent::Cancelled {
                volume_id,
                chapter_id,
            },
        );
    }

    match fetch_remote(shared, &chapter).await {
        Ok(lines) => {
            let chapter = chapter.with_lines(lines);
            match shared.cache.save(volume, &chapter).await {
                Ok(SaveOutcome::Saved) => debug!(chapter_id, "chapter cached"),
                Ok(SaveOutcome::Skipped) => debug!(chapter_id, "cache entry kept"),
                Err(e) => warn!(chapter_id, error = %e, "failed to cache chapter"),
            }
            (
                chapter,
                ChapterEvent::Fetched {
                    volume_id,
                    chapter_id,
                },
            )
        }
        Err(e) => {
            let error = NovelPackError::ChapterFetch {
                chapter_id,
                message: e.to_string(),
            };
            warn!(volume_id, error = %error, "chapter failed");
            (
                chapter,
                ChapterEvent::Failed {
                    volume_id,
                    chapter_id,
                    error: e.to_string(),
                },
            )
        }
    }
}

async fn fetch_remote(shared: &Shared, chapter: &Chapter) -> Result<Vec<Line>> {
    let mut session = shared.pool.acquire(&chapter.url).await?;
    let result = shared
        .adapter
        .fetch_chapter(session.page_mut(), chapter, shared.wait)
        .await;
    if let Err(e) = session.close().await {
        debug!(error = %e, "closing session failed");
    }
    result
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use novelpack_browser::{Browser, MemoryDocument, MemorySource, StaticBrowser};
    use novelpack_shared::VolumeRange;
    use novelpack_storage::NovelLayout;

    use super::*;
    use crate::adapters::{KolNovelAdapter, ListingChapter, ListingVolume};
    use crate::discovery::build_volumes;

    const SITE: &str = "https://free.kolnovel.com";

    struct Fixture {
        _tmp: tempfile::TempDir,
        source: Arc<MemorySource>,
        browser: Arc<StaticBrowser>,
        layout: NovelLayout,
        config: FetchConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = tempfile::tempdir().expect("tempdir");
            let layout = NovelLayout::new("Test Novel", &tmp.path().join("out"), &tmp.path().join("cache"));
            let source = Arc::new(MemorySource::new());
            let browser = Arc::new(StaticBrowser::new(source.clone(), Duration::from_millis(5)));
            let config = FetchConfig {
                volume_concurrency: 2,
                chapter_concurrency: 4,
                session_limit: 3,
                wait_timeout: Duration::from_millis(50),
                poll_interval: Duration::from_millis(5),
                ..FetchConfig::default()
            };
            Self {
                _tmp: tmp,
                source,
                browser,
                layout,
                config,
            }
        }

        fn chapter_url(id: u32) -> String {
            format!("{SITE}/chapter-{id}")
        }

        /// `volumes` volumes of `per_volume` chapters; chapter pages served with `delay_of`.
        fn volumes(&self, volumes: u32, per_volume: u32, delay_of: impl Fn(u32) -> u64) -> Vec<Volume> {
            let mut listing = Vec::new();
            let mut id = 0;
            for v in 1..=volumes {
                let mut chapters = Vec::new();
                for _ in 0..per_volume {
                    id += 1;
                    self.source.insert_document(
                        Self::chapter_url(id),
                        MemoryDocument::new(format!(
                            r#"<div class="entry-content"><p>chapter {id} line a</p><p>chapter {id} line b</p></div>"#
                        ))
                        .delayed(Duration::from_millis(delay_of(id))),
                    );
                    chapters.push(ListingChapter {
                        title: format!("C{id}"),
                        url: Self::chapter_url(id),
                    });
                }
                chapters.reverse();
                listing.push(ListingVolume {
                    title: format!("V{v}"),
                    chapters,
                });
            }
            listing.reverse();
            build_volumes(listing, VolumeRange::all(), &self.layout)
        }

        fn engine(&self) -> FetchEngine {
            FetchEngine::new(
                Arc::new(KolNovelAdapter::new()),
                SessionPool::new(self.browser.clone(), self.config.session_limit),
                ChapterCache::for_layout(&self.layout),
                &self.config,
            )
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<ChapterEvent>>);

    impl FetchObserver for Recorder {
        fn on_chapter(&self, event: &ChapterEvent) {
            self.0.lock().expect("lock").push(event.clone());
        }
    }

    #[tokio::test]
    async fn preserves_discovery_order() {
        let fx = Fixture::new();
        // Earlier chapters are slower, so completion order is reversed.
        let volumes = fx.volumes(2, 5, |id| 60 - u64::from(id) * 5);
        let outcome = fx
            .engine()
            .run(volumes, &CancellationToken::new(), &())
            .await
            .expect("run");

        assert_eq!(outcome.report.fetched, 10);
        assert_eq!(outcome.report.failed, 0);
        let ids: Vec<u32> = outcome
            .volumes
            .iter()
            .flat_map(|v| v.chapters.iter().map(|c| c.chapter_id))
            .collect();
        assert_eq!(ids, (1..=10).collect::<Vec<_>>());
        assert_eq!(
            outcome.volumes[0].chapters[2].lines,
            vec![Line::text("chapter 3 line a"), Line::text("chapter 3 line b")]
        );
    }

    #[tokio::test]
    async fn second_run_is_served_from_cache() {
        let fx = Fixture::new();
        let volumes = fx.volumes(2, 3, |_| 0);

        let first = fx
            .engine()
            .run(volumes.clone(), &CancellationToken::new(), &())
            .await
            .expect("first run");
        assert_eq!(first.report.fetched, 6);
        let loads_after_first = fx.source.total_loads();

        let entry = ChapterCache::for_layout(&fx.layout).chapter_path(&volumes[0], &volumes[0].chapters[0]);
        let bytes_before = std::fs::read(&entry).expect("cached file");

        let second = fx
            .engine()
            .run(volumes, &CancellationToken::new(), &())
            .await
            .expect("second run");
        assert_eq!(second.report.cached, 6);
        assert_eq!(second.report.fetched, 0);
        assert_eq!(fx.source.total_loads(), loads_after_first, "no remote calls");
        assert_eq!(std::fs::read(&entry).expect("cached file"), bytes_before);
        assert_eq!(first.volumes, second.volumes);
    }

    #[tokio::test]
    async fn failure_is_isolated() {
        let fx = Fixture::new();
        let volumes = fx.volumes(1, 10, |_| 0);
        fx.source
            .insert_document(Fixture::chapter_url(3), MemoryDocument::new("x").failing());

        let recorder = Recorder::default();
        let outcome = fx
            .engine()
            .run(volumes, &CancellationToken::new(), &recorder)
            .await
            .expect("run");

        assert_eq!(outcome.report.fetched, 9);
        assert_eq!(outcome.report.failed, 1);
        assert_eq!(outcome.report.failures[0].0, 3);

        let chapters = &outcome.volumes[0].chapters;
        assert!(chapters[2].lines.is_empty());
        for (i, c) in chapters.iter().enumerate() {
            if i != 2 {
                assert_eq!(c.lines.len(), 2, "chapter {} populated", c.chapter_id);
            }
        }

        let events = recorder.0.lock().expect("lock");
        assert_eq!(events.len(), 10);
        assert!(events.iter().any(|e| matches!(e, ChapterEvent::Failed { chapter_id: 3, .. })));
    }

    #[tokio::test]
    async fn failed_chapter_is_not_cached() {
        let fx = Fixture::new();
        let volumes = fx.volumes(1, 2, |_| 0);
        fx.source
            .insert_document(Fixture::chapter_url(2), MemoryDocument::new("x").failing());
        let cache = ChapterCache::for_layout(&fx.layout);

        fx.engine()
            .run(volumes.clone(), &CancellationToken::new(), &())
            .await
            .expect("run");
        assert!(cache.exists(&volumes[0], &volumes[0].chapters[0]).await);
        assert!(!cache.exists(&volumes[0], &volumes[0].chapters[1]).await);
    }

    #[tokio::test]
    async fn corrupt_cache_entry_is_refetched_not_overwritten() {
        let fx = Fixture::new();
        let volumes = fx.volumes(1, 1, |_| 0);
        let cache = ChapterCache::for_layout(&fx.layout);
        let path = cache.chapter_path(&volumes[0], &volumes[0].chapters[0]);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(&path, "{broken").expect("write");

        let outcome = fx
            .engine()
            .run(volumes, &CancellationToken::new(), &())
            .await
            .expect("run");
        assert_eq!(outcome.report.fetched, 1);
        assert_eq!(outcome.volumes[0].chapters[0].lines.len(), 2);
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "{broken");
    }

    #[tokio::test]
    async fn session_bound_holds() {
        let fx = Fixture::new();
        let volumes = fx.volumes(3, 6, |_| 30);
        fx.engine()
            .run(volumes, &CancellationToken::new(), &())
            .await
            .expect("run");
        assert_eq!(fx.browser.peak_open_pages(), fx.config.session_limit);
        assert_eq!(fx.source.peak_concurrent_loads(), fx.config.session_limit);
        assert_eq!(fx.browser.open_pages(), 0);
    }

    /// Peak number of chapter loads in flight for 4 volumes of 6 slow chapters.
    async fn peak_loads(volume_limit: usize, chapter_limit: usize, session_limit: usize) -> usize {
        let mut fx = Fixture::new();
        fx.config.volume_concurrency = volume_limit;
        fx.config.chapter_concurrency = chapter_limit;
        fx.config.session_limit = session_limit;
        let volumes = fx.volumes(4, 6, |_| 30);
        let outcome = fx
            .engine()
            .run(volumes, &CancellationToken::new(), &())
            .await
            .expect("run");
        assert_eq!(outcome.report.fetched, 24);
        fx.source.peak_concurrent_loads()
    }

    #[tokio::test]
    async fn chapter_bound_applies_per_volume() {
        assert_eq!(peak_loads(1, 2, 64).await, 2);
    }

    #[tokio::test]
    async fn volume_and_chapter_bounds_multiply() {
        assert_eq!(peak_loads(2, 3, 64).await, 6);
    }

    #[tokio::test]
    async fn session_limit_caps_fan_out() {
        assert_eq!(peak_loads(4, 6, 2).await, 2);
    }

    #[tokio::test]
    async fn cancelled_run_fetches_nothing() {
        let fx = Fixture::new();
        let volumes = fx.volumes(2, 3, |_| 0);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = fx.engine().run(volumes, &cancel, &()).await.expect("run");
        assert_eq!(outcome.report.cancelled, 6);
        assert_eq!(fx.source.total_loads(), 0);
        assert_eq!(outcome.volumes.len(), 2);
        assert!(outcome.volumes.iter().all(|v| v.chapters.iter().all(|c| c.lines.is_empty())));
    }
}
