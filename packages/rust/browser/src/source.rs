//! Where page documents come from.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use novelpack_shared::{FetchConfig, NovelPackError, Result};

/// Loads the HTML body behind a URL.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn load(&self, url: &str) -> Result<String>;
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// Documents fetched over HTTP(S).
pub struct HttpSource {
    client: Client,
}

impl HttpSource {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| NovelPackError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl DocumentSource for HttpSource {
    async fn load(&self, url: &str) -> Result<String> {
        debug!(%url, "loading document");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| NovelPackError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NovelPackError::Network(format!("{url}: HTTP {status}")));
        }

        response
            .text()
            .await
            .map_err(|e| NovelPackError::Network(format!("{url}: body read failed: {e}")))
    }
}

// ---------------------------------------------------------------------------
// In-memory (tests)
// ---------------------------------------------------------------------------

#[cfg(any(test, feature = "test-support"))]
pub use memory::{MemoryDocument, MemorySource};

#[cfg(any(test, feature = "test-support"))]
mod memory {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    const EMPTY_DOCUMENT: &str = "<html><head></head><body></body></html>";

    /// A canned document with optional latency and failure behaviour.
    #[derive(Debug, Clone, Default)]
    pub struct MemoryDocument {
        pub body: String,
        /// Latency of every load.
        pub delay: Duration,
        /// Every load fails with a network error.
        pub fail: bool,
        /// The first `ready_after` loads return an empty document.
        pub ready_after: usize,
    }

    impl MemoryDocument {
        pub fn new(body: impl Into<String>) -> Self {
            Self {
                body: body.into(),
                ..Self::default()
            }
        }

        pub fn delayed(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub fn failing(mut self) -> Self {
            self.fail = true;
            self
        }

        pub fn ready_after(mut self, loads: usize) -> Self {
            self.ready_after = loads;
            self
        }
    }

    /// A fake site keyed by exact URL. Counts every load and tracks how many
    /// were in flight at once.
    #[derive(Debug, Default)]
    pub struct MemorySource {
        documents: Mutex<HashMap<String, MemoryDocument>>,
        loads: Mutex<HashMap<String, usize>>,
        in_flight: AtomicUsize,
        peak_in_flight: AtomicUsize,
    }

    struct InFlight<'a>(&'a AtomicUsize);

    impl<'a> InFlight<'a> {
        fn enter(current: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            Self(current)
        }
    }

    impl Drop for InFlight<'_> {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl MemorySource {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(&self, url: impl Into<String>, body: impl Into<String>) {
            self.insert_document(url, MemoryDocument::new(body));
        }

        pub fn insert_document(&self, url: impl Into<String>, document: MemoryDocument) {
            self.documents
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(url.into(), document);
        }

        /// Loads issued for `url` so far.
        pub fn loads(&self, url: &str) -> usize {
            self.loads
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .get(url)
                .copied()
                .unwrap_or(0)
        }

        /// Loads issued across all URLs.
        pub fn total_loads(&self) -> usize {
            self.loads
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .values()
                .sum()
        }

        /// Most loads that were ever running at the same time.
        pub fn peak_concurrent_loads(&self) -> usize {
            self.peak_in_flight.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DocumentSource for MemorySource {
        async fn load(&self, url: &str) -> Result<String> {
            let count = {
                let mut loads = self.loads.lock().unwrap_or_else(|e| e.into_inner());
                let count = loads.entry(url.to_string()).or_insert(0);
                *count += 1;
                *count
            };
            let document = self
                .documents
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .get(url)
                .cloned()
                .ok_or_else(|| NovelPackError::Network(format!("{url}: HTTP 404 Not Found")))?;

            let _in_flight = InFlight::enter(&self.in_flight, &self.peak_in_flight);
            if !document.delay.is_zero() {
                tokio::time::sleep(document.delay).await;
            }
            if document.fail {
                return Err(NovelPackError::Network(format!("{url}: connection reset")));
            }
            if count <= document.ready_after {
                return Ok(EMPTY_DOCUMENT.to_string());
            }
            Ok(document.body)
        }
    }
}
