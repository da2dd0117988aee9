//! Bounded pool of remote sessions.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

use novelpack_shared::{NovelPackError, Result};

use crate::{Browser, Page};

/// Owns the browser and the cap on simultaneously open pages.
///
/// Cloning is cheap; clones share the same cap.
#[derive(Clone)]
pub struct SessionPool {
    browser: Arc<dyn Browser>,
    permits: Arc<Semaphore>,
    limit: usize,
}

impl SessionPool {
    pub fn new(browser: Arc<dyn Browser>, limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            browser,
            permits: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Sessions that can be acquired without waiting.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Wait for a free slot, then open a page at `url`.
    ///
    /// The slot is released when the returned [`Session`] is dropped, also
    /// when opening the page fails.
    pub async fn acquire(&self, url: &str) -> Result<Session> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| NovelPackError::browser("session pool is shut down"))?;
        trace!(%url, available = self.available(), "session acquired");

        let page = self.browser.open_page(url).await?;
        Ok(Session {
            page,
            _permit: permit,
        })
    }
}

/// An open page holding one pool slot.
pub struct Session {
    page: Box<dyn Page>,
    _permit: OwnedSemaphorePermit,
}

impl Session {
    pub fn page(&self) -> &dyn Page {
        self.page.as_ref()
    }

    pub fn page_mut(&mut self) -> &mut dyn Page {
        self.page.as_mut()
    }

    /// Close the page and give the slot back.
    pub async fn close(mut self) -> Result<()> {
        self.page.close().await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::StaticBrowser;
    use crate::source::{MemoryDocument, MemorySource};

    fn pool(limit: usize) -> (SessionPool, Arc<StaticBrowser>) {
        let source = MemorySource::new();
        source.insert_document(
            "mem://p",
            MemoryDocument::new("<p>x</p>").delayed(Duration::from_millis(5)),
        );
        let browser = Arc::new(StaticBrowser::new(
            Arc::new(source),
            Duration::from_millis(10),
        ));
        (SessionPool::new(browser.clone(), limit), browser)
    }

    #[tokio::test]
    async fn slots_are_returned() {
        let (pool, browser) = pool(2);
        let a = pool.acquire("mem://p").await.expect("a");
        let b = pool.acquire("mem://p").await.expect("b");
        assert_eq!(pool.available(), 0);
        assert_eq!(browser.open_pages(), 2);

        a.close().await.expect("close");
        assert_eq!(pool.available(), 1);
        drop(b);
        assert_eq!(pool.available(), 2);
        assert_eq!(browser.open_pages(), 0);
    }

    #[tokio::test]
    async fn failed_open_releases_slot() {
        let (pool, _) = pool(1);
        assert!(pool.acquire("mem://missing").await.is_err());
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn never_exceeds_limit() {
        let (pool, browser) = pool(3);
        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..12 {
            let pool = pool.clone();
            tasks.spawn(async move {
                let session = pool.acquire("mem://p").await.expect("acquire");
                tokio::time::sleep(Duration::from_millis(5)).await;
                session.close().await.expect("close");
            });
        }
        while let Some(res) = tasks.join_next().await {
            res.expect("task");
        }
        assert!(browser.peak_open_pages() <= 3);
        assert_eq!(pool.available(), 3);
    }

    #[test]
    fn zero_limit_is_clamped() {
        let (pool, _) = pool(0);
        assert_eq!(pool.limit(), 1);
    }
}
