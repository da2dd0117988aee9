//! Site adapter trait and built-in adapters.
//!
//! An adapter knows where a site keeps its volume listing and chapter text.
//! Everything else (ordering, ids, caching, concurrency) is site-independent.

mod kolnovel;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use novelpack_browser::Page;
use novelpack_shared::{Chapter, Line, NovelPackError, Result};

use crate::fetcher::ChapterFetcher;

pub use kolnovel::KolNovelAdapter;

// ---------------------------------------------------------------------------
// Raw listing
// ---------------------------------------------------------------------------

/// A chapter link as it appears on the listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingChapter {
    /// Trimmed title; empty when the site shows none.
    pub title: String,
    /// Absolute chapter URL.
    pub url: String,
}

/// A volume block as it appears on the listing page, in presentation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingVolume {
    pub title: String,
    pub chapters: Vec<ListingChapter>,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Site-specific knowledge for one source.
#[async_trait]
pub trait SiteAdapter: Send + Sync {
    /// Human-readable adapter name for tracing.
    fn name(&self) -> &str;

    /// URL prefix this adapter serves.
    fn base_url(&self) -> &str;

    /// Whether `url` belongs to this site (case-insensitive prefix match).
    fn matches(&self, url: &str) -> bool {
        let base = self.base_url().to_ascii_lowercase();
        url.to_ascii_lowercase().starts_with(&base)
    }

    /// Wait for the listing on `page` and read it in presentation order.
    ///
    /// Fails with [`NovelPackError::DiscoveryTimeout`] if the listing never shows up.
    async fn discover_listing(
        &self,
        page: &mut dyn Page,
        wait: Duration,
    ) -> Result<Vec<ListingVolume>>;

    /// Extractor for this site's chapter pages.
    fn chapter_fetcher(&self, wait: Duration) -> ChapterFetcher;

    /// Extract the lines of `chapter` using `page`.
    async fn fetch_chapter(
        &self,
        page: &mut dyn Page,
        chapter: &Chapter,
        wait: Duration,
    ) -> Result<Vec<Line>> {
        self.chapter_fetcher(wait).fetch(page, chapter).await
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Holds registered adapters in priority order.
pub struct AdapterRegistry {
    adapters: Vec<Arc<dyn SiteAdapter>>,
}

impl AdapterRegistry {
    /// Create a registry with all built-in adapters.
    pub fn new() -> Self {
        Self {
            adapters: vec![Arc::new(KolNovelAdapter::new())],
        }
    }

    /// Registry holding exactly `adapters`.
    pub fn with_adapters(adapters: Vec<Arc<dyn SiteAdapter>>) -> Self {
        Self { adapters }
    }

    /// The first adapter accepting `url`.
    pub fn for_url(&self, url: &str) -> Result<Arc<dyn SiteAdapter>> {
        self.adapters
            .iter()
            .find(|a| a.matches(url))
            .cloned()
            .ok_or_else(|| NovelPackError::UnsupportedSource(url.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.adapters.iter().map(|a| a.name()).collect()
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_selects_by_prefix() {
        let registry = AdapterRegistry::new();
        let adapter = registry
            .for_url("https://free.kolnovel.com/series/shadow-slave/")
            .expect("kolnovel");
        assert_eq!(adapter.name(), "kolnovel");

        let upper = registry.for_url("HTTPS://FREE.KOLNOVEL.COM/series/x");
        assert!(upper.is_ok());
    }

    #[test]
    fn registry_rejects_unknown_sites() {
        let registry = AdapterRegistry::new();
        let err = registry
            .for_url("https://example.com/series/x")
            .err()
            .expect("unsupported");
        assert!(matches!(err, NovelPackError::UnsupportedSource(_)));
        assert_eq!(registry.names(), vec!["kolnovel"]);
    }
}
