//! KolNovel adapter.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};
use url::Url;

use novelpack_browser::{Page, WaitCondition};
use novelpack_shared::{NovelPackError, Result};

use super::{ListingChapter, ListingVolume, SiteAdapter};
use crate::fetcher::{ChapterFetcher, HiddenTextRule};

const BASE_URL: &str = "https://free.kolnovel.com";

const VOLUME_SELECTOR: &str = ".ts-chl-collapsible";
const VOLUME_CONTENT_CLASS: &str = "ts-chl-collapsible-content";
const CHAPTER_LINK_SELECTOR: &str = "ul li a";
const CHAPTER_TITLE_SELECTOR: &str = ".epl-title";
const CONTENT_SELECTOR: &str = ".entry-content p";

/// Watermarks the site injects into chapter text.
const IGNORED_LINES: &[&str] =
    &["*إقرأ* رواياتنا* فقط* على* مو*قع م*لوك الرو*ايات ko*lno*vel ko*lno*vel. com"];

/// Reads collapsible volume blocks and `.entry-content` chapter pages.
#[derive(Debug, Clone)]
pub struct KolNovelAdapter {
    base_url: String,
}

impl KolNovelAdapter {
    pub fn new() -> Self {
        Self::with_base_url(BASE_URL)
    }

    /// Same site layout served from another origin (mirrors, tests).
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

impl Default for KolNovelAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SiteAdapter for KolNovelAdapter {
    fn name(&self) -> &str {
        "kolnovel"
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn discover_listing(
        &self,
        page: &mut dyn Page,
        wait: Duration,
    ) -> Result<Vec<ListingVolume>> {
        let condition = WaitCondition::SelectorPresent(VOLUME_SELECTOR.into());
        page.wait_for(&condition, wait).await.map_err(|e| match e {
            NovelPackError::WaitTimeout { waited, .. } => NovelPackError::DiscoveryTimeout {
                url: page.url().to_string(),
                waited,
            },
            other => other,
        })?;

        let page_url = Url::parse(page.url()).ok();
        let mut volumes = Vec::new();

        for block in page.query_all(VOLUME_SELECTOR).await? {
            let title = block.text().to_string();
            let mut chapters = Vec::new();

            match page.next_sibling(&block).await? {
                Some(content) if content.has_class(VOLUME_CONTENT_CLASS) => {
                    for link in page.query_within(&content, CHAPTER_LINK_SELECTOR).await? {
                        let Some(href) = link.attr("href") else {
                            continue;
                        };
                        let url = resolve(page_url.as_ref(), href);
                        let title = page
                            .query_within(&link, CHAPTER_TITLE_SELECTOR)
                            .await?
                            .first()
                            .map(|t| t.text().to_string())
                            .unwrap_or_default();
                        chapters.push(ListingChapter { title, url });
                    }
                }
                _ => warn!(volume = %title, "volume block without chapter list"),
            }

            debug!(volume = %title, chapters = chapters.len(), "listing volume");
            volumes.push(ListingVolume { title, chapters });
        }

        Ok(volumes)
    }

    fn chapter_fetcher(&self, wait: Duration) -> ChapterFetcher {
        ChapterFetcher::new(CONTENT_SELECTOR, HiddenTextRule::default(), wait)
            .with_ignored_lines(IGNORED_LINES)
    }
}

/// Resolve a possibly relative link against the listing page.
fn resolve(base: Option<&Url>, href: &str) -> String {
    base.and_then(|b| b.join(href).ok())
        .map(|u| u.to_string())
        .unwrap_or_else(|| href.to_string())
}
