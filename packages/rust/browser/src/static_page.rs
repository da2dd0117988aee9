//! [`Browser`] implementation over static documents.
//!
//! Each navigation loads and parses the document once, snapshotting every
//! element with its estimated style and its position in the tree. Selector
//! matches are computed on first use and kept with the snapshot, so repeated
//! and nested queries never re-parse the body. No parsed tree is held across
//! an await point.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, trace};

use novelpack_shared::{FetchConfig, NovelPackError, Result};

use crate::source::{DocumentSource, HttpSource};
use crate::style::{self, RenderedStyle};
use crate::{Browser, ElementHandle, Page, WaitCondition};

// ---------------------------------------------------------------------------
// Browser
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct PageCounter {
    open: AtomicUsize,
    peak: AtomicUsize,
}

impl PageCounter {
    fn opened(&self) {
        let now = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn closed(&self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Opens [`StaticPage`]s backed by a shared [`DocumentSource`].
pub struct StaticBrowser {
    source: Arc<dyn DocumentSource>,
    poll_interval: Duration,
    pages: Arc<PageCounter>,
}

impl StaticBrowser {
    pub fn new(source: Arc<dyn DocumentSource>, poll_interval: Duration) -> Self {
        Self {
            source,
            poll_interval,
            pages: Arc::new(PageCounter::default()),
        }
    }

    /// Browser loading pages over HTTP with the configured client settings.
    pub fn launch(config: &FetchConfig) -> Result<Self> {
        let source = HttpSource::new(config)?;
        debug!(user_agent = %config.user_agent, "static browser ready");
        Ok(Self::new(Arc::new(source), config.poll_interval))
    }

    /// Most pages that were ever open at the same time, counting pages
    /// whose first load was still in flight.
    pub fn peak_open_pages(&self) -> usize {
        self.pages.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Browser for StaticBrowser {
    async fn open_page(&self, url: &str) -> Result<Box<dyn Page>> {
        // A page is open from the moment its first load starts.
        self.pages.opened();
        let document = match Document::load(self.source.as_ref(), url).await {
            Ok(document) => document,
            Err(e) => {
                self.pages.closed();
                return Err(e);
            }
        };
        Ok(Box::new(StaticPage {
            source: Arc::clone(&self.source),
            poll_interval: self.poll_interval,
            document,
            counter: Arc::clone(&self.pages),
            closed: false,
        }))
    }

    fn open_pages(&self) -> usize {
        self.pages.open.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Document snapshot
// ---------------------------------------------------------------------------

/// One parsed navigation. Element indices follow document order, so the
/// descendants of element `i` are exactly `i + 1..subtree_end[i]`.
struct Document {
    url: String,
    body: String,
    elements: Vec<ElementHandle>,
    subtree_end: Vec<usize>,
    next_sibling: Vec<Option<usize>>,
    styles: Vec<RenderedStyle>,
    /// Matching element indices per selector, ascending.
    matches: Mutex<HashMap<String, Arc<[usize]>>>,
}

impl Document {
    async fn load(source: &dyn DocumentSource, url: &str) -> Result<Self> {
        let body = source.load(url).await?;
        Ok(Self::index(url, body))
    }

    fn index(url: &str, body: String) -> Self {
        let (elements, subtree_end, next_sibling, styles) = parse(&body, |doc, all| {
            let positions: HashMap<_, _> =
                all.iter().enumerate().map(|(i, el)| (el.id(), i)).collect();
            let elements = all.iter().enumerate().map(|(i, el)| snapshot(i, el)).collect();
            let subtree_end = all
                .iter()
                .enumerate()
                .map(|(i, el)| {
                    i + el
                        .descendants()
                        .filter(|node| node.value().is_element())
                        .count()
                })
                .collect();
            let next_sibling = all
                .iter()
                .map(|el| {
                    el.next_siblings()
                        .find_map(ElementRef::wrap)
                        .and_then(|sibling| positions.get(&sibling.id()).copied())
                })
                .collect();
            (elements, subtree_end, next_sibling, style::compute_all(doc, all))
        });
        trace!(%url, elements = styles.len(), "document loaded");
        Self {
            url: url.to_string(),
            body,
            elements,
            subtree_end,
            next_sibling,
            styles,
            matches: Mutex::new(HashMap::new()),
        }
    }

    /// Indices of every element matching `selector`, parsed once per snapshot.
    fn matching(&self, selector: &str) -> Result<Arc<[usize]>> {
        let mut cache = self.matches.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(hits) = cache.get(selector) {
            return Ok(Arc::clone(hits));
        }
        let compiled = compile(selector)?;
        let hits: Arc<[usize]> = parse(&self.body, |_, all| {
            all.iter()
                .enumerate()
                .filter(|(_, el)| compiled.matches(el))
                .map(|(i, _)| i)
                .collect()
        });
        trace!(url = %self.url, selector, hits = hits.len(), "selector matched");
        cache.insert(selector.to_string(), Arc::clone(&hits));
        Ok(hits)
    }

    /// Index range of the strict descendants of element `index`.
    fn descendants(&self, index: usize) -> Option<Range<usize>> {
        self.subtree_end.get(index).map(|&end| index + 1..end)
    }

    fn handles(&self, indices: &[usize]) -> Vec<ElementHandle> {
        indices.iter().map(|&i| self.elements[i].clone()).collect()
    }
}

fn all_elements() -> Selector {
    Selector::parse("*").unwrap_or_else(|_| unreachable!("universal selector parses"))
}

/// Parse `body` and hand its elements (document order) to `f`.
fn parse<T>(body: &str, f: impl FnOnce(&Html, &[ElementRef<'_>]) -> T) -> T {
    let doc = Html::parse_document(body);
    let all = all_elements();
    let elements: Vec<ElementRef<'_>> = doc.select(&all).collect();
    f(&doc, &elements)
}

fn compile(selector: &str) -> Result<Selector> {
    Selector::parse(selector)
        .map_err(|e| NovelPackError::browser(format!("invalid selector `{selector}`: {e}")))
}

fn snapshot(index: usize, el: &ElementRef<'_>) -> ElementHandle {
    ElementHandle {
        index,
        tag: el.value().name().to_string(),
        text: el.text().collect(),
        attributes: el
            .value()
            .attrs()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}

// ---------------------------------------------------------------------------
// Page
// ---------------------------------------------------------------------------

/// One open page over a static document.
pub struct StaticPage {
    source: Arc<dyn DocumentSource>,
    poll_interval: Duration,
    document: Document,
    counter: Arc<PageCounter>,
    closed: bool,
}

impl StaticPage {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(NovelPackError::browser(format!(
                "page for {} is closed",
                self.document.url
            )));
        }
        Ok(())
    }

    fn element_out_of_range(&self, element: &ElementHandle) -> NovelPackError {
        NovelPackError::browser(format!(
            "element #{} does not belong to {}",
            element.index, self.document.url
        ))
    }

    fn holds(&self, condition: &WaitCondition) -> Result<bool> {
        let (selector, need_text) = match condition {
            WaitCondition::SelectorPresent(s) => (s, false),
            WaitCondition::NonEmptyText(s) => (s, true),
        };
        let hits = self.document.matching(selector)?;
        Ok(hits
            .iter()
            .any(|&i| !need_text || !self.document.elements[i].text.trim().is_empty()))
    }
}

impl Drop for StaticPage {
    fn drop(&mut self) {
        self.counter.closed();
    }
}

#[async_trait]
impl Page for StaticPage {
    fn url(&self) -> &str {
        &self.document.url
    }

    async fn goto(&mut self, url: &str) -> Result<()> {
        self.ensure_open()?;
        self.document = Document::load(self.source.as_ref(), url).await?;
        Ok(())
    }

    async fn query_all(&self, selector: &str) -> Result<Vec<ElementHandle>> {
        self.ensure_open()?;
        let hits = self.document.matching(selector)?;
        Ok(self.document.handles(&hits))
    }

    async fn query_within(
        &self,
        parent: &ElementHandle,
        selector: &str,
    ) -> Result<Vec<ElementHandle>> {
        self.ensure_open()?;
        let scope = self
            .document
            .descendants(parent.index)
            .ok_or_else(|| self.element_out_of_range(parent))?;
        let hits = self.document.matching(selector)?;
        let start = hits.partition_point(|&i| i < scope.start);
        let end = hits.partition_point(|&i| i < scope.end);
        Ok(self.document.handles(&hits[start..end]))
    }

    async fn next_sibling(&self, element: &ElementHandle) -> Result<Option<ElementHandle>> {
        self.ensure_open()?;
        let sibling = self
            .document
            .next_sibling
            .get(element.index)
            .ok_or_else(|| self.element_out_of_range(element))?;
        Ok(sibling.map(|i| self.document.elements[i].clone()))
    }

    async fn rendered_style(&self, element: &ElementHandle) -> Result<RenderedStyle> {
        self.ensure_open()?;
        self.document
            .styles
            .get(element.index)
            .cloned()
            .ok_or_else(|| self.element_out_of_range(element))
    }

    async fn wait_for(&mut self, condition: &WaitCondition, timeout: Duration) -> Result<()> {
        self.ensure_open()?;
        let started = tokio::time::Instant::now();
        loop {
            if self.holds(condition)? {
                return Ok(());
            }
            let waited = started.elapsed();
            if waited >= timeout {
                return Err(NovelPackError::WaitTimeout {
                    condition: condition.to_string(),
                    waited,
                });
            }
            tokio::time::sleep(self.poll_interval.min(timeout - waited)).await;
            trace!(url = %self.document.url, %condition, "re-checking");
            let url = self.document.url.clone();
            self.document = Document::load(self.source.as_ref(), &url).await?;
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MemoryDocument, MemorySource};

    const LISTING: &str = r#"
        <html><body>
          <div class="ts-chl-collapsible">Volume 2</div>
          <div class="ts-chl-collapsible-content">
            <ul><li><a href="/c3">3</a></li><li><a href="/c2">2</a></li></ul>
          </div>
          <div class="ts-chl-collapsible">Volume 1</div>
          <div class="ts-chl-collapsible-content">
            <ul><li><a href="/c1">1</a></li></ul>
          </div>
        </body></html>
    "#;

    fn browser_with(source: MemorySource) -> (StaticBrowser, Arc<MemorySource>) {
        let source = Arc::new(source);
        let browser = StaticBrowser::new(source.clone(), Duration::from_millis(10));
        (browser, source)
    }

    #[tokio::test]
    async fn query_navigation_helpers() {
        let source = MemorySource::new();
        source.insert("mem://series", LISTING);
        let (browser, _) = browser_with(source);

        let page = browser.open_page("mem://series").await.expect("open");
        let volumes = page.query_all(".ts-chl-collapsible").await.expect("query");
        assert_eq!(volumes.len(), 2);
        assert_eq!(volumes[0].text(), "Volume 2");

        let content = page
            .next_sibling(&volumes[1])
            .await
            .expect("sibling")
            .expect("present");
        assert!(content.has_class("ts-chl-collapsible-content"));

        let links = page.query_within(&content, "ul li a").await.expect("links");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].attr("href"), Some("/c1"));

        let first_links = page
            .query_within(
                &page.next_sibling(&volumes[0]).await.expect("s").expect("p"),
                "a",
            )
            .await
            .expect("links");
        let hrefs: Vec<_> = first_links.iter().filter_map(|l| l.attr("href")).collect();
        assert_eq!(hrefs, vec!["/c3", "/c2"]);
    }

    #[tokio::test]
    async fn rendered_style_lookup() {
        let source = MemorySource::new();
        source.insert(
            "mem://c",
            r#"<div class="entry-content"><p style="display:none">x</p><p>y</p></div>"#,
        );
        let (browser, _) = browser_with(source);
        let page = browser.open_page("mem://c").await.expect("open");
        let paragraphs = page.query_all(".entry-content p").await.expect("query");
        let hidden = page.rendered_style(&paragraphs[0]).await.expect("style");
        let shown = page.rendered_style(&paragraphs[1]).await.expect("style");
        assert_eq!(hidden.offset_height, 0.0);
        assert!(shown.offset_height > 0.0);
    }

    #[tokio::test]
    async fn wait_for_polls_until_ready() {
        let source = MemorySource::new();
        source.insert_document(
            "mem://slow",
            MemoryDocument::new("<div class='entry-content'><p>ready</p></div>").ready_after(2),
        );
        let (browser, source) = browser_with(source);
        let mut page = browser.open_page("mem://slow").await.expect("open");
        page.wait_for(
            &WaitCondition::NonEmptyText(".entry-content p".into()),
            Duration::from_secs(5),
        )
        .await
        .expect("eventually ready");
        assert_eq!(source.loads("mem://slow"), 3);
    }

    #[tokio::test]
    async fn wait_for_times_out() {
        let source = MemorySource::new();
        source.insert("mem://never", "<div class='entry-content'><p>  </p></div>");
        let (browser, _) = browser_with(source);
        let mut page = browser.open_page("mem://never").await.expect("open");
        let err = page
            .wait_for(
                &WaitCondition::NonEmptyText(".entry-content p".into()),
                Duration::from_millis(50),
            )
            .await
            .expect_err("times out");
        assert!(matches!(err, NovelPackError::WaitTimeout { .. }));
    }

    #[tokio::test]
    async fn closed_pages_fail_and_counts_drop() {
        let source = MemorySource::new();
        source.insert("mem://a", "<p>a</p>");
        let (browser, _) = browser_with(source);

        let mut a = browser.open_page("mem://a").await.expect("open");
        let b = browser.open_page("mem://a").await.expect("open");
        assert_eq!(browser.open_pages(), 2);

        a.close().await.expect("close");
        assert!(a.query_all("p").await.is_err());
        drop(a);
        drop(b);
        assert_eq!(browser.open_pages(), 0);
        assert_eq!(browser.peak_open_pages(), 2);
    }

    #[tokio::test]
    async fn pages_count_as_open_while_loading() {
        let source = MemorySource::new();
        source.insert_document(
            "mem://slow",
            MemoryDocument::new("<p>a</p>").delayed(Duration::from_millis(40)),
        );
        let (browser, _) = browser_with(source);

        let (page, seen) = tokio::join!(browser.open_page("mem://slow"), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            browser.open_pages()
        });
        assert_eq!(seen, 1, "counted before the load finished");
        drop(page.expect("open"));

        assert!(browser.open_page("mem://missing").await.is_err());
        assert_eq!(browser.open_pages(), 0);
        assert_eq!(browser.peak_open_pages(), 1);
    }

    #[tokio::test]
    async fn nested_queries_are_scoped_to_descendants() {
        let source = MemorySource::new();
        source.insert(
            "mem://nested",
            r#"<div id="outer"><div id="inner"><a href="/x">x</a></div></div><a href="/y">y</a>"#,
        );
        let (browser, _) = browser_with(source);
        let page = browser.open_page("mem://nested").await.expect("open");

        let divs = page.query_all("div").await.expect("divs");
        assert_eq!(divs.len(), 2);
        let inner = page.query_within(&divs[0], "div").await.expect("within");
        assert_eq!(inner.len(), 1);
        assert_eq!(inner[0].attr("id"), Some("inner"));
        assert!(page.query_within(&divs[1], "div").await.expect("within").is_empty());

        let links = page.query_within(&divs[0], "a").await.expect("links");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].attr("href"), Some("/x"));
        assert_eq!(page.query_all("a").await.expect("all").len(), 2);

        let after = page.next_sibling(&divs[0]).await.expect("sibling").expect("present");
        assert_eq!(after.attr("href"), Some("/y"));
        assert!(page.next_sibling(&after).await.expect("sibling").is_none());
    }

    #[tokio::test]
    async fn repeated_selectors_reuse_one_match() {
        let mut listing = String::from("<ul>");
        for i in 0..500 {
            listing.push_str(&format!(r#"<li><a href="/c{i}"><span class="t">{i}</span></a></li>"#));
        }
        listing.push_str("</ul>");
        let document = Document::index("mem://big", listing);

        let links = document.matching("li a").expect("links");
        assert_eq!(links.len(), 500);
        for &link in links.iter() {
            let scope = document.descendants(link).expect("scope");
            let titles = document.matching(".t").expect("titles");
            let inside: Vec<_> = titles.iter().filter(|&&i| scope.contains(&i)).collect();
            assert_eq!(inside.len(), 1);
        }
        let cached = document.matches.lock().expect("lock");
        assert_eq!(cached.len(), 2);
        assert!(Arc::ptr_eq(&cached["li a"], &links));
    }

    #[tokio::test]
    async fn invalid_selector_is_a_browser_error() {
        let source = MemorySource::new();
        source.insert("mem://a", "<p>a</p>");
        let (browser, _) = browser_with(source);
        let page = browser.open_page("mem://a").await.expect("open");
        let err = page.query_all("p[").await.expect_err("invalid");
        assert!(matches!(err, NovelPackError::Browser(_)));
    }
}
