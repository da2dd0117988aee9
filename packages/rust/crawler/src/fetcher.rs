//! Chapter text extraction.

use std::time::Duration;

use regex::Regex;
use tracing::{debug, instrument};

use novelpack_browser::{Page, RenderedStyle, WaitCondition};
use novelpack_shared::{Chapter, Line, Result};

// ---------------------------------------------------------------------------
// Hidden-text rule
// ---------------------------------------------------------------------------

/// Computed-style signature of anti-scraping trap paragraphs.
///
/// A paragraph is hidden when every signal matches, or when its box has no
/// width or no height.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HiddenTextRule {
    pub height: String,
    pub overflow: String,
    pub position: String,
    pub opacity: String,
    pub text_indent: String,
    pub bottom: String,
}

impl Default for HiddenTextRule {
    fn default() -> Self {
        Self {
            height: "0.1px".into(),
            overflow: "hidden".into(),
            position: "fixed".into(),
            opacity: "0".into(),
            text_indent: "-99999px".into(),
            bottom: "-999px".into(),
        }
    }
}

impl HiddenTextRule {
    pub fn is_hidden(&self, style: &RenderedStyle) -> bool {
        let trap = style.height == self.height
            && style.overflow == self.overflow
            && style.position == self.position
            && style.opacity == self.opacity
            && style.text_indent == self.text_indent
            && style.bottom == self.bottom;
        trap || style.offset_width == 0.0 || style.offset_height == 0.0
    }
}

// ---------------------------------------------------------------------------
// ChapterFetcher
// ---------------------------------------------------------------------------

/// Turns a chapter page into ordered [`Line`]s.
#[derive(Debug, Clone)]
pub struct ChapterFetcher {
    content_selector: String,
    rule: HiddenTextRule,
    ignored: Vec<Regex>,
    wait: Duration,
}

impl ChapterFetcher {
    pub fn new(content_selector: impl Into<String>, rule: HiddenTextRule, wait: Duration) -> Self {
        Self {
            content_selector: content_selector.into(),
            rule,
            ignored: Vec::new(),
            wait,
        }
    }

    /// Drop lines matching any of these `*`-wildcard patterns (case-insensitive).
    pub fn with_ignored_lines(mut self, patterns: &[&str]) -> Self {
        self.ignored = patterns.iter().filter_map(|p| glob_to_regex(p)).collect();
        self
    }

    fn is_ignored(&self, text: &str) -> bool {
        self.ignored.iter().any(|re| re.is_match(text))
    }

    /// Navigate to the chapter, wait for its text, and collect visible paragraphs.
    ///
    /// Single attempt: any navigation or evaluation error is returned as-is.
    #[instrument(skip_all, fields(chapter_id = chapter.chapter_id))]
    pub async fn fetch(&self, page: &mut dyn Page, chapter: &Chapter) -> Result<Vec<Line>> {
        if page.url() != chapter.url {
            page.goto(&chapter.url).await?;
        }
        page.wait_for(
            &WaitCondition::NonEmptyText(self.content_selector.clone()),
            self.wait,
        )
        .await?;

        let paragraphs = page.query_all(&self.content_selector).await?;
        let mut lines = Vec::with_capacity(paragraphs.len());
        let mut hidden = 0usize;

        for paragraph in &paragraphs {
            let style = page.rendered_style(paragraph).await?;
            if self.rule.is_hidden(&style) {
                hidden += 1;
                continue;
            }
            let text = paragraph.text();
            if text.is_empty() || self.is_ignored(text) {
                continue;
            }
            lines.push(Line::classify(text));
        }

        debug!(
            paragraphs = paragraphs.len(),
            hidden,
            lines = lines.len(),
            "chapter extracted"
        );
        Ok(lines)
    }
}

/// Convert a `*`-wildcard pattern to an anchored, case-insensitive regex.
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let escaped = regex::escape(pattern).replace(r"\*", ".*");
    Regex::new(&format!("(?i)^{escaped}$")).ok()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use novelpack_browser::{Browser, MemoryDocument, MemorySource, StaticBrowser};
    use novelpack_shared::{LineKind, NovelPackError};

    use super::*;

    const TRAP_STYLE: &str = "height:0.1px;overflow:hidden;position:fixed;opacity:0;\
                              text-indent:-99999px;bottom:-999px";

    fn style(height: &str, width: f64, offset_height: f64) -> RenderedStyle {
        RenderedStyle {
            height: height.into(),
            offset_width: width,
            offset_height,
            ..RenderedStyle::default()
        }
    }

    #[test]
    fn hidden_rule_needs_every_signal() {
        let rule = HiddenTextRule::default();
        let trap = RenderedStyle {
            height: "0.1px".into(),
            overflow: "hidden".into(),
            position: "fixed".into(),
            opacity: "0".into(),
            text_indent: "-99999px".into(),
            bottom: "-999px".into(),
            offset_width: 600.0,
            offset_height: 24.0,
        };
        assert!(rule.is_hidden(&trap));

        let almost = RenderedStyle {
            opacity: "1".into(),
            ..trap.clone()
        };
        assert!(!rule.is_hidden(&almost));
    }

    #[test]
    fn hidden_rule_zero_box() {
        let rule = HiddenTextRule::default();
        assert!(rule.is_hidden(&style("auto", 0.0, 24.0)));
        assert!(rule.is_hidden(&style("auto", 600.0, 0.0)));
        assert!(!rule.is_hidden(&style("auto", 600.0, 24.0)));
    }

    #[test]
    fn glob_patterns() {
        let re = glob_to_regex("*read* only on*site.com").expect("regex");
        assert!(re.is_match("Please READ our novels only on the site.com"));
        assert!(!re.is_match("read elsewhere"));
    }

    async fn fetch_from(body: &str, fetcher: &ChapterFetcher) -> Result<Vec<Line>> {
        let source = MemorySource::new();
        source.insert("mem://chapter/1", body);
        let browser = StaticBrowser::new(Arc::new(source), Duration::from_millis(5));
        let mut page = browser.open_page("mem://chapter/1").await?;
        let chapter = Chapter::new(1, "One", "mem://chapter/1");
        fetcher.fetch(page.as_mut(), &chapter).await
    }

    fn fetcher() -> ChapterFetcher {
        ChapterFetcher::new(
            ".entry-content p",
            HiddenTextRule::default(),
            Duration::from_millis(50),
        )
    }

    #[tokio::test]
    async fn extracts_visible_lines_in_order() {
        let body = format!(
            r#"<html><body><div class="entry-content">
                <p>First line</p>
                <p style="{TRAP_STYLE}">trap text</p>
                <p>   </p>
                <p>https://cdn.example.com/img/1.jpg</p>
                <p style="display:none">also hidden</p>
                <p>Last &amp; final</p>
            </div><p>outside content</p></body></html>"#
        );
        let lines = fetch_from(&body, &fetcher()).await.expect("fetch");
        let contents: Vec<&str> = lines.iter().map(|l| l.content.as_str()).collect();
        assert_eq!(
            contents,
            vec!["First line", "https://cdn.example.com/img/1.jpg", "Last & final"]
        );
        assert_eq!(lines[1].kind, LineKind::ImageReference);
        assert_eq!(lines[2].kind, LineKind::Text);
    }

    #[tokio::test]
    async fn trap_class_from_stylesheet() {
        let body = format!(
            r#"<html><head><style>.x {{ {TRAP_STYLE} }}</style></head><body>
               <div class="entry-content"><p class="x">nope</p><p>yes</p></div>
               </body></html>"#
        );
        let lines = fetch_from(&body, &fetcher()).await.expect("fetch");
        assert_eq!(lines, vec![Line::text("yes")]);
    }

    #[tokio::test]
    async fn ignored_lines_are_dropped() {
        let body = r#"<div class="entry-content"><p>keep</p><p>Read at example dot com</p></div>"#;
        let fetcher = fetcher().with_ignored_lines(&["read at *"]);
        let lines = fetch_from(body, &fetcher).await.expect("fetch");
        assert_eq!(lines, vec![Line::text("keep")]);
    }

    #[tokio::test]
    async fn empty_content_times_out() {
        let body = r#"<div class="entry-content"><p> </p></div>"#;
        let err = fetch_from(body, &fetcher()).await.expect_err("timeout");
        assert!(matches!(err, NovelPackError::WaitTimeout { .. }));
    }

    #[tokio::test]
    async fn navigates_when_page_is_elsewhere() {
        let source = MemorySource::new();
        source.insert("mem://start", "<p>start</p>");
        source.insert_document(
            "mem://chapter/9",
            MemoryDocument::new(r#"<div class="entry-content"><p>nine</p></div>"#),
        );
        let browser = StaticBrowser::new(Arc::new(source), Duration::from_millis(5));
        let mut page = browser.open_page("mem://start").await.expect("open");
        let chapter = Chapter::new(9, "Nine", "mem://chapter/9");
        let lines = fetcher().fetch(page.as_mut(), &chapter).await.expect("fetch");
        assert_eq!(lines, vec![Line::text("nine")]);
        assert_eq!(page.url(), "mem://chapter/9");
    }
}
