//! Remote-automation contract and its static-DOM implementation.
//!
//! The fetch pipeline only talks to [`Browser`] and [`Page`]. Element handles
//! are plain snapshots so they can cross await points and task boundaries.
//! [`StaticBrowser`] fulfils the contract by loading documents through a
//! [`DocumentSource`] and estimating rendered styles from the document's own
//! stylesheets. [`SessionPool`] bounds how many pages are open at once.

mod pool;
mod source;
mod static_page;
mod style;

use std::time::Duration;

use async_trait::async_trait;

use novelpack_shared::Result;

pub use pool::{Session, SessionPool};
pub use source::{DocumentSource, HttpSource};
#[cfg(any(test, feature = "test-support"))]
pub use source::{MemoryDocument, MemorySource};
pub use static_page::{StaticBrowser, StaticPage};
pub use style::RenderedStyle;

// ---------------------------------------------------------------------------
// Element handles
// ---------------------------------------------------------------------------

/// Snapshot of one element on a page.
///
/// `index` identifies the element within its page (document order) and is only
/// meaningful for the page that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementHandle {
    pub index: usize,
    pub tag: String,
    pub text: String,
    pub attributes: Vec<(String, String)>,
}

impl ElementHandle {
    /// Text content with surrounding whitespace removed.
    pub fn text(&self) -> &str {
        self.text.trim()
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attr("class")
            .is_some_and(|c| c.split_ascii_whitespace().any(|c| c == class))
    }
}

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

/// Something a page can be polled for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitCondition {
    /// At least one element matches the selector.
    SelectorPresent(String),
    /// At least one element matching the selector has non-blank text.
    NonEmptyText(String),
}

impl std::fmt::Display for WaitCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SelectorPresent(s) => write!(f, "`{s}` to appear"),
            Self::NonEmptyText(s) => write!(f, "non-empty `{s}`"),
        }
    }
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// A page bound to one URL.
#[async_trait]
pub trait Page: Send + Sync {
    /// URL the page is currently showing.
    fn url(&self) -> &str;

    /// Navigate to another URL, replacing the current document.
    async fn goto(&mut self, url: &str) -> Result<()>;

    /// All elements matching `selector`, in document order.
    async fn query_all(&self, selector: &str) -> Result<Vec<ElementHandle>>;

    /// Descendants of `parent` matching `selector`, in document order.
    async fn query_within(
        &self,
        parent: &ElementHandle,
        selector: &str,
    ) -> Result<Vec<ElementHandle>>;

    /// The next element sibling of `element`, if any.
    async fn next_sibling(&self, element: &ElementHandle) -> Result<Option<ElementHandle>>;

    /// Computed style and box size of `element`.
    async fn rendered_style(&self, element: &ElementHandle) -> Result<RenderedStyle>;

    /// Poll until `condition` holds or `timeout` elapses.
    async fn wait_for(&mut self, condition: &WaitCondition, timeout: Duration) -> Result<()>;

    /// Release the page. Further calls fail.
    async fn close(&mut self) -> Result<()>;
}

/// Opens pages.
#[async_trait]
pub trait Browser: Send + Sync {
    /// Acquire a page and navigate it to `url`.
    async fn open_page(&self, url: &str) -> Result<Box<dyn Page>>;

    /// Pages currently open.
    fn open_pages(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_accessors() {
        let handle = ElementHandle {
            index: 4,
            tag: "a".into(),
            text: "  Chapter 1 \n".into(),
            attributes: vec![
                ("HREF".into(), "https://example.com/1".into()),
                ("class".into(), "epl-title  big".into()),
            ],
        };
        assert_eq!(handle.text(), "Chapter 1");
        assert_eq!(handle.attr("href"), Some("https://example.com/1"));
        assert!(handle.has_class("epl-title"));
        assert!(!handle.has_class("epl"));
    }

    #[test]
    fn condition_display() {
        let c = WaitCondition::NonEmptyText(".entry-content p".into());
        assert_eq!(c.to_string(), "non-empty `.entry-content p`");
    }
}
