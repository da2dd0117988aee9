//! Local persistence for novelpack.
//!
//! - [`NovelLayout`] maps a novel to its output and cache directories.
//! - [`ChapterCache`] stores one immutable JSON document per fetched chapter,
//!   so interrupted runs resume by fetching only what is missing.
//! - [`sanitize_segment`] turns titles into safe path segments.

mod cache;
mod layout;
mod sanitize;

pub use cache::{ChapterCache, SaveOutcome, chapter_file_name};
pub use layout::NovelLayout;
pub use sanitize::sanitize_segment;
