//! Workflow orchestration for novelpack.
//!
//! This crate ties discovery, fetching, caching, and packaging into the
//! end-to-end workflows the CLI runs: [`download_novel`], [`build_from_cache`],
//! and the cover batch [`update_covers_for_novels`].

pub mod covers;
pub mod pipeline;

pub use covers::{find_novel_directories, update_covers_for_novel, update_covers_for_novels};
pub use pipeline::{
    BuildConfig, DownloadConfig, NovelResult, ProgressReporter, SilentProgress, build_from_cache,
    download_novel,
};
