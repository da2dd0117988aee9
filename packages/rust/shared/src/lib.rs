//! Shared types, error model, and configuration for novelpack.
//!
//! This crate is the foundation depended on by all other novelpack crates.
//! It provides:
//! - [`NovelPackError`]: the unified error type
//! - Domain types ([`Volume`], [`Chapter`], [`Line`], [`CoverUpdateReport`])
//! - Configuration ([`AppConfig`], [`FetchConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BrowserConfig, ConcurrencyConfig, DefaultsConfig, FetchConfig, config_dir,
    config_file_path, expand_home, init_config, init_config_in, load_config, load_config_from,
};
pub use error::{NovelPackError, Result};
pub use types::{
    Chapter, Configuration, CoverUpdateReport, Line, LineKind, Novel, Volume, VolumeRange,
};
