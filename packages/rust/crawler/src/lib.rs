//! Listing discovery, chapter extraction, and the concurrent fetch engine.
//!
//! This crate provides:
//! - [`adapters`]: site-specific listing and chapter readers
//! - [`AdapterRegistry`]: picks the adapter serving a novel URL
//! - [`discovery`]: listing to ordered, numbered volume skeletons
//! - [`fetcher`]: visible chapter text extraction
//! - [`engine`]: bounded, cache-aware fetch of every chapter

pub mod adapters;
pub mod discovery;
pub mod engine;
pub mod fetcher;

pub use adapters::{AdapterRegistry, KolNovelAdapter, ListingChapter, ListingVolume, SiteAdapter};
pub use discovery::{VolumeDiscoverer, build_volumes};
pub use engine::{ChapterEvent, FetchEngine, FetchObserver, FetchOutcome, FetchReport};
pub use fetcher::{ChapterFetcher, HiddenTextRule};
