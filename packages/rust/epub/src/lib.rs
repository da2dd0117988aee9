//! EPUB packaging for novelpack.
//!
//! - [`EpubAssembler`] writes combined or per-volume packages with an
//!   embedded font from the [`FontCatalog`].
//! - [`inject_cover`] patches an existing package to carry a cover, with
//!   backup and rollback.

pub mod assembler;
pub mod cover;
pub mod font;
pub mod package;
pub mod xml;

pub use assembler::{EpubAssembler, PackagingMode, artifact_name, render_chapter, render_volume};
pub use cover::{COVER_IMAGE_ID, COVER_PAGE_ID, image_media_type, inject_cover, is_cover_image};
pub use font::{Font, FontCatalog, FontEntry};
pub use package::{ManifestItem, PackageDocument};
