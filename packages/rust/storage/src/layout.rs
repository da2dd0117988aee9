//! On-disk layout of a novel: output directories and cache directories.

use std::path::{Path, PathBuf};

use novelpack_shared::{NovelPackError, Result};

use crate::sanitize::sanitize_segment;

/// Longest novel or volume segment under the saving root.
const OUTPUT_SEGMENT_MAX: usize = 80;
/// Longest novel or volume segment under the cache root.
const CACHE_SEGMENT_MAX: usize = 60;

/// Where one novel's artifacts and cached chapters live.
#[derive(Debug, Clone)]
pub struct NovelLayout {
    title: String,
    novel_dir: PathBuf,
    cache_dir: PathBuf,
}

impl NovelLayout {
    /// `<saving_root>/<title>` for artifacts, `<cache_root>/<title>` for the cache.
    pub fn new(title: &str, saving_root: &Path, cache_root: &Path) -> Self {
        Self {
            title: title.to_string(),
            novel_dir: saving_root.join(sanitize_segment(title, OUTPUT_SEGMENT_MAX, "Novel")),
            cache_dir: cache_root.join(sanitize_segment(title, CACHE_SEGMENT_MAX, "Novel")),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Directory receiving generated packages (and the `covers/` folder).
    pub fn novel_dir(&self) -> &Path {
        &self.novel_dir
    }

    /// Root of this novel's chapter cache.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// `<novel_dir>/<id> - <title>`.
    pub fn volume_dir(&self, id: u32, title: &str) -> PathBuf {
        self.novel_dir
            .join(sanitize_segment(&format!("{id} - {title}"), OUTPUT_SEGMENT_MAX, "Volume"))
    }

    /// `<cache_dir>/<id> - <title>`.
    pub fn volume_cache_dir(&self, id: u32, title: &str) -> PathBuf {
        self.cache_dir
            .join(sanitize_segment(&format!("{id} - {title}"), CACHE_SEGMENT_MAX, "Volume"))
    }

    /// Create the novel output directory if absent.
    pub async fn ensure_novel_dir(&self) -> Result<&Path> {
        tokio::fs::create_dir_all(&self.novel_dir)
            .await
            .map_err(|e| NovelPackError::io(&self.novel_dir, e))?;
        Ok(&self.novel_dir)
    }
}
