//! Resumable per-chapter JSON cache.
//!
//! One file per chapter at `<volume cache dir>/<id> - <title>.json`.
//! Entries are immutable: [`ChapterCache::save`] never replaces an existing file.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use novelpack_shared::{Chapter, NovelPackError, Result, Volume};

use crate::layout::NovelLayout;
use crate::sanitize::sanitize_segment;

/// Longest chapter file stem.
const CHAPTER_STEM_MAX: usize = 120;

static VOLUME_DIR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+) - (.*)$").expect("valid regex"));

/// Result of [`ChapterCache::save`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// A new entry was written.
    Saved,
    /// An entry already existed and was left untouched.
    Skipped,
}

/// Chapter cache rooted at one novel's cache directory.
#[derive(Debug, Clone)]
pub struct ChapterCache {
    root: PathBuf,
}

impl ChapterCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn for_layout(layout: &NovelLayout) -> Self {
        Self::new(layout.cache_dir())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic cache file for `chapter` inside `volume`.
    pub fn chapter_path(&self, volume: &Volume, chapter: &Chapter) -> PathBuf {
        volume.cache_path.join(chapter_file_name(chapter))
    }

    pub async fn exists(&self, volume: &Volume, chapter: &Chapter) -> bool {
        let path = self.chapter_path(volume, chapter);
        tokio::fs::try_exists(&path).await.unwrap_or(false)
    }

    /// Load a cached chapter. `Ok(None)` when no entry exists.
    pub async fn load(&self, volume: &Volume, chapter: &Chapter) -> Result<Option<Chapter>> {
        let path = self.chapter_path(volume, chapter);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => parse_entry(&path, &content).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(NovelPackError::io(&path, e)),
        }
    }

    /// Persist a populated chapter. No-op if the entry already exists.
    pub async fn save(&self, volume: &Volume, chapter: &Chapter) -> Result<SaveOutcome> {
        let path = self.chapter_path(volume, chapter);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            debug!(chapter_id = chapter.chapter_id, ?path, "cache entry exists, skipping");
            return Ok(SaveOutcome::Skipped);
        }

        tokio::fs::create_dir_all(&volume.cache_path)
            .await
            .map_err(|e| NovelPackError::io(&volume.cache_path, e))?;

        let json = serde_json::to_string_pretty(chapter)
            .map_err(|e| NovelPackError::Cache(format!("serialize chapter: {e}")))?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| NovelPackError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| NovelPackError::io(&path, e))?;

        debug!(chapter_id = chapter.chapter_id, ?path, "cached chapter");
        Ok(SaveOutcome::Saved)
    }

    /// Rebuild every cached volume of the novel without touching the network.
    ///
    /// Volume directories are ordered by their numeric prefix, chapters by id.
    /// Unreadable entries are logged and skipped.
    pub async fn load_volumes(&self, layout: &NovelLayout) -> Result<Vec<Volume>> {
        let mut volumes = Vec::new();
        let mut dirs = match tokio::fs::read_dir(&self.root).await {
            Ok(dirs) => dirs,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(volumes),
            Err(e) => return Err(NovelPackError::io(&self.root, e)),
        };

        while let Some(entry) = dirs
            .next_entry()
            .await
            .map_err(|e| NovelPackError::io(&self.root, e))?
        {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(caps) = VOLUME_DIR_RE.captures(&name) else {
                debug!(dir = %name, "not a volume cache directory");
                continue;
            };
            let Ok(id) = caps[1].parse::<u32>() else {
                continue;
            };
            let title = caps[2].to_string();

            let chapters = load_chapters(&path).await?;
            volumes.push(Volume {
                id,
                path: layout.volume_dir(id, &title),
                title,
                cache_path: path,
                chapters,
            });
        }

        volumes.sort_by_key(|v| v.id);
        Ok(volumes)
    }
}

/// `<id> - <title>` (sanitized) with a `.json` extension.
pub fn chapter_file_name(chapter: &Chapter) -> String {
    let stem = sanitize_segment(
        &format!("{} - {}", chapter.chapter_id, chapter.title),
        CHAPTER_STEM_MAX,
        &format!("Chapter {}", chapter.chapter_id),
    );
    format!("{stem}.json")
}

fn parse_entry(path: &Path, content: &str) -> Result<Chapter> {
    serde_json::from_str(content)
        .map_err(|e| NovelPackError::Cache(format!("{}: {e}", path.display())))
}

async fn load_chapters(dir: &Path) -> Result<Vec<Chapter>> {
    let mut chapters = Vec::new();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| NovelPackError::io(dir, e))?;

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| NovelPackError::io(dir, e))?
    {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) => {
                warn!(?path, error = %e, "unreadable cache entry");
                continue;
            }
        };
        match parse_entry(&path, &content) {
            Ok(chapter) => chapters.push(chapter),
            Err(e) => warn!(error = %e, "corrupt cache entry"),
        }
    }

    chapters.sort_by_key(|c| c.chapter_id);
    Ok(chapters)
}
