//! Core domain types: novels, volumes, chapters, lines, and reports.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use url::Url;

// ---------------------------------------------------------------------------
// Line
// ---------------------------------------------------------------------------

/// What a [`Line`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LineKind {
    /// A paragraph of prose.
    Text,
    /// A paragraph whose text is an image URL.
    #[serde(rename = "Image")]
    ImageReference,
}

/// One paragraph of chapter content, in source order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Line {
    #[serde(rename = "lineType", alias = "LineType")]
    pub kind: LineKind,
    #[serde(alias = "Content")]
    pub content: String,
}

impl Line {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: LineKind::Text,
            content: content.into(),
        }
    }

    pub fn image(content: impl Into<String>) -> Self {
        Self {
            kind: LineKind::ImageReference,
            content: content.into(),
        }
    }

    /// Classify paragraph text: an absolute http(s) URL is an image reference,
    /// anything else is prose.
    pub fn classify(text: &str) -> Self {
        let trimmed = text.trim();
        match Url::parse(trimmed) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Self::image(trimmed),
            _ => Self::text(trimmed),
        }
    }
}

// ---------------------------------------------------------------------------
// Chapter
// ---------------------------------------------------------------------------

/// A chapter: discovered as a skeleton, then populated exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    /// Global id, increasing in discovery order across all volumes.
    #[serde(alias = "ChapterId")]
    pub chapter_id: u32,
    #[serde(alias = "Title")]
    pub title: String,
    #[serde(alias = "Url")]
    pub url: String,
    #[serde(default, alias = "Lines")]
    pub lines: Vec<Line>,
}

impl Chapter {
    /// A chapter skeleton with no content yet.
    pub fn new(chapter_id: u32, title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            chapter_id,
            title: title.into(),
            url: url.into(),
            lines: Vec::new(),
        }
    }

    /// Build the populated chapter, consuming the skeleton.
    pub fn with_lines(self, lines: Vec<Line>) -> Self {
        Self { lines, ..self }
    }

    /// Title used in tables of contents: `"<id> - <title>"`.
    pub fn section_title(&self) -> String {
        format!("{} - {}", self.chapter_id, self.title)
    }
}

// ---------------------------------------------------------------------------
// Volume / Novel
// ---------------------------------------------------------------------------

/// A volume and its chapters in discovery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    /// 1-based, chronological.
    pub id: u32,
    pub title: String,
    /// Output directory for this volume.
    pub path: PathBuf,
    /// Directory holding this volume's cached chapters.
    pub cache_path: PathBuf,
    pub chapters: Vec<Chapter>,
}

impl Volume {
    pub fn chapter_count(&self) -> usize {
        self.chapters.len()
    }
}

/// The novel being packaged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Novel {
    pub title: String,
    /// Directory where artifacts for this novel are written.
    pub saving_directory: PathBuf,
}

// ---------------------------------------------------------------------------
// Configuration (upstream boundary)
// ---------------------------------------------------------------------------

/// Inclusive volume-id range. `end == None` or `Some(0)` means "through the last volume".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VolumeRange {
    pub start: Option<u32>,
    pub end: Option<u32>,
}

impl VolumeRange {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(start: Option<u32>, end: Option<u32>) -> Self {
        Self { start, end }
    }

    /// Resolve against the number of discovered volumes.
    pub fn resolve(&self, volume_count: u32) -> (u32, u32) {
        let start = self.start.unwrap_or(1).max(1);
        let end = match self.end {
            None | Some(0) => volume_count,
            Some(end) => end,
        };
        (start, end)
    }
}

/// Values handed over by the interactive front end for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    pub novel_title: String,
    pub saving_directory: PathBuf,
    #[serde(default)]
    pub start_volume: Option<u32>,
    #[serde(default)]
    pub end_volume: Option<u32>,
    /// Font family name; `None` selects the catalog default.
    #[serde(default)]
    pub chosen_font: Option<String>,
}

impl Configuration {
    pub fn range(&self) -> VolumeRange {
        VolumeRange::new(self.start_volume, self.end_volume)
    }
}

// ---------------------------------------------------------------------------
// CoverUpdateReport
// ---------------------------------------------------------------------------

/// Outcome of the cover batch for one novel directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoverUpdateReport {
    pub novel_name: String,
    /// Artifacts that now carry a cover.
    pub updated: Vec<String>,
    /// Artifacts without a matching cover image. Never modified.
    pub missing: Vec<String>,
    /// Artifacts whose patch failed and was rolled back, with the reason.
    pub failed: Vec<(String, String)>,
    pub covers_folder_missing: bool,
    pub has_volumes: bool,
}

impl CoverUpdateReport {
    pub fn new(novel_name: impl Into<String>) -> Self {
        Self {
            novel_name: novel_name.into(),
            ..Self::default()
        }
    }

    pub fn all_volumes_updated(&self) -> bool {
        self.has_volumes && self.missing.is_empty() && self.failed.is_empty()
    }
}
