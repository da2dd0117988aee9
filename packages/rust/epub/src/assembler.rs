//! EPUB assembly from fetched volumes.
//!
//! Combined mode writes one package with a section per volume followed by
//! its chapters. Separated mode writes one package per volume. Every package
//! embeds the same [`Font`], rewound before each embed.

use std::collections::HashSet;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use epub_builder::{EpubBuilder, EpubContent, EpubVersion, ReferenceType, ZipLibrary};
use tracing::{debug, info, instrument};

use novelpack_shared::{Chapter, LineKind, NovelPackError, Result, Volume};
use novelpack_storage::sanitize_segment;

use crate::font::Font;
use crate::xml::{decode_entities, escape_text};

const LANGUAGE: &str = "ar";
const DEFAULT_AUTHOR: &str = "Unknown";

/// How volumes are split into packages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PackagingMode {
    /// One package for the whole novel.
    #[default]
    Combined,
    /// One package per volume.
    Separated,
}

/// Builds EPUB packages with one embedded font.
pub struct EpubAssembler<'a> {
    font: &'a Font,
    author: String,
}

impl<'a> EpubAssembler<'a> {
    pub fn new(font: &'a Font, author: impl Into<String>) -> Self {
        let author = author.into();
        let author = if author.trim().is_empty() {
            DEFAULT_AUTHOR.to_string()
        } else {
            author.trim().to_string()
        };
        Self { font, author }
    }

    /// Write the packages for `volumes` into `out_dir`; returns their paths.
    #[instrument(skip_all, fields(title = %novel_title, volumes = volumes.len(), ?mode))]
    pub fn assemble(
        &self,
        novel_title: &str,
        volumes: &[Volume],
        out_dir: &Path,
        mode: PackagingMode,
    ) -> Result<Vec<PathBuf>> {
        if volumes.is_empty() {
            return Err(NovelPackError::validation("no volumes to package"));
        }
        std::fs::create_dir_all(out_dir).map_err(|e| NovelPackError::io(out_dir, e))?;

        let artifacts = match mode {
            PackagingMode::Combined => {
                let all: Vec<&Volume> = volumes.iter().collect();
                let path = out_dir.join(artifact_name(novel_title));
                self.write_package(novel_title, &all, &path)?;
                vec![path]
            }
            PackagingMode::Separated => {
                let mut used = HashSet::new();
                let mut paths = Vec::with_capacity(volumes.len());
                for volume in volumes {
                    let mut name = artifact_name(&volume.title);
                    if !used.insert(name.clone()) {
                        name = artifact_name(&format!("{} ({})", volume.title, volume.id));
                        used.insert(name.clone());
                    }
                    let path = out_dir.join(name);
                    self.write_package(&volume.title, &[volume], &path)?;
                    paths.push(path);
                }
                paths
            }
        };

        info!(artifacts = artifacts.len(), "packaging complete");
        Ok(artifacts)
    }

    fn write_package(&self, title: &str, volumes: &[&Volume], path: &Path) -> Result<()> {
        let bytes = self.build_package(title, volumes)?;
        std::fs::write(path, &bytes).map_err(|e| NovelPackError::io(path, e))?;
        debug!(path = %path.display(), bytes = bytes.len(), "package written");
        Ok(())
    }

    fn build_package(&self, title: &str, volumes: &[&Volume]) -> Result<Vec<u8>> {
        let zip = ZipLibrary::new().map_err(packaging)?;
        let mut book = EpubBuilder::new(zip).map_err(packaging)?;
        book.epub_version(EpubVersion::V30);
        book.metadata("title", title).map_err(packaging)?;
        book.metadata("author", self.author.as_str()).map_err(packaging)?;
        book.metadata("lang", LANGUAGE).map_err(packaging)?;
        book.metadata("toc_name", title).map_err(packaging)?;

        book.add_resource(
            self.font.resource_path(),
            self.font.rewound()?,
            self.font.media_type(),
        )
        .map_err(packaging)?;

        let css = self.font.stylesheet();
        for volume in volumes {
            book.add_content(
                EpubContent::new(
                    format!("volume_{:03}.xhtml", volume.id),
                    Cursor::new(render_volume(volume, css)),
                )
                .title(volume.title.as_str())
                .reftype(ReferenceType::Text)
                .level(1),
            )
            .map_err(packaging)?;

            for chapter in &volume.chapters {
                book.add_content(
                    EpubContent::new(
                        format!("chapter_{:05}.xhtml", chapter.chapter_id),
                        Cursor::new(render_chapter(chapter, css)),
                    )
                    .title(chapter.section_title())
                    .reftype(ReferenceType::Text)
                    .level(2),
                )
                .map_err(packaging)?;
            }
        }

        let mut buffer = Vec::new();
        book.generate(&mut buffer).map_err(packaging)?;
        Ok(buffer)
    }
}

fn packaging(e: impl std::fmt::Display) -> NovelPackError {
    NovelPackError::Packaging(e.to_string())
}

/// `<sanitized title>.epub`
pub fn artifact_name(title: &str) -> String {
    format!("{}.epub", sanitize_segment(title, 120, "Novel"))
}

fn xhtml(title: &str, css: &str, body: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <!DOCTYPE html>\n\
         <html xmlns=\"http://www.w3.org/1999/xhtml\" xmlns:epub=\"http://www.idpf.org/2007/ops\" lang=\"{LANGUAGE}\" xml:lang=\"{LANGUAGE}\">\n\
         <head>\n<title>{title}</title>\n<style type=\"text/css\">\n{css}</style>\n</head>\n\
         <body>\n{body}</body>\n</html>\n",
        title = escape_text(title),
    )
}

/// Volume title page.
pub fn render_volume(volume: &Volume, css: &str) -> String {
    let body = format!(
        "<h1 class=\"rtl-content\">{}</h1>\n",
        escape_text(&volume.title)
    );
    xhtml(&volume.title, css, &body)
}

/// Chapter page: title, then one paragraph or image per line.
pub fn render_chapter(chapter: &Chapter, css: &str) -> String {
    let mut body = String::from("<div class=\"rtl-content\">\n");
    body.push_str(&format!("<h2>{}</h2>\n", escape_text(&chapter.title)));
    for line in &chapter.lines {
        match line.kind {
            LineKind::Text => {
                let text = decode_entities(&line.content);
                body.push_str(&format!("<p>{}</p>\n", escape_text(&text)));
            }
            LineKind::ImageReference => {
                body.push_str(&format!(
                    "<img src=\"{}\" alt=\"Image\" />\n",
                    escape_text(&line.content)
                ));
            }
        }
    }
    body.push_str("</div>\n");
    xhtml(&chapter.section_title(), css, &body)
}
