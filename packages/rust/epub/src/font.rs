//! Font catalog and embeddable fonts.
//!
//! A fonts directory holds one sub-directory per family. The family file is
//! `Index.ttf`, or the only `.ttf`/`.otf` file in the sub-directory.

use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use novelpack_shared::{NovelPackError, Result};
use novelpack_storage::sanitize_segment;

const INDEX_FILE: &str = "Index.ttf";

/// A family found in the fonts directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontEntry {
    pub name: String,
    pub path: PathBuf,
}

/// Every family available for embedding, sorted by name.
#[derive(Debug, Clone, Default)]
pub struct FontCatalog {
    entries: Vec<FontEntry>,
}

impl FontCatalog {
    /// Scan `dir`. A missing directory is an empty catalog.
    pub fn load(dir: &Path) -> Result<Self> {
        let read = match std::fs::read_dir(dir) {
            Ok(read) => read,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(dir = %dir.display(), "fonts directory does not exist");
                return Ok(Self::default());
            }
            Err(e) => return Err(NovelPackError::io(dir, e)),
        };

        let mut entries = Vec::new();
        for entry in read {
            let entry = entry.map_err(|e| NovelPackError::io(dir, e))?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(file) = family_file(&path)? else {
                debug!(dir = %path.display(), "no font file, skipping");
                continue;
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            entries.push(FontEntry { name, path: file });
        }
        Ok(Self::from_entries(entries))
    }

    pub fn from_entries(mut entries: Vec<FontEntry>) -> Self {
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Self { entries }
    }

    pub fn entries(&self) -> &[FontEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The first family by name.
    pub fn default_entry(&self) -> Option<&FontEntry> {
        self.entries.first()
    }

    pub fn get(&self, name: &str) -> Option<&FontEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Open `name`, or the default family when `name` is `None`.
    pub fn open(&self, name: Option<&str>) -> Result<Font> {
        let entry = match name {
            Some(name) => self.get(name).ok_or_else(|| {
                let known: Vec<&str> = self.entries.iter().map(|e| e.name.as_str()).collect();
                NovelPackError::validation(format!(
                    "unknown font `{name}` (available: {})",
                    known.join(", ")
                ))
            })?,
            None => self
                .default_entry()
                .ok_or_else(|| NovelPackError::validation("no fonts installed"))?,
        };
        Font::open(entry)
    }
}

fn family_file(dir: &Path) -> Result<Option<PathBuf>> {
    let index = dir.join(INDEX_FILE);
    if index.is_file() {
        return Ok(Some(index));
    }
    let mut fonts = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| NovelPackError::io(dir, e))? {
        let path = entry.map_err(|e| NovelPackError::io(dir, e))?.path();
        if path.is_file() && font_extension(&path).is_some() {
            fonts.push(path);
        }
    }
    Ok(match fonts.len() {
        1 => fonts.pop(),
        _ => None,
    })
}

fn font_extension(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "ttf" => Some("ttf"),
        "otf" => Some("otf"),
        _ => None,
    }
}

/// An open font ready to be embedded in any number of packages.
#[derive(Debug)]
pub struct Font {
    name: String,
    resource_path: String,
    media_type: &'static str,
    stylesheet: String,
    stream: File,
}

impl Font {
    pub fn open(entry: &FontEntry) -> Result<Self> {
        let stream = File::open(&entry.path).map_err(|e| NovelPackError::io(&entry.path, e))?;
        let ext = font_extension(&entry.path).unwrap_or("ttf");
        let stem = sanitize_segment(&entry.name, 60, "font").replace(' ', "_");
        let resource_path = format!("fonts/{stem}.{ext}");
        let media_type = if ext == "otf" { "font/otf" } else { "font/ttf" };
        let stylesheet = stylesheet_for(&entry.name, &resource_path);
        debug!(font = %entry.name, path = %entry.path.display(), "font opened");
        Ok(Self {
            name: entry.name.clone(),
            resource_path,
            media_type,
            stylesheet,
            stream,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the font inside a package.
    pub fn resource_path(&self) -> &str {
        &self.resource_path
    }

    pub fn media_type(&self) -> &'static str {
        self.media_type
    }

    /// `@font-face` plus the `.rtl-content` rule.
    pub fn stylesheet(&self) -> &str {
        &self.stylesheet
    }

    /// The byte stream, positioned at its start.
    ///
    /// Must be called before every embed: the previous embed left the
    /// position at the end.
    pub fn rewound(&self) -> Result<&File> {
        let mut stream = &self.stream;
        stream
            .seek(SeekFrom::Start(0))
            .map_err(|e| NovelPackError::Packaging(format!("rewinding font {}: {e}", self.name)))?;
        Ok(stream)
    }
}

fn stylesheet_for(family: &str, resource_path: &str) -> String {
    let family = family.replace('"', "");
    format!(
        "@font-face {{ font-family: \"{family}\"; src: url(\"{resource_path}\"); }}\n\
         .rtl-content {{ direction: rtl; text-align: right; font-family: \"{family}\", serif; }}\n"
    )
}
