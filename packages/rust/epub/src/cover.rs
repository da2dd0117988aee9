//! Cover injection into existing EPUB packages.
//!
//! The artifact is copied to `<artifact>.bak` first, patched in a scratch
//! directory, repacked to `<artifact>.tmp`, and renamed over the original.
//! Any failure restores the backup. The scratch directory is a
//! [`tempfile::TempDir`] and goes away on every path.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use novelpack_shared::{NovelPackError, Result};

use crate::package::{CONTAINER_PATH, ManifestItem, PackageDocument, rootfile_path};

/// Manifest id of the cover image.
pub const COVER_IMAGE_ID: &str = "cover-image";
/// Manifest id of the cover page.
pub const COVER_PAGE_ID: &str = "cover-page";

const COVER_PROPERTY: &str = "cover-image";
const COVER_PAGE_FILE: &str = "cover.xhtml";
const XHTML_MEDIA_TYPE: &str = "application/xhtml+xml";
const MIMETYPE_ENTRY: &str = "mimetype";

/// Extensions accepted as cover images, lower-case.
pub const COVER_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "webp"];

/// Media type for a cover image, by extension. Unknown extensions are PNG.
pub fn image_media_type(path: &Path) -> &'static str {
    match lower_extension(path).as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        Some("webp") => "image/webp",
        _ => "image/png",
    }
}

/// Whether `path` has one of [`COVER_EXTENSIONS`].
pub fn is_cover_image(path: &Path) -> bool {
    lower_extension(path).is_some_and(|ext| COVER_EXTENSIONS.contains(&ext.as_str()))
}

fn lower_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

/// Give `artifact` a visible cover built from `cover`.
///
/// Entries unrelated to the cover are repacked byte-identical. On error the
/// original artifact is restored from its backup.
#[instrument(skip_all, fields(artifact = %artifact.display(), cover = %cover.display()))]
pub fn inject_cover(artifact: &Path, cover: &Path) -> Result<()> {
    let backup = with_suffix(artifact, ".bak");
    let staged = with_suffix(artifact, ".tmp");

    fs::copy(artifact, &backup).map_err(|e| NovelPackError::io(&backup, e))?;
    let scratch = tempfile::Builder::new()
        .prefix("novelpack-cover-")
        .tempdir()
        .map_err(|e| NovelPackError::io(std::env::temp_dir(), e))?;

    let outcome = patch(artifact, cover, scratch.path(), &staged).and_then(|()| {
        fs::rename(&staged, artifact)
            .map_err(|e| NovelPackError::artifact_write(artifact, e.to_string()))
    });

    match outcome {
        Ok(()) => {
            if let Err(e) = fs::remove_file(&backup) {
                warn!(backup = %backup.display(), error = %e, "could not remove backup");
            }
            info!("cover injected");
            Ok(())
        }
        Err(e) => {
            warn!(error = %e, "cover injection failed, restoring original");
            if let Err(restore) = fs::rename(&backup, artifact) {
                warn!(backup = %backup.display(), error = %restore, "restore from backup failed");
            }
            if staged.exists() {
                if let Err(cleanup) = fs::remove_file(&staged) {
                    debug!(staged = %staged.display(), error = %cleanup, "removing staged package failed");
                }
            }
            Err(e)
        }
    }
}

fn patch(artifact: &Path, cover: &Path, scratch: &Path, staged: &Path) -> Result<()> {
    if !cover.is_file() {
        return Err(NovelPackError::io(
            cover,
            std::io::Error::new(std::io::ErrorKind::NotFound, "cover image not found"),
        ));
    }

    unpack(artifact, scratch)?;

    let container = read_required(scratch, CONTAINER_PATH)?;
    let opf_rel = rootfile_path(&container)?;
    let opf_path = enclosed(scratch, &opf_rel)?;
    let mut opf = PackageDocument::parse(&read_required(scratch, &opf_rel)?)?;
    let opf_dir = opf_path.parent().unwrap_or(scratch).to_path_buf();
    let items = opf.manifest_items();

    // Image
    let images_dir = images_dir(&items, &opf_dir);
    let ext = lower_extension(cover).unwrap_or_else(|| "png".to_string());
    let cover_href = join_href(&images_dir, &format!("cover.{ext}"));
    let cover_target = enclosed(&opf_dir, &cover_href)?;
    create_parent(&cover_target)?;
    fs::copy(cover, &cover_target).map_err(|e| NovelPackError::io(&cover_target, e))?;

    let previous_href = items
        .iter()
        .find(|i| i.id == COVER_IMAGE_ID)
        .map(|i| i.href.clone());
    drop_href_conflicts(&mut opf, &cover_href, COVER_IMAGE_ID);
    opf.upsert_manifest_item(
        COVER_IMAGE_ID,
        &cover_href,
        image_media_type(cover),
        Some(COVER_PROPERTY),
    );
    opf.strip_property(COVER_PROPERTY, COVER_IMAGE_ID);
    opf.upsert_meta("cover", COVER_IMAGE_ID);

    if let Some(old) = previous_href.filter(|old| *old != cover_href) {
        let still_used = opf.manifest_items().iter().any(|i| i.href == old);
        if !still_used {
            if let Ok(old_path) = enclosed(&opf_dir, &old) {
                debug!(href = %old, "removing replaced cover image");
                if let Err(e) = fs::remove_file(&old_path) {
                    debug!(path = %old_path.display(), error = %e, "removing replaced cover image failed");
                }
            }
        }
    }

    // Page
    let text_dir = text_dir(&items, &opf_dir);
    let page_href = join_href(&text_dir, COVER_PAGE_FILE);
    let page_target = enclosed(&opf_dir, &page_href)?;
    create_parent(&page_target)?;
    let page = cover_page(&relative_href(&text_dir, &cover_href));
    fs::write(&page_target, page).map_err(|e| NovelPackError::io(&page_target, e))?;

    drop_href_conflicts(&mut opf, &page_href, COVER_PAGE_ID);
    opf.upsert_manifest_item(COVER_PAGE_ID, &page_href, XHTML_MEDIA_TYPE, None);
    opf.spine_prepend(COVER_PAGE_ID);
    opf.upsert_guide_reference("cover", &page_href, "Cover");

    fs::write(&opf_path, opf.to_xml()).map_err(|e| NovelPackError::io(&opf_path, e))?;
    debug!(%cover_href, %page_href, "descriptor updated");

    repack(scratch, staged)
}

/// Extract every entry under `scratch`, refusing names that escape it.
fn unpack(artifact: &Path, scratch: &Path) -> Result<()> {
    let file = File::open(artifact).map_err(|e| NovelPackError::io(artifact, e))?;
    let mut archive = ZipArchive::new(file)
        .map_err(|e| NovelPackError::malformed_package(format!("not a zip archive: {e}")))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| NovelPackError::malformed_package(format!("zip entry {i}: {e}")))?;
        let Some(rel) = entry.enclosed_name().map(Path::to_path_buf) else {
            return Err(NovelPackError::malformed_package(format!(
                "entry `{}` escapes the archive root",
                entry.name()
            )));
        };
        let target = scratch.join(rel);
        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(|e| NovelPackError::io(&target, e))?;
            continue;
        }
        create_parent(&target)?;
        let mut out = File::create(&target).map_err(|e| NovelPackError::io(&target, e))?;
        std::io::copy(&mut entry, &mut out).map_err(|e| NovelPackError::io(&target, e))?;
    }
    Ok(())
}

/// Zip `scratch` into `staged`: `mimetype` first and stored, the rest deflated.
fn repack(scratch: &Path, staged: &Path) -> Result<()> {
    let mut files = Vec::new();
    collect_files(scratch, scratch, &mut files)?;
    files.sort();
    if let Some(pos) = files.iter().position(|f| f == MIMETYPE_ENTRY) {
        let mimetype = files.remove(pos);
        files.insert(0, mimetype);
    }

    let out = File::create(staged).map_err(|e| write_error(staged, e))?;
    let mut writer = ZipWriter::new(out);
    for name in &files {
        let method = if name == MIMETYPE_ENTRY {
            CompressionMethod::Stored
        } else {
            CompressionMethod::Deflated
        };
        let data = fs::read(scratch.join(name)).map_err(|e| NovelPackError::io(scratch.join(name), e))?;
        writer
            .start_file(name.as_str(), FileOptions::default().compression_method(method))
            .map_err(|e| write_error(staged, e))?;
        writer.write_all(&data).map_err(|e| write_error(staged, e))?;
    }
    let out = writer.finish().map_err(|e| write_error(staged, e))?;
    out.sync_all().map_err(|e| write_error(staged, e))?;
    debug!(entries = files.len(), "package repacked");
    Ok(())
}

fn write_error(path: &Path, e: impl std::fmt::Display) -> NovelPackError {
    NovelPackError::artifact_write(path, e.to_string())
}

/// Relative, `/`-separated paths of every file below `dir`.
fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<()> {
    for entry in fs::read_dir(dir).map_err(|e| NovelPackError::io(dir, e))? {
        let path = entry.map_err(|e| NovelPackError::io(dir, e))?.path();
        if path.is_dir() {
            collect_files(root, &path, out)?;
        } else if let Ok(rel) = path.strip_prefix(root) {
            let name: Vec<String> = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            out.push(name.join("/"));
        }
    }
    Ok(())
}

fn read_required(scratch: &Path, rel: &str) -> Result<String> {
    let path = enclosed(scratch, rel)?;
    match fs::read_to_string(&path) {
        Ok(text) => Ok(text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(
            NovelPackError::malformed_package(format!("package has no `{rel}`")),
        ),
        Err(e) => Err(NovelPackError::io(path, e)),
    }
}

/// `base/rel` for a package-relative href; rejects `..` and absolute paths.
fn enclosed(base: &Path, rel: &str) -> Result<PathBuf> {
    let mut path = base.to_path_buf();
    for segment in rel.split('/').filter(|s| !s.is_empty() && *s != ".") {
        if segment == ".." || segment.contains('\\') || segment.contains(':') {
            return Err(NovelPackError::malformed_package(format!(
                "path `{rel}` escapes the package"
            )));
        }
        path.push(segment);
    }
    Ok(path)
}

fn create_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) => fs::create_dir_all(parent).map_err(|e| NovelPackError::io(parent, e)),
        None => Ok(()),
    }
}

fn href_dir(href: &str) -> String {
    href.rsplit_once('/')
        .map(|(dir, _)| dir.to_string())
        .unwrap_or_default()
}

fn join_href(dir: &str, file: &str) -> String {
    if dir.is_empty() {
        file.to_string()
    } else {
        format!("{dir}/{file}")
    }
}

/// `target` as seen from a document in `from_dir` (both descriptor-relative).
fn relative_href(from_dir: &str, target: &str) -> String {
    let from: Vec<&str> = from_dir.split('/').filter(|s| !s.is_empty()).collect();
    let to: Vec<&str> = target.split('/').filter(|s| !s.is_empty()).collect();
    let common = from
        .iter()
        .zip(to.iter().take(to.len().saturating_sub(1)))
        .take_while(|(a, b)| a == b)
        .count();
    let mut parts: Vec<&str> = vec![".."; from.len() - common];
    parts.extend(&to[common..]);
    parts.join("/")
}

fn images_dir(items: &[ManifestItem], opf_dir: &Path) -> String {
    items
        .iter()
        .find(|i| i.has_property(COVER_PROPERTY))
        .or_else(|| items.iter().find(|i| i.media_type.starts_with("image/")))
        .map(|i| href_dir(&i.href))
        .unwrap_or_else(|| existing_dir_or_root(opf_dir, "Images"))
}

fn text_dir(items: &[ManifestItem], opf_dir: &Path) -> String {
    items
        .iter()
        .find(|i| i.media_type == XHTML_MEDIA_TYPE && i.id != COVER_PAGE_ID)
        .map(|i| href_dir(&i.href))
        .unwrap_or_else(|| existing_dir_or_root(opf_dir, "Text"))
}

fn existing_dir_or_root(opf_dir: &Path, name: &str) -> String {
    if opf_dir.join(name).is_dir() {
        name.to_string()
    } else {
        String::new()
    }
}

/// Drop other manifest items (and their spine entries) that use `href`.
fn drop_href_conflicts(opf: &mut PackageDocument, href: &str, keep_id: &str) {
    let conflicting: Vec<String> = opf
        .manifest_items()
        .into_iter()
        .filter(|i| i.href == href && i.id != keep_id)
        .map(|i| i.id)
        .collect();
    for id in conflicting {
        debug!(%id, %href, "dropping item that occupies the cover href");
        opf.remove_manifest_item(&id);
        opf.remove_spine_ref(&id);
    }
}

fn cover_page(image_src: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <!DOCTYPE html>\n\
         <html xmlns=\"http://www.w3.org/1999/xhtml\" xmlns:epub=\"http://www.idpf.org/2007/ops\">\n\
         <head>\n<title>Cover</title>\n\
         <style type=\"text/css\">html, body {{ margin: 0; padding: 0; height: 100%; }} \
         body {{ text-align: center; }} img {{ max-width: 100%; max-height: 100%; }}</style>\n\
         </head>\n\
         <body epub:type=\"cover\">\n\
         <div style=\"margin: 0; padding: 0; text-align: center;\"><img src=\"{}\" alt=\"Cover\"/></div>\n\
         </body>\n</html>\n",
        crate::xml::escape_text(image_src)
    )
}
