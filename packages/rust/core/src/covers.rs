//! Cover batch: pair every package in a novel directory with an image from
//! its `covers` folder, both sorted by file name.

use std::path::{Path, PathBuf};

use tracing::{info, instrument, warn};

use novelpack_epub::{inject_cover, is_cover_image};
use novelpack_shared::{CoverUpdateReport, NovelPackError, Result};

/// Sibling folder holding the cover images of a novel.
pub const COVERS_FOLDER: &str = "covers";
const NO_PACKAGES: &str = "No EPUB files detected";

/// Patch every package under `novel_dir`.
///
/// The Nth package (by name) gets the Nth image (by name). Packages without
/// an image are listed in `missing` and left untouched. A failed patch is
/// rolled back by the injector and listed in `failed`; the batch continues.
#[instrument(skip_all, fields(novel_dir = %novel_dir.display()))]
pub async fn update_covers_for_novel(novel_dir: &Path) -> Result<CoverUpdateReport> {
    let mut report = CoverUpdateReport::new(file_name(novel_dir));
    let covers_dir = novel_dir.join(COVERS_FOLDER);
    let covers_exist = tokio::fs::metadata(&covers_dir)
        .await
        .is_ok_and(|m| m.is_dir());

    let packages = sorted_files(novel_dir, is_package).await?;
    if packages.is_empty() {
        report.missing.push(NO_PACKAGES.to_string());
        report.covers_folder_missing = !covers_exist;
        warn!("no packages in novel directory");
        return Ok(report);
    }
    report.has_volumes = true;

    let covers = if covers_exist {
        sorted_files(&covers_dir, is_cover_image).await?
    } else {
        report.covers_folder_missing = true;
        warn!(covers_dir = %covers_dir.display(), "covers folder missing");
        Vec::new()
    };

    for (index, package) in packages.iter().enumerate() {
        let name = file_name(package);
        let Some(cover) = covers.get(index) else {
            report.missing.push(name);
            continue;
        };

        let (artifact, image) = (package.clone(), cover.clone());
        let outcome = tokio::task::spawn_blocking(move || inject_cover(&artifact, &image))
            .await
            .map_err(|e| NovelPackError::Packaging(format!("cover task failed: {e}")))
            .and_then(|r| r);
        match outcome {
            Ok(()) => report.updated.push(name),
            Err(e) => {
                warn!(package = %name, error = %e, "cover injection failed");
                report.failed.push((name, e.to_string()));
            }
        }
    }

    info!(
        updated = report.updated.len(),
        missing = report.missing.len(),
        failed = report.failed.len(),
        "cover batch complete"
    );
    Ok(report)
}

/// Run the cover batch over several novel directories, one report each.
///
/// A directory that cannot be scanned gets a report whose `failed` list
/// carries the error; the remaining directories are still processed.
pub async fn update_covers_for_novels(dirs: &[PathBuf]) -> Vec<CoverUpdateReport> {
    let mut reports = Vec::with_capacity(dirs.len());
    for dir in dirs {
        match update_covers_for_novel(dir).await {
            Ok(report) => reports.push(report),
            Err(e) => {
                warn!(novel_dir = %dir.display(), error = %e, "skipping novel directory");
                let name = file_name(dir);
                let mut report = CoverUpdateReport::new(name.clone());
                report.failed.push((name, e.to_string()));
                reports.push(report);
            }
        }
    }
    reports
}

/// Sub-directories of the saving root, sorted. A missing root yields none.
pub async fn find_novel_directories(root: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = match tokio::fs::read_dir(root).await {
        Ok(dirs) => dirs,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(root = %root.display(), "novels directory does not exist");
            return Ok(Vec::new());
        }
        Err(e) => return Err(NovelPackError::io(root, e)),
    };

    let mut found = Vec::new();
    while let Some(entry) = dirs
        .next_entry()
        .await
        .map_err(|e| NovelPackError::io(root, e))?
    {
        if entry.file_type().await.is_ok_and(|t| t.is_dir()) {
            found.push(entry.path());
        }
    }
    found.sort();
    Ok(found)
}

async fn sorted_files(dir: &Path, keep: fn(&Path) -> bool) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| NovelPackError::io(dir, e))?;
    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| NovelPackError::io(dir, e))?
    {
        let path = entry.path();
        if entry.file_type().await.is_ok_and(|t| t.is_file()) && keep(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn is_package(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("epub"))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use zip::write::FileOptions;

    use super::*;

    const CONTAINER: &str = r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles><rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/></rootfiles>
</container>"#;

    const OPF: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="id">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/"><dc:title>T</dc:title></metadata>
  <manifest><item id="c1" href="c1.xhtml" media-type="application/xhtml+xml"/></manifest>
  <spine><itemref idref="c1"/></spine>
</package>"#;

    fn write_package(path: &Path) {
        let mut zip = zip::ZipWriter::new(std::fs::File::create(path).expect("create"));
        let options = FileOptions::default();
        for (name, body) in [
            ("mimetype", "application/epub+zip"),
            ("META-INF/container.xml", CONTAINER),
            ("OEBPS/content.opf", OPF),
            ("OEBPS/c1.xhtml", "<html xmlns=\"http://www.w3.org/1999/xhtml\"/>"),
        ] {
            zip.start_file(name, options).expect("start");
            zip.write_all(body.as_bytes()).expect("write");
        }
        zip.finish().expect("finish");
    }

    fn has_entry(path: &Path, suffix: &str) -> bool {
        let mut archive = zip::ZipArchive::new(std::fs::File::open(path).expect("open")).expect("zip");
        (0..archive.len()).any(|i| {
            let mut entry = archive.by_index(i).expect("entry");
            let mut sink = Vec::new();
            entry.read_to_end(&mut sink).expect("read");
            entry.name().ends_with(suffix)
        })
    }

    fn novel(packages: &[&str], covers: Option<&[&str]>) -> tempfile::TempDir {
        let tmp = tempfile::tempdir().expect("tempdir");
        for name in packages {
            write_package(&tmp.path().join(name));
        }
        if let Some(covers) = covers {
            let dir = tmp.path().join(COVERS_FOLDER);
            std::fs::create_dir_all(&dir).expect("mkdir");
            for name in covers {
                std::fs::write(dir.join(name), b"image").expect("write");
            }
        }
        tmp
    }

    #[tokio::test]
    async fn pairs_packages_and_covers_by_name() {
        let tmp = novel(
            &["b.epub", "a.epub", "c.epub"],
            Some(&["2.jpg", "1.PNG", "notes.txt"]),
        );
        let report = update_covers_for_novel(tmp.path()).await.expect("batch");

        assert!(report.has_volumes);
        assert!(!report.covers_folder_missing);
        assert_eq!(report.updated, vec!["a.epub", "b.epub"]);
        assert_eq!(report.missing, vec!["c.epub"]);
        assert!(report.failed.is_empty());
        assert!(has_entry(&tmp.path().join("a.epub"), "cover.png"));
        assert!(has_entry(&tmp.path().join("b.epub"), "cover.jpg"));
        assert!(!has_entry(&tmp.path().join("c.epub"), "cover.xhtml"));
    }

    #[tokio::test]
    async fn no_packages() {
        let tmp = novel(&[], None);
        let report = update_covers_for_novel(tmp.path()).await.expect("batch");
        assert!(!report.has_volumes);
        assert!(report.covers_folder_missing);
        assert_eq!(report.missing, vec![NO_PACKAGES]);
    }

    #[tokio::test]
    async fn missing_covers_folder_reports_every_package() {
        let tmp = novel(&["a.epub", "b.epub"], None);
        let before = std::fs::read(tmp.path().join("a.epub")).expect("read");
        let report = update_covers_for_novel(tmp.path()).await.expect("batch");
        assert!(report.covers_folder_missing);
        assert_eq!(report.missing, vec!["a.epub", "b.epub"]);
        assert_eq!(std::fs::read(tmp.path().join("a.epub")).expect("read"), before);
    }

    #[tokio::test]
    async fn empty_covers_folder_reports_every_package() {
        let tmp = novel(&["a.epub"], Some(&["readme.md"]));
        let report = update_covers_for_novel(tmp.path()).await.expect("batch");
        assert!(!report.covers_folder_missing);
        assert!(report.updated.is_empty());
        assert_eq!(report.missing, vec!["a.epub"]);
    }

    #[tokio::test]
    async fn broken_package_is_reported_and_batch_continues() {
        let tmp = novel(&["b.epub"], Some(&["1.png", "2.png"]));
        std::fs::write(tmp.path().join("a.epub"), b"not a zip").expect("write");

        let report = update_covers_for_novel(tmp.path()).await.expect("batch");
        assert_eq!(report.updated, vec!["b.epub"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "a.epub");
        assert_eq!(std::fs::read(tmp.path().join("a.epub")).expect("read"), b"not a zip");
        assert!(!report.all_volumes_updated());
    }

    #[tokio::test]
    async fn unreadable_novel_directory_does_not_stop_the_batch() {
        let root = tempfile::tempdir().expect("tempdir");
        let gone = root.path().join("Gone");
        let good = novel(&["a.epub"], Some(&["1.png"]));

        let reports = update_covers_for_novels(&[gone, good.path().to_path_buf()]).await;
        assert_eq!(reports.len(), 2);

        assert_eq!(reports[0].novel_name, "Gone");
        assert!(!reports[0].has_volumes);
        assert_eq!(reports[0].failed.len(), 1);
        assert_eq!(reports[0].failed[0].0, "Gone");

        assert_eq!(reports[1].updated, vec!["a.epub"]);
        assert!(reports[1].all_volumes_updated());
    }

    #[tokio::test]
    async fn novel_directories_are_sorted_subdirectories() {
        let tmp = tempfile::tempdir().expect("tempdir");
        for dir in ["Zeta", "Alpha"] {
            std::fs::create_dir_all(tmp.path().join(dir)).expect("mkdir");
        }
        std::fs::write(tmp.path().join("file.txt"), b"x").expect("write");

        let dirs = find_novel_directories(tmp.path()).await.expect("scan");
        assert_eq!(dirs, vec![tmp.path().join("Alpha"), tmp.path().join("Zeta")]);
        assert!(find_novel_directories(&tmp.path().join("none")).await.expect("scan").is_empty());
    }
}
