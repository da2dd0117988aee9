//! EPUB container file and package descriptor (OPF) editing.

use novelpack_shared::{NovelPackError, Result};

use crate::xml::{Document, Element};

/// Fixed location of the container file inside every package.
pub const CONTAINER_PATH: &str = "META-INF/container.xml";

const CONTAINER_NS: &str = "urn:oasis:names:tc:opendocument:xmlns:container";
const OPF_NS: &str = "http://www.idpf.org/2007/opf";

/// Package-relative path of the descriptor named by `container.xml`.
pub fn rootfile_path(container_xml: &str) -> Result<String> {
    let doc = Document::parse(container_xml)
        .map_err(|e| NovelPackError::malformed_package(format!("container.xml: {e}")))?;
    doc.root
        .find(CONTAINER_NS, "rootfile")
        .and_then(|r| r.attr("full-path"))
        .filter(|p| !p.trim().is_empty())
        .map(|p| p.trim().to_string())
        .ok_or_else(|| NovelPackError::malformed_package("container.xml names no rootfile"))
}

/// A manifest `<item>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestItem {
    pub id: String,
    pub href: String,
    pub media_type: String,
    pub properties: Option<String>,
}

impl ManifestItem {
    fn from_element(e: &Element) -> Self {
        Self {
            id: e.attr("id").unwrap_or_default().to_string(),
            href: e.attr("href").unwrap_or_default().to_string(),
            media_type: e.attr("media-type").unwrap_or_default().to_string(),
            properties: e.attr("properties").map(str::to_string),
        }
    }

    pub fn has_property(&self, property: &str) -> bool {
        self.properties
            .as_deref()
            .is_some_and(|p| p.split_whitespace().any(|x| x == property))
    }
}

/// A parsed OPF descriptor with manifest, metadata, and spine present.
#[derive(Debug, Clone)]
pub struct PackageDocument {
    doc: Document,
}

impl PackageDocument {
    pub fn parse(xml: &str) -> Result<Self> {
        let doc = Document::parse(xml)
            .map_err(|e| NovelPackError::malformed_package(format!("package descriptor: {e}")))?;
        if !doc.root.is(OPF_NS, "package") {
            return Err(NovelPackError::malformed_package(format!(
                "descriptor root is <{}>, expected an OPF <package>",
                doc.root.name
            )));
        }
        for section in ["manifest", "metadata", "spine"] {
            if doc.root.child(OPF_NS, section).is_none() {
                return Err(NovelPackError::malformed_package(format!(
                    "descriptor has no <{section}>"
                )));
            }
        }
        Ok(Self { doc })
    }

    pub fn to_xml(&self) -> String {
        self.doc.to_xml()
    }

    fn section(&self, local: &str) -> Option<&Element> {
        self.doc.root.child(OPF_NS, local)
    }

    fn section_mut(&mut self, local: &str) -> Option<&mut Element> {
        self.doc.root.child_mut(OPF_NS, local)
    }

    // -- manifest -----------------------------------------------------------

    pub fn manifest_items(&self) -> Vec<ManifestItem> {
        self.section("manifest")
            .into_iter()
            .flat_map(Element::elements)
            .filter(|e| e.is(OPF_NS, "item"))
            .map(ManifestItem::from_element)
            .collect()
    }

    pub fn manifest_item(&self, id: &str) -> Option<ManifestItem> {
        self.manifest_items().into_iter().find(|i| i.id == id)
    }

    /// Insert or update the item `id`; `properties: None` leaves existing ones.
    pub fn upsert_manifest_item(
        &mut self,
        id: &str,
        href: &str,
        media_type: &str,
        properties: Option<&str>,
    ) {
        let Some(manifest) = self.section_mut("manifest") else {
            return;
        };
        let existing = manifest
            .elements_mut()
            .find(|e| e.is(OPF_NS, "item") && e.attr("id") == Some(id));
        match existing {
            Some(item) => {
                item.set_attr("href", href);
                item.set_attr("media-type", media_type);
                if let Some(p) = properties {
                    item.set_attr("properties", p);
                }
            }
            None => {
                let mut item = manifest
                    .sibling_kind("item")
                    .with_attr("id", id)
                    .with_attr("href", href)
                    .with_attr("media-type", media_type);
                if let Some(p) = properties {
                    item.set_attr("properties", p);
                }
                manifest.push(item);
            }
        }
    }

    /// Remove `property` from every item except `keep_id`.
    pub fn strip_property(&mut self, property: &str, keep_id: &str) {
        let Some(manifest) = self.section_mut("manifest") else {
            return;
        };
        for item in manifest
            .elements_mut()
            .filter(|e| e.attr("id") != Some(keep_id))
        {
            let Some(current) = item.attr("properties") else {
                continue;
            };
            let rest: Vec<&str> = current
                .split_whitespace()
                .filter(|p| *p != property)
                .collect();
            if rest.len() == current.split_whitespace().count() {
                continue;
            }
            if rest.is_empty() {
                item.remove_attr("properties");
            } else {
                let joined = rest.join(" ");
                item.set_attr("properties", joined);
            }
        }
    }

    pub fn remove_manifest_item(&mut self, id: &str) -> bool {
        self.section_mut("manifest").is_some_and(|m| {
            m.retain_elements(|e| !(e.is(OPF_NS, "item") && e.attr("id") == Some(id))) > 0
        })
    }

    // -- metadata -----------------------------------------------------------

    /// Upsert `<meta name="{name}" content="{content}"/>`.
    pub fn upsert_meta(&mut self, name: &str, content: &str) {
        let Some(metadata) = self.section_mut("metadata") else {
            return;
        };
        let existing = metadata
            .elements_mut()
            .find(|e| e.is(OPF_NS, "meta") && e.attr("name") == Some(name));
        match existing {
            Some(meta) => meta.set_attr("content", content),
            None => {
                let meta = metadata
                    .sibling_kind("meta")
                    .with_attr("name", name)
                    .with_attr("content", content);
                metadata.push(meta);
            }
        }
    }

    pub fn meta(&self, name: &str) -> Option<String> {
        self.section("metadata")?
            .elements()
            .find(|e| e.is(OPF_NS, "meta") && e.attr("name") == Some(name))
            .and_then(|e| e.attr("content"))
            .map(str::to_string)
    }

    // -- spine --------------------------------------------------------------

    pub fn spine(&self) -> Vec<String> {
        self.section("spine")
            .into_iter()
            .flat_map(Element::elements)
            .filter(|e| e.is(OPF_NS, "itemref"))
            .filter_map(|e| e.attr("idref"))
            .map(str::to_string)
            .collect()
    }

    pub fn remove_spine_ref(&mut self, idref: &str) -> bool {
        self.section_mut("spine").is_some_and(|s| {
            s.retain_elements(|e| !(e.is(OPF_NS, "itemref") && e.attr("idref") == Some(idref))) > 0
        })
    }

    /// Make `idref` the first reading-order entry, exactly once.
    pub fn spine_prepend(&mut self, idref: &str) {
        self.remove_spine_ref(idref);
        let Some(spine) = self.section_mut("spine") else {
            return;
        };
        let itemref = spine.sibling_kind("itemref").with_attr("idref", idref);
        spine.push_front(itemref);
    }

    // -- guide --------------------------------------------------------------

    /// Upsert a guide reference of `kind`. No-op without a `<guide>`.
    pub fn upsert_guide_reference(&mut self, kind: &str, href: &str, title: &str) -> bool {
        let Some(guide) = self.doc.root.child_mut(OPF_NS, "guide") else {
            return false;
        };
        let existing = guide
            .elements_mut()
            .find(|e| e.is(OPF_NS, "reference") && e.attr("type") == Some(kind));
        match existing {
            Some(reference) => {
                reference.set_attr("href", href);
                reference.set_attr("title", title);
            }
            None => {
                let reference = guide
                    .sibling_kind("reference")
                    .with_attr("type", kind)
                    .with_attr("title", title)
                    .with_attr("href", href);
                guide.push_front(reference);
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTAINER: &str = r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

    const OPF: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="id">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>Book</dc:title>
  </metadata>
  <manifest>
    <item id="old" href="Images/old.png" media-type="image/png" properties="cover-image svg"/>
    <item id="c1" href="Text/c1.xhtml" media-type="application/xhtml+xml"/>
  </manifest>
  <spine>
    <itemref idref="c1"/>
  </spine>
</package>"#;

    #[test]
    fn rootfile_from_container() {
        assert_eq!(rootfile_path(CONTAINER).expect("rootfile"), "OEBPS/content.opf");
    }

    #[test]
    fn container_without_rootfile_is_malformed() {
        let err = rootfile_path(r#"<container xmlns="urn:oasis:names:tc:opendocument:xmlns:container"/>"#)
            .expect_err("malformed");
        assert!(matches!(err, NovelPackError::MalformedPackage { .. }));
    }

    #[test]
    fn missing_sections_are_malformed() {
        let no_spine = r#"<package xmlns="http://www.idpf.org/2007/opf"><metadata/><manifest/></package>"#;
        let err = PackageDocument::parse(no_spine).expect_err("malformed");
        assert!(err.to_string().contains("spine"));

        let wrong_ns = r#"<package><metadata/><manifest/><spine/></package>"#;
        assert!(PackageDocument::parse(wrong_ns).is_err());
    }

    #[test]
    fn cover_edits() {
        let mut opf = PackageDocument::parse(OPF).expect("parse");
        opf.upsert_manifest_item("cover-image", "Images/cover.jpg", "image/jpeg", Some("cover-image"));
        opf.upsert_manifest_item("cover-image", "Images/cover.png", "image/png", Some("cover-image"));
        opf.strip_property("cover-image", "cover-image");
        opf.upsert_meta("cover", "cover-image");
        opf.upsert_meta("cover", "cover-image");
        opf.spine_prepend("cover-page");
        opf.spine_prepend("cover-page");

        let reparsed = PackageDocument::parse(&opf.to_xml()).expect("reparse");
        let items = reparsed.manifest_items();
        let flagged: Vec<&str> = items
            .iter()
            .filter(|i| i.has_property("cover-image"))
            .map(|i| i.id.as_str())
            .collect();
        assert_eq!(flagged, vec!["cover-image"]);
        assert_eq!(
            reparsed.manifest_item("old").and_then(|i| i.properties),
            Some("svg".to_string())
        );
        assert_eq!(reparsed.manifest_item("cover-image").map(|i| i.href), Some("Images/cover.png".into()));
        assert_eq!(reparsed.meta("cover").as_deref(), Some("cover-image"));
        assert_eq!(reparsed.spine(), vec!["cover-page", "c1"]);
        assert!(!reparsed.to_xml().contains("<guide"));
    }

    #[test]
    fn guide_is_only_touched_when_present() {
        let mut without = PackageDocument::parse(OPF).expect("parse");
        assert!(!without.upsert_guide_reference("cover", "Text/cover.xhtml", "Cover"));

        let with_guide = OPF.replace("</spine>", "</spine>\n  <guide><reference type=\"toc\" href=\"nav.xhtml\"/></guide>");
        let mut opf = PackageDocument::parse(&with_guide).expect("parse");
        assert!(opf.upsert_guide_reference("cover", "Text/cover.xhtml", "Cover"));
        assert!(opf.upsert_guide_reference("cover", "Text/cover.xhtml", "Cover"));
        assert_eq!(opf.to_xml().matches("type=\"cover\"").count(), 1);
    }

    #[test]
    fn remove_item_and_spine_ref() {
        let mut opf = PackageDocument::parse(OPF).expect("parse");
        assert!(opf.remove_manifest_item("c1"));
        assert!(opf.remove_spine_ref("c1"));
        assert!(!opf.remove_spine_ref("c1"));
        assert!(opf.spine().is_empty());
    }
}
