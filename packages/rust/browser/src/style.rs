//! Computed-style estimation for static documents.
//!
//! Rules come from the document's `<style>` blocks and are applied in source
//! order; inline `style` attributes win. Specificity is not modelled. Boxes are
//! estimated: anything under `display:none` collapses, explicit sub-pixel
//! sizes round to zero, everything else is assumed to take up space.

use std::collections::HashMap;

use scraper::{ElementRef, Html, Selector};

/// Computed values the fetch pipeline inspects, plus the element's box size.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedStyle {
    pub height: String,
    pub overflow: String,
    pub position: String,
    pub opacity: String,
    pub text_indent: String,
    pub bottom: String,
    pub offset_width: f64,
    pub offset_height: f64,
}

impl Default for RenderedStyle {
    fn default() -> Self {
        Self {
            height: "auto".into(),
            overflow: "visible".into(),
            position: "static".into(),
            opacity: "1".into(),
            text_indent: "0px".into(),
            bottom: "auto".into(),
            offset_width: ASSUMED_WIDTH,
            offset_height: ASSUMED_LINE_HEIGHT,
        }
    }
}

/// Width given to elements whose width is not declared in px.
const ASSUMED_WIDTH: f64 = 600.0;
/// Height given to non-empty elements whose height is not declared in px.
const ASSUMED_LINE_HEIGHT: f64 = 24.0;

struct Rule {
    selector: Selector,
    declarations: Vec<(String, String)>,
}

/// Parsed `<style>` rules of one document.
pub(crate) struct StyleSheet {
    rules: Vec<Rule>,
}

impl StyleSheet {
    pub(crate) fn from_document(doc: &Html) -> Self {
        let mut rules = Vec::new();
        if let Ok(style_sel) = Selector::parse("style") {
            for block in doc.select(&style_sel) {
                let css: String = block.text().collect();
                rules.extend(parse_rules(&css));
            }
        }
        Self { rules }
    }

    /// Declarations applying to `element`, later ones overriding earlier ones.
    fn declarations(&self, element: &ElementRef<'_>) -> HashMap<String, String> {
        let mut resolved = HashMap::new();
        for rule in &self.rules {
            if rule.selector.matches(element) {
                for (k, v) in &rule.declarations {
                    resolved.insert(k.clone(), v.clone());
                }
            }
        }
        if let Some(inline) = element.value().attr("style") {
            for (k, v) in parse_declarations(inline) {
                resolved.insert(k, v);
            }
        }
        resolved
    }
}

/// Estimate a [`RenderedStyle`] for every element, in document order.
pub(crate) fn compute_all(doc: &Html, elements: &[ElementRef<'_>]) -> Vec<RenderedStyle> {
    let sheet = StyleSheet::from_document(doc);
    let mut collapsed = HashMap::new();
    let mut styles = Vec::with_capacity(elements.len());

    for el in elements {
        let decls = sheet.declarations(el);
        let parent_collapsed = el
            .parent()
            .and_then(|p| collapsed.get(&p.id()).copied())
            .unwrap_or(false);
        let is_collapsed =
            parent_collapsed || decls.get("display").is_some_and(|d| d == "none");
        collapsed.insert(el.id(), is_collapsed);

        styles.push(resolve(el, &decls, is_collapsed));
    }
    styles
}

fn resolve(el: &ElementRef<'_>, decls: &HashMap<String, String>, collapsed: bool) -> RenderedStyle {
    let defaults = RenderedStyle::default();
    let value = |key: &str, default: String| decls.get(key).cloned().unwrap_or(default);

    let has_content = el.text().any(|t| !t.trim().is_empty())
        || el.children().any(|c| c.value().is_element());

    let (offset_width, offset_height) = if collapsed {
        (0.0, 0.0)
    } else {
        let width = decls
            .get("width")
            .and_then(|w| parse_px(w))
            .unwrap_or(ASSUMED_WIDTH);
        let default_height = if has_content { ASSUMED_LINE_HEIGHT } else { 0.0 };
        let height = decls
            .get("height")
            .and_then(|h| parse_px(h))
            .unwrap_or(default_height);
        (round_box(width), round_box(height))
    };

    RenderedStyle {
        height: value("height", defaults.height),
        overflow: value("overflow", defaults.overflow),
        position: value("position", defaults.position),
        opacity: value("opacity", defaults.opacity),
        text_indent: value("text-indent", defaults.text_indent),
        bottom: value("bottom", defaults.bottom),
        offset_width,
        offset_height,
    }
}

/// Layout rounds box sizes to whole pixels.
fn round_box(px: f64) -> f64 {
    if px < 0.5 { 0.0 } else { px.round() }
}

fn parse_px(value: &str) -> Option<f64> {
    let v = value.trim();
    if v == "0" {
        return Some(0.0);
    }
    v.strip_suffix("px")?.trim().parse().ok()
}

fn parse_rules(css: &str) -> Vec<Rule> {
    let css = strip_comments(css);
    let mut rules = Vec::new();

    for chunk in css.split('}') {
        let Some((selectors, body)) = chunk.split_once('{') else {
            continue;
        };
        let selectors = selectors.trim();
        // At-rules and their nested blocks are ignored.
        if selectors.is_empty() || selectors.starts_with('@') || body.contains('{') {
            continue;
        }
        let declarations = parse_declarations(body);
        for sel in selectors.split(',') {
            if let Ok(selector) = Selector::parse(sel.trim()) {
                rules.push(Rule {
                    selector,
                    declarations: declarations.clone(),
                });
            }
        }
    }
    rules
}

fn parse_declarations(body: &str) -> Vec<(String, String)> {
    body.split(';')
        .filter_map(|decl| {
            let (k, v) = decl.split_once(':')?;
            let k = k.trim().to_ascii_lowercase();
            let v = v.trim().trim_end_matches("!important").trim().to_string();
            (!k.is_empty() && !v.is_empty()).then_some((k, v))
        })
        .collect()
}

fn strip_comments(css: &str) -> String {
    let mut out = String::with_capacity(css.len());
    let mut rest = css;
    while let Some(start) = rest.find("/*") {
        out.push_str(&rest[..start]);
        match rest[start + 2..].find("*/") {
            Some(end) => rest = &rest[start + 2 + end + 2..],
            None => return out,
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn styles_of(html: &str, selector: &str) -> Vec<RenderedStyle> {
        let doc = Html::parse_document(html);
        let all = Selector::parse("*").expect("selector");
        let elements: Vec<ElementRef<'_>> = doc.select(&all).collect();
        let styles = compute_all(&doc, &elements);
        let target = Selector::parse(selector).expect("selector");
        elements
            .iter()
            .zip(styles)
            .filter(|(el, _)| target.matches(el))
            .map(|(_, s)| s)
            .collect()
    }

    #[test]
    fn defaults_without_rules() {
        let styles = styles_of("<p>hello</p>", "p");
        assert_eq!(styles[0], RenderedStyle::default());
    }

    #[test]
    fn stylesheet_and_inline_cascade() {
        let html = r#"
            <style>
              /* trap */
              p.trap { height: 0.1px; overflow: hidden; position: fixed !important; }
              .trap, .other { opacity: 0 }
              @media print { p { opacity: 1 } }
            </style>
            <p class="trap" style="text-indent:-99999px; bottom:-999px">hidden text</p>
            <p style="opacity:0.5">visible</p>
        "#;
        let styles = styles_of(html, "p");
        let trap = &styles[0];
        assert_eq!(trap.height, "0.1px");
        assert_eq!(trap.overflow, "hidden");
        assert_eq!(trap.position, "fixed");
        assert_eq!(trap.opacity, "0");
        assert_eq!(trap.text_indent, "-99999px");
        assert_eq!(trap.bottom, "-999px");
        assert_eq!(trap.offset_height, 0.0);

        assert_eq!(styles[1].opacity, "0.5");
        assert_eq!(styles[1].overflow, "visible");
    }

    #[test]
    fn display_none_collapses_descendants() {
        let html = r#"<div style="display:none"><p>gone</p></div><p>here</p>"#;
        let styles = styles_of(html, "p");
        assert_eq!((styles[0].offset_width, styles[0].offset_height), (0.0, 0.0));
        assert!(styles[1].offset_width > 0.0 && styles[1].offset_height > 0.0);
    }

    #[test]
    fn explicit_zero_width() {
        let styles = styles_of(r#"<p style="width:0">x</p><p style="width:40px">y</p>"#, "p");
        assert_eq!(styles[0].offset_width, 0.0);
        assert_eq!(styles[1].offset_width, 40.0);
    }

    #[test]
    fn empty_paragraph_has_no_height() {
        let styles = styles_of("<p></p>", "p");
        assert_eq!(styles[0].offset_height, 0.0);
    }

    #[test]
    fn px_parsing() {
        assert_eq!(parse_px("0"), Some(0.0));
        assert_eq!(parse_px(" 12.5px "), Some(12.5));
        assert_eq!(parse_px("2em"), None);
        assert_eq!(parse_px("auto"), None);
    }
}
