//! Small namespace-aware XML tree.
//!
//! Built on `quick-xml` events. Everything that is not an element or text
//! (declaration, doctype, comments, CDATA, processing instructions) is kept
//! verbatim so an untouched document serializes back to equivalent markup.

use std::borrow::Cow;

use quick_xml::NsReader;
use quick_xml::escape::{escape, unescape_with};
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;

use novelpack_shared::{NovelPackError, Result};

/// One child of an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    /// Text exactly as it appeared in the source (still escaped).
    Text(String),
    /// Markup kept verbatim.
    Raw(String),
}

/// An element with its resolved namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Qualified name as written (`opf:item`, `item`).
    pub name: String,
    /// Namespace URI the name resolved to.
    pub namespace: Option<String>,
    /// Attributes in source order, values unescaped.
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>, namespace: Option<String>) -> Self {
        Self {
            name: name.into(),
            namespace,
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// A new element in this element's namespace, using the same prefix.
    pub fn sibling_kind(&self, local: &str) -> Self {
        let name = match self.name.split_once(':') {
            Some((prefix, _)) => format!("{prefix}:{local}"),
            None => local.to_string(),
        };
        Self::new(name, self.namespace.clone())
    }

    pub fn local_name(&self) -> &str {
        self.name.rsplit(':').next().unwrap_or(&self.name)
    }

    pub fn is(&self, namespace: &str, local: &str) -> bool {
        self.namespace.as_deref() == Some(namespace) && self.local_name() == local
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Set `name`, keeping its position if it already exists.
    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| k == name) {
            Some((_, v)) => *v = value,
            None => self.attributes.push((name.to_string(), value)),
        }
    }

    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        let pos = self.attributes.iter().position(|(k, _)| k == name)?;
        Some(self.attributes.remove(pos).1)
    }

    pub fn with_attr(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            _ => None,
        })
    }

    pub fn elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            _ => None,
        })
    }

    pub fn child(&self, namespace: &str, local: &str) -> Option<&Element> {
        self.elements().find(|e| e.is(namespace, local))
    }

    pub fn child_mut(&mut self, namespace: &str, local: &str) -> Option<&mut Element> {
        self.elements_mut().find(|e| e.is(namespace, local))
    }

    /// Depth-first search, this element included.
    pub fn find(&self, namespace: &str, local: &str) -> Option<&Element> {
        if self.is(namespace, local) {
            return Some(self);
        }
        self.elements().find_map(|e| e.find(namespace, local))
    }

    pub fn push(&mut self, child: Element) {
        self.children.push(Node::Element(child));
    }

    /// Insert `child` before the first element child.
    pub fn push_front(&mut self, child: Element) {
        let pos = self
            .children
            .iter()
            .position(|n| matches!(n, Node::Element(_)))
            .unwrap_or(self.children.len());
        self.children.insert(pos, Node::Element(child));
    }

    /// Drop element children rejected by `keep`; returns how many went.
    pub fn retain_elements(&mut self, mut keep: impl FnMut(&Element) -> bool) -> usize {
        let before = self.children.len();
        self.children.retain(|n| match n {
            Node::Element(e) => keep(e),
            _ => true,
        });
        before - self.children.len()
    }

    fn write(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (k, v) in &self.attributes {
            out.push(' ');
            out.push_str(k);
            out.push_str("=\"");
            out.push_str(&escape(v.as_str()));
            out.push('"');
        }
        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for child in &self.children {
            child.write(out);
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }
}

impl Node {
    fn write(&self, out: &mut String) {
        match self {
            Node::Element(e) => e.write(out),
            Node::Text(t) | Node::Raw(t) => out.push_str(t),
        }
    }
}

/// A parsed document: prolog, one root element, trailing nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub prolog: Vec<Node>,
    pub root: Element,
    pub epilog: Vec<Node>,
}

impl Document {
    pub fn parse(xml: &str) -> Result<Self> {
        let mut reader = NsReader::from_str(xml);
        let mut tree = TreeBuilder::default();

        loop {
            let (ns, event) = reader
                .read_resolved_event()
                .map_err(|e| NovelPackError::parse(format!("xml: {e}")))?;
            match event {
                Event::Start(e) => {
                    let el = open_element(&e, &ns)?;
                    tree.open.push(el);
                }
                Event::Empty(e) => {
                    let el = open_element(&e, &ns)?;
                    tree.attach(Node::Element(el))?;
                }
                Event::End(_) => {
                    let el = tree
                        .open
                        .pop()
                        .ok_or_else(|| NovelPackError::parse("xml: unbalanced end tag"))?;
                    tree.attach(Node::Element(el))?;
                }
                Event::Text(t) => tree.attach(Node::Text(lossy(&t).into_owned()))?,
                Event::CData(c) => tree.attach(Node::Raw(format!("<![CDATA[{}]]>", lossy(&c))))?,
                Event::Comment(c) => tree.attach(Node::Raw(format!("<!--{}-->", lossy(&c))))?,
                Event::Decl(d) => tree.attach(Node::Raw(format!("<?{}?>", lossy(&d))))?,
                Event::PI(p) => tree.attach(Node::Raw(format!("<?{}?>", lossy(&p))))?,
                Event::DocType(d) => {
                    tree.attach(Node::Raw(format!("<!DOCTYPE {}>", lossy(&d))))?
                }
                Event::Eof => break,
            }
        }

        if !tree.open.is_empty() {
            return Err(NovelPackError::parse("xml: unclosed element"));
        }
        let root = tree
            .root
            .ok_or_else(|| NovelPackError::parse("xml: no root element"))?;
        Ok(Self {
            prolog: tree.prolog,
            root,
            epilog: tree.epilog,
        })
    }

    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        for node in &self.prolog {
            node.write(&mut out);
        }
        self.root.write(&mut out);
        for node in &self.epilog {
            node.write(&mut out);
        }
        out
    }
}

#[derive(Default)]
struct TreeBuilder {
    open: Vec<Element>,
    prolog: Vec<Node>,
    root: Option<Element>,
    epilog: Vec<Node>,
}

impl TreeBuilder {
    fn attach(&mut self, node: Node) -> Result<()> {
        if let Some(parent) = self.open.last_mut() {
            parent.children.push(node);
            return Ok(());
        }
        match (node, &self.root) {
            (Node::Element(_), Some(_)) => Err(NovelPackError::parse("xml: multiple root elements")),
            (Node::Element(e), None) => {
                self.root = Some(e);
                Ok(())
            }
            (other, None) => {
                self.prolog.push(other);
                Ok(())
            }
            (other, Some(_)) => {
                self.epilog.push(other);
                Ok(())
            }
        }
    }
}

fn lossy(bytes: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(bytes)
}

fn open_element(start: &BytesStart<'_>, ns: &ResolveResult<'_>) -> Result<Element> {
    let namespace = match ns {
        ResolveResult::Bound(ns) => Some(lossy(ns.as_ref()).into_owned()),
        _ => None,
    };
    let mut el = Element::new(lossy(start.name().as_ref()).into_owned(), namespace);
    for attr in start.attributes() {
        let attr = attr.map_err(|e| NovelPackError::parse(format!("xml attribute: {e}")))?;
        let value = attr
            .unescape_value()
            .map_err(|e| NovelPackError::parse(format!("xml attribute: {e}")))?;
        el.attributes
            .push((lossy(attr.key.as_ref()).into_owned(), value.into_owned()));
    }
    Ok(el)
}

/// Decode XML/HTML character references; undecodable input is returned as-is.
pub fn decode_entities(text: &str) -> Cow<'_, str> {
    unescape_with(text, |entity| match entity {
        "amp" => Some("&"),
        "lt" => Some("<"),
        "gt" => Some(">"),
        "quot" => Some("\""),
        "apos" => Some("'"),
        "nbsp" => Some("\u{a0}"),
        _ => None,
    })
    .unwrap_or(Cow::Borrowed(text))
}

/// Escape text for XHTML content or attribute values.
pub fn escape_text(text: &str) -> Cow<'_, str> {
    escape(text)
}
