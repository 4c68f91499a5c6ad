//! A small namespace aware XML tree.
//!
//! EBICS signatures are computed over canonicalized XML, so the tree keeps everything
//! canonicalization needs (prefixes, namespace declarations, attribute and whitespace
//! text) and nothing else: comments and processing instructions are dropped while parsing.

mod c14n;
mod parser;
mod writer;

#[cfg(test)]
mod test_xml;

pub use c14n::{canonicalize, canonicalize_subsets};

use crate::error::{EbicsError, Result};

pub const H004_NS: &str = "urn:org:ebics:H004";
pub const S001_NS: &str = "http://www.ebics.org/S001";
pub const H000_NS: &str = "http://www.ebics.org/H000";
pub const DSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
pub const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub prefix: Option<String>,
    pub name: String,
    pub value: String,
}

/// An `xmlns` (prefix `None`) or `xmlns:prefix` declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    pub prefix: Option<String>,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    pub prefix: Option<String>,
    pub name: String,
    pub namespaces: Vec<Namespace>,
    pub attributes: Vec<Attribute>,
    pub children: Vec<Node>,
    /// Namespace URI the prefix resolves to, filled in when a [`Document`] is built.
    resolved_ns: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub root: Element,
}

impl Document {
    pub fn new(mut root: Element) -> Self {
        resolve_namespaces(&mut root, &mut Vec::new());
        Document { root }
    }

    /// Parses and checks that every used prefix is declared.
    pub fn parse(xml: &str) -> Result<Document> {
        let root = parser::parse(xml)?;
        let mut scope = Scope::default();
        check_prefixes(&root, &mut scope)?;
        Ok(Document::new(root))
    }

    pub fn to_xml(&self) -> String {
        writer::write_document(self)
    }

    /// Namespace URI of the root element.
    pub fn root_namespace(&self) -> Option<&str> {
        let prefix = self.root.prefix.as_deref();
        self.root
            .namespaces
            .iter()
            .find(|ns| ns.prefix.as_deref() == prefix)
            .map(|ns| ns.uri.as_str())
            .filter(|uri| !uri.is_empty())
    }

    /// Fails with `InvalidXml` unless the root is `name` in namespace `ns`.
    pub fn expect_root(&self, ns: &str, name: &str) -> Result<&Element> {
        if self.root.name != name || self.root_namespace() != Some(ns) {
            return Err(EbicsError::InvalidXml(format!(
                "expected root {{{ns}}}{name}, found {{{}}}{}",
                self.root_namespace().unwrap_or(""),
                self.root.name
            )));
        }
        Ok(&self.root)
    }
}

fn resolve_namespaces(element: &mut Element, bindings: &mut Vec<(Option<String>, String)>) {
    let mark = bindings.len();
    bindings.extend(element.namespaces.iter().map(|ns| (ns.prefix.clone(), ns.uri.clone())));
    element.resolved_ns = match element.prefix.as_deref() {
        Some("xml") => Some(XML_NS.to_string()),
        prefix => bindings
            .iter()
            .rev()
            .find(|(p, _)| p.as_deref() == prefix)
            .map(|(_, uri)| uri.clone())
            .filter(|uri| !uri.is_empty()),
    };
    for child in element.elements_mut() {
        resolve_namespaces(child, bindings);
    }
    bindings.truncate(mark);
}

fn check_prefixes<'a>(element: &'a Element, scope: &mut Scope<'a>) -> Result<()> {
    let mark = scope.enter(element);
    if let Some(prefix) = element.prefix.as_deref() {
        scope.resolve_prefix(prefix)?;
    }
    for attr in &element.attributes {
        if let Some(prefix) = attr.prefix.as_deref() {
            scope.resolve_prefix(prefix)?;
        }
    }
    for child in element.elements() {
        check_prefixes(child, scope)?;
    }
    scope.leave(mark);
    Ok(())
}

impl Element {
    pub fn new(name: &str) -> Self {
        Element {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn prefixed(prefix: &str, name: &str) -> Self {
        Element {
            prefix: Some(prefix.to_string()),
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// `<name>text</name>`
    pub fn text_element(name: &str, text: impl Into<String>) -> Self {
        Element::new(name).with_text(text)
    }

    pub fn with_namespace(mut self, prefix: Option<&str>, uri: &str) -> Self {
        self.namespaces.push(Namespace {
            prefix: prefix.map(str::to_string),
            uri: uri.to_string(),
        });
        self
    }

    pub fn with_attr(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(Node::Text(text.into()));
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(Node::Element(child));
        self
    }

    pub fn with_opt_child(self, child: Option<Element>) -> Self {
        match child {
            Some(child) => self.with_child(child),
            None => self,
        }
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = Element>) -> Self {
        self.children.extend(children.into_iter().map(Node::Element));
        self
    }

    pub fn qualified_name(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}:{}", self.name),
            None => self.name.clone(),
        }
    }

    /// Value of an unprefixed attribute.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.prefix.is_none() && a.name == name)
            .map(|a| a.value.as_str())
    }

    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .attributes
            .iter_mut()
            .find(|a| a.prefix.is_none() && a.name == name)
        {
            Some(attr) => attr.value = value,
            None => self.attributes.push(Attribute {
                prefix: None,
                name: name.to_string(),
                value,
            }),
        }
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    pub fn elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(|node| match node {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    /// First child element with the given local name.
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.elements().find(|e| e.name == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.elements_mut().find(|e| e.name == name)
    }

    /// Concatenated character data of the direct children.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                Node::Text(t) => Some(t.as_str()),
                Node::Element(_) => None,
            })
            .collect()
    }

    /// Text with surrounding whitespace removed, as used by all simple typed values.
    pub fn trimmed_text(&self) -> String {
        self.text().trim().to_string()
    }

    /// All elements of this subtree, including `self`, in document order.
    pub fn descendants(&self) -> Vec<&Element> {
        let mut found = vec![self];
        for child in self.elements() {
            found.extend(child.descendants());
        }
        found
    }

    /// Namespace URI of this element within its document.
    pub fn namespace(&self) -> Option<&str> {
        self.resolved_ns.as_deref()
    }

    /// Walks into children by local name and checks there are no unexpected elements.
    /// Typed decoders use this to enforce the schema's element order. Children are
    /// expected in the namespace of `self` unless asked for with [`ChildCursor::required_in`].
    pub fn cursor(&self) -> ChildCursor<'_> {
        ChildCursor {
            parent: self,
            items: self.elements().collect(),
            pos: 0,
        }
    }
}

/// Sequential reader over the child elements of one element, following an `xs:sequence`.
pub struct ChildCursor<'a> {
    parent: &'a Element,
    items: Vec<&'a Element>,
    pos: usize,
}

impl<'a> ChildCursor<'a> {
    pub fn optional(&mut self, name: &str) -> Option<&'a Element> {
        let parent = self.parent;
        self.optional_in(parent.namespace(), name)
    }

    pub fn required(&mut self, name: &str) -> Result<&'a Element> {
        let parent = self.parent;
        self.required_in(parent.namespace(), name)
    }

    /// Next child if it is `name` in namespace `ns`.
    pub fn optional_in(&mut self, ns: Option<&str>, name: &str) -> Option<&'a Element> {
        match self.items.get(self.pos).copied() {
            Some(e) if e.name == name && e.namespace() == ns => {
                self.pos += 1;
                Some(e)
            }
            _ => None,
        }
    }

    pub fn required_in(&mut self, ns: Option<&str>, name: &str) -> Result<&'a Element> {
        self.optional_in(ns, name).ok_or_else(|| {
            EbicsError::InvalidXml(format!(
                "<{}> misses required {{{}}}{}{}",
                self.parent.name,
                ns.unwrap_or(""),
                name,
                match self.items.get(self.pos) {
                    Some(found) => format!(", found {{{}}}{}", found.namespace().unwrap_or(""), found.name),
                    None => String::new(),
                }
            ))
        })
    }

    pub fn optional_text(&mut self, name: &str) -> Option<String> {
        self.optional(name).map(Element::trimmed_text)
    }

    pub fn required_text(&mut self, name: &str) -> Result<String> {
        self.required(name).map(Element::trimmed_text)
    }

    pub fn repeated(&mut self, name: &str) -> Vec<&'a Element> {
        let mut found = Vec::new();
        while let Some(e) = self.optional(name) {
            found.push(e);
        }
        found
    }

    /// Skips elements of an extension point, whatever their namespace.
    pub fn skip(&mut self, name: &str) {
        while self.items.get(self.pos).is_some_and(|e| e.name == name) {
            self.pos += 1;
        }
    }

    pub fn finish(self) -> Result<()> {
        match self.items.get(self.pos) {
            None => Ok(()),
            Some(unexpected) => Err(EbicsError::InvalidXml(format!(
                "unexpected <{}> in <{}>",
                unexpected.name, self.parent.name
            ))),
        }
    }
}

/// In-scope namespace bindings while walking a tree.
#[derive(Default, Clone)]
pub struct Scope<'a> {
    bindings: Vec<(Option<&'a str>, &'a str)>,
}

impl<'a> Scope<'a> {
    /// Adds the declarations of `element`; returns the mark for [`Scope::leave`].
    pub fn enter(&mut self, element: &'a Element) -> usize {
        let mark = self.bindings.len();
        for ns in &element.namespaces {
            self.bindings.push((ns.prefix.as_deref(), ns.uri.as_str()));
        }
        mark
    }

    pub fn leave(&mut self, mark: usize) {
        self.bindings.truncate(mark);
    }

    pub fn resolve(&self, prefix: Option<&str>) -> Option<&'a str> {
        if prefix == Some("xml") {
            return Some(XML_NS);
        }
        self.bindings
            .iter()
            .rev()
            .find(|(p, _)| *p == prefix)
            .map(|(_, uri)| *uri)
            .filter(|uri| !uri.is_empty())
    }

    fn resolve_prefix(&self, prefix: &str) -> Result<&'a str> {
        self.resolve(Some(prefix))
            .ok_or_else(|| EbicsError::InvalidXml(format!("undeclared namespace prefix '{prefix}'")))
    }

    /// Latest binding per prefix, default namespace first and prefixes sorted.
    pub fn in_scope(&self) -> std::collections::BTreeMap<Option<&'a str>, &'a str> {
        let mut map = std::collections::BTreeMap::new();
        for (prefix, uri) in &self.bindings {
            map.insert(*prefix, *uri);
        }
        map
    }

    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.resolve(Some(prefix)).is_some()
    }
}
