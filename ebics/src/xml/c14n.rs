//! Canonical XML 1.0 (http://www.w3.org/TR/2001/REC-xml-c14n-20010315), without comments.
//!
//! Only node-sets made of complete subtrees are supported, which is all EBICS needs:
//! the `authenticate="true"` elements with their descendants, and `ds:SignedInfo`.
//! Each apex element carries every namespace in scope at its position in the document,
//! descendants only the declarations that change something.

use std::collections::BTreeMap;

use super::writer::{escape_attribute, escape_text};
use super::{Element, Node, Scope};
use crate::error::{EbicsError, Result};

type Rendered<'a> = BTreeMap<Option<&'a str>, &'a str>;

/// Canonical form of the whole tree below (and including) `root`.
pub fn canonicalize(root: &Element) -> Result<String> {
    canonicalize_subsets(root, |e| std::ptr::eq(e, root))
}

/// Canonicalizes, in document order, every subtree of `root` whose top element satisfies
/// `is_apex`, and concatenates the results. Subtrees nested in a selected one are output
/// only once, as part of their ancestor.
pub fn canonicalize_subsets<F>(root: &Element, is_apex: F) -> Result<String>
where
    F: Fn(&Element) -> bool,
{
    let mut out = String::new();
    let mut scope = Scope::default();
    walk(root, &mut scope, &is_apex, &mut out)?;
    Ok(out)
}

fn walk<'a>(
    element: &'a Element,
    scope: &mut Scope<'a>,
    is_apex: &dyn Fn(&Element) -> bool,
    out: &mut String,
) -> Result<()> {
    let mark = scope.enter(element);
    if is_apex(element) {
        write_canonical(element, scope, &Rendered::new(), out)?;
    } else {
        for child in element.elements() {
            walk(child, scope, is_apex, out)?;
        }
    }
    scope.leave(mark);
    Ok(())
}

fn write_canonical<'a>(
    element: &'a Element,
    scope: &mut Scope<'a>,
    rendered: &Rendered<'a>,
    out: &mut String,
) -> Result<()> {
    let in_scope = scope.in_scope();
    let name = element.qualified_name();

    out.push('<');
    out.push_str(&name);

    // BTreeMap order: default namespace first, then by prefix
    for (prefix, uri) in &in_scope {
        match prefix {
            None => {
                let parent = rendered.get(&None).copied().unwrap_or("");
                if *uri != parent {
                    out.push_str(" xmlns=\"");
                    escape_attribute(uri, out);
                    out.push('"');
                }
            }
            Some("xml") => {}
            Some(prefix) => {
                if !uri.is_empty() && rendered.get(&Some(*prefix)) != Some(uri) {
                    out.push_str(" xmlns:");
                    out.push_str(prefix);
                    out.push_str("=\"");
                    escape_attribute(uri, out);
                    out.push('"');
                }
            }
        }
    }

    let mut attributes = Vec::with_capacity(element.attributes.len());
    for attr in &element.attributes {
        let uri = match attr.prefix.as_deref() {
            None => "",
            Some(prefix) => scope.resolve(Some(prefix)).ok_or_else(|| {
                EbicsError::InvalidXml(format!("undeclared namespace prefix '{prefix}'"))
            })?,
        };
        attributes.push((uri, attr));
    }
    attributes.sort_by(|(uri_a, a), (uri_b, b)| (uri_a, &a.name).cmp(&(uri_b, &b.name)));

    for (_, attr) in attributes {
        out.push(' ');
        if let Some(prefix) = &attr.prefix {
            out.push_str(prefix);
            out.push(':');
        }
        out.push_str(&attr.name);
        out.push_str("=\"");
        escape_attribute(&attr.value, out);
        out.push('"');
    }
    out.push('>');

    for child in &element.children {
        match child {
            Node::Element(e) => {
                let mark = scope.enter(e);
                write_canonical(e, scope, &in_scope, out)?;
                scope.leave(mark);
            }
            Node::Text(t) => escape_text(t, out),
        }
    }

    out.push_str("</");
    out.push_str(&name);
    out.push('>');
    Ok(())
}
