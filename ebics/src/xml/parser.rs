use log::debug;
use xmlparser::{ElementEnd, StrSpan, Token, Tokenizer};

use super::{Attribute, Element, Namespace, Node};
use crate::error::{EbicsError, Result};

fn invalid(message: impl Into<String>) -> EbicsError {
    EbicsError::InvalidXml(message.into())
}

fn prefix_of(span: &StrSpan) -> Option<String> {
    if span.as_str().is_empty() {
        None
    } else {
        Some(span.as_str().to_string())
    }
}

/// Builds the element tree from the xmlparser token stream.
pub(super) fn parse(xml: &str) -> Result<Element> {
    // the element whose start tag is being read (attributes still arriving)
    let mut pending: Option<Element> = None;
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    for token in Tokenizer::from(xml) {
        let token = token.map_err(|e| invalid(format!("error parsing XML: {e}")))?;
        match token {
            Token::ElementStart { prefix, local, .. } => {
                if root.is_some() {
                    return Err(invalid("content after the root element"));
                }
                pending = Some(Element {
                    prefix: prefix_of(&prefix),
                    name: local.as_str().to_string(),
                    ..Default::default()
                });
            }
            Token::Attribute {
                prefix, local, value, ..
            } => {
                let element = pending
                    .as_mut()
                    .ok_or_else(|| invalid("attribute outside of a start tag"))?;
                let value = unescape(&normalize_attribute(value.as_str()))?;
                match (prefix.as_str(), local.as_str()) {
                    ("", "xmlns") => element.namespaces.push(Namespace { prefix: None, uri: value }),
                    ("xmlns", declared) => element.namespaces.push(Namespace {
                        prefix: Some(declared.to_string()),
                        uri: value,
                    }),
                    _ => {
                        let prefix = prefix_of(&prefix);
                        if element
                            .attributes
                            .iter()
                            .any(|a| a.prefix == prefix && a.name == local.as_str())
                        {
                            return Err(invalid(format!("duplicate attribute {}", local.as_str())));
                        }
                        element.attributes.push(Attribute {
                            prefix,
                            name: local.as_str().to_string(),
                            value,
                        });
                    }
                }
            }
            Token::ElementEnd { end, .. } => match end {
                ElementEnd::Open => {
                    let element = pending.take().ok_or_else(|| invalid("unexpected '>'"))?;
                    stack.push(element);
                }
                ElementEnd::Empty => {
                    let element = pending.take().ok_or_else(|| invalid("unexpected '/>'"))?;
                    attach(element, &mut stack, &mut root);
                }
                ElementEnd::Close(prefix, local) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| invalid(format!("unmatched </{}>", local.as_str())))?;
                    if element.prefix != prefix_of(&prefix) || element.name != local.as_str() {
                        return Err(invalid(format!(
                            "</{}> closes <{}>",
                            local.as_str(),
                            element.qualified_name()
                        )));
                    }
                    attach(element, &mut stack, &mut root);
                }
            },
            Token::Text { text } => {
                let text = unescape(&normalize_newlines(text.as_str()))?;
                push_text(&mut stack, text)?;
            }
            Token::Cdata { text, .. } => {
                push_text(&mut stack, normalize_newlines(text.as_str()))?;
            }
            Token::DtdStart { .. } | Token::EmptyDtd { .. } | Token::EntityDeclaration { .. } => {
                return Err(invalid("document type declarations are not accepted"));
            }
            Token::Comment { .. } | Token::ProcessingInstruction { .. } | Token::Declaration { .. } => {
                debug!("skipping comment, declaration or processing instruction");
            }
            Token::DtdEnd { .. } => {}
        }
    }

    if !stack.is_empty() || pending.is_some() {
        return Err(invalid("unexpected end of document"));
    }
    root.ok_or_else(|| invalid("document has no root element"))
}

fn attach(element: Element, stack: &mut [Element], root: &mut Option<Element>) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(Node::Element(element)),
        None => *root = Some(element),
    }
}

fn push_text(stack: &mut [Element], text: String) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => {
            if let Some(Node::Text(previous)) = parent.children.last_mut() {
                previous.push_str(&text);
            } else {
                parent.children.push(Node::Text(text));
            }
            Ok(())
        }
        None if text.trim().is_empty() => Ok(()),
        None => Err(invalid("text outside of the root element")),
    }
}

/// XML 1.0 end-of-line handling: CRLF and lone CR become LF.
fn normalize_newlines(raw: &str) -> String {
    raw.replace("\r\n", "\n").replace('\r', "\n")
}

/// Attribute value normalization for CDATA attributes (literal whitespace becomes a
/// space; character references are resolved afterwards and keep their value).
fn normalize_attribute(raw: &str) -> String {
    normalize_newlines(raw).replace(['\n', '\t'], " ")
}

/// Resolves the predefined entities and character references.
pub(super) fn unescape(raw: &str) -> Result<String> {
    if !raw.contains('&') {
        return Ok(raw.to_string());
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let end = rest[start..]
            .find(';')
            .ok_or_else(|| invalid("unterminated entity reference"))?
            + start;
        let entity = &rest[start + 1..end];
        match entity {
            "lt" => out.push('<'),
            "gt" => out.push('>'),
            "amp" => out.push('&'),
            "quot" => out.push('"'),
            "apos" => out.push('\''),
            _ => {
                let code = if let Some(hex) = entity.strip_prefix("#x") {
                    u32::from_str_radix(hex, 16).ok()
                } else if let Some(dec) = entity.strip_prefix('#') {
                    dec.parse::<u32>().ok()
                } else {
                    None
                };
                let c = code
                    .and_then(char::from_u32)
                    .ok_or_else(|| invalid(format!("unknown entity &{entity};")))?;
                out.push(c);
            }
        }
        rest = &rest[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}
