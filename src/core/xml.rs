//! Minimal XML tree for DPS documents.
//!
//! Only what the national layout needs: elements in a default namespace
//! (prefixed names are rejected, the authority refuses them anyway), attributes
//! without namespace, and text. Serialization and parsing go through
//! `quick-xml`; Exclusive XML Canonicalization 1.0 (without comments) is done
//! here since the tree shape makes it a straight walk.

use crate::utils::error::{EmissorError, Result};
use quick_xml::events::attributes::Attribute;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::name::QName;
use quick_xml::{Reader, Writer};
use std::borrow::Cow;

pub const XMLDSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    pub namespace: Option<String>,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
}

impl XmlElement {
    pub fn new(name: &str, namespace: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.map(str::to_string),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, name: &str, value: &str) -> Self {
        self.set_attribute(name, value);
        self
    }

    pub fn set_attribute(&mut self, name: &str, value: &str) {
        match self.attributes.iter_mut().find(|(k, _)| k == name) {
            Some((_, v)) => *v = value.to_string(),
            None => self.attributes.push((name.to_string(), value.to_string())),
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Appends an empty child in the same namespace and returns it.
    pub fn add_child(&mut self, name: &str) -> &mut XmlElement {
        let child = XmlElement::new(name, self.namespace.as_deref());
        self.push_element(child)
    }

    /// Appends `<name>text</name>` in the same namespace.
    pub fn add_text_child(&mut self, name: &str, text: impl Into<String>) -> &mut Self {
        let mut child = XmlElement::new(name, self.namespace.as_deref());
        child.children.push(XmlNode::Text(text.into()));
        self.children.push(XmlNode::Element(child));
        self
    }

    pub fn push_element(&mut self, element: XmlElement) -> &mut XmlElement {
        self.children.push(XmlNode::Element(element));
        match self.children.last_mut() {
            Some(XmlNode::Element(e)) => e,
            _ => unreachable!("element was just pushed"),
        }
    }

    pub fn push_text(&mut self, text: impl Into<String>) {
        self.children.push(XmlNode::Text(text.into()));
    }

    pub fn elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|c| match c {
            XmlNode::Element(e) => Some(e),
            XmlNode::Text(_) => None,
        })
    }

    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.elements().find(|e| e.name == name)
    }

    /// Concatenated direct text content.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|c| match c {
                XmlNode::Text(t) => Some(t.as_str()),
                XmlNode::Element(_) => None,
            })
            .collect()
    }

    /// Depth-first search over self and descendants.
    pub fn find(&self, name: &str) -> Option<&XmlElement> {
        if self.name == name {
            return Some(self);
        }
        self.elements().find_map(|e| e.find(name))
    }

    pub fn find_by_attribute(&self, attribute: &str, value: &str) -> Option<&XmlElement> {
        if self.attribute(attribute) == Some(value) {
            return Some(self);
        }
        self.elements()
            .find_map(|e| e.find_by_attribute(attribute, value))
    }

    /// Text of the first descendant named `name`.
    pub fn find_text(&self, name: &str) -> Option<String> {
        self.find(name).map(XmlElement::text)
    }

    fn is_signature(&self) -> bool {
        self.name == "Signature" && self.namespace.as_deref() == Some(XMLDSIG_NS)
    }
}

fn xml_err(e: impl std::fmt::Display) -> EmissorError {
    EmissorError::xml(e.to_string())
}

/// Serializes `root` with an XML declaration. No indentation is added, so
/// the output parses back to an identical tree.
pub fn to_document_string(root: &XmlElement) -> Result<String> {
    let mut writer = Writer::new(Vec::new());
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(xml_err)?;
    write_element(&mut writer, root, None)?;
    String::from_utf8(writer.into_inner()).map_err(xml_err)
}

fn write_element(
    writer: &mut Writer<Vec<u8>>,
    element: &XmlElement,
    parent_ns: Option<&str>,
) -> Result<()> {
    let mut start = BytesStart::new(element.name.as_str());
    let ns = element.namespace.as_deref();
    if ns != parent_ns {
        start.push_attribute(escaped_attribute("xmlns", ns.unwrap_or("")));
    }
    for (k, v) in &element.attributes {
        start.push_attribute(escaped_attribute(k, v));
    }
    writer.write_event(Event::Start(start)).map_err(xml_err)?;

    // CR is written as a character reference so that a parser's line-end
    // normalization leaves the signed text untouched.
    for child in &element.children {
        match child {
            XmlNode::Element(e) => write_element(writer, e, ns)?,
            XmlNode::Text(t) => writer
                .write_event(Event::Text(BytesText::from_escaped(escape_text(t))))
                .map_err(xml_err)?,
        }
    }

    writer
        .write_event(Event::End(BytesEnd::new(element.name.as_str())))
        .map_err(xml_err)
}

fn escaped_attribute<'a>(key: &'a str, value: &str) -> Attribute<'a> {
    Attribute {
        key: QName(key.as_bytes()),
        value: Cow::Owned(escape_attribute(value).into_bytes()),
    }
}

/// XML 1.0 end-of-line handling: CRLF and lone CR become LF.
fn normalize_line_ends(xml: &str) -> Cow<'_, str> {
    if xml.contains('\r') {
        Cow::Owned(xml.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        Cow::Borrowed(xml)
    }
}

/// Parses a document the way a conforming processor sees it, line ends
/// normalized before any character reference is resolved.
pub fn parse_document(xml: &str) -> Result<XmlElement> {
    let normalized = normalize_line_ends(xml);
    let mut reader = Reader::from_str(&normalized);
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(e) => {
                let parent_ns = stack.last().and_then(|p| p.namespace.as_deref());
                stack.push(start_element(&e, parent_ns)?);
            }
            Event::Empty(e) => {
                let parent_ns = stack.last().and_then(|p| p.namespace.as_deref());
                let element = start_element(&e, parent_ns)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| EmissorError::xml("unbalanced end tag"))?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(t) => {
                if let Some(current) = stack.last_mut() {
                    let text = t.unescape().map_err(xml_err)?;
                    current.push_text(text.into_owned());
                }
            }
            Event::CData(c) => {
                if let Some(current) = stack.last_mut() {
                    let text = String::from_utf8(c.into_inner().into_owned()).map_err(xml_err)?;
                    current.push_text(text);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(EmissorError::xml("document ended inside an element"));
    }
    root.ok_or_else(|| EmissorError::xml("document has no root element"))
}

fn start_element(start: &BytesStart<'_>, parent_ns: Option<&str>) -> Result<XmlElement> {
    let name = std::str::from_utf8(start.name().as_ref())
        .map_err(xml_err)?
        .to_string();
    if name.contains(':') {
        return Err(EmissorError::xml(format!(
            "prefixed element names are not supported: {}",
            name
        )));
    }

    let mut element = XmlElement::new(&name, parent_ns);
    for attr in start.attributes() {
        let attr = attr.map_err(xml_err)?;
        let key = std::str::from_utf8(attr.key.as_ref()).map_err(xml_err)?;
        let value = attr.unescape_value().map_err(xml_err)?.into_owned();
        if key == "xmlns" {
            element.namespace = if value.is_empty() { None } else { Some(value) };
        } else if key.starts_with("xmlns:") || key.contains(':') {
            return Err(EmissorError::xml(format!(
                "prefixed names are not supported: {}",
                key
            )));
        } else {
            element.attributes.push((key.to_string(), value));
        }
    }
    Ok(element)
}

fn attach(
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    element: XmlElement,
) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => {
            parent.push_element(element);
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(element);
            Ok(())
        }
        None => Err(EmissorError::xml("more than one root element")),
    }
}

/// Exclusive C14N of the subtree rooted at `element`, as if it were the
/// apex of the node-set: its namespace is declared on it, nothing above it
/// is rendered.
pub fn canonicalize(element: &XmlElement) -> String {
    let mut out = String::new();
    write_canonical(element, None, false, &mut out);
    out
}

/// Enveloped-signature transform followed by Exclusive C14N: any
/// `ds:Signature` inside the subtree is left out.
pub fn canonicalize_enveloped(element: &XmlElement) -> String {
    let mut out = String::new();
    write_canonical(element, None, true, &mut out);
    out
}

fn write_canonical(
    element: &XmlElement,
    rendered_ns: Option<&str>,
    skip_signature: bool,
    out: &mut String,
) {
    let ns = element.namespace.as_deref();
    out.push('<');
    out.push_str(&element.name);
    if ns != rendered_ns {
        out.push_str(" xmlns=\"");
        out.push_str(&escape_attribute(ns.unwrap_or("")));
        out.push('"');
    }

    let mut attributes: Vec<&(String, String)> = element.attributes.iter().collect();
    attributes.sort_by(|a, b| a.0.cmp(&b.0));
    for (k, v) in attributes {
        out.push(' ');
        out.push_str(k);
        out.push_str("=\"");
        out.push_str(&escape_attribute(v));
        out.push('"');
    }
    out.push('>');

    for child in &element.children {
        match child {
            XmlNode::Element(e) if skip_signature && e.is_signature() => {}
            XmlNode::Element(e) => write_canonical(e, ns, skip_signature, out),
            XmlNode::Text(t) => out.push_str(&escape_text(t)),
        }
    }

    out.push_str("</");
    out.push_str(&element.name);
    out.push('>');
}

fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            other => out.push(other),
        }
    }
    out
}

fn escape_attribute(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            other => out.push(other),
        }
    }
    out
}
