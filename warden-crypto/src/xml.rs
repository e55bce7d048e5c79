//! Minimal XML element tree with a canonical serialization.
//!
//! Descriptors and key-ring entries persist as XML elements that travel
//! through pluggable repositories and at-rest encryptors, so the model here
//! is a plain owned tree rather than a streaming parser. Serialization is
//! canonical: attributes in insertion order, explicit end tags, no
//! insignificant whitespace. Parsing a canonical document and re-serializing
//! it yields byte-identical output.

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::ConfigurationError;

/// A child of an element: nested element or character data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
}

/// An owned XML element: name, attributes, children.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct XmlElement {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<XmlNode>,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // -- builders ----------------------------------------------------------

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attribute(name, value);
        self
    }

    pub fn with_child(mut self, child: XmlElement) -> Self {
        self.children.push(XmlNode::Element(child));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(XmlNode::Text(text.into()));
        self
    }

    // -- accessors ---------------------------------------------------------

    /// Set or replace an attribute.
    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if let Some(existing) = self.attributes.iter_mut().find(|(n, _)| *n == name) {
            existing.1 = value;
        } else {
            self.attributes.push((name, value));
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Attributes in document order.
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn add_child(&mut self, child: XmlElement) {
        self.children.push(XmlNode::Element(child));
    }

    pub fn nodes(&self) -> &[XmlNode] {
        &self.children
    }

    pub fn nodes_mut(&mut self) -> &mut Vec<XmlNode> {
        &mut self.children
    }

    /// Child elements, in document order.
    pub fn child_elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|node| match node {
            XmlNode::Element(el) => Some(el),
            XmlNode::Text(_) => None,
        })
    }

    /// First child element with the given name.
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.child_elements().find(|el| el.name == name)
    }

    /// Concatenated direct character data.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for node in &self.children {
            if let XmlNode::Text(text) = node {
                out.push_str(text);
            }
        }
        out
    }

    // -- (de)serialization -------------------------------------------------

    /// Parse a document into its root element.
    ///
    /// Comments, processing instructions and the XML declaration are
    /// skipped; whitespace-only text nodes are dropped so hand-indented
    /// documents parse to the same tree as canonical ones.
    pub fn parse(xml: &str) -> Result<XmlElement, ConfigurationError> {
        let mut reader = Reader::from_str(xml);
        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root: Option<XmlElement> = None;

        loop {
            let event = reader
                .read_event()
                .map_err(|e| ConfigurationError::new(format!("malformed XML: {}", e)))?;
            match event {
                Event::Start(start) => {
                    stack.push(element_from_start(&start)?);
                }
                Event::Empty(start) => {
                    let element = element_from_start(&start)?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| ConfigurationError::new("malformed XML: stray end tag"))?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::Text(text) => {
                    let text = text
                        .unescape()
                        .map_err(|e| ConfigurationError::new(format!("malformed XML: {}", e)))?;
                    if text.trim().is_empty() {
                        continue;
                    }
                    let parent = stack.last_mut().ok_or_else(|| {
                        ConfigurationError::new("malformed XML: text outside the root element")
                    })?;
                    parent.children.push(XmlNode::Text(text.into_owned()));
                }
                Event::CData(cdata) => {
                    let bytes = cdata.into_inner();
                    let text = std::str::from_utf8(&bytes)
                        .map_err(|_| ConfigurationError::new("malformed XML: non-UTF-8 CDATA"))?;
                    let parent = stack.last_mut().ok_or_else(|| {
                        ConfigurationError::new("malformed XML: CDATA outside the root element")
                    })?;
                    parent.children.push(XmlNode::Text(text.to_string()));
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(ConfigurationError::new("malformed XML: unclosed element"));
        }
        root.ok_or_else(|| ConfigurationError::new("malformed XML: no root element"))
    }

    /// Serialize canonically.
    pub fn to_xml_string(&self) -> Result<String, ConfigurationError> {
        let mut writer = Writer::new(Vec::new());
        write_element(&mut writer, self)?;
        String::from_utf8(writer.into_inner())
            .map_err(|_| ConfigurationError::new("serialized XML is not UTF-8"))
    }
}

fn attach(
    stack: &mut Vec<XmlElement>,
    root: &mut Option<XmlElement>,
    element: XmlElement,
) -> Result<(), ConfigurationError> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(XmlNode::Element(element));
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(element);
            Ok(())
        }
        None => Err(ConfigurationError::new(
            "malformed XML: multiple root elements",
        )),
    }
}

fn element_from_start(start: &BytesStart<'_>) -> Result<XmlElement, ConfigurationError> {
    let name = std::str::from_utf8(start.name().as_ref())
        .map_err(|_| ConfigurationError::new("malformed XML: non-UTF-8 element name"))?
        .to_string();
    let mut element = XmlElement::new(name);
    for attribute in start.attributes() {
        let attribute =
            attribute.map_err(|e| ConfigurationError::new(format!("malformed XML: {}", e)))?;
        let key = std::str::from_utf8(attribute.key.as_ref())
            .map_err(|_| ConfigurationError::new("malformed XML: non-UTF-8 attribute name"))?
            .to_string();
        let value = attribute
            .unescape_value()
            .map_err(|e| ConfigurationError::new(format!("malformed XML: {}", e)))?
            .into_owned();
        element.attributes.push((key, value));
    }
    Ok(element)
}

fn write_element(
    writer: &mut Writer<Vec<u8>>,
    element: &XmlElement,
) -> Result<(), ConfigurationError> {
    let mut start = BytesStart::new(element.name.as_str());
    for (name, value) in &element.attributes {
        start.push_attribute((name.as_str(), value.as_str()));
    }
    writer
        .write_event(Event::Start(start))
        .map_err(|_| ConfigurationError::new("failed to serialize XML"))?;
    for node in &element.children {
        match node {
            XmlNode::Element(child) => write_element(writer, child)?,
            XmlNode::Text(text) => writer
                .write_event(Event::Text(BytesText::new(text)))
                .map_err(|_| ConfigurationError::new("failed to serialize XML"))?,
        }
    }
    writer
        .write_event(Event::End(BytesEnd::new(element.name.as_str())))
        .map_err(|_| ConfigurationError::new("failed to serialize XML"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_and_serialize() {
        let element = XmlElement::new("key")
            .with_attribute("id", "abc")
            .with_child(XmlElement::new("creationDate").with_text("2026-01-01T00:00:00Z"));
        assert_eq!(
            element.to_xml_string().unwrap(),
            "<key id=\"abc\"><creationDate>2026-01-01T00:00:00Z</creationDate></key>"
        );
    }

    #[test]
    fn parse_serialize_is_idempotent() {
        let xml = "<key id=\"abc\" version=\"1\"><descriptor deserializerType=\"x\">\
                   <value>aGVsbG8=</value></descriptor></key>";
        let first = XmlElement::parse(xml).unwrap();
        let serialized = first.to_xml_string().unwrap();
        assert_eq!(serialized, xml);
        let second = XmlElement::parse(&serialized).unwrap();
        assert_eq!(first, second);
        assert_eq!(second.to_xml_string().unwrap(), xml);
    }

    #[test]
    fn indented_input_parses_to_canonical_tree() {
        let pretty = "<key id=\"abc\">\n  <creationDate>t</creationDate>\n</key>";
        let canonical = "<key id=\"abc\"><creationDate>t</creationDate></key>";
        let a = XmlElement::parse(pretty).unwrap();
        let b = XmlElement::parse(canonical).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_xml_string().unwrap(), canonical);
    }

    #[test]
    fn self_closing_elements_parse() {
        let element = XmlElement::parse("<revocation><key id=\"*\"/></revocation>").unwrap();
        assert_eq!(element.child("key").unwrap().attribute("id"), Some("*"));
    }

    #[test]
    fn text_is_escaped_on_write() {
        let element = XmlElement::new("reason").with_text("a < b && c");
        let xml = element.to_xml_string().unwrap();
        let restored = XmlElement::parse(&xml).unwrap();
        assert_eq!(restored.text(), "a < b && c");
    }

    #[test]
    fn attribute_values_are_escaped() {
        let element = XmlElement::new("e").with_attribute("name", "\"quoted\" & <angled>");
        let xml = element.to_xml_string().unwrap();
        let restored = XmlElement::parse(&xml).unwrap();
        assert_eq!(restored.attribute("name"), Some("\"quoted\" & <angled>"));
    }

    #[test]
    fn rejects_malformed_documents() {
        assert!(XmlElement::parse("").is_err());
        assert!(XmlElement::parse("<a><b></a>").is_err());
        assert!(XmlElement::parse("<a></a><b></b>").is_err());
    }

    #[test]
    fn set_attribute_replaces() {
        let mut element = XmlElement::new("e");
        element.set_attribute("k", "1");
        element.set_attribute("k", "2");
        assert_eq!(element.attribute("k"), Some("2"));
        assert_eq!(element.to_xml_string().unwrap(), "<e k=\"2\"></e>");
    }
}
