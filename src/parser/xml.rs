//! Minimal element tree built from `quick-xml` events.
//!
//! Element and attribute names are reduced to their local part and
//! namespace declarations are dropped, so lookups behave the same for
//! documents written with or without a default namespace.
//!
//! The tree is built with an explicit stack, never by recursion. Nesting
//! is capped at [`MAX_ELEMENT_DEPTH`]; deeper documents are rejected as
//! malformed so that dropping or walking a loaded tree stays bounded.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use super::{ParseError, ParseResult};

/// Deepest element nesting accepted in a document.
pub const MAX_ELEMENT_DEPTH: usize = 1024;

/// One element of a loaded document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlElement>,
    /// Text and CDATA directly inside this element.
    pub text: String,
}

impl XmlElement {
    /// Value of the attribute with the given local name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// First direct child with the given name.
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    /// All descendants matching a `/`-separated relative path.
    ///
    /// `select("ResultFiles/ResultFile")` returns every `ResultFile` under
    /// every `ResultFiles` child, in document order.
    pub fn select(&self, path: &str) -> Vec<&XmlElement> {
        let mut current = vec![self];
        for step in path.split('/').filter(|s| !s.is_empty()) {
            current = current
                .into_iter()
                .flat_map(|element| element.children.iter().filter(move |c| c.name == step))
                .collect();
            if current.is_empty() {
                break;
            }
        }
        current
    }

    /// First descendant matching a relative path.
    pub fn select_first(&self, path: &str) -> Option<&XmlElement> {
        let mut current = self;
        for step in path.split('/').filter(|s| !s.is_empty()) {
            current = current.child(step)?;
        }
        Some(current)
    }

    /// Concatenated text of this element and its descendants.
    pub fn inner_text(&self) -> String {
        let mut out = String::new();
        let mut stack = vec![self];
        while let Some(element) = stack.pop() {
            out.push_str(&element.text);
            stack.extend(element.children.iter().rev());
        }
        out
    }
}

/// Decodes raw document bytes.
///
/// UTF-8 (with or without a byte order mark) and UTF-16 with a byte order
/// mark are accepted; anything else is malformed.
pub fn decode_document(bytes: &[u8]) -> ParseResult<String> {
    let (units, big_endian) = match bytes {
        [0xFF, 0xFE, rest @ ..] => (rest, false),
        [0xFE, 0xFF, rest @ ..] => (rest, true),
        _ => {
            let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
            return String::from_utf8(bytes.to_vec())
                .map_err(|e| ParseError::Malformed(format!("document is not UTF-8: {}", e)));
        }
    };

    if units.len() % 2 != 0 {
        return Err(ParseError::Malformed(
            "UTF-16 document has an odd byte count".to_string(),
        ));
    }
    let units: Vec<u16> = units
        .chunks_exact(2)
        .map(|pair| {
            let pair = [pair[0], pair[1]];
            if big_endian {
                u16::from_be_bytes(pair)
            } else {
                u16::from_le_bytes(pair)
            }
        })
        .collect();
    String::from_utf16(&units)
        .map_err(|e| ParseError::Malformed(format!("invalid UTF-16 document: {}", e)))
}

/// Parses a whole document and returns its root element.
pub fn parse_document(content: &str) -> ParseResult<XmlElement> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let mut reader = Reader::from_str(content);

    let xml_error = |reader: &Reader<&[u8]>, e: &dyn std::fmt::Display| ParseError::Xml {
        position: reader.buffer_position() as u64,
        message: e.to_string(),
    };

    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        let event = reader.read_event().map_err(|e| xml_error(&reader, &e))?;
        match event {
            Event::Start(start) => {
                if stack.len() >= MAX_ELEMENT_DEPTH {
                    return Err(ParseError::Malformed(format!(
                        "elements nested deeper than {} levels",
                        MAX_ELEMENT_DEPTH
                    )));
                }
                let element = open_element(&start).map_err(|e| xml_error(&reader, &e))?;
                stack.push(element);
            }
            Event::Empty(start) => {
                let element = open_element(&start).map_err(|e| xml_error(&reader, &e))?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| ParseError::Malformed("unbalanced end tag".to_string()))?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(text) => {
                if let Some(current) = stack.last_mut() {
                    let text = text.unescape().map_err(|e| xml_error(&reader, &e))?;
                    current.text.push_str(&text);
                }
            }
            Event::CData(data) => {
                if let Some(current) = stack.last_mut() {
                    current
                        .text
                        .push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(ParseError::Malformed(format!(
            "document ended inside <{}>",
            stack.last().map(|e| e.name.as_str()).unwrap_or_default()
        )));
    }

    root.ok_or(ParseError::MissingRoot)
}

fn open_element(start: &BytesStart<'_>) -> Result<XmlElement, quick_xml::Error> {
    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let key = attr.key.as_ref();
        if key == b"xmlns" || key.starts_with(b"xmlns:") {
            continue;
        }
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        attributes.push((key, value));
    }
    Ok(XmlElement {
        name,
        attributes,
        children: Vec::new(),
        text: String::new(),
    })
}

fn attach(
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    element: XmlElement,
) -> ParseResult<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => {
            return Err(ParseError::Malformed(format!(
                "second root element <{}>",
                element.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_is_normalized() {
        let doc = parse_document(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<TestRun xmlns="http://microsoft.com/schemas/VisualStudio/TeamTest/2010" id="1">
  <x:Times xmlns:x="urn:x" x:start="2020-01-01T00:00:00Z" />
</TestRun>"#,
        )
        .unwrap();

        assert_eq!(doc.name, "TestRun");
        assert_eq!(doc.attributes, vec![("id".to_string(), "1".to_string())]);
        let times = doc.child("Times").unwrap();
        assert_eq!(times.attr("start"), Some("2020-01-01T00:00:00Z"));
    }

    #[test]
    fn test_select_paths_and_text() {
        let doc = parse_document(
            "<R><Out><Err><Msg>boom &amp; bust</Msg><Msg><![CDATA[<raw>]]></Msg></Err></Out></R>",
        )
        .unwrap();

        let messages = doc.select("Out/Err/Msg");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].inner_text(), "boom & bust");
        assert_eq!(messages[1].inner_text(), "<raw>");
        assert!(doc.select_first("Out/Missing").is_none());
        assert_eq!(doc.select_first("Out").unwrap().inner_text(), "boom & bust<raw>");
    }

    #[test]
    fn test_malformed_documents() {
        assert!(parse_document("").is_err());
        assert!(parse_document("<a><b></a>").is_err());
        assert!(parse_document("<a>").is_err());
        assert!(parse_document("<a/><b/>").is_err());
    }

    #[test]
    fn test_nesting_depth_is_capped() {
        let within = format!(
            "{}{}",
            "<x>".repeat(MAX_ELEMENT_DEPTH),
            "</x>".repeat(MAX_ELEMENT_DEPTH)
        );
        assert!(parse_document(&within).is_ok());

        let deep = format!("<TestRun>{}", "<x>".repeat(200_000));
        let err = parse_document(&deep).unwrap_err();
        assert!(matches!(err, ParseError::Malformed(_)));
    }

    #[test]
    fn test_decode_document_encodings() {
        assert_eq!(decode_document(b"<a/>").unwrap(), "<a/>");
        assert_eq!(decode_document(b"\xEF\xBB\xBF<a/>").unwrap(), "<a/>");

        let mut le = vec![0xFF, 0xFE];
        le.extend("<a/>".encode_utf16().flat_map(u16::to_le_bytes));
        assert_eq!(decode_document(&le).unwrap(), "<a/>");

        let mut be = vec![0xFE, 0xFF];
        be.extend("<a/>".encode_utf16().flat_map(u16::to_be_bytes));
        assert_eq!(decode_document(&be).unwrap(), "<a/>");

        assert!(matches!(
            decode_document(&[0x3C, 0xFF, 0x3E]),
            Err(ParseError::Malformed(_))
        ));
        assert!(decode_document(&[0xFF, 0xFE, 0x3C]).is_err());
    }

    #[test]
    fn test_byte_order_mark_is_skipped() {
        let doc = parse_document("\u{feff}<TestRun/>").unwrap();
        assert_eq!(doc.name, "TestRun");
    }
}
