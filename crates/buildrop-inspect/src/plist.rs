//! Minimal XML property-list reader.
//!
//! Handles the subset of the Apple plist DTD that app bundles and
//! provisioning profiles use. Binary plists (`bplist00`) are rejected with
//! [`PlistError::Binary`]; callers treat that as "no metadata".

use std::collections::BTreeMap;

use quick_xml::Reader;
use quick_xml::events::Event;

/// Upper bound on nesting so a hostile document cannot exhaust the stack.
const MAX_DEPTH: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum PlistError {
    #[error("binary property lists are not supported")]
    Binary,

    #[error("property list is not valid UTF-8")]
    Encoding,

    #[error("property list contains no value")]
    Empty,

    #[error("malformed property list: {0}")]
    Malformed(String),

    #[error("XML error: {0}")]
    Xml(String),
}

fn xml_err(e: impl std::fmt::Display) -> PlistError {
    PlistError::Xml(e.to_string())
}

/// A parsed plist value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Integer(i64),
    Real(f64),
    Bool(bool),
    /// ISO-8601 text as it appeared in the document.
    Date(String),
    /// Base64 text, left undecoded.
    Data(String),
    Array(Vec<Value>),
    Dict(BTreeMap<String, Value>),
}

impl Value {
    pub fn get(&self, key: &str) -> Option<&Self> {
        match self {
            Self::Dict(map) => map.get(key),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub const fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Self]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<&str> {
        match self {
            Self::Date(s) => Some(s),
            _ => None,
        }
    }

    /// Non-empty string value under `key`, trimmed.
    pub fn string_at(&self, key: &str) -> Option<String> {
        self.get(key)
            .and_then(Self::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }
}

/// Parse an XML property list document.
pub fn parse(bytes: &[u8]) -> Result<Value, PlistError> {
    if bytes.starts_with(b"bplist") {
        return Err(PlistError::Binary);
    }
    let text = std::str::from_utf8(bytes).map_err(|_| PlistError::Encoding)?;
    let text = text.trim_start_matches('\u{feff}');

    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(e) if e.name().as_ref() == b"plist" => {}
            Event::Start(e) => return read_value(&mut reader, e.name().as_ref(), 0),
            Event::Empty(e) => return empty_value(e.name().as_ref()),
            Event::Eof => return Err(PlistError::Empty),
            _ => {}
        }
    }
}

fn empty_value(tag: &[u8]) -> Result<Value, PlistError> {
    Ok(match tag {
        b"true" => Value::Bool(true),
        b"false" => Value::Bool(false),
        b"string" => Value::String(String::new()),
        b"data" => Value::Data(String::new()),
        b"array" => Value::Array(Vec::new()),
        b"dict" => Value::Dict(BTreeMap::new()),
        other => return Err(unexpected(other)),
    })
}

fn unexpected(tag: &[u8]) -> PlistError {
    PlistError::Malformed(format!("unexpected element <{}>", String::from_utf8_lossy(tag)))
}

fn read_value(reader: &mut Reader<&[u8]>, tag: &[u8], depth: usize) -> Result<Value, PlistError> {
    if depth > MAX_DEPTH {
        return Err(PlistError::Malformed("nesting too deep".to_string()));
    }
    match tag {
        b"dict" => read_dict(reader, depth),
        b"array" => read_array(reader, depth),
        b"string" => Ok(Value::String(read_text(reader, tag)?)),
        b"date" => Ok(Value::Date(read_text(reader, tag)?)),
        b"data" => Ok(Value::Data(read_text(reader, tag)?)),
        b"integer" => {
            let text = read_text(reader, tag)?;
            text.parse()
                .map(Value::Integer)
                .map_err(|_| PlistError::Malformed(format!("bad integer {text:?}")))
        }
        b"real" => {
            let text = read_text(reader, tag)?;
            text.parse()
                .map(Value::Real)
                .map_err(|_| PlistError::Malformed(format!("bad real {text:?}")))
        }
        b"true" | b"false" => {
            read_text(reader, tag)?;
            Ok(Value::Bool(tag == b"true"))
        }
        other => Err(unexpected(other)),
    }
}

fn read_text(reader: &mut Reader<&[u8]>, tag: &[u8]) -> Result<String, PlistError> {
    let mut out = String::new();
    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Text(t) => out.push_str(&t.unescape().map_err(xml_err)?),
            Event::CData(c) => out.push_str(std::str::from_utf8(&c).map_err(|_| PlistError::Encoding)?),
            Event::End(e) if e.name().as_ref() == tag => return Ok(out),
            Event::Comment(_) => {}
            Event::Eof => return Err(PlistError::Malformed("unexpected end of document".into())),
            _ => return Err(PlistError::Malformed("markup inside a scalar value".into())),
        }
    }
}

fn read_array(reader: &mut Reader<&[u8]>, depth: usize) -> Result<Value, PlistError> {
    let mut items = Vec::new();
    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(e) => items.push(read_value(reader, e.name().as_ref(), depth + 1)?),
            Event::Empty(e) => items.push(empty_value(e.name().as_ref())?),
            Event::End(e) if e.name().as_ref() == b"array" => return Ok(Value::Array(items)),
            Event::Eof => return Err(PlistError::Malformed("unterminated <array>".into())),
            _ => {}
        }
    }
}

fn read_dict(reader: &mut Reader<&[u8]>, depth: usize) -> Result<Value, PlistError> {
    let mut map = BTreeMap::new();
    let mut pending_key: Option<String> = None;
    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(e) if e.name().as_ref() == b"key" => {
                if pending_key.is_some() {
                    return Err(PlistError::Malformed("two keys without a value".into()));
                }
                pending_key = Some(read_text(reader, b"key")?);
            }
            Event::Start(e) => {
                let key = pending_key
                    .take()
                    .ok_or_else(|| PlistError::Malformed("value without a key".into()))?;
                map.insert(key, read_value(reader, e.name().as_ref(), depth + 1)?);
            }
            Event::Empty(e) if e.name().as_ref() == b"key" => {
                pending_key = Some(String::new());
            }
            Event::Empty(e) => {
                let key = pending_key
                    .take()
                    .ok_or_else(|| PlistError::Malformed("value without a key".into()))?;
                map.insert(key, empty_value(e.name().as_ref())?);
            }
            Event::End(e) if e.name().as_ref() == b"dict" => {
                if pending_key.is_some() {
                    return Err(PlistError::Malformed("key without a value".into()));
                }
                return Ok(Value::Dict(map));
            }
            Event::Eof => return Err(PlistError::Malformed("unterminated <dict>".into())),
            _ => {}
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    const INFO_PLIST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>CFBundleIdentifier</key>
    <string>com.example.demo</string>
    <key>CFBundleName</key>
    <string>Demo &amp; Friends</string>
    <key>UIDeviceFamily</key>
    <array>
        <integer>1</integer>
        <integer>2</integer>
    </array>
    <key>LSRequiresIPhoneOS</key>
    <true/>
    <key>Nested</key>
    <dict>
        <key>Ratio</key>
        <real>1.5</real>
        <key>Empty</key>
        <string/>
    </dict>
</dict>
</plist>"#;

    #[test]
    fn parses_info_plist_shapes() {
        let root = parse(INFO_PLIST.as_bytes()).unwrap();
        assert_eq!(
            root.string_at("CFBundleIdentifier").as_deref(),
            Some("com.example.demo")
        );
        assert_eq!(root.string_at("CFBundleName").as_deref(), Some("Demo & Friends"));
        let families: Vec<i64> = root
            .get("UIDeviceFamily")
            .and_then(Value::as_array)
            .unwrap()
            .iter()
            .filter_map(Value::as_integer)
            .collect();
        assert_eq!(families, vec![1, 2]);
        assert_eq!(root.get("LSRequiresIPhoneOS").and_then(Value::as_bool), Some(true));

        let nested = root.get("Nested").unwrap();
        assert_eq!(nested.get("Ratio"), Some(&Value::Real(1.5)));
        assert_eq!(nested.string_at("Empty"), None);
    }

    #[test]
    fn binary_plist_is_reported_not_parsed() {
        let err = parse(b"bplist00\xd1\x01\x02").unwrap_err();
        assert!(matches!(err, PlistError::Binary));
    }

    #[test]
    fn truncated_document_is_an_error() {
        let err = parse(b"<plist><dict><key>A</key><string>b</string>").unwrap_err();
        assert!(matches!(err, PlistError::Malformed(_)));
    }

    #[test]
    fn value_without_key_is_an_error() {
        assert!(parse(b"<plist><dict><string>orphan</string></dict></plist>").is_err());
    }

    #[test]
    fn excessive_nesting_is_rejected() {
        let mut doc = String::from("<plist>");
        for _ in 0..64 {
            doc.push_str("<array>");
        }
        for _ in 0..64 {
            doc.push_str("</array>");
        }
        doc.push_str("</plist>");
        assert!(parse(doc.as_bytes()).is_err());
    }

    #[test]
    fn not_xml_at_all_fails_cleanly() {
        assert!(parse(&[0xff, 0xfe, 0x00, 0x41]).is_err());
        assert!(matches!(parse(b"").unwrap_err(), PlistError::Empty));
    }
}
