//! Saved project file format
//!
//! A saved file is the raw source text, optionally preceded by a metadata
//! block:
//!
//! ```text
//! // $meta-start
//! // $meta <base64 json>
//! // $meta-props <base64 json object of property name -> value>
//! // $meta-end
//! <source text>
//! ```

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

pub const META_START: &str = "// $meta-start";
pub const META_END: &str = "// $meta-end";
pub const META_PREFIX: &str = "// $meta ";
pub const META_PROPS_PREFIX: &str = "// $meta-props ";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectFile {
    pub code: String,
    pub meta: Option<serde_json::Value>,
    pub properties: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Default)]
struct Header {
    meta: Option<serde_json::Value>,
    properties: Option<BTreeMap<String, String>>,
    /// Byte offset where the source text begins
    body_start: usize,
}

impl ProjectFile {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            ..Default::default()
        }
    }

    pub fn has_header(&self) -> bool {
        self.meta.is_some() || self.properties.is_some()
    }

    /// Serialize to the on-disk text form.
    pub fn render(&self) -> String {
        if !self.has_header() {
            return self.code.clone();
        }

        let mut out = String::with_capacity(self.code.len() + 128);
        out.push_str(META_START);
        out.push('\n');
        if let Some(meta) = &self.meta {
            out.push_str(META_PREFIX);
            out.push_str(&STANDARD.encode(meta.to_string()));
            out.push('\n');
        }
        if let Some(props) = &self.properties {
            // A string map always serializes.
            let json = serde_json::to_string(props).unwrap_or_else(|_| "{}".to_string());
            out.push_str(META_PROPS_PREFIX);
            out.push_str(&STANDARD.encode(json));
            out.push('\n');
        }
        out.push_str(META_END);
        out.push('\n');
        out.push_str(&self.code);
        out
    }

    /// Split file text into metadata and source.
    ///
    /// A header that cannot be decoded is logged and the whole text is
    /// treated as source.
    pub fn parse(text: &str) -> Self {
        Self::parse_with_warning(text).0
    }

    /// Like [`ProjectFile::parse`], also returning why a header was ignored.
    pub fn parse_with_warning(text: &str) -> (Self, Option<String>) {
        if !text.starts_with(META_START) {
            return (Self::new(text), None);
        }

        match parse_header(text) {
            Ok(header) => (
                Self {
                    code: text[header.body_start..].to_string(),
                    meta: header.meta,
                    properties: header.properties,
                },
                None,
            ),
            Err(reason) => {
                tracing::warn!("Ignoring malformed metadata header: {}", reason);
                (Self::new(text), Some(reason))
            }
        }
    }
}

fn decode_json<T: serde::de::DeserializeOwned>(encoded: &str) -> Result<T, String> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| format!("invalid base64: {}", e))?;
    serde_json::from_slice(&bytes).map_err(|e| format!("invalid JSON: {}", e))
}

fn parse_header(text: &str) -> Result<Header, String> {
    let mut header = Header::default();
    let mut offset = 0;
    let mut lines = text.split_inclusive('\n');

    match lines.next() {
        Some(first) if first.trim_end() == META_START => offset += first.len(),
        _ => return Err("missing start marker".to_string()),
    }

    for line in lines {
        offset += line.len();
        let content = line.trim_end_matches(['\r', '\n']);
        if content == META_END {
            header.body_start = offset;
            return Ok(header);
        }
        if let Some(encoded) = content.strip_prefix(META_PROPS_PREFIX) {
            header.properties = Some(decode_json(encoded)?);
        } else if let Some(encoded) = content.strip_prefix(META_PREFIX) {
            header.meta = Some(decode_json(encoded)?);
        } else {
            return Err(format!("unexpected line in header: {:?}", content));
        }
    }

    Err("missing end marker".to_string())
}
