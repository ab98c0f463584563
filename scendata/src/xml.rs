//! Thin adapter over the quick-xml event API.
//!
//! The model's read/write hooks go through these helpers so the
//! section code deals in attribute names and element names, not in
//! quick-xml error plumbing.

use quick_xml::events::BytesStart;
use quick_xml::Reader;

use crate::error::ModelError;

/// Maps any quick-xml or escaping error into the model's parse error.
pub(crate) fn xml_err(err: impl std::fmt::Display) -> ModelError {
    ModelError::Parse(err.to_string())
}

/// Fetches an attribute by name, unescaped. `Ok(None)` if absent.
pub(crate) fn attr(start: &BytesStart, name: &str) -> Result<Option<String>, ModelError> {
    for item in start.attributes() {
        let attribute = item.map_err(xml_err)?;
        if attribute.key.as_ref() == name.as_bytes() {
            let value = attribute.unescape_value().map_err(xml_err)?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

/// Fetches an attribute that the dialect requires on this element.
pub(crate) fn require_attr(start: &BytesStart, name: &str) -> Result<String, ModelError> {
    attr(start, name)?.ok_or_else(|| {
        ModelError::Parse(format!(
            "missing required attribute '{}' on <{}>",
            name,
            String::from_utf8_lossy(start.name().as_ref())
        ))
    })
}

pub(crate) fn require_attr_u32(start: &BytesStart, name: &str) -> Result<u32, ModelError> {
    let text = require_attr(start, name)?;
    parse_u32(&text, name)
}

pub(crate) fn parse_u32(text: &str, what: &str) -> Result<u32, ModelError> {
    text.trim()
        .parse::<u32>()
        .map_err(|_| ModelError::Parse(format!("'{text}' is not a valid {what} value")))
}

pub(crate) fn parse_i32(text: &str, what: &str) -> Result<i32, ModelError> {
    text.trim()
        .parse::<i32>()
        .map_err(|_| ModelError::Parse(format!("'{text}' is not a valid {what} value")))
}

/// Consumes events up to and including the end tag matching `start`.
pub(crate) fn skip_element(
    reader: &mut Reader<&[u8]>,
    start: &BytesStart,
) -> Result<(), ModelError> {
    reader.read_to_end(start.name()).map_err(xml_err)?;
    Ok(())
}

/// Reads the text content of the element opened by `start`, consuming
/// its end tag.
pub(crate) fn read_text(
    reader: &mut Reader<&[u8]>,
    start: &BytesStart,
) -> Result<String, ModelError> {
    let text = reader.read_text(start.name()).map_err(xml_err)?;
    Ok(text.into_owned())
}
