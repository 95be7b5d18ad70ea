//! Inbound frame decoding
//!
//! - Binary payloads are inflated per [`Compression`] and read as text
//! - Bare integers of 15 or more digits are quoted before JSON parsing so
//!   64-bit exchange ids keep their exact value
//! - Text that does not look like JSON (`pong`) becomes a JSON string
//! - Text that looks like JSON but fails to parse is dropped

use crate::errors::{ExchangeError, Result};
use flate2::read::{DeflateDecoder, GzDecoder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::Read;
use tracing::warn;

/// Minimum digit count of integers that are quoted before decoding
const BIG_INTEGER_DIGITS: usize = 15;

/// Compression applied by the server to binary frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Deflate,
}

/// Inflate a binary payload into text
pub fn inflate(payload: &[u8], compression: Compression) -> Result<String> {
    let mut text = String::new();
    let outcome = match compression {
        Compression::None => {
            return String::from_utf8(payload.to_vec())
                .map_err(|e| ExchangeError::InvalidResponse(format!("Invalid UTF-8 in binary frame: {e}")));
        }
        Compression::Gzip => GzDecoder::new(payload).read_to_string(&mut text),
        Compression::Deflate => DeflateDecoder::new(payload).read_to_string(&mut text),
    };
    outcome
        .map(|_| text)
        .map_err(|e| ExchangeError::InvalidResponse(format!("Failed to inflate frame: {e}")))
}

/// Quote every `:<digits>,` value with at least 15 digits
pub fn quote_big_integers(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len() + 8);
    let mut copied = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b':' {
            i += 1;
            continue;
        }
        let start = i + 1;
        let mut end = start;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
        if end - start >= BIG_INTEGER_DIGITS && end < bytes.len() && bytes[end] == b',' {
            out.push_str(&text[copied..start]);
            out.push('"');
            out.push_str(&text[start..end]);
            out.push('"');
            copied = end;
        }
        i = end.max(i + 1);
    }

    out.push_str(&text[copied..]);
    out
}

/// Decode a text frame. `None` means the frame was malformed and dropped.
pub fn decode_text(text: &str) -> Option<Value> {
    let trimmed = text.trim_start();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return Some(Value::String(text.to_string()));
    }
    match serde_json::from_str(&quote_big_integers(text)) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("⚠️  Dropping malformed frame: {} ({})", e, preview(text));
            None
        }
    }
}

/// Decode a binary frame
pub fn decode_binary(payload: &[u8], compression: Compression) -> Option<Value> {
    match inflate(payload, compression) {
        Ok(text) => decode_text(&text),
        Err(e) => {
            warn!("⚠️  Dropping undecodable binary frame: {}", e);
            None
        }
    }
}

fn preview(text: &str) -> &str {
    match text.char_indices().nth(120) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}
