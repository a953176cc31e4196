//! Keys, key spans, and user-supplied scan start keys.
//!
//! Table data lives under an index prefix: the table id and the index id, each
//! a big-endian `u32`, followed by the order-preserving encoding of the
//! primary key columns (see [`crate::rowenc`]). A table's primary index span is
//! therefore `[prefix, prefix_end(prefix))`.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use snafu::prelude::*;

use crate::error::ErrorKind;

/// Length in bytes of a table index prefix.
pub const INDEX_PREFIX_LEN: usize = 8;

/// An opaque, byte-ordered key.
///
/// Serialized as a lowercase hex string.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key(Vec<u8>);

impl Key {
    /// Wrap raw key bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Key(bytes.into())
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consume into raw bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// True for the empty key.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Key with `suffix` appended.
    pub fn with_suffix(&self, suffix: &[u8]) -> Self {
        let mut bytes = self.0.clone();
        bytes.extend_from_slice(suffix);
        Key(bytes)
    }

    /// The first key that does not have `self` as a prefix.
    ///
    /// Trailing `0xff` bytes are dropped and the last remaining byte is
    /// incremented. A key made only of `0xff` bytes has no such successor and
    /// is returned unchanged.
    pub fn prefix_end(&self) -> Self {
        let mut bytes = self.0.clone();
        while let Some(last) = bytes.last_mut() {
            if *last == 0xff {
                bytes.pop();
            } else {
                *last += 1;
                return Key(bytes);
            }
        }
        self.clone()
    }

    /// Human-readable rendering used in summaries and error messages.
    pub fn pretty(&self) -> String {
        if self.0.is_empty() {
            return "/Min".to_string();
        }
        match decode_index_prefix(&self.0) {
            Some((table_id, index_id, rest)) if rest.is_empty() => {
                format!("/Table/{table_id}/{index_id}")
            }
            Some((table_id, index_id, rest)) => {
                format!("/Table/{table_id}/{index_id}/{}", hex::encode(rest))
            }
            None => format!("/Raw/{}", hex::encode(&self.0)),
        }
    }
}

impl From<Vec<u8>> for Key {
    fn from(bytes: Vec<u8>) -> Self {
        Key(bytes)
    }
}

impl From<&[u8]> for Key {
    fn from(bytes: &[u8]) -> Self {
        Key(bytes.to_vec())
    }
}

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pretty())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pretty())
    }
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map(Key).map_err(serde::de::Error::custom)
    }
}

/// Prefix shared by every key of one index of one table.
pub fn table_index_prefix(table_id: u32, index_id: u32) -> Key {
    let mut bytes = Vec::with_capacity(INDEX_PREFIX_LEN);
    bytes.extend_from_slice(&table_id.to_be_bytes());
    bytes.extend_from_slice(&index_id.to_be_bytes());
    Key(bytes)
}

/// Split a key into `(table_id, index_id, remainder)`.
pub fn decode_index_prefix(key: &[u8]) -> Option<(u32, u32, &[u8])> {
    if key.len() < INDEX_PREFIX_LEN {
        return None;
    }
    let table_id = u32::from_be_bytes(key[0..4].try_into().ok()?);
    let index_id = u32::from_be_bytes(key[4..8].try_into().ok()?);
    Some((table_id, index_id, &key[INDEX_PREFIX_LEN..]))
}

/// A half-open key range `[key, end_key)`.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Span {
    /// Inclusive start.
    pub key: Key,
    /// Exclusive end.
    pub end_key: Key,
}

impl Span {
    /// Build a span from its bounds.
    pub fn new(key: impl Into<Key>, end_key: impl Into<Key>) -> Self {
        Self {
            key: key.into(),
            end_key: end_key.into(),
        }
    }

    /// True when the span contains no keys.
    pub fn is_empty(&self) -> bool {
        self.key >= self.end_key
    }

    /// True when `key` falls inside the span.
    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.key.as_bytes() <= key && key < self.end_key.as_bytes()
    }

    /// True when the two spans share at least one key.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.key < other.end_key && other.key < self.end_key
    }

    /// The common sub-span, if any.
    pub fn intersect(&self, other: &Span) -> Option<Span> {
        let key = self.key.clone().max(other.key.clone());
        let end_key = self.end_key.clone().min(other.end_key.clone());
        (key < end_key).then_some(Span { key, end_key })
    }

    /// True when the union of `spans` contains every key of `self`.
    pub fn covered_by(&self, spans: &[Span]) -> bool {
        let mut clipped: Vec<Span> = spans.iter().filter_map(|s| s.intersect(self)).collect();
        clipped.sort();

        let mut reached = self.key.clone();
        for s in clipped {
            if s.key > reached {
                return false;
            }
            if s.end_key > reached {
                reached = s.end_key;
            }
            if reached >= self.end_key {
                return true;
            }
        }
        reached >= self.end_key
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.key, self.end_key)
    }
}

/// Errors produced while parsing a start key.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum KeyParseError {
    /// The value lacks the `<type>:` prefix.
    #[snafu(display("no format specified in start key {value}"))]
    MissingFormat {
        /// The rejected input.
        value: String,
    },

    /// The prefix names no known start key type.
    #[snafu(display("unknown format {format} in start key {value}"))]
    UnknownFormat {
        /// Prefix before the colon.
        format: String,
        /// The rejected input.
        value: String,
    },

    /// `hex:` payload is not valid hex.
    #[snafu(display("invalid hex start key {value}: {source}"))]
    InvalidHex {
        /// The rejected payload.
        value: String,
        /// Decoder error.
        source: hex::FromHexError,
    },

    /// A backslash escape could not be decoded.
    #[snafu(display("invalid escape in start key {value}: {reason}"))]
    InvalidEscape {
        /// The rejected payload.
        value: String,
        /// What was wrong.
        reason: String,
    },
}

impl KeyParseError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidArgument
    }
}

/// How a start key's bytes are interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartKeyKind {
    /// Hex-encoded full key.
    Hex,
    /// Escaped full key.
    Raw,
    /// Escaped suffix appended to the table span start.
    ByteKey,
}

/// A user-supplied position to start scanning from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StartKey {
    kind: StartKeyKind,
    bytes: Vec<u8>,
}

impl StartKey {
    /// Parse `<type>:<value>` where type is `hex`, `raw` or `bytekey`.
    pub fn parse(value: &str) -> Result<Self, KeyParseError> {
        let (format, payload) = value
            .split_once(':')
            .context(MissingFormatSnafu { value })?;

        let (kind, bytes) = match format {
            "hex" => (
                StartKeyKind::Hex,
                hex::decode(payload).context(InvalidHexSnafu { value: payload })?,
            ),
            "raw" => (StartKeyKind::Raw, unescape(payload)?),
            "bytekey" => (StartKeyKind::ByteKey, unescape(payload)?),
            other => {
                return UnknownFormatSnafu {
                    format: other,
                    value,
                }
                .fail();
            }
        };
        Ok(Self { kind, bytes })
    }

    /// Interpretation of the bytes.
    pub fn kind(&self) -> StartKeyKind {
        self.kind
    }

    /// Decoded bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Absolute key to start from, given the scanned table span.
    pub fn resolve(&self, table_span: &Span) -> Key {
        match self.kind {
            StartKeyKind::Hex | StartKeyKind::Raw => Key::new(self.bytes.clone()),
            StartKeyKind::ByteKey => table_span.key.with_suffix(&self.bytes),
        }
    }
}

fn unescape(value: &str) -> Result<Vec<u8>, KeyParseError> {
    let invalid = |reason: &str| KeyParseError::InvalidEscape {
        value: value.to_string(),
        reason: reason.to_string(),
    };

    let src = value.as_bytes();
    let mut out = Vec::with_capacity(src.len());
    let mut i = 0;
    while i < src.len() {
        let b = src[i];
        if b != b'\\' {
            out.push(b);
            i += 1;
            continue;
        }
        let esc = *src.get(i + 1).ok_or_else(|| invalid("trailing backslash"))?;
        i += 2;
        match esc {
            b'\\' => out.push(b'\\'),
            b'"' => out.push(b'"'),
            b'\'' => out.push(b'\''),
            b'n' => out.push(b'\n'),
            b't' => out.push(b'\t'),
            b'r' => out.push(b'\r'),
            b'0' => out.push(0),
            b'x' => {
                let digits = src
                    .get(i..i + 2)
                    .ok_or_else(|| invalid("\\x needs two hex digits"))?;
                let decoded =
                    hex::decode(digits).map_err(|_| invalid("\\x needs two hex digits"))?;
                out.extend_from_slice(&decoded);
                i += 2;
            }
            other => {
                return Err(invalid(&format!("unknown escape \\{}", other as char)));
            }
        }
    }
    Ok(out)
}
