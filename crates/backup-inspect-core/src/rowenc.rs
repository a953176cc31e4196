//! Row encoding for table primary index entries.
//!
//! A row is stored as one key-value pair:
//!
//! - **key**: the table index prefix, then each primary key column in key
//!   order, encoded so that byte order matches value order;
//! - **value**: a one-byte row sentinel followed by `(column id u32 LE,
//!   tagged datum)` entries for every non-key column holding a value. Absent
//!   columns are NULL.
//!
//! An empty value is a deletion tombstone.
//!
//! [`RowDecoder`] turns such pairs back into [`DecodedRow`]s. It is
//! parameterized by whether the row carries a trailing timestamp field
//! (revision-history exports) so both export policies share one decode path.

use std::fmt;

use chrono::{DateTime, Utc};
use snafu::prelude::*;

use crate::{
    catalog::{ColumnDescriptor, ColumnType, TableDescriptor},
    error::ErrorKind,
    hlc::HlcTimestamp,
    keys::Key,
};

/// First byte of every non-tombstone row value.
pub const ROW_SENTINEL: u8 = 0x0a;

/// Name of the extra field appended in revision-history mode.
pub const REVISION_TIME_COLUMN: &str = "revision_time";

// Key encoding tags. NULL sorts first.
const KEY_NULL: u8 = 0x00;
const KEY_FALSE: u8 = 0x10;
const KEY_TRUE: u8 = 0x11;
const KEY_INT: u8 = 0x12;
const KEY_FLOAT: u8 = 0x13;
const KEY_BYTES: u8 = 0x14;
const KEY_TIMESTAMP: u8 = 0x15;

// Byte-string escaping inside keys.
const ESCAPE: u8 = 0x00;
const ESCAPED_NUL: u8 = 0xff;
const TERMINATOR: u8 = 0x01;

// Value encoding tags.
const VAL_NULL: u8 = 0;
const VAL_BOOL: u8 = 1;
const VAL_INT: u8 = 2;
const VAL_FLOAT: u8 = 3;
const VAL_DECIMAL: u8 = 4;
const VAL_STRING: u8 = 5;
const VAL_BYTES: u8 = 6;
const VAL_TIMESTAMP: u8 = 7;

/// A typed column value.
#[derive(Clone, Debug, PartialEq)]
pub enum Datum {
    /// SQL NULL.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// Decimal in canonical textual form.
    Decimal(String),
    /// UTF-8 string.
    String(String),
    /// Byte string.
    Bytes(Vec<u8>),
    /// UTC timestamp (microsecond precision).
    Timestamp(DateTime<Utc>),
}

impl Datum {
    /// True for [`Datum::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    /// True when this datum may be stored in a column of type `ty`.
    pub fn fits(&self, ty: ColumnType) -> bool {
        matches!(
            (self, ty),
            (Datum::Null, _)
                | (Datum::Bool(_), ColumnType::Bool)
                | (Datum::Int(_), ColumnType::Int)
                | (Datum::Float(_), ColumnType::Float)
                | (Datum::Decimal(_), ColumnType::Decimal)
                | (Datum::String(_), ColumnType::String)
                | (Datum::Bytes(_), ColumnType::Bytes)
                | (Datum::Timestamp(_), ColumnType::Timestamp)
        )
    }

    fn type_name(&self) -> &'static str {
        match self {
            Datum::Null => "null",
            Datum::Bool(_) => "bool",
            Datum::Int(_) => "int",
            Datum::Float(_) => "float",
            Datum::Decimal(_) => "decimal",
            Datum::String(_) => "string",
            Datum::Bytes(_) => "bytes",
            Datum::Timestamp(_) => "timestamp",
        }
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datum::Null => f.write_str("NULL"),
            Datum::Bool(b) => write!(f, "{b}"),
            Datum::Int(i) => write!(f, "{i}"),
            Datum::Float(x) => write!(f, "{x}"),
            Datum::Decimal(s) | Datum::String(s) => f.write_str(s),
            Datum::Bytes(b) => write!(f, "\\x{}", hex::encode(b)),
            Datum::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S%.f%:z")),
        }
    }
}

/// Errors produced while encoding a row.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum RowEncodeError {
    /// The number of datums does not match the number of columns.
    #[snafu(display("table {table} has {expected} columns, row has {found}"))]
    Arity {
        /// Table name.
        table: String,
        /// Column count.
        expected: usize,
        /// Datum count.
        found: usize,
    },

    /// A datum does not fit its column.
    #[snafu(display("column {column} of type {ty} cannot hold a {found} value"))]
    EncodeTypeMismatch {
        /// Column name.
        column: String,
        /// Column type.
        ty: ColumnType,
        /// Datum kind.
        found: &'static str,
    },

    /// A key column is NULL or missing.
    #[snafu(display("primary key column {column} must not be NULL"))]
    NullKey {
        /// Column name.
        column: String,
    },
}

impl RowEncodeError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidArgument
    }
}

/// Errors produced while decoding a key-value pair.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum RowDecodeError {
    /// The key is not under the table's primary index.
    #[snafu(display("key {key} is outside index {prefix}"))]
    KeyOutsideIndex {
        /// Offending key.
        key: Key,
        /// Expected prefix.
        prefix: Key,
    },

    /// Input ended in the middle of a field.
    #[snafu(display("truncated {what}"))]
    Truncated {
        /// What was being decoded.
        what: &'static str,
    },

    /// A tag byte is not recognized.
    #[snafu(display("unknown {what} tag {tag:#04x}"))]
    UnknownTag {
        /// Key or value.
        what: &'static str,
        /// The tag.
        tag: u8,
    },

    /// The value does not start with the row sentinel.
    #[snafu(display("row value starts with {found:#04x}, expected {ROW_SENTINEL:#04x}"))]
    BadSentinel {
        /// First byte found.
        found: u8,
    },

    /// The decoded datum does not match the column type.
    #[snafu(display("column {column} of type {ty} holds a {found} value"))]
    TypeMismatch {
        /// Column name.
        column: String,
        /// Column type.
        ty: ColumnType,
        /// Datum kind found.
        found: &'static str,
    },

    /// The value refers to a column the table does not have.
    #[snafu(display("value refers to unknown column id {column_id}"))]
    UnknownColumn {
        /// Column id.
        column_id: u32,
    },

    /// Bytes left over after the last key column.
    #[snafu(display("{count} trailing bytes after primary key"))]
    TrailingKeyBytes {
        /// Leftover byte count.
        count: usize,
    },

    /// A string payload is not UTF-8.
    #[snafu(display("invalid UTF-8 in {what}"))]
    InvalidUtf8 {
        /// What was being decoded.
        what: &'static str,
    },

    /// A timestamp is out of range.
    #[snafu(display("timestamp {micros} is out of range"))]
    TimestampRange {
        /// Microseconds since the epoch.
        micros: i64,
    },
}

impl RowDecodeError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::DecodeFailure
    }
}

fn encode_key_datum(out: &mut Vec<u8>, datum: &Datum) {
    match datum {
        Datum::Null => out.push(KEY_NULL),
        Datum::Bool(false) => out.push(KEY_FALSE),
        Datum::Bool(true) => out.push(KEY_TRUE),
        Datum::Int(i) => {
            out.push(KEY_INT);
            out.extend_from_slice(&((*i as u64) ^ (1 << 63)).to_be_bytes());
        }
        Datum::Float(x) => {
            let bits = x.to_bits();
            let ordered = if bits >> 63 == 1 { !bits } else { bits ^ (1 << 63) };
            out.push(KEY_FLOAT);
            out.extend_from_slice(&ordered.to_be_bytes());
        }
        // Decimals are keyed by their canonical text.
        Datum::Decimal(s) | Datum::String(s) => encode_key_bytes(out, s.as_bytes()),
        Datum::Bytes(b) => encode_key_bytes(out, b),
        Datum::Timestamp(ts) => {
            out.push(KEY_TIMESTAMP);
            out.extend_from_slice(&((ts.timestamp_micros() as u64) ^ (1 << 63)).to_be_bytes());
        }
    }
}

fn encode_key_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.push(KEY_BYTES);
    for &b in bytes {
        out.push(b);
        if b == ESCAPE {
            out.push(ESCAPED_NUL);
        }
    }
    out.extend_from_slice(&[ESCAPE, TERMINATOR]);
}

fn encode_value_datum(out: &mut Vec<u8>, datum: &Datum) {
    let put_len_prefixed = |out: &mut Vec<u8>, tag: u8, bytes: &[u8]| {
        out.push(tag);
        out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(bytes);
    };
    match datum {
        Datum::Null => out.push(VAL_NULL),
        Datum::Bool(b) => out.extend_from_slice(&[VAL_BOOL, u8::from(*b)]),
        Datum::Int(i) => {
            out.push(VAL_INT);
            out.extend_from_slice(&i.to_le_bytes());
        }
        Datum::Float(x) => {
            out.push(VAL_FLOAT);
            out.extend_from_slice(&x.to_le_bytes());
        }
        Datum::Decimal(s) => put_len_prefixed(out, VAL_DECIMAL, s.as_bytes()),
        Datum::String(s) => put_len_prefixed(out, VAL_STRING, s.as_bytes()),
        Datum::Bytes(b) => put_len_prefixed(out, VAL_BYTES, b),
        Datum::Timestamp(ts) => {
            out.push(VAL_TIMESTAMP);
            out.extend_from_slice(&ts.timestamp_micros().to_le_bytes());
        }
    }
}

/// Encode one row of `table` into its primary index key and value.
///
/// `row` holds one datum per column of `table.columns`, in order.
pub fn encode_row(table: &TableDescriptor, row: &[Datum]) -> Result<(Key, Vec<u8>), RowEncodeError> {
    ensure!(
        row.len() == table.columns.len(),
        AritySnafu {
            table: table.name.clone(),
            expected: table.columns.len(),
            found: row.len(),
        }
    );

    for (col, datum) in table.columns.iter().zip(row) {
        ensure!(
            datum.fits(col.ty),
            EncodeTypeMismatchSnafu {
                column: col.name.clone(),
                ty: col.ty,
                found: datum.type_name(),
            }
        );
    }

    let mut key = table.primary_index_prefix().into_bytes();
    for key_col in &table.primary_index.key_column_ids {
        let pos = table.columns.iter().position(|c| c.id == *key_col);
        let datum = pos.map(|p| &row[p]).filter(|d| !d.is_null());
        let Some(datum) = datum else {
            return NullKeySnafu {
                column: key_col.to_string(),
            }
            .fail();
        };
        encode_key_datum(&mut key, datum);
    }

    let mut value = vec![ROW_SENTINEL];
    for (col, datum) in table.columns.iter().zip(row) {
        if table.primary_index.key_column_ids.contains(&col.id) || datum.is_null() {
            continue;
        }
        value.extend_from_slice(&col.id.to_le_bytes());
        encode_value_datum(&mut value, datum);
    }

    Ok((Key::new(key), value))
}

struct Reader<'a> {
    buf: &'a [u8],
    what: &'static str,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8], what: &'static str) -> Self {
        Self { buf, what }
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], RowDecodeError> {
        ensure!(self.buf.len() >= n, TruncatedSnafu { what: self.what });
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8, RowDecodeError> {
        Ok(self.take(1)?[0])
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], RowDecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }
}

fn timestamp_from_micros(micros: i64) -> Result<DateTime<Utc>, RowDecodeError> {
    DateTime::<Utc>::from_timestamp_micros(micros).context(TimestampRangeSnafu { micros })
}

fn utf8(bytes: Vec<u8>, what: &'static str) -> Result<String, RowDecodeError> {
    String::from_utf8(bytes).map_err(|_| RowDecodeError::InvalidUtf8 { what })
}

fn decode_key_datum(r: &mut Reader<'_>, ty: ColumnType) -> Result<Datum, RowDecodeError> {
    let tag = r.u8()?;
    let datum = match tag {
        KEY_NULL => Datum::Null,
        KEY_FALSE => Datum::Bool(false),
        KEY_TRUE => Datum::Bool(true),
        KEY_INT => Datum::Int((u64::from_be_bytes(r.array()?) ^ (1 << 63)) as i64),
        KEY_FLOAT => {
            let ordered = u64::from_be_bytes(r.array()?);
            let bits = if ordered >> 63 == 1 { ordered ^ (1 << 63) } else { !ordered };
            Datum::Float(f64::from_bits(bits))
        }
        KEY_BYTES => {
            let mut bytes = Vec::new();
            loop {
                let b = r.u8()?;
                if b != ESCAPE {
                    bytes.push(b);
                    continue;
                }
                match r.u8()? {
                    TERMINATOR => break,
                    ESCAPED_NUL => bytes.push(ESCAPE),
                    other => {
                        return UnknownTagSnafu {
                            what: "key escape",
                            tag: other,
                        }
                        .fail();
                    }
                }
            }
            match ty {
                ColumnType::String => Datum::String(utf8(bytes, "key string")?),
                ColumnType::Decimal => Datum::Decimal(utf8(bytes, "key decimal")?),
                _ => Datum::Bytes(bytes),
            }
        }
        KEY_TIMESTAMP => {
            let micros = (u64::from_be_bytes(r.array()?) ^ (1 << 63)) as i64;
            Datum::Timestamp(timestamp_from_micros(micros)?)
        }
        other => {
            return UnknownTagSnafu {
                what: "key",
                tag: other,
            }
            .fail();
        }
    };
    Ok(datum)
}

fn len_prefixed(r: &mut Reader<'_>) -> Result<Vec<u8>, RowDecodeError> {
    let len = u32::from_le_bytes(r.array()?) as usize;
    Ok(r.take(len)?.to_vec())
}

fn decode_value_datum(r: &mut Reader<'_>) -> Result<Datum, RowDecodeError> {
    let tag = r.u8()?;
    let datum = match tag {
        VAL_NULL => Datum::Null,
        VAL_BOOL => Datum::Bool(r.u8()? != 0),
        VAL_INT => Datum::Int(i64::from_le_bytes(r.array()?)),
        VAL_FLOAT => Datum::Float(f64::from_le_bytes(r.array()?)),
        VAL_DECIMAL => Datum::Decimal(utf8(len_prefixed(r)?, "decimal")?),
        VAL_STRING => Datum::String(utf8(len_prefixed(r)?, "string")?),
        VAL_BYTES => Datum::Bytes(len_prefixed(r)?),
        VAL_TIMESTAMP => Datum::Timestamp(timestamp_from_micros(i64::from_le_bytes(r.array()?))?),
        other => {
            return UnknownTagSnafu {
                what: "value",
                tag: other,
            }
            .fail();
        }
    };
    Ok(datum)
}

fn check_type(col: &ColumnDescriptor, datum: &Datum) -> Result<(), RowDecodeError> {
    ensure!(
        datum.fits(col.ty),
        TypeMismatchSnafu {
            column: col.name.clone(),
            ty: col.ty,
            found: datum.type_name(),
        }
    );
    Ok(())
}

/// One decoded row: public column values in descriptor order, plus the
/// revision timestamp when the decoder was built with a trailing timestamp.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedRow {
    /// Field values.
    pub datums: Vec<Datum>,
}

/// Decodes primary index key-value pairs of one table.
#[derive(Clone, Debug)]
pub struct RowDecoder {
    table: TableDescriptor,
    prefix: Key,
    trailing_timestamp: bool,
}

impl RowDecoder {
    /// Decoder for `table`. With `trailing_timestamp`, every row gets the
    /// version's approximate timestamp appended.
    pub fn new(table: &TableDescriptor, trailing_timestamp: bool) -> Self {
        Self {
            table: table.clone(),
            prefix: table.primary_index_prefix(),
            trailing_timestamp,
        }
    }

    /// The table being decoded.
    pub fn table(&self) -> &TableDescriptor {
        &self.table
    }

    /// Output field names and types, in row order.
    pub fn output_fields(&self) -> Vec<(String, ColumnType)> {
        let mut fields: Vec<(String, ColumnType)> = self
            .table
            .public_columns()
            .map(|c| (c.name.clone(), c.ty))
            .collect();
        if self.trailing_timestamp {
            fields.push((REVISION_TIME_COLUMN.to_string(), ColumnType::Timestamp));
        }
        fields
    }

    /// Decode one version. An empty `value` is a tombstone and yields the
    /// key columns with every other column NULL.
    pub fn decode(
        &self,
        key: &[u8],
        ts: HlcTimestamp,
        value: &[u8],
    ) -> Result<DecodedRow, RowDecodeError> {
        let Some(rest) = key.strip_prefix(self.prefix.as_bytes()) else {
            return KeyOutsideIndexSnafu {
                key: Key::from(key),
                prefix: self.prefix.clone(),
            }
            .fail();
        };

        let columns = &self.table.columns;
        let mut values = vec![Datum::Null; columns.len()];

        let mut kr = Reader::new(rest, "key");
        for key_col in &self.table.primary_index.key_column_ids {
            let pos = columns
                .iter()
                .position(|c| c.id == *key_col)
                .context(UnknownColumnSnafu { column_id: *key_col })?;
            let datum = decode_key_datum(&mut kr, columns[pos].ty)?;
            check_type(&columns[pos], &datum)?;
            values[pos] = datum;
        }
        ensure!(
            kr.is_empty(),
            TrailingKeyBytesSnafu {
                count: kr.buf.len()
            }
        );

        if !value.is_empty() {
            let mut vr = Reader::new(value, "value");
            let sentinel = vr.u8()?;
            ensure!(sentinel == ROW_SENTINEL, BadSentinelSnafu { found: sentinel });

            while !vr.is_empty() {
                let column_id = u32::from_le_bytes(vr.array()?);
                let pos = columns
                    .iter()
                    .position(|c| c.id == column_id)
                    .context(UnknownColumnSnafu { column_id })?;
                let datum = decode_value_datum(&mut vr)?;
                check_type(&columns[pos], &datum)?;
                values[pos] = datum;
            }
        }

        let mut datums: Vec<Datum> = columns
            .iter()
            .zip(values)
            .filter(|(c, _)| !c.hidden)
            .map(|(_, d)| d)
            .collect();
        if self.trailing_timestamp {
            datums.push(Datum::Timestamp(ts.to_approx_datetime()));
        }
        Ok(DecodedRow { datums })
    }
}
