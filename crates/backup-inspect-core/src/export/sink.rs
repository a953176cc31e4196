//! CSV output for decoded rows.
//!
//! Rows are buffered into Arrow column builders and written as record
//! batches through `arrow_csv`. NULL fields are rendered with a configurable
//! placeholder so they can be told apart from empty strings.

use std::{io::Write, sync::Arc};

use arrow::{
    array::{
        ArrayRef, BooleanBuilder, Float64Builder, Int64Builder, RecordBatch, StringBuilder,
        TimestampMicrosecondBuilder,
    },
    datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit},
    error::ArrowError,
};
use snafu::{Backtrace, prelude::*};

use crate::{
    catalog::ColumnType,
    error::ErrorKind,
    rowenc::{Datum, DecodedRow},
};

/// Rows buffered before a batch is written.
pub const BATCH_ROWS: usize = 1024;

/// Timezone attached to timestamp columns.
const UTC_OFFSET: &str = "+00:00";

/// Layout of timestamps in the output.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f%:z";

/// Errors produced while writing rows.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SinkError {
    /// Building or writing a batch failed.
    #[snafu(display("failed to write CSV output: {source}"))]
    Arrow {
        /// Underlying Arrow error.
        source: ArrowError,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// A row has the wrong number of fields.
    #[snafu(display("row has {found} fields, expected {expected}"))]
    RowArity {
        /// Output field count.
        expected: usize,
        /// Fields in the row.
        found: usize,
    },

    /// A datum does not match its column type.
    #[snafu(display("column {column} cannot hold {found}"))]
    UnexpectedDatum {
        /// Column name.
        column: String,
        /// Rendered datum.
        found: String,
    },
}

impl SinkError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SinkError::Arrow { .. } => ErrorKind::StorageFailure,
            SinkError::RowArity { .. } | SinkError::UnexpectedDatum { .. } => {
                ErrorKind::DecodeFailure
            }
        }
    }
}

enum ColumnBuilder {
    Bool(BooleanBuilder),
    Int(Int64Builder),
    Float(Float64Builder),
    Text(StringBuilder),
    Timestamp(TimestampMicrosecondBuilder),
}

impl ColumnBuilder {
    fn new(ty: ColumnType) -> Self {
        match ty {
            ColumnType::Bool => ColumnBuilder::Bool(BooleanBuilder::new()),
            ColumnType::Int => ColumnBuilder::Int(Int64Builder::new()),
            ColumnType::Float => ColumnBuilder::Float(Float64Builder::new()),
            ColumnType::Decimal | ColumnType::String | ColumnType::Bytes => {
                ColumnBuilder::Text(StringBuilder::new())
            }
            ColumnType::Timestamp => ColumnBuilder::Timestamp(
                TimestampMicrosecondBuilder::new().with_timezone(UTC_OFFSET),
            ),
        }
    }

    fn append_null(&mut self) {
        match self {
            ColumnBuilder::Bool(b) => b.append_null(),
            ColumnBuilder::Int(b) => b.append_null(),
            ColumnBuilder::Float(b) => b.append_null(),
            ColumnBuilder::Text(b) => b.append_null(),
            ColumnBuilder::Timestamp(b) => b.append_null(),
        }
    }

    /// Append `datum`; returns false when it does not fit this column.
    fn append(&mut self, datum: &Datum) -> bool {
        match (self, datum) {
            (b, Datum::Null) => b.append_null(),
            (ColumnBuilder::Bool(b), Datum::Bool(v)) => b.append_value(*v),
            (ColumnBuilder::Int(b), Datum::Int(v)) => b.append_value(*v),
            (ColumnBuilder::Float(b), Datum::Float(v)) => b.append_value(*v),
            (ColumnBuilder::Text(b), Datum::Decimal(s) | Datum::String(s)) => b.append_value(s),
            (ColumnBuilder::Text(b), bytes @ Datum::Bytes(_)) => b.append_value(bytes.to_string()),
            (ColumnBuilder::Timestamp(b), Datum::Timestamp(t)) => {
                b.append_value(t.timestamp_micros())
            }
            _ => return false,
        }
        true
    }

    fn finish(&mut self) -> ArrayRef {
        match self {
            ColumnBuilder::Bool(b) => Arc::new(b.finish()),
            ColumnBuilder::Int(b) => Arc::new(b.finish()),
            ColumnBuilder::Float(b) => Arc::new(b.finish()),
            ColumnBuilder::Text(b) => Arc::new(b.finish()),
            ColumnBuilder::Timestamp(b) => Arc::new(b.finish()),
        }
    }
}

fn arrow_type(ty: ColumnType) -> DataType {
    match ty {
        ColumnType::Bool => DataType::Boolean,
        ColumnType::Int => DataType::Int64,
        ColumnType::Float => DataType::Float64,
        ColumnType::Decimal | ColumnType::String | ColumnType::Bytes => DataType::Utf8,
        ColumnType::Timestamp => {
            DataType::Timestamp(TimeUnit::Microsecond, Some(UTC_OFFSET.into()))
        }
    }
}

/// Writes rows as header-less CSV.
pub struct CsvSink<W: Write> {
    schema: SchemaRef,
    builders: Vec<ColumnBuilder>,
    buffered: usize,
    rows_written: u64,
    writer: arrow_csv::Writer<W>,
}

impl<W: Write> CsvSink<W> {
    /// Sink for rows with `fields`, rendering NULL as `null_as`.
    pub fn new(fields: &[(String, ColumnType)], null_as: &str, out: W) -> Self {
        let schema = Arc::new(Schema::new(
            fields
                .iter()
                .map(|(name, ty)| Field::new(name, arrow_type(*ty), true))
                .collect::<Vec<_>>(),
        ));
        let builders = fields.iter().map(|(_, ty)| ColumnBuilder::new(*ty)).collect();
        let writer = arrow_csv::WriterBuilder::new()
            .with_header(false)
            .with_null(null_as.to_string())
            .with_timestamp_tz_format(TIMESTAMP_FORMAT.to_string())
            .build(out);

        Self {
            schema,
            builders,
            buffered: 0,
            rows_written: 0,
            writer,
        }
    }

    /// Rows handed to the writer so far, excluding buffered ones.
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Buffer one row, writing a batch when the buffer is full.
    pub fn push(&mut self, row: &DecodedRow) -> Result<(), SinkError> {
        ensure!(
            row.datums.len() == self.builders.len(),
            RowAritySnafu {
                expected: self.builders.len(),
                found: row.datums.len(),
            }
        );

        for (idx, datum) in row.datums.iter().enumerate() {
            if !self.builders[idx].append(datum) {
                // Keep columns aligned for whatever is flushed next.
                for b in &mut self.builders[idx..] {
                    b.append_null();
                }
                return UnexpectedDatumSnafu {
                    column: self.schema.field(idx).name().clone(),
                    found: format!("{datum:?}"),
                }
                .fail();
            }
        }

        self.buffered += 1;
        if self.buffered >= BATCH_ROWS {
            self.flush()?;
        }
        Ok(())
    }

    /// Write buffered rows.
    pub fn flush(&mut self) -> Result<(), SinkError> {
        if self.buffered == 0 {
            return Ok(());
        }
        let columns: Vec<ArrayRef> = self.builders.iter_mut().map(ColumnBuilder::finish).collect();
        let batch = RecordBatch::try_new(self.schema.clone(), columns).context(ArrowSnafu)?;
        self.writer.write(&batch).context(ArrowSnafu)?;
        self.rows_written += self.buffered as u64;
        self.buffered = 0;
        Ok(())
    }

    /// Flush and return the underlying writer.
    pub fn finish(mut self) -> Result<W, SinkError> {
        self.flush()?;
        Ok(self.writer.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn fields() -> Vec<(String, ColumnType)> {
        vec![
            ("id".to_string(), ColumnType::Int),
            ("name".to_string(), ColumnType::String),
            ("blob".to_string(), ColumnType::Bytes),
            ("ok".to_string(), ColumnType::Bool),
            ("at".to_string(), ColumnType::Timestamp),
        ]
    }

    fn write(rows: &[Vec<Datum>], null_as: &str) -> Result<String, Box<dyn std::error::Error>> {
        let mut sink = CsvSink::new(&fields(), null_as, Vec::new());
        for datums in rows {
            sink.push(&DecodedRow {
                datums: datums.clone(),
            })?;
        }
        Ok(String::from_utf8(sink.finish()?)?)
    }

    #[test]
    fn renders_rows_without_header() -> Result<(), Box<dyn std::error::Error>> {
        let at = Utc.with_ymd_and_hms(2022, 2, 10, 21, 28, 43).single().ok_or("bad time")?;
        let out = write(
            &[vec![
                Datum::Int(1),
                Datum::String("a, b".into()),
                Datum::Bytes(vec![0xca, 0xfe]),
                Datum::Bool(true),
                Datum::Timestamp(at),
            ]],
            "null",
        )?;
        assert_eq!(out, "1,\"a, b\",\\xcafe,true,2022-02-10 21:28:43+00:00\n");
        Ok(())
    }

    #[test]
    fn null_fields_use_placeholder() -> Result<(), Box<dyn std::error::Error>> {
        let row = vec![
            Datum::Int(7),
            Datum::Null,
            Datum::Bytes(vec![]),
            Datum::Null,
            Datum::Null,
        ];
        let out = write(&[row.clone()], "N/A")?;
        let fields: Vec<&str> = out.trim_end().split(',').collect();
        assert_eq!(fields[1], "N/A");
        assert_eq!(fields[2], "\\x");

        let out = write(&[row], "null")?;
        assert_eq!(out, "7,null,\\x,null,null\n");
        Ok(())
    }

    #[test]
    fn rejects_mismatched_rows() {
        let mut sink = CsvSink::new(&fields(), "null", Vec::new());
        let short = DecodedRow {
            datums: vec![Datum::Int(1)],
        };
        assert!(matches!(sink.push(&short), Err(SinkError::RowArity { .. })));

        let wrong = DecodedRow {
            datums: vec![
                Datum::String("x".into()),
                Datum::Null,
                Datum::Null,
                Datum::Null,
                Datum::Null,
            ],
        };
        let err = sink.push(&wrong).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DecodeFailure);
    }

    #[test]
    fn large_exports_are_batched() -> Result<(), Box<dyn std::error::Error>> {
        let rows: Vec<Vec<Datum>> = (0..(BATCH_ROWS as i64 + 3))
            .map(|i| vec![Datum::Int(i), Datum::Null, Datum::Null, Datum::Null, Datum::Null])
            .collect();
        let out = write(&rows, "")?;
        assert_eq!(out.lines().count(), BATCH_ROWS + 3);
        assert_eq!(out.lines().last(), Some("1026,,,,"));
        Ok(())
    }
}
