//! Row encoding from Arrow record batches to JSON lines.
//!
//! Every row becomes one JSON object whose keys are the column names.
//! Null values are written as explicit `null`s so each line carries the
//! full column set of its row.

use arrow::array::RecordBatch;
use arrow::error::ArrowError;
use arrow::json::WriterBuilder;
use arrow::json::writer::LineDelimited;
use bytes::{Buf, Bytes};
use snafu::prelude::*;
use std::iter::FusedIterator;

use crate::error::{EncodeSnafu, ReadBatchSnafu, TransformError};

/// Encodes record batches as line-delimited JSON.
#[derive(Debug, Clone, Copy)]
pub struct JsonLinesEncoder {
    explicit_nulls: bool,
}

impl Default for JsonLinesEncoder {
    fn default() -> Self {
        Self {
            explicit_nulls: true,
        }
    }
}

impl JsonLinesEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop null-valued keys from objects instead of writing `null`.
    pub fn with_explicit_nulls(mut self, explicit_nulls: bool) -> Self {
        self.explicit_nulls = explicit_nulls;
        self
    }

    /// Lazily encode `batches`, one item per row.
    pub fn encode<I>(&self, batches: I) -> EncodedRecords<I>
    where
        I: Iterator<Item = Result<RecordBatch, ArrowError>>,
    {
        EncodedRecords {
            batches,
            encoder: *self,
            pending: Bytes::new(),
            records_emitted: 0,
            done: false,
        }
    }

    /// Encode one batch. Every row is terminated by `\n`.
    pub fn encode_batch(&self, batch: &RecordBatch) -> Result<Bytes, TransformError> {
        let mut writer = WriterBuilder::new()
            .with_explicit_nulls(self.explicit_nulls)
            .build::<_, LineDelimited>(Vec::new());
        writer.write(batch).context(EncodeSnafu)?;
        writer.finish().context(EncodeSnafu)?;
        Ok(Bytes::from(writer.into_inner()))
    }
}

/// Iterator over encoded rows, produced by [`JsonLinesEncoder::encode`].
///
/// Yields each row as a JSON object without its trailing newline. Each
/// batch is pulled from the underlying iterator exactly once, and nothing
/// more is yielded after the first error.
pub struct EncodedRecords<I> {
    batches: I,
    encoder: JsonLinesEncoder,
    /// Remaining newline-terminated rows of the current batch.
    pending: Bytes,
    records_emitted: u64,
    done: bool,
}

impl<I> EncodedRecords<I> {
    /// Rows yielded so far.
    pub fn records_emitted(&self) -> u64 {
        self.records_emitted
    }

    fn next_line(&mut self) -> Option<Bytes> {
        let end = self.pending.iter().position(|b| *b == b'\n')?;
        let line = self.pending.split_to(end);
        self.pending.advance(1);
        Some(line)
    }
}

impl<I> Iterator for EncodedRecords<I>
where
    I: Iterator<Item = Result<RecordBatch, ArrowError>>,
{
    type Item = Result<Bytes, TransformError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(line) = self.next_line() {
                self.records_emitted += 1;
                return Some(Ok(line));
            }
            if self.done {
                return None;
            }

            let encoded = match self.batches.next() {
                None => {
                    self.done = true;
                    return None;
                }
                Some(batch) => batch
                    .context(ReadBatchSnafu)
                    .and_then(|batch| self.encoder.encode_batch(&batch)),
            };

            match encoded {
                Ok(bytes) => self.pending = bytes,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

impl<I> FusedIterator for EncodedRecords<I> where
    I: Iterator<Item = Result<RecordBatch, ArrowError>>
{
}
