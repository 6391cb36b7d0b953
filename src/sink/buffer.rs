//! Assembly of encoded lines into upload chunks.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::TransformError;

/// Newline-terminated lines accumulated before they are handed to a writer.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: BytesMut,
    lines: u64,
}

impl LineBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            lines: 0,
        }
    }

    /// Append one line. `line` must not contain a newline.
    pub fn push(&mut self, line: &[u8]) {
        self.buf.reserve(line.len() + 1);
        self.buf.put_slice(line);
        self.buf.put_u8(b'\n');
        self.lines += 1;
    }

    /// Drain `records` into a new buffer, stopping at the first error.
    pub fn collect<I>(records: I) -> Result<Self, TransformError>
    where
        I: IntoIterator<Item = Result<Bytes, TransformError>>,
    {
        let mut buffer = Self::default();
        for line in records {
            buffer.push(&line?);
        }
        Ok(buffer)
    }

    /// Take everything buffered so far, leaving the buffer empty.
    ///
    /// The line count keeps running across splits.
    pub fn split(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    pub fn lines(&self) -> u64 {
        self.lines
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}
