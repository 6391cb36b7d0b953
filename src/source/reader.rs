//! Parquet dataset reader.
//!
//! Streams Arrow record batches out of a Parquet object with ranged reads,
//! so only the footer and the row groups in flight are held in memory.

use arrow::datatypes::SchemaRef;
use parquet::arrow::ParquetRecordBatchStreamBuilder;
use parquet::arrow::async_reader::{ParquetObjectReader, ParquetRecordBatchStream};
use snafu::prelude::*;
use tracing::debug;

use crate::error::{DecodeSnafu, ReadError};

/// A Parquet object ready to be read batch by batch.
///
/// Batches come out in file order with a uniform schema. The dataset can
/// only be streamed once.
pub struct ParquetDataset {
    stream: ParquetRecordBatchStream<ParquetObjectReader>,
    schema: SchemaRef,
    num_rows: u64,
}

impl std::fmt::Debug for ParquetDataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParquetDataset")
            .field("num_rows", &self.num_rows)
            .field("columns", &self.schema.fields().len())
            .finish()
    }
}

impl ParquetDataset {
    /// Read the footer through `reader` and prepare a stream of batches of
    /// at most `batch_size` rows.
    ///
    /// `url` is only used in error messages.
    pub async fn open(
        reader: ParquetObjectReader,
        batch_size: usize,
        url: &str,
    ) -> Result<Self, ReadError> {
        let builder = ParquetRecordBatchStreamBuilder::new(reader)
            .await
            .context(DecodeSnafu { url })?;

        let num_rows = u64::try_from(builder.metadata().file_metadata().num_rows()).unwrap_or(0);
        let row_groups = builder.metadata().num_row_groups();
        let schema = builder.schema().clone();

        let stream = builder
            .with_batch_size(batch_size.max(1))
            .build()
            .context(DecodeSnafu { url })?;

        debug!(
            "Opened {} ({} rows, {} row groups, {} columns)",
            url,
            num_rows,
            row_groups,
            schema.fields().len()
        );

        Ok(Self {
            stream,
            schema,
            num_rows,
        })
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// Row count declared by the file footer.
    pub fn num_rows(&self) -> u64 {
        self.num_rows
    }

    /// Consume the dataset, yielding its record batches in order.
    pub fn into_stream(self) -> ParquetRecordBatchStream<ParquetObjectReader> {
        self.stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{ArrayRef, Int64Array, RecordBatch, StringArray};
    use bytes::Bytes;
    use futures::TryStreamExt;
    use object_store::ObjectStore;
    use object_store::memory::InMemory;
    use object_store::path::Path;
    use parquet::arrow::ArrowWriter;
    use std::sync::Arc;

    fn parquet_bytes(batch: &RecordBatch) -> Bytes {
        let mut buf = Vec::new();
        let mut writer = ArrowWriter::try_new(&mut buf, batch.schema(), None).unwrap();
        writer.write(batch).unwrap();
        writer.close().unwrap();
        Bytes::from(buf)
    }

    fn sample(rows: i64) -> RecordBatch {
        let ids: ArrayRef = Arc::new(Int64Array::from_iter_values(0..rows));
        let names: ArrayRef = Arc::new(StringArray::from_iter_values(
            (0..rows).map(|i| format!("row-{i}")),
        ));
        RecordBatch::try_from_iter([("id", ids), ("name", names)]).unwrap()
    }

    async fn open(data: Bytes, batch_size: usize) -> Result<ParquetDataset, ReadError> {
        let store = Arc::new(InMemory::new());
        let path = Path::from("sample.parquet");
        let size = data.len() as u64;
        store.put(&path, data.into()).await.unwrap();

        let reader = ParquetObjectReader::new(store, path).with_file_size(size);
        ParquetDataset::open(reader, batch_size, "memory://sample.parquet").await
    }

    #[tokio::test]
    async fn test_reads_footer_and_batches() {
        let dataset = open(parquet_bytes(&sample(10)), 4).await.unwrap();

        assert_eq!(dataset.num_rows(), 10);
        assert_eq!(dataset.schema().fields().len(), 2);

        let sizes: Vec<usize> = dataset
            .into_stream()
            .map_ok(|b| b.num_rows())
            .try_collect()
            .await
            .unwrap();
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[tokio::test]
    async fn test_empty_file_has_zero_rows() {
        let dataset = open(parquet_bytes(&sample(0)), 8).await.unwrap();
        assert_eq!(dataset.num_rows(), 0);

        let batches: Vec<RecordBatch> = dataset.into_stream().try_collect().await.unwrap();
        assert!(batches.iter().all(|b| b.num_rows() == 0));
    }

    #[tokio::test]
    async fn test_not_parquet_is_decode_error() {
        let err = open(Bytes::from_static(b"{\"not\": \"parquet\"}"), 8)
            .await
            .unwrap_err();
        assert!(matches!(err, ReadError::Decode { .. }));
        assert!(err.to_string().contains("memory://sample.parquet"));
    }
}
