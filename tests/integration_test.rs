//! Integration tests for parquet-relay

use arrow::array::{
    ArrayRef, BooleanArray, Float64Array, Int32Builder, Int64Array, MapBuilder, RecordBatch,
    StringArray, StringBuilder,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use parquet::arrow::ArrowWriter;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use parquet_relay::clock::{Clock, FixedClock};
use parquet_relay::error::{MetadataError, PipelineError, ReadError, TransformError, WriteError};
use parquet_relay::metadata::{
    Attributes, FileRecord, MemoryMetadataStore, MetadataClient, MetadataStore,
};
use parquet_relay::pipeline::{FileJob, PipelineRunner, RunnerSettings};
use parquet_relay::ProcessingStatus;

fn june_first() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
}

fn sample_batch(rows: i64) -> RecordBatch {
    let id: ArrayRef = Arc::new(Int64Array::from_iter_values(0..rows));
    let name: ArrayRef = Arc::new(StringArray::from_iter(
        (0..rows).map(|i| (i % 3 != 2).then(|| format!("name-{i}"))),
    ));
    let score: ArrayRef = Arc::new(Float64Array::from_iter_values(
        (0..rows).map(|i| i as f64 / 2.0),
    ));
    let active: ArrayRef = Arc::new(BooleanArray::from_iter((0..rows).map(|i| Some(i % 2 == 0))));
    RecordBatch::try_from_iter([
        ("id", id),
        ("name", name),
        ("score", score),
        ("active", active),
    ])
    .unwrap()
}

/// Rows whose map column has integer keys, which JSON objects cannot carry.
fn int_keyed_map_batch(rows: i32) -> RecordBatch {
    let mut builder = MapBuilder::new(None, Int32Builder::new(), StringBuilder::new());
    for i in 0..rows {
        builder.keys().append_value(i);
        builder.values().append_value(format!("v{i}"));
        builder.append(true).unwrap();
    }
    let attrs: ArrayRef = Arc::new(builder.finish());
    RecordBatch::try_from_iter([("attrs", attrs)]).unwrap()
}

fn write_parquet(path: &Path, batch: &RecordBatch) {
    let file = std::fs::File::create(path).unwrap();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None).unwrap();
    writer.write(batch).unwrap();
    writer.close().unwrap();
}

/// Source and output directories for one test.
struct Fixture {
    _dir: TempDir,
    input: PathBuf,
    output_root: String,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("input");
        std::fs::create_dir_all(&input).unwrap();
        let output_root = dir.path().join("output").to_str().unwrap().to_string();
        Self {
            _dir: dir,
            input,
            output_root,
        }
    }

    fn source(&self, name: &str, rows: i64) -> String {
        let path = self.input.join(name);
        write_parquet(&path, &sample_batch(rows));
        path.to_str().unwrap().to_string()
    }

    fn raw_source(&self, name: &str, contents: &[u8]) -> String {
        let path = self.input.join(name);
        std::fs::write(&path, contents).unwrap();
        path.to_str().unwrap().to_string()
    }

    fn expected_output(&self, stem: &str) -> String {
        format!("{}/processed-data/2024/06/01/{stem}.json", self.output_root)
    }
}

fn runner_with_store(root: &str, store: Arc<dyn MetadataStore>) -> PipelineRunner {
    let clock: Arc<dyn Clock> = Arc::new(FixedClock::at_date(june_first()));
    let settings = RunnerSettings {
        batch_size: 4,
        ..RunnerSettings::default()
    };
    PipelineRunner::new(MetadataClient::new(store), clock, settings, root)
}

fn memory_store() -> Arc<MemoryMetadataStore> {
    Arc::new(MemoryMetadataStore::new(Arc::new(FixedClock::at_date(
        june_first(),
    ))))
}

async fn record(store: &MemoryMetadataStore, file_id: &str) -> FileRecord {
    store.get(file_id).await.unwrap().unwrap()
}

/// Status store that logs each update along with whether the output object
/// existed at that moment.
///
/// The source object is only written once IN_PROGRESS has been recorded,
/// so a run that reads before recording its start fails with not found.
struct RecordingStore {
    inner: MemoryMetadataStore,
    output: PathBuf,
    deliver: Mutex<Option<(PathBuf, RecordBatch)>>,
    calls: Mutex<Vec<(ProcessingStatus, bool)>>,
}

impl RecordingStore {
    fn new(output: impl Into<PathBuf>, source: impl Into<PathBuf>, batch: RecordBatch) -> Self {
        Self {
            inner: MemoryMetadataStore::new(Arc::new(FixedClock::at_date(june_first()))),
            output: output.into(),
            deliver: Mutex::new(Some((source.into(), batch))),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<(ProcessingStatus, bool)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetadataStore for RecordingStore {
    async fn update(
        &self,
        file_id: &str,
        status: ProcessingStatus,
        attributes: &Attributes,
    ) -> Result<(), MetadataError> {
        self.calls
            .lock()
            .unwrap()
            .push((status, self.output.exists()));
        if status == ProcessingStatus::InProgress {
            if let Some((path, batch)) = self.deliver.lock().unwrap().take() {
                write_parquet(&path, &batch);
            }
        }
        self.inner.update(file_id, status, attributes).await
    }

    async fn get(&self, file_id: &str) -> Result<Option<FileRecord>, MetadataError> {
        self.inner.get(file_id).await
    }
}

/// Status store that rejects every request.
struct FailingStore;

#[async_trait]
impl MetadataStore for FailingStore {
    async fn update(
        &self,
        file_id: &str,
        _status: ProcessingStatus,
        _attributes: &Attributes,
    ) -> Result<(), MetadataError> {
        Err(MetadataError::Unavailable {
            message: format!("write to {file_id} throttled"),
        })
    }

    async fn get(&self, _file_id: &str) -> Result<Option<FileRecord>, MetadataError> {
        Err(MetadataError::Unavailable {
            message: "read throttled".to_string(),
        })
    }
}

mod conversion_tests {
    use super::*;
    use serde_json::Value;

    #[tokio::test]
    async fn test_success_records_completed() {
        let fixture = Fixture::new();
        let source = fixture.source("input.parquet", 10);
        let store = memory_store();
        let runner = runner_with_store(&fixture.output_root, store.clone());

        let mut job = FileJob::new("file-1", &source);
        let summary = runner.run(&mut job).await.unwrap();

        let expected = fixture.expected_output("input");
        assert_eq!(summary.record_count, 10);
        assert_eq!(summary.output_location, expected);
        assert_eq!(job.status(), ProcessingStatus::Completed);
        assert_eq!(job.output_location(), Some(expected.as_str()));

        let record = record(&store, "file-1").await;
        assert_eq!(record.processing_status, ProcessingStatus::Completed);
        assert_eq!(record.record_count, Some(10));
        assert_eq!(record.output_file_path.as_deref(), Some(expected.as_str()));
        assert!(record.started_at.is_some());
        assert!(record.ended_at.is_some());
        assert!(record.error_message.is_none());
        assert_eq!(record.source_file_path.as_deref(), Some(source.as_str()));
        assert!(record.created_at.is_some());

        let written = std::fs::read_to_string(&expected).unwrap();
        assert_eq!(written.len() as u64, summary.bytes_written);
        assert!(written.ends_with('\n'));
        assert_eq!(written.lines().count(), 10);
    }

    #[tokio::test]
    async fn test_output_preserves_rows_and_order() {
        let fixture = Fixture::new();
        let source = fixture.source("ordered.parquet", 9);
        let runner = runner_with_store(&fixture.output_root, memory_store());

        runner
            .run(&mut FileJob::new("ordered", &source))
            .await
            .unwrap();

        let written = std::fs::read_to_string(fixture.expected_output("ordered")).unwrap();
        let rows: Vec<Value> = written
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        for (i, row) in rows.iter().enumerate() {
            assert_eq!(row["id"], i as i64);
            assert_eq!(row["score"], i as f64 / 2.0);
            assert_eq!(row["active"], i % 2 == 0);
            if i % 3 == 2 {
                assert!(row["name"].is_null());
            } else {
                assert_eq!(row["name"], format!("name-{i}"));
            }
            assert_eq!(row.as_object().unwrap().len(), 4);
        }
    }

    #[tokio::test]
    async fn test_special_characters_in_names_kept_verbatim() {
        let fixture = Fixture::new();
        let store = memory_store();
        let runner = runner_with_store(&fixture.output_root, store.clone());

        for (i, stem) in ["report[1]", "sales#2024", "50%off"].into_iter().enumerate() {
            let source = fixture.source(&format!("{stem}.parquet"), 3);
            let file_id = format!("special-{i}");

            let summary = runner
                .run(&mut FileJob::new(&file_id, &source))
                .await
                .unwrap();

            let expected = fixture.expected_output(stem);
            assert_eq!(summary.output_location, expected);
            assert_eq!(std::fs::read_to_string(&expected).unwrap().lines().count(), 3);
            assert_eq!(
                record(&store, &file_id).await.output_file_path.as_deref(),
                Some(expected.as_str())
            );
        }
    }

    #[tokio::test]
    async fn test_multiple_chunks_written_in_order() {
        let fixture = Fixture::new();
        let source = fixture.source("large.parquet", 50_000);
        let runner = runner_with_store(&fixture.output_root, memory_store());

        let summary = runner
            .run(&mut FileJob::new("large", &source))
            .await
            .unwrap();
        assert!(summary.bytes_written > 1024 * 1024);

        let written = std::fs::read_to_string(fixture.expected_output("large")).unwrap();
        let ids: Vec<i64> = written
            .lines()
            .map(|line| serde_json::from_str::<Value>(line).unwrap()["id"].as_i64().unwrap())
            .collect();
        assert_eq!(ids, (0..50_000).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_empty_source_completes_with_zero_records() {
        let fixture = Fixture::new();
        let source = fixture.source("empty.parquet", 0);
        let store = memory_store();
        let runner = runner_with_store(&fixture.output_root, store.clone());

        let summary = runner
            .run(&mut FileJob::new("empty", &source))
            .await
            .unwrap();
        assert_eq!(summary.record_count, 0);
        assert_eq!(record(&store, "empty").await.record_count, Some(0));
        assert_eq!(
            std::fs::read(fixture.expected_output("empty")).unwrap().len(),
            0
        );
    }
}

mod failure_tests {
    use super::*;

    #[tokio::test]
    async fn test_corrupt_source_records_failed() {
        let fixture = Fixture::new();
        let source = fixture.raw_source("broken.parquet", b"definitely not parquet");
        let store = memory_store();
        let runner = runner_with_store(&fixture.output_root, store.clone());

        let mut job = FileJob::new("broken", &source);
        let err = runner.run(&mut job).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Read {
                source: ReadError::Decode { .. }
            }
        ));
        assert_eq!(job.status(), ProcessingStatus::Failed);

        let record = record(&store, "broken").await;
        assert_eq!(record.processing_status, ProcessingStatus::Failed);
        let message = record.error_message.unwrap();
        assert!(!message.is_empty());
        assert_eq!(message, err.to_string());
        assert!(record.record_count.is_none());
        assert!(record.output_file_path.is_none());
        assert!(record.ended_at.is_some());

        assert!(!Path::new(&fixture.expected_output("broken")).exists());
    }

    #[tokio::test]
    async fn test_unencodable_rows_record_failed() {
        let fixture = Fixture::new();
        let path = fixture.input.join("mapped.parquet");
        write_parquet(&path, &int_keyed_map_batch(3));
        let store = memory_store();
        let runner = runner_with_store(&fixture.output_root, store.clone());

        let mut job = FileJob::new("mapped", path.to_str().unwrap());
        let err = runner.run(&mut job).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Transform {
                source: TransformError::Encode { .. }
            }
        ));
        assert_eq!(job.status(), ProcessingStatus::Failed);

        let record = record(&store, "mapped").await;
        assert_eq!(record.processing_status, ProcessingStatus::Failed);
        assert_eq!(record.error_message.as_deref(), Some(err.to_string().as_str()));
        assert!(!Path::new(&fixture.expected_output("mapped")).exists());
    }

    #[tokio::test]
    async fn test_output_root_not_a_directory_records_failed() {
        let fixture = Fixture::new();
        let source = fixture.source("input.parquet", 3);
        std::fs::write(&fixture.output_root, b"a regular file").unwrap();
        let store = memory_store();
        let runner = runner_with_store(&fixture.output_root, store.clone());

        let mut job = FileJob::new("blocked", &source);
        let err = runner.run(&mut job).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Write {
                source: WriteError::OpenOutput { .. }
            }
        ));

        let record = record(&store, "blocked").await;
        assert_eq!(record.processing_status, ProcessingStatus::Failed);
        let message = record.error_message.unwrap();
        assert!(!message.is_empty());
        assert_eq!(message, err.to_string());
        assert!(record.output_file_path.is_none());
    }

    #[tokio::test]
    async fn test_upload_failure_records_failed_after_read() {
        let fixture = Fixture::new();
        let source = fixture.input.join("input.parquet");
        // A file where the partition directory should be
        std::fs::create_dir_all(&fixture.output_root).unwrap();
        std::fs::write(
            Path::new(&fixture.output_root).join("processed-data"),
            b"in the way",
        )
        .unwrap();

        let store = Arc::new(RecordingStore::new(
            fixture.expected_output("input"),
            &source,
            sample_batch(5),
        ));
        let runner = runner_with_store(&fixture.output_root, store.clone());

        let err = runner
            .run(&mut FileJob::new("f1", source.to_str().unwrap()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Write {
                source: WriteError::Upload { .. }
            }
        ));
        assert_eq!(
            store.calls(),
            vec![
                (ProcessingStatus::InProgress, false),
                (ProcessingStatus::Failed, false),
            ]
        );

        let record = store.get("f1").await.unwrap().unwrap();
        assert_eq!(record.error_message.as_deref(), Some(err.to_string().as_str()));
    }

    #[tokio::test]
    async fn test_missing_source_is_not_found() {
        let fixture = Fixture::new();
        let source = fixture.input.join("absent.parquet");
        let store = memory_store();
        let runner = runner_with_store(&fixture.output_root, store.clone());

        let err = runner
            .run(&mut FileJob::new("absent", source.to_str().unwrap()))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(
            record(&store, "absent").await.processing_status,
            ProcessingStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_source_without_base_name_is_invalid_path() {
        let fixture = Fixture::new();
        let source = fixture.source(".parquet", 3);
        let store = memory_store();
        let runner = runner_with_store(&fixture.output_root, store.clone());

        let err = runner
            .run(&mut FileJob::new("hidden", &source))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidPath { .. }));
        assert_eq!(
            record(&store, "hidden").await.processing_status,
            ProcessingStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_failing_store_does_not_change_outcome() {
        let fixture = Fixture::new();
        let good = fixture.source("good.parquet", 5);
        let bad = fixture.raw_source("bad.parquet", b"nope");
        let runner = runner_with_store(&fixture.output_root, Arc::new(FailingStore));

        let summary = runner.run(&mut FileJob::new("good", &good)).await.unwrap();
        assert_eq!(summary.record_count, 5);
        assert!(Path::new(&fixture.expected_output("good")).exists());

        let err = runner
            .run(&mut FileJob::new("bad", &bad))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Read { .. }));
    }
}

mod ordering_tests {
    use super::*;

    #[tokio::test]
    async fn test_completed_recorded_after_read_and_write() {
        let fixture = Fixture::new();
        let source = fixture.input.join("input.parquet");
        let store = Arc::new(RecordingStore::new(
            fixture.expected_output("input"),
            &source,
            sample_batch(6),
        ));
        let runner = runner_with_store(&fixture.output_root, store.clone());

        let summary = runner
            .run(&mut FileJob::new("f1", source.to_str().unwrap()))
            .await
            .unwrap();
        assert_eq!(summary.record_count, 6);

        // The source only exists once IN_PROGRESS is recorded, and the
        // output exists by the time COMPLETED is
        assert_eq!(
            store.calls(),
            vec![
                (ProcessingStatus::InProgress, false),
                (ProcessingStatus::Completed, true),
            ]
        );
    }
}

mod rerun_tests {
    use super::*;

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let fixture = Fixture::new();
        let source = fixture.source("input.parquet", 7);
        let store = memory_store();
        let runner = runner_with_store(&fixture.output_root, store.clone());

        let first = runner.run(&mut FileJob::new("f1", &source)).await.unwrap();
        let first_bytes = std::fs::read(&first.output_location).unwrap();

        let second = runner.run(&mut FileJob::new("f1", &source)).await.unwrap();
        let second_bytes = std::fs::read(&second.output_location).unwrap();

        assert_eq!(first.output_location, second.output_location);
        assert_eq!(first_bytes, second_bytes);
        assert_eq!(store.len(), 1);
        assert_eq!(record(&store, "f1").await.record_count, Some(7));
    }

    #[tokio::test]
    async fn test_rerun_after_failure_converges() {
        let fixture = Fixture::new();
        let source = fixture.raw_source("input.parquet", b"truncated upload");
        let store = memory_store();
        let runner = runner_with_store(&fixture.output_root, store.clone());

        assert!(runner.run(&mut FileJob::new("f1", &source)).await.is_err());
        assert!(record(&store, "f1").await.error_message.is_some());

        // The upstream producer re-delivers a valid object
        write_parquet(Path::new(&source), &sample_batch(3));
        runner.run(&mut FileJob::new("f1", &source)).await.unwrap();

        let record = record(&store, "f1").await;
        assert_eq!(record.processing_status, ProcessingStatus::Completed);
        assert_eq!(record.record_count, Some(3));
        assert!(record.error_message.is_none());
    }

    #[tokio::test]
    async fn test_rerun_after_success_clears_result_on_failure() {
        let fixture = Fixture::new();
        let source = fixture.source("input.parquet", 3);
        let store = memory_store();
        let runner = runner_with_store(&fixture.output_root, store.clone());

        runner.run(&mut FileJob::new("f1", &source)).await.unwrap();
        std::fs::write(&source, b"corrupted").unwrap();
        assert!(runner.run(&mut FileJob::new("f1", &source)).await.is_err());

        let record = record(&store, "f1").await;
        assert_eq!(record.processing_status, ProcessingStatus::Failed);
        assert!(record.record_count.is_none());
        assert!(record.output_file_path.is_none());
        assert!(record.error_message.is_some());
    }
}

mod object_store_tests {
    use super::*;
    use parquet_relay::config::{Config, JobConfig};

    #[tokio::test]
    async fn test_from_config_records_status_under_output_root() {
        let fixture = Fixture::new();
        let source = fixture.source("input.parquet", 4);

        let mut config = Config::default();
        config.job.merge(JobConfig {
            source_location: Some(source.clone()),
            output_root: Some(fixture.output_root.clone()),
            metadata_table: Some("file_status".to_string()),
            file_id: Some("f1".to_string()),
        });
        let params = config.job_parameters().unwrap();

        let runner = PipelineRunner::from_config(&config, &params).await.unwrap();
        let summary = runner
            .run(&mut FileJob::new(&params.file_id, &params.source_location))
            .await
            .unwrap();
        assert_eq!(summary.record_count, 4);
        assert!(Path::new(&summary.output_location).exists());

        let status_path = Path::new(&fixture.output_root)
            .join("_metadata")
            .join("file_status")
            .join("f1.json");
        let doc: serde_json::Value =
            serde_json::from_slice(&std::fs::read(status_path).unwrap()).unwrap();
        assert_eq!(doc["processing_status"], "COMPLETED");
        assert_eq!(doc["record_count"], 4);
        assert_eq!(doc["output_file_path"], summary.output_location.as_str());
    }
}
