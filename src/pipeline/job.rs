//! In-process view of one conversion task.

use chrono::{DateTime, Utc};
use snafu::prelude::*;

use crate::emit;
use crate::error::{InvalidTransitionSnafu, PipelineError};
use crate::metadata::ProcessingStatus;
use crate::metrics::events::JobStatusChanged;

/// One file conversion and its outcome so far.
///
/// Created in PENDING. Only the runner moves it forward, one transition
/// at a time, and it never moves back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileJob {
    file_id: String,
    source_location: String,
    status: ProcessingStatus,
    output_location: Option<String>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    record_count: Option<u64>,
    error_message: Option<String>,
}

impl FileJob {
    pub fn new(file_id: impl Into<String>, source_location: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            source_location: source_location.into(),
            status: ProcessingStatus::Pending,
            output_location: None,
            started_at: None,
            ended_at: None,
            record_count: None,
            error_message: None,
        }
    }

    pub fn file_id(&self) -> &str {
        &self.file_id
    }

    pub fn source_location(&self) -> &str {
        &self.source_location
    }

    pub fn status(&self) -> ProcessingStatus {
        self.status
    }

    /// Set only once the job has COMPLETED.
    pub fn output_location(&self) -> Option<&str> {
        self.output_location.as_deref()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn record_count(&self) -> Option<u64> {
        self.record_count
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    fn advance(&mut self, next: ProcessingStatus) -> Result<(), PipelineError> {
        ensure!(
            self.status.can_transition_to(next),
            InvalidTransitionSnafu {
                from: self.status,
                to: next
            }
        );
        self.status = next;
        emit!(JobStatusChanged { status: next });
        Ok(())
    }

    pub(crate) fn start(&mut self, at: DateTime<Utc>) -> Result<(), PipelineError> {
        self.advance(ProcessingStatus::InProgress)?;
        self.started_at = Some(at);
        Ok(())
    }

    pub(crate) fn complete(
        &mut self,
        at: DateTime<Utc>,
        output_location: String,
        record_count: u64,
    ) -> Result<(), PipelineError> {
        self.advance(ProcessingStatus::Completed)?;
        self.ended_at = Some(at);
        self.output_location = Some(output_location);
        self.record_count = Some(record_count);
        Ok(())
    }

    pub(crate) fn fail(&mut self, at: DateTime<Utc>, message: String) -> Result<(), PipelineError> {
        self.advance(ProcessingStatus::Failed)?;
        self.ended_at = Some(at);
        self.error_message = Some(message);
        Ok(())
    }
}
