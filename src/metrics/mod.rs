//! Metrics for conversion runs.
//!
//! - `events`: Internal event types and the `InternalEvent` trait
//! - `snapshot`: Prometheus recorder flushed once when the run ends

pub mod events;
pub mod snapshot;

pub use snapshot::{MetricsController, flush, init};

/// Emit an internal event.
///
/// Calls `InternalEvent::emit()` on the given event, which records the
/// corresponding metric. Without an installed recorder this is a no-op.
///
/// ```ignore
/// use parquet_relay::metrics::events::RecordsConverted;
///
/// emit!(RecordsConverted { count: 100 });
/// ```
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::metrics::events::InternalEvent::emit($event)
    };
}
