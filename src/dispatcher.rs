// Dispatcher module - turns flush snapshots into stored records
//
// On every flush statsd hands over a snapshot of all aggregated metrics.
// The dispatcher builds one record per reading and writes each of them
// in its own Tokio task, so the flush never waits on MongoDB.
//
// # Failure Handling
// - A failed write is logged with its destination and dotted key
// - The status' last_exception is moved to the current time
// - Nothing is retried and sibling records are unaffected

use chrono::Utc;
use futures_util::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::metrics::{MetricRecord, MetricSnapshot, MetricType};
use crate::status::BackendStatus;
use crate::storage::{RecordSink, StorageError};

/// Writes flush snapshots to a [`RecordSink`]
pub struct FlushDispatcher {
    /// Where records are written
    sink: Arc<dyn RecordSink>,

    /// Backend telemetry, shared with the status reporter
    status: Arc<BackendStatus>,
}

/// Outcome of dispatching one flush snapshot
///
/// Holds the write task of every submitted record. Dropping it leaves the
/// writes running in the background; [`FlushCycle::join`] waits for them.
#[derive(Debug)]
pub struct FlushCycle {
    /// Flush timestamp shared by every record of the cycle
    pub time: i64,

    /// Number of records handed to the sink
    pub submitted: usize,

    /// Groups that produced no records because of an unknown type or shape
    pub skipped_groups: usize,

    tasks: Vec<JoinHandle<()>>,
}

impl FlushCycle {
    /// Whether every write of this cycle has completed
    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(|task| task.is_finished())
    }

    /// Waits until every write of this cycle has completed
    pub async fn join(self) {
        for result in join_all(self.tasks).await {
            if let Err(e) = result {
                error!("Record write task panicked: {}", e);
            }
        }
    }
}

impl FlushDispatcher {
    pub fn new(sink: Arc<dyn RecordSink>, status: Arc<BackendStatus>) -> Self {
        FlushDispatcher { sink, status }
    }

    pub fn status(&self) -> &Arc<BackendStatus> {
        &self.status
    }

    /// Dispatches one flush snapshot
    ///
    /// # Behavior
    /// - `last_flush` is set to `time` before any record is submitted
    /// - `pctThreshold` is skipped whatever its content
    /// - Absent (`null`) and empty groups produce nothing
    /// - Unknown group names are logged as errors and skipped
    /// - Each reading becomes one record written by its own task
    ///
    /// Must be called from within a Tokio runtime.
    pub fn on_flush(&self, time: i64, snapshot: &MetricSnapshot) -> FlushCycle {
        self.status.record_flush(time);

        if snapshot.is_empty() {
            debug!("Flush {}: empty snapshot", time);
        }

        let mut cycle = FlushCycle {
            time,
            submitted: 0,
            skipped_groups: 0,
            tasks: Vec::new(),
        };

        for (group, content) in snapshot.groups() {
            let metric_type = match group.parse::<MetricType>() {
                Ok(metric_type) => metric_type,
                Err(e) => {
                    error!(group, keys = key_count(content), "{}, skipping group", e);
                    cycle.skipped_groups += 1;
                    continue;
                }
            };

            if !metric_type.is_persisted() {
                continue;
            }

            let readings = match content {
                Value::Object(readings) => readings,
                Value::Null => continue,
                other => {
                    warn!(
                        group,
                        "Expected an object of metric keys, got {}, skipping group",
                        json_kind(other)
                    );
                    cycle.skipped_groups += 1;
                    continue;
                }
            };

            for (key, value) in readings {
                if key.is_empty() {
                    warn!(group, "Skipping reading with an empty metric key");
                    continue;
                }

                let record = MetricRecord::build(time, key, value.clone());
                cycle.tasks.push(self.submit(metric_type, record));
                cycle.submitted += 1;
            }
        }

        debug!(
            "Flush {}: submitted {} record(s), skipped {} group(s)",
            time, cycle.submitted, cycle.skipped_groups
        );

        cycle
    }

    /// Spawns the write of a single record
    fn submit(&self, metric_type: MetricType, record: MetricRecord) -> JoinHandle<()> {
        let sink = Arc::clone(&self.sink);
        let status = Arc::clone(&self.status);

        tokio::spawn(async move {
            if let Err(e) = sink.insert(metric_type, &record).await {
                report_failure(&status, metric_type, &record, &e);
            }
        })
    }
}

/// Logs a failed write and stamps the status with the failure time
fn report_failure(
    status: &BackendStatus,
    metric_type: MetricType,
    record: &MetricRecord,
    err: &StorageError,
) {
    error!(
        destination = metric_type.destination(),
        key = %record.key(),
        error = %err,
        "{}",
        failure_message(metric_type, record)
    );
    status.record_exception(Utc::now().timestamp());
}

fn failure_message(metric_type: MetricType, record: &MetricRecord) -> String {
    format!(
        "Unable to write {} key:\"{}\" to database",
        metric_type.destination(),
        record.key()
    )
}

fn key_count(content: &Value) -> usize {
    content.as_object().map_or(0, |readings| readings.len())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
