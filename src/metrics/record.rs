// Metric record - one persisted reading
//
// Turns a single (time, key, value) reading from a flush snapshot into the
// document stored in MongoDB. The dotted key is split into namespace and bucket.

use bson::Document;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single metric reading as stored in MongoDB
///
/// # Document Structure
/// ```json
/// {
///   "time": 1000,
///   "namespace": "app",
///   "bucket": "requests",
///   "value": 42
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    /// Unix timestamp (seconds) of the flush cycle that produced this record
    pub time: i64,

    /// Everything before the last `.` of the key, or empty
    pub namespace: String,

    /// Last segment of the key
    pub bucket: String,

    /// The reading itself, a number or any structured value
    pub value: Value,
}

impl MetricRecord {
    /// Builds a record from one snapshot reading
    ///
    /// Never fails: keys without a usable separator keep the whole key as
    /// the bucket and get an empty namespace.
    ///
    /// # Example
    /// ```
    /// let record = MetricRecord::build(1000, "app.requests", json!(42));
    /// assert_eq!(record.namespace, "app");
    /// assert_eq!(record.bucket, "requests");
    /// ```
    pub fn build(time: i64, key: &str, value: Value) -> Self {
        let (namespace, bucket) = split_key(key);

        MetricRecord {
            time,
            namespace: namespace.to_string(),
            bucket: bucket.to_string(),
            value,
        }
    }

    /// Reconstructs the dotted key this record was built from
    pub fn key(&self) -> String {
        if self.namespace.is_empty() {
            self.bucket.clone()
        } else {
            format!("{}.{}", self.namespace, self.bucket)
        }
    }

    /// Converts the record into the BSON document inserted into MongoDB
    ///
    /// Fails when the value has no BSON representation, e.g. an unsigned
    /// integer above `i64::MAX`.
    pub fn to_document(&self) -> Result<Document, bson::ser::Error> {
        bson::to_document(self)
    }
}

/// Splits a dotted metric key into `(namespace, bucket)`
///
/// The key is split at its last `.`, but only when its first `.` sits past
/// position 0. A key such as `.hidden.metric` therefore stays whole.
pub fn split_key(key: &str) -> (&str, &str) {
    match key.find('.') {
        Some(first) if first > 0 => {
            // first > 0 guarantees a last separator exists
            let last = key.rfind('.').unwrap_or(first);
            (&key[..last], &key[last + 1..])
        }
        _ => ("", key),
    }
}
