// Storage module - handles metric record persistence to MongoDB
//
// This module is responsible for:
// 1. Defining the seam the dispatcher writes records through
// 2. Inserting record documents into their metric type's collection
// 3. Creating query indexes on the metric collections

use async_trait::async_trait;
use bson::{doc, Document};
use mongodb::options::IndexOptions;
use mongodb::{Client, Collection, IndexModel};
use thiserror::Error;
use tracing::{debug, info};

use crate::metrics::{MetricRecord, MetricType};

/// Errors that can occur during record storage
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("MongoDB insert failed: {0}")]
    InsertError(#[from] mongodb::error::Error),

    #[error("Invalid document format: {0}")]
    InvalidDocument(String),
}

/// Destination for metric records
///
/// Every insert is independent: a failed insert says nothing about the
/// other records of the same flush cycle.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Persists one record into the destination bound to `metric_type`
    async fn insert(&self, metric_type: MetricType, record: &MetricRecord)
        -> Result<(), StorageError>;
}

/// MongoDB-backed record storage
///
/// Each metric type is stored in its own collection, see [`MetricType::collection`].
pub struct MetricStorage {
    /// MongoDB client for database operations
    client: Client,

    /// Database name where records are stored
    database_name: String,
}

impl MetricStorage {
    /// Creates a new MetricStorage instance
    ///
    /// # Arguments
    /// * `client` - MongoDB client (cheap to clone, shares the connection pool)
    /// * `database_name` - Name of the database where records will be stored
    pub fn new(client: &Client, database_name: &str) -> Self {
        MetricStorage {
            client: client.clone(),
            database_name: database_name.to_string(),
        }
    }

    fn collection(&self, metric_type: MetricType) -> Collection<Document> {
        self.client
            .database(&self.database_name)
            .collection(metric_type.collection())
    }

    /// Creates the lookup index on every persisted metric collection
    ///
    /// # Index
    /// `namespace` + `bucket` + `time` (descending), for reading the
    /// history of one metric key, most recent first.
    ///
    /// # Note
    /// Optional. Indexes speed up queries but slightly slow down inserts.
    pub async fn create_indexes(&self, metric_type: MetricType) -> Result<(), StorageError> {
        info!(
            "Creating indexes for collection '{}'",
            metric_type.collection()
        );

        let index = IndexModel::builder()
            .keys(doc! {
                "namespace": 1,
                "bucket": 1,
                "time": -1
            })
            .options(
                IndexOptions::builder()
                    .name("namespace_bucket_time_idx".to_string())
                    .build(),
            )
            .build();

        self.collection(metric_type).create_index(index, None).await?;

        info!(
            "Successfully created indexes for collection '{}'",
            metric_type.collection()
        );
        Ok(())
    }
}

#[async_trait]
impl RecordSink for MetricStorage {
    /// Inserts the record document, without retry
    async fn insert(
        &self,
        metric_type: MetricType,
        record: &MetricRecord,
    ) -> Result<(), StorageError> {
        let document = record
            .to_document()
            .map_err(|e| StorageError::InvalidDocument(e.to_string()))?;

        // MongoDB will automatically add an _id field
        let result = self.collection(metric_type).insert_one(document, None).await?;

        debug!(
            "Stored record with id: {:?} in collection '{}'",
            result.inserted_id,
            metric_type.collection()
        );
        Ok(())
    }
}
