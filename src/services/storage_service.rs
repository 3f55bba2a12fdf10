//! src/services/storage_service.rs
//!
//! ObjectStore covers the two storage-provider calls the emptier needs, a
//! paginated key listing and a batched multi-object delete. `S3ObjectStore`
//! implements them on top of `aws-sdk-s3`.

use crate::models::object::ObjectPage;
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    error::DisplayErrorContext,
    operation::{delete_objects::DeleteObjectsOutput, list_objects_v2::ListObjectsV2Output},
    types::{Delete, ObjectIdentifier},
};
use thiserror::Error;
use tracing::debug;

/// Provider limit on keys per listing page and per `DeleteObjects` call.
pub const MAX_KEYS_PER_REQUEST: usize = 1000;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("listing bucket `{bucket}` failed: {source}")]
    List {
        bucket: String,
        #[source]
        source: BoxError,
    },
    #[error("deleting objects from bucket `{bucket}` failed: {source}")]
    Delete {
        bucket: String,
        #[source]
        source: BoxError,
    },
    #[error("{failed} object(s) in bucket `{bucket}` were not deleted (first `{key}`: {reason})")]
    PartialDelete {
        bucket: String,
        failed: usize,
        key: String,
        reason: String,
    },
    #[error("invalid storage request: {0}")]
    InvalidRequest(String),
    #[error("emptying bucket `{0}` was cancelled")]
    Cancelled(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// The storage provider, as far as emptying a bucket is concerned.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch one page of object keys, starting at `continuation_token`.
    async fn list_page(
        &self,
        bucket: &str,
        continuation_token: Option<String>,
        max_keys: usize,
    ) -> StorageResult<ObjectPage>;

    /// Delete every key in `keys` with a single request.
    ///
    /// Deleting a key that does not exist succeeds.
    async fn delete_batch(&self, bucket: &str, keys: Vec<String>) -> StorageResult<()>;
}

/// `ObjectStore` backed by the S3 API.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list_page(
        &self,
        bucket: &str,
        continuation_token: Option<String>,
        max_keys: usize,
    ) -> StorageResult<ObjectPage> {
        let max_keys = max_keys.clamp(1, MAX_KEYS_PER_REQUEST);
        let output = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .max_keys(max_keys as i32)
            .set_continuation_token(continuation_token)
            .send()
            .await
            .map_err(|err| StorageError::List {
                bucket: bucket.to_string(),
                source: DisplayErrorContext(err).to_string().into(),
            })?;

        let page = page_from(&output);
        debug!(
            bucket,
            keys = page.keys.len(),
            more = page.next_continuation_token.is_some(),
            "listed object page"
        );
        Ok(page)
    }

    async fn delete_batch(&self, bucket: &str, keys: Vec<String>) -> StorageResult<()> {
        if keys.len() > MAX_KEYS_PER_REQUEST {
            return Err(StorageError::InvalidRequest(format!(
                "{} keys exceeds the per-request limit of {}",
                keys.len(),
                MAX_KEYS_PER_REQUEST
            )));
        }

        let objects = keys
            .into_iter()
            .map(|key| ObjectIdentifier::builder().key(key).build())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| StorageError::InvalidRequest(err.to_string()))?;
        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(true)
            .build()
            .map_err(|err| StorageError::InvalidRequest(err.to_string()))?;

        let output = self
            .client
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|err| StorageError::Delete {
                bucket: bucket.to_string(),
                source: DisplayErrorContext(err).to_string().into(),
            })?;

        check_deleted(&output, bucket)
    }
}

/// Keys of one listing page. The continuation token only counts while the
/// listing is truncated.
fn page_from(output: &ListObjectsV2Output) -> ObjectPage {
    let keys = output
        .contents()
        .iter()
        .filter_map(|obj| obj.key().map(str::to_string))
        .collect::<Vec<_>>();

    let next_continuation_token = if output.is_truncated().unwrap_or(false) {
        output.next_continuation_token().map(str::to_string)
    } else {
        None
    };

    ObjectPage {
        keys,
        next_continuation_token,
    }
}

/// DeleteObjects reports per-key failures in a successful response.
fn check_deleted(output: &DeleteObjectsOutput, bucket: &str) -> StorageResult<()> {
    let errors = output.errors();
    match errors.first() {
        Some(first) => Err(StorageError::PartialDelete {
            bucket: bucket.to_string(),
            failed: errors.len(),
            key: first.key().unwrap_or_default().to_string(),
            reason: format!(
                "{}: {}",
                first.code().unwrap_or("Unknown"),
                first.message().unwrap_or_default()
            ),
        }),
        None => Ok(()),
    }
}
