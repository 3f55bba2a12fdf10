//! BucketEmptier: deletes every object in a bucket, one listing page at a time.

use crate::{
    models::object::EmptyReport,
    services::storage_service::{MAX_KEYS_PER_REQUEST, ObjectStore, StorageError, StorageResult},
};
use std::{future::Future, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Clone)]
pub struct BucketEmptier {
    store: Arc<dyn ObjectStore>,
    page_size: usize,
}

impl BucketEmptier {
    /// `page_size` is clamped to the provider's per-request key limit.
    pub fn new(store: Arc<dyn ObjectStore>, page_size: usize) -> Self {
        Self {
            store,
            page_size: page_size.clamp(1, MAX_KEYS_PER_REQUEST),
        }
    }

    /// Delete every object in `bucket`.
    ///
    /// - Lists the bucket page by page.
    /// - Issues one batched delete per non-empty page.
    /// - Stops at the first listing or delete failure. Nothing is carried over
    ///   between calls, so a retry re-lists whatever is left.
    /// - An already empty bucket succeeds without any delete call.
    ///
    /// Cancelling `cancel` abandons the in-flight call and returns
    /// `StorageError::Cancelled`.
    pub async fn empty_bucket(
        &self,
        bucket: &str,
        cancel: &CancellationToken,
    ) -> StorageResult<EmptyReport> {
        info!(bucket, "emptying bucket");
        let mut report = EmptyReport::default();
        let mut continuation_token = None;

        loop {
            let page = until_cancelled(
                bucket,
                cancel,
                self.store
                    .list_page(bucket, continuation_token.take(), self.page_size),
            )
            .await?;
            report.pages += 1;

            for batch in page.keys.chunks(MAX_KEYS_PER_REQUEST) {
                debug!(bucket, keys = batch.len(), "deleting object batch");
                until_cancelled(
                    bucket,
                    cancel,
                    self.store.delete_batch(bucket, batch.to_vec()),
                )
                .await?;
                report.batches += 1;
                report.deleted += batch.len();
            }

            match page.next_continuation_token {
                Some(token) => continuation_token = Some(token),
                None => break,
            }
        }

        info!(
            bucket,
            pages = report.pages,
            batches = report.batches,
            deleted = report.deleted,
            "bucket emptied"
        );
        Ok(report)
    }
}

async fn until_cancelled<T>(
    bucket: &str,
    cancel: &CancellationToken,
    call: impl Future<Output = StorageResult<T>>,
) -> StorageResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StorageError::Cancelled(bucket.to_string())),
        result = call => result,
    }
}
