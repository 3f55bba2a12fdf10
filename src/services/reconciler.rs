//! src/services/reconciler.rs
//!
//! Reconciler: reacts to one bucket resource snapshot at a time. When the
//! resource is pending deletion and still guarded it empties the remote
//! bucket, and only then releases the guard. All decisions are re-derived
//! from the snapshot; nothing is remembered between calls.

use crate::{
    errors::ReconcileError,
    models::{
        bucket::{BucketResource, LifecycleState},
        guard::GuardMarker,
        object::EmptyReport,
    },
    services::{
        emptier::BucketEmptier,
        guard_store::{GuardStore, ResourceRef},
    },
};
use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Why a snapshot needed no work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// No deletion timestamp.
    NotDeleting,
    /// Deletion pending but our guard is already gone.
    Unguarded,
    /// No usable name to address the resource or the bucket, or no
    /// resource version to guard the finalizer release.
    MissingIdentity,
}

/// What a successful reconcile did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Skipped(SkipReason),
    /// Bucket emptied; the guard has no release step on our side.
    Emptied { bucket: String, report: EmptyReport },
    /// Bucket emptied and the finalizer removed.
    Released { bucket: String, report: EmptyReport },
}

pub struct Reconciler {
    emptier: BucketEmptier,
    guards: Arc<dyn GuardStore>,
    marker: GuardMarker,
}

impl Reconciler {
    pub fn new(emptier: BucketEmptier, guards: Arc<dyn GuardStore>, marker: GuardMarker) -> Self {
        Self {
            emptier,
            guards,
            marker,
        }
    }

    pub fn marker(&self) -> &GuardMarker {
        &self.marker
    }

    /// Notification entry point: reconcile and log the outcome.
    ///
    /// Never fails; a failed attempt is retried by the next delivery.
    pub async fn handle(&self, resource: BucketResource, cancel: &CancellationToken) {
        let resource_name = resource.display_name();
        match self.reconcile(&resource, cancel).await {
            Ok(Outcome::Skipped(reason)) => {
                debug!(resource = %resource_name, ?reason, "nothing to do");
            }
            Ok(Outcome::Emptied { bucket, report }) => {
                info!(
                    resource = %resource_name,
                    bucket = %bucket,
                    deleted = report.deleted,
                    guard = %self.marker.name(),
                    "bucket emptied; guard annotation is released by its owner"
                );
            }
            Ok(Outcome::Released { bucket, report }) => {
                info!(
                    resource = %resource_name,
                    bucket = %bucket,
                    deleted = report.deleted,
                    finalizer = %self.marker.name(),
                    "bucket emptied and finalizer removed"
                );
            }
            Err(err) if err.is_cancelled() => {
                info!(resource = %resource_name, "shutting down; guard left in place");
            }
            Err(err) => {
                warn!(
                    resource = %resource_name,
                    retryable = err.is_retryable(),
                    error = %err,
                    "reconcile failed; waiting for re-delivery"
                );
            }
        }
    }

    /// Decide what the snapshot calls for and carry it out.
    ///
    /// The guard is released strictly after the bucket has been emptied in
    /// this same call.
    pub async fn reconcile(
        &self,
        resource: &BucketResource,
        cancel: &CancellationToken,
    ) -> Result<Outcome, ReconcileError> {
        match resource.state(&self.marker) {
            LifecycleState::Active => return Ok(Outcome::Skipped(SkipReason::NotDeleting)),
            LifecycleState::PendingUnguarded => {
                return Ok(Outcome::Skipped(SkipReason::Unguarded));
            }
            LifecycleState::PendingGuarded => {}
        }

        let (Some(name), Some(bucket)) = (resource.name.as_deref(), resource.bucket_name()) else {
            return Ok(Outcome::Skipped(SkipReason::MissingIdentity));
        };
        let bucket = bucket.to_string();

        // A finalizer release needs the resource version as its precondition.
        let release = match self.marker.released_finalizers(resource) {
            Some(finalizers) => {
                let Some(resource_version) = resource.resource_version.clone() else {
                    return Ok(Outcome::Skipped(SkipReason::MissingIdentity));
                };
                let target = ResourceRef {
                    name: name.to_string(),
                    namespace: resource.namespace.clone(),
                    resource_version,
                };
                Some((target, finalizers))
            }
            None => None,
        };

        if let Some(requested_at) = resource.deletion_requested_at() {
            debug!(
                resource = %resource.display_name(),
                pending_secs = (Utc::now() - requested_at).num_seconds(),
                "deletion pending under guard"
            );
        }

        let report = self
            .emptier
            .empty_bucket(&bucket, cancel)
            .await
            .map_err(|source| ReconcileError::Empty {
                bucket: bucket.clone(),
                source,
            })?;

        let Some((target, finalizers)) = release else {
            return Ok(Outcome::Emptied { bucket, report });
        };

        self.guards
            .replace_finalizers(&target, finalizers)
            .await
            .map_err(|source| ReconcileError::Release {
                bucket: bucket.clone(),
                source,
            })?;

        Ok(Outcome::Released { bucket, report })
    }
}
