//! GuardStore: writes a bucket resource's finalizer list back to the
//! control plane, guarded by the snapshot's resource version.

use async_trait::async_trait;
use kube::{
    Client,
    api::{Api, DynamicObject, Patch, PatchParams},
    core::ApiResource,
};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

/// Identifies one resource for an update call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceRef {
    pub name: String,
    pub namespace: Option<String>,
    /// Precondition: the update fails if the stored object has moved past it.
    pub resource_version: String,
}

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("resource `{0}` changed since it was read")]
    Conflict(String),
    #[error("updating resource `{name}` failed: {source}")]
    Api {
        name: String,
        #[source]
        source: kube::Error,
    },
}

#[async_trait]
pub trait GuardStore: Send + Sync {
    /// Replace `metadata.finalizers` with `finalizers`.
    ///
    /// Must fail with `GuardError::Conflict` rather than overwrite a newer
    /// version of the resource. A resource that no longer exists is treated
    /// as already released.
    async fn replace_finalizers(
        &self,
        target: &ResourceRef,
        finalizers: Vec<String>,
    ) -> Result<(), GuardError>;
}

/// `GuardStore` backed by the Kubernetes API, for any resource kind.
#[derive(Clone)]
pub struct KubeGuardStore {
    client: Client,
    resource: ApiResource,
}

impl KubeGuardStore {
    pub fn new(client: Client, resource: ApiResource) -> Self {
        Self { client, resource }
    }

    fn api(&self, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &self.resource),
            None => Api::all_with(self.client.clone(), &self.resource),
        }
    }
}

#[async_trait]
impl GuardStore for KubeGuardStore {
    async fn replace_finalizers(
        &self,
        target: &ResourceRef,
        finalizers: Vec<String>,
    ) -> Result<(), GuardError> {
        // The API server treats a resourceVersion in the patch body as a precondition.
        let patch = json!({
            "metadata": {
                "finalizers": finalizers,
                "resourceVersion": target.resource_version,
            }
        });

        let result = self
            .api(target.namespace.as_deref())
            .patch(&target.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(err) => classify(err, &target.name),
        }
    }
}

/// Map a failed patch: 409 is a lost precondition, 404 means nothing is left
/// to release.
fn classify(err: kube::Error, name: &str) -> Result<(), GuardError> {
    match err {
        kube::Error::Api(resp) if resp.code == 409 => Err(GuardError::Conflict(name.to_string())),
        kube::Error::Api(resp) if resp.code == 404 => {
            debug!(name, "resource already gone; nothing to release");
            Ok(())
        }
        source => Err(GuardError::Api {
            name: name.to_string(),
            source,
        }),
    }
}
