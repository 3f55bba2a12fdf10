//! Represents a bucket resource as seen by the reconciler.
//!
//! Change notifications carry loosely-typed payloads. `BucketResource` reads
//! only the handful of fields the lifecycle logic needs, and every field that
//! is absent or has the wrong JSON type is treated as unset.

use chrono::{DateTime, Utc};
use kube::core::DynamicObject;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::models::guard::GuardMarker;

/// A transient snapshot of a bucket resource delivered by a notification.
///
/// The control plane owns the canonical copy; this value may already be stale
/// by the time it is inspected.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BucketResource {
    /// `metadata.name`, the resource identity.
    pub name: Option<String>,

    /// `metadata.namespace`, absent for cluster-scoped resources.
    pub namespace: Option<String>,

    /// `metadata.resourceVersion`, used as the optimistic-concurrency precondition.
    pub resource_version: Option<String>,

    /// Raw `metadata.deletionTimestamp`. Any non-empty string means deletion was requested.
    pub deletion_timestamp: Option<String>,

    /// `metadata.finalizers`, in server order.
    pub finalizers: Vec<String>,

    /// `metadata.annotations`, string values only.
    pub annotations: BTreeMap<String, String>,

    /// `spec.name`, the optional explicit remote bucket name.
    pub spec_name: Option<String>,
}

/// Where a resource sits in the deletion lifecycle, re-derived per notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    /// No deletion requested.
    Active,
    /// Deletion requested and our guard marker still blocks it.
    PendingGuarded,
    /// Deletion requested but our guard marker is gone.
    PendingUnguarded,
}

impl BucketResource {
    /// Read a snapshot out of an arbitrary JSON payload.
    pub fn from_value(value: &Value) -> Self {
        let metadata = value.get("metadata");
        let meta_str = |field: &str| {
            metadata
                .and_then(|m| m.get(field))
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        let finalizers: Vec<String> = metadata
            .and_then(|m| m.get("finalizers"))
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let annotations: BTreeMap<String, String> = metadata
            .and_then(|m| m.get("annotations"))
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        let spec_name = value
            .get("spec")
            .and_then(|s| s.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string);

        Self {
            name: meta_str("name"),
            namespace: meta_str("namespace"),
            resource_version: meta_str("resourceVersion"),
            deletion_timestamp: meta_str("deletionTimestamp"),
            finalizers,
            annotations,
            spec_name,
        }
    }

    /// Read a snapshot out of an object delivered by the watch stream.
    pub fn from_dynamic(obj: &DynamicObject) -> Self {
        match serde_json::to_value(obj) {
            Ok(value) => Self::from_value(&value),
            Err(err) => {
                tracing::warn!(error = %err, "could not serialize watched object; ignoring it");
                Self::default()
            }
        }
    }

    /// True once a deletion timestamp has been set.
    pub fn is_deletion_requested(&self) -> bool {
        self.deletion_timestamp
            .as_deref()
            .is_some_and(|ts| !ts.is_empty())
    }

    /// Parsed deletion timestamp, when it is well-formed RFC 3339.
    pub fn deletion_requested_at(&self) -> Option<DateTime<Utc>> {
        self.deletion_timestamp
            .as_deref()
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc))
    }

    /// Remote bucket name: `spec.name` when non-empty, else the resource name.
    pub fn bucket_name(&self) -> Option<&str> {
        self.spec_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .or_else(|| self.name.as_deref().filter(|n| !n.is_empty()))
    }

    /// `namespace/name` for log lines.
    pub fn display_name(&self) -> String {
        let name = self.name.as_deref().unwrap_or("<unnamed>");
        match self.namespace.as_deref() {
            Some(ns) => format!("{}/{}", ns, name),
            None => name.to_string(),
        }
    }

    pub fn state(&self, guard: &GuardMarker) -> LifecycleState {
        if !self.is_deletion_requested() {
            LifecycleState::Active
        } else if guard.is_present(self) {
            LifecycleState::PendingGuarded
        } else {
            LifecycleState::PendingUnguarded
        }
    }
}
