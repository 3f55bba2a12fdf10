//! In-memory stand-ins for the storage provider and the control plane.

use crate::{
    models::object::ObjectPage,
    services::{
        guard_store::{GuardError, GuardStore, ResourceRef},
        storage_service::{ObjectStore, StorageError, StorageResult},
    },
};
use async_trait::async_trait;
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Mutex,
};

#[derive(Default)]
struct StoreState {
    buckets: BTreeMap<String, BTreeSet<String>>,
    empty_pages: HashMap<String, usize>,
    list_calls: usize,
    fail_list_in: Option<usize>,
    fail_next_delete: bool,
    deletes: Vec<(String, Vec<String>)>,
}

/// Buckets of sorted keys. The continuation token is the last key returned.
#[derive(Default)]
pub struct MemoryObjectStore {
    state: Mutex<StoreState>,
}

impl MemoryObjectStore {
    pub fn put(&self, bucket: &str, keys: Vec<String>) {
        let mut state = self.state.lock().unwrap();
        state
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .extend(keys);
    }

    /// Serve one empty, non-final page before the real listing.
    pub fn insert_empty_page(&self, bucket: &str) {
        let mut state = self.state.lock().unwrap();
        *state.empty_pages.entry(bucket.to_string()).or_default() += 1;
    }

    /// Let `calls` more listings succeed, then fail the next one once.
    pub fn fail_list_after(&self, calls: usize) {
        self.state.lock().unwrap().fail_list_in = Some(calls);
    }

    pub fn fail_next_delete(&self) {
        self.state.lock().unwrap().fail_next_delete = true;
    }

    pub fn object_count(&self, bucket: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.buckets.get(bucket).map_or(0, BTreeSet::len)
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().unwrap().list_calls
    }

    pub fn delete_calls(&self) -> Vec<(String, Vec<String>)> {
        self.state.lock().unwrap().deletes.clone()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list_page(
        &self,
        bucket: &str,
        continuation_token: Option<String>,
        max_keys: usize,
    ) -> StorageResult<ObjectPage> {
        let mut state = self.state.lock().unwrap();
        state.list_calls += 1;

        let fail_in = state.fail_list_in;
        match fail_in {
            Some(0) => {
                state.fail_list_in = None;
                return Err(StorageError::List {
                    bucket: bucket.to_string(),
                    source: "injected listing failure".into(),
                });
            }
            Some(n) => state.fail_list_in = Some(n - 1),
            None => {}
        }

        if let Some(pending) = state.empty_pages.get_mut(bucket).filter(|n| **n > 0) {
            *pending -= 1;
            return Ok(ObjectPage {
                keys: Vec::new(),
                next_continuation_token: Some(continuation_token.unwrap_or_default()),
            });
        }

        let Some(objects) = state.buckets.get(bucket) else {
            return Err(StorageError::List {
                bucket: bucket.to_string(),
                source: "NoSuchBucket".into(),
            });
        };

        let after = continuation_token.unwrap_or_default();
        let mut remaining = objects.iter().filter(|k| k.as_str() > after.as_str());
        let keys = remaining
            .by_ref()
            .take(max_keys)
            .cloned()
            .collect::<Vec<_>>();
        let next_continuation_token = match remaining.next() {
            Some(_) => keys.last().cloned(),
            None => None,
        };

        Ok(ObjectPage {
            keys,
            next_continuation_token,
        })
    }

    async fn delete_batch(&self, bucket: &str, keys: Vec<String>) -> StorageResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_next_delete {
            state.fail_next_delete = false;
            return Err(StorageError::Delete {
                bucket: bucket.to_string(),
                source: "injected delete failure".into(),
            });
        }

        if let Some(objects) = state.buckets.get_mut(bucket) {
            for key in &keys {
                objects.remove(key);
            }
        }
        state.deletes.push((bucket.to_string(), keys));
        Ok(())
    }
}

/// Records successful finalizer updates.
#[derive(Default)]
pub struct RecordingGuardStore {
    updates: Mutex<Vec<(ResourceRef, Vec<String>)>>,
    conflict_next: Mutex<bool>,
}

impl RecordingGuardStore {
    pub fn fail_next_with_conflict(&self) {
        *self.conflict_next.lock().unwrap() = true;
    }

    pub fn updates(&self) -> Vec<(ResourceRef, Vec<String>)> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl GuardStore for RecordingGuardStore {
    async fn replace_finalizers(
        &self,
        target: &ResourceRef,
        finalizers: Vec<String>,
    ) -> Result<(), GuardError> {
        let mut conflict = self.conflict_next.lock().unwrap();
        if *conflict {
            *conflict = false;
            return Err(GuardError::Conflict(target.name.clone()));
        }
        self.updates
            .lock()
            .unwrap()
            .push((target.clone(), finalizers));
        Ok(())
    }
}
