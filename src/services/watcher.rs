//! src/services/watcher.rs
//!
//! BucketWatcher: subscribes to bucket resource changes and feeds every
//! updated snapshot to the reconciler. A periodic re-list stands in for the
//! informer resync and is what retries failed attempts.

use crate::{models::bucket::BucketResource, services::reconciler::Reconciler};
use futures::{
    Stream, StreamExt,
    stream::{self, BoxStream},
};
use kube::{
    api::{Api, DynamicObject, ListParams},
    runtime::{
        WatchStreamExt,
        watcher::{self, Event},
    },
};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shared flag flipped once the watch has delivered its initial listing.
#[derive(Clone, Debug, Default)]
pub struct Readiness {
    synced: Arc<AtomicBool>,
}

impl Readiness {
    pub fn mark_synced(&self) {
        if !self.synced.swap(true, Ordering::SeqCst) {
            info!("initial bucket listing delivered");
        }
    }

    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }
}

pub struct BucketWatcher {
    api: Api<DynamicObject>,
    reconciler: Arc<Reconciler>,
    readiness: Readiness,
    resync: Option<Duration>,
    concurrency: usize,
}

impl BucketWatcher {
    /// `resync` of `None` disables the periodic re-list.
    pub fn new(
        api: Api<DynamicObject>,
        reconciler: Arc<Reconciler>,
        readiness: Readiness,
        resync: Option<Duration>,
        concurrency: usize,
    ) -> Self {
        Self {
            api,
            reconciler,
            readiness,
            resync,
            concurrency: concurrency.max(1),
        }
    }

    /// Watch until `cancel` fires. Watch errors are retried with backoff and
    /// never end the loop.
    pub async fn run(self, cancel: CancellationToken) {
        let readiness = self.readiness.clone();
        let updates = watcher::watcher(self.api.clone(), watcher::Config::default())
            .default_backoff()
            .filter_map(move |event| futures::future::ready(object_of(event, &readiness)));

        let resyncs = match self.resync {
            Some(period) if !period.is_zero() => resync_stream(self.api.clone(), period),
            _ => stream::empty().boxed(),
        };

        info!(concurrency = self.concurrency, "watching bucket resources");
        dispatch(
            stream::select(updates, resyncs),
            &self.reconciler,
            self.concurrency,
            &cancel,
        )
        .await;
        info!("bucket watcher stopped");
    }
}

/// The object a watch event asks us to look at, if any. The end of the
/// initial listing marks `readiness`.
fn object_of(
    event: watcher::Result<Event<DynamicObject>>,
    readiness: &Readiness,
) -> Option<DynamicObject> {
    match event {
        Ok(Event::Apply(obj)) | Ok(Event::InitApply(obj)) => Some(obj),
        Ok(Event::InitDone) => {
            readiness.mark_synced();
            None
        }
        Ok(Event::Init) | Ok(Event::Delete(_)) => None,
        Err(err) => {
            warn!(error = %err, "bucket watch failed; backing off");
            None
        }
    }
}

/// Hand each delivered object to the reconciler, at most `concurrency` at a
/// time, until the stream ends or `cancel` fires.
pub async fn dispatch<S>(
    objects: S,
    reconciler: &Reconciler,
    concurrency: usize,
    cancel: &CancellationToken,
) where
    S: Stream<Item = DynamicObject>,
{
    objects
        .take_until(cancel.cancelled())
        .for_each_concurrent(concurrency.max(1), move |obj| async move {
            reconciler
                .handle(BucketResource::from_dynamic(&obj), cancel)
                .await
        })
        .await;
}

/// Re-list every resource each `period`, starting one period from now.
fn resync_stream(api: Api<DynamicObject>, period: Duration) -> BoxStream<'static, DynamicObject> {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    stream::unfold((api, ticker), |(api, mut ticker)| async move {
        ticker.tick().await;
        let objects = match api.list(&ListParams::default()).await {
            Ok(list) => {
                debug!(count = list.items.len(), "resync listed bucket resources");
                list.items
            }
            Err(err) => {
                warn!(error = %err, "resync listing failed");
                Vec::new()
            }
        };
        Some((stream::iter(objects), (api, ticker)))
    })
    .flatten()
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::guard::GuardMarker,
        services::{
            emptier::BucketEmptier,
            testing::{MemoryObjectStore, RecordingGuardStore},
        },
    };
    use serde_json::json;

    const TOKEN: &str = "finalizers.example/EmptyBucket";

    fn object(name: &str, deleting: bool) -> DynamicObject {
        let mut metadata = json!({"name": name, "resourceVersion": "1", "finalizers": [TOKEN]});
        if deleting {
            metadata["deletionTimestamp"] = json!("2024-05-01T10:00:00Z");
        }
        serde_json::from_value(json!({
            "apiVersion": "s3.services.k8s.aws/v1alpha1",
            "kind": "Bucket",
            "metadata": metadata,
            "spec": {}
        }))
        .unwrap()
    }

    fn reconciler(store: Arc<MemoryObjectStore>, guards: Arc<RecordingGuardStore>) -> Reconciler {
        Reconciler::new(
            BucketEmptier::new(store, 1000),
            guards,
            GuardMarker::Finalizer(TOKEN.into()),
        )
    }

    #[tokio::test]
    async fn dispatches_every_object() {
        let store = Arc::new(MemoryObjectStore::default());
        let guards = Arc::new(RecordingGuardStore::default());
        for name in ["a-bucket", "b-bucket", "c-bucket"] {
            store.put(name, vec!["k1".into(), "k2".into()]);
        }
        let reconciler = reconciler(store.clone(), guards.clone());
        let objects = stream::iter(vec![
            object("a-bucket", true),
            object("b-bucket", false),
            object("c-bucket", true),
        ]);

        dispatch(objects, &reconciler, 2, &CancellationToken::new()).await;

        assert_eq!(store.object_count("a-bucket"), 0);
        assert_eq!(store.object_count("b-bucket"), 2);
        assert_eq!(store.object_count("c-bucket"), 0);
        let mut released = guards
            .updates()
            .into_iter()
            .map(|(target, _)| target.name)
            .collect::<Vec<_>>();
        released.sort();
        assert_eq!(released, vec!["a-bucket", "c-bucket"]);
    }

    #[tokio::test]
    async fn stops_when_cancelled() {
        let store = Arc::new(MemoryObjectStore::default());
        let guards = Arc::new(RecordingGuardStore::default());
        store.put("a-bucket", vec!["k1".into()]);
        let reconciler = reconciler(store.clone(), guards.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let objects = stream::iter(vec![object("a-bucket", true)]).chain(stream::pending());
        dispatch(objects, &reconciler, 1, &cancel).await;

        assert_eq!(store.object_count("a-bucket"), 1);
        assert!(guards.updates().is_empty());
    }

    #[test]
    fn updates_reach_the_reconciler() {
        let readiness = Readiness::default();

        let applied = object_of(Ok(Event::Apply(object("a-bucket", true))), &readiness);
        let listed = object_of(Ok(Event::InitApply(object("b-bucket", false))), &readiness);

        assert_eq!(applied.and_then(|o| o.metadata.name).as_deref(), Some("a-bucket"));
        assert_eq!(listed.and_then(|o| o.metadata.name).as_deref(), Some("b-bucket"));
        assert!(!readiness.is_synced());
    }

    #[test]
    fn init_done_marks_ready_and_yields_nothing() {
        let readiness = Readiness::default();

        assert!(object_of(Ok(Event::Init), &readiness).is_none());
        assert!(!readiness.is_synced());
        assert!(object_of(Ok(Event::InitDone), &readiness).is_none());
        assert!(readiness.is_synced());
    }

    #[test]
    fn deletes_and_errors_are_dropped() {
        let readiness = Readiness::default();

        assert!(object_of(Ok(Event::Delete(object("a-bucket", true))), &readiness).is_none());
        assert!(object_of(Err(watcher::Error::NoResourceVersion), &readiness).is_none());
        assert!(!readiness.is_synced());
    }

    #[test]
    fn readiness_flips_once() {
        let readiness = Readiness::default();
        assert!(!readiness.is_synced());
        readiness.mark_synced();
        readiness.clone().mark_synced();
        assert!(readiness.is_synced());
    }
}
