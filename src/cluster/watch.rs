//! Watch Feeds
//!
//! Turns kube-runtime watcher streams into typed [`ObjectEvent`]s. Each
//! feed keeps the last snapshot of every object so that updates carry the
//! previous state and a relist can report objects that disappeared in
//! between. Events are handed to the handler one at a time.

use crate::domain::events::{EventHandler, ObjectEvent, ObjectKey};
use crate::error::{Error, Result};
use backoff::ExponentialBackoff;
use futures::StreamExt;
use kube::runtime::watcher::Event;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Resource};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// =============================================================================
// Object Cache
// =============================================================================

/// Last seen snapshot per object key
#[derive(Debug, Clone)]
pub struct ObjectCache<T> {
    objects: BTreeMap<String, T>,
}

impl<T> Default for ObjectCache<T> {
    fn default() -> Self {
        Self {
            objects: BTreeMap::new(),
        }
    }
}

impl<T: ObjectKey + Clone> ObjectCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Record a sighting: `Added` the first time, `Updated` afterwards
    pub fn apply(&mut self, object: T) -> ObjectEvent<T> {
        match self.objects.insert(object.object_key(), object.clone()) {
            Some(old) => ObjectEvent::Updated { old, new: object },
            None => ObjectEvent::Added(object),
        }
    }

    /// Record a deletion with the object's final state
    pub fn delete(&mut self, object: T) -> ObjectEvent<T> {
        self.objects.remove(&object.object_key());
        ObjectEvent::Deleted(object)
    }

    /// Replace the cache with a full listing
    ///
    /// Objects missing from the listing are reported deleted first, then
    /// every listed object is applied.
    pub fn restart(&mut self, objects: Vec<T>) -> Vec<ObjectEvent<T>> {
        let listed: BTreeMap<String, T> = objects.into_iter().map(|o| (o.object_key(), o)).collect();

        let mut events = Vec::new();
        self.objects.retain(|key, cached| {
            if listed.contains_key(key) {
                return true;
            }
            events.push(ObjectEvent::Deleted(cached.clone()));
            false
        });
        let deleted = events.len();

        for object in listed.into_values() {
            events.push(self.apply(object));
        }

        debug!(cached = self.objects.len(), deleted, "Cache relisted");
        events
    }

    /// Deliver every cached object again as an unchanged update
    pub fn resync(&self) -> Vec<ObjectEvent<T>> {
        self.objects
            .values()
            .map(|o| ObjectEvent::Updated {
                old: o.clone(),
                new: o.clone(),
            })
            .collect()
    }

    /// Translate one watcher event
    pub fn translate<K>(&mut self, event: Event<K>, convert: impl Fn(&K) -> T) -> Vec<ObjectEvent<T>> {
        match event {
            Event::Applied(obj) => vec![self.apply(convert(&obj))],
            Event::Deleted(obj) => vec![self.delete(convert(&obj))],
            Event::Restarted(objs) => self.restart(objs.iter().map(convert).collect()),
        }
    }
}

// =============================================================================
// Feed Loop
// =============================================================================

/// Backoff between failed watch attempts; retries indefinitely
fn watch_backoff() -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_millis(800),
        max_interval: Duration::from_secs(30),
        max_elapsed_time: None,
        ..ExponentialBackoff::default()
    }
}

/// One watched kind
pub struct WatchFeed<K, T> {
    kind: &'static str,
    api: Api<K>,
    convert: fn(&K) -> T,
    resync: Option<Duration>,
}

impl<K, T> WatchFeed<K, T>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
    T: ObjectKey + Clone + Send + 'static,
{
    pub fn new(kind: &'static str, api: Api<K>, convert: fn(&K) -> T) -> Self {
        Self {
            kind,
            api,
            convert,
            resync: None,
        }
    }

    /// Replay cached objects every `period`
    pub fn with_resync(mut self, period: Duration) -> Self {
        self.resync = Some(period).filter(|p| !p.is_zero());
        self
    }

    /// Feed events into `handler` until cancelled
    ///
    /// Returns `Ok` on cancellation and [`Error::WatchClosed`] if the watch
    /// stream ends by itself.
    pub async fn run<H>(self, handler: &H, shutdown: CancellationToken) -> Result<()>
    where
        H: EventHandler<T> + ?Sized,
    {
        let mut stream = watcher(self.api, watcher::Config::default())
            .backoff(watch_backoff())
            .boxed();
        let mut cache = ObjectCache::new();

        let period = self.resync.unwrap_or(Duration::from_secs(3600));
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(kind = self.kind, resync = ?self.resync, "Watch feed started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(kind = self.kind, "Watch feed stopped");
                    return Ok(());
                }
                _ = ticker.tick(), if self.resync.is_some() => {
                    let events = cache.resync();
                    debug!(kind = self.kind, objects = events.len(), "Resync");
                    for event in events {
                        handler.on_event(event).await;
                    }
                }
                item = stream.next() => match item {
                    Some(Ok(event)) => {
                        for event in cache.translate(event, self.convert) {
                            handler.on_event(event).await;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(kind = self.kind, "Watch error, retrying: {}", e);
                    }
                    None => {
                        return Err(Error::WatchClosed {
                            kind: self.kind.to_string(),
                        });
                    }
                },
            }
        }
    }
}
