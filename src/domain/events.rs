//! Watch Events
//!
//! Typed notifications delivered by the watch feeds. Each watched kind gets
//! its own event alias carrying the concrete object snapshot.

use super::ports::{ClaimRequest, Volume};
use async_trait::async_trait;

/// A change observed on a watched object
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectEvent<T> {
    /// First sighting of the object
    Added(T),

    /// Object seen again; `old` is the previous snapshot
    Updated { old: T, new: T },

    /// Object removed; carries its last known state
    Deleted(T),
}

/// Events of the claim-request feed
pub type ClaimEvent = ObjectEvent<ClaimRequest>;

/// Events of the volume feed
pub type VolumeEvent = ObjectEvent<Volume>;

impl<T> ObjectEvent<T> {
    /// Most recent snapshot carried by the event
    pub fn object(&self) -> &T {
        match self {
            ObjectEvent::Added(obj) => obj,
            ObjectEvent::Updated { new, .. } => new,
            ObjectEvent::Deleted(obj) => obj,
        }
    }

    /// Short label for logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            ObjectEvent::Added(_) => "added",
            ObjectEvent::Updated { .. } => "updated",
            ObjectEvent::Deleted(_) => "deleted",
        }
    }
}

/// Identity under which a watched object is cached
pub trait ObjectKey {
    fn object_key(&self) -> String;
}

impl ObjectKey for ClaimRequest {
    fn object_key(&self) -> String {
        self.key()
    }
}

impl ObjectKey for Volume {
    fn object_key(&self) -> String {
        self.name.clone()
    }
}

/// Consumer of one feed's events, called for one event at a time
#[async_trait]
pub trait EventHandler<T: Send + 'static>: Send + Sync {
    async fn on_event(&self, event: ObjectEvent<T>);
}
