// Change propagation: fans committed store mutations out to subscribers
// with per-collection granularity.
//
// Delivery guarantee: at-least-once, monotonic per subscriber. A subscriber
// never observes an older version after a newer one for the same entity id,
// but may skip an intermediate version when mutations outrun delivery (the
// final state still converges). No ordering guarantee across entity ids.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::model::{Collection, Entity, EntityId};

/// Ring-buffer capacity per collection channel. A subscriber that falls
/// more than this many events behind loses the oldest ones (acceptable:
/// the survivors carry the newer versions).
const CHANNEL_CAPACITY: usize = 256;

/// The minimal delta describing one committed change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum ChangeDelta {
    Created { entity: Entity },
    Updated { entity: Entity },
    Deleted { id: EntityId },
}

/// A committed change to one (collection, id), as published by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub collection: Collection,
    pub id: EntityId,
    /// Version of the entity after this change (for deletes, one past the
    /// last committed version).
    pub version: u64,
    pub delta: ChangeDelta,
}

/// Optional per-subscription filter.
///
/// `ByTeam` matches teams by their own id, players sold to the team, and
/// target entries belonging to the team. Deletions cannot be re-checked
/// against a team (the entity is gone) and are always delivered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "filter", rename_all = "snake_case")]
pub enum SubscriptionFilter {
    #[default]
    All,
    ById {
        id: EntityId,
    },
    ByTeam {
        team_id: EntityId,
    },
}

impl SubscriptionFilter {
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        match self {
            SubscriptionFilter::All => true,
            SubscriptionFilter::ById { id } => event.id == *id,
            SubscriptionFilter::ByTeam { team_id } => match &event.delta {
                ChangeDelta::Created { entity } | ChangeDelta::Updated { entity } => {
                    self.entity_matches(entity, team_id)
                }
                ChangeDelta::Deleted { .. } => true,
            },
        }
    }

    /// Whether a snapshot entity belongs in a filtered initial snapshot.
    pub fn matches_entity(&self, entity: &Entity) -> bool {
        match self {
            SubscriptionFilter::All => true,
            SubscriptionFilter::ById { id } => entity.id() == id,
            SubscriptionFilter::ByTeam { team_id } => self.entity_matches(entity, team_id),
        }
    }

    fn entity_matches(&self, entity: &Entity, team_id: &str) -> bool {
        match entity {
            Entity::Team(t) => t.id == team_id,
            Entity::Player(p) => p.team_id.as_deref() == Some(team_id),
            Entity::Target(t) => t.team_id == team_id,
            // Rounds are global; a team-scoped subscription sees them all.
            Entity::Round(_) => true,
        }
    }
}

/// Fan-out hub. The store publishes committed events here; readers attach
/// through [`crate::store::EntityStore::subscribe`], which pairs the
/// attachment with a consistent snapshot.
pub struct ChangeBroadcaster {
    channels: HashMap<Collection, broadcast::Sender<ChangeEvent>>,
}

impl ChangeBroadcaster {
    pub fn new() -> Self {
        let mut channels = HashMap::new();
        for collection in Collection::ALL {
            let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
            channels.insert(collection, tx);
        }
        ChangeBroadcaster { channels }
    }

    /// Publish one committed event. Never blocks: delivery is pulled by
    /// subscribers on their own tasks, so writers never wait for fan-out.
    pub(crate) fn publish(&self, event: ChangeEvent) {
        let sender = &self.channels[&event.collection];
        debug!(
            collection = %event.collection,
            id = %event.id,
            version = event.version,
            "publishing change"
        );
        // Err means no subscribers are attached; nothing to deliver.
        let _ = sender.send(event);
    }

    /// Attach a new subscriber to `collection`. `seen` seeds the monotonic
    /// filter with the versions already covered by the caller's snapshot.
    pub(crate) fn attach(
        &self,
        collection: Collection,
        filter: SubscriptionFilter,
        seen: HashMap<EntityId, u64>,
    ) -> Subscription {
        Subscription {
            collection,
            filter,
            rx: self.channels[&collection].subscribe(),
            seen,
        }
    }

    /// Number of live subscribers on `collection`.
    pub fn subscriber_count(&self, collection: Collection) -> usize {
        self.channels[&collection].receiver_count()
    }
}

impl Default for ChangeBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

/// A live subscription to one collection. Dropping it (or calling
/// [`Subscription::cancel`]) deterministically stops delivery; nothing is
/// rolled back server-side.
pub struct Subscription {
    collection: Collection,
    filter: SubscriptionFilter,
    rx: broadcast::Receiver<ChangeEvent>,
    /// Highest version delivered (or snapshot-covered) per entity id.
    seen: HashMap<EntityId, u64>,
}

impl Subscription {
    pub fn collection(&self) -> Collection {
        self.collection
    }

    /// Wait for the next matching delta. Returns `None` once the store has
    /// been dropped and all buffered events are drained.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if let Some(event) = self.admit(event) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    // Intermediate versions were dropped; newer ones are
                    // still queued, so the subscriber converges.
                    warn!(
                        collection = %self.collection,
                        missed, "subscriber lagged, skipped events"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv); returns `None` when no
    /// matching event is currently buffered.
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => {
                    if let Some(event) = self.admit(event) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    warn!(
                        collection = %self.collection,
                        missed, "subscriber lagged, skipped events"
                    );
                }
                Err(_) => return None,
            }
        }
    }

    /// Stop delivery. Equivalent to dropping the subscription.
    pub fn cancel(self) {}

    fn admit(&mut self, event: ChangeEvent) -> Option<ChangeEvent> {
        if !self.filter.matches(&event) {
            return None;
        }
        let last = self.seen.get(&event.id).copied().unwrap_or(0);
        if event.version <= last {
            // Stale: already covered by the snapshot or a newer delivery.
            return None;
        }
        self.seen.insert(event.id.clone(), event.version);
        Some(event)
    }
}
