// Versioned entity storage with optimistic concurrency.
//
// The store owns the canonical copy of every entity. All writes go through
// `transact`, which checks a version precondition per touched entity and
// applies the whole op set or none of it. Committed changes are written
// through to SQLite in one transaction and then published to the change
// broadcaster, so every reader replica converges by push, never by polling.
//
// Writes serialize on the inner mutex; the lock is never held across an
// await point. Reads clone out of the map and never block writers for
// longer than the copy.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use tracing::info;

use crate::broadcast::{
    ChangeBroadcaster, ChangeDelta, ChangeEvent, Subscription, SubscriptionFilter,
};
use crate::db::{Database, RowChange};
use crate::error::{AuctionError, Result};
use crate::model::{AuctionRound, Collection, Entity, EntityId, Player, TargetPlayer, Team};

/// An entity together with the version it was read at. Mutators pass the
/// version back as a precondition.
#[derive(Debug, Clone)]
pub struct Versioned<T> {
    pub value: T,
    pub version: u64,
}

/// One mutation inside a store transaction.
#[derive(Debug, Clone)]
pub enum WriteOp {
    Insert {
        entity: Entity,
    },
    Update {
        expected_version: u64,
        entity: Entity,
    },
    Delete {
        collection: Collection,
        id: EntityId,
        expected_version: u64,
    },
}

#[derive(Default)]
struct Shelf {
    /// Creation order of ids; `list` returns entities in this order.
    order: Vec<EntityId>,
    records: HashMap<EntityId, (Entity, u64)>,
}

struct Inner {
    shelves: HashMap<Collection, Shelf>,
    next_id: HashMap<Collection, u64>,
}

/// Durable, versioned storage for teams, players, rounds, and targets.
pub struct EntityStore {
    inner: Mutex<Inner>,
    db: Database,
    broadcaster: ChangeBroadcaster,
}

impl EntityStore {
    /// Build the store over `db`, rehydrating any previously committed
    /// entities so an auction survives a process restart.
    pub fn open(db: Database) -> Result<Self> {
        let rows = db.load_all().map_err(storage)?;

        let mut shelves: HashMap<Collection, Shelf> = Collection::ALL
            .iter()
            .map(|c| (*c, Shelf::default()))
            .collect();
        let mut next_id: HashMap<Collection, u64> =
            Collection::ALL.iter().map(|c| (*c, 1)).collect();

        for row in rows {
            let entity: Entity = serde_json::from_str(&row.data).map_err(|e| {
                AuctionError::Storage(format!(
                    "corrupt {} row `{}`: {e}",
                    row.collection, row.id
                ))
            })?;
            if entity.collection() != row.collection || entity.id() != row.id {
                return Err(AuctionError::Storage(format!(
                    "row ({}, {}) does not match its stored entity",
                    row.collection, row.id
                )));
            }
            if let Some(seq) = id_sequence(&row.id, row.collection) {
                let next = next_id
                    .get_mut(&row.collection)
                    .expect("all collections pre-seeded");
                *next = (*next).max(seq + 1);
            }
            let shelf = shelves.entry(row.collection).or_default();
            shelf.order.push(row.id.clone());
            shelf.records.insert(row.id, (entity, row.version));
        }

        let counts: Vec<String> = Collection::ALL
            .iter()
            .map(|c| format!("{}={}", c, shelves[c].records.len()))
            .collect();
        info!("entity store rehydrated: {}", counts.join(" "));

        Ok(EntityStore {
            inner: Mutex::new(Inner { shelves, next_id }),
            db,
            broadcaster: ChangeBroadcaster::new(),
        })
    }

    /// Fresh store over an in-memory database. Test helper, but also used
    /// for ephemeral (non-durable) deployments.
    pub fn in_memory() -> Result<Self> {
        let db = Database::open(":memory:").map_err(storage)?;
        Self::open(db)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("store mutex poisoned")
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn get(&self, collection: Collection, id: &str) -> Result<Versioned<Entity>> {
        let inner = self.lock();
        let shelf = &inner.shelves[&collection];
        match shelf.records.get(id) {
            Some((entity, version)) => Ok(Versioned {
                value: entity.clone(),
                version: *version,
            }),
            None => Err(AuctionError::NotFound {
                collection,
                id: id.to_string(),
            }),
        }
    }

    /// Entities in `collection`, in creation order. Empty collections yield
    /// an empty sequence ("no data yet"), never an error.
    pub fn list(&self, collection: Collection) -> Vec<Entity> {
        let inner = self.lock();
        let shelf = &inner.shelves[&collection];
        shelf
            .order
            .iter()
            .filter_map(|id| shelf.records.get(id).map(|(e, _)| e.clone()))
            .collect()
    }

    pub fn get_team(&self, id: &str) -> Result<Versioned<Team>> {
        let v = self.get(Collection::Teams, id)?;
        narrow(v, |e| match e {
            Entity::Team(t) => Some(t),
            _ => None,
        })
    }

    pub fn get_player(&self, id: &str) -> Result<Versioned<Player>> {
        let v = self.get(Collection::Players, id)?;
        narrow(v, |e| match e {
            Entity::Player(p) => Some(p),
            _ => None,
        })
    }

    pub fn get_round(&self, id: &str) -> Result<Versioned<AuctionRound>> {
        let v = self.get(Collection::Rounds, id)?;
        narrow(v, |e| match e {
            Entity::Round(r) => Some(r),
            _ => None,
        })
    }

    pub fn teams(&self) -> Vec<Team> {
        self.list(Collection::Teams)
            .into_iter()
            .filter_map(|e| match e {
                Entity::Team(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    pub fn players(&self) -> Vec<Player> {
        self.list(Collection::Players)
            .into_iter()
            .filter_map(|e| match e {
                Entity::Player(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn rounds(&self) -> Vec<AuctionRound> {
        self.list(Collection::Rounds)
            .into_iter()
            .filter_map(|e| match e {
                Entity::Round(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    pub fn targets(&self) -> Vec<TargetPlayer> {
        self.list(Collection::Targets)
            .into_iter()
            .filter_map(|e| match e {
                Entity::Target(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    /// Subscribe to `collection`: returns a consistent initial snapshot and
    /// a live subscription whose first delivery is the first commit after
    /// the snapshot. Cancel by dropping the subscription.
    pub fn subscribe(
        &self,
        collection: Collection,
        filter: SubscriptionFilter,
    ) -> (Vec<Entity>, Subscription) {
        // Snapshot and attachment happen under the same lock that
        // publishers hold, so no commit can fall between them.
        let inner = self.lock();
        let shelf = &inner.shelves[&collection];

        let mut snapshot = Vec::new();
        let mut seen = HashMap::new();
        for id in &shelf.order {
            if let Some((entity, version)) = shelf.records.get(id) {
                seen.insert(id.clone(), *version);
                if filter.matches_entity(entity) {
                    snapshot.push(entity.clone());
                }
            }
        }

        let subscription = self.broadcaster.attach(collection, filter, seen);
        (snapshot, subscription)
    }

    pub fn broadcaster(&self) -> &ChangeBroadcaster {
        &self.broadcaster
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Mint a fresh id for `collection`. Ids are opaque to callers but
    /// unique for the lifetime of the database.
    pub(crate) fn mint_id(&self, collection: Collection) -> EntityId {
        let mut inner = self.lock();
        let next = inner
            .next_id
            .get_mut(&collection)
            .expect("all collections pre-seeded");
        let id = format!("{}-{}", collection.id_prefix(), *next);
        *next += 1;
        id
    }

    /// Single-entity update with a version precondition.
    pub fn commit(&self, expected_version: u64, entity: Entity) -> Result<Versioned<Entity>> {
        let collection = entity.collection();
        let id = entity.id().to_string();
        self.transact(vec![WriteOp::Update {
            expected_version,
            entity,
        }])?;
        self.get(collection, &id)
    }

    /// Single-entity delete with a version precondition.
    pub fn delete(&self, collection: Collection, id: &str, expected_version: u64) -> Result<()> {
        self.transact(vec![WriteOp::Delete {
            collection,
            id: id.to_string(),
            expected_version,
        }])
    }

    /// All-or-nothing application of a multi-entity op set.
    ///
    /// Every `Update`/`Delete` carries the version the caller read; if any
    /// precondition fails the whole set is rejected with `Conflict` (or
    /// `NotFound`) and nothing is applied. On success, one change event per
    /// affected (collection, id) is published.
    pub fn transact(&self, ops: Vec<WriteOp>) -> Result<()> {
        let mut inner = self.lock();
        let now = Utc::now();

        // Phase 1: validate every precondition against current state.
        let mut touched: HashMap<(Collection, EntityId), ()> = HashMap::new();
        for op in &ops {
            let (collection, id) = match op {
                WriteOp::Insert { entity } => (entity.collection(), entity.id().to_string()),
                WriteOp::Update { entity, .. } => (entity.collection(), entity.id().to_string()),
                WriteOp::Delete { collection, id, .. } => (*collection, id.clone()),
            };
            if touched.insert((collection, id.clone()), ()).is_some() {
                return Err(AuctionError::Validation {
                    field: "ops",
                    message: format!("duplicate op for {collection} `{id}` in one transaction"),
                });
            }

            let shelf = &inner.shelves[&collection];
            match op {
                WriteOp::Insert { .. } => {
                    if let Some((_, found)) = shelf.records.get(&id) {
                        return Err(AuctionError::Conflict {
                            collection,
                            id,
                            expected: 0,
                            found: *found,
                        });
                    }
                }
                WriteOp::Update {
                    expected_version, ..
                }
                | WriteOp::Delete {
                    expected_version, ..
                } => {
                    let found = shelf
                        .records
                        .get(&id)
                        .map(|(_, v)| *v)
                        .ok_or_else(|| AuctionError::NotFound {
                            collection,
                            id: id.clone(),
                        })?;
                    if found != *expected_version {
                        return Err(AuctionError::Conflict {
                            collection,
                            id,
                            expected: *expected_version,
                            found,
                        });
                    }
                }
            }
        }

        // Phase 2: stage rows and events with post-commit versions.
        let mut rows = Vec::with_capacity(ops.len());
        let mut events = Vec::with_capacity(ops.len());
        let mut staged: Vec<(Collection, EntityId, Option<(Entity, u64)>)> = Vec::new();

        for op in ops {
            match op {
                WriteOp::Insert { mut entity } => {
                    entity.touch(now);
                    let collection = entity.collection();
                    let id = entity.id().to_string();
                    let data = encode(&entity)?;
                    rows.push(RowChange::Upsert {
                        collection,
                        id: id.clone(),
                        version: 1,
                        data,
                    });
                    events.push(ChangeEvent {
                        collection,
                        id: id.clone(),
                        version: 1,
                        delta: ChangeDelta::Created {
                            entity: entity.clone(),
                        },
                    });
                    staged.push((collection, id, Some((entity, 1))));
                }
                WriteOp::Update {
                    expected_version,
                    mut entity,
                } => {
                    entity.touch(now);
                    let collection = entity.collection();
                    let id = entity.id().to_string();
                    let version = expected_version + 1;
                    let data = encode(&entity)?;
                    rows.push(RowChange::Upsert {
                        collection,
                        id: id.clone(),
                        version,
                        data,
                    });
                    events.push(ChangeEvent {
                        collection,
                        id: id.clone(),
                        version,
                        delta: ChangeDelta::Updated {
                            entity: entity.clone(),
                        },
                    });
                    staged.push((collection, id, Some((entity, version))));
                }
                WriteOp::Delete {
                    collection,
                    id,
                    expected_version,
                } => {
                    rows.push(RowChange::Delete {
                        collection,
                        id: id.clone(),
                    });
                    events.push(ChangeEvent {
                        collection,
                        id: id.clone(),
                        version: expected_version + 1,
                        delta: ChangeDelta::Deleted { id: id.clone() },
                    });
                    staged.push((collection, id, None));
                }
            }
        }

        // Phase 3: durable commit, then memory, then fan-out. A failure
        // here leaves memory untouched, matching the rolled-back database.
        self.db.apply(&rows).map_err(storage)?;

        for (collection, id, record) in staged {
            let shelf = inner.shelves.get_mut(&collection).expect("shelf exists");
            match record {
                Some((entity, version)) => {
                    if !shelf.records.contains_key(&id) {
                        shelf.order.push(id.clone());
                    }
                    shelf.records.insert(id, (entity, version));
                }
                None => {
                    shelf.records.remove(&id);
                    shelf.order.retain(|existing| existing != &id);
                }
            }
        }

        for event in events {
            self.broadcaster.publish(event);
        }

        Ok(())
    }
}

fn encode(entity: &Entity) -> Result<String> {
    serde_json::to_string(entity)
        .map_err(|e| AuctionError::Storage(format!("failed to encode entity: {e}")))
}

fn storage(err: anyhow::Error) -> AuctionError {
    AuctionError::Storage(format!("{err:#}"))
}

fn narrow<T>(
    versioned: Versioned<Entity>,
    pick: impl FnOnce(Entity) -> Option<T>,
) -> Result<Versioned<T>> {
    let Versioned { value, version } = versioned;
    let collection = value.collection();
    let id = value.id().to_string();
    match pick(value) {
        Some(value) => Ok(Versioned { value, version }),
        None => Err(AuctionError::Storage(format!(
            "{collection} entity `{id}` has the wrong kind"
        ))),
    }
}

/// Parse the numeric suffix out of a minted id (`player-17` -> 17). Ids
/// imported from elsewhere simply don't advance the counter.
fn id_sequence(id: &str, collection: Collection) -> Option<u64> {
    let rest = id.strip_prefix(collection.id_prefix())?;
    let rest = rest.strip_prefix('-')?;
    rest.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PlayerRole, PlayerStatus};
    use chrono::Utc;

    fn test_store() -> EntityStore {
        EntityStore::in_memory().expect("in-memory store should open")
    }

    fn team_entity(store: &EntityStore, name: &str, budget: u64) -> Team {
        let now = Utc::now();
        let team = Team {
            id: store.mint_id(Collection::Teams),
            name: name.to_string(),
            budget,
            remaining_budget: budget,
            players: vec![],
            owner_id: None,
            created_at: now,
            updated_at: now,
        };
        store
            .transact(vec![WriteOp::Insert {
                entity: Entity::Team(team.clone()),
            }])
            .unwrap();
        team
    }

    fn player_entity(store: &EntityStore, name: &str, base_price: u64) -> Player {
        let now = Utc::now();
        let player = Player {
            id: store.mint_id(Collection::Players),
            name: name.to_string(),
            role: PlayerRole::Batter,
            base_price,
            status: PlayerStatus::Active,
            team_id: None,
            final_price: None,
            stats: serde_json::Map::new(),
            created_at: now,
            updated_at: now,
        };
        store
            .transact(vec![WriteOp::Insert {
                entity: Entity::Player(player.clone()),
            }])
            .unwrap();
        player
    }

    #[test]
    fn insert_starts_at_version_one() {
        let store = test_store();
        let team = team_entity(&store, "Falcons", 1_000_000);

        let read = store.get_team(&team.id).unwrap();
        assert_eq!(read.version, 1);
        assert_eq!(read.value.name, "Falcons");
    }

    #[test]
    fn get_missing_is_not_found() {
        let store = test_store();
        let err = store.get(Collection::Players, "player-99").unwrap_err();
        assert!(matches!(err, AuctionError::NotFound { .. }));
    }

    #[test]
    fn list_preserves_creation_order() {
        let store = test_store();
        let a = team_entity(&store, "A", 100);
        let b = team_entity(&store, "B", 100);
        let c = team_entity(&store, "C", 100);

        let ids: Vec<String> = store.teams().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![a.id, b.id, c.id]);
    }

    #[test]
    fn list_empty_collection_is_empty_not_error() {
        let store = test_store();
        assert!(store.list(Collection::Rounds).is_empty());
    }

    #[test]
    fn commit_bumps_version() {
        let store = test_store();
        let team = team_entity(&store, "Falcons", 100);

        let mut read = store.get_team(&team.id).unwrap();
        read.value.name = "Hawks".to_string();
        let committed = store
            .commit(read.version, Entity::Team(read.value))
            .unwrap();
        assert_eq!(committed.version, 2);
        assert_eq!(committed.value.as_team().unwrap().name, "Hawks");
    }

    #[test]
    fn stale_version_is_conflict() {
        let store = test_store();
        let team = team_entity(&store, "Falcons", 100);

        let first = store.get_team(&team.id).unwrap();
        let second = store.get_team(&team.id).unwrap();

        let mut a = first.value.clone();
        a.name = "A".to_string();
        store.commit(first.version, Entity::Team(a)).unwrap();

        let mut b = second.value.clone();
        b.name = "B".to_string();
        let err = store.commit(second.version, Entity::Team(b)).unwrap_err();
        assert!(matches!(err, AuctionError::Conflict { expected: 1, found: 2, .. }));

        // The losing write changed nothing.
        assert_eq!(store.get_team(&team.id).unwrap().value.name, "A");
    }

    #[test]
    fn transact_is_all_or_nothing() {
        let store = test_store();
        let team = team_entity(&store, "Falcons", 100);
        let player = player_entity(&store, "R. Sharma", 10);

        let team_read = store.get_team(&team.id).unwrap();
        let mut updated_team = team_read.value.clone();
        updated_team.remaining_budget = 50;

        let mut updated_player = store.get_player(&player.id).unwrap().value;
        updated_player.status = PlayerStatus::Sold;

        // Wrong player version: nothing may be applied.
        let err = store
            .transact(vec![
                WriteOp::Update {
                    expected_version: team_read.version,
                    entity: Entity::Team(updated_team),
                },
                WriteOp::Update {
                    expected_version: 42,
                    entity: Entity::Player(updated_player),
                },
            ])
            .unwrap_err();
        assert!(matches!(err, AuctionError::Conflict { .. }));

        assert_eq!(store.get_team(&team.id).unwrap().value.remaining_budget, 100);
        assert_eq!(
            store.get_player(&player.id).unwrap().value.status,
            PlayerStatus::Active
        );
    }

    #[test]
    fn duplicate_entity_in_one_transaction_is_rejected() {
        let store = test_store();
        let team = team_entity(&store, "Falcons", 100);
        let read = store.get_team(&team.id).unwrap();

        let err = store
            .transact(vec![
                WriteOp::Update {
                    expected_version: read.version,
                    entity: Entity::Team(read.value.clone()),
                },
                WriteOp::Update {
                    expected_version: read.version,
                    entity: Entity::Team(read.value.clone()),
                },
            ])
            .unwrap_err();
        assert!(matches!(err, AuctionError::Validation { .. }));
    }

    #[test]
    fn reinserting_an_existing_id_is_a_conflict() {
        let store = test_store();
        let team = team_entity(&store, "Falcons", 100);

        let mut copy = team.clone();
        copy.name = "Impostors".to_string();
        let err = store
            .transact(vec![WriteOp::Insert {
                entity: Entity::Team(copy),
            }])
            .unwrap_err();
        assert!(matches!(err, AuctionError::Conflict { expected: 0, found: 1, .. }));

        // The original record is untouched.
        assert_eq!(store.get_team(&team.id).unwrap().value.name, "Falcons");
    }

    #[test]
    fn delete_removes_entity_and_order_entry() {
        let store = test_store();
        let a = team_entity(&store, "A", 100);
        let b = team_entity(&store, "B", 100);

        let read = store.get_team(&a.id).unwrap();
        store
            .delete(Collection::Teams, &a.id, read.version)
            .unwrap();

        assert!(matches!(
            store.get_team(&a.id).unwrap_err(),
            AuctionError::NotFound { .. }
        ));
        let ids: Vec<String> = store.teams().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![b.id]);
    }

    #[test]
    fn subscribe_returns_snapshot_then_deltas() {
        let store = test_store();
        let existing = team_entity(&store, "Falcons", 100);

        let (snapshot, mut sub) =
            store.subscribe(Collection::Teams, SubscriptionFilter::All);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id(), existing.id);

        // Snapshot-covered state is not redelivered.
        assert!(sub.try_recv().is_none());

        let created = team_entity(&store, "Hawks", 100);
        let event = sub.try_recv().expect("create should be delivered");
        assert_eq!(event.id, created.id);
        assert_eq!(event.version, 1);
        assert!(matches!(event.delta, ChangeDelta::Created { .. }));
    }

    #[test]
    fn subscriber_sees_deletes() {
        let store = test_store();
        let team = team_entity(&store, "Falcons", 100);
        let (_, mut sub) = store.subscribe(Collection::Teams, SubscriptionFilter::All);

        let read = store.get_team(&team.id).unwrap();
        store
            .delete(Collection::Teams, &team.id, read.version)
            .unwrap();

        let event = sub.try_recv().expect("delete should be delivered");
        assert!(matches!(event.delta, ChangeDelta::Deleted { .. }));
        assert_eq!(event.version, 2);
    }

    #[test]
    fn minted_ids_are_sequential_per_collection() {
        let store = test_store();
        assert_eq!(store.mint_id(Collection::Teams), "team-1");
        assert_eq!(store.mint_id(Collection::Teams), "team-2");
        assert_eq!(store.mint_id(Collection::Players), "player-1");
    }

    #[test]
    fn rehydration_restores_entities_versions_and_id_counter() {
        let tmp_dir = std::env::temp_dir();
        let db_path = tmp_dir.join(format!("auction_store_rehydrate_{}.db", std::process::id()));
        let db_path_str = db_path.to_str().unwrap().to_string();
        let _ = std::fs::remove_file(&db_path);

        let (team_id, expected_version) = {
            let db = Database::open(&db_path_str).unwrap();
            let store = EntityStore::open(db).unwrap();
            let team = team_entity(&store, "Falcons", 1_000_000);
            let mut read = store.get_team(&team.id).unwrap();
            read.value.name = "Hawks".to_string();
            let committed = store.commit(read.version, Entity::Team(read.value)).unwrap();
            (team.id, committed.version)
        };

        let db = Database::open(&db_path_str).unwrap();
        let store = EntityStore::open(db).unwrap();

        let read = store.get_team(&team_id).unwrap();
        assert_eq!(read.version, expected_version);
        assert_eq!(read.value.name, "Hawks");

        // The id counter continues past rehydrated ids.
        assert_eq!(store.mint_id(Collection::Teams), "team-2");

        drop(store);
        let _ = std::fs::remove_file(&db_path);
        let _ = std::fs::remove_file(format!("{db_path_str}-wal"));
        let _ = std::fs::remove_file(format!("{db_path_str}-shm"));
    }
}
