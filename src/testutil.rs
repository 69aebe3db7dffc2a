// Shared helpers for unit tests: a fresh in-memory store and entity seeds.

use std::sync::Arc;

use chrono::Utc;

use crate::model::{Collection, Entity, Player, PlayerRole, PlayerStatus, Team};
use crate::store::{EntityStore, WriteOp};

pub fn test_store() -> Arc<EntityStore> {
    Arc::new(EntityStore::in_memory().expect("in-memory store should open"))
}

pub fn seed_team(store: &EntityStore, name: &str, budget: u64) -> Team {
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
        .expect("seed team");
    team
}

pub fn seed_player(store: &EntityStore, name: &str, base_price: u64) -> Player {
    seed_player_with_role(store, name, base_price, PlayerRole::Batter)
}

pub fn seed_player_with_role(
    store: &EntityStore,
    name: &str,
    base_price: u64,
    role: PlayerRole,
) -> Player {
    let now = Utc::now();
    let player = Player {
        id: store.mint_id(Collection::Players),
        name: name.to_string(),
        role,
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
        .expect("seed player");
    player
}
