// Per-team shortlists. Owners flag players they intend to bid on; entries
// are keyed by (team, player) and upserted in place.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::error::{AuctionError, Result};
use crate::model::{Collection, Entity, PlayerStatus, TargetPlayer, TargetPriority};
use crate::store::{EntityStore, WriteOp};

pub struct TargetListManager {
    store: Arc<EntityStore>,
}

impl TargetListManager {
    pub fn new(store: Arc<EntityStore>) -> Self {
        TargetListManager { store }
    }

    /// Add a player to a team's shortlist, or update the existing entry's
    /// priority and notes. Only players still obtainable (active or unsold)
    /// can be targeted.
    pub fn add_target(
        &self,
        team_id: &str,
        player_id: &str,
        priority: TargetPriority,
        notes: &str,
    ) -> Result<TargetPlayer> {
        self.store.get_team(team_id)?;
        let player = self.store.get_player(player_id)?;
        match player.value.status {
            PlayerStatus::Active | PlayerStatus::Unsold => {}
            status => {
                return Err(AuctionError::PlayerNotEligible {
                    player_id: player_id.to_string(),
                    reason: format!(
                        "status is {}, only active or unsold players can be targeted",
                        status.display_str()
                    ),
                })
            }
        }

        if let Some(existing) = self
            .store
            .targets()
            .into_iter()
            .find(|t| t.team_id == team_id && t.player_id == player_id)
        {
            let versioned = self.store.get(Collection::Targets, &existing.id)?;
            let mut updated = versioned
                .value
                .as_target()
                .cloned()
                .ok_or_else(|| AuctionError::Storage("targets shelf holds a non-target".to_string()))?;
            updated.priority = priority;
            updated.notes = notes.to_string();
            let committed = self
                .store
                .commit(versioned.version, Entity::Target(updated))?;
            let target = committed
                .value
                .as_target()
                .cloned()
                .ok_or_else(|| AuctionError::Storage("committed a non-target".to_string()))?;
            info!(team_id, player_id, "target entry updated");
            return Ok(target);
        }

        let now = Utc::now();
        let target = TargetPlayer {
            id: self.store.mint_id(Collection::Targets),
            team_id: team_id.to_string(),
            player_id: player_id.to_string(),
            priority,
            notes: notes.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.store.transact(vec![WriteOp::Insert {
            entity: Entity::Target(target.clone()),
        }])?;
        info!(team_id, player_id, "player targeted");
        Ok(target)
    }

    /// Drop a player from a team's shortlist. Removing an entry that does
    /// not exist is a no-op.
    pub fn remove_target(&self, team_id: &str, player_id: &str) -> Result<()> {
        let Some(existing) = self
            .store
            .targets()
            .into_iter()
            .find(|t| t.team_id == team_id && t.player_id == player_id)
        else {
            return Ok(());
        };
        let versioned = self.store.get(Collection::Targets, &existing.id)?;
        self.store.transact(vec![WriteOp::Delete {
            collection: Collection::Targets,
            id: existing.id,
            expected_version: versioned.version,
        }])?;
        info!(team_id, player_id, "target entry removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auction::BudgetLedger;
    use crate::testutil::{seed_player, seed_team, test_store};

    #[test]
    fn targeting_a_player_creates_one_entry() {
        let store = test_store();
        let targets = TargetListManager::new(store.clone());
        let team = seed_team(&store, "Team A", 1_000_000);
        let player = seed_player(&store, "Player X", 100_000);

        let entry = targets
            .add_target(&team.id, &player.id, TargetPriority::High, "opening pick")
            .unwrap();
        assert_eq!(entry.team_id, team.id);
        assert_eq!(entry.player_id, player.id);
        assert_eq!(store.targets().len(), 1);
    }

    #[test]
    fn retargeting_updates_the_existing_entry() {
        let store = test_store();
        let targets = TargetListManager::new(store.clone());
        let team = seed_team(&store, "Team A", 1_000_000);
        let player = seed_player(&store, "Player X", 100_000);

        let first = targets
            .add_target(&team.id, &player.id, TargetPriority::Low, "")
            .unwrap();
        let second = targets
            .add_target(&team.id, &player.id, TargetPriority::High, "price dropped")
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.priority, TargetPriority::High);
        assert_eq!(second.notes, "price dropped");
        assert_eq!(store.targets().len(), 1);
    }

    #[test]
    fn two_teams_can_target_the_same_player() {
        let store = test_store();
        let targets = TargetListManager::new(store.clone());
        let a = seed_team(&store, "Team A", 1_000_000);
        let b = seed_team(&store, "Team B", 1_000_000);
        let player = seed_player(&store, "Player X", 100_000);

        targets
            .add_target(&a.id, &player.id, TargetPriority::High, "")
            .unwrap();
        targets
            .add_target(&b.id, &player.id, TargetPriority::Medium, "")
            .unwrap();
        assert_eq!(store.targets().len(), 2);
    }

    #[test]
    fn sold_players_cannot_be_targeted() {
        let store = test_store();
        let targets = TargetListManager::new(store.clone());
        let ledger = BudgetLedger::new(store.clone());
        let a = seed_team(&store, "Team A", 1_000_000);
        let b = seed_team(&store, "Team B", 1_000_000);
        let player = seed_player(&store, "Player X", 100_000);
        ledger.sell(&player.id, &a.id, 100_000).unwrap();

        let err = targets
            .add_target(&b.id, &player.id, TargetPriority::High, "")
            .unwrap_err();
        assert!(matches!(err, AuctionError::PlayerNotEligible { .. }));
    }

    #[test]
    fn targeting_requires_existing_team_and_player() {
        let store = test_store();
        let targets = TargetListManager::new(store.clone());
        let team = seed_team(&store, "Team A", 1_000_000);

        let err = targets
            .add_target(&team.id, "player-99", TargetPriority::High, "")
            .unwrap_err();
        assert!(matches!(err, AuctionError::NotFound { .. }));

        let err = targets
            .add_target("team-99", "player-99", TargetPriority::High, "")
            .unwrap_err();
        assert!(matches!(err, AuctionError::NotFound { .. }));
    }

    #[test]
    fn removing_an_absent_target_is_a_no_op() {
        let store = test_store();
        let targets = TargetListManager::new(store.clone());
        let team = seed_team(&store, "Team A", 1_000_000);
        let player = seed_player(&store, "Player X", 100_000);

        targets.remove_target(&team.id, &player.id).unwrap();

        targets
            .add_target(&team.id, &player.id, TargetPriority::High, "")
            .unwrap();
        targets.remove_target(&team.id, &player.id).unwrap();
        assert!(store.targets().is_empty());
    }
}
