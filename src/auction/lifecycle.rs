// Player status transitions outside the money path.
//
// Allowed transitions: active -> sold (ledger), active -> unsold,
// sold -> unsold|active (ledger refund), unsold -> active|sold,
// pending -> sold|unsold (round resolution) or back to active when a round
// ends without a sale. A completed auction cycle leaves every player in
// {sold, unsold}.

use std::sync::Arc;

use tracing::info;

use crate::error::{AuctionError, Result};
use crate::model::{Collection, Entity, PlayerStatus};
use crate::store::{EntityStore, WriteOp};

pub struct PlayerLifecycle {
    store: Arc<EntityStore>,
}

impl PlayerLifecycle {
    pub fn new(store: Arc<EntityStore>) -> Self {
        PlayerLifecycle { store }
    }

    /// Mark a player unsold with no buyer. No budget effect. Idempotent on
    /// already-unsold players.
    pub fn mark_unsold(&self, player_id: &str) -> Result<()> {
        let ops = self.mark_unsold_ops(player_id)?;
        if ops.is_empty() {
            return Ok(());
        }
        self.store.transact(ops)?;
        info!(player_id, "player marked unsold");
        Ok(())
    }

    pub(crate) fn mark_unsold_ops(&self, player_id: &str) -> Result<Vec<WriteOp>> {
        let player = self.store.get_player(player_id)?;
        match player.value.status {
            PlayerStatus::Unsold => Ok(vec![]),
            PlayerStatus::Active | PlayerStatus::Pending => {
                let mut updated = player.value;
                updated.status = PlayerStatus::Unsold;
                Ok(vec![WriteOp::Update {
                    expected_version: player.version,
                    entity: Entity::Player(updated),
                }])
            }
            PlayerStatus::Sold => Err(AuctionError::InvalidTransition {
                message: format!(
                    "player `{player_id}` is sold; revert the sale to release its budget"
                ),
            }),
        }
    }

    /// Return an unsold player to the active pool. Idempotent on players
    /// already active.
    pub fn reactivate(&self, player_id: &str) -> Result<()> {
        let player = self.store.get_player(player_id)?;
        match player.value.status {
            PlayerStatus::Active => Ok(()),
            PlayerStatus::Unsold => {
                let mut updated = player.value;
                updated.status = PlayerStatus::Active;
                self.store.transact(vec![WriteOp::Update {
                    expected_version: player.version,
                    entity: Entity::Player(updated),
                }])?;
                info!(player_id, "player returned to the pool");
                Ok(())
            }
            PlayerStatus::Sold | PlayerStatus::Pending => {
                Err(AuctionError::InvalidTransition {
                    message: format!(
                        "player `{player_id}` is {}, only unsold players re-enter the pool",
                        player.value.status.display_str()
                    ),
                })
            }
        }
    }

    /// Delete a player record. Rejected while the player is sold (the
    /// budget and roster slot must be released first) or on the auction
    /// floor. Target-list entries referencing the player are removed in
    /// the same transaction.
    pub fn delete_player(&self, player_id: &str) -> Result<()> {
        let player = self.store.get_player(player_id)?;
        match player.value.status {
            PlayerStatus::Sold => {
                return Err(AuctionError::PlayerStillAssigned {
                    player_id: player_id.to_string(),
                })
            }
            PlayerStatus::Pending => {
                return Err(AuctionError::InvalidTransition {
                    message: format!(
                        "player `{player_id}` is on the auction floor and cannot be deleted"
                    ),
                })
            }
            PlayerStatus::Active | PlayerStatus::Unsold => {}
        }

        let mut ops = vec![WriteOp::Delete {
            collection: Collection::Players,
            id: player_id.to_string(),
            expected_version: player.version,
        }];
        for target in self.store.targets() {
            if target.player_id == player_id {
                let versioned = self.store.get(Collection::Targets, &target.id)?;
                ops.push(WriteOp::Delete {
                    collection: Collection::Targets,
                    id: target.id,
                    expected_version: versioned.version,
                });
            }
        }

        self.store.transact(ops)?;
        info!(player_id, "player deleted");
        Ok(())
    }
}
