// The auction-round state machine: one global clock, at most one active
// round, one player on the floor at a time.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::auction::ledger::BudgetLedger;
use crate::auction::lifecycle::PlayerLifecycle;
use crate::error::{AuctionError, Result};
use crate::model::{AuctionRound, Collection, Entity, PlayerStatus, RoundStatus};
use crate::store::{EntityStore, Versioned, WriteOp};

/// How the player on the floor was resolved.
#[derive(Debug, Clone)]
pub enum Resolution {
    Sold { team_id: String, final_price: u64 },
    Unsold,
}

pub struct RoundController {
    store: Arc<EntityStore>,
    ledger: BudgetLedger,
    lifecycle: PlayerLifecycle,
}

impl RoundController {
    pub fn new(store: Arc<EntityStore>) -> Self {
        RoundController {
            ledger: BudgetLedger::new(store.clone()),
            lifecycle: PlayerLifecycle::new(store.clone()),
            store,
        }
    }

    /// The round currently in progress (active or waiting for the operator
    /// to put the next player up), with its version.
    fn in_progress(&self) -> Result<Option<Versioned<AuctionRound>>> {
        for round in self.store.rounds() {
            if matches!(
                round.status,
                RoundStatus::Active | RoundStatus::WaitingForAdmin
            ) {
                return Ok(Some(self.store.get_round(&round.id)?));
            }
        }
        Ok(None)
    }

    /// The player currently on the floor, if a round is live.
    pub fn floor_player(&self) -> Result<Option<String>> {
        Ok(self
            .in_progress()?
            .and_then(|r| r.value.current_player_id))
    }

    /// Start the next round. Activates the earliest pending round if one
    /// was staged, otherwise creates a fresh one. The pool size is
    /// snapshotted at start.
    pub fn start_round(&self) -> Result<AuctionRound> {
        if let Some(existing) = self.in_progress()? {
            return Err(AuctionError::InvalidTransition {
                message: format!(
                    "round {} is still in progress",
                    existing.value.round
                ),
            });
        }

        let pool = self.active_pool_size();
        let rounds = self.store.rounds();

        if let Some(pending) = rounds
            .iter()
            .filter(|r| r.status == RoundStatus::Pending)
            .min_by_key(|r| r.round)
        {
            let versioned = self.store.get_round(&pending.id)?;
            let mut started = versioned.value;
            started.status = RoundStatus::Active;
            started.current_player_id = None;
            started.players_left = pool;
            started.total_players = pool;
            let committed = self
                .store
                .commit(versioned.version, Entity::Round(started))?;
            let round = committed
                .value
                .as_round()
                .cloned()
                .ok_or_else(|| AuctionError::Storage("committed a non-round".to_string()))?;
            info!(round = round.round, total_players = pool, "round started");
            return Ok(round);
        }

        let number = rounds.iter().map(|r| r.round).max().unwrap_or(0) + 1;
        let now = Utc::now();
        let round = AuctionRound {
            id: self.store.mint_id(Collection::Rounds),
            round: number,
            status: RoundStatus::Active,
            current_player_id: None,
            players_left: pool,
            total_players: pool,
            created_at: now,
            updated_at: now,
        };
        self.store.transact(vec![WriteOp::Insert {
            entity: Entity::Round(round.clone()),
        }])?;
        info!(round = number, total_players = pool, "round started");
        Ok(round)
    }

    /// Put the next player on the floor. With an explicit `player_id` the
    /// operator chooses; otherwise the oldest active player is selected.
    /// The chosen player moves active -> pending in the same transaction
    /// that sets `current_player_id`.
    pub fn advance(&self, player_id: Option<&str>) -> Result<AuctionRound> {
        let round = self.require_in_progress()?;
        if round.value.current_player_id.is_some() {
            return Err(AuctionError::InvalidTransition {
                message: "a player is already on the auction floor".to_string(),
            });
        }

        let player = match player_id {
            Some(id) => {
                let player = self.store.get_player(id)?;
                if player.value.status != PlayerStatus::Active {
                    return Err(AuctionError::PlayerNotEligible {
                        player_id: id.to_string(),
                        reason: format!(
                            "status is {}, only active players go on the floor",
                            player.value.status.display_str()
                        ),
                    });
                }
                player
            }
            None => {
                let next = self
                    .store
                    .players()
                    .into_iter()
                    .find(|p| p.status == PlayerStatus::Active)
                    .ok_or_else(|| AuctionError::InvalidTransition {
                        message: "no active players left in the pool".to_string(),
                    })?;
                self.store.get_player(&next.id)?
            }
        };

        let mut pending = player.value;
        pending.status = PlayerStatus::Pending;
        let chosen_id = pending.id.clone();

        let mut updated = round.value;
        updated.status = RoundStatus::Active;
        updated.current_player_id = Some(chosen_id.clone());
        let round_id = updated.id.clone();

        self.store.transact(vec![
            WriteOp::Update {
                expected_version: player.version,
                entity: Entity::Player(pending),
            },
            WriteOp::Update {
                expected_version: round.version,
                entity: Entity::Round(updated),
            },
        ])?;

        info!(player_id = %chosen_id, "player on the floor");
        self.store.get_round(&round_id).map(|v| v.value)
    }

    /// Resolve the player on the floor. The ledger (or lifecycle) ops and
    /// the round bookkeeping — clear the floor, decrement `players_left`,
    /// park the round — commit as one transaction.
    pub fn resolve_current(&self, resolution: Resolution) -> Result<()> {
        let round = self.require_in_progress()?;
        let player_id = round.value.current_player_id.clone().ok_or_else(|| {
            AuctionError::InvalidTransition {
                message: "no player is on the auction floor".to_string(),
            }
        })?;

        let mut ops = match &resolution {
            Resolution::Sold {
                team_id,
                final_price,
            } => self.ledger.sell_ops(&player_id, team_id, *final_price)?,
            Resolution::Unsold => self.lifecycle.mark_unsold_ops(&player_id)?,
        };

        let mut updated = round.value;
        updated.current_player_id = None;
        updated.players_left = updated.players_left.saturating_sub(1);
        updated.status = if updated.players_left == 0 {
            RoundStatus::Completed
        } else {
            RoundStatus::WaitingForAdmin
        };
        let finished = updated.status == RoundStatus::Completed;
        let round_no = updated.round;
        ops.push(WriteOp::Update {
            expected_version: round.version,
            entity: Entity::Round(updated),
        });

        self.store.transact(ops)?;

        match resolution {
            Resolution::Sold { team_id, .. } => {
                info!(player_id, team_id, round = round_no, "floor player sold")
            }
            Resolution::Unsold => {
                info!(player_id, round = round_no, "floor player unsold")
            }
        }
        if finished {
            info!(round = round_no, "round completed, pool exhausted");
        }
        Ok(())
    }

    /// End the round. A player still pending on the floor reverts to
    /// active — nothing was sold, so there is no ledger effect.
    pub fn end_round(&self) -> Result<AuctionRound> {
        let round = self.require_in_progress()?;

        let mut ops = Vec::new();
        if let Some(player_id) = &round.value.current_player_id {
            let player = self.store.get_player(player_id)?;
            if player.value.status == PlayerStatus::Pending {
                let mut reverted = player.value;
                reverted.status = PlayerStatus::Active;
                ops.push(WriteOp::Update {
                    expected_version: player.version,
                    entity: Entity::Player(reverted),
                });
            }
        }

        let mut completed = round.value;
        completed.status = RoundStatus::Completed;
        completed.current_player_id = None;
        let round_id = completed.id.clone();
        let round_no = completed.round;
        ops.push(WriteOp::Update {
            expected_version: round.version,
            entity: Entity::Round(completed),
        });

        self.store.transact(ops)?;
        info!(round = round_no, "round ended");
        self.store.get_round(&round_id).map(|v| v.value)
    }

    fn require_in_progress(&self) -> Result<Versioned<AuctionRound>> {
        self.in_progress()?
            .ok_or_else(|| AuctionError::InvalidTransition {
                message: "no round is in progress".to_string(),
            })
    }

    fn active_pool_size(&self) -> u32 {
        self.store
            .players()
            .iter()
            .filter(|p| p.status == PlayerStatus::Active)
            .count() as u32
    }
}
