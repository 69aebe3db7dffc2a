// The budget ledger: the only path that mutates a team's remaining budget
// or roster membership.
//
// Every ledger operation reads the entities it touches, validates the
// preconditions, and submits one store transaction with the versions it
// read. A concurrent writer makes the transaction fail with `Conflict`
// instead of silently double-spending a budget.

use std::sync::Arc;

use tracing::info;

use crate::error::{AuctionError, Result};
use crate::model::{Entity, Player, PlayerStatus, Team};
use crate::store::{EntityStore, Versioned, WriteOp};

pub struct BudgetLedger {
    store: Arc<EntityStore>,
}

impl BudgetLedger {
    pub fn new(store: Arc<EntityStore>) -> Self {
        BudgetLedger { store }
    }

    /// Sell `player_id` to `team_id` for `final_price`.
    ///
    /// Debits the team and appends the player to its roster in the same
    /// transaction that marks the player sold.
    pub fn sell(&self, player_id: &str, team_id: &str, final_price: u64) -> Result<()> {
        let ops = self.sell_ops(player_id, team_id, final_price)?;
        self.store.transact(ops)?;
        info!(player_id, team_id, final_price, "player sold");
        Ok(())
    }

    /// Build the op set for a sale without committing it, so callers can
    /// fold extra ops (e.g. round bookkeeping) into the same transaction.
    pub(crate) fn sell_ops(
        &self,
        player_id: &str,
        team_id: &str,
        final_price: u64,
    ) -> Result<Vec<WriteOp>> {
        let player = self.store.get_player(player_id)?;
        let team = self.store.get_team(team_id)?;

        match player.value.status {
            PlayerStatus::Sold => {
                return Err(AuctionError::AlreadySold {
                    player_id: player_id.to_string(),
                })
            }
            PlayerStatus::Active | PlayerStatus::Unsold | PlayerStatus::Pending => {}
        }
        check_price(&player.value, final_price)?;
        if team.value.remaining_budget < final_price {
            return Err(AuctionError::InsufficientBudget {
                team_id: team_id.to_string(),
                remaining: team.value.remaining_budget,
                price: final_price,
            });
        }

        let mut sold = player.value;
        sold.status = PlayerStatus::Sold;
        sold.team_id = Some(team_id.to_string());
        sold.final_price = Some(final_price);

        let mut buyer = team.value;
        buyer.remaining_budget -= final_price;
        roster_add(&mut buyer, player_id);

        Ok(vec![
            WriteOp::Update {
                expected_version: player.version,
                entity: Entity::Player(sold),
            },
            WriteOp::Update {
                expected_version: team.version,
                entity: Entity::Team(buyer),
            },
        ])
    }

    /// Revert a sale: refund the buying team, remove the player from its
    /// roster, and restore the player to `restore_to` (`Unsold` or
    /// `Active`, the operator's choice).
    pub fn unsell(&self, player_id: &str, restore_to: PlayerStatus) -> Result<()> {
        let ops = self.unsell_ops(player_id, restore_to)?;
        self.store.transact(ops)?;
        info!(player_id, restore_to = restore_to.display_str(), "sale reverted");
        Ok(())
    }

    pub(crate) fn unsell_ops(
        &self,
        player_id: &str,
        restore_to: PlayerStatus,
    ) -> Result<Vec<WriteOp>> {
        if !matches!(restore_to, PlayerStatus::Unsold | PlayerStatus::Active) {
            return Err(AuctionError::InvalidTransition {
                message: format!(
                    "a reverted sale restores a player to unsold or active, not {}",
                    restore_to.display_str()
                ),
            });
        }

        let player = self.store.get_player(player_id)?;
        if player.value.status != PlayerStatus::Sold {
            return Err(AuctionError::InvalidTransition {
                message: format!(
                    "player `{player_id}` is {}, only sold players can be unsold",
                    player.value.status.display_str()
                ),
            });
        }
        let (team_id, final_price) = sale_fields(&player.value)?;
        let team = self.store.get_team(&team_id)?;

        let mut reverted = player.value;
        reverted.status = restore_to;
        reverted.team_id = None;
        reverted.final_price = None;

        let mut seller = team.value;
        seller.remaining_budget += final_price;
        seller.players.retain(|id| id != player_id);

        Ok(vec![
            WriteOp::Update {
                expected_version: player.version,
                entity: Entity::Player(reverted),
            },
            WriteOp::Update {
                expected_version: team.version,
                entity: Entity::Team(seller),
            },
        ])
    }

    /// Move an already-sold player to another team (or re-price the sale on
    /// the same team). Refund and debit land in one transaction, so no
    /// observer ever sees a budget that reflects neither assignment.
    pub fn reassign(&self, player_id: &str, new_team_id: &str, final_price: u64) -> Result<()> {
        let player = self.store.get_player(player_id)?;
        let ops = self.reassign_ops(player, new_team_id, final_price)?;
        self.store.transact(ops)?;
        info!(player_id, new_team_id, final_price, "sale reassigned");
        Ok(())
    }

    /// `player` is passed in (rather than re-read) so a caller can apply
    /// unrelated field edits and keep the whole form submission atomic.
    pub(crate) fn reassign_ops(
        &self,
        player: Versioned<Player>,
        new_team_id: &str,
        final_price: u64,
    ) -> Result<Vec<WriteOp>> {
        if player.value.status != PlayerStatus::Sold {
            return Err(AuctionError::InvalidTransition {
                message: format!(
                    "player `{}` is {}, only sold players can be reassigned",
                    player.value.id,
                    player.value.status.display_str()
                ),
            });
        }
        check_price(&player.value, final_price)?;
        let (old_team_id, old_price) = sale_fields(&player.value)?;
        let player_id = player.value.id.clone();

        let mut moved = player.value;
        moved.team_id = Some(new_team_id.to_string());
        moved.final_price = Some(final_price);
        let player_op = WriteOp::Update {
            expected_version: player.version,
            entity: Entity::Player(moved),
        };

        if old_team_id == new_team_id {
            // Same buyer: the refund nets against the new debit.
            let team = self.store.get_team(new_team_id)?;
            let available = team.value.remaining_budget + old_price;
            if available < final_price {
                return Err(AuctionError::InsufficientBudget {
                    team_id: new_team_id.to_string(),
                    remaining: available,
                    price: final_price,
                });
            }
            let mut buyer = team.value;
            buyer.remaining_budget = available - final_price;
            roster_add(&mut buyer, &player_id);
            return Ok(vec![
                player_op,
                WriteOp::Update {
                    expected_version: team.version,
                    entity: Entity::Team(buyer),
                },
            ]);
        }

        let old_team = self.store.get_team(&old_team_id)?;
        let new_team = self.store.get_team(new_team_id)?;
        if new_team.value.remaining_budget < final_price {
            return Err(AuctionError::InsufficientBudget {
                team_id: new_team_id.to_string(),
                remaining: new_team.value.remaining_budget,
                price: final_price,
            });
        }

        let mut seller = old_team.value;
        seller.remaining_budget += old_price;
        seller.players.retain(|id| *id != player_id);

        let mut buyer = new_team.value;
        buyer.remaining_budget -= final_price;
        roster_add(&mut buyer, &player_id);

        Ok(vec![
            player_op,
            WriteOp::Update {
                expected_version: old_team.version,
                entity: Entity::Team(seller),
            },
            WriteOp::Update {
                expected_version: new_team.version,
                entity: Entity::Team(buyer),
            },
        ])
    }

    /// Reset every team for a new auction cycle: full budget restored,
    /// roster emptied, and that team's sold players returned to the active
    /// pool. Each team's reset is one transaction; teams reset
    /// independently of one another.
    pub fn reset_all(&self) -> Result<()> {
        let team_ids: Vec<String> = self.store.teams().into_iter().map(|t| t.id).collect();
        for team_id in team_ids {
            let team = self.store.get_team(&team_id)?;
            let mut ops = Vec::new();

            for player_id in &team.value.players {
                let player = match self.store.get_player(player_id) {
                    Ok(p) => p,
                    // A roster entry pointing at a deleted player cannot
                    // block the reset.
                    Err(AuctionError::NotFound { .. }) => continue,
                    Err(e) => return Err(e),
                };
                if player.value.status != PlayerStatus::Sold
                    || player.value.team_id.as_deref() != Some(team_id.as_str())
                {
                    continue;
                }
                let mut reverted = player.value;
                reverted.status = PlayerStatus::Active;
                reverted.team_id = None;
                reverted.final_price = None;
                ops.push(WriteOp::Update {
                    expected_version: player.version,
                    entity: Entity::Player(reverted),
                });
            }

            let mut reset = team.value;
            reset.remaining_budget = reset.budget;
            reset.players.clear();
            ops.push(WriteOp::Update {
                expected_version: team.version,
                entity: Entity::Team(reset),
            });

            self.store.transact(ops)?;
            info!(team_id, "team budget reset");
        }
        Ok(())
    }
}

fn check_price(player: &Player, final_price: u64) -> Result<()> {
    if final_price < player.base_price {
        return Err(AuctionError::InvalidTransition {
            message: format!(
                "final price {final_price} is below player `{}` base price {}",
                player.id, player.base_price
            ),
        });
    }
    Ok(())
}

/// The (team_id, final_price) pair of a sold player. Both fields are
/// present by invariant; their absence means a corrupted record.
fn sale_fields(player: &Player) -> Result<(String, u64)> {
    match (&player.team_id, player.final_price) {
        (Some(team_id), Some(price)) => Ok((team_id.clone(), price)),
        _ => Err(AuctionError::Storage(format!(
            "sold player `{}` is missing its sale fields",
            player.id
        ))),
    }
}

/// Idempotent roster union; the roster is an ordered set.
fn roster_add(team: &mut Team, player_id: &str) {
    if !team.players.iter().any(|id| id == player_id) {
        team.players.push(player_id.to_string());
    }
}
