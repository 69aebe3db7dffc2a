// The operator-facing surface of the engine. Every mutation passes through
// here: the role check happens once at this boundary, then the call is
// routed to the ledger, lifecycle, round, or target component.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::auction::{
    BudgetLedger, PlayerLifecycle, Resolution, RoundController, TargetListManager,
};
use crate::broadcast::{Subscription, SubscriptionFilter};
use crate::config::AuctionRules;
use crate::error::{AuctionError, Result};
use crate::model::{
    AuctionRound, CallerRole, Collection, Entity, NewPlayer, NewTeam, Player, PlayerStatus,
    TargetPlayer, TargetPriority, Team, UpdatePlayer, UpdateTeam,
};
use crate::store::{EntityStore, WriteOp};

pub struct Api {
    store: Arc<EntityStore>,
    ledger: BudgetLedger,
    lifecycle: PlayerLifecycle,
    rounds: RoundController,
    targets: TargetListManager,
    rules: AuctionRules,
}

impl Api {
    pub fn new(store: Arc<EntityStore>, rules: AuctionRules) -> Self {
        Api {
            ledger: BudgetLedger::new(store.clone()),
            lifecycle: PlayerLifecycle::new(store.clone()),
            rounds: RoundController::new(store.clone()),
            targets: TargetListManager::new(store.clone()),
            store,
            rules,
        }
    }

    pub fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    // ------------------------------------------------------------------
    // Teams
    // ------------------------------------------------------------------

    pub fn create_team(&self, role: CallerRole, new: NewTeam) -> Result<Team> {
        require_admin(role, "create_team")?;
        let name = valid_name(new.name, "name")?;
        let budget = new.budget.unwrap_or(self.rules.default_team_budget);
        if budget == 0 {
            return Err(AuctionError::Validation {
                field: "budget",
                message: "team budget must be positive".to_string(),
            });
        }

        let now = Utc::now();
        let team = Team {
            id: self.store.mint_id(Collection::Teams),
            name,
            budget,
            remaining_budget: budget,
            players: vec![],
            owner_id: new.owner_id,
            created_at: now,
            updated_at: now,
        };
        self.store.transact(vec![WriteOp::Insert {
            entity: Entity::Team(team.clone()),
        }])?;
        info!(team_id = %team.id, budget, "team created");
        Ok(team)
    }

    /// Rename a team or rebind its owner. The budget allotment is fixed at
    /// creation and cannot be edited here.
    pub fn update_team(&self, role: CallerRole, team_id: &str, update: UpdateTeam) -> Result<Team> {
        require_admin(role, "update_team")?;
        let versioned = self.store.get_team(team_id)?;
        let mut team = versioned.value;
        if let Some(name) = update.name {
            team.name = valid_name(name, "name")?;
        }
        if let Some(owner_id) = update.owner_id {
            team.owner_id = Some(owner_id);
        }
        let committed = self.store.commit(versioned.version, Entity::Team(team))?;
        committed
            .value
            .as_team()
            .cloned()
            .ok_or_else(|| AuctionError::Storage("committed a non-team".to_string()))
    }

    /// Delete a team and its shortlist. Rejected while any player is still
    /// sold to it; those sales must be reverted first.
    pub fn delete_team(&self, role: CallerRole, team_id: &str) -> Result<()> {
        require_admin(role, "delete_team")?;
        let team = self.store.get_team(team_id)?;

        if let Some(assigned) = self
            .store
            .players()
            .into_iter()
            .find(|p| p.status == PlayerStatus::Sold && p.team_id.as_deref() == Some(team_id))
        {
            return Err(AuctionError::PlayerStillAssigned {
                player_id: assigned.id,
            });
        }

        let mut ops = vec![WriteOp::Delete {
            collection: Collection::Teams,
            id: team_id.to_string(),
            expected_version: team.version,
        }];
        for target in self.store.targets() {
            if target.team_id == team_id {
                let versioned = self.store.get(Collection::Targets, &target.id)?;
                ops.push(WriteOp::Delete {
                    collection: Collection::Targets,
                    id: target.id,
                    expected_version: versioned.version,
                });
            }
        }
        self.store.transact(ops)?;
        info!(team_id, "team deleted");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Players
    // ------------------------------------------------------------------

    pub fn create_player(&self, role: CallerRole, new: NewPlayer) -> Result<Player> {
        let created = self.create_players(role, vec![new])?;
        Ok(created.into_iter().next().expect("one player in, one out"))
    }

    /// Create a batch of players in one transaction; a single invalid entry
    /// rejects the whole batch.
    pub fn create_players(&self, role: CallerRole, new: Vec<NewPlayer>) -> Result<Vec<Player>> {
        require_admin(role, "create_player")?;
        let now = Utc::now();
        let mut players = Vec::with_capacity(new.len());
        let mut ops = Vec::with_capacity(new.len());
        for entry in new {
            let name = valid_name(entry.name, "name")?;
            if entry.base_price < self.rules.min_base_price {
                return Err(AuctionError::Validation {
                    field: "base_price",
                    message: format!(
                        "base price {} for `{name}` is below the floor {}",
                        entry.base_price, self.rules.min_base_price
                    ),
                });
            }
            let player = Player {
                id: self.store.mint_id(Collection::Players),
                name,
                role: entry.role,
                base_price: entry.base_price,
                status: PlayerStatus::Active,
                team_id: None,
                final_price: None,
                stats: entry.stats,
                created_at: now,
                updated_at: now,
            };
            ops.push(WriteOp::Insert {
                entity: Entity::Player(player.clone()),
            });
            players.push(player);
        }
        self.store.transact(ops)?;
        info!(count = players.len(), "players created");
        Ok(players)
    }

    /// Partial player edit. Plain fields are patched in place; a `team_id`
    /// (with its mandatory `final_price`) turns the edit into a ledger
    /// reassignment so the field changes and the budget moves commit
    /// together.
    pub fn update_player(
        &self,
        role: CallerRole,
        player_id: &str,
        update: UpdatePlayer,
    ) -> Result<Player> {
        require_admin(role, "update_player")?;
        let versioned = self.store.get_player(player_id)?;
        let mut player = versioned.value.clone();

        if let Some(name) = update.name {
            player.name = valid_name(name, "name")?;
        }
        if let Some(player_role) = update.role {
            player.role = player_role;
        }
        if let Some(base_price) = update.base_price {
            if base_price < self.rules.min_base_price {
                return Err(AuctionError::Validation {
                    field: "base_price",
                    message: format!(
                        "base price {base_price} is below the floor {}",
                        self.rules.min_base_price
                    ),
                });
            }
            // A sold player's sale price must stay at or above its base
            // price; when the same edit re-prices the sale, the ledger
            // checks the new price instead.
            if player.status == PlayerStatus::Sold && update.final_price.is_none() {
                if let Some(final_price) = player.final_price {
                    if base_price > final_price {
                        return Err(AuctionError::Validation {
                            field: "base_price",
                            message: format!(
                                "base price {base_price} exceeds the sale price {final_price} of a sold player"
                            ),
                        });
                    }
                }
            }
            player.base_price = base_price;
        }
        if let Some(stats) = update.stats {
            player.stats = stats;
        }

        match (update.team_id, update.final_price) {
            (Some(team_id), Some(final_price)) => {
                let edited = crate::store::Versioned {
                    value: player,
                    version: versioned.version,
                };
                let ops = self.ledger.reassign_ops(edited, &team_id, final_price)?;
                self.store.transact(ops)?;
                info!(player_id, team_id, final_price, "player updated and reassigned");
            }
            (None, None) => {
                self.store
                    .commit(versioned.version, Entity::Player(player))?;
            }
            _ => {
                return Err(AuctionError::Validation {
                    field: "team_id",
                    message: "team_id and final_price must be supplied together".to_string(),
                })
            }
        }
        self.store.get_player(player_id).map(|v| v.value)
    }

    pub fn delete_player(&self, role: CallerRole, player_id: &str) -> Result<()> {
        require_admin(role, "delete_player")?;
        self.lifecycle.delete_player(player_id)
    }

    // ------------------------------------------------------------------
    // Sales
    // ------------------------------------------------------------------

    /// Sell a player. A player on the auction floor resolves through the
    /// round controller (the round bookkeeping commits with the sale); an
    /// off-floor sale goes straight to the ledger.
    pub fn sell(
        &self,
        role: CallerRole,
        player_id: &str,
        team_id: &str,
        final_price: u64,
    ) -> Result<()> {
        require_admin(role, "sell")?;
        if self.rounds.floor_player()?.as_deref() == Some(player_id) {
            return self.rounds.resolve_current(Resolution::Sold {
                team_id: team_id.to_string(),
                final_price,
            });
        }
        self.ledger.sell(player_id, team_id, final_price)
    }

    /// Revert a sale. `restore_to` defaults to unsold.
    pub fn unsell(
        &self,
        role: CallerRole,
        player_id: &str,
        restore_to: Option<PlayerStatus>,
    ) -> Result<()> {
        require_admin(role, "unsell")?;
        self.ledger
            .unsell(player_id, restore_to.unwrap_or(PlayerStatus::Unsold))
    }

    /// Mark a player unsold. On-floor players resolve through the round
    /// controller, like `sell`.
    pub fn mark_unsold(&self, role: CallerRole, player_id: &str) -> Result<()> {
        require_admin(role, "mark_unsold")?;
        if self.rounds.floor_player()?.as_deref() == Some(player_id) {
            return self.rounds.resolve_current(Resolution::Unsold);
        }
        self.lifecycle.mark_unsold(player_id)
    }

    pub fn reactivate(&self, role: CallerRole, player_id: &str) -> Result<()> {
        require_admin(role, "reactivate")?;
        self.lifecycle.reactivate(player_id)
    }

    pub fn reset_all_team_budgets(&self, role: CallerRole) -> Result<()> {
        require_admin(role, "reset_all_team_budgets")?;
        self.ledger.reset_all()
    }

    // ------------------------------------------------------------------
    // Rounds
    // ------------------------------------------------------------------

    pub fn start_round(&self, role: CallerRole) -> Result<AuctionRound> {
        require_admin(role, "start_round")?;
        self.rounds.start_round()
    }

    pub fn advance_round(&self, role: CallerRole, player_id: Option<&str>) -> Result<AuctionRound> {
        require_admin(role, "advance_round")?;
        self.rounds.advance(player_id)
    }

    pub fn end_round(&self, role: CallerRole) -> Result<AuctionRound> {
        require_admin(role, "end_round")?;
        self.rounds.end_round()
    }

    // ------------------------------------------------------------------
    // Target lists (owners may edit their own shortlists)
    // ------------------------------------------------------------------

    pub fn add_target(
        &self,
        _role: CallerRole,
        team_id: &str,
        player_id: &str,
        priority: TargetPriority,
        notes: &str,
    ) -> Result<TargetPlayer> {
        self.targets.add_target(team_id, player_id, priority, notes)
    }

    pub fn remove_target(&self, _role: CallerRole, team_id: &str, player_id: &str) -> Result<()> {
        self.targets.remove_target(team_id, player_id)
    }

    // ------------------------------------------------------------------
    // Reads (no role required)
    // ------------------------------------------------------------------

    pub fn list(&self, collection: Collection) -> Vec<Entity> {
        self.store.list(collection)
    }

    pub fn get(&self, collection: Collection, id: &str) -> Result<Entity> {
        self.store.get(collection, id).map(|v| v.value)
    }

    pub fn subscribe(
        &self,
        collection: Collection,
        filter: SubscriptionFilter,
    ) -> (Vec<Entity>, Subscription) {
        self.store.subscribe(collection, filter)
    }
}

fn require_admin(role: CallerRole, operation: &'static str) -> Result<()> {
    match role {
        CallerRole::Admin => Ok(()),
        CallerRole::Owner => Err(AuctionError::Forbidden { operation }),
    }
}

fn valid_name(name: String, field: &'static str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(AuctionError::Validation {
            field,
            message: "must not be empty".to_string(),
        });
    }
    Ok(trimmed.to_string())
}
