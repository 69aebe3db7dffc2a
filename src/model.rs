// Entity records for the auction: teams, players, rounds, target lists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque string identifier assigned by the store (e.g. "player-17").
pub type EntityId = String;

// ---------------------------------------------------------------------------
// Collections
// ---------------------------------------------------------------------------

/// The four entity collections held by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Teams,
    Players,
    Rounds,
    Targets,
}

impl Collection {
    /// All collections, in rehydration order.
    pub const ALL: [Collection; 4] = [
        Collection::Teams,
        Collection::Players,
        Collection::Rounds,
        Collection::Targets,
    ];

    /// Stable name used for table rows, id prefixes, and log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Collection::Teams => "teams",
            Collection::Players => "players",
            Collection::Rounds => "rounds",
            Collection::Targets => "targets",
        }
    }

    /// Prefix for ids minted in this collection.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            Collection::Teams => "team",
            Collection::Players => "player",
            Collection::Rounds => "round",
            Collection::Targets => "target",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// On-field role of a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlayerRole {
    Batter,
    Bowler,
    WicketKeeper,
    AllRounder,
}

impl PlayerRole {
    pub fn display_str(&self) -> &'static str {
        match self {
            PlayerRole::Batter => "batter",
            PlayerRole::Bowler => "bowler",
            PlayerRole::WicketKeeper => "wicket-keeper",
            PlayerRole::AllRounder => "all-rounder",
        }
    }
}

/// Where a player stands in the auction.
///
/// `Pending` is transient: the player is on the auction floor (bound to the
/// active round's `current_player_id`) and has not been resolved yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerStatus {
    Active,
    Sold,
    Unsold,
    Pending,
}

impl PlayerStatus {
    pub fn display_str(&self) -> &'static str {
        match self {
            PlayerStatus::Active => "active",
            PlayerStatus::Sold => "sold",
            PlayerStatus::Unsold => "unsold",
            PlayerStatus::Pending => "pending",
        }
    }
}

/// Auction round progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    Pending,
    Active,
    WaitingForAdmin,
    Completed,
}

impl RoundStatus {
    pub fn display_str(&self) -> &'static str {
        match self {
            RoundStatus::Pending => "pending",
            RoundStatus::Active => "active",
            RoundStatus::WaitingForAdmin => "waiting_for_admin",
            RoundStatus::Completed => "completed",
        }
    }
}

/// Priority of a target-list entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetPriority {
    High,
    Medium,
    Low,
}

/// Role tag attached to each mutation request by the external identity
/// collaborator. The core never sees anything finer-grained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallerRole {
    Admin,
    Owner,
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A franchise participating in the auction.
///
/// `budget` is the initial allotment and never changes after creation;
/// `remaining_budget` is mutated only by the budget ledger and satisfies
/// `remaining_budget = budget - sum(final_price of players sold to this team)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub id: EntityId,
    pub name: String,
    /// Initial budget allotment. Immutable after creation.
    pub budget: u64,
    /// Budget still available for purchases. Never negative.
    pub remaining_budget: u64,
    /// Ordered set of player ids sold to this team. No duplicates.
    pub players: Vec<EntityId>,
    /// Optional back-reference to the owning user in the identity system.
    #[serde(default)]
    pub owner_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A player in the auction pool.
///
/// `team_id` and `final_price` are present iff `status == Sold`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: EntityId,
    pub name: String,
    pub role: PlayerRole,
    /// Minimum sale price. Positive; floor enforced at creation.
    pub base_price: u64,
    pub status: PlayerStatus,
    #[serde(default)]
    pub team_id: Option<EntityId>,
    #[serde(default)]
    pub final_price: Option<u64>,
    /// Read-only career statistics. Carried opaquely; never validated.
    #[serde(default)]
    pub stats: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One pass of the auction clock over a batch of players.
///
/// At most one round has `status == Active` at any time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuctionRound {
    pub id: EntityId,
    /// Monotonically increasing sequence number across rounds.
    pub round: u32,
    pub status: RoundStatus,
    /// The player currently on the floor, if any.
    #[serde(default)]
    pub current_player_id: Option<EntityId>,
    /// Players not yet resolved in this round. Decremented on each
    /// sale/unsold resolution, not when a player is merely displayed.
    pub players_left: u32,
    /// Snapshot of the pool size when the round started.
    pub total_players: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An owner's advisory shortlist entry. Unique per (team_id, player_id);
/// no transactional effect on budgets or rosters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetPlayer {
    pub id: EntityId,
    pub team_id: EntityId,
    pub player_id: EntityId,
    pub priority: TargetPriority,
    #[serde(default)]
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Entity wrapper
// ---------------------------------------------------------------------------

/// Any record held by the store. Tagged so wire payloads and persisted rows
/// are self-describing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entity {
    Team(Team),
    Player(Player),
    Round(AuctionRound),
    Target(TargetPlayer),
}

impl Entity {
    pub fn id(&self) -> &str {
        match self {
            Entity::Team(t) => &t.id,
            Entity::Player(p) => &p.id,
            Entity::Round(r) => &r.id,
            Entity::Target(t) => &t.id,
        }
    }

    pub fn collection(&self) -> Collection {
        match self {
            Entity::Team(_) => Collection::Teams,
            Entity::Player(_) => Collection::Players,
            Entity::Round(_) => Collection::Rounds,
            Entity::Target(_) => Collection::Targets,
        }
    }

    /// Set `updated_at` to now. Called by the store on every commit.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        match self {
            Entity::Team(t) => t.updated_at = now,
            Entity::Player(p) => p.updated_at = now,
            Entity::Round(r) => r.updated_at = now,
            Entity::Target(t) => t.updated_at = now,
        }
    }

    pub fn as_team(&self) -> Option<&Team> {
        match self {
            Entity::Team(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_player(&self) -> Option<&Player> {
        match self {
            Entity::Player(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_round(&self) -> Option<&AuctionRound> {
        match self {
            Entity::Round(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_target(&self) -> Option<&TargetPlayer> {
        match self {
            Entity::Target(t) => Some(t),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Creation / partial-update payloads
// ---------------------------------------------------------------------------

/// Fields supplied by the operator when creating a team. When `budget` is
/// omitted the configured default allotment is used.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTeam {
    pub name: String,
    #[serde(default)]
    pub budget: Option<u64>,
    #[serde(default)]
    pub owner_id: Option<String>,
}

/// Fields supplied by the operator when creating a player.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPlayer {
    pub name: String,
    pub role: PlayerRole,
    pub base_price: u64,
    #[serde(default)]
    pub stats: serde_json::Map<String, serde_json::Value>,
}

/// Partial update for a player. Absent fields are left unchanged.
///
/// `team_id`/`final_price` are only honored together, and only as a
/// reassignment of an already-sold player (refund-then-debit in one
/// transaction); status changes go through sell/unsell.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdatePlayer {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<PlayerRole>,
    #[serde(default)]
    pub base_price: Option<u64>,
    #[serde(default)]
    pub stats: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub team_id: Option<EntityId>,
    #[serde(default)]
    pub final_price: Option<u64>,
}

/// Partial update for a team. The initial `budget` is immutable and has no
/// field here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateTeam {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub owner_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn player_role_wire_names_are_kebab_case() {
        let json = serde_json::to_string(&PlayerRole::WicketKeeper).unwrap();
        assert_eq!(json, r#""wicket-keeper""#);
        let back: PlayerRole = serde_json::from_str(r#""all-rounder""#).unwrap();
        assert_eq!(back, PlayerRole::AllRounder);
    }

    #[test]
    fn round_status_wire_names_are_snake_case() {
        let json = serde_json::to_string(&RoundStatus::WaitingForAdmin).unwrap();
        assert_eq!(json, r#""waiting_for_admin""#);
    }

    #[test]
    fn entity_is_internally_tagged() {
        let now = Utc::now();
        let entity = Entity::Team(Team {
            id: "team-1".to_string(),
            name: "Falcons".to_string(),
            budget: 1_000_000,
            remaining_budget: 1_000_000,
            players: vec![],
            owner_id: None,
            created_at: now,
            updated_at: now,
        });

        let value = serde_json::to_value(&entity).unwrap();
        assert_eq!(value["kind"], "team");
        assert_eq!(value["id"], "team-1");

        let back: Entity = serde_json::from_value(value).unwrap();
        assert_eq!(back, entity);
    }

    #[test]
    fn entity_accessors_match_collection() {
        let now = Utc::now();
        let entity = Entity::Player(Player {
            id: "player-1".to_string(),
            name: "R. Sharma".to_string(),
            role: PlayerRole::Batter,
            base_price: 100_000,
            status: PlayerStatus::Active,
            team_id: None,
            final_price: None,
            stats: serde_json::Map::new(),
            created_at: now,
            updated_at: now,
        });

        assert_eq!(entity.collection(), Collection::Players);
        assert_eq!(entity.id(), "player-1");
        assert!(entity.as_player().is_some());
        assert!(entity.as_team().is_none());
    }

    #[test]
    fn update_player_defaults_to_no_changes() {
        let update: UpdatePlayer = serde_json::from_str("{}").unwrap();
        assert!(update.name.is_none());
        assert!(update.team_id.is_none());
        assert!(update.final_price.is_none());
    }

    #[test]
    fn collection_prefixes_are_distinct() {
        let prefixes: std::collections::HashSet<_> =
            Collection::ALL.iter().map(|c| c.id_prefix()).collect();
        assert_eq!(prefixes.len(), Collection::ALL.len());
    }
}
