// Wire messages exchanged with websocket clients.
//
// Clients send `ClientRequest` frames as JSON text; the server answers with
// `ServerMessage` frames. Subscriptions additionally push `Change` frames
// until cancelled or the connection closes.

use serde::{Deserialize, Serialize};

use crate::broadcast::{ChangeEvent, SubscriptionFilter};
use crate::error::AuctionError;
use crate::model::{
    CallerRole, Collection, Entity, NewPlayer, NewTeam, PlayerStatus, TargetPriority,
    UpdatePlayer, UpdateTeam,
};

/// A frame from a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    /// Open a live feed on a collection. Replies with a `Snapshot`, then
    /// pushes `Change` frames. One feed per collection per connection; a
    /// re-subscribe replaces the previous feed.
    Subscribe {
        collection: Collection,
        #[serde(default)]
        filter: SubscriptionFilter,
    },
    /// Stop the feed on a collection.
    Cancel { collection: Collection },
    /// One-shot read of a whole collection.
    List { collection: Collection },
    /// One-shot read of a single entity.
    Get { collection: Collection, id: String },
    /// A state mutation. The role tag comes from the identity layer in
    /// front of this server and is trusted as-is.
    Mutation { role: CallerRole, command: Command },
}

/// Every mutating operation the engine exposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    CreateTeam {
        team: NewTeam,
    },
    UpdateTeam {
        team_id: String,
        update: UpdateTeam,
    },
    DeleteTeam {
        team_id: String,
    },
    CreatePlayer {
        player: NewPlayer,
    },
    CreatePlayers {
        players: Vec<NewPlayer>,
    },
    UpdatePlayer {
        player_id: String,
        update: UpdatePlayer,
    },
    DeletePlayer {
        player_id: String,
    },
    Sell {
        player_id: String,
        team_id: String,
        final_price: u64,
    },
    Unsell {
        player_id: String,
        #[serde(default)]
        restore_to: Option<PlayerStatus>,
    },
    MarkUnsold {
        player_id: String,
    },
    Reactivate {
        player_id: String,
    },
    ResetAllTeamBudgets,
    StartRound,
    AdvanceRound {
        #[serde(default)]
        player_id: Option<String>,
    },
    EndRound,
    AddTarget {
        team_id: String,
        player_id: String,
        priority: TargetPriority,
        #[serde(default)]
        notes: String,
    },
    RemoveTarget {
        team_id: String,
        player_id: String,
    },
}

impl Command {
    /// Operation name used in log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Command::CreateTeam { .. } => "create_team",
            Command::UpdateTeam { .. } => "update_team",
            Command::DeleteTeam { .. } => "delete_team",
            Command::CreatePlayer { .. } => "create_player",
            Command::CreatePlayers { .. } => "create_players",
            Command::UpdatePlayer { .. } => "update_player",
            Command::DeletePlayer { .. } => "delete_player",
            Command::Sell { .. } => "sell",
            Command::Unsell { .. } => "unsell",
            Command::MarkUnsold { .. } => "mark_unsold",
            Command::Reactivate { .. } => "reactivate",
            Command::ResetAllTeamBudgets => "reset_all_team_budgets",
            Command::StartRound => "start_round",
            Command::AdvanceRound { .. } => "advance_round",
            Command::EndRound => "end_round",
            Command::AddTarget { .. } => "add_target",
            Command::RemoveTarget { .. } => "remove_target",
        }
    }
}

/// A frame from the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Initial state of a subscribed (or listed) collection.
    Snapshot {
        collection: Collection,
        entities: Vec<Entity>,
    },
    /// One committed change on a subscribed collection.
    Change {
        #[serde(flatten)]
        event: ChangeEvent,
    },
    /// A request succeeded. `result` carries the created or updated entity
    /// when the operation has one.
    Ok {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
    },
    /// A request failed. `code` is stable; `message` is human-readable.
    Error {
        code: String,
        message: String,
        retryable: bool,
    },
}

impl ServerMessage {
    pub fn ok() -> Self {
        ServerMessage::Ok { result: None }
    }

    pub fn ok_with(result: serde_json::Value) -> Self {
        ServerMessage::Ok {
            result: Some(result),
        }
    }

    pub fn error(err: &AuctionError) -> Self {
        ServerMessage::Error {
            code: err.code().to_string(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }

    /// Malformed frames never reach the typed error taxonomy.
    pub fn bad_request(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code: "bad_request".to_string(),
            message: message.into(),
            retryable: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PlayerRole;

    #[test]
    fn subscribe_defaults_to_the_all_filter() {
        let request: ClientRequest =
            serde_json::from_str(r#"{"type":"subscribe","collection":"players"}"#).unwrap();
        match request {
            ClientRequest::Subscribe { collection, filter } => {
                assert_eq!(collection, Collection::Players);
                assert_eq!(filter, SubscriptionFilter::All);
            }
            other => panic!("expected Subscribe, got {other:?}"),
        }
    }

    #[test]
    fn mutation_frames_carry_role_and_op() {
        let request: ClientRequest = serde_json::from_str(
            r#"{
                "type": "mutation",
                "role": "admin",
                "command": {
                    "op": "sell",
                    "player_id": "player-3",
                    "team_id": "team-1",
                    "final_price": 250000
                }
            }"#,
        )
        .unwrap();
        match request {
            ClientRequest::Mutation { role, command } => {
                assert_eq!(role, CallerRole::Admin);
                assert_eq!(command.name(), "sell");
                assert!(matches!(
                    command,
                    Command::Sell {
                        final_price: 250_000,
                        ..
                    }
                ));
            }
            other => panic!("expected Mutation, got {other:?}"),
        }
    }

    #[test]
    fn create_player_command_round_trips() {
        let command = Command::CreatePlayer {
            player: NewPlayer {
                name: "R. Sharma".to_string(),
                role: PlayerRole::Batter,
                base_price: 200_000,
                stats: serde_json::Map::new(),
            },
        };
        let json = serde_json::to_value(&command).unwrap();
        assert_eq!(json["op"], "create_player");
        assert_eq!(json["player"]["name"], "R. Sharma");

        let back: Command = serde_json::from_value(json).unwrap();
        assert_eq!(back.name(), "create_player");
    }

    #[test]
    fn unsell_restore_target_is_optional() {
        let command: Command =
            serde_json::from_str(r#"{"op":"unsell","player_id":"player-1"}"#).unwrap();
        assert!(matches!(
            command,
            Command::Unsell {
                restore_to: None,
                ..
            }
        ));

        let command: Command = serde_json::from_str(
            r#"{"op":"unsell","player_id":"player-1","restore_to":"active"}"#,
        )
        .unwrap();
        assert!(matches!(
            command,
            Command::Unsell {
                restore_to: Some(PlayerStatus::Active),
                ..
            }
        ));
    }

    #[test]
    fn error_frames_expose_stable_codes() {
        let err = AuctionError::InsufficientBudget {
            team_id: "team-1".to_string(),
            remaining: 100,
            price: 200,
        };
        let frame = ServerMessage::error(&err);
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "insufficient_budget");
        assert_eq!(json["retryable"], false);
    }

    #[test]
    fn change_frames_flatten_the_event() {
        use crate::broadcast::ChangeDelta;

        let frame = ServerMessage::Change {
            event: ChangeEvent {
                collection: Collection::Players,
                id: "player-1".to_string(),
                version: 3,
                delta: ChangeDelta::Deleted {
                    id: "player-1".to_string(),
                },
            },
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "change");
        assert_eq!(json["collection"], "players");
        assert_eq!(json["version"], 3);
        assert_eq!(json["delta"]["change"], "deleted");
    }

    #[test]
    fn ok_without_result_omits_the_field() {
        let json = serde_json::to_value(ServerMessage::ok()).unwrap();
        assert!(json.get("result").is_none());
    }
}
