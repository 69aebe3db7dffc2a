// WebSocket server for operator consoles and owner dashboards.
//
// Each connection gets its own task. Requests are handled in arrival order;
// every subscribed collection gets a forwarder task that pushes committed
// changes until the feed is cancelled or the connection closes.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::stream::Stream;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{info, warn};

use crate::api::Api;
use crate::error::{AuctionError, Result};
use crate::model::{CallerRole, Collection};
use crate::protocol::{ClientRequest, Command, ServerMessage};

/// Outbound frames buffered per connection before backpressure applies.
const OUTBOUND_BUFFER: usize = 64;

/// Accept connections on `listener` forever. Each client is served by its
/// own task; a failed handshake only loses that client.
pub async fn run(listener: TcpListener, api: Arc<Api>) -> anyhow::Result<()> {
    let local_addr = listener.local_addr()?;
    info!("websocket server listening on {local_addr}");

    loop {
        let (stream, addr) = listener.accept().await?;
        let addr_str = addr.to_string();
        info!("accepted TCP connection from {addr_str}");

        let api = api.clone();
        tokio::spawn(async move {
            let ws_stream = match tokio_tungstenite::accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    warn!("websocket handshake failed for {addr_str}: {e}");
                    return;
                }
            };
            handle_connection(ws_stream, api, addr_str).await;
        });
    }
}

/// Serve one client: a writer task drains the outbound queue while the read
/// loop handles requests.
async fn handle_connection<S>(ws_stream: WebSocketStream<S>, api: Arc<Api>, addr: String)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut write, read) = ws_stream.split();
    let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_BUFFER);

    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    warn!("failed to encode outbound frame: {e}");
                    continue;
                }
            };
            if write.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    process_requests(read, api, out_tx, &addr).await;
    writer.abort();
    info!("client {addr} disconnected");
}

/// Handle request frames from any message stream. Generic over the stream
/// type so the protocol logic is testable without opening TCP ports.
pub async fn process_requests<St>(
    mut stream: St,
    api: Arc<Api>,
    out: mpsc::Sender<ServerMessage>,
    addr: &str,
) where
    St: Stream<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    // One live feed per collection; a re-subscribe replaces the old feed.
    let mut feeds: HashMap<Collection, JoinHandle<()>> = HashMap::new();

    while let Some(msg_result) = stream.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                let request: ClientRequest = match serde_json::from_str(&text) {
                    Ok(request) => request,
                    Err(e) => {
                        let reply = ServerMessage::bad_request(format!("malformed request: {e}"));
                        if out.send(reply).await.is_err() {
                            break;
                        }
                        continue;
                    }
                };
                if handle_request(&api, &mut feeds, &out, request)
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Ok(Message::Close(_)) => {
                info!("client {addr} sent close frame");
                break;
            }
            Err(e) => {
                warn!("websocket error from {addr}: {e}");
                break;
            }
            _ => {
                // Ignore Binary, Ping, Pong, Frame variants.
            }
        }
    }

    for handle in feeds.into_values() {
        handle.abort();
    }
}

/// Returns `Err(())` when the outbound channel is gone and the connection
/// should wind down.
async fn handle_request(
    api: &Arc<Api>,
    feeds: &mut HashMap<Collection, JoinHandle<()>>,
    out: &mpsc::Sender<ServerMessage>,
    request: ClientRequest,
) -> std::result::Result<(), ()> {
    let reply = match request {
        ClientRequest::Subscribe { collection, filter } => {
            let (entities, mut subscription) = api.subscribe(collection, filter);
            let feed_out = out.clone();
            let handle = tokio::spawn(async move {
                while let Some(event) = subscription.recv().await {
                    if feed_out.send(ServerMessage::Change { event }).await.is_err() {
                        break;
                    }
                }
            });
            if let Some(old) = feeds.insert(collection, handle) {
                old.abort();
            }
            ServerMessage::Snapshot {
                collection,
                entities,
            }
        }
        ClientRequest::Cancel { collection } => {
            if let Some(handle) = feeds.remove(&collection) {
                handle.abort();
            }
            ServerMessage::ok()
        }
        ClientRequest::List { collection } => ServerMessage::Snapshot {
            collection,
            entities: api.list(collection),
        },
        ClientRequest::Get { collection, id } => match api.get(collection, &id).and_then(json) {
            Ok(result) => ServerMessage::Ok { result },
            Err(err) => ServerMessage::error(&err),
        },
        ClientRequest::Mutation { role, command } => {
            let op = command.name();
            match dispatch(api, role, command) {
                Ok(result) => ServerMessage::Ok { result },
                Err(err) => {
                    warn!(op, error = %err, "mutation rejected");
                    ServerMessage::error(&err)
                }
            }
        }
    };
    out.send(reply).await.map_err(|_| ())
}

/// Route a mutation to the API. The returned value (if any) is the entity
/// the operation produced.
pub fn dispatch(
    api: &Api,
    role: CallerRole,
    command: Command,
) -> Result<Option<serde_json::Value>> {
    match command {
        Command::CreateTeam { team } => json(api.create_team(role, team)?),
        Command::UpdateTeam { team_id, update } => json(api.update_team(role, &team_id, update)?),
        Command::DeleteTeam { team_id } => {
            api.delete_team(role, &team_id)?;
            Ok(None)
        }
        Command::CreatePlayer { player } => json(api.create_player(role, player)?),
        Command::CreatePlayers { players } => json(api.create_players(role, players)?),
        Command::UpdatePlayer { player_id, update } => {
            json(api.update_player(role, &player_id, update)?)
        }
        Command::DeletePlayer { player_id } => {
            api.delete_player(role, &player_id)?;
            Ok(None)
        }
        Command::Sell {
            player_id,
            team_id,
            final_price,
        } => {
            api.sell(role, &player_id, &team_id, final_price)?;
            Ok(None)
        }
        Command::Unsell {
            player_id,
            restore_to,
        } => {
            api.unsell(role, &player_id, restore_to)?;
            Ok(None)
        }
        Command::MarkUnsold { player_id } => {
            api.mark_unsold(role, &player_id)?;
            Ok(None)
        }
        Command::Reactivate { player_id } => {
            api.reactivate(role, &player_id)?;
            Ok(None)
        }
        Command::ResetAllTeamBudgets => {
            api.reset_all_team_budgets(role)?;
            Ok(None)
        }
        Command::StartRound => json(api.start_round(role)?),
        Command::AdvanceRound { player_id } => json(api.advance_round(role, player_id.as_deref())?),
        Command::EndRound => json(api.end_round(role)?),
        Command::AddTarget {
            team_id,
            player_id,
            priority,
            notes,
        } => json(api.add_target(role, &team_id, &player_id, priority, &notes)?),
        Command::RemoveTarget { team_id, player_id } => {
            api.remove_target(role, &team_id, &player_id)?;
            Ok(None)
        }
    }
}

fn json<T: serde::Serialize>(value: T) -> Result<Option<serde_json::Value>> {
    serde_json::to_value(value)
        .map(Some)
        .map_err(|e| AuctionError::Storage(format!("failed to encode response: {e}")))
}
