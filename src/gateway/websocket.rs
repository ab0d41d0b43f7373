use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::app::App;
use crate::hub::{Hub, HubEvent, PeerId};
use crate::prelude::*;

use super::messages::{ClientMessage, ServerMessage};

#[derive(Debug, Deserialize, Default)]
pub struct AuthQuery {
	token: Option<String>,
}

fn bearer_from_headers(headers: &HeaderMap) -> Option<String> {
	let value = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
	value.strip_prefix("Bearer ").map(|s| s.to_string())
}

/// Upgrade handler. The handshake must carry a valid token either as
/// `Authorization: Bearer <token>` or `?token=<token>`; connections
/// without one are refused before the socket is ever accepted.
pub async fn upgrade(
	ws: WebSocketUpgrade,
	State(app): State<App>,
	headers: HeaderMap,
	Query(query): Query<AuthQuery>,
) -> Response {
	let token = bearer_from_headers(&headers).or(query.token);
	let Some(token) = token else {
		return close_immediately(ws, 4401, "authentication required");
	};

	match app.auth.verify(&token).await {
		Ok(claims) => {
			if let Err(e) = crate::users::upsert(&app.db, &claims.sub, &crate::users::Profile::from(&claims)).await {
				warn!("user directory upsert failed for {}: {}", claims.sub, e);
			}
			let user = claims.user_id();
			ws.on_upgrade(move |socket| handle_connection(socket, app, user))
		}
		Err(_) => close_immediately(ws, 4401, "invalid token"),
	}
}

fn close_immediately(ws: WebSocketUpgrade, code: u16, reason: &'static str) -> Response {
	use axum::extract::ws::CloseFrame;
	ws.on_upgrade(move |mut socket| async move {
		let _ = socket.send(Message::Close(Some(CloseFrame { code, reason: reason.into() }))).await;
	})
}

struct JoinedRoom {
	hub: Arc<Hub>,
	role: Role,
	forward_task: tokio::task::JoinHandle<()>,
}

async fn handle_connection(socket: WebSocket, app: App, user: UserId) {
	let peer_id: PeerId = Uuid::new_v4();
	let (ws_tx, mut ws_rx) = socket.split();
	let ws_tx = Arc::new(Mutex::new(ws_tx));
	let mut rooms: HashMap<Uuid, JoinedRoom> = HashMap::new();

	info!("gateway connection opened: user={} peer={}", user, peer_id);

	while let Some(msg) = ws_rx.next().await {
		let msg = match msg {
			Ok(msg) => msg,
			Err(e) => {
				debug!("gateway connection error for peer {}: {}", peer_id, e);
				break;
			}
		};
		let text = match msg {
			Message::Text(text) => text,
			Message::Close(_) => break,
			Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => continue,
		};
		let client_msg: ClientMessage = match serde_json::from_str(&text) {
			Ok(m) => m,
			Err(e) => {
				send(&ws_tx, &ServerMessage::error(format!("malformed message: {e}"))).await;
				continue;
			}
		};

		match client_msg {
			ClientMessage::Join { document, share_token } => {
				handle_join(&app, &ws_tx, &mut rooms, peer_id, &user, document, share_token).await;
			}
			ClientMessage::Leave { document } => {
				if let Some(room) = rooms.remove(&document) {
					room.hub.leave(peer_id);
					room.forward_task.abort();
				}
			}
			ClientMessage::Update { document, bytes } => {
				let Some(room) = rooms.get(&document) else {
					send(&ws_tx, &ServerMessage::error("not joined to document")).await;
					continue;
				};
				if !room.role.can_edit() {
					send(&ws_tx, &ServerMessage::error("editor or owner role required")).await;
					continue;
				}
				if let Err(e) =
					room.hub.edit(&app.update_log, &app.snapshots, &app.config, Some(&user), Some(peer_id), bytes).await
				{
					warn!("edit failed for document {} peer {}: {}", document, peer_id, e);
					send(&ws_tx, &ServerMessage::error("update rejected, retry")).await;
				}
			}
			ClientMessage::Presence { document, bytes } => {
				if let Some(room) = rooms.get(&document) {
					room.hub.publish_presence(peer_id, bytes);
				}
			}
		}
	}

	for (_, room) in rooms.into_iter() {
		room.hub.leave(peer_id);
		room.forward_task.abort();
	}
	info!("gateway connection closed: user={} peer={}", user, peer_id);
}

async fn handle_join(
	app: &App,
	ws_tx: &Arc<Mutex<futures::stream::SplitSink<WebSocket, Message>>>,
	rooms: &mut HashMap<Uuid, JoinedRoom>,
	peer_id: PeerId,
	user: &UserId,
	document: Uuid,
	share_token: Option<String>,
) {
	let role = match app.documents.effective_role(Some(user), document, share_token.as_deref()).await {
		Ok(Some(role)) => role,
		Ok(None) => {
			send(ws_tx, &ServerMessage::error("forbidden")).await;
			return;
		}
		Err(e) => {
			warn!("role lookup failed for document {}: {}", document, e);
			send(ws_tx, &ServerMessage::error("internal error")).await;
			return;
		}
	};

	let hub = app.hubs.get_or_create(document);
	let (snapshot, after_seq, tail) = match hub.init_for_peer(&app.update_log, &app.snapshots).await {
		Ok(v) => v,
		Err(e) => {
			warn!("init failed for document {}: {}", document, e);
			send(ws_tx, &ServerMessage::error("document unavailable")).await;
			return;
		}
	};

	hub.join(peer_id, role, None);

	let updates = tail
		.into_iter()
		.map(|e| super::messages::UpdateEnvelope { seq: e.seq, bytes: e.data })
		.collect();
	send(ws_tx, &ServerMessage::Init { document, snapshot, after_seq, updates }).await;

	let active: Vec<Uuid> = hub.active_peers().into_iter().filter(|p| *p != peer_id).collect();
	send(ws_tx, &ServerMessage::ActivePeers { document, peers: active }).await;

	let forward_task = spawn_forwarder(hub.clone(), ws_tx.clone(), peer_id, document);
	rooms.insert(document, JoinedRoom { hub, role, forward_task });
}

fn spawn_forwarder(
	hub: Arc<Hub>,
	ws_tx: Arc<Mutex<futures::stream::SplitSink<WebSocket, Message>>>,
	peer_id: PeerId,
	document: Uuid,
) -> tokio::task::JoinHandle<()> {
	let mut events = hub.subscribe();
	tokio::spawn(async move {
		loop {
			match events.recv().await {
				Ok(HubEvent::Update { seq, bytes, from }) => {
					if from != Some(peer_id) {
						send(&ws_tx, &ServerMessage::Update { document, seq, bytes: bytes.to_vec() }).await;
					}
				}
				Ok(HubEvent::Presence { peer, bytes }) => {
					if peer != peer_id {
						send(&ws_tx, &ServerMessage::Presence { document, peer, bytes: bytes.to_vec() }).await;
					}
				}
				Ok(HubEvent::PresenceRequest) => {
					send(&ws_tx, &ServerMessage::PresenceRequest { document }).await;
				}
				Ok(HubEvent::PeerJoined { peer, name }) => {
					if peer != peer_id {
						send(&ws_tx, &ServerMessage::PeerJoined { document, peer, name }).await;
					}
				}
				Ok(HubEvent::PeerLeft { peer }) => {
					if peer != peer_id {
						send(&ws_tx, &ServerMessage::PeerLeft { document, peer }).await;
					}
				}
				Ok(HubEvent::ExecuteResult { execution_id, result }) => {
					send(&ws_tx, &ServerMessage::execute_result(Some(document), execution_id, &result)).await;
				}
				Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
				Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
			}
		}
	})
}

async fn send(ws_tx: &Arc<Mutex<futures::stream::SplitSink<WebSocket, Message>>>, msg: &ServerMessage) {
	let Ok(text) = serde_json::to_string(msg) else {
		error!("failed to serialize outgoing gateway message");
		return;
	};
	let mut tx = ws_tx.lock().await;
	if let Err(e) = tx.send(Message::Text(text.into())).await {
		debug!("gateway send failed, peer likely disconnected: {}", e);
	}
}

// vim: ts=4
