//! WebSocket endpoint: one socket per client, JSON event frames.
//!
//! The writer half drains the connection's fan-out queue; the reader half
//! parses [`ClientEvent`] frames and dispatches them to the room registry.
//! Malformed frames are skipped.  Membership and presence are released on
//! every exit path -- clean close, error, or task abort.

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use tracing::debug;
use uuid::Uuid;

use kabu_shared::protocol::{ClientEvent, ServerEvent};

use crate::api::AppState;
use crate::rooms::{ConnectionId, RoomRegistry};

pub async fn chat_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let rooms = state.rooms.clone();
    let buffer = state.config.event_buffer;
    ws.on_upgrade(move |socket| handle_socket(socket, rooms, buffer))
}

async fn handle_socket(socket: WebSocket, rooms: RoomRegistry, buffer: usize) {
    let (conn_id, mut outbound) = rooms.connect(buffer).await;
    let (mut sink, mut stream) = socket.split();

    let send_task = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let Ok(json) = event.to_json() else { continue };
            if sink.send(WsMessage::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(frame)) = stream.next().await {
        let WsMessage::Text(text) = frame else {
            continue;
        };
        let Ok(event) = ClientEvent::from_json(&text) else {
            debug!(conn = %conn_id, "ignoring malformed frame");
            continue;
        };
        handle_event(&rooms, conn_id, event).await;
    }

    // The read loop ended: the peer closed or the socket errored.  Release
    // room membership and presence either way.
    rooms.disconnect(conn_id).await;
    send_task.abort();
}

pub(crate) async fn handle_event(rooms: &RoomRegistry, conn_id: ConnectionId, event: ClientEvent) {
    match event {
        ClientEvent::UserConnected { user_id } => {
            rooms.identify(conn_id, user_id).await;
        }
        ClientEvent::JoinChat { chat_id } => {
            rooms.join(conn_id, chat_id).await;
        }
        ClientEvent::SendMessage {
            chat_id,
            text,
            sender_id,
            // Client timestamp is only its local echo; the relay assigns
            // the authoritative one.
            timestamp: _,
        } => {
            let event = ServerEvent::NewMessage {
                id: Uuid::new_v4().to_string(),
                text,
                sender_id,
                timestamp: Utc::now().timestamp_millis(),
                read: false,
            };
            rooms.broadcast(&chat_id, event).await;
        }
        ClientEvent::Typing {
            chat_id,
            user_id,
            is_typing,
        } => {
            rooms
                .broadcast_except(&chat_id, conn_id, ServerEvent::UserTyping { user_id, is_typing })
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kabu_shared::types::{ChannelId, UserId};

    #[tokio::test]
    async fn test_send_message_is_reemitted_with_server_fields() {
        let rooms = RoomRegistry::new();
        let room = ChannelId("ride_r1".to_string());

        let (sender, mut sender_rx) = rooms.connect(8).await;
        let (receiver, mut receiver_rx) = rooms.connect(8).await;
        handle_event(&rooms, sender, ClientEvent::JoinChat { chat_id: room.clone() }).await;
        handle_event(&rooms, receiver, ClientEvent::JoinChat { chat_id: room.clone() }).await;

        let client_ts = 12345;
        handle_event(
            &rooms,
            sender,
            ClientEvent::SendMessage {
                chat_id: room.clone(),
                text: "on my way".to_string(),
                sender_id: UserId::new("p1"),
                timestamp: client_ts,
            },
        )
        .await;

        for rx in [&mut sender_rx, &mut receiver_rx] {
            match rx.try_recv().unwrap() {
                ServerEvent::NewMessage {
                    id,
                    text,
                    timestamp,
                    read,
                    ..
                } => {
                    assert!(!id.is_empty());
                    assert_eq!(text, "on my way");
                    assert_ne!(timestamp, client_ts, "relay assigns its own timestamp");
                    assert!(!read);
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_typing_is_relayed_to_others_only() {
        let rooms = RoomRegistry::new();
        let room = ChannelId("ride_r1".to_string());

        let (sender, mut sender_rx) = rooms.connect(8).await;
        let (receiver, mut receiver_rx) = rooms.connect(8).await;
        handle_event(&rooms, sender, ClientEvent::JoinChat { chat_id: room.clone() }).await;
        handle_event(&rooms, receiver, ClientEvent::JoinChat { chat_id: room.clone() }).await;

        handle_event(
            &rooms,
            sender,
            ClientEvent::Typing {
                chat_id: room,
                user_id: UserId::new("p1"),
                is_typing: true,
            },
        )
        .await;

        assert!(sender_rx.try_recv().is_err());
        assert!(matches!(
            receiver_rx.try_recv().unwrap(),
            ServerEvent::UserTyping { is_typing: true, .. }
        ));
    }
}
