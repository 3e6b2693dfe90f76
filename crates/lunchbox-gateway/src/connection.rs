use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use lunchbox_types::api::Claims;
use lunchbox_types::events::{GatewayCommand, GatewayEvent, Notification};

use crate::hub::{ConnectionId, Hub};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long a fresh socket may take to send `Identify`.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle a single WebSocket connection: Identify handshake, Ready, then
/// the notification loop until either side goes away.
pub async fn handle_connection(socket: WebSocket, hub: Hub, jwt_secret: String) {
    let (mut sender, mut receiver) = socket.split();

    let Some(claims) = wait_for_identify(&mut receiver, &jwt_secret).await else {
        warn!("WebSocket client failed to identify, closing");
        return;
    };
    let user_id = claims.sub;
    let username = claims.username;

    let ready = GatewayEvent::Ready {
        user_id: user_id.clone(),
        username: username.clone(),
    };
    if send_event(&mut sender, &ready).await.is_err() {
        return;
    }

    // Subscribe to global before registering so nothing sent in between is missed
    let global_rx = hub.subscribe_global();
    let (conn_id, direct_rx) = hub.register(&user_id);
    info!("{} ({}) connected to gateway, {}", username, user_id, presence(&hub, &user_id));

    run_connection_loop(sender, receiver, &hub, conn_id, global_rx, direct_rx, &username).await;

    hub.unregister(conn_id);
    info!("{} ({}) disconnected from gateway, {}", username, user_id, presence(&hub, &user_id));
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    hub: &Hub,
    conn_id: ConnectionId,
    mut global_rx: broadcast::Receiver<Notification>,
    mut direct_rx: mpsc::UnboundedReceiver<Notification>,
    username: &str,
) {
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Command acks travel to the send task so only it writes to the socket
    let (ack_tx, mut ack_rx) = mpsc::unbounded_channel::<GatewayEvent>();

    // Forward notifications + acks -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            let event = tokio::select! {
                result = global_rx.recv() => match result {
                    Ok(n) => GatewayEvent::Notification(n),
                    Err(RecvError::Lagged(n)) => {
                        warn!("Global receiver lagged by {} notifications", n);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
                result = direct_rx.recv() => match result {
                    Some(n) => GatewayEvent::Notification(n),
                    None => break,
                },
                Some(ack) = ack_rx.recv() => ack,
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                    continue;
                }
            };

            if send_event(&mut sender, &event).await.is_err() {
                break;
            }
        }
    });

    // Read commands from client
    let hub_recv = hub.clone();
    let username_recv = username.to_string();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        if let Some(ack) = handle_command(&hub_recv, conn_id, &username_recv, cmd) {
                            let _ = ack_tx.send(ack);
                        }
                    }
                    Err(e) => {
                        warn!(
                            "{} bad command: {} -- raw: {}",
                            username_recv,
                            e,
                            preview(&text)
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}

/// Connection totals for the connect and disconnect log lines.
fn presence(hub: &Hub, user_id: &str) -> String {
    let state = if hub.is_online(user_id) { "online" } else { "offline" };
    format!("user {}, {} connections open", state, hub.connection_count())
}

/// First 200 characters of a raw frame, cut on a char boundary.
fn preview(text: &str) -> String {
    text.chars().take(200).collect()
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &GatewayEvent,
) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to encode gateway event: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await
}

async fn wait_for_identify(receiver: &mut SplitStream<WebSocket>, jwt_secret: &str) -> Option<Claims> {
    use jsonwebtoken::{DecodingKey, Validation, decode};

    let timeout = tokio::time::timeout(IDENTIFY_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) =
                    serde_json::from_str::<GatewayCommand>(&text)
                {
                    let token_data = decode::<Claims>(
                        &token,
                        &DecodingKey::from_secret(jwt_secret.as_bytes()),
                        &Validation::default(),
                    )
                    .ok()?;

                    return Some(token_data.claims);
                }
            }
        }
        None
    });

    timeout.await.ok().flatten()
}

/// Apply a client command. Returns the acknowledgement to send back, if any.
fn handle_command(hub: &Hub, conn_id: ConnectionId, username: &str, cmd: GatewayCommand) -> Option<GatewayEvent> {
    match cmd {
        GatewayCommand::Identify { .. } => None, // Already handled

        GatewayCommand::SubscribeRound { round_id } => {
            info!("{} subscribing to round {}", username, round_id);
            hub.subscribe_round(conn_id, round_id)
                .then_some(GatewayEvent::Subscribed { round_id })
        }

        GatewayCommand::UnsubscribeRound { round_id } => {
            info!("{} unsubscribing from round {}", username, round_id);
            hub.unsubscribe_round(conn_id, round_id);
            Some(GatewayEvent::Unsubscribed { round_id })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn round_subscriptions_are_acknowledged() {
        let hub = Hub::new();
        let (conn, _rx) = hub.register("u1");
        let round_id = Uuid::new_v4();

        let ack = handle_command(&hub, conn, "u1", GatewayCommand::SubscribeRound { round_id });
        assert!(matches!(ack, Some(GatewayEvent::Subscribed { round_id: r }) if r == round_id));
        assert_eq!(hub.round_subscriber_count(round_id), 1);

        let ack = handle_command(&hub, conn, "u1", GatewayCommand::UnsubscribeRound { round_id });
        assert!(matches!(ack, Some(GatewayEvent::Unsubscribed { .. })));
        assert_eq!(hub.round_subscriber_count(round_id), 0);
    }

    #[test]
    fn preview_cuts_on_char_boundaries() {
        assert_eq!(preview("short"), "short");

        // 'é' is two bytes, so byte 200 falls inside a character
        let text = format!("a{}", "é".repeat(300));
        let cut = preview(&text);
        assert_eq!(cut.chars().count(), 200);
        assert!(text.starts_with(&cut));
    }

    #[test]
    fn presence_tracks_open_connections() {
        let hub = Hub::new();
        assert_eq!(presence(&hub, "u1"), "user offline, 0 connections open");

        let (first, _rx1) = hub.register("u1");
        let (_second, _rx2) = hub.register("u1");
        assert_eq!(presence(&hub, "u1"), "user online, 2 connections open");

        hub.unregister(first);
        assert_eq!(presence(&hub, "u1"), "user online, 1 connections open");
        assert_eq!(presence(&hub, "u2"), "user offline, 1 connections open");
    }

    #[test]
    fn unknown_connections_and_late_identify_get_no_ack() {
        let hub = Hub::new();
        let (conn, _rx) = hub.register("u1");
        let round_id = Uuid::new_v4();

        assert!(handle_command(&hub, Uuid::new_v4(), "u1", GatewayCommand::SubscribeRound { round_id }).is_none());
        assert!(handle_command(&hub, conn, "u1", GatewayCommand::Identify { token: "again".into() }).is_none());
        assert_eq!(hub.round_subscriber_count(round_id), 0);
    }
}
