// [apps/control-plane/src/handlers/realtime.rs]
//! Real-time fan-out endpoint (C9, spec §4.9/§6.2), grounded on the
//! teacher's triple-task WebSocket pattern in `handlers/stream.rs`:
//! an internal worker task for inbound frames, a downstream sender task
//! subscribed to the event bus, and an upstream receiver task — the first
//! of the three to finish aborts the other two.
//!
//! Authentication happens on the wire rather than via the `auth_guard`
//! middleware: the spec has the client send `{"token": "..."}` as its
//! first text frame once the socket is open (§6.2), since a browser
//! WebSocket handshake cannot carry an `Authorization` header.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use switchyard_core::event::{RealtimeEvent, SubscriptionRoom};
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, info, instrument, warn};

use crate::state::AppState;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(25);
const INBOUND_BUFFER_CAPACITY: usize = 32;
const AUTH_GRACE_PERIOD: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct HelloFrame {
    token: String,
}

#[derive(Debug, Deserialize)]
struct AckFrame {
    #[allow(dead_code)]
    session_sequence: u64,
}

#[derive(Debug, Serialize)]
#[serde(tag = "t")]
enum OutboundControl<'a> {
    #[serde(rename = "error")]
    Error { message: &'a str },
}

/// `GET /realtime` — upgrades to a WebSocket and defers everything else
/// to [`run_subscriber`].
pub async fn upgrade(websocket_upgrade: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    websocket_upgrade.on_upgrade(move |socket| run_subscriber(socket, state))
}

#[instrument(skip(socket, state))]
async fn run_subscriber(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();

    let hello = match tokio::time::timeout(AUTH_GRACE_PERIOD, stream.next()).await {
        Ok(Some(Ok(Message::Text(raw)))) => serde_json::from_str::<HelloFrame>(&raw).ok(),
        _ => None,
    };
    let Some(hello) = hello else {
        let _ = sink
            .send(Message::Text(serde_json::to_string(&OutboundControl::Error { message: "expected {token} as the first frame" }).unwrap()))
            .await;
        return;
    };

    let session = match state.auth.resolve_session(&hello.token).await {
        Ok(session) => session,
        Err(error) => {
            let _ = sink
                .send(Message::Text(serde_json::to_string(&OutboundControl::Error { message: &error.public_message() }).unwrap()))
                .await;
            return;
        }
    };

    info!("realtime subscriber {} connected", session.user_id);
    let mut event_bus_subscriber = state.realtime.subscribe();

    // Task 1: internal worker consuming inbound frames (acks today; a seam
    // for future subscriber-issued directives).
    let (inbound_sender, mut inbound_receiver) = mpsc::channel::<String>(INBOUND_BUFFER_CAPACITY);
    let worker_user_id = session.user_id.clone();
    let mut worker_task = tokio::spawn(async move {
        while let Some(raw) = inbound_receiver.recv().await {
            if let Ok(ack) = serde_json::from_str::<AckFrame>(&raw) {
                debug!("subscriber {} acked through sequence {}", worker_user_id, ack.session_sequence);
            }
        }
    });

    // Task 2: downstream — event bus to socket, filtered to this
    // subscriber's rooms, plus keepalive pings.
    let downstream_user_id = session.user_id.clone();
    let assigned_device_ids = session.assigned_device_ids.clone();
    let assigned_room_ids = session.assigned_room_ids.clone();
    let devices = state.devices.clone();
    let mut sender_task = tokio::spawn(async move {
        let mut keepalive = interval(KEEPALIVE_INTERVAL);
        loop {
            tokio::select! {
                _ = keepalive.tick() => {
                    if sink.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
                received = event_bus_subscriber.recv() => {
                    match received {
                        Ok(routed) => {
                            let in_scope = match &routed.room {
                                SubscriptionRoom::User(user_id) => *user_id == downstream_user_id,
                                SubscriptionRoom::Device(device_id) => {
                                    assigned_device_ids.contains(device_id)
                                        || devices
                                            .get(device_id)
                                            .and_then(|device| device.owner_room_id)
                                            .is_some_and(|room_id| assigned_room_ids.contains(&room_id))
                                }
                            };
                            if !in_scope {
                                continue;
                            }
                            if !deliver(&mut sink, &routed.event).await {
                                break;
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                            // spec §4.9: overflow disconnects the subscriber rather than
                            // silently skipping — the client must reconcile via REST.
                            warn!("subscriber {} lagged by {} events, disconnecting", downstream_user_id, missed);
                            break;
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
    });

    // Task 3: upstream — socket frames into the internal worker channel.
    let upstream_user_id = session.user_id.clone();
    let mut receiver_task = tokio::spawn(async move {
        while let Some(message) = stream.next().await {
            match message {
                Ok(Message::Text(raw)) => {
                    if inbound_sender.send(raw).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Close(_)) => break,
                Err(error) => {
                    warn!("realtime subscriber {} socket error: {error}", upstream_user_id);
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut sender_task => {
            receiver_task.abort();
            worker_task.abort();
        }
        _ = &mut receiver_task => {
            sender_task.abort();
            worker_task.abort();
        }
        _ = &mut worker_task => {
            sender_task.abort();
            receiver_task.abort();
        }
    }

    info!("realtime subscriber {} disconnected", session.user_id);
}

async fn deliver(sink: &mut (impl futures::Sink<Message> + Unpin), event: &RealtimeEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(frame) => sink.send(Message::Text(frame)).await.is_ok(),
        Err(error) => {
            warn!("failed to encode realtime event: {error}");
            true
        }
    }
}
