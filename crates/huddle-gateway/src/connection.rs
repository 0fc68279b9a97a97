use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use huddle_core::Identity;
use huddle_types::events::{ChannelFrame, IdentifyPayload, ServerEvent, names};

use crate::Gateway;
use crate::commands::CommandError;

/// Handle a socket whose token was already validated on the upgrade request.
pub async fn handle_connection_authenticated(socket: WebSocket, gateway: Gateway, identity: Identity) {
    let (sender, receiver) = socket.split();
    info!("{} ({}) connected to gateway (pre-authenticated)", identity.username, identity.user_id);
    run_connection_loop(sender, receiver, gateway, identity).await;
}

/// Handle a socket that must authenticate with an `identify` frame first.
pub async fn handle_connection(socket: WebSocket, gateway: Gateway) {
    let (sender, mut receiver) = socket.split();

    let Some(identity) = wait_for_identify(&mut receiver, &gateway).await else {
        warn!("WebSocket client failed to identify, closing");
        return;
    };

    info!("{} ({}) connected to gateway", identity.username, identity.user_id);
    run_connection_loop(sender, receiver, gateway, identity).await;
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    gateway: Gateway,
    identity: Identity,
) {
    // Join the room before Ready so nothing fanned out after the client's
    // history fetch can slip between the two.
    let (conn_id, mut outbound_rx) = gateway.registry.register(identity.user_id);

    let ready = ServerEvent::Ready {
        user_id: identity.user_id,
        username: identity.username.clone(),
        role: identity.role,
    };
    let sent = match serde_json::to_string(&ready) {
        Ok(text) => sender.send(Message::Text(text.into())).await.is_ok(),
        Err(e) => {
            warn!("Failed to serialize ready event: {}", e);
            false
        }
    };
    if !sent {
        gateway.registry.unregister(conn_id);
        return;
    }

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    let heartbeat_interval = gateway.config.heartbeat_interval;
    let max_missed = gateway.config.max_missed_heartbeats;

    // Outbound queue -> socket, plus heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(heartbeat_interval);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                frame = outbound_rx.recv() => {
                    let Some(frame) = frame else { break };
                    if sender.send(Message::Text(frame.to_string().into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= max_missed {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Socket -> command table
    let recv_gateway = gateway.clone();
    let recv_identity = identity.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    handle_text(&recv_gateway, &recv_identity, text.as_str()).await;
                }
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    gateway.registry.unregister(conn_id);
    info!("{} ({}) disconnected from gateway [{}]", identity.username, identity.user_id, conn_id);
}

/// Decode and dispatch one inbound text frame. Nothing is ever written back
/// on failure; the client only sees the absence of an effect.
async fn handle_text(gateway: &Gateway, identity: &Identity, text: &str) {
    let frame = match serde_json::from_str::<ChannelFrame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(
                "{} ({}) bad frame: {} -- raw: {}",
                identity.username,
                identity.user_id,
                e,
                truncate(text, 200)
            );
            return;
        }
    };

    let event = frame.event.clone();
    match gateway.commands().dispatch(gateway, identity, frame).await {
        Ok(()) => {}
        Err(CommandError::Malformed(e)) => {
            warn!("{} ({}) malformed {} payload: {}", identity.username, identity.user_id, event, e);
        }
        Err(e) => {
            warn!("{} ({}) {} dropped: {}", identity.username, identity.user_id, event, e);
        }
    }
}

async fn wait_for_identify(receiver: &mut SplitStream<WebSocket>, gateway: &Gateway) -> Option<Identity> {
    let timeout = tokio::time::timeout(gateway.config.handshake_timeout, async {
        while let Some(Ok(msg)) = receiver.next().await {
            let Message::Text(text) = msg else { continue };

            let Ok(frame) = serde_json::from_str::<ChannelFrame>(text.as_str()) else {
                debug!("Ignoring non-frame text before identify");
                continue;
            };
            if frame.event != names::IDENTIFY {
                debug!("Ignoring {} before identify", frame.event);
                continue;
            }

            let payload: IdentifyPayload = serde_json::from_value(frame.data).ok()?;
            return match gateway.validator.validate(&payload.token) {
                Ok(identity) => Some(identity),
                Err(e) => {
                    warn!("Gateway handshake rejected: {}", e);
                    None
                }
            };
        }
        None
    });

    timeout.await.ok().flatten()
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::truncate;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("hola", 10), "hola");
        assert_eq!(truncate("mañana", 3), "mañ");
        assert_eq!(truncate("", 3), "");
    }
}
