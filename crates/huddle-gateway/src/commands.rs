use std::collections::HashMap;

use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use huddle_core::{DeliveryError, Fanout, Identity};
use huddle_types::events::{
    ChannelFrame, MarkReadPayload, SendMessageIntentPayload, ServerEvent, TypingPayload, names,
};

use crate::Gateway;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unknown event '{0}'")]
    UnknownEvent(String),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

pub type CommandFuture<'a> = BoxFuture<'a, Result<(), CommandError>>;

/// Handler for one inbound event name. Receives the connection's identity
/// and the raw `data` payload, which it decodes itself.
pub type CommandHandler = for<'a> fn(&'a Gateway, &'a Identity, Value) -> CommandFuture<'a>;

/// Event name -> handler. Built once per gateway.
pub struct CommandTable {
    handlers: HashMap<&'static str, CommandHandler>,
}

impl CommandTable {
    pub fn new() -> Self {
        let mut handlers: HashMap<&'static str, CommandHandler> = HashMap::new();
        handlers.insert(names::IDENTIFY, identify as CommandHandler);
        handlers.insert(names::SEND_MESSAGE_INTENT, send_message_intent as CommandHandler);
        handlers.insert(names::TYPING_START, typing_start as CommandHandler);
        handlers.insert(names::TYPING_STOP, typing_stop as CommandHandler);
        handlers.insert(names::MARK_READ, mark_read as CommandHandler);
        Self { handlers }
    }

    pub fn handles(&self, event: &str) -> bool {
        self.handlers.contains_key(event)
    }

    pub async fn dispatch(&self, gateway: &Gateway, identity: &Identity, frame: ChannelFrame) -> Result<(), CommandError> {
        let handler = self
            .handlers
            .get(frame.event.as_str())
            .ok_or(CommandError::UnknownEvent(frame.event))?;
        handler(gateway, identity, frame.data).await
    }
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::new()
    }
}

fn payload<T: DeserializeOwned>(data: Value) -> Result<T, CommandError> {
    Ok(serde_json::from_value(data)?)
}

// Already authenticated by the time commands are dispatched.
fn identify<'a>(_gateway: &'a Gateway, identity: &'a Identity, _data: Value) -> CommandFuture<'a> {
    Box::pin(async move {
        debug!("{} ({}) sent identify after handshake, ignoring", identity.username, identity.user_id);
        Ok(())
    })
}

/// Advisory only: the durable send goes through the REST endpoint, and this
/// hint is never persisted or relayed.
fn send_message_intent<'a>(_gateway: &'a Gateway, identity: &'a Identity, data: Value) -> CommandFuture<'a> {
    Box::pin(async move {
        let intent: SendMessageIntentPayload = payload(data)?;
        debug!(
            "{} ({}) intends to message {} (ref {:?})",
            identity.username, identity.user_id, intent.receiver_id, intent.client_ref
        );
        Ok(())
    })
}

fn typing_start<'a>(gateway: &'a Gateway, identity: &'a Identity, data: Value) -> CommandFuture<'a> {
    Box::pin(relay_typing(gateway, identity, data, true))
}

fn typing_stop<'a>(gateway: &'a Gateway, identity: &'a Identity, data: Value) -> CommandFuture<'a> {
    Box::pin(relay_typing(gateway, identity, data, false))
}

fn mark_read<'a>(gateway: &'a Gateway, identity: &'a Identity, data: Value) -> CommandFuture<'a> {
    Box::pin(async move {
        let req: MarkReadPayload = payload(data)?;
        gateway.coordinator.mark_read(identity.user_id, req.message_ids).await?;
        Ok(())
    })
}

/// Pure relay: no state is kept server-side, and the receiving client
/// expires the indicator on its own.
async fn relay_typing(gateway: &Gateway, identity: &Identity, data: Value, is_typing: bool) -> Result<(), CommandError> {
    let req: TypingPayload = payload(data)?;
    gateway
        .coordinator
        .authorize_pair(identity.user_id, req.receiver_id)
        .await?;

    let event = ServerEvent::Typing {
        from_user_id: identity.user_id,
        is_typing,
    };
    gateway
        .registry
        .broadcast(req.receiver_id, &event)
        .log(event.name(), req.receiver_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use huddle_core::{DeliveryCoordinator, SessionRegistry, TokenValidator};
    use huddle_db::Database;
    use huddle_types::api::SendMessageRequest;
    use huddle_types::models::Role;
    use serde_json::json;
    use uuid::Uuid;

    use crate::GatewayConfig;

    struct Setup {
        gateway: Gateway,
        coach: Identity,
        athlete: Identity,
    }

    fn setup() -> Setup {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let coach = Identity {
            user_id: Uuid::new_v4(),
            username: "coach".into(),
            role: Role::Coach,
        };
        let athlete = Identity {
            user_id: Uuid::new_v4(),
            username: "athlete".into(),
            role: Role::Athlete,
        };
        db.create_user(&coach.user_id.to_string(), "coach", "hash", "coach").unwrap();
        db.create_user(&athlete.user_id.to_string(), "athlete", "hash", "athlete").unwrap();
        db.add_coach_athlete(&coach.user_id.to_string(), &athlete.user_id.to_string()).unwrap();

        let registry = SessionRegistry::new();
        let coordinator = Arc::new(DeliveryCoordinator::new(db, Arc::new(registry.clone())));
        let gateway = Gateway::new(
            registry,
            coordinator,
            Arc::new(TokenValidator::new("test-secret")),
            GatewayConfig::default(),
        );
        Setup { gateway, coach, athlete }
    }

    fn frame(event: &str, data: Value) -> ChannelFrame {
        ChannelFrame {
            event: event.to_string(),
            data,
        }
    }

    #[tokio::test]
    async fn typing_is_relayed_to_the_counterpart_room() {
        let s = setup();
        let (_, mut rx) = s.gateway.registry.register(s.athlete.user_id);

        for (name, expected) in [(names::TYPING_START, true), (names::TYPING_STOP, false)] {
            s.gateway
                .commands()
                .dispatch(&s.gateway, &s.coach, frame(name, json!({ "receiver_id": s.athlete.user_id })))
                .await
                .unwrap();

            let event: ServerEvent = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
            assert_eq!(
                event,
                ServerEvent::Typing {
                    from_user_id: s.coach.user_id,
                    is_typing: expected
                }
            );
        }
    }

    #[tokio::test]
    async fn typing_to_a_stranger_is_dropped() {
        let s = setup();
        let stranger = Uuid::new_v4();
        let (_, mut rx) = s.gateway.registry.register(stranger);

        let err = s
            .gateway
            .commands()
            .dispatch(&s.gateway, &s.coach, frame(names::TYPING_START, json!({ "receiver_id": stranger })))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Delivery(DeliveryError::Permission(_))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn malformed_and_unknown_frames_are_rejected() {
        let s = setup();
        let commands = s.gateway.commands();

        let err = commands
            .dispatch(&s.gateway, &s.coach, frame(names::TYPING_START, json!({ "to": "nobody" })))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Malformed(_)));

        let err = commands
            .dispatch(&s.gateway, &s.coach, frame("delete-everything", Value::Null))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::UnknownEvent(name) if name == "delete-everything"));
        assert!(!commands.handles("delete-everything"));
    }

    #[tokio::test]
    async fn mark_read_over_channel_sends_receipt_to_sender() {
        let s = setup();
        let message = s
            .gateway
            .coordinator
            .send_message(
                s.coach.user_id,
                s.athlete.user_id,
                SendMessageRequest {
                    content: "Series de 400".into(),
                    attachment: None,
                },
            )
            .await
            .unwrap();
        let (_, mut coach_rx) = s.gateway.registry.register(s.coach.user_id);

        s.gateway
            .commands()
            .dispatch(&s.gateway, &s.athlete, frame(names::MARK_READ, json!({ "message_ids": [message.id] })))
            .await
            .unwrap();

        let frame: ChannelFrame = serde_json::from_str(&coach_rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame.event, names::READ_RECEIPT);
        assert_eq!(frame.data["message_ids"][0], json!(message.id));
    }

    #[tokio::test]
    async fn send_message_intent_is_not_persisted() {
        let s = setup();
        let (_, mut rx) = s.gateway.registry.register(s.athlete.user_id);
        s.gateway
            .commands()
            .dispatch(
                &s.gateway,
                &s.coach,
                frame(names::SEND_MESSAGE_INTENT, json!({ "receiver_id": s.athlete.user_id })),
            )
            .await
            .unwrap();

        assert!(rx.try_recv().is_err());
        let page = s
            .gateway
            .coordinator
            .fetch_conversation(s.athlete.user_id, s.coach.user_id, None, None)
            .await
            .unwrap();
        assert!(page.messages.is_empty());
    }
}
