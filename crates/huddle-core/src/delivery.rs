use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use huddle_db::models::NewMessage;
use huddle_db::{Database, now_millis};
use huddle_types::api::{ConversationPage, SendMessageRequest, UnreadCounts, UnreadFromSender};
use huddle_types::events::ServerEvent;
use huddle_types::models::{Contact, Message, Role};

use crate::blocking;
use crate::convert::{contact_from_row, message_from_row, millis_to_datetime, reactions_by_message};
use crate::error::DeliveryError;
use crate::identity::Identity;
use crate::registry::Fanout;

pub const MAX_CONTENT_CHARS: usize = 4000;
pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 200;
pub const MAX_READ_BATCH: usize = 500;
const MAX_EMOJI_CHARS: usize = 16;

/// Persist-then-notify pipeline for direct messages.
///
/// The store write is the only step whose failure reaches the caller. Live
/// fan-out runs afterwards through the injected [`Fanout`] and is only logged.
pub struct DeliveryCoordinator {
    db: Arc<Database>,
    fanout: Arc<dyn Fanout>,
}

impl DeliveryCoordinator {
    pub fn new(db: Arc<Database>, fanout: Arc<dyn Fanout>) -> Self {
        Self { db, fanout }
    }

    /// Fail with `Permission` unless `a` and `b` are a coach/athlete pair.
    pub async fn authorize_pair(&self, a: Uuid, b: Uuid) -> Result<(), DeliveryError> {
        if a == b {
            return Err(DeliveryError::Permission("cannot message yourself".into()));
        }

        let paired = blocking(&self.db, move |db| {
            db.is_coaching_pair(&a.to_string(), &b.to_string())
        })
        .await?;

        if paired {
            Ok(())
        } else {
            Err(DeliveryError::Permission(format!("{} and {} are not a coaching pair", a, b)))
        }
    }

    /// Durably store a message and hint it to both parties' live connections.
    ///
    /// The returned message carries the store-assigned id and `sent_at`.
    pub async fn send_message(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        draft: SendMessageRequest,
    ) -> Result<Message, DeliveryError> {
        validate_draft(&draft)?;
        self.authorize_pair(sender_id, receiver_id).await?;

        let attachment = draft
            .attachment
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| DeliveryError::Validation(format!("attachment: {}", e)))?;

        let content = draft.content;
        let row = blocking(&self.db, move |db| {
            db.insert_message(&NewMessage {
                sender_id: &sender_id.to_string(),
                receiver_id: &receiver_id.to_string(),
                content: &content,
                attachment: attachment.as_deref(),
            })
        })
        .await?;

        let message = message_from_row(row, vec![]);
        info!("Message {} stored: {} -> {}", message.id, sender_id, receiver_id);

        // Committed. Everything below is best effort.
        let event = ServerEvent::NewMessage(message.clone());
        self.fan_out(receiver_id, &event);
        self.fan_out(sender_id, &event);

        Ok(message)
    }

    /// One page of the conversation between `viewer` and `counterpart`,
    /// oldest first. `before` is the id of the oldest message the client
    /// already holds.
    pub async fn fetch_conversation(
        &self,
        viewer: Uuid,
        counterpart: Uuid,
        limit: Option<u32>,
        before: Option<Uuid>,
    ) -> Result<ConversationPage, DeliveryError> {
        self.authorize_pair(viewer, counterpart).await?;
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);

        let page = blocking(&self.db, move |db| {
            let a = viewer.to_string();
            let b = counterpart.to_string();

            let cursor = match before {
                Some(id) => match db.message_cursor(&a, &b, &id.to_string())? {
                    Some(cursor) => Some(cursor),
                    None => return Ok(None),
                },
                None => None,
            };

            let (rows, has_more) = db.get_conversation(&a, &b, limit, cursor)?;
            let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
            let reactions = db.get_reactions_for_messages(&ids)?;

            Ok(Some((rows, has_more, reactions)))
        })
        .await?;

        let Some((rows, has_more, reaction_rows)) = page else {
            return Err(DeliveryError::NotFound("cursor message"));
        };

        let mut reactions = reactions_by_message(reaction_rows);
        let messages = rows
            .into_iter()
            .map(|row| {
                let r = reactions.remove(&row.id).unwrap_or_default();
                message_from_row(row, r)
            })
            .collect();

        Ok(ConversationPage { messages, has_more })
    }

    /// Mark a batch of messages addressed to `reader_id` as read and send a
    /// read receipt to each affected sender. Already-read ids and ids of other
    /// conversations are skipped without error.
    pub async fn mark_read(&self, reader_id: Uuid, message_ids: Vec<Uuid>) -> Result<Vec<Uuid>, DeliveryError> {
        if message_ids.len() > MAX_READ_BATCH {
            return Err(DeliveryError::Validation(format!(
                "at most {} message ids per batch",
                MAX_READ_BATCH
            )));
        }
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        let read_at = now_millis();
        let ids: Vec<String> = message_ids.iter().map(Uuid::to_string).collect();
        let markers = blocking(&self.db, move |db| {
            db.mark_messages_read(&reader_id.to_string(), &ids, read_at)
        })
        .await?;

        let mut by_sender: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        let mut updated = Vec::with_capacity(markers.len());
        for marker in markers {
            let (Ok(id), Ok(sender)) = (marker.id.parse::<Uuid>(), marker.sender_id.parse::<Uuid>()) else {
                continue;
            };
            by_sender.entry(sender).or_default().push(id);
            updated.push(id);
        }
        debug!("{} marked {} message(s) read", reader_id, updated.len());

        let read_at = millis_to_datetime(read_at);
        for (sender_id, ids) in by_sender {
            self.fan_out(
                sender_id,
                &ServerEvent::ReadReceipt {
                    reader_id,
                    message_ids: ids,
                    read_at,
                },
            );
        }

        Ok(updated)
    }

    /// React to a message in one of the caller's conversations. Returns
    /// false when the same reaction already existed.
    pub async fn add_reaction(&self, user_id: Uuid, message_id: Uuid, emoji: String) -> Result<bool, DeliveryError> {
        let emoji = emoji.trim().to_string();
        if emoji.is_empty() || emoji.chars().count() > MAX_EMOJI_CHARS {
            return Err(DeliveryError::Validation("emoji must be 1-16 characters".into()));
        }

        let mid = message_id.to_string();
        let row = blocking(&self.db, move |db| db.get_message(&mid))
            .await?
            .ok_or(DeliveryError::NotFound("message"))?;
        let message = message_from_row(row, vec![]);
        if message.sender_id != user_id && message.receiver_id != user_id {
            return Err(DeliveryError::Permission("not a participant of this conversation".into()));
        }

        let e = emoji.clone();
        let added = blocking(&self.db, move |db| {
            db.add_reaction(&message_id.to_string(), &user_id.to_string(), &e)
        })
        .await?;

        if added {
            let event = ServerEvent::ReactionAdded {
                message_id,
                user_id,
                emoji,
            };
            self.fan_out(message.sender_id, &event);
            self.fan_out(message.receiver_id, &event);
        }

        Ok(added)
    }

    pub async fn unread_counts(&self, user_id: Uuid) -> Result<UnreadCounts, DeliveryError> {
        let (by_sender, notifications) = blocking(&self.db, move |db| {
            let uid = user_id.to_string();
            Ok((db.unread_by_sender(&uid)?, db.unread_notification_count(&uid)?))
        })
        .await?;

        let by_sender: Vec<UnreadFromSender> = by_sender
            .into_iter()
            .filter_map(|(sender, count)| {
                Some(UnreadFromSender {
                    user_id: sender.parse().ok()?,
                    count: u64::try_from(count).unwrap_or(0),
                })
            })
            .collect();

        Ok(UnreadCounts {
            messages: by_sender.iter().map(|s| s.count).sum(),
            by_sender,
            notifications: u64::try_from(notifications).unwrap_or(0),
        })
    }

    pub async fn contacts(&self, user_id: Uuid) -> Result<Vec<Contact>, DeliveryError> {
        let rows = blocking(&self.db, move |db| db.list_contacts(&user_id.to_string())).await?;
        Ok(rows.into_iter().map(contact_from_row).collect())
    }

    /// Pair `coach` with an athlete account. Returns false if already paired.
    pub async fn assign_athlete(&self, coach: &Identity, athlete_id: Uuid) -> Result<bool, DeliveryError> {
        if coach.role != Role::Coach {
            return Err(DeliveryError::Permission("only coaches can assign athletes".into()));
        }

        let coach_id = coach.user_id;
        blocking(&self.db, move |db| {
            let Some(athlete) = db.get_user_by_id(&athlete_id.to_string())? else {
                return Ok(Err(DeliveryError::NotFound("athlete")));
            };
            if athlete.role != Role::Athlete.as_str() {
                return Ok(Err(DeliveryError::Validation("user is not an athlete".into())));
            }
            Ok(Ok(db.add_coach_athlete(&coach_id.to_string(), &athlete.id)?))
        })
        .await?
    }

    fn fan_out(&self, identity: Uuid, event: &ServerEvent) {
        self.fanout.broadcast(identity, event).log(event.name(), identity);
    }
}

fn validate_draft(draft: &SendMessageRequest) -> Result<(), DeliveryError> {
    if draft.content.trim().is_empty() && draft.attachment.is_none() {
        return Err(DeliveryError::Validation("message has no content".into()));
    }
    if draft.content.chars().count() > MAX_CONTENT_CHARS {
        return Err(DeliveryError::Validation(format!(
            "content exceeds {} characters",
            MAX_CONTENT_CHARS
        )));
    }
    if let Some(attachment) = &draft.attachment {
        if attachment.url.trim().is_empty() || attachment.mime_type.trim().is_empty() {
            return Err(DeliveryError::Validation("attachment needs a url and mime type".into()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{FanoutOutcome, SessionRegistry};
    use huddle_types::models::Attachment;

    struct Pair {
        db: Arc<Database>,
        coordinator: DeliveryCoordinator,
        registry: SessionRegistry,
        coach: Uuid,
        athlete: Uuid,
    }

    fn setup() -> Pair {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let coach = Uuid::new_v4();
        let athlete = Uuid::new_v4();
        db.create_user(&coach.to_string(), "coach", "hash", "coach").unwrap();
        db.create_user(&athlete.to_string(), "athlete", "hash", "athlete").unwrap();
        db.add_coach_athlete(&coach.to_string(), &athlete.to_string()).unwrap();

        let registry = SessionRegistry::new();
        Pair {
            coordinator: DeliveryCoordinator::new(db.clone(), Arc::new(registry.clone())),
            db,
            registry,
            coach,
            athlete,
        }
    }

    fn text(content: &str) -> SendMessageRequest {
        SendMessageRequest {
            content: content.into(),
            attachment: None,
        }
    }

    /// Simulates a fan-out backend where every delivery fails.
    struct BrokenFanout;

    impl Fanout for BrokenFanout {
        fn broadcast(&self, _identity: Uuid, _event: &ServerEvent) -> FanoutOutcome {
            FanoutOutcome::Degraded { delivered: 0, failed: 1 }
        }
    }

    #[tokio::test]
    async fn send_fans_out_to_receiver_and_sender_devices() {
        let p = setup();
        let (_, mut athlete_rx) = p.registry.register(p.athlete);
        let (_, mut coach_rx) = p.registry.register(p.coach);

        let message = p.coordinator.send_message(p.coach, p.athlete, text("Buen trabajo")).await.unwrap();

        let frame = athlete_rx.try_recv().unwrap();
        let event: ServerEvent = serde_json::from_str(&frame).unwrap();
        assert_eq!(event, ServerEvent::NewMessage(message.clone()));
        assert!(coach_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn unpaired_users_are_rejected_before_persisting() {
        let p = setup();
        let stranger = Uuid::new_v4();

        let err = p.coordinator.send_message(p.coach, stranger, text("hola")).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Permission(_)));

        let err = p.coordinator.send_message(p.coach, p.coach, text("hola")).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Permission(_)));
    }

    #[tokio::test]
    async fn empty_or_oversized_drafts_are_invalid() {
        let p = setup();
        let err = p.coordinator.send_message(p.coach, p.athlete, text("   ")).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Validation(_)));

        let long = "x".repeat(MAX_CONTENT_CHARS + 1);
        let err = p.coordinator.send_message(p.coach, p.athlete, text(&long)).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Validation(_)));
    }

    #[tokio::test]
    async fn attachment_only_message_is_accepted() {
        let p = setup();
        let draft = SendMessageRequest {
            content: String::new(),
            attachment: Some(Attachment {
                url: "https://files.example/route.gpx".into(),
                mime_type: "application/gpx+xml".into(),
                name: Some("route.gpx".into()),
                size_bytes: Some(2048),
            }),
        };
        let sent = p.coordinator.send_message(p.athlete, p.coach, draft.clone()).await.unwrap();
        assert_eq!(sent.attachment, draft.attachment);

        let page = p.coordinator.fetch_conversation(p.coach, p.athlete, None, None).await.unwrap();
        assert_eq!(page.messages[0].attachment, draft.attachment);
    }

    #[tokio::test]
    async fn sent_at_never_precedes_history() {
        let p = setup();
        let mut previous = None;
        for i in 0..10 {
            let (from, to) = if i % 3 == 0 { (p.athlete, p.coach) } else { (p.coach, p.athlete) };
            let m = p.coordinator.send_message(from, to, text("set")).await.unwrap();
            if let Some(prev) = previous {
                assert!(m.sent_at >= prev);
            }
            previous = Some(m.sent_at);
        }

        let page = p.coordinator.fetch_conversation(p.coach, p.athlete, Some(200), None).await.unwrap();
        assert_eq!(page.messages.len(), 10);
        assert!(!page.has_more);
        assert!(page.messages.windows(2).all(|w| w[0].sent_at <= w[1].sent_at));
    }

    #[tokio::test]
    async fn failing_fanout_does_not_fail_the_send() {
        let p = setup();
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.create_user(&p.coach.to_string(), "coach", "hash", "coach").unwrap();
        db.create_user(&p.athlete.to_string(), "athlete", "hash", "athlete").unwrap();
        db.add_coach_athlete(&p.coach.to_string(), &p.athlete.to_string()).unwrap();
        let coordinator = DeliveryCoordinator::new(db, Arc::new(BrokenFanout));

        let sent = coordinator.send_message(p.coach, p.athlete, text("¿Cómo fue?")).await.unwrap();
        let page = coordinator.fetch_conversation(p.athlete, p.coach, None, None).await.unwrap();
        assert_eq!(page.messages.len(), 1);
        assert_eq!(page.messages[0].id, sent.id);
        assert_eq!(page.messages[0].read_at, None);
    }

    #[tokio::test]
    async fn store_failure_surfaces_and_skips_fanout() {
        let p = setup();
        let (_, mut athlete_rx) = p.registry.register(p.athlete);
        let (_, mut coach_rx) = p.registry.register(p.coach);
        p.db.with_conn(|conn| Ok(conn.execute_batch("DROP TABLE reactions; DROP TABLE messages;")?))
            .unwrap();

        let err = p
            .coordinator
            .send_message(p.coach, p.athlete, text("Buen trabajo"))
            .await
            .unwrap_err();

        assert!(matches!(err, DeliveryError::Persistence(_)));
        assert!(athlete_rx.try_recv().is_err());
        assert!(coach_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_cursor_is_not_found() {
        let p = setup();
        let err = p
            .coordinator
            .fetch_conversation(p.coach, p.athlete, None, Some(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::NotFound(_)));
    }

    #[tokio::test]
    async fn mark_read_is_idempotent_and_notifies_sender_once() {
        let p = setup();
        let m = p.coordinator.send_message(p.coach, p.athlete, text("Intervalos mañana")).await.unwrap();
        let (_, mut coach_rx) = p.registry.register(p.coach);

        let updated = p.coordinator.mark_read(p.athlete, vec![m.id]).await.unwrap();
        assert_eq!(updated, vec![m.id]);
        let receipt: ServerEvent = serde_json::from_str(&coach_rx.try_recv().unwrap()).unwrap();
        let ServerEvent::ReadReceipt { reader_id, message_ids, read_at } = receipt else {
            panic!("expected read receipt");
        };
        assert_eq!(reader_id, p.athlete);
        assert_eq!(message_ids, vec![m.id]);

        let again = p.coordinator.mark_read(p.athlete, vec![m.id]).await.unwrap();
        assert!(again.is_empty());
        assert!(coach_rx.try_recv().is_err());

        let page = p.coordinator.fetch_conversation(p.athlete, p.coach, None, None).await.unwrap();
        assert_eq!(page.messages[0].read_at, Some(read_at));
    }

    #[tokio::test]
    async fn sender_cannot_mark_own_message_read() {
        let p = setup();
        let m = p.coordinator.send_message(p.coach, p.athlete, text("hola")).await.unwrap();
        let updated = p.coordinator.mark_read(p.coach, vec![m.id]).await.unwrap();
        assert!(updated.is_empty());
    }

    #[tokio::test]
    async fn oversized_read_batch_is_rejected() {
        let p = setup();
        let ids = (0..=MAX_READ_BATCH).map(|_| Uuid::new_v4()).collect();
        let err = p.coordinator.mark_read(p.athlete, ids).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Validation(_)));
    }

    #[tokio::test]
    async fn reactions_append_once_and_reach_both_sides() {
        let p = setup();
        let m = p.coordinator.send_message(p.athlete, p.coach, text("10k PR")).await.unwrap();
        let (_, mut athlete_rx) = p.registry.register(p.athlete);

        assert!(p.coordinator.add_reaction(p.coach, m.id, "🎉".into()).await.unwrap());
        assert!(!p.coordinator.add_reaction(p.coach, m.id, "🎉".into()).await.unwrap());
        assert!(athlete_rx.try_recv().is_ok());
        assert!(athlete_rx.try_recv().is_err());

        let page = p.coordinator.fetch_conversation(p.athlete, p.coach, None, None).await.unwrap();
        assert_eq!(page.messages[0].reactions.len(), 1);
        assert_eq!(page.messages[0].reactions[0].user_id, p.coach);
    }

    #[tokio::test]
    async fn outsiders_cannot_react() {
        let p = setup();
        let m = p.coordinator.send_message(p.athlete, p.coach, text("ok")).await.unwrap();
        let err = p.coordinator.add_reaction(Uuid::new_v4(), m.id, "👍".into()).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Permission(_)));
    }

    #[tokio::test]
    async fn unread_counts_aggregate_by_sender() {
        let p = setup();
        p.coordinator.send_message(p.coach, p.athlete, text("one")).await.unwrap();
        p.coordinator.send_message(p.coach, p.athlete, text("two")).await.unwrap();

        let counts = p.coordinator.unread_counts(p.athlete).await.unwrap();
        assert_eq!(counts.messages, 2);
        assert_eq!(counts.by_sender.len(), 1);
        assert_eq!(counts.by_sender[0].user_id, p.coach);
        assert_eq!(counts.notifications, 0);

        let coach_counts = p.coordinator.unread_counts(p.coach).await.unwrap();
        assert_eq!(coach_counts.messages, 0);
    }

    #[tokio::test]
    async fn only_coaches_assign_athletes() {
        let p = setup();
        let athlete = Identity {
            user_id: p.athlete,
            username: "athlete".into(),
            role: Role::Athlete,
        };
        let err = p.coordinator.assign_athlete(&athlete, p.coach).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Permission(_)));

        let coach = Identity {
            user_id: p.coach,
            username: "coach".into(),
            role: Role::Coach,
        };
        assert!(!p.coordinator.assign_athlete(&coach, p.athlete).await.unwrap());
        let err = p.coordinator.assign_athlete(&coach, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, DeliveryError::NotFound(_)));

        let contacts = p.coordinator.contacts(p.coach).await.unwrap();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].user_id, p.athlete);
    }
}
