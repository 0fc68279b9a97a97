use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use huddle_db::models::NewNotification;
use huddle_db::{Database, now_millis};
use huddle_types::events::ServerEvent;
use huddle_types::models::{Correlation, Notification, NotificationKind, SessionStatus};

use crate::blocking;
use crate::convert::notification_from_row;
use crate::delivery::MAX_READ_BATCH;
use crate::error::DeliveryError;
use crate::registry::Fanout;

pub const DEFAULT_LIST_SIZE: u32 = 50;
pub const MAX_LIST_SIZE: u32 = 200;

/// True on the first transition that should notify for feedback: text
/// appearing where there was none. Edits of existing feedback return false.
pub fn feedback_transition(previous: Option<&str>, current: &str) -> bool {
    let had_feedback = previous.is_some_and(|p| !p.trim().is_empty());
    !had_feedback && !current.trim().is_empty()
}

/// The notification a session status change warrants, if any. Only a move
/// out of `Pending` counts; repeated or reversed updates stay quiet.
pub fn session_transition(previous: SessionStatus, next: SessionStatus) -> Option<NotificationKind> {
    match (previous, next) {
        (SessionStatus::Pending, SessionStatus::Completed) => Some(NotificationKind::SessionCompleted),
        (SessionStatus::Pending, SessionStatus::Skipped) => Some(NotificationKind::SessionSkipped),
        _ => None,
    }
}

/// Persist-then-notify pipeline for workflow notifications.
///
/// Callers run the first-transition check (see [`feedback_transition`] and
/// [`session_transition`]); the store additionally refuses a second row for
/// the same user, kind and correlation, in which case the notify functions
/// return `None` and nothing is pushed.
pub struct NotificationFanout {
    db: Arc<Database>,
    fanout: Arc<dyn Fanout>,
}

impl NotificationFanout {
    pub fn new(db: Arc<Database>, fanout: Arc<dyn Fanout>) -> Self {
        Self { db, fanout }
    }

    pub async fn notify_plan_assigned(
        &self,
        athlete_id: Uuid,
        plan_id: &str,
        coach_id: Uuid,
    ) -> Result<Option<Notification>, DeliveryError> {
        self.dispatch(
            athlete_id,
            NotificationKind::PlanAssigned,
            Correlation {
                plan_id: Some(plan_id.to_string()),
                from_user_id: Some(coach_id),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn notify_session_completed(
        &self,
        coach_id: Uuid,
        session_id: &str,
        athlete_id: Uuid,
    ) -> Result<Option<Notification>, DeliveryError> {
        self.dispatch(coach_id, NotificationKind::SessionCompleted, session_correlation(session_id, athlete_id))
            .await
    }

    pub async fn notify_session_skipped(
        &self,
        coach_id: Uuid,
        session_id: &str,
        athlete_id: Uuid,
    ) -> Result<Option<Notification>, DeliveryError> {
        self.dispatch(coach_id, NotificationKind::SessionSkipped, session_correlation(session_id, athlete_id))
            .await
    }

    /// Apply [`session_transition`] and send whichever notification it
    /// calls for. Transitions that warrant none return `None`.
    pub async fn notify_session_transition(
        &self,
        coach_id: Uuid,
        session_id: &str,
        athlete_id: Uuid,
        previous: SessionStatus,
        next: SessionStatus,
    ) -> Result<Option<Notification>, DeliveryError> {
        match session_transition(previous, next) {
            Some(NotificationKind::SessionCompleted) => {
                self.notify_session_completed(coach_id, session_id, athlete_id).await
            }
            Some(NotificationKind::SessionSkipped) => {
                self.notify_session_skipped(coach_id, session_id, athlete_id).await
            }
            other => {
                debug!("Session {} {:?} -> {:?}: no notification ({:?})", session_id, previous, next, other);
                Ok(None)
            }
        }
    }

    pub async fn notify_coach_feedback(
        &self,
        athlete_id: Uuid,
        session_id: &str,
        coach_id: Uuid,
    ) -> Result<Option<Notification>, DeliveryError> {
        self.dispatch(athlete_id, NotificationKind::CoachFeedback, session_correlation(session_id, coach_id))
            .await
    }

    pub async fn notify_activity_synced(
        &self,
        user_id: Uuid,
        activity_id: &str,
    ) -> Result<Option<Notification>, DeliveryError> {
        self.dispatch(
            user_id,
            NotificationKind::ActivitySynced,
            Correlation {
                activity_id: Some(activity_id.to_string()),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn notify_streak_milestone(
        &self,
        user_id: Uuid,
        streak_days: u32,
    ) -> Result<Option<Notification>, DeliveryError> {
        self.dispatch(
            user_id,
            NotificationKind::StreakMilestone,
            Correlation {
                streak_days: Some(streak_days),
                ..Default::default()
            },
        )
        .await
    }

    /// Newest first.
    pub async fn list(&self, user_id: Uuid, limit: Option<u32>, unread_only: bool) -> Result<Vec<Notification>, DeliveryError> {
        let limit = limit.unwrap_or(DEFAULT_LIST_SIZE).clamp(1, MAX_LIST_SIZE);
        let rows = blocking(&self.db, move |db| {
            db.list_notifications(&user_id.to_string(), limit, unread_only)
        })
        .await?;
        Ok(rows.into_iter().map(notification_from_row).collect())
    }

    /// Returns the ids that changed; re-marking is a no-op.
    pub async fn mark_read(&self, user_id: Uuid, ids: Vec<Uuid>) -> Result<Vec<Uuid>, DeliveryError> {
        if ids.len() > MAX_READ_BATCH {
            return Err(DeliveryError::Validation(format!(
                "at most {} notification ids per batch",
                MAX_READ_BATCH
            )));
        }
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let ids: Vec<String> = ids.iter().map(Uuid::to_string).collect();
        let changed = blocking(&self.db, move |db| {
            db.mark_notifications_read(&user_id.to_string(), &ids, now_millis())
        })
        .await?;
        Ok(changed.iter().filter_map(|id| id.parse().ok()).collect())
    }

    pub async fn mark_all_read(&self, user_id: Uuid) -> Result<usize, DeliveryError> {
        blocking(&self.db, move |db| {
            db.mark_all_notifications_read(&user_id.to_string(), now_millis())
        })
        .await
    }

    async fn dispatch(
        &self,
        user_id: Uuid,
        kind: NotificationKind,
        correlation: Correlation,
    ) -> Result<Option<Notification>, DeliveryError> {
        let dedup_key = dedup_key(kind, &correlation);
        let c = correlation.clone();

        let row = blocking(&self.db, move |db| {
            let from_user_id = c.from_user_id.map(|id| id.to_string());
            db.insert_notification(&NewNotification {
                user_id: &user_id.to_string(),
                kind: kind.as_str(),
                plan_id: c.plan_id.as_deref(),
                session_id: c.session_id.as_deref(),
                activity_id: c.activity_id.as_deref(),
                from_user_id: from_user_id.as_deref(),
                streak_days: c.streak_days.map(i64::from),
                dedup_key: &dedup_key,
            })
        })
        .await?;

        let Some(row) = row else {
            debug!("{} for {} suppressed: already notified", kind, user_id);
            return Ok(None);
        };

        let notification = notification_from_row(row);
        info!("Notification {} ({}) stored for {}", notification.id, kind, user_id);

        let event = ServerEvent::Notification(notification.clone());
        self.fanout.broadcast(user_id, &event).log(event.name(), user_id);

        Ok(Some(notification))
    }
}

fn session_correlation(session_id: &str, from_user_id: Uuid) -> Correlation {
    Correlation {
        session_id: Some(session_id.to_string()),
        from_user_id: Some(from_user_id),
        ..Default::default()
    }
}

/// The correlation that makes a notification "the same event" for
/// first-occurrence suppression.
fn dedup_key(kind: NotificationKind, c: &Correlation) -> String {
    let key = match kind {
        NotificationKind::PlanAssigned => c.plan_id.clone(),
        NotificationKind::SessionCompleted
        | NotificationKind::SessionSkipped
        | NotificationKind::CoachFeedback => c.session_id.clone(),
        NotificationKind::ActivitySynced => c.activity_id.clone(),
        NotificationKind::StreakMilestone => c.streak_days.map(|d| d.to_string()),
    };
    key.unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SessionRegistry;

    struct Setup {
        fanout: NotificationFanout,
        registry: SessionRegistry,
        coach: Uuid,
        athlete: Uuid,
    }

    fn setup() -> Setup {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let coach = Uuid::new_v4();
        let athlete = Uuid::new_v4();
        db.create_user(&coach.to_string(), "coach", "hash", "coach").unwrap();
        db.create_user(&athlete.to_string(), "athlete", "hash", "athlete").unwrap();
        let registry = SessionRegistry::new();
        Setup {
            fanout: NotificationFanout::new(db, Arc::new(registry.clone())),
            registry,
            coach,
            athlete,
        }
    }

    #[test]
    fn feedback_notifies_only_when_text_first_appears() {
        assert!(feedback_transition(None, "Great pacing"));
        assert!(feedback_transition(Some("  "), "Great pacing"));
        assert!(!feedback_transition(Some("Great pacing"), "Great pacing, watch cadence"));
        assert!(!feedback_transition(None, "   "));
    }

    #[test]
    fn session_transitions_out_of_pending_only() {
        use SessionStatus::*;
        assert_eq!(session_transition(Pending, Completed), Some(NotificationKind::SessionCompleted));
        assert_eq!(session_transition(Pending, Skipped), Some(NotificationKind::SessionSkipped));
        assert_eq!(session_transition(Completed, Completed), None);
        assert_eq!(session_transition(Skipped, Completed), None);
        assert_eq!(session_transition(Completed, Pending), None);
    }

    #[tokio::test]
    async fn feedback_authored_once_then_edited_yields_one_notification() {
        let s = setup();
        let (_, mut athlete_rx) = s.registry.register(s.athlete);

        let mut previous: Option<&str> = None;
        for text in ["Nice negative split", "Nice negative split, hydrate more"] {
            if feedback_transition(previous, text) {
                s.fanout.notify_coach_feedback(s.athlete, "session-42", s.coach).await.unwrap();
            }
            previous = Some(text);
        }

        let all = s.fanout.list(s.athlete, None, false).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].kind, NotificationKind::CoachFeedback);
        assert_eq!(all[0].correlation.session_id.as_deref(), Some("session-42"));
        assert_eq!(all[0].correlation.from_user_id, Some(s.coach));

        let event: ServerEvent = serde_json::from_str(&athlete_rx.try_recv().unwrap()).unwrap();
        assert_eq!(event, ServerEvent::Notification(all[0].clone()));
        assert!(athlete_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn repeat_notify_is_suppressed_by_the_store() {
        let s = setup();
        let first = s.fanout.notify_plan_assigned(s.athlete, "plan-7", s.coach).await.unwrap();
        let second = s.fanout.notify_plan_assigned(s.athlete, "plan-7", s.coach).await.unwrap();
        assert!(first.is_some());
        assert!(second.is_none());

        let other_plan = s.fanout.notify_plan_assigned(s.athlete, "plan-8", s.coach).await.unwrap();
        assert!(other_plan.is_some());
    }

    #[tokio::test]
    async fn completed_and_skipped_are_distinct_kinds() {
        let s = setup();
        assert!(s.fanout.notify_session_completed(s.coach, "s-1", s.athlete).await.unwrap().is_some());
        assert!(s.fanout.notify_session_skipped(s.coach, "s-1", s.athlete).await.unwrap().is_some());
        assert!(s.fanout.notify_session_completed(s.coach, "s-1", s.athlete).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn session_transition_picks_the_matching_kind() {
        use SessionStatus::*;
        let s = setup();

        let skipped = s
            .fanout
            .notify_session_transition(s.coach, "s-2", s.athlete, Pending, Skipped)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(skipped.kind, NotificationKind::SessionSkipped);

        let completed = s
            .fanout
            .notify_session_transition(s.coach, "s-3", s.athlete, Pending, Completed)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(completed.kind, NotificationKind::SessionCompleted);

        let quiet = s
            .fanout
            .notify_session_transition(s.coach, "s-3", s.athlete, Completed, Skipped)
            .await
            .unwrap();
        assert!(quiet.is_none());
        assert_eq!(s.fanout.list(s.coach, None, false).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn offline_target_still_gets_the_durable_row() {
        let s = setup();
        let n = s.fanout.notify_streak_milestone(s.athlete, 30).await.unwrap().unwrap();
        assert_eq!(n.correlation.streak_days, Some(30));
        assert!(s.fanout.notify_activity_synced(s.athlete, "strava-991").await.unwrap().is_some());

        let unread = s.fanout.list(s.athlete, None, true).await.unwrap();
        assert_eq!(unread.len(), 2);
        assert_eq!(unread[0].kind, NotificationKind::ActivitySynced);
    }

    #[tokio::test]
    async fn mark_read_is_idempotent() {
        let s = setup();
        let n = s.fanout.notify_streak_milestone(s.athlete, 7).await.unwrap().unwrap();

        assert_eq!(s.fanout.mark_read(s.athlete, vec![n.id]).await.unwrap(), vec![n.id]);
        assert!(s.fanout.mark_read(s.athlete, vec![n.id]).await.unwrap().is_empty());
        assert_eq!(s.fanout.mark_all_read(s.athlete).await.unwrap(), 0);

        let listed = s.fanout.list(s.athlete, None, false).await.unwrap();
        assert!(listed[0].read);
        assert!(listed[0].read_at.is_some());
    }

    #[tokio::test]
    async fn oversized_mark_read_batch_is_a_validation_error() {
        let s = setup();
        let ids = (0..=MAX_READ_BATCH).map(|_| Uuid::new_v4()).collect();
        let err = s.fanout.mark_read(s.athlete, ids).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Validation(_)));

        assert!(s.fanout.mark_read(s.athlete, vec![]).await.unwrap().is_empty());
    }
}
