use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which side of a coaching relationship a user sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Coach,
    Athlete,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Coach => "coach",
            Self::Athlete => "athlete",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown variant '{0}'")]
pub struct UnknownVariant(pub String);

impl FromStr for Role {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "coach" => Ok(Self::Coach),
            "athlete" => Ok(Self::Athlete),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// A user as seen by a counterpart: enough to render a conversation list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub user_id: Uuid,
    pub username: String,
    pub role: Role,
}

/// Pointer to a file hosted outside the message store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reaction {
    pub emoji: String,
    pub user_id: Uuid,
}

/// A durably stored direct message. `id` and `sent_at` are always assigned
/// by the server; clients never supply them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    pub sent_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
}

impl Message {
    /// The other participant, from `viewer`'s point of view.
    pub fn counterpart_of(&self, viewer: Uuid) -> Uuid {
        if self.sender_id == viewer {
            self.receiver_id
        } else {
            self.sender_id
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationKind {
    PlanAssigned,
    SessionCompleted,
    SessionSkipped,
    CoachFeedback,
    ActivitySynced,
    StreakMilestone,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlanAssigned => "plan-assigned",
            Self::SessionCompleted => "session-completed",
            Self::SessionSkipped => "session-skipped",
            Self::CoachFeedback => "coach-feedback",
            Self::ActivitySynced => "activity-synced",
            Self::StreakMilestone => "streak-milestone",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plan-assigned" => Ok(Self::PlanAssigned),
            "session-completed" => Ok(Self::SessionCompleted),
            "session-skipped" => Ok(Self::SessionSkipped),
            "coach-feedback" => Ok(Self::CoachFeedback),
            "activity-synced" => Ok(Self::ActivitySynced),
            "streak-milestone" => Ok(Self::StreakMilestone),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// Ids a client needs to deep-link from a notification. Plan, session and
/// activity ids belong to external systems and are kept opaque.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correlation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_user_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streak_days: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    #[serde(flatten)]
    pub correlation: Correlation,
    pub read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle of a planned training session, owned by the plan service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Completed,
    Skipped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_kind_round_trips_through_str() {
        for kind in [
            NotificationKind::PlanAssigned,
            NotificationKind::SessionCompleted,
            NotificationKind::SessionSkipped,
            NotificationKind::CoachFeedback,
            NotificationKind::ActivitySynced,
            NotificationKind::StreakMilestone,
        ] {
            assert_eq!(kind.as_str().parse::<NotificationKind>().unwrap(), kind);
        }
        assert!("plan-deleted".parse::<NotificationKind>().is_err());
    }

    #[test]
    fn unknown_role_names_the_value() {
        let err = "admin".parse::<Role>().unwrap_err();
        assert_eq!(err, UnknownVariant("admin".into()));
        assert_eq!(err.to_string(), "unknown variant 'admin'");
        let _: &dyn std::error::Error = &err;
    }

    #[test]
    fn notification_serializes_flat_with_type_tag() {
        let n = Notification {
            id: Uuid::nil(),
            user_id: Uuid::nil(),
            kind: NotificationKind::CoachFeedback,
            correlation: Correlation {
                session_id: Some("s-1".into()),
                ..Default::default()
            },
            read: false,
            read_at: None,
            created_at: DateTime::default(),
        };
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["type"], "coach-feedback");
        assert_eq!(json["session_id"], "s-1");
        assert!(json.get("plan_id").is_none());
    }
}
