use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -- Users --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    #[default]
    User,
    Admin,
}

/// Where the user is in the onboarding flow. `step` counts completed screens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct OnboardingStatus {
    pub completed: bool,
    pub step: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub display_name: Option<String>,
    pub role: UserRole,
    pub onboarding: OnboardingStatus,
    /// Storage key of the current profile picture, never a signed URL.
    pub profile_picture_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// In-memory snapshot of the signed-in user. Rebuilt on every auth refresh,
/// discarded on sign-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: Uuid,
    pub username: String,
    pub role: UserRole,
    pub onboarding: OnboardingStatus,
    pub profile_picture_key: Option<String>,
}

impl CurrentUser {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    pub fn needs_onboarding(&self) -> bool {
        !self.onboarding.completed
    }
}

// -- Notifications --

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationPriority {
    #[default]
    Low,
    Medium,
    High,
    Urgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    BetInvite,
    BetResult,
    FriendRequest,
    FriendAccepted,
    PaymentReceived,
    EventReminder,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub is_read: bool,
    pub priority: NotificationPriority,
    pub action_type: Option<String>,
    /// Optional action payload. Usually JSON, but older records carry plain strings.
    pub action_data: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPreferences {
    pub user_id: Uuid,
    pub push_enabled: bool,
    pub dnd_enabled: bool,
    pub dnd_start: NaiveTime,
    pub dnd_end: NaiveTime,
    pub bet_updates: bool,
    pub friend_activity: bool,
    pub payment_updates: bool,
}

impl NotificationPreferences {
    pub fn defaults_for(user_id: Uuid) -> Self {
        Self {
            user_id,
            push_enabled: true,
            dnd_enabled: false,
            dnd_start: NaiveTime::from_hms_opt(22, 0, 0).unwrap_or_default(),
            dnd_end: NaiveTime::from_hms_opt(7, 0, 0).unwrap_or_default(),
            bet_updates: true,
            friend_activity: true,
            payment_updates: true,
        }
    }

    /// Whether notifications of this kind are switched on at all.
    pub fn allows(&self, kind: NotificationKind) -> bool {
        match kind {
            NotificationKind::BetInvite | NotificationKind::BetResult => self.bet_updates,
            NotificationKind::FriendRequest | NotificationKind::FriendAccepted => {
                self.friend_activity
            }
            NotificationKind::PaymentReceived => self.payment_updates,
            NotificationKind::EventReminder | NotificationKind::System => true,
        }
    }
}

// -- Live events and check-ins --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Upcoming,
    Live,
    Completed,
    Cancelled,
}

impl EventStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveEvent {
    pub id: Uuid,
    pub title: String,
    pub status: EventStatus,
    pub starts_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventCheckIn {
    pub id: Uuid,
    pub user_id: Uuid,
    pub event_id: Uuid,
    pub is_active: bool,
    pub checked_in_at: DateTime<Utc>,
}

/// The one active check-in a user has, joined with its event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckedInEvent {
    pub check_in: EventCheckIn,
    pub event: LiveEvent,
}
