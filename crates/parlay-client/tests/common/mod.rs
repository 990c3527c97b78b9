#![allow(dead_code)]

use chrono::Utc;
use uuid::Uuid;

use parlay_types::api::Session;
use parlay_types::models::{
    CurrentUser, EventStatus, LiveEvent, Notification, NotificationKind, NotificationPriority,
    OnboardingStatus, User, UserRole,
};

/// Yield until `cond` holds. Background listeners run on the same runtime.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

/// Give spawned tasks a chance to process anything pending.
pub async fn settle() {
    for _ in 0..100 {
        tokio::task::yield_now().await;
    }
}

pub fn notification(user_id: Uuid, is_read: bool, priority: NotificationPriority) -> Notification {
    Notification {
        id: Uuid::new_v4(),
        user_id,
        kind: NotificationKind::BetInvite,
        title: "New bet".into(),
        message: "Alex invited you to a bet".into(),
        is_read,
        priority,
        action_type: Some("VIEW_BET".into()),
        action_data: Some(format!(r#"{{"betId":"{}"}}"#, Uuid::new_v4())),
        created_at: Utc::now(),
    }
}

pub fn unread(user_id: Uuid) -> Notification {
    notification(user_id, false, NotificationPriority::Medium)
}

pub fn user(id: Uuid, profile_picture_key: Option<&str>) -> User {
    User {
        id,
        username: "jordan".into(),
        display_name: Some("Jordan".into()),
        role: UserRole::User,
        onboarding: OnboardingStatus {
            completed: true,
            step: 4,
        },
        profile_picture_key: profile_picture_key.map(str::to_string),
        created_at: Utc::now(),
    }
}

pub fn current_user(user: &User) -> CurrentUser {
    CurrentUser {
        id: user.id,
        username: user.username.clone(),
        role: user.role,
        onboarding: user.onboarding,
        profile_picture_key: user.profile_picture_key.clone(),
    }
}

pub fn session(user_id: Uuid, groups: &[&str]) -> Session {
    Session {
        user_id,
        username: "jordan".into(),
        groups: groups.iter().map(|g| g.to_string()).collect(),
        expires_at: Utc::now() + chrono::Duration::hours(1),
    }
}

pub fn live_event(title: &str, status: EventStatus) -> LiveEvent {
    LiveEvent {
        id: Uuid::new_v4(),
        title: title.into(),
        status,
        starts_at: Utc::now(),
    }
}
