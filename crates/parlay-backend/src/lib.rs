//! Interfaces to the managed backend: data, auth and storage clients.
//!
//! The backend owns every persistent entity; these traits are the only way the
//! client core reaches it. [`memory::MemoryBackend`] implements all three for
//! tests and local runs, [`rest::RestStorageClient`] talks to a storage gateway
//! over HTTP.

pub mod error;
pub mod memory;
pub mod rest;
pub mod subscription;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;
use uuid::Uuid;

use parlay_types::api::{DeviceRegistration, Session, SignedUrl, TotpSetup, UserAttributes};
use parlay_types::events::AuthEvent;
use parlay_types::models::{
    EventCheckIn, LiveEvent, Notification, NotificationPreferences, User,
};

pub use error::{AuthFailure, BackendError, Result};
pub use subscription::{ListenerHandle, Subscription, SubscriptionHandler, spawn_listener};

/// Typed data operations, one group per backend model.
#[async_trait]
pub trait DataClient: Send + Sync {
    // -- Users --

    async fn get_user(&self, id: Uuid) -> Result<Option<User>>;

    async fn update_profile_picture_key(&self, user_id: Uuid, key: &str) -> Result<User>;

    // -- Notifications --

    /// Ids of the user's unread notifications. Its length is the unread count.
    async fn unread_notification_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>>;

    async fn mark_notification_read(&self, id: Uuid) -> Result<()>;

    /// Batch-mark every unread notification of the user. Returns how many changed.
    async fn mark_all_notifications_read(&self, user_id: Uuid) -> Result<u32>;

    /// Notifications created for the user from now on.
    async fn on_create_notification(&self, user_id: Uuid) -> Result<Subscription<Notification>>;

    /// Updates to the user's existing notifications.
    async fn on_update_notification(&self, user_id: Uuid) -> Result<Subscription<Notification>>;

    async fn get_notification_preferences(
        &self,
        user_id: Uuid,
    ) -> Result<Option<NotificationPreferences>>;

    // -- Check-ins --

    /// Snapshot query: the first item is the current list of the user's
    /// check-ins, every later item is the full list after a change.
    async fn observe_check_ins(&self, user_id: Uuid) -> Result<Subscription<Vec<EventCheckIn>>>;

    async fn create_check_in(&self, user_id: Uuid, event_id: Uuid) -> Result<EventCheckIn>;

    async fn deactivate_check_in(&self, id: Uuid) -> Result<()>;

    // -- Events --

    async fn get_live_event(&self, id: Uuid) -> Result<Option<LiveEvent>>;

    // -- Push --

    async fn register_device_token(&self, registration: &DeviceRegistration) -> Result<()>;
}

#[async_trait]
pub trait AuthClient: Send + Sync {
    /// Current session, `None` when signed out. `force_refresh` bypasses the
    /// cached tokens.
    async fn fetch_session(&self, force_refresh: bool) -> Result<Option<Session>>;

    async fn current_user_id(&self) -> Result<Uuid>;

    async fn sign_out(&self) -> Result<()>;

    async fn change_password(&self, old_password: &str, new_password: &str) -> Result<()>;

    async fn fetch_attributes(&self) -> Result<UserAttributes>;

    async fn setup_totp(&self) -> Result<TotpSetup>;

    async fn verify_totp(&self, code: &str) -> Result<()>;

    async fn set_mfa_preference(&self, enabled: bool) -> Result<()>;

    /// Auth lifecycle hub.
    fn events(&self) -> broadcast::Receiver<AuthEvent>;
}

#[async_trait]
pub trait StorageClient: Send + Sync {
    async fn upload(&self, key: &str, data: Bytes, content_type: &str) -> Result<()>;

    async fn signed_url(&self, key: &str, expires_in: Duration) -> Result<SignedUrl>;

    async fn remove(&self, key: &str) -> Result<()>;
}
