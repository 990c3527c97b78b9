//! In-process backend used by tests and the simulator.
//!
//! Everything lives behind one mutex, the same shape as a single-connection
//! database. Mutations that the real backend would publish (notification
//! create/update, check-in changes) are fanned out to registered subscription
//! sinks, much like the gateway dispatcher fans events out to sockets.
//!
//! Every trait call is recorded as an [`Operation`] so tests can count them,
//! and [`MemoryBackend::fail_next`] queues errors for specific operations.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use parlay_types::api::{DeviceRegistration, Session, SignedUrl, TotpSetup, UserAttributes};
use parlay_types::events::AuthEvent;
use parlay_types::models::{
    EventCheckIn, EventStatus, LiveEvent, Notification, NotificationPreferences, User,
};

use crate::error::{AuthFailure, BackendError, Result};
use crate::subscription::{self, Subscription, SubscriptionSink};
use crate::{AuthClient, DataClient, StorageClient};

/// Backend calls, for counting and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    GetUser,
    UpdateProfilePictureKey,
    UnreadIds,
    MarkRead,
    MarkAllRead,
    SubscribeCreate,
    SubscribeUpdate,
    GetPreferences,
    ObserveCheckIns,
    CreateCheckIn,
    DeactivateCheckIn,
    GetLiveEvent,
    RegisterDevice,
    FetchSession,
    CurrentUserId,
    SignOut,
    ChangePassword,
    FetchAttributes,
    SetupTotp,
    VerifyTotp,
    SetMfaPreference,
    Upload,
    SignedUrl,
    Remove,
}

/// Realtime channels a test can break or inspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RealtimeChannel {
    NotificationCreate,
    NotificationUpdate,
    CheckIns,
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Bytes,
    pub content_type: String,
}

pub struct MemoryBackend {
    state: Mutex<State>,
    auth_tx: broadcast::Sender<AuthEvent>,
}

#[derive(Default)]
struct State {
    users: HashMap<Uuid, User>,
    notifications: Vec<Notification>,
    preferences: HashMap<Uuid, NotificationPreferences>,
    events: HashMap<Uuid, LiveEvent>,
    check_ins: Vec<EventCheckIn>,
    objects: HashMap<String, StoredObject>,
    devices: Vec<DeviceRegistration>,

    session: Option<Session>,
    password: Option<String>,
    totp_secret: Option<String>,
    totp_verified: bool,
    mfa_enabled: bool,

    calls: Vec<(Operation, String)>,
    failures: HashMap<Operation, VecDeque<BackendError>>,

    create_subs: Vec<(Uuid, SubscriptionSink<Notification>)>,
    update_subs: Vec<(Uuid, SubscriptionSink<Notification>)>,
    check_in_subs: Vec<(Uuid, SubscriptionSink<Vec<EventCheckIn>>)>,
}

impl State {
    fn unread_ids(&self, user_id: Uuid) -> Vec<Uuid> {
        self.notifications
            .iter()
            .filter(|n| n.user_id == user_id && !n.is_read)
            .map(|n| n.id)
            .collect()
    }

    fn user_check_ins(&self, user_id: Uuid) -> Vec<EventCheckIn> {
        self.check_ins
            .iter()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect()
    }

    fn emit_check_ins(&mut self, user_id: Uuid) {
        let snapshot = self.user_check_ins(user_id);
        self.check_in_subs.retain(|(_, sink)| !sink.is_closed());
        for (uid, sink) in &self.check_in_subs {
            if *uid == user_id {
                sink.send(snapshot.clone());
            }
        }
    }

    fn require_session(&self) -> Result<&Session> {
        self.session
            .as_ref()
            .ok_or_else(|| BackendError::Unauthorized("no active session".into()))
    }
}

fn emit_notification(subs: &mut Vec<(Uuid, SubscriptionSink<Notification>)>, n: &Notification) {
    subs.retain(|(_, sink)| !sink.is_closed());
    for (uid, sink) in subs.iter() {
        if *uid == n.user_id {
            sink.send(n.clone());
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (auth_tx, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(State::default()),
            auth_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a call, then surface any failure queued for it.
    fn begin(&self, op: Operation, args: impl Into<String>) -> Result<MutexGuard<'_, State>> {
        let mut state = self.lock();
        state.calls.push((op, args.into()));
        if let Some(err) = state.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            debug!("memory backend: injected failure for {:?}: {}", op, err);
            return Err(err);
        }
        Ok(state)
    }

    // -- Seeding --

    pub fn insert_user(&self, user: User) {
        self.lock().users.insert(user.id, user);
    }

    /// Store a notification without publishing it.
    pub fn insert_notification(&self, notification: Notification) {
        self.lock().notifications.push(notification);
    }

    pub fn insert_preferences(&self, preferences: NotificationPreferences) {
        self.lock()
            .preferences
            .insert(preferences.user_id, preferences);
    }

    pub fn insert_live_event(&self, event: LiveEvent) {
        self.lock().events.insert(event.id, event);
    }

    pub fn insert_object(&self, key: &str, data: Bytes, content_type: &str) {
        self.lock().objects.insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: content_type.to_string(),
            },
        );
    }

    pub fn set_session(&self, session: Option<Session>) {
        self.lock().session = session;
    }

    pub fn set_password(&self, password: &str) {
        self.lock().password = Some(password.to_string());
    }

    // -- Server-side changes --

    /// Store a notification and publish it to create subscribers.
    pub fn push_notification(&self, notification: Notification) {
        let mut state = self.lock();
        emit_notification(&mut state.create_subs, &notification);
        state.notifications.push(notification);
    }

    /// Flip a notification's read flag from elsewhere and publish the update.
    pub fn set_notification_read(&self, id: Uuid, is_read: bool) {
        let mut state = self.lock();
        let updated = state
            .notifications
            .iter_mut()
            .find(|n| n.id == id)
            .map(|n| {
                n.is_read = is_read;
                n.clone()
            });
        if let Some(n) = updated {
            emit_notification(&mut state.update_subs, &n);
        }
    }

    pub fn set_event_status(&self, event_id: Uuid, status: EventStatus) {
        if let Some(event) = self.lock().events.get_mut(&event_id) {
            event.status = status;
        }
    }

    /// Insert a check-in record directly and publish the user's new snapshot.
    pub fn insert_check_in(&self, check_in: EventCheckIn) {
        let mut state = self.lock();
        let user_id = check_in.user_id;
        state.check_ins.push(check_in);
        state.emit_check_ins(user_id);
    }

    pub fn emit_auth_event(&self, event: AuthEvent) {
        let _ = self.auth_tx.send(event);
    }

    // -- Fault injection --

    /// Make the next call of `op` fail with `error`. Queued errors are used in order.
    pub fn fail_next(&self, op: Operation, error: BackendError) {
        self.lock().failures.entry(op).or_default().push_back(error);
    }

    /// Deliver an error on every live subscription of `channel` for the user.
    pub fn fail_channel(&self, channel: RealtimeChannel, user_id: Uuid, error: BackendError) {
        let state = self.lock();
        match channel {
            RealtimeChannel::NotificationCreate => {
                for (_, sink) in state.create_subs.iter().filter(|(uid, _)| *uid == user_id) {
                    sink.fail(error.clone());
                }
            }
            RealtimeChannel::NotificationUpdate => {
                for (_, sink) in state.update_subs.iter().filter(|(uid, _)| *uid == user_id) {
                    sink.fail(error.clone());
                }
            }
            RealtimeChannel::CheckIns => {
                for (_, sink) in state.check_in_subs.iter().filter(|(uid, _)| *uid == user_id) {
                    sink.fail(error.clone());
                }
            }
        }
    }

    // -- Inspection --

    pub fn calls(&self, op: Operation) -> usize {
        self.lock().calls.iter().filter(|(o, _)| *o == op).count()
    }

    /// Arguments recorded for each call of `op`, in call order.
    pub fn call_args(&self, op: Operation) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter(|(o, _)| *o == op)
            .map(|(_, args)| args.clone())
            .collect()
    }

    pub fn reset_calls(&self) {
        self.lock().calls.clear();
    }

    /// Live subscribers on `channel` for the user.
    pub fn subscriber_count(&self, channel: RealtimeChannel, user_id: Uuid) -> usize {
        let state = self.lock();
        match channel {
            RealtimeChannel::NotificationCreate => state
                .create_subs
                .iter()
                .filter(|(uid, sink)| *uid == user_id && !sink.is_closed())
                .count(),
            RealtimeChannel::NotificationUpdate => state
                .update_subs
                .iter()
                .filter(|(uid, sink)| *uid == user_id && !sink.is_closed())
                .count(),
            RealtimeChannel::CheckIns => state
                .check_in_subs
                .iter()
                .filter(|(uid, sink)| *uid == user_id && !sink.is_closed())
                .count(),
        }
    }

    pub fn unread_count(&self, user_id: Uuid) -> u32 {
        self.lock().unread_ids(user_id).len() as u32
    }

    pub fn user(&self, id: Uuid) -> Option<User> {
        self.lock().users.get(&id).cloned()
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.lock().objects.get(key).cloned()
    }

    pub fn check_ins(&self, user_id: Uuid) -> Vec<EventCheckIn> {
        self.lock().user_check_ins(user_id)
    }

    pub fn devices(&self) -> Vec<DeviceRegistration> {
        self.lock().devices.clone()
    }

    pub fn mfa_enabled(&self) -> bool {
        self.lock().mfa_enabled
    }
}

#[async_trait]
impl DataClient for MemoryBackend {
    async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        let state = self.begin(Operation::GetUser, id.to_string())?;
        Ok(state.users.get(&id).cloned())
    }

    async fn update_profile_picture_key(&self, user_id: Uuid, key: &str) -> Result<User> {
        let mut state = self.begin(
            Operation::UpdateProfilePictureKey,
            format!("{} {}", user_id, key),
        )?;
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or_else(|| BackendError::NotFound(format!("user {}", user_id)))?;
        user.profile_picture_key = Some(key.to_string());
        Ok(user.clone())
    }

    async fn unread_notification_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        let state = self.begin(Operation::UnreadIds, user_id.to_string())?;
        Ok(state.unread_ids(user_id))
    }

    async fn mark_notification_read(&self, id: Uuid) -> Result<()> {
        let mut state = self.begin(Operation::MarkRead, id.to_string())?;
        let updated = state
            .notifications
            .iter_mut()
            .find(|n| n.id == id)
            .map(|n| {
                n.is_read = true;
                n.clone()
            })
            .ok_or_else(|| BackendError::NotFound(format!("notification {}", id)))?;
        emit_notification(&mut state.update_subs, &updated);
        Ok(())
    }

    async fn mark_all_notifications_read(&self, user_id: Uuid) -> Result<u32> {
        let mut state = self.begin(Operation::MarkAllRead, user_id.to_string())?;
        let mut changed = Vec::new();
        for n in state
            .notifications
            .iter_mut()
            .filter(|n| n.user_id == user_id && !n.is_read)
        {
            n.is_read = true;
            changed.push(n.clone());
        }
        for n in &changed {
            emit_notification(&mut state.update_subs, n);
        }
        Ok(changed.len() as u32)
    }

    async fn on_create_notification(&self, user_id: Uuid) -> Result<Subscription<Notification>> {
        let mut state = self.begin(Operation::SubscribeCreate, user_id.to_string())?;
        let (sink, sub) = subscription::channel();
        state.create_subs.push((user_id, sink));
        Ok(sub)
    }

    async fn on_update_notification(&self, user_id: Uuid) -> Result<Subscription<Notification>> {
        let mut state = self.begin(Operation::SubscribeUpdate, user_id.to_string())?;
        let (sink, sub) = subscription::channel();
        state.update_subs.push((user_id, sink));
        Ok(sub)
    }

    async fn get_notification_preferences(
        &self,
        user_id: Uuid,
    ) -> Result<Option<NotificationPreferences>> {
        let state = self.begin(Operation::GetPreferences, user_id.to_string())?;
        Ok(state.preferences.get(&user_id).cloned())
    }

    async fn observe_check_ins(&self, user_id: Uuid) -> Result<Subscription<Vec<EventCheckIn>>> {
        let mut state = self.begin(Operation::ObserveCheckIns, user_id.to_string())?;
        let (sink, sub) = subscription::channel();
        sink.send(state.user_check_ins(user_id));
        state.check_in_subs.push((user_id, sink));
        Ok(sub)
    }

    async fn create_check_in(&self, user_id: Uuid, event_id: Uuid) -> Result<EventCheckIn> {
        let mut state = self.begin(
            Operation::CreateCheckIn,
            format!("{} {}", user_id, event_id),
        )?;
        if !state.events.contains_key(&event_id) {
            return Err(BackendError::NotFound(format!("event {}", event_id)));
        }
        let check_in = EventCheckIn {
            id: Uuid::new_v4(),
            user_id,
            event_id,
            is_active: true,
            checked_in_at: Utc::now(),
        };
        state.check_ins.push(check_in.clone());
        state.emit_check_ins(user_id);
        Ok(check_in)
    }

    async fn deactivate_check_in(&self, id: Uuid) -> Result<()> {
        let mut state = self.begin(Operation::DeactivateCheckIn, id.to_string())?;
        let user_id = state
            .check_ins
            .iter_mut()
            .find(|c| c.id == id)
            .map(|c| {
                c.is_active = false;
                c.user_id
            })
            .ok_or_else(|| BackendError::NotFound(format!("check-in {}", id)))?;
        state.emit_check_ins(user_id);
        Ok(())
    }

    async fn get_live_event(&self, id: Uuid) -> Result<Option<LiveEvent>> {
        let state = self.begin(Operation::GetLiveEvent, id.to_string())?;
        Ok(state.events.get(&id).cloned())
    }

    async fn register_device_token(&self, registration: &DeviceRegistration) -> Result<()> {
        let mut state = self.begin(
            Operation::RegisterDevice,
            format!("{} {}", registration.user_id, registration.token),
        )?;
        state.devices.retain(|d| d.token != registration.token);
        state.devices.push(registration.clone());
        Ok(())
    }
}

#[async_trait]
impl AuthClient for MemoryBackend {
    async fn fetch_session(&self, force_refresh: bool) -> Result<Option<Session>> {
        let state = self.begin(Operation::FetchSession, force_refresh.to_string())?;
        Ok(state.session.clone())
    }

    async fn current_user_id(&self) -> Result<Uuid> {
        let state = self.begin(Operation::CurrentUserId, "")?;
        Ok(state.require_session()?.user_id)
    }

    async fn sign_out(&self) -> Result<()> {
        {
            let mut state = self.begin(Operation::SignOut, "")?;
            state.session = None;
        }
        self.emit_auth_event(AuthEvent::SignedOut);
        Ok(())
    }

    async fn change_password(&self, old_password: &str, new_password: &str) -> Result<()> {
        let mut state = self.begin(Operation::ChangePassword, "")?;
        state.require_session()?;
        if let Some(current) = &state.password {
            if current != old_password {
                return Err(BackendError::Auth(AuthFailure::NotAuthorized));
            }
        }
        if new_password.len() < 8 {
            return Err(BackendError::Auth(AuthFailure::InvalidPassword));
        }
        state.password = Some(new_password.to_string());
        Ok(())
    }

    async fn fetch_attributes(&self) -> Result<UserAttributes> {
        let state = self.begin(Operation::FetchAttributes, "")?;
        let session = state.require_session()?;
        let mut attributes = UserAttributes::new();
        attributes.insert("sub".into(), session.user_id.to_string());
        attributes.insert("preferred_username".into(), session.username.clone());
        if let Some(user) = state.users.get(&session.user_id) {
            if let Some(name) = &user.display_name {
                attributes.insert("name".into(), name.clone());
            }
        }
        Ok(attributes)
    }

    async fn setup_totp(&self) -> Result<TotpSetup> {
        let mut state = self.begin(Operation::SetupTotp, "")?;
        let username = state.require_session()?.username.clone();
        let secret = Uuid::new_v4().simple().to_string().to_uppercase();
        state.totp_secret = Some(secret.clone());
        state.totp_verified = false;
        Ok(TotpSetup {
            setup_uri: format!(
                "otpauth://totp/Parlay:{}?secret={}&issuer=Parlay",
                username, secret
            ),
            shared_secret: secret,
        })
    }

    async fn verify_totp(&self, code: &str) -> Result<()> {
        let mut state = self.begin(Operation::VerifyTotp, code)?;
        if state.totp_secret.is_none() {
            return Err(BackendError::Validation("no TOTP setup in progress".into()));
        }
        if code.len() != 6 || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Err(BackendError::Auth(AuthFailure::CodeMismatch));
        }
        state.totp_verified = true;
        Ok(())
    }

    async fn set_mfa_preference(&self, enabled: bool) -> Result<()> {
        let mut state = self.begin(Operation::SetMfaPreference, enabled.to_string())?;
        if enabled && !state.totp_verified {
            return Err(BackendError::Validation("TOTP not verified".into()));
        }
        state.mfa_enabled = enabled;
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<AuthEvent> {
        self.auth_tx.subscribe()
    }
}

#[async_trait]
impl StorageClient for MemoryBackend {
    async fn upload(&self, key: &str, data: Bytes, content_type: &str) -> Result<()> {
        let mut state = self.begin(Operation::Upload, key)?;
        if data.is_empty() {
            return Err(BackendError::Validation("empty upload".into()));
        }
        state.objects.insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn signed_url(&self, key: &str, expires_in: Duration) -> Result<SignedUrl> {
        let _state = self.begin(Operation::SignedUrl, key)?;
        let ttl = chrono::Duration::from_std(expires_in)
            .map_err(|e| BackendError::Validation(format!("expiry out of range: {}", e)))?;
        let expires_at = Utc::now() + ttl;
        Ok(SignedUrl {
            url: format!("memory://{}?expires={}", key, expires_at.timestamp()),
            expires_at,
        })
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut state = self.begin(Operation::Remove, key)?;
        state.objects.remove(key);
        Ok(())
    }
}
