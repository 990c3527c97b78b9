//! Push registration and notification deep links.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use parlay_backend::DataClient;
use parlay_types::api::{DevicePlatform, DeviceRegistration};
use parlay_types::models::Notification;

use crate::error::Result;

/// Device push capability.
#[async_trait]
pub trait PushRegistrar: Send + Sync {
    /// Push token for this device. `None` when permission was refused or the
    /// device cannot receive pushes.
    async fn device_token(&self) -> Result<Option<String>>;

    fn platform(&self) -> DevicePlatform;
}

/// Registrar that always reports the same token.
pub struct StaticRegistrar {
    token: Option<String>,
    platform: DevicePlatform,
}

impl StaticRegistrar {
    pub fn new(token: Option<String>, platform: DevicePlatform) -> Self {
        Self { token, platform }
    }
}

#[async_trait]
impl PushRegistrar for StaticRegistrar {
    async fn device_token(&self) -> Result<Option<String>> {
        Ok(self.token.clone())
    }

    fn platform(&self) -> DevicePlatform {
        self.platform
    }
}

/// Where tapping a notification leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeepLink {
    Bet(Uuid),
    Event(Uuid),
    FriendRequests,
    Friends,
    Wallet,
    Notifications,
}

/// Id carried by an action payload: a bare UUID, or a JSON object with one
/// of `keys`.
fn payload_id(data: Option<&str>, keys: &[&str]) -> Option<Uuid> {
    let raw = data?.trim();
    if let Ok(id) = Uuid::parse_str(raw) {
        return Some(id);
    }
    let value: Value = serde_json::from_str(raw).ok()?;
    keys.iter()
        .filter_map(|k| value.get(*k).and_then(Value::as_str))
        .find_map(|s| Uuid::parse_str(s).ok())
}

impl DeepLink {
    /// Parse a notification action. Anything unrecognised, or a bet/event
    /// action without a usable id, opens the notification list.
    pub fn from_action(action_type: Option<&str>, action_data: Option<&str>) -> Self {
        let Some(action) = action_type else {
            return Self::Notifications;
        };
        let action = action.trim().to_ascii_lowercase();
        let action = action.strip_prefix("view_").unwrap_or(&action);

        let link = match action {
            "bet" | "bet_invite" | "bet_result" => {
                payload_id(action_data, &["betId", "bet_id", "id"]).map(Self::Bet)
            }
            "event" | "live_event" | "event_reminder" => {
                payload_id(action_data, &["eventId", "event_id", "id"]).map(Self::Event)
            }
            "friend_request" | "friend_requests" => Some(Self::FriendRequests),
            "friend" | "friends" | "friend_accepted" => Some(Self::Friends),
            "wallet" | "payment" | "payment_received" => Some(Self::Wallet),
            _ => None,
        };
        link.unwrap_or_else(|| {
            debug!("unhandled notification action {:?}", action_type);
            Self::Notifications
        })
    }

    pub fn for_notification(n: &Notification) -> Self {
        Self::from_action(n.action_type.as_deref(), n.action_data.as_deref())
    }
}

/// Navigation target for deep links.
pub trait DeepLinkHandler: Send + Sync {
    fn open(&self, link: DeepLink);
}

pub struct LogDeepLinkHandler;

impl DeepLinkHandler for LogDeepLinkHandler {
    fn open(&self, link: DeepLink) {
        info!("open {:?}", link);
    }
}

/// Keeps every link it is asked to open.
#[derive(Default)]
pub struct RecordingDeepLinkHandler {
    links: Mutex<Vec<DeepLink>>,
}

impl RecordingDeepLinkHandler {
    pub fn links(&self) -> Vec<DeepLink> {
        self.links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl DeepLinkHandler for RecordingDeepLinkHandler {
    fn open(&self, link: DeepLink) {
        self.links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(link);
    }
}

pub struct PushService {
    data: Arc<dyn DataClient>,
    registrar: Arc<dyn PushRegistrar>,
    links: Arc<dyn DeepLinkHandler>,
}

impl PushService {
    pub fn new(
        data: Arc<dyn DataClient>,
        registrar: Arc<dyn PushRegistrar>,
        links: Arc<dyn DeepLinkHandler>,
    ) -> Self {
        Self {
            data,
            registrar,
            links,
        }
    }

    /// Store this device's token against `user_id`. Returns false when the
    /// device has no token to register.
    pub async fn register(&self, user_id: Uuid) -> Result<bool> {
        let Some(token) = self.registrar.device_token().await? else {
            info!("no push token available, skipping registration");
            return Ok(false);
        };

        let registration = DeviceRegistration {
            user_id,
            token,
            platform: self.registrar.platform(),
        };
        self.data.register_device_token(&registration).await?;
        info!("registered {:?} push token for {}", registration.platform, user_id);
        Ok(true)
    }

    /// The user tapped a delivered notification.
    pub fn handle_response(&self, n: &Notification) -> DeepLink {
        let link = DeepLink::for_notification(n);
        self.links.open(link);
        link
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bet_link_from_json_payload() {
        let id = Uuid::new_v4();
        let data = format!(r#"{{"betId":"{}"}}"#, id);
        assert_eq!(
            DeepLink::from_action(Some("VIEW_BET"), Some(&data)),
            DeepLink::Bet(id)
        );
    }

    #[test]
    fn event_link_from_bare_id() {
        let id = Uuid::new_v4();
        assert_eq!(
            DeepLink::from_action(Some("event"), Some(&id.to_string())),
            DeepLink::Event(id)
        );
    }

    #[test]
    fn simple_actions() {
        assert_eq!(
            DeepLink::from_action(Some("FRIEND_REQUEST"), None),
            DeepLink::FriendRequests
        );
        assert_eq!(DeepLink::from_action(Some("view_friends"), None), DeepLink::Friends);
        assert_eq!(DeepLink::from_action(Some("PAYMENT"), None), DeepLink::Wallet);
    }

    #[test]
    fn fallback_to_notifications() {
        assert_eq!(DeepLink::from_action(None, None), DeepLink::Notifications);
        assert_eq!(
            DeepLink::from_action(Some("VIEW_BET"), Some("not-an-id")),
            DeepLink::Notifications
        );
        assert_eq!(
            DeepLink::from_action(Some("something_new"), None),
            DeepLink::Notifications
        );
    }
}
