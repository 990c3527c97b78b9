use serde::{Deserialize, Serialize};

/// Auth lifecycle events emitted by the auth client's hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AuthEvent {
    SignedIn,
    TokenRefresh,
    SignedOut,
    SessionExpired,
}

impl AuthEvent {
    /// Events after which the local session snapshot must be dropped.
    pub fn ends_session(self) -> bool {
        matches!(self, Self::SignedOut | Self::SessionExpired)
    }
}

/// Host application activity as reported by the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AppActivity {
    #[default]
    Active,
    Inactive,
    Background,
}

/// Edge-triggered lifecycle transitions derived from [`AppActivity`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LifecycleEvent {
    /// Background or inactive -> active.
    Foregrounded,
    /// Active -> background or inactive.
    Backgrounded,
}
