//! Signed-in user snapshot.
//!
//! The session service is the single owner of [`CurrentUser`]. Everything
//! else reads it through a `watch` receiver and reacts to changes; nothing
//! caches the user separately.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use parlay_backend::{AuthClient, DataClient};
use parlay_types::api::{Session, TotpSetup, UserAttributes};
use parlay_types::events::{AuthEvent, LifecycleEvent};
use parlay_types::models::{CurrentUser, User, UserRole};

use crate::error::{ClientError, Result};
use crate::service::ServiceHandle;

type SignOutHook = Box<dyn Fn() + Send + Sync>;

#[derive(Clone)]
pub struct SessionService {
    inner: Arc<Inner>,
}

struct Inner {
    auth: Arc<dyn AuthClient>,
    data: Arc<dyn DataClient>,
    current: watch::Sender<Option<CurrentUser>>,
    sign_out_hooks: Mutex<Vec<SignOutHook>>,
}

fn current_user(session: Session, user: Option<User>) -> CurrentUser {
    let role = if session.is_admin() {
        UserRole::Admin
    } else {
        user.as_ref().map(|u| u.role).unwrap_or_default()
    };

    match user {
        Some(user) => CurrentUser {
            id: session.user_id,
            username: user.username,
            role,
            onboarding: user.onboarding,
            profile_picture_key: user.profile_picture_key,
        },
        // Fresh sign-ups can have a session before their user record exists.
        None => CurrentUser {
            id: session.user_id,
            username: session.username,
            role,
            onboarding: Default::default(),
            profile_picture_key: None,
        },
    }
}

impl SessionService {
    pub fn new(auth: Arc<dyn AuthClient>, data: Arc<dyn DataClient>) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                auth,
                data,
                current,
                sign_out_hooks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn current(&self) -> Option<CurrentUser> {
        self.inner.current.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Option<CurrentUser>> {
        self.inner.current.subscribe()
    }

    /// The signed-in user, or [`ClientError::NotSignedIn`].
    pub fn require_user(&self) -> Result<CurrentUser> {
        self.current().ok_or(ClientError::NotSignedIn)
    }

    /// Run `hook` whenever the local session is torn down.
    pub fn on_sign_out<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner
            .sign_out_hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(hook));
    }

    /// Rebuild the snapshot from the auth session and the user record.
    /// Any failure leaves the app signed out locally.
    pub async fn refresh(&self, force: bool) -> Option<CurrentUser> {
        match self.load(force).await {
            Ok(user) => {
                self.publish(user.clone());
                user
            }
            Err(e) => {
                error!("session refresh failed: {}", e);
                self.publish(None);
                None
            }
        }
    }

    async fn load(&self, force: bool) -> Result<Option<CurrentUser>> {
        let Some(session) = self.inner.auth.fetch_session(force).await? else {
            return Ok(None);
        };
        let user = self.inner.data.get_user(session.user_id).await?;
        if user.is_none() {
            warn!("no user record for session {}", session.user_id);
        }
        Ok(Some(current_user(session, user)))
    }

    fn publish(&self, user: Option<CurrentUser>) {
        let changed = self.inner.current.send_if_modified(|current| {
            if *current == user {
                return false;
            }
            *current = user.clone();
            true
        });
        if changed {
            match &user {
                Some(u) => info!("signed in as {} ({:?})", u.username, u.role),
                None => info!("signed out"),
            }
        }
    }

    /// Point the snapshot at a newly stored profile picture.
    pub fn set_profile_picture_key(&self, user_id: Uuid, key: &str) {
        self.inner.current.send_if_modified(|current| match current {
            Some(user) if user.id == user_id => {
                if user.profile_picture_key.as_deref() == Some(key) {
                    return false;
                }
                user.profile_picture_key = Some(key.to_string());
                true
            }
            _ => false,
        });
    }

    /// Drop the snapshot and run every sign-out hook.
    fn reset_local(&self) {
        self.publish(None);
        let hooks = self
            .inner
            .sign_out_hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for hook in hooks.iter() {
            hook();
        }
        debug!("local session state cleared");
    }

    pub async fn handle_auth_event(&self, event: AuthEvent) {
        debug!("auth event: {:?}", event);
        if event.ends_session() {
            self.reset_local();
        } else {
            self.refresh(true).await;
        }
    }

    pub async fn handle_lifecycle(&self, event: LifecycleEvent) {
        if event == LifecycleEvent::Foregrounded {
            self.refresh(false).await;
        }
    }

    /// Sign out remotely, then clear local state. Local state is cleared even
    /// when the remote call fails.
    pub async fn sign_out(&self) -> Result<()> {
        let result = self.inner.auth.sign_out().await;
        self.reset_local();
        result.map_err(ClientError::from)
    }

    // -- Account settings --

    pub async fn change_password(&self, old_password: &str, new_password: &str) -> Result<()> {
        if new_password.is_empty() {
            return Err(ClientError::InvalidInput("New password must not be empty.".into()));
        }
        if old_password == new_password {
            return Err(ClientError::InvalidInput(
                "New password must differ from the current one.".into(),
            ));
        }
        self.inner
            .auth
            .change_password(old_password, new_password)
            .await
            .map_err(|e| {
                let err = ClientError::from(e);
                warn!("password change failed: {}", err);
                err
            })
    }

    pub async fn fetch_attributes(&self) -> Result<UserAttributes> {
        Ok(self.inner.auth.fetch_attributes().await?)
    }

    pub async fn setup_totp(&self) -> Result<TotpSetup> {
        Ok(self.inner.auth.setup_totp().await?)
    }

    pub async fn verify_totp(&self, code: &str) -> Result<()> {
        let code = code.trim();
        if code.is_empty() {
            return Err(ClientError::InvalidInput("Enter the 6-digit code.".into()));
        }
        Ok(self.inner.auth.verify_totp(code).await?)
    }

    pub async fn set_mfa_preference(&self, enabled: bool) -> Result<()> {
        self.inner.auth.set_mfa_preference(enabled).await?;
        info!("MFA {}", if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    /// Load the initial session, then follow auth and lifecycle events.
    pub fn spawn(&self, mut lifecycle: broadcast::Receiver<LifecycleEvent>) -> ServiceHandle {
        let service = self.clone();
        let mut auth_events = self.inner.auth.events();

        ServiceHandle::spawn("session", move |cancel| async move {
            service.refresh(false).await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = auth_events.recv() => match event {
                        Ok(event) => service.handle_auth_event(event).await,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("missed {} auth events, refreshing", n);
                            service.refresh(true).await;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    event = lifecycle.recv() => match event {
                        Ok(event) => service.handle_lifecycle(event).await,
                        Err(broadcast::error::RecvError::Lagged(_)) => {
                            service.refresh(false).await;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parlay_types::models::OnboardingStatus;
    use uuid::Uuid;

    fn session(groups: &[&str]) -> Session {
        Session {
            user_id: Uuid::new_v4(),
            username: "sam".into(),
            groups: groups.iter().map(|g| g.to_string()).collect(),
            expires_at: Utc::now(),
        }
    }

    #[test]
    fn admin_group_grants_admin_role() {
        let user = current_user(session(&["admin"]), None);
        assert!(user.is_admin());
        assert!(user.needs_onboarding());

        let user = current_user(session(&["bettors"]), None);
        assert!(!user.is_admin());
    }

    #[test]
    fn user_record_fills_profile_fields() {
        let s = session(&[]);
        let record = User {
            id: s.user_id,
            username: "sammy".into(),
            display_name: None,
            role: UserRole::User,
            onboarding: OnboardingStatus {
                completed: true,
                step: 4,
            },
            profile_picture_key: Some("profile-pictures/x/1.jpg".into()),
            created_at: Utc::now(),
        };
        let user = current_user(s, Some(record));
        assert_eq!(user.username, "sammy");
        assert!(!user.needs_onboarding());
        assert_eq!(user.profile_picture_key.as_deref(), Some("profile-pictures/x/1.jpg"));
    }
}
