use std::sync::Arc;

use tracing::{info, warn};

use parlay_backend::{AuthClient, DataClient, StorageClient};

use crate::checkin::CheckInTracker;
use crate::clock::Clock;
use crate::config::ClientConfig;
use crate::lifecycle::LifecycleMonitor;
use crate::notifications::NotificationCenter;
use crate::error::Result;
use crate::picker::{ImagePicker, ImageSource};
use crate::profile::{ProfilePictureOutcome, ProfilePictureService};
use crate::push::{DeepLinkHandler, PushRegistrar, PushService};
use crate::service::ServiceHandle;
use crate::session::SessionService;
use crate::toast::ToastSink;
use crate::url_cache::SignedUrlCache;

/// Managed-backend clients.
#[derive(Clone)]
pub struct Backends {
    pub data: Arc<dyn DataClient>,
    pub auth: Arc<dyn AuthClient>,
    pub storage: Arc<dyn StorageClient>,
}

/// Device capabilities supplied by the host.
#[derive(Clone)]
pub struct Device {
    pub picker: Arc<dyn ImagePicker>,
    pub push: Arc<dyn PushRegistrar>,
    pub toasts: Arc<dyn ToastSink>,
    pub links: Arc<dyn DeepLinkHandler>,
    pub clock: Arc<dyn Clock>,
}

/// Every client service, wired together.
pub struct ClientApp {
    pub config: ClientConfig,
    pub lifecycle: Arc<LifecycleMonitor>,
    pub session: SessionService,
    pub notifications: NotificationCenter,
    pub check_ins: CheckInTracker,
    pub urls: Arc<SignedUrlCache>,
    pub profile: Arc<ProfilePictureService>,
    pub push: Arc<PushService>,
}

impl ClientApp {
    pub fn new(config: ClientConfig, backends: Backends, device: Device) -> Self {
        let lifecycle = Arc::new(LifecycleMonitor::default());
        let urls = Arc::new(SignedUrlCache::new(
            config.signed_url_refresh_margin,
            device.clock.clone(),
        ));

        let session = SessionService::new(backends.auth.clone(), backends.data.clone());
        {
            let urls = urls.clone();
            session.on_sign_out(move || urls.clear());
        }

        let notifications = NotificationCenter::new(
            backends.data.clone(),
            device.toasts.clone(),
            device.clock.clone(),
        );
        let check_ins = CheckInTracker::new(backends.data.clone(), config.checkin_poll);
        let profile = Arc::new(ProfilePictureService::new(
            backends.data.clone(),
            backends.storage.clone(),
            device.picker.clone(),
            urls.clone(),
            device.clock.clone(),
            &config,
        ));
        let push = Arc::new(PushService::new(
            backends.data.clone(),
            device.push.clone(),
            device.links.clone(),
        ));

        Self {
            config,
            lifecycle,
            session,
            notifications,
            check_ins,
            urls,
            profile,
            push,
        }
    }

    /// Spawn the background drivers. Dropping the handles stops them.
    pub fn start(&self) -> Vec<ServiceHandle> {
        info!("starting client services");
        vec![
            self.session.spawn(self.lifecycle.subscribe()),
            self.notifications
                .spawn(self.session.watch(), self.lifecycle.subscribe()),
            self.check_ins.spawn(self.session.watch()),
            self.spawn_push_registration(),
        ]
    }

    /// Change the signed-in user's picture and move the session snapshot to it.
    pub async fn change_profile_picture(
        &self,
        source: ImageSource,
    ) -> Result<ProfilePictureOutcome> {
        let user = self.session.require_user()?;
        let outcome = self.profile.change_profile_picture(&user, source).await?;
        if let ProfilePictureOutcome::Updated { key } = &outcome {
            self.session.set_profile_picture_key(user.id, key);
        }
        Ok(outcome)
    }

    /// Register the device token each time a user signs in.
    fn spawn_push_registration(&self) -> ServiceHandle {
        let push = self.push.clone();
        let mut users = self.session.watch();

        ServiceHandle::spawn("push registration", move |cancel| async move {
            let mut registered = None;
            loop {
                let user_id = users.borrow_and_update().as_ref().map(|u| u.id);
                if let Some(id) = user_id {
                    if registered != Some(id) {
                        match push.register(id).await {
                            Ok(_) => registered = Some(id),
                            Err(e) => warn!("push registration failed: {}", e),
                        }
                    }
                } else {
                    registered = None;
                }

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = users.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        })
    }
}
