use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use parlay_backend::{DataClient, StorageClient};
use parlay_types::models::CurrentUser;

use crate::clock::Clock;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::picker::{ImagePicker, ImageSource, PermissionStatus, PickOptions, PickOutcome};
use crate::url_cache::SignedUrlCache;

const CONTENT_TYPE: &str = "image/jpeg";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfilePictureOutcome {
    Updated { key: String },
    Cancelled,
    PermissionDenied,
}

pub struct ProfilePictureService {
    data: Arc<dyn DataClient>,
    storage: Arc<dyn StorageClient>,
    picker: Arc<dyn ImagePicker>,
    urls: Arc<SignedUrlCache>,
    clock: Arc<dyn Clock>,
    prefix: String,
    quality: f32,
    url_ttl: Duration,
}

impl ProfilePictureService {
    pub fn new(
        data: Arc<dyn DataClient>,
        storage: Arc<dyn StorageClient>,
        picker: Arc<dyn ImagePicker>,
        urls: Arc<SignedUrlCache>,
        clock: Arc<dyn Clock>,
        config: &ClientConfig,
    ) -> Self {
        Self {
            data,
            storage,
            picker,
            urls,
            clock,
            prefix: config.profile_picture_prefix.clone(),
            quality: config.image_quality,
            url_ttl: config.signed_url_ttl,
        }
    }

    /// `{prefix}/{user_id}/{unix_millis}.jpg`
    pub fn object_key(&self, user_id: Uuid) -> String {
        format!(
            "{}/{}/{}.jpg",
            self.prefix,
            user_id,
            self.clock.now().timestamp_millis()
        )
    }

    /// Pick, upload and persist a new profile picture, then delete the old one.
    ///
    /// The previous key is read from the stored user record, not from `user`,
    /// which may be an older snapshot. Declining permission or cancelling the
    /// picker are normal outcomes and leave the current picture untouched.
    /// Removing the previous object is best-effort: a failure there is logged
    /// and the change still succeeds.
    pub async fn change_profile_picture(
        &self,
        user: &CurrentUser,
        source: ImageSource,
    ) -> Result<ProfilePictureOutcome> {
        if self.picker.request_permission(source).await? == PermissionStatus::Denied {
            info!("{:?} permission denied", source);
            return Ok(ProfilePictureOutcome::PermissionDenied);
        }

        let options = PickOptions::profile_picture(self.quality);
        let image = match self.picker.pick(source, &options).await? {
            PickOutcome::Selected(image) => image,
            PickOutcome::Cancelled => {
                debug!("picker cancelled");
                return Ok(ProfilePictureOutcome::Cancelled);
            }
        };
        if image.data.is_empty() {
            return Err(ClientError::InvalidInput("The selected image is empty.".into()));
        }

        let previous = self.stored_key(user).await;
        let key = self.object_key(user.id);
        self.storage.upload(&key, image.data, CONTENT_TYPE).await?;
        debug!("uploaded {} ({}x{})", key, image.width, image.height);

        if let Err(e) = self.data.update_profile_picture_key(user.id, &key).await {
            // The record still points at the old picture; drop the orphan.
            if let Err(cleanup) = self.storage.remove(&key).await {
                warn!("failed to remove orphaned upload {}: {}", key, cleanup);
            }
            return Err(e.into());
        }
        info!("profile picture for {} set to {}", user.id, key);

        if let Some(previous) = previous.as_deref() {
            if previous != key {
                self.urls.invalidate(previous);
                match self.storage.remove(previous).await {
                    Ok(()) => debug!("removed previous picture {}", previous),
                    Err(e) => warn!("failed to remove previous picture {}: {}", previous, e),
                }
            }
        }

        Ok(ProfilePictureOutcome::Updated { key })
    }

    async fn stored_key(&self, user: &CurrentUser) -> Option<String> {
        match self.data.get_user(user.id).await {
            Ok(Some(record)) => record.profile_picture_key,
            Ok(None) => None,
            Err(e) => {
                warn!("could not read stored picture for {}: {}", user.id, e);
                user.profile_picture_key.clone()
            }
        }
    }

    /// Displayable URL for a stored picture. Errors yield `None`.
    pub async fn profile_picture_url(&self, key: &str) -> Option<String> {
        if key.is_empty() {
            return None;
        }
        if let Some(url) = self.urls.get(key) {
            return Some(url);
        }

        match self.storage.signed_url(key, self.url_ttl).await {
            Ok(signed) => {
                let url = signed.url.clone();
                self.urls.insert(key, signed);
                Some(url)
            }
            Err(e) => {
                warn!("could not sign URL for {}: {}", key, e);
                None
            }
        }
    }
}
