use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    Camera,
    Library,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PickOptions {
    /// JPEG compression, 0.0..=1.0.
    pub quality: f32,
    pub allow_editing: bool,
    pub aspect: (u32, u32),
}

impl PickOptions {
    /// Square, editable crop used for profile pictures.
    pub fn profile_picture(quality: f32) -> Self {
        Self {
            quality,
            allow_editing: true,
            aspect: (1, 1),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PickedImage {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
}

/// Result of showing the picker. Cancelling is a normal outcome, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum PickOutcome {
    Selected(PickedImage),
    Cancelled,
}

/// Device camera / photo library.
#[async_trait]
pub trait ImagePicker: Send + Sync {
    async fn request_permission(&self, source: ImageSource) -> Result<PermissionStatus>;

    async fn pick(&self, source: ImageSource, options: &PickOptions) -> Result<PickOutcome>;
}

/// Picker that always answers the same way. Used by the simulator and tests.
pub struct StaticPicker {
    permission: PermissionStatus,
    outcome: PickOutcome,
    picks: AtomicUsize,
}

impl StaticPicker {
    pub fn new(permission: PermissionStatus, outcome: PickOutcome) -> Self {
        Self {
            permission,
            outcome,
            picks: AtomicUsize::new(0),
        }
    }

    pub fn selecting(data: impl Into<Bytes>) -> Self {
        Self::new(
            PermissionStatus::Granted,
            PickOutcome::Selected(PickedImage {
                data: data.into(),
                width: 512,
                height: 512,
            }),
        )
    }

    pub fn cancelling() -> Self {
        Self::new(PermissionStatus::Granted, PickOutcome::Cancelled)
    }

    pub fn denied() -> Self {
        Self::new(PermissionStatus::Denied, PickOutcome::Cancelled)
    }

    pub fn picks(&self) -> usize {
        self.picks.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ImagePicker for StaticPicker {
    async fn request_permission(&self, _source: ImageSource) -> Result<PermissionStatus> {
        Ok(self.permission)
    }

    async fn pick(&self, _source: ImageSource, _options: &PickOptions) -> Result<PickOutcome> {
        self.picks.fetch_add(1, Ordering::Relaxed);
        Ok(self.outcome.clone())
    }
}
