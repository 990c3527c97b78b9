mod common;

use std::sync::Arc;

use bytes::Bytes;
use uuid::Uuid;

use parlay_backend::BackendError;
use parlay_backend::memory::{MemoryBackend, Operation};
use parlay_client::ClientConfig;
use parlay_client::clock::SystemClock;
use parlay_client::picker::{ImageSource, StaticPicker};
use parlay_client::profile::{ProfilePictureOutcome, ProfilePictureService};
use parlay_client::url_cache::SignedUrlCache;
use parlay_types::models::CurrentUser;

use common::{current_user, user};

struct Fixture {
    backend: Arc<MemoryBackend>,
    picker: Arc<StaticPicker>,
    urls: Arc<SignedUrlCache>,
    service: ProfilePictureService,
    me: CurrentUser,
}

fn fixture(picker: StaticPicker, previous_key: Option<&str>) -> Fixture {
    let backend = Arc::new(MemoryBackend::new());
    let id = Uuid::new_v4();
    let record = user(id, previous_key);
    backend.insert_user(record.clone());
    if let Some(key) = previous_key {
        backend.insert_object(key, Bytes::from_static(b"old"), "image/jpeg");
    }

    let config = ClientConfig::default();
    let clock = Arc::new(SystemClock);
    let urls = Arc::new(SignedUrlCache::new(config.signed_url_refresh_margin, clock.clone()));
    let picker = Arc::new(picker);
    let service = ProfilePictureService::new(
        backend.clone(),
        backend.clone(),
        picker.clone(),
        urls.clone(),
        clock,
        &config,
    );

    Fixture {
        backend,
        picker,
        urls,
        service,
        me: current_user(&record),
    }
}

#[tokio::test]
async fn new_picture_replaces_previous_with_one_delete() {
    let previous = "profile-pictures/old/1700000000000.jpg";
    let f = fixture(StaticPicker::selecting(vec![0xFFu8, 0xD8, 0xFF]), Some(previous));

    let outcome = f
        .service
        .change_profile_picture(&f.me, ImageSource::Library)
        .await
        .unwrap();

    let key = match outcome {
        ProfilePictureOutcome::Updated { key } => key,
        other => panic!("expected an update, got {:?}", other),
    };
    assert!(key.starts_with(&format!("profile-pictures/{}/", f.me.id)));
    assert!(key.ends_with(".jpg"));

    assert_eq!(f.backend.call_args(Operation::Remove), vec![previous.to_string()]);
    assert!(f.backend.object(previous).is_none());
    assert_eq!(
        f.backend.user(f.me.id).unwrap().profile_picture_key.as_deref(),
        Some(key.as_str())
    );
    let stored = f.backend.object(&key).unwrap();
    assert_eq!(stored.content_type, "image/jpeg");
    assert_eq!(stored.data, Bytes::from_static(&[0xFF, 0xD8, 0xFF]));
}

#[tokio::test]
async fn stale_snapshot_still_removes_current_picture() {
    let previous = "profile-pictures/old/1.jpg";
    let f = fixture(StaticPicker::selecting(vec![4u8; 8]), Some(previous));

    let first = match f
        .service
        .change_profile_picture(&f.me, ImageSource::Library)
        .await
        .unwrap()
    {
        ProfilePictureOutcome::Updated { key } => key,
        other => panic!("expected an update, got {:?}", other),
    };
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;

    // `f.me` still names the original picture.
    f.service
        .change_profile_picture(&f.me, ImageSource::Library)
        .await
        .unwrap();

    assert_eq!(
        f.backend.call_args(Operation::Remove),
        vec![previous.to_string(), first.clone()]
    );
    assert!(f.backend.object(&first).is_none());
}

#[tokio::test]
async fn first_picture_deletes_nothing() {
    let f = fixture(StaticPicker::selecting(vec![1u8, 2, 3]), None);

    let outcome = f
        .service
        .change_profile_picture(&f.me, ImageSource::Camera)
        .await
        .unwrap();

    assert!(matches!(outcome, ProfilePictureOutcome::Updated { .. }));
    assert_eq!(f.backend.calls(Operation::Remove), 0);
}

#[tokio::test]
async fn cancelled_picker_leaves_picture_unchanged() {
    let previous = "profile-pictures/old/1.jpg";
    let f = fixture(StaticPicker::cancelling(), Some(previous));

    let outcome = f
        .service
        .change_profile_picture(&f.me, ImageSource::Library)
        .await
        .unwrap();

    assert_eq!(outcome, ProfilePictureOutcome::Cancelled);
    assert_eq!(f.backend.calls(Operation::Upload), 0);
    assert_eq!(f.backend.calls(Operation::UpdateProfilePictureKey), 0);
    assert_eq!(f.backend.calls(Operation::Remove), 0);
    assert_eq!(
        f.backend.user(f.me.id).unwrap().profile_picture_key.as_deref(),
        Some(previous)
    );
}

#[tokio::test]
async fn denied_permission_never_opens_picker() {
    let f = fixture(StaticPicker::denied(), None);

    let outcome = f
        .service
        .change_profile_picture(&f.me, ImageSource::Camera)
        .await
        .unwrap();

    assert_eq!(outcome, ProfilePictureOutcome::PermissionDenied);
    assert_eq!(f.picker.picks(), 0);
}

#[tokio::test]
async fn failed_delete_of_previous_is_not_an_error() {
    let previous = "profile-pictures/old/1.jpg";
    let f = fixture(StaticPicker::selecting(vec![7u8; 16]), Some(previous));
    f.backend
        .fail_next(Operation::Remove, BackendError::Storage("bucket busy".into()));

    let outcome = f
        .service
        .change_profile_picture(&f.me, ImageSource::Library)
        .await
        .unwrap();

    assert!(matches!(outcome, ProfilePictureOutcome::Updated { .. }));
    assert_eq!(f.backend.calls(Operation::Remove), 1);
}

#[tokio::test]
async fn failed_key_update_removes_new_upload() {
    let previous = "profile-pictures/old/1.jpg";
    let f = fixture(StaticPicker::selecting(vec![7u8; 16]), Some(previous));
    f.backend.fail_next(
        Operation::UpdateProfilePictureKey,
        BackendError::Network("offline".into()),
    );

    let result = f
        .service
        .change_profile_picture(&f.me, ImageSource::Library)
        .await;

    assert!(result.is_err());
    let removed = f.backend.call_args(Operation::Remove);
    assert_eq!(removed.len(), 1);
    assert_ne!(removed[0], previous);
    assert!(f.backend.object(previous).is_some());
}

#[tokio::test]
async fn signed_url_is_requested_once_per_key() {
    let key = "profile-pictures/someone/1.jpg";
    let f = fixture(StaticPicker::cancelling(), None);

    let first = f.service.profile_picture_url(key).await.unwrap();
    let second = f.service.profile_picture_url(key).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(f.backend.calls(Operation::SignedUrl), 1);
}

#[tokio::test]
async fn signing_failure_yields_none_and_is_not_cached() {
    let key = "profile-pictures/someone/1.jpg";
    let f = fixture(StaticPicker::cancelling(), None);
    f.backend
        .fail_next(Operation::SignedUrl, BackendError::Network("offline".into()));

    assert_eq!(f.service.profile_picture_url(key).await, None);
    assert!(f.service.profile_picture_url(key).await.is_some());
    assert_eq!(f.backend.calls(Operation::SignedUrl), 2);
}

#[tokio::test]
async fn replacing_picture_invalidates_cached_url() {
    let previous = "profile-pictures/old/1.jpg";
    let f = fixture(StaticPicker::selecting(vec![9u8; 8]), Some(previous));
    f.service.profile_picture_url(previous).await.unwrap();
    assert_eq!(f.urls.len(), 1);

    f.service
        .change_profile_picture(&f.me, ImageSource::Library)
        .await
        .unwrap();

    assert!(f.urls.is_empty());
}
