mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use parlay_backend::memory::{MemoryBackend, Operation, RealtimeChannel};
use parlay_client::ClientError;
use parlay_client::checkin::CheckInTracker;
use parlay_types::models::{EventCheckIn, EventStatus};

use common::{eventually, live_event, settle};

const POLL: Duration = Duration::from_secs(30);

fn setup() -> (Arc<MemoryBackend>, CheckInTracker, Uuid) {
    let backend = Arc::new(MemoryBackend::new());
    let tracker = CheckInTracker::new(backend.clone(), POLL);
    (backend, tracker, Uuid::new_v4())
}

fn active_count(backend: &MemoryBackend, user_id: Uuid) -> usize {
    backend
        .check_ins(user_id)
        .iter()
        .filter(|c| c.is_active)
        .count()
}

#[tokio::test(start_paused = true)]
async fn poll_clears_check_in_once_event_ends() {
    let (backend, tracker, me) = setup();
    let event = live_event("Derby", EventStatus::Live);
    backend.insert_live_event(event.clone());

    tracker.attach(me).await;
    tracker.check_in(event.id).await.unwrap();
    settle().await;
    assert_eq!(tracker.current().unwrap().event.id, event.id);

    backend.set_event_status(event.id, EventStatus::Completed);
    tokio::time::sleep(Duration::from_secs(10)).await;
    settle().await;
    assert!(tracker.current().is_some());

    tokio::time::sleep(Duration::from_secs(25)).await;
    eventually(|| tracker.current().is_none()).await;
    assert!(backend.calls(Operation::GetLiveEvent) >= 2);
}

#[tokio::test(start_paused = true)]
async fn poll_picks_up_status_changes() {
    let (backend, tracker, me) = setup();
    let event = live_event("Final", EventStatus::Upcoming);
    backend.insert_live_event(event.clone());
    tracker.attach(me).await;
    tracker.check_in(event.id).await.unwrap();

    backend.set_event_status(event.id, EventStatus::Live);
    tokio::time::sleep(POLL + Duration::from_secs(1)).await;
    eventually(|| {
        tracker
            .current()
            .is_some_and(|c| c.event.status == EventStatus::Live)
    })
    .await;
}

#[tokio::test]
async fn at_most_one_active_check_in() {
    let (backend, tracker, me) = setup();
    let first = live_event("Early game", EventStatus::Live);
    let second = live_event("Late game", EventStatus::Upcoming);
    backend.insert_live_event(first.clone());
    backend.insert_live_event(second.clone());
    tracker.attach(me).await;

    tracker.check_in(first.id).await.unwrap();
    tracker.check_in(second.id).await.unwrap();

    assert_eq!(active_count(&backend, me), 1);
    let active = backend
        .check_ins(me)
        .into_iter()
        .find(|c| c.is_active)
        .unwrap();
    assert_eq!(active.event_id, second.id);
    eventually(|| tracker.current().is_some_and(|c| c.event.id == second.id)).await;
}

#[tokio::test]
async fn existing_active_check_in_is_mirrored_on_attach() {
    let (backend, tracker, me) = setup();
    let event = live_event("Derby", EventStatus::Live);
    backend.insert_live_event(event.clone());
    backend.insert_check_in(EventCheckIn {
        id: Uuid::new_v4(),
        user_id: me,
        event_id: event.id,
        is_active: true,
        checked_in_at: Utc::now(),
    });

    tracker.attach(me).await;
    eventually(|| tracker.current().is_some_and(|c| c.event.id == event.id)).await;

    // Checking in elsewhere also retires the record found on attach.
    let other = live_event("Cup tie", EventStatus::Live);
    backend.insert_live_event(other.clone());
    tracker.check_in(other.id).await.unwrap();
    assert_eq!(active_count(&backend, me), 1);
}

#[tokio::test]
async fn check_out_clears_mirror() {
    let (backend, tracker, me) = setup();
    let event = live_event("Derby", EventStatus::Live);
    backend.insert_live_event(event.clone());
    tracker.attach(me).await;
    tracker.check_in(event.id).await.unwrap();

    tracker.check_out().await.unwrap();
    assert!(tracker.current().is_none());
    assert_eq!(active_count(&backend, me), 0);

    settle().await;
    assert!(tracker.current().is_none());
}

#[tokio::test]
async fn ended_event_is_rejected() {
    let (backend, tracker, me) = setup();
    let event = live_event("Yesterday", EventStatus::Completed);
    backend.insert_live_event(event.clone());
    tracker.attach(me).await;

    let err = tracker.check_in(event.id).await.unwrap_err();
    assert!(matches!(err, ClientError::InvalidInput(_)));
    assert_eq!(backend.calls(Operation::CreateCheckIn), 0);
}

#[tokio::test]
async fn check_in_requires_attached_user() {
    let (backend, tracker, _) = setup();
    let event = live_event("Derby", EventStatus::Live);
    backend.insert_live_event(event.clone());

    let err = tracker.check_in(event.id).await.unwrap_err();
    assert_eq!(err, ClientError::NotSignedIn);
}

#[tokio::test]
async fn detach_stops_following() {
    let (backend, tracker, me) = setup();
    let event = live_event("Derby", EventStatus::Live);
    backend.insert_live_event(event.clone());
    tracker.attach(me).await;
    tracker.check_in(event.id).await.unwrap();

    tracker.detach();
    assert!(tracker.current().is_none());
    eventually(|| backend.subscriber_count(RealtimeChannel::CheckIns, me) == 0).await;
}
