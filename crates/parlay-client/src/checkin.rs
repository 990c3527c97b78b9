//! Mirror of the signed-in user's active event check-in.
//!
//! The mirror follows the backend's check-in snapshot subscription and a
//! periodic poll of the event itself, so a check-in disappears once its event
//! completes or is cancelled even if nobody deactivates the record.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use parlay_backend::{
    BackendError, DataClient, ListenerHandle, SubscriptionHandler, spawn_listener,
};
use parlay_types::models::{CheckedInEvent, CurrentUser, EventCheckIn, LiveEvent};

use crate::error::{ClientError, Result};
use crate::service::ServiceHandle;

#[derive(Clone)]
pub struct CheckInTracker {
    inner: Arc<Inner>,
}

struct Inner {
    data: Arc<dyn DataClient>,
    poll_interval: Duration,
    current: watch::Sender<Option<CheckedInEvent>>,
    attachment: Mutex<Option<Attachment>>,
    /// Check-ins believed active. Grown by snapshots and local creates,
    /// shrunk only by explicit deactivation (ours or a snapshot's).
    known_active: Mutex<HashSet<Uuid>>,
}

struct Attachment {
    user_id: Uuid,
    listener: Option<ListenerHandle>,
    poll: Option<ServiceHandle>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The active check-in with the latest `checked_in_at`.
fn latest_active(check_ins: &[EventCheckIn]) -> Option<&EventCheckIn> {
    check_ins
        .iter()
        .filter(|c| c.is_active)
        .max_by_key(|c| c.checked_in_at)
}

impl Inner {
    fn attached_user(&self) -> Option<Uuid> {
        lock(&self.attachment).as_ref().map(|a| a.user_id)
    }

    fn is_attached_to(&self, user_id: Uuid) -> bool {
        self.attached_user() == Some(user_id)
    }

    fn clear(&self) {
        self.current.send_if_modified(|current| current.take().is_some());
    }

    fn active_check_in_id(&self) -> Option<Uuid> {
        self.current.borrow().as_ref().map(|c| c.check_in.id)
    }

    /// Replace the mirror from a fresh list of the user's check-ins.
    async fn apply_snapshot(&self, user_id: Uuid, check_ins: Vec<EventCheckIn>) {
        {
            let mut known = lock(&self.known_active);
            for c in &check_ins {
                if c.is_active {
                    known.insert(c.id);
                } else {
                    known.remove(&c.id);
                }
            }
        }

        let Some(active) = latest_active(&check_ins).cloned() else {
            if self.is_attached_to(user_id) {
                self.clear();
            }
            return;
        };

        match self.data.get_live_event(active.event_id).await {
            Ok(event) => {
                if self.is_attached_to(user_id) {
                    self.publish(active, event);
                }
            }
            Err(e) => warn!("could not load event {}: {}", active.event_id, e),
        }
    }

    fn publish(&self, check_in: EventCheckIn, event: Option<LiveEvent>) {
        match event {
            Some(event) if !event.status.is_terminal() => {
                self.current.send_if_modified(|current| {
                    let next = CheckedInEvent { check_in, event };
                    if current.as_ref() == Some(&next) {
                        return false;
                    }
                    *current = Some(next);
                    true
                });
            }
            Some(event) => {
                debug!("event {} is {:?}, not mirroring check-in", event.id, event.status);
                self.clear();
            }
            None => {
                warn!("check-in {} points at a missing event", check_in.id);
                self.clear();
            }
        }
    }

    /// Re-read the mirrored event; clear once it has ended.
    async fn poll_once(&self) {
        let mirrored = self.current.borrow().clone();
        let Some(mirrored) = mirrored else {
            return;
        };

        let event = match self.data.get_live_event(mirrored.event.id).await {
            Ok(event) => event,
            Err(e) => {
                warn!("event poll failed for {}: {}", mirrored.event.id, e);
                return;
            }
        };

        // The check-in may have changed while the query was in flight.
        if self.active_check_in_id() != Some(mirrored.check_in.id) {
            return;
        }
        if let Some(event) = &event {
            if event.status.is_terminal() {
                info!("event {} ended ({:?}), clearing check-in", event.id, event.status);
            }
        }
        self.publish(mirrored.check_in, event);
    }
}

struct SnapshotHandler {
    inner: Weak<Inner>,
    user_id: Uuid,
}

#[async_trait]
impl SubscriptionHandler<Vec<EventCheckIn>> for SnapshotHandler {
    async fn on_event(&self, check_ins: Vec<EventCheckIn>) {
        if let Some(inner) = self.inner.upgrade() {
            inner.apply_snapshot(self.user_id, check_ins).await;
        }
    }

    async fn on_error(&self, error: BackendError) {
        warn!("check-in subscription error for {}: {}", self.user_id, error);
    }
}

fn spawn_poll(inner: Weak<Inner>, period: Duration) -> ServiceHandle {
    ServiceHandle::spawn("check-in poll", move |cancel| async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let Some(inner) = inner.upgrade() else { break };
                    inner.poll_once().await;
                }
            }
        }
    })
}

impl CheckInTracker {
    pub fn new(data: Arc<dyn DataClient>, poll_interval: Duration) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                data,
                poll_interval,
                current,
                attachment: Mutex::new(None),
                known_active: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn current(&self) -> Option<CheckedInEvent> {
        self.inner.current.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Option<CheckedInEvent>> {
        self.inner.current.subscribe()
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.inner.attached_user()
    }

    /// Follow `user_id`'s check-ins and start the event poll.
    pub async fn attach(&self, user_id: Uuid) {
        match self.inner.attached_user() {
            Some(current) if current == user_id => return,
            Some(_) => self.detach(),
            None => {}
        }

        *lock(&self.inner.attachment) = Some(Attachment {
            user_id,
            listener: None,
            poll: None,
        });
        info!("check-in tracker attached to {}", user_id);

        let listener = match self.inner.data.observe_check_ins(user_id).await {
            Ok(sub) => Some(spawn_listener(
                "check-in snapshots",
                sub,
                Arc::new(SnapshotHandler {
                    inner: Arc::downgrade(&self.inner),
                    user_id,
                }),
            )),
            Err(e) => {
                warn!("could not observe check-ins: {}", e);
                None
            }
        };
        let poll = spawn_poll(Arc::downgrade(&self.inner), self.inner.poll_interval);

        let mut attachment = lock(&self.inner.attachment);
        match attachment.as_mut() {
            Some(a) if a.user_id == user_id => {
                a.listener = listener;
                a.poll = Some(poll);
            }
            _ => debug!("check-in attach for {} superseded", user_id),
        }
    }

    /// Stop the subscription and poll, and forget the mirrored check-in.
    pub fn detach(&self) {
        if let Some(a) = lock(&self.inner.attachment).take() {
            info!("check-in tracker detached from {}", a.user_id);
        }
        lock(&self.inner.known_active).clear();
        self.inner.clear();
    }

    /// Check in to `event_id`. Any check-in already active is deactivated
    /// first, so the user has at most one.
    pub async fn check_in(&self, event_id: Uuid) -> Result<CheckedInEvent> {
        let user_id = self.inner.attached_user().ok_or(ClientError::NotSignedIn)?;

        let event = self
            .inner
            .data
            .get_live_event(event_id)
            .await?
            .ok_or_else(|| BackendError::NotFound(format!("event {}", event_id)))?;
        if event.status.is_terminal() {
            return Err(ClientError::InvalidInput(format!(
                "\"{}\" has already ended.",
                event.title
            )));
        }

        self.deactivate_known().await?;

        let check_in = self.inner.data.create_check_in(user_id, event_id).await?;
        lock(&self.inner.known_active).insert(check_in.id);
        info!("checked in to {} ({})", event.title, check_in.id);

        let checked_in = CheckedInEvent { check_in, event };
        if self.inner.is_attached_to(user_id) {
            self.inner.publish(checked_in.check_in.clone(), Some(checked_in.event.clone()));
        }
        Ok(checked_in)
    }

    pub async fn check_out(&self) -> Result<()> {
        self.inner.attached_user().ok_or(ClientError::NotSignedIn)?;
        self.deactivate_known().await?;
        self.inner.clear();
        Ok(())
    }

    async fn deactivate_known(&self) -> Result<()> {
        let mut ids: Vec<Uuid> = lock(&self.inner.known_active).iter().copied().collect();
        if let Some(id) = self.inner.active_check_in_id() {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }

        for id in ids {
            match self.inner.data.deactivate_check_in(id).await {
                Ok(()) => debug!("deactivated check-in {}", id),
                Err(BackendError::NotFound(_)) => debug!("check-in {} already gone", id),
                Err(e) => return Err(e.into()),
            }
            lock(&self.inner.known_active).remove(&id);
        }
        Ok(())
    }

    /// Follow the session: attach on sign-in, detach on sign-out.
    pub fn spawn(&self, mut users: watch::Receiver<Option<CurrentUser>>) -> ServiceHandle {
        let tracker = self.clone();
        ServiceHandle::spawn("check-in tracker", move |cancel| async move {
            let initial = users.borrow_and_update().as_ref().map(|u| u.id);
            tracker.follow(initial).await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = users.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let user_id = users.borrow_and_update().as_ref().map(|u| u.id);
                        tracker.follow(user_id).await;
                    }
                }
            }
            tracker.detach();
        })
    }

    async fn follow(&self, user_id: Option<Uuid>) {
        match user_id {
            Some(id) => self.attach(id).await,
            None => {
                if self.inner.attached_user().is_some() {
                    self.detach();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn check_in(secs: i64, is_active: bool) -> EventCheckIn {
        EventCheckIn {
            id: Uuid::new_v4(),
            user_id: Uuid::nil(),
            event_id: Uuid::new_v4(),
            is_active,
            checked_in_at: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
        }
    }

    #[test]
    fn latest_active_wins() {
        let older = check_in(0, true);
        let newer = check_in(60, true);
        let newest_inactive = check_in(120, false);
        let list = vec![older, newer.clone(), newest_inactive];

        assert_eq!(latest_active(&list), Some(&newer));
    }

    #[test]
    fn nothing_active() {
        assert_eq!(latest_active(&[check_in(0, false)]), None);
        assert_eq!(latest_active(&[]), None);
    }
}
