//! Unread notification counter.
//!
//! One integer kept in step with the server's unread state without polling.
//! The counter is the size of the set of notification ids the client believes
//! unread: seeded by the unread query when a user attaches, moved by the
//! create/update subscriptions, and re-seeded whenever something suggests it
//! may have drifted (subscription error, app returning to the foreground, a
//! rejected mutation). An update only moves the counter when it flips an id's
//! known state, so repeated or echoed read updates are no-ops.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use parlay_backend::{BackendError, DataClient, ListenerHandle, SubscriptionHandler, spawn_listener};
use parlay_types::events::LifecycleEvent;
use parlay_types::models::{CurrentUser, Notification, NotificationPreferences, NotificationPriority};

use crate::clock::Clock;
use crate::dnd::in_dnd;
use crate::error::{ClientError, Result};
use crate::optimistic::optimistic;
use crate::service::ServiceHandle;
use crate::toast::{Toast, ToastSink};

#[derive(Clone)]
pub struct NotificationCenter {
    inner: Arc<Inner>,
}

struct Inner {
    data: Arc<dyn DataClient>,
    toasts: Arc<dyn ToastSink>,
    clock: Arc<dyn Clock>,
    unread: watch::Sender<UnreadSet>,
    attachment: Mutex<Option<Attachment>>,
    preferences: Mutex<Option<NotificationPreferences>>,
}

/// Notification ids currently counted as unread.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnreadSet(HashSet<Uuid>);

impl UnreadSet {
    pub fn count(&self) -> u32 {
        u32::try_from(self.0.len()).unwrap_or(u32::MAX)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.0.contains(&id)
    }
}

impl FromIterator<Uuid> for UnreadSet {
    fn from_iter<I: IntoIterator<Item = Uuid>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

struct Attachment {
    user_id: Uuid,
    create: Option<ListenerHandle>,
    update: Option<ListenerHandle>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Inner {
    fn attached_user(&self) -> Option<Uuid> {
        lock(&self.attachment).as_ref().map(|a| a.user_id)
    }

    fn is_attached_to(&self, user_id: Uuid) -> bool {
        self.attached_user() == Some(user_id)
    }

    /// Count `id` as unread. False if it already was.
    fn mark_unread(&self, id: Uuid) -> bool {
        self.unread.send_if_modified(|set| set.0.insert(id))
    }

    /// Stop counting `id`. False if it was not counted.
    fn mark_read(&self, id: Uuid) -> bool {
        self.unread.send_if_modified(|set| set.0.remove(&id))
    }

    async fn fetch_unread(&self, user_id: Uuid) -> parlay_backend::Result<UnreadSet> {
        let ids = self.data.unread_notification_ids(user_id).await?;
        Ok(ids.into_iter().collect())
    }

    /// Replace the counter with the server's unread set. Failures keep the current value.
    async fn reseed(&self, user_id: Uuid) -> Option<u32> {
        match self.fetch_unread(user_id).await {
            Ok(set) => {
                if !self.is_attached_to(user_id) {
                    debug!("discarding unread count for detached user {}", user_id);
                    return None;
                }
                let count = set.count();
                self.unread.send_replace(set);
                Some(count)
            }
            Err(e) => {
                warn!("unread count query failed for {}: {}", user_id, e);
                None
            }
        }
    }

    fn should_toast(&self, n: &Notification) -> bool {
        if n.priority == NotificationPriority::Low {
            return false;
        }
        match lock(&self.preferences).as_ref() {
            Some(prefs) => prefs.allows(n.kind) && !in_dnd(prefs, self.clock.local_time()),
            None => true,
        }
    }
}

struct CreateHandler {
    inner: Weak<Inner>,
    user_id: Uuid,
}

#[async_trait]
impl SubscriptionHandler<Notification> for CreateHandler {
    async fn on_event(&self, n: Notification) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        if n.user_id != self.user_id || !inner.is_attached_to(self.user_id) {
            return;
        }
        if n.is_read || !inner.mark_unread(n.id) {
            return;
        }

        if inner.should_toast(&n) {
            inner.toasts.show(Toast::from_notification(&n));
        }
    }

    async fn on_error(&self, _error: BackendError) {
        if let Some(inner) = self.inner.upgrade() {
            inner.reseed(self.user_id).await;
        }
    }
}

struct UpdateHandler {
    inner: Weak<Inner>,
    user_id: Uuid,
}

#[async_trait]
impl SubscriptionHandler<Notification> for UpdateHandler {
    async fn on_event(&self, n: Notification) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        if n.user_id != self.user_id || !inner.is_attached_to(self.user_id) {
            return;
        }

        if n.is_read {
            inner.mark_read(n.id);
        } else if inner.mark_unread(n.id) {
            // Read -> unread is not something the app does; count it anyway.
            debug!("notification {} became unread", n.id);
        }
    }

    async fn on_error(&self, _error: BackendError) {
        if let Some(inner) = self.inner.upgrade() {
            inner.reseed(self.user_id).await;
        }
    }
}

impl NotificationCenter {
    pub fn new(
        data: Arc<dyn DataClient>,
        toasts: Arc<dyn ToastSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (unread, _) = watch::channel(UnreadSet::default());
        Self {
            inner: Arc::new(Inner {
                data,
                toasts,
                clock,
                unread,
                attachment: Mutex::new(None),
                preferences: Mutex::new(None),
            }),
        }
    }

    pub fn unread_count(&self) -> u32 {
        self.inner.unread.borrow().count()
    }

    pub fn watch_unread(&self) -> watch::Receiver<UnreadSet> {
        self.inner.unread.subscribe()
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.inner.attached_user()
    }

    /// Start tracking `user_id`: seed the count, load preferences, open the
    /// create and update subscriptions. Attaching to a different user detaches
    /// the previous one first.
    pub async fn attach(&self, user_id: Uuid) {
        match self.inner.attached_user() {
            Some(current) if current == user_id => return,
            Some(_) => self.detach(),
            None => {}
        }

        *lock(&self.inner.attachment) = Some(Attachment {
            user_id,
            create: None,
            update: None,
        });
        info!("notification center attached to {}", user_id);

        self.inner.reseed(user_id).await;

        match self.inner.data.get_notification_preferences(user_id).await {
            Ok(prefs) => {
                *lock(&self.inner.preferences) = prefs;
            }
            Err(e) => warn!("could not load notification preferences: {}", e),
        }

        let create = match self.inner.data.on_create_notification(user_id).await {
            Ok(sub) => Some(spawn_listener(
                "notification create",
                sub,
                Arc::new(CreateHandler {
                    inner: Arc::downgrade(&self.inner),
                    user_id,
                }),
            )),
            Err(e) => {
                warn!("could not subscribe to new notifications: {}", e);
                None
            }
        };

        let update = match self.inner.data.on_update_notification(user_id).await {
            Ok(sub) => Some(spawn_listener(
                "notification update",
                sub,
                Arc::new(UpdateHandler {
                    inner: Arc::downgrade(&self.inner),
                    user_id,
                }),
            )),
            Err(e) => {
                warn!("could not subscribe to notification updates: {}", e);
                None
            }
        };

        let mut attachment = lock(&self.inner.attachment);
        match attachment.as_mut() {
            Some(a) if a.user_id == user_id => {
                a.create = create;
                a.update = update;
            }
            // Detached or re-attached while subscribing; the handles drop here.
            _ => debug!("attach for {} superseded", user_id),
        }
    }

    /// Stop tracking: dispose both subscriptions and reset the counter.
    pub fn detach(&self) {
        let previous = lock(&self.inner.attachment).take();
        if let Some(a) = previous {
            info!("notification center detached from {}", a.user_id);
        }
        *lock(&self.inner.preferences) = None;
        self.inner.unread.send_replace(UnreadSet::default());
    }

    /// Re-read the authoritative count. Returns the new value on success.
    pub async fn refresh(&self) -> Option<u32> {
        let user_id = self.inner.attached_user()?;
        self.inner.reseed(user_id).await
    }

    pub async fn handle_lifecycle(&self, event: LifecycleEvent) {
        if event == LifecycleEvent::Foregrounded {
            self.refresh().await;
        }
    }

    /// Mark one notification read, decrementing locally if it was counted as
    /// unread. A rejected update re-seeds the count from the server.
    pub async fn mark_as_read(&self, id: Uuid) -> Result<()> {
        let user_id = self.inner.attached_user().ok_or(ClientError::NotSignedIn)?;
        let inner = &self.inner;

        let counted = inner.unread.borrow().contains(id);
        if !counted {
            debug!("notification {} already read locally", id);
            if let Err(e) = inner.data.mark_notification_read(id).await {
                inner.reseed(user_id).await;
                return Err(e.into());
            }
            return Ok(());
        }

        optimistic(
            &inner.unread,
            |set| {
                set.0.remove(&id);
            },
            inner.data.mark_notification_read(id),
            || inner.fetch_unread(user_id),
        )
        .await?;
        Ok(())
    }

    /// Mark everything read, zeroing the counter locally. A rejected batch
    /// update re-seeds the count from the server. Returns how many changed.
    pub async fn mark_all_as_read(&self) -> Result<u32> {
        let user_id = self.inner.attached_user().ok_or(ClientError::NotSignedIn)?;
        let inner = &self.inner;

        let changed = optimistic(
            &inner.unread,
            |set| set.0.clear(),
            inner.data.mark_all_notifications_read(user_id),
            || inner.fetch_unread(user_id),
        )
        .await?;
        Ok(changed)
    }

    /// Follow the session: attach on sign-in, detach on sign-out or user
    /// change, refetch on every foreground transition.
    pub fn spawn(
        &self,
        mut users: watch::Receiver<Option<CurrentUser>>,
        mut lifecycle: broadcast::Receiver<LifecycleEvent>,
    ) -> ServiceHandle {
        let center = self.clone();
        ServiceHandle::spawn("notification center", move |cancel| async move {
            let initial = users.borrow_and_update().as_ref().map(|u| u.id);
            center.follow(initial).await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = users.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let user_id = users.borrow_and_update().as_ref().map(|u| u.id);
                        center.follow(user_id).await;
                    }
                    event = lifecycle.recv() => match event {
                        Ok(event) => center.handle_lifecycle(event).await,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("missed {} lifecycle events, refreshing", n);
                            center.refresh().await;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            center.detach();
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
