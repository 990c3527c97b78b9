use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{NaiveTime, Utc};
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use parlay_backend::StorageClient;
use parlay_backend::memory::{MemoryBackend, Operation};
use parlay_backend::rest::RestStorageClient;
use parlay_client::clock::SystemClock;
use parlay_client::picker::{ImageSource, StaticPicker};
use parlay_client::push::{LogDeepLinkHandler, StaticRegistrar};
use parlay_client::toast::LogToastSink;
use parlay_client::{Backends, ClientApp, ClientConfig, Device};
use parlay_types::api::{DevicePlatform, Session};
use parlay_types::events::AppActivity;
use parlay_types::models::{
    EventStatus, LiveEvent, Notification, NotificationKind, NotificationPreferences,
    NotificationPriority, OnboardingStatus, User, UserRole,
};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parlay=debug,parlay_client=debug,parlay_backend=info".into()),
        )
        .init();

    let config = ClientConfig::from_env().context("invalid PARLAY_* configuration")?;
    info!("config: {:?}", config);

    let backend = Arc::new(MemoryBackend::new());
    let me = seed(&backend);

    let storage: Arc<dyn StorageClient> = match &config.storage_url {
        Some(url) => {
            let token = std::env::var("PARLAY_STORAGE_TOKEN").unwrap_or_default();
            info!("using storage gateway at {}", url);
            Arc::new(RestStorageClient::new(url.clone(), token))
        }
        None => backend.clone(),
    };

    let app = ClientApp::new(
        config.clone(),
        Backends {
            data: backend.clone(),
            auth: backend.clone(),
            storage,
        },
        Device {
            picker: Arc::new(StaticPicker::selecting(vec![0xFFu8, 0xD8, 0xFF, 0xE0])),
            push: Arc::new(StaticRegistrar::new(
                Some("sim-device-token".into()),
                DevicePlatform::Ios,
            )),
            toasts: Arc::new(LogToastSink),
            links: Arc::new(LogDeepLinkHandler),
            clock: Arc::new(SystemClock),
        },
    );
    let services = app.start();

    // -- Session --
    wait_for(&mut app.session.watch(), "sign-in", |u| u.is_some()).await?;
    let user = app.session.require_user()?;
    info!("signed in: {} (admin: {})", user.username, user.is_admin());

    // -- Unread counter --
    let mut unread = app.notifications.watch_unread();
    wait_for(&mut unread, "initial unread count", |u| u.count() == 3).await?;
    info!("unread after sign-in: {}", app.notifications.unread_count());

    backend.push_notification(notification(me, "Sam accepted your bet", NotificationPriority::High));
    wait_for(&mut unread, "create event", |u| u.count() == 4).await?;
    info!("unread after new notification: {}", app.notifications.unread_count());

    let changed = app.notifications.mark_all_as_read().await?;
    info!(
        "marked {} read, unread now {}, batch calls {:?}",
        changed,
        app.notifications.unread_count(),
        backend.call_args(Operation::MarkAllRead)
    );

    let before = backend.calls(Operation::UnreadIds);
    app.lifecycle.transition(AppActivity::Background);
    app.lifecycle.transition(AppActivity::Active);
    tokio::time::sleep(Duration::from_millis(100)).await;
    info!(
        "count refetches for one foreground transition: {}",
        backend.calls(Operation::UnreadIds) - before
    );

    // -- Profile picture --
    match app.change_profile_picture(ImageSource::Library).await {
        Ok(outcome) => info!("profile picture: {:?}", outcome),
        Err(e) => warn!("profile picture failed: {}", e.user_message()),
    }
    if let Some(key) = app.session.current().and_then(|u| u.profile_picture_key) {
        let first = app.profile.profile_picture_url(&key).await;
        let second = app.profile.profile_picture_url(&key).await;
        info!(
            "profile picture URL {:?} (same twice: {}, signing requests: {})",
            first,
            first == second,
            backend.calls(Operation::SignedUrl)
        );
    }

    // -- Check-in --
    let event = LiveEvent {
        id: Uuid::new_v4(),
        title: "Derby day".into(),
        status: EventStatus::Live,
        starts_at: Utc::now(),
    };
    backend.insert_live_event(event.clone());
    let mut checked_in = app.check_ins.watch();
    let ci = app.check_ins.check_in(event.id).await?;
    info!("checked in to {} at {}", ci.event.title, ci.check_in.checked_in_at);

    backend.set_event_status(event.id, EventStatus::Completed);
    info!("event completed, waiting up to {:?} for the poll", config.checkin_poll);
    let poll_wait = config.checkin_poll + WAIT;
    match tokio::time::timeout(poll_wait, checked_in.wait_for(|c| c.is_none())).await {
        Ok(Ok(_)) => info!("check-in cleared after event ended"),
        Ok(Err(e)) => warn!("check-in watch closed: {}", e),
        Err(_) => warn!("check-in still active after {:?}", poll_wait),
    }

    // -- Account --
    match app.session.change_password("wrong password", "new password 1").await {
        Ok(()) => info!("password changed"),
        Err(e) => info!("password change rejected: {}", e.user_message()),
    }

    // -- Sign out --
    app.session.sign_out().await?;
    wait_for(&mut unread, "reset after sign-out", |u| u.count() == 0).await?;
    info!("signed out, cached URLs: {}", app.urls.len());

    for service in services {
        service.shutdown().await;
    }
    Ok(())
}

/// Seed one signed-in user with three unread notifications. Returns their id.
fn seed(backend: &MemoryBackend) -> Uuid {
    let me = Uuid::new_v4();
    backend.insert_user(User {
        id: me,
        username: "jordan".into(),
        display_name: Some("Jordan".into()),
        role: UserRole::User,
        onboarding: OnboardingStatus {
            completed: true,
            step: 4,
        },
        profile_picture_key: None,
        created_at: Utc::now(),
    });
    backend.set_session(Some(Session {
        user_id: me,
        username: "jordan".into(),
        groups: vec!["admin".into()],
        expires_at: Utc::now() + chrono::Duration::hours(1),
    }));
    backend.set_password("correct horse");

    let mut prefs = NotificationPreferences::defaults_for(me);
    prefs.dnd_enabled = true;
    prefs.dnd_start = NaiveTime::from_hms_opt(23, 0, 0).unwrap_or_default();
    prefs.dnd_end = NaiveTime::from_hms_opt(6, 0, 0).unwrap_or_default();
    backend.insert_preferences(prefs);

    for title in ["Weekly pool opened", "Alex sent a request", "Payout ready"] {
        backend.insert_notification(notification(me, title, NotificationPriority::Medium));
    }
    me
}

fn notification(user_id: Uuid, title: &str, priority: NotificationPriority) -> Notification {
    Notification {
        id: Uuid::new_v4(),
        user_id,
        kind: NotificationKind::BetResult,
        title: title.into(),
        message: title.into(),
        is_read: false,
        priority,
        action_type: Some("VIEW_BET".into()),
        action_data: Some(format!(r#"{{"betId":"{}"}}"#, Uuid::new_v4())),
        created_at: Utc::now(),
    }
}

async fn wait_for<T>(
    rx: &mut watch::Receiver<T>,
    what: &str,
    f: impl FnMut(&T) -> bool,
) -> Result<()> {
    tokio::time::timeout(WAIT, rx.wait_for(f))
        .await
        .with_context(|| format!("timed out waiting for {}", what))?
        .with_context(|| format!("{} channel closed", what))?;
    Ok(())
}
