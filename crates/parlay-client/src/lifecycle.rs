use std::sync::{Mutex, PoisonError};

use tokio::sync::broadcast;
use tracing::debug;

use parlay_types::events::{AppActivity, LifecycleEvent};

/// Turns raw OS activity reports into edge-triggered lifecycle events.
pub struct LifecycleMonitor {
    current: Mutex<AppActivity>,
    tx: broadcast::Sender<LifecycleEvent>,
}

impl Default for LifecycleMonitor {
    fn default() -> Self {
        Self::new(AppActivity::Active)
    }
}

impl LifecycleMonitor {
    pub fn new(initial: AppActivity) -> Self {
        let (tx, _) = broadcast::channel(16);
        Self {
            current: Mutex::new(initial),
            tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> AppActivity {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a new activity report. Returns the event emitted, if any.
    pub fn transition(&self, next: AppActivity) -> Option<LifecycleEvent> {
        let previous = {
            let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *current, next)
        };

        let event = match (previous, next) {
            (AppActivity::Background | AppActivity::Inactive, AppActivity::Active) => {
                Some(LifecycleEvent::Foregrounded)
            }
            (AppActivity::Active, AppActivity::Background | AppActivity::Inactive) => {
                Some(LifecycleEvent::Backgrounded)
            }
            _ => None,
        };

        if let Some(event) = event {
            debug!("app {:?} -> {:?}: {:?}", previous, next, event);
            let _ = self.tx.send(event);
        }
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn foreground_fires_once_per_transition() {
        let monitor = LifecycleMonitor::default();
        let mut rx = monitor.subscribe();

        assert_eq!(monitor.transition(AppActivity::Active), None);
        assert_eq!(
            monitor.transition(AppActivity::Background),
            Some(LifecycleEvent::Backgrounded)
        );
        assert_eq!(monitor.transition(AppActivity::Background), None);
        assert_eq!(monitor.transition(AppActivity::Inactive), None);
        assert_eq!(
            monitor.transition(AppActivity::Active),
            Some(LifecycleEvent::Foregrounded)
        );
        assert_eq!(monitor.transition(AppActivity::Active), None);

        assert_eq!(rx.try_recv().unwrap(), LifecycleEvent::Backgrounded);
        assert_eq!(rx.try_recv().unwrap(), LifecycleEvent::Foregrounded);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn inactive_to_active_counts_as_foreground() {
        let monitor = LifecycleMonitor::new(AppActivity::Inactive);
        assert_eq!(
            monitor.transition(AppActivity::Active),
            Some(LifecycleEvent::Foregrounded)
        );
    }
}
