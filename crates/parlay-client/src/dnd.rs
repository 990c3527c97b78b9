//! Do-not-disturb window.
//!
//! A window is `[start, end)` in local time of day. When `start > end` it
//! wraps past midnight, e.g. 22:00-07:00 covers 23:30 and 06:59 but not 07:00
//! or 12:00. `start == end` is an empty window.

use chrono::NaiveTime;

use parlay_types::models::NotificationPreferences;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DndWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl DndWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    pub fn wraps_midnight(&self) -> bool {
        self.start > self.end
    }

    pub fn contains(&self, t: NaiveTime) -> bool {
        if self.start < self.end {
            self.start <= t && t < self.end
        } else if self.start > self.end {
            t >= self.start || t < self.end
        } else {
            false
        }
    }
}

/// Whether notifications for these preferences are muted at `now`.
pub fn in_dnd(prefs: &NotificationPreferences, now: NaiveTime) -> bool {
    prefs.dnd_enabled && DndWindow::new(prefs.dnd_start, prefs.dnd_end).contains(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn same_day_window() {
        let w = DndWindow::new(t(13, 0), t(15, 30));
        assert!(!w.wraps_midnight());
        assert!(!w.contains(t(12, 59)));
        assert!(w.contains(t(13, 0)));
        assert!(w.contains(t(14, 0)));
        assert!(w.contains(t(15, 29)));
        assert!(!w.contains(t(15, 30)));
        assert!(!w.contains(t(23, 0)));
        assert!(!w.contains(t(0, 0)));
    }

    #[test]
    fn overnight_window() {
        let w = DndWindow::new(t(22, 0), t(7, 0));
        assert!(w.wraps_midnight());
        assert!(!w.contains(t(21, 59)));
        assert!(w.contains(t(22, 0)));
        assert!(w.contains(t(23, 59)));
        assert!(w.contains(t(0, 0)));
        assert!(w.contains(t(6, 59)));
        assert!(!w.contains(t(7, 0)));
        assert!(!w.contains(t(12, 0)));
    }

    #[test]
    fn empty_window() {
        let w = DndWindow::new(t(9, 0), t(9, 0));
        assert!(!w.contains(t(9, 0)));
        assert!(!w.contains(t(3, 0)));
    }

    #[test]
    fn disabled_preferences_never_mute() {
        let mut prefs = NotificationPreferences::defaults_for(Uuid::new_v4());
        prefs.dnd_start = t(22, 0);
        prefs.dnd_end = t(7, 0);
        assert!(!in_dnd(&prefs, t(23, 0)));
        prefs.dnd_enabled = true;
        assert!(in_dnd(&prefs, t(23, 0)));
        assert!(!in_dnd(&prefs, t(8, 0)));
    }
}
