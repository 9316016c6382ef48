//! Time tracking on a session.
//!
//! A session's clock is a ledger of [`WorkSession`] intervals plus a
//! running/paused flag. Only `start_tracking`, `pause` and `resume` write to
//! the ledger, which keeps at most one interval open at a time.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};

use super::{Session, TimeTrackingState, WorkSession};

/// Result of a pause/resume request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Changed,
    /// Already in the requested state; nothing was written
    NoOp,
}

/// Aggregated tracked time, computed without touching stored intervals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSummary {
    pub total: Duration,
    pub per_user: BTreeMap<String, Duration>,
    pub state: TimeTrackingState,
    pub intervals: usize,
}

impl Session {
    /// Open the first interval of a new session.
    pub fn start_tracking(&mut self, user: &str, now: DateTime<Utc>) -> Transition {
        self.resume(user, now)
    }

    /// Close the open interval.
    pub fn pause(&mut self, now: DateTime<Utc>) -> Transition {
        if self.time_tracking_state == TimeTrackingState::Paused {
            return Transition::NoOp;
        }
        for interval in self.work_sessions.iter_mut().filter(|w| w.is_open()) {
            interval.end = Some(now.max(interval.start));
        }
        self.time_tracking_state = TimeTrackingState::Paused;
        self.touch(now);
        Transition::Changed
    }

    /// Open a new interval for `user`.
    pub fn resume(&mut self, user: &str, now: DateTime<Utc>) -> Transition {
        if self.time_tracking_state == TimeTrackingState::Running {
            return Transition::NoOp;
        }
        // A paused ledger should hold no open interval; close strays from
        // hand-edited or older index files before opening a new one.
        for interval in self.work_sessions.iter_mut().filter(|w| w.is_open()) {
            interval.end = Some(now.max(interval.start));
        }
        self.work_sessions.push(WorkSession {
            user: user.to_string(),
            start: now,
            end: None,
        });
        self.time_tracking_state = TimeTrackingState::Running;
        self.touch(now);
        Transition::Changed
    }

    /// The interval currently open, if any.
    pub fn open_work_session(&self) -> Option<&WorkSession> {
        self.work_sessions.iter().find(|w| w.is_open())
    }

    /// Total and per-user time, counting an open interval up to `now`.
    pub fn time_summary(&self, now: DateTime<Utc>) -> TimeSummary {
        let mut total = Duration::zero();
        let mut per_user: BTreeMap<String, Duration> = BTreeMap::new();

        for interval in &self.work_sessions {
            let end = interval.end.unwrap_or(now);
            let elapsed = (end - interval.start).max(Duration::zero());
            total += elapsed;
            *per_user
                .entry(interval.user.clone())
                .or_insert_with(Duration::zero) += elapsed;
        }

        TimeSummary {
            total,
            per_user,
            state: self.time_tracking_state,
            intervals: self.work_sessions.len(),
        }
    }
}

/// Render a duration as `"2h 05m"` / `"12m"` / `"40s"`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.num_seconds().max(0);
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    if hours > 0 {
        format!("{}h {:02}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m", minutes)
    } else {
        format!("{}s", secs)
    }
}
