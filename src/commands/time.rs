//! Time tracking commands.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{CommandContext, Output, json};
use crate::Result;
use crate::models::{Session, TimeTrackingState, Transition, format_duration};

/// Tracked time of one session as of a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct TimeView {
    pub state: TimeTrackingState,
    pub total_seconds: i64,
    /// Formatted total, e.g. "2h 05m"
    pub total: String,
    pub per_user: BTreeMap<String, i64>,
    pub intervals: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub running_since: Option<DateTime<Utc>>,
}

impl TimeView {
    pub fn new(session: &Session, now: DateTime<Utc>) -> Self {
        let summary = session.time_summary(now);
        Self {
            state: summary.state,
            total_seconds: summary.total.num_seconds(),
            total: format_duration(summary.total),
            per_user: summary
                .per_user
                .into_iter()
                .map(|(user, d)| (user, d.num_seconds()))
                .collect(),
            intervals: summary.intervals,
            running_since: session.open_work_session().map(|w| w.start),
        }
    }
}

#[derive(Serialize)]
pub struct TimeChanged {
    pub session: String,
    /// False when the clock was already in the requested state
    pub changed: bool,
    pub time: TimeView,
}

impl Output for TimeChanged {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let verb = match (self.changed, self.time.state) {
            (true, TimeTrackingState::Running) => "Resumed",
            (true, TimeTrackingState::Paused) => "Paused",
            (false, TimeTrackingState::Running) => "Already running:",
            (false, TimeTrackingState::Paused) => "Already paused:",
        };
        format!("{} '{}' ({} tracked)", verb, self.session, self.time.total)
    }
}

#[derive(Serialize)]
pub struct TimeShown {
    pub session: String,
    pub time: TimeView,
}

impl Output for TimeShown {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let mut lines = vec![format!(
            "{}: {} ({}, {} interval(s))",
            self.session, self.time.total, self.time.state, self.time.intervals
        )];
        for (user, secs) in &self.time.per_user {
            lines.push(format!(
                "  {}: {}",
                user,
                format_duration(chrono::Duration::seconds(*secs))
            ));
        }
        lines.join("\n")
    }
}

pub fn time_pause(ctx: &CommandContext, session: Option<&str>) -> Result<TimeChanged> {
    transition(ctx, session, |s, now| s.pause(now))
}

pub fn time_resume(ctx: &CommandContext, session: Option<&str>) -> Result<TimeChanged> {
    let user = ctx.config.user.value.clone();
    transition(ctx, session, move |s, now| s.resume(&user, now))
}

fn transition(
    ctx: &CommandContext,
    session: Option<&str>,
    apply: impl FnOnce(&mut Session, DateTime<Utc>) -> Transition,
) -> Result<TimeChanged> {
    let mut store = ctx.store_mut()?;
    let name = ctx.target_session(&store, session)?;
    let now = Utc::now();

    let mut updated = store.get(&name)?.clone();
    let changed = apply(&mut updated, now) == Transition::Changed;
    if changed {
        store.update(updated, now)?;
        store.save()?;
    } else {
        ctx.reporter.warn(&format!(
            "Clock for '{}' is already {}",
            name,
            updated.time_tracking_state()
        ));
    }

    let time = TimeView::new(store.get(&name)?, now);
    Ok(TimeChanged {
        session: name,
        changed,
        time,
    })
}

pub fn time_show(ctx: &CommandContext, session: Option<&str>) -> Result<TimeShown> {
    let store = ctx.store()?;
    let name = ctx.target_session(&store, session)?;
    let time = TimeView::new(store.get(&name)?, Utc::now());
    Ok(TimeShown {
        session: name,
        time,
    })
}
