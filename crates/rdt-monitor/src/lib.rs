//! rdt-monitor
//!
//! The journey lifecycle state machine and its scheduling policy. Pure and
//! side-effect-free: every function here takes the facts it needs and
//! returns a decision: the store does the writing, the orchestrator does the
//! calling.

use chrono::{DateTime, Duration, Utc};
use rdt_schemas::MonitoringStatus;

pub const DEFAULT_TICK_INTERVAL_SECS: i64 = 300;
const RID_RESOLUTION_WINDOW: i64 = 48 * 3600;

/// Raised when a caller attempts a transition outside the permitted set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: MonitoringStatusKind,
    pub to: MonitoringStatusKind,
}

/// A lightweight, comparable mirror of `MonitoringStatus` for error payloads,
/// so `InvalidTransition` stays `Copy` without pulling the schemas enum in.
pub type MonitoringStatusKind = &'static str;

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid transition: {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for InvalidTransition {}

/// The permitted transition set:
/// `pending_rid -> {active, cancelled}`, `active -> {delayed, completed, cancelled}`,
/// `delayed -> {completed, cancelled}`. `completed`/`cancelled` are terminal.
pub fn validate_transition(from: MonitoringStatus, to: MonitoringStatus) -> Result<(), InvalidTransition> {
    use MonitoringStatus::*;
    let ok = matches!(
        (from, to),
        (PendingRid, Active) | (PendingRid, Cancelled) |
        (Active, Delayed) | (Active, Completed) | (Active, Cancelled) |
        (Delayed, Completed) | (Delayed, Cancelled)
    );
    if ok {
        Ok(())
    } else {
        Err(InvalidTransition { from: from.as_str(), to: to.as_str() })
    }
}

/// The scheduling policy the orchestrator and registration path consult for
/// `next_check_at`. Carries only the tick cadence; everything else is a pure
/// function of its arguments.
#[derive(Debug, Clone, Copy)]
pub struct JourneyMonitor {
    tick_interval: Duration,
}

impl JourneyMonitor {
    pub fn new(tick_interval: Duration) -> Self {
        JourneyMonitor { tick_interval }
    }

    pub fn with_default_interval() -> Self {
        JourneyMonitor { tick_interval: Duration::seconds(DEFAULT_TICK_INTERVAL_SECS) }
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// On registration: `departure - 48h` if more than 48h away, else `now + tick_interval`.
    pub fn next_check_at_on_registration(
        &self,
        now: DateTime<Utc>,
        scheduled_departure: DateTime<Utc>,
    ) -> DateTime<Utc> {
        if scheduled_departure - now > Duration::seconds(RID_RESOLUTION_WINDOW) {
            scheduled_departure - Duration::seconds(RID_RESOLUTION_WINDOW)
        } else {
            now + self.tick_interval
        }
    }

    /// On RID resolution: immediate recheck on the next tick, status moves to `active`.
    pub fn next_check_at_on_rid_resolution(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now
    }

    /// Periodic touch without a state change: `now + tick_interval`.
    pub fn next_check_at_on_periodic_touch(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.tick_interval
    }

    /// Terminal states always clear `next_check_at`.
    pub fn next_check_at_on_terminal() -> Option<DateTime<Utc>> {
        None
    }

    /// Validates a transition and computes the resulting `next_check_at` in one
    /// call, following the scheduling policy for the destination state.
    pub fn apply_transition(
        &self,
        from: MonitoringStatus,
        to: MonitoringStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, InvalidTransition> {
        validate_transition(from, to)?;
        Ok(if to.is_terminal() {
            Self::next_check_at_on_terminal()
        } else {
            match to {
                MonitoringStatus::Active => Some(self.next_check_at_on_rid_resolution(now)),
                _ => Some(self.next_check_at_on_periodic_touch(now)),
            }
        })
    }
}

impl Default for JourneyMonitor {
    fn default() -> Self {
        Self::with_default_interval()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn dt(y: i32, m: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, mi, s).unwrap()
    }

    #[test]
    fn permitted_transitions_from_pending_rid() {
        assert!(validate_transition(MonitoringStatus::PendingRid, MonitoringStatus::Active).is_ok());
        assert!(validate_transition(MonitoringStatus::PendingRid, MonitoringStatus::Cancelled).is_ok());
        assert!(validate_transition(MonitoringStatus::PendingRid, MonitoringStatus::Delayed).is_err());
        assert!(validate_transition(MonitoringStatus::PendingRid, MonitoringStatus::Completed).is_err());
    }

    #[test]
    fn permitted_transitions_from_active_and_delayed() {
        assert!(validate_transition(MonitoringStatus::Active, MonitoringStatus::Delayed).is_ok());
        assert!(validate_transition(MonitoringStatus::Active, MonitoringStatus::Completed).is_ok());
        assert!(validate_transition(MonitoringStatus::Active, MonitoringStatus::Cancelled).is_ok());
        assert!(validate_transition(MonitoringStatus::Delayed, MonitoringStatus::Completed).is_ok());
        assert!(validate_transition(MonitoringStatus::Delayed, MonitoringStatus::Cancelled).is_ok());
        assert!(validate_transition(MonitoringStatus::Delayed, MonitoringStatus::Active).is_err());
    }

    #[test]
    fn terminal_states_accept_no_transitions() {
        assert!(validate_transition(MonitoringStatus::Completed, MonitoringStatus::Active).is_err());
        assert!(validate_transition(MonitoringStatus::Cancelled, MonitoringStatus::Active).is_err());
    }

    #[test]
    fn registration_more_than_48h_out_sets_t_minus_48h() {
        let monitor = JourneyMonitor::with_default_interval();
        let now = dt(2026, 1, 15, 8, 30, 0);
        let departure = dt(2026, 1, 20, 8, 0, 0);
        let next = monitor.next_check_at_on_registration(now, departure);
        assert_eq!(next, dt(2026, 1, 18, 8, 0, 0));
    }

    #[test]
    fn registration_within_48h_sets_now_plus_tick_interval() {
        let monitor = JourneyMonitor::with_default_interval();
        let now = dt(2026, 1, 15, 8, 30, 0);
        let departure = now + Duration::hours(1);
        let next = monitor.next_check_at_on_registration(now, departure);
        assert!(next >= now && next <= now + Duration::seconds(DEFAULT_TICK_INTERVAL_SECS));
    }

    #[test]
    fn rid_resolution_sets_next_check_to_now() {
        let monitor = JourneyMonitor::with_default_interval();
        let now = dt(2026, 1, 18, 8, 0, 0);
        assert_eq!(monitor.next_check_at_on_rid_resolution(now), now);
    }

    #[test]
    fn apply_transition_to_terminal_clears_next_check_at() {
        let monitor = JourneyMonitor::with_default_interval();
        let now = dt(2026, 1, 15, 13, 0, 0);
        let next = monitor
            .apply_transition(MonitoringStatus::Active, MonitoringStatus::Completed, now)
            .unwrap();
        assert_eq!(next, None);
    }

    #[test]
    fn apply_transition_rejects_invalid_move() {
        let monitor = JourneyMonitor::with_default_interval();
        let now = dt(2026, 1, 15, 13, 0, 0);
        let err = monitor
            .apply_transition(MonitoringStatus::Completed, MonitoringStatus::Active, now)
            .unwrap_err();
        assert_eq!(err.from, "completed");
        assert_eq!(err.to, "active");
    }
}
