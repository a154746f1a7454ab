//! Application records: identity, source, destination, and sync policy.

use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use drift_id::AppId;
use serde::{Deserialize, Serialize};

use crate::RolloutSpec;

/// A registered application: the unit of reconciliation.
///
/// Each application owns a disjoint set of managed resources; no
/// resource is ever claimed by two applications. The registry enforces
/// name+namespace uniqueness at registration time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: AppId,

    /// User-controlled label, unique per namespace.
    pub name: String,

    /// Namespace of the application record itself.
    pub namespace: String,

    pub source: SourceRef,

    pub destination: Destination,

    pub sync_policy: SyncPolicy,

    /// Approved sync windows. Empty means always open.
    #[serde(default)]
    pub sync_windows: Vec<SyncWindow>,

    /// Progressive-delivery configuration for the app's workloads.
    /// Absent means every sync applies the new revision at full weight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollout: Option<RolloutSpec>,

    pub created_at: DateTime<Utc>,
}

/// Reference into the desired-state source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    /// Root of the source repository checkout.
    pub repo: String,

    /// Path to the application's manifest tree within the repository.
    pub path: String,

    /// Symbolic target revision pointer. `None` tracks the tip of the
    /// checked-out tree.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// Where managed resources live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub cluster: String,
    pub namespace: String,
}

/// How and when reconciliation is allowed to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPolicy {
    pub mode: SyncMode,

    /// Delete resources that disappeared from the desired tree. When
    /// false they are reported as orphans and left untouched.
    #[serde(default)]
    pub prune: bool,

    /// Fold external drift back into the next change-set. When false,
    /// drift is surfaced as a conflict for operator action.
    #[serde(default)]
    pub self_heal: bool,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            mode: SyncMode::Manual,
            prune: false,
            self_heal: false,
        }
    }
}

/// Automatic syncs trigger on drift or a new revision; manual syncs
/// require an explicit operator trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    Automatic,
    Manual,
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncMode::Automatic => write!(f, "automatic"),
            SyncMode::Manual => write!(f, "manual"),
        }
    }
}

/// A daily approved window for sync execution, in UTC.
///
/// Windows may wrap midnight (`start 23:00, duration 120` covers
/// 23:00–01:00). Triggers outside every window are deferred to the next
/// open, never dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncWindow {
    /// Window open time (UTC, daily).
    pub start: NaiveTime,

    /// Window length in minutes. Bounded to one day.
    pub duration_minutes: u32,
}

impl SyncWindow {
    /// Whether `at` falls inside this window.
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        use chrono::Timelike;

        let duration = u64::from(self.duration_minutes.min(24 * 60)) * 60;
        let start_secs = u64::from(self.start.num_seconds_from_midnight());
        let at_secs = u64::from(at.time().num_seconds_from_midnight());

        let elapsed = if at_secs >= start_secs {
            at_secs - start_secs
        } else {
            // Wrapped past midnight.
            at_secs + 24 * 3600 - start_secs
        };

        elapsed < duration
    }

    /// The next instant at or after `after` at which this window is open.
    pub fn next_open(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        if self.contains(after) {
            return after;
        }

        let date = after.date_naive();
        let today_open = Utc.from_utc_datetime(&date.and_time(self.start));
        if today_open > after {
            today_open
        } else {
            Utc.from_utc_datetime(&(date + chrono::Days::new(1)).and_time(self.start))
        }
    }
}

/// Evaluate a window set: open when no windows are configured, or when
/// any window contains `at`.
pub fn windows_open(windows: &[SyncWindow], at: DateTime<Utc>) -> bool {
    windows.is_empty() || windows.iter().any(|w| w.contains(at))
}

/// Earliest next-open instant across a window set.
///
/// Returns `after` itself when the set is already open.
pub fn next_window_open(windows: &[SyncWindow], after: DateTime<Utc>) -> DateTime<Utc> {
    if windows_open(windows, after) {
        return after;
    }
    windows
        .iter()
        .map(|w| w.next_open(after))
        .min()
        .unwrap_or(after)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, h, m, 0).unwrap()
    }

    fn window(h: u32, m: u32, minutes: u32) -> SyncWindow {
        SyncWindow {
            start: NaiveTime::from_hms_opt(h, m, 0).unwrap(),
            duration_minutes: minutes,
        }
    }

    #[test]
    fn test_window_contains() {
        let w = window(9, 0, 60);
        assert!(w.contains(at(9, 0)));
        assert!(w.contains(at(9, 59)));
        assert!(!w.contains(at(10, 0)));
        assert!(!w.contains(at(8, 59)));
    }

    #[test]
    fn test_window_wraps_midnight() {
        let w = window(23, 0, 120);
        assert!(w.contains(at(23, 30)));
        assert!(w.contains(at(0, 30)));
        assert!(!w.contains(at(1, 30)));
    }

    #[test]
    fn test_next_open_later_today() {
        let w = window(14, 0, 30);
        let next = w.next_open(at(9, 0));
        assert_eq!(next, at(14, 0));
    }

    #[test]
    fn test_next_open_tomorrow() {
        let w = window(9, 0, 30);
        let next = w.next_open(at(10, 0));
        assert_eq!(next, at(9, 0) + chrono::Days::new(1));
    }

    #[test]
    fn test_no_windows_always_open() {
        assert!(windows_open(&[], at(3, 0)));
        assert_eq!(next_window_open(&[], at(3, 0)), at(3, 0));
    }

    #[test]
    fn test_earliest_window_wins() {
        let windows = vec![window(14, 0, 30), window(11, 0, 30)];
        assert_eq!(next_window_open(&windows, at(9, 0)), at(11, 0));
    }

    #[test]
    fn test_sync_policy_default_is_conservative() {
        let policy = SyncPolicy::default();
        assert_eq!(policy.mode, SyncMode::Manual);
        assert!(!policy.prune);
        assert!(!policy.self_heal);
    }
}
