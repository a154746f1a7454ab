//! Metric analysis configuration, samples, and verdicts.

use chrono::{DateTime, Utc};
use drift_id::AnalysisRunId;
use serde::{Deserialize, Serialize};

/// Analysis configuration attached to a rollout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSpec {
    /// Metric queries evaluated each run.
    pub queries: Vec<MetricQuery>,

    /// How per-query outcomes aggregate into one verdict.
    #[serde(default)]
    pub policy: VerdictPolicy,

    /// Minimum samples a query must return to be conclusive.
    pub min_samples: u32,

    /// Observation window per query, in seconds.
    pub window_seconds: u64,

    /// Interval between analysis runs while paused at a step.
    pub interval_seconds: u64,
}

impl Default for AnalysisSpec {
    fn default() -> Self {
        Self {
            queries: Vec::new(),
            policy: VerdictPolicy::default(),
            min_samples: 3,
            window_seconds: 300,
            interval_seconds: 30,
        }
    }
}

/// One named metric query with its pass/fail threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricQuery {
    pub name: String,

    /// Provider query expression (opaque to the engine).
    pub expr: String,

    pub threshold: Threshold,
}

/// Pass/fail criterion for a query result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Threshold {
    /// The latest sample must fall inside the configured bounds.
    Bounds {
        #[serde(skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
    },

    /// Absolute rate of change across the window must stay under the
    /// limit (units per second).
    MaxRateOfChange { per_second: f64 },
}

/// Aggregation policy across query outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictPolicy {
    /// Every query must pass; any failure fails the run.
    #[default]
    AllMustPass,

    /// A single passing query passes the run.
    AnyMustPass,
}

/// Outcome of one analysis evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
    /// Not enough signal to decide either way. Retried up to a budget,
    /// then escalated to Fail.
    Inconclusive,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Pass => write!(f, "pass"),
            Verdict::Fail => write!(f, "fail"),
            Verdict::Inconclusive => write!(f, "inconclusive"),
        }
    }
}

/// A single metric sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub at: DateTime<Utc>,
    pub value: f64,
}

/// Per-query result within an analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryOutcome {
    pub name: String,

    /// The evaluated value (latest sample, or measured rate).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,

    pub verdict: Verdict,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// One evaluation cycle, retained for audit on the rollout state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRun {
    pub id: AnalysisRunId,

    pub started_at: DateTime<Utc>,

    pub outcomes: Vec<QueryOutcome>,

    pub verdict: Verdict,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_is_all_must_pass() {
        assert_eq!(VerdictPolicy::default(), VerdictPolicy::AllMustPass);
    }

    #[test]
    fn test_threshold_serde_roundtrip() {
        let t = Threshold::Bounds {
            min: None,
            max: Some(0.05),
        };
        let json = serde_json::to_string(&t).unwrap();
        let parsed: Threshold = serde_json::from_str(&json).unwrap();
        assert_eq!(t, parsed);

        let t = Threshold::MaxRateOfChange { per_second: 1.5 };
        let json = serde_json::to_string(&t).unwrap();
        let parsed: Threshold = serde_json::from_str(&json).unwrap();
        assert_eq!(t, parsed);
    }
}
