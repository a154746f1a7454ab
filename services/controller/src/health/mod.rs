//! Kind-specific health assessment.
//!
//! Maps each managed resource's live state to a health status and
//! aggregates to application level (worst status wins). Health is
//! advisory: it feeds the rollout controller and status reporting, and
//! never blocks reconciliation.

use chrono::{DateTime, Utc};
use drift_model::{
    AppHealth, DesiredTree, HealthStatus, LiveResource, ResourceHealth, ResourceKind,
};

/// Tunables for the kind-specific rules.
#[derive(Debug, Clone)]
pub struct HealthRules {
    /// How long a resource may stay below readiness before it is
    /// considered degraded rather than progressing.
    pub grace_period_seconds: i64,

    /// Recent restarts above this count degrade a workload even when
    /// replica counts look right.
    pub restart_threshold: u32,
}

impl Default for HealthRules {
    fn default() -> Self {
        Self {
            grace_period_seconds: 60,
            restart_threshold: 3,
        }
    }
}

/// Assess one resource against its live snapshot.
pub fn assess_resource(
    rules: &HealthRules,
    kind: ResourceKind,
    live: Option<&LiveResource>,
    now: DateTime<Utc>,
) -> (HealthStatus, Option<String>) {
    let Some(live) = live else {
        return (HealthStatus::Missing, Some("not found in cluster".to_string()));
    };

    let within_grace =
        (now - live.created_at).num_seconds() < rules.grace_period_seconds;

    match kind {
        ResourceKind::Workload => {
            let (Some(ready), Some(desired)) = (
                live.status.ready_replicas,
                live.status.desired_replicas,
            ) else {
                return (
                    HealthStatus::Unknown,
                    Some("replica counts not reported".to_string()),
                );
            };

            let restarts = live.status.recent_restarts.unwrap_or(0);
            if restarts > rules.restart_threshold {
                return (
                    HealthStatus::Degraded,
                    Some(format!("{restarts} recent restarts")),
                );
            }

            if ready >= desired {
                (HealthStatus::Healthy, None)
            } else if within_grace {
                (
                    HealthStatus::Progressing,
                    Some(format!("{ready}/{desired} replicas ready")),
                )
            } else {
                (
                    HealthStatus::Degraded,
                    Some(format!(
                        "{ready}/{desired} replicas ready past grace period"
                    )),
                )
            }
        }
        ResourceKind::Service => match live.status.ready_endpoints {
            Some(n) if n > 0 => (HealthStatus::Healthy, None),
            Some(_) if within_grace => {
                (HealthStatus::Progressing, Some("no ready endpoints".to_string()))
            }
            Some(_) => (
                HealthStatus::Degraded,
                Some("no ready endpoints past grace period".to_string()),
            ),
            None => (
                HealthStatus::Unknown,
                Some("endpoint count not reported".to_string()),
            ),
        },
        // Presence kinds: existing is healthy.
        ResourceKind::Namespace
        | ResourceKind::CustomResourceDefinition
        | ResourceKind::ConfigMap
        | ResourceKind::Secret => (HealthStatus::Healthy, None),
    }
}

/// Assess a whole application: every desired resource against the live
/// set, aggregated worst-first.
pub fn assess_app(
    rules: &HealthRules,
    desired: &DesiredTree,
    live: &[LiveResource],
    now: DateTime<Utc>,
) -> AppHealth {
    let resources = desired
        .ids()
        .map(|id| {
            let snapshot = live.iter().find(|l| &l.id == id);
            let (status, message) = assess_resource(rules, id.kind, snapshot, now);
            ResourceHealth {
                id: id.clone(),
                status,
                message,
            }
        })
        .collect();

    AppHealth::from_resources(resources)
}
