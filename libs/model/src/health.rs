//! Health statuses and aggregation.

use serde::{Deserialize, Serialize};

use crate::ResourceId;

/// Health of a single resource or of a whole application.
///
/// Severity order for aggregation:
/// `Healthy < Progressing < Unknown < Degraded < Missing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Progressing,
    Unknown,
    Degraded,
    Missing,
}

impl HealthStatus {
    /// Position in the fixed severity order; higher is worse.
    pub fn severity(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Progressing => 1,
            HealthStatus::Unknown => 2,
            HealthStatus::Degraded => 3,
            HealthStatus::Missing => 4,
        }
    }

    /// Aggregate: the worst status wins. An empty set is `Healthy`
    /// (nothing to be unhealthy about).
    pub fn worst(statuses: impl IntoIterator<Item = HealthStatus>) -> HealthStatus {
        statuses
            .into_iter()
            .max_by_key(HealthStatus::severity)
            .unwrap_or(HealthStatus::Healthy)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Progressing => "progressing",
            HealthStatus::Unknown => "unknown",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Missing => "missing",
        };
        write!(f, "{}", s)
    }
}

/// Health of one resource, with an optional human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceHealth {
    pub id: ResourceId,

    pub status: HealthStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Application-level health: the worst resource status plus the
/// per-resource breakdown. Advisory input to rollouts and reporting;
/// never blocks reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppHealth {
    pub status: HealthStatus,

    pub resources: Vec<ResourceHealth>,
}

impl AppHealth {
    pub fn from_resources(resources: Vec<ResourceHealth>) -> Self {
        let status = HealthStatus::worst(resources.iter().map(|r| r.status));
        Self { status, resources }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ResourceKind;

    #[test]
    fn test_severity_total_order() {
        assert!(HealthStatus::Healthy.severity() < HealthStatus::Progressing.severity());
        assert!(HealthStatus::Progressing.severity() < HealthStatus::Unknown.severity());
        assert!(HealthStatus::Unknown.severity() < HealthStatus::Degraded.severity());
        assert!(HealthStatus::Degraded.severity() < HealthStatus::Missing.severity());
    }

    #[test]
    fn test_worst_wins() {
        let worst = HealthStatus::worst([
            HealthStatus::Healthy,
            HealthStatus::Degraded,
            HealthStatus::Progressing,
        ]);
        assert_eq!(worst, HealthStatus::Degraded);
    }

    #[test]
    fn test_empty_set_is_healthy() {
        assert_eq!(HealthStatus::worst([]), HealthStatus::Healthy);
    }

    #[test]
    fn test_app_health_aggregates() {
        let health = AppHealth::from_resources(vec![
            ResourceHealth {
                id: ResourceId::new(ResourceKind::Workload, "prod", "api"),
                status: HealthStatus::Healthy,
                message: None,
            },
            ResourceHealth {
                id: ResourceId::new(ResourceKind::Service, "prod", "api"),
                status: HealthStatus::Missing,
                message: Some("not found".to_string()),
            },
        ]);
        assert_eq!(health.status, HealthStatus::Missing);
    }
}
