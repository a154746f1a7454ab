//! Resource identities, descriptors, and live snapshots.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The closed set of resource kinds the engine manages.
///
/// Kind-specific behavior (apply ordering, health rules) dispatches over
/// this enum rather than inspecting raw documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Namespace,
    CustomResourceDefinition,
    ConfigMap,
    Secret,
    Service,
    Workload,
}

impl ResourceKind {
    /// Apply precedence rank. Lower ranks are applied first: namespaces
    /// and definitions must exist before anything that lives in them.
    /// Deletes run in reverse rank order.
    pub fn apply_rank(&self) -> u8 {
        match self {
            ResourceKind::Namespace => 0,
            ResourceKind::CustomResourceDefinition => 1,
            ResourceKind::ConfigMap => 2,
            ResourceKind::Secret => 2,
            ResourceKind::Service => 3,
            ResourceKind::Workload => 4,
        }
    }

    /// All kinds, in apply-rank order.
    pub fn all() -> &'static [ResourceKind] {
        &[
            ResourceKind::Namespace,
            ResourceKind::CustomResourceDefinition,
            ResourceKind::ConfigMap,
            ResourceKind::Secret,
            ResourceKind::Service,
            ResourceKind::Workload,
        ]
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResourceKind::Namespace => "namespace",
            ResourceKind::CustomResourceDefinition => "custom_resource_definition",
            ResourceKind::ConfigMap => "config_map",
            ResourceKind::Secret => "secret",
            ResourceKind::Service => "service",
            ResourceKind::Workload => "workload",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "namespace" => Ok(ResourceKind::Namespace),
            "custom_resource_definition" => Ok(ResourceKind::CustomResourceDefinition),
            "config_map" => Ok(ResourceKind::ConfigMap),
            "secret" => Ok(ResourceKind::Secret),
            "service" => Ok(ResourceKind::Service),
            "workload" => Ok(ResourceKind::Workload),
            other => Err(UnknownKind(other.to_string())),
        }
    }
}

/// Error for unrecognized resource kind strings.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown resource kind: {0}")]
pub struct UnknownKind(pub String);

/// Stable identity of a managed resource: kind + namespace + name.
///
/// Identity is what the differ keys on; two descriptors with the same
/// identity are versions of the same resource.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceId {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
}

impl ResourceId {
    pub fn new(
        kind: ResourceKind,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// A single desired-state resource descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub id: ResourceId,

    /// The declared spec document. Opaque to the engine except for the
    /// kind-specific fields the health assessor and the in-memory
    /// cluster read (e.g. `replicas` on workloads).
    pub spec: serde_json::Value,
}

impl ResourceDescriptor {
    pub fn new(id: ResourceId, spec: serde_json::Value) -> Self {
        Self { id, spec }
    }
}

/// An immutable snapshot identifier for a desired-state tree.
///
/// Revisions are content hashes: the same tree always produces the same
/// revision, and a revision is never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(String);

impl Revision {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form for log output.
    pub fn short(&self) -> &str {
        let s = self.0.strip_prefix("sha256:").unwrap_or(&self.0);
        &s[..s.len().min(12)]
    }
}

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An immutable desired-state tree at a specific revision.
///
/// Constructed once by the source store; never mutated afterwards. The
/// differ reads it, the reconciler applies from it, nobody writes to it.
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredTree {
    revision: Revision,
    resources: BTreeMap<ResourceId, ResourceDescriptor>,
}

impl DesiredTree {
    pub fn new(revision: Revision, resources: BTreeMap<ResourceId, ResourceDescriptor>) -> Self {
        Self {
            revision,
            resources,
        }
    }

    /// An empty tree (used for deregistration cascades).
    pub fn empty(revision: Revision) -> Self {
        Self {
            revision,
            resources: BTreeMap::new(),
        }
    }

    pub fn revision(&self) -> &Revision {
        &self.revision
    }

    pub fn get(&self, id: &ResourceId) -> Option<&ResourceDescriptor> {
        self.resources.get(id)
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.resources.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ResourceId, &ResourceDescriptor)> {
        self.resources.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &ResourceId> {
        self.resources.keys()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// Kind-specific observed status fields, as reported by the cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedStatus {
    /// Replicas currently ready (workloads).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready_replicas: Option<u32>,

    /// Replicas the workload wants (workloads).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desired_replicas: Option<u32>,

    /// Container restarts observed in the recent window (workloads).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recent_restarts: Option<u32>,

    /// Endpoints currently serving (services).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready_endpoints: Option<u32>,
}

/// A live snapshot of one managed resource as observed in the cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveResource {
    pub id: ResourceId,

    /// The live spec document (what the cluster is actually running).
    pub spec: serde_json::Value,

    /// Kind-specific observed status.
    pub status: ObservedStatus,

    /// When the resource was first created in the cluster.
    pub created_at: DateTime<Utc>,

    /// When this snapshot was taken.
    pub observed_at: DateTime<Utc>,
}

/// Cluster-wide resource quota snapshot.
///
/// Read-only to this engine: reported, never interpreted or mutated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceQuotas {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_workloads: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_total_replicas: Option<u32>,

    pub used_workloads: u32,

    pub used_total_replicas: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_rank_ordering() {
        // Namespaces and definitions come before everything that depends
        // on them.
        assert!(ResourceKind::Namespace.apply_rank() < ResourceKind::ConfigMap.apply_rank());
        assert!(
            ResourceKind::CustomResourceDefinition.apply_rank()
                < ResourceKind::Workload.apply_rank()
        );
        assert!(ResourceKind::Service.apply_rank() < ResourceKind::Workload.apply_rank());
    }

    #[test]
    fn test_kind_roundtrip() {
        for kind in ResourceKind::all() {
            let s = kind.to_string();
            let parsed: ResourceKind = s.parse().unwrap();
            assert_eq!(*kind, parsed);
        }
    }

    #[test]
    fn test_resource_id_display() {
        let id = ResourceId::new(ResourceKind::Workload, "prod", "api");
        assert_eq!(id.to_string(), "workload/prod/api");
    }

    #[test]
    fn test_revision_short() {
        let rev = Revision::new("sha256:abcdef0123456789");
        assert_eq!(rev.short(), "abcdef012345");
    }

    #[test]
    fn test_desired_tree_immutable_access() {
        let id = ResourceId::new(ResourceKind::ConfigMap, "prod", "settings");
        let mut map = BTreeMap::new();
        map.insert(
            id.clone(),
            ResourceDescriptor::new(id.clone(), serde_json::json!({"k": "v"})),
        );
        let tree = DesiredTree::new(Revision::new("sha256:aa"), map);

        assert_eq!(tree.len(), 1);
        assert!(tree.contains(&id));
        assert_eq!(tree.get(&id).unwrap().spec["k"], "v");
    }
}
