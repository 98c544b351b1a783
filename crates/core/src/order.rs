//! Best-effort creation ordering and a stable display ordering for document batches.
//!
//! Dependency order is a coarse kind-rank heuristic. It never looks at references
//! between documents, so it cannot guarantee correctness for deep reference graphs.

use std::cmp::Ordering;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::ResourceDocument;

/// Rank given to kinds the table does not list. Sits between foundational and workload tiers.
pub const DEFAULT_RANK: i32 = 50;

const BUILTIN_RANKS: &[(&str, i32)] = &[
    ("Namespace", 0),
    ("CustomResourceDefinition", 10),
    ("ThirdPartyResource", 10),
    ("StorageClass", 20),
    ("PriorityClass", 20),
    ("PodSecurityPolicy", 20),
    ("ClusterRole", 20),
    ("ClusterRoleBinding", 20),
    ("ServiceAccount", 30),
    ("Role", 30),
    ("RoleBinding", 30),
    ("ResourceQuota", 30),
    ("LimitRange", 30),
    ("Secret", 30),
    ("ConfigMap", 30),
    ("PersistentVolume", 30),
    ("PersistentVolumeClaim", 35),
    ("Service", 40),
    ("Pod", 70),
    ("ReplicationController", 70),
    ("ReplicaSet", 70),
    ("Deployment", 70),
    ("DaemonSet", 70),
    ("StatefulSet", 70),
    ("Job", 70),
    ("CronJob", 70),
    ("Ingress", 80),
    ("HorizontalPodAutoscaler", 80),
    ("PodDisruptionBudget", 80),
];

/// Mapping from kind name to creation rank (lower is created first).
///
/// Deserialises from `{ ranks: { Kind: rank, .. }, default: rank }`; both keys are optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KindRanks {
    #[serde(default)]
    ranks: FxHashMap<String, i32>,
    #[serde(default = "default_rank")]
    default: i32,
}

fn default_rank() -> i32 { DEFAULT_RANK }

impl Default for KindRanks {
    fn default() -> Self {
        let ranks = BUILTIN_RANKS.iter().map(|(k, r)| ((*k).to_string(), *r)).collect();
        Self { ranks, default: DEFAULT_RANK }
    }
}

impl KindRanks {
    /// An empty table: every kind gets `default`.
    pub fn empty(default: i32) -> Self {
        Self { ranks: FxHashMap::default(), default }
    }

    pub fn with_rank(mut self, kind: impl Into<String>, rank: i32) -> Self {
        self.ranks.insert(kind.into(), rank);
        self
    }

    pub fn rank(&self, kind: &str) -> i32 {
        self.ranks.get(kind).copied().unwrap_or(self.default)
    }

    pub fn default_rank(&self) -> i32 { self.default }
}

/// Comparator placing lower-ranked kinds first. Equal ranks compare equal.
pub fn dependency_order(ranks: &KindRanks) -> impl Fn(&ResourceDocument, &ResourceDocument) -> Ordering + '_ {
    move |a, b| ranks.rank(a.kind()).cmp(&ranks.rank(b.kind()))
}

/// Stable sort for creation; equal-ranked documents keep their input order.
pub fn sort_for_create(docs: &mut [ResourceDocument], ranks: &KindRanks) {
    docs.sort_by(dependency_order(ranks));
}

/// Exact reverse of [`sort_for_create`], so dependents go before their prerequisites.
pub fn sort_for_delete(docs: &mut [ResourceDocument], ranks: &KindRanks) {
    sort_for_create(docs, ranks);
    docs.reverse();
}

/// Namespace, then name, then kind, ascending. Cluster-scoped (empty namespace) first.
pub fn alphabetical_order(a: &ResourceDocument, b: &ResourceDocument) -> Ordering {
    a.namespace()
        .cmp(b.namespace())
        .then_with(|| a.name().cmp(b.name()))
        .then_with(|| a.kind().cmp(b.kind()))
}

/// For display and diff output only, never for apply/delete sequencing.
pub fn sort_alphabetical(docs: &mut [ResourceDocument]) {
    docs.sort_by(alphabetical_order);
}
