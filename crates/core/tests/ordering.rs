#![forbid(unsafe_code)]

use proptest::prelude::*;
use ksync_core::{sort_alphabetical, sort_for_create, sort_for_delete, KindRanks, ResourceDocument};

const KINDS: &[(&str, &str)] = &[
    ("v1", "Namespace"),
    ("apps/v1", "Deployment"),
    ("v1", "ConfigMap"),
    ("batch/v1", "Job"),
    ("example.com/v1alpha1", "Widget"),
    ("v1", "Service"),
    ("rbac.authorization.k8s.io/v1", "ClusterRole"),
];

fn batch(kinds: &[(&'static str, &'static str)]) -> Vec<ResourceDocument> {
    kinds.iter().enumerate().map(|(i, (av, kind))| ResourceDocument::new(av, kind, "", &format!("obj-{}", i))).collect()
}

fn last_index(docs: &[ResourceDocument], kind: &str) -> Option<usize> {
    docs.iter().rposition(|d| d.kind() == kind)
}

fn first_index(docs: &[ResourceDocument], kind: &str) -> Option<usize> {
    docs.iter().position(|d| d.kind() == kind)
}

proptest! {
    #[test]
    fn foundational_kinds_precede_workloads_in_any_batch(kinds in prop::collection::vec(prop::sample::select(KINDS), 0..32)) {
        let ranks = KindRanks::default();
        let input = batch(&kinds);

        let mut fwd = input.clone();
        sort_for_create(&mut fwd, &ranks);
        if let (Some(ns), Some(dep)) = (last_index(&fwd, "Namespace"), first_index(&fwd, "Deployment")) {
            prop_assert!(ns < dep, "namespace after deployment in create order");
        }

        let mut rev = input;
        sort_for_delete(&mut rev, &ranks);
        if let (Some(ns), Some(dep)) = (first_index(&rev, "Namespace"), last_index(&rev, "Deployment")) {
            prop_assert!(ns > dep, "namespace before deployment in delete order");
        }

        let mut back = fwd;
        back.reverse();
        prop_assert_eq!(back, rev);
    }
}

#[test]
fn alphabetical_order_is_total_for_unique_identities() {
    let mut docs = vec![
        ResourceDocument::new("apps/v1", "Deployment", "default", "mysvc"),
        ResourceDocument::new("storage.k8s.io/v1", "StorageClass", "", "default"),
        ResourceDocument::new("rbac.authorization.k8s.io/v1", "ClusterRole", "", "default"),
        ResourceDocument::new("apps/v1", "Deployment", "default", "mydeploy"),
        ResourceDocument::new("v1", "Secret", "default", "mysvc"),
    ];
    sort_alphabetical(&mut docs);
    let got: Vec<_> = docs.iter().map(|d| format!("{}/{}/{}", d.namespace(), d.name(), d.kind())).collect();
    assert_eq!(
        got,
        vec![
            "/default/ClusterRole",
            "/default/StorageClass",
            "default/mydeploy/Deployment",
            "default/mysvc/Deployment",
            "default/mysvc/Secret",
        ]
    );

    // Any input permutation sorts to the same sequence.
    let mut reversed = docs.clone();
    reversed.reverse();
    sort_alphabetical(&mut reversed);
    assert_eq!(reversed, docs);
}
