// SPDX-FileCopyrightText: 2024 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use serde::Serialize;

use crate::resource;

use super::{AccessPolicy, AccessPolicySpec, Rule, GROUP_PREFIX};

/// The groups one user is impersonated as on one cluster. Groups appear in
/// rule order and are not deduplicated.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub kubernetes_impersonate_groups: Vec<String>,
}

impl CheckResult {
    pub fn is_empty(&self) -> bool {
        self.kubernetes_impersonate_groups.is_empty()
    }

    /// The groups in a canonical order, for comparisons that should not
    /// depend on rule order.
    pub fn sorted_groups(&self) -> Vec<String> {
        let mut groups = self.kubernetes_impersonate_groups.clone();
        groups.sort();
        groups
    }
}

fn user_matches(spec: &AccessPolicySpec, rule: &Rule, user: &str) -> bool {
    rule.users.iter().any(|entry| {
        entry == user
            || entry
                .strip_prefix(GROUP_PREFIX)
                .and_then(|group| spec.user_groups.get(group))
                .map_or(false, |group| group.users.iter().any(|member| member.name == user))
    })
}

fn cluster_matches(spec: &AccessPolicySpec, rule: &Rule, cluster: &str) -> bool {
    rule.clusters.iter().any(|entry| {
        entry == cluster
            || entry
                .strip_prefix(GROUP_PREFIX)
                .and_then(|group| spec.cluster_groups.get(group))
                .map_or(false, |group| {
                    group.clusters.iter().any(|member| member.name == cluster)
                })
    })
}

/// Collects the impersonation groups of every rule matching both `user` and
/// `cluster`. Unknown groups, users and clusters simply do not match.
pub fn evaluate(policy: &AccessPolicy, cluster: &str, user: &str) -> CheckResult {
    let spec = &policy.spec;

    CheckResult {
        kubernetes_impersonate_groups: spec
            .rules
            .iter()
            .filter(|rule| user_matches(spec, rule, user) && cluster_matches(spec, rule, cluster))
            .flat_map(|rule| rule.kubernetes.impersonate.groups.iter().cloned())
            .collect(),
    }
}

pub fn check_cluster(policy: &AccessPolicy, cluster: &resource::Metadata, user: &str) -> CheckResult {
    evaluate(policy, &cluster.id, user)
}
