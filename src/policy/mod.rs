// SPDX-FileCopyrightText: 2024 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

//! Access policies decide which Kubernetes groups a user is impersonated as
//! when reaching a cluster.
//!
//! Rules name users and clusters either directly or, with the `group/`
//! prefix, through the policy's user and cluster groups. A policy also carries
//! tests that [`validate`] runs against the policy itself.

mod check;
mod validate;

use std::{collections::BTreeMap, io};

use serde::{Deserialize, Serialize};

use crate::{
    error::Result,
    resource::{self, Resource},
};

pub use check::{check_cluster, evaluate, CheckResult};
pub use validate::{validate, ValidationError, ValidationErrors};

pub const ACCESS_POLICY_TYPE: &str = "AccessPolicies.gatekey.dev";
pub const ACCESS_POLICY_ID: &str = "access-policy";

/// Marks a rule entry as naming a group instead of a single user or cluster.
pub const GROUP_PREFIX: &str = "group/";

/// What callers grant when no access policy is in effect at all. Policies
/// never produce it on their own.
pub const DEFAULT_ACCESS_GROUP: &str = "system:masters";

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Impersonate {
    #[serde(default)]
    pub groups: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Kubernetes {
    #[serde(default)]
    pub impersonate: Impersonate,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Rule {
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub clusters: Vec<String>,
    #[serde(default)]
    pub kubernetes: Kubernetes,
}

/// A user or cluster referenced by name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Member {
    pub name: String,
}

impl Member {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct UserGroup {
    #[serde(default)]
    pub users: Vec<Member>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ClusterGroup {
    #[serde(default)]
    pub clusters: Vec<Member>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Expected {
    #[serde(default)]
    pub kubernetes: Kubernetes,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Test {
    pub name: String,
    pub cluster: Member,
    pub user: Member,
    #[serde(default)]
    pub expected: Expected,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct AccessPolicySpec {
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default, alias = "usergroups")]
    pub user_groups: BTreeMap<String, UserGroup>,
    #[serde(default, alias = "clustergroups")]
    pub cluster_groups: BTreeMap<String, ClusterGroup>,
    #[serde(default)]
    pub tests: Vec<Test>,
}

pub type AccessPolicy = Resource<AccessPolicySpec>;

pub fn access_policy_metadata() -> resource::Metadata {
    resource::Metadata::new(
        resource::DEFAULT_NAMESPACE,
        ACCESS_POLICY_TYPE,
        ACCESS_POLICY_ID,
    )
}

impl Resource<AccessPolicySpec> {
    /// Wraps `spec` in the canonical singleton metadata.
    pub fn new(spec: AccessPolicySpec) -> Self {
        Self {
            metadata: access_policy_metadata(),
            spec,
        }
    }

    /// Reads a policy document. JSON documents are recognized by their
    /// leading brace; anything else is read as YAML.
    pub fn load<R: io::Read>(mut reader: R) -> Result<Self> {
        let mut document = String::new();
        _ = reader.read_to_string(&mut document)?;

        if document.trim_start().starts_with('{') {
            Ok(serde_json::from_str(&document)?)
        } else {
            Ok(serde_yaml::from_str(&document)?)
        }
    }
}

#[cfg(test)]
pub(crate) mod testdata {
    use super::AccessPolicy;

    pub(crate) const VALID: &str = include_str!("testdata/acl-valid.yaml");
    pub(crate) const INVALID_METADATA: &str = include_str!("testdata/acl-invalid-metadata.yaml");

    #[allow(clippy::unwrap_used)]
    pub(crate) fn load(document: &str) -> AccessPolicy {
        AccessPolicy::load(document.as_bytes()).unwrap()
    }
}
