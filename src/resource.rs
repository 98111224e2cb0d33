// SPDX-FileCopyrightText: 2024 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use serde::{Deserialize, Serialize};

/// The namespace that holds user-facing singleton resources.
pub const DEFAULT_NAMESPACE: &str = "default";

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Metadata {
    #[serde(default)]
    pub namespace: String,
    #[serde(rename = "type", default)]
    pub type_: String,
    #[serde(default)]
    pub id: String,
}

impl Metadata {
    pub fn new(namespace: &str, type_: &str, id: &str) -> Self {
        Self {
            namespace: namespace.to_owned(),
            type_: type_.to_owned(),
            id: id.to_owned(),
        }
    }
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}/{})", self.type_, self.namespace, self.id)
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Resource<S> {
    pub metadata: Metadata,
    pub spec: S,
}
