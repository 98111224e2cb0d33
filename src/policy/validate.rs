// SPDX-FileCopyrightText: 2024 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use std::{error, fmt, slice};

use thiserror::Error;

use crate::resource;

use super::{evaluate, AccessPolicy, ACCESS_POLICY_ID};

fn format_groups(groups: &[String]) -> String {
    format!("[{}]", groups.join(" "))
}

#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("access policy {field} mismatch: expected {expected:?}, got {actual:?}")]
    IdentityMismatch {
        field: &'static str,
        expected: String,
        actual: String,
    },
    #[error(
        "access policy test {name:?} failed: kubernetes impersonate groups mismatch: expected {}, got {}",
        format_groups(.expected),
        format_groups(.actual)
    )]
    TestFailed {
        name: String,
        expected: Vec<String>,
        actual: Vec<String>,
    },
}

/// Every problem found in one policy document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationErrors(Vec<ValidationError>);

impl error::Error for ValidationErrors {}

impl ValidationErrors {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> slice::Iter<'_, ValidationError> {
        self.0.iter()
    }
}

impl<'a> IntoIterator for &'a ValidationErrors {
    type Item = &'a ValidationError;
    type IntoIter = slice::Iter<'a, ValidationError>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.len() == 1 {
            writeln!(f, "1 error occurred:")?;
        } else {
            writeln!(f, "{} errors occurred:", self.0.len())?;
        }
        for error in &self.0 {
            writeln!(f, "\t* {}", error)?;
        }
        Ok(())
    }
}

/// Checks the policy's metadata and runs all of its embedded tests, reporting
/// every failure at once. Test expectations are compared without regard to
/// order.
pub fn validate(policy: &AccessPolicy) -> Result<(), ValidationErrors> {
    let mut errors = vec![];

    if policy.metadata.id != ACCESS_POLICY_ID {
        errors.push(ValidationError::IdentityMismatch {
            field: "ID",
            expected: ACCESS_POLICY_ID.to_owned(),
            actual: policy.metadata.id.clone(),
        });
    }

    if policy.metadata.namespace != resource::DEFAULT_NAMESPACE {
        errors.push(ValidationError::IdentityMismatch {
            field: "namespace",
            expected: resource::DEFAULT_NAMESPACE.to_owned(),
            actual: policy.metadata.namespace.clone(),
        });
    }

    for test in &policy.spec.tests {
        let mut expected = test.expected.kubernetes.impersonate.groups.clone();
        expected.sort();
        let actual = evaluate(policy, &test.cluster.name, &test.user.name).sorted_groups();

        if expected != actual {
            errors.push(ValidationError::TestFailed {
                name: test.name.clone(),
                expected,
                actual,
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationErrors(errors))
    }
}
