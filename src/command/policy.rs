// SPDX-FileCopyrightText: 2024 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use std::{
    fs,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use gatekey::{
    error::Result,
    policy::{self, AccessPolicy},
};
use tabled::{settings::Style, Table, Tabled};

use super::Environment;

fn load(file: &Path) -> Result<AccessPolicy> {
    AccessPolicy::load(fs::File::open(file)?)
}

/// Work with access policy documents.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    Validate(Validate),
    Check(Check),
}

#[async_trait]
impl super::Command for Command {
    async fn execute(self, env: &Environment) -> Result<()> {
        match self {
            Self::Validate(cmd) => cmd.execute(env).await,
            Self::Check(cmd) => cmd.execute(env).await,
        }
    }
}

/// Check a policy document's metadata and run the tests it contains.
#[derive(Debug, Parser)]
pub(crate) struct Validate {
    /// The YAML or JSON document to read.
    #[arg(value_hint = clap::ValueHint::FilePath)]
    file: PathBuf,
}

#[async_trait]
impl super::Command for Validate {
    async fn execute(self, _env: &Environment) -> Result<()> {
        let policy = load(&self.file)?;
        policy::validate(&policy)?;

        println!(
            "{} is valid; {} tests passed",
            self.file.display(),
            policy.spec.tests.len()
        );
        Ok(())
    }
}

#[derive(Debug, Tabled)]
struct GroupRow<'a> {
    #[tabled(rename = "Kubernetes Group")]
    group: &'a str,
}

/// Show which Kubernetes groups a policy grants a user on a cluster.
#[derive(Debug, Parser)]
pub(crate) struct Check {
    /// The cluster the user connects to.
    #[arg(long)]
    cluster: String,

    /// The user to check.
    #[arg(long)]
    user: String,

    /// The YAML or JSON document to read.
    #[arg(value_hint = clap::ValueHint::FilePath)]
    file: PathBuf,
}

#[async_trait]
impl super::Command for Check {
    async fn execute(self, _env: &Environment) -> Result<()> {
        let result = policy::evaluate(&load(&self.file)?, &self.cluster, &self.user);

        if result.is_empty() {
            eprintln!(
                "The policy grants {} nothing on {}",
                self.user, self.cluster
            );
        } else {
            println!(
                "{}",
                Table::new(
                    result
                        .kubernetes_impersonate_groups
                        .iter()
                        .map(|group| GroupRow { group })
                )
                .with(Style::rounded())
            );
        }
        Ok(())
    }
}
