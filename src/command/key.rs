// SPDX-FileCopyrightText: 2024 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use gatekey::{
    config::{self, Config, Overrides},
    error::{self, Result},
    key::{CredentialBuilder, Identity, ServiceAccountKey, Signer, SERVICE_ACCOUNT_KEY_LIFETIME},
    signer::SignerConfig,
    storage::KeyStore as _,
};
use log::error;
use secrecy::ExposeSecret as _;
use tabled::{
    settings::{object::Columns, Alignment, Modify, Style},
    Table, Tabled,
};
use url::Url;

use super::Environment;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Manage locally stored keys.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    GenerateServiceAccount(GenerateServiceAccount),
    Show(Show),
    Delete(Delete),
}

#[async_trait]
impl super::Command for Command {
    async fn execute(self, env: &Environment) -> Result<()> {
        match self {
            Self::GenerateServiceAccount(cmd) => cmd.execute(env).await,
            Self::Show(cmd) => cmd.execute(env).await,
            Self::Delete(cmd) => cmd.execute(env).await,
        }
    }
}

/// Selects a key. Without options, the signer the current context would use
/// is selected: the service account key in `GATEKEY_SERVICE_ACCOUNT_KEY` if
/// set, otherwise the stored key for the configured identity.
#[derive(Debug, Args)]
pub(crate) struct Target {
    /// The context the key belongs to.
    #[arg(long, env = config::CONTEXT_ENV)]
    context: Option<String>,

    /// The identity the key belongs to.
    #[arg(long)]
    identity: Option<String>,
}

struct Selection {
    signer: SignerConfig,
    endpoint: Option<Url>,
}

impl Target {
    fn select(self) -> Result<Selection> {
        let mut overrides = Overrides::from_env()?;
        if self.context.is_some() {
            overrides.context = self.context;
        }

        let config = match (&overrides.context, &self.identity) {
            (Some(_), Some(_)) => Config::default(),
            _ => Config::load()?,
        };
        let signer = match self.identity {
            Some(identity) => {
                let context = match overrides.context {
                    Some(ref context) => context.clone(),
                    None => config.current(&overrides)?.0.to_owned(),
                };
                SignerConfig::user(context, identity)
            }
            None => config.signer_config(&overrides)?,
        };
        Ok(Selection {
            signer,
            endpoint: config.endpoint(&overrides).ok(),
        })
    }
}

/// Generate a key for a service account and print it in the encoded form
/// non-interactive clients expect.
#[derive(Debug, Parser)]
pub(crate) struct GenerateServiceAccount {
    /// How many days the key stays valid.
    #[arg(long)]
    ttl_days: Option<u64>,

    /// The name of the service account.
    #[clap()]
    name: String,
}

#[async_trait]
impl super::Command for GenerateServiceAccount {
    async fn execute(self, _env: &Environment) -> Result<()> {
        let lifetime = self
            .ttl_days
            .map_or(SERVICE_ACCOUNT_KEY_LIFETIME, |days| {
                Duration::from_secs(days.saturating_mul(SECONDS_PER_DAY))
            });
        let credential = CredentialBuilder::new(Identity::service_account(&self.name))
            .with_lifetime(Some(lifetime))
            .generate();

        eprintln!(
            "Register this public key ({}) for service account {} before use:",
            credential.fingerprint(),
            self.name
        );
        eprint!("{}", credential.armor_public()?);
        println!(
            "{}",
            ServiceAccountKey::new(self.name, &credential)?
                .encode()?
                .expose_secret()
        );
        Ok(())
    }
}

#[derive(Debug, Tabled)]
struct PropertyRow {
    #[tabled(rename = "Property")]
    name: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

fn describe_expiry(expires_at: Option<SystemTime>) -> String {
    match expires_at {
        None => "never".to_owned(),
        Some(expires_at) => match expires_at.duration_since(SystemTime::now()) {
            Ok(remaining) => format!(
                "in {}h {}m",
                remaining.as_secs() / 3600,
                remaining.as_secs() % 3600 / 60
            ),
            Err(_) => "expired".to_owned(),
        },
    }
}

/// Show the key selected for an identity.
#[derive(Debug, Parser)]
pub(crate) struct Show {
    #[command(flatten)]
    target: Target,
}

#[async_trait]
impl super::Command for Show {
    async fn execute(self, env: &Environment) -> Result<()> {
        let selection = self.target.select()?;
        let (signer, comment, location): (Arc<dyn Signer>, String, String) =
            match selection.signer {
                SignerConfig::Static(signer) => (
                    signer,
                    String::new(),
                    format!("${}", config::SERVICE_ACCOUNT_KEY_ENV),
                ),
                SignerConfig::Dynamic(ref identity) => {
                    let store = env.key_store().await;
                    let Some(credential) = store.read(identity).await? else {
                        error!("No key is stored for {}", identity);
                        return Err(error::Error::Command);
                    };
                    let comment = credential.comment().to_owned();
                    (
                        Arc::new(credential),
                        comment,
                        store.location(identity).to_string(),
                    )
                }
            };

        let rows = [
            PropertyRow {
                name: "Identity",
                value: signer.identity().to_string(),
            },
            PropertyRow {
                name: "Fingerprint",
                value: signer.fingerprint(),
            },
            PropertyRow {
                name: "Comment",
                value: comment,
            },
            PropertyRow {
                name: "Expires",
                value: describe_expiry(signer.expires_at()),
            },
            PropertyRow {
                name: "Location",
                value: location,
            },
            PropertyRow {
                name: "Endpoint",
                value: selection
                    .endpoint
                    .map_or_else(|| "unknown".to_owned(), String::from),
            },
        ];
        println!(
            "{}",
            Table::new(rows)
                .with(Style::rounded())
                .with(Modify::new(Columns::single(1)).with(Alignment::left()))
        );
        Ok(())
    }
}

/// Delete the stored key for an identity. The next signed call will register
/// a new one.
#[derive(Debug, Parser)]
pub(crate) struct Delete {
    #[command(flatten)]
    target: Target,
}

#[async_trait]
impl super::Command for Delete {
    async fn execute(self, env: &Environment) -> Result<()> {
        let identity = match self.target.select()?.signer {
            SignerConfig::Dynamic(identity) => identity,
            SignerConfig::Static(signer) => {
                error!(
                    "The key for {} comes from ${} and is not stored",
                    signer.identity(),
                    config::SERVICE_ACCOUNT_KEY_ENV
                );
                return Err(error::Error::Command);
            }
        };
        let store = env.key_store().await;
        store.delete(&identity).await?;

        eprintln!("Deleted the key for {} from {}", identity, store.location(&identity));
        Ok(())
    }
}
