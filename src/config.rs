// SPDX-FileCopyrightText: 2024 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

//! Client configuration: named contexts, each pointing at one server and
//! naming the identity to use there.

use std::{collections::BTreeMap, env, fs, io, path::PathBuf};

use log::debug;
use secrecy::{ExposeSecret as _, SecretString};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    error::{self, Result},
    key::Identity,
    metadata,
    signer::SignerConfig,
};

pub const CONTEXT_ENV: &str = "GATEKEY_CONTEXT";
pub const ENDPOINT_ENV: &str = "GATEKEY_ENDPOINT";
pub const SERVICE_ACCOUNT_KEY_ENV: &str = "GATEKEY_SERVICE_ACCOUNT_KEY";

const CONFIG_FILE: &str = "config.yaml";

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ContextConfig {
    pub url: Url,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
}

/// Settings that take precedence over the configuration file, usually taken
/// from the environment or the command line.
#[derive(Clone, Debug, Default)]
pub struct Overrides {
    pub context: Option<String>,
    pub endpoint: Option<Url>,
    pub service_account_key: Option<SecretString>,
}

impl Overrides {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.is_empty());
        let endpoint = match var(ENDPOINT_ENV) {
            Some(value) => Some(Url::parse(&value).map_err(|source| {
                error::Config::InvalidEndpoint {
                    variable: ENDPOINT_ENV,
                    value,
                    source,
                }
            })?),
            None => None,
        };
        Ok(Self {
            context: var(CONTEXT_ENV),
            endpoint,
            service_account_key: var(SERVICE_ACCOUNT_KEY_ENV).map(SecretString::new),
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// The context used when none is selected explicitly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default)]
    pub contexts: BTreeMap<String, ContextConfig>,
}

impl Config {
    pub fn path() -> Result<PathBuf> {
        metadata::PROJECT_DIRS
            .as_ref()
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
            .ok_or_else(|| error::Storage::NoProjectDirs.into())
    }

    /// Reads the configuration file, treating a missing file as empty.
    pub fn load() -> Result<Self> {
        let path = Self::path()?;
        match fs::File::open(&path) {
            Ok(fp) => {
                debug!("Reading configuration from {}", path.display());
                Self::from_reader(fp)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn from_reader<R: io::Read>(reader: R) -> Result<Self> {
        Ok(serde_yaml::from_reader(reader)?)
    }

    /// The selected context's name and settings.
    pub fn current<'a>(&'a self, overrides: &'a Overrides) -> Result<(&'a str, &'a ContextConfig)> {
        let name = overrides
            .context
            .as_deref()
            .or(self.context.as_deref())
            .ok_or(error::Config::NoContext)?;
        let context = self
            .contexts
            .get(name)
            .ok_or_else(|| error::Config::UnknownContext(name.to_owned()))?;
        Ok((name, context))
    }

    pub fn endpoint(&self, overrides: &Overrides) -> Result<Url> {
        if let Some(ref endpoint) = overrides.endpoint {
            return Ok(endpoint.clone());
        }

        let (_, context) = self.current(overrides)?;
        Ok(context.url.clone())
    }

    /// The identity interactive keys are stored and renewed for.
    pub fn identity(&self, overrides: &Overrides) -> Result<Identity> {
        let (name, context) = self.current(overrides)?;
        let identity = context
            .identity
            .as_deref()
            .ok_or_else(|| error::Config::NoIdentity(name.to_owned()))?;
        Ok(Identity::new(name, identity))
    }

    /// A service account key, when given, always wins over the configured
    /// identity.
    pub fn signer_config(&self, overrides: &Overrides) -> Result<SignerConfig> {
        match overrides.service_account_key {
            Some(ref key) => SignerConfig::service_account(key.expose_secret()),
            None => Ok(SignerConfig::Dynamic(self.identity(overrides)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret as _;

    use crate::key::{Credential, ServiceAccountKey};

    use super::*;

    const DOCUMENT: &str = r#"
context: staging
contexts:
  staging:
    url: https://staging.example.com/
    identity: alice@example.com
  production:
    url: https://example.com/
"#;

    fn config() -> Result<Config> {
        Config::from_reader(DOCUMENT.as_bytes())
    }

    #[test]
    fn current_context_from_file() -> Result<()> {
        let config = config()?;
        let overrides = Overrides::default();

        assert_eq!(
            config.endpoint(&overrides)?.as_str(),
            "https://staging.example.com/"
        );
        assert_eq!(
            config.identity(&overrides)?,
            Identity::new("staging", "alice@example.com")
        );
        Ok(())
    }

    #[test]
    fn overrides_take_precedence() -> Result<()> {
        let config = config()?;
        let overrides = Overrides {
            context: Some("production".to_owned()),
            endpoint: Some(Url::parse("http://127.0.0.1:8099").map_err(|_| error::Error::Command)?),
            service_account_key: None,
        };

        assert_eq!(config.endpoint(&overrides)?.as_str(), "http://127.0.0.1:8099/");
        assert!(matches!(
            config.identity(&overrides),
            Err(error::Error::Config(error::Config::NoIdentity(ref name))) if name == "production"
        ));
        Ok(())
    }

    #[test]
    fn unknown_or_missing_context_is_reported() -> Result<()> {
        let overrides = Overrides {
            context: Some("qa".to_owned()),
            ..Overrides::default()
        };

        assert!(matches!(
            config()?.identity(&overrides),
            Err(error::Error::Config(error::Config::UnknownContext(_)))
        ));
        assert!(matches!(
            Config::default().identity(&Overrides::default()),
            Err(error::Error::Config(error::Config::NoContext))
        ));
        Ok(())
    }

    #[test]
    fn signer_config_follows_service_account_key() -> Result<()> {
        let config = config()?;
        assert!(config.signer_config(&Overrides::default())?.is_renewable());

        let credential = Credential::generate(Identity::service_account("ci"));
        let key = ServiceAccountKey::new("ci", &credential)?.encode()?;
        let overrides = Overrides {
            service_account_key: Some(SecretString::new(key.expose_secret().clone())),
            ..Overrides::default()
        };

        let signer = config.signer_config(&overrides)?;
        assert!(!signer.is_renewable());
        assert_eq!(signer.identity(), &Identity::service_account("ci"));
        Ok(())
    }

    #[test]
    fn overrides_read_from_environment() -> Result<()> {
        let overrides = Overrides::from_lookup(|name| match name {
            CONTEXT_ENV => Some("production".to_owned()),
            ENDPOINT_ENV => Some("https://override.example.com".to_owned()),
            SERVICE_ACCOUNT_KEY_ENV => Some(String::new()),
            _ => None,
        })?;

        assert_eq!(overrides.context.as_deref(), Some("production"));
        assert_eq!(
            overrides.endpoint.as_ref().map(Url::as_str),
            Some("https://override.example.com/")
        );
        assert!(overrides.service_account_key.is_none());
        Ok(())
    }

    #[test]
    fn unparsable_endpoint_is_rejected() {
        let result = Overrides::from_lookup(|name| {
            (name == ENDPOINT_ENV).then(|| "not a url".to_owned())
        });

        assert!(matches!(
            result,
            Err(error::Error::Config(error::Config::InvalidEndpoint { .. }))
        ));
    }
}
