// SPDX-FileCopyrightText: 2024 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use std::{fmt, sync::Arc, time::SystemTime};

use crate::{
    error::{self, Result},
    key::{Identity, ServiceAccountKey, Signer},
    storage::KeyStore,
};

/// Where an interceptor gets its signer from. The mode is fixed for the
/// lifetime of the interceptor.
#[derive(Clone)]
pub enum SignerConfig {
    /// A signer supplied whole, e.g. from a service account key. Never
    /// renewed.
    Static(Arc<dyn Signer>),
    /// A credential looked up in the key store on every call and renewed
    /// interactively when it is missing or unusable.
    Dynamic(Identity),
}

impl SignerConfig {
    pub fn user(context: impl Into<String>, identity: impl Into<String>) -> Self {
        Self::Dynamic(Identity::new(context, identity))
    }

    /// Builds a static signer from a base64-encoded service account key.
    pub fn service_account(encoded: &str) -> Result<Self> {
        let credential = ServiceAccountKey::decode(encoded)?.into_credential()?;
        Ok(Self::Static(Arc::new(credential)))
    }

    pub fn identity(&self) -> &Identity {
        match *self {
            Self::Static(ref signer) => signer.identity(),
            Self::Dynamic(ref identity) => identity,
        }
    }

    pub const fn is_renewable(&self) -> bool {
        matches!(*self, Self::Dynamic(_))
    }

    /// Produces a signer without touching the network and without renewing
    /// anything.
    pub async fn resolve(&self, store: &dyn KeyStore) -> Result<Arc<dyn Signer>> {
        match *self {
            Self::Static(ref signer) => match signer.expires_at() {
                Some(expires_at) if expires_at <= SystemTime::now() => {
                    Err(error::Credential::Invalid(
                        signer.identity().clone(),
                        "the key has expired".to_owned(),
                    )
                    .into())
                }
                Some(_) | None => Ok(Arc::clone(signer)),
            },
            Self::Dynamic(ref identity) => {
                let credential = store
                    .read(identity)
                    .await?
                    .ok_or_else(|| error::Credential::NotFound(identity.clone()))?;
                credential
                    .check_usable(identity, SystemTime::now())
                    .map_err(|reason| error::Credential::Invalid(identity.clone(), reason))?;
                Ok(Arc::new(credential))
            }
        }
    }
}

impl fmt::Debug for SignerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Static(ref signer) => f
                .debug_tuple("Static")
                .field(signer.identity())
                .finish(),
            Self::Dynamic(ref identity) => f.debug_tuple("Dynamic").field(identity).finish(),
        }
    }
}
