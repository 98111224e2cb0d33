// SPDX-FileCopyrightText: 2022-2024 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretVec};

use crate::{
    error::{self, Result},
    key::{Credential, Identity, Signer as _},
    metadata,
};

use super::{KeyStore, Location};

pub struct SecretService {
    keyring: oo7::Keyring,
}

impl SecretService {
    pub async fn new() -> Result<Self> {
        Ok(Self {
            keyring: oo7::Keyring::new().await.map_err(error::Storage::from)?,
        })
    }

    fn attributes(identity: &Identity) -> HashMap<&str, &str> {
        HashMap::from([
            ("gatekey.kind", "credential"),
            ("gatekey.context", identity.context()),
            ("gatekey.identity", identity.name()),
        ])
    }

    async fn item(&self, identity: &Identity) -> Result<Option<oo7::Item>> {
        Ok(self
            .keyring
            .search_items(Self::attributes(identity))
            .await
            .map_err(error::Storage::from)?
            .into_iter()
            .next())
    }
}

#[async_trait]
impl KeyStore for SecretService {
    async fn read(&self, identity: &Identity) -> Result<Option<Credential>> {
        let data = match self.item(identity).await? {
            Some(item) => {
                let secret = item.secret().await.map_err(error::Storage::from)?;
                Some(serde_json::from_slice(&secret)?)
            }
            None => None,
        };
        Ok(data)
    }

    async fn write(&self, credential: &Credential) -> Result<Location> {
        self.keyring
            .create_item(
                &format!("{} key for {}", *metadata::CLIENT_DISPLAY_NAME, credential.identity()),
                Self::attributes(credential.identity()),
                SecretVec::new(serde_json::to_vec(credential)?).expose_secret(),
                true,
            )
            .await
            .map_err(error::Storage::from)?;
        Ok(self.location(credential.identity()))
    }

    fn location(&self, _identity: &Identity) -> Location {
        Location::SecretService
    }

    async fn delete(&self, identity: &Identity) -> Result<()> {
        match self.item(identity).await? {
            Some(item) => {
                item.delete().await.map_err(error::Storage::from)?;
                Ok(())
            }
            None => Err(error::Storage::NotFound(identity.clone()).into()),
        }
    }
}
