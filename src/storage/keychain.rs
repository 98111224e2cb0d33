// SPDX-FileCopyrightText: 2024 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use secrecy::{ExposeSecret as _, SecretVec};
use security_framework::os::macos::keychain::{SecKeychain, SecPreferencesDomain};

use crate::{
    error::{self, Result},
    key::{Credential, Identity, Signer as _},
    metadata,
};

use super::{KeyStore, Location};

const ERR_SEC_ITEM_NOT_FOUND: i32 = -25300_i32;

pub struct Keychain {
    delegate: SecKeychain,
    service: String,
}

impl Keychain {
    pub fn new() -> Result<Self> {
        Ok(Self {
            delegate: SecKeychain::default_for_domain(SecPreferencesDomain::User)
                .map_err(Into::<error::Storage>::into)?,
            service: metadata::PROJECT_DIRS
                .as_ref()
                .map(|dirs| dirs.project_path().as_os_str())
                .ok_or(error::Storage::NoProjectDirs)?
                .to_string_lossy()
                .to_string(),
        })
    }

    fn account(identity: &Identity) -> String {
        format!("{}/{}", identity.context(), identity.name())
    }
}

#[async_trait]
impl KeyStore for Keychain {
    async fn read(&self, identity: &Identity) -> Result<Option<Credential>> {
        let result = self
            .delegate
            .find_generic_password(&self.service, &Self::account(identity));
        match result {
            Ok((password, _)) => Ok(Some(serde_json::from_slice(&password)?)),
            Err(err) if err.code() == ERR_SEC_ITEM_NOT_FOUND => Ok(None),
            Err(err) => Err(Into::<error::Storage>::into(err).into()),
        }
    }

    async fn write(&self, credential: &Credential) -> Result<Location> {
        self.delegate
            .set_generic_password(
                &self.service,
                &Self::account(credential.identity()),
                SecretVec::new(serde_json::to_vec(credential)?).expose_secret(),
            )
            .map_err(Into::<error::Storage>::into)?;
        Ok(self.location(credential.identity()))
    }

    fn location(&self, _identity: &Identity) -> Location {
        Location::Keychain
    }

    async fn delete(&self, identity: &Identity) -> Result<()> {
        let result = self
            .delegate
            .find_generic_password(&self.service, &Self::account(identity));
        match result {
            Ok((_, item)) => {
                item.delete();
                Ok(())
            }
            Err(err) if err.code() == ERR_SEC_ITEM_NOT_FOUND => {
                Err(error::Storage::NotFound(identity.clone()).into())
            }
            Err(err) => Err(Into::<error::Storage>::into(err).into()),
        }
    }
}
