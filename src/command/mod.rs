// SPDX-FileCopyrightText: 2022-2024 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use gatekey::{error::Result, storage};
#[cfg(any(feature = "secret-service", feature = "keychain"))]
use log::warn;

pub(crate) mod key;
pub(crate) mod policy;

/// State shared by all commands.
pub(crate) struct Environment {
    no_system_key_store: bool,
}

impl Environment {
    pub(crate) const fn new(no_system_key_store: bool) -> Self {
        Self {
            no_system_key_store,
        }
    }

    /// The best key store available, falling back to plain files and then to
    /// memory.
    pub(crate) async fn key_store(&self) -> Box<dyn storage::KeyStore> {
        if !self.no_system_key_store {
            #[cfg(feature = "secret-service")]
            match storage::SecretService::new().await {
                Ok(secret_service_storage) => return Box::new(secret_service_storage),
                Err(e) => {
                    warn!("We need to fall back to unencrypted file storage because we can't connect to the secret service: {}", e);
                }
            }

            #[cfg(feature = "keychain")]
            match storage::Keychain::new() {
                Ok(keychain_storage) => return Box::new(keychain_storage),
                Err(e) => {
                    warn!("We need to fall back to unencrypted file storage because we can't connect to Keychain: {}", e);
                }
            }
        }

        if let Some(file_storage) = storage::File::new() {
            return Box::new(file_storage);
        }

        Box::new(storage::Memory::new())
    }
}

#[async_trait]
pub(crate) trait Command {
    async fn execute(self, env: &Environment) -> Result<()>;
}
