// SPDX-FileCopyrightText: 2022-2024 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

//! Local persistence for credentials, keyed by identity.

mod file;
#[cfg(feature = "keychain")]
mod keychain;
mod memory;
#[cfg(feature = "secret-service")]
mod secret_service;

use std::{fmt, path::PathBuf, sync::Arc};

use async_trait::async_trait;

use crate::{
    error::Result,
    key::{Credential, Identity},
};

pub use file::File;
#[cfg(feature = "keychain")]
pub use keychain::Keychain;
pub use memory::Memory;
#[cfg(feature = "secret-service")]
pub use secret_service::SecretService;

/// Where a credential ended up after being written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Location {
    Memory,
    File(PathBuf),
    SecretService,
    Keychain,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Memory => f.write_str("memory"),
            Self::File(ref path) => write!(f, "{}", path.display()),
            Self::SecretService => f.write_str("the secret service"),
            Self::Keychain => f.write_str("the login keychain"),
        }
    }
}

#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Returns `None` when nothing is stored for the identity.
    async fn read(&self, identity: &Identity) -> Result<Option<Credential>>;

    async fn write(&self, credential: &Credential) -> Result<Location>;

    /// Fails with [`crate::error::Storage::NotFound`] when nothing is stored
    /// for the identity.
    async fn delete(&self, identity: &Identity) -> Result<()>;

    /// Where a credential for the identity is or would be kept.
    fn location(&self, identity: &Identity) -> Location;
}

#[async_trait]
impl<T: KeyStore + ?Sized> KeyStore for Box<T> {
    async fn read(&self, identity: &Identity) -> Result<Option<Credential>> {
        (**self).read(identity).await
    }

    async fn write(&self, credential: &Credential) -> Result<Location> {
        (**self).write(credential).await
    }

    async fn delete(&self, identity: &Identity) -> Result<()> {
        (**self).delete(identity).await
    }

    fn location(&self, identity: &Identity) -> Location {
        (**self).location(identity)
    }
}

#[async_trait]
impl<T: KeyStore + ?Sized> KeyStore for Arc<T> {
    async fn read(&self, identity: &Identity) -> Result<Option<Credential>> {
        (**self).read(identity).await
    }

    async fn write(&self, credential: &Credential) -> Result<Location> {
        (**self).write(credential).await
    }

    async fn delete(&self, identity: &Identity) -> Result<()> {
        (**self).delete(identity).await
    }

    fn location(&self, identity: &Identity) -> Location {
        (**self).location(identity)
    }
}
