// SPDX-FileCopyrightText: 2022-2024 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    error::{self, Result},
    key::{Credential, Identity, Signer as _},
};

use super::{KeyStore, Location};

#[derive(Clone, Default)]
pub struct Memory {
    data: Arc<RwLock<HashMap<Identity, Credential>>>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyStore for Memory {
    async fn read(&self, identity: &Identity) -> Result<Option<Credential>> {
        let guard = self.data.read().await;
        Ok(guard.get(identity).cloned())
    }

    async fn write(&self, credential: &Credential) -> Result<Location> {
        let mut guard = self.data.write().await;
        _ = guard.insert(credential.identity().clone(), credential.clone());
        Ok(self.location(credential.identity()))
    }

    fn location(&self, _identity: &Identity) -> Location {
        Location::Memory
    }

    async fn delete(&self, identity: &Identity) -> Result<()> {
        let mut guard = self.data.write().await;
        guard
            .remove(identity)
            .map(|_| ())
            .ok_or_else(|| error::Storage::NotFound(identity.clone()).into())
    }
}
