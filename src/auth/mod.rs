// SPDX-FileCopyrightText: 2024 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

//! The server-side authentication endpoints the client depends on.

mod api;

use std::time::Duration;

use async_trait::async_trait;
use log::info;
use serde::{Deserialize, Serialize};

use crate::{
    channel::{Channel, Context},
    error::Result,
    key::{CredentialBuilder, Identity, ServiceAccountKey, Signer as _},
    resource,
};

use api::Executor as _;

pub const AUTH_CONFIG_TYPE: &str = "AuthConfigs.gatekey.dev";
pub const AUTH_CONFIG_ID: &str = "auth-config";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProviderSpec {
    #[serde(default)]
    pub enabled: bool,
}

/// The server's singleton authentication configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct AuthConfigSpec {
    #[serde(default)]
    pub auth0: ProviderSpec,
    #[serde(default)]
    pub webauthn: ProviderSpec,
    #[serde(default)]
    pub saml: ProviderSpec,
}

impl AuthConfigSpec {
    /// Signed requests are required as soon as either interactive provider
    /// is turned on.
    pub const fn requires_signature(&self) -> bool {
        self.auth0.enabled || self.webauthn.enabled
    }
}

pub fn auth_config_metadata() -> resource::Metadata {
    resource::Metadata::new(resource::DEFAULT_NAMESPACE, AUTH_CONFIG_TYPE, AUTH_CONFIG_ID)
}

#[async_trait]
pub trait AuthService: Send + Sync {
    async fn auth_config(&self, context: Context) -> Result<AuthConfigSpec>;

    /// Registers `public_key` for `identity` and returns the URL the operator
    /// must visit to approve it.
    async fn register_public_key(
        &self,
        context: Context,
        identity: &str,
        public_key: &str,
    ) -> Result<String>;

    /// Resolves once the key with the given fingerprint has been approved.
    /// May take as long as a human needs.
    async fn await_public_key_confirmation(&self, context: Context, fingerprint: &str)
        -> Result<()>;
}

/// Talks to the authentication endpoints over a raw (uninterceptored)
/// channel.
pub struct ChannelAuthService<C: Channel> {
    channel: C,
}

impl<C: Channel> ChannelAuthService<C> {
    pub const fn new(channel: C) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl<C: Channel> AuthService for ChannelAuthService<C> {
    async fn auth_config(&self, context: Context) -> Result<AuthConfigSpec> {
        let resp = api::GetResourceRequest::from(auth_config_metadata())
            .execute(&self.channel, context.skipping_interceptor())
            .await?;
        Ok(resp.spec)
    }

    async fn register_public_key(
        &self,
        context: Context,
        identity: &str,
        public_key: &str,
    ) -> Result<String> {
        let resp = api::RegisterPublicKeyRequest {
            identity: identity.to_owned(),
            public_key: public_key.to_owned(),
        }
        .execute(&self.channel, context.skipping_interceptor())
        .await?;
        Ok(resp.login_url)
    }

    async fn await_public_key_confirmation(
        &self,
        context: Context,
        fingerprint: &str,
    ) -> Result<()> {
        let api::Empty {} = api::AwaitPublicKeyConfirmationRequest {
            public_key_id: fingerprint.to_owned(),
        }
        .execute(&self.channel, context.skipping_interceptor())
        .await?;
        Ok(())
    }
}

impl<C: Channel> ChannelAuthService<C> {
    /// Registers the public key of a new service account. The call is not
    /// marked to bypass interception, since only a signed operator may make
    /// it.
    pub async fn create_service_account(
        &self,
        context: Context,
        name: &str,
        public_key: &str,
    ) -> Result<()> {
        let api::Empty {} = api::CreateServiceAccountRequest {
            name: name.to_owned(),
            public_key: public_key.to_owned(),
        }
        .execute(&self.channel, context)
        .await?;
        Ok(())
    }

    /// Replaces the public key of an existing service account.
    pub async fn renew_service_account(
        &self,
        context: Context,
        name: &str,
        public_key: &str,
    ) -> Result<()> {
        let api::Empty {} = api::RenewServiceAccountRequest {
            name: name.to_owned(),
            public_key: public_key.to_owned(),
        }
        .execute(&self.channel, context)
        .await?;
        Ok(())
    }

    /// Generates a key for the service account `name`, registers it with the
    /// server, and returns it in its portable form.
    pub async fn issue_service_account_key(
        &self,
        context: Context,
        name: &str,
        lifetime: Duration,
        renew: bool,
    ) -> Result<ServiceAccountKey> {
        let credential = CredentialBuilder::new(Identity::service_account(name))
            .with_lifetime(Some(lifetime))
            .generate();
        let public_key = credential.armor_public()?;

        if renew {
            self.renew_service_account(context, name, &public_key).await?;
        } else {
            self.create_service_account(context, name, &public_key).await?;
        }
        info!(
            "Registered key {} for service account {}",
            credential.fingerprint(),
            name
        );
        ServiceAccountKey::new(name, &credential)
    }
}
