// SPDX-FileCopyrightText: 2024 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    channel::{Call, Channel, Context},
    error::Result,
    resource,
};

use super::AuthConfigSpec;

pub(super) trait HasConstMethod {
    const METHOD: &'static str;
}

#[async_trait]
pub(super) trait Executor: HasConstMethod + Serialize + Send + Sized {
    type Response: for<'de> Deserialize<'de>;

    async fn execute<C: Channel + ?Sized>(self, channel: &C, context: Context) -> Result<Self::Response> {
        let payload = serde_json::to_value(&self)?;
        let resp = channel
            .unary(Call::new(Self::METHOD, context, payload))
            .await?;
        Ok(serde_json::from_value(resp)?)
    }
}

#[derive(Clone, Debug, Serialize)]
pub(super) struct GetResourceRequest {
    pub(super) namespace: String,
    #[serde(rename = "type")]
    pub(super) type_: String,
    pub(super) id: String,
}

impl From<resource::Metadata> for GetResourceRequest {
    fn from(value: resource::Metadata) -> Self {
        Self {
            namespace: value.namespace,
            type_: value.type_,
            id: value.id,
        }
    }
}

impl HasConstMethod for GetResourceRequest {
    const METHOD: &'static str = "/gatekey.resources.ResourceService/Get";
}

impl Executor for GetResourceRequest {
    type Response = resource::Resource<AuthConfigSpec>;
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct RegisterPublicKeyRequest {
    pub(super) identity: String,
    pub(super) public_key: String,
}

impl HasConstMethod for RegisterPublicKeyRequest {
    const METHOD: &'static str = "/gatekey.auth.AuthService/RegisterPublicKey";
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct RegisterPublicKeyResponse {
    pub(super) login_url: String,
}

impl Executor for RegisterPublicKeyRequest {
    type Response = RegisterPublicKeyResponse;
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct AwaitPublicKeyConfirmationRequest {
    pub(super) public_key_id: String,
}

impl HasConstMethod for AwaitPublicKeyConfirmationRequest {
    const METHOD: &'static str = "/gatekey.auth.AuthService/AwaitPublicKeyConfirmation";
}

#[derive(Clone, Debug, Deserialize)]
pub(super) struct Empty {}

impl Executor for AwaitPublicKeyConfirmationRequest {
    type Response = Empty;
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct CreateServiceAccountRequest {
    pub(super) name: String,
    pub(super) public_key: String,
}

impl HasConstMethod for CreateServiceAccountRequest {
    const METHOD: &'static str = "/gatekey.management.ManagementService/CreateServiceAccount";
}

impl Executor for CreateServiceAccountRequest {
    type Response = Empty;
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct RenewServiceAccountRequest {
    pub(super) name: String,
    pub(super) public_key: String,
}

impl HasConstMethod for RenewServiceAccountRequest {
    const METHOD: &'static str = "/gatekey.management.ManagementService/RenewServiceAccount";
}

impl Executor for RenewServiceAccountRequest {
    type Response = Empty;
}
