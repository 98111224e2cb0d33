// SPDX-FileCopyrightText: 2024 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use log::debug;

use crate::{
    auth::AuthService,
    channel::Context,
    error::{Error, Result},
};

/// Asks the server whether calls have to be signed at all.
pub struct AuthRequired {
    service: Arc<dyn AuthService>,
}

impl AuthRequired {
    pub fn new(service: Arc<dyn AuthService>) -> Self {
        Self { service }
    }

    /// The probe carries none of the triggering call's metadata and is never
    /// intercepted itself. A failed probe is an error, not a "no".
    pub async fn check(&self, context: &Context) -> Result<bool> {
        let config = self
            .service
            .auth_config(context.detached())
            .await
            .map_err(|e| Error::AuthRequiredCheck(Box::new(e)))?;

        let required = config.requires_signature();
        debug!("Server requires signed calls: {}", required);
        Ok(required)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use crate::{
        auth::{AuthConfigSpec, ProviderSpec},
        channel::{Code, Status},
    };

    use super::*;

    struct Probe(Option<AuthConfigSpec>);

    #[async_trait]
    impl AuthService for Probe {
        async fn auth_config(&self, context: Context) -> Result<AuthConfigSpec> {
            assert!(context.metadata().is_empty());
            assert!(context.skips_interceptor());
            self.0
                .clone()
                .ok_or_else(|| Status::new(Code::Unavailable, "connection refused").into())
        }

        async fn register_public_key(&self, _: Context, _: &str, _: &str) -> Result<String> {
            unreachable!()
        }

        async fn await_public_key_confirmation(&self, _: Context, _: &str) -> Result<()> {
            unreachable!()
        }
    }

    fn caller_context() -> Context {
        Context::new()
            .with_metadata(crate::signature::SIGNATURE_KEY, "gatekey-v1 abc def")
            .with_metadata("nodes", "10.5.0.2")
    }

    #[tokio::test]
    async fn saml_alone_does_not_require_signing() -> Result<()> {
        let detector = AuthRequired::new(Arc::new(Probe(Some(AuthConfigSpec {
            saml: ProviderSpec { enabled: true },
            ..AuthConfigSpec::default()
        }))));

        assert!(!detector.check(&caller_context()).await?);
        Ok(())
    }

    #[tokio::test]
    async fn webauthn_requires_signing() -> Result<()> {
        let detector = AuthRequired::new(Arc::new(Probe(Some(AuthConfigSpec {
            webauthn: ProviderSpec { enabled: true },
            ..AuthConfigSpec::default()
        }))));

        assert!(detector.check(&caller_context()).await?);
        Ok(())
    }

    #[tokio::test]
    async fn failed_probe_is_an_error() {
        let detector = AuthRequired::new(Arc::new(Probe(None)));

        let result = detector.check(&caller_context()).await;
        assert!(matches!(result, Err(Error::AuthRequiredCheck(_))));
    }
}
