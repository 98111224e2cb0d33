// SPDX-FileCopyrightText: 2024 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

//! A [`Channel`] wrapper that signs outgoing calls when the server asks for
//! it, renewing the caller's credential along the way if necessary.

mod auth_required;

use std::{sync::Arc, time::SystemTime};

use async_trait::async_trait;
use log::{debug, info, warn};

use crate::{
    auth::{AuthService, ChannelAuthService},
    channel::{Call, Channel, Context, ResponseStream},
    error::Result,
    key::Signer,
    renewal::Renewer,
    signature,
    signer::SignerConfig,
    storage::KeyStore,
};

pub use auth_required::AuthRequired;

/// What the interceptor did to a call before forwarding it.
enum Prepared {
    Unsigned(Call),
    Signed {
        call: Call,
        signer: Arc<dyn Signer>,
        renewed: bool,
    },
}

pub struct Interceptor<C> {
    inner: C,
    config: SignerConfig,
    store: Arc<dyn KeyStore>,
    detector: AuthRequired,
    renewer: Renewer,
}

impl<C: Channel + Clone + 'static> Interceptor<C> {
    /// Uses `inner` directly for the authentication endpoints as well.
    pub fn for_channel(inner: C, config: SignerConfig, store: Arc<dyn KeyStore>) -> Self {
        let service = Arc::new(ChannelAuthService::new(inner.clone()));
        Self::new(inner, config, store, service)
    }
}

impl<C: Channel> Interceptor<C> {
    pub fn new(
        inner: C,
        config: SignerConfig,
        store: Arc<dyn KeyStore>,
        service: Arc<dyn AuthService>,
    ) -> Self {
        Self {
            inner,
            config,
            renewer: Renewer::new(Arc::clone(&store), Arc::clone(&service)),
            store,
            detector: AuthRequired::new(service),
        }
    }

    /// Replaces the default renewer, e.g. to change how approval pages are
    /// shown or how long to wait for them.
    #[must_use]
    pub fn with_renewer(mut self, renewer: Renewer) -> Self {
        self.renewer = renewer;
        self
    }

    pub const fn config(&self) -> &SignerConfig {
        &self.config
    }

    async fn signer(&self, context: &Context) -> Result<(Arc<dyn Signer>, bool)> {
        match self.config.resolve(&*self.store).await {
            Ok(signer) => Ok((signer, false)),
            Err(e) if e.is_credential_unusable() && self.config.is_renewable() => {
                info!("{}", e);
                let credential: Arc<dyn Signer> = self
                    .renewer
                    .renew(self.config.identity(), context)
                    .await?;
                Ok((credential, true))
            }
            Err(e) => Err(e),
        }
    }

    async fn prepare(&self, mut call: Call) -> Result<Prepared> {
        if call.context.skips_interceptor() {
            return Ok(Prepared::Unsigned(call));
        }

        if !self.detector.check(&call.context).await? {
            return Ok(Prepared::Unsigned(call));
        }

        let (signer, renewed) = self.signer(&call.context).await?;
        signature::sign(&mut call, &*signer, SystemTime::now())?;
        debug!(
            "Signed {} as {} with key {}",
            call.method,
            signer.identity(),
            signer.fingerprint()
        );

        Ok(Prepared::Signed {
            call,
            signer,
            renewed,
        })
    }
}

#[async_trait]
impl<C: Channel> Channel for Interceptor<C> {
    async fn unary(&self, call: Call) -> Result<serde_json::Value> {
        let (call, signer, renewed) = match self.prepare(call).await? {
            Prepared::Unsigned(call) => return self.inner.unary(call).await,
            Prepared::Signed {
                call,
                signer,
                renewed,
            } => (call, signer, renewed),
        };

        // A retry is only worth it if a different key could come out of it.
        let retry = (!renewed && self.config.is_renewable()).then(|| call.clone());
        match self.inner.unary(call).await {
            Err(e) if e.is_unauthenticated() => match retry {
                Some(mut call) => {
                    warn!(
                        "Server rejected key {} for {}; renewing",
                        signer.fingerprint(),
                        signer.identity()
                    );
                    let credential = self
                        .renewer
                        .renew(self.config.identity(), &call.context)
                        .await?;
                    signature::sign(&mut call, &*credential, SystemTime::now())?;
                    self.inner.unary(call).await
                }
                None => Err(e),
            },
            result => result,
        }
    }

    async fn stream(&self, call: Call) -> Result<ResponseStream> {
        match self.prepare(call).await? {
            Prepared::Unsigned(call) | Prepared::Signed { call, .. } => {
                self.inner.stream(call).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicBool, AtomicUsize, Ordering},
            Mutex as StdMutex,
        },
        time::Duration,
    };

    use futures_util::{stream, StreamExt as _, TryStreamExt as _};
    use serde_json::json;

    use crate::{
        auth::{AuthConfigSpec, ProviderSpec},
        channel::{Code, Status},
        error::{self, Error},
        key::{Credential, CredentialBuilder, Identity},
        renewal::presenter::{Presenter, Request},
        storage::{self, Location},
    };

    use super::*;

    #[derive(Default)]
    struct FakeChannel {
        calls: StdMutex<Vec<Call>>,
        reject_next: AtomicBool,
    }

    impl FakeChannel {
        #[allow(clippy::unwrap_used)]
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Channel for FakeChannel {
        #[allow(clippy::unwrap_used)]
        async fn unary(&self, call: Call) -> Result<serde_json::Value> {
            self.calls.lock().unwrap().push(call);
            if self.reject_next.swap(false, Ordering::SeqCst) {
                return Err(Status::new(Code::Unauthenticated, "unknown key").into());
            }
            Ok(json!({"ok": true}))
        }

        #[allow(clippy::unwrap_used)]
        async fn stream(&self, call: Call) -> Result<ResponseStream> {
            self.calls.lock().unwrap().push(call);
            Ok(stream::iter(vec![Ok(json!(1)), Ok(json!(2))]).boxed())
        }
    }

    struct FakeAuth {
        required: Option<bool>,
        probes: AtomicUsize,
        registrations: AtomicUsize,
    }

    impl FakeAuth {
        fn new(required: Option<bool>) -> Arc<Self> {
            Arc::new(Self {
                required,
                probes: AtomicUsize::new(0),
                registrations: AtomicUsize::new(0),
            })
        }

        fn registrations(&self) -> usize {
            self.registrations.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AuthService for FakeAuth {
        async fn auth_config(&self, _context: Context) -> Result<AuthConfigSpec> {
            _ = self.probes.fetch_add(1, Ordering::SeqCst);
            let required = self
                .required
                .ok_or_else(|| Status::new(Code::Unavailable, "connection refused"))?;
            Ok(AuthConfigSpec {
                webauthn: ProviderSpec { enabled: required },
                ..AuthConfigSpec::default()
            })
        }

        async fn register_public_key(&self, _: Context, _: &str, _: &str) -> Result<String> {
            _ = self.registrations.fetch_add(1, Ordering::SeqCst);
            Ok("https://example.com/authenticate".to_owned())
        }

        async fn await_public_key_confirmation(&self, _: Context, _: &str) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(())
        }
    }

    struct Silent;

    #[async_trait]
    impl Presenter for Silent {
        async fn present(&self, _req: &Request) -> Result<bool> {
            Ok(true)
        }
    }

    #[derive(Default)]
    struct CountingStore {
        inner: storage::Memory,
        reads: AtomicUsize,
    }

    #[async_trait]
    impl KeyStore for CountingStore {
        async fn read(&self, identity: &Identity) -> Result<Option<Credential>> {
            _ = self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.read(identity).await
        }

        async fn write(&self, credential: &Credential) -> Result<Location> {
            self.inner.write(credential).await
        }

        async fn delete(&self, identity: &Identity) -> Result<()> {
            self.inner.delete(identity).await
        }

        fn location(&self, identity: &Identity) -> Location {
            self.inner.location(identity)
        }
    }

    fn identity() -> Identity {
        Identity::new("default", "alice")
    }

    fn interceptor(
        config: SignerConfig,
        channel: &Arc<FakeChannel>,
        store: &Arc<CountingStore>,
        auth: &Arc<FakeAuth>,
    ) -> Interceptor<Arc<FakeChannel>> {
        let store = Arc::clone(store) as Arc<dyn KeyStore>;
        let auth = Arc::clone(auth) as Arc<dyn AuthService>;
        Interceptor::new(Arc::clone(channel), config, Arc::clone(&store), Arc::clone(&auth))
            .with_renewer(Renewer::new(store, auth).with_presenter(Arc::new(Silent)))
    }

    fn call() -> Call {
        Call::new(
            "/gatekey.resources.ResourceService/List",
            Context::new().with_metadata("nodes", "10.5.0.2"),
            json!({"namespace": "default", "type": "Clusters.gatekey.dev"}),
        )
    }

    async fn stored(store: &CountingStore) -> Result<Credential> {
        let credential = store.inner.read(&identity()).await?;
        credential.ok_or_else(|| error::Credential::NotFound(identity()).into())
    }

    #[tokio::test]
    async fn unsigned_when_server_does_not_require_signing() -> Result<()> {
        let channel = Arc::default();
        let store = Arc::default();
        let auth = FakeAuth::new(Some(false));

        _ = interceptor(SignerConfig::Dynamic(identity()), &channel, &store, &auth)
            .unary(call())
            .await?;

        let calls = channel.calls();
        assert_eq!(calls.len(), 1);
        assert!(!signature::is_signed(calls[0].context.metadata()));
        assert_eq!(store.reads.load(Ordering::SeqCst), 0);
        assert_eq!(auth.registrations(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn stored_credential_signs_call() -> Result<()> {
        let channel = Arc::default();
        let store = Arc::<CountingStore>::default();
        let auth = FakeAuth::new(Some(true));
        let credential = Credential::generate(identity());
        _ = store.inner.write(&credential).await?;

        _ = interceptor(SignerConfig::Dynamic(identity()), &channel, &store, &auth)
            .unary(call())
            .await?;

        let calls = channel.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            signature::verify(&calls[0], &credential.public_key())?,
            "alice"
        );
        assert_eq!(calls[0].context.metadata()["nodes"], "10.5.0.2");
        assert_eq!(auth.registrations(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn missing_credential_is_renewed_once() -> Result<()> {
        let channel = Arc::default();
        let store = Arc::default();
        let auth = FakeAuth::new(Some(true));

        _ = interceptor(SignerConfig::Dynamic(identity()), &channel, &store, &auth)
            .unary(call())
            .await?;

        assert_eq!(auth.registrations(), 1);
        let calls = channel.calls();
        assert_eq!(calls.len(), 1);
        signature::verify(&calls[0], &stored(&store).await?.public_key())?;
        Ok(())
    }

    #[tokio::test]
    async fn expired_credential_is_renewed_once() -> Result<()> {
        let channel = Arc::default();
        let store = Arc::<CountingStore>::default();
        let auth = FakeAuth::new(Some(true));
        let expired = CredentialBuilder::new(identity())
            .with_lifetime(Some(Duration::ZERO))
            .generate();
        _ = store.inner.write(&expired).await?;

        _ = interceptor(SignerConfig::Dynamic(identity()), &channel, &store, &auth)
            .unary(call())
            .await?;

        assert_eq!(auth.registrations(), 1);
        let renewed = stored(&store).await?;
        assert_ne!(renewed.fingerprint(), expired.fingerprint());
        let calls = channel.calls();
        assert_eq!(calls.len(), 1);
        signature::verify(&calls[0], &renewed.public_key())?;
        Ok(())
    }

    #[tokio::test]
    async fn expired_static_signer_is_terminal() {
        let channel = Arc::default();
        let store = Arc::default();
        let auth = FakeAuth::new(Some(true));
        let credential = CredentialBuilder::new(Identity::service_account("ci"))
            .with_lifetime(Some(Duration::ZERO))
            .generate();

        let result = interceptor(
            SignerConfig::Static(Arc::new(credential)),
            &channel,
            &store,
            &auth,
        )
        .unary(call())
        .await;
        assert!(matches!(
            result,
            Err(Error::Credential(error::Credential::Invalid(..)))
        ));
        assert_eq!(auth.registrations(), 0);
        assert!(channel.calls().is_empty());
    }

    #[tokio::test]
    async fn failed_probe_aborts_call() {
        let channel = Arc::default();
        let store = Arc::default();
        let auth = FakeAuth::new(None);

        let result = interceptor(SignerConfig::Dynamic(identity()), &channel, &store, &auth)
            .unary(call())
            .await;
        assert!(matches!(result, Err(Error::AuthRequiredCheck(_))));
        assert!(channel.calls().is_empty());
    }

    #[tokio::test]
    async fn marked_calls_pass_through() -> Result<()> {
        let channel = Arc::default();
        let store = Arc::default();
        let auth = FakeAuth::new(Some(true));
        let mut call = call();
        call.context = call.context.skipping_interceptor();

        _ = interceptor(SignerConfig::Dynamic(identity()), &channel, &store, &auth)
            .unary(call)
            .await?;

        assert_eq!(auth.probes.load(Ordering::SeqCst), 0);
        assert!(!signature::is_signed(channel.calls()[0].context.metadata()));
        Ok(())
    }

    #[tokio::test]
    async fn rejected_key_is_renewed_and_call_retried() -> Result<()> {
        let channel = Arc::new(FakeChannel {
            reject_next: AtomicBool::new(true),
            ..FakeChannel::default()
        });
        let store = Arc::<CountingStore>::default();
        let auth = FakeAuth::new(Some(true));
        let old = Credential::generate(identity());
        _ = store.inner.write(&old).await?;

        _ = interceptor(SignerConfig::Dynamic(identity()), &channel, &store, &auth)
            .unary(call())
            .await?;

        assert_eq!(auth.registrations(), 1);
        let calls = channel.calls();
        assert_eq!(calls.len(), 2);
        signature::verify(&calls[0], &old.public_key())?;
        signature::verify(&calls[1], &stored(&store).await?.public_key())?;
        Ok(())
    }

    #[tokio::test]
    async fn rejected_static_key_is_not_retried() {
        let channel = Arc::new(FakeChannel {
            reject_next: AtomicBool::new(true),
            ..FakeChannel::default()
        });
        let store = Arc::default();
        let auth = FakeAuth::new(Some(true));
        let config = SignerConfig::Static(Arc::new(Credential::generate(
            Identity::service_account("ci"),
        )));

        let result = interceptor(config, &channel, &store, &auth)
            .unary(call())
            .await;
        assert!(result.is_err_and(|e| e.is_unauthenticated()));
        assert_eq!(auth.registrations(), 0);
        assert_eq!(channel.calls().len(), 1);
    }

    #[tokio::test]
    async fn stream_is_signed_at_establishment() -> Result<()> {
        let channel = Arc::default();
        let store = Arc::default();
        let auth = FakeAuth::new(Some(true));

        let messages: Vec<_> =
            interceptor(SignerConfig::Dynamic(identity()), &channel, &store, &auth)
                .stream(call())
                .await?
                .try_collect()
                .await?;

        assert_eq!(messages, vec![json!(1), json!(2)]);
        assert_eq!(auth.registrations(), 1);
        let calls = channel.calls();
        assert_eq!(calls.len(), 1);
        signature::verify(&calls[0], &stored(&store).await?.public_key())?;
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_calls_share_one_renewal() -> Result<()> {
        let channel = Arc::default();
        let store = Arc::default();
        let auth = FakeAuth::new(Some(true));
        let interceptor = interceptor(SignerConfig::Dynamic(identity()), &channel, &store, &auth);

        let (first, second, third) = tokio::join!(
            interceptor.unary(call()),
            interceptor.unary(call()),
            interceptor.unary(call()),
        );
        _ = (first?, second?, third?);

        assert_eq!(auth.registrations(), 1);
        let public_key = stored(&store).await?.public_key();
        for call in channel.calls() {
            signature::verify(&call, &public_key)?;
        }
        Ok(())
    }
}
