// SPDX-FileCopyrightText: 2022-2024 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

//! Replacing a missing or unusable credential with a newly registered one.
//!
//! Renewal needs a human to approve the new key, so it can take minutes.
//! Callers asking to renew the same identity while a renewal is running join
//! it instead of starting another.

pub mod presenter;

use std::{collections::HashMap, sync::Arc, time::Duration};

use futures_util::{
    future::{BoxFuture, FutureExt as _, Shared},
    lock::Mutex,
};
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::{
    auth::AuthService,
    channel::Context,
    error::{self, Error, Result},
    key::{Credential, CredentialBuilder, Identity, Signer as _, USER_KEY_LIFETIME},
    storage::KeyStore,
};

use presenter::{Presenter, Request};

type Outcome = Result<Arc<Credential>, Arc<Error>>;

struct Flight {
    outcome: Shared<BoxFuture<'static, Outcome>>,
    cancel: CancellationToken,
    waiters: usize,
}

#[derive(Clone)]
struct Steps {
    store: Arc<dyn KeyStore>,
    service: Arc<dyn AuthService>,
    presenter: Arc<dyn Presenter>,
    confirmation_timeout: Option<Duration>,
    key_lifetime: Option<Duration>,
}

fn cancelled(identity: &Identity) -> Error {
    error::Renewal::ConfirmationTimedOutOrCancelled(identity.to_string()).into()
}

impl Steps {
    async fn run(self, identity: Identity, context: Context) -> Result<Credential> {
        match self.store.delete(&identity).await {
            Ok(()) => debug!("Removed the previous key for {}", identity),
            Err(Error::Storage(error::Storage::NotFound(_))) => {}
            Err(e) => return Err(e),
        }

        let credential = CredentialBuilder::new(identity.clone())
            .with_lifetime(self.key_lifetime)
            .generate();
        let fingerprint = credential.fingerprint();

        let login_url = self
            .service
            .register_public_key(context.clone(), identity.name(), &credential.armor_public()?)
            .await
            .map_err(|e| error::Renewal::RegistrationFailed {
                identity: identity.to_string(),
                source: Box::new(e),
            })?;
        debug!("Registered public key {} for {}", fingerprint, identity);

        let location = self.store.write(&credential).await?;
        info!("Stored unconfirmed key {} in {}", fingerprint, location);

        if let Err(e) = self
            .confirm(&identity, &fingerprint, login_url, &context)
            .await
        {
            self.discard(&identity, &fingerprint).await;
            return Err(e);
        }

        eprintln!(
            "Public key {} is now registered for user {}",
            fingerprint,
            identity.name()
        );
        eprintln!("Key saved to {}", location);
        Ok(credential)
    }

    async fn confirm(
        &self,
        identity: &Identity,
        fingerprint: &str,
        login_url: String,
        context: &Context,
    ) -> Result<()> {
        if !self
            .presenter
            .present(&Request::new(identity.clone(), login_url))
            .await?
        {
            warn!("No way to show the approval page for {} was found", identity);
        }

        let confirmation = async {
            let pending = self
                .service
                .await_public_key_confirmation(context.clone(), fingerprint);
            match self.confirmation_timeout {
                Some(timeout) => tokio::time::timeout(timeout, pending)
                    .await
                    .unwrap_or_else(|_| Err(cancelled(identity))),
                None => pending.await,
            }
        };

        tokio::select! {
            result = confirmation => result,
            () = context.cancellation().cancelled() => Err(cancelled(identity)),
        }
    }

    /// Removes the unconfirmed key, as long as nothing has replaced it since.
    async fn discard(&self, identity: &Identity, fingerprint: &str) {
        let result = match self.store.read(identity).await {
            Ok(Some(stored)) if stored.fingerprint() == fingerprint => {
                self.store.delete(identity).await
            }
            Ok(_) => return,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!("Could not remove the unconfirmed key for {}: {}", identity, e);
        }
    }
}

/// Runs renewals, at most one per identity at a time.
pub struct Renewer {
    steps: Steps,
    flights: Mutex<HashMap<Identity, Flight>>,
}

impl Renewer {
    pub fn new(store: Arc<dyn KeyStore>, service: Arc<dyn AuthService>) -> Self {
        Self {
            steps: Steps {
                store,
                service,
                presenter: Arc::new(presenter::from_env()),
                confirmation_timeout: None,
                key_lifetime: Some(USER_KEY_LIFETIME),
            },
            flights: Mutex::default(),
        }
    }

    #[must_use]
    pub fn with_presenter(mut self, presenter: Arc<dyn Presenter>) -> Self {
        self.steps.presenter = presenter;
        self
    }

    /// `None` waits for approval for as long as the caller does.
    #[must_use]
    pub const fn with_confirmation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.steps.confirmation_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_key_lifetime(mut self, lifetime: Option<Duration>) -> Self {
        self.steps.key_lifetime = lifetime;
        self
    }

    fn start(&self, identity: Identity) -> Flight {
        info!("Renewing the key for {}", identity);

        let cancel = CancellationToken::new();
        let context = Context::new()
            .with_cancellation(cancel.clone())
            .skipping_interceptor();
        let task = tokio::spawn(self.steps.clone().run(identity, context));

        Flight {
            outcome: async move {
                match task.await {
                    Ok(Ok(credential)) => Ok(Arc::new(credential)),
                    Ok(Err(e)) => Err(Arc::new(e)),
                    Err(e) => Err(Arc::new(Error::from(e))),
                }
            }
            .boxed()
            .shared(),
            cancel,
            waiters: 0,
        }
    }

    /// Renews the credential for `identity`, or waits for the renewal already
    /// under way. Cancelling `context` stops this caller from waiting; the
    /// renewal itself is only abandoned once every caller has stopped.
    pub async fn renew(&self, identity: &Identity, context: &Context) -> Result<Arc<Credential>> {
        let outcome = loop {
            let mut flights = self.flights.lock().await;
            let flight = flights
                .entry(identity.clone())
                .or_insert_with(|| self.start(identity.clone()));
            if !flight.cancel.is_cancelled() {
                flight.waiters += 1;
                break flight.outcome.clone();
            }

            // An abandoned renewal keeps its entry until it has cleaned up
            // after itself, so that it never runs alongside a new one.
            let abandoned = flight.outcome.clone();
            drop(flights);
            debug!("Waiting for the abandoned renewal for {} to finish", identity);
            tokio::select! {
                _ = abandoned.clone() => {}
                () = context.cancellation().cancelled() => return Err(cancelled(identity)),
            }

            let mut flights = self.flights.lock().await;
            if flights
                .get(identity)
                .is_some_and(|flight| flight.outcome.ptr_eq(&abandoned))
            {
                _ = flights.remove(identity);
            }
        };

        let result = tokio::select! {
            result = outcome.clone() => Some(result),
            () = context.cancellation().cancelled() => None,
        };

        let mut flights = self.flights.lock().await;
        if let Some(flight) = flights
            .get_mut(identity)
            .filter(|flight| flight.outcome.ptr_eq(&outcome))
        {
            flight.waiters -= 1;
            if result.is_some() {
                _ = flights.remove(identity);
            } else if flight.waiters == 0 {
                debug!("Abandoning the renewal for {}", identity);
                flight.cancel.cancel();
            }
        }
        drop(flights);

        match result {
            Some(outcome) => outcome.map_err(Error::Shared),
            None => Err(cancelled(identity)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;

    use crate::{
        auth::AuthConfigSpec,
        channel::{Code, Status},
        key::Signer as _,
        storage::{self, KeyStore as _},
    };

    use super::*;

    enum Confirm {
        Immediately,
        After(Duration),
        Never,
    }

    struct FakeAuth {
        confirm: Confirm,
        reject: bool,
        register_delay: Option<Duration>,
        registered: StdMutex<Vec<String>>,
        confirmed: StdMutex<Vec<String>>,
    }

    impl FakeAuth {
        fn new(confirm: Confirm) -> Arc<Self> {
            Arc::new(Self {
                confirm,
                reject: false,
                register_delay: None,
                registered: StdMutex::default(),
                confirmed: StdMutex::default(),
            })
        }

        fn rejecting() -> Arc<Self> {
            Arc::new(Self {
                confirm: Confirm::Immediately,
                reject: true,
                register_delay: None,
                registered: StdMutex::default(),
                confirmed: StdMutex::default(),
            })
        }

        fn slow_to_register(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                confirm: Confirm::Immediately,
                reject: false,
                register_delay: Some(delay),
                registered: StdMutex::default(),
                confirmed: StdMutex::default(),
            })
        }

        #[allow(clippy::unwrap_used)]
        fn registrations(&self) -> usize {
            self.registered.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl AuthService for FakeAuth {
        async fn auth_config(&self, _context: Context) -> Result<AuthConfigSpec> {
            Ok(AuthConfigSpec::default())
        }

        #[allow(clippy::unwrap_used)]
        async fn register_public_key(
            &self,
            context: Context,
            identity: &str,
            public_key: &str,
        ) -> Result<String> {
            assert!(context.skips_interceptor());
            if let Some(delay) = self.register_delay {
                tokio::time::sleep(delay).await;
            }
            if self.reject {
                return Err(Status::new(Code::PermissionDenied, "registration closed").into());
            }
            self.registered.lock().unwrap().push(public_key.to_owned());
            Ok(format!("https://example.com/authenticate?identity={identity}"))
        }

        #[allow(clippy::unwrap_used)]
        async fn await_public_key_confirmation(
            &self,
            _context: Context,
            fingerprint: &str,
        ) -> Result<()> {
            match self.confirm {
                Confirm::Immediately => {}
                Confirm::After(delay) => tokio::time::sleep(delay).await,
                Confirm::Never => futures_util::future::pending::<()>().await,
            }
            self.confirmed.lock().unwrap().push(fingerprint.to_owned());
            Ok(())
        }
    }

    #[derive(Default)]
    struct Recorder {
        urls: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl Presenter for Recorder {
        #[allow(clippy::unwrap_used)]
        async fn present(&self, req: &Request) -> Result<bool> {
            self.urls.lock().unwrap().push(req.login_url().to_owned());
            Ok(true)
        }
    }

    fn identity() -> Identity {
        Identity::new("default", "alice")
    }

    fn renewer(auth: &Arc<FakeAuth>, store: &storage::Memory, presenter: &Arc<Recorder>) -> Renewer {
        Renewer::new(Arc::new(store.clone()), Arc::clone(auth) as Arc<dyn AuthService>)
            .with_presenter(Arc::clone(presenter) as Arc<dyn Presenter>)
    }

    fn root_cause(e: &Error) -> &Error {
        match *e {
            Error::Shared(ref inner) => root_cause(inner),
            ref other => other,
        }
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn renewal_replaces_stored_credential() -> Result<()> {
        let store = storage::Memory::new();
        let old = Credential::generate(identity());
        _ = store.write(&old).await?;
        let auth = FakeAuth::new(Confirm::Immediately);
        let presenter = Arc::new(Recorder::default());

        let renewed = renewer(&auth, &store, &presenter)
            .renew(&identity(), &Context::new())
            .await?;
        assert_ne!(renewed.fingerprint(), old.fingerprint());
        assert_eq!(
            *auth.registered.lock().unwrap(),
            vec![renewed.armor_public()?]
        );
        assert_eq!(*auth.confirmed.lock().unwrap(), vec![renewed.fingerprint()]);
        assert_eq!(
            *presenter.urls.lock().unwrap(),
            vec!["https://example.com/authenticate?identity=alice".to_owned()]
        );

        let stored = store.read(&identity()).await?;
        assert_eq!(
            stored.map(|credential| credential.fingerprint()),
            Some(renewed.fingerprint())
        );
        Ok(())
    }

    #[tokio::test]
    async fn registration_failure_leaves_nothing_stored() -> Result<()> {
        let store = storage::Memory::new();
        _ = store.write(&Credential::generate(identity())).await?;
        let auth = FakeAuth::rejecting();

        let err = renewer(&auth, &store, &Arc::default())
            .renew(&identity(), &Context::new())
            .await
            .err();
        assert!(matches!(
            err.as_ref().map(root_cause),
            Some(Error::Renewal(error::Renewal::RegistrationFailed { .. }))
        ));
        assert!(store.read(&identity()).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn unconfirmed_key_is_discarded_after_timeout() -> Result<()> {
        let store = storage::Memory::new();
        let auth = FakeAuth::new(Confirm::Never);

        let err = renewer(&auth, &store, &Arc::default())
            .with_confirmation_timeout(Some(Duration::from_millis(10)))
            .renew(&identity(), &Context::new())
            .await
            .err();
        assert!(matches!(
            err.as_ref().map(root_cause),
            Some(Error::Renewal(error::Renewal::ConfirmationTimedOutOrCancelled(_)))
        ));
        assert_eq!(auth.registrations(), 1);
        assert!(store.read(&identity()).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn cancelled_caller_abandons_renewal() -> Result<()> {
        let store = storage::Memory::new();
        let auth = FakeAuth::new(Confirm::Never);
        let renewer = renewer(&auth, &store, &Arc::default());
        let alice = identity();
        let cancel = CancellationToken::new();
        let context = Context::new().with_cancellation(cancel.clone());

        let (result, ()) = tokio::join!(renewer.renew(&alice, &context), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel.cancel();
        });
        assert!(matches!(
            result,
            Err(Error::Renewal(error::Renewal::ConfirmationTimedOutOrCancelled(_)))
        ));
        assert!(renewer
            .flights
            .lock()
            .await
            .get(&alice)
            .is_some_and(|flight| flight.cancel.is_cancelled()));

        // Give the abandoned flow a chance to clean up after itself.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.read(&identity()).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_registration() -> Result<()> {
        let store = storage::Memory::new();
        let auth = FakeAuth::new(Confirm::After(Duration::from_millis(10)));
        let renewer = renewer(&auth, &store, &Arc::default());

        let alice = identity();
        let context = Context::new();

        let (first, second, third) = tokio::join!(
            renewer.renew(&alice, &context),
            renewer.renew(&alice, &context),
            renewer.renew(&alice, &context),
        );
        let (first, second, third) = (first?, second?, third?);
        assert_eq!(auth.registrations(), 1);
        assert_eq!(first.fingerprint(), second.fingerprint());
        assert_eq!(first.fingerprint(), third.fingerprint());
        Ok(())
    }

    #[tokio::test]
    async fn impatient_caller_does_not_abort_shared_renewal() -> Result<()> {
        let store = storage::Memory::new();
        let auth = FakeAuth::new(Confirm::After(Duration::from_millis(50)));
        let renewer = renewer(&auth, &store, &Arc::default());
        let cancel = CancellationToken::new();
        let impatient = Context::new().with_cancellation(cancel.clone());
        let waiting = Context::new();
        let alice = identity();

        let (gave_up, patient, ()) = tokio::join!(
            renewer.renew(&alice, &impatient),
            renewer.renew(&alice, &waiting),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                cancel.cancel();
            },
        );
        assert!(gave_up.is_err());
        let patient = patient?;
        assert_eq!(auth.registrations(), 1);
        assert_eq!(
            store
                .read(&identity())
                .await?
                .map(|credential| credential.fingerprint()),
            Some(patient.fingerprint())
        );
        Ok(())
    }

    #[tokio::test]
    async fn separate_identities_renew_independently() -> Result<()> {
        let store = storage::Memory::new();
        let auth = FakeAuth::new(Confirm::Immediately);
        let renewer = renewer(&auth, &store, &Arc::default());
        let alice = identity();
        let bob = Identity::new("default", "bob");
        let context = Context::new();

        let (for_alice, for_bob) = tokio::join!(
            renewer.renew(&alice, &context),
            renewer.renew(&bob, &context),
        );
        assert_ne!(for_alice?.fingerprint(), for_bob?.fingerprint());
        assert_eq!(auth.registrations(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn new_renewal_waits_for_abandoned_one_to_clean_up() -> Result<()> {
        let store = storage::Memory::new();
        let auth = FakeAuth::slow_to_register(Duration::from_millis(50));
        let renewer = renewer(&auth, &store, &Arc::default());
        let alice = identity();
        let cancel = CancellationToken::new();
        let impatient = Context::new().with_cancellation(cancel.clone());

        let (gave_up, ()) = tokio::join!(renewer.renew(&alice, &impatient), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel.cancel();
        });
        assert!(gave_up.is_err());

        let renewed = renewer.renew(&alice, &Context::new()).await?;
        assert_eq!(auth.registrations(), 2);
        assert_eq!(
            store
                .read(&alice)
                .await?
                .map(|credential| credential.fingerprint()),
            Some(renewed.fingerprint())
        );
        Ok(())
    }
}
