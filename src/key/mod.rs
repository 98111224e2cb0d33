// SPDX-FileCopyrightText: 2024 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

//! Identities and the keys that prove them.

mod material;
mod service_account;

use std::{
    fmt,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use ed25519_dalek::{Signer as _, Verifier as _, VerifyingKey};
use pkcs8::{DecodePublicKey as _, EncodePublicKey as _, LineEnding};
use secrecy::ExposeSecret as _;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, TimestampSeconds};
use sha2::{Digest as _, Sha256};

use crate::{
    error::{self, Result},
    metadata,
};

pub use service_account::ServiceAccountKey;

/// How long an interactively registered key stays valid.
pub const USER_KEY_LIFETIME: Duration = Duration::from_secs(8 * 60 * 60);

/// How long a service account key stays valid unless told otherwise.
pub const SERVICE_ACCOUNT_KEY_LIFETIME: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Names a principal. The context tells apart the remote environments that
/// share one local key store; service accounts have no context.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity {
    context: String,
    name: String,
}

impl Identity {
    pub fn new(context: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            name: name.into(),
        }
    }

    pub fn service_account(name: impl Into<String>) -> Self {
        Self::new(String::new(), name)
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.context.is_empty() {
            write!(f, r#""{}""#, self.name.escape_default())
        } else {
            write!(
                f,
                r#""{}" (context "{}")"#,
                self.name.escape_default(),
                self.context.escape_default()
            )
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Signature(ed25519_dalek::Signature);

impl Signature {
    pub fn to_base64(&self) -> String {
        base64::encode(self.0.to_bytes())
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = base64::decode(encoded)?;
        Ok(Self(
            ed25519_dalek::Signature::from_slice(&bytes).map_err(error::Key::from)?,
        ))
    }
}

/// Anything that can prove an identity by signing outgoing calls.
pub trait Signer: Send + Sync {
    fn identity(&self) -> &Identity;

    fn fingerprint(&self) -> String;

    fn sign(&self, message: &[u8]) -> Result<Signature>;

    /// When the server stops accepting signatures from this signer, if ever.
    fn expires_at(&self) -> Option<SystemTime> {
        None
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    pub fn from_pem(pem: &str) -> Result<Self> {
        Ok(Self(
            VerifyingKey::from_public_key_pem(pem).map_err(error::Key::from)?,
        ))
    }

    pub fn to_pem(&self) -> Result<String> {
        Ok(self
            .0
            .to_public_key_pem(LineEnding::LF)
            .map_err(error::Key::from)?)
    }

    /// Lowercase hex SHA-256 digest of the raw key.
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(self.0.as_bytes()))
    }

    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<()> {
        self.0
            .verify(message, &signature.0)
            .map_err(|e| error::Key::from(e).into())
    }
}

/// A keypair bound to an identity.
#[serde_as]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Credential {
    identity: Identity,
    comment: String,
    key: material::SecretKey,
    #[serde_as(as = "Option<TimestampSeconds<i64>>")]
    #[serde(default)]
    expires_at: Option<SystemTime>,
}

impl Credential {
    pub fn generate(identity: Identity) -> Self {
        CredentialBuilder::new(identity).generate()
    }

    /// Wraps an existing armored private key, e.g. one handed out for a
    /// service account.
    pub fn from_pem(identity: Identity, pem: &str, expires_at: Option<SystemTime>) -> Result<Self> {
        Ok(Self {
            identity,
            comment: String::new(),
            key: material::SecretKey::new(material::KeyMaterial::from_pem(pem)?),
            expires_at,
        })
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub const fn expires_at(&self) -> Option<SystemTime> {
        self.expires_at
    }

    /// The armored private form, for persistence and export.
    pub fn armor(&self) -> Result<secrecy::SecretString> {
        self.key.expose_secret().to_pem()
    }

    /// The armored public form, for registration with the server.
    pub fn armor_public(&self) -> Result<String> {
        self.public_key().to_pem()
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.key.expose_secret().as_ref().verifying_key())
    }

    /// Checks that the credential can still sign for `identity` at `now`,
    /// returning the reason when it cannot.
    pub fn check_usable(&self, identity: &Identity, now: SystemTime) -> Result<(), String> {
        if &self.identity != identity {
            return Err(format!("the key was issued to {}", self.identity));
        }

        match self.expires_at {
            Some(expires_at) if expires_at <= now => Err("the key has expired".to_owned()),
            Some(_) | None => Ok(()),
        }
    }
}

impl Signer for Credential {
    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn fingerprint(&self) -> String {
        self.public_key().fingerprint()
    }

    fn sign(&self, message: &[u8]) -> Result<Signature> {
        Ok(Signature(self.key.expose_secret().as_ref().sign(message)))
    }

    fn expires_at(&self) -> Option<SystemTime> {
        self.expires_at
    }
}

pub struct CredentialBuilder<'rng> {
    identity: Identity,
    comment: String,
    lifetime: Option<Duration>,
    rng: Option<&'rng mut (dyn rand_core::CryptoRngCore + Send)>,
}

impl<'rng> CredentialBuilder<'rng> {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            comment: metadata::CLIENT_COMMENT.clone(),
            lifetime: Some(USER_KEY_LIFETIME),
            rng: None,
        }
    }

    #[must_use]
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    /// `None` produces a key that never expires.
    #[must_use]
    pub const fn with_lifetime(mut self, lifetime: Option<Duration>) -> Self {
        self.lifetime = lifetime;
        self
    }

    #[cfg(test)]
    pub(crate) fn with_rng(mut self, rng: &'rng mut (dyn rand_core::CryptoRngCore + Send)) -> Self {
        self.rng = Some(rng);
        self
    }

    pub fn generate(self) -> Credential {
        Credential {
            identity: self.identity,
            comment: self.comment,
            key: material::generate(self.rng),
            expires_at: self
                .lifetime
                .and_then(|lifetime| SystemTime::now().checked_add(lifetime))
                .map(whole_seconds),
        }
    }
}

/// Expiry times are persisted with second precision, so they are kept that
/// way from the start.
fn whole_seconds(time: SystemTime) -> SystemTime {
    match time.duration_since(UNIX_EPOCH) {
        Ok(since_epoch) => UNIX_EPOCH + Duration::from_secs(since_epoch.as_secs()),
        Err(_) => time,
    }
}
