// SPDX-FileCopyrightText: 2022-2024 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use std::{convert::Infallible, io, result, sync::Arc};

use thiserror::Error;

use crate::channel;

pub type Result<T, E = Error> = result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO operation failed: {0}")]
    Io(#[from] io::Error),
    #[error("JSON format error: {0}")]
    Json(serde_json::Error),
    #[error("YAML format error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("base64 decoding error: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("credential error: {0}")]
    Credential(#[from] Credential),
    #[error("key material error: {0}")]
    Key(#[from] Key),
    #[error("credential renewal error: {0}")]
    Renewal(#[from] Renewal),
    #[error("could not determine whether the server requires authentication: {0}")]
    AuthRequiredCheck(Box<Error>),
    #[error("server returned status {}: {}", .0.code, .0.message)]
    Status(channel::Status),
    #[error("storage error: {0}")]
    Storage(#[from] Storage),
    #[error("access policy is invalid: {0}")]
    Policy(#[from] crate::policy::ValidationErrors),
    #[error("configuration error: {0}")]
    Config(#[from] Config),
    #[error("internal communication error: {0}")]
    Internal(#[from] Internal),
    #[error("command execution failed")]
    Command,
    #[error("{0}")]
    Shared(Arc<Error>),
}

impl Error {
    /// Whether the error describes a missing or unusable stored credential,
    /// looking through shared renewal outcomes.
    pub(crate) fn is_credential_unusable(&self) -> bool {
        // LINT: Every other kind of error is usable as is.
        #[allow(clippy::wildcard_enum_match_arm)]
        match *self {
            Self::Credential(Credential::NotFound(_) | Credential::Invalid(..)) => true,
            Self::Shared(ref inner) => inner.is_credential_unusable(),
            _ => false,
        }
    }

    /// Whether the server rejected the call because it did not accept the
    /// caller's identity.
    pub(crate) fn is_unauthenticated(&self) -> bool {
        // LINT: Only server statuses carry a code.
        #[allow(clippy::wildcard_enum_match_arm)]
        match *self {
            Self::Status(ref status) => status.code == channel::Code::Unauthenticated,
            Self::Shared(ref inner) => inner.is_unauthenticated(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        // LINT: Deliberate fall-through that should catch future cases added to
        // the enum.
        #[allow(clippy::wildcard_enum_match_arm)]
        match value.classify() {
            serde_json::error::Category::Io => Self::Io(value.into()),
            _ => Self::Json(value),
        }
    }
}

impl From<channel::Status> for Error {
    fn from(value: channel::Status) -> Self {
        Self::Status(value)
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(value: tokio::task::JoinError) -> Self {
        Self::Internal(value.into())
    }
}

impl From<Arc<Error>> for Error {
    fn from(value: Arc<Error>) -> Self {
        Self::Shared(value)
    }
}

impl From<Infallible> for Error {
    fn from(_: Infallible) -> Self {
        unreachable!()
    }
}

#[derive(Error, Debug)]
pub enum Credential {
    #[error("no credential is stored for {0}")]
    NotFound(crate::key::Identity),
    #[error("the stored credential for {0} cannot be used: {1}")]
    Invalid(crate::key::Identity, String),
}

#[derive(Error, Debug)]
pub enum Key {
    #[error("could not parse PKCS#8 private key: {0}")]
    PrivateKey(#[from] pkcs8::Error),
    #[error("could not parse public key: {0}")]
    PublicKey(#[from] pkcs8::spki::Error),
    #[error("invalid signature encoding: {0}")]
    Signature(#[from] ed25519_dalek::SignatureError),
    #[error("signature header is malformed")]
    MalformedHeader,
    #[error("signature was made by key {0}, not {1}")]
    FingerprintMismatch(String, String),
}

#[derive(Error, Debug)]
pub enum Renewal {
    #[error("the server refused to register the public key for {identity}: {source}")]
    RegistrationFailed {
        identity: String,
        #[source]
        source: Box<Error>,
    },
    #[error("timed out or cancelled while waiting for the new key for {0} to be confirmed")]
    ConfirmationTimedOutOrCancelled(String),
}

#[derive(Error, Debug)]
pub enum Storage {
    #[error("no stored credential to delete for {0}")]
    NotFound(crate::key::Identity),
    #[error("the data directory for this user could not be determined")]
    NoProjectDirs,
    #[cfg(feature = "secret-service")]
    #[error("secret service error: {0}")]
    SecretService(#[from] oo7::Error),
    #[cfg(feature = "keychain")]
    #[error("keychain error: {0}")]
    Keychain(#[from] security_framework::base::Error),
}

#[derive(Error, Debug)]
pub enum Config {
    #[error(r#"context "{}" is not defined"#, .0.escape_default())]
    UnknownContext(String),
    #[error("no context is selected")]
    NoContext,
    #[error(r#"context "{}" has no identity configured"#, .0.escape_default())]
    NoIdentity(String),
    #[error(r#"{variable} is not a valid URL ("{}"): {source}"#, .value.escape_default())]
    InvalidEndpoint {
        variable: &'static str,
        value: String,
        source: url::ParseError,
    },
}

#[derive(Error, Debug)]
pub enum Internal {
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
