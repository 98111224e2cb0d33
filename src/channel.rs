// SPDX-FileCopyrightText: 2024 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

//! The boundary between this crate and whatever transport carries calls to
//! the remote API.

use std::{collections::BTreeMap, fmt, sync::Arc};

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Outgoing call metadata, kept sorted so that it has one canonical form.
pub type Metadata = BTreeMap<String, String>;

/// Per-call state that travels alongside the payload.
#[derive(Clone, Debug, Default)]
pub struct Context {
    metadata: Metadata,
    cancel: CancellationToken,
    skip_interceptor: bool,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        _ = self.metadata.insert(key.into(), value.into());
        self
    }

    /// Marks the call so that signing interceptors pass it through untouched.
    #[must_use]
    pub fn skipping_interceptor(mut self) -> Self {
        self.skip_interceptor = true;
        self
    }

    /// A context for calls the interceptor makes on its own behalf: no
    /// metadata from the triggering call, marked to bypass interception, and
    /// still cancelled along with the triggering call.
    #[must_use]
    pub fn detached(&self) -> Self {
        Self {
            metadata: Metadata::new(),
            cancel: self.cancel.clone(),
            skip_interceptor: true,
        }
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub const fn skips_interceptor(&self) -> bool {
        self.skip_interceptor
    }
}

#[derive(Clone, Debug)]
pub struct Call {
    pub method: String,
    pub context: Context,
    pub payload: serde_json::Value,
}

impl Call {
    pub fn new(method: impl Into<String>, context: Context, payload: serde_json::Value) -> Self {
        Self {
            method: method.into(),
            context,
            payload,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Code {
    Cancelled,
    Unknown,
    NotFound,
    PermissionDenied,
    Unauthenticated,
    Unavailable,
    Internal,
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
            Self::NotFound => "not found",
            Self::PermissionDenied => "permission denied",
            Self::Unauthenticated => "unauthenticated",
            Self::Unavailable => "unavailable",
            Self::Internal => "internal",
        })
    }
}

/// A failure reported by the server for one call.
#[derive(Clone, Debug)]
pub struct Status {
    pub code: Code,
    pub message: String,
}

impl Status {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

pub type ResponseStream = BoxStream<'static, Result<serde_json::Value>>;

#[async_trait]
pub trait Channel: Send + Sync {
    async fn unary(&self, call: Call) -> Result<serde_json::Value>;

    /// Establishes a server stream. Everything about the call is decided
    /// here; individual messages carry no further metadata.
    async fn stream(&self, call: Call) -> Result<ResponseStream>;
}

#[async_trait]
impl<T: Channel + ?Sized> Channel for Arc<T> {
    async fn unary(&self, call: Call) -> Result<serde_json::Value> {
        (**self).unary(call).await
    }

    async fn stream(&self, call: Call) -> Result<ResponseStream> {
        (**self).stream(call).await
    }
}

#[async_trait]
impl<T: Channel + ?Sized> Channel for Box<T> {
    async fn unary(&self, call: Call) -> Result<serde_json::Value> {
        (**self).unary(call).await
    }

    async fn stream(&self, call: Call) -> Result<ResponseStream> {
        (**self).stream(call).await
    }
}
