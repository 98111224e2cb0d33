// SPDX-FileCopyrightText: 2024 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

//! Attaching and checking request signatures.
//!
//! A signed call carries three metadata entries: the signer's identity, the
//! signing time, and `gatekey-v1 <fingerprint> <signature>`. The signature
//! covers a JSON document holding the signature version, the method, every
//! other metadata entry (the identity and timestamp included), and a SHA-256
//! digest of the payload.

use std::{
    collections::BTreeMap,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::Serialize;
use sha2::{Digest as _, Sha256};

use crate::{
    channel::{Call, Metadata},
    error::{self, Result},
    key::{PublicKey, Signature, Signer},
};

pub const IDENTITY_KEY: &str = "x-gatekey-identity";
pub const TIMESTAMP_KEY: &str = "x-gatekey-timestamp";
pub const SIGNATURE_KEY: &str = "x-gatekey-signature";

const SIGNATURE_VERSION: &str = "gatekey-v1";

const RESERVED_KEYS: [&str; 3] = [IDENTITY_KEY, TIMESTAMP_KEY, SIGNATURE_KEY];

#[derive(Serialize)]
struct CanonicalMessage<'a> {
    version: &'a str,
    method: &'a str,
    metadata: BTreeMap<&'a str, &'a str>,
    payload_sha256: String,
}

fn canonical_bytes(call: &Call) -> Result<Vec<u8>> {
    let payload = serde_json::to_vec(&call.payload)?;
    let message = CanonicalMessage {
        version: SIGNATURE_VERSION,
        method: &call.method,
        metadata: call
            .context
            .metadata()
            .iter()
            .filter(|&(key, _)| key != SIGNATURE_KEY)
            .map(|(key, value)| (key.as_str(), value.as_str()))
            .collect(),
        payload_sha256: hex::encode(Sha256::digest(payload)),
    };
    Ok(serde_json::to_vec(&message)?)
}

pub fn is_signed(metadata: &Metadata) -> bool {
    metadata.contains_key(SIGNATURE_KEY)
}

/// Removes any identity or signature entries, e.g. before a call is handed
/// to a different signer.
pub fn strip(metadata: &mut Metadata) {
    for key in RESERVED_KEYS {
        _ = metadata.remove(key);
    }
}

pub fn sign(call: &mut Call, signer: &dyn Signer, now: SystemTime) -> Result<()> {
    strip(call.context.metadata_mut());

    let timestamp = now
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let metadata = call.context.metadata_mut();
    _ = metadata.insert(IDENTITY_KEY.to_owned(), signer.identity().name().to_owned());
    _ = metadata.insert(TIMESTAMP_KEY.to_owned(), timestamp.to_string());

    let signature = signer.sign(&canonical_bytes(call)?)?;
    _ = call.context.metadata_mut().insert(
        SIGNATURE_KEY.to_owned(),
        format!(
            "{} {} {}",
            SIGNATURE_VERSION,
            signer.fingerprint(),
            signature.to_base64()
        ),
    );
    Ok(())
}

/// Checks a signed call against the key it claims to be signed with and
/// returns the identity it was signed for.
pub fn verify<'call>(call: &'call Call, public_key: &PublicKey) -> Result<&'call str> {
    let metadata = call.context.metadata();
    let identity = metadata
        .get(IDENTITY_KEY)
        .ok_or(error::Key::MalformedHeader)?;
    if metadata
        .get(TIMESTAMP_KEY)
        .and_then(|value| value.parse::<u64>().ok())
        .is_none()
    {
        return Err(error::Key::MalformedHeader.into());
    }

    let mut parts = metadata
        .get(SIGNATURE_KEY)
        .ok_or(error::Key::MalformedHeader)?
        .splitn(3, ' ');
    let (fingerprint, encoded) = match (parts.next(), parts.next(), parts.next()) {
        (Some(SIGNATURE_VERSION), Some(fingerprint), Some(encoded)) => (fingerprint, encoded),
        _ => return Err(error::Key::MalformedHeader.into()),
    };

    let expected = public_key.fingerprint();
    if fingerprint != expected {
        return Err(error::Key::FingerprintMismatch(fingerprint.to_owned(), expected).into());
    }

    public_key.verify(
        &canonical_bytes(call)?,
        &Signature::from_base64(encoded)?,
    )?;
    Ok(identity.as_str())
}
