// SPDX-FileCopyrightText: 2024 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use std::time::SystemTime;

use secrecy::{ExposeSecret as _, SecretString};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, TimestampSeconds};

use crate::error::Result;

use super::{Credential, Identity};

/// The portable form of a service account's credential, handed to
/// non-interactive clients as base64-encoded JSON.
#[serde_as]
#[derive(Debug, Deserialize)]
pub struct ServiceAccountKey {
    name: String,
    private_key: SecretString,
    #[serde_as(as = "Option<TimestampSeconds<i64>>")]
    #[serde(default)]
    expires_at: Option<SystemTime>,
}

impl ServiceAccountKey {
    pub fn new(name: impl Into<String>, credential: &Credential) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            private_key: credential.armor()?,
            expires_at: credential.expires_at(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn decode(encoded: &str) -> Result<Self> {
        let json = SecretString::new(String::from_utf8_lossy(&base64::decode(encoded.trim())?).into_owned());
        Ok(serde_json::from_str(json.expose_secret())?)
    }

    pub fn encode(&self) -> Result<SecretString> {
        Ok(SecretString::new(base64::encode(serde_json::to_vec(
            &SerializedKey {
                name: &self.name,
                private_key: self.private_key.expose_secret(),
                expires_at: self.expires_at,
            },
        )?)))
    }

    pub fn into_credential(self) -> Result<Credential> {
        Credential::from_pem(
            Identity::service_account(self.name),
            self.private_key.expose_secret(),
            self.expires_at,
        )
    }
}

// `SecretString` deliberately refuses to serialize, so encoding goes through
// a borrowed view instead.
#[serde_as]
#[derive(Serialize)]
struct SerializedKey<'a> {
    name: &'a str,
    private_key: &'a str,
    #[serde_as(as = "Option<TimestampSeconds<i64>>")]
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<SystemTime>,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_test::{assert_de_tokens, Token};

    use crate::key::{CredentialBuilder, Signer as _};

    use super::*;

    #[test]
    fn encoded_key_decodes_to_same_signer() -> Result<()> {
        let credential = CredentialBuilder::new(Identity::service_account("ci"))
            .with_lifetime(Some(Duration::from_secs(3600)))
            .generate();
        let encoded = ServiceAccountKey::new("ci", &credential)?.encode()?;

        let decoded = ServiceAccountKey::decode(encoded.expose_secret())?;
        assert_eq!(decoded.name(), "ci");

        let restored = decoded.into_credential()?;
        assert_eq!(restored.identity(), &Identity::service_account("ci"));
        assert_eq!(restored.fingerprint(), credential.fingerprint());
        assert!(restored.expires_at().is_some());
        Ok(())
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(ServiceAccountKey::decode("not base64!").is_err());
        assert!(ServiceAccountKey::decode(&base64::encode("{}")).is_err());
    }

    #[test]
    fn deserializes_without_expiry() {
        let key = ServiceAccountKey {
            name: "ci".to_owned(),
            private_key: SecretString::new("pem".to_owned()),
            expires_at: None,
        };

        // Only the fields are compared; `SecretString` has no `PartialEq`.
        assert_de_tokens(
            &KeyFields::from(&key),
            &[
                Token::Struct {
                    name: "ServiceAccountKey",
                    len: 2,
                },
                Token::Str("name"),
                Token::Str("ci"),
                Token::Str("private_key"),
                Token::Str("pem"),
                Token::StructEnd,
            ],
        );
    }

    #[derive(Debug, PartialEq)]
    struct KeyFields {
        name: String,
        private_key: String,
        expires_at: Option<SystemTime>,
    }

    impl From<&ServiceAccountKey> for KeyFields {
        fn from(value: &ServiceAccountKey) -> Self {
            Self {
                name: value.name.clone(),
                private_key: value.private_key.expose_secret().clone(),
                expires_at: value.expires_at,
            }
        }
    }

    impl<'de> Deserialize<'de> for KeyFields {
        fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            ServiceAccountKey::deserialize(deserializer).map(|key| Self::from(&key))
        }
    }
}
