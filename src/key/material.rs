// SPDX-FileCopyrightText: 2024 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

use ed25519_dalek::{SigningKey, SECRET_KEY_LENGTH};
use pkcs8::{DecodePrivateKey as _, EncodePrivateKey as _, LineEnding};
use secrecy::ExposeSecret as _;
use serde::{de, ser, Deserialize, Deserializer, Serialize, Serializer};

use crate::{error::Result, rng};

#[derive(Clone)]
pub(super) struct KeyMaterial(SigningKey);

impl KeyMaterial {
    pub(super) fn from_pem(pem: &str) -> Result<Self> {
        Ok(Self(
            SigningKey::from_pkcs8_pem(pem).map_err(crate::error::Key::from)?,
        ))
    }

    pub(super) fn to_pem(&self) -> Result<secrecy::SecretString> {
        let pem = self
            .0
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(crate::error::Key::from)?;
        Ok(secrecy::SecretString::new(pem.as_str().to_owned()))
    }
}

impl AsRef<SigningKey> for KeyMaterial {
    fn as_ref(&self) -> &SigningKey {
        &self.0
    }
}

impl secrecy::Zeroize for KeyMaterial {
    fn zeroize(&mut self) {
        self.0 = SigningKey::from_bytes(&[0; SECRET_KEY_LENGTH]);
    }
}

impl secrecy::CloneableSecret for KeyMaterial {}

impl secrecy::DebugSecret for KeyMaterial {}

impl secrecy::SerializableSecret for KeyMaterial {}

impl Serialize for KeyMaterial {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let pem = self.to_pem().map_err(ser::Error::custom)?;
        serializer.serialize_str(pem.expose_secret())
    }
}

impl<'de> Deserialize<'de> for KeyMaterial {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let pem = secrecy::SecretString::new(String::deserialize(deserializer)?);
        Self::from_pem(pem.expose_secret()).map_err(de::Error::custom)
    }
}

pub(super) type SecretKey = secrecy::Secret<KeyMaterial>;

pub(super) fn generate(rng: Option<&mut (dyn rand_core::CryptoRngCore + Send)>) -> SecretKey {
    SecretKey::new(KeyMaterial(rng::map_option(rng, |rng| {
        SigningKey::generate(rng)
    })))
}
