// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Sealing a serialized manifest body, either with an ECDSA P-256 signature
//! or explicitly unsigned.

use p256::{
    ecdsa::{signature::hazmat::PrehashSigner, Signature, SigningKey},
    PublicKey,
};
use prost::Message;

use crate::{
    digest::{sha256, Hash},
    keys::{encode_signature, signer_id, SIGNATURE_LEN},
    wire, Error, Result,
};

/// Domain separation for schema v1 manifests. Part of the device contract;
/// a new schema gets a new prefix.
pub const MANIFEST_V1_PREFIX: &[u8] = b"twlo-mv-manifest-v1\0";

/// What the caller asked for. Exactly one of the two is chosen per bundle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SigningIntent<K> {
    Unsigned,
    Signed(K),
}

impl<K> SigningIntent<K> {
    /// Turns the pair of mutually exclusive options into an intent.
    pub fn select(unsigned: bool, key: Option<K>) -> Result<Self> {
        match (unsigned, key) {
            (true, Some(_)) => Err(Error::AmbiguousSigningIntent),
            (true, None) => Ok(Self::Unsigned),
            (false, Some(key)) => Ok(Self::Signed(key)),
            (false, None) => Err(Error::SigningKeyRequired),
        }
    }

    /// Replaces the key, e.g. a path with the key loaded from it.
    pub fn try_map<L, E>(
        self,
        f: impl FnOnce(K) -> std::result::Result<L, E>,
    ) -> std::result::Result<SigningIntent<L>, E> {
        Ok(match self {
            Self::Unsigned => SigningIntent::Unsigned,
            Self::Signed(key) => SigningIntent::Signed(f(key)?),
        })
    }

    pub fn is_signed(&self) -> bool {
        matches!(self, Self::Signed(_))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Seal {
    Unsigned,
    Signed {
        signer_id: u64,
        signature: [u8; SIGNATURE_LEN],
    },
}

/// A serialized body together with its seal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpaqueManifest {
    body: Vec<u8>,
    seal: Seal,
}

impl OpaqueManifest {
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn seal(&self) -> &Seal {
        &self.seal
    }

    /// 0 for unsigned manifests.
    pub fn signer_id(&self) -> u64 {
        match &self.seal {
            Seal::Unsigned => 0,
            Seal::Signed { signer_id, .. } => *signer_id,
        }
    }

    /// Empty for unsigned manifests.
    pub fn signature(&self) -> &[u8] {
        match &self.seal {
            Seal::Unsigned => &[],
            Seal::Signed { signature, .. } => signature,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        wire::OpaqueManifest {
            body: self.body.clone(),
            signer_id: self.signer_id(),
            signature: self.signature().to_vec(),
        }
        .encode_to_vec()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let manifest = wire::OpaqueManifest::decode(bytes)
            .map_err(|e| Error::ManifestDecode(e.to_string()))?;

        let seal = match (manifest.signer_id, manifest.signature.len()) {
            (0, 0) => Seal::Unsigned,
            (signer_id, SIGNATURE_LEN) => {
                let mut signature = [0u8; SIGNATURE_LEN];
                signature.copy_from_slice(&manifest.signature);
                Seal::Signed {
                    signer_id,
                    signature,
                }
            }
            (signer_id, len) => {
                return Err(Error::ManifestDecode(format!(
                    "signer {signer_id:#x} with a {len} byte signature"
                )))
            }
        };

        Ok(Self {
            body: manifest.body,
            seal,
        })
    }
}

/// Seals manifest bodies under a fixed domain separation prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signer {
    prefix: Vec<u8>,
}

impl Default for Signer {
    fn default() -> Self {
        Self::new(MANIFEST_V1_PREFIX)
    }
}

impl Signer {
    pub fn new(prefix: impl Into<Vec<u8>>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// `prefix || body`, the message covered by the signature.
    pub fn signing_message(&self, body: &[u8]) -> Vec<u8> {
        let mut message = Vec::with_capacity(self.prefix.len() + body.len());
        message.extend_from_slice(&self.prefix);
        message.extend_from_slice(body);
        message
    }

    pub fn signing_digest(&self, body: &[u8]) -> Hash {
        sha256(&self.signing_message(body))
    }

    pub fn seal(
        &self,
        body: Vec<u8>,
        intent: &SigningIntent<SigningKey>,
    ) -> Result<OpaqueManifest> {
        let seal = match intent {
            SigningIntent::Unsigned => {
                log::debug!("leaving manifest unsigned");
                Seal::Unsigned
            }
            SigningIntent::Signed(key) => {
                let id = signer_id(&PublicKey::from(key.verifying_key()));
                let digest = self.signing_digest(&body);
                let signature: Signature =
                    key.sign_prehash(&digest).map_err(Error::Signing)?;
                let signature = encode_signature(signature.to_der().as_bytes())?;
                log::debug!("signed manifest as {id:#018x}");
                Seal::Signed {
                    signer_id: id,
                    signature,
                }
            }
        };
        Ok(OpaqueManifest { body, seal })
    }
}
