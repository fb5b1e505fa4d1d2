// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("payload of {len:#x} bytes does not fit in flash area of {capacity:#x} bytes")]
    PayloadTooLarge { len: usize, capacity: u32 },

    #[error("flash target at {start:#x} has zero size")]
    InvalidFlashTarget { start: u32 },

    #[error("manifest has no layers")]
    NoLayers,

    #[error("unsupported key type: {0} (only NIST P-256 keys are accepted)")]
    UnsupportedKeyType(String),

    #[error("could not parse key: {0}")]
    KeyParse(String),

    #[error("a signing key is required unless the manifest is explicitly unsigned")]
    SigningKeyRequired,

    #[error("a manifest cannot be both unsigned and signed with a key")]
    AmbiguousSigningIntent,

    #[error("could not encode signature: {0}")]
    SignatureEncoding(String),

    #[error("signing failed: {0}")]
    Signing(p256::ecdsa::Error),

    #[error("could not decode manifest: {0}")]
    ManifestDecode(String),
}

pub type Result<T> = std::result::Result<T, Error>;
