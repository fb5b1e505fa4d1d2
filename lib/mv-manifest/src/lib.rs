// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Manifests for Microvisor application bundles.
//!
//! A bundle carries one or more payloads and a manifest describing them. The
//! manifest body records update, connectivity, crash and debug policy plus a
//! list of layers, each naming a flash target and two hashes of its payload.
//! The serialized body is then sealed: signed with a P-256 key over a
//! domain-separated digest, or explicitly marked unsigned.
//!
//! ```text
//! payload ─► ManifestBuilder ─► ManifestBody ─► Signer::seal ─► OpaqueManifest
//!               (DigestEngine)     to_bytes()     (SigningIntent)
//! ```

mod error;

pub mod digest;
pub mod keys;
pub mod manifest;
pub mod sign;
pub mod wire;

pub use digest::{DigestEngine, Hash};
pub use error::{Error, Result};
pub use manifest::{
    ConnectivityPolicy, CrashPolicy, DebugPolicy, FlashTarget, Layer,
    ManifestBody, ManifestBuilder, UpdatePolicy,
};
pub use sign::{OpaqueManifest, Seal, Signer, SigningIntent, MANIFEST_V1_PREFIX};

/// Re-exported so callers can name key types without a direct dependency.
pub use p256::{ecdsa::SigningKey, PublicKey};
