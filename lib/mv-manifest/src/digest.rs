// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! SHA-256 over payloads, and over payloads as they appear once written into
//! a fixed-size flash area.

use sha2::{Digest, Sha256};

use crate::{Error, Result};

pub const HASH_LEN: usize = 32;

pub type Hash = [u8; HASH_LEN];

/// Value of a flash byte after erase.
pub const ERASED_FLASH_BYTE: u8 = 0xff;

/// Padding is fed to the hasher in blocks of this size.
const FILL_CHUNK: usize = 4096;

pub fn sha256(data: &[u8]) -> Hash {
    Sha256::digest(data).into()
}

/// Computes fetch and measurement hashes.
///
/// The measurement hash has to agree with what the device computes over its
/// own flash, so the fill byte is fixed when the engine is built and never
/// changed afterwards.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DigestEngine {
    fill: u8,
}

impl Default for DigestEngine {
    fn default() -> Self {
        Self::new(ERASED_FLASH_BYTE)
    }
}

impl DigestEngine {
    pub const fn new(fill: u8) -> Self {
        Self { fill }
    }

    pub fn fill(&self) -> u8 {
        self.fill
    }

    pub fn digest(&self, data: &[u8]) -> Hash {
        sha256(data)
    }

    /// Hashes `payload` followed by fill bytes up to `capacity`.
    ///
    /// The payload must be strictly smaller than the area.
    pub fn flash_image_digest(&self, capacity: u32, payload: &[u8]) -> Result<Hash> {
        let capacity_bytes = capacity as usize;
        if payload.len() >= capacity_bytes {
            return Err(Error::PayloadTooLarge {
                len: payload.len(),
                capacity,
            });
        }

        let mut hasher = Sha256::new();
        hasher.update(payload);

        let block = [self.fill; FILL_CHUNK];
        let mut remaining = capacity_bytes - payload.len();
        while remaining > 0 {
            let n = remaining.min(FILL_CHUNK);
            hasher.update(&block[..n]);
            remaining -= n;
        }

        Ok(hasher.finalize().into())
    }
}
