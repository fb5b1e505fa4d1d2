// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Typed manifest body and the builder that assembles it.
//!
//! Numeric policy fields are plain integers where 0 means "no constraint";
//! they are carried to the wire unchanged and never turned into an absence.

use p256::PublicKey;
use prost::Message;

use crate::{
    digest::{DigestEngine, Hash, HASH_LEN},
    keys::{decode_public_key, encode_public_key},
    wire, Error, Result,
};

/// A contiguous region of the device's internal flash.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FlashTarget {
    start: u32,
    size: u32,
}

impl FlashTarget {
    /// The application area: the first megabyte of internal flash.
    pub const USER_FLASH: Self = Self {
        start: 0,
        size: 0x10_0000,
    };

    pub fn new(start: u32, size: u32) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidFlashTarget { start });
        }
        Ok(Self { start, size })
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn size(&self) -> u32 {
        self.size
    }
}

/// One payload destined for one flash target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Layer {
    pub target: FlashTarget,
    /// Hash of the payload as stored in the bundle.
    pub fetch_hash: Hash,
    /// Hash of the flash area once the payload has been written to it.
    pub measurement_hash: Hash,
}

impl Layer {
    pub fn measure(
        engine: &DigestEngine,
        target: FlashTarget,
        payload: &[u8],
    ) -> Result<Self> {
        let measurement_hash =
            engine.flash_image_digest(target.size(), payload)?;
        Ok(Self {
            target,
            fetch_hash: engine.digest(payload),
            measurement_hash,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpdatePolicy {
    /// Oldest kernel that may run this application.
    pub minimum_kernel_version: u32,
    /// How long the device waits for the application to agree to an update
    /// before applying it anyway, in seconds.
    pub maximum_politeness_time_sec: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectivityPolicy {
    /// Time after losing the connection before a check-in counts as missed,
    /// in seconds.
    pub connection_grace_time_sec: u32,
    /// Interval between autonomous check-ins, in seconds. 0 keeps the
    /// connection up permanently.
    pub minimum_check_in_time_sec: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CrashPolicy {
    pub minimum_restart_ms: u32,
    pub maximum_restart_ms: u32,
    /// Key the device uses to encrypt crash reports.
    pub report_key: Option<PublicKey>,
    /// Bytes of the crashing stack to include in a report.
    pub include_stack_bytes: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DebugPolicy {
    pub debuggable: bool,
    /// Key that must countersign debug authorization requests.
    pub auth_key: Option<PublicKey>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestBody {
    pub update: UpdatePolicy,
    pub connectivity: ConnectivityPolicy,
    pub crash: CrashPolicy,
    pub debug: DebugPolicy,
    /// Applied in order.
    pub layers: Vec<Layer>,
}

impl ManifestBody {
    pub fn to_bytes(&self) -> Vec<u8> {
        wire::AppBody::from(self).encode_to_vec()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let body = wire::AppBody::decode(bytes)
            .map_err(|e| Error::ManifestDecode(e.to_string()))?;
        Self::try_from(body)
    }
}

fn encode_optional_key(key: &Option<PublicKey>) -> Vec<u8> {
    key.as_ref()
        .map(|k| encode_public_key(k).to_vec())
        .unwrap_or_default()
}

fn decode_optional_key(bytes: &[u8]) -> Result<Option<PublicKey>> {
    if bytes.is_empty() {
        Ok(None)
    } else {
        decode_public_key(bytes).map(Some)
    }
}

fn decode_hash(name: &str, bytes: &[u8]) -> Result<Hash> {
    bytes.try_into().map_err(|_| {
        Error::ManifestDecode(format!(
            "{name} is {} bytes, expected {HASH_LEN}",
            bytes.len()
        ))
    })
}

impl From<&ManifestBody> for wire::AppBody {
    fn from(body: &ManifestBody) -> Self {
        wire::AppBody {
            update: Some(wire::UpdatePolicy {
                minimum_kernel_version: body.update.minimum_kernel_version,
                maximum_politeness_time_sec: body
                    .update
                    .maximum_politeness_time_sec,
            }),
            connectivity: Some(wire::ConnectivityPolicy {
                connection_grace_time_sec: body
                    .connectivity
                    .connection_grace_time_sec,
                minimum_check_in_time_sec: body
                    .connectivity
                    .minimum_check_in_time_sec,
            }),
            crash: Some(wire::CrashPolicy {
                minimum_restart_ms: body.crash.minimum_restart_ms,
                maximum_restart_ms: body.crash.maximum_restart_ms,
                crash_report_pubkey: encode_optional_key(
                    &body.crash.report_key,
                ),
                include_stack_bytes: body.crash.include_stack_bytes,
            }),
            debug: Some(wire::DebugPolicy {
                debuggable: body.debug.debuggable,
                debug_auth_pubkey: encode_optional_key(&body.debug.auth_key),
            }),
            layers: body
                .layers
                .iter()
                .map(|layer| wire::Layer {
                    target: Some(wire::FlashTarget {
                        kind: Some(wire::flash_target::Kind::InternalFlash(
                            wire::InternalFlash {
                                start: layer.target.start(),
                                size: layer.target.size(),
                            },
                        )),
                    }),
                    fetch_hash: layer.fetch_hash.to_vec(),
                    measurement_hash: layer.measurement_hash.to_vec(),
                })
                .collect(),
        }
    }
}

impl TryFrom<wire::AppBody> for ManifestBody {
    type Error = Error;

    fn try_from(body: wire::AppBody) -> Result<Self> {
        let update = body.update.unwrap_or_default();
        let connectivity = body.connectivity.unwrap_or_default();
        let crash = body.crash.unwrap_or_default();
        let debug = body.debug.unwrap_or_default();

        let mut layers = Vec::with_capacity(body.layers.len());
        for layer in body.layers {
            let target = match layer.target.and_then(|t| t.kind) {
                Some(wire::flash_target::Kind::InternalFlash(flash)) => {
                    FlashTarget::new(flash.start, flash.size)?
                }
                None => {
                    return Err(Error::ManifestDecode(
                        "layer without a flash target".to_string(),
                    ))
                }
            };
            layers.push(Layer {
                target,
                fetch_hash: decode_hash("fetch hash", &layer.fetch_hash)?,
                measurement_hash: decode_hash(
                    "measurement hash",
                    &layer.measurement_hash,
                )?,
            });
        }

        Ok(ManifestBody {
            update: UpdatePolicy {
                minimum_kernel_version: update.minimum_kernel_version,
                maximum_politeness_time_sec: update
                    .maximum_politeness_time_sec,
            },
            connectivity: ConnectivityPolicy {
                connection_grace_time_sec: connectivity
                    .connection_grace_time_sec,
                minimum_check_in_time_sec: connectivity
                    .minimum_check_in_time_sec,
            },
            crash: CrashPolicy {
                minimum_restart_ms: crash.minimum_restart_ms,
                maximum_restart_ms: crash.maximum_restart_ms,
                report_key: decode_optional_key(&crash.crash_report_pubkey)?,
                include_stack_bytes: crash.include_stack_bytes,
            },
            debug: DebugPolicy {
                debuggable: debug.debuggable,
                auth_key: decode_optional_key(&debug.debug_auth_pubkey)?,
            },
            layers,
        })
    }
}

/// Collects policy and layers for a [`ManifestBody`].
///
/// Policies left untouched keep their all-zero defaults. At least one layer
/// must be added before [`ManifestBuilder::build`].
#[derive(Clone, Debug, Default)]
pub struct ManifestBuilder {
    engine: DigestEngine,
    update: UpdatePolicy,
    connectivity: ConnectivityPolicy,
    crash: CrashPolicy,
    debug: DebugPolicy,
    layers: Vec<Layer>,
}

impl ManifestBuilder {
    pub fn new(engine: DigestEngine) -> Self {
        Self {
            engine,
            ..Self::default()
        }
    }

    pub fn update(mut self, policy: UpdatePolicy) -> Self {
        self.update = policy;
        self
    }

    pub fn connectivity(mut self, policy: ConnectivityPolicy) -> Self {
        self.connectivity = policy;
        self
    }

    pub fn crash(mut self, policy: CrashPolicy) -> Self {
        self.crash = policy;
        self
    }

    pub fn debug(mut self, policy: DebugPolicy) -> Self {
        self.debug = policy;
        self
    }

    /// Hashes `payload` for `target` and appends the layer.
    pub fn layer(mut self, target: FlashTarget, payload: &[u8]) -> Result<Self> {
        let layer = Layer::measure(&self.engine, target, payload)?;
        log::debug!(
            "layer {} at {:#x}+{:#x}: fetch {}, measurement {}",
            self.layers.len(),
            target.start(),
            target.size(),
            hex::encode(layer.fetch_hash),
            hex::encode(layer.measurement_hash),
        );
        self.layers.push(layer);
        Ok(self)
    }

    pub fn build(self) -> Result<ManifestBody> {
        if self.layers.is_empty() {
            return Err(Error::NoLayers);
        }
        Ok(ManifestBody {
            update: self.update,
            connectivity: self.connectivity,
            crash: self.crash,
            debug: self.debug,
            layers: self.layers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{digest::sha256, keys::tests::P256_PUBLIC};

    fn builder() -> ManifestBuilder {
        ManifestBuilder::new(DigestEngine::default())
    }

    #[test]
    fn zero_sized_target_is_invalid() {
        assert!(matches!(
            FlashTarget::new(0x2000, 0),
            Err(Error::InvalidFlashTarget { start: 0x2000 })
        ));
        assert_eq!(
            FlashTarget::new(0, 0x10_0000).unwrap(),
            FlashTarget::USER_FLASH
        );
    }

    #[test]
    fn layer_hashes() {
        let target = FlashTarget::new(0, 1024).unwrap();
        let body = builder().layer(target, &[0u8; 10]).unwrap().build().unwrap();

        let mut image = vec![0u8; 10];
        image.resize(1024, 0xff);

        let layer = &body.layers[0];
        assert_eq!(layer.fetch_hash, sha256(&[0u8; 10]));
        assert_eq!(layer.measurement_hash, sha256(&image));
        assert_ne!(layer.fetch_hash, layer.measurement_hash);
    }

    #[test]
    fn oversized_payload_fails_the_build() {
        let target = FlashTarget::new(0, 8).unwrap();
        assert!(matches!(
            builder().layer(target, &[0u8; 8]),
            Err(Error::PayloadTooLarge { len: 8, capacity: 8 })
        ));
    }

    #[test]
    fn a_layer_is_required() {
        assert!(matches!(builder().build(), Err(Error::NoLayers)));
    }

    #[test]
    fn layers_keep_insertion_order() {
        let low = FlashTarget::new(0, 0x100).unwrap();
        let high = FlashTarget::new(0x8000, 0x100).unwrap();
        let body = builder()
            .layer(high, b"second")
            .unwrap()
            .layer(low, b"first")
            .unwrap()
            .build()
            .unwrap();

        let decoded = ManifestBody::from_bytes(&body.to_bytes()).unwrap();
        let starts: Vec<u32> =
            decoded.layers.iter().map(|l| l.target.start()).collect();
        assert_eq!(starts, [0x8000, 0]);
        assert_eq!(decoded.layers[0].fetch_hash, sha256(b"second"));
    }

    #[test]
    fn zero_policies_survive_the_wire() {
        let body = builder()
            .layer(FlashTarget::USER_FLASH, b"\x2a")
            .unwrap()
            .build()
            .unwrap();

        let wire = wire::AppBody::decode(&body.to_bytes()[..]).unwrap();
        assert_eq!(wire.update, Some(wire::UpdatePolicy::default()));
        assert_eq!(
            wire.connectivity,
            Some(wire::ConnectivityPolicy::default())
        );
        assert_eq!(wire.crash, Some(wire::CrashPolicy::default()));
        assert_eq!(wire.debug, Some(wire::DebugPolicy::default()));

        assert_eq!(ManifestBody::from_bytes(&body.to_bytes()).unwrap(), body);
    }

    #[test]
    fn full_policy_round_trip() {
        let key = crate::keys::parse_public_key_pem(P256_PUBLIC).unwrap();
        let body = builder()
            .update(UpdatePolicy {
                minimum_kernel_version: 7,
                maximum_politeness_time_sec: 600,
            })
            .connectivity(ConnectivityPolicy {
                connection_grace_time_sec: 30,
                minimum_check_in_time_sec: 0,
            })
            .crash(CrashPolicy {
                minimum_restart_ms: 100,
                maximum_restart_ms: 60_000,
                report_key: Some(key.clone()),
                include_stack_bytes: 512,
            })
            .debug(DebugPolicy {
                debuggable: true,
                auth_key: Some(key),
            })
            .layer(FlashTarget::USER_FLASH, b"firmware")
            .unwrap()
            .build()
            .unwrap();

        let bytes = body.to_bytes();
        assert_eq!(ManifestBody::from_bytes(&bytes).unwrap(), body);

        let wire = wire::AppBody::decode(&bytes[..]).unwrap();
        let crash = wire.crash.unwrap();
        assert_eq!(crash.crash_report_pubkey.len(), 65);
        assert_eq!(crash.crash_report_pubkey[0], 0x04);
        assert_eq!(wire.debug.unwrap().debug_auth_pubkey, crash.crash_report_pubkey);
    }

    #[test]
    fn truncated_hashes_are_rejected() {
        let mut wire = wire::AppBody::from(
            &builder()
                .layer(FlashTarget::USER_FLASH, b"x")
                .unwrap()
                .build()
                .unwrap(),
        );
        wire.layers[0].fetch_hash.truncate(31);
        assert!(matches!(
            ManifestBody::try_from(wire),
            Err(Error::ManifestDecode(_))
        ));
    }

    #[test]
    fn garbage_body_is_rejected() {
        assert!(matches!(
            ManifestBody::from_bytes(&[0xff, 0xff, 0xff]),
            Err(Error::ManifestDecode(_))
        ));
    }
}
