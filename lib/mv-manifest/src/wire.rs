// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Protobuf messages for manifest schema v1.
//!
//! These mirror `proto/bundle.proto` field for field. Scalars use implicit
//! presence, so a zero value and an unset value are the same thing on the
//! wire; policy sub-messages are always emitted.

use prost::Message;

#[derive(Clone, PartialEq, Message)]
pub struct OpaqueManifest {
    #[prost(bytes = "vec", tag = "1")]
    pub body: Vec<u8>,
    #[prost(uint64, tag = "2")]
    pub signer_id: u64,
    #[prost(bytes = "vec", tag = "3")]
    pub signature: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct AppBody {
    #[prost(message, optional, tag = "1")]
    pub update: Option<UpdatePolicy>,
    #[prost(message, optional, tag = "2")]
    pub connectivity: Option<ConnectivityPolicy>,
    #[prost(message, optional, tag = "3")]
    pub crash: Option<CrashPolicy>,
    #[prost(message, optional, tag = "4")]
    pub debug: Option<DebugPolicy>,
    #[prost(message, repeated, tag = "5")]
    pub layers: Vec<Layer>,
}

#[derive(Clone, PartialEq, Message)]
pub struct UpdatePolicy {
    #[prost(uint32, tag = "1")]
    pub minimum_kernel_version: u32,
    #[prost(uint32, tag = "2")]
    pub maximum_politeness_time_sec: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct ConnectivityPolicy {
    #[prost(uint32, tag = "1")]
    pub connection_grace_time_sec: u32,
    #[prost(uint32, tag = "2")]
    pub minimum_check_in_time_sec: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct CrashPolicy {
    #[prost(uint32, tag = "1")]
    pub minimum_restart_ms: u32,
    #[prost(uint32, tag = "2")]
    pub maximum_restart_ms: u32,
    #[prost(bytes = "vec", tag = "3")]
    pub crash_report_pubkey: Vec<u8>,
    #[prost(uint32, tag = "4")]
    pub include_stack_bytes: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct DebugPolicy {
    #[prost(bool, tag = "1")]
    pub debuggable: bool,
    #[prost(bytes = "vec", tag = "2")]
    pub debug_auth_pubkey: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Layer {
    #[prost(message, optional, tag = "1")]
    pub target: Option<FlashTarget>,
    #[prost(bytes = "vec", tag = "2")]
    pub fetch_hash: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub measurement_hash: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct FlashTarget {
    #[prost(oneof = "flash_target::Kind", tags = "1")]
    pub kind: Option<flash_target::Kind>,
}

pub mod flash_target {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Kind {
        #[prost(message, tag = "1")]
        InternalFlash(super::InternalFlash),
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct InternalFlash {
    #[prost(uint32, tag = "1")]
    pub start: u32,
    #[prost(uint32, tag = "2")]
    pub size: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsigned_manifest_encoding() {
        let manifest = OpaqueManifest {
            body: b"abc".to_vec(),
            signer_id: 0,
            signature: vec![],
        };
        // Zero and empty fields are not written at all.
        assert_eq!(manifest.encode_to_vec(), [0x0a, 0x03, b'a', b'b', b'c']);
    }

    #[test]
    fn signed_manifest_encoding() {
        let manifest = OpaqueManifest {
            body: vec![],
            signer_id: 0x81,
            signature: vec![0xee; 2],
        };
        assert_eq!(
            manifest.encode_to_vec(),
            [0x10, 0x81, 0x01, 0x1a, 0x02, 0xee, 0xee]
        );
    }

    #[test]
    fn empty_policies_are_still_present() {
        let body = AppBody {
            update: Some(UpdatePolicy::default()),
            connectivity: None,
            crash: None,
            debug: None,
            layers: vec![],
        };
        assert_eq!(body.encode_to_vec(), [0x0a, 0x00]);
        assert_eq!(AppBody::decode(&[0x0a, 0x00][..]).unwrap(), body);
    }

    #[test]
    fn internal_flash_target() {
        let target = FlashTarget {
            kind: Some(flash_target::Kind::InternalFlash(InternalFlash {
                start: 0,
                size: 0x10_0000,
            })),
        };
        // internal_flash { size: 0x100000 }
        assert_eq!(
            target.encode_to_vec(),
            [0x0a, 0x04, 0x10, 0x80, 0x80, 0x40]
        );
    }
}
