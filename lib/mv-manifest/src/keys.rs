// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Canonical encodings for P-256 keys and signatures, and the key identifiers
//! derived from them.
//!
//! Only NIST P-256 keys are accepted anywhere a key is taken. The algorithm
//! identifier inside a PEM document is checked before the key material is
//! decoded, so a key on the wrong curve is reported as such rather than as a
//! parse failure.

use der::{
    asn1::{ObjectIdentifier, UintRef},
    Decode, Document, SecretDocument, Sequence,
};
use p256::{
    ecdsa::SigningKey, elliptic_curve::sec1::ToEncodedPoint, PublicKey,
    SecretKey,
};
use pkcs8::{DecodePrivateKey, PrivateKeyInfo};
use sec1::EcPrivateKey;
use spki::{AlgorithmIdentifierRef, DecodePublicKey, SubjectPublicKeyInfoRef};

use crate::{digest::sha256, Error, Result};

/// `id-ecPublicKey`
const EC_PUBLIC_KEY_OID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");

/// `secp256r1` / `prime256v1`
const SECP256R1_OID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7");

/// SEC1 uncompressed point: `0x04 || X || Y`.
pub const PUBLIC_KEY_LEN: usize = 65;

/// Length of one big-endian signature scalar.
pub const SCALAR_LEN: usize = 32;

/// `r || s`
pub const SIGNATURE_LEN: usize = 2 * SCALAR_LEN;

/// Key class discriminator mixed into [`key_id`] for manifest signing keys.
/// Other values are reserved for future key classes.
pub const SIGNING_KEY_TYPE: [u8; 2] = [0x00, 0x00];

pub type EncodedPublicKey = [u8; PUBLIC_KEY_LEN];

pub fn encode_public_key(key: &PublicKey) -> EncodedPublicKey {
    let point = key.to_encoded_point(false);
    let mut out = [0u8; PUBLIC_KEY_LEN];
    // A `PublicKey` is never the identity, so the uncompressed form always
    // has the full length.
    out.copy_from_slice(point.as_bytes());
    out
}

/// Decodes a SEC1 point as found in a manifest.
pub fn decode_public_key(bytes: &[u8]) -> Result<PublicKey> {
    PublicKey::from_sec1_bytes(bytes)
        .map_err(|e| Error::KeyParse(format!("bad SEC1 point: {e}")))
}

/// First eight bytes of `SHA-256(type_tag || encoded_key)`, big-endian.
pub fn key_id(type_tag: [u8; 2], encoded_key: &[u8]) -> u64 {
    let mut message = Vec::with_capacity(type_tag.len() + encoded_key.len());
    message.extend_from_slice(&type_tag);
    message.extend_from_slice(encoded_key);
    let hash = sha256(&message);

    let mut id = [0u8; 8];
    id.copy_from_slice(&hash[..8]);
    u64::from_be_bytes(id)
}

pub fn signer_id(key: &PublicKey) -> u64 {
    key_id(SIGNING_KEY_TYPE, &encode_public_key(key))
}

/// `ECDSA-Sig-Value` from RFC 3279.
#[derive(Sequence)]
struct EcdsaSigValue<'a> {
    r: UintRef<'a>,
    s: UintRef<'a>,
}

/// Converts a DER `ECDSA-Sig-Value` into fixed-width `r || s`.
pub fn encode_signature(der_sig: &[u8]) -> Result<[u8; SIGNATURE_LEN]> {
    let value = EcdsaSigValue::from_der(der_sig)
        .map_err(|e| Error::SignatureEncoding(e.to_string()))?;

    let mut out = [0u8; SIGNATURE_LEN];
    let (r, s) = out.split_at_mut(SCALAR_LEN);
    put_scalar(r, "r", value.r.as_bytes())?;
    put_scalar(s, "s", value.s.as_bytes())?;
    Ok(out)
}

/// Right-aligns `value` in `dest`, leaving the leading bytes zero.
fn put_scalar(dest: &mut [u8], name: &str, value: &[u8]) -> Result<()> {
    if value.len() > dest.len() {
        return Err(Error::SignatureEncoding(format!(
            "{name} is {} bytes, expected at most {}",
            value.len(),
            dest.len()
        )));
    }
    let offset = dest.len() - value.len();
    dest[offset..].copy_from_slice(value);
    Ok(())
}

fn check_curve(curve: Option<ObjectIdentifier>) -> Result<()> {
    match curve {
        Some(oid) if oid == SECP256R1_OID => Ok(()),
        Some(oid) => Err(Error::UnsupportedKeyType(format!("EC curve {oid}"))),
        None => Err(Error::UnsupportedKeyType(
            "EC key without a named curve".to_string(),
        )),
    }
}

fn check_algorithm(algorithm: &AlgorithmIdentifierRef<'_>) -> Result<()> {
    if algorithm.oid != EC_PUBLIC_KEY_OID {
        return Err(Error::UnsupportedKeyType(format!(
            "algorithm {}",
            algorithm.oid
        )));
    }
    check_curve(algorithm.parameters_oid().ok())
}

/// PEM blocks that never carry a key. `openssl ecparam -genkey` writes the
/// curve parameters ahead of the key itself.
const SKIPPED_PEM_LABELS: &[&str] = &["EC PARAMETERS"];

/// Returns the first PEM block that may hold a key.
///
/// Text outside the encapsulation boundaries is ignored (RFC 7468 section
/// 5.2), as are the blocks in [`SKIPPED_PEM_LABELS`].
fn key_block(text: &str) -> Result<String> {
    let mut lines = text.lines().map(str::trim_end);
    while let Some(line) = lines.next() {
        let Some(label) = line
            .strip_prefix("-----BEGIN ")
            .and_then(|rest| rest.strip_suffix("-----"))
        else {
            continue;
        };

        let end = format!("-----END {label}-----");
        let mut block = format!("{line}\n");
        let mut closed = false;
        for line in lines.by_ref() {
            block.push_str(line);
            block.push('\n');
            if line == end {
                closed = true;
                break;
            }
        }
        if !closed {
            return Err(Error::KeyParse(format!(
                "`{label}` block has no end boundary"
            )));
        }

        if SKIPPED_PEM_LABELS.contains(&label) {
            log::debug!("skipping `{label}` block");
            continue;
        }
        return Ok(block);
    }
    Err(Error::KeyParse("no PEM block found".to_string()))
}

/// Parses a PEM `PUBLIC KEY` (SubjectPublicKeyInfo).
pub fn parse_public_key_pem(pem: &str) -> Result<PublicKey> {
    let block = key_block(pem)?;
    let (label, doc) = Document::from_pem(&block)
        .map_err(|e| Error::KeyParse(format!("bad PEM: {e}")))?;
    match label {
        "PUBLIC KEY" => (),
        "RSA PUBLIC KEY" => {
            return Err(Error::UnsupportedKeyType("RSA".to_string()))
        }
        other => {
            return Err(Error::KeyParse(format!(
                "expected a PUBLIC KEY, found `{other}`"
            )))
        }
    }

    let spki = SubjectPublicKeyInfoRef::from_der(doc.as_bytes())
        .map_err(|e| Error::KeyParse(e.to_string()))?;
    check_algorithm(&spki.algorithm)?;

    PublicKey::from_public_key_der(doc.as_bytes())
        .map_err(|e| Error::KeyParse(e.to_string()))
}

/// Parses an unencrypted PEM private key, either PKCS#8 (`PRIVATE KEY`) or
/// SEC1 (`EC PRIVATE KEY`).
pub fn parse_private_key_pem(pem: &str) -> Result<SigningKey> {
    let block = key_block(pem)?;
    let (label, doc) = SecretDocument::from_pem(&block)
        .map_err(|e| Error::KeyParse(format!("bad PEM: {e}")))?;
    match label {
        "PRIVATE KEY" => {
            let info = PrivateKeyInfo::from_der(doc.as_bytes())
                .map_err(|e| Error::KeyParse(e.to_string()))?;
            check_algorithm(&info.algorithm)?;
            SigningKey::from_pkcs8_der(doc.as_bytes())
                .map_err(|e| Error::KeyParse(e.to_string()))
        }
        "EC PRIVATE KEY" => {
            let key = EcPrivateKey::from_der(doc.as_bytes())
                .map_err(|e| Error::KeyParse(e.to_string()))?;
            check_curve(key.parameters.and_then(|p| p.named_curve()))?;
            let secret = SecretKey::from_sec1_der(doc.as_bytes())
                .map_err(|e| Error::KeyParse(e.to_string()))?;
            Ok(SigningKey::from(secret))
        }
        "RSA PRIVATE KEY" => Err(Error::UnsupportedKeyType("RSA".to_string())),
        "DSA PRIVATE KEY" => Err(Error::UnsupportedKeyType("DSA".to_string())),
        "ENCRYPTED PRIVATE KEY" => Err(Error::KeyParse(
            "encrypted private keys are not supported".to_string(),
        )),
        other => Err(Error::KeyParse(format!(
            "expected a PRIVATE KEY, found `{other}`"
        ))),
    }
}
