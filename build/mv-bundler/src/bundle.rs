// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};

use mv_manifest::{
    keys, ConnectivityPolicy, CrashPolicy, DebugPolicy, DigestEngine,
    FlashTarget, Layer, ManifestBuilder, PublicKey, Signer, SigningIntent,
    SigningKey, UpdatePolicy,
};

use crate::{archive::Archive, extract::Extractor, Error, Result};

/// Everything needed to bundle one application.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BundleOptions {
    pub elf: PathBuf,
    pub out: PathBuf,
    pub unsigned: bool,
    pub signing_key: Option<PathBuf>,
    pub debuggable: bool,
    pub debug_auth_key: Option<PathBuf>,
    pub crash_report_key: Option<PathBuf>,
    /// Ignored unless `crash_report_key` is set.
    pub crash_stack_bytes: u32,
    pub minimum_restart_interval: u32,
    pub maximum_restart_interval: u32,
    pub maximum_politeness_time: u32,
    pub minimum_kernel_version: u32,
    pub connection_grace_time: u32,
    pub minimum_check_in_time: u32,
}

impl BundleOptions {
    /// Options with every policy value zeroed and no signing choice made.
    pub fn new(elf: impl Into<PathBuf>, out: impl Into<PathBuf>) -> Self {
        Self {
            elf: elf.into(),
            out: out.into(),
            unsigned: false,
            signing_key: None,
            debuggable: false,
            debug_auth_key: None,
            crash_report_key: None,
            crash_stack_bytes: 0,
            minimum_restart_interval: 0,
            maximum_restart_interval: 0,
            maximum_politeness_time: 0,
            minimum_kernel_version: 0,
            connection_grace_time: 0,
            minimum_check_in_time: 0,
        }
    }
}

/// What a successful run produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BundleReport {
    pub out: PathBuf,
    /// 0 for an unsigned bundle.
    pub signer_id: u64,
    pub layers: Vec<Layer>,
}

#[derive(Clone, Debug)]
pub struct Bundler {
    engine: DigestEngine,
    signer: Signer,
    target: FlashTarget,
}

impl Default for Bundler {
    fn default() -> Self {
        Self::new(
            DigestEngine::default(),
            Signer::default(),
            FlashTarget::USER_FLASH,
        )
    }
}

fn read_pem(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| Error::FileReadFailed(path.to_owned(), e))
}

fn load_signing_key(path: &Path) -> Result<SigningKey> {
    let key = keys::parse_private_key_pem(&read_pem(path)?)?;
    log::debug!("loaded signing key from {}", path.display());
    Ok(key)
}

fn load_public_key(path: Option<&Path>) -> Result<Option<PublicKey>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let key = keys::parse_public_key_pem(&read_pem(path)?)?;
    log::debug!(
        "loaded public key {:#018x} from {}",
        keys::signer_id(&key),
        path.display()
    );
    Ok(Some(key))
}

impl Bundler {
    pub fn new(engine: DigestEngine, signer: Signer, target: FlashTarget) -> Self {
        Self {
            engine,
            signer,
            target,
        }
    }

    /// Builds, seals and writes a bundle for `options.elf`.
    ///
    /// Signing options and keys are checked before the executable is
    /// touched. Nothing is left at `options.out` unless this succeeds.
    pub fn bundle_app(
        &self,
        options: &BundleOptions,
        extractor: &dyn Extractor,
    ) -> Result<BundleReport> {
        let intent = SigningIntent::select(
            options.unsigned,
            options.signing_key.as_deref(),
        )?
        .try_map(load_signing_key)?;
        let debug_auth_key = load_public_key(options.debug_auth_key.as_deref())?;
        let crash_report_key =
            load_public_key(options.crash_report_key.as_deref())?;

        let include_stack_bytes = match &crash_report_key {
            Some(_) => options.crash_stack_bytes,
            None => {
                if options.crash_stack_bytes != 0 {
                    log::warn!(
                        "ignoring {} crash stack bytes without a crash report key",
                        options.crash_stack_bytes
                    );
                }
                0
            }
        };

        let payload = extractor.extract(&options.elf)?;
        log::info!(
            "extracted {} bytes from {}",
            payload.len(),
            options.elf.display()
        );

        let body = ManifestBuilder::new(self.engine)
            .update(UpdatePolicy {
                minimum_kernel_version: options.minimum_kernel_version,
                maximum_politeness_time_sec: options.maximum_politeness_time,
            })
            .connectivity(ConnectivityPolicy {
                connection_grace_time_sec: options.connection_grace_time,
                minimum_check_in_time_sec: options.minimum_check_in_time,
            })
            .crash(CrashPolicy {
                minimum_restart_ms: options.minimum_restart_interval,
                maximum_restart_ms: options.maximum_restart_interval,
                report_key: crash_report_key,
                include_stack_bytes,
            })
            .debug(DebugPolicy {
                debuggable: options.debuggable,
                auth_key: debug_auth_key,
            })
            .layer(self.target, &payload)?
            .build()?;

        let manifest = self.signer.seal(body.to_bytes(), &intent)?;
        if intent.is_signed() {
            log::info!("signed as {:#018x}", manifest.signer_id());
        } else {
            log::info!("bundle is unsigned");
        }

        let mut archive = Archive::new(&options.out)?;
        archive.payload(&payload)?;
        archive.manifest(&manifest)?;
        let out = archive.finish()?;

        Ok(BundleReport {
            out,
            signer_id: manifest.signer_id(),
            layers: body.layers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mv_manifest::{digest::sha256, ManifestBody, OpaqueManifest};
    use p256::ecdsa::{signature::Verifier, Signature};
    use std::collections::BTreeSet;
    use std::fs::File;
    use std::io::Read;

    struct Fixed(Vec<u8>);

    impl Extractor for Fixed {
        fn extract(&self, _elf: &Path) -> Result<Vec<u8>> {
            Ok(self.0.clone())
        }
    }

    /// For runs that must fail before extraction.
    struct Unreachable;

    impl Extractor for Unreachable {
        fn extract(&self, elf: &Path) -> Result<Vec<u8>> {
            panic!("extraction of {} should not happen", elf.display())
        }
    }

    struct Broken;

    impl Extractor for Broken {
        fn extract(&self, _elf: &Path) -> Result<Vec<u8>> {
            Err(Error::ExtractionFailed("objcopy exited with 1".to_string()))
        }
    }

    fn testdata(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("testdata").join(name)
    }

    #[track_caller]
    fn read_bundle(path: &Path) -> (BTreeSet<String>, OpaqueManifest) {
        let mut zip = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
        let names = zip.file_names().map(str::to_string).collect();
        let mut bytes = vec![];
        zip.by_name("manifest")
            .unwrap()
            .read_to_end(&mut bytes)
            .unwrap();
        (names, OpaqueManifest::from_bytes(&bytes).unwrap())
    }

    #[track_caller]
    fn assert_nothing_written(out: &Path) {
        assert!(!out.exists());
        let parent = out.parent().unwrap();
        assert_eq!(std::fs::read_dir(parent).unwrap().count(), 0);
    }

    #[test]
    fn unsigned_single_byte() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("app.zip");
        let options = BundleOptions {
            unsigned: true,
            ..BundleOptions::new("app.elf", &out)
        };

        let report = Bundler::default()
            .bundle_app(&options, &Fixed(vec![0x2a]))
            .unwrap();
        assert_eq!(report.out, out);
        assert_eq!(report.signer_id, 0);

        let (names, manifest) = read_bundle(&out);
        let payload_name =
            "684888c0ebb17f374298b65ee2807526c066094c701bcc7ebbe1c1095f494fc1";
        assert_eq!(
            names,
            BTreeSet::from(["manifest".to_string(), payload_name.to_string()])
        );
        assert_eq!(manifest.signer_id(), 0);
        assert!(manifest.signature().is_empty());

        let body = ManifestBody::from_bytes(manifest.body()).unwrap();
        assert_eq!(body.layers, report.layers);
        assert_eq!(body.layers.len(), 1);
        assert_eq!(hex::encode(body.layers[0].fetch_hash), payload_name);
        assert_eq!(body.layers[0].target, FlashTarget::USER_FLASH);
        assert!(!body.debug.debuggable);
    }

    #[test]
    fn signed_bundle_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("app.zip");
        let options = BundleOptions {
            signing_key: Some(testdata("signing.pem")),
            debug_auth_key: Some(testdata("signing.pub.pem")),
            crash_report_key: Some(testdata("signing.pub.pem")),
            crash_stack_bytes: 512,
            debuggable: true,
            minimum_kernel_version: 4,
            minimum_check_in_time: 3600,
            ..BundleOptions::new("app.elf", &out)
        };

        let report = Bundler::default()
            .bundle_app(&options, &Fixed(b"application image".to_vec()))
            .unwrap();
        assert_eq!(report.signer_id, 0x31d3_29ca_9f16_311b);

        let (_, manifest) = read_bundle(&out);
        assert_eq!(manifest.signer_id(), report.signer_id);

        let public = keys::parse_public_key_pem(
            &std::fs::read_to_string(testdata("signing.pub.pem")).unwrap(),
        )
        .unwrap();
        let signature = Signature::from_slice(manifest.signature()).unwrap();
        p256::ecdsa::VerifyingKey::from(&public)
            .verify(
                &Signer::default().signing_message(manifest.body()),
                &signature,
            )
            .unwrap();

        let body = ManifestBody::from_bytes(manifest.body()).unwrap();
        assert_eq!(body.update.minimum_kernel_version, 4);
        assert_eq!(body.connectivity.minimum_check_in_time_sec, 3600);
        assert_eq!(body.crash.report_key, Some(public.clone()));
        assert_eq!(body.crash.include_stack_bytes, 512);
        assert_eq!(body.debug.auth_key, Some(public));
        assert!(body.debug.debuggable);
        assert_eq!(body.layers[0].fetch_hash, sha256(b"application image"));
    }

    #[test]
    fn stack_bytes_need_a_crash_key() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("app.zip");
        let options = BundleOptions {
            unsigned: true,
            crash_stack_bytes: 512,
            ..BundleOptions::new("app.elf", &out)
        };

        Bundler::default()
            .bundle_app(&options, &Fixed(vec![1, 2, 3]))
            .unwrap();
        let (_, manifest) = read_bundle(&out);
        let body = ManifestBody::from_bytes(manifest.body()).unwrap();
        assert_eq!(body.crash.include_stack_bytes, 0);
        assert_eq!(body.crash.report_key, None);
    }

    #[test]
    fn signing_choice_is_checked_first() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("app.zip");

        let both = BundleOptions {
            unsigned: true,
            signing_key: Some(testdata("signing.pem")),
            ..BundleOptions::new("app.elf", &out)
        };
        assert!(matches!(
            Bundler::default().bundle_app(&both, &Unreachable),
            Err(Error::Manifest(mv_manifest::Error::AmbiguousSigningIntent))
        ));

        let neither = BundleOptions::new("app.elf", &out);
        assert!(matches!(
            Bundler::default().bundle_app(&neither, &Unreachable),
            Err(Error::Manifest(mv_manifest::Error::SigningKeyRequired))
        ));
        assert_nothing_written(&out);
    }

    #[test]
    fn wrong_curves_are_rejected_before_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("app.zip");
        let base = BundleOptions {
            unsigned: true,
            ..BundleOptions::new("app.elf", &out)
        };

        let cases = [
            BundleOptions {
                unsigned: false,
                signing_key: Some(testdata("secp256k1.pem")),
                ..base.clone()
            },
            BundleOptions {
                debug_auth_key: Some(testdata("p384.pub.pem")),
                ..base.clone()
            },
            BundleOptions {
                crash_report_key: Some(testdata("p384.pub.pem")),
                ..base.clone()
            },
        ];
        for options in &cases {
            let err = Bundler::default()
                .bundle_app(options, &Unreachable)
                .unwrap_err();
            assert!(
                matches!(
                    err,
                    Error::Manifest(mv_manifest::Error::UnsupportedKeyType(_))
                ),
                "{err}"
            );
        }
        assert_nothing_written(&out);
    }

    #[test]
    fn missing_key_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("app.zip");
        let options = BundleOptions {
            signing_key: Some(dir.path().join("nope.pem")),
            ..BundleOptions::new("app.elf", &out)
        };
        assert!(matches!(
            Bundler::default().bundle_app(&options, &Unreachable),
            Err(Error::FileReadFailed(..))
        ));
    }

    #[test]
    fn oversized_payload_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("app.zip");
        let options = BundleOptions {
            unsigned: true,
            ..BundleOptions::new("app.elf", &out)
        };
        let bundler = Bundler::new(
            DigestEngine::default(),
            Signer::default(),
            FlashTarget::new(0, 16).unwrap(),
        );

        let err = bundler
            .bundle_app(&options, &Fixed(vec![0; 16]))
            .unwrap_err();
        assert!(
            matches!(
                err,
                Error::Manifest(mv_manifest::Error::PayloadTooLarge { .. })
            ),
            "{err}"
        );
        assert_nothing_written(&out);
    }

    #[test]
    fn extraction_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("app.zip");
        let options = BundleOptions {
            unsigned: true,
            ..BundleOptions::new("app.elf", &out)
        };
        assert!(matches!(
            Bundler::default().bundle_app(&options, &Broken),
            Err(Error::ExtractionFailed(_))
        ));
        assert_nothing_written(&out);
    }
}
