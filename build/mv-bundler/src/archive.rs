// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use mv_manifest::{digest::sha256, OpaqueManifest};

use crate::{Error, Result};

/// Name of the archive entry holding the serialized `OpaqueManifest`.
pub const MANIFEST_ENTRY: &str = "manifest";

/// Keeps track of a bundle archive being constructed.
///
/// Payloads are stored under the hex SHA-256 of their contents, so a payload
/// shared by several layers is only written once.
pub struct Archive {
    /// Place where we'll put the final zip file.
    final_path: PathBuf,
    /// Name of temporary file used during construction.
    tmp_path: PathBuf,
    /// ZIP output to the temporary file.
    inner: zip::ZipWriter<File>,
    /// Options used for every file.
    opts: zip::write::FileOptions,
    /// Names of payload entries written so far.
    payloads: BTreeSet<String>,
    has_manifest: bool,
    finished: bool,
}

impl Archive {
    /// Creates a new bundle archive that will, when finished, be placed at
    /// `dest`.
    pub fn new(dest: impl AsRef<Path>) -> Result<Self> {
        let final_path = PathBuf::from(dest.as_ref());

        let mut tmp_name = OsString::from(final_path.as_os_str());
        tmp_name.push(".partial");
        let tmp_path = PathBuf::from(tmp_name);

        let archive = File::create(&tmp_path)
            .map_err(|e| Error::FileWriteFailed(tmp_path.clone(), e))?;
        Ok(Self {
            final_path,
            tmp_path,
            inner: zip::ZipWriter::new(archive),
            opts: zip::write::FileOptions::default()
                .compression_method(zip::CompressionMethod::Deflated),
            payloads: BTreeSet::new(),
            has_manifest: false,
            finished: false,
        })
    }

    fn write_entry(&mut self, name: &str, contents: &[u8]) -> Result<()> {
        self.inner.start_file(name, self.opts)?;
        self.inner
            .write_all(contents)
            .map_err(|e| Error::FileWriteFailed(self.tmp_path.clone(), e))
    }

    /// Adds a payload unless identical contents are already present, and
    /// returns its entry name.
    pub fn payload(&mut self, contents: &[u8]) -> Result<String> {
        let name = hex::encode(sha256(contents));
        if self.payloads.contains(&name) {
            log::debug!("payload {name} already in archive");
            return Ok(name);
        }

        self.write_entry(&name, contents)?;
        log::debug!("added payload {name} ({} bytes)", contents.len());
        self.payloads.insert(name.clone());
        Ok(name)
    }

    pub fn manifest(&mut self, manifest: &OpaqueManifest) -> Result<()> {
        if self.has_manifest {
            return Err(Error::DuplicateManifest);
        }
        self.write_entry(MANIFEST_ENTRY, &manifest.to_bytes())?;
        self.has_manifest = true;
        Ok(())
    }

    /// Completes the archive and moves it to its intended location.
    ///
    /// If you drop an `Archive` without calling this, the temporary file is
    /// removed and nothing appears at the destination.
    pub fn finish(mut self) -> Result<PathBuf> {
        if !self.has_manifest {
            return Err(Error::MissingManifest);
        }
        self.inner.finish()?;
        fs::rename(&self.tmp_path, &self.final_path)
            .map_err(|e| Error::FileWriteFailed(self.final_path.clone(), e))?;
        self.finished = true;
        Ok(self.final_path.clone())
    }
}

impl Drop for Archive {
    fn drop(&mut self) {
        if !self.finished {
            let _ = fs::remove_file(&self.tmp_path);
        }
    }
}
