// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Turning a linked executable into the flat image that goes into flash.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::{Error, Result};

/// Produces the raw binary for an executable: the bytes from its lowest
/// loaded address upwards, with gaps filled with `0xff`.
pub trait Extractor {
    fn extract(&self, elf: &Path) -> Result<Vec<u8>>;
}

/// Extraction through GNU objcopy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Objcopy {
    program: PathBuf,
}

impl Objcopy {
    pub const DEFAULT_PROGRAM: &'static str = "arm-none-eabi-objcopy";

    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl Default for Objcopy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PROGRAM)
    }
}

impl Extractor for Objcopy {
    fn extract(&self, elf: &Path) -> Result<Vec<u8>> {
        let out = tempfile::NamedTempFile::new().map_err(|e| {
            Error::ExtractionFailed(format!("no temporary file: {e}"))
        })?;

        let mut cmd = Command::new(&self.program);
        cmd.arg("-O")
            .arg("binary")
            .arg("--gap-fill=0xff")
            .arg(elf)
            .arg(out.path());
        log::debug!("running {cmd:?}");

        let output = cmd.output().map_err(|e| {
            Error::ExtractionFailed(format!("failed to run {cmd:?}: {e}"))
        })?;
        if !output.status.success() {
            return Err(Error::ExtractionFailed(format!(
                "{cmd:?} exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim(),
            )));
        }

        std::fs::read(out.path()).map_err(|e| {
            Error::ExtractionFailed(format!("reading {cmd:?} output: {e}"))
        })
    }
}
