// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Manifest(#[from] mv_manifest::Error),

    #[error("binary extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("could not read file `{0}`: {1}")]
    FileReadFailed(PathBuf, std::io::Error),

    #[error("could not write file `{0}`: {1}")]
    FileWriteFailed(PathBuf, std::io::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("could not parse config `{0}`: {1}")]
    Config(PathBuf, toml::de::Error),

    #[error("archive already contains a manifest")]
    DuplicateManifest,

    #[error("archive has no manifest")]
    MissingManifest,
}

pub type Result<T> = std::result::Result<T, Error>;
