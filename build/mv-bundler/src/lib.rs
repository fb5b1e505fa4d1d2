// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Packages a Microvisor application into an uploadable bundle: a zip
//! holding the flat application image and a sealed manifest describing it.

mod error;

pub mod archive;
pub mod bundle;
pub mod config;
pub mod extract;

pub use archive::{Archive, MANIFEST_ENTRY};
pub use bundle::{BundleOptions, BundleReport, Bundler};
pub use config::{BundleConfig, Overrides};
pub use error::{Error, Result};
pub use extract::{Extractor, Objcopy};
