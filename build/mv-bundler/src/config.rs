// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{bundle::BundleOptions, extract::Objcopy, Error, Result};

/// A bundle configuration file. Every field is optional; anything given on
/// the command line takes precedence.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct BundleConfig {
    pub objcopy: Option<PathBuf>,
    #[serde(default)]
    pub update: UpdateConfig,
    #[serde(default)]
    pub connectivity: ConnectivityConfig,
    #[serde(default)]
    pub crash: CrashConfig,
    #[serde(default)]
    pub debug: DebugConfig,
    #[serde(default)]
    pub signing: SigningConfig,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct UpdateConfig {
    pub minimum_kernel_version: Option<u32>,
    pub maximum_politeness_time: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ConnectivityConfig {
    pub connection_grace_time: Option<u32>,
    pub minimum_check_in_time: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CrashConfig {
    pub minimum_restart_interval: Option<u32>,
    pub maximum_restart_interval: Option<u32>,
    pub report_key: Option<PathBuf>,
    pub stack_bytes: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct DebugConfig {
    pub debuggable: Option<bool>,
    pub auth_key: Option<PathBuf>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SigningConfig {
    #[serde(default)]
    pub unsigned: bool,
    pub key: Option<PathBuf>,
}

/// Values given on the command line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Overrides {
    pub unsigned: bool,
    pub signing_key: Option<PathBuf>,
    pub disable_debugging: bool,
    pub debug_auth_key: Option<PathBuf>,
    pub crash_report_key: Option<PathBuf>,
    pub crash_stack_bytes: Option<u32>,
    pub minimum_restart_interval: Option<u32>,
    pub maximum_restart_interval: Option<u32>,
    pub maximum_politeness_time: Option<u32>,
    pub minimum_kernel_version: Option<u32>,
    pub connection_grace_time: Option<u32>,
    pub minimum_check_in_time: Option<u32>,
}

impl BundleConfig {
    pub fn parse(text: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Loads a config file. Relative key paths are taken to be relative to
    /// the file itself.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::FileReadFailed(path.to_owned(), e))?;
        let mut config = Self::parse(&text)
            .map_err(|e| Error::Config(path.to_owned(), e))?;

        let base = path.parent().unwrap_or_else(|| Path::new(""));
        for key in [
            &mut config.crash.report_key,
            &mut config.debug.auth_key,
            &mut config.signing.key,
        ]
        .into_iter()
        .flatten()
        {
            if key.is_relative() {
                *key = base.join(&*key);
            }
        }
        log::debug!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Merges command line values over this file.
    ///
    /// The signing choice is taken as a whole: if either `--unsigned` or
    /// `--signing-key` was given, the file's `[signing]` table is ignored.
    pub fn resolve(self, elf: PathBuf, out: PathBuf, cli: Overrides) -> BundleOptions {
        let (unsigned, signing_key) = if cli.unsigned || cli.signing_key.is_some() {
            (cli.unsigned, cli.signing_key)
        } else {
            (self.signing.unsigned, self.signing.key)
        };

        BundleOptions {
            elf,
            out,
            unsigned,
            signing_key,
            debuggable: !cli.disable_debugging
                && self.debug.debuggable.unwrap_or(true),
            debug_auth_key: cli.debug_auth_key.or(self.debug.auth_key),
            crash_report_key: cli.crash_report_key.or(self.crash.report_key),
            crash_stack_bytes: cli
                .crash_stack_bytes
                .or(self.crash.stack_bytes)
                .unwrap_or(0),
            minimum_restart_interval: cli
                .minimum_restart_interval
                .or(self.crash.minimum_restart_interval)
                .unwrap_or(0),
            maximum_restart_interval: cli
                .maximum_restart_interval
                .or(self.crash.maximum_restart_interval)
                .unwrap_or(0),
            maximum_politeness_time: cli
                .maximum_politeness_time
                .or(self.update.maximum_politeness_time)
                .unwrap_or(0),
            minimum_kernel_version: cli
                .minimum_kernel_version
                .or(self.update.minimum_kernel_version)
                .unwrap_or(0),
            connection_grace_time: cli
                .connection_grace_time
                .or(self.connectivity.connection_grace_time)
                .unwrap_or(0),
            minimum_check_in_time: cli
                .minimum_check_in_time
                .or(self.connectivity.minimum_check_in_time)
                .unwrap_or(0),
        }
    }

    pub fn objcopy(&self, cli: Option<PathBuf>) -> Objcopy {
        cli.or_else(|| self.objcopy.clone())
            .map(Objcopy::new)
            .unwrap_or_default()
    }
}
