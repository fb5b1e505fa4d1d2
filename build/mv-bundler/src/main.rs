// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use mv_bundler::{BundleConfig, Bundler, Overrides};

#[derive(Debug, Parser)]
#[clap(max_term_width = 80, about = "Microvisor application bundler")]
struct Args {
    /// Print debug output
    #[clap(short, long, global = true)]
    verbose: bool,
    #[clap(subcommand)]
    cmd: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Bundle an application ELF into a zip ready for upload
    BundleApp(BundleAppArgs),
}

#[derive(Debug, clap::Args)]
struct BundleAppArgs {
    /// Linked application executable
    elf: PathBuf,
    /// Where to write the bundle
    out: PathBuf,

    /// Read defaults from this TOML file
    #[clap(long)]
    config: Option<PathBuf>,
    /// objcopy to use for extracting the flat image
    #[clap(long)]
    objcopy: Option<PathBuf>,

    /// Leave the manifest unsigned
    #[clap(long)]
    unsigned: bool,
    /// PEM private key (P-256) to sign the manifest with
    #[clap(long)]
    signing_key: Option<PathBuf>,

    /// Forbid debugging of the application on the device
    #[clap(long)]
    disable_debugging: bool,
    /// PEM public key (P-256) that must authorize debug sessions
    #[clap(long, alias = "debug-auth-pubkey")]
    debug_auth_key: Option<PathBuf>,

    /// PEM public key (P-256) used to encrypt crash reports
    #[clap(long)]
    crash_report_key: Option<PathBuf>,
    /// Bytes of stack to include in crash reports
    #[clap(long)]
    crash_stack_bytes: Option<u32>,
    /// Minimum time between restarts after a crash, in milliseconds
    #[clap(long)]
    minimum_restart_interval: Option<u32>,
    /// Maximum time between restarts after a crash, in milliseconds
    #[clap(long)]
    maximum_restart_interval: Option<u32>,

    /// Longest the device waits for the application to accept an update,
    /// in seconds
    #[clap(long)]
    maximum_politeness_time: Option<u32>,
    /// Oldest kernel version the application runs on
    #[clap(long)]
    minimum_kernel_version: Option<u32>,

    /// Time after losing the connection before a check-in is missed, in
    /// seconds
    #[clap(long)]
    connection_grace_time: Option<u32>,
    /// Interval between check-ins in seconds; 0 stays connected
    #[clap(long)]
    minimum_check_in_time: Option<u32>,
}

fn bundle_app(args: BundleAppArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => BundleConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => BundleConfig::default(),
    };
    let objcopy = config.objcopy(args.objcopy);

    let options = config.resolve(
        args.elf,
        args.out,
        Overrides {
            unsigned: args.unsigned,
            signing_key: args.signing_key,
            disable_debugging: args.disable_debugging,
            debug_auth_key: args.debug_auth_key,
            crash_report_key: args.crash_report_key,
            crash_stack_bytes: args.crash_stack_bytes,
            minimum_restart_interval: args.minimum_restart_interval,
            maximum_restart_interval: args.maximum_restart_interval,
            maximum_politeness_time: args.maximum_politeness_time,
            minimum_kernel_version: args.minimum_kernel_version,
            connection_grace_time: args.connection_grace_time,
            minimum_check_in_time: args.minimum_check_in_time,
        },
    );

    let report = Bundler::default()
        .bundle_app(&options, &objcopy)
        .with_context(|| format!("bundling {}", options.elf.display()))?;
    println!("Bundle written to file: {}", report.out.display());
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(level),
    )
    .init();

    match args.cmd {
        Cmd::BundleApp(args) => bundle_app(args),
    }
}
