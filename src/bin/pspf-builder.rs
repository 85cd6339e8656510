//! PSPF builder binary

use clap::{Parser, Subcommand};
use pspf::exit_codes::{EXIT_PANIC, EXIT_SUCCESS, EXIT_USAGE};
use pspf::{BuildOptions, build_package, verify_package};
use std::{panic, path::PathBuf, process};

#[derive(Parser, Debug)]
#[command(version = pspf::version::VERSION, about = "Build and inspect PSPF/2025 packages")]
struct Args {
    #[command(subcommand)]
    command: Cli,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Cli {
    /// Build a package from a manifest
    Build {
        /// Path to manifest.json
        #[arg(short, long)]
        manifest: PathBuf,

        /// Output path for the package
        #[arg(short, long)]
        output: PathBuf,

        /// Path to the launcher binary (or set FLAVOR_LAUNCHER_BIN)
        #[arg(long)]
        launcher_bin: Option<PathBuf>,

        /// Seed for deterministic keys and output
        #[arg(long)]
        key_seed: Option<String>,

        /// Private key to sign with (PEM)
        #[arg(long, conflicts_with = "key_seed")]
        private_key: Option<PathBuf>,

        /// Persist a generated private key here (PEM)
        #[arg(long)]
        emit_private_key: Option<PathBuf>,

        /// Persist a generated public key here (PEM)
        #[arg(long, requires = "emit_private_key")]
        emit_public_key: Option<PathBuf>,

        /// Skip the post-build verification pass
        #[arg(long)]
        skip_verification: bool,
    },

    /// Verify an existing package
    Verify {
        /// Package file to check
        package: PathBuf,
    },
}

fn main() {
    panic::set_hook(Box::new(|panic_info| {
        eprintln!("pspf: PANIC: {panic_info}");
        process::exit(EXIT_PANIC);
    }));

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            process::exit(if e.use_stderr() { EXIT_USAGE } else { EXIT_SUCCESS });
        }
    };
    pspf::logger::init(args.log_level.as_deref());

    let result = match args.command {
        Cli::Build {
            manifest,
            output,
            launcher_bin,
            key_seed,
            private_key,
            emit_private_key,
            emit_public_key,
            skip_verification,
        } => {
            let options = BuildOptions {
                launcher_bin,
                key_seed,
                private_key_path: private_key,
                private_key_out: emit_private_key,
                public_key_out: emit_public_key,
                skip_verification,
            };
            build_package(&manifest, &output, &options)
        }
        Cli::Verify { package } => match verify_package(&package) {
            Ok(report) => {
                println!(
                    "{} v{}: {} ({} slots checked)",
                    report.package_name,
                    report.package_version,
                    if report.all_ok() { "OK" } else { "FAILED" },
                    report.slots_checked
                );
                if report.all_ok() {
                    Ok(())
                } else {
                    process::exit(pspf::exit_codes::EXIT_SIGNATURE_ERROR);
                }
            }
            Err(e) => Err(e),
        },
    };

    match result {
        Ok(()) => process::exit(EXIT_SUCCESS),
        Err(e) => {
            eprintln!("pspf: {e}");
            process::exit(e.exit_code());
        }
    }
}
