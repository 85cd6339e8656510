//! PSPF launcher binary
//!
//! This executable is prepended to packages as the launcher prefix. When
//! run it opens its own file, verifies the embedded package, prepares the
//! workenv and executes the payload. All command-line arguments belong to
//! the packaged application; the launcher only processes commands itself
//! when `FLAVOR_LAUNCHER_CLI=1` is set.

use pspf::exit_codes::{EXIT_EXTRACTION_ERROR, EXIT_IO_ERROR, EXIT_PANIC, EXIT_SUCCESS, EXIT_USAGE};
use pspf::{LaunchOptions, launch_package, verify_package};
use std::{env, panic, path::Path, process};

fn main() {
    panic::set_hook(Box::new(|panic_info| {
        eprintln!("pspf: PANIC: {panic_info}");
        process::exit(EXIT_PANIC);
    }));
    pspf::logger::init(None);

    let args: Vec<String> = env::args().collect();

    let exe_path = match pspf::platform::self_exe_path() {
        Ok(path) => path,
        Err(e) => {
            eprintln!("pspf: {e}");
            process::exit(EXIT_IO_ERROR);
        }
    };

    // Maintenance CLI only behind the environment switch; otherwise every
    // argument is passed through to the payload untouched.
    let cli_mode = env::var("FLAVOR_LAUNCHER_CLI")
        .is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));

    let exit_code = if cli_mode {
        run_cli(&exe_path, &args[1..])
    } else {
        run_package(&exe_path, &args[1..])
    };
    process::exit(exit_code);
}

fn run_package(exe_path: &Path, args: &[String]) -> i32 {
    match launch_package(exe_path, args, &LaunchOptions::default()) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("pspf: {e}");
            e.exit_code()
        }
    }
}

fn run_cli(exe_path: &Path, args: &[String]) -> i32 {
    let command = args.first().map(String::as_str).unwrap_or("info");
    match command {
        "info" => match verify_package(exe_path) {
            Ok(report) => {
                println!("package: {} v{}", report.package_name, report.package_version);
                println!("slots:   {}", report.slots_checked);
                println!("valid:   {}", report.all_ok());
                EXIT_SUCCESS
            }
            Err(e) => {
                eprintln!("pspf: {e}");
                e.exit_code()
            }
        },
        "verify" => match verify_package(exe_path) {
            Ok(report) if report.all_ok() => {
                println!("OK");
                EXIT_SUCCESS
            }
            Ok(_) => {
                println!("FAILED");
                pspf::exit_codes::EXIT_SIGNATURE_ERROR
            }
            Err(e) => {
                eprintln!("pspf: {e}");
                e.exit_code()
            }
        },
        "metadata" => match dump_metadata(exe_path) {
            Ok(()) => EXIT_SUCCESS,
            Err(e) => {
                eprintln!("pspf: {e}");
                e.exit_code()
            }
        },
        "extract" => {
            if args.len() < 3 {
                eprintln!("usage: FLAVOR_LAUNCHER_CLI=1 <package> extract <slot> <output-dir>");
                return EXIT_USAGE;
            }
            match extract_one(exe_path, &args[1], &args[2]) {
                Ok(()) => EXIT_SUCCESS,
                Err(e) => {
                    eprintln!("pspf: {e}");
                    EXIT_EXTRACTION_ERROR
                }
            }
        }
        "run" => run_package(exe_path, args.get(1..).unwrap_or(&[])),
        "help" | "--help" => {
            println!("PSPF launcher maintenance commands:");
            println!("  info               package summary (default)");
            println!("  verify             verify package integrity");
            println!("  metadata           print the metadata document");
            println!("  extract SLOT DIR   extract one slot to a directory");
            println!("  run [args...]      execute the package");
            EXIT_SUCCESS
        }
        other => {
            eprintln!("pspf: unknown command {other:?} (try help)");
            EXIT_USAGE
        }
    }
}

fn dump_metadata(exe_path: &Path) -> pspf::Result<()> {
    let mut reader = pspf::reader::Reader::open(exe_path)?;
    let metadata = reader.metadata()?;
    println!("{}", serde_json::to_string_pretty(metadata)?);
    Ok(())
}

fn extract_one(exe_path: &Path, slot_arg: &str, output_dir: &str) -> pspf::Result<()> {
    let slot: usize = slot_arg
        .parse()
        .map_err(|_| pspf::PspfError::Extraction(format!("bad slot index {slot_arg:?}")))?;

    let mut reader = pspf::reader::Reader::open(exe_path)?;
    let descriptor = *reader
        .index()
        .slots
        .get(slot)
        .ok_or_else(|| pspf::PspfError::Extraction(format!("slot {slot} out of range")))?;
    let name = reader
        .metadata()?
        .slots
        .get(slot)
        .map(|s| s.name.clone())
        .unwrap_or_else(|| format!("slot{slot}"));
    let stored = reader.slot_bytes(slot)?.to_vec();
    let ops = pspf::format::chain::unpack_operations(descriptor.operations);

    // Archive slots unpack into the directory; single-file slots land in it
    // under their metadata name.
    let target = if ops.contains(&pspf::format::constants::OP_TAR) {
        Path::new(output_dir).to_path_buf()
    } else {
        Path::new(output_dir).join(&name)
    };
    pspf::pipeline::reverse_chain(&stored, &ops, &target)?;
    println!("extracted slot {slot} to {output_dir}");
    Ok(())
}
