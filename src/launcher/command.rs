//! Payload command preparation
//!
//! Expands the command template from the metadata, resolves the executable,
//! and assembles the runtime environment the payload sees.

use crate::error::{PspfError, Result};
use crate::format::metadata::Metadata;
use crate::platform::{arch_name, os_name, platform_string};
use log::debug;
use std::collections::HashMap;
use std::env;
use std::path::Path;

/// Replace `{workenv}`, `{slot:N}` and `{package}` in a command template.
pub fn substitute_placeholders(
    template: &str,
    metadata: &Metadata,
    workenv: &Path,
    package_path: &Path,
) -> Result<String> {
    let mut command = template
        .replace("{workenv}", &workenv.to_string_lossy())
        .replace("{package}", &package_path.to_string_lossy());

    while let Some(start) = command.find("{slot:") {
        let rest = &command[start..];
        let end = rest.find('}').ok_or_else(|| {
            PspfError::Launch(format!("unterminated {{slot:N}} placeholder in {template:?}"))
        })?;
        let number: usize = rest[6..end].parse().map_err(|_| {
            PspfError::Launch(format!("bad slot number in placeholder {:?}", &rest[..=end]))
        })?;
        let slot = metadata.slots.get(number).ok_or_else(|| {
            PspfError::Launch(format!("placeholder references unknown slot {number}"))
        })?;
        let path = if slot.extract_to.is_empty() {
            workenv.to_path_buf()
        } else {
            workenv.join(&slot.extract_to)
        };
        command.replace_range(start..start + end + 1, &path.to_string_lossy());
    }

    Ok(command)
}

/// Resolve the executable via PATH when it is not already a usable path.
fn resolve_executable(executable: &str) -> String {
    let path = Path::new(executable);
    if path.is_absolute() && path.exists() {
        return executable.to_string();
    }
    match which::which(executable) {
        Ok(found) => {
            let found = found.to_string_lossy().into_owned();
            debug!("resolved executable {executable:?} -> {found:?}");
            found
        }
        Err(_) => executable.to_string(),
    }
}

/// Build the executable, argument list and environment for the payload.
pub fn prepare_command(
    metadata: &Metadata,
    workenv: &Path,
    package_path: &Path,
    extra_args: &[String],
) -> Result<(String, Vec<String>, HashMap<String, String>)> {
    let command = substitute_placeholders(
        &metadata.execution.command,
        metadata,
        workenv,
        package_path,
    )?;
    debug!("🎯 payload command: {command}");

    let mut parts: Vec<String> = command.split_whitespace().map(String::from).collect();
    if parts.is_empty() {
        return Err(PspfError::Launch("empty payload command".to_string()));
    }
    let executable = resolve_executable(&parts.remove(0));

    let mut args = parts;
    args.extend_from_slice(extra_args);

    let mut env_map: HashMap<String, String> = env::vars().collect();
    env_map.insert(
        "FLAVOR_WORKENV".to_string(),
        workenv.to_string_lossy().into_owned(),
    );
    env_map.insert("FLAVOR_PACKAGE".to_string(), metadata.package.name.clone());
    env_map.insert(
        "FLAVOR_VERSION".to_string(),
        metadata.package.version.clone(),
    );
    env_map.insert("FLAVOR_PLATFORM".to_string(), platform_string());
    env_map.insert("FLAVOR_OS".to_string(), os_name().to_string());
    env_map.insert("FLAVOR_ARCH".to_string(), arch_name().to_string());
    env_map.insert(
        "FLAVOR_ORIGINAL_COMMAND".to_string(),
        package_path.to_string_lossy().into_owned(),
    );

    let bin_dir = workenv.join("bin");
    let new_path = match env_map.get("PATH") {
        Some(path) => format!("{}{}{path}", bin_dir.display(), PATH_SEPARATOR),
        None => bin_dir.display().to_string(),
    };
    env_map.insert("PATH".to_string(), new_path);

    Ok((executable, args, env_map))
}

#[cfg(unix)]
const PATH_SEPARATOR: char = ':';
#[cfg(not(unix))]
const PATH_SEPARATOR: char = ';';

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::metadata::{BuildInfo, ExecutionInfo, PackageInfo, SlotInfo};
    use std::path::PathBuf;

    fn metadata_with_command(command: &str) -> Metadata {
        Metadata {
            format: "PSPF/2025".to_string(),
            package: PackageInfo {
                name: "hello".into(),
                version: "1.0.0".into(),
                description: None,
                author: None,
                license: None,
            },
            execution: ExecutionInfo {
                command: command.into(),
            },
            slots: vec![
                SlotInfo {
                    name: "runtime".into(),
                    purpose: "code".into(),
                    lifecycle: "runtime".into(),
                    extract_to: "rt".into(),
                    operations: "tar.zst".into(),
                    original_size: 1,
                    size: 1,
                    sha256: "00".repeat(32),
                },
                SlotInfo {
                    name: "app".into(),
                    purpose: "code".into(),
                    lifecycle: "runtime".into(),
                    extract_to: String::new(),
                    operations: "tar.gz".into(),
                    original_size: 1,
                    size: 1,
                    sha256: "00".repeat(32),
                },
            ],
            build: BuildInfo {
                timestamp: "2025-01-01T00:00:00+00:00".into(),
                builder: "pspf-builder".into(),
                platform: "linux_amd64".into(),
                seed: None,
            },
        }
    }

    #[test]
    fn placeholders_expand_to_absolute_paths() {
        let metadata = metadata_with_command("{slot:0}/bin/python3 {slot:1}/main.py {package}");
        let workenv = PathBuf::from("/cache/abc");
        let package = PathBuf::from("/tmp/hello.psp");

        let command = substitute_placeholders(
            &metadata.execution.command,
            &metadata,
            &workenv,
            &package,
        )
        .unwrap();
        assert_eq!(
            command,
            "/cache/abc/rt/bin/python3 /cache/abc/main.py /tmp/hello.psp"
        );
    }

    #[test]
    fn unknown_slot_placeholder_is_an_error() {
        let metadata = metadata_with_command("{slot:9}/x");
        let err = substitute_placeholders(
            &metadata.execution.command,
            &metadata,
            Path::new("/w"),
            Path::new("/p"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown slot 9"));
    }

    #[test]
    fn prepared_environment_carries_the_flavor_variables() {
        let metadata = metadata_with_command("{workenv}/run.sh --flag");
        let workenv = PathBuf::from("/cache/abc");
        let package = PathBuf::from("/tmp/hello.psp");

        let (executable, args, env_map) =
            prepare_command(&metadata, &workenv, &package, &["extra".to_string()]).unwrap();

        assert_eq!(executable, "/cache/abc/run.sh");
        assert_eq!(args, vec!["--flag".to_string(), "extra".to_string()]);
        assert_eq!(env_map.get("FLAVOR_WORKENV").unwrap(), "/cache/abc");
        assert_eq!(env_map.get("FLAVOR_PACKAGE").unwrap(), "hello");
        assert_eq!(env_map.get("FLAVOR_VERSION").unwrap(), "1.0.0");
        assert_eq!(env_map.get("FLAVOR_ORIGINAL_COMMAND").unwrap(), "/tmp/hello.psp");
        assert_eq!(env_map.get("FLAVOR_PLATFORM").unwrap(), &platform_string());
        assert!(env_map.get("PATH").unwrap().starts_with("/cache/abc/bin"));
    }
}
