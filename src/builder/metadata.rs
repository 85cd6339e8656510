//! Canonical metadata assembly for the builder

use crate::format::manifest::BuildManifest;
use crate::format::metadata::{BuildInfo, ExecutionInfo, Metadata, PackageInfo, SlotInfo};
use crate::platform::platform_string;
use sha2::{Digest, Sha256};

/// Builder identifier stamped into every package
fn builder_id() -> String {
    format!("pspf-builder {}", env!("CARGO_PKG_VERSION"))
}

/// Resolve the build timestamp.
///
/// Deterministic mode derives it from the seed: the first 4 bytes of
/// SHA-256(seed), little-endian, as Unix seconds. Otherwise
/// `SOURCE_DATE_EPOCH` is honored, then the wall clock.
fn build_timestamp(seed: Option<&str>) -> String {
    if let Some(seed) = seed {
        let digest = Sha256::digest(seed.as_bytes());
        let secs = u32::from_le_bytes(digest[..4].try_into().unwrap_or_default());
        return chrono::DateTime::from_timestamp(i64::from(secs), 0)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| "1970-01-01T00:00:00+00:00".to_string());
    }

    if let Ok(epoch) = std::env::var("SOURCE_DATE_EPOCH") {
        if let Ok(secs) = epoch.parse::<i64>() {
            if let Some(dt) = chrono::DateTime::from_timestamp(secs, 0) {
                return dt.to_rfc3339();
            }
        }
    }

    chrono::Utc::now().to_rfc3339()
}

/// Build host string: platform, plus the hostname outside deterministic mode.
fn build_platform(deterministic: bool) -> String {
    if deterministic {
        platform_string()
    } else {
        format!(
            "{} {}",
            platform_string(),
            gethostname::gethostname().to_string_lossy()
        )
    }
}

/// Assemble the metadata document from the manifest and the staged slots.
pub(super) fn build_metadata(
    manifest: &BuildManifest,
    slot_infos: Vec<SlotInfo>,
    seed: Option<&str>,
) -> Metadata {
    Metadata {
        format: "PSPF/2025".to_string(),
        package: PackageInfo {
            name: manifest.package.name.clone(),
            version: manifest.package.version.clone(),
            description: manifest.package.description.clone(),
            author: manifest.package.author.clone(),
            license: manifest.package.license.clone(),
        },
        execution: ExecutionInfo {
            command: manifest.execution.command.clone(),
        },
        slots: slot_infos,
        build: BuildInfo {
            timestamp: build_timestamp(seed),
            builder: builder_id(),
            platform: build_platform(seed.is_some()),
            seed: seed.map(String::from),
        },
    }
}
