//! Ed25519 signing for PSPF packages
//!
//! Keys come from three places: a caller-supplied seed string (SHA-512,
//! first 32 bytes, so the same seed always yields the same keypair), PEM
//! files, or the OS RNG. The signed payload is always the uncompressed
//! canonical metadata bytes. Trust is pinned to the key embedded in the
//! index; there is no certificate chain and no revocation.

use crate::error::{PspfError, Result};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use log::{debug, info};
use sha2::{Digest, Sha512};
use std::fs;
use std::path::Path;

/// Derive a deterministic keypair from a seed string.
pub fn keypair_from_seed(seed: &str) -> (SigningKey, VerifyingKey) {
    let digest = Sha512::digest(seed.as_bytes());
    let mut seed_bytes = [0u8; 32];
    seed_bytes.copy_from_slice(&digest[..32]);

    let signing_key = SigningKey::from_bytes(&seed_bytes);
    let verifying_key = signing_key.verifying_key();
    info!("🔑 derived signing key from seed");
    (signing_key, verifying_key)
}

/// Generate a random keypair from the OS RNG.
pub fn keypair_random() -> (SigningKey, VerifyingKey) {
    use rand::RngCore;
    use rand::rngs::OsRng;

    let mut secret = [0u8; 32];
    OsRng.fill_bytes(&mut secret);
    let signing_key = SigningKey::from_bytes(&secret);
    let verifying_key = signing_key.verifying_key();
    (signing_key, verifying_key)
}

/// Load a signing key from a file.
///
/// Accepts PKCS#8 (`PRIVATE KEY`) and raw (`ED25519 PRIVATE KEY`) PEM
/// encodings, plus a bare 32-byte seed file. The public key is derived,
/// never trusted from a file.
pub fn load_signing_key(path: &Path) -> Result<(SigningKey, VerifyingKey)> {
    let raw = fs::read(path)
        .map_err(|e| PspfError::Build(format!("cannot read private key {}: {e}", path.display())))?;
    if raw.len() == 32 {
        let seed: [u8; 32] = raw[..].try_into().unwrap_or_default();
        let signing_key = SigningKey::from_bytes(&seed);
        let verifying_key = signing_key.verifying_key();
        debug!("loaded raw seed key from {}", path.display());
        return Ok((signing_key, verifying_key));
    }

    let pem_text = String::from_utf8(raw)
        .map_err(|_| PspfError::Build("private key is neither a raw seed nor PEM".to_string()))?;
    let parsed = pem::parse(&pem_text)
        .map_err(|e| PspfError::Build(format!("cannot parse private key PEM: {e}")))?;

    let contents = parsed.contents();
    let seed: &[u8] = match parsed.tag() {
        "ED25519 PRIVATE KEY" => contents,
        "PRIVATE KEY" => {
            // PKCS#8 wraps the raw 32-byte seed at a fixed offset
            if contents.len() >= 48 && contents[0..2] == [0x30, 0x2E] {
                &contents[16..48]
            } else if contents.len() == 32 {
                contents
            } else {
                return Err(PspfError::Build("invalid PKCS#8 private key".to_string()));
            }
        }
        other => {
            return Err(PspfError::Build(format!(
                "unsupported private key type: {other}"
            )));
        }
    };

    let seed: [u8; 32] = seed
        .try_into()
        .map_err(|_| PspfError::Build("private key must be 32 bytes".to_string()))?;
    let signing_key = SigningKey::from_bytes(&seed);
    let verifying_key = signing_key.verifying_key();
    debug!("loaded signing key from {}", path.display());
    Ok((signing_key, verifying_key))
}

/// Persist a keypair as two PEM files.
pub fn save_keypair(
    signing_key: &SigningKey,
    verifying_key: &VerifyingKey,
    private_path: &Path,
    public_path: &Path,
) -> Result<()> {
    let private_pem = pem::Pem::new("ED25519 PRIVATE KEY", signing_key.to_bytes().to_vec());
    let public_pem = pem::Pem::new("ED25519 PUBLIC KEY", verifying_key.to_bytes().to_vec());

    fs::write(private_path, pem::encode(&private_pem))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(private_path, fs::Permissions::from_mode(0o600))?;
    }
    fs::write(public_path, pem::encode(&public_pem))?;
    info!(
        "🔑 wrote keypair to {} / {}",
        private_path.display(),
        public_path.display()
    );
    Ok(())
}

/// Sign a message, returning the 64-byte signature.
pub fn sign(signing_key: &SigningKey, message: &[u8]) -> [u8; 64] {
    let signature: Signature = signing_key.sign(message);
    signature.to_bytes()
}

/// Verify a signature against a raw 32-byte public key.
pub fn verify(public_key: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_bytes(public_key) else {
        return false;
    };
    let signature = Signature::from_bytes(signature);
    verifying_key.verify(message, &signature).is_ok()
}
