//! Local identity and hashing.
//!
//! The local identity is a long-term X25519 keypair generated once per
//! config directory and stored persistently. Its hash (truncated BLAKE3 of
//! the public key) is what the host displays and what peers address.
//!
//! All key material derives ZeroizeOnDrop and is wiped from memory when dropped.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::transport::HASH_LEN;

// ── BLAKE3 ────────────────────────────────────────────────────────────────────

/// Hash a byte slice, returning a 32-byte BLAKE3 digest.
pub fn hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// First `HASH_LEN` bytes of the BLAKE3 digest. Used for identity hashes.
pub fn truncated_hash(data: &[u8]) -> [u8; HASH_LEN] {
    let full = hash(data);
    let mut out = [0u8; HASH_LEN];
    out.copy_from_slice(&full[..HASH_LEN]);
    out
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("failed to read identity {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("failed to write identity {0}: {1}")]
    Write(PathBuf, std::io::Error),
    #[error("identity file {0} is malformed ({1} bytes, expected 32)")]
    Malformed(PathBuf, usize),
}

// ── Identity ──────────────────────────────────────────────────────────────────

/// The device's long-term static keypair.
///
/// The private key never leaves this struct except through `private_bytes`
/// for persistence.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Identity {
    private: Zeroizing<[u8; 32]>,
    pub public: [u8; 32],
}

impl Identity {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(rand::thread_rng());
        let public = PublicKey::from(&secret);
        Self {
            private: Zeroizing::new(secret.to_bytes()),
            public: *public.as_bytes(),
        }
    }

    /// Reconstruct from stored private key bytes. The public key is derived.
    pub fn from_private(private_bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(private_bytes);
        let public = PublicKey::from(&secret);
        Self {
            private: Zeroizing::new(private_bytes),
            public: *public.as_bytes(),
        }
    }

    pub fn private_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(*self.private)
    }

    pub fn hash(&self) -> [u8; HASH_LEN] {
        truncated_hash(&self.public)
    }

    pub fn hex_hash(&self) -> String {
        hex::encode(self.hash())
    }

    /// Load the identity stored at `path`.
    pub fn from_file(path: &Path) -> Result<Self, IdentityError> {
        let bytes = Zeroizing::new(
            fs::read(path).map_err(|e| IdentityError::Read(path.to_path_buf(), e))?,
        );
        let private: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| IdentityError::Malformed(path.to_path_buf(), bytes.len()))?;
        Ok(Self::from_private(private))
    }

    /// Persist the private key. Writes are atomic: temp file, then rename.
    pub fn to_file(&self, path: &Path) -> Result<(), IdentityError> {
        let err = |e| IdentityError::Write(path.to_path_buf(), e);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(err)?;
        }

        let tmp_path = path.with_extension("tmp");
        {
            let mut file = open_private(&tmp_path).map_err(err)?;
            file.write_all(&*self.private).map_err(err)?;
            file.sync_all().map_err(err)?;
        }
        fs::rename(&tmp_path, path).map_err(err)?;
        Ok(())
    }

    /// Load the identity at `path`, creating and persisting a fresh one if
    /// the file does not exist. Returns the identity and whether it was
    /// newly created.
    pub fn load_or_create(path: &Path) -> Result<(Self, bool), IdentityError> {
        if path.is_file() {
            let identity = Self::from_file(path)?;
            tracing::debug!(identity = identity.hex_hash(), path = %path.display(), "identity loaded");
            return Ok((identity, false));
        }

        let identity = Self::generate();
        identity.to_file(path)?;
        tracing::info!(identity = identity.hex_hash(), path = %path.display(), "identity created");
        Ok((identity, true))
    }
}

#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    fs::File::create(path)
}
