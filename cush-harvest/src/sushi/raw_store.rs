//! Raw response persistence
//!
//! Keeps the exact bytes a vendor returned, for audits and usage
//! disputes: gzip-compressed, then encrypted at rest with
//! ChaCha20-Poly1305. Files are keyed by consortium, institution,
//! provider and harvest identity. A sha-256 digest of the original bytes
//! is returned so callers can record what was stored.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use cush_common::db::models::ReportKind;
use cush_common::{Error, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::debug;

const NONCE_LEN: usize = 24;

/// Location and digest of one stored response
#[derive(Debug, Clone)]
pub struct StoredRaw {
    pub path: PathBuf,
    /// Hex sha-256 of the original (uncompressed, unencrypted) bytes
    pub sha256: String,
}

/// Encrypted-at-rest store for raw vendor responses
pub struct RawResponseStore {
    root: PathBuf,
    consortium: String,
    cipher: XChaCha20Poly1305,
}

impl RawResponseStore {
    pub fn new(root: PathBuf, consortium: String, key: &[u8; 32]) -> Self {
        Self {
            root,
            consortium,
            cipher: XChaCha20Poly1305::new(key.into()),
        }
    }

    /// Parse the configured hex key
    pub fn key_from_hex(hex: &str) -> Result<[u8; 32]> {
        let hex = hex.trim();
        if hex.len() != 64 {
            return Err(Error::Config(
                "raw_response_key must be 64 hex characters".to_string(),
            ));
        }
        let mut key = [0u8; 32];
        for (i, byte) in key.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[2 * i..2 * i + 2], 16)
                .map_err(|_| Error::Config("raw_response_key is not valid hex".to_string()))?;
        }
        Ok(key)
    }

    fn file_path(
        &self,
        institution_id: &str,
        provider_id: &str,
        harvest_id: &str,
        report: ReportKind,
        yearmon: &str,
    ) -> PathBuf {
        self.root
            .join(&self.consortium)
            .join(institution_id)
            .join(provider_id)
            .join(format!("{}_{}_{}.raw", report.as_str(), yearmon, harvest_id))
    }

    /// Compress, encrypt and persist one response
    pub fn save(
        &self,
        institution_id: &str,
        provider_id: &str,
        harvest_id: &str,
        report: ReportKind,
        yearmon: &str,
        bytes: &[u8],
    ) -> Result<StoredRaw> {
        let sha256 = {
            let mut hasher = Sha256::new();
            hasher.update(bytes);
            format!("{:x}", hasher.finalize())
        };

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes)?;
        let compressed = encoder.finish()?;

        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(XNonce::from_slice(&nonce), compressed.as_slice())
            .map_err(|_| Error::Internal("raw response encryption failed".to_string()))?;

        let path = self.file_path(institution_id, provider_id, harvest_id, report, yearmon);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file_bytes = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        file_bytes.extend_from_slice(&nonce);
        file_bytes.extend_from_slice(&ciphertext);
        std::fs::write(&path, file_bytes)?;

        debug!("Stored raw response: {}", path.display());

        Ok(StoredRaw { path, sha256 })
    }

    /// Decrypt and decompress a stored response back to original bytes
    pub fn load(&self, path: &Path) -> Result<Vec<u8>> {
        let file_bytes = std::fs::read(path)?;
        if file_bytes.len() <= NONCE_LEN {
            return Err(Error::Internal(format!(
                "stored response too short: {}",
                path.display()
            )));
        }
        let (nonce, ciphertext) = file_bytes.split_at(NONCE_LEN);

        let compressed = self
            .cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::Internal("raw response decryption failed".to_string()))?;

        let mut decoder = GzDecoder::new(compressed.as_slice());
        let mut original = Vec::new();
        decoder.read_to_end(&mut original)?;
        Ok(original)
    }

    /// Remove a stored response; a missing file is not an error
    pub fn delete(&self, path: &Path) -> Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
