//! Integrity verification sinks.

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Length in bytes of a usable verification key.
pub const VERIFY_KEY_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("digest mismatch (expected {expected}, got {actual})")]
    Mismatch { expected: String, actual: String },

    #[error("verification key must be {VERIFY_KEY_LEN} bytes, got {0}")]
    InvalidKey(usize),
}

/// Write-sink fed with a file's bytes; `finish` succeeds iff they match the key.
pub trait Verifier: Send {
    fn update(&mut self, chunk: &[u8]);

    fn finish(self: Box<Self>) -> Result<(), VerifyError>;
}

/// SHA-256 verifier: the key is the expected digest.
pub struct Sha256Verifier {
    expected: Vec<u8>,
    hasher: Sha256,
}

impl Sha256Verifier {
    pub fn new(key: &[u8]) -> Self {
        Self {
            expected: key.to_vec(),
            hasher: Sha256::new(),
        }
    }

    pub fn digest(bytes: &[u8]) -> Vec<u8> {
        Sha256::digest(bytes).to_vec()
    }
}

impl Verifier for Sha256Verifier {
    fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
    }

    fn finish(self: Box<Self>) -> Result<(), VerifyError> {
        if self.expected.len() != VERIFY_KEY_LEN {
            return Err(VerifyError::InvalidKey(self.expected.len()));
        }

        let actual = self.hasher.finalize();
        if actual.as_slice() == self.expected.as_slice() {
            Ok(())
        } else {
            Err(VerifyError::Mismatch {
                expected: hex::encode(&self.expected),
                actual: hex::encode(actual),
            })
        }
    }
}
