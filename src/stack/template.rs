//! Opaque template documents.

use sha2::{Digest, Sha256};
use std::sync::Arc;

/// An opaque template document with a content fingerprint.
///
/// The engine never interprets or mutates the bytes, it only transmits them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    body: Arc<[u8]>,
    fingerprint: String,
}

impl Template {
    /// Creates a template from raw bytes.
    #[must_use]
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        let body: Vec<u8> = body.into();
        let fingerprint = hex::encode(Sha256::digest(&body));
        Self {
            body: body.into(),
            fingerprint,
        }
    }

    /// Returns the template bytes.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Returns the template size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.body.len()
    }

    /// Returns the SHA-256 fingerprint as lowercase hex.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Returns the first 8 characters of the fingerprint.
    #[must_use]
    pub fn short_fingerprint(&self) -> &str {
        &self.fingerprint[..8]
    }

    /// Returns the body as text, or `None` if it is not valid UTF-8.
    #[must_use]
    pub fn as_utf8(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}

impl From<&str> for Template {
    fn from(value: &str) -> Self {
        Self::new(value.as_bytes().to_vec())
    }
}

impl From<String> for Template {
    fn from(value: String) -> Self {
        Self::new(value.into_bytes())
    }
}
