//! Label signing
//!
//! Labels are signed with HMAC-SHA256 over the JSON encoding of
//! [`UnsignedLabel`]. The key is the hex-encoded signing credential the
//! labeler is configured with.

use crate::error::{LabelStoreError, LabelStoreResult};
use crate::models::{Label, UnsignedLabel};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct LabelSigner {
    key: Vec<u8>,
}

impl LabelSigner {
    /// Build a signer from a hex-encoded key
    pub fn from_hex(key: &str) -> LabelStoreResult<Self> {
        let key = hex::decode(key.trim())
            .map_err(|e| LabelStoreError::Signing(format!("signing key is not valid hex: {}", e)))?;

        if key.is_empty() {
            return Err(LabelStoreError::Signing("signing key is empty".to_string()));
        }

        Ok(Self { key })
    }

    pub fn sign(&self, label: &UnsignedLabel<'_>) -> LabelStoreResult<Vec<u8>> {
        let payload = serde_json::to_vec(label)?;
        let mut mac = self.mac()?;
        mac.update(&payload);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    /// Check a stored label's signature against this key
    pub fn verify(&self, label: &Label) -> bool {
        let Ok(payload) = serde_json::to_vec(&label.unsigned()) else {
            return false;
        };
        let Ok(mut mac) = self.mac() else {
            return false;
        };
        mac.update(&payload);
        mac.verify_slice(&label.sig).is_ok()
    }

    fn mac(&self) -> LabelStoreResult<HmacSha256> {
        HmacSha256::new_from_slice(&self.key).map_err(|e| LabelStoreError::Signing(e.to_string()))
    }
}

impl fmt::Debug for LabelSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LabelSigner")
            .field("key", &"<redacted>")
            .finish()
    }
}
