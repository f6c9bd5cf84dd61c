//! Opaque pagination cursors
//!
//! A cursor is base64 of a small JSON payload carrying the entity type tag, the
//! ordered key of the edge, the fingerprint of the query that produced it and a
//! checksum over all three. The checksum catches corruption and casual edits; it
//! is not a secret.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::types::{EntityType, OrderedKey, OrderingSpec, WhereFilter};

const CURSOR_VERSION: u8 = 1;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CursorError {
    #[error("Malformed cursor: {0}")]
    Malformed(String),

    #[error("Cursor was issued for a different query")]
    FingerprintMismatch,
}

/// Identity of a query shape: entity type, ordering and active filter
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryFingerprint {
    entity_type: EntityType,
    digest: String,
}

impl QueryFingerprint {
    pub fn new(entity_type: EntityType, ordering: &OrderingSpec, filter: &WhereFilter) -> Self {
        // Both serialize canonically (ordered fields, sorted filter keys)
        let shape = serde_json::json!({
            "type": entity_type.as_str(),
            "order": ordering,
            "where": filter,
        });
        Self {
            entity_type,
            digest: short_digest(shape.to_string().as_bytes()),
        }
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    pub fn as_str(&self) -> &str {
        &self.digest
    }
}

#[derive(Serialize, Deserialize)]
struct CursorPayload {
    v: u8,
    t: String,
    k: OrderedKey,
    f: String,
    c: String,
}

impl CursorPayload {
    fn checksum(&self) -> String {
        let key = serde_json::to_string(&self.k).unwrap_or_default();
        short_digest(format!("{}|{}|{}|{}", self.v, self.t, key, self.f).as_bytes())
    }
}

/// Cursor encoding/decoding
pub struct CursorCodec;

impl CursorCodec {
    /// Encode the position `key` within the query identified by `fingerprint`
    pub fn encode(key: &OrderedKey, fingerprint: &QueryFingerprint) -> String {
        let mut payload = CursorPayload {
            v: CURSOR_VERSION,
            t: fingerprint.entity_type.as_str().to_string(),
            k: key.clone(),
            f: fingerprint.digest.clone(),
            c: String::new(),
        };
        payload.c = payload.checksum();
        // Serializing a struct of strings and key parts cannot fail
        let json = serde_json::to_string(&payload).unwrap_or_default();
        BASE64.encode(json.as_bytes())
    }

    /// Decode a cursor issued for the query identified by `fingerprint`
    pub fn decode(cursor: &str, fingerprint: &QueryFingerprint) -> Result<OrderedKey, CursorError> {
        let bytes = BASE64
            .decode(cursor.as_bytes())
            .map_err(|e| CursorError::Malformed(e.to_string()))?;
        let payload: CursorPayload = serde_json::from_slice(&bytes)
            .map_err(|e| CursorError::Malformed(e.to_string()))?;

        if payload.v != CURSOR_VERSION {
            return Err(CursorError::Malformed(format!(
                "unsupported cursor version {}",
                payload.v
            )));
        }
        if payload.c != payload.checksum() {
            return Err(CursorError::Malformed("checksum mismatch".to_string()));
        }
        if payload.t != fingerprint.entity_type.as_str() || payload.f != fingerprint.digest {
            return Err(CursorError::FingerprintMismatch);
        }

        Ok(payload.k)
    }
}

/// First 8 bytes of a SHA-256 digest, hex encoded
fn short_digest(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .take(8)
        .map(|b| format!("{:02x}", b))
        .collect()
}
