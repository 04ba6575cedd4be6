use crate::config::KeyRecord;
use crate::error::RelayError;
use crate::store::keys;
use crate::store::StoreClient;
use sha2::{Digest, Sha256};

/// Salt mixed into the key hash. In a production deployment this would come
/// from configuration; kept as a constant here since the pipeline only reads
/// the resulting hash, never the raw key, and the admin subsystem that
/// issues keys owns the matching salt.
const HASH_SALT: &str = "relay-gateway-key-salt-v1";

pub fn hash_raw_key(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(HASH_SALT.as_bytes());
    hasher.update(raw.as_bytes());
    let digest = hasher.finalize();
    hex_encode(&digest)
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// Extract the raw API key from the request, in priority order (§4.1).
/// Returns `(raw_key, via_query_param)` so the caller can log the
/// side-channel warning for query-parameter extraction.
pub fn extract_raw_key(
    authorization: Option<&str>,
    x_api_key: Option<&str>,
    query_api_key: Option<&str>,
) -> Option<(String, bool)> {
    if let Some(auth) = authorization {
        if let Some(token) = auth.strip_prefix("Bearer ") {
            return Some((token.trim().to_string(), false));
        }
        if !auth.trim().is_empty() {
            return Some((auth.trim().to_string(), false));
        }
    }
    if let Some(key) = x_api_key {
        if !key.trim().is_empty() {
            return Some((key.trim().to_string(), false));
        }
    }
    if let Some(key) = query_api_key {
        if !key.trim().is_empty() {
            return Some((key.trim().to_string(), true));
        }
    }
    None
}

/// Resolve a raw key to its key record: hash → fingerprint map → record (§4.1).
pub async fn resolve(store: &StoreClient, raw_key: &str) -> Result<KeyRecord, RelayError> {
    let hashed = hash_raw_key(raw_key);
    let id = store
        .hget(keys::APIKEY_HASH_MAP, &hashed)
        .await?
        .ok_or(RelayError::InvalidApiKey)?;

    let raw_record = store
        .get_string(&keys::apikey_record(&id))
        .await?
        .ok_or(RelayError::InvalidApiKey)?;

    serde_json::from_str(&raw_record)
        .map_err(|e| RelayError::Internal(format!("malformed key record {id}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_bearer_token() {
        let (raw, via_query) =
            extract_raw_key(Some("Bearer abc123"), None, None).expect("should extract");
        assert_eq!(raw, "abc123");
        assert!(!via_query);
    }

    #[test]
    fn extracts_raw_authorization_header() {
        let (raw, _) = extract_raw_key(Some("abc123"), None, None).expect("should extract");
        assert_eq!(raw, "abc123");
    }

    #[test]
    fn falls_back_to_x_api_key() {
        let (raw, via_query) = extract_raw_key(None, Some("key-2"), None).expect("should extract");
        assert_eq!(raw, "key-2");
        assert!(!via_query);
    }

    #[test]
    fn falls_back_to_query_param_and_flags_it() {
        let (raw, via_query) =
            extract_raw_key(None, None, Some("key-3")).expect("should extract");
        assert_eq!(raw, "key-3");
        assert!(via_query);
    }

    #[test]
    fn no_extraction_returns_none() {
        assert!(extract_raw_key(None, None, None).is_none());
    }

    #[test]
    fn hash_is_deterministic_and_salted() {
        let h1 = hash_raw_key("same-key");
        let h2 = hash_raw_key("same-key");
        assert_eq!(h1, h2);
        assert_ne!(h1, "same-key");
        assert_eq!(h1.len(), 64); // hex-encoded SHA-256
    }
}
