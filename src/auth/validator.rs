use crate::auth::fingerprint::{client_allowed, ClientType};
use crate::config::{GatewayConfig, KeyRecord, Permission};
use crate::error::RelayError;

/// Run the ordered validation chain (§4.3) against an already-resolved key
/// record. Each check produces a distinct error code; the first failure
/// short-circuits.
pub fn validate(
    cfg: &GatewayConfig,
    record: &KeyRecord,
    client: ClientType,
    requested_permission: Permission,
    request_model: Option<&str>,
    now_ms: i64,
) -> Result<(), RelayError> {
    if cfg.claude_code_only && client != ClientType::ClaudeCode {
        return Err(RelayError::ClaudeCodeOnly);
    }

    if record.soft_deleted {
        return Err(RelayError::KeyDeleted);
    }
    if !record.active {
        return Err(RelayError::KeyInactive);
    }
    if let Some(expires_at) = effective_expiry(record) {
        if now_ms >= expires_at {
            return Err(RelayError::KeyExpired);
        }
    }

    if !client_allowed(&record.allowed_clients, client) {
        return Err(RelayError::ClientNotAllowed);
    }

    if !record.permission.allows(requested_permission) {
        return Err(RelayError::PermissionDenied);
    }

    if let Some(model) = request_model {
        if model_blocked(&record.model_blacklist, model) {
            return Err(RelayError::ModelBlocked);
        }
    }

    Ok(())
}

/// `expires_at` is measured from `first_used_at` once that is set: an
/// activation-based key with `expires_at` configured but never yet used has
/// no effective expiry (the clock has not started), so this validation pass
/// admits it and the caller records `first_used_at` on this very admission.
/// Once `first_used_at` is set, `expires_at` is an absolute timestamp
/// compared directly against `now`.
fn effective_expiry(record: &KeyRecord) -> Option<i64> {
    match (record.expires_at, record.first_used_at) {
        (Some(expires_at), Some(_)) => Some(expires_at),
        (Some(_), None) => None,
        (None, _) => None,
    }
}

fn model_blocked(blacklist: &[String], model: &str) -> bool {
    let model = model.to_lowercase();
    blacklist.iter().any(|pattern| {
        let pattern = pattern.to_lowercase();
        match pattern.strip_suffix('*') {
            Some(prefix) => model.starts_with(prefix),
            None => model == pattern,
        }
    })
}

/// Parse the request model per §4.3: path parameter first (stripped after
/// the first `:`), else a JSON body `model` field.
pub fn parse_request_model(path_model: Option<&str>, body_json: Option<&serde_json::Value>) -> Option<String> {
    if let Some(raw) = path_model {
        let stripped = raw.split(':').next().unwrap_or(raw);
        if !stripped.is_empty() {
            return Some(stripped.to_string());
        }
    }
    body_json
        .and_then(|v| v.get("model"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConcurrencyConfig;
    use crate::config::LimitsConfig;

    fn base_record() -> KeyRecord {
        KeyRecord {
            id: "k1".to_string(),
            hashed_key: "hash".to_string(),
            name: "test".to_string(),
            active: true,
            soft_deleted: false,
            expires_at: None,
            first_used_at: None,
            permission: Permission::All,
            allowed_clients: vec![],
            model_blacklist: vec![],
            concurrency: ConcurrencyConfig::default(),
            limits: LimitsConfig::default(),
            user_id: None,
            tags: vec![],
        }
    }

    #[test]
    fn accepts_a_healthy_key() {
        let cfg = GatewayConfig::default();
        let record = base_record();
        assert!(validate(&cfg, &record, ClientType::ClaudeCode, Permission::Claude, None, 1000).is_ok());
    }

    #[test]
    fn rejects_inactive_key() {
        let cfg = GatewayConfig::default();
        let mut record = base_record();
        record.active = false;
        let err = validate(&cfg, &record, ClientType::ClaudeCode, Permission::Claude, None, 1000).unwrap_err();
        assert_eq!(err.code(), "key_inactive");
    }

    #[test]
    fn expires_at_one_ms_in_the_past_is_expired() {
        let cfg = GatewayConfig::default();
        let mut record = base_record();
        record.expires_at = Some(999);
        let err = validate(&cfg, &record, ClientType::ClaudeCode, Permission::Claude, None, 1000).unwrap_err();
        assert_eq!(err.code(), "key_expired");
    }

    #[test]
    fn expires_at_equal_to_now_is_expired() {
        let cfg = GatewayConfig::default();
        let mut record = base_record();
        record.expires_at = Some(1000);
        let err = validate(&cfg, &record, ClientType::ClaudeCode, Permission::Claude, None, 1000).unwrap_err();
        assert_eq!(err.code(), "key_expired");
    }

    #[test]
    fn activation_key_without_first_use_is_not_expired() {
        let cfg = GatewayConfig::default();
        let record = base_record();
        assert!(validate(&cfg, &record, ClientType::ClaudeCode, Permission::Claude, None, i64::MAX).is_ok());
    }

    #[test]
    fn activation_key_with_expiry_set_but_never_used_is_not_expired() {
        // The real boundary case: expires_at IS configured, but first_used_at
        // is still unset, so the expiry clock has not started.
        let cfg = GatewayConfig::default();
        let mut record = base_record();
        record.expires_at = Some(1);
        record.first_used_at = None;
        assert!(validate(&cfg, &record, ClientType::ClaudeCode, Permission::Claude, None, i64::MAX).is_ok());
    }

    #[test]
    fn activation_key_expires_relative_to_first_used_at() {
        let cfg = GatewayConfig::default();
        let mut record = base_record();
        record.expires_at = Some(1_000);
        record.first_used_at = Some(500);
        let err = validate(&cfg, &record, ClientType::ClaudeCode, Permission::Claude, None, 1_000).unwrap_err();
        assert_eq!(err.code(), "key_expired");
    }

    #[test]
    fn rejects_wrong_permission() {
        let cfg = GatewayConfig::default();
        let mut record = base_record();
        record.permission = Permission::Gemini;
        let err = validate(&cfg, &record, ClientType::ClaudeCode, Permission::Claude, None, 1000).unwrap_err();
        assert_eq!(err.code(), "permission_denied");
    }

    #[test]
    fn rejects_blacklisted_model() {
        let cfg = GatewayConfig::default();
        let mut record = base_record();
        record.model_blacklist = vec!["claude-3-opus*".to_string()];
        let err = validate(
            &cfg,
            &record,
            ClientType::ClaudeCode,
            Permission::Claude,
            Some("claude-3-opus-20240229"),
            1000,
        )
        .unwrap_err();
        assert_eq!(err.code(), "model_blocked");
    }

    #[test]
    fn claude_code_only_rejects_other_clients() {
        let mut cfg = GatewayConfig::default();
        cfg.claude_code_only = true;
        let record = base_record();
        let err = validate(&cfg, &record, ClientType::Cursor, Permission::Claude, None, 1000).unwrap_err();
        assert_eq!(err.code(), "claude_code_only");
    }

    #[test]
    fn parses_model_from_path_param_stripping_after_colon() {
        let model = parse_request_model(Some("claude-3-sonnet:20240229"), None);
        assert_eq!(model.as_deref(), Some("claude-3-sonnet"));
    }

    #[test]
    fn parses_model_from_body_when_no_path_param() {
        let body = serde_json::json!({"model": "gpt-4o"});
        let model = parse_request_model(None, Some(&body));
        assert_eq!(model.as_deref(), Some("gpt-4o"));
    }
}
