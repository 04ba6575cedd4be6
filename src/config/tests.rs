use super::*;

#[test]
fn defaults_are_sane() {
    let cfg = GatewayConfig::default();
    assert_eq!(cfg.lease_ttl_ms, 300_000);
    assert_eq!(cfg.queue_poll_interval_ms, 500);
    assert_eq!(cfg.env, Env::Development);
    assert!(!cfg.claude_code_only);
}

#[test]
fn validate_rejects_blank_jwt_secret() {
    let cfg = GatewayConfig::default();
    assert!(cfg.validate().is_err());
}

#[test]
fn validate_accepts_minimal_valid_config() {
    let mut cfg = GatewayConfig::default();
    cfg.jwt_secret = "s3cret".to_string();
    assert!(cfg.validate().is_ok());
}

#[test]
fn validate_rejects_zero_lease_ttl() {
    let mut cfg = GatewayConfig::default();
    cfg.jwt_secret = "s3cret".to_string();
    cfg.lease_ttl_ms = 0;
    assert!(cfg.validate().is_err());
}

#[test]
fn toml_round_trip_for_key_record() {
    let record = KeyRecord {
        id: "k1".into(),
        hashed_key: "abc123".into(),
        name: "test key".into(),
        active: true,
        soft_deleted: false,
        expires_at: None,
        first_used_at: None,
        permission: Permission::Claude,
        allowed_clients: vec!["ClaudeCode".into()],
        model_blacklist: vec![],
        concurrency: ConcurrencyConfig {
            concurrent_limit: 2,
            queue_enabled: true,
            queue_max_size: 10,
            queue_max_size_multiplier: 2.0,
            queue_timeout_ms: 5_000,
        },
        limits: LimitsConfig::default(),
        user_id: None,
        tags: vec![],
    };

    let json = serde_json::to_string(&record).unwrap();
    let back: KeyRecord = serde_json::from_str(&json).unwrap();
    assert_eq!(back.id, record.id);
    assert_eq!(back.concurrency.concurrent_limit, 2);
}

#[test]
fn permission_allows_all_wildcard() {
    assert!(Permission::All.allows(Permission::Claude));
    assert!(Permission::Claude.allows(Permission::Claude));
    assert!(!Permission::Claude.allows(Permission::Gemini));
}
