use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// Deserialize a `T` that implements `Default` — treats JSON `null` the same as
/// a missing field (returns `T::default()`).  Use with:
///   `#[serde(default, deserialize_with = "deserialize_null_default")]`
pub fn deserialize_null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Required, non-blank — signing secret for the (external) admin/login JWTs.
    /// The pipeline itself never issues or verifies JWTs; this field exists
    /// purely so the one shared process-wide config carries it.
    #[serde(default)]
    pub jwt_secret: String,

    /// Global switch: when true, only `ClaudeCode`-fingerprinted clients pass
    /// the key validator (§4.3).
    #[serde(default)]
    pub claude_code_only: bool,

    /// Fixed integer hour offset applied to `now` before computing day/week
    /// strings for the cost gate. Not a named time zone; DST is not handled.
    #[serde(default)]
    pub time_zone_offset_hours: i32,

    #[serde(default)]
    pub store: StoreConfig,

    /// Milliseconds a concurrency lease lives before it is purged even if
    /// never explicitly released.
    #[serde(default = "default_lease_ttl_ms")]
    pub lease_ttl_ms: u64,

    /// Fallback poll interval for queued waiters, covering missed pub/sub
    /// wake-ups across replicas.
    #[serde(default = "default_queue_poll_interval_ms")]
    pub queue_poll_interval_ms: u64,

    /// Overall ceiling on time spent in the admission pipeline (resolve
    /// through lease acquisition), independent of a key's own
    /// `queue_timeout_ms`. Exceeding it rejects `timeout_global`.
    #[serde(default = "default_admission_deadline_ms")]
    pub admission_deadline_ms: u64,

    #[serde(default)]
    pub rate_limit_defaults: RateLimitDefaults,

    #[serde(default = "default_env")]
    pub env: Env,

    /// Upstream base URL per provider permission, used by the thin passthrough
    /// forwarder once a request has been admitted. Account selection within a
    /// provider is owned by the admin subsystem and out of scope here.
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub providers: HashMap<String, ProviderConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            claude_code_only: false,
            time_zone_offset_hours: 0,
            store: StoreConfig::default(),
            lease_ttl_ms: default_lease_ttl_ms(),
            queue_poll_interval_ms: default_queue_poll_interval_ms(),
            admission_deadline_ms: default_admission_deadline_ms(),
            rate_limit_defaults: RateLimitDefaults::default(),
            env: default_env(),
            providers: HashMap::new(),
        }
    }
}

fn default_lease_ttl_ms() -> u64 {
    300_000
}

fn default_queue_poll_interval_ms() -> u64 {
    500
}

fn default_admission_deadline_ms() -> u64 {
    60_000
}

fn default_env() -> Env {
    Env::Development
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Env {
    Development,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_url")]
    pub url: String,

    /// Channel prefix for lease-release pub/sub wake signals.
    #[serde(default = "default_pubsub_prefix")]
    pub pubsub_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            pubsub_prefix: default_pubsub_prefix(),
        }
    }
}

fn default_store_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_pubsub_prefix() -> String {
    "lease_release".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitDefaults {
    #[serde(default = "default_rl_requests")]
    pub requests_per_minute: u64,

    #[serde(default = "default_rl_requests_hour")]
    pub requests_per_hour: u64,

    #[serde(default = "default_rl_window_minutes")]
    pub window_minutes: u64,
}

impl Default for RateLimitDefaults {
    fn default() -> Self {
        Self {
            requests_per_minute: default_rl_requests(),
            requests_per_hour: default_rl_requests_hour(),
            window_minutes: default_rl_window_minutes(),
        }
    }
}

fn default_rl_requests() -> u64 {
    60
}

fn default_rl_requests_hour() -> u64 {
    1_000
}

fn default_rl_window_minutes() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
}

// ---------------------------------------------------------------------------
// Key record (§3) — owned by the admin subsystem, read-only from here.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    All,
    Claude,
    Gemini,
    Openai,
    Droid,
}

impl Permission {
    pub fn allows(&self, requested: Permission) -> bool {
        matches!(self, Permission::All) || *self == requested
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    #[serde(default)]
    pub concurrent_limit: u64,

    #[serde(default)]
    pub queue_enabled: bool,

    #[serde(default)]
    pub queue_max_size: u64,

    #[serde(default = "default_queue_multiplier")]
    pub queue_max_size_multiplier: f64,

    #[serde(default = "default_queue_timeout_ms")]
    pub queue_timeout_ms: u64,
}

fn default_queue_multiplier() -> f64 {
    1.0
}

fn default_queue_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default)]
    pub daily_cost_limit: Option<f64>,

    #[serde(default)]
    pub total_cost_limit: Option<f64>,

    #[serde(default)]
    pub weekly_opus_cost_limit: Option<f64>,

    #[serde(default)]
    pub rate_limit_requests: Option<u64>,

    #[serde(default)]
    pub rate_limit_window_minutes: Option<u64>,

    #[serde(default)]
    pub rate_limit_cost: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRecord {
    pub id: String,
    pub hashed_key: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub soft_deleted: bool,
    /// Epoch milliseconds, absolute. For an activation-based key this is
    /// only effective once `first_used_at` is also set — a key with
    /// `expires_at` configured but never yet used has not started its
    /// expiry clock (see `auth::validator::effective_expiry`).
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub first_used_at: Option<i64>,
    #[serde(default = "default_permission")]
    pub permission: Permission,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub allowed_clients: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub model_blacklist: Vec<String>,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub tags: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_permission() -> Permission {
    Permission::All
}
