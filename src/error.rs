use crate::pipeline::context::{full_body, BoxBody};
use http::StatusCode;
use std::fmt;

/// The full rejection/error taxonomy for the admission pipeline.
///
/// Each variant maps to exactly one HTTP status and one stable JSON `code`
/// string via [`RelayError::status`] / [`RelayError::code`]. `Internal`
/// covers infrastructure faults that are not themselves a policy rejection —
/// store errors are fail-open for checks, so `Internal` mostly surfaces from
/// paths that cannot fail open (e.g. a malformed stored key record).
#[derive(Debug)]
#[allow(dead_code)]
pub enum RelayError {
    MissingApiKey,
    InvalidApiKey,
    KeyInactive,
    KeyExpired,
    KeyDeleted,
    PermissionDenied,
    ClientNotAllowed,
    ClaudeCodeOnly,
    ModelBlocked,
    RateLimitExceeded { retry_after_secs: u64 },
    ConcurrencyLimitExceeded { current: u64, limit: u64 },
    QueueOverloaded,
    QueueTimeoutWait,
    QueueTimeoutClient,
    QueueTimeoutGlobal,
    DailyCostLimitExceeded { current: f64, limit: f64 },
    TotalCostLimitExceeded { current: f64, limit: f64 },
    WeeklyOpusCostLimitExceeded { current: f64, limit: f64 },
    RateLimitCostExceeded { current: f64, limit: f64 },
    Internal(String),
}

impl RelayError {
    pub fn status(&self) -> StatusCode {
        use RelayError::*;
        match self {
            MissingApiKey | InvalidApiKey | KeyInactive | KeyExpired | KeyDeleted => {
                StatusCode::UNAUTHORIZED
            }
            PermissionDenied | ClientNotAllowed | ClaudeCodeOnly | ModelBlocked => {
                StatusCode::FORBIDDEN
            }
            RateLimitExceeded { .. }
            | ConcurrencyLimitExceeded { .. }
            | QueueOverloaded
            | QueueTimeoutWait
            | QueueTimeoutClient
            | QueueTimeoutGlobal
            | DailyCostLimitExceeded { .. }
            | TotalCostLimitExceeded { .. }
            | WeeklyOpusCostLimitExceeded { .. }
            | RateLimitCostExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        use RelayError::*;
        match self {
            MissingApiKey => "missing_api_key",
            InvalidApiKey => "invalid_api_key",
            KeyInactive => "key_inactive",
            KeyExpired => "key_expired",
            KeyDeleted => "key_deleted",
            PermissionDenied => "permission_denied",
            ClientNotAllowed => "client_not_allowed",
            ClaudeCodeOnly => "claude_code_only",
            ModelBlocked => "model_blocked",
            RateLimitExceeded { .. } => "rate_limit_exceeded",
            ConcurrencyLimitExceeded { .. } => "concurrency_limit_exceeded",
            QueueOverloaded => "queue_overloaded",
            QueueTimeoutWait => "queue_timeout_wait",
            QueueTimeoutClient => "timeout_client",
            QueueTimeoutGlobal => "timeout_global",
            DailyCostLimitExceeded { .. } => "daily_cost_limit_exceeded",
            TotalCostLimitExceeded { .. } => "total_cost_limit_exceeded",
            WeeklyOpusCostLimitExceeded { .. } => "weekly_opus_cost_limit_exceeded",
            RateLimitCostExceeded { .. } => "rate_limit_cost_exceeded",
            Internal(_) => "internal_error",
        }
    }

    /// Render the standard `{error, code, requestId, ...context}` body.
    pub fn into_response(self, request_id: &str) -> hyper::Response<BoxBody> {
        let status = self.status();
        let code = self.code();
        let mut extra = serde_json::Map::new();

        match &self {
            RelayError::RateLimitExceeded { retry_after_secs } => {
                extra.insert("retryAfter".into(), (*retry_after_secs).into());
            }
            RelayError::ConcurrencyLimitExceeded { current, limit } => {
                extra.insert("currentConcurrency".into(), (*current).into());
                extra.insert("limit".into(), (*limit).into());
            }
            RelayError::DailyCostLimitExceeded { current, limit }
            | RelayError::TotalCostLimitExceeded { current, limit }
            | RelayError::WeeklyOpusCostLimitExceeded { current, limit }
            | RelayError::RateLimitCostExceeded { current, limit } => {
                extra.insert("currentCost".into(), (*current).into());
                extra.insert("limit".into(), (*limit).into());
            }
            _ => {}
        }

        let mut body = serde_json::json!({
            "error": self.to_string(),
            "code": code,
            "requestId": request_id,
        });
        if let serde_json::Value::Object(ref mut map) = body {
            map.extend(extra);
        }

        let mut builder = hyper::Response::builder()
            .status(status)
            .header("content-type", "application/json");

        if let RelayError::RateLimitExceeded { retry_after_secs } = &self {
            builder = builder.header("Retry-After", retry_after_secs.to_string());
        }

        builder
            .body(full_body(body.to_string()))
            .expect("static response parts are always valid")
    }
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use RelayError::*;
        match self {
            MissingApiKey => write!(f, "no API key supplied"),
            InvalidApiKey => write!(f, "API key is not recognized"),
            KeyInactive => write!(f, "API key is inactive"),
            KeyExpired => write!(f, "API key has expired"),
            KeyDeleted => write!(f, "API key has been deleted"),
            PermissionDenied => write!(f, "API key lacks permission for this provider"),
            ClientNotAllowed => write!(f, "client is not in the allowed list for this key"),
            ClaudeCodeOnly => write!(f, "this gateway only accepts Claude Code clients"),
            ModelBlocked => write!(f, "requested model is blacklisted for this key"),
            RateLimitExceeded { .. } => write!(f, "rate limit exceeded"),
            ConcurrencyLimitExceeded { .. } => write!(f, "concurrency limit exceeded"),
            QueueOverloaded => write!(f, "admission queue is overloaded"),
            QueueTimeoutWait => write!(f, "timed out waiting in the admission queue"),
            QueueTimeoutClient => write!(f, "caller cancelled while queued"),
            QueueTimeoutGlobal => write!(f, "admission deadline exceeded"),
            DailyCostLimitExceeded { .. } => write!(f, "daily cost limit exceeded"),
            TotalCostLimitExceeded { .. } => write!(f, "total cost limit exceeded"),
            WeeklyOpusCostLimitExceeded { .. } => write!(f, "weekly opus cost limit exceeded"),
            RateLimitCostExceeded { .. } => write!(f, "rate-limit-window cost exceeded"),
            Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for RelayError {}

impl From<redis::RedisError> for RelayError {
    fn from(e: redis::RedisError) -> Self {
        RelayError::Internal(format!("store error: {}", e))
    }
}
