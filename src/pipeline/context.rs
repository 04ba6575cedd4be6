use crate::auth::fingerprint::ClientType;
use crate::config::{KeyRecord, Permission};
use crate::limits::rate_limit::RateLimitOutcome;
use bytes::Bytes;
use http_body_util::combinators::BoxBody as HttpBoxBody;
use http_body_util::{BodyExt, Empty, Full};
use std::convert::Infallible;
use std::time::Duration;

pub type BoxBody = HttpBoxBody<Bytes, Infallible>;

pub fn full_body(body: impl Into<Bytes>) -> BoxBody {
    Full::new(body.into())
        .map_err(|never: Infallible| match never {})
        .boxed()
}

pub fn empty_body() -> BoxBody {
    Empty::new()
        .map_err(|never: Infallible| match never {})
        .boxed()
}

/// Per-request context attached to a successfully admitted request (§4.7).
/// `request_id` doubles as the lease member and the correlation id.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub api_key_id: String,
    pub api_key: KeyRecord,
    pub client_type: ClientType,
    pub requested_permission: Permission,
    pub request_model: Option<String>,
    pub authentication_duration: Duration,
    /// Rate-limit outcome from this request's admission, used by the HTTP
    /// layer to set `X-RateLimit-*` response headers on success.
    pub rate_limit: RateLimitOutcome,
}

impl RequestContext {
    pub fn new_request_id() -> String {
        format!("{:032x}", rand::random::<u128>())
    }
}
