use crate::config::{GatewayConfig, Permission};
use bytes::Bytes;
use http_body_util::BodyExt;
use std::time::Duration;
use tracing::warn;

#[derive(Debug)]
pub enum ForwardError {
    NoProviderConfigured(Permission),
    Upstream(reqwest::Error),
}

impl std::fmt::Display for ForwardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ForwardError::NoProviderConfigured(p) => {
                write!(f, "no upstream base URL configured for permission {p:?}")
            }
            ForwardError::Upstream(e) => write!(f, "upstream request failed: {e}"),
        }
    }
}

impl std::error::Error for ForwardError {}

fn permission_key(permission: Permission) -> &'static str {
    match permission {
        Permission::All => "all",
        Permission::Claude => "claude",
        Permission::Gemini => "gemini",
        Permission::Openai => "openai",
        Permission::Droid => "droid",
    }
}

/// Thin passthrough forward: no retry, no circuit breaker, no load
/// balancing — an admitted request is sent once to the configured upstream
/// base URL for its resolved provider permission and the response is
/// streamed back unmodified.
pub async fn forward_request(
    client: &reqwest::Client,
    cfg: &GatewayConfig,
    permission: Permission,
    method: reqwest::Method,
    path_and_query: &str,
    headers: reqwest::header::HeaderMap,
    body: Bytes,
) -> Result<reqwest::Response, ForwardError> {
    let provider = cfg
        .providers
        .get(permission_key(permission))
        .ok_or(ForwardError::NoProviderConfigured(permission))?;

    let url = format!("{}{}", provider.base_url.trim_end_matches('/'), path_and_query);

    let response = client
        .request(method, url)
        .headers(headers)
        .body(body)
        .send()
        .await
        .map_err(|e| {
            warn!(error = %e, "upstream forward failed");
            ForwardError::Upstream(e)
        })?;

    Ok(response)
}

pub fn build_forward_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(120))
        .build()
        .expect("failed to build upstream forward client")
}

pub async fn buffer_incoming_body(body: hyper::body::Incoming) -> Bytes {
    body.collect()
        .await
        .map(|c| c.to_bytes())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_key_round_trips_all_variants() {
        assert_eq!(permission_key(Permission::All), "all");
        assert_eq!(permission_key(Permission::Claude), "claude");
        assert_eq!(permission_key(Permission::Gemini), "gemini");
        assert_eq!(permission_key(Permission::Openai), "openai");
        assert_eq!(permission_key(Permission::Droid), "droid");
    }
}
