use crate::auth::fingerprint::{fingerprint, ClientType};
use crate::auth::{resolver, validator};
use crate::concurrency::{acquire_or_queue, LeaseGuard, WakeRegistry};
use crate::config::{GatewayConfig, Permission};
use crate::error::RelayError;
use crate::limits::{cost_gate, rate_limit};
use crate::pipeline::context::RequestContext;
use crate::store::StoreClient;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Everything the admission pipeline needs to know about the inbound
/// request before it can decide anything. Constructed by the HTTP layer
/// from headers/query/path/body and handed in whole, so this module has no
/// dependency on `hyper` types.
pub struct AdmissionRequest<'a> {
    pub authorization: Option<&'a str>,
    pub x_api_key: Option<&'a str>,
    pub query_api_key: Option<&'a str>,
    pub user_agent: &'a str,
    pub path_model: Option<&'a str>,
    pub body_json: Option<&'a serde_json::Value>,
    pub requested_permission: Permission,
}

/// Outcome of a successful admission: the attached context plus a lease
/// guard that MUST be released (or dropped, which releases it anyway) once
/// the forwarded request completes.
pub struct Admitted {
    pub context: RequestContext,
    pub lease: LeaseGuard,
}

/// Runs the full six-step admission/lease pipeline (§4.7):
/// `INIT → KEY_RESOLVED → VALIDATED → RATE_OK → LEASE_HELD → COST_OK`.
/// Any step may short-circuit with a typed rejection; once a lease has been
/// acquired, every exit path (including this function's own early returns
/// after that point) releases it via the guard's `Drop`. `cancellation`
/// fires if the caller's connection is gone; it is only consulted during the
/// (possibly long) queue wait inside `acquire_or_queue`.
pub async fn admit(
    store: &StoreClient,
    cfg: &GatewayConfig,
    wake_registry: &WakeRegistry,
    req: &AdmissionRequest<'_>,
    now_ms: i64,
    cancellation: &CancellationToken,
) -> Result<Admitted, RelayError> {
    let auth_start = Instant::now();

    // KEY_RESOLVED
    let (raw_key, via_query) =
        resolver::extract_raw_key(req.authorization, req.x_api_key, req.query_api_key)
            .ok_or(RelayError::MissingApiKey)?;
    if via_query {
        tracing::warn!("API key supplied via query parameter; prefer a header");
    }
    let mut record = resolver::resolve(store, &raw_key).await?;

    let client_type = fingerprint(req.user_agent);
    let request_model = validator::parse_request_model(req.path_model, req.body_json);

    // VALIDATED
    validator::validate(
        cfg,
        &record,
        client_type,
        req.requested_permission,
        request_model.as_deref(),
        now_ms,
    )?;

    if record.first_used_at.is_none() {
        record.first_used_at = Some(now_ms);
        // Persisting the activation timestamp back to the record is owned
        // by the admin subsystem's write path; the pipeline only reasons
        // about it locally for this request's validation decision.
    }

    let authentication_duration = auth_start.elapsed();

    // RATE_OK
    let rl_outcome = rate_limit::check(
        store,
        &record.id,
        &cfg.rate_limit_defaults,
        record.limits.rate_limit_requests,
        None,
        now_ms / 1000,
    )
    .await?;

    // LEASE_HELD
    let request_id = RequestContext::new_request_id();
    let max = record.concurrency.concurrent_limit;
    let acquire = acquire_or_queue(
        store,
        wake_registry,
        &record.id,
        &request_id,
        max,
        record.concurrency.queue_enabled,
        record.concurrency.queue_max_size,
        record.concurrency.queue_max_size_multiplier,
        record.concurrency.queue_timeout_ms,
        cfg.queue_poll_interval_ms,
        cfg.lease_ttl_ms,
        now_ms,
        cancellation,
    );
    match tokio::time::timeout(
        std::time::Duration::from_millis(cfg.admission_deadline_ms),
        acquire,
    )
    .await
    {
        Ok(result) => result?,
        Err(_) => return Err(RelayError::QueueTimeoutGlobal),
    }

    let lease = LeaseGuard::new(
        store.clone(),
        record.id.clone(),
        request_id.clone(),
        cfg.store.pubsub_prefix.clone(),
    );

    // COST_OK — a rejection here must still release the lease just acquired.
    if let Err(e) = cost_gate::check(
        store,
        &record.id,
        &record.limits,
        request_model.as_deref(),
        cfg.time_zone_offset_hours,
        now_ms,
    )
    .await
    {
        lease.release().await;
        return Err(e);
    }

    let context = RequestContext {
        request_id,
        api_key_id: record.id.clone(),
        api_key: record,
        client_type,
        requested_permission: req.requested_permission,
        request_model,
        authentication_duration,
        rate_limit: rl_outcome,
    };

    Ok(Admitted { context, lease })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admitted_request_carries_a_lease_and_context() {
        // Compile-time shape check: Admitted exposes both halves callers need.
        fn _assert_fields(a: &Admitted) {
            let _ = &a.context.request_id;
            let _ = &a.lease;
        }
    }

    #[test]
    fn client_type_unknown_when_no_user_agent_matches() {
        assert_eq!(fingerprint(""), ClientType::Unknown);
    }
}
