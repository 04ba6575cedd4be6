use crate::concurrency::lease::{try_acquire, AcquireResult};
use crate::error::RelayError;
use crate::store::{keys, StoreClient};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Per-replica registry of wake signals, one `Notify` per key currently
/// being waited on. The pub/sub listener task (wired up in the server
/// bootstrap) looks entries up here by key id when a release is published.
#[derive(Default, Clone)]
pub struct WakeRegistry {
    notifies: Arc<DashMap<String, Arc<Notify>>>,
}

impl WakeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn notify_for(&self, key_id: &str) -> Arc<Notify> {
        self.notifies
            .entry(key_id.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    /// Called by the pub/sub listener task when a release is published for `key_id`.
    pub fn wake(&self, key_id: &str) {
        if let Some(notify) = self.notifies.get(key_id) {
            notify.notify_waiters();
        }
    }
}

pub struct QueueOutcome {
    pub admitted: bool,
    pub error: Option<RelayError>,
    pub wait_ms: u64,
}

/// Full queueing algorithm (§4.5.3), entered only after a first `try_acquire`
/// returned `acquired: false` and the key's concurrency config has
/// `queue_enabled = true`. `cancellation` fires when the caller's context is
/// gone (e.g. the client disconnected) — it aborts the wait and classifies
/// the exit as `timeout_client` rather than `timeout_wait` (§5).
#[allow(clippy::too_many_arguments)]
pub async fn enqueue_and_wait(
    store: &StoreClient,
    wake_registry: &WakeRegistry,
    key_id: &str,
    request_id: &str,
    max: u64,
    queue_max_size: u64,
    queue_max_size_multiplier: f64,
    queue_timeout_ms: u64,
    poll_interval_ms: u64,
    lease_ttl_ms: u64,
    cancellation: &CancellationToken,
) -> QueueOutcome {
    let queue_key = keys::queue_list(key_id);
    let stats_key = keys::queue_stats(key_id);

    // Overload probe: configured max_queue is the larger of the flat size
    // and the multiplier applied to the concurrency limit (§9 open question (a)).
    let effective_max_queue =
        (queue_max_size as f64).max(queue_max_size_multiplier * max as f64) as u64;

    let current_len = match store.llen(&queue_key).await {
        Ok(n) => n.max(0) as u64,
        Err(e) => {
            warn!(error = %e, key_id, "queue length probe store error, failing open");
            0
        }
    };
    metrics::gauge!("relay_queue_depth").set(current_len as f64);

    let p90_wait = p90_wait_ms(store, key_id).await;

    if current_len >= effective_max_queue || p90_wait > queue_timeout_ms {
        bump_stat(store, &stats_key, "rejected_overload").await;
        metrics::counter!("relay_queue_overloaded_total").increment(1);
        return QueueOutcome {
            admitted: false,
            error: Some(RelayError::QueueOverloaded),
            wait_ms: 0,
        };
    }

    if let Err(e) = store.rpush(&queue_key, request_id).await {
        warn!(error = %e, key_id, "failed to enqueue, failing open with queue_overloaded");
        metrics::counter!("relay_queue_overloaded_total").increment(1);
        return QueueOutcome {
            admitted: false,
            error: Some(RelayError::QueueOverloaded),
            wait_ms: 0,
        };
    }
    bump_stat(store, &stats_key, "entered").await;
    metrics::counter!("relay_queue_entered_total").increment(1);

    let enqueued_at = std::time::Instant::now();
    let notify = wake_registry.notify_for(key_id);
    let deadline = tokio::time::Instant::now() + Duration::from_millis(queue_timeout_ms);

    let outcome = loop {
        if cancellation.is_cancelled() {
            break timeout_outcome(RelayError::QueueTimeoutClient);
        }
        if tokio::time::Instant::now() >= deadline {
            break timeout_outcome(RelayError::QueueTimeoutWait);
        }

        let probe = queue_head_try_acquire(store, key_id, request_id, max, lease_ttl_ms).await;
        match probe {
            ProbeResult::Admitted => {
                metrics::counter!("relay_concurrency_acquired_total").increment(1);
                metrics::gauge!("relay_concurrency_leases_active").increment(1.0);
                break QueueOutcome {
                    admitted: true,
                    error: None,
                    wait_ms: enqueued_at.elapsed().as_millis() as u64,
                };
            }
            ProbeResult::NotHeadOrNoSlot => {
                let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                let wait_for = remaining.min(Duration::from_millis(poll_interval_ms));
                if wait_for.is_zero() {
                    break timeout_outcome(RelayError::QueueTimeoutWait);
                }
                tokio::select! {
                    _ = notify.notified() => {}
                    _ = tokio::time::sleep(wait_for) => {}
                    _ = cancellation.cancelled() => {
                        break timeout_outcome(RelayError::QueueTimeoutClient);
                    }
                }
            }
        }
    };

    let _ = store.lrem(&queue_key, request_id).await;
    match &outcome.error {
        Some(e) => {
            bump_stat(store, &stats_key, "timed_out_wait").await;
            metrics::counter!("relay_queue_timed_out_total", "code" => e.code()).increment(1);
        }
        None => {
            bump_stat(store, &stats_key, "admitted").await;
            metrics::counter!("relay_queue_admitted_total").increment(1);
        }
    }
    if outcome.admitted {
        record_wait_sample(store, key_id, outcome.wait_ms).await;
        metrics::histogram!("relay_queue_wait_duration_seconds")
            .record(outcome.wait_ms as f64 / 1000.0);
    }

    outcome
}

fn timeout_outcome(error: RelayError) -> QueueOutcome {
    QueueOutcome {
        admitted: false,
        error: Some(error),
        wait_ms: 0,
    }
}

enum ProbeResult {
    Admitted,
    NotHeadOrNoSlot,
}

async fn queue_head_try_acquire(
    store: &StoreClient,
    key_id: &str,
    request_id: &str,
    max: u64,
    lease_ttl_ms: u64,
) -> ProbeResult {
    let queue_key = keys::queue_list(key_id);
    let set_key = keys::concurrency_set(key_id);
    let now_ms = chrono::Utc::now().timestamp_millis();

    let result: Result<(i64, i64), RelayError> = store
        .scripts
        .queue_head_try_acquire
        .key(&queue_key)
        .key(&set_key)
        .arg(request_id)
        .arg(max)
        .arg(now_ms)
        .arg(lease_ttl_ms)
        .invoke_async(&mut store.raw())
        .await
        .map_err(RelayError::from);

    match result {
        Ok((_is_head, admitted)) if admitted == 1 => ProbeResult::Admitted,
        Ok(_) => ProbeResult::NotHeadOrNoSlot,
        Err(e) => {
            warn!(error = %e, key_id, "queue head probe store error");
            ProbeResult::NotHeadOrNoSlot
        }
    }
}

async fn bump_stat(store: &StoreClient, stats_key: &str, field: &str) {
    // Best-effort counters; a miss here never affects admission correctness.
    if let Err(e) = store.raw_hincr(stats_key, field, 1).await {
        warn!(error = %e, stats_key, field, "failed to bump queue stat");
    }
}

const P90_SAMPLE_CAP: usize = 200;

async fn record_wait_sample(store: &StoreClient, key_id: &str, wait_ms: u64) {
    let samples_key = keys::queue_wait_samples(key_id);
    if let Err(e) = store
        .raw_list_push_capped(&samples_key, &wait_ms.to_string(), P90_SAMPLE_CAP)
        .await
    {
        warn!(error = %e, key_id, "failed to record queue wait sample");
    }
}

async fn p90_wait_ms(store: &StoreClient, key_id: &str) -> u64 {
    let samples_key = keys::queue_wait_samples(key_id);
    let mut samples: Vec<u64> = match store.raw_list_all(&samples_key).await {
        Ok(v) => v.into_iter().filter_map(|s| s.parse().ok()).collect(),
        Err(_) => return 0,
    };
    if samples.is_empty() {
        return 0;
    }
    samples.sort_unstable();
    let idx = ((samples.len() as f64) * 0.9).floor() as usize;
    samples[idx.min(samples.len() - 1)]
}

/// Top-level "acquire or queue" entry point combining a first lease attempt
/// with the queueing algorithm on refusal. This is the single call site for
/// concurrency admission — it never performs a second incrementing acquire
/// on the refusal path, collapsing the overflow acquire/decr pair the
/// original algorithm exhibited (§9 open question (b)).
#[allow(clippy::too_many_arguments)]
pub async fn acquire_or_queue(
    store: &StoreClient,
    wake_registry: &WakeRegistry,
    key_id: &str,
    request_id: &str,
    max: u64,
    queue_enabled: bool,
    queue_max_size: u64,
    queue_max_size_multiplier: f64,
    queue_timeout_ms: u64,
    poll_interval_ms: u64,
    lease_ttl_ms: u64,
    now_ms: i64,
    cancellation: &CancellationToken,
) -> Result<(), RelayError> {
    let AcquireResult { acquired, current } =
        try_acquire(store, key_id, request_id, max, now_ms, lease_ttl_ms).await;

    if acquired {
        return Ok(());
    }

    if !queue_enabled {
        metrics::counter!("relay_concurrency_rejected_total").increment(1);
        return Err(RelayError::ConcurrencyLimitExceeded {
            current,
            limit: max,
        });
    }

    let outcome = enqueue_and_wait(
        store,
        wake_registry,
        key_id,
        request_id,
        max,
        queue_max_size,
        queue_max_size_multiplier,
        queue_timeout_ms,
        poll_interval_ms,
        lease_ttl_ms,
        cancellation,
    )
    .await;

    if outcome.admitted {
        Ok(())
    } else {
        Err(outcome.error.unwrap_or(RelayError::QueueTimeoutWait))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_max_queue_takes_the_larger_value() {
        let queue_max_size = 3u64;
        let multiplier = 2.0;
        let max = 4u64;
        let effective = (queue_max_size as f64).max(multiplier * max as f64) as u64;
        assert_eq!(effective, 8);
    }

    #[test]
    fn wake_registry_wake_on_unknown_key_is_a_no_op() {
        let registry = WakeRegistry::new();
        registry.wake("nonexistent");
    }
}
