use crate::error::RelayError;
use crate::store::{keys, StoreClient};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

pub struct AcquireResult {
    pub acquired: bool,
    pub current: u64,
}

/// Single atomic acquire attempt (§4.5.1). Fails open on store errors: the
/// request proceeds without a recorded lease rather than being rejected for
/// an infrastructure fault.
pub async fn try_acquire(
    store: &StoreClient,
    key_id: &str,
    request_id: &str,
    max: u64,
    now_ms: i64,
    lease_ttl_ms: u64,
) -> AcquireResult {
    let set_key = keys::concurrency_set(key_id);
    let result: Result<(i64, i64), RelayError> = store
        .scripts
        .concurrency_acquire
        .key(&set_key)
        .arg(request_id)
        .arg(max)
        .arg(now_ms)
        .arg(lease_ttl_ms)
        .invoke_async(&mut store.raw())
        .await
        .map_err(RelayError::from);

    let result = match result {
        Ok((ok, cur)) => AcquireResult {
            acquired: ok == 1,
            current: cur.max(0) as u64,
        },
        Err(e) => {
            warn!(error = %e, key_id, "concurrency acquire store error, failing open");
            AcquireResult {
                acquired: true,
                current: 0,
            }
        }
    };

    if result.acquired {
        metrics::counter!("relay_concurrency_acquired_total").increment(1);
        metrics::gauge!("relay_concurrency_leases_active").increment(1.0);
    }

    result
}

pub async fn release(store: &StoreClient, key_id: &str, request_id: &str) -> Result<(), RelayError> {
    let set_key = keys::concurrency_set(key_id);
    let _: i64 = store
        .scripts
        .concurrency_release
        .key(&set_key)
        .arg(request_id)
        .invoke_async(&mut store.raw())
        .await?;
    Ok(())
}

/// Holds a lease and guarantees its release even if the caller's request
/// context is cancelled or panics before an explicit `.release()` call.
///
/// The guard's own release uses a cleanup context decoupled from the
/// caller's cancellation (§5, §4.5.2): `Drop` spawns a detached task with
/// its own short timeout rather than relying on a borrowed context that may
/// already be gone.
pub struct LeaseGuard {
    store: StoreClient,
    key_id: String,
    request_id: String,
    pubsub_prefix: String,
    released: Arc<AtomicBool>,
}

const RELEASE_TIMEOUT: Duration = Duration::from_secs(5);

impl LeaseGuard {
    pub fn new(store: StoreClient, key_id: String, request_id: String, pubsub_prefix: String) -> Self {
        Self {
            store,
            key_id,
            request_id,
            pubsub_prefix,
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Explicit release on the normal completion path. Idempotent: a second
    /// call (or a `Drop`-triggered one) is a no-op.
    pub async fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        let outcome = tokio::time::timeout(
            RELEASE_TIMEOUT,
            release(&self.store, &self.key_id, &self.request_id),
        )
        .await;
        match outcome {
            Ok(Ok(())) => {
                metrics::gauge!("relay_concurrency_leases_active").decrement(1.0);
                let channel = keys::lease_release_channel(&self.pubsub_prefix, &self.key_id);
                if let Err(e) = self.store.publish(&channel, &self.request_id).await {
                    warn!(error = %e, key_id = %self.key_id, "failed to publish lease-release wake signal");
                }
            }
            Ok(Err(e)) => {
                error!(error = %e, key_id = %self.key_id, "lease release failed, relying on lease_ttl_ms expiry");
            }
            Err(_) => {
                error!(key_id = %self.key_id, "lease release timed out, relying on lease_ttl_ms expiry");
            }
        }
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if self.released.load(Ordering::SeqCst) {
            return;
        }
        let store = self.store.clone();
        let key_id = self.key_id.clone();
        let request_id = self.request_id.clone();
        let pubsub_prefix = self.pubsub_prefix.clone();
        let released = self.released.clone();
        tokio::spawn(async move {
            if released.swap(true, Ordering::SeqCst) {
                return;
            }
            let outcome =
                tokio::time::timeout(RELEASE_TIMEOUT, release(&store, &key_id, &request_id)).await;
            match outcome {
                Ok(Ok(())) => {
                    metrics::gauge!("relay_concurrency_leases_active").decrement(1.0);
                    let channel = keys::lease_release_channel(&pubsub_prefix, &key_id);
                    let _ = store.publish(&channel, &request_id).await;
                }
                _ => {
                    error!(key_id, "deferred lease release failed or timed out; relying on lease_ttl_ms expiry");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_result_reflects_script_output() {
        let r = AcquireResult {
            acquired: false,
            current: 2,
        };
        assert!(!r.acquired);
        assert_eq!(r.current, 2);
    }
}
