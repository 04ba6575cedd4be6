use crate::config::RateLimitDefaults;
use crate::error::RelayError;
use crate::store::{keys, StoreClient};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RateLimitOutcome {
    pub limit_minute: u64,
    pub remaining_minute: u64,
    pub limit_hour: u64,
    pub remaining_hour: u64,
}

/// Fixed-window per-minute/hour counters (§4.4). `now_s` is epoch seconds.
/// On store error the check fails open (logs and allows) since a rejection
/// here would be worse than a brief undercount.
pub async fn check(
    store: &StoreClient,
    key_id: &str,
    defaults: &RateLimitDefaults,
    per_minute_override: Option<u64>,
    per_hour_override: Option<u64>,
    now_s: i64,
) -> Result<RateLimitOutcome, RelayError> {
    let limit_minute = per_minute_override.unwrap_or(defaults.requests_per_minute);
    let limit_hour = per_hour_override.unwrap_or(defaults.requests_per_hour);

    let minute_idx = now_s / 60;
    let hour_idx = now_s / 3600;

    let minute_key = keys::rate_limit_counter("minute", key_id, "minute", minute_idx);
    let hour_key = keys::rate_limit_counter("hour", key_id, "hour", hour_idx);

    let minute_count = match store.incr_with_expiry(&minute_key, 120).await {
        Ok(n) => n as u64,
        Err(e) => {
            warn!(error = %e, key_id, "rate limiter store error on minute counter, failing open");
            return Ok(RateLimitOutcome {
                limit_minute,
                remaining_minute: limit_minute,
                limit_hour,
                remaining_hour: limit_hour,
            });
        }
    };

    let hour_count = match store.incr_with_expiry(&hour_key, 7200).await {
        Ok(n) => n as u64,
        Err(e) => {
            warn!(error = %e, key_id, "rate limiter store error on hour counter, failing open");
            return Ok(RateLimitOutcome {
                limit_minute,
                remaining_minute: limit_minute.saturating_sub(minute_count),
                limit_hour,
                remaining_hour: limit_hour,
            });
        }
    };

    if limit_minute > 0 && minute_count > limit_minute {
        metrics::counter!("relay_rate_limit_rejected_total", "window" => "minute").increment(1);
        let window_end_s = (minute_idx + 1) * 60;
        let retry_after = (window_end_s - now_s).max(1) as u64;
        return Err(RelayError::RateLimitExceeded {
            retry_after_secs: retry_after,
        });
    }
    if limit_hour > 0 && hour_count > limit_hour {
        metrics::counter!("relay_rate_limit_rejected_total", "window" => "hour").increment(1);
        let window_end_s = (hour_idx + 1) * 3600;
        let retry_after = (window_end_s - now_s).max(1) as u64;
        return Err(RelayError::RateLimitExceeded {
            retry_after_secs: retry_after,
        });
    }

    metrics::counter!("relay_rate_limit_allowed_total").increment(1);
    Ok(RateLimitOutcome {
        limit_minute,
        remaining_minute: limit_minute.saturating_sub(minute_count),
        limit_hour,
        remaining_hour: limit_hour.saturating_sub(hour_count),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_after_is_at_least_one_second() {
        // window_end_s == now_s would compute 0 without the floor.
        let retry_after = (60_i64 - 60).max(1);
        assert_eq!(retry_after, 1);
    }

    #[test]
    fn zero_limit_disables_the_check() {
        // limit_minute=0 takes the `> 0` branch guard, never rejecting.
        let limit_minute = 0u64;
        assert!(!(limit_minute > 0 && 5 > limit_minute));
    }
}
