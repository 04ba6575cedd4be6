use crate::config::LimitsConfig;
use crate::error::RelayError;
use crate::store::{keys, StoreClient};
use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use tracing::warn;

/// Four ordered checks (§4.6). `now_ms` is epoch milliseconds; the spec's
/// day/week boundaries are computed against `now` shifted by a fixed
/// integer-hour offset — never a named time zone, so there is no DST edge
/// to reason about (§9 open question (c)).
///
/// Every store read fails open (logs and treats spend as `0.0`, i.e. under
/// limit) rather than surfacing an infrastructure error — a degraded store
/// must never turn into a blanket rejection, matching `rate_limit::check`.
pub async fn check(
    store: &StoreClient,
    key_id: &str,
    limits: &LimitsConfig,
    request_model: Option<&str>,
    time_zone_offset_hours: i32,
    now_ms: i64,
) -> Result<(), RelayError> {
    let shifted = shifted_now(now_ms, time_zone_offset_hours);

    if let Some(limit) = limits.daily_cost_limit {
        let date = shifted.format("%Y-%m-%d").to_string();
        let spend = read_or_fail_open(store, &keys::cost_daily(&date, key_id), "daily").await;
        let topups = fuel_total(store, key_id).await;
        let effective = limit + topups;
        if spend >= effective {
            metrics::counter!("relay_cost_gate_rejected_total", "dimension" => "daily").increment(1);
            return Err(RelayError::DailyCostLimitExceeded {
                current: spend,
                limit: effective,
            });
        }
    }

    if let Some(limit) = limits.total_cost_limit {
        let spend = read_or_fail_open(store, &keys::cost_total(key_id), "total").await;
        if spend >= limit {
            metrics::counter!("relay_cost_gate_rejected_total", "dimension" => "total").increment(1);
            return Err(RelayError::TotalCostLimitExceeded {
                current: spend,
                limit,
            });
        }
    }

    if let Some(limit) = limits.weekly_opus_cost_limit {
        let is_opus = request_model
            .map(|m| m.to_lowercase().contains("opus"))
            .unwrap_or(false);
        if is_opus {
            let iso_week = iso_week_string(shifted);
            let spend =
                read_or_fail_open(store, &keys::cost_weekly_opus(&iso_week, key_id), "weekly_opus")
                    .await;
            if spend >= limit {
                metrics::counter!("relay_cost_gate_rejected_total", "dimension" => "weekly_opus")
                    .increment(1);
                return Err(RelayError::WeeklyOpusCostLimitExceeded {
                    current: spend,
                    limit,
                });
            }
        }
    }

    if let (Some(limit), Some(window_minutes)) =
        (limits.rate_limit_cost, limits.rate_limit_window_minutes)
    {
        let spend = rl_window_cost(store, key_id, window_minutes, now_ms).await;
        if spend >= limit {
            metrics::counter!("relay_cost_gate_rejected_total", "dimension" => "rate_limit_window")
                .increment(1);
            return Err(RelayError::RateLimitCostExceeded {
                current: spend,
                limit,
            });
        }
    }

    Ok(())
}

/// Reads a single numeric cost counter, failing open (treating it as `0.0`
/// spend) on a store error.
async fn read_or_fail_open(store: &StoreClient, key: &str, dimension: &str) -> f64 {
    match store.get_f64(key).await {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, key, dimension, "cost gate store error, failing open");
            0.0
        }
    }
}

fn shifted_now(now_ms: i64, offset_hours: i32) -> DateTime<Utc> {
    let base = Utc.timestamp_millis_opt(now_ms).single().unwrap_or_else(Utc::now);
    base + Duration::hours(offset_hours as i64)
}

fn iso_week_string(dt: DateTime<Utc>) -> String {
    let iso = dt.iso_week();
    format!("{}-W{:02}", iso.year(), iso.week())
}

async fn fuel_total(store: &StoreClient, key_id: &str) -> f64 {
    match store.hgetall_f64(&keys::fuel_ledger(key_id)).await {
        Ok(entries) => entries.into_iter().map(|(_, v)| v).sum(),
        Err(e) => {
            warn!(error = %e, key_id, "cost gate store error reading fuel ledger, failing open");
            0.0
        }
    }
}

/// Sliding window over the most recent `window_minutes` one-minute buckets.
async fn rl_window_cost(store: &StoreClient, key_id: &str, window_minutes: u64, now_ms: i64) -> f64 {
    let now_minute = now_ms / 60_000;
    let mut total = 0.0;
    for offset in 0..window_minutes as i64 {
        let bucket = now_minute - offset;
        total += read_or_fail_open(store, &keys::cost_rl_window(key_id, bucket), "rate_limit_window").await;
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iso_week_string_format() {
        let dt = Utc.with_ymd_and_hms(2026, 7, 26, 0, 0, 0).unwrap();
        let s = iso_week_string(dt);
        assert!(s.starts_with("2026-W"));
    }

    #[test]
    fn shifted_now_applies_offset() {
        let base_ms = Utc.with_ymd_and_hms(2026, 1, 1, 0, 30, 0).unwrap().timestamp_millis();
        let shifted = shifted_now(base_ms, -1);
        assert_eq!(shifted.format("%Y-%m-%d").to_string(), "2025-12-31");
    }
}
