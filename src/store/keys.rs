//! Key builders for the store schema (§6). Centralized so the wire format
//! is defined exactly once and never hand-assembled at call sites.

pub fn apikey_record(id: &str) -> String {
    format!("apikey:{id}")
}

pub const APIKEY_HASH_MAP: &str = "apikey:hash_map";

pub fn concurrency_set(id: &str) -> String {
    format!("concurrency:{id}")
}

pub fn queue_list(id: &str) -> String {
    format!("queue:{id}")
}

pub fn queue_stats(id: &str) -> String {
    format!("queue_stats:{id}")
}

pub fn queue_wait_samples(id: &str) -> String {
    format!("queue_wait_samples:{id}")
}

pub fn rate_limit_counter(scope: &str, id: &str, window: &str, window_index: i64) -> String {
    format!("rl:{scope}:{id}:{window}:{window_index}")
}

pub fn cost_daily(date: &str, id: &str) -> String {
    format!("cost:daily:{date}:{id}")
}

pub fn cost_total(id: &str) -> String {
    format!("cost:total:{id}")
}

pub fn cost_weekly_opus(iso_week: &str, id: &str) -> String {
    format!("cost:weekly_opus:{iso_week}:{id}")
}

pub fn cost_rl_window(id: &str, minute_bucket: i64) -> String {
    format!("cost:rl_window:{id}:{minute_bucket}")
}

pub fn fuel_ledger(id: &str) -> String {
    format!("fuel:{id}")
}

pub fn lease_release_channel(prefix: &str, id: &str) -> String {
    format!("{prefix}:{id}")
}
