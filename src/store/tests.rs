use super::keys::*;

#[test]
fn key_builders_match_the_contracted_schema() {
    assert_eq!(apikey_record("k1"), "apikey:k1");
    assert_eq!(concurrency_set("k1"), "concurrency:k1");
    assert_eq!(queue_list("k1"), "queue:k1");
    assert_eq!(queue_stats("k1"), "queue_stats:k1");
    assert_eq!(
        rate_limit_counter("minute", "k1", "minute", 123),
        "rl:minute:k1:minute:123"
    );
    assert_eq!(cost_daily("2026-07-26", "k1"), "cost:daily:2026-07-26:k1");
    assert_eq!(cost_total("k1"), "cost:total:k1");
    assert_eq!(
        cost_weekly_opus("2026-W30", "k1"),
        "cost:weekly_opus:2026-W30:k1"
    );
    assert_eq!(cost_rl_window("k1", 5), "cost:rl_window:k1:5");
    assert_eq!(fuel_ledger("k1"), "fuel:k1");
    assert_eq!(
        lease_release_channel("lease_release", "k1"),
        "lease_release:k1"
    );
}
