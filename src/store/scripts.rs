//! Atomic server-side scripts (§6, §4.5.1-4.5.4). These MUST run as a single
//! `EVAL`/`EVALSHA` round trip — never as sequenced client commands — because
//! relay replicas coordinate only through the store.

use redis::Script;

const CONCURRENCY_ACQUIRE: &str = r#"
local now = tonumber(ARGV[3])
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', now)
local cur = redis.call('ZCARD', KEYS[1])
local max = tonumber(ARGV[2])
if max > 0 and cur >= max then
    return {0, cur}
end
local expiry = now + tonumber(ARGV[4])
redis.call('ZADD', KEYS[1], expiry, ARGV[1])
redis.call('EXPIRE', KEYS[1], math.ceil(tonumber(ARGV[4]) / 1000) + 60)
return {1, cur + 1}
"#;

const CONCURRENCY_RELEASE: &str = r#"
redis.call('ZREM', KEYS[1], ARGV[1])
return 1
"#;

// Re-probes the queue head under one atomic step: only the waiter currently
// at the head of the list may attempt the acquire, and on success it is
// popped in the same script invocation.
const QUEUE_HEAD_TRY_ACQUIRE: &str = r#"
local head = redis.call('LINDEX', KEYS[1], 0)
if head ~= ARGV[1] then
    return {0, 0}
end
local now = tonumber(ARGV[3])
redis.call('ZREMRANGEBYSCORE', KEYS[2], '-inf', now)
local cur = redis.call('ZCARD', KEYS[2])
local max = tonumber(ARGV[2])
if max > 0 and cur >= max then
    return {1, 0}
end
local expiry = now + tonumber(ARGV[4])
redis.call('ZADD', KEYS[2], expiry, ARGV[1])
redis.call('EXPIRE', KEYS[2], math.ceil(tonumber(ARGV[4]) / 1000) + 60)
redis.call('LPOP', KEYS[1])
return {1, 1}
"#;

// Compare-and-delete on a caller-held token. General-purpose lock primitive;
// not used by the admission pipeline's fixed algorithm but part of the
// store's contracted script set.
const LOCK_RELEASE: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

// Token bucket for an optional burst limiter layered on top of the fixed
// rate-limit windows. Not wired into the default admission order.
const BUCKET_TAKE: &str = r#"
local capacity = tonumber(ARGV[1])
local rate = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local cost = tonumber(ARGV[4])

local bucket = redis.call('HMGET', KEYS[1], 'tokens', 'ts')
local tokens = tonumber(bucket[1])
local ts = tonumber(bucket[2])
if tokens == nil then
    tokens = capacity
    ts = now
end

local delta = math.max(0, now - ts) / 1000.0
tokens = math.min(capacity, tokens + delta * rate)

local allowed = 0
if tokens >= cost then
    tokens = tokens - cost
    allowed = 1
end

redis.call('HMSET', KEYS[1], 'tokens', tokens, 'ts', now)
redis.call('EXPIRE', KEYS[1], math.ceil(capacity / rate) + 60)
return {allowed, tokens}
"#;

/// Loads/caches the atomic scripts used by the concurrency controller.
/// Each `redis::Script` lazily resolves its own SHA1 on first invocation
/// (EVALSHA with fallback to EVAL) — this registry exists so call sites
/// never hand-write the Lua source inline.
pub struct ScriptRegistry {
    pub concurrency_acquire: Script,
    pub concurrency_release: Script,
    pub queue_head_try_acquire: Script,
    pub lock_release: Script,
    pub bucket_take: Script,
}

impl ScriptRegistry {
    pub fn new() -> Self {
        Self {
            concurrency_acquire: Script::new(CONCURRENCY_ACQUIRE),
            concurrency_release: Script::new(CONCURRENCY_RELEASE),
            queue_head_try_acquire: Script::new(QUEUE_HEAD_TRY_ACQUIRE),
            lock_release: Script::new(LOCK_RELEASE),
            bucket_take: Script::new(BUCKET_TAKE),
        }
    }
}

impl Default for ScriptRegistry {
    fn default() -> Self {
        Self::new()
    }
}
