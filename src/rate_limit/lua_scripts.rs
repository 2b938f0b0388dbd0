/// Lua script for sliding window rate limiting
///
/// Runs atomically in Redis: the current request is recorded first, entries
/// older than the window are pruned, and the survivors are counted. The key's
/// expiry is refreshed on every write so idle windows disappear on their own.
///
/// KEYS[1] = the rate limit key
/// ARGV[1] = current timestamp (milliseconds)
/// ARGV[2] = window duration (milliseconds)
/// ARGV[3] = unique member for this request
///
/// Returns: {count of requests inside the window, including this one}
pub const SLIDING_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local member = ARGV[3]

redis.call('ZADD', key, now, member)

-- Strictly older than the window start; an entry exactly at the boundary survives
local window_start = now - window
redis.call('ZREMRANGEBYSCORE', key, '-inf', '(' .. window_start)

local count = redis.call('ZCARD', key)
redis.call('PEXPIRE', key, window)

return {count}
"#;
