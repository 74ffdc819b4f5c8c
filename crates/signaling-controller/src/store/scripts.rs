//! Lua scripts for atomic multi-key Redis operations.

/// Refresh the TTL on every key of one session in a single round trip.
///
/// Arguments:
/// - KEYS[..]: Keys to refresh (session, room mapping, message list)
/// - ARGV[1]: TTL in seconds
///
/// Returns:
/// - Number of keys whose expiry was refreshed (missing keys are skipped)
/// - -1: Error (invalid TTL)
pub const EXTEND_TTL: &str = r#"
local ttl = tonumber(ARGV[1])

if ttl == nil or ttl <= 0 then
    return -1
end

local refreshed = 0
for i = 1, #KEYS do
    if redis.call('EXPIRE', KEYS[i], ttl) == 1 then
        refreshed = refreshed + 1
    end
end

return refreshed
"#;
