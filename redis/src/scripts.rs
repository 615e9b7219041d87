//! Server-side seat procedures.
//!
//! Both scripts take `KEYS = [bitmap, zone_remaining, row_remaining]` and
//! `ARGV = [bit]`. A missing counter reads as `0`.

/// Occupy: `0` OK, `1` seat taken, `2` zone full, `3` row full.
///
/// Checks run in the order seat, zone, row. Nothing is written unless the
/// result is `0`.
pub const OCCUPY_SEAT_SCRIPT: &str = r"
local bit = tonumber(ARGV[1])

if redis.call('GETBIT', KEYS[1], bit) == 1 then
    return 1
end

local zone_left = tonumber(redis.call('GET', KEYS[2]) or '0')
if zone_left <= 0 then
    return 2
end

local row_left = tonumber(redis.call('GET', KEYS[3]) or '0')
if row_left <= 0 then
    return 3
end

redis.call('SETBIT', KEYS[1], bit, 1)
redis.call('DECR', KEYS[2])
redis.call('DECR', KEYS[3])
return 0
";

/// Release: `1` if the bit was cleared, `0` if it was already clear.
///
/// Counters move only on a set-to-clear transition.
pub const RELEASE_SEAT_SCRIPT: &str = r"
local previous = redis.call('SETBIT', KEYS[1], tonumber(ARGV[1]), 0)
if previous == 1 then
    redis.call('INCR', KEYS[2])
    redis.call('INCR', KEYS[3])
    return 1
end
return 0
";
