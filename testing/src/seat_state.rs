use crate::lock;
use seatguard_core::BoxFuture;
use seatguard_core::capacity::StoreError;
use seatguard_core::keys::SeatKeys;
use seatguard_core::seat_store::{ReleaseOutcome, SeatStateStore, ZoneReset};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Default)]
struct State {
    bitmaps: HashMap<String, Vec<u8>>,
    counters: HashMap<String, i64>,
}

impl State {
    fn get_bit(&self, key: &str, bit: u64) -> bool {
        let (byte, mask) = locate(bit);
        self.bitmaps
            .get(key)
            .and_then(|bytes| bytes.get(byte))
            .is_some_and(|b| b & mask != 0)
    }

    /// Write a bit, growing the bitmap as `SETBIT` does. Returns the old bit.
    fn set_bit(&mut self, key: &str, bit: u64, value: bool) -> bool {
        let (byte, mask) = locate(bit);
        let bytes = self.bitmaps.entry(key.to_string()).or_default();
        if bytes.len() <= byte {
            bytes.resize(byte + 1, 0);
        }
        let previous = bytes[byte] & mask != 0;
        if value {
            bytes[byte] |= mask;
        } else {
            bytes[byte] &= !mask;
        }
        previous
    }

    fn counter(&self, key: &str) -> i64 {
        self.counters.get(key).copied().unwrap_or(0)
    }

    fn add(&mut self, key: &str, delta: i64) {
        *self.counters.entry(key.to_string()).or_insert(0) += delta;
    }
}

/// MSB-first, matching Redis `SETBIT`.
#[allow(clippy::cast_possible_truncation)]
const fn locate(bit: u64) -> (usize, u8) {
    ((bit / 8) as usize, 0x80 >> (bit % 8))
}

/// Seat state behind one mutex.
///
/// Occupy and release run the same checks as the Redis scripts while holding
/// the lock, so they are linearizable across the whole store.
///
/// Faults can be switched on to exercise failure paths:
/// - [`set_unavailable`](Self::set_unavailable): every call fails with
///   [`StoreError::Connection`]
/// - [`set_release_failing`](Self::set_release_failing): only release fails
/// - [`set_occupy_delay`](Self::set_occupy_delay): occupy sleeps first
#[derive(Default)]
pub struct InMemorySeatStore {
    state: Mutex<State>,
    unavailable: AtomicBool,
    release_failing: AtomicBool,
    occupy_delay: Mutex<Option<Duration>>,
    occupy_calls: AtomicUsize,
    release_calls: AtomicUsize,
}

impl InMemorySeatStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every call with a connection error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fail release calls only.
    pub fn set_release_failing(&self, failing: bool) {
        self.release_failing.store(failing, Ordering::SeqCst);
    }

    /// Sleep before each occupy.
    pub fn set_occupy_delay(&self, delay: Option<Duration>) {
        *lock(&self.occupy_delay) = delay;
    }

    /// Occupy calls seen so far.
    #[must_use]
    pub fn occupy_calls(&self) -> usize {
        self.occupy_calls.load(Ordering::SeqCst)
    }

    /// Release calls seen so far.
    #[must_use]
    pub fn release_calls(&self) -> usize {
        self.release_calls.load(Ordering::SeqCst)
    }

    /// Number of set bits in a bitmap.
    #[must_use]
    pub fn popcount(&self, bitmap_key: &str) -> u64 {
        lock(&self.state)
            .bitmaps
            .get(bitmap_key)
            .map_or(0, |bytes| bytes.iter().map(|b| u64::from(b.count_ones())).sum())
    }

    /// Set bits whose index falls in `range`.
    #[must_use]
    pub fn popcount_range(&self, bitmap_key: &str, range: std::ops::Range<u64>) -> u64 {
        let state = lock(&self.state);
        range.filter(|bit| state.get_bit(bitmap_key, *bit)).map(|_| 1).sum()
    }

    /// Overwrite a counter directly.
    pub fn set_counter(&self, key: &str, value: i64) {
        lock(&self.state).counters.insert(key.to_string(), value);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("in-memory seat store is unavailable".into()));
        }
        Ok(())
    }
}

impl SeatStateStore for InMemorySeatStore {
    fn occupy<'a>(&'a self, keys: &'a SeatKeys, bit: u64) -> BoxFuture<'a, Result<i64, StoreError>> {
        Box::pin(async move {
            self.occupy_calls.fetch_add(1, Ordering::SeqCst);
            let delay = *lock(&self.occupy_delay);
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.check_available()?;

            let mut state = lock(&self.state);
            if state.get_bit(&keys.bitmap, bit) {
                return Ok(1);
            }
            if state.counter(&keys.zone_remaining) <= 0 {
                return Ok(2);
            }
            if state.counter(&keys.row_remaining) <= 0 {
                return Ok(3);
            }
            state.set_bit(&keys.bitmap, bit, true);
            state.add(&keys.zone_remaining, -1);
            state.add(&keys.row_remaining, -1);
            Ok(0)
        })
    }

    fn release<'a>(
        &'a self,
        keys: &'a SeatKeys,
        bit: u64,
    ) -> BoxFuture<'a, Result<ReleaseOutcome, StoreError>> {
        Box::pin(async move {
            self.release_calls.fetch_add(1, Ordering::SeqCst);
            self.check_available()?;
            if self.release_failing.load(Ordering::SeqCst) {
                return Err(StoreError::Connection("in-memory release is failing".into()));
            }

            let mut state = lock(&self.state);
            if state.set_bit(&keys.bitmap, bit, false) {
                state.add(&keys.zone_remaining, 1);
                state.add(&keys.row_remaining, 1);
                Ok(ReleaseOutcome::Released)
            } else {
                Ok(ReleaseOutcome::AlreadyFree)
            }
        })
    }

    fn reset_zone<'a>(&'a self, reset: &'a ZoneReset) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.check_available()?;
            let mut state = lock(&self.state);
            state
                .bitmaps
                .insert(reset.bitmap_key.clone(), vec![0; reset.bitmap_len()]);
            state
                .counters
                .insert(reset.zone_remaining_key.clone(), i64::from(reset.capacity));
            for row_key in &reset.row_keys {
                state
                    .counters
                    .insert(row_key.clone(), i64::from(reset.seats_per_row));
            }
            Ok(())
        })
    }

    fn is_set<'a>(&'a self, bitmap_key: &'a str, bit: u64) -> BoxFuture<'a, Result<bool, StoreError>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(lock(&self.state).get_bit(bitmap_key, bit))
        })
    }

    fn counter<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<i64>, StoreError>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(lock(&self.state).counters.get(key).copied())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::helpers;
    use proptest::prelude::*;
    use seatguard_core::types::ZoneId;

    #[test]
    fn bits_are_msb_first() {
        let mut state = State::default();
        state.set_bit("bm", 0, true);
        state.set_bit("bm", 9, true);
        assert_eq!(state.bitmaps["bm"], vec![0b1000_0000, 0b0100_0000]);
        assert!(state.get_bit("bm", 9));
        assert!(!state.get_bit("bm", 100));
    }

    #[tokio::test]
    async fn unavailable_store_fails_with_connection_error() {
        let store = InMemorySeatStore::new();
        store.set_unavailable(true);
        let keys = SeatKeys::new(&helpers::event("E"), ZoneId::new(1), 0);
        let err = store.occupy(&keys, 0).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(store.occupy_calls(), 1);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Occupy(u32, u32),
        Release(u32, u32),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..4u32, 0..5u32).prop_map(|(r, c)| Op::Occupy(r, c)),
            (0..4u32, 0..5u32).prop_map(|(r, c)| Op::Release(r, c)),
        ]
    }

    proptest! {
        #[test]
        fn counters_track_popcount(ops in proptest::collection::vec(op(), 0..80)) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let store = InMemorySeatStore::new();
                let event = helpers::event("Prop");
                let zone = ZoneId::new(1);
                helpers::open_zone(&store, &event, 1, 4, 5).await;

                for op in ops {
                    match op {
                        Op::Occupy(r, c) => {
                            store.occupy(&SeatKeys::new(&event, zone, r), u64::from(r * 5 + c)).await.unwrap();
                        }
                        Op::Release(r, c) => {
                            store.release(&SeatKeys::new(&event, zone, r), u64::from(r * 5 + c)).await.unwrap();
                        }
                    }
                }

                let keys = SeatKeys::new(&event, zone, 0);
                let taken = i64::try_from(store.popcount(&keys.bitmap)).unwrap();
                prop_assert_eq!(store.counter(&keys.zone_remaining).await.unwrap(), Some(20 - taken));
                for row in 0..4u32 {
                    let row_keys = SeatKeys::new(&event, zone, row);
                    let start = u64::from(row * 5);
                    let in_row = i64::try_from(store.popcount_range(&keys.bitmap, start..start + 5)).unwrap();
                    prop_assert_eq!(store.counter(&row_keys.row_remaining).await.unwrap(), Some(5 - in_row));
                }
                Ok::<(), TestCaseError>(())
            })?;
        }
    }
}
