// =============================================================================
// Clock & Trade IDs: injectable time source
// =============================================================================

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};

/// Source of wall-clock time for timestamps and id generation.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Time-derived trade ids (`trade_<unix-millis>`), unique for the life of the
/// process even when two trades are created within the same millisecond or
/// the clock steps backwards.
#[derive(Debug, Default)]
pub struct TradeIdGenerator {
    high_water: AtomicI64,
}

impl TradeIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self, now: DateTime<Utc>) -> String {
        let candidate = now.timestamp_millis();
        let mut current = self.high_water.load(Ordering::SeqCst);
        loop {
            let next = candidate.max(current + 1);
            match self.high_water.compare_exchange(
                current,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return format!("trade_{next}"),
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// Settable clock for deterministic tests.
    #[derive(Debug)]
    pub struct ManualClock {
        now: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        pub fn new(start: DateTime<Utc>) -> Self {
            Self {
                now: Mutex::new(start),
            }
        }

        pub fn advance(&self, by: chrono::Duration) {
            let mut now = self.now.lock();
            *now += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ManualClock;
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn ids_follow_clock() {
        let clock = ManualClock::new(Utc.timestamp_millis_opt(1_700_000_000_000).unwrap());
        let ids = TradeIdGenerator::new();
        assert_eq!(ids.next_id(clock.now()), "trade_1700000000000");
        clock.advance(chrono::Duration::seconds(1));
        assert_eq!(ids.next_id(clock.now()), "trade_1700000001000");
    }

    #[test]
    fn frozen_clock_still_unique() {
        let t = Utc.timestamp_millis_opt(5_000).unwrap();
        let ids = TradeIdGenerator::new();
        let a = ids.next_id(t);
        let b = ids.next_id(t);
        let c = ids.next_id(Utc.timestamp_millis_opt(1_000).unwrap());
        assert_eq!(a, "trade_5000");
        assert_eq!(b, "trade_5001");
        assert_eq!(c, "trade_5002");
    }
}
