use std::{
    num::{NonZeroU128, NonZeroU16},
    time::{Duration, SystemTime},
};

use rand::RngCore;

use parking_lot::Mutex;

use crate::id::Guid;

const ONE: NonZeroU16 = match NonZeroU16::new(1) {
    None => unreachable!(),
    Some(value) => value,
};

fn counter_next(counter: NonZeroU16) -> Option<NonZeroU16> {
    if counter.get() == u16::MAX {
        None
    } else {
        Some(counter.saturating_add(1))
    }
}

/// Generates pseudo-unique asset identifiers.
///
/// The identifiers are generated with following scheme:
///
/// 34 bits - seconds since epoch.
/// 64 bits - random.
/// 16 bits - counter.
pub struct Generator {
    state: Mutex<State>,
    epoch: SystemTime,
}

struct State {
    // Last seconds since epoch.
    last_secs: u64,
    counter: NonZeroU16,
}

impl Generator {
    /// Returns default epoch.
    pub fn default_epoch() -> SystemTime {
        /// 2024-11-19 08:11:12 UTC as seconds since UNIX epoch.
        /// This is the time when the value was defined.
        const DEFAULT_EPOCH: u64 = 1731996672;

        SystemTime::UNIX_EPOCH + Duration::from_secs(DEFAULT_EPOCH)
    }

    /// Creates a new generator with default epoch.
    pub fn new() -> Self {
        let epoch = Self::default_epoch();
        Generator::with_epoch(epoch)
    }

    /// Creates a new generator with given epoch.
    pub const fn with_epoch(epoch: SystemTime) -> Self {
        Generator {
            state: Mutex::new(State {
                counter: ONE,
                last_secs: 0,
            }),
            epoch,
        }
    }

    /// Generates a new pseudo-unique identifier.
    /// The generated identifier is guaranteed to be unique only within
    /// the same instance of the generator.
    ///
    /// For multiple instances of the generator, the identifiers may collide
    /// with low probability.
    ///
    /// # Panics
    ///
    /// Panics if seconds since epoch is greater than 2^34 - 557+ years.
    pub fn generate(&self) -> Guid {
        loop {
            let mut state = self.state.lock();
            let now = SystemTime::now();
            let since_epoch = now.duration_since(self.epoch).unwrap();
            let mut seconds = since_epoch.as_secs();

            if seconds >= 2 << 34 {
                panic!("Time overflow");
            }

            seconds = seconds.max(state.last_secs);
            if state.last_secs == seconds {
                match counter_next(state.counter) {
                    None => {
                        let next_second = self.epoch + Duration::from_secs(state.last_secs + 1);
                        let dur = next_second.duration_since(now).unwrap();
                        drop(state);
                        std::thread::sleep(dur);
                        continue;
                    }
                    Some(counter) => state.counter = counter,
                }
            } else {
                state.last_secs = seconds;
                state.counter = ONE;
            }

            let counter = state.counter;
            drop(state);

            let mut r = [0u8; 8];
            rand::thread_rng().fill_bytes(&mut r);
            let r = u64::from_le_bytes(r);

            let value =
                ((seconds as u128) << 80) | ((r as u128) << 16) | NonZeroU128::from(counter);
            return Guid(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_duplicates() {
        let gen = Generator::new();

        let mut seen = std::collections::HashSet::new();
        for _ in 0..10_000 {
            assert!(seen.insert(gen.generate()));
        }
    }
}
