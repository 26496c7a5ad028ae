//! Process-wide sampling knobs that decide how much the runtime records for
//! the memory, mutex and block profiles.

use std::fmt::Debug;
use std::sync::atomic::{AtomicI64, Ordering};

/// Memory sampling rate in effect before any profiler touches it.
pub const INITIAL_MEM_PROFILE_RATE: i64 = 512 * 1024;

static MEM_PROFILE_RATE: AtomicI64 = AtomicI64::new(INITIAL_MEM_PROFILE_RATE);
static MUTEX_FRACTION: AtomicI64 = AtomicI64::new(0);
static BLOCK_PROFILE_RATE: AtomicI64 = AtomicI64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeKnobs {
    /// Average bytes allocated between two recorded samples.
    pub mem_profile_rate: i64,
    /// One in `mutex_fraction` contention events is recorded; 0 disables.
    pub mutex_fraction: i64,
    /// Nanoseconds blocked per recorded event; 0 disables.
    pub block_profile_rate: i64,
}

/// Read/write access to the knobs. The profiler reads them once when it
/// starts and writes the saved values back when it stops.
pub trait KnobControl: Debug + Send + Sync {
    fn current(&self) -> RuntimeKnobs;
    fn apply(&self, knobs: RuntimeKnobs);
}

/// The knobs of this process, shared by everything that links the crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessKnobs;

impl KnobControl for ProcessKnobs {
    fn current(&self) -> RuntimeKnobs {
        RuntimeKnobs {
            mem_profile_rate: MEM_PROFILE_RATE.load(Ordering::Acquire),
            mutex_fraction: MUTEX_FRACTION.load(Ordering::Acquire),
            block_profile_rate: BLOCK_PROFILE_RATE.load(Ordering::Acquire),
        }
    }

    fn apply(&self, knobs: RuntimeKnobs) {
        MEM_PROFILE_RATE.store(knobs.mem_profile_rate, Ordering::Release);
        MUTEX_FRACTION.store(knobs.mutex_fraction, Ordering::Release);
        BLOCK_PROFILE_RATE.store(knobs.block_profile_rate, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_knobs_round_trip() {
        let knobs = ProcessKnobs;
        let saved = knobs.current();

        let tuned = RuntimeKnobs {
            mem_profile_rate: 4096,
            mutex_fraction: 5,
            block_profile_rate: 100,
        };
        knobs.apply(tuned);
        assert_eq!(knobs.current(), tuned);

        knobs.apply(saved);
        assert_eq!(knobs.current(), saved);
    }
}
