//! Cycle clock.
//!
//! The core never reads wall-clock time. Its only notion of "now" is a
//! monotonic cycle counter that advances on accepted events and heartbeat
//! ticks. The trait lets tests and embedders inject their own counter.

pub trait CycleClock: Send + Sync {
    /// Current cycle without advancing.
    fn current(&self) -> u64;

    /// Advance by one cycle and return the new value.
    fn tick(&mut self) -> u64;
}

/// Plain in-memory counter.
#[derive(Debug, Clone, Default)]
pub struct CycleCounter {
    cycle: u64,
}

impl CycleCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume counting after `cycle` (e.g. after replaying an archive).
    pub fn starting_at(cycle: u64) -> Self {
        Self { cycle }
    }
}

impl CycleClock for CycleCounter {
    fn current(&self) -> u64 {
        self.cycle
    }

    fn tick(&mut self) -> u64 {
        self.cycle = self.cycle.saturating_add(1);
        self.cycle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_is_monotonic() {
        let mut clock = CycleCounter::new();
        assert_eq!(clock.current(), 0);
        assert_eq!(clock.tick(), 1);
        assert_eq!(clock.tick(), 2);
        assert_eq!(clock.current(), 2);
    }

    #[test]
    fn test_counter_saturates() {
        let mut clock = CycleCounter::starting_at(u64::MAX);
        assert_eq!(clock.tick(), u64::MAX);
    }
}
