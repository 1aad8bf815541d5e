//! Iteration clock.
//!
//! The clock tracks the number of the next iteration to run and maps it to
//! a timestamp in the dataset's time line. Timestamp-driven mechanisms
//! compare piece creation times against this value.
//!
//! The timestamp of the `k`-th iteration of a run (counting from the
//! simulation's initial number) is the `k`-th distinct creation timestamp
//! of the dataset. Once those are exhausted it keeps counting one unit per
//! iteration past the last one. A dataset without pieces uses the
//! iteration number itself.

/// Errors that can occur during clock operations.
#[derive(Debug, thiserror::Error)]
pub enum ClockError {
    /// Iteration counter would overflow.
    #[error("iteration counter overflow: cannot advance beyond u64::MAX")]
    IterationOverflow,
}

/// Iteration counter anchored at the simulation's initial number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationClock {
    /// Number of the first iteration of the simulation.
    initial: u64,
    /// Number of the next iteration to run.
    current: u64,
}

impl IterationClock {
    /// A clock whose first iteration is `initial`.
    pub const fn new(initial: u64) -> Self {
        Self {
            initial,
            current: initial,
        }
    }

    /// A clock restored at `current`, for a simulation starting at `initial`.
    pub const fn from_parts(initial: u64, current: u64) -> Self {
        Self { initial, current }
    }

    /// Number of the next iteration to run.
    pub const fn iteration(&self) -> u64 {
        self.current
    }

    /// Number of the simulation's first iteration.
    pub const fn initial(&self) -> u64 {
        self.initial
    }

    /// Iterations run since the initial number.
    pub const fn elapsed(&self) -> u64 {
        self.current.saturating_sub(self.initial)
    }

    /// Timestamp of the current iteration given the sorted distinct
    /// timestamps of the dataset.
    pub fn timestamp(&self, timestamps: &[u64]) -> u64 {
        let Some(&last) = timestamps.last() else {
            return self.current;
        };
        let offset = self.elapsed();
        match usize::try_from(offset).ok().and_then(|i| timestamps.get(i)) {
            Some(&timestamp) => timestamp,
            None => {
                let exhausted = u64::try_from(timestamps.len())
                    .unwrap_or(u64::MAX)
                    .saturating_sub(1);
                last.saturating_add(offset.saturating_sub(exhausted))
            }
        }
    }

    /// Move to the next iteration.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::IterationOverflow`] if the counter is at `u64::MAX`.
    pub fn advance(&mut self) -> Result<(), ClockError> {
        self.current = self
            .current
            .checked_add(1)
            .ok_or(ClockError::IterationOverflow)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_increments_iteration() {
        let mut clock = IterationClock::new(5);
        assert!(clock.advance().is_ok());
        assert_eq!(clock.iteration(), 6);
        assert_eq!(clock.elapsed(), 1);
        assert_eq!(clock.initial(), 5);
    }

    #[test]
    fn advance_at_max_overflows() {
        let mut clock = IterationClock::from_parts(0, u64::MAX);
        assert!(matches!(clock.advance(), Err(ClockError::IterationOverflow)));
    }

    #[test]
    fn timestamps_follow_dataset_then_overflow() {
        let timestamps = [100, 250, 400];
        let mut clock = IterationClock::new(1);
        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(clock.timestamp(&timestamps));
            assert!(clock.advance().is_ok());
        }
        assert_eq!(seen, vec![100, 250, 400, 401, 402]);
    }

    #[test]
    fn empty_dataset_uses_iteration_number() {
        let clock = IterationClock::from_parts(0, 7);
        assert_eq!(clock.timestamp(&[]), 7);
    }
}
