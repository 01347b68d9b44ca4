use crate::utils::random_index;

/// Highest value reported while the analysis is still pending.
pub const PENDING_CEILING: u8 = 99;
/// Largest single progress step.
pub const MAX_STEP: u8 = 15;

/// Produces a strictly increasing progress sequence that only reaches 100
/// when the run finishes.
#[derive(Debug, Default)]
pub(crate) struct ProgressMeter {
    current: u8,
}

impl ProgressMeter {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn current(&self) -> u8 {
        self.current
    }

    /// Advances by a random step of 1..=15. Returns `None` once the pending
    /// ceiling is reached, so no duplicate value is ever reported.
    pub fn tick(&mut self) -> Option<u8> {
        let step = random_index(MAX_STEP as usize) as u8 + 1;
        self.advance_by(step)
    }

    fn advance_by(&mut self, step: u8) -> Option<u8> {
        let next = self.current.saturating_add(step).min(PENDING_CEILING);
        if next <= self.current {
            return None;
        }
        self.current = next;
        Some(next)
    }

    pub fn finish(&mut self) -> Option<u8> {
        if self.current == 100 {
            return None;
        }
        self.current = 100;
        Some(100)
    }
}
