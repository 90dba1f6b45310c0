//! Frame-budget scheduling for render-to-texture captures

use serde::{Deserialize, Serialize};

/// Counts frames between captures.
///
/// With an interval of `N` a capture fires on every `(N + 1)`th tick; `0` means
/// every frame. Planar reflections test before counting while probes count
/// first; from a fresh counter both fire on the same ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FrameCadence {
    pub interval: u32,
    pub frames_elapsed: u32,
}

impl FrameCadence {
    pub fn new(interval: u32) -> Self {
        Self {
            interval,
            frames_elapsed: 0,
        }
    }

    /// Test, then count. Returns `true` when a capture is due.
    pub fn check_then_advance(&mut self) -> bool {
        if self.frames_elapsed >= self.interval {
            self.frames_elapsed = 0;
            true
        } else {
            self.frames_elapsed += 1;
            false
        }
    }

    /// Count, then test. Returns `true` when a capture is due.
    pub fn advance_then_check(&mut self) -> bool {
        self.frames_elapsed += 1;
        if self.frames_elapsed > self.interval {
            self.frames_elapsed = 0;
            true
        } else {
            false
        }
    }

    pub fn set_interval(&mut self, interval: u32) {
        self.interval = interval;
    }

    pub fn reset(&mut self) {
        self.frames_elapsed = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, vec![0, 1, 2, 3, 4, 5])]
    #[case(1, vec![1, 3, 5])]
    #[case(2, vec![2, 5])]
    fn check_then_advance_period(#[case] interval: u32, #[case] expected: Vec<usize>) {
        let mut cadence = FrameCadence::new(interval);
        let mut frames = Vec::new();
        for frame in 0..6 {
            if cadence.check_then_advance() {
                frames.push(frame);
            }
        }
        assert_eq!(frames, expected);
    }

    #[rstest]
    #[case(0, vec![0, 1, 2, 3, 4, 5])]
    #[case(1, vec![1, 3, 5])]
    #[case(2, vec![2, 5])]
    #[case(5, vec![5])]
    fn advance_then_check_period(#[case] interval: u32, #[case] expected: Vec<usize>) {
        let mut cadence = FrameCadence::new(interval);
        let mut frames = Vec::new();
        for frame in 0..6 {
            if cadence.advance_then_check() {
                frames.push(frame);
            }
        }
        assert_eq!(frames, expected);
    }

    #[test]
    fn reset_restarts_the_count() {
        let mut cadence = FrameCadence::new(3);
        cadence.advance_then_check();
        cadence.advance_then_check();
        cadence.reset();
        assert_eq!(cadence.frames_elapsed, 0);
        assert!(!cadence.advance_then_check());
        assert!(!cadence.advance_then_check());
        assert!(!cadence.advance_then_check());
        assert!(cadence.advance_then_check());
    }
}
