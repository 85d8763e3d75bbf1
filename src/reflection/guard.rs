//! Repetition and stagnation detection across steps.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::PilotConfig;
use crate::memory::{Fingerprint, Outcome};

/// Why the guard fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum LoopSignal {
    /// Same situation with the same outcome, `occurrences` times in the window.
    Repetition { occurrences: usize },
    /// `streak` consecutive steps without a success.
    Stagnation { streak: usize },
}

impl fmt::Display for LoopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Repetition { occurrences } => {
                write!(f, "same situation and outcome {} times", occurrences)
            }
            Self::Stagnation { streak } => write!(f, "{} steps without success", streak),
        }
    }
}

/// Rolling window of (fingerprint, outcome) pairs.
///
/// Evidence is cleared whenever the guard fires, so one signal buys exactly
/// one emergency step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopGuard {
    window: VecDeque<(Fingerprint, Outcome)>,
    window_size: usize,
    repeat_threshold: usize,
    failure_streak: usize,
    streak: usize,
}

impl LoopGuard {
    pub fn new(window_size: usize, repeat_threshold: usize, failure_streak: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(window_size),
            window_size: window_size.max(1),
            repeat_threshold,
            failure_streak: failure_streak.max(1),
            streak: 0,
        }
    }

    pub fn from_config(config: &PilotConfig) -> Self {
        Self::new(
            config.loop_window,
            config.loop_repeat_threshold,
            config.loop_failure_streak,
        )
    }

    /// Guard with the limits of `config` that keeps the evidence `previous`
    /// gathered, e.g. for a resumed mission.
    pub fn resumed(previous: LoopGuard, config: &PilotConfig) -> Self {
        let mut guard = Self::from_config(config);
        let skip = previous.window.len().saturating_sub(guard.window_size);
        guard.window.extend(previous.window.into_iter().skip(skip));
        guard.streak = previous.streak;
        guard
    }

    /// Add one step and report whether the mission looks stuck.
    pub fn observe(&mut self, fingerprint: &Fingerprint, outcome: Outcome) -> Option<LoopSignal> {
        if self.window.len() >= self.window_size {
            self.window.pop_front();
        }
        self.window.push_back((fingerprint.clone(), outcome));

        if outcome.is_success() {
            self.streak = 0;
        } else {
            self.streak += 1;
        }

        let occurrences = self
            .window
            .iter()
            .filter(|(fp, o)| *o == outcome && fp == fingerprint)
            .count();

        let signal = if occurrences > self.repeat_threshold {
            Some(LoopSignal::Repetition { occurrences })
        } else if self.streak >= self.failure_streak {
            Some(LoopSignal::Stagnation { streak: self.streak })
        } else {
            None
        };

        if signal.is_some() {
            self.reset();
        }
        signal
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.streak = 0;
    }

    /// Consecutive non-success steps so far.
    pub fn streak(&self) -> usize {
        self.streak
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::HashFingerprinter;

    fn fp(text: &str) -> Fingerprint {
        HashFingerprinter.fingerprint_text(text)
    }

    #[test]
    fn test_repetition_fires_above_threshold() {
        let mut guard = LoopGuard::new(6, 2, 10);
        let same = fp("chat list");
        assert_eq!(guard.observe(&same, Outcome::Success), None);
        assert_eq!(guard.observe(&same, Outcome::Success), None);
        assert_eq!(
            guard.observe(&same, Outcome::Success),
            Some(LoopSignal::Repetition { occurrences: 3 })
        );
        // Evidence cleared after firing
        assert_eq!(guard.observe(&same, Outcome::Success), None);
    }

    #[test]
    fn test_resumed_guard_keeps_evidence() {
        let config = PilotConfig::default().with_loop_guard(6, 5, 3);
        let mut before = LoopGuard::from_config(&config);
        assert_eq!(before.observe(&fp("a"), Outcome::Failure), None);
        assert_eq!(before.observe(&fp("b"), Outcome::Failure), None);

        let saved: LoopGuard = serde_json::from_value(serde_json::to_value(&before).unwrap()).unwrap();
        let mut after = LoopGuard::resumed(saved, &config);
        assert_eq!(after.streak(), 2);
        assert_eq!(
            after.observe(&fp("c"), Outcome::Failure),
            Some(LoopSignal::Stagnation { streak: 3 })
        );
    }

    #[test]
    fn test_distinct_fingerprints_never_fire() {
        let mut guard = LoopGuard::new(6, 2, 10);
        for i in 0..20 {
            assert_eq!(guard.observe(&fp(&format!("screen {}", i)), Outcome::Success), None);
        }
    }

    #[test]
    fn test_same_fingerprint_different_outcomes() {
        let mut guard = LoopGuard::new(6, 2, 10);
        let same = fp("settings");
        assert_eq!(guard.observe(&same, Outcome::Success), None);
        assert_eq!(guard.observe(&same, Outcome::Partial), None);
        assert_eq!(guard.observe(&same, Outcome::Success), None);
    }

    #[test]
    fn test_repeats_outside_window_are_forgotten() {
        let mut guard = LoopGuard::new(2, 1, 10);
        let same = fp("home");
        assert_eq!(guard.observe(&same, Outcome::Success), None);
        assert_eq!(guard.observe(&fp("other"), Outcome::Success), None);
        assert_eq!(guard.observe(&same, Outcome::Success), None);
    }

    #[test]
    fn test_stagnation_streak() {
        let mut guard = LoopGuard::new(6, 5, 3);
        assert_eq!(guard.observe(&fp("a"), Outcome::Failure), None);
        assert_eq!(guard.observe(&fp("b"), Outcome::Partial), None);
        assert_eq!(
            guard.observe(&fp("c"), Outcome::Failure),
            Some(LoopSignal::Stagnation { streak: 3 })
        );
        assert_eq!(guard.streak(), 0);
    }

    #[test]
    fn test_success_breaks_streak() {
        let mut guard = LoopGuard::new(6, 5, 3);
        guard.observe(&fp("a"), Outcome::Failure);
        guard.observe(&fp("b"), Outcome::Failure);
        guard.observe(&fp("c"), Outcome::Success);
        assert_eq!(guard.observe(&fp("d"), Outcome::Failure), None);
        assert_eq!(guard.streak(), 1);
    }
}
