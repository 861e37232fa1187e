use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{debug, info};

use crate::posture::Posture;

/// Memory carried between samples
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WarningState {
    pub last_label: Option<Posture>,
    /// Length of the current run of `last_label`, 0 when it is not bad
    pub consecutive_bad_count: u32,
    /// Bad labels whose current run already crossed the threshold
    pub warned_labels: BTreeSet<Posture>,
}

/// Raises a warning once a bad posture has been seen `threshold` times in a row.
///
/// After the first warning the same posture keeps warning on every sample
/// until a different label interrupts the run; a later recurrence has to
/// build a fresh run.
#[derive(Debug, Clone)]
pub struct WarningHysteresis {
    threshold: u32,
    state: WarningState,
}

impl WarningHysteresis {
    pub const DEFAULT_THRESHOLD: u32 = 5;

    /// A threshold of 0 behaves as 1
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            state: WarningState::default(),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn state(&self) -> &WarningState {
        &self.state
    }

    pub fn reset(&mut self) {
        self.state = WarningState::default();
    }

    /// Feed the next decided label; returns whether to warn for it
    pub fn advance(&mut self, label: Posture, is_bad: bool) -> bool {
        let state = &mut self.state;

        if state.last_label != Some(label) {
            if let Some(previous) = state.last_label {
                if state.warned_labels.remove(&previous) {
                    debug!("[warning] {} run interrupted by {}", previous, label);
                }
            }
            state.last_label = Some(label);
            state.consecutive_bad_count = u32::from(is_bad);
        } else if is_bad {
            state.consecutive_bad_count = state.consecutive_bad_count.saturating_add(1);
        } else {
            state.consecutive_bad_count = 0;
        }

        if !is_bad {
            return false;
        }
        if state.warned_labels.contains(&label) {
            return true;
        }
        if state.consecutive_bad_count >= self.threshold {
            info!(
                "[warning] {} held for {} consecutive samples",
                label, state.consecutive_bad_count
            );
            state.warned_labels.insert(label);
            return true;
        }
        false
    }
}

impl Default for WarningHysteresis {
    fn default() -> Self {
        Self::new(Self::DEFAULT_THRESHOLD)
    }
}
