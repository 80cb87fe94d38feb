//! Scan window sizing.
//!
//! Windows are inclusive: a plan for cursor `from` and step `s` covers
//! `[from, from + s]`, and a committed window moves the cursor to `to + 1`.

use ingest_common::{BlockWindow, CursorState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPlan {
    /// Enough confirmed blocks exist; scan this window.
    Fetch(BlockWindow),
    /// The confirmed head is below the requested window end.
    Insufficient { safe_height: i64, needed: i64 },
}

/// Shrinks to `min_step` whenever the requested window cannot be filled (or
/// upstream throttles us) and restores the nominal step after a commit.
#[derive(Debug, Clone, Copy)]
pub struct StepController {
    nominal_step: i64,
}

impl StepController {
    pub fn new(nominal_step: i64) -> Self {
        Self {
            nominal_step: nominal_step.max(1),
        }
    }

    pub fn nominal_step(&self) -> i64 {
        self.nominal_step
    }

    pub fn plan(&self, cursor: &CursorState, safe_height: i64) -> StepPlan {
        let end = cursor.from_height + cursor.step;
        if safe_height < end {
            StepPlan::Insufficient {
                safe_height,
                needed: end,
            }
        } else {
            StepPlan::Fetch(BlockWindow::new(cursor.from_height, end))
        }
    }

    /// The window could not be filled even after backing off.
    pub fn on_insufficient(&self, cursor: &mut CursorState) {
        cursor.step = cursor.min_step;
    }

    pub fn on_rate_limited(&self, cursor: &mut CursorState) {
        cursor.step = cursor.min_step;
    }

    /// Upstream could not return the whole window.
    pub fn on_oversized_window(&self, cursor: &mut CursorState) {
        cursor.step = cursor.min_step;
    }

    /// The window's records are durably stored.
    pub fn on_committed(&self, cursor: &mut CursorState, window: BlockWindow) {
        cursor.from_height = cursor.from_height.max(window.to + 1);
        cursor.step = self.nominal_step.max(cursor.min_step);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use ingest_common::Network;

    fn cursor(from_height: i64, step: i64) -> CursorState {
        CursorState {
            source_key: "gitcoin".into(),
            network: Network::Ethereum,
            from_height,
            step,
            min_step: 10,
            confirmations: 15,
            sleep_interval: Duration::ZERO,
        }
    }

    #[test]
    fn plans_full_window_when_head_is_far_enough() {
        let controller = StepController::new(50);
        assert_eq!(
            controller.plan(&cursor(100, 50), 500),
            StepPlan::Fetch(BlockWindow::new(100, 150))
        );
        // Exactly reaching the end is enough.
        assert_eq!(
            controller.plan(&cursor(100, 50), 150),
            StepPlan::Fetch(BlockWindow::new(100, 150))
        );
    }

    #[test]
    fn insufficient_head_shrinks_to_min_step_without_advancing() {
        let controller = StepController::new(50);
        let mut state = cursor(100, 50);

        let plan = controller.plan(&state, 130);
        assert_eq!(
            plan,
            StepPlan::Insufficient {
                safe_height: 130,
                needed: 150
            }
        );

        controller.on_insufficient(&mut state);
        assert_eq!(state.step, 10);
        assert_eq!(state.from_height, 100);

        // The shrunken window now fits.
        assert_eq!(
            controller.plan(&state, 130),
            StepPlan::Fetch(BlockWindow::new(100, 110))
        );
    }

    #[test]
    fn commit_advances_past_window_and_restores_step() {
        let controller = StepController::new(50);
        let mut state = cursor(100, 10);

        controller.on_committed(&mut state, BlockWindow::new(100, 110));

        assert_eq!(state.from_height, 111);
        assert_eq!(state.step, 50);
    }

    #[test]
    fn commit_never_moves_cursor_backwards() {
        let controller = StepController::new(50);
        let mut state = cursor(500, 50);

        controller.on_committed(&mut state, BlockWindow::new(100, 150));

        assert_eq!(state.from_height, 500);
    }

    #[test]
    fn rate_limit_shrinks_step() {
        let controller = StepController::new(50);
        let mut state = cursor(100, 50);
        controller.on_rate_limited(&mut state);
        assert_eq!(state.step, 10);
    }

    #[test]
    fn oversized_window_shrinks_step_and_keeps_position() {
        let controller = StepController::new(50);
        let mut state = cursor(100, 50);
        controller.on_oversized_window(&mut state);
        assert_eq!(state.step, 10);
        assert_eq!(state.from_height, 100);
        assert_eq!(
            controller.plan(&state, 1_000),
            StepPlan::Fetch(BlockWindow::new(100, 110))
        );
    }
}
