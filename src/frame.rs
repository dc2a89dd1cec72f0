// Frame bookkeeping - slot selection, begin/end state, resize signaling
//
// Pure CPU-side state, kept separate from the Vulkan layer so the frame
// protocol invariants stay unit-testable.

use crate::backend::swapchain::MAX_FRAMES_IN_FLIGHT;

/// Whether a frame is currently being recorded.
///
/// `begin` is only legal in `Idle`, `end` only in `FrameInProgress`.
/// Violations are programming defects upstream, not runtime conditions,
/// and panic immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderState {
    Idle,
    FrameInProgress,
}

impl RenderState {
    pub fn begin(&mut self) {
        assert!(
            *self == RenderState::Idle,
            "begin_frame called while a frame is already in progress"
        );
        *self = RenderState::FrameInProgress;
    }

    pub fn end(&mut self) {
        assert!(
            *self == RenderState::FrameInProgress,
            "end_frame called with no frame in progress"
        );
        *self = RenderState::Idle;
    }

    pub fn is_frame_in_progress(&self) -> bool {
        *self == RenderState::FrameInProgress
    }
}

/// Monotonic count of completed frames.
///
/// The active frame slot is always `count % MAX_FRAMES_IN_FLIGHT`; the
/// counter only moves forward, once per completed frame, and wraps the
/// u64 range without any practical bound.
#[derive(Debug, Default)]
pub struct FrameCounter {
    count: u64,
}

impl FrameCounter {
    pub fn new() -> Self {
        Self { count: 0 }
    }

    /// Slot index for the frame currently being prepared.
    pub fn slot(&self) -> usize {
        (self.count % MAX_FRAMES_IN_FLIGHT as u64) as usize
    }

    /// Called exactly once per completed frame.
    pub fn advance(&mut self) {
        self.count = self.count.wrapping_add(1);
    }

    pub fn completed(&self) -> u64 {
        self.count
    }
}

/// Edge-triggered surface invalidation signal.
///
/// Raised by the windowing side on resize and by the presentation engine
/// via suboptimal/out-of-date reports; consumed at most once per frame
/// boundary so overlapping triggers collapse into a single recreation.
#[derive(Debug, Default)]
pub struct ResizeSignal {
    pending: bool,
}

impl ResizeSignal {
    pub fn new() -> Self {
        Self { pending: false }
    }

    pub fn raise(&mut self) {
        self.pending = true;
    }

    /// Consumes the signal, returning whether it was raised.
    pub fn take(&mut self) -> bool {
        std::mem::take(&mut self.pending)
    }

    pub fn is_raised(&self) -> bool {
        self.pending
    }
}

/// Post-present recreation decision.
///
/// The already-recorded frame has been submitted at this point; recreation
/// happens after presentation regardless of which trigger fired.
pub fn should_recreate_after_present(suboptimal_or_out_of_date: bool, resize_pending: bool) -> bool {
    suboptimal_or_out_of_date || resize_pending
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_end_round_trip() {
        let mut state = RenderState::Idle;
        state.begin();
        assert!(state.is_frame_in_progress());
        state.end();
        assert_eq!(state, RenderState::Idle);
    }

    #[test]
    #[should_panic(expected = "already in progress")]
    fn double_begin_panics() {
        let mut state = RenderState::Idle;
        state.begin();
        state.begin();
    }

    #[test]
    #[should_panic(expected = "no frame in progress")]
    fn end_while_idle_panics() {
        let mut state = RenderState::Idle;
        state.end();
    }

    #[test]
    fn slot_follows_counter_modulo() {
        let mut counter = FrameCounter::new();
        for frame in 0..64u64 {
            assert_eq!(counter.slot(), (frame % MAX_FRAMES_IN_FLIGHT as u64) as usize);
            counter.advance();
        }
        assert_eq!(counter.completed(), 64);
    }

    #[test]
    fn slots_used_evenly_over_whole_cycles() {
        let mut counter = FrameCounter::new();
        let k = 10;
        let mut uses = vec![0u32; MAX_FRAMES_IN_FLIGHT];
        for _ in 0..MAX_FRAMES_IN_FLIGHT * k {
            uses[counter.slot()] += 1;
            counter.advance();
        }
        assert!(uses.iter().all(|&n| n == k as u32));
    }

    #[test]
    fn resize_signal_collapses_multiple_triggers() {
        let mut signal = ResizeSignal::new();
        signal.raise();
        signal.raise(); // explicit resize and a stale-surface report in the same frame
        assert!(signal.take());
        assert!(!signal.take());
        assert!(!signal.is_raised());
    }

    #[test]
    fn recreate_decision_table() {
        assert!(!should_recreate_after_present(false, false));
        assert!(should_recreate_after_present(true, false));
        assert!(should_recreate_after_present(false, true));
        assert!(should_recreate_after_present(true, true));
    }
}
