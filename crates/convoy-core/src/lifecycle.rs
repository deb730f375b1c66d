//! Lifecycle contract for state machines that own releasable resources.
//!
//! A state type lists its legal moves and names the one state that
//! releases resources. The conformance checks then prove two things for
//! every implementor: no state can skip cleanup on its way to the end, and
//! cleanup always finishes.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

/// A finite lifecycle with a mandatory cleanup state
///
/// Implementors must satisfy:
///
/// - `can_transition_to(next)` holds exactly when `next` is listed by
///   `valid_next_states()`
/// - the terminal states are exactly those with no moves out
/// - every non-terminal state other than [`Self::CLEANUP`] can move to
///   `CLEANUP` directly, so an abort from anywhere still releases resources
/// - every move out of `CLEANUP` lands on a terminal state
pub trait LifecycleState: Copy + Eq + 'static {
    /// The state that releases whatever the lifecycle acquired
    const CLEANUP: Self;

    fn valid_next_states(self) -> Vec<Self>;

    /// Every variant, each listed once
    fn all_states() -> &'static [Self];

    fn can_transition_to(self, next: Self) -> bool {
        self.valid_next_states().contains(&next)
    }

    fn is_terminal(self) -> bool {
        self.valid_next_states().is_empty()
    }
}
