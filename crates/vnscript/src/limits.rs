//! Execution budget guarding a [`crate::scene::Scene`]'s driving loop
//! (SPEC_FULL ambient addition; grounded on the teacher's
//! `ResourceLimits`/`NoLimitTracker` pattern in `resource.rs`).
//!
//! `Script::step` itself never needs a budget — §8 promises it "never
//! raises" even on a script containing an infinite `jump` cycle. It's
//! `Scene::next`'s `while !yield && !isDone()` loop that can spin forever on
//! such a script with no live `page`/`menu`/`wait`, so the budget is
//! enforced there.

/// Step budget for one `Scene::next()` call. `max_steps = None` is
/// unbounded, matching the teacher's default of running with no limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineLimits {
    pub max_steps: Option<usize>,
}

impl EngineLimits {
    #[must_use]
    pub fn unbounded() -> Self {
        Self { max_steps: None }
    }

    #[must_use]
    pub fn bounded(max_steps: usize) -> Self {
        Self { max_steps: Some(max_steps) }
    }
}
