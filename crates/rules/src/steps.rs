//! Multi-step `next_step` expansion.
//!
//! A next-step spec is empty (stay), a single step, or a comma separated
//! chain walked in one turn. Only the last entry is ever persisted.

use parley_common::text::normalize_step;

/// Entries of `spec` in order, normalized, with empties and entries equal
/// to `current` removed. Skipping `current` keeps a rule from looping on
/// its own step.
pub fn step_chain(current: &str, spec: &str) -> Vec<String> {
    let current = normalize_step(current);
    spec.split(',')
        .map(normalize_step)
        .filter(|s| !s.is_empty() && *s != current)
        .collect()
}

/// The step a contact lands on after following `spec` from `current`.
/// `None` means stay at `current`.
pub fn expand_steps(current: &str, spec: &str) -> Option<String> {
    step_chain(current, spec).pop()
}
