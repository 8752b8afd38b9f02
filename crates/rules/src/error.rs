use thiserror::Error;

/// A rule points at a step no rule defines. Non-fatal: the contact stays
/// where it is and the error is reported to operators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("rule {rule_id} at step {step:?} points to unknown step {unknown:?}")]
pub struct RuleConfigurationError {
    pub rule_id: i64,
    pub step: String,
    pub unknown: String,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] parley_store::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
