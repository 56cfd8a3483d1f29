/// Errors raised by case-domain rules before anything reaches the backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// Input rejected by a mutation or filter rule.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unknown filter preset: {0}")]
    UnknownPreset(String),
}
