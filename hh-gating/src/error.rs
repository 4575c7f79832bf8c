//! Error types for the gating library.

use thiserror::Error;

/// Errors that can occur while configuring or initialising gates and channels.
///
/// Two failure classes from the runtime contract are deliberately absent:
/// mutation attempts through a non-original channel are logged and ignored
/// rather than raised, and near-zero denominators during table fills are
/// healed in place.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatingError {
    /// A rate-law expression failed to compile. Carries the byte position
    /// and diagnostic from the expression compiler.
    #[error("Malformed expression: {0}")]
    MalformedExpression(#[from] rate_expr::ExprError),

    /// The two rate tables were assigned with different lengths.
    #[error("Table shape mismatch: A has {a_len} entries, B has {b_len}")]
    ShapeMismatch { a_len: usize, b_len: usize },

    /// A configuration value is outside its permitted range.
    #[error("Invalid configuration: {parameter} = {value}: {reason}")]
    OutOfConfigRange {
        parameter: String,
        value: f64,
        reason: String,
    },

    /// A gate is powered but cannot be queried yet.
    #[error("Gate {slot} is unavailable: {reason}")]
    GateUninitialised { slot: char, reason: String },

    /// An input-index name is not one of the recognised set.
    #[error("Unrecognised input index `{0}`")]
    UnknownInputIndex(String),
}

impl GatingError {
    pub(crate) fn out_of_range(parameter: &str, value: f64, reason: &str) -> Self {
        GatingError::OutOfConfigRange {
            parameter: parameter.to_string(),
            value,
            reason: reason.to_string(),
        }
    }
}

/// Result type for gating operations.
pub type Result<T> = std::result::Result<T, GatingError>;
