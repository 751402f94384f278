use hyexpr::{EvalError, IntervalError, MatrixError, ParseError};
use strum::EnumIs;
use thiserror::Error;

#[derive(Debug, Error, EnumIs)]
pub enum HyError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("Precondition of pass '{pass}' failed: {reason}")]
    PreconditionFailed { pass: String, reason: String },

    #[error("Unsupported condition: {expression} ({message})")]
    UnsupportedCondition { expression: String, message: String },

    #[error("Numeric bridge '{name}' is unavailable")]
    BridgeUnavailable { name: String },

    #[error("Numeric bridge call timed out after {millis} ms")]
    BridgeTimeout { millis: u64 },

    #[error("Conflicting {what}: '{first}' and '{second}'")]
    Conflict {
        what: String,
        first: String,
        second: String,
    },

    #[error("Invalid parameter for pass '{pass}': {message}")]
    InvalidParameter { pass: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse settings file '{file}': {source}")]
    SettingsParse {
        source: toml::de::Error,
        file: String,
    },

    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error("Simulation failed: {0}")]
    Simulation(String),

    #[error("An unknown error occurred: {0}")]
    Unknown(String),
}

impl HyError {
    pub fn validation(message: impl Into<String>) -> Self {
        HyError::Validation {
            message: message.into(),
        }
    }

    pub fn precondition(pass: impl Into<String>, reason: impl Into<String>) -> Self {
        HyError::PreconditionFailed {
            pass: pass.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_parameter(pass: impl Into<String>, message: impl Into<String>) -> Self {
        HyError::InvalidParameter {
            pass: pass.into(),
            message: message.into(),
        }
    }

    /// Validation failures, including composition conflicts.
    pub fn is_invalid_model(&self) -> bool {
        matches!(self, HyError::Validation { .. } | HyError::Conflict { .. })
    }

    /// Process exit code of the command line front-end for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            HyError::Parse(_) => 1,
            HyError::Validation { .. } | HyError::Conflict { .. } => 2,
            HyError::PreconditionFailed { .. } | HyError::UnsupportedCondition { .. } => 3,
            _ => 4,
        }
    }
}

impl From<IntervalError> for HyError {
    fn from(err: IntervalError) -> Self {
        HyError::Simulation(err.to_string())
    }
}

impl From<MatrixError> for HyError {
    fn from(err: MatrixError) -> Self {
        HyError::validation(err.to_string())
    }
}

pub type HyResult<T> = Result<T, HyError>;

/// Why a condition could not be turned into per-variable ranges.
#[derive(Debug, Clone, PartialEq, Error, EnumIs)]
pub enum RangeExtractError {
    #[error("range for '{variable}' is unsatisfiable")]
    EmptyRange { variable: String },

    #[error("multiple different values for constant '{name}': {first} and {second}")]
    ConstantMismatch { name: String, first: f64, second: f64 },

    #[error("unsupported condition '{expression}': {message}")]
    Unsupported { expression: String, message: String },
}

impl From<RangeExtractError> for HyError {
    fn from(err: RangeExtractError) -> Self {
        match err {
            RangeExtractError::Unsupported {
                expression,
                message,
            } => HyError::UnsupportedCondition {
                expression,
                message,
            },
            other => HyError::validation(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_error_class() {
        let parse = hyexpr::parser::parse_value("x +").unwrap_err();
        assert_eq!(HyError::from(parse).exit_code(), 1);

        let conflict = HyError::Conflict {
            what: "flow for x".into(),
            first: "1.0".into(),
            second: "2.0".into(),
        };
        assert!(conflict.is_invalid_model());
        assert!(!conflict.is_validation());
        assert_eq!(conflict.exit_code(), 2);
        assert_eq!(HyError::precondition("flatten", "no modes").exit_code(), 3);
        assert_eq!(HyError::BridgeTimeout { millis: 10 }.exit_code(), 4);
    }

    #[test]
    fn unsupported_range_becomes_unsupported_condition() {
        let err: HyError = RangeExtractError::Unsupported {
            expression: "x * y <= 1".into(),
            message: "one side should be a variable".into(),
        }
        .into();
        assert!(err.is_unsupported_condition());
    }
}
