use strum::EnumIs;
use thiserror::Error;

/// Failure to turn text into an [`Expression`](crate::expr::Expression).
///
/// Parsing is all-or-nothing: a `ParseError` means no part of the input was accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
#[error("Could not parse `{text}`: {message}")]
pub struct ParseError {
    pub message: String,
    pub text: String,
}

impl ParseError {
    pub fn new(message: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, EnumIs, Error)]
pub enum EvalError {
    /// A variable had no value at the evaluation point.
    #[error("Variable `{name}` has no value at the evaluation point.")]
    UnboundVariable { name: String },

    /// The operator cannot be evaluated in the requested domain.
    #[error("Operator `{op}` is not supported by {domain} evaluation.")]
    UnsupportedOperator { op: String, domain: &'static str },

    /// The expression kind (matrix, lut, ...) cannot be evaluated to a scalar.
    #[error("Expression `{expr}` cannot be evaluated to a single value.")]
    NotScalar { expr: String },

    /// Interval division by a range containing zero.
    #[error("Interval division by `{divisor}`, which contains zero.")]
    DivisionByZeroInterval { divisor: String },

    /// Interval powers need a nonnegative integer point exponent.
    #[error("Interval power requires a nonnegative integer exponent, got `{exponent}`.")]
    InvalidExponent { exponent: String },

    /// Symbolic simplification did not reduce the expression to a number.
    #[error("Could not simplify `{expr}` to a constant.")]
    NotConstant { expr: String },

    /// The derivative of this expression shape is not implemented.
    #[error("Cannot differentiate `{expr}` with respect to `{var}`.")]
    NotDifferentiable { expr: String, var: String },
}

#[derive(Debug, Clone, PartialEq, EnumIs, Error)]
pub enum IntervalError {
    /// `as_expression` was called on an expression-interval whose interval is not a point.
    #[error("Expression interval `{value}` has a nondeterministic part and is not a single expression.")]
    NotAPoint { value: String },

    /// Lower bound above upper bound.
    #[error("Interval bounds are inverted: min `{min}` is greater than max `{max}`.")]
    Inverted { min: f64, max: f64 },
}

#[derive(Debug, Clone, PartialEq, Eq, EnumIs, Error)]
pub enum MatrixError {
    /// The flat data length disagrees with the product of the dimension widths.
    #[error("Matrix with dimensions {dims:?} needs {expected} entries, got {len}.")]
    ShapeMismatch {
        dims: Vec<usize>,
        expected: usize,
        len: usize,
    },

    /// Rows of a `[a, b ; c, d]` literal have different lengths.
    #[error("Matrix rows have different lengths ({first} and {other}).")]
    RaggedRows { first: usize, other: usize },

    /// A look-up table is structurally invalid.
    #[error("Invalid look-up table: {message}")]
    InvalidLut { message: String },
}
