//! Hyexpr: the expression language of hybrid automata.
//!
//! One closed expression tree ([`Expression`]) is shared by guards, invariants, flows,
//! resets and initial/forbidden sets. The crate provides
//!  - the chumsky grammar ([`parser`]) and the plain and colored printers,
//!  - interval arithmetic and [`ExpressionInterval`] (expression plus additive range),
//!  - symbolic helpers: substitution, constant folding, differentiation, evaluation.
//!
//! Example
//! ```
//! use hyexpr::parser::parse_value;
//!
//! let e = parse_value("x ^ 2 + 2 * x").unwrap();
//! let d = e.derivative("x").unwrap();
//! assert_eq!(d.evaluate(&|_| Some(1.0)).unwrap(), 4.0);
//! assert_eq!(parse_value(&e.to_string()).unwrap(), e);
//! ```

/// Expression tree, operators, matrices and look-up tables.
pub mod expr;
/// Closed intervals, interval evaluation and expression-intervals.
pub mod interval;
/// Character-level grammar and the per-context entry points.
pub mod parser;
/// Error types.
pub mod utils;

pub use expr::{DefaultPrinter, Expression, ExpressionPrinter, Lut, Matrix, Operator};
pub use interval::{ExpressionInterval, Interval, interval_evaluate};
pub use utils::{EvalError, IntervalError, MatrixError, ParseError};
