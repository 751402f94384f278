//! Closed numeric ranges and expressions carrying an additive nondeterministic range.
//!
//! An [`Interval`] is `[min, max]` with `min <= max`. Unbounded sides are represented by
//! infinities ("open" intervals); they only appear for true nondeterminism, such as havoc
//! variables without an invariant bound.
//!
//! [`interval_evaluate`] performs standard interval arithmetic over an [`Expression`]; the
//! result always encloses every pointwise value of the expression over the given box.

use std::f64::consts::{FRAC_PI_2, PI};
use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};

use crate::expr::printer::format_number;
use crate::expr::{Expression, Operator};
use crate::utils::{EvalError, IntervalError};

/// Tolerance used by approximate interval comparisons.
pub const COMPARE_TOL: f64 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    pub min: f64,
    pub max: f64,
}

impl Interval {
    pub fn new(min: f64, max: f64) -> Self {
        debug_assert!(!(min > max), "inverted interval [{min}, {max}]");
        Self { min, max }
    }

    /// Checked constructor.
    pub fn try_new(min: f64, max: f64) -> Result<Self, IntervalError> {
        if min > max {
            Err(IntervalError::Inverted { min, max })
        } else {
            Ok(Self { min, max })
        }
    }

    pub fn point(value: f64) -> Self {
        Self {
            min: value,
            max: value,
        }
    }

    pub fn unbounded() -> Self {
        Self {
            min: f64::NEG_INFINITY,
            max: f64::INFINITY,
        }
    }

    /// Unbounded on at least one side.
    pub fn is_open(&self) -> bool {
        self.min.is_infinite() || self.max.is_infinite()
    }

    pub fn width(&self) -> f64 {
        self.max - self.min
    }

    pub fn middle(&self) -> f64 {
        (self.min + self.max) / 2.0
    }

    pub fn is_point(&self) -> bool {
        self.width() <= COMPARE_TOL
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn contains_interval(&self, other: &Interval) -> bool {
        other.min >= self.min && other.max <= self.max
    }

    /// Smallest interval containing both.
    pub fn union(&self, other: &Interval) -> Interval {
        Interval::new(self.min.min(other.min), self.max.max(other.max))
    }

    pub fn intersection(&self, other: &Interval) -> Option<Interval> {
        let min = self.min.max(other.min);
        let max = self.max.min(other.max);
        (min <= max).then(|| Interval::new(min, max))
    }

    /// Equality of both bounds within `tol`.
    pub fn approx_eq(&self, other: &Interval, tol: f64) -> bool {
        let close = |a: f64, b: f64| a == b || (a - b).abs() <= tol;
        close(self.min, other.min) && close(self.max, other.max)
    }

    pub fn scale(&self, factor: f64) -> Interval {
        let (a, b) = (self.min * factor, self.max * factor);
        if factor < 0.0 {
            Interval::new(b, a)
        } else {
            Interval::new(a, b)
        }
    }

    /// Widen both sides by `amount`.
    pub fn bloat(&self, amount: f64) -> Interval {
        Interval::new(self.min - amount, self.max + amount)
    }

    pub fn try_div(&self, divisor: &Interval) -> Result<Interval, EvalError> {
        if divisor.contains(0.0) {
            return Err(EvalError::DivisionByZeroInterval {
                divisor: divisor.to_string(),
            });
        }
        Ok(*self * Interval::new(1.0 / divisor.max, 1.0 / divisor.min))
    }

    pub fn pow(&self, exponent: &Interval) -> Result<Interval, EvalError> {
        let invalid = || EvalError::InvalidExponent {
            exponent: exponent.to_string(),
        };
        if !exponent.is_point() {
            return Err(invalid());
        }
        let n = exponent.min;
        if n.fract() == 0.0 && n >= 0.0 {
            let n = n as i32;
            if n == 0 {
                return Ok(Interval::point(1.0));
            }
            let (a, b) = (self.min.powi(n), self.max.powi(n));
            if n % 2 == 1 {
                return Ok(Interval::new(a, b));
            }
            if self.contains(0.0) {
                return Ok(Interval::new(0.0, a.max(b)));
            }
            return Ok(Interval::new(a.min(b), a.max(b)));
        }
        if self.min >= 0.0 && n > 0.0 {
            return Ok(Interval::new(self.min.powf(n), self.max.powf(n)));
        }
        Err(invalid())
    }

    pub fn sin(&self) -> Interval {
        if self.is_open() || self.width() >= 2.0 * PI {
            return Interval::new(-1.0, 1.0);
        }
        let (a, b) = (self.min.sin(), self.max.sin());
        let mut out = Interval::new(a.min(b), a.max(b));
        if self.hits_periodic(FRAC_PI_2) {
            out.max = 1.0;
        }
        if self.hits_periodic(-FRAC_PI_2) {
            out.min = -1.0;
        }
        out
    }

    pub fn cos(&self) -> Interval {
        (*self + Interval::point(FRAC_PI_2)).sin()
    }

    pub fn tan(&self) -> Interval {
        let k = ((self.min - FRAC_PI_2) / PI).ceil();
        if self.is_open() || FRAC_PI_2 + k * PI <= self.max {
            return Interval::unbounded();
        }
        Interval::new(self.min.tan(), self.max.tan())
    }

    /// Does `[min, max]` contain `phase + 2kπ` for some integer k?
    fn hits_periodic(&self, phase: f64) -> bool {
        let k = ((self.min - phase) / (2.0 * PI)).ceil();
        phase + k * 2.0 * PI <= self.max
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", format_number(self.min), format_number(self.max))
    }
}

impl Add for Interval {
    type Output = Interval;

    fn add(self, rhs: Interval) -> Interval {
        Interval::new(self.min + rhs.min, self.max + rhs.max)
    }
}

impl Sub for Interval {
    type Output = Interval;

    fn sub(self, rhs: Interval) -> Interval {
        Interval::new(self.min - rhs.max, self.max - rhs.min)
    }
}

impl Mul for Interval {
    type Output = Interval;

    fn mul(self, rhs: Interval) -> Interval {
        let products = [
            self.min * rhs.min,
            self.min * rhs.max,
            self.max * rhs.min,
            self.max * rhs.max,
        ];
        let min = products.iter().copied().fold(f64::INFINITY, f64::min);
        let max = products.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Interval::new(min, max)
    }
}

impl Neg for Interval {
    type Output = Interval;

    fn neg(self) -> Interval {
        Interval::new(-self.max, -self.min)
    }
}

/// Bound `e` over the box given by `bounds`.
pub fn interval_evaluate(
    e: &Expression,
    bounds: &dyn Fn(&str) -> Option<Interval>,
) -> Result<Interval, EvalError> {
    match e {
        Expression::Number(v) => Ok(Interval::point(*v)),
        Expression::Bool(b) => Ok(Interval::point(if *b { 1.0 } else { 0.0 })),
        Expression::Interval(i) => Ok(*i),
        Expression::Variable(name) => {
            bounds(name).ok_or_else(|| EvalError::UnboundVariable { name: name.clone() })
        }
        Expression::Lut(lut) => {
            // Multilinear interpolation stays within the range of the table values.
            let data = lut.table.data();
            let min = data.iter().copied().fold(f64::INFINITY, f64::min);
            let max = data.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            Ok(Interval::new(min, max))
        }
        Expression::Matrix(_) => Err(EvalError::NotScalar {
            expr: e.to_default_string(),
        }),
        Expression::Operation(op, children) => {
            let args = children
                .iter()
                .map(|c| interval_evaluate(c, bounds))
                .collect::<Result<Vec<_>, _>>()?;
            use Operator::*;
            match (op, args.as_slice()) {
                (Add, [a, b]) => Ok(*a + *b),
                (Subtract, [a, b]) => Ok(*a - *b),
                (Multiply, [a, b]) => Ok(*a * *b),
                (Divide, [a, b]) => a.try_div(b),
                (Pow, [a, b]) => a.pow(b),
                (Negative, [a]) => Ok(-*a),
                (Sin, [a]) => Ok(a.sin()),
                (Cos, [a]) => Ok(a.cos()),
                (Tan, [a]) => Ok(a.tan()),
                (Exp, [a]) => Ok(Interval::new(a.min.exp(), a.max.exp())),
                (Sqrt, [a]) if a.min >= 0.0 => Ok(Interval::new(a.min.sqrt(), a.max.sqrt())),
                (Ln, [a]) if a.min > 0.0 => Ok(Interval::new(a.min.ln(), a.max.ln())),
                _ => Err(EvalError::UnsupportedOperator {
                    op: format!("{op:?}"),
                    domain: "interval",
                }),
            }
        }
    }
}

/// A deterministic expression plus an optional additive nondeterministic range.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionInterval {
    pub expression: Expression,
    pub interval: Option<Interval>,
}

impl ExpressionInterval {
    pub fn new(expression: Expression) -> Self {
        Self {
            expression,
            interval: None,
        }
    }

    pub fn with_interval(expression: Expression, interval: Interval) -> Self {
        Self {
            expression,
            interval: Some(interval),
        }
    }

    /// Parse the printed form `expr` or `expr + [lo, hi]`.
    pub fn parse(text: &str) -> Result<Self, crate::ParseError> {
        crate::parser::parse_expression_interval(text)
    }

    pub fn is_interval(&self) -> bool {
        self.interval.is_some()
    }

    /// The deterministic value; fails when a nondeterministic part is present.
    pub fn as_expression(&self) -> Result<&Expression, IntervalError> {
        match self.interval {
            None => Ok(&self.expression),
            Some(_) => Err(IntervalError::NotAPoint {
                value: self.to_string(),
            }),
        }
    }

    /// Point estimate: the expression shifted by the middle of the interval.
    pub fn center(&self) -> Expression {
        match self.interval {
            Some(i) if i.middle() != 0.0 => self.expression.clone() + i.middle(),
            _ => self.expression.clone(),
        }
    }

    /// A single tree, with the range as a transient interval term.
    pub fn to_expression(&self) -> Expression {
        match self.interval {
            Some(i) => self.expression.clone() + Expression::Interval(i),
            None => self.expression.clone(),
        }
    }
}

impl From<Expression> for ExpressionInterval {
    fn from(expression: Expression) -> Self {
        ExpressionInterval::new(expression)
    }
}

impl fmt::Display for ExpressionInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.interval {
            Some(i) => write!(f, "{} + {}", self.expression, i),
            None => write!(f, "{}", self.expression),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_by_negative_swaps() {
        let i = Interval::new(1.0, 3.0).scale(-2.0);
        assert_eq!(i, Interval::new(-6.0, -2.0));
    }

    #[test]
    fn even_power_through_zero() {
        let i = Interval::new(-2.0, 1.0).pow(&Interval::point(2.0)).unwrap();
        assert_eq!(i, Interval::new(0.0, 4.0));
    }

    #[test]
    fn division_by_zero_range() {
        let err = Interval::new(1.0, 2.0)
            .try_div(&Interval::new(-1.0, 1.0))
            .unwrap_err();
        assert!(err.is_division_by_zero_interval());
    }

    #[test]
    fn sine_reaches_peak() {
        let i = Interval::new(0.0, 2.0).sin();
        assert_eq!(i.max, 1.0);
        assert!((i.min - 0.0).abs() < 1e-12);
    }

    #[test]
    fn evaluates_polynomial_over_box() {
        let e = Expression::pow(Expression::var("x"), Expression::num(2.0)) - Expression::var("x");
        let bounds = |name: &str| (name == "x").then(|| Interval::new(1.0, 2.0));
        let i = interval_evaluate(&e, &bounds).unwrap();
        assert_eq!(i, Interval::new(-1.0, 3.0));
    }

    #[test]
    fn expression_interval_display_and_center() {
        let ei = ExpressionInterval::with_interval(Expression::var("x"), Interval::new(-1.0, 3.0));
        assert_eq!(ei.to_string(), "x + [-1.0, 3.0]");
        assert_eq!(ei.center(), Expression::var("x") + 1.0);
        assert!(ei.as_expression().unwrap_err().is_not_a_point());
    }
}
