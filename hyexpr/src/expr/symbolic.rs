//! Substitution, constant folding, differentiation and point evaluation.

use std::collections::BTreeMap;

use super::{Expression, Operator};
use crate::utils::EvalError;

fn truth(v: f64) -> bool {
    v != 0.0
}

fn from_bool(b: bool) -> f64 {
    if b { 1.0 } else { 0.0 }
}

/// Apply `op` to numeric arguments. `None` when the operator has no numeric meaning.
fn apply_numeric(op: Operator, args: &[f64]) -> Option<f64> {
    use Operator::*;
    Some(match (op, args) {
        (Add, [a, b]) => a + b,
        (Subtract, [a, b]) => a - b,
        (Multiply, [a, b]) => a * b,
        (Divide, [a, b]) => a / b,
        (Pow, [a, b]) => a.powf(*b),
        (Negative, [a]) => -a,
        (Sin, [a]) => a.sin(),
        (Cos, [a]) => a.cos(),
        (Tan, [a]) => a.tan(),
        (Exp, [a]) => a.exp(),
        (Sqrt, [a]) => a.sqrt(),
        (Ln, [a]) => a.ln(),
        (Equal, [a, b]) => from_bool(a == b),
        (NotEqual, [a, b]) => from_bool(a != b),
        (Less, [a, b]) => from_bool(a < b),
        (LessEqual, [a, b]) => from_bool(a <= b),
        (Greater, [a, b]) => from_bool(a > b),
        (GreaterEqual, [a, b]) => from_bool(a >= b),
        (And, [a, b]) => from_bool(truth(*a) && truth(*b)),
        (Or, [a, b]) => from_bool(truth(*a) || truth(*b)),
        (LogicalNot, [a]) => from_bool(!truth(*a)),
        _ => return None,
    })
}

impl Expression {
    /// Replace variables for which `values` returns a replacement.
    pub fn substitute(&self, values: &dyn Fn(&str) -> Option<Expression>) -> Expression {
        self.transform(&mut |e| match e {
            Expression::Variable(ref name) => values(name).unwrap_or(e),
            other => other,
        })
    }

    pub fn substitute_map(&self, map: &BTreeMap<String, Expression>) -> Expression {
        self.substitute(&|name| map.get(name).cloned())
    }

    /// Constant folding and the neutral-element rewrites
    /// `x+0`, `x-0`, `x*0`, `x*1`, `x/1`, `x^0`, `x^1`, plus boolean short-circuits.
    pub fn simplify(&self) -> Expression {
        self.transform(&mut simplify_node)
    }

    /// Numeric value at `point`. Booleans evaluate to `1`/`0`.
    pub fn evaluate(&self, point: &dyn Fn(&str) -> Option<f64>) -> Result<f64, EvalError> {
        match self {
            Expression::Number(v) => Ok(*v),
            Expression::Bool(b) => Ok(from_bool(*b)),
            Expression::Variable(name) => {
                point(name).ok_or_else(|| EvalError::UnboundVariable { name: name.clone() })
            }
            Expression::Operation(op, children) => {
                let args = children
                    .iter()
                    .map(|c| c.evaluate(point))
                    .collect::<Result<Vec<_>, _>>()?;
                apply_numeric(*op, &args).ok_or_else(|| EvalError::UnsupportedOperator {
                    op: format!("{op:?}"),
                    domain: "numeric",
                })
            }
            Expression::Lut(lut) => {
                let inputs = lut
                    .inputs
                    .iter()
                    .map(|c| c.evaluate(point))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(lut.interpolate(&inputs))
            }
            Expression::Matrix(_) | Expression::Interval(_) => Err(EvalError::NotScalar {
                expr: self.to_default_string(),
            }),
        }
    }

    pub fn evaluate_map(&self, point: &BTreeMap<String, f64>) -> Result<f64, EvalError> {
        self.evaluate(&|name| point.get(name).copied())
    }

    /// Substitute `point`, simplify, and require a single number.
    pub fn evaluate_constant(&self, point: &dyn Fn(&str) -> Option<f64>) -> Result<f64, EvalError> {
        let reduced = self
            .substitute(&|name| point(name).map(Expression::Number))
            .simplify();
        reduced.as_number().ok_or_else(|| EvalError::NotConstant {
            expr: reduced.to_default_string(),
        })
    }

    /// Partial derivative with respect to `var`, simplified.
    pub fn derivative(&self, var: &str) -> Result<Expression, EvalError> {
        Ok(differentiate(self, var)?.simplify())
    }

    /// Time derivative along `flows`: `Σ ∂e/∂v · flows[v]`. Variables without a flow are
    /// treated as constant.
    pub fn lie_derivative(
        &self,
        flows: &BTreeMap<String, Expression>,
    ) -> Result<Expression, EvalError> {
        let mut total = Expression::num(0.0);
        for var in self.variables() {
            let Some(flow) = flows.get(&var) else {
                continue;
            };
            let partial = self.derivative(&var)?;
            total = total + partial * flow.clone();
        }
        Ok(total.simplify())
    }
}

fn simplify_node(e: Expression) -> Expression {
    use Operator::*;
    let (op, children) = match e {
        Expression::Operation(op, children) => (op, children),
        other => return other,
    };

    // Fold fully numeric operands.
    let numbers: Option<Vec<f64>> = children
        .iter()
        .map(|c| match c {
            Expression::Number(v) => Some(*v),
            Expression::Bool(b) => Some(from_bool(*b)),
            _ => None,
        })
        .collect();
    if let Some(args) = numbers {
        let division_by_zero = op == Divide && args.get(1) == Some(&0.0);
        if !division_by_zero {
            if let Some(v) = apply_numeric(op, &args) {
                return if op.is_boolean() {
                    Expression::Bool(truth(v))
                } else {
                    Expression::Number(v)
                };
            }
        }
    }

    let is = |e: &Expression, v: f64| e.as_number() == Some(v);
    match (op, children.as_slice()) {
        (And, [a, b]) if a.is_false() || b.is_false() => Expression::FALSE,
        (And, [a, b]) if a.is_true() => b.clone(),
        (And, [a, b]) if b.is_true() => a.clone(),
        (Or, [a, b]) if a.is_true() || b.is_true() => Expression::TRUE,
        (Or, [a, b]) if a.is_false() => b.clone(),
        (Or, [a, b]) if b.is_false() => a.clone(),
        (LogicalNot, [Expression::Bool(b)]) => Expression::Bool(!b),
        (Add, [a, b]) if is(a, 0.0) => b.clone(),
        (Add | Subtract, [a, b]) if is(b, 0.0) => a.clone(),
        (Subtract, [a, b]) if is(a, 0.0) => -b.clone(),
        (Multiply, [a, b]) if is(a, 0.0) || is(b, 0.0) => Expression::num(0.0),
        (Multiply, [a, b]) if is(a, 1.0) => b.clone(),
        (Multiply | Divide, [a, b]) if is(b, 1.0) => a.clone(),
        (Divide, [a, _]) if is(a, 0.0) => Expression::num(0.0),
        (Pow, [_, b]) if is(b, 0.0) => Expression::num(1.0),
        (Pow, [a, b]) if is(b, 1.0) => a.clone(),
        (Negative, [Expression::Operation(Negative, inner)]) if inner.len() == 1 => {
            inner[0].clone()
        }
        _ => Expression::Operation(op, children),
    }
}

fn differentiate(e: &Expression, var: &str) -> Result<Expression, EvalError> {
    use Operator::*;
    let zero = || Expression::num(0.0);
    match e {
        Expression::Number(_) | Expression::Bool(_) | Expression::Interval(_) => Ok(zero()),
        Expression::Variable(name) => Ok(Expression::num(if name == var { 1.0 } else { 0.0 })),
        _ if !e.contains_variable(var) && e.find_lut().is_none() => Ok(zero()),
        Expression::Operation(op, children) => {
            let d = |c: &Expression| differentiate(c, var);
            match (op, children.as_slice()) {
                (Add, [a, b]) => Ok(d(a)? + d(b)?),
                (Subtract, [a, b]) => Ok(d(a)? - d(b)?),
                (Multiply, [a, b]) => Ok(d(a)? * b.clone() + a.clone() * d(b)?),
                (Divide, [a, b]) => Ok((d(a)? * b.clone() - a.clone() * d(b)?)
                    / Expression::pow(b.clone(), Expression::num(2.0))),
                (Pow, [a, b]) if !b.contains_variable(var) => Ok(b.clone()
                    * Expression::pow(a.clone(), b.clone() - 1.0)
                    * d(a)?),
                (Pow, [a, b]) if !a.contains_variable(var) => Ok(e.clone()
                    * Expression::unary(Ln, a.clone())
                    * d(b)?),
                (Pow, [a, b]) => Ok(e.clone()
                    * (d(b)? * Expression::unary(Ln, a.clone()) + b.clone() * d(a)? / a.clone())),
                (Negative, [a]) => Ok(-d(a)?),
                (Sin, [a]) => Ok(Expression::unary(Cos, a.clone()) * d(a)?),
                (Cos, [a]) => Ok(-Expression::unary(Sin, a.clone()) * d(a)?),
                (Tan, [a]) => Ok(d(a)?
                    / Expression::pow(Expression::unary(Cos, a.clone()), Expression::num(2.0))),
                (Exp, [a]) => Ok(e.clone() * d(a)?),
                (Sqrt, [a]) => Ok(d(a)? / (Expression::num(2.0) * e.clone())),
                (Ln, [a]) => Ok(d(a)? / a.clone()),
                _ => Err(EvalError::NotDifferentiable {
                    expr: e.to_default_string(),
                    var: var.to_string(),
                }),
            }
        }
        Expression::Matrix(_) | Expression::Lut(_) => Err(EvalError::NotDifferentiable {
            expr: e.to_default_string(),
            var: var.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_value;

    fn at_x(e: &Expression, x: f64) -> f64 {
        e.evaluate(&|name| (name == "x").then_some(x)).unwrap()
    }

    #[test]
    fn folds_constants_and_neutral_elements() {
        let e = parse_value("x * 1 + 0 + 2 * 3").unwrap();
        assert_eq!(e.simplify(), Expression::var("x") + 6.0);
        let e = parse_value("x ^ 0 - 1").unwrap();
        assert_eq!(e.simplify(), Expression::num(0.0));
    }

    #[test]
    fn boolean_short_circuit() {
        let e = parse_value("x <= 1 & 2 < 1").unwrap();
        assert_eq!(e.simplify(), Expression::FALSE);
        let e = parse_value("x <= 1 | 1 < 2").unwrap();
        assert_eq!(e.simplify(), Expression::TRUE);
    }

    #[test]
    fn keeps_division_by_zero() {
        let e = parse_value("1 / 0").unwrap();
        assert!(e.simplify().is_operation());
    }

    #[test]
    fn derivative_matches_finite_difference() {
        let e = parse_value("sin(x) * x ^ 3 + exp(2 * x) / (1 + x)").unwrap();
        let d = e.derivative("x").unwrap();
        for x in [0.3, 1.1, 2.0] {
            let h = 1e-6;
            let numeric = (at_x(&e, x + h) - at_x(&e, x - h)) / (2.0 * h);
            assert!((at_x(&d, x) - numeric).abs() < 1e-4, "at {x}");
        }
    }

    #[test]
    fn lie_derivative_follows_flows() {
        let e = parse_value("x * y").unwrap();
        let flows = BTreeMap::from([
            ("x".to_string(), Expression::num(2.0)),
            ("y".to_string(), Expression::num(0.0)),
        ]);
        let d = e.lie_derivative(&flows).unwrap();
        assert_eq!(d, Expression::var("y") * 2.0);
    }

    #[test]
    fn constant_evaluation_requires_bound_variables() {
        let e = parse_value("x + y").unwrap();
        let err = e
            .evaluate_constant(&|name| (name == "x").then_some(1.0))
            .unwrap_err();
        assert!(err.is_not_constant());
    }
}
