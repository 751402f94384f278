//! Per-variable ranges of conjunctions of simple bounds.
//!
//! Only conjunctions of `var op value` (either orientation, strict and non-strict
//! treated alike) are understood. `var op other` is accepted when `other` is pinned to a
//! value by an equality elsewhere in the conjunction. Any other shape is reported as
//! [`RangeExtractError::Unsupported`], never as "no constraint".

use std::collections::{BTreeMap, BTreeSet};

use hyexpr::{Expression, Interval, Operator};

use crate::utils::error::RangeExtractError;

fn unsupported(e: &Expression, message: &str) -> RangeExtractError {
    RangeExtractError::Unsupported {
        expression: e.to_default_string(),
        message: message.to_string(),
    }
}

/// Value of a variable-free side, if it folds to a number.
fn constant_value(e: &Expression) -> Option<f64> {
    if !e.variables().is_empty() {
        return None;
    }
    e.evaluate(&|_| None).ok()
}

fn is_loc(e: &Expression) -> bool {
    matches!(e, Expression::Operation(Operator::Loc, _))
}

/// Variables pinned by `var = value` conjuncts.
pub fn extract_constants(e: &Expression) -> Result<BTreeMap<String, f64>, RangeExtractError> {
    let mut out = BTreeMap::new();

    for conjunct in e.conjuncts() {
        let Some((Operator::Equal, left, right)) = conjunct.as_binary() else {
            continue;
        };
        let pinned = match (left, right) {
            (Expression::Variable(name), other) | (other, Expression::Variable(name)) => {
                constant_value(other).map(|v| (name, v))
            }
            _ => None,
        };
        if let Some((name, value)) = pinned {
            match out.get(name) {
                Some(&previous) if previous != value => {
                    return Err(RangeExtractError::ConstantMismatch {
                        name: name.clone(),
                        first: previous,
                        second: value,
                    });
                }
                _ => {
                    out.insert(name.clone(), value);
                }
            }
        }
    }

    Ok(out)
}

/// Single bound `name op value` in normal orientation.
fn bound_of(
    conjunct: &Expression,
    constants: &BTreeMap<String, f64>,
) -> Result<Option<(String, Operator, f64)>, RangeExtractError> {
    let Some((op, left, right)) = conjunct.as_binary() else {
        return Err(unsupported(conjunct, "expected a comparison"));
    };
    if !op.is_comparison() {
        return Err(unsupported(conjunct, "expected a comparison"));
    }
    if is_loc(left) || is_loc(right) {
        return Ok(None);
    }

    let normal = match (left, right) {
        (Expression::Variable(a), Expression::Variable(b)) => {
            match (constants.get(a), constants.get(b)) {
                (_, Some(&v)) => Some((a.clone(), op, v)),
                (Some(&v), None) => op.mirrored().map(|m| (b.clone(), m, v)),
                (None, None) => return Ok(None),
            }
        }
        (Expression::Variable(a), other) => constant_value(other).map(|v| (a.clone(), op, v)),
        (other, Expression::Variable(b)) => {
            constant_value(other).and_then(|v| op.mirrored().map(|m| (b.clone(), m, v)))
        }
        _ => None,
    };

    match normal {
        Some(bound) => Ok(Some(bound)),
        None => Err(unsupported(
            conjunct,
            "one side should be a variable, the other side a constant",
        )),
    }
}

fn apply_bound(
    ranges: &mut BTreeMap<String, Interval>,
    conjunct: &Expression,
    (name, op, value): (String, Operator, f64),
) -> Result<(), RangeExtractError> {
    let bound = match op {
        Operator::Equal => Interval::point(value),
        Operator::Greater | Operator::GreaterEqual => Interval::new(value, f64::INFINITY),
        Operator::Less | Operator::LessEqual => Interval::new(f64::NEG_INFINITY, value),
        _ => return Err(unsupported(conjunct, "unsupported comparison operator")),
    };

    let current = ranges.entry(name.clone()).or_insert_with(Interval::unbounded);
    match current.intersection(&bound) {
        Some(i) => {
            *current = i;
            Ok(())
        }
        None => Err(RangeExtractError::EmptyRange { variable: name }),
    }
}

/// Ranges of every variable bounded by `e`.
pub fn variable_ranges(e: &Expression) -> Result<BTreeMap<String, Interval>, RangeExtractError> {
    ranges_of(e, None)
}

/// Range of `variable` (and of variables equated to it) in `e`. `None` when unconstrained.
/// Conjuncts not mentioning those variables are ignored, even if unsupported.
pub fn variable_range(e: &Expression, variable: &str) -> Result<Option<Interval>, RangeExtractError> {
    let mut related = BTreeSet::from([variable.to_string()]);
    for conjunct in e.conjuncts() {
        if let Some((Operator::Equal, Expression::Variable(a), Expression::Variable(b))) =
            conjunct.as_binary()
        {
            if a == variable {
                related.insert(b.clone());
            } else if b == variable {
                related.insert(a.clone());
            }
        }
    }

    let ranges = ranges_of(e, Some(&related))?;
    let mut merged: Option<Interval> = None;
    for name in &related {
        if let Some(r) = ranges.get(name) {
            merged = match merged {
                None => Some(*r),
                Some(m) => Some(m.intersection(r).ok_or_else(|| RangeExtractError::EmptyRange {
                    variable: variable.to_string(),
                })?),
            };
        }
    }
    Ok(merged)
}

fn ranges_of(
    e: &Expression,
    only: Option<&BTreeSet<String>>,
) -> Result<BTreeMap<String, Interval>, RangeExtractError> {
    let constants = extract_constants(e)?;
    let mut ranges = BTreeMap::new();

    for conjunct in e.conjuncts() {
        match conjunct {
            Expression::Bool(true) => continue,
            Expression::Bool(false) => {
                return Err(RangeExtractError::EmptyRange {
                    variable: "<all>".to_string(),
                });
            }
            _ => {}
        }

        if let Some(only) = only {
            if !only.iter().any(|v| conjunct.contains_variable(v)) {
                continue;
            }
        }

        if let Some(bound) = bound_of(conjunct, &constants)? {
            if only.is_some_and(|only| !only.contains(&bound.0)) {
                continue;
            }
            apply_bound(&mut ranges, conjunct, bound)?;
        }
    }

    Ok(ranges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyexpr::parser::parse_invariant;

    fn ranges(text: &str) -> Result<BTreeMap<String, Interval>, RangeExtractError> {
        variable_ranges(&parse_invariant(text).unwrap())
    }

    #[test]
    fn conjunction_of_bounds() {
        let r = ranges("x >= 1 & x <= 2 & 3 < y & t = 0").unwrap();
        assert_eq!(r["x"], Interval::new(1.0, 2.0));
        assert_eq!(r["y"], Interval::new(3.0, f64::INFINITY));
        assert_eq!(r["t"], Interval::point(0.0));
    }

    #[test]
    fn chained_comparison_and_negative_bounds() {
        let r = ranges("-1.5 <= x <= -0.5").unwrap();
        assert_eq!(r["x"], Interval::new(-1.5, -0.5));
    }

    #[test]
    fn empty_range_is_detected() {
        assert!(ranges("x >= 2 & x <= 1").unwrap_err().is_empty_range());
        assert!(ranges("x <= 1 & false").unwrap_err().is_empty_range());
    }

    #[test]
    fn nonlinear_condition_is_unsupported() {
        assert!(ranges("x * y <= 1").unwrap_err().is_unsupported());
        assert!(ranges("x <= 1 | x >= 2").unwrap_err().is_unsupported());
    }

    #[test]
    fn single_variable_ignores_unrelated_conjuncts() {
        let e = parse_invariant("x * y <= 1 & t >= 0 & t <= 5").unwrap();
        assert_eq!(variable_range(&e, "t").unwrap(), Some(Interval::new(0.0, 5.0)));
        assert_eq!(variable_range(&e, "z").unwrap(), None);
        assert!(variable_range(&e, "x").unwrap_err().is_unsupported());
    }

    #[test]
    fn equated_variables_share_a_range() {
        let e = parse_invariant("c = 2 & x <= c & x = y & y >= 1").unwrap();
        assert_eq!(variable_range(&e, "x").unwrap(), Some(Interval::new(1.0, 2.0)));
    }

    #[test]
    fn conflicting_constants() {
        let e = parse_invariant("c = 1 & c = 2").unwrap();
        assert!(matches!(
            extract_constants(&e),
            Err(RangeExtractError::ConstantMismatch { .. })
        ));
    }
}
