//! Hybridization: replace the nonlinear dynamics of a single-mode automaton by affine or
//! constant dynamics over a set of boxes, with error modes catching trajectories that
//! leave the boxes.
//!
//! The three strategies ([`grid`], [`time_triggered`], [`mixed`]) only differ in how the
//! boxes are chosen. They share the affine over-approximation ([`affine_dynamics`]) and
//! the intersection of initial and forbidden sets with the new invariants
//! ([`expression_invariants_intersection`]).

use std::collections::BTreeMap;
use std::sync::Arc;

use hyexpr::{Expression, ExpressionInterval, Interval};
use log::{info, warn};
use nalgebra::DMatrix;

use crate::analysis::variable_ranges;
use crate::bridge::{Bound, NumericBridge, SharedBridge};
use crate::ir::{AutomatonMode, BaseComponent, FlowMap};
use crate::magic::{COEFFICIENT_TOLERANCE, JACOBIAN_STEP};
use crate::sim::{HyperPoint, HyperRectangle, evaluate_at};
use crate::utils::error::{HyError, HyResult, RangeExtractError};
use crate::utils::workers::map_ordered;

pub mod grid;
pub mod mixed;
pub mod time_triggered;

/// Central-difference Jacobian of `dynamics` (one row per entry, ordered like `vars`)
/// across `rect`. The sample offset is half the box width, or [`JACOBIAN_STEP`] for a
/// flat dimension.
pub fn estimate_jacobian(
    dynamics: &[&Expression],
    vars: &[String],
    rect: &HyperRectangle,
) -> HyResult<DMatrix<f64>> {
    let center = rect.center();
    let mut jac = DMatrix::zeros(dynamics.len(), vars.len());

    for (row, f) in dynamics.iter().enumerate() {
        for col in 0..vars.len() {
            let mut offset = rect.dims[col].width() / 2.0;
            if !(offset > 0.0) || !offset.is_finite() {
                offset = JACOBIAN_STEP;
            }
            let mut left = center.clone();
            let mut right = center.clone();
            left[col] -= offset;
            right[col] += offset;

            let slope = (evaluate_at(f, vars, &right)? - evaluate_at(f, vars, &left)?) / (2.0 * offset);
            jac[(row, col)] = slope;
        }
    }
    Ok(jac)
}

/// Value of a variable-free expression.
fn constant_of(e: &Expression) -> Option<f64> {
    if !e.variables().is_empty() {
        return None;
    }
    e.evaluate(&|_| None).ok()
}

/// Exact coefficients of `f` over `vars` when every partial derivative is constant.
fn affine_coefficients(f: &Expression, vars: &[String]) -> Option<Vec<f64>> {
    vars.iter()
        .map(|var| f.derivative(var).ok().and_then(|d| constant_of(&d.simplify())))
        .collect()
}

fn linear_part(coefficients: impl Iterator<Item = f64>, vars: &[String], tolerance: f64) -> Expression {
    let mut linear: Option<Expression> = None;
    for (coefficient, name) in coefficients.zip(vars) {
        if coefficient.abs() <= tolerance {
            continue;
        }
        let term = Expression::num(coefficient) * Expression::var(name);
        linear = Some(match linear {
            Some(sum) => sum + term,
            None => term,
        });
    }
    linear.unwrap_or_else(|| Expression::num(0.0))
}

/// Approximated flows of one box. `sound` is false when any bound behind them was only
/// best-effort.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxDynamics {
    pub flows: FlowMap,
    pub sound: bool,
}

/// Affine over-approximation of `flows` over `rect` (ordered like `vars`).
///
/// Each flow `f` becomes `Σ J[i][j]·x_j + c + [0, w]`, where `[c, c + w]` bounds the
/// residual `f - Σ J[i][j]·x_j` over the box. Flows that are already affine keep their
/// exact coefficients and get no residual range. An existing nondeterministic range is
/// added to the residual. A residual width below [`COEFFICIENT_TOLERANCE`] is dropped.
pub fn affine_dynamics(
    bridge: &dyn NumericBridge,
    flows: &FlowMap,
    vars: &[String],
    rect: &HyperRectangle,
) -> HyResult<BoxDynamics> {
    let domain = rect.to_bounds(vars);
    let center = rect.center();
    let ordered: Vec<(&String, &ExpressionInterval)> = vars
        .iter()
        .filter_map(|v| flows.get_key_value(v))
        .collect();
    let expressions: Vec<&Expression> = ordered.iter().map(|(_, ei)| &ei.expression).collect();
    let jac = estimate_jacobian(&expressions, vars, rect)?;

    let mut rv = FlowMap::new();
    let mut sound = true;
    for (row, (var, ei)) in ordered.into_iter().enumerate() {
        let (linear, residual) = match affine_coefficients(&ei.expression, vars) {
            Some(coefficients) => {
                let linear = linear_part(coefficients.iter().copied(), vars, 0.0);
                let offset = evaluate_at(&ei.expression, vars, &center)?
                    - evaluate_at(&linear, vars, &center)?;
                (linear, Bound::sound(Interval::point(offset)))
            }
            None => {
                let linear = linear_part(jac.row(row).iter().copied(), vars, COEFFICIENT_TOLERANCE);
                let residual = ei.expression.clone() - linear.clone();
                (linear, bridge.bound_over_domain(&residual, &domain)?)
            }
        };
        sound &= residual.sound;
        let mut bound = residual.range;
        if let Some(extra) = ei.interval {
            bound = bound + extra;
        }

        let flow = bridge.simplify(&(linear + bound.min))?;
        let width = bound.max - bound.min;
        let value = if width.abs() < COEFFICIENT_TOLERANCE {
            ExpressionInterval::new(flow)
        } else {
            ExpressionInterval::with_interval(flow, Interval::new(0.0, width))
        };
        rv.insert(var.clone(), value);
    }
    Ok(BoxDynamics { flows: rv, sound })
}

/// Piecewise-constant over-approximation: every flow becomes `0 + [lo, hi]`, the bound of
/// the flow over `rect`.
pub fn constant_dynamics(
    bridge: &dyn NumericBridge,
    flows: &FlowMap,
    vars: &[String],
    rect: &HyperRectangle,
) -> HyResult<BoxDynamics> {
    let domain = rect.to_bounds(vars);
    let mut rv = FlowMap::new();
    let mut sound = true;
    for (var, ei) in flows {
        let bound = bridge.bound_over_domain(&ei.expression, &domain)?;
        sound &= bound.sound;
        let mut range = bound.range;
        if let Some(extra) = ei.interval {
            range = range + extra;
        }
        rv.insert(
            var.clone(),
            ExpressionInterval::with_interval(Expression::num(0.0), range),
        );
    }
    Ok(BoxDynamics { flows: rv, sound })
}

/// How flows are approximated inside each box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Approximation {
    Affine,
    Constant,
}

/// Replace the flows of every job's mode by their approximation over its rectangle,
/// spreading the work over `threads` workers.
pub(crate) fn hybridize_flows(
    bridge: &SharedBridge,
    base: &mut BaseComponent,
    jobs: &[(String, HyperRectangle)],
    vars: &[String],
    approximation: Approximation,
    threads: usize,
) -> HyResult<()> {
    let start = std::time::Instant::now();
    let originals: Vec<(FlowMap, &HyperRectangle)> = jobs
        .iter()
        .map(|(name, rect)| {
            let mode = base.mode_by_name(name).ok_or_else(|| {
                HyError::Unknown(format!("hybridized mode '{name}' disappeared"))
            })?;
            Ok((mode.flow_dynamics.clone().unwrap_or_default(), rect))
        })
        .collect::<HyResult<_>>()?;

    let results = map_ordered(threads, &originals, |(flows, rect)| match approximation {
        Approximation::Affine => affine_dynamics(bridge, flows, vars, rect),
        Approximation::Constant => constant_dynamics(bridge, flows, vars, rect),
    })?;

    let count: usize = originals.iter().map(|(flows, _)| flows.len()).sum();
    let unsound = results.iter().filter(|r| !r.sound).count();
    if unsound > 0 {
        warn!(
            "numeric bridge '{}' gave best-effort bounds in {unsound} of {} modes; hybridized flows are not sound",
            bridge.name(),
            jobs.len()
        );
    }
    for ((name, _), dynamics) in jobs.iter().zip(results) {
        if let Some(id) = base.mode_id(name) {
            base.mode_mut(id).flow_dynamics = Some(dynamics.flows);
        }
    }
    info!(
        "completed {count} optimizations for {} modes in {} ms",
        jobs.len(),
        start.elapsed().as_millis()
    );
    Ok(())
}

fn ranges_for(e: &Expression, desc: &str) -> HyResult<BTreeMap<String, Interval>> {
    variable_ranges(e).map_err(|err| match err {
        RangeExtractError::Unsupported { expression, message } => HyError::UnsupportedCondition {
            expression,
            message: format!("{desc}: {message}"),
        },
        other => HyError::validation(format!("{desc}: {other}")),
    })
}

/// `v >= min & v <= max` per entry; an infinite side is left out.
pub fn bounds_to_expression(bounds: &BTreeMap<String, Interval>) -> Expression {
    Expression::and_all(bounds.iter().flat_map(|(var, range)| {
        let ge = range
            .min
            .is_finite()
            .then(|| Expression::greater_equal(Expression::var(var), Expression::num(range.min)));
        let le = range
            .max
            .is_finite()
            .then(|| Expression::less_equal(Expression::var(var), Expression::num(range.max)));
        ge.into_iter().chain(le)
    }))
}

/// Modes whose invariant box meets the box described by `e`, each mapped to the
/// intersection. Only the variables constrained by `e` appear in the result.
pub fn expression_invariants_intersection(
    base: &BaseComponent,
    e: &Expression,
    desc: &str,
) -> HyResult<BTreeMap<String, Expression>> {
    let wanted = ranges_for(e, desc)?;
    let mut rv = BTreeMap::new();

    for (_, mode) in base.modes() {
        let invariant = ranges_for(&mode.invariant, &format!("invariant of mode {}", mode.name))?;
        let mut intersection = BTreeMap::new();
        let mut empty = false;
        for (var, range) in &wanted {
            let meet = match invariant.get(var) {
                Some(other) => range.intersection(other),
                None => Some(*range),
            };
            match meet {
                Some(i) => {
                    intersection.insert(var.clone(), i);
                }
                None => {
                    empty = true;
                    break;
                }
            }
        }
        if !empty {
            rv.insert(mode.name.clone(), bounds_to_expression(&intersection));
        }
    }
    Ok(rv)
}

/// Center of the box spanned by the ranges of `init` over `vars`. Every variable needs a
/// bounded range.
pub fn initial_box(init: &Expression, vars: &[String]) -> HyResult<HyperRectangle> {
    let ranges = ranges_for(init, "initial states")?;
    let dims = vars
        .iter()
        .map(|var| match ranges.get(var) {
            Some(r) if !r.is_open() => Ok(*r),
            Some(r) => Err(HyError::validation(format!(
                "initial range {r} of '{var}' is unbounded"
            ))),
            None => Err(HyError::validation(format!(
                "range for '{var}' was not set (initial states are not a box)"
            ))),
        })
        .collect::<HyResult<Vec<_>>>()?;
    Ok(HyperRectangle::new(dims))
}

/// `v <= min` and `v >= max` guards for every dimension except `skip`.
pub(crate) fn face_guards(rect: &HyperRectangle, vars: &[String], skip: Option<usize>) -> Vec<Expression> {
    rect.dims
        .iter()
        .zip(vars)
        .enumerate()
        .filter(|(d, _)| Some(*d) != skip)
        .flat_map(|(_, (range, var))| {
            [
                Expression::less_equal(Expression::var(var), Expression::num(range.min)),
                Expression::greater_equal(Expression::var(var), Expression::num(range.max)),
            ]
        })
        .collect()
}

/// A mode with invariant `true` and zero flow for every variable.
pub(crate) fn sink_mode(name: impl Into<String>, vars: &[String]) -> AutomatonMode {
    vars.iter()
        .fold(AutomatonMode::new(name), |mode, var| mode.with_flow(var, Expression::num(0.0)))
}

/// Default bridge shared by the hybridization passes.
pub(crate) fn default_bridge() -> Arc<SharedBridge> {
    Arc::new(SharedBridge::local())
}

/// The only mode of `base`; hybridization starts from a single mode.
pub(crate) fn single_mode<'a>(base: &'a BaseComponent, pass: &str) -> HyResult<&'a AutomatonMode> {
    let mut modes = base.modes();
    match (modes.next(), modes.next()) {
        (Some((_, mode)), None) => Ok(mode),
        _ => Err(HyError::precondition(
            pass,
            format!("expected a single mode, found {}", base.num_modes()),
        )),
    }
}

/// `x=1, y=2` rendering of a point, for diagnostics.
pub(crate) fn describe_point(p: &HyperPoint, vars: &[String]) -> String {
    vars.iter()
        .zip(p.iter())
        .map(|(v, x)| format!("{v}={x}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::LocalBridge;
    use hyexpr::parser::{parse_invariant, parse_value};

    fn flows(items: &[(&str, &str)]) -> FlowMap {
        items
            .iter()
            .map(|(v, e)| (v.to_string(), ExpressionInterval::new(parse_value(e).unwrap())))
            .collect()
    }

    #[test]
    fn linear_flows_stay_exact() {
        let vars = vec!["x".to_string(), "y".to_string()];
        let rect = HyperRectangle::new(vec![Interval::new(0.0, 1.0), Interval::new(2.0, 4.0)]);
        let out = affine_dynamics(&LocalBridge::default(), &flows(&[("x", "2 * y - x"), ("y", "3")]), &vars, &rect)
            .unwrap();
        assert!(out.sound);
        let out = out.flows;
        assert!(out["y"].interval.is_none());
        assert_eq!(out["y"].expression.as_number(), Some(3.0));
        assert!(out["x"].interval.is_none(), "{}", out["x"]);
        let at = |x: f64, y: f64| {
            out["x"]
                .expression
                .evaluate(&|n| match n {
                    "x" => Some(x),
                    "y" => Some(y),
                    _ => None,
                })
                .unwrap()
        };
        assert!((at(0.5, 3.0) - 5.5).abs() < 1e-6);
    }

    #[test]
    fn jacobian_is_secant_across_the_box() {
        let f = parse_value("x ^ 2").unwrap();
        let rect = HyperRectangle::new(vec![Interval::new(1.0, 2.0)]);
        let jac = estimate_jacobian(&[&f], &["x".into()], &rect).unwrap();
        assert!((jac[(0, 0)] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn constant_dynamics_bound_each_flow() {
        let vars = vec!["x".to_string()];
        let rect = HyperRectangle::new(vec![Interval::new(1.0, 2.0)]);
        let out = constant_dynamics(&LocalBridge::default(), &flows(&[("x", "-x")]), &vars, &rect).unwrap();
        assert!(out.sound);
        let out = out.flows;
        assert_eq!(out["x"].expression.as_number(), Some(0.0));
        let i = out["x"].interval.unwrap();
        assert!(i.min <= -2.0 && i.max >= -1.0, "{i}");
    }

    #[test]
    fn sampled_residual_marks_the_box_unsound() {
        let vars = vec!["x".to_string()];
        let rect = HyperRectangle::new(vec![Interval::new(0.0, 1.0)]);
        let flows = flows(&[("x", "x * (x > 0.5)"), ("y", "1")]);
        let out = constant_dynamics(&LocalBridge::default(), &flows, &vars, &rect).unwrap();
        assert!(!out.sound);
        let out = affine_dynamics(&LocalBridge::default(), &flows, &vars, &rect).unwrap();
        assert!(!out.sound);
    }

    #[test]
    fn intersection_keeps_only_meeting_modes() {
        let mut base = BaseComponent::new();
        base.add_mode(AutomatonMode::new("_m_0").with_invariant(parse_invariant("x >= 0 & x <= 1").unwrap()))
            .unwrap();
        base.add_mode(AutomatonMode::new("_m_1").with_invariant(parse_invariant("x >= 1 & x <= 2").unwrap()))
            .unwrap();
        base.add_mode(AutomatonMode::new("_m_2").with_invariant(parse_invariant("x >= 2 & x <= 3").unwrap()))
            .unwrap();

        let init = parse_invariant("x >= 0.5 & x <= 1.5 & y = 2").unwrap();
        let out = expression_invariants_intersection(&base, &init, "initial states").unwrap();
        assert_eq!(out.keys().cloned().collect::<Vec<_>>(), ["_m_0", "_m_1"]);
        assert_eq!(out["_m_0"].to_string(), "x >= 0.5 & x <= 1.0 & y >= 2.0 & y <= 2.0");

        let open = parse_invariant("x >= 2.5").unwrap();
        let out = expression_invariants_intersection(&base, &open, "forbidden states").unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out["_m_2"].to_string(), "x >= 2.5 & x <= 3.0");
    }

    #[test]
    fn initial_box_needs_every_variable() {
        let init = parse_invariant("x = 1 & y >= 0 & y <= 2").unwrap();
        let rect = initial_box(&init, &["x".into(), "y".into()]).unwrap();
        assert_eq!(rect.center().as_slice(), &[1.0, 1.0]);
        assert!(initial_box(&init, &["x".into(), "z".into()]).is_err());
    }
}
