//! Fixed-step RK4 simulation and the box geometry used by hybridization.
//!
//! Simulation is a point estimate: nondeterministic flows are collapsed to the middle of
//! their range before stepping ([`center_dynamics`]).

use std::collections::BTreeMap;
use std::fmt;

use hyexpr::{Expression, Interval};
use nalgebra::DVector;

use crate::ir::{FlowMap, ResetMap};
use crate::utils::error::{HyError, HyResult};

/// A point in the state space, ordered like the automaton's variables.
pub type HyperPoint = DVector<f64>;

/// An axis-aligned box, one interval per state dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct HyperRectangle {
    pub dims: Vec<Interval>,
}

impl HyperRectangle {
    pub fn new(dims: Vec<Interval>) -> Self {
        Self { dims }
    }

    pub fn from_point(p: &HyperPoint) -> Self {
        Self {
            dims: p.iter().map(|&v| Interval::point(v)).collect(),
        }
    }

    /// Smallest box containing every point; `None` for an empty set.
    pub fn bounding_box<'a>(points: impl IntoIterator<Item = &'a HyperPoint>) -> Option<Self> {
        let mut points = points.into_iter();
        let mut rv = Self::from_point(points.next()?);
        for p in points {
            rv.grow_to_include(p);
        }
        Some(rv)
    }

    pub fn num_dims(&self) -> usize {
        self.dims.len()
    }

    pub fn grow_to_include(&mut self, p: &HyperPoint) {
        for (dim, &v) in self.dims.iter_mut().zip(p.iter()) {
            dim.min = dim.min.min(v);
            dim.max = dim.max.max(v);
        }
    }

    pub fn contains(&self, p: &HyperPoint) -> bool {
        self.dims.iter().zip(p.iter()).all(|(d, &v)| d.contains(v))
    }

    pub fn contains_rect(&self, other: &HyperRectangle) -> bool {
        self.dims
            .iter()
            .zip(&other.dims)
            .all(|(a, b)| a.contains_interval(b))
    }

    pub fn intersects(&self, other: &HyperRectangle) -> bool {
        self.dims
            .iter()
            .zip(&other.dims)
            .all(|(a, b)| b.max >= a.min && b.min <= a.max)
    }

    pub fn center(&self) -> HyperPoint {
        HyperPoint::from_iterator(self.dims.len(), self.dims.iter().map(Interval::middle))
    }

    /// Grow every side by `amount`.
    pub fn bloat_additive(&self, amount: f64) -> Self {
        Self {
            dims: self.dims.iter().map(|d| d.bloat(amount)).collect(),
        }
    }

    /// Smallest box containing both.
    pub fn union(&self, other: &HyperRectangle) -> Self {
        Self {
            dims: self
                .dims
                .iter()
                .zip(&other.dims)
                .map(|(a, b)| a.union(b))
                .collect(),
        }
    }

    /// Distinct corners. Flat dimensions stay at their single value, so a box with `k`
    /// non-flat dimensions has `2^k` corners. Bit `i` of the enumeration index selects the
    /// max of the `i`-th non-flat dimension.
    pub fn corners(&self) -> Vec<HyperPoint> {
        let wide: Vec<usize> = (0..self.dims.len())
            .filter(|&d| !self.dims[d].is_point())
            .collect();
        let center = self.center();

        (0..1usize << wide.len())
            .map(|bits| {
                let mut p = center.clone();
                for (i, &d) in wide.iter().enumerate() {
                    p[d] = if (bits >> i) & 1 == 0 {
                        self.dims[d].min
                    } else {
                        self.dims[d].max
                    };
                }
                p
            })
            .collect()
    }

    /// The center moved to the min and the max of each dimension in turn, without
    /// duplicates.
    pub fn star_points(&self) -> Vec<HyperPoint> {
        let center = self.center();
        let mut rv: Vec<HyperPoint> = Vec::with_capacity(2 * self.dims.len());
        for (d, range) in self.dims.iter().enumerate() {
            for v in [range.min, range.max] {
                let mut p = center.clone();
                p[d] = v;
                if !rv.contains(&p) {
                    rv.push(p);
                }
            }
        }
        rv
    }

    /// Bounds keyed by variable name.
    pub fn to_bounds(&self, vars: &[String]) -> BTreeMap<String, Interval> {
        vars.iter().cloned().zip(self.dims.iter().copied()).collect()
    }

    /// `v >= min & v <= max` for every dimension except `skip`.
    pub fn to_expression(&self, vars: &[String], skip: Option<usize>) -> Expression {
        Expression::and_all(
            self.dims
                .iter()
                .zip(vars)
                .enumerate()
                .filter(|(d, _)| Some(*d) != skip)
                .map(|(_, (range, var))| {
                    Expression::and(
                        Expression::greater_equal(Expression::var(var), Expression::num(range.min)),
                        Expression::less_equal(Expression::var(var), Expression::num(range.max)),
                    )
                }),
        )
    }
}

impl fmt::Display for HyperRectangle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, ")")
    }
}

/// Flows with every nondeterministic range replaced by its middle.
pub fn center_dynamics(flows: &FlowMap) -> BTreeMap<String, Expression> {
    flows
        .iter()
        .map(|(var, ei)| (var.clone(), ei.center()))
        .collect()
}

/// Evaluate `e` at `point` by substituting every variable and folding constants.
pub fn evaluate_at(e: &Expression, vars: &[String], point: &HyperPoint) -> HyResult<f64> {
    let lookup = |name: &str| vars.iter().position(|v| v == name).map(|i| point[i]);
    e.evaluate_constant(&lookup).map_err(|err| {
        HyError::Simulation(format!(
            "could not simplify flow expression completely while simulating: {e} ({err})"
        ))
    })
}

/// RK4 integrator over deterministic dynamics.
#[derive(Debug, Clone)]
pub struct Simulator {
    variables: Vec<String>,
    derivatives: Vec<Expression>,
}

impl Simulator {
    /// Every variable needs a derivative in `dynamics`.
    pub fn new(dynamics: &BTreeMap<String, Expression>, variables: &[String]) -> HyResult<Self> {
        let derivatives = variables
            .iter()
            .map(|var| {
                dynamics.get(var).cloned().ok_or_else(|| {
                    HyError::Simulation(format!("no dynamics given for variable '{var}'"))
                })
            })
            .collect::<HyResult<Vec<_>>>()?;

        Ok(Self {
            variables: variables.to_vec(),
            derivatives,
        })
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// Gradient of the dynamics at `point`.
    pub fn derivative(&self, point: &HyperPoint) -> HyResult<HyperPoint> {
        let values = self
            .derivatives
            .iter()
            .map(|e| evaluate_at(e, &self.variables, point))
            .collect::<HyResult<Vec<_>>>()?;
        Ok(HyperPoint::from_vec(values))
    }

    /// One classical RK4 step of length `h`, in place.
    pub fn step(&self, point: &mut HyperPoint, h: f64) -> HyResult<()> {
        let k1 = self.derivative(point)? * h;
        let k2 = self.derivative(&(&*point + &k1 * 0.5))? * h;
        let k3 = self.derivative(&(&*point + &k2 * 0.5))? * h;
        let k4 = self.derivative(&(&*point + &k3))? * h;

        *point += (k1 + k2 * 2.0 + k3 * 2.0 + k4) / 6.0;
        Ok(())
    }

    /// `num_steps` steps of length `h`. `listener` sees the point before each step and
    /// once more after the last, with the number of completed steps.
    pub fn steps(
        &self,
        point: &mut HyperPoint,
        h: f64,
        num_steps: usize,
        listener: &mut dyn FnMut(usize, &HyperPoint),
    ) -> HyResult<()> {
        for s in 0..num_steps {
            listener(s, point);
            self.step(point, h)?;
        }
        listener(num_steps, point);
        Ok(())
    }
}

/// Simulate `dynamics` for `duration` from `init` in `num_steps` equal steps and return
/// the final point.
pub fn simulate_for(
    duration: f64,
    init: &HyperPoint,
    num_steps: usize,
    dynamics: &BTreeMap<String, Expression>,
    vars: &[String],
    listener: &mut dyn FnMut(usize, &HyperPoint),
) -> HyResult<HyperPoint> {
    if num_steps == 0 {
        return Err(HyError::Simulation("at least one step is required".into()));
    }
    let sim = Simulator::new(dynamics, vars)?;
    let mut point = init.clone();
    sim.steps(&mut point, duration / num_steps as f64, num_steps, listener)?;
    Ok(point)
}

/// Apply `reset` to `point`. Nondeterministic updates take the middle of their range.
pub fn process_reset(point: &HyperPoint, reset: &ResetMap, vars: &[String]) -> HyResult<HyperPoint> {
    let mut rv = point.clone();
    for (i, var) in vars.iter().enumerate() {
        if let Some(update) = reset.get(var) {
            rv[i] = evaluate_at(&update.center(), vars, point)?;
        }
    }
    Ok(rv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyexpr::parser::parse_value;

    fn dynamics(items: &[(&str, &str)]) -> (BTreeMap<String, Expression>, Vec<String>) {
        let map = items
            .iter()
            .map(|(v, e)| (v.to_string(), parse_value(e).unwrap()))
            .collect();
        let vars = items.iter().map(|(v, _)| v.to_string()).collect();
        (map, vars)
    }

    #[test]
    fn exponential_decay_matches_closed_form() {
        let (dy, vars) = dynamics(&[("x", "-x")]);
        let end = simulate_for(1.0, &HyperPoint::from_vec(vec![1.0]), 100, &dy, &vars, &mut |_, _| {})
            .unwrap();
        assert!((end[0] - (-1.0f64).exp()).abs() < 1e-8, "{}", end[0]);
    }

    #[test]
    fn listener_sees_every_step() {
        let (dy, vars) = dynamics(&[("x", "1"), ("y", "x")]);
        let mut seen = Vec::new();
        simulate_for(
            2.0,
            &HyperPoint::from_vec(vec![0.0, 0.0]),
            4,
            &dy,
            &vars,
            &mut |s, p| seen.push((s, p[0])),
        )
        .unwrap();
        assert_eq!(seen.len(), 5);
        assert_eq!(seen[0], (0, 0.0));
        assert_eq!(seen[4].0, 4);
        assert!((seen[4].1 - 2.0).abs() < 1e-12);
    }

    #[test]
    fn unbound_variable_fails() {
        let (dy, vars) = dynamics(&[("x", "y + 1")]);
        let err = simulate_for(1.0, &HyperPoint::from_vec(vec![0.0]), 1, &dy, &vars, &mut |_, _| {})
            .unwrap_err();
        assert!(err.to_string().contains("could not simplify"), "{err}");
    }

    #[test]
    fn missing_dynamics_are_rejected() {
        let (dy, _) = dynamics(&[("x", "1")]);
        assert!(Simulator::new(&dy, &["x".into(), "y".into()]).is_err());
    }

    #[test]
    fn reset_uses_interval_middle() {
        let vars = vec!["x".to_string(), "y".to_string()];
        let mut reset = ResetMap::new();
        reset.insert(
            "x".into(),
            hyexpr::ExpressionInterval::with_interval(parse_value("y").unwrap(), Interval::new(0.0, 2.0)),
        );
        let p = process_reset(&HyperPoint::from_vec(vec![5.0, 3.0]), &reset, &vars).unwrap();
        assert_eq!(p.as_slice(), &[4.0, 3.0]);
    }

    #[test]
    fn corners_skip_flat_dimensions() {
        let rect = HyperRectangle::new(vec![
            Interval::new(0.0, 1.0),
            Interval::point(5.0),
            Interval::new(-1.0, 1.0),
        ]);
        let corners = rect.corners();
        assert_eq!(corners.len(), 4);
        assert!(corners.iter().all(|p| p[1] == 5.0));
        assert_eq!(corners[3].as_slice(), &[1.0, 5.0, 1.0]);

        let star = rect.star_points();
        assert_eq!(star.len(), 5);
        assert!(star.iter().all(|p| rect.contains(p)));
    }

    #[test]
    fn box_expression_skips_dimension() {
        let rect = HyperRectangle::new(vec![Interval::new(0.0, 1.0), Interval::new(2.0, 3.0)]);
        let e = rect.to_expression(&["x".into(), "t".into()], Some(1));
        assert_eq!(e.to_string(), "x >= 0.0 & x <= 1.0");
        let bloated = rect.bloat_additive(0.5);
        assert!(bloated.contains_rect(&rect));
        assert!(!rect.contains_rect(&bloated));
    }
}
