//! Mixed-triggered hybridization.
//!
//! A set of simulated points is advanced through the state space. Each new mode is either
//! time-triggered (the `_tt` countdown reaches zero after one step) or, every
//! `maxtime / picount`, space-triggered by a pseudo-invariant: a hyperplane orthogonal to
//! the flow at the center point which the whole incoming box lies behind. Every mode has
//! its own error modes for leaving the invariant box and for taking the switching guard
//! outside the next box.

use std::collections::BTreeMap;
use std::sync::Arc;

use hyexpr::{Expression, Operator};
use log::{debug, info};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use super::{
    Approximation, default_bridge, describe_point, expression_invariants_intersection, face_guards,
    hybridize_flows, initial_box, sink_mode, single_mode,
};
use crate::bridge::SharedBridge;
use crate::ir::{AutomatonMode, AutomatonTransition, BaseComponent, Configuration, ModeId};
use crate::magic::{MICRO_STEPS_PER_WINDOW, MIXED_TRIGGER_VARIABLE};
use crate::passes::TransformationPass;
use crate::sim::{HyperPoint, HyperRectangle, Simulator, center_dynamics};
use crate::utils::conf::PassParams;
use crate::utils::error::{HyError, HyResult};

const PASS: &str = "Hybridize Mixed-Triggered Pass";
const TIME_TOLERANCE: f64 = 1e-12;

/// Which points of the initial box are simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationType {
    Center,
    Star,
    Corners,
    StarCorners,
    /// Center plus this many random points on the boundary.
    Random(usize),
}

impl std::str::FromStr for SimulationType {
    type Err = HyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "center" => Ok(Self::Center),
            "star" => Ok(Self::Star),
            "corners" => Ok(Self::Corners),
            "starcorners" => Ok(Self::StarCorners),
            other => other
                .strip_prefix("rand")
                .and_then(|n| n.parse::<usize>().ok())
                .map(Self::Random)
                .ok_or_else(|| HyError::invalid_parameter(PASS, format!("unknown simulation type '{s}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MixedTriggerParams {
    pub step: f64,
    pub max_time: f64,
    pub epsilon: f64,
    /// Number of pseudo-invariant attempts over `max_time`; 0 disables them.
    pub pi_count: usize,
    pub pi_max_time: f64,
    pub sim_type: SimulationType,
    pub add_forbidden: bool,
    pub add_intermediate: bool,
}

impl MixedTriggerParams {
    const KEYS: [&'static str; 8] = [
        "step",
        "maxtime",
        "epsilon",
        "picount",
        "pimaxtime",
        "simtype",
        "addforbidden",
        "addintermediate",
    ];

    pub fn parse(text: &str) -> HyResult<Self> {
        let params = PassParams::parse(text);
        let invalid = |message: String| HyError::invalid_parameter(PASS, message);

        if let Some(p) = params.positional.first() {
            return Err(invalid(format!("expected name=value, got '{p}'")));
        }
        if let Some(key) = params.named.keys().find(|k| !Self::KEYS.contains(&k.as_str())) {
            return Err(invalid(format!("unknown parameter '{key}'")));
        }

        let flag = |key: &str, default: bool| match params.get(key) {
            None => Ok(default),
            Some(v) => v
                .to_lowercase()
                .parse::<bool>()
                .map_err(|_| invalid(format!("`{key}` must be true or false, got `{v}`"))),
        };

        let step = params.require_f64(PASS, "step")?;
        let max_time = params.require_f64(PASS, "maxtime")?;
        let epsilon = params.require_f64(PASS, "epsilon")?;
        if !(step > 0.0) || !(max_time > 0.0) {
            return Err(invalid("step and maxtime must be positive".to_string()));
        }
        if !(epsilon >= 0.0) {
            return Err(invalid("epsilon must be non-negative".to_string()));
        }

        Ok(Self {
            step,
            max_time,
            epsilon,
            pi_count: params.get_usize(PASS, "picount")?.unwrap_or(0),
            pi_max_time: params.get_f64(PASS, "pimaxtime")?.unwrap_or(5.0 * step),
            sim_type: params.get("simtype").map_or(Ok(SimulationType::Center), str::parse)?,
            add_forbidden: flag("addforbidden", true)?,
            add_intermediate: flag("addintermediate", false)?,
        })
    }
}

/// True when the whole of `rect` lies strictly behind the hyperplane through `point`
/// orthogonal to the flow at `point`.
pub fn test_hyper_plane(
    point: &HyperPoint,
    rect: &HyperRectangle,
    dynamics: &BTreeMap<String, Expression>,
    vars: &[String],
) -> HyResult<bool> {
    if point.len() != rect.num_dims() || point.len() != vars.len() {
        return Err(HyError::Simulation(format!(
            "dimension mismatch: point {}, box {}, variables {}",
            point.len(),
            rect.num_dims(),
            vars.len()
        )));
    }
    let sim = Simulator::new(dynamics, vars)?;
    Ok(behind_hyper_plane(&sim.derivative(point)?, point, rect))
}

fn behind_hyper_plane(gradient: &HyperPoint, point: &HyperPoint, rect: &HyperRectangle) -> bool {
    let max: f64 = gradient
        .iter()
        .zip(&rect.dims)
        .map(|(&g, range)| if g < 0.0 { range.min * g } else { range.max * g })
        .sum();
    gradient.dot(point) > max
}

/// `Σ c_i * x_i <op> rhs`, skipping zero coefficients.
fn linear_inequality(vars: &[String], coefficients: &HyperPoint, op: Operator, rhs: f64) -> HyResult<Expression> {
    let sum = vars
        .iter()
        .zip(coefficients.iter())
        .filter(|(_, c)| **c != 0.0)
        .map(|(v, &c)| Expression::num(c) * Expression::var(v))
        .reduce(|a, b| a + b)
        .ok_or_else(|| HyError::Simulation("all coefficients of the pseudo-invariant are zero".to_string()))?;
    Ok(Expression::binary(op, sum, Expression::num(rhs)))
}

fn bounding_box(points: &[HyperPoint]) -> HyResult<HyperRectangle> {
    HyperRectangle::bounding_box(points).ok_or_else(|| HyError::Simulation("no simulation points".to_string()))
}

/// Points of `init_box` to simulate, center first.
fn simulation_start(init_box: &HyperRectangle, sim_type: SimulationType, tt_index: usize) -> Vec<HyperPoint> {
    let center = init_box.center();
    let mut rv = vec![center.clone()];

    if matches!(sim_type, SimulationType::Star | SimulationType::StarCorners) {
        rv.extend(init_box.star_points().into_iter().filter(|p| *p != center));
    }
    if matches!(sim_type, SimulationType::Corners | SimulationType::StarCorners) {
        rv.extend(init_box.corners());
    }
    if let SimulationType::Random(count) = sim_type {
        let mut rng = ChaCha20Rng::seed_from_u64(0);
        let dims = init_box.num_dims();
        for _ in 0..count {
            // A random non-trigger dimension is pinned to one side of the box.
            let mut boundary = rng.random_range(0..dims.saturating_sub(1).max(1));
            if boundary >= tt_index {
                boundary += 1;
            }
            let p = HyperPoint::from_iterator(
                dims,
                init_box.dims.iter().enumerate().map(|(d, range)| {
                    if d == boundary {
                        if rng.random_bool(0.5) { range.max } else { range.min }
                    } else {
                        range.min + rng.random::<f64>() * range.width()
                    }
                }),
            );
            rv.push(p);
        }
    }
    rv
}

/// Construction state: the automaton being built and the simulated points guiding it.
struct Construction<'a> {
    params: &'a MixedTriggerParams,
    vars: &'a [String],
    tt_index: usize,
    original: &'a AutomatonMode,
    sim: Simulator,
    micro_step: f64,

    points: Vec<HyperPoint>,
    base: BaseComponent,
    jobs: Vec<(String, HyperRectangle)>,
    error_modes: Vec<String>,
    /// Guard and source of the transition into the next mode.
    next: Option<(ModeId, Expression)>,
    init: Expression,
}

impl Construction<'_> {
    fn tt(&self) -> Expression {
        Expression::var(MIXED_TRIGGER_VARIABLE)
    }

    fn run(&mut self) -> HyResult<()> {
        let mut elapsed = 0.0;
        let pi_step = self.params.max_time / self.params.pi_count.max(1) as f64;
        let mut pi_next = (self.params.pi_count > 0).then_some(0.0);

        while elapsed + TIME_TOLERANCE < self.params.max_time {
            let sim_box = bounding_box(&self.points)?;
            debug!("simulation box entering mode _m_{}: {sim_box}", self.jobs.len());

            if let Some(next) = pi_next.as_mut().filter(|next| elapsed + TIME_TOLERANCE > **next) {
                *next += pi_step;
                let start_box = sim_box.bloat_additive(self.params.epsilon);
                if self.advance_to_pseudo_invariant(&start_box)? {
                    info!("doing pseudo-invariant step at sim-time {elapsed}");
                    self.step_pseudo_invariant(&start_box)?;
                    continue;
                }
                info!("skipping pseudo-invariant step at sim-time {elapsed}");
            }

            self.step_time_trigger()?;
            elapsed += self.params.step;
        }
        Ok(())
    }

    /// Simulate the center point until the incoming box lies behind its hyperplane.
    fn pi_point(&self, start_box: &HyperRectangle) -> HyResult<Option<HyperPoint>> {
        let mut p = self.points[0].clone();
        let mut t = 0.0;
        while t < self.params.pi_max_time {
            self.sim.step(&mut p, self.micro_step)?;
            if behind_hyper_plane(&self.sim.derivative(&p)?, &p, start_box) {
                debug!("found pseudo-invariant point {}", describe_point(&p, self.vars));
                return Ok(Some(p));
            }
            t += self.micro_step;
        }
        Ok(None)
    }

    /// Move every point onto the pseudo-invariant hyperplane. On failure the points are
    /// left untouched.
    fn advance_to_pseudo_invariant(&mut self, start_box: &HyperRectangle) -> HyResult<bool> {
        let Some(pi_point) = self.pi_point(start_box)? else {
            info!("simulating the center point did not reach a valid pseudo-invariant within pimaxtime");
            return Ok(false);
        };
        let gradient = self.sim.derivative(&pi_point)?;
        let pi_value = gradient.dot(&pi_point);
        let mut advanced = vec![pi_point];

        for start in &self.points[1..] {
            let mut p = start.clone();
            let mut prev_point = p.clone();
            let mut prev_value = gradient.dot(&p);
            if prev_value > pi_value {
                return Err(HyError::Simulation(
                    "simulation point started on the wrong side of the pseudo-invariant hyperplane".to_string(),
                ));
            }

            let mut t = 0.0;
            let crossing = loop {
                if t >= 2.0 * self.params.pi_max_time {
                    break None;
                }
                self.sim.step(&mut p, self.micro_step)?;
                let value = gradient.dot(&p);
                if value >= pi_value {
                    let frac = (pi_value - prev_value) / (value - prev_value);
                    break Some(&prev_point + (&p - &prev_point) * frac);
                }
                prev_value = value;
                prev_point = p.clone();
                t += self.micro_step;
            };

            match crossing {
                Some(point) => advanced.push(point),
                None => {
                    info!(
                        "point {} did not cross the pseudo-invariant within 2*pimaxtime",
                        describe_point(start, self.vars)
                    );
                    return Ok(false);
                }
            }
        }

        self.points = advanced;
        Ok(true)
    }

    fn add_error_mode(&mut self, name: String) -> HyResult<ModeId> {
        let id = self.base.add_mode(sink_mode(&name, self.vars))?;
        self.error_modes.push(name);
        Ok(id)
    }

    /// Add the mode, its box error transitions and the transition from the previous mode.
    fn add_mode(
        &mut self,
        mode: AutomatonMode,
        rect: HyperRectangle,
        start_box: &HyperRectangle,
        kind: &str,
        entry_reset: f64,
    ) -> HyResult<ModeId> {
        let name = mode.name.clone();
        let id = self.base.add_mode(mode)?;

        let inv_error = self.add_error_mode(format!("_error_{kind}_inv{name}"))?;
        for face in face_guards(&rect, self.vars, Some(self.tt_index)) {
            self.base.add_transition(AutomatonTransition::new(id, inv_error).with_guard(face));
        }

        match self.next.take() {
            Some((prev, guard)) => {
                self.base.add_transition(
                    AutomatonTransition::new(prev, id)
                        .with_guard(guard.clone())
                        .with_reset(MIXED_TRIGGER_VARIABLE, Expression::num(entry_reset)),
                );

                let guard_error = self.add_error_mode(format!("_error_{kind}_guard{name}"))?;
                for face in face_guards(start_box, self.vars, Some(self.tt_index)) {
                    self.base.add_transition(
                        AutomatonTransition::new(prev, guard_error).with_guard(Expression::and(guard.clone(), face)),
                    );
                }

                if self.params.add_intermediate {
                    let pre = self.base.add_mode(sink_mode(format!("_pre{name}"), self.vars))?;
                    self.base.add_transition(AutomatonTransition::new(prev, pre).with_guard(guard));
                }
            }
            None => {
                let init = std::mem::replace(&mut self.init, Expression::TRUE);
                self.init = Expression::and(init, Expression::equal(self.tt(), Expression::num(entry_reset)));
            }
        }

        self.jobs.push((name, rect));
        Ok(id)
    }

    fn step_pseudo_invariant(&mut self, start_box: &HyperRectangle) -> HyResult<()> {
        let name = format!("_m_{}", self.jobs.len());
        let end_box = bounding_box(&self.points)?.bloat_additive(self.params.epsilon);
        let rect = start_box.union(&end_box);

        let pi_point = self.points[0].clone();
        let gradient = self.sim.derivative(&pi_point)?;
        let pi_value = gradient.dot(&pi_point);

        let mut mode = AutomatonMode::new(&name).with_invariant(Expression::and_all([
            self.original.invariant.clone(),
            linear_inequality(self.vars, &gradient, Operator::LessEqual, pi_value)?,
            rect.to_expression(self.vars, Some(self.tt_index)),
        ]));
        mode.flow_dynamics = self.original.flow_dynamics.clone();

        let id = self.add_mode(mode, rect, start_box, "pi", 0.0)?;
        self.next = Some((
            id,
            linear_inequality(self.vars, &gradient, Operator::GreaterEqual, pi_value)?,
        ));
        Ok(())
    }

    fn step_time_trigger(&mut self) -> HyResult<()> {
        let name = format!("_m_{}", self.jobs.len());
        let start_box = bounding_box(&self.points)?.bloat_additive(self.params.epsilon);

        for p in &mut self.points {
            for _ in 0..MICRO_STEPS_PER_WINDOW {
                self.sim.step(p, self.micro_step)?;
            }
        }
        let end_box = bounding_box(&self.points)?.bloat_additive(self.params.epsilon);
        let rect = start_box.union(&end_box);

        let mut mode = AutomatonMode::new(&name)
            .with_invariant(Expression::and_all([
                self.original.invariant.clone(),
                Expression::greater_equal(self.tt(), Expression::num(0.0)),
                rect.to_expression(self.vars, Some(self.tt_index)),
            ]))
            .with_flow(MIXED_TRIGGER_VARIABLE, Expression::num(-1.0));
        for (var, flow) in self.original.flow_dynamics.iter().flatten() {
            if var != MIXED_TRIGGER_VARIABLE {
                mode = mode.with_flow(var, flow.clone());
            }
        }

        let id = self.add_mode(mode, rect, &start_box, "tt", self.params.step)?;
        self.next = Some((id, Expression::equal(self.tt(), Expression::num(0.0))));
        Ok(())
    }
}

/// Hybridize the single mode along simulated trajectories, switching modes on a time
/// trigger or on pseudo-invariant hyperplanes.
pub struct HybridizeMixedTriggeredPass {
    bridge: Arc<SharedBridge>,
}

impl Default for HybridizeMixedTriggeredPass {
    fn default() -> Self {
        Self {
            bridge: default_bridge(),
        }
    }
}

impl HybridizeMixedTriggeredPass {
    pub fn with_bridge(bridge: Arc<SharedBridge>) -> Self {
        Self { bridge }
    }
}

impl TransformationPass for HybridizeMixedTriggeredPass {
    fn name(&self) -> &'static str {
        PASS
    }

    fn flag(&self) -> &'static str {
        "hybridizemt"
    }

    fn param_help(&self) -> &'static str {
        "step=<val>,maxtime=<val>,epsilon=<val>(,picount=#)(,pimaxtime=#)\
         (,simtype=center|star|corners|starcorners|rand#)(,addforbidden=true|false)\
         (,addintermediate=true|false)"
    }

    fn run(&self, config: &mut Configuration, params: &str) -> HyResult<()> {
        let params = MixedTriggerParams::parse(params)?;
        if config.init.len() != 1 {
            return Err(HyError::precondition(PASS, "expected a single initial mode"));
        }

        let init = config.init.values().next().cloned().unwrap_or(Expression::TRUE);
        let original = single_mode(config.root.require_base(PASS)?, PASS)?;
        if original.has_nondeterministic_flow() {
            return Err(HyError::precondition(
                PASS,
                "nondeterministic dynamics cannot be simulated",
            ));
        }
        let original = original.clone().with_flow(MIXED_TRIGGER_VARIABLE, Expression::num(0.0));

        // The countdown starts at zero for the box; its initial value is set by the first mode.
        let init_ranges = initial_box(&init, &config.root.variables)?;
        config.root.add_variable(MIXED_TRIGGER_VARIABLE);
        let vars = config.root.variables.clone();
        let tt_index = vars.len() - 1;
        let mut dims = init_ranges.dims.clone();
        dims.push(hyexpr::Interval::point(0.0));
        let init_box = HyperRectangle::new(dims);

        let points = simulation_start(&init_box, params.sim_type, tt_index);
        let start_box = bounding_box(&points)?.bloat_additive(params.epsilon);
        for (d, var) in vars.iter().enumerate().filter(|(d, _)| *d != tt_index) {
            let (range, outer) = (init_box.dims[d], start_box.dims[d]);
            if range.min <= outer.min || range.max >= outer.max {
                return Err(HyError::validation(format!(
                    "bloated bounding box of the simulations does not contain the initial states \
                     for variable '{var}'. Consider increasing epsilon."
                )));
            }
        }
        info!("simulating from {} initial points", points.len());

        let flows = original.flow_dynamics.as_ref().ok_or_else(|| {
            HyError::precondition(PASS, format!("mode '{}' has no dynamics", original.name))
        })?;
        let sim = Simulator::new(&center_dynamics(flows), &vars)?;

        let start = std::time::Instant::now();
        let mut construction = Construction {
            params: &params,
            vars: &vars,
            tt_index,
            original: &original,
            sim,
            micro_step: params.step / MICRO_STEPS_PER_WINDOW as f64,
            points,
            base: BaseComponent::new(),
            jobs: Vec::new(),
            error_modes: Vec::new(),
            next: None,
            init,
        };
        construction.run()?;
        info!(
            "simulation constructed {} modes in {} ms",
            construction.jobs.len(),
            start.elapsed().as_millis()
        );

        let Construction {
            mut base,
            jobs,
            error_modes,
            init,
            ..
        } = construction;

        let mut forbidden = BTreeMap::new();
        if let Some(e) = config.forbidden.values().next() {
            forbidden = expression_invariants_intersection(&base, e, "forbidden states")?;
            forbidden.retain(|name, _| !error_modes.contains(name) && !name.starts_with("_pre_"));
        }
        if params.add_forbidden {
            forbidden.extend(error_modes.iter().map(|name| (name.clone(), Expression::TRUE)));
        }

        hybridize_flows(
            &self.bridge,
            &mut base,
            &jobs,
            &vars,
            Approximation::Affine,
            config.settings.simulation_threads,
        )?;

        *config.root.require_base_mut(PASS)? = base;
        config.init = BTreeMap::from([("_m_0".to_string(), init)]);
        config.forbidden = forbidden;
        config.settings.spaceex.time_triggered = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passes::run_pass;
    use crate::tests_utils::{debug_box_configuration, debug_configuration};
    use hyexpr::Interval;
    use hyexpr::parser::parse_value;

    fn point(values: &[f64]) -> HyperPoint {
        HyperPoint::from_column_slice(values)
    }

    fn dynamics(items: &[(&str, &str)]) -> BTreeMap<String, Expression> {
        items
            .iter()
            .map(|(v, e)| (v.to_string(), parse_value(e).unwrap()))
            .collect()
    }

    #[test]
    fn hyper_plane_sign_test() {
        let vars = vec!["x".to_string(), "y".to_string()];
        let flows = dynamics(&[("x", "1"), ("y", "0")]);
        let rect = HyperRectangle::new(vec![Interval::new(0.0, 1.0), Interval::new(0.0, 1.0)]);

        // Gradient (1, 0): the box is behind x = 2 but not behind x = 1 (touching corner).
        assert!(test_hyper_plane(&point(&[2.0, 0.5]), &rect, &flows, &vars).unwrap());
        assert!(!test_hyper_plane(&point(&[1.0, 0.5]), &rect, &flows, &vars).unwrap());
        assert!(!test_hyper_plane(&point(&[0.5, 0.5]), &rect, &flows, &vars).unwrap());

        let flows = dynamics(&[("x", "-1"), ("y", "-1")]);
        assert!(test_hyper_plane(&point(&[-0.5, -0.5]), &rect, &flows, &vars).unwrap());
        assert!(!test_hyper_plane(&point(&[0.5, -0.5]), &rect, &flows, &vars).unwrap());
    }

    #[test]
    fn simulation_types() {
        let rect = HyperRectangle::new(vec![Interval::new(0.0, 2.0), Interval::point(0.0)]);
        assert_eq!(simulation_start(&rect, SimulationType::Center, 1), [point(&[1.0, 0.0])]);
        assert_eq!(simulation_start(&rect, SimulationType::Corners, 1).len(), 3);
        assert_eq!(simulation_start(&rect, SimulationType::StarCorners, 1).len(), 5);

        let random = simulation_start(&rect, SimulationType::Random(10), 1);
        assert_eq!(random.len(), 11);
        // Every random point sits on the boundary of the only non-trigger dimension.
        assert!(random[1..].iter().all(|p| p[0] == 0.0 || p[0] == 2.0));
        assert_eq!(random, simulation_start(&rect, SimulationType::Random(10), 1));
    }

    #[test]
    fn time_triggered_steps() {
        let mut config = debug_configuration(&[("x", "-x", "1")]);
        run_pass(
            &HybridizeMixedTriggeredPass::default(),
            &mut config,
            "step=0.5,maxtime=1,epsilon=0.05",
        )
        .unwrap();

        let base = config.root.as_base().unwrap();
        assert_eq!(
            base.mode_names(),
            ["_m_0", "_error_tt_inv_m_0", "_m_1", "_error_tt_inv_m_1", "_error_tt_guard_m_1"]
        );
        let switch = base.find_transition("_m_0", "_m_1").unwrap();
        assert_eq!(switch.guard.to_string(), "_tt = 0.0");
        assert_eq!(switch.reset[MIXED_TRIGGER_VARIABLE].expression.as_number(), Some(0.5));

        let m0 = base.mode_by_name("_m_0").unwrap();
        assert_eq!(m0.flow(MIXED_TRIGGER_VARIABLE).unwrap().expression.as_number(), Some(-1.0));
        assert_eq!(config.init["_m_0"].to_string(), "x = 1.0 & _tt = 0.5");
        assert_eq!(config.forbidden.len(), 3);
        assert!(config.settings.spaceex.time_triggered);
    }

    #[test]
    fn pseudo_invariant_step_is_taken() {
        let mut config = debug_box_configuration(&[("x", "1", 0.0, 0.1), ("y", "0", 0.0, 0.1)]);
        run_pass(
            &HybridizeMixedTriggeredPass::default(),
            &mut config,
            "step=0.1,maxtime=0.2,epsilon=0.01,picount=1,simtype=star,addforbidden=false",
        )
        .unwrap();

        let base = config.root.as_base().unwrap();
        let m0 = base.mode_by_name("_m_0").unwrap();
        assert_eq!(m0.flow(MIXED_TRIGGER_VARIABLE).unwrap().expression.as_number(), Some(0.0));
        assert!(m0.invariant.to_string().contains("1.0 * x <= "), "{}", m0.invariant);
        assert!(base.mode_by_name("_error_pi_inv_m_0").is_some());
        assert!(base.mode_by_name("_error_tt_guard_m_1").is_some());

        let switch = base.find_transition("_m_0", "_m_1").unwrap();
        assert!(switch.guard.to_string().starts_with("1.0 * x >= "), "{}", switch.guard);
        assert!(config.forbidden.is_empty());
        assert!(config.init["_m_0"].to_string().ends_with("_tt = 0.0"));
    }

    #[test]
    fn epsilon_must_cover_initial_box() {
        let mut config = debug_box_configuration(&[("x", "-x", 0.0, 1.0)]);
        let err = run_pass(
            &HybridizeMixedTriggeredPass::default(),
            &mut config,
            "step=0.5,maxtime=1,epsilon=0.1",
        )
        .unwrap_err();
        assert!(err.to_string().contains("Consider increasing epsilon"), "{err}");
    }

    #[test]
    fn parameters_are_checked() {
        let parse = MixedTriggerParams::parse;
        assert!(parse("step=1,maxtime=2").unwrap_err().is_invalid_parameter());
        assert!(parse("step=1,maxtime=2,epsilon=0.1,color=red").unwrap_err().is_invalid_parameter());
        assert!(parse("step=1,maxtime=2,epsilon=0.1,simtype=spiral").unwrap_err().is_invalid_parameter());

        let params = parse("step=1,maxtime=2,epsilon=0.1,simtype=rand7,addintermediate=true").unwrap();
        assert_eq!(params.sim_type, SimulationType::Random(7));
        assert_eq!(params.pi_max_time, 5.0);
        assert!(params.add_intermediate && params.add_forbidden);
    }
}
