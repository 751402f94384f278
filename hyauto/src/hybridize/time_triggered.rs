//! Time-triggered hybridization: one mode per fixed-size time window along a simulated
//! trajectory.

use std::collections::BTreeMap;
use std::sync::Arc;

use hyexpr::Expression;
use log::{debug, info};

use super::{
    Approximation, default_bridge, expression_invariants_intersection, face_guards, hybridize_flows,
    initial_box, sink_mode, single_mode,
};
use crate::analysis::variable_ranges;
use crate::bridge::SharedBridge;
use crate::ir::{AutomatonMode, AutomatonTransition, BaseComponent, Configuration};
use crate::magic::{ERROR_MODE_NAME, MICRO_STEPS_PER_WINDOW, TIME_TRIGGER_VARIABLE};
use crate::passes::TransformationPass;
use crate::sim::{HyperPoint, HyperRectangle, Simulator, center_dynamics};
use crate::utils::conf::split_top_level;
use crate::utils::error::{HyError, HyResult};

const PASS: &str = "Hybridize Time-Triggered Pass";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeTriggerParams {
    /// Length of each time window.
    pub step: f64,
    pub max_time: f64,
    /// Additive bloating of every simulated box.
    pub epsilon: f64,
    pub add_forbidden: bool,
}

impl TimeTriggerParams {
    /// `step,maxtime,epsilon(,noforbidden)`
    pub fn parse(params: &str) -> HyResult<Self> {
        let invalid = |message: String| HyError::invalid_parameter(PASS, message);
        let parts: Vec<&str> = split_top_level(params, ',')
            .into_iter()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();

        let (numbers, flag) = match parts.as_slice() {
            [a, b, c] => ([*a, *b, *c], None),
            [a, b, c, d] => ([*a, *b, *c], Some(*d)),
            _ => {
                return Err(invalid(format!(
                    "expected 'step,maxtime,epsilon(,noforbidden)', got '{params}'"
                )));
            }
        };
        let [step, max_time, epsilon] = numbers.map(|text| {
            text.parse::<f64>()
                .map_err(|_| invalid(format!("expected a number, got '{text}'")))
        });
        let (step, max_time, epsilon) = (step?, max_time?, epsilon?);

        if !(step > 0.0) || !(max_time > 0.0) {
            return Err(invalid("step and maxtime must be positive".to_string()));
        }
        if !(epsilon >= 0.0) {
            return Err(invalid("epsilon must be non-negative".to_string()));
        }
        let add_forbidden = match flag {
            None => true,
            Some(f) if f.eq_ignore_ascii_case("noforbidden") => false,
            Some(other) => return Err(invalid(format!("unknown flag '{other}'"))),
        };

        Ok(Self {
            step,
            max_time,
            epsilon,
            add_forbidden,
        })
    }
}

/// A variable with flow exactly `1` which starts at exactly `0`.
fn find_time_variable(mode: &AutomatonMode, init: &Expression, vars: &[String]) -> Option<String> {
    let ranges = variable_ranges(init).ok()?;
    vars.iter()
        .find(|v| {
            let unit_rate = mode
                .flow(v)
                .is_some_and(|f| f.interval.is_none() && f.expression.as_number() == Some(1.0));
            let starts_at_zero = ranges.get(*v).is_some_and(|r| r.min == 0.0 && r.max == 0.0);
            unit_rate && starts_at_zero
        })
        .cloned()
}

/// One simulated time window.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    pub start: f64,
    pub end: f64,
    /// Bounding box of every simulated point of the window, bloated.
    pub rect: HyperRectangle,
}

/// Simulate from `start` and cut the trajectory into windows of `params.step`. The last
/// window may be shorter.
pub fn simulate_windows(
    sim: &Simulator,
    start: HyperPoint,
    params: &TimeTriggerParams,
) -> HyResult<Vec<Window>> {
    let micro = params.step / MICRO_STEPS_PER_WINDOW as f64;
    let num_steps = ((params.max_time / micro).round() as usize).max(1);

    let mut point = start;
    let mut points = vec![point.clone()];
    let mut windows = Vec::new();
    let mut window_start = 0.0;

    for s in 1..=num_steps {
        sim.step(&mut point, micro)?;
        points.push(point.clone());

        if s % MICRO_STEPS_PER_WINDOW == 0 || s == num_steps {
            let end = s as f64 * params.step / MICRO_STEPS_PER_WINDOW as f64;
            let rect = HyperRectangle::bounding_box(&points)
                .ok_or_else(|| HyError::Simulation("empty time window".to_string()))?
                .bloat_additive(params.epsilon);
            debug!("window [{window_start}, {end}]: {rect}");
            windows.push(Window {
                start: window_start,
                end,
                rect,
            });
            window_start = end;
            points = vec![point.clone()];
        }
    }
    Ok(windows)
}

/// Replace the single mode by one mode per time window of a simulated trajectory. Leaving
/// a window's box leads to a shared error mode.
pub struct HybridizeTimeTriggeredPass {
    bridge: Arc<SharedBridge>,
}

impl Default for HybridizeTimeTriggeredPass {
    fn default() -> Self {
        Self {
            bridge: default_bridge(),
        }
    }
}

impl HybridizeTimeTriggeredPass {
    pub fn with_bridge(bridge: Arc<SharedBridge>) -> Self {
        Self { bridge }
    }
}

impl TransformationPass for HybridizeTimeTriggeredPass {
    fn name(&self) -> &'static str {
        PASS
    }

    fn flag(&self) -> &'static str {
        "hybridizett"
    }

    fn param_help(&self) -> &'static str {
        "<step>,<maxtime>,<epsilon>(,noforbidden)"
    }

    fn run(&self, config: &mut Configuration, params: &str) -> HyResult<()> {
        let params = TimeTriggerParams::parse(params)?;
        if config.init.len() != 1 {
            return Err(HyError::precondition(PASS, "expected a single initial mode"));
        }

        let mut vars = config.root.variables.clone();
        let mut init = config.init.values().next().cloned().unwrap_or(Expression::TRUE);
        let mut original = single_mode(config.root.require_base(PASS)?, PASS)?.clone();

        let time_var = match find_time_variable(&original, &init, &vars) {
            Some(v) => v,
            None => {
                info!("no time variable found, adding '{TIME_TRIGGER_VARIABLE}'");
                config.root.add_variable(TIME_TRIGGER_VARIABLE);
                vars.push(TIME_TRIGGER_VARIABLE.to_string());
                original = original.with_flow(TIME_TRIGGER_VARIABLE, Expression::num(1.0));
                init = Expression::and(
                    init,
                    Expression::equal(Expression::var(TIME_TRIGGER_VARIABLE), Expression::num(0.0)),
                );
                TIME_TRIGGER_VARIABLE.to_string()
            }
        };
        let time_index = vars
            .iter()
            .position(|v| *v == time_var)
            .ok_or_else(|| HyError::Unknown(format!("time variable '{time_var}' vanished")))?;

        let init_box = initial_box(&init, &vars)?;
        let dynamics = center_dynamics(original.flow_dynamics.as_ref().ok_or_else(|| {
            HyError::precondition(PASS, format!("mode '{}' has no dynamics", original.name))
        })?);
        let sim = Simulator::new(&dynamics, &vars)?;
        let windows = simulate_windows(&sim, init_box.center(), &params)?;

        let first = &windows[0].rect;
        for (d, var) in vars.iter().enumerate().filter(|(d, _)| *d != time_index) {
            if !first.dims[d].contains_interval(&init_box.dims[d]) {
                return Err(HyError::validation(format!(
                    "initial range {} of '{var}' is not contained in the first mode's range {}. \
                     Consider increasing the bloating term (epsilon).",
                    init_box.dims[d], first.dims[d]
                )));
            }
        }

        let mut hybrid = BaseComponent::new();
        let error_name = format!("{}{ERROR_MODE_NAME}", original.name);
        let error = hybrid.add_mode(sink_mode(&error_name, &vars))?;
        let time = || Expression::var(&time_var);
        let mut jobs = Vec::with_capacity(windows.len());
        let mut previous = None;

        for (k, window) in windows.iter().enumerate() {
            let name = format!("_m_{k}");
            let mut mode = AutomatonMode::new(&name).with_invariant(Expression::and_all([
                original.invariant.clone(),
                window.rect.to_expression(&vars, Some(time_index)),
                Expression::less_equal(time(), Expression::num(window.end)),
            ]));
            mode.flow_dynamics = original.flow_dynamics.clone();
            let id = hybrid.add_mode(mode)?;

            let faces = face_guards(&window.rect, &vars, Some(time_index));
            for face in &faces {
                hybrid.add_transition(AutomatonTransition::new(id, error).with_guard(face.clone()));
            }

            if let Some(prev) = previous {
                let trigger = Expression::equal(time(), Expression::num(window.start));
                hybrid.add_transition(AutomatonTransition::new(prev, id).with_guard(trigger.clone()));
                for face in faces {
                    hybrid.add_transition(
                        AutomatonTransition::new(prev, error).with_guard(Expression::and(trigger.clone(), face)),
                    );
                }
            }

            jobs.push((name, window.rect.clone()));
            previous = Some(id);
        }

        let mut forbidden = BTreeMap::new();
        for e in config.forbidden.values() {
            match expression_invariants_intersection(&hybrid, e, "forbidden states") {
                Ok(map) => forbidden.extend(map.into_iter().filter(|(name, _)| *name != error_name)),
                Err(HyError::UnsupportedCondition { .. }) => {
                    forbidden.extend(jobs.iter().map(|(name, _)| (name.clone(), e.clone())));
                }
                Err(err) => return Err(err),
            }
        }
        if params.add_forbidden {
            forbidden.insert(error_name.clone(), Expression::TRUE);
        }

        hybridize_flows(
            &self.bridge,
            &mut hybrid,
            &jobs,
            &vars,
            Approximation::Affine,
            config.settings.simulation_threads,
        )?;

        *config.root.require_base_mut(PASS)? = hybrid;
        config.init = BTreeMap::from([("_m_0".to_string(), init)]);
        config.forbidden = forbidden;
        config.settings.spaceex.time_triggered = true;
        info!(
            "time-triggered hybridization produced {} modes over [0, {}]",
            windows.len(),
            windows.last().map_or(0.0, |w| w.end)
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passes::run_pass;
    use crate::tests_utils::{debug_box_configuration, debug_configuration};

    #[test]
    fn decay_is_split_into_windows() {
        let mut config = debug_configuration(&[("x", "-x", "1")]);
        run_pass(&HybridizeTimeTriggeredPass::default(), &mut config, "0.5,1,0.1").unwrap();

        assert!(config.root.variables.iter().any(|v| v == TIME_TRIGGER_VARIABLE));
        let base = config.root.as_base().unwrap();
        assert_eq!(base.mode_names(), ["on_error", "_m_0", "_m_1"]);
        assert_eq!(config.init.keys().collect::<Vec<_>>(), ["_m_0"]);
        assert!(config.forbidden.contains_key("on_error"));
        assert!(config.settings.spaceex.time_triggered);

        let trigger = base.find_transition("_m_0", "_m_1").unwrap();
        assert_eq!(trigger.guard.to_string(), "_time_trigger = 0.5");
        // Two faces per mode plus two trigger-time checks.
        assert_eq!(base.transitions.len(), 2 + 2 + 1 + 2);

        let inv = &base.mode_by_name("_m_1").unwrap().invariant;
        let ranges = variable_ranges(inv).unwrap();
        let x = ranges["x"];
        assert!(x.contains((-1.0f64).exp()) && x.contains((-0.5f64).exp()), "{x}");
        assert_eq!(ranges[TIME_TRIGGER_VARIABLE].max, 1.0);
    }

    #[test]
    fn existing_clock_is_reused() {
        let mut config = debug_configuration(&[("t", "1", "0"), ("x", "-x", "1")]);
        run_pass(
            &HybridizeTimeTriggeredPass::default(),
            &mut config,
            "0.25,0.5,0.05,noforbidden",
        )
        .unwrap();

        assert_eq!(config.root.variables, ["t", "x"]);
        assert!(config.forbidden.is_empty());
        let base = config.root.as_base().unwrap();
        assert_eq!(base.find_transition("_m_0", "_m_1").unwrap().guard.to_string(), "t = 0.25");
    }

    #[test]
    fn small_epsilon_must_cover_initial_box() {
        let mut config = debug_box_configuration(&[("x", "-x", 0.5, 1.5)]);
        let err = run_pass(&HybridizeTimeTriggeredPass::default(), &mut config, "0.5,1,0").unwrap_err();
        assert!(err.to_string().contains("epsilon"), "{err}");
    }

    #[test]
    fn parameters_are_checked() {
        assert!(TimeTriggerParams::parse("1,2").unwrap_err().is_invalid_parameter());
        assert!(TimeTriggerParams::parse("0,2,0.1").unwrap_err().is_invalid_parameter());
        assert!(TimeTriggerParams::parse("1,2,0.1,maybe").unwrap_err().is_invalid_parameter());
        assert!(!TimeTriggerParams::parse("1,2,0.1,noforbidden").unwrap().add_forbidden);
    }
}
