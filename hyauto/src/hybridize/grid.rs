//! Hybridization over a regular grid.

use std::collections::BTreeMap;
use std::sync::Arc;

use hyexpr::{Expression, Interval};
use log::{debug, info};

use super::{Approximation, default_bridge, expression_invariants_intersection, hybridize_flows, single_mode};
use crate::bridge::SharedBridge;
use crate::ir::{AutomatonMode, AutomatonTransition, BaseComponent, Configuration};
use crate::passes::TransformationPass;
use crate::sim::HyperRectangle;
use crate::utils::error::{HyError, HyResult};

const PASS: &str = "Hybridize Grid Pass";

/// Parsed `hybridizegrid` parameters. Dimensions follow the order given on the command
/// line, which must list every variable once.
#[derive(Debug, Clone, PartialEq)]
pub struct GridSpec {
    pub vars: Vec<String>,
    pub start: Vec<f64>,
    pub end: Vec<f64>,
    pub partitions: Vec<usize>,
    pub approximation: Approximation,
    pub derivative_guards: bool,
}

impl GridSpec {
    /// `vars..., min,max per var, partitions per var, a|l (, g)`. Pairs may be written as
    /// `(min,max)`.
    pub fn parse(params: &str, variables: &[String]) -> HyResult<Self> {
        let invalid = |message: String| HyError::invalid_parameter(PASS, message);
        let tokens: Vec<&str> = params
            .split(|c: char| c == ',' || c == '(' || c == ')' || c == '[' || c == ']')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect();
        let n = variables.len();

        if tokens.len() != 1 + 4 * n && tokens.len() != 2 + 4 * n {
            return Err(invalid(format!(
                "expected {} or {} comma-separated values for {n} variables, got {}",
                1 + 4 * n,
                2 + 4 * n,
                tokens.len()
            )));
        }

        let mut vars = Vec::with_capacity(n);
        for name in &tokens[..n] {
            if !variables.iter().any(|v| v == name) {
                return Err(invalid(format!("'{name}' is not a variable of the automaton")));
            }
            if vars.iter().any(|v: &String| v == name) {
                return Err(invalid(format!("'{name}' is listed twice")));
            }
            vars.push(name.to_string());
        }

        let number = |text: &str| {
            text.parse::<f64>()
                .map_err(|_| invalid(format!("expected a number, got '{text}'")))
        };
        let mut start = Vec::with_capacity(n);
        let mut end = Vec::with_capacity(n);
        for k in 0..n {
            let (lo, hi) = (number(tokens[n + 2 * k])?, number(tokens[n + 2 * k + 1])?);
            if !(lo < hi) {
                return Err(invalid(format!("empty range [{lo}, {hi}] for '{}'", vars[k])));
            }
            start.push(lo);
            end.push(hi);
        }

        let partitions = tokens[3 * n..4 * n]
            .iter()
            .map(|t| match t.parse::<usize>() {
                Ok(p) if p > 0 => Ok(p),
                _ => Err(invalid(format!("partition count must be a positive integer, got '{t}'"))),
            })
            .collect::<HyResult<Vec<_>>>()?;

        let approximation = match tokens[4 * n] {
            "a" => Approximation::Affine,
            "l" => Approximation::Constant,
            other => return Err(invalid(format!("optimization must be 'a' or 'l', got '{other}'"))),
        };
        let derivative_guards = match tokens.get(4 * n + 1) {
            None => false,
            Some(&"g") => true,
            Some(other) => return Err(invalid(format!("unknown guard flag '{other}'"))),
        };

        Ok(Self {
            vars,
            start,
            end,
            partitions,
            approximation,
            derivative_guards,
        })
    }

    pub fn width(&self, dim: usize) -> f64 {
        (self.end[dim] - self.start[dim]) / self.partitions[dim] as f64
    }

    /// Every cell index, first dimension slowest.
    pub fn cells(&self) -> Vec<Vec<usize>> {
        let mut rv: Vec<Vec<usize>> = vec![Vec::new()];
        for &count in &self.partitions {
            rv = rv
                .into_iter()
                .flat_map(|prefix| {
                    (0..count).map(move |i| {
                        let mut index = prefix.clone();
                        index.push(i);
                        index
                    })
                })
                .collect();
        }
        rv
    }

    pub fn cell_box(&self, index: &[usize]) -> HyperRectangle {
        HyperRectangle::new(
            index
                .iter()
                .enumerate()
                .map(|(d, &i)| {
                    let lo = self.start[d] + self.width(d) * i as f64;
                    let hi = if i + 1 == self.partitions[d] {
                        self.end[d]
                    } else {
                        self.start[d] + self.width(d) * (i + 1) as f64
                    };
                    Interval::new(lo, hi)
                })
                .collect(),
        )
    }

    pub fn mode_name(index: &[usize]) -> String {
        let mut name = String::from("_m");
        for i in index {
            name.push('_');
            name.push_str(&i.to_string());
        }
        name
    }
}

/// Build the grid automaton from `original`. Returns the new component and the
/// `(mode name, cell box)` list in cell order.
fn build_grid(spec: &GridSpec, original: &AutomatonMode) -> HyResult<(BaseComponent, Vec<(String, HyperRectangle)>)> {
    let mut base = BaseComponent::new();
    let cells = spec.cells();
    let mut jobs = Vec::with_capacity(cells.len());

    for index in &cells {
        let rect = spec.cell_box(index);
        let name = GridSpec::mode_name(index);
        let mut mode = AutomatonMode::new(&name)
            .with_invariant(Expression::and(original.invariant.clone(), rect.to_expression(&spec.vars, None)));
        mode.flow_dynamics = original.flow_dynamics.clone();
        base.add_mode(mode)?;
        jobs.push((name, rect));
    }

    for (index, (name, rect)) in cells.iter().zip(&jobs) {
        let from = base.mode_id(name).ok_or_else(|| HyError::Unknown(format!("missing cell {name}")))?;

        for (dim, var) in spec.vars.iter().enumerate() {
            let derivative = if spec.derivative_guards {
                let flow = original.flow(var).ok_or_else(|| {
                    HyError::precondition(PASS, format!("variable '{var}' has no flow"))
                })?;
                Some(flow.as_expression()?.clone())
            } else {
                None
            };

            let neighbor = |offset: isize, guard: Expression, base: &mut BaseComponent| -> HyResult<()> {
                let mut next = index.clone();
                next[dim] = (index[dim] as isize + offset) as usize;
                let to = base
                    .mode_id(&GridSpec::mode_name(&next))
                    .ok_or_else(|| HyError::Unknown(format!("missing neighbor of {name}")))?;
                base.add_transition(AutomatonTransition::new(from, to).with_guard(guard));
                Ok(())
            };

            let range = rect.dims[dim];
            if index[dim] > 0 {
                let mut guard = Expression::less_equal(Expression::var(var), Expression::num(range.min));
                if let Some(d) = &derivative {
                    guard = Expression::and(guard, Expression::less_equal(d.clone(), Expression::num(0.0)));
                }
                neighbor(-1, guard, &mut base)?;
            }
            if index[dim] + 1 < spec.partitions[dim] {
                let mut guard = Expression::greater_equal(Expression::var(var), Expression::num(range.max));
                if let Some(d) = &derivative {
                    guard = Expression::and(guard, Expression::greater_equal(d.clone(), Expression::num(0.0)));
                }
                neighbor(1, guard, &mut base)?;
            }
        }
    }

    Ok((base, jobs))
}

/// Replace the single mode by one mode per grid cell, with affine (`a`) or
/// piecewise-constant (`l`) flows over the cell.
pub struct HybridizeGridPass {
    bridge: Arc<SharedBridge>,
}

impl Default for HybridizeGridPass {
    fn default() -> Self {
        Self {
            bridge: default_bridge(),
        }
    }
}

impl HybridizeGridPass {
    pub fn with_bridge(bridge: Arc<SharedBridge>) -> Self {
        Self { bridge }
    }
}

impl TransformationPass for HybridizeGridPass {
    fn name(&self) -> &'static str {
        PASS
    }

    fn flag(&self) -> &'static str {
        "hybridizegrid"
    }

    fn param_help(&self) -> &'static str {
        "<var_1>,..,<var_n>,<min_1>,<max_1>,..,<min_n>,<max_n>,<parts_1>,..,<parts_n>,a|l(,g)"
    }

    fn run(&self, config: &mut Configuration, params: &str) -> HyResult<()> {
        let spec = GridSpec::parse(params, &config.root.variables)?;
        if config.init.len() != 1 {
            return Err(HyError::precondition(PASS, "expected a single initial mode"));
        }

        let base = config.root.require_base_mut(PASS)?;
        let original = single_mode(base, PASS)?.clone();
        let (mut grid, jobs) = build_grid(&spec, &original)?;
        debug!("grid has {} cells and {} transitions", jobs.len(), grid.transitions.len());

        let init = config.init.values().next().cloned().unwrap_or(Expression::TRUE);
        let new_init = expression_invariants_intersection(&grid, &init, "initial states")?;
        if new_init.is_empty() {
            return Err(HyError::validation(format!(
                "initial states {init} do not intersect the hybridization grid"
            )));
        }

        let mut new_forbidden = BTreeMap::new();
        for e in config.forbidden.values() {
            match expression_invariants_intersection(&grid, e, "forbidden states") {
                Ok(map) => new_forbidden.extend(map),
                Err(HyError::UnsupportedCondition { .. }) => {
                    for name in grid.mode_names() {
                        new_forbidden.insert(name, e.clone());
                    }
                }
                Err(err) => return Err(err),
            }
        }

        hybridize_flows(
            &self.bridge,
            &mut grid,
            &jobs,
            &spec.vars,
            spec.approximation,
            config.settings.simulation_threads,
        )?;

        *base = grid;
        config.init = new_init;
        config.forbidden = new_forbidden;
        info!("hybridized into {} grid modes", jobs.len());
        Ok(())
    }
}
