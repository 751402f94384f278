//! Havoc flows: a variable with no derivative in a non-urgent mode only obeys the mode's
//! invariant. The conversion turns the invariant range into a nondeterministic reset on
//! entry and gives the variable zero dynamics.

use std::collections::BTreeSet;

use hyexpr::{Expression, ExpressionInterval, Interval};
use log::{debug, info};

use super::{PreconditionsFlag, TransformationPass};
use crate::analysis::variable_range;
use crate::ir::{AutomatonMode, Configuration, ModeId};
use crate::utils::error::{HyError, HyResult, RangeExtractError};

const PASS: &str = "havoc_flows";

enum HavocAction {
    /// Mode whose invariant is empty; removed.
    Remove(ModeId),
    /// Havoc variable constrained to a closed range in the mode.
    Range(ModeId, String, Interval),
}

fn used_in_flow(mode: &AutomatonMode, var: &str) -> bool {
    mode.flow_dynamics
        .iter()
        .flatten()
        .any(|(_, ei)| ei.expression.contains_variable(var))
}

/// Drop the comparisons of `e` that have `var` directly as one side.
fn remove_condition_with_variable(e: &Expression, var: &str) -> Expression {
    Expression::and_all(
        e.conjuncts()
            .into_iter()
            .filter(|c| match c.as_binary() {
                Some((op, left, right)) if op.is_comparison() => {
                    left.as_variable() != Some(var) && right.as_variable() != Some(var)
                }
                _ => true,
            })
            .cloned(),
    )
}

fn plan(config: &Configuration) -> HyResult<(BTreeSet<String>, Vec<HavocAction>)> {
    let base = config.base(PASS)?;
    let mut havoc = BTreeSet::new();
    let mut actions = Vec::new();

    for (id, mode) in base.modes() {
        if mode.urgent {
            continue;
        }
        for var in &config.root.variables {
            if mode.flow(var).is_some() {
                continue;
            }
            havoc.insert(var.clone());

            let range = match variable_range(&mode.invariant, var) {
                Ok(range) => range,
                Err(RangeExtractError::EmptyRange { .. }) => {
                    debug!("removing mode with unsatisfiable havoc range: {} for havoc variable {var}", mode.name);
                    actions.push(HavocAction::Remove(id));
                    break;
                }
                Err(RangeExtractError::ConstantMismatch { .. }) => {
                    debug!(
                        "removing mode '{}', because of unsatisfiable constants in invariant: {}",
                        mode.name, mode.invariant
                    );
                    actions.push(HavocAction::Remove(id));
                    break;
                }
                Err(e @ RangeExtractError::Unsupported { .. }) => {
                    return Err(HyError::UnsupportedCondition {
                        expression: mode.invariant.to_string(),
                        message: format!("havoc dynamics can only have interval nondeterminism: {e}"),
                    });
                }
            };

            match range {
                Some(range) if !range.is_open() => {
                    actions.push(HavocAction::Range(id, var.clone(), range));
                }
                other => {
                    if used_in_flow(mode, var) {
                        return Err(HyError::precondition(
                            PASS,
                            format!(
                                "havoc flow variable {var} must have a closed interval range defined by the invariant of mode '{}', range = {}",
                                mode.name,
                                other.map(|r| r.to_string()).unwrap_or_else(|| "none".into())
                            ),
                        ));
                    }
                }
            }
        }
    }
    Ok((havoc, actions))
}

fn add_range_to_init(config: &mut Configuration, mode: &str, var: &str, range: Interval) -> HyResult<()> {
    let Some(init) = config.init.get_mut(mode) else {
        return Ok(());
    };
    if init.contains_variable(var) {
        return Err(HyError::precondition(
            PASS,
            format!("initial states contain reference to havoc var: {var}"),
        ));
    }
    let v = Expression::var(var);
    *init = Expression::and(
        Expression::and(init.clone(), Expression::greater_equal(v.clone(), Expression::num(range.min))),
        Expression::less_equal(v, Expression::num(range.max)),
    );
    Ok(())
}

/// Convert every havoc flow of a flat automaton.
pub fn convert_havoc_flows(config: &mut Configuration) -> HyResult<()> {
    let (havoc, actions) = plan(config)?;

    let mut removed = BTreeSet::new();
    for action in &actions {
        match action {
            HavocAction::Remove(id) => {
                removed.insert(*id);
            }
            HavocAction::Range(id, var, range) => {
                let name = config.base(PASS)?.mode(*id).name.clone();
                debug!("converting havoc flow of variable {var} to range {range} in mode {name}");
                add_range_to_init(config, &name, var, *range)?;

                let base = config.base_mut(PASS)?;
                for t in base.transitions.iter_mut().filter(|t| t.to == *id) {
                    let reset = ExpressionInterval::with_interval(Expression::num(0.0), *range);
                    if let Some(current) = t.reset.get(var) {
                        let same = !current.expression.contains_variable(var)
                            && current.expression.as_number() == Some(0.0)
                            && current.interval == Some(*range);
                        if !same {
                            return Err(HyError::Conflict {
                                what: format!("reset of havoc variable '{var}'"),
                                first: current.to_string(),
                                second: reset.to_string(),
                            });
                        }
                    }
                    t.reset.insert(var.clone(), reset);
                }

                let mode = base.mode_mut(*id);
                if let Some(flows) = &mut mode.flow_dynamics {
                    flows.insert(var.clone(), Expression::num(0.0).into());
                }
                mode.invariant = remove_condition_with_variable(&mode.invariant, var);
            }
        }
    }

    if !removed.is_empty() {
        info!("removing {} modes due to unsatisfiable havoc variables", removed.len());
        let names = config
            .root
            .require_base_mut(PASS)?
            .retain_modes(|id, _| !removed.contains(&id));
        for name in &names {
            config.init.remove(name);
            config.forbidden.remove(name);
        }
        super::basic::remove_unreachable(config)?;
    }

    let base = config.base_mut(PASS)?;
    for mode in base.modes_mut() {
        if let Some(flows) = &mut mode.flow_dynamics {
            for var in &havoc {
                flows
                    .entry(var.clone())
                    .or_insert_with(|| Expression::num(0.0).into());
            }
        }
    }

    for var in &havoc {
        for init in config.init.values_mut() {
            if !init.contains_variable(var) {
                *init = Expression::and(
                    init.clone(),
                    Expression::equal(Expression::var(var.clone()), Expression::num(0.0)),
                );
            }
        }
    }

    if let Some((mode, var)) = config.root.uncovered_flows().into_iter().next() {
        return Err(HyError::validation(format!(
            "after converting havoc dynamics, flow wasn't defined for variable '{var}' in mode '{mode}'"
        )));
    }
    Ok(())
}

pub struct ConvertHavocFlowsPass;

impl TransformationPass for ConvertHavocFlowsPass {
    fn name(&self) -> &'static str {
        "Convert Havoc Flows Pass"
    }

    fn flag(&self) -> &'static str {
        "havoc_flows"
    }

    fn skipped_preconditions(&self) -> PreconditionsFlag {
        PreconditionsFlag::all() - PreconditionsFlag::CONVERT_TO_FLAT_AUTOMATON
    }

    fn run(&self, config: &mut Configuration, _params: &str) -> HyResult<()> {
        convert_havoc_flows(config)
    }
}
