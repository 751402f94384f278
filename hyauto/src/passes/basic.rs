//! Small structural passes, most of which also serve as precondition fixers.

use std::collections::BTreeMap;

use hyexpr::{Expression, ExpressionInterval, Interval};
use log::{debug, info};

use super::{PreconditionsFlag, TransformationPass};
use crate::analysis::{reachable_modes, variable_range};
use crate::ir::{BaseComponent, Component, ComponentKind, Configuration};
use crate::utils::conf::PassParams;
use crate::utils::error::{HyError, HyResult, RangeExtractError};

/// Remove modes not discretely reachable from the initial modes, with their transitions
/// and init/forbidden entries. Returns the number of removed modes.
pub fn remove_unreachable(config: &mut Configuration) -> HyResult<usize> {
    let base = config.root.require_base_mut("remove_unreachable")?;
    let initial: Vec<_> = config
        .init
        .keys()
        .filter_map(|name| base.mode_id(name))
        .collect();
    let reachable = reachable_modes(base, initial);
    let removed = base.retain_modes(|id, _| reachable.contains(id.index()));

    for name in &removed {
        debug!("removing discretely unreachable mode '{name}'");
        config.init.remove(name);
        config.forbidden.remove(name);
    }
    Ok(removed.len())
}

/// Is `invariant` provably empty by per-variable range extraction? Shapes the extractor
/// does not understand never count as empty.
pub fn is_simple_unsat(invariant: &Expression) -> bool {
    if invariant.is_false() {
        return true;
    }
    invariant.variables().iter().any(|var| {
        matches!(
            variable_range(invariant, var),
            Err(RangeExtractError::EmptyRange { .. } | RangeExtractError::ConstantMismatch { .. })
        )
    })
}

/// Remove modes whose invariant is provably empty. Returns the number of removed modes.
pub fn remove_simple_unsat(config: &mut Configuration) -> HyResult<usize> {
    let base = config.root.require_base_mut("remove_unsat")?;
    let removed = base.retain_modes(|_, mode| !is_simple_unsat(&mode.invariant));

    for name in &removed {
        debug!("removing mode '{name}' with an unsatisfiable invariant");
        config.init.remove(name);
        config.forbidden.remove(name);
    }
    Ok(removed.len())
}

fn fresh_name(component: &Component, stem: &str) -> String {
    let taken = |name: &str| {
        component.variables.iter().any(|v| v == name)
            || component.constants.contains_key(name)
            || component.labels.contains(name)
    };
    let mut name = stem.to_string();
    let mut suffix = 2;
    while taken(&name) {
        name = format!("{stem}_{suffix}");
        suffix += 1;
    }
    name
}

/// Replace every reset `x := e + [a, b]` by `x := e + x_interval` with a fresh interval
/// constant `x_interval = [a, b]`, recursively through networks.
pub fn convert_nondeterministic_resets(component: &mut Component) {
    let pending: Vec<(usize, String, Interval)> = match &mut component.kind {
        ComponentKind::Network(net) => {
            for ci in &mut net.children {
                convert_nondeterministic_resets(&mut ci.child);
            }
            return;
        }
        ComponentKind::Base(base) => base
            .transitions
            .iter()
            .enumerate()
            .flat_map(|(i, t)| {
                t.reset
                    .iter()
                    .filter_map(move |(var, value)| value.interval.map(|r| (i, var.clone(), r)))
            })
            .collect(),
    };

    for (index, var, range) in pending {
        let name = fresh_name(component, &format!("{var}_interval"));
        component.constants.insert(name.clone(), range);

        if let Some(value) = component
            .as_base_mut()
            .and_then(|base| base.transitions[index].reset.get_mut(&var))
        {
            debug!("nondeterministic reset of '{var}' now uses constant '{name}' = {range}");
            value.expression = value.expression.clone() + Expression::var(name);
            value.interval = None;
        }
    }
}

/// Turn interval-valued constants of a flat automaton into variables with zero dynamics
/// whose initial value ranges over the interval.
pub fn convert_interval_constants(config: &mut Configuration) -> HyResult<()> {
    let ranges: Vec<(String, Interval)> = config
        .root
        .constants
        .iter()
        .filter(|(_, value)| !value.is_point())
        .map(|(name, value)| (name.clone(), *value))
        .collect();
    if ranges.is_empty() {
        return Ok(());
    }

    config.base("interval_consts")?;
    for (name, _) in &ranges {
        config.root.constants.remove(name);
        config.root.add_variable(name.clone());
    }

    let base = config.base_mut("interval_consts")?;
    for mode in base.modes_mut() {
        if let Some(flows) = &mut mode.flow_dynamics {
            for (name, _) in &ranges {
                flows.insert(name.clone(), Expression::num(0.0).into());
            }
        }
    }

    let bounds = Expression::and_all(ranges.iter().flat_map(|(name, range)| {
        let lower = range
            .min
            .is_finite()
            .then(|| Expression::greater_equal(Expression::var(name.clone()), Expression::num(range.min)));
        let upper = range
            .max
            .is_finite()
            .then(|| Expression::less_equal(Expression::var(name.clone()), Expression::num(range.max)));
        lower.into_iter().chain(upper)
    }));
    for e in config.init.values_mut() {
        *e = Expression::and(e.clone(), bounds.clone());
    }

    info!("converted {} interval constants to variables", ranges.len());
    Ok(())
}

/// Replace named constants of a flat automaton by their values.
pub fn substitute_constants(config: &mut Configuration) -> HyResult<()> {
    const PASS: &str = "sub_constants";
    if let Some((name, value)) = config.root.constants.iter().find(|(_, v)| !v.is_point()) {
        return Err(HyError::precondition(
            PASS,
            format!("constant '{name}' has the interval value {value}"),
        ));
    }

    let values: BTreeMap<String, Expression> = config
        .root
        .constants
        .iter()
        .map(|(name, value)| (name.clone(), Expression::num(value.min)))
        .collect();
    if values.is_empty() {
        return Ok(());
    }

    config.base(PASS)?;
    config.map_expressions(&mut |e| e.substitute_map(&values))?;
    config.root.constants.clear();
    debug!("substituted {} constants", values.len());
    Ok(())
}

fn for_each_base(component: &mut Component, f: &mut impl FnMut(&mut BaseComponent)) {
    match &mut component.kind {
        ComponentKind::Base(base) => f(base),
        ComponentKind::Network(net) => {
            for ci in &mut net.children {
                for_each_base(&mut ci.child, f);
            }
        }
    }
}

/// Split transitions whose guard is a top-level disjunction into one transition per
/// disjunct. Returns the number of transitions added.
pub fn split_disjunction_guards(component: &mut Component) -> usize {
    let mut added = 0;
    for_each_base(component, &mut |base| {
        let before = base.transitions.len();
        base.transitions = std::mem::take(&mut base.transitions)
            .into_iter()
            .flat_map(|t| {
                let parts: Vec<Expression> = t.guard.disjuncts().into_iter().cloned().collect();
                if parts.len() <= 1 {
                    return vec![t];
                }
                parts
                    .into_iter()
                    .map(|guard| {
                        let mut copy = t.clone();
                        copy.guard = guard;
                        copy
                    })
                    .collect()
            })
            .collect();
        added += base.transitions.len() - before;
    });
    added
}

/// Every transition resets the variables it does not mention to themselves.
pub fn add_identity_resets(config: &mut Configuration) -> HyResult<()> {
    let variables = config.root.variables.clone();
    let base = config.base_mut("identity_resets")?;
    for t in &mut base.transitions {
        for var in &variables {
            t.reset
                .entry(var.clone())
                .or_insert_with(|| Expression::var(var.clone()).into());
        }
    }
    Ok(())
}

/// Rename modes to `mode_<i>` in order, remapping init and forbidden.
pub fn shorten_mode_names(config: &mut Configuration) -> HyResult<()> {
    let base = config.base_mut("shorten")?;
    let names: Vec<String> = (0..base.num_modes()).map(|i| format!("mode_{i}")).collect();
    let renaming: BTreeMap<String, String> = base.mode_names().into_iter().zip(names.clone()).collect();
    base.rename_all(names)?;

    for (old, new) in &renaming {
        debug!("shortened mode name to {new} from {old}");
    }
    let remap = |map: &mut BTreeMap<String, Expression>| {
        *map = std::mem::take(map)
            .into_iter()
            .map(|(k, e)| (renaming.get(&k).cloned().unwrap_or(k), e))
            .collect();
    };
    remap(&mut config.init);
    remap(&mut config.forbidden);
    Ok(())
}

/// Multiply every flow (except `ignore`) by `scale`, and divide the time horizon and the
/// sampling time by it.
pub fn scale_time(config: &mut Configuration, scale: f64, ignore: Option<&str>) -> HyResult<()> {
    if scale <= 0.0 || !scale.is_finite() {
        return Err(HyError::invalid_parameter(
            "scale_time",
            format!("rescale factor must be positive: {scale}"),
        ));
    }

    let base = config.base_mut("scale_time")?;
    for mode in base.modes_mut() {
        for (var, flow) in mode.flow_dynamics.iter_mut().flatten() {
            if Some(var.as_str()) == ignore {
                continue;
            }
            *flow = ExpressionInterval {
                expression: flow.expression.clone() * scale,
                interval: flow.interval.map(|i| i.scale(scale)),
            };
        }
    }

    config.settings.spaceex.time_horizon /= scale;
    config.settings.spaceex.sampling_time /= scale;
    Ok(())
}

pub struct FlattenAutomatonPass;

impl TransformationPass for FlattenAutomatonPass {
    fn name(&self) -> &'static str {
        "Flatten Automaton Pass"
    }

    fn flag(&self) -> &'static str {
        "flatten"
    }

    fn skipped_preconditions(&self) -> PreconditionsFlag {
        PreconditionsFlag::all()
    }

    fn run(&self, config: &mut Configuration, _params: &str) -> HyResult<()> {
        crate::flatten::flatten_and_optimize(config)
    }
}

pub struct RemoveDiscreteUnreachablePass;

impl TransformationPass for RemoveDiscreteUnreachablePass {
    fn name(&self) -> &'static str {
        "Remove Discrete Unreachable Pass"
    }

    fn flag(&self) -> &'static str {
        "remove_unreachable"
    }

    fn skipped_preconditions(&self) -> PreconditionsFlag {
        PreconditionsFlag::all() - PreconditionsFlag::CONVERT_TO_FLAT_AUTOMATON
    }

    fn run(&self, config: &mut Configuration, _params: &str) -> HyResult<()> {
        let removed = remove_unreachable(config)?;
        info!("removed {removed} discretely unreachable modes");
        Ok(())
    }
}

pub struct RemoveSimpleUnsatInvariantsPass;

impl TransformationPass for RemoveSimpleUnsatInvariantsPass {
    fn name(&self) -> &'static str {
        "Remove Unsatisfiable Modes Pass"
    }

    fn flag(&self) -> &'static str {
        "remove_unsat"
    }

    fn run(&self, config: &mut Configuration, _params: &str) -> HyResult<()> {
        let removed = remove_simple_unsat(config)?;
        info!("removed {removed} modes with unsatisfiable invariants");
        Ok(())
    }
}

pub struct SimplifyExpressionsPass;

impl TransformationPass for SimplifyExpressionsPass {
    fn name(&self) -> &'static str {
        "Simplify Expressions Pass"
    }

    fn flag(&self) -> &'static str {
        "simplify"
    }

    fn skipped_preconditions(&self) -> PreconditionsFlag {
        PreconditionsFlag::all()
    }

    fn run(&self, config: &mut Configuration, _params: &str) -> HyResult<()> {
        let mut simplify = |e: &Expression| e.simplify();
        config.map_init_forbidden(&mut simplify);
        for_each_base(&mut config.root, &mut |base| base.map_expressions(&mut simplify));
        Ok(())
    }
}

pub struct SubstituteConstantsPass;

impl TransformationPass for SubstituteConstantsPass {
    fn name(&self) -> &'static str {
        "Substitute Named Constants for Values Pass"
    }

    fn flag(&self) -> &'static str {
        "sub_constants"
    }

    fn skipped_preconditions(&self) -> PreconditionsFlag {
        PreconditionsFlag::all()
            - PreconditionsFlag::CONVERT_INTERVAL_CONSTANTS
            - PreconditionsFlag::CONVERT_TO_FLAT_AUTOMATON
    }

    fn run(&self, config: &mut Configuration, _params: &str) -> HyResult<()> {
        substitute_constants(config)
    }
}

pub struct ConvertIntervalConstantsPass;

impl TransformationPass for ConvertIntervalConstantsPass {
    fn name(&self) -> &'static str {
        "Convert Interval Constants to Variables Pass"
    }

    fn flag(&self) -> &'static str {
        "interval_consts"
    }

    fn skipped_preconditions(&self) -> PreconditionsFlag {
        PreconditionsFlag::all() - PreconditionsFlag::CONVERT_TO_FLAT_AUTOMATON
    }

    fn run(&self, config: &mut Configuration, _params: &str) -> HyResult<()> {
        convert_interval_constants(config)
    }
}

pub struct SplitDisjunctionGuardsPass;

impl TransformationPass for SplitDisjunctionGuardsPass {
    fn name(&self) -> &'static str {
        "Split Guards with Disjunctions"
    }

    fn flag(&self) -> &'static str {
        "split_disjunctions"
    }

    fn param_help(&self) -> &'static str {
        "if the param 'print' is given, the number of split transitions is logged at info level"
    }

    fn skipped_preconditions(&self) -> PreconditionsFlag {
        PreconditionsFlag::CONVERT_DISJUNCTIVE_GUARDS
    }

    fn run(&self, config: &mut Configuration, params: &str) -> HyResult<()> {
        let added = split_disjunction_guards(&mut config.root);
        if PassParams::parse(params).has("print") {
            info!("split disjunctive guards into {added} additional transitions");
        } else {
            debug!("split disjunctive guards into {added} additional transitions");
        }
        Ok(())
    }
}

pub struct AddIdentityResetPass;

impl TransformationPass for AddIdentityResetPass {
    fn name(&self) -> &'static str {
        "Add Identity Resets Pass"
    }

    fn flag(&self) -> &'static str {
        "identity_resets"
    }

    fn run(&self, config: &mut Configuration, _params: &str) -> HyResult<()> {
        add_identity_resets(config)
    }
}

pub struct ShortenModeNamesPass;

impl TransformationPass for ShortenModeNamesPass {
    fn name(&self) -> &'static str {
        "Shorten Mode Names Pass"
    }

    fn flag(&self) -> &'static str {
        "shorten"
    }

    fn run(&self, config: &mut Configuration, _params: &str) -> HyResult<()> {
        shorten_mode_names(config)
    }
}

pub struct TimeScalePass;

impl TransformationPass for TimeScalePass {
    fn name(&self) -> &'static str {
        "Scale Time Pass"
    }

    fn flag(&self) -> &'static str {
        "scale_time"
    }

    fn param_help(&self) -> &'static str {
        "multiplier(;ignorevar)"
    }

    fn run(&self, config: &mut Configuration, params: &str) -> HyResult<()> {
        let parts: Vec<&str> = params.split(';').map(str::trim).collect();
        let (scale, ignore) = match parts.as_slice() {
            [scale] => (*scale, None),
            [scale, ignore] => (*scale, Some(*ignore)),
            _ => {
                return Err(HyError::invalid_parameter(
                    self.flag(),
                    "expecting two params: scale and variable to ignore when rescaling",
                ));
            }
        };
        let scale = scale.parse::<f64>().map_err(|e| {
            HyError::invalid_parameter(self.flag(), format!("error parsing rescale factor: {e}"))
        })?;
        scale_time(config, scale, ignore)
    }
}

pub struct ConvertNondeterministicResetsPass;

impl TransformationPass for ConvertNondeterministicResetsPass {
    fn name(&self) -> &'static str {
        "Convert Nondeterministic Resets Pass"
    }

    fn flag(&self) -> &'static str {
        "nondet_resets"
    }

    fn skipped_preconditions(&self) -> PreconditionsFlag {
        PreconditionsFlag::all()
    }

    fn run(&self, config: &mut Configuration, _params: &str) -> HyResult<()> {
        convert_nondeterministic_resets(&mut config.root);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use hyexpr::parser::{parse_invariant, parse_value};

    use super::*;
    use crate::ir::{AutomatonMode, AutomatonTransition};
    use crate::passes::run_pass;

    fn two_modes() -> Configuration {
        let mut root = Component::base();
        root.add_variable("x");
        let base = root.as_base_mut().unwrap();
        let a = base.add_mode(AutomatonMode::new("a").with_flow("x", Expression::num(1.0))).unwrap();
        let b = base.add_mode(AutomatonMode::new("b").with_flow("x", Expression::num(-1.0))).unwrap();
        let c = base.add_mode(AutomatonMode::new("c").with_flow("x", Expression::num(0.0))).unwrap();
        base.add_transition(
            AutomatonTransition::new(a, b).with_guard(parse_value("x >= 5 | x <= -5").unwrap()),
        );
        base.add_transition(AutomatonTransition::new(c, a));

        let mut config = Configuration::new(root);
        config.init.insert("a".into(), parse_value("x = 0").unwrap());
        config.assign_plot_variables();
        config
    }

    #[test]
    fn unreachable_modes_are_removed() {
        let mut config = two_modes();
        config.forbidden.insert("c".into(), Expression::TRUE);
        assert_eq!(remove_unreachable(&mut config).unwrap(), 1);

        let base = config.base("test").unwrap();
        assert_eq!(base.mode_names(), vec!["a", "b"]);
        assert_eq!(base.transitions.len(), 1);
        assert!(config.forbidden.is_empty());
    }

    #[test]
    fn only_provably_empty_invariants_are_unsat() {
        assert!(is_simple_unsat(&parse_invariant("x >= 2 & x <= 1").unwrap()));
        assert!(is_simple_unsat(&parse_invariant("x = 1 & x = 2").unwrap()));
        assert!(is_simple_unsat(&Expression::FALSE));
        assert!(!is_simple_unsat(&parse_invariant("x >= 1 & x <= 2").unwrap()));
        // Not understood, so not pruned.
        assert!(!is_simple_unsat(&parse_invariant("x * x <= -1").unwrap()));
    }

    #[test]
    fn disjunctive_guards_are_split() {
        let mut config = two_modes();
        assert_eq!(split_disjunction_guards(&mut config.root), 1);
        let base = config.base("test").unwrap();
        let guards: Vec<String> = base
            .transitions
            .iter()
            .filter(|t| base.mode(t.to).name == "b")
            .map(|t| t.guard.to_string())
            .collect();
        assert_eq!(guards, vec!["x >= 5.0", "x <= -5.0"]);
    }

    #[test]
    fn nondeterministic_reset_becomes_interval_constant() {
        let mut config = two_modes();
        config.base_mut("test").unwrap().transitions[1]
            .reset
            .insert("x".into(), ExpressionInterval::with_interval(Expression::num(0.0), Interval::new(1.0, 2.0)));

        convert_nondeterministic_resets(&mut config.root);
        assert_eq!(config.root.constants["x_interval"], Interval::new(1.0, 2.0));

        convert_interval_constants(&mut config).unwrap();
        assert!(config.root.variables.contains(&"x_interval".to_string()));
        let a = config.base("test").unwrap().mode_by_name("a").unwrap();
        assert_eq!(a.flow("x_interval").unwrap().expression, Expression::num(0.0));
        assert!(config.init["a"].contains_variable("x_interval"));
        config.validate().unwrap();
    }

    #[test]
    fn constants_are_substituted() {
        let mut config = two_modes();
        config.root.constants.insert("k".into(), Interval::point(3.0));
        config
            .base_mut("test")
            .unwrap()
            .mode_mut(crate::ir::ModeId(0))
            .invariant = parse_invariant("x <= k").unwrap();

        substitute_constants(&mut config).unwrap();
        assert!(config.root.constants.is_empty());
        let inv = &config.base("test").unwrap().mode(crate::ir::ModeId(0)).invariant;
        assert_eq!(inv.to_string(), "x <= 3.0");
    }

    #[test]
    fn shorten_renames_init() {
        let mut config = two_modes();
        shorten_mode_names(&mut config).unwrap();
        assert!(config.init.contains_key("mode_0"));
        assert_eq!(config.base("test").unwrap().mode_names(), vec!["mode_0", "mode_1", "mode_2"]);
    }

    #[test]
    fn scale_time_pass_rejects_bad_factor() {
        let mut config = two_modes();
        let err = run_pass(&TimeScalePass, &mut config, "-2").unwrap_err();
        assert!(err.is_invalid_parameter());

        run_pass(&TimeScalePass, &mut config, "2").unwrap();
        let a = config.base("test").unwrap().mode_by_name("a").unwrap();
        assert_eq!(a.flow("x").unwrap().expression.evaluate(&|_| None).unwrap(), 2.0);
        assert_eq!(config.settings.spaceex.time_horizon, 5.0);
    }
}
