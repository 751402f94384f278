//! Transformation passes and the driver that threads their preconditions.
//!
//! A pass declares which precondition checks it skips. Before running it, the driver
//! walks [`PreconditionsFlag::ORDER`] and, for every flag not skipped, either fixes the
//! model by running the corresponding sub-pass or fails with
//! [`HyError::PreconditionFailed`]. After the pass, the model is validated again.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use bitflags::bitflags;
use hyexpr::Operator;
use log::{debug, info};

use crate::bridge::SharedBridge;
use crate::ir::{Component, ComponentKind, Configuration};
use crate::utils::error::{HyError, HyResult};

pub mod basic;
pub mod havoc;
pub mod standard_form;

bitflags! {
    /// Model properties a pass relies on. Flags prefixed `CONVERT_` are fixed
    /// automatically when violated; the others only check.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PreconditionsFlag: u32 {
        const CONVERT_NONDETERMINISTIC_RESETS = 1 << 0;
        const CONVERT_INTERVAL_CONSTANTS = 1 << 1;
        const CONVERT_CONSTANTS_TO_VALUES = 1 << 2;
        const CONVERT_TO_FLAT_AUTOMATON = 1 << 3;
        const CONVERT_ALL_FLOWS_ASSIGNED = 1 << 4;
        const CONVERT_DISJUNCTIVE_INIT_FORBIDDEN = 1 << 5;
        const CONVERT_DISJUNCTIVE_GUARDS = 1 << 6;
        const CONVERT_BASIC_OPERATORS = 1 << 7;
        const NEEDS_ONE_VARIABLE = 1 << 8;
        const NO_NONDETERMINISTIC_DYNAMICS = 1 << 9;
        const NO_URGENT = 1 << 10;
        const ALL_CONSTANTS_DEFINED = 1 << 11;
    }
}

impl PreconditionsFlag {
    /// Order in which checks run.
    pub const ORDER: [PreconditionsFlag; 12] = [
        Self::CONVERT_NONDETERMINISTIC_RESETS,
        Self::CONVERT_INTERVAL_CONSTANTS,
        Self::CONVERT_CONSTANTS_TO_VALUES,
        Self::CONVERT_TO_FLAT_AUTOMATON,
        Self::CONVERT_ALL_FLOWS_ASSIGNED,
        Self::CONVERT_DISJUNCTIVE_INIT_FORBIDDEN,
        Self::CONVERT_DISJUNCTIVE_GUARDS,
        Self::CONVERT_BASIC_OPERATORS,
        Self::NEEDS_ONE_VARIABLE,
        Self::NO_NONDETERMINISTIC_DYNAMICS,
        Self::NO_URGENT,
        Self::ALL_CONSTANTS_DEFINED,
    ];
}

/// A model transformation selected by its command-line flag.
pub trait TransformationPass: Send + Sync {
    /// Human readable name.
    fn name(&self) -> &'static str;

    /// Command-line flag (`flag:params`).
    fn flag(&self) -> &'static str;

    /// One-line description of the parameter string.
    fn param_help(&self) -> &'static str {
        ""
    }

    /// Precondition checks this pass opts out of.
    fn skipped_preconditions(&self) -> PreconditionsFlag {
        PreconditionsFlag::empty()
    }

    fn run(&self, config: &mut Configuration, params: &str) -> HyResult<()>;
}

fn any_component(c: &Component, pred: &dyn Fn(&Component) -> bool) -> bool {
    pred(c)
        || match &c.kind {
            ComponentKind::Network(net) => net.children.iter().any(|ci| any_component(&ci.child, pred)),
            ComponentKind::Base(_) => false,
        }
}

fn has_interval_constants(c: &Component) -> bool {
    any_component(c, &|c| c.constants.values().any(|i| !i.is_point()))
}

fn has_constants(c: &Component) -> bool {
    any_component(c, &|c| !c.constants.is_empty())
}

fn ensure_flat(config: &mut Configuration) -> HyResult<()> {
    if !config.root.is_flat() {
        info!("preconditions check detected a network automaton, flattening");
        crate::flatten::flatten_and_optimize(config)?;
    }
    Ok(())
}

fn has_lut_flows(config: &Configuration) -> bool {
    config.root.as_base().is_some_and(|base| {
        base.modes()
            .flat_map(|(_, m)| m.flow_dynamics.iter().flatten())
            .any(|(_, ei)| ei.expression.find_lut().is_some())
    })
}

/// Check (and where possible fix) every precondition not in `skip`.
pub fn check_preconditions(
    config: &mut Configuration,
    pass: &str,
    skip: PreconditionsFlag,
) -> HyResult<()> {
    debug!("checking preconditions for {pass}");
    let fail = |reason: String| HyError::precondition(pass, reason);

    for flag in PreconditionsFlag::ORDER {
        if skip.contains(flag) {
            continue;
        }

        match flag {
            f if f == PreconditionsFlag::CONVERT_NONDETERMINISTIC_RESETS => {
                basic::convert_nondeterministic_resets(&mut config.root);
            }
            f if f == PreconditionsFlag::CONVERT_INTERVAL_CONSTANTS => {
                if has_interval_constants(&config.root) {
                    info!("preconditions check detected interval-valued constants, converting them to variables");
                    ensure_flat(config)?;
                    basic::convert_interval_constants(config)?;
                }
            }
            f if f == PreconditionsFlag::CONVERT_CONSTANTS_TO_VALUES => {
                if has_constants(&config.root) {
                    ensure_flat(config)?;
                    basic::substitute_constants(config)?;
                }
            }
            f if f == PreconditionsFlag::CONVERT_TO_FLAT_AUTOMATON => ensure_flat(config)?,
            f if f == PreconditionsFlag::CONVERT_ALL_FLOWS_ASSIGNED => {
                if config.root.is_flat() && !config.root.uncovered_flows().is_empty() {
                    info!("some variables have no dynamics, converting havoc flows");
                    havoc::convert_havoc_flows(config)?;
                }
            }
            f if f == PreconditionsFlag::CONVERT_DISJUNCTIVE_INIT_FORBIDDEN => {
                let disjunctive = |map: &BTreeMap<String, hyexpr::Expression>| {
                    map.values().any(|e| e.contains_operator(Operator::Or))
                };
                let (init, forbidden) = (disjunctive(&config.init), disjunctive(&config.forbidden));
                if (init || forbidden) && !config.root.is_flat() {
                    return Err(fail(
                        "init or forbidden states have a disjunction; automatic conversion requires a flat automaton".to_string(),
                    ));
                }
                if init {
                    standard_form::convert_init(config)?;
                }
                if forbidden {
                    standard_form::convert_forbidden(config)?;
                }
            }
            f if f == PreconditionsFlag::CONVERT_DISJUNCTIVE_GUARDS => {
                basic::split_disjunction_guards(&mut config.root);
            }
            f if f == PreconditionsFlag::CONVERT_BASIC_OPERATORS => {
                if has_lut_flows(config) {
                    info!("preconditions check detected look-up tables in flows, converting");
                    crate::lut::convert_lut_flows(config)?;
                }
            }
            f if f == PreconditionsFlag::NEEDS_ONE_VARIABLE => {
                if config.root.all_variables().is_empty() {
                    return Err(fail("at least one continuous variable is required".to_string()));
                }
            }
            f if f == PreconditionsFlag::NO_NONDETERMINISTIC_DYNAMICS => {
                if let Some(base) = config.root.as_base() {
                    if let Some((_, mode)) = base.modes().find(|(_, m)| m.has_nondeterministic_flow()) {
                        return Err(fail(format!(
                            "mode '{}' has nondeterministic dynamics",
                            mode.name
                        )));
                    }
                }
            }
            f if f == PreconditionsFlag::NO_URGENT => {
                if let Some(base) = config.root.as_base() {
                    if let Some((_, mode)) = base.modes().find(|(_, m)| m.urgent) {
                        return Err(fail(format!("mode '{}' is urgent", mode.name)));
                    }
                }
            }
            f if f == PreconditionsFlag::ALL_CONSTANTS_DEFINED => {
                let undefined = config
                    .root
                    .constants
                    .iter()
                    .find(|(_, v)| v.min.is_nan() || v.max.is_nan() || v.is_open());
                if let Some((name, _)) = undefined {
                    return Err(fail(format!("constant '{name}' was not defined")));
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Run `pass` with its precondition checks, then re-validate the model.
pub fn run_pass(pass: &dyn TransformationPass, config: &mut Configuration, params: &str) -> HyResult<()> {
    let start = Instant::now();
    let skip = pass.skipped_preconditions();
    check_preconditions(config, pass.name(), skip)?;

    info!("running pass {} with params '{params}'", pass.name());
    pass.run(config, params)?;

    let validation = if skip.contains(PreconditionsFlag::CONVERT_ALL_FLOWS_ASSIGNED) {
        config.validate_structure()
    } else {
        config.validate()
    };
    validation.map_err(|e| {
        HyError::validation(format!(
            "IR structure was corrupted after running pass {}: {e}",
            pass.name()
        ))
    })?;

    info!(
        "finished pass {} in {} ms",
        pass.name(),
        start.elapsed().as_millis()
    );
    Ok(())
}

/// Passes addressable by command-line flag.
pub struct PassRegistry {
    passes: BTreeMap<&'static str, Box<dyn TransformationPass>>,
}

impl Default for PassRegistry {
    fn default() -> Self {
        Self::with_bridge(crate::hybridize::default_bridge())
    }
}

impl PassRegistry {
    pub fn empty() -> Self {
        Self {
            passes: BTreeMap::new(),
        }
    }

    /// Every built-in pass; the hybridization and LUT passes bound expressions through
    /// `bridge`.
    pub fn with_bridge(bridge: Arc<SharedBridge>) -> Self {
        use crate::hybridize::{grid, mixed, time_triggered};

        let mut registry = Self::empty();
        registry.register(Box::new(basic::FlattenAutomatonPass));
        registry.register(Box::new(basic::RemoveDiscreteUnreachablePass));
        registry.register(Box::new(basic::RemoveSimpleUnsatInvariantsPass));
        registry.register(Box::new(basic::SimplifyExpressionsPass));
        registry.register(Box::new(basic::SubstituteConstantsPass));
        registry.register(Box::new(basic::ConvertIntervalConstantsPass));
        registry.register(Box::new(standard_form::ConvertToStandardFormPass));
        registry.register(Box::new(basic::SplitDisjunctionGuardsPass));
        registry.register(Box::new(basic::AddIdentityResetPass));
        registry.register(Box::new(basic::ShortenModeNamesPass));
        registry.register(Box::new(basic::TimeScalePass));
        registry.register(Box::new(havoc::ConvertHavocFlowsPass));
        registry.register(Box::new(basic::ConvertNondeterministicResetsPass));
        registry.register(Box::new(grid::HybridizeGridPass::with_bridge(bridge.clone())));
        registry.register(Box::new(time_triggered::HybridizeTimeTriggeredPass::with_bridge(bridge.clone())));
        registry.register(Box::new(mixed::HybridizeMixedTriggeredPass::with_bridge(bridge)));
        registry.register(Box::new(crate::lut::ConvertLutFlowsPass));
        registry
    }

    pub fn register(&mut self, pass: Box<dyn TransformationPass>) {
        self.passes.insert(pass.flag(), pass);
    }

    pub fn get(&self, flag: &str) -> Option<&dyn TransformationPass> {
        self.passes.get(flag).map(|p| p.as_ref())
    }

    pub fn flags(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.passes.keys().copied()
    }

    /// Run `flag:params` steps in the given order.
    pub fn run_pipeline<'a>(
        &self,
        config: &mut Configuration,
        steps: impl IntoIterator<Item = &'a str>,
    ) -> HyResult<()> {
        for step in steps {
            let (flag, params) = step.split_once(':').unwrap_or((step, ""));
            let pass = self.get(flag.trim()).ok_or_else(|| {
                HyError::invalid_parameter(flag.trim(), "no pass is registered with this flag")
            })?;
            run_pass(pass, config, params)?;
        }
        Ok(())
    }
}
