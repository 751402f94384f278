//! Contract between the IR and the tool-specific model printers.
//!
//! A printer declares the model features it can express as [`PrinterFeatures`]. Before
//! printing, [`print_model`] validates the configuration and asks [`ModelProperties`]
//! whether the model needs anything outside that set, failing with
//! [`HyError::PreconditionFailed`] instead of emitting a model the tool would reject.

use std::collections::BTreeMap;
use std::fmt::Write;

use bitflags::bitflags;
use enum_map::{Enum, EnumMap};
use hyexpr::{DefaultPrinter, Expression, ExpressionInterval, ExpressionPrinter, Operator};
use log::debug;
use strum::IntoEnumIterator;

use crate::ir::{AutomatonMode, BaseComponent, Configuration};
use crate::utils::conf::PassParams;
use crate::utils::error::{HyError, HyResult};

bitflags! {
    /// Model features a printer is able to express.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PrinterFeatures: u32 {
        const STRICT_INEQUALITIES = 1 << 0;
        const URGENT_MODES = 1 << 1;
        const NONDETERMINISTIC_FLOWS = 1 << 2;
        const NONDETERMINISTIC_RESETS = 1 << 3;
        const NETWORKS = 1 << 4;
        const LUTS = 1 << 5;
        const NONLINEAR_FLOWS = 1 << 6;
        /// Models without any continuous variable.
        const NO_VARIABLES = 1 << 7;
    }
}

/// Shape of the dynamics of a mode, ordered from simplest to most general.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Enum)]
pub enum FlowClass {
    Constant,
    Linear,
    Nonlinear,
}

/// Class of a single right-hand side.
pub fn classify_expression(e: &Expression) -> FlowClass {
    if e.find_lut().is_some() {
        return FlowClass::Nonlinear;
    }
    let vars = e.variables();
    if vars.is_empty() {
        return FlowClass::Constant;
    }

    let linear = vars.iter().all(|v| match e.derivative(v) {
        Ok(d) => d.variables().is_empty() && d.find_lut().is_none(),
        Err(_) => false,
    });
    if linear { FlowClass::Linear } else { FlowClass::Nonlinear }
}

fn classify_mode(mode: &AutomatonMode) -> FlowClass {
    mode.flow_dynamics
        .iter()
        .flatten()
        .map(|(_, ei)| classify_expression(&ei.expression))
        .max()
        .unwrap_or(FlowClass::Constant)
}

fn count_operators(e: &Expression, counts: &mut EnumMap<Operator, usize>) {
    match e {
        Expression::Operation(op, children) => {
            counts[*op] += 1;
            for c in children {
                count_operators(c, counts);
            }
        }
        Expression::Lut(lut) => {
            for input in &lut.inputs {
                count_operators(input, counts);
            }
        }
        _ => {}
    }
}

/// Definitive answers to the feature questions a printer asks about a model.
pub struct ModelProperties<'a> {
    config: &'a Configuration,
}

impl<'a> ModelProperties<'a> {
    pub fn new(config: &'a Configuration) -> Self {
        Self { config }
    }

    fn leaves(&self) -> Vec<&'a BaseComponent> {
        self.config.root.leaves()
    }

    fn modes(&self) -> impl Iterator<Item = &'a AutomatonMode> + '_ {
        self.leaves().into_iter().flat_map(|b| b.modes().map(|(_, m)| m))
    }

    /// Every expression of the model: invariants, flows, guards, resets, init and
    /// forbidden sets.
    pub fn for_each_expression(&self, f: &mut dyn FnMut(&Expression)) {
        for base in self.leaves() {
            for (_, mode) in base.modes() {
                f(&mode.invariant);
                for ei in mode.flow_dynamics.iter().flat_map(|flows| flows.values()) {
                    f(&ei.expression);
                }
            }
            for t in &base.transitions {
                f(&t.guard);
                for ei in t.reset.values() {
                    f(&ei.expression);
                }
            }
        }
        self.config.init.values().chain(self.config.forbidden.values()).for_each(f);
    }

    /// Number of operation nodes per operator across the whole model.
    pub fn operator_counts(&self) -> EnumMap<Operator, usize> {
        let mut counts = EnumMap::default();
        self.for_each_expression(&mut |e| count_operators(e, &mut counts));
        counts
    }

    pub fn uses_operator(&self, op: Operator) -> bool {
        self.operator_counts()[op] > 0
    }

    /// `<` or `>` anywhere in the model.
    pub fn has_strict_inequalities(&self) -> bool {
        let counts = self.operator_counts();
        counts[Operator::Less] + counts[Operator::Greater] > 0
    }

    pub fn has_urgent_modes(&self) -> bool {
        self.modes().any(|m| m.urgent)
    }

    pub fn has_nondeterministic_flows(&self) -> bool {
        self.modes().any(AutomatonMode::has_nondeterministic_flow)
    }

    pub fn has_nondeterministic_resets(&self) -> bool {
        self.leaves()
            .into_iter()
            .flat_map(|b| &b.transitions)
            .any(|t| t.reset.values().any(ExpressionInterval::is_interval))
    }

    pub fn num_variables(&self) -> usize {
        self.config.root.all_variables().len()
    }

    pub fn is_flat(&self) -> bool {
        self.config.root.is_flat()
    }

    pub fn has_luts(&self) -> bool {
        let mut found = false;
        self.for_each_expression(&mut |e| found |= e.find_lut().is_some());
        found
    }

    /// Class of every non-urgent mode, by mode name.
    pub fn classify_flows(&self) -> BTreeMap<String, FlowClass> {
        self.modes()
            .filter(|m| !m.urgent)
            .map(|m| (m.name.clone(), classify_mode(m)))
            .collect()
    }

    pub fn flow_class_counts(&self) -> EnumMap<FlowClass, usize> {
        let mut counts = EnumMap::default();
        for class in self.classify_flows().into_values() {
            counts[class] += 1;
        }
        counts
    }

    /// Features this model needs from a printer.
    pub fn required_features(&self) -> PrinterFeatures {
        let mut required = PrinterFeatures::empty();
        required.set(PrinterFeatures::STRICT_INEQUALITIES, self.has_strict_inequalities());
        required.set(PrinterFeatures::URGENT_MODES, self.has_urgent_modes());
        required.set(PrinterFeatures::NONDETERMINISTIC_FLOWS, self.has_nondeterministic_flows());
        required.set(PrinterFeatures::NONDETERMINISTIC_RESETS, self.has_nondeterministic_resets());
        required.set(PrinterFeatures::NETWORKS, !self.is_flat());
        required.set(PrinterFeatures::LUTS, self.has_luts());
        required.set(
            PrinterFeatures::NONLINEAR_FLOWS,
            self.flow_class_counts()[FlowClass::Nonlinear] > 0,
        );
        required.set(PrinterFeatures::NO_VARIABLES, self.num_variables() == 0);
        required
    }
}

/// A serializer of configurations for one target tool.
pub trait ModelPrinter {
    fn name(&self) -> &'static str;

    fn flag(&self) -> &'static str;

    fn supported_features(&self) -> PrinterFeatures {
        PrinterFeatures::all()
    }

    /// Fail with [`HyError::PreconditionFailed`] if the model needs a feature this printer
    /// cannot express.
    fn check(&self, config: &Configuration) -> HyResult<()> {
        let missing = ModelProperties::new(config).required_features() - self.supported_features();
        if missing.is_empty() {
            return Ok(());
        }
        let names: Vec<&str> = missing.iter_names().map(|(name, _)| name).collect();
        Err(HyError::precondition(
            self.name(),
            format!("model uses unsupported features: {}", names.join(", ")),
        ))
    }

    fn print(&self, config: &Configuration, params: &str) -> HyResult<String>;
}

/// Validate, check and print `config`.
pub fn print_model(printer: &dyn ModelPrinter, config: &Configuration, params: &str) -> HyResult<String> {
    config.validate()?;
    printer.check(config)?;
    debug!("printing model with {} ('{params}')", printer.name());
    printer.print(config, params)
}

/// Plain dump of the IR in the default expression syntax.
///
/// Named parameters override operator spellings by lowercase operator name, e.g.
/// `and=&&,or=||`.
#[derive(Debug, Default)]
pub struct DebugPrinter;

impl DebugPrinter {
    fn expression_printer(&self, params: &str) -> HyResult<DefaultPrinter> {
        let params = PassParams::parse(params);
        if let Some(p) = params.positional.first() {
            return Err(HyError::invalid_parameter(self.name(), format!("unexpected value `{p}`")));
        }

        let mut printer = DefaultPrinter::default();
        for (key, spelling) in &params.named {
            let op = Operator::iter()
                .find(|op| <&str>::from(*op).eq_ignore_ascii_case(key))
                .ok_or_else(|| HyError::invalid_parameter(self.name(), format!("unknown operator `{key}`")))?;
            printer = printer.with_operator_name(op, spelling.clone());
        }
        Ok(printer)
    }
}

fn print_ei(p: &dyn ExpressionPrinter, ei: &ExpressionInterval) -> String {
    match &ei.interval {
        Some(i) => format!("{} + {}", p.print(&ei.expression), p.print_interval(i)),
        None => p.print(&ei.expression),
    }
}

impl ModelPrinter for DebugPrinter {
    fn name(&self) -> &'static str {
        "Debug Printer"
    }

    fn flag(&self) -> &'static str {
        "debug"
    }

    fn print(&self, config: &Configuration, params: &str) -> HyResult<String> {
        let p = self.expression_printer(params)?;
        let mut out = String::new();

        // Writing into a String never fails.
        let _ = writeln!(out, "variables: {}", config.root.all_variables().join(", "));
        for (k, base) in config.root.leaves().into_iter().enumerate() {
            let _ = writeln!(out, "automaton {k}:");
            for (_, mode) in base.modes() {
                let _ = writeln!(out, "  mode {}", mode.name);
                let _ = writeln!(out, "    invariant: {}", p.print(&mode.invariant));
                match &mode.flow_dynamics {
                    Some(flows) => {
                        for (var, ei) in flows {
                            let _ = writeln!(out, "    {var}' = {}", print_ei(&p, ei));
                        }
                    }
                    None => {
                        let _ = writeln!(out, "    urgent");
                    }
                }
            }
            for t in &base.transitions {
                let _ = write!(out, "  {} -> {}", base.mode(t.from).name, base.mode(t.to).name);
                if let Some(label) = &t.label {
                    let _ = write!(out, " [{label}]");
                }
                let _ = writeln!(out, ": {}", p.print(&t.guard));
                for (var, ei) in &t.reset {
                    let _ = writeln!(out, "    {var} := {}", print_ei(&p, ei));
                }
            }
        }
        for (mode, e) in &config.init {
            let _ = writeln!(out, "init {mode}: {}", p.print(e));
        }
        for (mode, e) in &config.forbidden {
            let _ = writeln!(out, "forbidden {mode}: {}", p.print(e));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::AutomatonTransition;
    use crate::tests_utils::debug_configuration;
    use hyexpr::parser::{parse_guard, parse_value};

    struct AffineOnly;

    impl ModelPrinter for AffineOnly {
        fn name(&self) -> &'static str {
            "Affine Only"
        }

        fn flag(&self) -> &'static str {
            "affine"
        }

        fn supported_features(&self) -> PrinterFeatures {
            PrinterFeatures::NONDETERMINISTIC_FLOWS | PrinterFeatures::URGENT_MODES
        }

        fn print(&self, _config: &Configuration, _params: &str) -> HyResult<String> {
            Ok(String::new())
        }
    }

    #[test]
    fn flow_classes() {
        let classify = |text: &str| classify_expression(&parse_value(text).unwrap());
        assert_eq!(classify("3 - 1"), FlowClass::Constant);
        assert_eq!(classify("2 * x - y / 4"), FlowClass::Linear);
        assert_eq!(classify("x * y"), FlowClass::Nonlinear);
        assert_eq!(classify("sin(x)"), FlowClass::Nonlinear);
        assert_eq!(classify("lut([t], [1, 2], [0, 1])"), FlowClass::Nonlinear);
    }

    #[test]
    fn properties_of_a_simple_model() {
        let config = debug_configuration(&[("x", "-x", "1"), ("y", "x * y", "0"), ("t", "1", "0")]);
        let props = ModelProperties::new(&config);

        assert_eq!(props.num_variables(), 3);
        assert!(props.is_flat());
        assert!(!props.has_urgent_modes());
        assert!(!props.has_luts());
        assert!(!props.has_strict_inequalities());
        assert!(props.uses_operator(Operator::Multiply));
        assert!(!props.uses_operator(Operator::Sin));
        assert_eq!(props.classify_flows()["on"], FlowClass::Nonlinear);
        assert_eq!(
            props.required_features(),
            PrinterFeatures::NONLINEAR_FLOWS
        );
    }

    #[test]
    fn unsupported_features_are_reported() {
        let mut config = debug_configuration(&[("x", "1", "0")]);
        {
            let base = config.root.as_base_mut().unwrap();
            let on = base.mode_id("on").unwrap();
            base.add_transition(
                AutomatonTransition::new(on, on)
                    .with_guard(parse_guard("x > 1").unwrap())
                    .with_reset("x", ExpressionInterval::parse("0 + [-0.1, 0.1]").unwrap()),
            );
        }
        let props = ModelProperties::new(&config);
        assert!(props.has_strict_inequalities());
        assert!(props.has_nondeterministic_resets());

        let err = print_model(&AffineOnly, &config, "").unwrap_err();
        assert!(err.is_precondition_failed());
        let message = err.to_string();
        assert!(message.contains("STRICT_INEQUALITIES"), "{message}");
        assert!(message.contains("NONDETERMINISTIC_RESETS"), "{message}");
    }

    #[test]
    fn debug_dump_uses_operator_overrides() {
        let mut config = debug_configuration(&[("x", "-x", "1"), ("y", "2", "0")]);
        config.forbidden.insert("on".into(), parse_guard("x >= 2 & y <= 1").unwrap());

        let text = print_model(&DebugPrinter, &config, "and=&&").unwrap();
        assert!(text.starts_with("variables: x, y\n"), "{text}");
        assert!(text.contains("  mode on\n    invariant: true\n"), "{text}");
        assert!(text.contains("    y' = 2.0\n"), "{text}");
        assert!(text.contains("init on: x = 1.0 && y = 0.0\n"), "{text}");
        assert!(text.contains("forbidden on: x >= 2.0 && y <= 1.0\n"), "{text}");

        let err = DebugPrinter.print(&config, "nand=!&").unwrap_err();
        assert!(err.is_invalid_parameter());
    }
}
