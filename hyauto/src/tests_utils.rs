use hyexpr::Expression;
use hyexpr::parser::parse_value;

use crate::ir::{AutomatonMode, Component, Configuration};

/// Single-mode configuration from `(variable, flow, initial value)` triples.
///
/// The mode is named `on`, flows and initial values are parsed with the value grammar,
/// and plot variables are assigned.
pub fn debug_configuration(vars: &[(&str, &str, &str)]) -> Configuration {
    let mut root = Component::base();
    let mut mode = AutomatonMode::new("on");
    let mut init = Vec::new();

    for (var, flow, value) in vars {
        root.variables.push(var.to_string());
        let flow = parse_value(flow).unwrap_or_else(|e| panic!("bad flow for {var}: {e}"));
        mode = mode.with_flow(*var, flow);
        let value = parse_value(value).unwrap_or_else(|e| panic!("bad init for {var}: {e}"));
        init.push(Expression::equal(Expression::var(*var), value));
    }

    root.as_base_mut()
        .expect("fresh component is a base")
        .add_mode(mode)
        .expect("mode name is valid");

    let mut config = Configuration::new(root);
    config.init.insert("on".into(), Expression::and_all(init));
    config.assign_plot_variables();
    config
}

/// Single-mode configuration whose initial set is a box: `(variable, flow, min, max)`.
pub fn debug_box_configuration(vars: &[(&str, &str, f64, f64)]) -> Configuration {
    let triples: Vec<(&str, &str, &str)> = vars.iter().map(|(v, f, _, _)| (*v, *f, "0")).collect();
    let mut config = debug_configuration(&triples);
    let init = vars.iter().map(|(v, _, lo, hi)| {
        Expression::and(
            Expression::greater_equal(Expression::var(*v), Expression::num(*lo)),
            Expression::less_equal(Expression::var(*v), Expression::num(*hi)),
        )
    });
    config.init.insert("on".into(), Expression::and_all(init));
    config
}
