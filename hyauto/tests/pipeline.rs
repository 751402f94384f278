use std::collections::BTreeMap;

use hyauto::passes::PassRegistry;
use hyauto::printer::{DebugPrinter, ModelPrinter, print_model};
use hyauto::sim::{HyperPoint, center_dynamics, simulate_for};
use hyauto::tests_utils::debug_configuration;
use hyexpr::Expression;
use hyexpr::parser::parse_value;

#[test]
fn constant_rate_simulation_is_exact() {
    let dynamics: BTreeMap<String, Expression> =
        [("x".to_string(), parse_value("1").unwrap())].into();
    let vars = vec!["x".to_string()];

    for (x0, duration) in [(0.0, 1.0), (-3.5, 2.25), (10.0, 0.1)] {
        let start = HyperPoint::from_vec(vec![x0]);
        let end = simulate_for(duration, &start, 37, &dynamics, &vars, &mut |_, _| {}).unwrap();
        assert!((end[0] - (x0 + duration)).abs() < 1e-9);
    }
}

#[test]
fn scaled_model_simulates_faster() {
    let mut config = debug_configuration(&[("x", "-x", "1"), ("t", "1", "0")]);
    PassRegistry::default()
        .run_pipeline(&mut config, ["scale_time:2;t", "simplify"])
        .unwrap();

    let base = config.root.as_base().unwrap();
    let flows = base.mode_by_name("on").unwrap().flow_dynamics.clone().unwrap();
    let vars = config.root.variables.clone();

    let mut seen = 0;
    let end = simulate_for(
        0.5,
        &HyperPoint::from_vec(vec![1.0, 0.0]),
        100,
        &center_dynamics(&flows),
        &vars,
        &mut |_, _| seen += 1,
    )
    .unwrap();
    assert_eq!(seen, 101);
    assert!((end[0] - (-1.0f64).exp()).abs() < 1e-8);
    assert!((end[1] - 0.5).abs() < 1e-12);
}

#[test]
fn unknown_flags_are_rejected() {
    let mut config = debug_configuration(&[("x", "1", "0")]);
    let err = PassRegistry::default()
        .run_pipeline(&mut config, ["simplify", "frobnicate:1"])
        .unwrap_err();
    assert!(err.is_invalid_parameter());
    assert_eq!(err.exit_code(), 4);
}

#[test]
fn registry_knows_every_pass() {
    let registry = PassRegistry::default();
    let flags: Vec<&str> = registry.flags().collect();
    for flag in ["flatten", "hybridizegrid", "hybridizett", "hybridizemt", "convert_lut", "scale_time"] {
        assert!(flags.contains(&flag), "missing {flag}");
        assert_eq!(registry.get(flag).unwrap().flag(), flag);
    }
}

#[test]
fn pipeline_output_is_printable() {
    let mut config = debug_configuration(&[("x", "x^2", "1.1")]);
    PassRegistry::default()
        .run_pipeline(&mut config, ["hybridizegrid:x,1,2,2,l"])
        .unwrap();

    let text = print_model(&DebugPrinter, &config, "").unwrap();
    assert!(text.contains("  mode _m_0\n"), "{text}");
    assert!(text.contains("  _m_0 -> _m_1: x >= 1.5\n"), "{text}");
    assert!(text.contains("init _m_0: "), "{text}");
    assert_eq!(DebugPrinter.flag(), "debug");
}
