use std::sync::Arc;

use hyauto::bridge::{LocalBridge, SharedBridge};
use hyauto::hybridize::grid::HybridizeGridPass;
use hyauto::passes::{PassRegistry, run_pass};
use hyauto::tests_utils::{debug_box_configuration, debug_configuration};
use hyexpr::ExpressionInterval;
use hylog::LogLevel;

fn at(ei: &ExpressionInterval, x: f64) -> (f64, f64) {
    let value = ei
        .expression
        .evaluate(&|name| (name == "x").then_some(x))
        .unwrap();
    let range = ei.interval.map(|i| (i.min, i.max)).unwrap_or((0.0, 0.0));
    (value + range.0, value + range.1)
}

#[test]
fn affine_grid_contains_true_dynamics() {
    let mut config = debug_box_configuration(&[("x", "x^2", 1.0, 1.2)]);
    PassRegistry::default()
        .run_pipeline(&mut config, ["hybridizegrid:x,1,2,1,a"])
        .unwrap();

    let base = config.root.as_base().unwrap();
    let flow = base.mode_by_name("_m_0").unwrap().flow("x").unwrap();
    for x in [1.0, 1.25, 1.5, 1.75, 2.0] {
        let (lo, hi) = at(flow, x);
        let truth = x * x;
        assert!(lo - 1e-9 <= truth && truth <= hi + 1e-9, "{truth} not in [{lo}, {hi}] at x = {x}");
    }
}

#[test]
fn constant_grid_bounds_each_cell() {
    let mut config = debug_box_configuration(&[("x", "x^2", 0.1, 0.4)]);
    PassRegistry::default()
        .run_pipeline(&mut config, ["hybridizegrid:x,0,2,4,l"])
        .unwrap();

    let base = config.root.as_base().unwrap();
    assert_eq!(base.num_modes(), 4);
    for (k, (lo, hi)) in [(0.0, 0.5), (0.5, 1.0), (1.0, 1.5), (1.5, 2.0)].into_iter().enumerate() {
        let flow = base.mode_by_name(&format!("_m_{k}")).unwrap().flow("x").unwrap();
        let range = flow.interval.unwrap();
        assert!(range.min <= lo * lo + 1e-9 && range.max >= hi * hi - 1e-9, "cell {k}: {range}");
    }
    assert_eq!(config.init.keys().collect::<Vec<_>>(), ["_m_0"]);
}

#[test]
fn time_triggered_then_flat_pipeline() {
    let mut config = debug_configuration(&[("x", "-x", "1")]);
    PassRegistry::default()
        .run_pipeline(&mut config, ["hybridizett:0.5,1,0.05", "remove_unreachable"])
        .unwrap();

    let base = config.root.as_base().unwrap();
    assert!(base.mode_by_name("_m_1").is_some());
    assert!(config.settings.spaceex.time_triggered);
    assert_eq!(config.root.variables, ["x", "_time_trigger"]);
}

#[test]
fn sampling_bridge_is_reported_as_unsound() {
    let logs = hylog::capture();
    let bridge = Arc::new(SharedBridge::new(Box::new(LocalBridge::sampling())));
    let mut config = debug_box_configuration(&[("x", "sin(x)", 0.0, 0.5)]);

    run_pass(&HybridizeGridPass::with_bridge(bridge), &mut config, "x,0,1,1,a").unwrap();

    assert!(logs.contains(LogLevel::Warn, "hybridized flows are not sound"));
}
