use hyauto::ir::Configuration;
use hyauto::passes::{PassRegistry, PreconditionsFlag, TransformationPass, run_pass};
use hyauto::printer::{FlowClass, ModelProperties};
use hyauto::sim::{HyperPoint, Simulator};
use hyauto::tests_utils::debug_configuration;
use hyauto::utils::error::HyResult;

/// Does nothing, but lets the default preconditions run (except the urgent-mode check the
/// table dispatcher would trip).
struct Touch;

impl TransformationPass for Touch {
    fn name(&self) -> &'static str {
        "Touch Pass"
    }

    fn flag(&self) -> &'static str {
        "touch"
    }

    fn skipped_preconditions(&self) -> PreconditionsFlag {
        PreconditionsFlag::NO_URGENT
    }

    fn run(&self, _config: &mut Configuration, _params: &str) -> HyResult<()> {
        Ok(())
    }
}

fn tank() -> Configuration {
    debug_configuration(&[
        ("t", "1", "0"),
        ("v", "lut([t], [0, 4, 4, 0], [0, 1, 2, 3])", "0"),
    ])
}

#[test]
fn preconditions_convert_tables_automatically() {
    let mut config = tank();
    run_pass(&Touch, &mut config, "").unwrap();

    let base = config.root.as_base().unwrap();
    assert_eq!(base.mode_names(), ["on", "on_0", "on_1", "on_2"]);
    assert!(!ModelProperties::new(&config).has_luts());
}

#[test]
fn converted_cells_are_piecewise_linear() {
    let mut config = tank();
    PassRegistry::default()
        .run_pipeline(&mut config, ["convert_lut"])
        .unwrap();

    let props = ModelProperties::new(&config);
    assert!(props.has_urgent_modes());
    let classes = props.classify_flows();
    assert_eq!(classes.len(), 3);
    assert!(classes.values().all(|c| *c == FlowClass::Linear || *c == FlowClass::Constant));
    assert_eq!(classes["on_1"], FlowClass::Constant);
}

#[test]
fn simulation_in_a_cell_matches_the_table() {
    let mut config = tank();
    PassRegistry::default()
        .run_pipeline(&mut config, ["convert_lut"])
        .unwrap();

    // In cell 0 `v' = 4 t`, so v(1) = 2.
    let base = config.root.as_base().unwrap();
    let vars = config.root.variables.clone();
    let sim = Simulator::new(&base.mode_by_name("on_0").unwrap().center_dynamics(), &vars).unwrap();

    let mut point = HyperPoint::from_vec(vec![0.0, 0.0]);
    for _ in 0..100 {
        sim.step(&mut point, 0.01).unwrap();
    }
    assert!((point[0] - 1.0).abs() < 1e-9);
    assert!((point[1] - 2.0).abs() < 1e-9);
}
