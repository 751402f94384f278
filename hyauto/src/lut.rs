//! Conversion of look-up tables in flows into one mode per table cell.
//!
//! Inside a cell the table is replaced by the n-linear interpolation of the cell's
//! corner values, which is exact for the interpolated table. The converted mode turns
//! into an urgent dispatcher that jumps to the cell matching the current state.

use std::collections::BTreeMap;

use hyexpr::expr::CellIndex;
use hyexpr::{Expression, Lut};
use log::{debug, info, warn};

use crate::ir::{AutomatonMode, AutomatonTransition, BaseComponent, Configuration, ModeId};
use crate::magic::{COEFFICIENT_TOLERANCE, MAX_LUT_CONVERSIONS};
use crate::passes::{PreconditionsFlag, TransformationPass};
use crate::utils::error::{HyError, HyResult};
use crate::utils::workers::map_ordered;

const PASS: &str = "Convert LUT Flows Pass";

/// N-linear interpolation of the table values at the corners of `cell`, expressed over
/// the LUT inputs. Slopes closer to zero than [`COEFFICIENT_TOLERANCE`] are dropped and
/// counted in `dropped`.
pub fn n_linear_interpolation(lut: &Lut, cell: &[usize], dropped: &mut usize) -> Expression {
    fn blend(lut: &Lut, cell: &[usize], index: &mut Vec<usize>, dropped: &mut usize) -> Expression {
        let d = index.len();
        if d == cell.len() {
            return Expression::num(lut.table.get(index).unwrap_or(0.0));
        }

        index.push(cell[d]);
        let lo = blend(lut, cell, index, dropped);
        index.pop();

        let (min, max) = (lut.breakpoint(d, cell[d]), lut.breakpoint(d, cell[d] + 1));
        if max <= min {
            return lo;
        }

        index.push(cell[d] + 1);
        let hi = blend(lut, cell, index, dropped);
        index.pop();

        let slope = match (lo.as_number(), hi.as_number()) {
            (Some(a), Some(b)) if (b - a).abs() < COEFFICIENT_TOLERANCE => {
                if b != a {
                    *dropped += 1;
                }
                return lo;
            }
            (Some(a), Some(b)) => Expression::num(b - a),
            _ => hi - lo.clone(),
        };
        let normalized = (lut.inputs[d].clone() - min) / (max - min);
        lo + slope * normalized
    }

    blend(lut, cell, &mut Vec::with_capacity(cell.len()), dropped).simplify()
}

/// `input >= lower & input <= upper` per dimension. The outer cells are open towards the
/// outside of the table.
pub fn cell_bounds(lut: &Lut, cell: &[usize]) -> Expression {
    Expression::and_all(cell.iter().enumerate().flat_map(|(d, &i)| {
        let input = &lut.inputs[d];
        let last_cell = lut.table.dim_width(d) - 2;
        let lower = (i > 0).then(|| Expression::greater_equal(input.clone(), Expression::num(lut.breakpoint(d, i))));
        let upper = (i < last_cell)
            .then(|| Expression::less_equal(input.clone(), Expression::num(lut.breakpoint(d, i + 1))));
        lower.into_iter().chain(upper)
    }))
}

fn cell_name(mode: &str, cell: &[usize]) -> String {
    cell.iter().fold(mode.to_string(), |name, i| format!("{name}_{i}"))
}

/// First `(mode, variable, lut)` with a table in a flow.
fn find_lut_flow(base: &BaseComponent) -> Option<(ModeId, String, Lut)> {
    base.modes().find_map(|(id, mode)| {
        mode.flow_dynamics.iter().flatten().find_map(|(var, ei)| {
            ei.expression
                .find_lut()
                .map(|lut| (id, var.clone(), lut.clone()))
        })
    })
}

struct Cell {
    mode: AutomatonMode,
    /// Time derivative of each LUT input under the cell's flows.
    input_rates: Vec<Expression>,
    dropped: usize,
}

fn build_cell(original: &AutomatonMode, lut: &Lut, cell: &[usize]) -> HyResult<Cell> {
    let table = Expression::Lut(Box::new(lut.clone()));
    let mut dropped = 0;
    let interpolation = n_linear_interpolation(lut, cell, &mut dropped);

    let mut mode = AutomatonMode::new(cell_name(&original.name, cell))
        .with_invariant(Expression::and(original.invariant.clone(), cell_bounds(lut, cell)));
    mode.flow_dynamics = original.flow_dynamics.as_ref().map(|flows| {
        flows
            .iter()
            .map(|(var, ei)| {
                let mut ei = ei.clone();
                ei.expression = ei.expression.replace(&table, &interpolation).simplify();
                (var.clone(), ei)
            })
            .collect()
    });

    let center = mode.center_dynamics();
    let input_rates = lut
        .inputs
        .iter()
        .map(|input| input.lie_derivative(&center))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Cell {
        mode,
        input_rates,
        dropped,
    })
}

/// Guard for leaving a cell across a breakpoint of `input`, or `None` when the input
/// never moves in that direction.
fn crossing_guard(input: &Expression, breakpoint: f64, rate: &Expression, upwards: bool) -> Option<Expression> {
    let (crossed, moving) = if upwards {
        (
            Expression::greater_equal(input.clone(), Expression::num(breakpoint)),
            Expression::greater_equal(rate.clone(), Expression::num(0.0)),
        )
    } else {
        (
            Expression::less_equal(input.clone(), Expression::num(breakpoint)),
            Expression::less_equal(rate.clone(), Expression::num(0.0)),
        )
    };
    let guard = Expression::and(crossed, moving.simplify()).simplify();
    (!guard.is_false()).then_some(guard)
}

/// Replace `lut` in the flows of mode `id` by its per-cell interpolation. Returns the names
/// of the created modes.
fn convert_flow_in_mode(base: &mut BaseComponent, id: ModeId, var: &str, lut: &Lut, threads: usize) -> HyResult<Vec<String>> {
    let original = base.mode(id).clone();
    let cells: Vec<CellIndex> = lut.cells().collect();
    let built = map_ordered(threads, &cells, |cell| build_cell(&original, lut, cell))?;

    let dropped: usize = built.iter().map(|c| c.dropped).sum();
    if dropped > 0 {
        warn!(
            "dropped {dropped} near-zero interpolation slopes (|c| < {COEFFICIENT_TOLERANCE}) while converting the table in mode '{}'",
            original.name
        );
    }

    let outgoing: Vec<AutomatonTransition>;
    (outgoing, base.transitions) = std::mem::take(&mut base.transitions)
        .into_iter()
        .partition(|t| t.from == id);

    let mut ids = BTreeMap::new();
    let mut names = Vec::with_capacity(built.len());
    for (k, (cell, c)) in cells.iter().zip(&built).enumerate() {
        let cell_id = base.add_mode(c.mode.clone())?;
        base.add_transition(AutomatonTransition::new(id, cell_id).with_guard(c.mode.invariant.clone()));
        ids.insert(cell.clone(), (cell_id, k));
        names.push(c.mode.name.clone());
    }

    for (k, cell) in cells.iter().enumerate() {
        for (d, input) in lut.inputs.iter().enumerate() {
            let mut next = cell.clone();
            next[d] += 1;
            let Some(&(to, n)) = ids.get(&next) else {
                continue;
            };
            let from = ids[cell].0;
            let breakpoint = lut.breakpoint(d, next[d]);

            if let Some(guard) = crossing_guard(input, breakpoint, &built[k].input_rates[d], true) {
                base.add_transition(AutomatonTransition::new(from, to).with_guard(guard));
            }
            if let Some(guard) = crossing_guard(input, breakpoint, &built[n].input_rates[d], false) {
                base.add_transition(AutomatonTransition::new(to, from).with_guard(guard));
            }
        }
    }

    for transition in &outgoing {
        for &(cell_id, _) in ids.values() {
            let mut copy = transition.clone();
            copy.from = cell_id;
            base.add_transition(copy);
        }
    }

    base.mode_mut(id).make_urgent();
    info!(
        "converted the table in the flow of '{var}' in mode '{}' into {} modes",
        original.name,
        names.len()
    );
    Ok(names)
}

/// Convert every table in the flows of the (flat) automaton. Forbidden states of a
/// converted mode carry over to its cells.
pub fn convert_lut_flows(config: &mut Configuration) -> HyResult<()> {
    let threads = config.settings.simulation_threads;
    let base = config.root.require_base_mut(PASS)?;
    let mut conversions = 0;

    while let Some((id, var, lut)) = find_lut_flow(base) {
        conversions += 1;
        if conversions > MAX_LUT_CONVERSIONS {
            return Err(HyError::validation(format!(
                "reached the limit of {MAX_LUT_CONVERSIONS} table conversions per automaton"
            )));
        }

        let mode = base.mode(id).name.clone();
        debug!("converting table with {} inputs in mode '{mode}'", lut.num_inputs());
        let cells = convert_flow_in_mode(base, id, &var, &lut, threads)?;

        if let Some(e) = config.forbidden.get(&mode).cloned() {
            config.forbidden.extend(cells.into_iter().map(|name| (name, e.clone())));
        }
    }
    Ok(())
}

/// Replace look-up tables in flows by piecewise n-linear dynamics.
#[derive(Debug, Default)]
pub struct ConvertLutFlowsPass;

impl TransformationPass for ConvertLutFlowsPass {
    fn name(&self) -> &'static str {
        PASS
    }

    fn flag(&self) -> &'static str {
        "convert_lut"
    }

    fn skipped_preconditions(&self) -> PreconditionsFlag {
        // this pass is the fix for CONVERT_BASIC_OPERATORS
        PreconditionsFlag::CONVERT_BASIC_OPERATORS
            | PreconditionsFlag::CONVERT_TO_FLAT_AUTOMATON
            | PreconditionsFlag::NO_URGENT
    }

    fn run(&self, config: &mut Configuration, _params: &str) -> HyResult<()> {
        convert_lut_flows(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passes::run_pass;
    use crate::tests_utils::debug_configuration;
    use hyexpr::parser::{parse_guard, parse_value};

    fn at(e: &Expression, point: &[(&str, f64)]) -> f64 {
        e.evaluate(&|name| point.iter().find(|(v, _)| *v == name).map(|(_, x)| *x))
            .unwrap()
    }

    fn flow<'a>(base: &'a BaseComponent, mode: &str, var: &str) -> &'a Expression {
        &base.mode_by_name(mode).unwrap().flow(var).unwrap().expression
    }

    #[test]
    fn one_dimensional_table() {
        let mut config = debug_configuration(&[
            ("t", "1", "0"),
            ("y", "lut([t], [1, 2, 1, 2], [0, 10, 30, 40])", "15"),
        ]);
        run_pass(&ConvertLutFlowsPass, &mut config, "").unwrap();

        let base = config.root.as_base().unwrap();
        assert_eq!(base.mode_names(), ["on", "on_0", "on_1", "on_2"]);
        assert!(base.mode_by_name("on").unwrap().urgent);

        let invariants: Vec<String> = ["on_0", "on_1", "on_2"]
            .iter()
            .map(|m| base.mode_by_name(m).unwrap().invariant.to_string())
            .collect();
        assert_eq!(invariants, ["t <= 10.0", "t >= 10.0 & t <= 30.0", "t >= 30.0"]);

        assert_eq!(
            flow(base, "on_0", "y"),
            &parse_value("1 + (t - 0) / 10").unwrap().simplify()
        );
        assert!((at(flow(base, "on_1", "y"), &[("t", 20.0)]) - 1.5).abs() < 1e-12);
        assert!((at(flow(base, "on_2", "y"), &[("t", 35.0)]) - 1.5).abs() < 1e-12);

        // Three dispatch transitions; time only moves forward.
        assert_eq!(base.transitions.len(), 5);
        assert_eq!(base.find_transition("on_0", "on_1").unwrap().guard.to_string(), "t >= 10.0");
        assert!(base.find_transition("on_1", "on_0").is_none());
        assert_eq!(
            base.find_transition("on", "on_1").unwrap().guard,
            base.mode_by_name("on_1").unwrap().invariant
        );
    }

    #[test]
    fn two_dimensional_table() {
        let mut config = debug_configuration(&[
            ("a", "1", "0"),
            ("b", "1", "0"),
            ("y", "lut([a, b], [1, 2, 4 ; 2, 3, 5 ; 3, 5, 10], [0, 1, 3], [0, 10, 30])", "15"),
        ]);
        run_pass(&ConvertLutFlowsPass, &mut config, "").unwrap();

        let base = config.root.as_base().unwrap();
        assert_eq!(base.num_modes(), 5);
        assert_eq!(base.transitions.len(), 4 + 4);
        assert_eq!(
            base.mode_by_name("on_1_1").unwrap().invariant.to_string(),
            "a >= 1.0 & b >= 10.0"
        );

        let expected = parse_value("3 + (a - 1) * 1 + (b - 10) / 20 * (5 + (a - 1) * 2.5 - (3 + (a - 1) * 1))").unwrap();
        let got = flow(base, "on_1_1", "y");
        for (a, b) in [(1.0, 10.0), (3.0, 30.0), (2.0, 20.0), (0.0, 0.0), (32.15, 15.351)] {
            let point = [("a", a), ("b", b)];
            assert!((at(got, &point) - at(&expected, &point)).abs() < 1e-9, "at ({a}, {b})");
        }
    }

    #[test]
    fn decreasing_input_only_moves_down() {
        let mut config = debug_configuration(&[("x", "-1", "2"), ("y", "lut([x], [0, 1, 4], [0, 1, 2])", "0")]);
        run_pass(&ConvertLutFlowsPass, &mut config, "").unwrap();

        let base = config.root.as_base().unwrap();
        assert!(base.find_transition("on_0", "on_1").is_none());
        assert_eq!(base.find_transition("on_1", "on_0").unwrap().guard.to_string(), "x <= 1.0");
    }

    #[test]
    fn outgoing_transitions_move_to_cells() {
        let mut config = debug_configuration(&[
            ("t", "1", "0"),
            ("y", "lut([t], [1, 2, 1], [0, 10, 30])", "0"),
        ]);
        {
            let base = config.root.as_base_mut().unwrap();
            let off = base
                .add_mode(
                    AutomatonMode::new("off")
                        .with_flow("t", Expression::num(1.0))
                        .with_flow("y", Expression::num(0.0)),
                )
                .unwrap();
            let on = base.mode_id("on").unwrap();
            base.add_transition(AutomatonTransition::new(on, off).with_guard(parse_guard("t >= 25").unwrap()));
        }
        config.forbidden.insert("on".into(), parse_guard("y >= 5").unwrap());

        run_pass(&ConvertLutFlowsPass, &mut config, "").unwrap();

        let base = config.root.as_base().unwrap();
        assert!(base.find_transition("on", "off").is_none());
        for cell in ["on_0", "on_1"] {
            assert_eq!(base.find_transition(cell, "off").unwrap().guard.to_string(), "t >= 25.0");
            assert!(config.forbidden.contains_key(cell));
        }
    }

    #[test]
    fn interpolation_drops_flat_slopes() {
        let lut = match parse_value("lut([u], [3, 3, 5], [0, 1, 2])").unwrap() {
            Expression::Lut(lut) => *lut,
            other => panic!("expected a table, got {other}"),
        };
        let mut dropped = 0;
        assert_eq!(n_linear_interpolation(&lut, &[0], &mut dropped), Expression::num(3.0));
        assert_eq!(dropped, 0);
        assert_eq!(
            n_linear_interpolation(&lut, &[1], &mut dropped),
            parse_value("3 + 2 * (u - 1)").unwrap().simplify()
        );
    }
}
