//! Standard form: a single urgent `_init` mode and a single `_error` mode.

use hyexpr::Expression;
use log::info;

use super::{PreconditionsFlag, TransformationPass};
use crate::ir::{AutomatonMode, AutomatonTransition, Configuration};
use crate::magic::{ERROR_MODE_NAME, INIT_MODE_NAME};
use crate::utils::error::{HyError, HyResult};

const PASS: &str = "standard_form";

/// Replace the initial states by an urgent `_init` mode with one guarded transition to
/// each former initial mode. Models already in this form are checked and left alone.
pub fn convert_init(config: &mut Configuration) -> HyResult<()> {
    let base = config.root.require_base_mut(PASS)?;

    if config.init.len() == 1 {
        if let Some(condition) = config.init.get(INIT_MODE_NAME) {
            if !condition.is_true() {
                return Err(HyError::validation(format!(
                    "Malformed existing standard form automaton. {INIT_MODE_NAME}'s expression must be true"
                )));
            }
            if !base.mode_by_name(INIT_MODE_NAME).is_some_and(|m| m.urgent) {
                return Err(HyError::validation(format!(
                    "Malformed existing standard form automaton. {INIT_MODE_NAME} must be urgent"
                )));
            }
            return Ok(());
        }
    }

    let init = base.add_mode(AutomatonMode::urgent(INIT_MODE_NAME))?;
    for (name, condition) in std::mem::take(&mut config.init) {
        let target = base.mode_id(&name).ok_or_else(|| {
            HyError::validation(format!("initial mode '{name}' is not in the automaton"))
        })?;
        base.add_transition(AutomatonTransition::new(init, target).with_guard(condition));
    }
    config.init.insert(INIT_MODE_NAME.to_string(), Expression::TRUE);
    Ok(())
}

/// Replace the forbidden states by an `_error` mode (zero dynamics) reached from each
/// former forbidden mode through a transition guarded by its condition.
pub fn convert_forbidden(config: &mut Configuration) -> HyResult<()> {
    let variables = config.root.variables.clone();
    let base = config.root.require_base_mut(PASS)?;

    if config.forbidden.len() == 1 {
        if let Some(condition) = config.forbidden.get(ERROR_MODE_NAME) {
            if !condition.is_true() {
                return Err(HyError::validation(format!(
                    "Malformed existing standard form automaton. {ERROR_MODE_NAME}'s expression must be true"
                )));
            }
            return Ok(());
        }
    }

    let error = variables
        .iter()
        .fold(AutomatonMode::new(ERROR_MODE_NAME), |mode, var| {
            mode.with_flow(var.clone(), Expression::num(0.0))
        });
    let error = base.add_mode(error)?;

    for (name, condition) in std::mem::take(&mut config.forbidden) {
        let source = base.mode_id(&name).ok_or_else(|| {
            HyError::validation(format!("forbidden mode '{name}' is not in the automaton"))
        })?;
        base.add_transition(AutomatonTransition::new(source, error).with_guard(condition));
    }
    config.forbidden.insert(ERROR_MODE_NAME.to_string(), Expression::TRUE);
    Ok(())
}

pub struct ConvertToStandardFormPass;

impl TransformationPass for ConvertToStandardFormPass {
    fn name(&self) -> &'static str {
        "Convert to Standard Form Pass"
    }

    fn flag(&self) -> &'static str {
        "standard_form"
    }

    fn skipped_preconditions(&self) -> PreconditionsFlag {
        PreconditionsFlag::CONVERT_DISJUNCTIVE_INIT_FORBIDDEN | PreconditionsFlag::NO_URGENT
    }

    fn run(&self, config: &mut Configuration, _params: &str) -> HyResult<()> {
        convert_init(config)?;
        convert_forbidden(config)?;
        let base = config.base(PASS)?;
        info!(
            "converted to standard form ({} modes, {} transitions)",
            base.num_modes(),
            base.transitions.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use hyexpr::parser::parse_value;

    use super::*;
    use crate::passes::run_pass;
    use crate::tests_utils::debug_configuration;

    #[test]
    fn init_and_forbidden_become_modes() {
        let mut config = debug_configuration(&[("x", "1", "0"), ("y", "x", "1")]);
        config
            .forbidden
            .insert("on".into(), parse_value("x >= 5 | y <= -1").unwrap());

        run_pass(&ConvertToStandardFormPass, &mut config, "").unwrap();

        let base = config.base("test").unwrap();
        assert!(base.mode_by_name(INIT_MODE_NAME).unwrap().urgent);
        let error = base.mode_by_name(ERROR_MODE_NAME).unwrap();
        assert_eq!(error.flow("y").unwrap().expression, Expression::num(0.0));

        let entry = base.find_transition(INIT_MODE_NAME, "on").unwrap();
        assert_eq!(entry.guard.to_string(), "x = 0.0 & y = 1.0");
        assert!(base.find_transition("on", ERROR_MODE_NAME).is_some());
        assert!(config.init[INIT_MODE_NAME].is_true());
        assert!(config.forbidden[ERROR_MODE_NAME].is_true());
    }

    #[test]
    fn standard_form_is_idempotent() {
        let mut config = debug_configuration(&[("x", "1", "0")]);
        convert_init(&mut config).unwrap();
        let before = config.clone();
        convert_init(&mut config).unwrap();
        assert_eq!(before, config);
    }
}
