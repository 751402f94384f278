use std::collections::BTreeMap;
use std::fmt;

use hyexpr::Expression;

use super::component::{BaseComponent, Component};
use crate::utils::conf::AutomatonSettings;
use crate::utils::error::{HyError, HyResult};

/// A model: the root component, the initial and forbidden sets keyed by mode name, and
/// tool settings.
///
/// For a network root, mode names join one mode of every leaf automaton with `.`.
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    pub root: Component,
    pub init: BTreeMap<String, Expression>,
    pub forbidden: BTreeMap<String, Expression>,
    pub settings: AutomatonSettings,
}

impl Configuration {
    pub fn new(root: Component) -> Self {
        Self {
            root,
            init: BTreeMap::new(),
            forbidden: BTreeMap::new(),
            settings: AutomatonSettings::default(),
        }
    }

    /// Deep, independent copy.
    pub fn copy(&self) -> Self {
        self.clone()
    }

    pub fn base(&self, pass: &str) -> HyResult<&BaseComponent> {
        self.root.require_base(pass)
    }

    pub fn base_mut(&mut self, pass: &str) -> HyResult<&mut BaseComponent> {
        self.root.require_base_mut(pass)
    }

    /// Full validation: structure, init/forbidden references, plot variables, and flow
    /// coverage of a flat automaton. Reports the first violation.
    pub fn validate(&self) -> HyResult<()> {
        self.validate_structure()?;

        if let Some((mode, var)) = self.root.uncovered_flows().into_iter().next() {
            return Err(HyError::validation(format!(
                "mode '{mode}' does not define a flow for variable '{var}'"
            )));
        }
        Ok(())
    }

    /// Validation without the flow coverage check (models with havoc flows pass).
    ///
    /// Every init and forbidden key is checked before any variable reference.
    pub fn validate_structure(&self) -> HyResult<()> {
        self.validate_keys(&self.init, "init", false)?;
        self.validate_keys(&self.forbidden, "forbidden", true)?;
        self.validate_variables(&self.init, "init")?;
        self.validate_variables(&self.forbidden, "forbidden")?;
        self.root.validate("<root>")?;
        self.validate_plot_variables()
    }

    fn validate_keys(
        &self,
        map: &BTreeMap<String, Expression>,
        what: &str,
        allow_empty: bool,
    ) -> HyResult<()> {
        if map.is_empty() && !allow_empty {
            return Err(HyError::validation(format!("{what} states were empty")));
        }
        match map.keys().find(|mode| !self.root.has_mode(mode)) {
            Some(mode) => Err(HyError::validation(format!(
                "{what} states contain mode '{mode}', which is not in the automaton"
            ))),
            None => Ok(()),
        }
    }

    fn validate_variables(&self, map: &BTreeMap<String, Expression>, what: &str) -> HyResult<()> {
        let mut valid = self.root.all_variables();
        valid.extend(self.root.all_constants());

        for e in map.values() {
            for var in e.variables() {
                if !valid.contains(&var) {
                    let guess = valid
                        .iter()
                        .find(|v| v.ends_with(&var))
                        .map(|v| format!(" Did you mean '{v}'?"))
                        .unwrap_or_default();
                    return Err(HyError::validation(format!(
                        "{what} states use variable '{var}', which is not in the automaton.{guess}"
                    )));
                }
            }
        }
        Ok(())
    }

    fn validate_plot_variables(&self) -> HyResult<()> {
        let vars = self.root.all_variables();
        for name in &self.settings.plot_variable_names {
            if name.is_empty() {
                if !vars.is_empty() {
                    return Err(HyError::validation(format!(
                        "plot variables are not assigned, but the automaton has variables {vars:?}"
                    )));
                }
            } else if !vars.contains(name) {
                return Err(HyError::validation(format!(
                    "plot variable not in automaton: '{name}'"
                )));
            }
        }
        Ok(())
    }

    /// Fill unassigned or stale plot variables with the first two variables.
    pub fn assign_plot_variables(&mut self) {
        let vars = self.root.all_variables();
        let names = &mut self.settings.plot_variable_names;

        for (i, name) in names.iter_mut().enumerate() {
            if !vars.contains(name) {
                *name = vars
                    .get(i)
                    .or_else(|| vars.first())
                    .cloned()
                    .unwrap_or_default();
            }
        }
    }

    /// Apply `f` to every init and forbidden expression.
    pub fn map_init_forbidden(&mut self, f: &mut impl FnMut(&Expression) -> Expression) {
        for e in self.init.values_mut().chain(self.forbidden.values_mut()) {
            *e = f(e);
        }
    }

    /// Apply `f` to every expression of the model.
    pub fn map_expressions(&mut self, f: &mut impl FnMut(&Expression) -> Expression) -> HyResult<()> {
        self.map_init_forbidden(f);
        self.base_mut("map_expressions")?.map_expressions(f);
        Ok(())
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "init:")?;
        for (mode, e) in &self.init {
            writeln!(f, "  {mode}: {e}")?;
        }
        if !self.forbidden.is_empty() {
            writeln!(f, "forbidden:")?;
            for (mode, e) in &self.forbidden {
                writeln!(f, "  {mode}: {e}")?;
            }
        }
        write!(f, "{}", self.root)
    }
}
