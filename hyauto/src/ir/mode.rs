use std::collections::BTreeMap;
use std::fmt;

use hyexpr::{Expression, ExpressionInterval};

/// Index of a mode inside its owning [`BaseComponent`](super::BaseComponent) arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModeId(pub usize);

impl ModeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ModeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Per-variable derivative map of a mode.
pub type FlowMap = BTreeMap<String, ExpressionInterval>;

/// Per-variable update map of a transition.
pub type ResetMap = BTreeMap<String, ExpressionInterval>;

/// A discrete location of a base automaton.
///
/// An urgent mode has no flow (`flow_dynamics` is `None`) and must be left immediately.
/// A non-urgent mode may temporarily miss flows for some variables ("havoc" flows) until
/// those are assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct AutomatonMode {
    pub name: String,
    pub invariant: Expression,
    pub urgent: bool,
    pub flow_dynamics: Option<FlowMap>,
}

impl AutomatonMode {
    /// A non-urgent mode with invariant `true` and no flows yet.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            invariant: Expression::TRUE,
            urgent: false,
            flow_dynamics: Some(FlowMap::new()),
        }
    }

    pub fn urgent(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            invariant: Expression::TRUE,
            urgent: true,
            flow_dynamics: None,
        }
    }

    pub fn with_invariant(mut self, invariant: Expression) -> Self {
        self.invariant = invariant;
        self
    }

    pub fn with_flow(mut self, var: impl Into<String>, flow: impl Into<ExpressionInterval>) -> Self {
        self.flow_dynamics
            .get_or_insert_with(FlowMap::new)
            .insert(var.into(), flow.into());
        self.urgent = false;
        self
    }

    pub fn flow(&self, var: &str) -> Option<&ExpressionInterval> {
        self.flow_dynamics.as_ref().and_then(|f| f.get(var))
    }

    /// Make the mode urgent, dropping its flows.
    pub fn make_urgent(&mut self) {
        self.urgent = true;
        self.flow_dynamics = None;
    }

    /// Flows with every interval collapsed to its middle.
    pub fn center_dynamics(&self) -> BTreeMap<String, Expression> {
        self.flow_dynamics
            .iter()
            .flatten()
            .map(|(var, ei)| (var.clone(), ei.center()))
            .collect()
    }

    /// Does any flow carry an additive interval?
    pub fn has_nondeterministic_flow(&self) -> bool {
        self.flow_dynamics
            .iter()
            .flatten()
            .any(|(_, ei)| ei.is_interval())
    }

    /// Apply `f` to the invariant and every flow expression.
    pub fn map_expressions(&mut self, f: &mut impl FnMut(&Expression) -> Expression) {
        self.invariant = f(&self.invariant);
        for ei in self.flow_dynamics.iter_mut().flat_map(|m| m.values_mut()) {
            ei.expression = f(&ei.expression);
        }
    }
}

impl fmt::Display for AutomatonMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mode {}", self.name)?;
        if self.urgent {
            write!(f, " (urgent)")?;
        }
        write!(f, " inv: {}", self.invariant)?;
        if let Some(flows) = &self.flow_dynamics {
            for (var, flow) in flows {
                write!(f, "; {var}' = {flow}")?;
            }
        }
        Ok(())
    }
}

/// A discrete jump between two modes of the same base automaton.
#[derive(Debug, Clone, PartialEq)]
pub struct AutomatonTransition {
    pub from: ModeId,
    pub to: ModeId,
    pub guard: Expression,
    pub reset: ResetMap,
    pub label: Option<String>,
}

impl AutomatonTransition {
    pub fn new(from: ModeId, to: ModeId) -> Self {
        Self {
            from,
            to,
            guard: Expression::TRUE,
            reset: ResetMap::new(),
            label: None,
        }
    }

    pub fn with_guard(mut self, guard: Expression) -> Self {
        self.guard = guard;
        self
    }

    pub fn with_reset(mut self, var: impl Into<String>, value: impl Into<ExpressionInterval>) -> Self {
        self.reset.insert(var.into(), value.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Copy this transition into `component`, mapping the endpoints through the mode names
    /// of `source`.
    pub fn copy_to(
        &self,
        source: &super::BaseComponent,
        component: &mut super::BaseComponent,
    ) -> Option<usize> {
        let from = component.mode_id(&source.mode(self.from).name)?;
        let to = component.mode_id(&source.mode(self.to).name)?;
        let mut copy = self.clone();
        copy.from = from;
        copy.to = to;
        component.transitions.push(copy);
        Some(component.transitions.len() - 1)
    }

    pub fn map_expressions(&mut self, f: &mut impl FnMut(&Expression) -> Expression) {
        self.guard = f(&self.guard);
        for ei in self.reset.values_mut() {
            ei.expression = f(&ei.expression);
        }
    }
}
