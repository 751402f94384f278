use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use hyexpr::{Expression, Interval};

use super::mode::{AutomatonMode, AutomatonTransition, ModeId};
use crate::utils::error::{HyError, HyResult};

/// Check that `name` is a C-like identifier (letters, digits and `_`, not starting with
/// a digit, no dots).
pub fn validate_name(name: &str, context: &str) -> HyResult<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => chars.all(|c| c.is_alphanumeric() || c == '_'),
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(HyError::validation(format!(
            "forbidden name '{name}' in '{context}'"
        )))
    }
}

/// An automaton with explicit modes and transitions.
///
/// Modes live in an arena; transitions refer to them by [`ModeId`]. Mode order is the
/// insertion order and is preserved by every operation except [`retain_modes`](Self::retain_modes),
/// which keeps the relative order of the surviving modes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BaseComponent {
    modes: Vec<AutomatonMode>,
    index: HashMap<String, ModeId>,
    pub transitions: Vec<AutomatonTransition>,
}

impl BaseComponent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a non-urgent mode with invariant `true` and no flows.
    pub fn create_mode(&mut self, name: impl Into<String>) -> HyResult<ModeId> {
        self.add_mode(AutomatonMode::new(name))
    }

    pub fn add_mode(&mut self, mode: AutomatonMode) -> HyResult<ModeId> {
        if self.index.contains_key(&mode.name) {
            return Err(HyError::validation(format!(
                "Mode with name '{}' already exists.",
                mode.name
            )));
        }

        let id = ModeId(self.modes.len());
        self.index.insert(mode.name.clone(), id);
        self.modes.push(mode);
        Ok(id)
    }

    pub fn create_transition(&mut self, from: ModeId, to: ModeId) -> &mut AutomatonTransition {
        self.transitions.push(AutomatonTransition::new(from, to));
        let last = self.transitions.len() - 1;
        &mut self.transitions[last]
    }

    pub fn add_transition(&mut self, transition: AutomatonTransition) {
        self.transitions.push(transition);
    }

    pub fn mode(&self, id: ModeId) -> &AutomatonMode {
        &self.modes[id.0]
    }

    pub fn mode_mut(&mut self, id: ModeId) -> &mut AutomatonMode {
        &mut self.modes[id.0]
    }

    pub fn mode_id(&self, name: &str) -> Option<ModeId> {
        self.index.get(name).copied()
    }

    pub fn mode_by_name(&self, name: &str) -> Option<&AutomatonMode> {
        self.mode_id(name).map(|id| self.mode(id))
    }

    pub fn modes(&self) -> impl Iterator<Item = (ModeId, &AutomatonMode)> + '_ {
        self.modes.iter().enumerate().map(|(i, m)| (ModeId(i), m))
    }

    /// Mutable access to every mode. Names must not be changed through this iterator,
    /// use [`rename_mode`](Self::rename_mode) instead.
    pub fn modes_mut(&mut self) -> impl Iterator<Item = &mut AutomatonMode> + '_ {
        self.modes.iter_mut()
    }

    pub fn mode_ids(&self) -> impl Iterator<Item = ModeId> + use<> {
        (0..self.modes.len()).map(ModeId)
    }

    pub fn num_modes(&self) -> usize {
        self.modes.len()
    }

    pub fn mode_names(&self) -> Vec<String> {
        self.modes.iter().map(|m| m.name.clone()).collect()
    }

    pub fn rename_mode(&mut self, id: ModeId, new_name: impl Into<String>) -> HyResult<()> {
        let new_name = new_name.into();
        if let Some(existing) = self.mode_id(&new_name) {
            if existing == id {
                return Ok(());
            }
            return Err(HyError::validation(format!(
                "Mode with name '{new_name}' already exists."
            )));
        }

        let old = std::mem::replace(&mut self.modes[id.0].name, new_name.clone());
        self.index.remove(&old);
        self.index.insert(new_name, id);
        Ok(())
    }

    /// Rename every mode at once. `names` is indexed by [`ModeId`] and must hold unique names.
    pub fn rename_all(&mut self, names: Vec<String>) -> HyResult<()> {
        if names.len() != self.modes.len() {
            return Err(HyError::validation(format!(
                "{} names given for {} modes",
                names.len(),
                self.modes.len()
            )));
        }

        let mut index = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            if index.insert(name.clone(), ModeId(i)).is_some() {
                return Err(HyError::validation(format!(
                    "Mode with name '{name}' already exists."
                )));
            }
        }

        for (mode, name) in self.modes.iter_mut().zip(names) {
            mode.name = name;
        }
        self.index = index;
        Ok(())
    }

    /// First transition going from `from` to `to`.
    pub fn find_transition(&self, from: &str, to: &str) -> Option<&AutomatonTransition> {
        let (from, to) = (self.mode_id(from)?, self.mode_id(to)?);
        self.transitions.iter().find(|t| t.from == from && t.to == to)
    }

    pub fn transitions_from(&self, id: ModeId) -> impl Iterator<Item = &AutomatonTransition> + '_ {
        self.transitions.iter().filter(move |t| t.from == id)
    }

    /// Keep only the modes for which `keep` is true, together with the transitions between
    /// them. Returns the names of the removed modes.
    pub fn retain_modes(&mut self, mut keep: impl FnMut(ModeId, &AutomatonMode) -> bool) -> Vec<String> {
        let mut remap = vec![None; self.modes.len()];
        let mut kept = Vec::with_capacity(self.modes.len());
        let mut removed = Vec::new();

        for (i, mode) in std::mem::take(&mut self.modes).into_iter().enumerate() {
            if keep(ModeId(i), &mode) {
                remap[i] = Some(ModeId(kept.len()));
                kept.push(mode);
            } else {
                removed.push(mode.name);
            }
        }

        self.modes = kept;
        self.index = self
            .modes
            .iter()
            .enumerate()
            .map(|(i, m)| (m.name.clone(), ModeId(i)))
            .collect();

        self.transitions.retain_mut(|t| match (remap[t.from.0], remap[t.to.0]) {
            (Some(from), Some(to)) => {
                t.from = from;
                t.to = to;
                true
            }
            _ => false,
        });

        removed
    }

    /// Remove a single mode and every transition touching it.
    pub fn remove_mode(&mut self, name: &str) -> bool {
        match self.mode_id(name) {
            Some(target) => !self.retain_modes(|id, _| id != target).is_empty(),
            None => false,
        }
    }

    /// Labels used by at least one transition.
    pub fn used_labels(&self) -> BTreeSet<&str> {
        self.transitions
            .iter()
            .filter_map(|t| t.label.as_deref())
            .collect()
    }

    /// Apply `f` to every invariant, flow, guard and reset expression.
    pub fn map_expressions(&mut self, f: &mut impl FnMut(&Expression) -> Expression) {
        for mode in &mut self.modes {
            mode.map_expressions(f);
        }
        for t in &mut self.transitions {
            t.map_expressions(f);
        }
    }
}

/// A child of a network, with the parameter renaming between child and parent scope.
///
/// Mappings go from the child's name to the parent's name. Unmapped child parameters are
/// local to the instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentInstance {
    pub name: String,
    pub child: Component,
    pub var_mapping: BTreeMap<String, String>,
    pub const_mapping: BTreeMap<String, String>,
    pub label_mapping: BTreeMap<String, String>,
}

impl ComponentInstance {
    pub fn new(name: impl Into<String>, child: Component) -> Self {
        Self {
            name: name.into(),
            child,
            var_mapping: BTreeMap::new(),
            const_mapping: BTreeMap::new(),
            label_mapping: BTreeMap::new(),
        }
    }

    /// Map every child variable, constant and label to the parent parameter of the same name.
    pub fn map_all_by_name(mut self) -> Self {
        for v in &self.child.variables {
            self.var_mapping.insert(v.clone(), v.clone());
        }
        for c in self.child.constants.keys() {
            self.const_mapping.insert(c.clone(), c.clone());
        }
        for l in &self.child.labels {
            self.label_mapping.insert(l.clone(), l.clone());
        }
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetworkComponent {
    pub children: Vec<ComponentInstance>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ComponentKind {
    Base(BaseComponent),
    Network(NetworkComponent),
}

/// A base automaton or a network of component instances, with its declared parameters.
///
/// Variable order is significant (plotting and printing follow it).
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    pub variables: Vec<String>,
    pub constants: BTreeMap<String, Interval>,
    pub labels: BTreeSet<String>,
    /// Name of the template this component was instantiated from.
    pub template: Option<String>,
    pub kind: ComponentKind,
}

impl Component {
    pub fn base() -> Self {
        Self::with_kind(ComponentKind::Base(BaseComponent::new()))
    }

    pub fn network() -> Self {
        Self::with_kind(ComponentKind::Network(NetworkComponent::default()))
    }

    fn with_kind(kind: ComponentKind) -> Self {
        Self {
            variables: Vec::new(),
            constants: BTreeMap::new(),
            labels: BTreeSet::new(),
            template: None,
            kind,
        }
    }

    pub fn is_flat(&self) -> bool {
        matches!(self.kind, ComponentKind::Base(_))
    }

    pub fn as_base(&self) -> Option<&BaseComponent> {
        match &self.kind {
            ComponentKind::Base(b) => Some(b),
            ComponentKind::Network(_) => None,
        }
    }

    pub fn as_base_mut(&mut self) -> Option<&mut BaseComponent> {
        match &mut self.kind {
            ComponentKind::Base(b) => Some(b),
            ComponentKind::Network(_) => None,
        }
    }

    pub fn as_network(&self) -> Option<&NetworkComponent> {
        match &self.kind {
            ComponentKind::Network(n) => Some(n),
            ComponentKind::Base(_) => None,
        }
    }

    pub fn as_network_mut(&mut self) -> Option<&mut NetworkComponent> {
        match &mut self.kind {
            ComponentKind::Network(n) => Some(n),
            ComponentKind::Base(_) => None,
        }
    }

    /// The base automaton, or a precondition failure naming `pass`.
    pub fn require_base(&self, pass: &str) -> HyResult<&BaseComponent> {
        self.as_base()
            .ok_or_else(|| HyError::precondition(pass, "automaton must be flat"))
    }

    pub fn require_base_mut(&mut self, pass: &str) -> HyResult<&mut BaseComponent> {
        self.as_base_mut()
            .ok_or_else(|| HyError::precondition(pass, "automaton must be flat"))
    }

    pub fn add_variable(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.variables.contains(&name) {
            self.variables.push(name);
        }
    }

    pub fn is_constant(&self, name: &str) -> bool {
        self.constants.contains_key(name)
    }

    /// Leaf base components in left-to-right fold order.
    pub fn leaves(&self) -> Vec<&BaseComponent> {
        match &self.kind {
            ComponentKind::Base(b) => vec![b],
            ComponentKind::Network(n) => n.children.iter().flat_map(|c| c.child.leaves()).collect(),
        }
    }

    /// Does the (possibly composite) mode name `name` exist? Network names join one mode
    /// of every leaf with `.`.
    pub fn has_mode(&self, name: &str) -> bool {
        match &self.kind {
            ComponentKind::Base(b) => b.mode_id(name).is_some(),
            ComponentKind::Network(_) => {
                let leaves = self.leaves();
                let parts: Vec<&str> = name.split('.').collect();
                parts.len() == leaves.len()
                    && parts
                        .iter()
                        .zip(&leaves)
                        .all(|(part, leaf)| leaf.mode_id(part).is_some())
            }
        }
    }

    /// Variables in scope at this level, plus the fully qualified `instance.var` names of
    /// unmapped child variables.
    pub fn all_variables(&self) -> Vec<String> {
        let mut out = self.variables.clone();
        self.collect_local_names(&mut out, "", &|c| c.variables.clone(), &|ci| &ci.var_mapping);
        out
    }

    pub fn all_constants(&self) -> Vec<String> {
        let mut out: Vec<String> = self.constants.keys().cloned().collect();
        self.collect_local_names(
            &mut out,
            "",
            &|c| c.constants.keys().cloned().collect(),
            &|ci| &ci.const_mapping,
        );
        out
    }

    fn collect_local_names(
        &self,
        out: &mut Vec<String>,
        prefix: &str,
        names: &dyn Fn(&Component) -> Vec<String>,
        mapping: &dyn Fn(&ComponentInstance) -> &BTreeMap<String, String>,
    ) {
        if let ComponentKind::Network(n) = &self.kind {
            for ci in &n.children {
                let child_prefix = format!("{prefix}{}.", ci.name);
                for name in names(&ci.child) {
                    if !mapping(ci).contains_key(&name) {
                        out.push(format!("{child_prefix}{name}"));
                    }
                }
                ci.child.collect_local_names(out, &child_prefix, names, mapping);
            }
        }
    }

    /// Structural validation of this component and, for networks, of every child.
    pub fn validate(&self, context: &str) -> HyResult<()> {
        let mut all_names = BTreeSet::new();
        let groups: [(&str, Vec<&String>); 3] = [
            ("variable", self.variables.iter().collect()),
            ("label", self.labels.iter().collect()),
            ("constant", self.constants.keys().collect()),
        ];
        for (kind, names) in groups {
            for name in names {
                validate_name(name, context)?;
                if !all_names.insert(name.as_str()) {
                    return Err(HyError::validation(format!(
                        "Repeated {kind} name '{name}' in component '{context}'"
                    )));
                }
            }
        }

        match &self.kind {
            ComponentKind::Base(base) => self.validate_base(base, context),
            ComponentKind::Network(net) => {
                if net.children.is_empty() {
                    return Err(HyError::validation(format!(
                        "Network component '{context}' has no children"
                    )));
                }
                let mut seen = BTreeSet::new();
                for ci in &net.children {
                    validate_name(&ci.name, context)?;
                    if !seen.insert(ci.name.as_str()) {
                        return Err(HyError::validation(format!(
                            "Repeated instance name '{}' in component '{context}'",
                            ci.name
                        )));
                    }
                    self.validate_instance_mapping(ci, context)?;
                    ci.child.validate(&format!("{context}.{}", ci.name))?;
                }
                Ok(())
            }
        }
    }

    fn validate_instance_mapping(&self, ci: &ComponentInstance, context: &str) -> HyResult<()> {
        let checks: [(&str, &BTreeMap<String, String>, &dyn Fn(&str) -> bool, &dyn Fn(&str) -> bool); 3] = [
            (
                "variable",
                &ci.var_mapping,
                &|c| ci.child.variables.iter().any(|v| v == c),
                &|p| self.variables.iter().any(|v| v == p),
            ),
            (
                "constant",
                &ci.const_mapping,
                &|c| ci.child.constants.contains_key(c),
                &|p| self.constants.contains_key(p),
            ),
            (
                "label",
                &ci.label_mapping,
                &|c| ci.child.labels.contains(c),
                &|p| self.labels.contains(p),
            ),
        ];

        for (kind, mapping, in_child, in_parent) in checks {
            for (child, parent) in mapping {
                if !in_child(child) {
                    return Err(HyError::validation(format!(
                        "instance '{}' of '{context}' maps unknown {kind} '{child}'",
                        ci.name
                    )));
                }
                if !in_parent(parent) {
                    return Err(HyError::validation(format!(
                        "instance '{}' of '{context}' maps {kind} '{child}' to '{parent}', which is not declared in the parent",
                        ci.name
                    )));
                }
            }
        }
        Ok(())
    }

    fn validate_base(&self, base: &BaseComponent, context: &str) -> HyResult<()> {
        if base.num_modes() == 0 {
            return Err(HyError::validation(format!(
                "BaseComponent '{context}' has no modes"
            )));
        }

        let in_scope = |name: &str| self.variables.iter().any(|v| v == name) || self.is_constant(name);
        let check_expr = |e: &Expression, what: &dyn Fn() -> String| -> HyResult<()> {
            match e.variables().into_iter().find(|v| !in_scope(v)) {
                Some(v) => Err(HyError::validation(format!(
                    "BaseComponent '{context}': {} uses variable/constant '{v}' not in the component",
                    what()
                ))),
                None => Ok(()),
            }
        };

        let mut first_flows: Option<(&str, BTreeSet<&String>)> = None;
        for (_, mode) in base.modes() {
            validate_name(&mode.name, context)?;
            check_expr(&mode.invariant, &|| format!("invariant of mode '{}'", mode.name))?;

            match (&mode.flow_dynamics, mode.urgent) {
                (Some(_), true) => {
                    return Err(HyError::validation(format!(
                        "Mode '{}' was urgent, but dynamics were also defined",
                        mode.name
                    )));
                }
                (None, false) => {
                    return Err(HyError::validation(format!(
                        "Mode '{}' has no dynamics but is not urgent",
                        mode.name
                    )));
                }
                (None, true) => {}
                (Some(flows), false) => {
                    for (var, flow) in flows {
                        if !self.variables.contains(var) {
                            return Err(HyError::validation(format!(
                                "dynamics were defined for variable '{var}' in mode '{}', but the variable does not exist in '{context}'",
                                mode.name
                            )));
                        }
                        check_expr(&flow.expression, &|| {
                            format!("flow for '{var}' in mode '{}'", mode.name)
                        })?;
                    }

                    let keys: BTreeSet<&String> = flows.keys().collect();
                    if let Some((first_name, first_keys)) = &first_flows {
                        if *first_keys != keys {
                            return Err(HyError::validation(format!(
                                "BaseComponent '{context}': variables with defined flows in mode '{first_name}' ({first_keys:?}) differ from mode '{}' ({keys:?})",
                                mode.name
                            )));
                        }
                    } else {
                        first_flows = Some((&mode.name, keys));
                    }
                }
            }
        }

        for (i, t) in base.transitions.iter().enumerate() {
            if t.from.0 >= base.num_modes() || t.to.0 >= base.num_modes() {
                return Err(HyError::validation(format!(
                    "transition {i} of '{context}' refers to a missing mode"
                )));
            }
            let describe = || {
                format!(
                    "transition '{}' -> '{}'",
                    base.mode(t.from).name,
                    base.mode(t.to).name
                )
            };
            check_expr(&t.guard, &|| format!("guard of {}", describe()))?;
            for (var, value) in &t.reset {
                if !self.variables.contains(var) {
                    return Err(HyError::validation(format!(
                        "{} resets undeclared variable '{var}'",
                        describe()
                    )));
                }
                check_expr(&value.expression, &|| format!("reset of '{var}' in {}", describe()))?;
            }
            if let Some(label) = &t.label {
                if !self.labels.contains(label) {
                    return Err(HyError::validation(format!(
                        "{} uses undeclared label '{label}'",
                        describe()
                    )));
                }
            }
        }

        let used = base.used_labels();
        if let Some(unused) = self.labels.iter().find(|l| !used.contains(l.as_str())) {
            return Err(HyError::validation(format!(
                "Exported label '{unused}' was not used in BaseComponent '{context}'"
            )));
        }

        Ok(())
    }

    /// Variables of a base component without a flow in some non-urgent mode, with that mode.
    pub fn uncovered_flows(&self) -> Vec<(String, String)> {
        let Some(base) = self.as_base() else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for (_, mode) in base.modes() {
            if let Some(flows) = &mode.flow_dynamics {
                for var in &self.variables {
                    if !flows.contains_key(var) {
                        out.push((mode.name.clone(), var.clone()));
                    }
                }
            }
        }
        out
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "variables: {:?}", self.variables)?;
        if !self.constants.is_empty() {
            let consts: Vec<String> = self.constants.iter().map(|(k, v)| format!("{k} = {v}")).collect();
            writeln!(f, "constants: {}", consts.join(", "))?;
        }
        if !self.labels.is_empty() {
            writeln!(f, "labels: {:?}", self.labels)?;
        }
        match &self.kind {
            ComponentKind::Base(base) => {
                writeln!(f, "modes ({} total):", base.num_modes())?;
                for (_, mode) in base.modes() {
                    writeln!(f, "  {mode}")?;
                }
                writeln!(f, "transitions ({} total):", base.transitions.len())?;
                for t in &base.transitions {
                    write!(f, "  {} -> {}", base.mode(t.from).name, base.mode(t.to).name)?;
                    if let Some(label) = &t.label {
                        write!(f, " [{label}]")?;
                    }
                    write!(f, " guard: {}", t.guard)?;
                    for (var, value) in &t.reset {
                        write!(f, "; {var} := {value}")?;
                    }
                    writeln!(f)?;
                }
            }
            ComponentKind::Network(net) => {
                for ci in &net.children {
                    writeln!(f, "instance {}:", ci.name)?;
                    for line in ci.child.to_string().lines() {
                        writeln!(f, "  {line}")?;
                    }
                }
            }
        }
        Ok(())
    }
}
