//! Composition of a network of automata into one base automaton.
//!
//! Children are first renamed into the parent's scope (mapped parameters take the
//! parent's name, local ones get the `instance_` prefix), then folded pairwise from the
//! left. Merged mode `(l, r)` is named `l_r`.

use std::collections::{BTreeMap, BTreeSet};

use hyexpr::{Expression, ExpressionInterval};
use log::{debug, info};

use crate::ir::{
    AutomatonMode, AutomatonTransition, BaseComponent, Component, ComponentInstance,
    ComponentKind, Configuration, ModeId,
};
use crate::magic::MODE_NAME_SEPARATOR;
use crate::utils::error::{HyError, HyResult};

/// Rename variables, constants and labels of `component` (and the parent-side names of its
/// children's mappings) through `names`.
pub fn rename_params(component: &mut Component, names: &BTreeMap<String, String>) {
    if names.is_empty() {
        return;
    }
    let rename = |n: &str| names.get(n).cloned().unwrap_or_else(|| n.to_string());

    component.variables = component.variables.iter().map(|v| rename(v)).collect();
    component.constants = std::mem::take(&mut component.constants)
        .into_iter()
        .map(|(k, v)| (rename(&k), v))
        .collect();
    component.labels = component.labels.iter().map(|l| rename(l)).collect();

    match &mut component.kind {
        ComponentKind::Base(base) => {
            base.map_expressions(&mut |e| e.rename_variables(&rename));
            for mode in base.modes_mut() {
                if let Some(flows) = mode.flow_dynamics.take() {
                    mode.flow_dynamics = Some(flows.into_iter().map(|(k, v)| (rename(&k), v)).collect());
                }
            }
            for t in &mut base.transitions {
                t.reset = std::mem::take(&mut t.reset)
                    .into_iter()
                    .map(|(k, v)| (rename(&k), v))
                    .collect();
                if let Some(label) = &mut t.label {
                    *label = rename(label);
                }
            }
        }
        ComponentKind::Network(net) => {
            for ci in &mut net.children {
                for mapping in [&mut ci.var_mapping, &mut ci.const_mapping, &mut ci.label_mapping] {
                    for parent in mapping.values_mut() {
                        *parent = rename(parent);
                    }
                }
            }
        }
    }
}

fn local_renamings<'a>(
    names: impl IntoIterator<Item = &'a String>,
    mapping: &BTreeMap<String, String>,
    prefix: &str,
    out: &mut BTreeMap<String, String>,
) {
    for name in names {
        match mapping.get(name) {
            Some(parent) if parent == name => {}
            Some(parent) => {
                out.insert(name.clone(), parent.clone());
            }
            None => {
                out.insert(name.clone(), format!("{prefix}{name}"));
            }
        }
    }
}

fn qualify_instance(ci: &mut ComponentInstance, parent_prefix: &str) {
    let prefix = format!("{parent_prefix}{}{MODE_NAME_SEPARATOR}", ci.name);
    let child = &mut ci.child;

    // Mapped constants take their value from the parent.
    child.constants.retain(|name, _| !ci.const_mapping.contains_key(name));

    let mut names = BTreeMap::new();
    local_renamings(&child.variables, &ci.var_mapping, &prefix, &mut names);
    local_renamings(child.constants.keys(), &ci.const_mapping, &prefix, &mut names);
    local_renamings(&child.labels, &ci.label_mapping, &prefix, &mut names);
    for (name, parent) in &ci.const_mapping {
        if name != parent {
            names.insert(name.clone(), parent.clone());
        }
    }
    rename_params(child, &names);

    if let ComponentKind::Network(net) = &mut child.kind {
        for grandchild in &mut net.children {
            qualify_instance(grandchild, &prefix);
        }
    }

    for mapping in [&mut ci.var_mapping, &mut ci.const_mapping, &mut ci.label_mapping] {
        *mapping = mapping.values().map(|p| (p.clone(), p.clone())).collect();
    }
}

/// Rename every parameter of the tree to its fully qualified name in the root scope.
pub fn convert_to_fully_qualified_params(root: &mut Component) {
    if let ComponentKind::Network(net) = &mut root.kind {
        for ci in &mut net.children {
            qualify_instance(ci, "");
        }
    }
}

fn merge_ordered(into: &mut Vec<String>, from: &[String]) {
    for name in from {
        if !into.contains(name) {
            into.push(name.clone());
        }
    }
}

fn merge_params(into: &mut Component, from: &Component) -> HyResult<()> {
    merge_ordered(&mut into.variables, &from.variables);
    into.labels.extend(from.labels.iter().cloned());

    for (name, value) in &from.constants {
        match into.constants.get(name) {
            None => {
                into.constants.insert(name.clone(), *value);
            }
            Some(existing) if existing == value => {}
            Some(existing) => {
                return Err(HyError::Conflict {
                    what: format!("values for constant '{name}'"),
                    first: existing.to_string(),
                    second: value.to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Union of two flow or reset maps; a variable driven on both sides must agree.
fn merge_expression_maps(
    left: &BTreeMap<String, ExpressionInterval>,
    right: &BTreeMap<String, ExpressionInterval>,
    what: &dyn Fn(&str) -> String,
) -> HyResult<BTreeMap<String, ExpressionInterval>> {
    let mut out = left.clone();
    for (var, value) in right {
        match out.get(var) {
            None => {
                out.insert(var.clone(), value.clone());
            }
            Some(existing) if existing == value => {}
            Some(existing) => {
                return Err(HyError::Conflict {
                    what: what(var),
                    first: existing.to_string(),
                    second: value.to_string(),
                });
            }
        }
    }
    Ok(out)
}

fn merge_modes(l: &AutomatonMode, r: &AutomatonMode) -> HyResult<AutomatonMode> {
    let name = format!("{}{MODE_NAME_SEPARATOR}{}", l.name, r.name);
    let invariant = Expression::and(l.invariant.clone(), r.invariant.clone());

    let flow_dynamics = match (&l.flow_dynamics, &r.flow_dynamics) {
        (Some(lf), Some(rf)) if !l.urgent && !r.urgent => Some(merge_expression_maps(lf, rf, &|var| {
            format!("dynamics (multiple drivers) for '{var}' in mode '{name}'")
        })?),
        _ => None,
    };

    Ok(AutomatonMode {
        urgent: flow_dynamics.is_none(),
        name,
        invariant,
        flow_dynamics,
    })
}

/// Cross product of two flat components.
pub fn merge_components(left: &Component, right: &Component) -> HyResult<Component> {
    let (Some(lb), Some(rb)) = (left.as_base(), right.as_base()) else {
        return Err(HyError::Unknown("only base components can be merged".to_string()));
    };

    let mut rv = Component::base();
    merge_params(&mut rv, left)?;
    merge_params(&mut rv, right)?;

    let shared: BTreeSet<&String> = left.labels.intersection(&right.labels).collect();
    debug!("merging locations, shared labels: {shared:?}");

    let width = rb.num_modes();
    let merged_id = |l: ModeId, r: ModeId| ModeId(l.index() * width + r.index());
    let is_shared = |t: &AutomatonTransition| t.label.as_ref().is_some_and(|l| shared.contains(l));

    let mut base = BaseComponent::new();
    for (_, l) in lb.modes() {
        for (_, r) in rb.modes() {
            base.add_mode(merge_modes(l, r)?)?;
        }
    }

    for t in lb.transitions.iter().filter(|t| !is_shared(t)) {
        for r in rb.mode_ids() {
            let mut copy = t.clone();
            copy.from = merged_id(t.from, r);
            copy.to = merged_id(t.to, r);
            base.add_transition(copy);
        }
    }

    for t in rb.transitions.iter().filter(|t| !is_shared(t)) {
        for l in lb.mode_ids() {
            let mut copy = t.clone();
            copy.from = merged_id(l, t.from);
            copy.to = merged_id(l, t.to);
            base.add_transition(copy);
        }
    }

    for lt in lb.transitions.iter().filter(|t| is_shared(t)) {
        for rt in rb.transitions.iter().filter(|t| t.label == lt.label) {
            let from = merged_id(lt.from, rt.from);
            let to = merged_id(lt.to, rt.to);
            let reset = merge_expression_maps(&lt.reset, &rt.reset, &|var| {
                format!(
                    "reset (multiple drivers) for '{var}' on '{}' -> '{}'",
                    base.mode(from).name,
                    base.mode(to).name
                )
            })?;
            base.add_transition(AutomatonTransition {
                from,
                to,
                guard: Expression::and(lt.guard.clone(), rt.guard.clone()),
                reset,
                label: lt.label.clone(),
            });
        }
    }

    rv.kind = ComponentKind::Base(base);
    Ok(rv)
}

/// Flatten a (qualified) component tree.
fn flatten_component(component: &Component, name: &str) -> HyResult<Component> {
    let net = match &component.kind {
        ComponentKind::Base(_) => {
            debug!("flatten called on '{name}' which is already a base component");
            return Ok(component.clone());
        }
        ComponentKind::Network(net) => net,
    };

    if net.children.is_empty() {
        return Err(HyError::validation(format!(
            "Network component '{name}' has no children"
        )));
    }

    let mut merged: Option<Component> = None;
    for ci in &net.children {
        let child = flatten_component(&ci.child, &ci.name)?;
        merged = Some(match merged {
            None => child,
            Some(acc) => {
                info!("merging '{}' into '{name}'", ci.name);
                merge_components(&acc, &child)?
            }
        });
    }

    let mut rv = merged.ok_or_else(|| HyError::Unknown("empty network".to_string()))?;
    merge_params(&mut rv, component)?;

    let mut ordered: Vec<String> = component
        .variables
        .iter()
        .filter(|v| rv.variables.contains(v))
        .cloned()
        .collect();
    merge_ordered(&mut ordered, &rv.variables);
    rv.variables = ordered;
    rv.template = component.template.clone();

    Ok(rv)
}

fn dots_to_separator(name: &str) -> String {
    name.replace('.', MODE_NAME_SEPARATOR)
}

/// Replace the root network by its flattened base automaton. Init/forbidden keys and
/// dotted variable names are converted to the `_` form.
pub fn flatten_configuration(config: &mut Configuration) -> HyResult<()> {
    if config.root.is_flat() {
        return Ok(());
    }

    convert_to_fully_qualified_params(&mut config.root);
    config.root = flatten_component(&config.root, "<root>")?;

    let convert = |map: &mut BTreeMap<String, Expression>| {
        *map = std::mem::take(map)
            .into_iter()
            .map(|(k, e)| (dots_to_separator(&k), e.rename_variables(&dots_to_separator)))
            .collect();
    };
    convert(&mut config.init);
    convert(&mut config.forbidden);

    for name in &mut config.settings.plot_variable_names {
        *name = dots_to_separator(name);
    }

    if let Some(base) = config.root.as_base() {
        info!(
            "flattened automaton ({} locations and {} transitions)",
            base.num_modes(),
            base.transitions.len()
        );
    }
    Ok(())
}

/// Flatten, then prune discretely unreachable modes and modes with trivially empty
/// invariants (pruning reachability again if anything was removed).
pub fn flatten_and_optimize(config: &mut Configuration) -> HyResult<()> {
    flatten_configuration(config)?;

    crate::passes::basic::remove_unreachable(config)?;
    let before = config.base("flatten")?.num_modes();
    crate::passes::basic::remove_simple_unsat(config)?;

    if config.base("flatten")?.num_modes() != before {
        crate::passes::basic::remove_unreachable(config)?;
    }

    let base = config.base("flatten")?;
    info!(
        "optimized flattened automaton ({} locations and {} transitions)",
        base.num_modes(),
        base.transitions.len()
    );
    Ok(())
}
