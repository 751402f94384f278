//! Hybrid automaton intermediate representation.
//!
//! A [`Configuration`] owns a root [`Component`], which is either a [`BaseComponent`]
//! (modes and transitions in an arena) or a [`NetworkComponent`] of named instances.

pub mod component;
pub mod configuration;
pub mod mode;

pub use component::{
    BaseComponent, Component, ComponentInstance, ComponentKind, NetworkComponent, validate_name,
};
pub use configuration::Configuration;
pub use mode::{AutomatonMode, AutomatonTransition, FlowMap, ModeId, ResetMap};

#[cfg(test)]
mod tests {
    use super::*;
    use hyexpr::Expression;
    use hyexpr::parser::{parse_guard, parse_invariant, parse_value};

    fn two_mode_config() -> Configuration {
        let mut root = Component::base();
        root.variables = vec!["x".into(), "t".into()];
        let base = root.as_base_mut().unwrap();
        let on = base
            .add_mode(
                AutomatonMode::new("on")
                    .with_invariant(parse_invariant("x <= 10").unwrap())
                    .with_flow("x", parse_value("1").unwrap())
                    .with_flow("t", Expression::num(1.0)),
            )
            .unwrap();
        let off = base
            .add_mode(
                AutomatonMode::new("off")
                    .with_flow("x", parse_value("-x").unwrap())
                    .with_flow("t", Expression::num(1.0)),
            )
            .unwrap();
        base.create_transition(on, off).guard = parse_guard("x >= 10").unwrap();
        base.create_transition(off, on).guard = parse_guard("x <= 1").unwrap();

        let mut config = Configuration::new(root);
        config.init.insert("on".into(), parse_invariant("x = 0 & t = 0").unwrap());
        config.assign_plot_variables();
        config
    }

    #[test]
    fn valid_configuration() {
        let config = two_mode_config();
        config.validate().unwrap();
        assert_eq!(config.settings.plot_variable_names, ["x".to_string(), "t".to_string()]);
    }

    #[test]
    fn duplicate_mode_names_are_rejected() {
        let mut base = BaseComponent::new();
        base.create_mode("a").unwrap();
        assert!(base.create_mode("a").unwrap_err().is_validation());
    }

    #[test]
    fn unknown_init_mode_is_reported() {
        let mut config = two_mode_config();
        config.init.insert("missing".into(), Expression::TRUE);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("missing"), "{err}");
    }

    #[test]
    fn unknown_modes_are_reported_before_unknown_variables() {
        let mut config = two_mode_config();
        // Valid init key with an undeclared variable, forbidden entry with an unknown mode.
        config.init.insert("off".into(), parse_invariant("z = 1").unwrap());
        config.forbidden.insert("nowhere".into(), Expression::TRUE);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("'nowhere'"), "{err}");

        config.forbidden.clear();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("'z'"), "{err}");
    }

    #[test]
    fn undeclared_variable_is_reported() {
        let mut config = two_mode_config();
        let base = config.root.as_base_mut().unwrap();
        let on = base.mode_id("on").unwrap();
        base.mode_mut(on).invariant = parse_invariant("y <= 1").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("'y'"), "{err}");
    }

    #[test]
    fn missing_flow_fails_only_full_validation() {
        let mut config = two_mode_config();
        for mode in config.root.as_base_mut().unwrap().modes_mut() {
            mode.flow_dynamics.as_mut().unwrap().remove("t");
        }
        config.validate_structure().unwrap();
        assert!(config.validate().unwrap_err().to_string().contains("'t'"));
    }

    #[test]
    fn copies_are_independent() {
        let config = two_mode_config();
        let mut copy = config.copy();
        let base = copy.root.as_base_mut().unwrap();
        let on = base.mode_id("on").unwrap();
        base.mode_mut(on).invariant = Expression::FALSE;
        base.transitions.clear();

        let original = config.root.as_base().unwrap();
        assert_eq!(original.transitions.len(), 2);
        assert!(!original.mode_by_name("on").unwrap().invariant.is_false());
    }

    #[test]
    fn retain_modes_remaps_transitions() {
        let mut base = BaseComponent::new();
        let a = base.create_mode("a").unwrap();
        let b = base.create_mode("b").unwrap();
        let c = base.create_mode("c").unwrap();
        base.create_transition(a, b);
        base.create_transition(b, c);
        base.create_transition(c, a);

        let removed = base.retain_modes(|_, m| m.name != "b");
        assert_eq!(removed, vec!["b".to_string()]);
        assert_eq!(base.mode_names(), vec!["a".to_string(), "c".to_string()]);
        assert_eq!(base.transitions.len(), 1);
        assert!(base.find_transition("c", "a").is_some());
        assert_eq!(base.mode_id("c"), Some(ModeId(1)));
    }

    #[test]
    fn names_must_be_identifiers() {
        assert!(validate_name("_m_0_1", "test").is_ok());
        assert!(validate_name("heater.x", "test").is_err());
        assert!(validate_name("0x", "test").is_err());
        assert!(validate_name("", "test").is_err());
    }

    #[test]
    fn unused_label_is_rejected() {
        let mut config = two_mode_config();
        config.root.labels.insert("sync".into());
        assert!(config.validate().unwrap_err().to_string().contains("sync"));
    }
}
