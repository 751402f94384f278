//! Hybrid automaton intermediate representation and the transformations built on it.
//!
//! A model is a [`ir::Configuration`]: a root component (flat or a network of
//! instances), initial and forbidden sets keyed by mode name, and tool settings.
//! Importers produce configurations, passes rewrite them in place, and printers render
//! them for a target tool.
//!
//! ```
//! use hyauto::ir::{AutomatonMode, Component, Configuration};
//! use hyauto::passes::PassRegistry;
//! use hyexpr::parser::{parse_invariant, parse_value};
//!
//! let mut root = Component::base();
//! root.variables = vec!["x".into()];
//! root.as_base_mut()
//!     .unwrap()
//!     .add_mode(AutomatonMode::new("on").with_flow("x", parse_value("-x").unwrap()))
//!     .unwrap();
//!
//! let mut config = Configuration::new(root);
//! config.init.insert("on".into(), parse_invariant("x = 1").unwrap());
//! config.assign_plot_variables();
//!
//! PassRegistry::default()
//!     .run_pipeline(&mut config, ["simplify", "shorten"])
//!     .unwrap();
//! assert!(config.root.has_mode("mode_0"));
//! ```

pub mod analysis;
pub mod bridge;
pub mod flatten;
pub mod hybridize;
pub mod ir;
pub mod lut;
pub mod magic;
pub mod passes;
pub mod printer;
pub mod sim;
#[cfg(any(test, feature = "test-utils"))]
pub mod tests_utils;
pub mod utils;
