//! Static analyses over expressions and mode graphs.

pub mod range;
pub mod reachability;

pub use range::{extract_constants, variable_range, variable_ranges};
pub use reachability::{mode_graph, reachable_modes};
