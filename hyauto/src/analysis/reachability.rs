use bit_set::BitSet;
use petgraph::graphmap::DiGraphMap;
use petgraph::visit::Dfs;

use crate::ir::{BaseComponent, ModeId};

/// Mode graph of a base automaton, one edge per distinct (from, to) pair.
pub fn mode_graph(base: &BaseComponent) -> DiGraphMap<ModeId, ()> {
    let mut graph = DiGraphMap::new();
    for id in base.mode_ids() {
        graph.add_node(id);
    }
    for t in &base.transitions {
        graph.add_edge(t.from, t.to, ());
    }
    graph
}

/// Indices of the modes reachable through the transition relation from any of `initial`.
pub fn reachable_modes(base: &BaseComponent, initial: impl IntoIterator<Item = ModeId>) -> BitSet {
    let graph = mode_graph(base);
    let mut reached = BitSet::with_capacity(base.num_modes());

    for start in initial {
        if reached.contains(start.index()) {
            continue;
        }
        let mut dfs = Dfs::new(&graph, start);
        while let Some(id) = dfs.next(&graph) {
            reached.insert(id.index());
        }
    }

    reached
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_fixpoint() {
        let mut base = BaseComponent::new();
        let a = base.create_mode("a").unwrap();
        let b = base.create_mode("b").unwrap();
        let c = base.create_mode("c").unwrap();
        let d = base.create_mode("d").unwrap();
        base.create_transition(a, b);
        base.create_transition(b, a);
        base.create_transition(d, c);

        let reached: Vec<usize> = reachable_modes(&base, [a]).iter().collect();
        assert_eq!(reached, [0, 1]);
        assert_eq!(reachable_modes(&base, [d, b]).len(), 4);
        assert!(!reachable_modes(&base, [c]).contains(d.index()));
    }
}
