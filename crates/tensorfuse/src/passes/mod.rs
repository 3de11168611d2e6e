//! Pass infrastructure for graph rewrites.

pub mod fuse;

use crate::graph::Graph;

/// Result returned by a [`GraphPass`] after it runs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassResult {
    /// Whether the pass changed the graph.
    pub changed: bool,
    /// Number of sweeps the pass performed.
    pub iterations: usize,
    /// Total number of rewrites applied by the pass.
    pub rewrites_applied: usize,
    /// Nodes removed by the pass.
    pub erased_nodes: usize,
}

impl PassResult {
    /// Merges two run results, accumulating statistics.
    pub fn merge(self, other: PassResult) -> PassResult {
        PassResult {
            changed: self.changed || other.changed,
            iterations: self.iterations + other.iterations,
            rewrites_applied: self.rewrites_applied + other.rewrites_applied,
            erased_nodes: self.erased_nodes + other.erased_nodes,
        }
    }
}

/// Canonical interface implemented by passes that rewrite a single graph.
pub trait GraphPass {
    fn name(&self) -> &'static str;
    fn run(&self, graph: &mut Graph) -> PassResult;
}
