//! Fuses runs of elementwise operators into `FusionGroup` nodes.
//!
//! The scanner walks consumers in reverse topological order; every visit may
//! absorb one producer into a growing group, or redistribute a `split` that
//! stands between a fusable producer and its consumer. Whole sweeps repeat
//! until nothing changes: a single sweep can leave two groups that only
//! become mergeable once one of them has swallowed the intervening user
//! (see the two-sweep test for the classic shape).

mod chunk;
mod classify;
mod group;

use std::cmp::Reverse;
use std::collections::HashMap;

use crate::graph::{Graph, NodeId, ValueId};
use crate::passes::{GraphPass, PassResult};

/// Fuses eligible producer/consumer runs in `graph`, in place.
pub fn fuse_graph(graph: &mut Graph) {
    GraphFuser::new(graph).run();
}

/// Pass wrapper around [`fuse_graph`] reporting rewrite statistics.
#[derive(Debug, Default)]
pub struct FuseGraphPass;

impl GraphPass for FuseGraphPass {
    fn name(&self) -> &'static str {
        "fuse_graph"
    }

    fn run(&self, graph: &mut Graph) -> PassResult {
        let result = GraphFuser::new(graph).run();
        if std::env::var("TENSORFUSE_PASS_STATS").is_ok() {
            println!(
                "[{}] changed={} sweeps={} rewrites={} erased={}",
                self.name(),
                result.changed,
                result.iterations,
                result.rewrites_applied,
                result.erased_nodes
            );
        }
        result
    }
}

pub(crate) struct GraphFuser<'g> {
    graph: &'g mut Graph,
    /// Orders nodes so producer/consumer fusions are considered in reverse
    /// topological order: `index[a] > index[b]` iff `a` occurs after `b`.
    /// Nodes created during the pass copy the index of their insertion
    /// reference, so the map is not bijective; the occurs-after relation it
    /// answers stays sound for the pairs the pass compares.
    topo_index: HashMap<NodeId, usize>,
    rewrites: usize,
    erased: usize,
}

impl<'g> GraphFuser<'g> {
    pub(crate) fn new(graph: &'g mut Graph) -> Self {
        GraphFuser {
            graph,
            topo_index: HashMap::new(),
            rewrites: 0,
            erased: 0,
        }
    }

    pub(crate) fn run(mut self) -> PassResult {
        self.topo_index.insert(self.graph.param_node(), 0);
        let nodes: Vec<NodeId> = self.graph.nodes().collect();
        let mut index = 1usize;
        for node in nodes {
            self.topo_index.insert(node, index);
            index += 1;
        }
        self.topo_index.insert(self.graph.return_node(), index);

        let mut sweeps = 0usize;
        let mut changed_ever = false;
        let mut any_changed = true;
        while any_changed {
            any_changed = false;
            sweeps += 1;
            let mut cursor = self.graph.last_node();
            while let Some(consumer) = cursor {
                let (next, changed) = self.scan_node(consumer);
                any_changed |= changed;
                cursor = next;
            }
            changed_ever |= any_changed;
        }

        PassResult {
            changed: changed_ever,
            iterations: sweeps,
            rewrites_applied: self.rewrites,
            erased_nodes: self.erased,
        }
    }

    /// Visits one consumer; returns the node to scan next and whether a
    /// rewrite happened. After a rewrite the returned node is the rescan
    /// target (the same consumer after a chunk move, the fusion group after
    /// a fuse), not the predecessor.
    fn scan_node(&mut self, consumer: NodeId) -> (Option<NodeId>, bool) {
        let stage = self.graph.stage_of(consumer);
        let prev_stage = self.graph.set_current_stage(stage);
        let result = self.scan_node_in_stage(consumer);
        self.graph.set_current_stage(prev_stage);
        result
    }

    fn scan_node_in_stage(&mut self, consumer: NodeId) -> (Option<NodeId>, bool) {
        if classify::is_fusable_as_exit_node(self.graph, consumer) {
            let mut inputs: Vec<ValueId> = self.graph.inputs_of(consumer).to_vec();
            for &value in &inputs {
                let producer = self.graph.node_of(value);
                assert!(
                    self.topo_index.contains_key(&producer),
                    "scanned consumer reads a node with no topological index"
                );
            }
            // Handle inputs in reverse topological order too: in f(a, a+b)
            // the a-use must be considered after the (a+b)-use, or a would
            // appear to have a second, earlier user.
            inputs.sort_by_key(|&value| Reverse(self.topo_index[&self.graph.node_of(value)]));
            let consumer_stage = self.graph.stage_of(consumer);
            for producer in inputs {
                if self.graph.stage_of(self.graph.node_of(producer)) != consumer_stage {
                    continue;
                }
                if self.try_to_move_chunk(consumer, producer) {
                    // The chunk ahead of this consumer was redistributed to
                    // allow fusion; rescan the same consumer to perform it.
                    return (Some(consumer), true);
                }
                if self.should_fuse(consumer, producer) {
                    let group = self.fuse(consumer, producer);
                    // The consumer now lives inside a group; rescan the group
                    // so further producers can accrete onto it.
                    return (Some(group), true);
                }
            }
        }
        (self.graph.prev_node(consumer), false)
    }

    /// Necessary condition for pulling `producer` into `consumer`'s group.
    /// Uses that occur after the consumer are tolerated: they are re-routed
    /// to read the producer from an added group output. A use strictly
    /// before the consumer would force materialising the producer twice.
    fn all_users_are_this_consumer_or_occur_after_it(
        &self,
        consumer: NodeId,
        producer: ValueId,
    ) -> bool {
        self.graph.uses_of(producer).iter().all(|u| {
            u.user == consumer || self.topo_index[&consumer] <= self.topo_index[&u.user]
        })
    }

    fn all_users_are_this_consumer(&self, consumer: NodeId, producer: ValueId) -> bool {
        self.graph
            .uses_of(producer)
            .iter()
            .all(|u| u.user == consumer)
    }

    fn should_fuse(&self, consumer: NodeId, producer: ValueId) -> bool {
        classify::is_fusable(self.graph, self.graph.node_of(producer))
            && self.all_users_are_this_consumer_or_occur_after_it(consumer, producer)
    }

    fn insert_after_indexed(&mut self, node: NodeId, after: NodeId) {
        self.graph.insert_after(node, after);
        self.topo_index.insert(node, self.topo_index[&after]);
    }

    fn insert_at(&mut self, insertion_point: &mut NodeId, node: NodeId) {
        self.insert_after_indexed(node, *insertion_point);
        *insertion_point = node;
    }

    fn destroy(&mut self, node: NodeId) {
        self.graph.destroy(node);
        self.erased += 1;
    }
}
