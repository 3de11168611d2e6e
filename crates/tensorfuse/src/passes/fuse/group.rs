//! Builds and grows fusion groups.
//!
//! A group's nested subgraph stays in positional lockstep with the outer
//! node: parameter `i` of the subgraph mirrors outer input `i`, subgraph
//! output `i` mirrors outer output `i`. Every mutation here grows or shrinks
//! both sides together.

use std::collections::HashMap;

use crate::graph::{NodeId, NodeKind, ValueId};

use super::GraphFuser;

impl GraphFuser<'_> {
    /// Canonical fusion entry: pulls the node producing `producer` into
    /// `consumer`'s group (creating a singleton group around the consumer
    /// first when needed) and returns the group.
    pub(super) fn fuse(&mut self, consumer: NodeId, producer: ValueId) -> NodeId {
        let group = if self.graph.kind_of(consumer) != NodeKind::FusionGroup {
            self.create_singleton_fusion_group(consumer)
        } else {
            consumer
        };

        let producer_node = self.graph.node_of(producer);
        if self.graph.kind_of(producer_node) == NodeKind::FusionGroup {
            self.merge_fusion_groups(group, producer_node);
            self.rewrites += 1;
            log::debug!(
                "merged producer group %{} into group %{}",
                producer_node.0,
                group.0
            );
            return group;
        }

        let merged = self.merge_node_into_group(group, producer_node);
        // Uses of the producer may remain: fusion is allowed when the other
        // users occur after the consumer. Re-route them to the producer's
        // copy inside the group via an added group output.
        if !self.graph.uses_of(producer).is_empty() {
            let mut sub = self.graph.take_subgraph(group);
            let inner_output = sub.outputs_of(merged)[0];
            sub.register_output(inner_output);
            self.graph.put_subgraph(group, sub);
            let new_producer = self.graph.add_output(group);
            self.graph.copy_metadata(new_producer, producer);
            self.graph.replace_all_uses_with(producer, new_producer);
        }
        self.destroy(producer_node);
        self.rewrites += 1;
        log::debug!("fused node %{} into group %{}", producer_node.0, group.0);
        group
    }

    /// Replaces `n` with a fusion group containing just `n`, semantically
    /// equivalent to it.
    pub(super) fn create_singleton_fusion_group(&mut self, n: NodeId) -> NodeId {
        let group = self.graph.create_fusion_group();
        // The new node takes over n's position so occurs-after queries keep
        // a valid answer for it.
        self.topo_index.insert(group, self.topo_index[&n]);
        self.graph.insert_before(group, n);

        let merged = self.merge_node_into_group(group, n);
        let mut sub = self.graph.take_subgraph(group);
        let inner_output = sub.outputs_of(merged)[0];
        sub.register_output(inner_output);
        self.graph.put_subgraph(group, sub);

        let sel = self.graph.add_output(group);
        let n_output = self.graph.outputs_of(n)[0];
        self.graph.copy_metadata(sel, n_output);
        self.graph.replace_all_uses_with(n_output, sel);
        self.destroy(n);
        group
    }

    /// Clones `n` into `group`'s subgraph (inputs remapped to subgraph
    /// parameters, extending both input lists for operands the group has not
    /// seen) and returns the clone. Does not touch `n`'s outputs: the caller
    /// decides whether they become group outputs. Does not work when `n`
    /// consumes one of the group's outputs.
    pub(super) fn merge_node_into_group(&mut self, group: NodeId, n: NodeId) -> NodeId {
        assert!(
            self.graph.kind_of(n) != NodeKind::FusionGroup,
            "the single-node merge path cannot absorb a fusion group"
        );
        let mut sub = self.graph.take_subgraph(group);
        assert_eq!(
            self.graph.inputs_of(group).len(),
            sub.inputs().len(),
            "fusion group inputs desynchronised from subgraph parameters"
        );

        // Outer values already flowing into the group, keyed to the subgraph
        // parameters that mirror them.
        let mut inputs_map: HashMap<ValueId, ValueId> = HashMap::new();
        for (i, &outer) in self.graph.inputs_of(group).iter().enumerate() {
            inputs_map.insert(outer, sub.inputs()[i]);
        }

        let n_inputs: Vec<ValueId> = self.graph.inputs_of(n).to_vec();
        for input in n_inputs {
            if inputs_map.contains_key(&input) {
                continue;
            }
            let in_group = sub.add_graph_input();
            if let Some(ty) = self.graph.type_of(input).cloned() {
                sub.set_type(in_group, ty);
            }
            inputs_map.insert(input, in_group);
            self.graph.add_input(group, input);
        }

        let in_graph = sub.create_clone(self.graph, n, |outer| inputs_map[&outer]);

        // If n's output was feeding the group, that edge is now internal:
        // drop the outer input and rewire the mirroring parameter to the
        // freshly cloned node.
        let n_output = self.graph.outputs_of(n)[0];
        if let Some(pos) = self
            .graph
            .inputs_of(group)
            .iter()
            .position(|&input| input == n_output)
        {
            self.graph.remove_input(group, pos);
            let parameter = sub.inputs()[pos];
            let replacement = sub.outputs_of(in_graph)[0];
            sub.replace_all_uses_with(parameter, replacement);
            sub.erase_graph_input(pos);
        }

        sub.prepend(in_graph);
        self.graph.put_subgraph(group, sub);
        in_graph
    }

    /// Merges `producer_group` into `consumer_group` by un-fusing the
    /// producer into temporary outer nodes, then absorbing them one by one
    /// in reverse creation order so each absorbed node's operands are still
    /// present outside.
    pub(super) fn merge_fusion_groups(&mut self, consumer_group: NodeId, producer_group: NodeId) {
        let producer_sub = self.graph.take_subgraph(producer_group);

        let mut inner_to_outer: HashMap<ValueId, ValueId> = HashMap::new();
        for (i, &inner) in producer_sub.inputs().iter().enumerate() {
            inner_to_outer.insert(inner, self.graph.inputs_of(producer_group)[i]);
        }

        let mut temporary_nodes: Vec<NodeId> = Vec::new();
        let inner_nodes: Vec<NodeId> = producer_sub.nodes().collect();
        for inner in inner_nodes {
            let outer = self
                .graph
                .create_clone(&producer_sub, inner, |value| inner_to_outer[&value]);
            self.graph.insert_before(outer, producer_group);
            temporary_nodes.push(outer);
            let outer_outputs: Vec<ValueId> = self.graph.outputs_of(outer).to_vec();
            for (i, &inner_output) in producer_sub.outputs_of(inner).iter().enumerate() {
                inner_to_outer.insert(inner_output, outer_outputs[i]);
            }
        }

        let group_outputs: Vec<ValueId> = self.graph.outputs_of(producer_group).to_vec();
        for (i, &inner_output) in producer_sub.outputs().iter().enumerate() {
            let outer_output = inner_to_outer[&inner_output];
            self.graph.replace_all_uses_with(group_outputs[i], outer_output);
        }
        self.destroy(producer_group);

        for &node in temporary_nodes.iter().rev() {
            let merged = self.merge_node_into_group(consumer_group, node);
            // Outputs that are still read from outside become group outputs.
            let outputs: Vec<ValueId> = self.graph.outputs_of(node).to_vec();
            for (i, &output) in outputs.iter().enumerate() {
                if self.graph.uses_of(output).is_empty() {
                    continue;
                }
                let mut sub = self.graph.take_subgraph(consumer_group);
                let inner_output = sub.outputs_of(merged)[i];
                sub.register_output(inner_output);
                self.graph.put_subgraph(consumer_group, sub);
                let new_output = self.graph.add_output(consumer_group);
                self.graph.copy_metadata(new_output, output);
                self.graph.replace_all_uses_with(output, new_output);
            }
            self.destroy(node);
        }
    }
}
