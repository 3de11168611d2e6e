//! Distributes a split across the operands of the elementwise op feeding it.
//!
//! `a, b = split(op(x, y))` becomes
//! `x0, x1 = split(x); y0, y1 = split(y); a = op(x0, y0); b = op(x1, y1)`,
//! which exposes `a` and `b` as fusable producers of the consumer that
//! triggered the rewrite. Splitting partitions element indices and an
//! elementwise op is index-local, so the commutation is exact pointwise.
//!
//! The rewrite changes the contiguity of `a` and `b`; it is only performed
//! when the consumer is fusable, which guarantees a simple-map operator runs
//! afterwards and restores contiguity before the values leave the group.

use crate::graph::{NodeId, NodeKind, ValueId};

use super::{classify, GraphFuser};

impl GraphFuser<'_> {
    pub(super) fn try_to_move_chunk(&mut self, consumer: NodeId, producer: ValueId) -> bool {
        let chunk = self.graph.node_of(producer);
        if !classify::is_chunk(self.graph, chunk) {
            return false;
        }
        // The value being chunked must be fusable into the consumer and feed
        // nothing but the chunk.
        let producer_for_chunk = self.graph.inputs_of(chunk)[0];
        let op = self.graph.node_of(producer_for_chunk);
        if !classify::is_fusable(self.graph, op)
            || !self.all_users_are_this_consumer(chunk, producer_for_chunk)
        {
            return false;
        }
        // And every chunk output must flow only into this consumer.
        for &sel in self.graph.outputs_of(chunk) {
            if self.graph.uses_of(sel).iter().any(|u| u.user != consumer) {
                return false;
            }
        }
        assert_eq!(
            self.graph.outputs_of(op).len(),
            1,
            "chunk distribution expects a single-output producer"
        );

        let chunk_outputs: Vec<ValueId> = self.graph.outputs_of(chunk).to_vec();
        let op_inputs: Vec<ValueId> = self.graph.inputs_of(op).to_vec();
        let op_kind = self.graph.kind_of(op);

        // New nodes walk forward from the original split so the node list
        // stays a valid topological linearisation.
        let mut insertion_point = chunk;

        // chunked_inputs[operand][chunk_index]: the chunk_index'th piece of
        // the operand'th input of op.
        let mut chunked_inputs: Vec<Vec<ValueId>> = Vec::with_capacity(op_inputs.len());
        for &input in &op_inputs {
            let input_type = self
                .graph
                .type_of(input)
                .cloned()
                .expect("operands of a fusable op carry tensor types");
            let input_chunk = self.graph.create(NodeKind::Split, 0);
            self.graph.copy_attributes(input_chunk, chunk);
            self.graph.add_input(input_chunk, input);
            self.insert_at(&mut insertion_point, input_chunk);

            let mut pieces = Vec::with_capacity(chunk_outputs.len());
            for &chunk_sel in &chunk_outputs {
                let sel_type = self
                    .graph
                    .type_of(chunk_sel)
                    .expect("split outputs carry tensor types");
                let sizes = sel_type.sizes().to_vec();
                let strides = sel_type.strides().to_vec();
                let piece = self.graph.add_output(input_chunk);
                self.graph
                    .set_type(piece, input_type.with_sizes_strides(sizes, strides));
                pieces.push(piece);
            }
            chunked_inputs.push(pieces);
        }

        // Apply op to each chunk of the chunked operands and rewrite the
        // graph to use the results.
        for &chunk_sel in &chunk_outputs {
            let chunked_op = self.graph.create(op_kind, 1);
            self.graph.copy_attributes(chunked_op, op);
            // Simple maps always produce contiguous output.
            let out_type = self
                .graph
                .type_of(chunk_sel)
                .expect("split outputs carry tensor types")
                .contiguous();
            let out = self.graph.outputs_of(chunked_op)[0];
            self.graph.set_type(out, out_type);
            let piece_index = self.graph.offset_of(chunk_sel);
            for pieces in &chunked_inputs {
                let piece = pieces[piece_index];
                self.graph.add_input(chunked_op, piece);
            }
            self.insert_at(&mut insertion_point, chunked_op);
            self.graph.replace_all_uses_with(chunk_sel, out);
        }

        log::debug!(
            "distributed split %{} across {} operand(s) of %{}",
            chunk.0,
            op_inputs.len(),
            op.0
        );
        self.destroy(chunk);
        self.destroy(op);
        self.rewrites += 1;
        true
    }
}
