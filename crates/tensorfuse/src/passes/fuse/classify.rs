//! Decides which nodes the fuser may touch.
//!
//! The downstream kernel generator emits accelerator float kernels only, so
//! the predicates gate on float element types and accelerator residency in
//! addition to the op set; widening any of them requires codegen changes.

use crate::graph::{Graph, MapOp, NodeId, NodeKind, HOST_DEVICE};

/// A simple map: output shape equals input shape, layout-agnostic on input,
/// contiguous on output. `min`/`max` only qualify in their binary form; the
/// unary form is a reduction.
pub(crate) fn is_simple_map(graph: &Graph, node: NodeId) -> bool {
    match graph.kind_of(node) {
        NodeKind::Map(MapOp::Min) | NodeKind::Map(MapOp::Max) => {
            graph.inputs_of(node).len() == 2
        }
        NodeKind::Map(_) => true,
        _ => false,
    }
}

pub(crate) fn is_chunk(graph: &Graph, node: NodeId) -> bool {
    graph.kind_of(node) == NodeKind::Split
}

/// True when the node's first output is a tensor resident on an accelerator.
pub(crate) fn on_accelerator(graph: &Graph, node: NodeId) -> bool {
    graph
        .outputs_of(node)
        .first()
        .and_then(|&out| graph.type_of(out))
        .map(|ty| ty.device() != HOST_DEVICE)
        .unwrap_or(false)
}

/// True when every input and output carries a float tensor type.
pub(crate) fn all_float_io(graph: &Graph, node: NodeId) -> bool {
    let float_typed = |&value| {
        graph
            .type_of(value)
            .map(|ty| ty.dtype().is_float())
            .unwrap_or(false)
    };
    graph.outputs_of(node).iter().all(float_typed)
        && graph.inputs_of(node).iter().all(float_typed)
}

pub(crate) fn is_fusable(graph: &Graph, node: NodeId) -> bool {
    if graph.kind_of(node) == NodeKind::FusionGroup {
        return true;
    }
    is_simple_map(graph, node) && all_float_io(graph, node) && on_accelerator(graph, node)
}

/// Can this node produce an output of a fusion group? Every fusable node can.
/// Concat is not a simple map but may still seed a group as long as all of
/// its inputs share one size, so they can participate in the same map.
pub(crate) fn is_fusable_as_exit_node(graph: &Graph, node: NodeId) -> bool {
    if is_fusable(graph, node) {
        return true;
    }
    if graph.kind_of(node) != NodeKind::Concat || !on_accelerator(graph, node) {
        return false;
    }
    let mut inputs = graph.inputs_of(node).iter();
    let Some(first_sizes) = inputs
        .next()
        .and_then(|&v| graph.type_of(v))
        .map(|ty| ty.sizes())
    else {
        return false;
    };
    inputs.all(|&v| {
        graph
            .type_of(v)
            .map(|ty| ty.sizes() == first_sizes)
            .unwrap_or(false)
    })
}
