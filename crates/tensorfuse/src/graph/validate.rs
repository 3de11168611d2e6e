use std::collections::HashSet;

use thiserror::Error;

use super::{Graph, NodeKind, ValueId};

/// Structural defects detectable by [`validate_graph`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("node %{node} reads value %{value} before it is defined")]
    UseBeforeDef { node: u32, value: u32 },
    #[error("value %{value} records a use by node %{user} input {index}, which reads %{found}")]
    StaleUseRecord {
        value: u32,
        user: u32,
        index: usize,
        found: u32,
    },
    #[error("node %{node} input {index} of value %{value} has no matching use record")]
    MissingUseRecord {
        node: u32,
        index: usize,
        value: u32,
    },
    #[error("fusion group %{node} has {outer} inputs but its subgraph has {inner}")]
    GroupInputArity {
        node: u32,
        outer: usize,
        inner: usize,
    },
    #[error("fusion group %{node} has {outer} outputs but its subgraph has {inner}")]
    GroupOutputArity {
        node: u32,
        outer: usize,
        inner: usize,
    },
}

/// Checks use-def consistency, dependency ordering, and the group/subgraph
/// arity invariant, recursing into fusion-group subgraphs.
pub fn validate_graph(graph: &Graph) -> Result<(), GraphError> {
    let mut available: HashSet<ValueId> = graph.inputs().iter().copied().collect();
    check_node_reads(graph, graph.param_node(), &available)?;

    for node in graph.nodes() {
        check_node_reads(graph, node, &available)?;
        for &output in graph.outputs_of(node) {
            available.insert(output);
        }
        if graph.kind_of(node) == NodeKind::FusionGroup {
            let sub = graph.subgraph(node);
            let outer_inputs = graph.inputs_of(node).len();
            let inner_inputs = sub.inputs().len();
            if outer_inputs != inner_inputs {
                return Err(GraphError::GroupInputArity {
                    node: node.0,
                    outer: outer_inputs,
                    inner: inner_inputs,
                });
            }
            let outer_outputs = graph.outputs_of(node).len();
            let inner_outputs = sub.outputs().len();
            if outer_outputs != inner_outputs {
                return Err(GraphError::GroupOutputArity {
                    node: node.0,
                    outer: outer_outputs,
                    inner: inner_outputs,
                });
            }
            validate_graph(sub)?;
        }
    }

    check_node_reads(graph, graph.return_node(), &available)?;
    Ok(())
}

fn check_node_reads(
    graph: &Graph,
    node: super::NodeId,
    available: &HashSet<ValueId>,
) -> Result<(), GraphError> {
    for (index, &value) in graph.inputs_of(node).iter().enumerate() {
        if !available.contains(&value) {
            return Err(GraphError::UseBeforeDef {
                node: node.0,
                value: value.0,
            });
        }
        let recorded = graph
            .uses_of(value)
            .iter()
            .any(|u| u.user == node && u.index == index);
        if !recorded {
            return Err(GraphError::MissingUseRecord {
                node: node.0,
                index,
                value: value.0,
            });
        }
    }
    for &output in graph.outputs_of(node) {
        for u in graph.uses_of(output) {
            let found = graph.inputs_of(u.user).get(u.index).copied();
            if found != Some(output) {
                return Err(GraphError::StaleUseRecord {
                    value: output.0,
                    user: u.user.0,
                    index: u.index,
                    found: found.map(|v| v.0).unwrap_or(u32::MAX),
                });
            }
        }
    }
    Ok(())
}
