//! Shared helpers for integration tests: graph construction shorthands and a
//! reference evaluator used to check that fusion preserves semantics.

#![allow(dead_code)]

use std::collections::HashMap;

use tensorfuse::{
    AttrValue, DType, Graph, MapOp, NodeKind, TensorType, ValueId, ATTR_CHUNKS, ATTR_DIM,
    HOST_DEVICE,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn accel_f32(sizes: &[i64]) -> TensorType {
    TensorType::contiguous_with(DType::F32, 0, sizes.to_vec())
}

pub fn host_f32(sizes: &[i64]) -> TensorType {
    TensorType::contiguous_with(DType::F32, HOST_DEVICE, sizes.to_vec())
}

pub fn accel_i32(sizes: &[i64]) -> TensorType {
    TensorType::contiguous_with(DType::Si32, 0, sizes.to_vec())
}

/// Adds a typed graph input.
pub fn input(graph: &mut Graph, ty: TensorType) -> ValueId {
    let value = graph.add_graph_input();
    graph.set_type(value, ty);
    value
}

/// Appends a map node and returns its output.
pub fn map(graph: &mut Graph, op: MapOp, inputs: &[ValueId], ty: TensorType) -> ValueId {
    let node = graph.create(NodeKind::Map(op), 1);
    for &value in inputs {
        graph.add_input(node, value);
    }
    let out = graph.outputs_of(node)[0];
    graph.set_type(out, ty);
    graph.append(node);
    out
}

/// Appends a split node producing `out_types.len()` chunks along `dim`.
pub fn split(
    graph: &mut Graph,
    value: ValueId,
    dim: i64,
    out_types: Vec<TensorType>,
) -> Vec<ValueId> {
    let node = graph.create(NodeKind::Split, 0);
    graph.set_attr(node, ATTR_CHUNKS, AttrValue::Int(out_types.len() as i64));
    graph.set_attr(node, ATTR_DIM, AttrValue::Int(dim));
    graph.add_input(node, value);
    let mut outs = Vec::with_capacity(out_types.len());
    for ty in out_types {
        let out = graph.add_output(node);
        graph.set_type(out, ty);
        outs.push(out);
    }
    graph.append(node);
    outs
}

/// Appends a concat node along `dim`.
pub fn concat(graph: &mut Graph, inputs: &[ValueId], dim: i64, ty: TensorType) -> ValueId {
    let node = graph.create(NodeKind::Concat, 1);
    graph.set_attr(node, ATTR_DIM, AttrValue::Int(dim));
    for &value in inputs {
        graph.add_input(node, value);
    }
    let out = graph.outputs_of(node)[0];
    graph.set_type(out, ty);
    graph.append(node);
    out
}

/// Appends an opaque node the fuser must leave untouched.
pub fn opaque(graph: &mut Graph, name: &'static str, inputs: &[ValueId], ty: TensorType) -> ValueId {
    let node = graph.create(NodeKind::Opaque(name), 1);
    for &value in inputs {
        graph.add_input(node, value);
    }
    let out = graph.outputs_of(node)[0];
    graph.set_type(out, ty);
    graph.append(node);
    out
}

pub fn fusion_groups(graph: &Graph) -> Vec<tensorfuse::NodeId> {
    graph
        .nodes()
        .filter(|&n| graph.kind_of(n) == NodeKind::FusionGroup)
        .collect()
}

// ---- reference evaluator --------------------------------------------------

/// A contiguous f32 tensor holding the logical value of a graph value.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorData {
    pub sizes: Vec<i64>,
    pub data: Vec<f32>,
}

impl TensorData {
    pub fn new(sizes: Vec<i64>, data: Vec<f32>) -> Self {
        assert_eq!(sizes.iter().product::<i64>() as usize, data.len());
        TensorData { sizes, data }
    }

    /// Deterministic ramp fill, handy for equivalence tests.
    pub fn ramp(sizes: &[i64], start: f32) -> Self {
        let numel = sizes.iter().product::<i64>() as usize;
        let data = (0..numel).map(|i| start + 0.25 * i as f32).collect();
        TensorData::new(sizes.to_vec(), data)
    }
}

/// Evaluates `graph` on `inputs`, recursing into fusion groups. Only the op
/// set exercised by the tests is implemented.
pub fn eval_graph(graph: &Graph, inputs: &[TensorData]) -> Vec<TensorData> {
    assert_eq!(graph.inputs().len(), inputs.len(), "input arity mismatch");
    let mut env: HashMap<ValueId, TensorData> = HashMap::new();
    for (&value, tensor) in graph.inputs().iter().zip(inputs) {
        env.insert(value, tensor.clone());
    }

    for node in graph.nodes() {
        match graph.kind_of(node) {
            NodeKind::Map(op) => {
                let out = graph.outputs_of(node)[0];
                let result = eval_map(graph, node, op, &env, out);
                env.insert(out, result);
            }
            NodeKind::Split => {
                let dim = attr_int(graph, node, ATTR_DIM) as usize;
                let chunks = attr_int(graph, node, ATTR_CHUNKS);
                let src = &env[&graph.inputs_of(node)[0]];
                let pieces = split_tensor(src, dim, chunks);
                assert_eq!(pieces.len(), graph.outputs_of(node).len());
                for (&out, piece) in graph.outputs_of(node).iter().zip(pieces) {
                    env.insert(out, piece);
                }
            }
            NodeKind::Concat => {
                let dim = attr_int(graph, node, ATTR_DIM) as usize;
                let parts: Vec<&TensorData> = graph
                    .inputs_of(node)
                    .iter()
                    .map(|value| &env[value])
                    .collect();
                let out = graph.outputs_of(node)[0];
                env.insert(out, concat_tensors(&parts, dim));
            }
            NodeKind::FusionGroup => {
                let sub = graph.subgraph(node);
                let sub_inputs: Vec<TensorData> = graph
                    .inputs_of(node)
                    .iter()
                    .map(|value| env[value].clone())
                    .collect();
                let results = eval_graph(sub, &sub_inputs);
                assert_eq!(results.len(), graph.outputs_of(node).len());
                for (&out, result) in graph.outputs_of(node).iter().zip(results) {
                    env.insert(out, result);
                }
            }
            other => panic!("reference evaluator cannot run {other}"),
        }
    }

    graph
        .outputs()
        .iter()
        .map(|value| env[value].clone())
        .collect()
}

fn eval_map(
    graph: &Graph,
    node: tensorfuse::NodeId,
    op: MapOp,
    env: &HashMap<ValueId, TensorData>,
    out: ValueId,
) -> TensorData {
    let operands: Vec<&TensorData> = graph
        .inputs_of(node)
        .iter()
        .map(|value| &env[value])
        .collect();
    match operands.len() {
        0 => {
            let ty = graph.type_of(out).expect("nullary map output is typed");
            let fill = match op {
                MapOp::Ones => 1.0,
                MapOp::Zeros => 0.0,
                other => panic!("nullary {other} is not a constant generator"),
            };
            TensorData::new(ty.sizes().to_vec(), vec![fill; ty.numel() as usize])
        }
        1 => {
            let a = operands[0];
            let data = a.data.iter().map(|&x| eval_unary(op, x)).collect();
            TensorData::new(a.sizes.clone(), data)
        }
        2 => {
            let (a, b) = (operands[0], operands[1]);
            assert_eq!(a.sizes, b.sizes, "binary map operands must agree in shape");
            let data = a
                .data
                .iter()
                .zip(&b.data)
                .map(|(&x, &y)| eval_binary(op, x, y))
                .collect();
            TensorData::new(a.sizes.clone(), data)
        }
        n => panic!("map arity {n} not supported by the reference evaluator"),
    }
}

fn eval_unary(op: MapOp, x: f32) -> f32 {
    match op {
        MapOp::Neg => -x,
        MapOp::Abs => x.abs(),
        MapOp::Exp => x.exp(),
        MapOp::Log => x.ln(),
        MapOp::Sqrt => x.sqrt(),
        MapOp::Rsqrt => x.sqrt().recip(),
        MapOp::Reciprocal => x.recip(),
        MapOp::Tanh => x.tanh(),
        MapOp::Sigmoid => 1.0 / (1.0 + (-x).exp()),
        MapOp::Ceil => x.ceil(),
        MapOp::Floor => x.floor(),
        other => panic!("unary {other} not supported by the reference evaluator"),
    }
}

fn eval_binary(op: MapOp, x: f32, y: f32) -> f32 {
    match op {
        MapOp::Add => x + y,
        MapOp::Sub => x - y,
        MapOp::Mul => x * y,
        MapOp::Div => x / y,
        MapOp::Pow => x.powf(y),
        MapOp::Max => x.max(y),
        MapOp::Min => x.min(y),
        other => panic!("binary {other} not supported by the reference evaluator"),
    }
}

fn attr_int(graph: &Graph, node: tensorfuse::NodeId, key: &str) -> i64 {
    graph
        .attr(node, key)
        .and_then(AttrValue::as_int)
        .unwrap_or_else(|| panic!("node is missing int attribute `{key}`"))
}

fn split_tensor(t: &TensorData, dim: usize, chunks: i64) -> Vec<TensorData> {
    let mid = t.sizes[dim];
    assert_eq!(mid % chunks, 0, "split requires equal chunks");
    let chunk_mid = mid / chunks;
    let outer: i64 = t.sizes[..dim].iter().product();
    let inner: i64 = t.sizes[dim + 1..].iter().product();

    let mut pieces = Vec::with_capacity(chunks as usize);
    for c in 0..chunks {
        let mut data = Vec::with_capacity((outer * chunk_mid * inner) as usize);
        for o in 0..outer {
            let base = (o * mid + c * chunk_mid) * inner;
            data.extend_from_slice(&t.data[base as usize..(base + chunk_mid * inner) as usize]);
        }
        let mut sizes = t.sizes.clone();
        sizes[dim] = chunk_mid;
        pieces.push(TensorData::new(sizes, data));
    }
    pieces
}

fn concat_tensors(parts: &[&TensorData], dim: usize) -> TensorData {
    let first = parts[0];
    let outer: i64 = first.sizes[..dim].iter().product();
    let inner: i64 = first.sizes[dim + 1..].iter().product();
    let total_mid: i64 = parts.iter().map(|p| p.sizes[dim]).sum();

    let mut data = Vec::with_capacity((outer * total_mid * inner) as usize);
    for o in 0..outer {
        for part in parts {
            let mid = part.sizes[dim];
            let base = o * mid * inner;
            data.extend_from_slice(&part.data[base as usize..(base + mid * inner) as usize]);
        }
    }
    let mut sizes = first.sizes.clone();
    sizes[dim] = total_mid;
    TensorData::new(sizes, data)
}
