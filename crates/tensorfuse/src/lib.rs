//! Kernel fusion for a small tensor-computation graph IR.
//!
//! The crate carries two layers:
//!
//! - [`graph`]: an arena-backed DAG of tensor operations. Nodes have ordered
//!   input and output values, values know their uses, and fusion-group nodes
//!   own a nested subgraph executed as one compiled kernel.
//! - [`passes`]: graph rewrites, centred on [`fuse_graph`], which collapses
//!   runs of elementwise operators into fusion groups and redistributes
//!   tensor splits that stand in the way.
//!
//! The pass mutates one graph exclusively, runs to completion without I/O,
//! and never changes observable numeric results.

pub mod graph;
pub mod passes;

pub use graph::{
    validate_graph, AttrValue, DType, Graph, GraphError, MapOp, NodeId, NodeKind, TensorType, Use,
    ValueId, ATTR_CHUNKS, ATTR_DIM, ATTR_SUBGRAPH, HOST_DEVICE,
};
pub use passes::fuse::{fuse_graph, FuseGraphPass};
pub use passes::{GraphPass, PassResult};
