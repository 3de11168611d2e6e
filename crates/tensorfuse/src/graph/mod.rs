//! Arena-backed tensor-computation graph.
//!
//! The IR is a cyclic web of back-references (value → uses → node → inputs →
//! value), so nodes and values live in vector-backed arenas addressed by
//! integer handles and the graph mutators keep both directions of every edge
//! in sync. Node ordering is an intrusive list bounded by two sentinels: a
//! `Param` node whose outputs are the graph inputs and a `Return` node whose
//! inputs are the graph outputs. Fusion groups own a nested [`Graph`] stored
//! as a node attribute.

mod kind;
mod print;
mod types;
mod validate;

use std::collections::BTreeMap;

use smallvec::SmallVec;

pub use kind::{AttrValue, MapOp, NodeKind, ATTR_CHUNKS, ATTR_DIM, ATTR_SUBGRAPH};
pub use types::{DType, TensorType, HOST_DEVICE};
pub use validate::{validate_graph, GraphError};

/// Stable handle addressing a node slot in the graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// Stable handle addressing a value slot in the graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

/// A single consuming site of a value: which node reads it, at which input
/// position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Use {
    pub user: NodeId,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq)]
struct NodeData {
    kind: NodeKind,
    inputs: Vec<ValueId>,
    outputs: Vec<ValueId>,
    attrs: BTreeMap<String, AttrValue>,
    stage: usize,
    prev: Option<NodeId>,
    next: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq)]
struct ValueData {
    node: NodeId,
    offset: usize,
    ty: Option<TensorType>,
    uses: SmallVec<[Use; 4]>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Graph {
    nodes: Vec<Option<NodeData>>,
    values: Vec<Option<ValueData>>,
    param: NodeId,
    ret: NodeId,
    current_stage: usize,
}

impl Default for Graph {
    fn default() -> Self {
        Graph::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        let mut graph = Graph {
            nodes: Vec::new(),
            values: Vec::new(),
            param: NodeId(0),
            ret: NodeId(0),
            current_stage: 0,
        };
        let param = graph.alloc_node(NodeKind::Param, 0);
        let ret = graph.alloc_node(NodeKind::Return, 0);
        graph.node_mut(param).next = Some(ret);
        graph.node_mut(ret).prev = Some(param);
        graph.param = param;
        graph.ret = ret;
        graph
    }

    // ---- slot access -----------------------------------------------------

    fn node(&self, id: NodeId) -> &NodeData {
        self.nodes[id.0 as usize]
            .as_ref()
            .expect("node handle refers to a destroyed node")
    }

    fn node_mut(&mut self, id: NodeId) -> &mut NodeData {
        self.nodes[id.0 as usize]
            .as_mut()
            .expect("node handle refers to a destroyed node")
    }

    fn value(&self, id: ValueId) -> &ValueData {
        self.values[id.0 as usize]
            .as_ref()
            .expect("value handle refers to a freed value")
    }

    fn value_mut(&mut self, id: ValueId) -> &mut ValueData {
        self.values[id.0 as usize]
            .as_mut()
            .expect("value handle refers to a freed value")
    }

    fn alloc_node(&mut self, kind: NodeKind, n_outputs: usize) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Some(NodeData {
            kind,
            inputs: Vec::new(),
            outputs: Vec::new(),
            attrs: BTreeMap::new(),
            stage: self.current_stage,
            prev: None,
            next: None,
        }));
        for _ in 0..n_outputs {
            self.add_output(id);
        }
        id
    }

    fn alloc_value(&mut self, node: NodeId, offset: usize) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(Some(ValueData {
            node,
            offset,
            ty: None,
            uses: SmallVec::new(),
        }));
        id
    }

    // ---- node queries ----------------------------------------------------

    pub fn kind_of(&self, node: NodeId) -> NodeKind {
        self.node(node).kind
    }

    pub fn inputs_of(&self, node: NodeId) -> &[ValueId] {
        &self.node(node).inputs
    }

    pub fn outputs_of(&self, node: NodeId) -> &[ValueId] {
        &self.node(node).outputs
    }

    pub fn stage_of(&self, node: NodeId) -> usize {
        self.node(node).stage
    }

    pub fn set_stage_of(&mut self, node: NodeId, stage: usize) {
        self.node_mut(node).stage = stage;
    }

    pub fn attr(&self, node: NodeId, key: &str) -> Option<&AttrValue> {
        self.node(node).attrs.get(key)
    }

    pub fn set_attr(&mut self, node: NodeId, key: &str, value: AttrValue) {
        self.node_mut(node).attrs.insert(key.to_string(), value);
    }

    /// Copies every attribute of `src` onto `dst`, replacing collisions.
    pub fn copy_attributes(&mut self, dst: NodeId, src: NodeId) {
        let attrs = self.node(src).attrs.clone();
        self.node_mut(dst).attrs.extend(attrs);
    }

    pub fn is_alive(&self, node: NodeId) -> bool {
        self.nodes
            .get(node.0 as usize)
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    // ---- value queries ---------------------------------------------------

    /// The node producing this value.
    pub fn node_of(&self, value: ValueId) -> NodeId {
        self.value(value).node
    }

    /// Position of this value in its producer's output list.
    pub fn offset_of(&self, value: ValueId) -> usize {
        self.value(value).offset
    }

    pub fn type_of(&self, value: ValueId) -> Option<&TensorType> {
        self.value(value).ty.as_ref()
    }

    pub fn has_type(&self, value: ValueId) -> bool {
        self.value(value).ty.is_some()
    }

    pub fn set_type(&mut self, value: ValueId, ty: TensorType) {
        self.value_mut(value).ty = Some(ty);
    }

    /// Copies `src`'s metadata (currently: its optional type) onto `dst`.
    pub fn copy_metadata(&mut self, dst: ValueId, src: ValueId) {
        let ty = self.value(src).ty.clone();
        self.value_mut(dst).ty = ty;
    }

    pub fn uses_of(&self, value: ValueId) -> &[Use] {
        &self.value(value).uses
    }

    // ---- graph-level views -----------------------------------------------

    pub fn param_node(&self) -> NodeId {
        self.param
    }

    pub fn return_node(&self) -> NodeId {
        self.ret
    }

    /// Graph inputs: the outputs of the param sentinel.
    pub fn inputs(&self) -> &[ValueId] {
        &self.node(self.param).outputs
    }

    /// Graph outputs: the inputs of the return sentinel.
    pub fn outputs(&self) -> &[ValueId] {
        &self.node(self.ret).inputs
    }

    /// Stage assigned to nodes created from this point on. Returns the
    /// previous stage so callers can restore it.
    pub fn set_current_stage(&mut self, stage: usize) -> usize {
        std::mem::replace(&mut self.current_stage, stage)
    }

    pub fn current_stage(&self) -> usize {
        self.current_stage
    }

    /// Iterates live nodes in list order, sentinels excluded.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        let mut cursor = self.node(self.param).next;
        let ret = self.ret;
        std::iter::from_fn(move || {
            let id = cursor?;
            if id == ret {
                return None;
            }
            cursor = self.node(id).next;
            Some(id)
        })
    }

    /// The last non-sentinel node, if any.
    pub fn last_node(&self) -> Option<NodeId> {
        let prev = self
            .node(self.ret)
            .prev
            .expect("return sentinel must stay linked");
        if prev == self.param {
            None
        } else {
            Some(prev)
        }
    }

    /// The node preceding `node` in list order, stopping at the param
    /// sentinel.
    pub fn prev_node(&self, node: NodeId) -> Option<NodeId> {
        let prev = self.node(node).prev.expect("node is not linked");
        if prev == self.param {
            None
        } else {
            Some(prev)
        }
    }

    // ---- construction ----------------------------------------------------

    /// Allocates an unlinked node with `n_outputs` untyped outputs. Link it
    /// with [`Graph::insert_before`], [`Graph::insert_after`],
    /// [`Graph::prepend`], or [`Graph::append`].
    pub fn create(&mut self, kind: NodeKind, n_outputs: usize) -> NodeId {
        assert!(
            !matches!(kind, NodeKind::Param | NodeKind::Return),
            "sentinel kinds cannot be created directly"
        );
        self.alloc_node(kind, n_outputs)
    }

    /// Allocates an unlinked fusion-group node with an empty nested subgraph
    /// and no inputs or outputs.
    pub fn create_fusion_group(&mut self) -> NodeId {
        let group = self.alloc_node(NodeKind::FusionGroup, 0);
        self.set_attr(group, ATTR_SUBGRAPH, AttrValue::Subgraph(Box::new(Graph::new())));
        group
    }

    /// Clones `src` (living in `src_graph`) into this graph: same kind,
    /// attributes, stage, and per-output types, with every input remapped
    /// through `remap`. The clone is unlinked. Crossing graphs is the point:
    /// this is how nodes move between a graph and a nested subgraph.
    pub fn create_clone(
        &mut self,
        src_graph: &Graph,
        src: NodeId,
        mut remap: impl FnMut(ValueId) -> ValueId,
    ) -> NodeId {
        let src_data = src_graph.node(src);
        let kind = src_data.kind;
        let attrs = src_data.attrs.clone();
        let stage = src_data.stage;
        let inputs: Vec<ValueId> = src_data.inputs.clone();
        let output_types: Vec<Option<TensorType>> = src_data
            .outputs
            .iter()
            .map(|&out| src_graph.value(out).ty.clone())
            .collect();

        let clone = self.alloc_node(kind, 0);
        self.node_mut(clone).attrs = attrs;
        self.node_mut(clone).stage = stage;
        for input in inputs {
            let mapped = remap(input);
            self.add_input(clone, mapped);
        }
        for ty in output_types {
            let out = self.add_output(clone);
            self.value_mut(out).ty = ty;
        }
        clone
    }

    // ---- linking ---------------------------------------------------------

    pub fn insert_before(&mut self, node: NodeId, reference: NodeId) {
        debug_assert!(self.node(node).prev.is_none() && self.node(node).next.is_none());
        let prev = self
            .node(reference)
            .prev
            .expect("cannot insert before the param sentinel");
        self.link(prev, node, reference);
    }

    pub fn insert_after(&mut self, node: NodeId, reference: NodeId) {
        debug_assert!(self.node(node).prev.is_none() && self.node(node).next.is_none());
        let next = self
            .node(reference)
            .next
            .expect("cannot insert after the return sentinel");
        self.link(reference, node, next);
    }

    /// Links `node` as the first node after the param sentinel.
    pub fn prepend(&mut self, node: NodeId) {
        let param = self.param;
        self.insert_after(node, param);
    }

    /// Links `node` as the last node before the return sentinel.
    pub fn append(&mut self, node: NodeId) {
        let ret = self.ret;
        self.insert_before(node, ret);
    }

    fn link(&mut self, prev: NodeId, node: NodeId, next: NodeId) {
        self.node_mut(prev).next = Some(node);
        self.node_mut(node).prev = Some(prev);
        self.node_mut(node).next = Some(next);
        self.node_mut(next).prev = Some(node);
    }

    fn unlink(&mut self, node: NodeId) {
        let prev = self.node(node).prev;
        let next = self.node(node).next;
        if let Some(prev) = prev {
            self.node_mut(prev).next = next;
        }
        if let Some(next) = next {
            self.node_mut(next).prev = prev;
        }
        let data = self.node_mut(node);
        data.prev = None;
        data.next = None;
    }

    // ---- edge mutation ---------------------------------------------------

    pub fn add_input(&mut self, node: NodeId, value: ValueId) {
        let index = self.node(node).inputs.len();
        self.node_mut(node).inputs.push(value);
        self.value_mut(value).uses.push(Use { user: node, index });
    }

    /// Removes input `index` of `node`, re-indexing use records of the
    /// remaining inputs.
    pub fn remove_input(&mut self, node: NodeId, index: usize) {
        let value = self.node_mut(node).inputs.remove(index);
        self.value_mut(value)
            .uses
            .retain(|u| !(u.user == node && u.index == index));
        let later: Vec<ValueId> = self.node(node).inputs[index..].to_vec();
        for (shift, value) in later.into_iter().enumerate() {
            let old_index = index + shift + 1;
            let new_index = index + shift;
            let record = self
                .value_mut(value)
                .uses
                .iter_mut()
                .find(|u| u.user == node && u.index == old_index)
                .expect("use record missing while re-indexing inputs");
            record.index = new_index;
        }
    }

    /// Appends a fresh untyped output value to `node`.
    pub fn add_output(&mut self, node: NodeId) -> ValueId {
        let offset = self.node(node).outputs.len();
        let value = self.alloc_value(node, offset);
        self.node_mut(node).outputs.push(value);
        value
    }

    /// Rewrites every consuming site of `from` to read `to` instead.
    pub fn replace_all_uses_with(&mut self, from: ValueId, to: ValueId) {
        if from == to {
            return;
        }
        let uses = std::mem::take(&mut self.value_mut(from).uses);
        for u in uses {
            self.node_mut(u.user).inputs[u.index] = to;
            self.value_mut(to).uses.push(u);
        }
    }

    // ---- graph inputs/outputs --------------------------------------------

    /// Adds a graph input (a fresh untyped output of the param sentinel).
    pub fn add_graph_input(&mut self) -> ValueId {
        let param = self.param;
        self.add_output(param)
    }

    /// Removes graph input `index`, which must have no remaining uses, and
    /// re-offsets the inputs after it.
    pub fn erase_graph_input(&mut self, index: usize) {
        let param = self.param;
        let value = self.node_mut(param).outputs.remove(index);
        assert!(
            self.value(value).uses.is_empty(),
            "erasing a graph input that still has uses"
        );
        self.values[value.0 as usize] = None;
        let later: Vec<ValueId> = self.node(param).outputs[index..].to_vec();
        for (shift, value) in later.into_iter().enumerate() {
            self.value_mut(value).offset = index + shift;
        }
    }

    /// Registers `value` as a graph output (an input of the return sentinel).
    pub fn register_output(&mut self, value: ValueId) {
        let ret = self.ret;
        self.add_input(ret, value);
    }

    // ---- destruction -----------------------------------------------------

    /// Unlinks and frees `node`. Every output must be use-free; values die
    /// with their producer.
    pub fn destroy(&mut self, node: NodeId) {
        assert!(
            !matches!(self.node(node).kind, NodeKind::Param | NodeKind::Return),
            "sentinels cannot be destroyed"
        );
        for &output in &self.node(node).outputs {
            assert!(
                self.value(output).uses.is_empty(),
                "destroying a node whose output still has uses"
            );
        }
        self.unlink(node);
        let inputs: Vec<ValueId> = self.node(node).inputs.clone();
        for input in inputs {
            self.value_mut(input).uses.retain(|u| u.user != node);
        }
        let outputs: Vec<ValueId> = self.node(node).outputs.clone();
        for output in outputs {
            self.values[output.0 as usize] = None;
        }
        self.nodes[node.0 as usize] = None;
    }

    // ---- nested subgraphs ------------------------------------------------

    /// Read-only access to a fusion group's nested subgraph.
    pub fn subgraph(&self, group: NodeId) -> &Graph {
        match self.attr(group, ATTR_SUBGRAPH) {
            Some(AttrValue::Subgraph(sub)) => sub,
            _ => panic!("fusion group is missing its subgraph attribute"),
        }
    }

    /// Moves a fusion group's subgraph out for editing; pair with
    /// [`Graph::put_subgraph`].
    pub fn take_subgraph(&mut self, group: NodeId) -> Graph {
        match self.node_mut(group).attrs.remove(ATTR_SUBGRAPH) {
            Some(AttrValue::Subgraph(sub)) => *sub,
            _ => panic!("fusion group is missing its subgraph attribute"),
        }
    }

    pub fn put_subgraph(&mut self, group: NodeId, sub: Graph) {
        self.set_attr(group, ATTR_SUBGRAPH, AttrValue::Subgraph(Box::new(sub)));
    }
}
