use std::fmt;

use super::Graph;

/// Attribute key holding the nested subgraph of a fusion group.
pub const ATTR_SUBGRAPH: &str = "subgraph";
/// Attribute key holding the chunk count of a split node.
pub const ATTR_CHUNKS: &str = "chunks";
/// Attribute key holding the axis of a split or concat node.
pub const ATTR_DIM: &str = "dim";

/// Elementwise operators eligible for fusion.
///
/// The set is closed: every member maps each output element from the
/// same-index input elements, tolerates arbitrary input layout, and produces
/// contiguous output. `Min`/`Max` are only simple maps in their binary form;
/// the unary form is a reduction and is rejected by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapOp {
    And,
    Or,
    Xor,
    Lshift,
    Rshift,
    Abs,
    Neg,
    Reciprocal,
    Acos,
    Asin,
    Atan,
    Atan2,
    Cos,
    Cosh,
    Sin,
    Sinh,
    Tan,
    Tanh,
    Ceil,
    Floor,
    Round,
    Trunc,
    Frac,
    Add,
    Sub,
    Mul,
    Div,
    Fmod,
    Remainder,
    Pow,
    Clamp,
    Lerp,
    Eq,
    Ne,
    Ge,
    Gt,
    Le,
    Lt,
    Exp,
    Log,
    Log1p,
    Lgamma,
    Max,
    Min,
    Sigmoid,
    Rsqrt,
    Sqrt,
    Ones,
    Zeros,
    SigmoidBackward,
    TanhBackward,
}

impl MapOp {
    pub fn name(self) -> &'static str {
        match self {
            MapOp::And => "and",
            MapOp::Or => "or",
            MapOp::Xor => "xor",
            MapOp::Lshift => "lshift",
            MapOp::Rshift => "rshift",
            MapOp::Abs => "abs",
            MapOp::Neg => "neg",
            MapOp::Reciprocal => "reciprocal",
            MapOp::Acos => "acos",
            MapOp::Asin => "asin",
            MapOp::Atan => "atan",
            MapOp::Atan2 => "atan2",
            MapOp::Cos => "cos",
            MapOp::Cosh => "cosh",
            MapOp::Sin => "sin",
            MapOp::Sinh => "sinh",
            MapOp::Tan => "tan",
            MapOp::Tanh => "tanh",
            MapOp::Ceil => "ceil",
            MapOp::Floor => "floor",
            MapOp::Round => "round",
            MapOp::Trunc => "trunc",
            MapOp::Frac => "frac",
            MapOp::Add => "add",
            MapOp::Sub => "sub",
            MapOp::Mul => "mul",
            MapOp::Div => "div",
            MapOp::Fmod => "fmod",
            MapOp::Remainder => "remainder",
            MapOp::Pow => "pow",
            MapOp::Clamp => "clamp",
            MapOp::Lerp => "lerp",
            MapOp::Eq => "eq",
            MapOp::Ne => "ne",
            MapOp::Ge => "ge",
            MapOp::Gt => "gt",
            MapOp::Le => "le",
            MapOp::Lt => "lt",
            MapOp::Exp => "exp",
            MapOp::Log => "log",
            MapOp::Log1p => "log1p",
            MapOp::Lgamma => "lgamma",
            MapOp::Max => "max",
            MapOp::Min => "min",
            MapOp::Sigmoid => "sigmoid",
            MapOp::Rsqrt => "rsqrt",
            MapOp::Sqrt => "sqrt",
            MapOp::Ones => "ones",
            MapOp::Zeros => "zeros",
            MapOp::SigmoidBackward => "_sigmoid_backward",
            MapOp::TanhBackward => "_tanh_backward",
        }
    }
}

impl fmt::Display for MapOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Discrete node tag.
///
/// The fusion pass only interprets the map set, `FusionGroup`, `Concat`, and
/// `Split`; everything else is an opaque kind it must leave untouched. The
/// `Param`/`Return` sentinels bound every graph's node list and are never
/// created directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Param,
    Return,
    Map(MapOp),
    FusionGroup,
    Concat,
    Split,
    Opaque(&'static str),
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Param => f.write_str("param"),
            NodeKind::Return => f.write_str("return"),
            NodeKind::Map(op) => op.fmt(f),
            NodeKind::FusionGroup => f.write_str("fusion_group"),
            NodeKind::Concat => f.write_str("concat"),
            NodeKind::Split => f.write_str("split"),
            NodeKind::Opaque(name) => f.write_str(name),
        }
    }
}

/// Free-form per-node attribute payload.
///
/// Fusion groups keep their nested subgraph here under [`ATTR_SUBGRAPH`];
/// split and concat nodes carry their axis (and chunk count) as ints.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Int(i64),
    Ints(Vec<i64>),
    Subgraph(Box<Graph>),
}

impl AttrValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(v) => Some(*v),
            _ => None,
        }
    }
}
