use std::fmt;

use super::{AttrValue, Graph, NodeId, NodeKind};

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_graph(self, 0, f)
    }
}

fn fmt_graph(graph: &Graph, indent: usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write_indent(f, indent)?;
    f.write_str("graph(")?;
    for (i, &input) in graph.inputs().iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        fmt_value(graph, input, f)?;
    }
    f.write_str(") {\n")?;
    for node in graph.nodes() {
        fmt_node(graph, node, indent + 1, f)?;
    }
    write_indent(f, indent + 1)?;
    f.write_str("return (")?;
    for (i, &output) in graph.outputs().iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "%{}", output.0)?;
    }
    f.write_str(")\n")?;
    write_indent(f, indent)?;
    f.write_str("}")?;
    if indent > 0 {
        f.write_str("\n")?;
    }
    Ok(())
}

fn fmt_node(graph: &Graph, node: NodeId, indent: usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write_indent(f, indent)?;
    for (i, &output) in graph.outputs_of(node).iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        fmt_value(graph, output, f)?;
    }
    if graph.outputs_of(node).is_empty() {
        f.write_str("()")?;
    }
    write!(f, " = {}", graph.kind_of(node))?;
    fmt_attrs(graph, node, f)?;
    f.write_str("(")?;
    for (i, &input) in graph.inputs_of(node).iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "%{}", input.0)?;
    }
    f.write_str(")")?;
    if graph.stage_of(node) != 0 {
        write!(f, " stage={}", graph.stage_of(node))?;
    }
    f.write_str("\n")?;
    if graph.kind_of(node) == NodeKind::FusionGroup {
        fmt_graph(graph.subgraph(node), indent + 1, f)?;
    }
    Ok(())
}

fn fmt_attrs(graph: &Graph, node: NodeId, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    const ORDER: [&str; 2] = [super::ATTR_CHUNKS, super::ATTR_DIM];
    let mut printed = false;
    for key in ORDER {
        let Some(value) = graph.attr(node, key) else {
            continue;
        };
        f.write_str(if printed { ", " } else { "[" })?;
        printed = true;
        match value {
            AttrValue::Int(v) => write!(f, "{key}={v}")?,
            AttrValue::Ints(vs) => write!(f, "{key}={vs:?}")?,
            AttrValue::Subgraph(_) => {}
        }
    }
    if printed {
        f.write_str("]")?;
    }
    Ok(())
}

fn fmt_value(graph: &Graph, value: super::ValueId, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "%{}", value.0)?;
    if let Some(ty) = graph.type_of(value) {
        write!(f, " : {ty}")?;
    }
    Ok(())
}

fn write_indent(f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
    for _ in 0..indent {
        f.write_str("  ")?;
    }
    Ok(())
}
