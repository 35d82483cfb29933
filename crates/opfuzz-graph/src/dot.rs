//! Graphviz rendering for bug bundles.

use crate::graph::{Graph, NodeKind};
use std::fmt::Write;

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Render `graph` as a DOT digraph. Sources are boxes, outputs are doubled.
pub fn to_dot(graph: &Graph) -> String {
    let mut out = String::from("digraph opfuzz {\n  rankdir=TB;\n  node [fontname=\"monospace\"];\n");
    for node in &graph.nodes {
        let outs = node.outputs.iter().map(ToString::to_string).collect::<Vec<_>>().join("\\n");
        let (title, shape) = match &node.kind {
            NodeKind::Input => ("input".to_string(), "box"),
            NodeKind::Constant => ("constant".to_string(), "box"),
            NodeKind::Op { op, attrs } if attrs.is_empty() => (op.clone(), "ellipse"),
            NodeKind::Op { op, attrs } => (format!("{op}{attrs:?}"), "ellipse"),
        };
        let peripheries = if graph.outputs.iter().any(|r| r.node == node.id) { 2 } else { 1 };
        let _ = writeln!(
            out,
            "  n{} [label=\"#{} {}\\n{}\", shape={shape}, peripheries={peripheries}];",
            node.id,
            node.id,
            escape(&title),
            escape(&outs),
        );
    }
    for node in &graph.nodes {
        for (slot, input) in node.inputs.iter().enumerate() {
            let _ = writeln!(out, "  n{} -> n{} [label=\"{slot}\"];", input.node, node.id);
        }
    }
    out.push_str("}\n");
    out
}
