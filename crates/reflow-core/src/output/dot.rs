//! DOT (Graphviz) rendering of a node pool.
//!
//! Forward edges are solid, back-edges dashed, and declared header→merge
//! relationships dotted, so a structurized graph can be eyeballed next to
//! its input.

use crate::node::{MergeKind, NodeId};
use crate::pool::NodePool;

/// Escape special characters for DOT format strings.
///
/// # Example
/// ```
/// use reflow_core::output::escape_dot_string;
/// assert_eq!(escape_dot_string("loop \"ladder\""), "loop \\\"ladder\\\"");
/// assert_eq!(escape_dot_string("a<b>"), "a\\<b\\>");
/// ```
pub fn escape_dot_string(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('<', "\\<")
        .replace('>', "\\>")
}

/// Configuration for DOT output generation.
#[derive(Debug, Clone)]
pub struct DotConfig {
    /// Font name for nodes and edges.
    pub font_name: String,
    /// Font size for node labels.
    pub node_font_size: u32,
    /// Graph direction: "TB" (top-bottom), "LR" (left-right), etc.
    pub rankdir: String,
    /// Node shape: "box", "ellipse", etc.
    pub node_shape: String,
    /// Whether header→merge annotation edges are drawn.
    pub show_merge_edges: bool,
}

impl Default for DotConfig {
    fn default() -> Self {
        Self {
            font_name: "Courier".to_string(),
            node_font_size: 10,
            rankdir: "TB".to_string(),
            node_shape: "box".to_string(),
            show_merge_edges: true,
        }
    }
}

impl DotConfig {
    /// Generate the DOT header (digraph declaration and attributes).
    pub fn header(&self, name: &str) -> String {
        format!(
            "digraph \"{}\" {{\n    rankdir={};\n    node [shape={}, fontname=\"{}\", fontsize={}];\n",
            escape_dot_string(name),
            self.rankdir,
            self.node_shape,
            self.font_name,
            self.node_font_size,
        )
    }

    /// Generate the DOT footer.
    pub fn footer(&self) -> &'static str {
        "}\n"
    }
}

fn node_label(pool: &NodePool, id: NodeId) -> String {
    let node = &pool[id];
    let mut lines = vec![escape_dot_string(&node.name)];
    match node.merge {
        MergeKind::Selection => {
            let merge = node
                .selection_merge_block
                .map(|m| escape_dot_string(&pool[m].name))
                .unwrap_or_else(|| "?".to_string());
            lines.push(format!("sel merge: {merge}"));
        }
        MergeKind::Loop => {
            let merge = node
                .loop_merge_block
                .map(|m| escape_dot_string(&pool[m].name))
                .unwrap_or_else(|| "unreachable".to_string());
            lines.push(format!("loop merge: {merge}"));
            if let Some(ladder) = node.loop_ladder_block {
                lines.push(format!("ladder: {}", escape_dot_string(&pool[ladder].name)));
            }
        }
        MergeKind::None => {}
    }
    lines.join("\\n")
}

/// Renders the subgraph reachable from `entry` to DOT.
pub fn render_cfg(pool: &NodePool, entry: NodeId, name: &str, config: &DotConfig) -> String {
    let mut out = config.header(name);

    let mut reachable = Vec::new();
    pool.walk_cfg_from(entry, &mut |n| {
        reachable.push(n);
        true
    });

    for &id in &reachable {
        out.push_str(&format!(
            "    \"{}\" [label=\"{}\"];\n",
            escape_dot_string(&pool[id].name),
            node_label(pool, id),
        ));
    }

    for &id in &reachable {
        let from = escape_dot_string(&pool[id].name);
        for &s in &pool[id].succ {
            out.push_str(&format!(
                "    \"{}\" -> \"{}\";\n",
                from,
                escape_dot_string(&pool[s].name)
            ));
        }
        if let Some(back) = pool[id].succ_back_edge {
            out.push_str(&format!(
                "    \"{}\" -> \"{}\" [style=dashed];\n",
                from,
                escape_dot_string(&pool[back].name)
            ));
        }
        if config.show_merge_edges {
            let merge = match pool[id].merge {
                MergeKind::Selection => pool[id].selection_merge_block,
                MergeKind::Loop => pool[id].loop_merge_block,
                MergeKind::None => None,
            };
            if let Some(m) = merge {
                out.push_str(&format!(
                    "    \"{}\" -> \"{}\" [style=dotted];\n",
                    from,
                    escape_dot_string(&pool[m].name)
                ));
            }
        }
    }

    out.push_str(config.footer());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_dot_string() {
        assert_eq!(escape_dot_string("hello"), "hello");
        assert_eq!(escape_dot_string("a\\b"), "a\\\\b");
        assert_eq!(escape_dot_string("a\"b"), "a\\\"b");
        assert_eq!(escape_dot_string("a<b>c"), "a\\<b\\>c");
    }

    #[test]
    fn test_escape_dot_string_empty() {
        assert_eq!(escape_dot_string(""), "");
    }

    #[test]
    fn test_dot_config_default() {
        let cfg = DotConfig::default();
        assert_eq!(cfg.rankdir, "TB");
        assert_eq!(cfg.node_shape, "box");
        assert!(cfg.show_merge_edges);
    }

    #[test]
    fn test_dot_config_header_footer() {
        let cfg = DotConfig::default();
        let header = cfg.header("func<1>");
        assert!(header.contains("digraph \"func\\<1\\>\""));
        assert!(header.contains("rankdir=TB"));
        assert_eq!(cfg.footer(), "}\n");
    }

    #[test]
    fn test_render_simple_graph() {
        let mut pool = NodePool::new();
        let e = pool.create_named("entry");
        let x = pool.create_named("exit");
        pool.add_branch(e, x);

        let out = render_cfg(&pool, e, "f", &DotConfig::default());
        assert!(out.starts_with("digraph \"f\""));
        assert!(out.contains("\"entry\" -> \"exit\";"));
        assert!(out.ends_with("}\n"));
    }

    #[test]
    fn test_render_back_edge_dashed() {
        let mut pool = NodePool::new();
        let h = pool.create_named("h");
        let b = pool.create_named("b");
        pool.add_branch(h, b);
        pool[b].succ_back_edge = Some(h);

        let out = render_cfg(&pool, h, "f", &DotConfig::default());
        assert!(out.contains("\"b\" -> \"h\" [style=dashed];"));
    }

    #[test]
    fn test_render_merge_edge_dotted() {
        let mut pool = NodePool::new();
        let h = pool.create_named("h");
        let m = pool.create_named("m");
        pool.add_branch(h, m);
        pool[h].merge = MergeKind::Selection;
        pool[h].selection_merge_block = Some(m);

        let out = render_cfg(&pool, h, "f", &DotConfig::default());
        assert!(out.contains("\"h\" -> \"m\" [style=dotted];"));
        assert!(out.contains("sel merge: m"));
    }
}
