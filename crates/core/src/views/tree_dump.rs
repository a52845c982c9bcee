use std::io::Write;

use callpath_protocol::SharedStr;

use crate::model::CallPathTree;

const HEADER: &str = "Profiling Result";

/// One line of the hierarchical dump.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeLine {
    /// Call-path depth, 1 for top-level calls.
    pub depth: usize,
    pub identity: SharedStr,
    pub total_ms: f64,
    pub call_count: u64,
}

/// Flatten the tree depth-first, pre-order, skipping the root.
pub fn tree_lines(tree: &CallPathTree) -> Vec<TreeLine> {
    tree.iter_preorder()
        .filter(|(_, node)| !node.is_root())
        .map(|(depth, node)| TreeLine {
            depth,
            identity: node.identity().clone(),
            total_ms: node.data().total_time.as_secs_f64() * 1e3,
            call_count: node.data().call_count,
        })
        .collect()
}

/// Write the dump:
///
/// ```text
/// Profiling Result
///   f1 - Total Time: 61.002 ms, Call Count: 1
///     f2 - Total Time: 54.002 ms, Call Count: 1
/// ```
pub fn write_tree<W: Write + ?Sized>(
    tree: &CallPathTree,
    indent_width: usize,
    out: &mut W,
) -> std::io::Result<()> {
    writeln!(out, "{HEADER}")?;
    for line in tree_lines(tree) {
        writeln!(
            out,
            "{:indent$}{} - Total Time: {:.3} ms, Call Count: {}",
            "",
            line.identity,
            line.total_ms,
            line.call_count,
            indent = line.depth * indent_width,
        )?;
    }
    Ok(())
}
