pub mod stats;
pub mod tree_dump;

pub use stats::{StatEntry, Statistics};
pub use tree_dump::{TreeLine, tree_lines, write_tree};
