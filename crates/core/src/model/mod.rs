pub mod call_tree;
pub mod profile;

pub use call_tree::{CallNode, CallPathTree, ChildKey, NodeId};
pub use profile::CallerProfile;
