pub mod shared_str;
pub mod snapshot;

pub use shared_str::SharedStr;
pub use snapshot::{ResultNode, SnapshotDocument, SnapshotNode, SnapshotProfile, TreeSnapshot};
