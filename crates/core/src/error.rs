use thiserror::Error;

/// Structural violations of the enter/leave protocol.
///
/// The first two are programmer errors in the instrumentation, not runtime
/// conditions: callers propagate them, nothing retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProfileError {
    #[error("leave without a matching enter: cursor is already at the root")]
    StackUnderflow,
    #[error("call identity must be a non-empty string")]
    InvalidIdentity,
    #[error("node id space exhausted")]
    IdSpaceExhausted,
}

/// Failures while rebuilding a tree from a [`callpath_protocol::TreeSnapshot`].
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("snapshot has no root node")]
    MissingRoot,
    #[error("node {0} is referenced but not defined, or defined more than once")]
    UnknownNode(u64),
    #[error("node {parent:?} has two children named {identity:?}")]
    DuplicateIdentity { parent: Option<u64>, identity: String },
    #[error("snapshot was taken inside an active call chain")]
    ActiveChain,
    #[error("node {0} has an empty identity")]
    InvalidIdentity(u64),
    #[error("id {0} is reserved for the root")]
    ReservedId(u64),
}
