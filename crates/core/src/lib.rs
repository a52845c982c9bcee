//! Call-path profiler: a tree keyed by call identity that tracks the active
//! call path, accumulates inclusive/exclusive timings, and can atomically
//! roll back a cancelled in-flight call chain.
//!
//! ```text
//!   ScopeGuard::enter ─▶ CallProfiler::enter ─▶ CallPathTree::enter (cursor ↓)
//!          ...nested guards...
//!   ScopeGuard::drop  ─▶ CallProfiler::leave ─▶ exit | rollback_one (cursor ↑)
//! ```

pub mod config;
pub mod error;
pub mod guard;
pub mod model;
pub mod profiler;
pub mod snapshot;
pub mod views;

pub use config::{ProfilerConfig, StatsSort};
pub use error::{ProfileError, SnapshotError};
pub use guard::{ProfilerHandle, ScopeGuard, current, scope};
pub use model::{CallNode, CallPathTree, CallerProfile, ChildKey, NodeId};
pub use profiler::{CallProfiler, ProfilerState};
pub use views::{StatEntry, Statistics};
