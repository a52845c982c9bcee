//! Scope guards: one `enter` on creation, exactly one `leave` on drop.
//!
//! A guard owns a clone of a [`ProfilerHandle`] and its own start
//! timestamp, so recursive or repeated entries into the same identity never
//! share timing state. On drop it reads the profiler's cancellation state and
//! either commits the elapsed time or rolls the node back.
//!
//! Each thread has a default profiler reachable through [`current`]; the
//! [`profile_scope!`](crate::profile_scope) and
//! [`profile_function!`](crate::profile_function) macros use it.

use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;
use std::time::Instant;

use callpath_protocol::SharedStr;
use tracing::{debug, error};

use crate::config::ProfilerConfig;
use crate::error::ProfileError;
use crate::profiler::CallProfiler;

/// Shared, single-threaded handle to a [`CallProfiler`].
#[derive(Debug, Clone, Default)]
pub struct ProfilerHandle(Rc<RefCell<CallProfiler>>);

impl ProfilerHandle {
    pub fn new(profiler: CallProfiler) -> Self {
        Self(Rc::new(RefCell::new(profiler)))
    }

    pub fn with_config(config: ProfilerConfig) -> Self {
        Self::new(CallProfiler::with_config(config))
    }

    pub fn borrow(&self) -> Ref<'_, CallProfiler> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, CallProfiler> {
        self.0.borrow_mut()
    }

    /// Start timing `identity` under the current call path.
    pub fn scope<I>(&self, identity: I) -> Result<ScopeGuard, ProfileError>
    where
        I: AsRef<str> + Into<SharedStr>,
    {
        ScopeGuard::enter(self, identity)
    }

    /// Cancel the active chain. Hooks run once this handle's borrow is released.
    pub fn cancel(&self) {
        let (hooks, generation) = {
            let mut profiler = self.borrow_mut();
            (profiler.begin_cancel(), profiler.generation())
        };
        let Some(mut hooks) = hooks else {
            return;
        };
        for hook in &mut hooks {
            hook();
        }
        self.borrow_mut().return_cancel_hooks(hooks, generation);
    }

    pub fn reset(&self) {
        self.borrow_mut().reset();
    }

    /// Whether both handles drive the same profiler.
    pub fn same_profiler(&self, other: &ProfilerHandle) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

thread_local! {
    static CURRENT: ProfilerHandle = ProfilerHandle::default();
}

/// This thread's default profiler, created on first use.
pub fn current() -> ProfilerHandle {
    CURRENT.with(Clone::clone)
}

/// Open a scope on this thread's default profiler.
pub fn scope<I>(identity: I) -> Result<ScopeGuard, ProfileError>
where
    I: AsRef<str> + Into<SharedStr>,
{
    ScopeGuard::enter(&current(), identity)
}

/// RAII instrumentation handle. Commits or rolls back on drop.
#[must_use = "dropping the guard immediately records ~0ms; bind it with `let _guard = ...`"]
#[derive(Debug)]
pub struct ScopeGuard {
    /// `None` when the profiler was disabled at entry.
    handle: Option<ProfilerHandle>,
    start: Instant,
    generation: u64,
}

impl ScopeGuard {
    pub fn enter<I>(handle: &ProfilerHandle, identity: I) -> Result<Self, ProfileError>
    where
        I: AsRef<str> + Into<SharedStr>,
    {
        let mut profiler = handle.borrow_mut();
        if !profiler.is_enabled() {
            return Ok(Self {
                handle: None,
                start: Instant::now(),
                generation: profiler.generation(),
            });
        }
        profiler.enter(identity)?;
        let generation = profiler.generation();
        drop(profiler);

        Ok(Self {
            handle: Some(handle.clone()),
            start: Instant::now(),
            generation,
        })
    }

    /// False for guards created while profiling was disabled.
    pub fn is_active(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for ScopeGuard {
    // A mismatched leave must not be swallowed; panic unless already unwinding.
    #[allow(clippy::panic)]
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let elapsed = self.start.elapsed();

        let Ok(mut profiler) = handle.0.try_borrow_mut() else {
            error!("call profiler is borrowed while a scope guard finalizes");
            if !std::thread::panicking() {
                panic!("call profiler is borrowed while a scope guard finalizes");
            }
            return;
        };

        if profiler.generation() != self.generation {
            debug!("profiler was reset inside this scope; nothing to leave");
            return;
        }

        if let Err(err) = profiler.leave(elapsed) {
            error!(%err, "scope guard failed to leave its call");
            drop(profiler);
            if !std::thread::panicking() {
                panic!("call profiler: {err}");
            }
        }
    }
}

/// Strip the helper item name appended by [`profile_function!`](crate::profile_function).
#[doc(hidden)]
pub fn function_identity(marker_path: &'static str) -> &'static str {
    marker_path
        .strip_suffix("::__callpath_marker")
        .unwrap_or(marker_path)
}

/// Time the rest of the enclosing block under `identity` on this thread's
/// default profiler.
///
/// ```ignore
/// fn solve() {
///     callpath_core::profile_scope!("solver::solve");
///     // ...
/// }
/// ```
///
/// Panics if `identity` is empty.
#[macro_export]
macro_rules! profile_scope {
    ($identity:expr) => {
        let _callpath_guard = match $crate::scope($identity) {
            ::std::result::Result::Ok(guard) => guard,
            ::std::result::Result::Err(err) => ::std::panic!("call profiler: {err}"),
        };
    };
}

/// Like [`profile_scope!`] with the enclosing function's path as identity.
#[macro_export]
macro_rules! profile_function {
    () => {
        $crate::profile_scope!({
            fn __callpath_marker() {}
            $crate::guard::function_identity(::std::any::type_name_of_val(&__callpath_marker))
        });
    };
}
