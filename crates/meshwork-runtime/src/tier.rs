//! Contracts shared by every tier binding and tier context

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::{Arc, Weak};

use meshwork_core::{
    Lifecycle, LogEntry, LogLevel, MeshworkError, OpenPolicy, Policy, Schedule, Stage, Store,
};

/// Type-erased handle returned by capability unwrapping
pub type Capability = Arc<dyn Any + Send + Sync>;

/// Collaborators handed down the tier graph
#[derive(Clone)]
pub struct Services {
    pub policy: Arc<dyn Policy>,
    pub schedule: Arc<dyn Schedule>,
    pub stage: Arc<dyn Stage>,
    pub store: Arc<dyn Store>,
}

impl Services {
    pub fn new(schedule: Arc<dyn Schedule>, stage: Arc<dyn Stage>, store: Arc<dyn Store>) -> Self {
        Services {
            policy: Arc::new(OpenPolicy),
            schedule,
            stage,
            store,
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn Policy>) -> Self {
        self.policy = policy;
        self
    }
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}

/// What a child tier offers its parent
pub trait TierBinding: Lifecycle {
    /// Report an unrecoverable error raised outside a lifecycle hook
    fn did_fail(&self, error: MeshworkError);
}

/// What a parent tier provides to its child
pub trait TierContext: Send + Sync {
    fn services(&self) -> Arc<Services>;

    /// Display form of the address this context serves
    fn origin(&self) -> String;

    /// Forward a log entry toward the edge
    fn record(&self, entry: LogEntry);

    fn log(&self, level: LogLevel, message: &dyn fmt::Display) {
        self.record(LogEntry::new(level, self.origin(), message));
    }

    fn trace(&self, message: &dyn fmt::Display) {
        self.log(LogLevel::Trace, message);
    }

    fn debug(&self, message: &dyn fmt::Display) {
        self.log(LogLevel::Debug, message);
    }

    fn info(&self, message: &dyn fmt::Display) {
        self.log(LogLevel::Info, message);
    }

    fn warn(&self, message: &dyn fmt::Display) {
        self.log(LogLevel::Warn, message);
    }

    fn error(&self, message: &dyn fmt::Display) {
        self.log(LogLevel::Error, message);
    }

    fn fail(&self, message: &dyn fmt::Display) {
        self.log(LogLevel::Fail, message);
    }

    fn policy(&self) -> Arc<dyn Policy> {
        self.services().policy.clone()
    }

    fn schedule(&self) -> Arc<dyn Schedule> {
        self.services().schedule.clone()
    }

    fn stage(&self) -> Arc<dyn Stage> {
        self.services().stage.clone()
    }

    fn store(&self) -> Arc<dyn Store> {
        self.services().store.clone()
    }
}

/// Return `me` as a capability if `type_id` names its concrete type
pub fn own_capability<T: Any + Send + Sync>(me: &Weak<T>, type_id: TypeId) -> Option<Capability> {
    if type_id == TypeId::of::<T>() {
        me.upgrade().map(|this| this as Capability)
    } else {
        None
    }
}

/// Downcast an unwrapped capability to its concrete type
pub fn downcast<T: Any + Send + Sync>(capability: Capability) -> Option<Arc<T>> {
    capability.downcast::<T>().ok()
}

/// True if both handles point at the same tier instance
#[inline]
pub fn same_tier<T: ?Sized, U: ?Sized>(a: &Arc<T>, b: &Arc<U>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// Log through `context` if assigned, otherwise straight to `tracing`
pub fn log_via<C: TierContext + ?Sized>(
    context: Option<Arc<C>>,
    origin: impl FnOnce() -> String,
    level: LogLevel,
    message: &dyn fmt::Display,
) {
    match context {
        Some(context) => context.log(level, message),
        None => LogEntry::new(level, origin(), message).emit(),
    }
}

/// Implement [`Lifecycle`] for a tier whose hooks live on `self` and whose
/// state lives in the [`TierStatus`](meshwork_core::TierStatus) at the given field path
macro_rules! tier_lifecycle {
    ($ty:ty, $($status:ident).+) => {
        impl meshwork_core::Lifecycle for $ty {
            fn tier_state(&self) -> meshwork_core::TierState {
                self.$($status).+.state()
            }

            fn open(&self) -> meshwork_core::MeshworkResult<()> {
                self.$($status).+.transition(meshwork_core::Phase::Open, self)
            }

            fn load(&self) -> meshwork_core::MeshworkResult<()> {
                self.$($status).+.transition(meshwork_core::Phase::Load, self)
            }

            fn start(&self) -> meshwork_core::MeshworkResult<()> {
                self.$($status).+.transition(meshwork_core::Phase::Start, self)
            }

            fn stop(&self) -> meshwork_core::MeshworkResult<()> {
                self.$($status).+.transition(meshwork_core::Phase::Stop, self)
            }

            fn unload(&self) -> meshwork_core::MeshworkResult<()> {
                self.$($status).+.transition(meshwork_core::Phase::Unload, self)
            }

            fn close(&self) -> meshwork_core::MeshworkResult<()> {
                self.$($status).+.transition(meshwork_core::Phase::Close, self)
            }
        }
    };
}

pub(crate) use tier_lifecycle;
