//! Stage and schedule implementations
//!
//! - [`TokioStage`] / [`TokioSchedule`]: run tasks and timers on a tokio runtime
//! - [`InlineStage`]: runs tasks on the calling thread
//! - [`IdleSchedule`]: accepts timers and never fires them
//! - [`TransientStore`]: in-memory store tracking acquired data handles

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use meshwork_core::{
    DataHandle, DataKind, MeshworkError, Schedule, Stage, Store, Task, TimerHandle, TimerRef,
    TimerTask,
};

use crate::tier::Services;

/// Runs every task immediately on the caller's thread
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineStage;

impl Stage for InlineStage {
    fn execute(&self, task: Task) {
        task();
    }
}

/// Spawns tasks onto a tokio runtime
#[derive(Clone, Debug)]
pub struct TokioStage {
    handle: Handle,
}

impl TokioStage {
    pub fn new(handle: Handle) -> Self {
        TokioStage { handle }
    }

    /// Stage on the runtime the caller is running in, if any
    pub fn try_current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }
}

impl Stage for TokioStage {
    fn execute(&self, task: Task) {
        self.handle.spawn(async move { task() });
    }
}

const SCHEDULED: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

struct TokioTimer {
    state: AtomicU8,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl TokioTimer {
    fn claim(&self) -> bool {
        self.state
            .compare_exchange(SCHEDULED, FIRED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl TimerHandle for TokioTimer {
    fn is_scheduled(&self) -> bool {
        self.state.load(Ordering::Acquire) == SCHEDULED
    }

    fn cancel(&self) -> bool {
        let cancelled = self
            .state
            .compare_exchange(SCHEDULED, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if cancelled {
            if let Some(join) = self.join.lock().take() {
                join.abort();
            }
        }
        cancelled
    }
}

type FatalHandler = Arc<dyn Fn(MeshworkError) + Send + Sync + 'static>;

/// Fires timers on a tokio runtime
///
/// A timer callback that returns an error has escaped every tier; the
/// error is logged and handed to the fatal handler, if one is installed.
#[derive(Clone)]
pub struct TokioSchedule {
    handle: Handle,
    on_fatal: Option<FatalHandler>,
}

impl TokioSchedule {
    pub fn new(handle: Handle) -> Self {
        TokioSchedule {
            handle,
            on_fatal: None,
        }
    }

    pub fn try_current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }

    pub fn on_fatal(mut self, handler: impl Fn(MeshworkError) + Send + Sync + 'static) -> Self {
        self.on_fatal = Some(Arc::new(handler));
        self
    }
}

impl Schedule for TokioSchedule {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerRef {
        let timer = Arc::new(TokioTimer {
            state: AtomicU8::new(SCHEDULED),
            join: Mutex::new(None),
        });
        let fired = timer.clone();
        let on_fatal = self.on_fatal.clone();
        let join = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if !fired.claim() {
                return;
            }
            if let Err(error) = task() {
                tracing::error!(%error, "timer task failed");
                if let Some(on_fatal) = on_fatal {
                    on_fatal(error);
                }
            }
        });
        *timer.join.lock() = Some(join);
        timer
    }
}

struct IdleTimer {
    state: AtomicU8,
}

impl TimerHandle for IdleTimer {
    fn is_scheduled(&self) -> bool {
        self.state.load(Ordering::Acquire) == SCHEDULED
    }

    fn cancel(&self) -> bool {
        self.state
            .compare_exchange(SCHEDULED, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Schedule whose timers never fire
#[derive(Clone, Copy, Debug, Default)]
pub struct IdleSchedule;

impl Schedule for IdleSchedule {
    fn schedule(&self, delay: Duration, _task: TimerTask) -> TimerRef {
        tracing::trace!(?delay, "timer parked on idle schedule");
        Arc::new(IdleTimer {
            state: AtomicU8::new(SCHEDULED),
        })
    }
}

/// In-memory store that counts outstanding handles per data structure
#[derive(Debug, Default)]
pub struct TransientStore {
    open: Mutex<BTreeMap<DataHandle, usize>>,
}

impl TransientStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of unreleased acquisitions of `handle`
    pub fn open_count(&self, handle: &DataHandle) -> usize {
        self.open.lock().get(handle).copied().unwrap_or(0)
    }

    fn acquire(&self, kind: DataKind, name: &str) -> DataHandle {
        let handle = DataHandle {
            kind,
            name: name.to_string(),
        };
        *self.open.lock().entry(handle.clone()).or_insert(0) += 1;
        handle
    }
}

impl Store for TransientStore {
    fn list_data(&self, name: &str) -> DataHandle {
        self.acquire(DataKind::List, name)
    }

    fn map_data(&self, name: &str) -> DataHandle {
        self.acquire(DataKind::Map, name)
    }

    fn spatial_data(&self, name: &str) -> DataHandle {
        self.acquire(DataKind::Spatial, name)
    }

    fn value_data(&self, name: &str) -> DataHandle {
        self.acquire(DataKind::Value, name)
    }

    fn release(&self, handle: &DataHandle) {
        let mut open = self.open.lock();
        if let Some(count) = open.get_mut(handle) {
            *count -= 1;
            if *count == 0 {
                open.remove(handle);
            }
        }
    }
}

/// Services for tiers not (yet) attached to an edge
pub fn detached_services() -> Arc<Services> {
    static DETACHED: OnceLock<Arc<Services>> = OnceLock::new();
    DETACHED
        .get_or_init(|| {
            Arc::new(Services::new(
                Arc::new(IdleSchedule),
                Arc::new(InlineStage),
                Arc::new(TransientStore::new()),
            ))
        })
        .clone()
}
