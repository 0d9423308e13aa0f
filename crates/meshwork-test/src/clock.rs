//! Deterministic stage and schedule
//!
//! [`ManualStage`] queues tasks until the test runs them, and
//! [`ManualSchedule`] keeps timers on a virtual clock that only moves when
//! the test advances it. Neither ever runs work on the caller's thread
//! from inside `execute` or `schedule`.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use meshwork_core::{MeshworkError, Schedule, Stage, Task, TimerHandle, TimerRef, TimerTask};

/// Stage that holds tasks until [`ManualStage::run_pending`]
#[derive(Default)]
pub struct ManualStage {
    queue: Mutex<VecDeque<Task>>,
    executed: Mutex<usize>,
}

impl ManualStage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Total number of tasks run so far
    pub fn executed(&self) -> usize {
        *self.executed.lock()
    }

    /// Run the oldest queued task, returning false when there was none
    pub fn run_next(&self) -> bool {
        let Some(task) = self.queue.lock().pop_front() else {
            return false;
        };
        task();
        *self.executed.lock() += 1;
        true
    }

    /// Run queued tasks, including any they enqueue, until the queue is empty
    pub fn run_pending(&self) -> usize {
        let mut count = 0;
        loop {
            let Some(task) = self.queue.lock().pop_front() else {
                break;
            };
            task();
            count += 1;
        }
        *self.executed.lock() += count;
        count
    }
}

impl Stage for ManualStage {
    fn execute(&self, task: Task) {
        self.queue.lock().push_back(task);
    }
}

const SCHEDULED: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

/// Timer parked on a [`ManualSchedule`]
pub struct ManualTimer {
    state: AtomicU8,
    deadline: Duration,
}

impl ManualTimer {
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    fn claim(&self) -> bool {
        self.state
            .compare_exchange(SCHEDULED, FIRED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl TimerHandle for ManualTimer {
    fn is_scheduled(&self) -> bool {
        self.state.load(Ordering::Acquire) == SCHEDULED
    }

    fn cancel(&self) -> bool {
        self.state
            .compare_exchange(SCHEDULED, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

struct Parked {
    timer: Arc<ManualTimer>,
    task: TimerTask,
}

#[derive(Default)]
struct Clock {
    now: Duration,
    sequence: u64,
    timers: BTreeMap<(Duration, u64), Parked>,
}

/// Schedule driven by an explicit virtual clock
#[derive(Default)]
pub struct ManualSchedule {
    clock: Mutex<Clock>,
}

impl ManualSchedule {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn now(&self) -> Duration {
        self.clock.lock().now
    }

    /// Delays, relative to now, of the timers still scheduled
    pub fn scheduled_delays(&self) -> Vec<Duration> {
        let clock = self.clock.lock();
        clock
            .timers
            .values()
            .filter(|parked| parked.timer.is_scheduled())
            .map(|parked| parked.timer.deadline.saturating_sub(clock.now))
            .collect()
    }

    pub fn scheduled(&self) -> usize {
        self.scheduled_delays().len()
    }

    /// Fire every timer due within `by`, in deadline order
    ///
    /// Timers scheduled by fired tasks are honored if they fall due inside
    /// the same window. Errors returned by timer tasks are collected.
    pub fn advance(&self, by: Duration) -> Vec<MeshworkError> {
        let target = self.clock.lock().now + by;
        let mut errors = Vec::new();
        loop {
            let due = {
                let mut clock = self.clock.lock();
                let next = clock
                    .timers
                    .first_key_value()
                    .map(|(key, _)| *key)
                    .filter(|(deadline, _)| *deadline <= target);
                match next.and_then(|key| clock.timers.remove(&key)) {
                    Some(parked) => {
                        clock.now = clock.now.max(parked.timer.deadline);
                        parked
                    }
                    None => {
                        clock.now = target;
                        break;
                    }
                }
            };
            if !due.timer.claim() {
                continue;
            }
            if let Err(error) = (due.task)() {
                tracing::debug!(%error, "manual timer task failed");
                errors.push(error);
            }
        }
        errors
    }

    /// Advance straight to the next scheduled deadline and fire it
    pub fn fire_next(&self) -> Option<Vec<MeshworkError>> {
        let delay = self.scheduled_delays().into_iter().min()?;
        Some(self.advance(delay))
    }
}

impl Schedule for ManualSchedule {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerRef {
        let mut clock = self.clock.lock();
        let deadline = clock.now + delay;
        let timer = Arc::new(ManualTimer {
            state: AtomicU8::new(SCHEDULED),
            deadline,
        });
        clock.sequence += 1;
        let key = (deadline, clock.sequence);
        clock.timers.insert(
            key,
            Parked {
                timer: timer.clone(),
                task,
            },
        );
        timer
    }
}
