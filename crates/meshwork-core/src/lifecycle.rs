//! Tier lifecycle state machine
//!
//! Every tier moves through `initial → opened → loaded → started →
//! stopped → unloaded → closed`, with `failed` reachable from any phase
//! hook. A transition:
//! 1. claims its target state with a single compare-and-swap, so duplicate
//!    and re-entrant calls become no-ops,
//! 2. runs the tier's `will_enter` hook (an error moves the tier to
//!    `failed`),
//! 3. propagates the phase to every child,
//! 4. runs the tier's `did_enter` hook.
//!
//! Transitions that skip ahead run their predecessors first: `load` opens,
//! `start` loads, `unload` stops and `close` unloads. A stopped tier may be
//! started again and an unloaded tier may be loaded again. A failed tier
//! ignores everything except `close`.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::{MeshworkError, MeshworkResult};

/// Lifecycle state of a tier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum TierState {
    Initial = 0,
    Opened = 1,
    Loaded = 2,
    Started = 3,
    Stopped = 4,
    Unloaded = 5,
    Closed = 6,
    Failed = 7,
}

impl TierState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => TierState::Initial,
            1 => TierState::Opened,
            2 => TierState::Loaded,
            3 => TierState::Started,
            4 => TierState::Stopped,
            5 => TierState::Unloaded,
            6 => TierState::Closed,
            _ => TierState::Failed,
        }
    }

    pub fn is_opened(self) -> bool {
        matches!(
            self,
            TierState::Opened
                | TierState::Loaded
                | TierState::Started
                | TierState::Stopped
                | TierState::Unloaded
        )
    }

    pub fn is_loaded(self) -> bool {
        matches!(self, TierState::Loaded | TierState::Started | TierState::Stopped)
    }

    pub fn is_started(self) -> bool {
        self == TierState::Started
    }

    pub fn is_closed(self) -> bool {
        self == TierState::Closed
    }

    pub fn is_failed(self) -> bool {
        self == TierState::Failed
    }
}

impl fmt::Display for TierState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TierState::Initial => "initial",
            TierState::Opened => "opened",
            TierState::Loaded => "loaded",
            TierState::Started => "started",
            TierState::Stopped => "stopped",
            TierState::Unloaded => "unloaded",
            TierState::Closed => "closed",
            TierState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Lifecycle transition
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    Open,
    Load,
    Start,
    Stop,
    Unload,
    Close,
}

impl Phase {
    /// Invoke the transition matching this phase on `tier`
    pub fn drive<T: Lifecycle + ?Sized>(self, tier: &T) -> MeshworkResult<()> {
        match self {
            Phase::Open => tier.open(),
            Phase::Load => tier.load(),
            Phase::Start => tier.start(),
            Phase::Stop => tier.stop(),
            Phase::Unload => tier.unload(),
            Phase::Close => tier.close(),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Open => "open",
            Phase::Load => "load",
            Phase::Start => "start",
            Phase::Stop => "stop",
            Phase::Unload => "unload",
            Phase::Close => "close",
        };
        f.write_str(name)
    }
}

/// Lifecycle operations shared by every tier
pub trait Lifecycle: Send + Sync {
    fn tier_state(&self) -> TierState;

    fn open(&self) -> MeshworkResult<()>;
    fn load(&self) -> MeshworkResult<()>;
    fn start(&self) -> MeshworkResult<()>;
    fn stop(&self) -> MeshworkResult<()>;
    fn unload(&self) -> MeshworkResult<()>;
    fn close(&self) -> MeshworkResult<()>;

    fn is_opened(&self) -> bool {
        self.tier_state().is_opened()
    }

    fn is_loaded(&self) -> bool {
        self.tier_state().is_loaded()
    }

    fn is_started(&self) -> bool {
        self.tier_state().is_started()
    }

    fn is_closed(&self) -> bool {
        self.tier_state().is_closed()
    }
}

/// Per-tier hooks invoked by [`TierStatus::transition`]
pub trait TierHooks {
    /// Runs after the target state is claimed; an error fails the tier
    fn will_enter(&self, _phase: Phase) -> MeshworkResult<()> {
        Ok(())
    }

    /// Drives the phase on every child
    fn propagate(&self, _phase: Phase) {}

    fn did_enter(&self, _phase: Phase) {}
}

enum Step {
    Done,
    Before(Phase),
    Claim(TierState),
}

fn plan(current: TierState, phase: Phase) -> Step {
    use TierState::*;
    match (phase, current) {
        (Phase::Open, Initial) => Step::Claim(Opened),
        (Phase::Load, Initial) => Step::Before(Phase::Open),
        (Phase::Load, Opened | Unloaded) => Step::Claim(Loaded),
        (Phase::Start, Initial | Opened | Unloaded) => Step::Before(Phase::Load),
        (Phase::Start, Loaded | Stopped) => Step::Claim(Started),
        (Phase::Stop, Started) => Step::Claim(Stopped),
        (Phase::Unload, Started) => Step::Before(Phase::Stop),
        (Phase::Unload, Loaded | Stopped) => Step::Claim(Unloaded),
        (Phase::Close, Loaded | Started | Stopped) => Step::Before(Phase::Unload),
        (Phase::Close, Initial | Opened | Unloaded | Failed) => Step::Claim(Closed),
        _ => Step::Done,
    }
}

/// Atomic holder of a tier's lifecycle state
#[derive(Debug)]
pub struct TierStatus {
    state: AtomicU8,
}

impl TierStatus {
    pub const fn new() -> Self {
        TierStatus {
            state: AtomicU8::new(TierState::Initial as u8),
        }
    }

    #[inline]
    pub fn state(&self) -> TierState {
        TierState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Run `phase` against this status, invoking `hooks` if the transition
    /// is claimed by this call
    pub fn transition<H: TierHooks + ?Sized>(&self, phase: Phase, hooks: &H) -> MeshworkResult<()> {
        loop {
            let current = self.state();
            let target = match plan(current, phase) {
                Step::Done => return Ok(()),
                Step::Before(previous) => {
                    self.transition(previous, hooks)?;
                    continue;
                }
                Step::Claim(target) => target,
            };
            if self
                .state
                .compare_exchange(current as u8, target as u8, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                continue;
            }
            if let Err(error) = hooks.will_enter(phase) {
                self.fail();
                return Err(error);
            }
            hooks.propagate(phase);
            hooks.did_enter(phase);
            return Ok(());
        }
    }

    /// Move to `failed` unless already closed
    pub fn fail(&self) {
        let mut current = self.state.load(Ordering::Acquire);
        while current != TierState::Closed as u8 {
            match self.state.compare_exchange(
                current,
                TierState::Failed as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }
}

impl Default for TierStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Drive `phase` on every child, handing each failed child and its error
/// to `on_fail` and continuing
pub fn fan_out<'a, T, I, F>(children: I, phase: Phase, mut on_fail: F)
where
    T: Lifecycle + ?Sized + 'a,
    I: IntoIterator<Item = &'a Arc<T>>,
    F: FnMut(&'a Arc<T>, MeshworkError),
{
    for child in children {
        if let Err(error) = phase.drive(&**child) {
            on_fail(child, error);
        }
    }
}

/// Bring a newly added child up to the phase its parent already reached
pub fn activate<T: Lifecycle + ?Sized>(parent: TierState, child: &T) -> MeshworkResult<()> {
    if parent.is_started() {
        child.start()
    } else if parent.is_loaded() {
        child.load()
    } else if parent.is_opened() {
        child.open()
    } else {
        Ok(())
    }
}
