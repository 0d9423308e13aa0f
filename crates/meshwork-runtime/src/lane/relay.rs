//! Multi-phase fan-out of lane events to registered views
//!
//! A relay runs each phase across every view in order. A view may ask to
//! be re-run off the caller's thread by returning [`PhaseOutcome::Defer`]
//! during the preemptive pass; the relay then suspends, reschedules itself
//! on the stage and resumes at that same view with `preemptive = false`.
//! [`PhaseOutcome::Complete`] ends the fan-out early. `done` always runs
//! exactly once, after the last phase or the first completion.

use std::sync::Arc;

use meshwork_core::Stage;

/// Result of running one phase on one view
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhaseOutcome {
    /// Proceed to the next view
    Continue,
    /// Re-run this view asynchronously
    Defer,
    /// Stop fanning out
    Complete,
}

impl PhaseOutcome {
    /// Map a dispatch hook's "handled synchronously" flag
    pub fn from_dispatch(complete: bool) -> Self {
        if complete {
            PhaseOutcome::Continue
        } else {
            PhaseOutcome::Defer
        }
    }
}

/// One event being relayed to views
pub trait LaneRelay: Send + Sized + 'static {
    type View: ?Sized + Send + Sync + 'static;

    fn phase_count(&self) -> usize {
        1
    }

    fn run_phase(&mut self, view: &Self::View, phase: usize, preemptive: bool) -> PhaseOutcome;

    fn done(self) {}
}

/// Execution state of a relay
pub struct RelayRun<R: LaneRelay> {
    relay: R,
    views: Vec<Arc<R::View>>,
    stage: Arc<dyn Stage>,
    phase: usize,
    index: usize,
    preemptive: bool,
}

impl<R: LaneRelay> RelayRun<R> {
    pub fn new(relay: R, views: Vec<Arc<R::View>>, stage: Arc<dyn Stage>) -> Self {
        RelayRun {
            relay,
            views,
            stage,
            phase: 0,
            index: 0,
            preemptive: true,
        }
    }

    pub fn run(mut self) {
        'phases: while self.phase < self.relay.phase_count() {
            while self.index < self.views.len() {
                let view = self.views[self.index].clone();
                match self.relay.run_phase(&view, self.phase, self.preemptive) {
                    PhaseOutcome::Defer if self.preemptive => {
                        self.preemptive = false;
                        let stage = self.stage.clone();
                        stage.execute(Box::new(move || self.run()));
                        return;
                    }
                    PhaseOutcome::Continue | PhaseOutcome::Defer => {
                        self.index += 1;
                        self.preemptive = true;
                    }
                    PhaseOutcome::Complete => break 'phases,
                }
            }
            self.phase += 1;
            self.index = 0;
        }
        self.relay.done();
    }
}
