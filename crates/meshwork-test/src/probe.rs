//! Probe layers that record what passes through a proxy

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use meshwork_core::{
    Envelope, LinkAddress, MeshworkError, MeshworkResult, NodeAddress, PartAddress, Phase,
};
use meshwork_runtime::{
    Kernel, LinkBinding, LinkContext, LinkLayer, LinkProxy, NodeBinding, NodeLayer, NodeProxy,
    PartBinding, PartLayer, PartProxy, PushRequest,
};

/// Shared record of intercepted calls
#[derive(Debug, Default)]
pub struct Probe {
    phases: Mutex<Vec<Phase>>,
    pushes: AtomicUsize,
    uplinks: AtomicUsize,
    fail_on: Mutex<Option<Phase>>,
}

impl Probe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Probe whose layer refuses to enter `phase`
    pub fn failing(phase: Phase) -> Arc<Self> {
        let probe = Self::default();
        *probe.fail_on.lock() = Some(phase);
        Arc::new(probe)
    }

    pub fn phases(&self) -> Vec<Phase> {
        self.phases.lock().clone()
    }

    pub fn pushes(&self) -> usize {
        self.pushes.load(Ordering::Acquire)
    }

    pub fn uplinks(&self) -> usize {
        self.uplinks.load(Ordering::Acquire)
    }

    fn enter(&self, phase: Phase) -> MeshworkResult<()> {
        self.phases.lock().push(phase);
        if *self.fail_on.lock() == Some(phase) {
            return Err(MeshworkError::TierFailed(format!("probe refused {phase}")));
        }
        Ok(())
    }
}

pub struct ProbePartLayer(pub Arc<Probe>);

impl PartLayer for ProbePartLayer {
    fn transition(&self, part: &dyn PartBinding, phase: Phase) -> MeshworkResult<()> {
        self.0.enter(phase)?;
        phase.drive(part)
    }

    fn open_uplink(&self, part: &dyn PartBinding, link: Arc<dyn LinkBinding>) {
        self.0.uplinks.fetch_add(1, Ordering::AcqRel);
        part.open_uplink(link);
    }

    fn push_up(&self, part: &dyn PartBinding, request: PushRequest) {
        self.0.pushes.fetch_add(1, Ordering::AcqRel);
        part.push_up(request);
    }
}

pub struct ProbeNodeLayer(pub Arc<Probe>);

impl NodeLayer for ProbeNodeLayer {
    fn transition(&self, node: &dyn NodeBinding, phase: Phase) -> MeshworkResult<()> {
        self.0.enter(phase)?;
        phase.drive(node)
    }

    fn open_uplink(&self, node: &dyn NodeBinding, link: Arc<dyn LinkBinding>) {
        self.0.uplinks.fetch_add(1, Ordering::AcqRel);
        node.open_uplink(link);
    }

    fn push_up(&self, node: &dyn NodeBinding, request: PushRequest) {
        self.0.pushes.fetch_add(1, Ordering::AcqRel);
        node.push_up(request);
    }
}

/// One credit grant or envelope movement seen by a [`ProbeLinkLayer`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlowEvent {
    PullDown,
    Down(String),
    SkipDown,
    PullUp,
    Up(String),
    SkipUp,
}

/// Ordered trace of the flow-control traffic crossing a link
#[derive(Debug, Default)]
pub struct ProbeLink {
    events: Mutex<Vec<FlowEvent>>,
}

impl ProbeLink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<FlowEvent> {
        self.events.lock().clone()
    }

    fn record(&self, event: FlowEvent) {
        self.events.lock().push(event);
    }
}

fn body(envelope: &Envelope) -> String {
    String::from_utf8_lossy(&envelope.body).into_owned()
}

pub struct ProbeLinkLayer(pub Arc<ProbeLink>);

impl LinkLayer for ProbeLinkLayer {
    fn push_down(&self, link: &dyn LinkBinding, envelope: Envelope) {
        self.0.record(FlowEvent::Down(body(&envelope)));
        link.push_down(envelope);
    }

    fn skip_down(&self, link: &dyn LinkBinding) {
        self.0.record(FlowEvent::SkipDown);
        link.skip_down();
    }

    fn pull_up(&self, link: &dyn LinkBinding) {
        self.0.record(FlowEvent::PullUp);
        link.pull_up();
    }

    fn push_up(&self, context: &dyn LinkContext, envelope: Envelope) {
        self.0.record(FlowEvent::Up(body(&envelope)));
        context.push_up(envelope);
    }

    fn skip_up(&self, context: &dyn LinkContext) {
        self.0.record(FlowEvent::SkipUp);
        context.skip_up();
    }

    fn pull_down(&self, context: &dyn LinkContext) {
        self.0.record(FlowEvent::PullDown);
        context.pull_down();
    }
}

/// Kernel wrapping every part, node and link in a probe proxy
///
/// Runs at a high priority, so its proxies sit outside the default
/// kernel's. All links share one trace.
pub struct ProbeKernel {
    pub parts: Arc<Probe>,
    pub nodes: Arc<Probe>,
    pub links: Arc<ProbeLink>,
}

impl ProbeKernel {
    pub fn new() -> Arc<Self> {
        Self::with_probes(Probe::new(), Probe::new())
    }

    pub fn with_probes(parts: Arc<Probe>, nodes: Arc<Probe>) -> Arc<Self> {
        Arc::new(ProbeKernel {
            parts,
            nodes,
            links: ProbeLink::new(),
        })
    }
}

impl Kernel for ProbeKernel {
    fn priority(&self) -> f64 {
        10.0
    }

    fn inject_part(&self, _address: &PartAddress, part: Arc<dyn PartBinding>) -> Arc<dyn PartBinding> {
        PartProxy::new(part, ProbePartLayer(self.parts.clone()))
    }

    fn inject_node(&self, _address: &NodeAddress, node: Arc<dyn NodeBinding>) -> Arc<dyn NodeBinding> {
        NodeProxy::new(node, ProbeNodeLayer(self.nodes.clone()))
    }

    fn inject_link(&self, _address: &LinkAddress, link: Arc<dyn LinkBinding>) -> Arc<dyn LinkBinding> {
        LinkProxy::new(link, ProbeLinkLayer(self.links.clone()))
    }
}
