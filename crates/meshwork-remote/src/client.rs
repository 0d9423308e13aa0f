//! Host binding backed by a transport connection

use std::any::TypeId;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::SeedableRng;

use meshwork_core::{
    Envelope, Fault, Lifecycle, LogLevel, MeshworkError, MeshworkResult, Phase, TierHooks,
    TierState, TierStatus, TimerRef, Transport, TransportHandle, TransportListener, Uri,
};
use meshwork_runtime::{
    log_via, own_capability, reject_link, Capability, HostBinding, HostContext, LinkBinding,
    NodeBinding, NodeMap, PushOutcome, PushRequest, TierBinding,
};

use crate::backoff::{ReconnectBackoff, ReconnectConfig};

struct ReconnectState {
    backoff: ReconnectBackoff,
    timer: Option<TimerRef>,
    rng: StdRng,
}

/// Host at the far end of a transport connection
///
/// Connects as soon as it is given a context. Pushes are forwarded over the
/// connection; envelopes arriving from the peer re-enter the local graph
/// through the context's `push_down`. Transient connect failures and
/// disconnects schedule a reconnect on the context's schedule.
pub struct RemoteHostClient {
    host_uri: Uri,
    transport: Arc<dyn Transport>,
    status: TierStatus,
    context: RwLock<Option<Arc<dyn HostContext>>>,
    handle: RwLock<Option<Arc<dyn TransportHandle>>>,
    connected: AtomicBool,
    reconnect: Mutex<ReconnectState>,
    me: Weak<RemoteHostClient>,
}

impl RemoteHostClient {
    pub fn new(host_uri: Uri, transport: Arc<dyn Transport>, config: ReconnectConfig) -> Arc<Self> {
        Self::with_rng(host_uri, transport, config, StdRng::from_entropy())
    }

    /// Client drawing reconnect jitter from `rng`
    pub fn with_rng(
        host_uri: Uri,
        transport: Arc<dyn Transport>,
        config: ReconnectConfig,
        rng: StdRng,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| RemoteHostClient {
            host_uri,
            transport,
            status: TierStatus::new(),
            context: RwLock::new(None),
            handle: RwLock::new(None),
            connected: AtomicBool::new(false),
            reconnect: Mutex::new(ReconnectState {
                backoff: ReconnectBackoff::new(config),
                timer: None,
                rng,
            }),
            me: me.clone(),
        })
    }

    fn log(&self, level: LogLevel, message: &dyn fmt::Display) {
        log_via(self.host_context(), || self.host_uri.to_string(), level, message);
    }

    /// Delay of the last scheduled reconnect, or zero once connected
    pub fn reconnect_delay_ms(&self) -> f64 {
        self.reconnect.lock().backoff.current_ms()
    }

    pub fn is_reconnecting(&self) -> bool {
        self.reconnect
            .lock()
            .timer
            .as_ref()
            .is_some_and(|timer| timer.is_scheduled())
    }

    /// Open a connection through the transport
    pub fn connect(&self) -> Result<(), Fault> {
        let Some(me) = self.me.upgrade() else {
            return Ok(());
        };
        let handle = self.transport.connect(&self.host_uri, me)?;
        *self.handle.write() = Some(handle);
        HostBinding::did_connect(self);
        Ok(())
    }

    /// Schedule a connect attempt unless one is already pending
    pub fn reconnect(&self) {
        let Some(context) = self.host_context() else {
            return;
        };
        if self.status.state().is_closed() {
            return;
        }
        let mut state = self.reconnect.lock();
        if state.timer.as_ref().is_some_and(|timer| timer.is_scheduled()) {
            return;
        }
        let ReconnectState { backoff, rng, .. } = &mut *state;
        let delay = backoff.next(rng);
        self.log(LogLevel::Debug, &format_args!("reconnecting in {} ms", delay.as_millis()));

        let client = self.me.clone();
        let timer = context.schedule().schedule(
            delay,
            Box::new(move || match client.upgrade() {
                Some(client) => client.reconnect_now(),
                None => Ok(()),
            }),
        );
        state.timer = Some(timer);
    }

    /// Timer body: a transient failure schedules the next attempt, a fatal
    /// one escapes to the schedule
    fn reconnect_now(&self) -> MeshworkResult<()> {
        if self.status.state().is_closed() {
            return Ok(());
        }
        match self.connect() {
            Ok(()) => Ok(()),
            Err(Fault::Transient(error)) => {
                self.log(LogLevel::Debug, &format_args!("connect failed: {error}"));
                self.reconnect();
                Ok(())
            }
            Err(Fault::Fatal(error)) => {
                self.log(LogLevel::Fail, &format_args!("connect failed: {error}"));
                Err(error)
            }
        }
    }

    fn cancel_reconnect(&self) {
        let mut state = self.reconnect.lock();
        if let Some(timer) = state.timer.take() {
            timer.cancel();
        }
        state.backoff.reset();
    }

    fn open_connection(&self) {
        match self.connect() {
            Ok(()) => {}
            Err(Fault::Transient(error)) => {
                self.log(LogLevel::Warn, &format_args!("connect failed: {error}"));
                self.reconnect();
            }
            Err(Fault::Fatal(error)) => self.did_fail(error),
        }
    }
}

impl TierHooks for RemoteHostClient {
    fn did_enter(&self, phase: Phase) {
        if phase == Phase::Close {
            self.cancel_reconnect();
            self.connected.store(false, Ordering::Release);
            if let Some(handle) = self.handle.write().take() {
                handle.close();
            }
            self.context.write().take();
        }
    }
}

impl Lifecycle for RemoteHostClient {
    fn tier_state(&self) -> TierState {
        self.status.state()
    }

    fn open(&self) -> MeshworkResult<()> {
        self.status.transition(Phase::Open, self)
    }

    fn load(&self) -> MeshworkResult<()> {
        self.status.transition(Phase::Load, self)
    }

    fn start(&self) -> MeshworkResult<()> {
        self.status.transition(Phase::Start, self)
    }

    fn stop(&self) -> MeshworkResult<()> {
        self.status.transition(Phase::Stop, self)
    }

    fn unload(&self) -> MeshworkResult<()> {
        self.status.transition(Phase::Unload, self)
    }

    fn close(&self) -> MeshworkResult<()> {
        self.status.transition(Phase::Close, self)
    }
}

impl TierBinding for RemoteHostClient {
    fn did_fail(&self, error: MeshworkError) {
        self.status.fail();
        self.log(LogLevel::Fail, &error);
    }
}

impl HostBinding for RemoteHostClient {
    fn host_uri(&self) -> Uri {
        self.host_uri.clone()
    }

    fn host_context(&self) -> Option<Arc<dyn HostContext>> {
        self.context.read().clone()
    }

    fn set_host_context(&self, context: Arc<dyn HostContext>) {
        *self.context.write() = Some(context);
        self.open_connection();
    }

    fn host_wrapper(self: Arc<Self>) -> Arc<dyn HostBinding> {
        match self.host_context().and_then(|context| context.outer_host()) {
            Some(outer) => outer,
            None => self,
        }
    }

    fn unwrap_host(&self, type_id: TypeId) -> Option<Capability> {
        own_capability(&self.me, type_id)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn is_remote(&self) -> bool {
        true
    }

    fn is_secure(&self) -> bool {
        self.host_uri.scheme() == Some("warps")
    }

    fn nodes(&self) -> Arc<NodeMap> {
        Arc::new(BTreeMap::new())
    }

    fn get_node(&self, _node_uri: &Uri) -> Option<Arc<dyn NodeBinding>> {
        None
    }

    fn open_node(&self, _node_uri: &Uri) -> Option<Arc<dyn NodeBinding>> {
        None
    }

    fn add_node(&self, node_uri: Uri, node: Arc<dyn NodeBinding>) -> Arc<dyn NodeBinding> {
        self.log(LogLevel::Warn, &format_args!("remote host cannot hold local node {node_uri}"));
        node
    }

    fn close_node(&self, _node_uri: &Uri) {}

    fn open_uplink(&self, link: Arc<dyn LinkBinding>) {
        reject_link(&*link, MeshworkError::Unsupported("uplinks through remote hosts"));
    }

    fn push_up(&self, request: PushRequest) {
        let handle = self.handle.read().clone();
        match handle.filter(|_| self.is_connected()) {
            Some(handle) => match handle.request(request.envelope.clone()) {
                Ok(()) => request.did_accept(),
                Err(error) => request.did_decline(error),
            },
            None => request.did_decline(MeshworkError::NotConnected(self.host_uri.clone())),
        }
    }

    fn did_connect(&self) {
        self.cancel_reconnect();
        self.connected.store(true, Ordering::Release);
        self.log(LogLevel::Info, &"connected");
        if let Some(context) = self.host_context() {
            context.host_did_connect();
        }
    }

    fn did_disconnect(&self) {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return;
        }
        self.handle.write().take();
        self.log(LogLevel::Info, &"disconnected");
        if let Some(context) = self.host_context() {
            context.host_did_disconnect();
        }
        self.reconnect();
    }
}

impl TransportListener for RemoteHostClient {
    fn did_receive(&self, envelope: Envelope) {
        let Some(context) = self.host_context() else {
            return;
        };
        let mesh_uri = context.host_address().mesh_uri;
        let origin = self.host_uri.clone();
        let request = PushRequest::new(envelope)
            .with_mesh(mesh_uri)
            .on_complete(move |outcome| {
                if let PushOutcome::Declined(error) = outcome {
                    tracing::debug!(host = %origin, %error, "inbound envelope declined");
                }
            });
        context.push_down(request);
    }

    fn did_disconnect(&self) {
        HostBinding::did_disconnect(self);
    }
}
