//! Scripted transport for remote host scenarios
//!
//! Each connect attempt consumes the next scripted outcome; once the
//! script runs out every attempt succeeds. A flaky mode refuses attempts
//! at random from a seeded generator.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use meshwork_core::{
    Envelope, Fault, MeshworkError, MeshworkResult, Transport, TransportHandle, TransportListener,
    Uri,
};

/// Outcome of one connect attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Attempt {
    Accept,
    /// Transient refusal; the client should retry
    Refuse,
    /// Fatal refusal
    Abort,
}

/// Connection handed out by a [`ScriptedTransport`]
pub struct ScriptedConnection {
    address: Uri,
    listener: Mutex<Option<Arc<dyn TransportListener>>>,
    sent: Mutex<Vec<Envelope>>,
    closed: AtomicBool,
}

impl ScriptedConnection {
    pub fn address(&self) -> &Uri {
        &self.address
    }

    /// Envelopes the client sent through this connection
    pub fn sent(&self) -> Vec<Envelope> {
        self.sent.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Deliver an envelope from the peer
    pub fn deliver(&self, envelope: Envelope) {
        let listener = self.listener.lock().clone();
        if let Some(listener) = listener {
            listener.did_receive(envelope);
        }
    }

    /// Drop the connection from the peer's side
    pub fn sever(&self) {
        self.closed.store(true, Ordering::Release);
        let listener = self.listener.lock().take();
        if let Some(listener) = listener {
            listener.did_disconnect();
        }
    }
}

impl TransportHandle for ScriptedConnection {
    fn request(&self, envelope: Envelope) -> MeshworkResult<()> {
        if self.is_closed() {
            return Err(MeshworkError::TransportError("connection closed".to_string()));
        }
        self.sent.lock().push(envelope);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.listener.lock().take();
    }
}

#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Attempt>>,
    flaky: Mutex<Option<(StdRng, f64)>>,
    attempts: AtomicUsize,
    connections: Mutex<Vec<Arc<ScriptedConnection>>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Transport whose attempts follow `script`
    pub fn scripted(script: impl IntoIterator<Item = Attempt>) -> Arc<Self> {
        let transport = Self::default();
        transport.script.lock().extend(script);
        Arc::new(transport)
    }

    /// Transport refusing unscripted attempts with probability `refusal`
    pub fn flaky(seed: u64, refusal: f64) -> Arc<Self> {
        let transport = Self::default();
        *transport.flaky.lock() = Some((StdRng::seed_from_u64(seed), refusal.clamp(0.0, 1.0)));
        Arc::new(transport)
    }

    pub fn push_script(&self, attempt: Attempt) {
        self.script.lock().push_back(attempt);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::Acquire)
    }

    pub fn connections(&self) -> Vec<Arc<ScriptedConnection>> {
        self.connections.lock().clone()
    }

    /// Most recent connection that is still open
    pub fn live(&self) -> Option<Arc<ScriptedConnection>> {
        self.connections
            .lock()
            .iter()
            .rev()
            .find(|connection| !connection.is_closed())
            .cloned()
    }

    fn next_attempt(&self) -> Attempt {
        if let Some(attempt) = self.script.lock().pop_front() {
            return attempt;
        }
        match self.flaky.lock().as_mut() {
            Some((rng, refusal)) => {
                if rng.gen_bool(*refusal) {
                    Attempt::Refuse
                } else {
                    Attempt::Accept
                }
            }
            None => Attempt::Accept,
        }
    }
}

impl Transport for ScriptedTransport {
    fn connect(
        &self,
        address: &Uri,
        listener: Arc<dyn TransportListener>,
    ) -> Result<Arc<dyn TransportHandle>, Fault> {
        self.attempts.fetch_add(1, Ordering::AcqRel);
        match self.next_attempt() {
            Attempt::Accept => {
                let connection = Arc::new(ScriptedConnection {
                    address: address.clone(),
                    listener: Mutex::new(Some(listener)),
                    sent: Mutex::new(Vec::new()),
                    closed: AtomicBool::new(false),
                });
                self.connections.lock().push(connection.clone());
                Ok(connection)
            }
            Attempt::Refuse => Err(Fault::Transient(MeshworkError::ConnectFailed {
                uri: address.clone(),
                reason: "connection refused".to_string(),
            })),
            Attempt::Abort => Err(Fault::Fatal(MeshworkError::Fatal(format!(
                "{address} rejected the handshake"
            )))),
        }
    }
}
