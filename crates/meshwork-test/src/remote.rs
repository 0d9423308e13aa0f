//! Remote host reconnect scenarios on the virtual clock

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use meshwork_core::{Envelope, Lifecycle, MeshworkError, Uri};
use meshwork_remote::{ReconnectConfig, RemoteHostClient, RemoteKernel};
use meshwork_runtime::{unwrap_host, HostBinding, PushOutcome, PushRequest};

use crate::fixture::{room_factory, EdgeFixture};
use crate::transport::{Attempt, ScriptedTransport};

const PEER: &str = "warp://peer:9001";

struct RemoteFixture {
    fixture: EdgeFixture,
    transport: Arc<ScriptedTransport>,
    said: Arc<Mutex<Vec<String>>>,
}

impl RemoteFixture {
    fn new(transport: Arc<ScriptedTransport>) -> Self {
        Self::with_config(transport, ReconnectConfig::default().with_jitter_ms(0.0))
    }

    fn with_config(transport: Arc<ScriptedTransport>, config: ReconnectConfig) -> Self {
        let said = Arc::new(Mutex::new(Vec::new()));
        let (builder, schedule) = EdgeFixture::builder();
        let builder = builder
            .kernel(Arc::new(RemoteKernel::new(transport.clone()).with_reconnect(config)))
            .route("/rooms/", room_factory(said.clone()));
        RemoteFixture {
            fixture: EdgeFixture::start(builder, schedule),
            transport,
            said,
        }
    }

    fn push_remote(&self, body: &str) -> Option<PushOutcome> {
        let envelope = Envelope::command(Uri::parse("/rooms/1"), Uri::parse("say"), body.to_string());
        self.fixture
            .push(PushRequest::new(envelope).with_host(Uri::parse(PEER)))
    }

    fn client(&self) -> Arc<RemoteHostClient> {
        let gateway = self
            .fixture
            .edge
            .mesh(&Uri::empty())
            .and_then(|mesh| mesh.gateway())
            .unwrap();
        let host = gateway.get_host(&Uri::parse(PEER)).unwrap();
        unwrap_host::<RemoteHostClient>(&*host).unwrap()
    }

    fn delays(&self) -> Vec<u64> {
        self.fixture
            .schedule
            .scheduled_delays()
            .into_iter()
            .map(|delay| delay.as_millis() as u64)
            .collect()
    }

    fn advance(&self, millis: u64) -> Vec<MeshworkError> {
        self.fixture.schedule.advance(Duration::from_millis(millis))
    }
}

#[test]
fn test_refused_connects_back_off_then_reset() {
    let remote = RemoteFixture::new(ScriptedTransport::scripted([Attempt::Refuse; 3]));
    assert_eq!(
        remote.push_remote("early"),
        Some(PushOutcome::Declined(MeshworkError::NotConnected(Uri::parse(PEER))))
    );
    assert_eq!(remote.transport.attempts(), 1);
    assert_eq!(remote.delays(), vec![500]);
    assert!(remote.client().is_reconnecting());

    assert!(remote.advance(500).is_empty());
    assert_eq!(remote.transport.attempts(), 2);
    assert_eq!(remote.delays(), vec![900]);

    assert!(remote.advance(900).is_empty());
    assert_eq!(remote.delays(), vec![1620]);

    assert!(remote.advance(1620).is_empty());
    assert_eq!(remote.transport.attempts(), 4);
    assert_eq!(remote.fixture.schedule.scheduled(), 0);

    let client = remote.client();
    assert!(client.is_connected());
    assert!(!client.is_reconnecting());
    assert_eq!(client.reconnect_delay_ms(), 0.0);
}

#[test]
fn test_connected_client_forwards_pushes() {
    let remote = RemoteFixture::new(ScriptedTransport::new());
    assert_eq!(remote.push_remote("over the wire"), Some(PushOutcome::Accepted));
    let connection = remote.transport.live().unwrap();
    assert_eq!(connection.address(), &Uri::parse(PEER));
    let sent = connection.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].body, "over the wire".as_bytes());
    assert!(remote.said.lock().is_empty());
}

#[test]
fn test_inbound_envelopes_reach_local_nodes() {
    let remote = RemoteFixture::new(ScriptedTransport::new());
    remote.push_remote("hello");
    let connection = remote.transport.live().unwrap();
    connection.deliver(Envelope::command(Uri::parse("/rooms/1"), Uri::parse("say"), "from peer"));
    assert_eq!(*remote.said.lock(), vec!["from peer".to_string()]);
}

#[test]
fn test_severed_connection_reschedules_from_base() {
    let remote = RemoteFixture::new(ScriptedTransport::scripted([Attempt::Accept, Attempt::Refuse]));
    remote.push_remote("hello");
    let client = remote.client();
    assert!(client.is_connected());

    remote.transport.live().unwrap().sever();
    assert!(!client.is_connected());
    assert_eq!(remote.delays(), vec![500]);
    assert_eq!(
        remote.push_remote("while down"),
        Some(PushOutcome::Declined(MeshworkError::NotConnected(Uri::parse(PEER))))
    );

    assert!(remote.advance(500).is_empty());
    assert_eq!(remote.delays(), vec![900]);
    assert!(remote.advance(900).is_empty());
    assert!(client.is_connected());
    assert_eq!(remote.transport.connections().len(), 2);
    assert_eq!(remote.push_remote("back"), Some(PushOutcome::Accepted));
}

#[test]
fn test_fatal_connect_stops_retrying() {
    let remote = RemoteFixture::new(ScriptedTransport::scripted([Attempt::Refuse, Attempt::Abort]));
    remote.push_remote("hello");
    let errors = remote.advance(500);
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], MeshworkError::Fatal(_)));
    assert_eq!(remote.fixture.schedule.scheduled(), 0);
    assert!(remote.advance(60_000).is_empty());
    assert_eq!(remote.transport.attempts(), 2);
    assert!(!remote.client().is_connected());
}

#[test]
fn test_close_cancels_pending_reconnect() {
    let remote = RemoteFixture::new(ScriptedTransport::scripted([Attempt::Refuse; 8]));
    remote.push_remote("hello");
    let client = remote.client();
    assert!(client.is_reconnecting());

    remote.fixture.edge.close().unwrap();
    assert!(client.is_closed());
    assert!(!client.is_reconnecting());
    assert!(remote.advance(60_000).is_empty());
    assert_eq!(remote.transport.attempts(), 1);
}

#[test]
fn test_manual_connect_cancels_timer() {
    let remote = RemoteFixture::new(ScriptedTransport::scripted([Attempt::Refuse]));
    remote.push_remote("hello");
    let client = remote.client();
    assert_eq!(remote.fixture.schedule.scheduled(), 1);

    client.connect().unwrap();
    assert!(client.is_connected());
    assert_eq!(remote.fixture.schedule.scheduled(), 0);
    assert!(remote.advance(10_000).is_empty());
    assert_eq!(remote.transport.attempts(), 2);
}

#[test]
fn test_default_jitter_bounds_first_delay() {
    let remote = RemoteFixture::with_config(
        ScriptedTransport::scripted([Attempt::Refuse]),
        ReconnectConfig::default(),
    );
    remote.push_remote("hello");
    let delays = remote.delays();
    assert_eq!(delays.len(), 1);
    assert!((500..1500).contains(&delays[0]));
}

#[test]
fn test_flaky_transport_eventually_connects() {
    let remote = RemoteFixture::new(ScriptedTransport::flaky(42, 0.7));
    remote.push_remote("hello");
    for _ in 0..64 {
        if remote.client().is_connected() {
            break;
        }
        if let Some(errors) = remote.fixture.schedule.fire_next() {
            assert!(errors.is_empty());
        }
    }
    assert!(remote.client().is_connected());
    assert!(remote.delays().is_empty());
}
