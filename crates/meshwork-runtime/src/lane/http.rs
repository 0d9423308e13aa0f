//! HTTP lanes answer request/response exchanges through their views
//!
//! Each exchange runs five relays in sequence: will-request, did-request,
//! do-respond, will-respond and did-respond. The do-respond relay stops at
//! the first view that produces a response and caches it; when no view
//! answers, the lane responds `404 Not Found`.

use std::any::TypeId;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use meshwork_core::{Envelope, LinkKey, MeshworkError, Phase, Stage, TierHooks, Uri};

use crate::lane::relay::{LaneRelay, PhaseOutcome, RelayRun};
use crate::lane::{LaneBinding, LaneContext, LaneCore};
use crate::link::{reject_link, LinkBinding};
use crate::push::PushRequest;
use crate::tier::{own_capability, tier_lifecycle, Capability, TierBinding};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub uri: Uri,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl HttpRequest {
    pub fn get(uri: Uri) -> Self {
        HttpRequest {
            method: "GET".to_string(),
            uri,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn post(uri: Uri, body: impl Into<Bytes>) -> Self {
        HttpRequest {
            method: "POST".to_string(),
            uri,
            headers: Vec::new(),
            body: body.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        HttpResponse {
            status,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::new(200).with_body(body)
    }

    pub fn not_found() -> Self {
        Self::new(404)
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

/// Answer from a view's do-respond dispatch
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Respond {
    /// Let the next view answer
    Pass,
    /// Re-run this view off the caller's thread
    Defer,
    Response(HttpResponse),
}

/// Observer and dispatch hooks of an HTTP lane view
///
/// `lane_*` observers fire once per view, during the preemptive pass.
/// `dispatch_*` hooks return `false` (or [`Respond::Defer`]) to be re-run
/// with `preemptive = false` on the stage.
pub trait HttpLaneView: Send + Sync {
    fn lane_will_request(&self, _request: &HttpRequest) {}

    fn dispatch_will_request(&self, _request: &HttpRequest, _preemptive: bool) -> bool {
        true
    }

    fn lane_did_request(&self, _request: &HttpRequest) {}

    fn dispatch_did_request(&self, _request: &HttpRequest, _preemptive: bool) -> bool {
        true
    }

    fn dispatch_do_respond(&self, _request: &HttpRequest, _preemptive: bool) -> Respond {
        Respond::Pass
    }

    fn lane_will_respond(&self, _response: &HttpResponse) {}

    fn dispatch_will_respond(&self, _response: &HttpResponse, _preemptive: bool) -> bool {
        true
    }

    fn lane_did_respond(&self, _response: &HttpResponse) {}

    fn dispatch_did_respond(&self, _response: &HttpResponse, _preemptive: bool) -> bool {
        true
    }
}

type Responder = Box<dyn FnOnce(HttpResponse) + Send + 'static>;

struct HttpExchange {
    request: HttpRequest,
    views: Vec<Arc<dyn HttpLaneView>>,
    stage: Arc<dyn Stage>,
    responder: Mutex<Option<Responder>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum HttpStep {
    WillRequest,
    DidRequest,
    DoRespond,
    WillRespond,
    DidRespond,
}

struct HttpRelay {
    exchange: Arc<HttpExchange>,
    step: HttpStep,
    response: Option<HttpResponse>,
}

impl HttpRelay {
    fn launch(exchange: Arc<HttpExchange>, step: HttpStep, response: Option<HttpResponse>) {
        let views = exchange.views.clone();
        let stage = exchange.stage.clone();
        let relay = HttpRelay {
            exchange,
            step,
            response,
        };
        RelayRun::new(relay, views, stage).run();
    }
}

impl LaneRelay for HttpRelay {
    type View = dyn HttpLaneView;

    fn run_phase(&mut self, view: &dyn HttpLaneView, _phase: usize, preemptive: bool) -> PhaseOutcome {
        let request = &self.exchange.request;
        match self.step {
            HttpStep::WillRequest => {
                if preemptive {
                    view.lane_will_request(request);
                }
                PhaseOutcome::from_dispatch(view.dispatch_will_request(request, preemptive))
            }
            HttpStep::DidRequest => {
                if preemptive {
                    view.lane_did_request(request);
                }
                PhaseOutcome::from_dispatch(view.dispatch_did_request(request, preemptive))
            }
            HttpStep::DoRespond => {
                if self.response.is_some() {
                    return PhaseOutcome::Complete;
                }
                match view.dispatch_do_respond(request, preemptive) {
                    Respond::Pass => PhaseOutcome::Continue,
                    Respond::Defer => PhaseOutcome::Defer,
                    Respond::Response(response) => {
                        self.response = Some(response);
                        PhaseOutcome::Complete
                    }
                }
            }
            HttpStep::WillRespond | HttpStep::DidRespond => {
                let Some(response) = self.response.as_ref() else {
                    return PhaseOutcome::Complete;
                };
                if self.step == HttpStep::WillRespond {
                    if preemptive {
                        view.lane_will_respond(response);
                    }
                    PhaseOutcome::from_dispatch(view.dispatch_will_respond(response, preemptive))
                } else {
                    if preemptive {
                        view.lane_did_respond(response);
                    }
                    PhaseOutcome::from_dispatch(view.dispatch_did_respond(response, preemptive))
                }
            }
        }
    }

    fn done(self) {
        let HttpRelay {
            exchange,
            step,
            response,
        } = self;
        match step {
            HttpStep::WillRequest => HttpRelay::launch(exchange, HttpStep::DidRequest, None),
            HttpStep::DidRequest => HttpRelay::launch(exchange, HttpStep::DoRespond, None),
            HttpStep::DoRespond => {
                let response = response.unwrap_or_else(HttpResponse::not_found);
                HttpRelay::launch(exchange, HttpStep::WillRespond, Some(response));
            }
            HttpStep::WillRespond => {
                if let (Some(response), Some(responder)) =
                    (response.clone(), exchange.responder.lock().take())
                {
                    responder(response);
                }
                HttpRelay::launch(exchange, HttpStep::DidRespond, response);
            }
            HttpStep::DidRespond => {}
        }
    }
}

/// Lane serving HTTP exchanges
pub struct HttpLane {
    core: LaneCore,
    views: RwLock<Vec<Arc<dyn HttpLaneView>>>,
    me: Weak<HttpLane>,
}

impl HttpLane {
    pub fn new(lane_uri: Uri) -> Arc<Self> {
        Arc::new_cyclic(|me| HttpLane {
            core: LaneCore::new(lane_uri),
            views: RwLock::new(Vec::new()),
            me: me.clone(),
        })
    }

    pub fn add_view(&self, view: Arc<dyn HttpLaneView>) {
        self.views.write().push(view);
    }

    pub fn view_count(&self) -> usize {
        self.views.read().len()
    }

    /// Run one exchange; `respond` is called exactly once
    pub fn request(&self, request: HttpRequest, respond: impl FnOnce(HttpResponse) + Send + 'static) {
        let context = match self.core.context() {
            Some(context) if self.core.state().is_started() => context,
            _ => {
                respond(HttpResponse::new(503));
                return;
            }
        };
        let exchange = Arc::new(HttpExchange {
            request,
            views: self.views.read().clone(),
            stage: context.stage(),
            responder: Mutex::new(Some(Box::new(respond))),
        });
        HttpRelay::launch(exchange, HttpStep::WillRequest, None);
    }
}

impl TierHooks for HttpLane {
    fn did_enter(&self, phase: Phase) {
        if phase == Phase::Close {
            self.core.clear_context();
        }
    }
}

tier_lifecycle!(HttpLane, core.status);

impl TierBinding for HttpLane {
    fn did_fail(&self, error: MeshworkError) {
        self.core.fail(error);
    }
}

impl LaneBinding for HttpLane {
    fn lane_uri(&self) -> Uri {
        self.core.lane_uri().clone()
    }

    fn lane_type(&self) -> &'static str {
        "http"
    }

    fn lane_context(&self) -> Option<Arc<dyn LaneContext>> {
        self.core.context()
    }

    fn set_lane_context(&self, context: Arc<dyn LaneContext>) {
        self.core.set_context(context);
    }

    fn unwrap_lane(&self, type_id: TypeId) -> Option<Capability> {
        own_capability(&self.me, type_id)
    }

    fn uplink_count(&self) -> usize {
        0
    }

    fn open_uplink(&self, link: Arc<dyn LinkBinding>) {
        reject_link(&*link, MeshworkError::Unsupported("http lanes accept only http exchanges"));
    }

    fn close_uplink(&self, _key: LinkKey) {}

    fn push_up(&self, request: PushRequest) {
        request.did_decline(MeshworkError::Unsupported("http lanes accept no commands"));
    }

    fn push_up_command(&self, _key: LinkKey, _envelope: Envelope) {}
}
