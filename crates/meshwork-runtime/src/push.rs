//! One-shot routed requests

use std::fmt;

use meshwork_core::{Credentials, Envelope, MeshworkError, Uri};

/// Final outcome of a push request
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    Accepted,
    Declined(MeshworkError),
}

pub type PushCompletion = Box<dyn FnOnce(PushOutcome) + Send + 'static>;

/// An envelope routed up the tier graph toward a lane
///
/// The request resolves exactly once: `did_accept` and `did_decline`
/// consume it, and a request dropped unresolved declines itself with
/// [`MeshworkError::LinkClosed`].
pub struct PushRequest {
    pub mesh_uri: Uri,
    pub host_uri: Uri,
    pub envelope: Envelope,
    pub credentials: Option<Credentials>,
    completion: Option<PushCompletion>,
}

impl PushRequest {
    pub fn new(envelope: Envelope) -> Self {
        PushRequest {
            mesh_uri: Uri::empty(),
            host_uri: Uri::empty(),
            envelope,
            credentials: None,
            completion: None,
        }
    }

    pub fn with_mesh(mut self, mesh_uri: Uri) -> Self {
        self.mesh_uri = mesh_uri;
        self
    }

    pub fn with_host(mut self, host_uri: Uri) -> Self {
        self.host_uri = host_uri;
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn on_complete(mut self, completion: impl FnOnce(PushOutcome) + Send + 'static) -> Self {
        self.completion = Some(Box::new(completion));
        self
    }

    #[inline]
    pub fn node_uri(&self) -> &Uri {
        &self.envelope.node_uri
    }

    #[inline]
    pub fn lane_uri(&self) -> &Uri {
        &self.envelope.lane_uri
    }

    pub fn did_accept(mut self) {
        self.complete(PushOutcome::Accepted);
    }

    pub fn did_decline(mut self, error: MeshworkError) {
        self.complete(PushOutcome::Declined(error));
    }

    fn complete(&mut self, outcome: PushOutcome) {
        if let Some(completion) = self.completion.take() {
            completion(outcome);
        }
    }
}

impl Drop for PushRequest {
    fn drop(&mut self) {
        self.complete(PushOutcome::Declined(MeshworkError::LinkClosed));
    }
}

impl fmt::Debug for PushRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushRequest")
            .field("mesh_uri", &self.mesh_uri)
            .field("host_uri", &self.host_uri)
            .field("envelope", &self.envelope)
            .finish_non_exhaustive()
    }
}
