//! Opaque message envelopes routed between tiers

use bytes::Bytes;

use crate::Uri;

/// Envelope type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    /// Upward command addressed to a lane
    Command,
    /// Downward event published by a lane
    Event,
    /// Request to open a link
    Link,
    /// Request to close a link
    Unlink,
}

/// Routable message; the body is never inspected by the runtime core
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub kind: EnvelopeKind,
    pub node_uri: Uri,
    pub lane_uri: Uri,
    pub body: Bytes,
}

impl Envelope {
    pub fn new(kind: EnvelopeKind, node_uri: Uri, lane_uri: Uri, body: Bytes) -> Self {
        Envelope {
            kind,
            node_uri,
            lane_uri,
            body,
        }
    }

    pub fn command(node_uri: Uri, lane_uri: Uri, body: impl Into<Bytes>) -> Self {
        Self::new(EnvelopeKind::Command, node_uri, lane_uri, body.into())
    }

    pub fn event(node_uri: Uri, lane_uri: Uri, body: impl Into<Bytes>) -> Self {
        Self::new(EnvelopeKind::Event, node_uri, lane_uri, body.into())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.body.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}
