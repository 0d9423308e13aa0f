//! Contracts of the collaborators the runtime consumes
//!
//! The runtime never implements scheduling, storage, authentication or
//! networking itself. Tiers reach these services through their contexts,
//! which ultimately resolve to implementations supplied by the edge.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Envelope, Fault, MeshworkResult, Uri};

/// Unit of work handed to a [`Stage`]
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Timer callback; an error escapes to whoever drives the schedule
pub type TimerTask = Box<dyn FnOnce() -> MeshworkResult<()> + Send + 'static>;

/// Executes tasks asynchronously
pub trait Stage: Send + Sync {
    fn execute(&self, task: Task);
}

/// Handle to a scheduled timer
pub trait TimerHandle: Send + Sync {
    fn is_scheduled(&self) -> bool;

    /// Cancel the timer; returns false if it already fired or was cancelled
    fn cancel(&self) -> bool;
}

pub type TimerRef = Arc<dyn TimerHandle>;

/// Runs timer callbacks after a delay
pub trait Schedule: Send + Sync {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerRef;
}

/// Kind of named data structure a store hands out
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataKind {
    List,
    Map,
    Spatial,
    Value,
}

/// Handle to a named data structure acquired from a [`Store`]
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataHandle {
    pub kind: DataKind,
    pub name: String,
}

/// Named persistent data structures
///
/// The runtime acquires and releases handles; it never inspects their
/// contents.
pub trait Store: Send + Sync {
    fn list_data(&self, name: &str) -> DataHandle;
    fn map_data(&self, name: &str) -> DataHandle;
    fn spatial_data(&self, name: &str) -> DataHandle;
    fn value_data(&self, name: &str) -> DataHandle;
    fn release(&self, handle: &DataHandle);
}

/// Credentials presented with a request
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub host_uri: Uri,
    pub claims: BTreeMap<String, String>,
}

impl Credentials {
    pub fn new(host_uri: Uri) -> Self {
        Credentials {
            host_uri,
            claims: BTreeMap::new(),
        }
    }

    /// Credentials asserting `identity`; anonymous identities carry no subject
    pub fn for_identity(host_uri: Uri, identity: &Identity) -> Self {
        let credentials = Credentials::new(host_uri);
        if identity.is_authenticated {
            credentials.with_claim("subject", identity.subject.clone())
        } else {
            credentials
        }
    }

    pub fn with_claim(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.claims.insert(key.into(), value.into());
        self
    }
}

/// Authenticated principal
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub subject: String,
    pub is_authenticated: bool,
}

impl Identity {
    pub fn authenticated(subject: impl Into<String>) -> Self {
        Identity {
            subject: subject.into(),
            is_authenticated: true,
        }
    }

    pub fn anonymous() -> Self {
        Identity {
            subject: String::new(),
            is_authenticated: false,
        }
    }
}

/// Outcome of a policy decision
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PolicyDirective<T> {
    Allow(T),
    Deny(String),
    /// No decision; defer to the next authority
    Forward,
}

impl<T> PolicyDirective<T> {
    #[inline]
    pub fn is_denied(&self) -> bool {
        matches!(self, PolicyDirective::Deny(_))
    }
}

/// Authentication and authorization authority
pub trait Policy: Send + Sync {
    fn authenticate(&self, credentials: &Credentials) -> PolicyDirective<Identity>;
}

/// Policy that admits every request
#[derive(Clone, Copy, Debug, Default)]
pub struct OpenPolicy;

impl Policy for OpenPolicy {
    fn authenticate(&self, credentials: &Credentials) -> PolicyDirective<Identity> {
        match credentials.claims.get("subject") {
            Some(subject) => PolicyDirective::Allow(Identity::authenticated(subject.clone())),
            None => PolicyDirective::Allow(Identity::anonymous()),
        }
    }
}

/// Receives traffic from an established transport connection
pub trait TransportListener: Send + Sync {
    fn did_receive(&self, envelope: Envelope);
    fn did_disconnect(&self);
}

/// Established connection to a remote host
pub trait TransportHandle: Send + Sync {
    /// Send one envelope; responses arrive through the listener
    fn request(&self, envelope: Envelope) -> MeshworkResult<()>;
    fn close(&self);
}

/// Opaque envelope transport
pub trait Transport: Send + Sync {
    /// Connect to `address`, classifying any failure at its origin
    fn connect(
        &self,
        address: &Uri,
        listener: Arc<dyn TransportListener>,
    ) -> Result<Arc<dyn TransportHandle>, Fault>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_policy_allows_everyone() {
        let policy = OpenPolicy;
        let anonymous = policy.authenticate(&Credentials::default());
        assert_eq!(anonymous, PolicyDirective::Allow(Identity::anonymous()));

        let named = policy.authenticate(&Credentials::default().with_claim("subject", "ada"));
        assert_eq!(named, PolicyDirective::Allow(Identity::authenticated("ada")));
    }

    #[test]
    fn test_identity_credentials_round_trip_through_policy() {
        let policy = OpenPolicy;
        let ada = Credentials::for_identity(Uri::empty(), &Identity::authenticated("ada"));
        assert_eq!(policy.authenticate(&ada), PolicyDirective::Allow(Identity::authenticated("ada")));

        let nobody = Credentials::for_identity(Uri::empty(), &Identity::anonymous());
        assert!(nobody.claims.is_empty());
        assert_eq!(policy.authenticate(&nobody), PolicyDirective::Allow(Identity::anonymous()));
    }
}
