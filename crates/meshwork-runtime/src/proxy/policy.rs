//! Stock proxy layers: host policy enforcement and link accounting

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use meshwork_core::{Credentials, Envelope, FlowStats, MeshworkError, PolicyDirective};

use crate::host::{HostBinding, HostContext};
use crate::link::{reject_link, LinkBinding, LinkContext};
use crate::proxy::host::HostLayer;
use crate::proxy::link::LinkLayer;
use crate::push::PushRequest;

/// Authenticates every request entering a host
///
/// Requests without credentials are checked as anonymous callers of the
/// host. Uplinks present the remote identity of their downlink, when it has
/// one. `Forward` leaves the decision to the host itself.
#[derive(Clone, Copy, Debug, Default)]
pub struct PolicyLayer;

impl PolicyLayer {
    fn admit(
        host: &dyn HostBinding,
        context: Option<&Arc<dyn HostContext>>,
        credentials: Option<&Credentials>,
    ) -> Result<(), MeshworkError> {
        let Some(context) = context else {
            return Ok(());
        };
        let directive = match credentials {
            Some(credentials) => context.authenticate(credentials),
            None => context.authenticate(&Credentials::new(host.host_uri())),
        };
        match directive {
            PolicyDirective::Deny(reason) => Err(MeshworkError::PolicyRejected(reason)),
            PolicyDirective::Allow(_) | PolicyDirective::Forward => Ok(()),
        }
    }
}

impl HostLayer for PolicyLayer {
    fn open_uplink(
        &self,
        host: &dyn HostBinding,
        context: Option<Arc<dyn HostContext>>,
        link: Arc<dyn LinkBinding>,
    ) {
        let credentials = link
            .remote_identity_down()
            .map(|identity| Credentials::for_identity(host.host_uri(), &identity));
        match Self::admit(host, context.as_ref(), credentials.as_ref()) {
            Ok(()) => host.open_uplink(link),
            Err(error) => reject_link(&*link, error),
        }
    }

    fn push_up(
        &self,
        host: &dyn HostBinding,
        context: Option<Arc<dyn HostContext>>,
        request: PushRequest,
    ) {
        match Self::admit(host, context.as_ref(), request.credentials.as_ref()) {
            Ok(()) => host.push_up(request),
            Err(error) => {
                tracing::debug!(host = %host.host_uri(), %error, "push denied");
                request.did_decline(error);
            }
        }
    }
}

/// Counts the envelopes crossing a link
#[derive(Debug, Default)]
pub struct LinkStatsLayer {
    pushed_down: AtomicU64,
    skipped_down: AtomicU64,
    pushed_up: AtomicU64,
}

impl LinkStatsLayer {
    pub fn stats(&self) -> FlowStats {
        FlowStats {
            pushed_down: self.pushed_down.load(Ordering::Relaxed),
            skipped_down: self.skipped_down.load(Ordering::Relaxed),
            pushed_up: self.pushed_up.load(Ordering::Relaxed),
            rejected: 0,
        }
    }
}

impl LinkLayer for LinkStatsLayer {
    fn push_down(&self, link: &dyn LinkBinding, envelope: Envelope) {
        self.pushed_down.fetch_add(1, Ordering::Relaxed);
        link.push_down(envelope);
    }

    fn skip_down(&self, link: &dyn LinkBinding) {
        self.skipped_down.fetch_add(1, Ordering::Relaxed);
        link.skip_down();
    }

    fn push_up(&self, context: &dyn LinkContext, envelope: Envelope) {
        self.pushed_up.fetch_add(1, Ordering::Relaxed);
        context.push_up(envelope);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostTable;
    use crate::lane::{CommandLane, SupplyLane};
    use crate::link::{unwrap_link, LocalDownlink};
    use crate::node::{NodeBinding, NodeModel};
    use crate::proxy::{HostProxy, LinkProxy};
    use crate::push::PushOutcome;
    use crate::stage::detached_services;
    use crate::tier::{Services, TierContext};
    use meshwork_core::{
        HostAddress, Identity, LaneAddress, Lifecycle, LinkAddress, LogEntry, NodeAddress,
        PartKey, Policy, Uri,
    };
    use parking_lot::Mutex;

    struct DenyAnonymous;

    impl Policy for DenyAnonymous {
        fn authenticate(&self, credentials: &Credentials) -> PolicyDirective<Identity> {
            match credentials.claims.get("subject") {
                Some(subject) => PolicyDirective::Allow(Identity::authenticated(subject.clone())),
                None => PolicyDirective::Deny("anonymous".to_string()),
            }
        }
    }

    struct Guarded;

    impl TierContext for Guarded {
        fn services(&self) -> Arc<Services> {
            Arc::new((*detached_services()).clone().with_policy(Arc::new(DenyAnonymous)))
        }
        fn origin(&self) -> String {
            "guarded".to_string()
        }
        fn record(&self, entry: LogEntry) {
            entry.emit();
        }
    }

    impl HostContext for Guarded {
        fn host_address(&self) -> HostAddress {
            HostAddress {
                edge_name: String::new(),
                mesh_uri: Uri::empty(),
                part_key: PartKey::Extant,
                host_uri: Uri::empty(),
            }
        }
        fn outer_host(&self) -> Option<Arc<dyn HostBinding>> {
            None
        }
        fn create_node(&self, _: &NodeAddress) -> Option<Arc<dyn NodeBinding>> {
            None
        }
        fn inject_node(&self, _: &NodeAddress, node: Arc<dyn NodeBinding>) -> Arc<dyn NodeBinding> {
            node
        }
        fn create_lane(&self, _: &LaneAddress) -> Option<Arc<dyn crate::lane::LaneBinding>> {
            None
        }
        fn inject_lane(
            &self,
            _: &LaneAddress,
            lane: Arc<dyn crate::lane::LaneBinding>,
        ) -> Arc<dyn crate::lane::LaneBinding> {
            lane
        }
        fn push_down(&self, request: PushRequest) {
            request.did_decline(MeshworkError::LinkClosed);
        }
        fn authenticate(&self, credentials: &Credentials) -> PolicyDirective<Identity> {
            self.policy().authenticate(credentials)
        }
        fn host_did_connect(&self) {}
        fn host_did_disconnect(&self) {}
    }

    fn guarded_host() -> Arc<HostProxy<PolicyLayer>> {
        let table = HostTable::new(Uri::empty());
        let node = NodeModel::new(Uri::parse("/n"));
        node.open_lane(Uri::parse("cmd"), CommandLane::new(Uri::parse("cmd"), |_: &Envelope| {}));
        table.add_node(Uri::parse("/n"), node);
        let proxy = HostProxy::new(table, PolicyLayer);
        proxy.set_host_context(Arc::new(Guarded));
        proxy.start().unwrap();
        proxy
    }

    fn push(host: &dyn HostBinding, request: PushRequest) -> Option<PushOutcome> {
        let outcome = Arc::new(Mutex::new(None));
        let seen = outcome.clone();
        host.push_up(request.on_complete(move |result| *seen.lock() = Some(result)));
        let result = outcome.lock().clone();
        result
    }

    #[test]
    fn test_policy_denies_anonymous_push() {
        let host = guarded_host();
        let envelope = Envelope::command(Uri::parse("/n"), Uri::parse("cmd"), "x");
        assert_eq!(
            push(&*host, PushRequest::new(envelope.clone())),
            Some(PushOutcome::Declined(MeshworkError::PolicyRejected("anonymous".into())))
        );

        let credentials = Credentials::new(Uri::empty()).with_claim("subject", "ops");
        assert_eq!(
            push(&*host, PushRequest::new(envelope).with_credentials(credentials)),
            Some(PushOutcome::Accepted)
        );
    }

    #[test]
    fn test_policy_rejects_anonymous_uplink() {
        let host = guarded_host();
        let downlink = LocalDownlink::new(LinkAddress::new(Uri::parse("/n"), Uri::parse("cmd")), |_| {});
        host.open_uplink(downlink.clone());
        assert_eq!(
            downlink.error(),
            Some(MeshworkError::PolicyRejected("anonymous".into()))
        );
    }

    #[test]
    fn test_policy_admits_uplink_with_remote_identity() {
        let host = guarded_host();
        let address = LinkAddress::new(Uri::parse("/n"), Uri::parse("cmd"));
        let downlink = LocalDownlink::with_identity(
            address.clone(),
            Some(Identity::authenticated("ops")),
            |_| {},
        );
        host.open_uplink(downlink.clone());
        assert_eq!(downlink.error(), None);

        let nobody = LocalDownlink::with_identity(address, Some(Identity::anonymous()), |_| {});
        host.open_uplink(nobody.clone());
        assert_eq!(nobody.error(), Some(MeshworkError::PolicyRejected("anonymous".into())));
    }

    #[test]
    fn test_link_stats_count_both_directions() {
        let node = NodeModel::new(Uri::parse("/n"));
        let supply = SupplyLane::new(Uri::parse("feed"));
        node.open_lane(Uri::parse("feed"), supply.clone());
        node.start().unwrap();

        let downlink = LocalDownlink::new(LinkAddress::new(Uri::parse("/n"), Uri::parse("feed")), |_| {});
        let proxy = LinkProxy::new(downlink.clone(), LinkStatsLayer::default());
        node.open_uplink(proxy.clone());
        assert!(downlink.is_open());

        supply.push("a");
        supply.push("b");
        downlink.command("ping");

        let stats = proxy.layer().stats();
        assert_eq!(downlink.received(), 2);
        assert_eq!(stats.pushed_down, 2);
        assert_eq!(stats.pushed_up, 1);

        let found = unwrap_link::<LinkProxy<LinkStatsLayer>>(&*proxy).unwrap();
        assert!(Arc::ptr_eq(&found, &proxy));
        assert!(unwrap_link::<LocalDownlink>(&*proxy).is_some());
    }
}
