//! Kernel that serves `warp` and `warps` hosts through a transport

use std::sync::Arc;

use meshwork_core::{HostAddress, Transport};
use meshwork_runtime::{HostBinding, Kernel};

use crate::backoff::ReconnectConfig;
use crate::client::RemoteHostClient;

const REMOTE_SCHEMES: [&str; 2] = ["warp", "warps"];

pub struct RemoteKernel {
    transport: Arc<dyn Transport>,
    config: ReconnectConfig,
}

impl RemoteKernel {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        RemoteKernel {
            transport,
            config: ReconnectConfig::default(),
        }
    }

    pub fn with_reconnect(mut self, config: ReconnectConfig) -> Self {
        self.config = config;
        self
    }
}

impl Kernel for RemoteKernel {
    fn create_host(&self, address: &HostAddress) -> Option<Arc<dyn HostBinding>> {
        let scheme = address.host_uri.scheme()?;
        if !REMOTE_SCHEMES.contains(&scheme) {
            return None;
        }
        tracing::debug!(host = %address.host_uri, "creating remote host client");
        Some(RemoteHostClient::new(
            address.host_uri.clone(),
            self.transport.clone(),
            self.config.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshwork_core::{Fault, MeshAddress, MeshworkError, PartKey, TransportHandle, TransportListener, Uri};
    use meshwork_runtime::{unwrap_host, DefaultKernel, HostTable, KernelStack};

    struct Offline;

    impl Transport for Offline {
        fn connect(
            &self,
            address: &Uri,
            _listener: Arc<dyn TransportListener>,
        ) -> Result<Arc<dyn TransportHandle>, Fault> {
            Err(Fault::Transient(MeshworkError::NotConnected(address.clone())))
        }
    }

    fn host(uri: &str) -> HostAddress {
        MeshAddress::new("edge", Uri::empty())
            .part(PartKey::Extant)
            .host(Uri::parse(uri))
    }

    #[test]
    fn test_creates_clients_for_warp_schemes_only() {
        let kernel = RemoteKernel::new(Arc::new(Offline));
        assert!(kernel.create_host(&host("warp://peer:9001")).is_some());
        assert!(kernel.create_host(&host("warps://peer")).is_some());
        assert!(kernel.create_host(&host("http://peer")).is_none());
        assert!(kernel.create_host(&host("")).is_none());
    }

    #[test]
    fn test_outranks_default_kernel() {
        let stack = KernelStack::new([
            Arc::new(DefaultKernel::new()) as Arc<dyn Kernel>,
            Arc::new(RemoteKernel::new(Arc::new(Offline))),
        ]);
        let remote = stack.create_host(&host("warp://peer")).unwrap();
        assert!(unwrap_host::<RemoteHostClient>(&*remote).is_some());
        let local = stack.create_host(&host("")).unwrap();
        assert!(unwrap_host::<HostTable>(&*local).is_some());
    }
}
