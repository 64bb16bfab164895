//! In-process transport.
//!
//! Calls are plain method calls on the target endpoint, looked up in the
//! registry. Arguments and results are still passed as [`NodeInfo`] and
//! re-imported on each side, so both sides only ever see proxies scoped to
//! their own address, exactly as with the network transports.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use corelib::{ComResult, CommunicationError, NodeRef, Protocol, Url};
use parking_lot::Mutex;
use tracing::debug;

use crate::endpoint::{Connector, Endpoint};
use crate::protocol::{require_protocol, NodeInfo, RefMapper, Request, Response};
use crate::proxy::{fetch_id, Channel, Proxy, Validity};
use crate::registry::Endpoints;

/// Proxies that have been used, grouped by their creator's address.
///
/// When an endpoint disconnects, every proxy its node used becomes invalid.
#[derive(Default)]
pub(crate) struct Hub {
    used: Mutex<HashMap<Url, Vec<Weak<AtomicBool>>>>,
}

impl Hub {
    fn record_use(&self, creator: &Url, validity: &Validity) {
        let mut used = self.used.lock();
        let proxies = used.entry(creator.clone()).or_default();
        proxies.retain(|v| v.strong_count() > 0);
        proxies.push(validity.downgrade());
    }

    fn invalidate_created_by(&self, creator: &Url) -> usize {
        let proxies = self.used.lock().remove(creator).unwrap_or_default();
        let mut count = 0;
        for flag in proxies.iter().filter_map(Weak::upgrade) {
            flag.store(false, Ordering::SeqCst);
            count += 1;
        }
        count
    }
}

#[derive(Debug)]
pub(crate) struct LocalConnector;

impl Connector for LocalConnector {
    fn open_connections(&self, endpoint: &Arc<Endpoint>) -> ComResult<()> {
        debug!(url = %endpoint.url(), "reachable in-process");
        Ok(())
    }

    fn close_connections(&self, endpoint: &Endpoint) -> ComResult<()> {
        if let Some(registry) = endpoint.registry() {
            let count = registry.hub.invalidate_created_by(endpoint.url());
            debug!(url = %endpoint.url(), proxies = count, "invalidated proxies");
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct LocalMapper {
    registry: Weak<Endpoints>,
    creator: Url,
}

impl RefMapper for LocalMapper {
    type Ref = NodeInfo;

    fn import(&self, info: NodeInfo) -> NodeRef {
        let validity = Validity::new();
        let channel = LocalChannel::new(
            self.registry.clone(),
            info.url.clone(),
            self.creator.clone(),
            validity.clone(),
        );
        NodeRef::new(Proxy::new(info.id, info.url, self.creator.clone(), validity, channel))
    }

    fn export(&self, node: &NodeRef) -> ComResult<NodeInfo> {
        require_protocol(node.url(), Protocol::Local)?;
        Ok(NodeInfo::of(node))
    }
}

#[derive(Debug)]
pub struct LocalChannel {
    mapper: LocalMapper,
    target: Url,
    validity: Validity,
    binding: Mutex<Weak<Endpoint>>,
    recorded: AtomicBool,
}

impl LocalChannel {
    fn new(registry: Weak<Endpoints>, target: Url, creator: Url, validity: Validity) -> Self {
        Self {
            mapper: LocalMapper { registry, creator },
            target,
            validity,
            binding: Mutex::new(Weak::new()),
            recorded: AtomicBool::new(false),
        }
    }

    fn registry(&self) -> ComResult<Arc<Endpoints>> {
        self.mapper
            .registry
            .upgrade()
            .ok_or_else(|| CommunicationError::new("endpoint registry is gone"))
    }

    /// Target endpoint, resolved on first use.
    fn endpoint(&self, registry: &Endpoints) -> ComResult<Arc<Endpoint>> {
        let mut binding = self.binding.lock();
        if let Some(endpoint) = binding.upgrade() {
            return Ok(endpoint);
        }
        let endpoint = registry
            .get(&self.target)
            .ok_or_else(|| CommunicationError::new(format!("no endpoint for {}", self.target)))?;
        *binding = Arc::downgrade(&endpoint);
        Ok(endpoint)
    }
}

impl Channel for LocalChannel {
    type Mapper = LocalMapper;

    fn mapper(&self) -> &LocalMapper {
        &self.mapper
    }

    fn invoke(&self, request: Request<NodeInfo>) -> ComResult<Response<NodeInfo>> {
        let registry = self.registry()?;
        if !self.recorded.swap(true, Ordering::SeqCst) {
            registry.hub.record_use(&self.mapper.creator, &self.validity);
        }
        let endpoint = self.endpoint(&registry)?;
        let server_side = LocalMapper {
            registry: registry.downgrade(),
            creator: endpoint.url().clone(),
        };
        endpoint.dispatch(request, &server_side)
    }

    fn close(&self) {
        *self.binding.lock() = Weak::new();
    }
}

pub(crate) fn connect(endpoints: &Endpoints, src: &Url, dst: &Url) -> ComResult<NodeRef> {
    let validity = Validity::new();
    let channel = LocalChannel::new(
        endpoints.downgrade(),
        dst.clone(),
        src.clone(),
        validity.clone(),
    );
    let id = fetch_id(&channel)?;
    Ok(NodeRef::new(Proxy::new(id, dst.clone(), src.clone(), validity, channel)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hub_invalidates_only_creator_proxies() {
        let hub = Hub::default();
        let a: Url = "oclocal://a/".parse().unwrap();
        let b: Url = "oclocal://b/".parse().unwrap();
        let from_a = Validity::new();
        let from_b = Validity::new();
        hub.record_use(&a, &from_a);
        hub.record_use(&b, &from_b);

        assert_eq!(hub.invalidate_created_by(&a), 1);
        assert!(!from_a.is_valid());
        assert!(from_b.is_valid());
        assert_eq!(hub.invalidate_created_by(&a), 0);
    }

    #[test]
    fn test_hub_forgets_dropped_proxies() {
        let hub = Hub::default();
        let a: Url = "oclocal://a/".parse().unwrap();
        hub.record_use(&a, &Validity::new());
        assert_eq!(hub.invalidate_created_by(&a), 0);
    }
}
