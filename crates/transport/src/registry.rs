//! Process-wide registry of endpoints, keyed by address.
//!
//! The registry also owns the state the transports share between endpoints
//! of one process: the in-process proxy hub and the RPC naming servers.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use corelib::{Error, NodeRef, Protocol, Result, Url};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::TransportConfig;
use crate::endpoint::{Connector, Endpoint};
use crate::local::{Hub, LocalConnector};
use crate::proxy;
use crate::rpc::{Exports, RpcConnector};
use crate::socket::SocketConnector;

pub struct Endpoints {
    endpoints: Mutex<HashMap<Url, Arc<Endpoint>>>,
    config: Arc<TransportConfig>,
    pub(crate) hub: Hub,
    pub(crate) exports: Exports,
    me: Weak<Endpoints>,
}

impl Endpoints {
    pub fn new(config: TransportConfig) -> Arc<Self> {
        Arc::new_cyclic(|me| Endpoints {
            endpoints: Mutex::new(HashMap::new()),
            config: Arc::new(config),
            hub: Hub::default(),
            exports: Exports::default(),
            me: me.clone(),
        })
    }

    pub fn with_defaults() -> Arc<Self> {
        Self::new(TransportConfig::default())
    }

    pub fn config(&self) -> &Arc<TransportConfig> {
        &self.config
    }

    pub(crate) fn downgrade(&self) -> Weak<Endpoints> {
        self.me.clone()
    }

    /// Creates the endpoint for `node` on `url`, in state `STARTED`.
    ///
    /// The transport is chosen from the address' protocol. Fails if an
    /// endpoint already exists for the address.
    pub fn create_endpoint(&self, node: NodeRef, url: Url) -> Result<Arc<Endpoint>> {
        let mut endpoints = self.endpoints.lock();
        if endpoints.contains_key(&url) {
            return Err(Error::DuplicateEndpoint(url));
        }

        let connector: Box<dyn Connector> = match url.protocol() {
            Protocol::Local => Box::new(LocalConnector),
            Protocol::Socket => Box::new(SocketConnector::new(self.config.clone())),
            Protocol::Rpc => Box::new(RpcConnector::new(self.config.clone())),
        };
        let endpoint = Endpoint::new(node, url.clone(), connector, self.me.clone());
        endpoints.insert(url, endpoint.clone());
        Ok(endpoint)
    }

    pub fn get(&self, url: &Url) -> Option<Arc<Endpoint>> {
        self.endpoints.lock().get(url).cloned()
    }

    /// Forgets the endpoint on `url` without touching its state.
    pub fn remove(&self, url: &Url) -> Option<Arc<Endpoint>> {
        let removed = self.endpoints.lock().remove(url);
        if removed.is_some() {
            info!(url = %url, "endpoint removed from registry");
        }
        removed
    }

    /// Removes `url` only while it still maps to `endpoint`, so a late
    /// disconnect cannot evict a newer endpoint on the same address.
    pub(crate) fn remove_if_same(&self, url: &Url, endpoint: &Endpoint) -> bool {
        let mut endpoints = self.endpoints.lock();
        let same = endpoints
            .get(url)
            .is_some_and(|current| std::ptr::eq(Arc::as_ptr(current), endpoint));
        if same {
            endpoints.remove(url);
            debug!(url = %url, "endpoint address released");
        }
        same
    }

    pub fn len(&self) -> usize {
        self.endpoints.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.lock().is_empty()
    }

    pub fn urls(&self) -> Vec<Url> {
        self.endpoints.lock().keys().cloned().collect()
    }

    /// Proxy that lets the node on `src` talk to the node on `dst`.
    /// See [`proxy::create_proxy`].
    pub fn connect(&self, src: &Url, dst: &Url) -> Result<NodeRef> {
        proxy::create_proxy(self, src, dst)
    }
}
