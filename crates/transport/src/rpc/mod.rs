//! Binary RPC transport with a naming service.
//!
//! Endpoints on the same `host:port` share one naming server: the first
//! endpoint to listen starts it, later ones only add a binding, and the
//! server stops when its last binding is removed. A binding name is derived
//! from the endpoint's address (see [`StubHandle::for_url`]) and tells apart
//! exactly the addresses that compare unequal.
//!
//! A client resolves a binding once with a lookup call and then invokes
//! methods on it. Every call uses its own short-lived connection.
//!
//! Node references travel as [`RemoteNodeInfo`]: the stub handle together
//! with the node's identifier and address, so the receiving side can build a
//! proxy without another lookup.

mod client;
mod server;

use std::sync::Arc;

use corelib::{ComResult, CommunicationError, Id, NodeRef, Protocol, Url};
use serde::{Deserialize, Serialize};

use crate::config::TransportConfig;
use crate::endpoint::Endpoint;
use crate::protocol::{require_protocol, RefMapper, Reply, Request};
use crate::proxy::{fetch_id, Proxy, Validity};

pub use client::RpcChannel;
pub(crate) use server::{Exports, RpcConnector};

/// Prefix of every binding name.
pub const BINDING_PREFIX: &str = "chord_endpoint/";

/// Where and under which name an endpoint is bound.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StubHandle {
    pub host: String,
    pub port: u16,
    pub name: String,
}

impl StubHandle {
    /// Host is lower-cased, the path keeps its case.
    pub fn for_url(url: &Url) -> ComResult<Self> {
        require_protocol(url, Protocol::Rpc)?;
        let port = url
            .port()
            .ok_or_else(|| CommunicationError::new(format!("{url} has no port")))?;
        let host = url.host().to_ascii_lowercase();
        let name = format!(
            "{BINDING_PREFIX}{}://{host}:{port}/{}",
            url.protocol(),
            url.path()
        );
        Ok(Self { host, port, name })
    }

    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Node reference as carried by this transport.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteNodeInfo {
    pub stub: StubHandle,
    pub id: Id,
    pub url: Url,
}

#[derive(Debug, Serialize, Deserialize)]
enum RpcCall {
    Lookup(String),
    Invoke {
        target: String,
        request: Request<RemoteNodeInfo>,
    },
}

#[derive(Debug, Serialize, Deserialize)]
enum RpcReply {
    Bound,
    NotBound,
    Reply(Reply<RemoteNodeInfo>),
}

#[derive(Debug)]
pub struct RpcMapper {
    config: Arc<TransportConfig>,
    creator: Url,
    /// Set on the endpoint side: the wrapped node and its own stub.
    local: Option<(Id, StubHandle)>,
}

impl RpcMapper {
    fn for_proxy(config: Arc<TransportConfig>, creator: Url) -> Self {
        Self {
            config,
            creator,
            local: None,
        }
    }

    fn for_endpoint(config: Arc<TransportConfig>, endpoint: &Endpoint) -> ComResult<Self> {
        let stub = StubHandle::for_url(endpoint.url())?;
        Ok(Self {
            config,
            creator: endpoint.url().clone(),
            local: Some((endpoint.node().id().clone(), stub)),
        })
    }
}

impl RefMapper for RpcMapper {
    type Ref = RemoteNodeInfo;

    fn import(&self, info: RemoteNodeInfo) -> NodeRef {
        let validity = Validity::new();
        let channel = RpcChannel::new(self.config.clone(), info.stub, self.creator.clone());
        NodeRef::new(Proxy::new(info.id, info.url, self.creator.clone(), validity, channel))
    }

    fn export(&self, node: &NodeRef) -> ComResult<RemoteNodeInfo> {
        if let Some((id, stub)) = &self.local {
            if node.id() == id {
                return Ok(RemoteNodeInfo {
                    stub: stub.clone(),
                    id: id.clone(),
                    url: self.creator.clone(),
                });
            }
        }
        Ok(RemoteNodeInfo {
            stub: StubHandle::for_url(node.url())?,
            id: node.id().clone(),
            url: node.url().clone(),
        })
    }
}

pub(crate) fn connect(config: &Arc<TransportConfig>, src: &Url, dst: &Url) -> ComResult<NodeRef> {
    let stub = StubHandle::for_url(dst)?;
    let channel = RpcChannel::new(config.clone(), stub, src.clone());
    let id = fetch_id(&channel)?;
    Ok(NodeRef::new(Proxy::new(id, dst.clone(), src.clone(), Validity::new(), channel)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stub_handle_for_url() {
        let url: Url = "OCRMI://Host:5000/Ring/".parse().unwrap();
        let stub = StubHandle::for_url(&url).unwrap();
        assert_eq!(stub.host, "host");
        assert_eq!(stub.port, 5000);
        assert_eq!(stub.name, "chord_endpoint/ocrmi://host:5000/Ring/");
        assert_eq!(stub.authority(), "host:5000");
    }

    #[test]
    fn test_binding_names_follow_url_equality() {
        let name = |s: &str| StubHandle::for_url(&s.parse().unwrap()).unwrap().name;
        assert_eq!(name("ocrmi://HOST:5000/a/"), name("ocrmi://host:5000/a/"));
        assert_ne!(name("ocrmi://host:5000/A/"), name("ocrmi://host:5000/a/"));
    }

    #[test]
    fn test_stub_handle_rejects_other_protocols() {
        let url: Url = "ocsocket://host:5000/".parse().unwrap();
        let err = StubHandle::for_url(&url).unwrap_err();
        assert!(err.message().contains("unsuitable communication protocol"));
    }
}
