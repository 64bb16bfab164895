//! TCP socket transport.
//!
//! Each listening endpoint owns a `TcpListener` on its address. A proxy holds
//! one connection to its endpoint and multiplexes concurrent calls over it:
//! every request frame carries an id, and the reply frame echoes it.
//!
//! Threads on the endpoint side:
//! - one acceptor per endpoint
//! - one reader per accepted connection
//! - one invocation thread per request, so a slow call never blocks the
//!   replies to other calls on the same connection

mod client;
mod server;

use std::sync::Arc;

use corelib::{ComResult, NodeRef, Protocol, Url};
use serde::{Deserialize, Serialize};

use crate::config::TransportConfig;
use crate::protocol::{require_protocol, NodeInfo, RefMapper, Reply, Request};
use crate::proxy::{fetch_id, Proxy, Validity};

pub use client::SocketChannel;
pub(crate) use server::SocketConnector;

#[derive(Debug, Serialize, Deserialize)]
struct RequestFrame {
    id: u64,
    request: Request<NodeInfo>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ResponseFrame {
    id: u64,
    reply: Reply<NodeInfo>,
}

#[derive(Debug)]
pub struct SocketMapper {
    config: Arc<TransportConfig>,
    creator: Url,
}

impl SocketMapper {
    fn new(config: Arc<TransportConfig>, creator: Url) -> Self {
        Self { config, creator }
    }
}

impl RefMapper for SocketMapper {
    type Ref = NodeInfo;

    fn import(&self, info: NodeInfo) -> NodeRef {
        let validity = Validity::new();
        let channel = SocketChannel::new(
            self.config.clone(),
            info.url.clone(),
            self.creator.clone(),
            validity.clone(),
        );
        NodeRef::new(Proxy::new(info.id, info.url, self.creator.clone(), validity, channel))
    }

    fn export(&self, node: &NodeRef) -> ComResult<NodeInfo> {
        require_protocol(node.url(), Protocol::Socket)?;
        Ok(NodeInfo::of(node))
    }
}

pub(crate) fn connect(config: &Arc<TransportConfig>, src: &Url, dst: &Url) -> ComResult<NodeRef> {
    require_protocol(dst, Protocol::Socket)?;
    let validity = Validity::new();
    let channel = SocketChannel::new(config.clone(), dst.clone(), src.clone(), validity.clone());
    let id = fetch_id(&channel)?;
    Ok(NodeRef::new(Proxy::new(id, dst.clone(), src.clone(), validity, channel)))
}
