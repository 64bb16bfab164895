//! Transports for the ring communication layer.
//!
//! A node is made reachable by wrapping it in an [`Endpoint`] created through
//! the [`Endpoints`] registry; other nodes reach it through a proxy obtained
//! from [`Endpoints::connect`]. Three transports are available, selected by
//! the address' protocol:
//!
//! | Protocol   | Transport                                   |
//! |------------|---------------------------------------------|
//! | `oclocal`  | in-process calls through the registry       |
//! | `ocsocket` | multiplexed TCP connection per proxy        |
//! | `ocrmi`    | binary RPC behind a per-port naming service |
//!
//! # Example
//!
//! ```no_run
//! use corelib::{Id, MemoryNode, NodeRef, Url};
//! use transport::Endpoints;
//!
//! let registry = Endpoints::with_defaults();
//! let a: Url = "oclocal://a/".parse()?;
//! let b: Url = "oclocal://b/".parse()?;
//!
//! let node = MemoryNode::new(Id::from_key(b"b", 20), b.clone());
//! let endpoint = registry.create_endpoint(NodeRef::from(node), b.clone())?;
//! endpoint.listen()?;
//!
//! let proxy = registry.connect(&a, &b)?;
//! proxy.ping()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod codec;
pub mod config;
pub mod endpoint;
pub mod local;
pub mod protocol;
pub mod proxy;
pub mod registry;
pub mod rpc;
pub mod socket;

pub use config::TransportConfig;
pub use endpoint::{Endpoint, EndpointStateListener, State};
pub use protocol::{Method, NodeInfo, ENTRY_METHODS};
pub use proxy::{create_proxy, LocalProxy, Proxy, RpcProxy, SocketProxy, Validity};
pub use registry::Endpoints;
