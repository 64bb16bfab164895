//! The same ring exchange run over every transport.
//!
//! # Test Strategy
//!
//! 1. **Equivalence**: routing, maintenance and entry calls behave the same
//!    on `oclocal`, `ocsocket` and `ocrmi`
//! 2. **Re-wrapping**: returned references are fresh proxies, never the
//!    callee's own objects
//! 3. **Teardown**: calls fail once the callee disconnects
//! 4. **Transport specifics**: socket multiplexing, shared naming service,
//!    replies over the frame limit

use std::collections::HashSet;
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use corelib::{Entry, Id, MemoryNode, Node, NodeRef, Protocol, Url};
use transport::{Endpoint, Endpoints, State, TransportConfig};

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
}

fn address(protocol: Protocol, port: u16, name: &str) -> Url {
    match protocol {
        Protocol::Local => format!("oclocal://{name}/"),
        other => format!("{}://127.0.0.1:{port}/{name}/", other.name()),
    }
    .parse()
    .unwrap()
}

fn registry() -> Arc<Endpoints> {
    Endpoints::new(TransportConfig {
        connect_timeout_ms: 2_000,
        call_timeout_ms: 5_000,
        ..TransportConfig::default()
    })
}

struct Peer {
    node: Arc<MemoryNode>,
    endpoint: Arc<Endpoint>,
}

impl Peer {
    fn start(registry: &Endpoints, url: Url, id: u8) -> Self {
        let node = MemoryNode::new(Id::new(vec![id, 0]), url.clone());
        let endpoint = registry.create_endpoint(NodeRef::from(node.clone()), url).unwrap();
        endpoint.listen().unwrap();
        endpoint.accept_entries().unwrap();
        Peer { node, endpoint }
    }

    fn url(&self) -> &Url {
        self.endpoint.url()
    }

    fn node_ref(&self) -> NodeRef {
        NodeRef::from(self.node.clone())
    }
}

fn entry(id: u8, value: &'static str) -> Entry {
    Entry::new(Id::new(vec![id, 0]), value.as_bytes())
}

/// Two peers `a` (0x1000) and `b` (0x8000); `a` talks to `b` through a proxy.
fn ring_exchange(protocol: Protocol, port_a: u16, port_b: u16) {
    let registry = registry();
    let a = Peer::start(&registry, address(protocol, port_a, "a"), 0x10);
    let b = Peer::start(&registry, address(protocol, port_b, "b"), 0x80);

    let to_b = registry.connect(a.url(), b.url()).unwrap();
    assert_eq!(to_b.id(), b.node.id());
    to_b.ping().unwrap();

    // b has no successors yet and answers with itself, wrapped.
    let found = to_b.find_successor(&Id::new(vec![0x40, 0])).unwrap();
    assert_eq!(found.url(), b.url());
    assert_eq!(found.id(), b.node.id());
    assert!(!found.same_instance(&b.node_ref()));
    found.ping().unwrap();

    // notify: b adopts a proxy to a as predecessor and returns it.
    let refs = to_b.notify(&a.node_ref()).unwrap();
    assert_eq!(refs.len(), 1);
    assert_eq!(refs[0].url(), a.url());
    assert!(!refs[0].same_instance(&a.node_ref()));
    refs[0].ping().unwrap();

    let predecessor = b.node.predecessor().unwrap();
    assert_eq!(predecessor.url(), a.url());
    predecessor.ping().unwrap();

    // Entry storage.
    let stored = entry(0x40, "forty");
    to_b.insert_entry(stored.clone()).unwrap();
    assert_eq!(to_b.retrieve_entries(stored.id()).unwrap(), HashSet::from([stored.clone()]));
    assert_eq!(b.node.entry_count(), 1);

    // Entries outside (a, b] are handed to the notifying node.
    let foreign = entry(0x05, "five");
    to_b.insert_entry(foreign.clone()).unwrap();
    let copied = to_b.notify_and_copy_entries(&a.node_ref()).unwrap();
    assert_eq!(copied.entries, HashSet::from([foreign.clone()]));
    assert_eq!(copied.refs[0].url(), a.url());

    to_b.remove_entry(foreign.clone()).unwrap();
    assert!(to_b.retrieve_entries(foreign.id()).unwrap().is_empty());

    // Replicas; an empty removal set clears everything below the sender.
    to_b.insert_replicas(HashSet::from([entry(0x20, "r1"), entry(0x90, "r2")])).unwrap();
    assert_eq!(b.node.replica_count(), 2);
    to_b.remove_replicas(&Id::new(vec![0x30, 0]), HashSet::new()).unwrap();
    assert_eq!(b.node.replica_count(), 1);
    to_b.remove_replicas(a.node.id(), HashSet::from([entry(0x90, "r2")])).unwrap();
    assert_eq!(b.node.replica_count(), 0);

    to_b.leaves_network(&a.node_ref()).unwrap();
    assert_eq!(b.node.predecessor().unwrap().id(), a.node.id());

    b.endpoint.disconnect();
    assert_eq!(b.endpoint.state(), State::Started);
    assert!(to_b.ping().is_err());

    a.endpoint.disconnect();
    assert!(registry.is_empty());
}

// ============================================================================
// Equivalence
// ============================================================================

#[test]
fn test_ring_exchange_local() {
    ring_exchange(Protocol::Local, 0, 0);
}

#[test]
fn test_ring_exchange_socket() {
    ring_exchange(Protocol::Socket, free_port(), free_port());
}

#[test]
fn test_ring_exchange_rpc() {
    ring_exchange(Protocol::Rpc, free_port(), free_port());
}

#[test]
fn test_ring_exchange_rpc_shared_port() {
    let port = free_port();
    ring_exchange(Protocol::Rpc, port, port);
}

#[test]
fn test_foreign_protocol_reference_rejected() {
    for protocol in Protocol::ALL {
        let registry = registry();
        let b = Peer::start(&registry, address(protocol, free_port(), "b"), 0x80);
        let src = address(protocol, free_port(), "a");
        let to_b = registry.connect(&src, b.url()).unwrap();

        let other = Protocol::ALL.into_iter().find(|p| *p != protocol).unwrap();
        let stranger = MemoryNode::new(Id::new(vec![0x10, 0]), address(other, free_port(), "x"));
        let err = to_b.notify(&NodeRef::from(stranger)).unwrap_err();
        assert!(err.message().contains("unsuitable communication protocol"), "{protocol}: {err}");

        b.endpoint.disconnect();
    }
}

// ============================================================================
// Transport specifics
// ============================================================================

#[test]
fn test_socket_calls_are_multiplexed() {
    let registry = registry();
    let b = Peer::start(&registry, address(Protocol::Socket, free_port(), "b"), 0x80);
    let to_b = registry
        .connect(&address(Protocol::Socket, free_port(), "a"), b.url())
        .unwrap();

    let handles: Vec<_> = (0..16u8)
        .map(|i| {
            let to_b = to_b.clone();
            thread::spawn(move || {
                let e = entry(i, "v");
                to_b.insert_entry(e.clone()).unwrap();
                to_b.retrieve_entries(e.id()).unwrap().contains(&e)
            })
        })
        .collect();
    assert!(handles.into_iter().all(|h| h.join().unwrap()));
    assert_eq!(b.node.entry_count(), 16);

    b.endpoint.disconnect();
}

#[test]
fn test_socket_address_in_use_fails_listen() {
    let port = free_port();
    let _held = TcpListener::bind(("127.0.0.1", port)).unwrap();

    let registry = registry();
    let url = address(Protocol::Socket, port, "b");
    let node = MemoryNode::new(Id::new(vec![0x80, 0]), url.clone());
    let endpoint = registry.create_endpoint(NodeRef::from(node), url).unwrap();

    let err = endpoint.listen().unwrap_err();
    assert!(err.is_communication());
    assert_eq!(endpoint.state(), State::Started);
}

#[test]
fn test_rpc_naming_service_outlives_first_endpoint() {
    let port = free_port();
    let registry = registry();
    let a = Peer::start(&registry, address(Protocol::Rpc, port, "a"), 0x10);
    let b = Peer::start(&registry, address(Protocol::Rpc, port, "b"), 0x80);
    let src = address(Protocol::Rpc, free_port(), "c");

    a.endpoint.disconnect();
    registry.connect(&src, b.url()).unwrap().ping().unwrap();
    assert!(registry.connect(&src, a.url()).is_err());

    b.endpoint.disconnect();
    assert!(registry.connect(&src, b.url()).is_err());
}

#[test]
fn test_rpc_bindings_keep_path_case() {
    let port = free_port();
    let registry = registry();
    let upper = Peer::start(&registry, address(Protocol::Rpc, port, "Ring"), 0x10);
    let lower = Peer::start(&registry, address(Protocol::Rpc, port, "ring"), 0x80);
    assert_ne!(upper.url(), lower.url());

    let src = address(Protocol::Rpc, free_port(), "c");
    assert_eq!(registry.connect(&src, upper.url()).unwrap().id(), upper.node.id());
    assert_eq!(registry.connect(&src, lower.url()).unwrap().id(), lower.node.id());

    upper.endpoint.disconnect();
    assert_eq!(registry.connect(&src, lower.url()).unwrap().id(), lower.node.id());
    lower.endpoint.disconnect();
}

#[test]
fn test_oversized_reply_fails_fast_with_cause() {
    for protocol in [Protocol::Socket, Protocol::Rpc] {
        let registry = Endpoints::new(TransportConfig {
            connect_timeout_ms: 2_000,
            call_timeout_ms: 10_000,
            max_frame_len: 4_096,
        });
        let b = Peer::start(&registry, address(protocol, free_port(), "b"), 0x80);
        let to_b = registry
            .connect(&address(protocol, free_port(), "a"), b.url())
            .unwrap();

        let key = Id::new(vec![0x40, 0]);
        for i in 0..8u8 {
            to_b.insert_entry(Entry::new(key.clone(), vec![i; 1_000])).unwrap();
        }

        let started = Instant::now();
        let err = to_b.retrieve_entries(&key).unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(5), "{protocol}: {err}");
        assert!(err.message().contains("exceeds limit"), "{protocol}: {err}");

        // The connection is still usable after the failed reply.
        to_b.ping().unwrap();
        b.endpoint.disconnect();
    }
}
