//! Transport-neutral request/response model.
//!
//! Every transport carries the same [`Request`] and [`Response`] values; they
//! only differ in how a node reference (`R`) is represented on the wire and
//! how it is turned back into a [`NodeRef`] on the receiving side. That
//! translation is the job of a [`RefMapper`].

use std::collections::HashSet;
use std::fmt;

use corelib::{ComResult, CommunicationError, Entry, Id, NodeRef, Protocol, Url};
use serde::{Deserialize, Serialize};

/// Operations that need the endpoint to be in `ACCEPT_ENTRIES`.
///
/// Kept sorted; membership is tested with a binary search.
pub const ENTRY_METHODS: [&str; 5] = [
    "insertEntry",
    "insertReplicas",
    "removeEntry",
    "removeReplicas",
    "retrieveEntries",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    NodeId,
    FindSuccessor,
    Notify,
    NotifyAndCopyEntries,
    Ping,
    InsertEntry,
    InsertReplicas,
    RemoveEntry,
    RemoveReplicas,
    RetrieveEntries,
    LeavesNetwork,
}

impl Method {
    pub fn name(self) -> &'static str {
        match self {
            Method::NodeId => "nodeId",
            Method::FindSuccessor => "findSuccessor",
            Method::Notify => "notify",
            Method::NotifyAndCopyEntries => "notifyAndCopyEntries",
            Method::Ping => "ping",
            Method::InsertEntry => "insertEntry",
            Method::InsertReplicas => "insertReplicas",
            Method::RemoveEntry => "removeEntry",
            Method::RemoveReplicas => "removeReplicas",
            Method::RetrieveEntries => "retrieveEntries",
            Method::LeavesNetwork => "leavesNetwork",
        }
    }

    /// Entry-storage operations are gated behind `ACCEPT_ENTRIES`.
    pub fn requires_accept_entries(self) -> bool {
        ENTRY_METHODS.binary_search(&self.name()).is_ok()
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Plain node reference: identifier plus address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: Id,
    pub url: Url,
}

impl NodeInfo {
    pub fn of(node: &NodeRef) -> Self {
        Self {
            id: node.id().clone(),
            url: node.url().clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Request<R> {
    NodeId,
    FindSuccessor(Id),
    Notify(R),
    NotifyAndCopyEntries(R),
    Ping,
    InsertEntry(Entry),
    InsertReplicas(HashSet<Entry>),
    RemoveEntry(Entry),
    RemoveReplicas { sender: Id, replicas: HashSet<Entry> },
    RetrieveEntries(Id),
    LeavesNetwork(R),
}

impl<R> Request<R> {
    pub fn method(&self) -> Method {
        match self {
            Request::NodeId => Method::NodeId,
            Request::FindSuccessor(_) => Method::FindSuccessor,
            Request::Notify(_) => Method::Notify,
            Request::NotifyAndCopyEntries(_) => Method::NotifyAndCopyEntries,
            Request::Ping => Method::Ping,
            Request::InsertEntry(_) => Method::InsertEntry,
            Request::InsertReplicas(_) => Method::InsertReplicas,
            Request::RemoveEntry(_) => Method::RemoveEntry,
            Request::RemoveReplicas { .. } => Method::RemoveReplicas,
            Request::RetrieveEntries(_) => Method::RetrieveEntries,
            Request::LeavesNetwork(_) => Method::LeavesNetwork,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Response<R> {
    Id(Id),
    Node(R),
    Nodes(Vec<R>),
    RefsAndEntries { refs: Vec<R>, entries: HashSet<Entry> },
    Entries(HashSet<Entry>),
    Done,
}

impl<R> Response<R> {
    /// Error for a response that does not match the request's method.
    pub fn mismatch(&self, method: Method) -> CommunicationError {
        let kind = match self {
            Response::Id(_) => "id",
            Response::Node(_) => "node",
            Response::Nodes(_) => "nodes",
            Response::RefsAndEntries { .. } => "refs and entries",
            Response::Entries(_) => "entries",
            Response::Done => "done",
        };
        CommunicationError::new(format!("unexpected {kind} response to {method}"))
    }
}

/// What crosses the wire in reply to a request. The error side carries the
/// remote failure rendered as text.
pub type Reply<R> = Result<Response<R>, String>;

/// Translates node references between their wire form and [`NodeRef`].
///
/// `import` always yields a fresh proxy scoped to the mapper's own address,
/// never the object the peer used internally.
pub trait RefMapper {
    type Ref;

    fn import(&self, reference: Self::Ref) -> NodeRef;

    fn export(&self, node: &NodeRef) -> ComResult<Self::Ref>;
}

/// Fails unless `url` belongs to `protocol`'s transport.
pub(crate) fn require_protocol(url: &Url, protocol: Protocol) -> ComResult<()> {
    if url.protocol() != protocol {
        return Err(CommunicationError::new(format!(
            "node {url} uses unsuitable communication protocol (expected {protocol})"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_methods_sorted() {
        let mut sorted = ENTRY_METHODS;
        sorted.sort_unstable();
        assert_eq!(sorted, ENTRY_METHODS);
    }

    #[test]
    fn test_entry_gating() {
        for method in [
            Method::InsertEntry,
            Method::InsertReplicas,
            Method::RemoveEntry,
            Method::RemoveReplicas,
            Method::RetrieveEntries,
        ] {
            assert!(method.requires_accept_entries(), "{method}");
        }
        for method in [
            Method::NodeId,
            Method::FindSuccessor,
            Method::Notify,
            Method::NotifyAndCopyEntries,
            Method::Ping,
            Method::LeavesNetwork,
        ] {
            assert!(!method.requires_accept_entries(), "{method}");
        }
    }
}
