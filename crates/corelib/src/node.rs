//! Node abstractions for the ring.
//!
//! A [`Node`] is any ring member this process can talk to: the local node
//! implementation, or a proxy standing in for a remote one. Callers hold
//! nodes as [`NodeRef`], a cheap shared handle whose equality and hashing
//! are defined solely by the node identifier.

use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;

use crate::entry::Entry;
use crate::error::ComResult;
use crate::id::Id;
use crate::url::Url;

/// The set of overlay RPCs every ring member supports.
///
/// Every method except [`Node::disconnect`] may fail with a
/// [`CommunicationError`](crate::error::CommunicationError). Calls block the
/// calling thread until the exchange completes.
pub trait Node: Send + Sync + fmt::Debug {
    fn id(&self) -> &Id;

    fn url(&self) -> &Url;

    /// Node responsible for `key`.
    fn find_successor(&self, key: &Id) -> ComResult<NodeRef>;

    /// Tells this node that `potential_predecessor` may be its predecessor.
    ///
    /// Returns this node's predecessor followed by its successor list.
    fn notify(&self, potential_predecessor: &NodeRef) -> ComResult<Vec<NodeRef>>;

    /// Like [`Node::notify`], additionally returning the entries the new
    /// predecessor is now responsible for.
    fn notify_and_copy_entries(&self, potential_predecessor: &NodeRef) -> ComResult<RefsAndEntries>;

    fn ping(&self) -> ComResult<()>;

    fn insert_entry(&self, entry: Entry) -> ComResult<()>;

    fn insert_replicas(&self, entries: HashSet<Entry>) -> ComResult<()>;

    fn remove_entry(&self, entry: Entry) -> ComResult<()>;

    /// Removes replicas held for `sender`. An empty set removes every replica
    /// whose identifier is below `sender`.
    fn remove_replicas(&self, sender: &Id, replicas: HashSet<Entry>) -> ComResult<()>;

    fn retrieve_entries(&self, id: &Id) -> ComResult<HashSet<Entry>>;

    /// Informs this node that its predecessor leaves; `predecessor` is the
    /// leaving node's own predecessor.
    fn leaves_network(&self, predecessor: &NodeRef) -> ComResult<()>;

    fn disconnect(&self);
}

/// Shared handle to a [`Node`].
#[derive(Clone)]
pub struct NodeRef(Arc<dyn Node>);

impl NodeRef {
    pub fn new<N: Node + 'static>(node: N) -> Self {
        NodeRef(Arc::new(node))
    }

    pub fn from_arc(node: Arc<dyn Node>) -> Self {
        NodeRef(node)
    }

    /// True if both handles share the same allocation.
    pub fn same_instance(&self, other: &NodeRef) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.0), Arc::as_ptr(&other.0))
    }
}

impl<N: Node + 'static> From<Arc<N>> for NodeRef {
    fn from(node: Arc<N>) -> Self {
        NodeRef(node)
    }
}

impl Deref for NodeRef {
    type Target = dyn Node;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl PartialEq for NodeRef {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for NodeRef {}

impl Hash for NodeRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.0.as_ref(), f)
    }
}

/// Reply to [`Node::notify_and_copy_entries`]: the responding node's
/// predecessor and successor list, plus the entries handed over.
#[derive(Clone, Debug, Default)]
pub struct RefsAndEntries {
    pub refs: Vec<NodeRef>,
    pub entries: HashSet<Entry>,
}

impl RefsAndEntries {
    pub fn new(refs: Vec<NodeRef>, entries: HashSet<Entry>) -> Self {
        Self { refs, entries }
    }
}
