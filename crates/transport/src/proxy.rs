//! Client side of a transport: a [`Node`] standing in for a node behind some
//! endpoint.
//!
//! A proxy is scoped to a pair of addresses. `creator` is the address of the
//! node that uses the proxy, `url` the address of the node it reaches.
//! Every node reference that comes back from a call is turned into a fresh
//! proxy scoped to the same creator before it is handed out, so a caller
//! never ends up holding a reference that belongs to the remote side.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use corelib::{
    ComResult, CommunicationError, Entry, Error, Id, Node, NodeRef, Protocol, RefsAndEntries,
    Result, Url,
};
use tracing::debug;

use crate::protocol::{Method, RefMapper, Request, Response};
use crate::registry::Endpoints;
use crate::{local, rpc, socket};

/// Shared validity flag of a proxy. Cleared once and never set again.
#[derive(Clone, Debug)]
pub struct Validity(Arc<AtomicBool>);

impl Validity {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_valid(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn invalidate(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub(crate) fn downgrade(&self) -> Weak<AtomicBool> {
        Arc::downgrade(&self.0)
    }
}

impl Default for Validity {
    fn default() -> Self {
        Self::new()
    }
}

/// Carries requests of one proxy to its endpoint.
pub trait Channel: Send + Sync + fmt::Debug {
    type Mapper: RefMapper;

    /// Mapper scoped to the proxy's creator.
    fn mapper(&self) -> &Self::Mapper;

    fn invoke(
        &self,
        request: Request<<Self::Mapper as RefMapper>::Ref>,
    ) -> ComResult<Response<<Self::Mapper as RefMapper>::Ref>>;

    /// Releases whatever the channel holds open.
    fn close(&self) {}
}

pub struct Proxy<C: Channel> {
    id: Id,
    url: Url,
    creator: Url,
    validity: Validity,
    channel: C,
}

pub type LocalProxy = Proxy<local::LocalChannel>;
pub type SocketProxy = Proxy<socket::SocketChannel>;
pub type RpcProxy = Proxy<rpc::RpcChannel>;

impl<C: Channel> Proxy<C> {
    pub(crate) fn new(id: Id, url: Url, creator: Url, validity: Validity, channel: C) -> Self {
        Self {
            id,
            url,
            creator,
            validity,
            channel,
        }
    }

    /// Address of the node this proxy was created for.
    pub fn creator(&self) -> &Url {
        &self.creator
    }

    pub fn is_valid(&self) -> bool {
        self.validity.is_valid()
    }

    fn call(
        &self,
        request: Request<<C::Mapper as RefMapper>::Ref>,
    ) -> ComResult<Response<<C::Mapper as RefMapper>::Ref>> {
        if !self.validity.is_valid() {
            return Err(CommunicationError::new(format!(
                "proxy from {} to {} is no longer valid",
                self.creator, self.url
            )));
        }
        self.channel.invoke(request)
    }

    fn export(&self, node: &NodeRef) -> ComResult<<C::Mapper as RefMapper>::Ref> {
        self.channel.mapper().export(node)
    }

    fn import_all(&self, refs: Vec<<C::Mapper as RefMapper>::Ref>) -> Vec<NodeRef> {
        let mapper = self.channel.mapper();
        refs.into_iter().map(|r| mapper.import(r)).collect()
    }

    fn expect_done(&self, request: Request<<C::Mapper as RefMapper>::Ref>) -> ComResult<()> {
        let method = request.method();
        match self.call(request)? {
            Response::Done => Ok(()),
            other => Err(other.mismatch(method)),
        }
    }
}

impl<C: Channel> Node for Proxy<C> {
    fn id(&self) -> &Id {
        &self.id
    }

    fn url(&self) -> &Url {
        &self.url
    }

    fn find_successor(&self, key: &Id) -> ComResult<NodeRef> {
        match self.call(Request::FindSuccessor(key.clone()))? {
            Response::Node(r) => Ok(self.channel.mapper().import(r)),
            other => Err(other.mismatch(Method::FindSuccessor)),
        }
    }

    fn notify(&self, potential_predecessor: &NodeRef) -> ComResult<Vec<NodeRef>> {
        let candidate = self.export(potential_predecessor)?;
        match self.call(Request::Notify(candidate))? {
            Response::Nodes(refs) => Ok(self.import_all(refs)),
            other => Err(other.mismatch(Method::Notify)),
        }
    }

    fn notify_and_copy_entries(
        &self,
        potential_predecessor: &NodeRef,
    ) -> ComResult<RefsAndEntries> {
        let candidate = self.export(potential_predecessor)?;
        match self.call(Request::NotifyAndCopyEntries(candidate))? {
            Response::RefsAndEntries { refs, entries } => {
                Ok(RefsAndEntries::new(self.import_all(refs), entries))
            }
            other => Err(other.mismatch(Method::NotifyAndCopyEntries)),
        }
    }

    fn ping(&self) -> ComResult<()> {
        self.expect_done(Request::Ping)
    }

    fn insert_entry(&self, entry: Entry) -> ComResult<()> {
        self.expect_done(Request::InsertEntry(entry))
    }

    fn insert_replicas(&self, entries: HashSet<Entry>) -> ComResult<()> {
        self.expect_done(Request::InsertReplicas(entries))
    }

    fn remove_entry(&self, entry: Entry) -> ComResult<()> {
        self.expect_done(Request::RemoveEntry(entry))
    }

    fn remove_replicas(&self, sender: &Id, replicas: HashSet<Entry>) -> ComResult<()> {
        self.expect_done(Request::RemoveReplicas {
            sender: sender.clone(),
            replicas,
        })
    }

    fn retrieve_entries(&self, id: &Id) -> ComResult<HashSet<Entry>> {
        match self.call(Request::RetrieveEntries(id.clone()))? {
            Response::Entries(entries) => Ok(entries),
            other => Err(other.mismatch(Method::RetrieveEntries)),
        }
    }

    fn leaves_network(&self, predecessor: &NodeRef) -> ComResult<()> {
        let predecessor = self.export(predecessor)?;
        self.expect_done(Request::LeavesNetwork(predecessor))
    }

    fn disconnect(&self) {
        if self.validity.is_valid() {
            debug!(creator = %self.creator, url = %self.url, "proxy disconnected");
        }
        self.validity.invalidate();
        self.channel.close();
    }
}

impl<C: Channel> fmt::Debug for Proxy<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("url", &self.url)
            .field("id", &self.id)
            .field("creator", &self.creator)
            .field("valid", &self.is_valid())
            .finish()
    }
}

/// Asks the channel for the identifier of the node behind it.
pub(crate) fn fetch_id<C: Channel>(channel: &C) -> ComResult<Id> {
    match channel.invoke(Request::NodeId)? {
        Response::Id(id) => Ok(id),
        other => Err(other.mismatch(Method::NodeId)),
    }
}

/// Creates the proxy through which the node on `src` reaches the node on
/// `dst`. The transport is picked from `dst`'s protocol.
///
/// Fails with [`Error::SelfProxy`] if both addresses are equal, and with a
/// communication error if `dst` cannot be reached.
pub fn create_proxy(endpoints: &Endpoints, src: &Url, dst: &Url) -> Result<NodeRef> {
    if src == dst {
        return Err(Error::SelfProxy(src.clone()));
    }
    let node = match dst.protocol() {
        Protocol::Local => local::connect(endpoints, src, dst)?,
        Protocol::Socket => socket::connect(endpoints.config(), src, dst)?,
        Protocol::Rpc => rpc::connect(endpoints.config(), src, dst)?,
    };
    debug!(src = %src, dst = %dst, id = %node.id(), "proxy created");
    Ok(node)
}
