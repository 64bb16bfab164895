//! Server side of a transport: the lifecycle state machine around a local
//! node.
//!
//! # States
//!
//! ```text
//!   STARTED --listen()--> LISTENING --accept_entries()--> ACCEPT_ENTRIES
//!      ^                      |                                |
//!      +------------------disconnect()-------------------------+
//!
//!   DISCONNECTED, CRASHED: absorbing, reachable from any state
//! ```
//!
//! Routing and maintenance calls are served from `LISTENING` on; the
//! entry-storage calls listed in [`ENTRY_METHODS`](crate::protocol::ENTRY_METHODS)
//! only from `ACCEPT_ENTRIES`. Anything arriving in another state is
//! rejected with a communication error.
//!
//! The transport-specific parts (binding a socket, registering with a naming
//! service, ...) live behind [`Connector`]; the state machine and the
//! admission rules are the same for every transport.
//!
//! # Listeners
//!
//! Every transition is broadcast to the registered
//! [`EndpointStateListener`]s synchronously, under the same lock that guards
//! registration. Callbacks must not call back into the endpoint.

use std::fmt;
use std::sync::{Arc, Weak};

use corelib::{ComResult, CommunicationError, Error, NodeRef, Result, Url};
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::protocol::{Method, RefMapper, Request, Response};
use crate::registry::Endpoints;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum State {
    Started,
    Listening,
    AcceptEntries,
    Disconnected,
    Crashed,
}

impl State {
    /// Position in the lifecycle order. Running states are ordered
    /// `STARTED < LISTENING < ACCEPT_ENTRIES`; the terminal states sort last.
    pub fn order(self) -> i32 {
        match self {
            State::Started => -1,
            State::Listening => 1,
            State::AcceptEntries => 2,
            State::Disconnected => 3,
            State::Crashed => i32::MAX,
        }
    }

    pub fn is_running(self) -> bool {
        matches!(self, State::Listening | State::AcceptEntries)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, State::Disconnected | State::Crashed)
    }

    pub fn name(self) -> &'static str {
        match self {
            State::Started => "STARTED",
            State::Listening => "LISTENING",
            State::AcceptEntries => "ACCEPT_ENTRIES",
            State::Disconnected => "DISCONNECTED",
            State::Crashed => "CRASHED",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Observer of endpoint state transitions.
pub trait EndpointStateListener: Send + Sync {
    fn on_state_changed(&self, url: &Url, state: State);
}

impl<F> EndpointStateListener for F
where
    F: Fn(&Url, State) + Send + Sync,
{
    fn on_state_changed(&self, url: &Url, state: State) {
        self(url, state)
    }
}

/// Transport-specific half of an endpoint.
pub(crate) trait Connector: Send + Sync + fmt::Debug {
    /// Start accepting calls. Runs before the endpoint reports `LISTENING`.
    fn open_connections(&self, endpoint: &Arc<Endpoint>) -> ComResult<()>;

    /// Hook run once entry operations are admitted.
    fn entries_acceptable(&self, _endpoint: &Endpoint) {}

    /// Release everything `open_connections` acquired. Must tolerate being
    /// called when nothing was opened.
    fn close_connections(&self, endpoint: &Endpoint) -> ComResult<()>;
}

struct Lifecycle {
    state: State,
    listeners: Vec<Arc<dyn EndpointStateListener>>,
    retired: bool,
}

fn same_listener(a: &Arc<dyn EndpointStateListener>, b: &Arc<dyn EndpointStateListener>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Server-side front door of one local node on one address.
pub struct Endpoint {
    node: NodeRef,
    url: Url,
    lifecycle: Mutex<Lifecycle>,
    // Serializes listen/accept_entries/disconnect so transport actions run
    // outside the lifecycle lock without interleaving.
    transitions: Mutex<()>,
    connector: Box<dyn Connector>,
    registry: Weak<Endpoints>,
    me: Weak<Endpoint>,
}

impl Endpoint {
    pub(crate) fn new(
        node: NodeRef,
        url: Url,
        connector: Box<dyn Connector>,
        registry: Weak<Endpoints>,
    ) -> Arc<Self> {
        info!(url = %url, node = %node.id(), "endpoint created");
        Arc::new_cyclic(|me| Endpoint {
            node,
            url,
            lifecycle: Mutex::new(Lifecycle {
                state: State::Started,
                listeners: Vec::new(),
                retired: false,
            }),
            transitions: Mutex::new(()),
            connector,
            registry,
            me: me.clone(),
        })
    }

    /// The wrapped local node.
    pub fn node(&self) -> &NodeRef {
        &self.node
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn state(&self) -> State {
        self.lifecycle.lock().state
    }

    pub(crate) fn registry(&self) -> Option<Arc<Endpoints>> {
        self.registry.upgrade()
    }

    pub fn register(&self, listener: Arc<dyn EndpointStateListener>) {
        let mut lifecycle = self.lifecycle.lock();
        if !lifecycle.listeners.iter().any(|l| same_listener(l, &listener)) {
            lifecycle.listeners.push(listener);
        }
    }

    /// Returns `false` if the listener was not registered.
    pub fn unregister(&self, listener: &Arc<dyn EndpointStateListener>) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        let before = lifecycle.listeners.len();
        lifecycle.listeners.retain(|l| !same_listener(l, listener));
        lifecycle.listeners.len() != before
    }

    fn set_state(&self, state: State) {
        let mut lifecycle = self.lifecycle.lock();
        self.enter(&mut lifecycle, state);
    }

    /// Changes the state and notifies listeners; `CRASHED` is never left.
    fn enter(&self, lifecycle: &mut Lifecycle, state: State) {
        if lifecycle.state == State::Crashed {
            return;
        }
        lifecycle.state = state;
        debug!(
            url = %self.url,
            %state,
            listeners = lifecycle.listeners.len(),
            "notifying state change"
        );
        for listener in &lifecycle.listeners {
            listener.on_state_changed(&self.url, state);
        }
    }

    fn expect_state(&self, expected: State, next: State) -> Result<()> {
        let lifecycle = self.lifecycle.lock();
        if lifecycle.retired {
            return Err(Error::EndpointRetired(self.url.clone()));
        }
        if lifecycle.state != expected {
            return Err(Error::IllegalTransition {
                from: lifecycle.state.name(),
                to: next.name(),
            });
        }
        Ok(())
    }

    /// `STARTED -> LISTENING`: opens the transport, then reports the state.
    ///
    /// Fails with a communication error if the transport cannot bind, and
    /// with a usage error if the endpoint is not in `STARTED` or was
    /// disconnected before.
    pub fn listen(&self) -> Result<()> {
        let _transition = self.transitions.lock();
        self.expect_state(State::Started, State::Listening)?;

        let me = self.me.upgrade().ok_or_else(|| {
            CommunicationError::new(format!("endpoint {} is being dropped", self.url))
        })?;
        self.connector.open_connections(&me)?;

        self.set_state(State::Listening);
        info!(url = %self.url, "endpoint listening");
        Ok(())
    }

    /// `LISTENING -> ACCEPT_ENTRIES`: admits the entry-storage operations.
    pub fn accept_entries(&self) -> Result<()> {
        let _transition = self.transitions.lock();
        self.expect_state(State::Listening, State::AcceptEntries)?;

        self.set_state(State::AcceptEntries);
        self.connector.entries_acceptable(self);
        info!(url = %self.url, "endpoint accepts entries");
        Ok(())
    }

    /// Closes the transport, reports `STARTED` and frees the address in the
    /// registry. The endpoint cannot be listened on again afterwards.
    ///
    /// If the transport cannot be released cleanly the endpoint ends up in
    /// `DISCONNECTED` instead. Terminal states are kept as they are.
    pub fn disconnect(&self) {
        let _transition = self.transitions.lock();
        {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.retired {
                return;
            }
            lifecycle.retired = true;
        }
        info!(url = %self.url, "disconnecting");

        let next = match self.connector.close_connections(self) {
            Ok(()) => State::Started,
            Err(err) => {
                warn!(url = %self.url, error = %err, "failed to close connections");
                State::Disconnected
            }
        };
        {
            let mut lifecycle = self.lifecycle.lock();
            if !lifecycle.state.is_terminal() {
                self.enter(&mut lifecycle, next);
            }
        }

        if let Some(registry) = self.registry.upgrade() {
            registry.remove_if_same(&self.url, self);
        }
    }

    /// Marks the endpoint as failed beyond recovery. Inbound calls are
    /// rejected from now on; [`Endpoint::disconnect`] still releases the
    /// transport and the address.
    pub fn mark_crashed(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state.is_terminal() {
            return;
        }
        warn!(url = %self.url, "endpoint crashed");
        self.enter(&mut lifecycle, State::Crashed);
    }

    fn admit(&self, method: Method) -> ComResult<()> {
        let state = self.state();
        match state {
            State::AcceptEntries => Ok(()),
            State::Listening if !method.requires_accept_entries() => Ok(()),
            State::Listening => Err(CommunicationError::new(format!(
                "{method} rejected by {}: entries are not accepted yet",
                self.url
            ))),
            _ => Err(CommunicationError::new(format!(
                "{method} rejected by {}: endpoint is {state}",
                self.url
            ))),
        }
    }

    /// Serves one inbound call against the wrapped node.
    ///
    /// References in the request are imported through `mapper` (so the
    /// local node only ever sees proxies scoped to this endpoint), and
    /// references in the result are exported through it.
    pub fn dispatch<M: RefMapper>(
        &self,
        request: Request<M::Ref>,
        mapper: &M,
    ) -> ComResult<Response<M::Ref>> {
        let method = request.method();
        self.admit(method)?;
        trace!(url = %self.url, %method, "dispatching");

        let node = &self.node;
        let response = match request {
            Request::NodeId => Response::Id(node.id().clone()),
            Request::Ping => Response::Done,
            Request::FindSuccessor(key) => {
                Response::Node(mapper.export(&node.find_successor(&key)?)?)
            }
            Request::Notify(candidate) => {
                let refs = node.notify(&mapper.import(candidate))?;
                Response::Nodes(export_all(mapper, &refs)?)
            }
            Request::NotifyAndCopyEntries(candidate) => {
                let reply = node.notify_and_copy_entries(&mapper.import(candidate))?;
                Response::RefsAndEntries {
                    refs: export_all(mapper, &reply.refs)?,
                    entries: reply.entries,
                }
            }
            Request::InsertEntry(entry) => {
                node.insert_entry(entry)?;
                Response::Done
            }
            Request::InsertReplicas(entries) => {
                node.insert_replicas(entries)?;
                Response::Done
            }
            Request::RemoveEntry(entry) => {
                node.remove_entry(entry)?;
                Response::Done
            }
            Request::RemoveReplicas { sender, replicas } => {
                node.remove_replicas(&sender, replicas)?;
                Response::Done
            }
            Request::RetrieveEntries(id) => Response::Entries(node.retrieve_entries(&id)?),
            Request::LeavesNetwork(predecessor) => {
                node.leaves_network(&mapper.import(predecessor))?;
                Response::Done
            }
        };
        Ok(response)
    }
}

fn export_all<M: RefMapper>(mapper: &M, nodes: &[NodeRef]) -> ComResult<Vec<M::Ref>> {
    nodes.iter().map(|n| mapper.export(n)).collect()
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("url", &self.url)
            .field("node", &self.node.id())
            .field("state", &self.state())
            .field("connector", &self.connector)
            .finish()
    }
}
