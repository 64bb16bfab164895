use std::collections::HashMap;
use std::io::{ErrorKind, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use corelib::{ComResult, CommunicationError};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::{RpcCall, RpcMapper, RpcReply, StubHandle};
use crate::codec::{encode_frame, read_frame};
use crate::config::TransportConfig;
use crate::endpoint::{Connector, Endpoint};

/// Naming service and call dispatcher for one `host:port`.
pub(crate) struct NameServer {
    local_addr: SocketAddr,
    config: Arc<TransportConfig>,
    bindings: Mutex<HashMap<String, Weak<Endpoint>>>,
    shutdown: AtomicBool,
    acceptor: Mutex<Option<JoinHandle<()>>>,
}

impl NameServer {
    fn start(authority: &str, config: Arc<TransportConfig>) -> ComResult<Arc<Self>> {
        let listener = TcpListener::bind(authority).map_err(|e| {
            let context = format!("cannot start naming service on {authority}");
            CommunicationError::with_source(context, e)
        })?;
        let server = Arc::new(NameServer {
            local_addr: listener.local_addr()?,
            config,
            bindings: Mutex::new(HashMap::new()),
            shutdown: AtomicBool::new(false),
            acceptor: Mutex::new(None),
        });

        let handle = {
            let server = server.clone();
            thread::Builder::new()
                .name(format!("rpc-accept-{authority}"))
                .spawn(move || server.accept_loop(listener))?
        };
        *server.acceptor.lock() = Some(handle);
        info!(%authority, "naming service started");
        Ok(server)
    }

    fn bind(&self, name: &str, endpoint: &Arc<Endpoint>) -> ComResult<()> {
        let mut bindings = self.bindings.lock();
        if bindings.get(name).is_some_and(|b| b.strong_count() > 0) {
            return Err(CommunicationError::new(format!("{name} is already bound")));
        }
        bindings.insert(name.to_string(), Arc::downgrade(endpoint));
        debug!(%name, "bound");
        Ok(())
    }

    /// Returns the number of bindings left.
    fn unbind(&self, name: &str) -> ComResult<usize> {
        let mut bindings = self.bindings.lock();
        if bindings.remove(name).is_none() {
            return Err(CommunicationError::new(format!("{name} is not bound")));
        }
        debug!(%name, "unbound");
        Ok(bindings.len())
    }

    fn lookup(&self, name: &str) -> Option<Arc<Endpoint>> {
        self.bindings.lock().get(name).and_then(Weak::upgrade)
    }

    fn stop(&self) -> ComResult<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        let mut wake = self.local_addr;
        if wake.ip().is_unspecified() {
            wake.set_ip(Ipv4Addr::LOCALHOST.into());
        }
        if let Err(err) = TcpStream::connect_timeout(&wake, self.config.connect_timeout()) {
            debug!(error = %err, "wake-up connection failed");
        }
        if let Some(handle) = self.acceptor.lock().take() {
            handle.join().map_err(|_| {
                CommunicationError::new(format!("naming service on {} panicked", self.local_addr))
            })?;
        }
        info!(addr = %self.local_addr, "naming service stopped");
        Ok(())
    }

    fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        for stream in listener.incoming() {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            let stream = match stream {
                Ok(stream) => stream,
                Err(err)
                    if matches!(
                        err.kind(),
                        ErrorKind::Interrupted | ErrorKind::ConnectionAborted
                    ) =>
                {
                    continue
                }
                Err(err) => {
                    error!(addr = %self.local_addr, error = %err, "naming service accept failed");
                    let bound: Vec<_> =
                        self.bindings.lock().values().filter_map(Weak::upgrade).collect();
                    for endpoint in bound {
                        endpoint.mark_crashed();
                    }
                    break;
                }
            };
            let server = self.clone();
            if let Err(err) = thread::Builder::new()
                .name("rpc-call".into())
                .spawn(move || server.serve(stream))
            {
                warn!(error = %err, "cannot spawn call thread");
            }
        }
        debug!(addr = %self.local_addr, "naming service acceptor exiting");
    }

    fn serve(&self, mut stream: TcpStream) {
        let call: RpcCall = match read_frame(&mut stream, self.config.max_frame_len) {
            Ok(Some(call)) => call,
            Ok(None) => return,
            Err(err) => {
                debug!(error = %err, "malformed call");
                return;
            }
        };
        let max_len = self.config.max_frame_len;
        let reply = self.handle(call);
        // An unencodable reply is answered with its encoding failure.
        let delivered = encode_frame(&reply, max_len)
            .or_else(|err| {
                warn!(error = %err, "reply cannot be sent as is");
                encode_frame(&RpcReply::Reply(Err(err.to_string())), max_len)
            })
            .and_then(|bytes| {
                stream.write_all(&bytes)?;
                stream.flush()?;
                Ok(())
            });
        if let Err(err) = delivered {
            debug!(error = %err, "cannot deliver reply");
        }
    }

    fn handle(&self, call: RpcCall) -> RpcReply {
        match call {
            RpcCall::Lookup(name) => match self.lookup(&name) {
                Some(_) => RpcReply::Bound,
                None => RpcReply::NotBound,
            },
            RpcCall::Invoke { target, request } => {
                let Some(endpoint) = self.lookup(&target) else {
                    return RpcReply::NotBound;
                };
                let reply = RpcMapper::for_endpoint(self.config.clone(), &endpoint)
                    .and_then(|mapper| endpoint.dispatch(request, &mapper))
                    .map_err(|e| e.to_string());
                RpcReply::Reply(reply)
            }
        }
    }
}

/// Naming servers of this process, one per `host:port`.
#[derive(Default)]
pub(crate) struct Exports {
    servers: Mutex<HashMap<(String, u16), Arc<NameServer>>>,
}

impl Exports {
    fn bind(
        &self,
        stub: &StubHandle,
        endpoint: &Arc<Endpoint>,
        config: &Arc<TransportConfig>,
    ) -> ComResult<()> {
        let mut servers = self.servers.lock();
        let key = (stub.host.clone(), stub.port);
        let server = match servers.get(&key) {
            Some(server) => server.clone(),
            None => {
                let server = NameServer::start(&stub.authority(), config.clone())?;
                servers.insert(key, server.clone());
                server
            }
        };
        server.bind(&stub.name, endpoint)
    }

    fn unbind(&self, stub: &StubHandle) -> ComResult<()> {
        let mut servers = self.servers.lock();
        let key = (stub.host.clone(), stub.port);
        let server = servers.get(&key).cloned().ok_or_else(|| {
            CommunicationError::new(format!("no naming service on {}", stub.authority()))
        })?;
        if server.unbind(&stub.name)? == 0 {
            servers.remove(&key);
            server.stop()?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub(crate) struct RpcConnector {
    config: Arc<TransportConfig>,
    bound: Mutex<Option<StubHandle>>,
}

impl RpcConnector {
    pub(crate) fn new(config: Arc<TransportConfig>) -> Self {
        Self {
            config,
            bound: Mutex::new(None),
        }
    }
}

impl Connector for RpcConnector {
    fn open_connections(&self, endpoint: &Arc<Endpoint>) -> ComResult<()> {
        let registry = endpoint
            .registry()
            .ok_or_else(|| CommunicationError::new("endpoint registry is gone"))?;
        let stub = StubHandle::for_url(endpoint.url())?;
        registry.exports.bind(&stub, endpoint, &self.config)?;
        info!(url = %endpoint.url(), name = %stub.name, "endpoint exported");
        *self.bound.lock() = Some(stub);
        Ok(())
    }

    fn close_connections(&self, endpoint: &Endpoint) -> ComResult<()> {
        let Some(stub) = self.bound.lock().take() else {
            return Ok(());
        };
        match endpoint.registry() {
            Some(registry) => registry.exports.unbind(&stub),
            None => Ok(()),
        }
    }
}
