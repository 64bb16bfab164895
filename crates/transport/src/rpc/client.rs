use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;

use corelib::{ComResult, CommunicationError, Url};
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::{RemoteNodeInfo, RpcCall, RpcMapper, RpcReply, StubHandle};
use crate::codec::{read_frame, write_frame};
use crate::config::TransportConfig;
use crate::protocol::{Request, Response};
use crate::proxy::Channel;

#[derive(Debug)]
pub struct RpcChannel {
    mapper: RpcMapper,
    stub: StubHandle,
    config: Arc<TransportConfig>,
    /// Naming service address, set once the binding has been looked up.
    resolved: Mutex<Option<SocketAddr>>,
}

impl RpcChannel {
    pub(super) fn new(config: Arc<TransportConfig>, stub: StubHandle, creator: Url) -> Self {
        Self {
            mapper: RpcMapper::for_proxy(config.clone(), creator),
            stub,
            config,
            resolved: Mutex::new(None),
        }
    }

    fn resolve(&self) -> ComResult<SocketAddr> {
        let mut resolved = self.resolved.lock();
        if let Some(addr) = *resolved {
            return Ok(addr);
        }

        let authority = self.stub.authority();
        let mut last_err = None;
        for addr in authority.to_socket_addrs()? {
            match self.exchange(addr, &RpcCall::Lookup(self.stub.name.clone())) {
                Ok(RpcReply::Bound) => {
                    debug!(name = %self.stub.name, %addr, "binding resolved");
                    *resolved = Some(addr);
                    return Ok(addr);
                }
                Ok(RpcReply::NotBound) => {
                    last_err = Some(CommunicationError::new(format!(
                        "{} is not bound at {authority}",
                        self.stub.name
                    )));
                }
                Ok(RpcReply::Reply(_)) => {
                    last_err = Some(CommunicationError::new("unexpected reply to lookup"));
                }
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            CommunicationError::new(format!("{authority} did not resolve"))
        }))
    }

    fn exchange(&self, addr: SocketAddr, call: &RpcCall) -> ComResult<RpcReply> {
        let mut stream =
            TcpStream::connect_timeout(&addr, self.config.connect_timeout()).map_err(|e| {
                CommunicationError::with_source(format!("cannot reach naming service at {addr}"), e)
            })?;
        stream.set_read_timeout(Some(self.config.call_timeout()))?;
        stream.set_write_timeout(Some(self.config.call_timeout()))?;
        write_frame(&mut stream, call, self.config.max_frame_len)?;
        read_frame(&mut stream, self.config.max_frame_len)?.ok_or_else(|| {
            CommunicationError::new(format!("{addr} closed the connection without reply"))
        })
    }
}

impl Channel for RpcChannel {
    type Mapper = RpcMapper;

    fn mapper(&self) -> &RpcMapper {
        &self.mapper
    }

    fn invoke(&self, request: Request<RemoteNodeInfo>) -> ComResult<Response<RemoteNodeInfo>> {
        let addr = self.resolve()?;
        let method = request.method();
        trace!(name = %self.stub.name, %method, "invoking");
        let call = RpcCall::Invoke {
            target: self.stub.name.clone(),
            request,
        };
        match self.exchange(addr, &call)? {
            RpcReply::Reply(Ok(response)) => Ok(response),
            RpcReply::Reply(Err(remote)) => Err(CommunicationError::new(format!(
                "{method} failed at {}: {remote}",
                self.stub.name
            ))),
            RpcReply::NotBound => {
                *self.resolved.lock() = None;
                Err(CommunicationError::new(format!("{} is no longer bound", self.stub.name)))
            }
            RpcReply::Bound => Err(CommunicationError::new(format!(
                "unexpected reply to {method}"
            ))),
        }
    }

    fn close(&self) {
        *self.resolved.lock() = None;
    }
}
