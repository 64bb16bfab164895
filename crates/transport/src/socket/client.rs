use std::io::{self, BufReader, ErrorKind};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use corelib::{ComResult, CommunicationError, Url};
use crossbeam::channel::{bounded, RecvTimeoutError, Sender};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::{RequestFrame, ResponseFrame, SocketMapper};
use crate::codec::{read_frame, write_frame};
use crate::config::TransportConfig;
use crate::protocol::{NodeInfo, Reply, Request, Response};
use crate::proxy::{Channel, Validity};

/// One connection to an endpoint, shared by every call of a proxy.
#[derive(Debug)]
struct Connection {
    target: Url,
    writer: Mutex<TcpStream>,
    pending: DashMap<u64, Sender<Reply<NodeInfo>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl Connection {
    fn open(target: &Url, config: &TransportConfig, validity: Validity) -> ComResult<Arc<Self>> {
        let authority = target.authority();
        let mut last_err = None;
        let mut stream = None;
        for addr in authority.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, config.connect_timeout()) {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(err) => last_err = Some(err),
            }
        }
        let stream = stream.ok_or_else(|| {
            let cause = last_err
                .unwrap_or_else(|| io::Error::new(ErrorKind::NotFound, "no address resolved"));
            CommunicationError::with_source(format!("cannot connect to {target}"), cause)
        })?;
        stream.set_nodelay(true)?;
        let reader = stream.try_clone()?;

        let connection = Arc::new(Connection {
            target: target.clone(),
            writer: Mutex::new(stream),
            pending: DashMap::new(),
            next_id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&connection);
        let max_frame_len = config.max_frame_len;
        thread::Builder::new()
            .name(format!("socket-reply-{authority}"))
            .spawn(move || read_replies(reader, weak, validity, max_frame_len))?;

        debug!(remote = %target, "connected");
        Ok(connection)
    }

    fn call(
        &self,
        request: Request<NodeInfo>,
        config: &TransportConfig,
    ) -> ComResult<Response<NodeInfo>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let method = request.method();
        let (tx, rx) = bounded(1);
        self.pending.insert(id, tx);
        if self.closed.load(Ordering::SeqCst) {
            self.pending.remove(&id);
            return Err(self.closed_error());
        }

        trace!(remote = %self.target, id, %method, "sending request");
        let frame = RequestFrame { id, request };
        if let Err(err) = write_frame(&mut *self.writer.lock(), &frame, config.max_frame_len) {
            self.pending.remove(&id);
            return Err(err);
        }

        match rx.recv_timeout(config.call_timeout()) {
            Ok(reply) => reply.map_err(|remote| {
                CommunicationError::new(format!("{method} failed at {}: {remote}", self.target))
            }),
            Err(RecvTimeoutError::Timeout) => {
                self.pending.remove(&id);
                Err(CommunicationError::new(format!("{method} to {} timed out", self.target)))
            }
            Err(RecvTimeoutError::Disconnected) => Err(self.closed_error()),
        }
    }

    fn closed_error(&self) -> CommunicationError {
        CommunicationError::new(format!("connection to {} closed", self.target))
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // Ends the reply reader blocked on the other half.
        let _ = self.writer.get_mut().shutdown(Shutdown::Both);
    }
}

fn read_replies(
    stream: TcpStream,
    connection: Weak<Connection>,
    validity: Validity,
    max_frame_len: u32,
) {
    let mut reader = BufReader::new(stream);
    loop {
        let frame: ResponseFrame = match read_frame(&mut reader, max_frame_len) {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(err) => {
                debug!(error = %err, "reply stream failed");
                break;
            }
        };
        let Some(connection) = connection.upgrade() else {
            break;
        };
        match connection.pending.remove(&frame.id) {
            Some((_, tx)) => {
                let _ = tx.send(frame.reply);
            }
            None => debug!(id = frame.id, "reply without waiting call"),
        }
    }

    validity.invalidate();
    if let Some(connection) = connection.upgrade() {
        connection.closed.store(true, Ordering::SeqCst);
        connection.pending.clear();
        debug!(remote = %connection.target, "connection lost, proxy invalidated");
    }
}

#[derive(Debug)]
pub struct SocketChannel {
    mapper: SocketMapper,
    target: Url,
    validity: Validity,
    config: Arc<TransportConfig>,
    connection: Mutex<Option<Arc<Connection>>>,
}

impl SocketChannel {
    pub(super) fn new(
        config: Arc<TransportConfig>,
        target: Url,
        creator: Url,
        validity: Validity,
    ) -> Self {
        Self {
            mapper: SocketMapper::new(config.clone(), creator),
            target,
            validity,
            config,
            connection: Mutex::new(None),
        }
    }

    /// The connection, opened on first use.
    fn connection(&self) -> ComResult<Arc<Connection>> {
        let mut slot = self.connection.lock();
        if let Some(connection) = slot.as_ref() {
            return Ok(connection.clone());
        }
        let connection = Connection::open(&self.target, &self.config, self.validity.clone())?;
        *slot = Some(connection.clone());
        Ok(connection)
    }
}

impl Channel for SocketChannel {
    type Mapper = SocketMapper;

    fn mapper(&self) -> &SocketMapper {
        &self.mapper
    }

    fn invoke(&self, request: Request<NodeInfo>) -> ComResult<Response<NodeInfo>> {
        self.connection()?.call(request, &self.config)
    }

    fn close(&self) {
        if let Some(connection) = self.connection.lock().take() {
            let _ = connection.writer.lock().shutdown(Shutdown::Both);
        }
    }
}
