use std::collections::HashMap;
use std::io::{BufReader, ErrorKind, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use corelib::{ComResult, CommunicationError};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::{RequestFrame, ResponseFrame, SocketMapper};
use crate::codec::{encode_frame, read_frame};
use crate::config::TransportConfig;
use crate::endpoint::{Connector, Endpoint};

type Connections = Arc<Mutex<HashMap<u64, TcpStream>>>;

struct Listening {
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    connections: Connections,
    acceptor: JoinHandle<()>,
}

#[derive(Debug)]
pub(crate) struct SocketConnector {
    config: Arc<TransportConfig>,
    listening: Mutex<Option<Listening>>,
}

impl std::fmt::Debug for Listening {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listening").field("local_addr", &self.local_addr).finish()
    }
}

impl SocketConnector {
    pub(crate) fn new(config: Arc<TransportConfig>) -> Self {
        Self {
            config,
            listening: Mutex::new(None),
        }
    }
}

impl Connector for SocketConnector {
    fn open_connections(&self, endpoint: &Arc<Endpoint>) -> ComResult<()> {
        let mut listening = self.listening.lock();
        if listening.is_some() {
            return Err(CommunicationError::new(format!(
                "{} is already listening",
                endpoint.url()
            )));
        }

        let authority = endpoint.url().authority();
        let listener = TcpListener::bind(&authority)
            .map_err(|e| CommunicationError::with_source(format!("cannot bind {authority}"), e))?;
        let local_addr = listener.local_addr()?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let connections: Connections = Arc::new(Mutex::new(HashMap::new()));

        let acceptor = {
            let endpoint = endpoint.clone();
            let shutdown = shutdown.clone();
            let connections = connections.clone();
            let config = self.config.clone();
            thread::Builder::new()
                .name(format!("socket-accept-{local_addr}"))
                .spawn(move || accept_loop(listener, endpoint, shutdown, connections, config))?
        };

        info!(url = %endpoint.url(), %local_addr, "socket listener started");
        *listening = Some(Listening {
            local_addr,
            shutdown,
            connections,
            acceptor,
        });
        Ok(())
    }

    fn close_connections(&self, endpoint: &Endpoint) -> ComResult<()> {
        let Some(listening) = self.listening.lock().take() else {
            return Ok(());
        };
        listening.shutdown.store(true, Ordering::SeqCst);

        // Unblock the acceptor.
        let mut wake = listening.local_addr;
        if wake.ip().is_unspecified() {
            wake.set_ip(std::net::Ipv4Addr::LOCALHOST.into());
        }
        if let Err(err) = TcpStream::connect_timeout(&wake, self.config.connect_timeout()) {
            debug!(error = %err, "wake-up connection failed");
        }

        for (_, stream) in listening.connections.lock().drain() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        listening.acceptor.join().map_err(|_| {
            CommunicationError::new(format!("acceptor of {} panicked", endpoint.url()))
        })?;
        info!(url = %endpoint.url(), "socket listener stopped");
        Ok(())
    }
}

/// A connection registered for shutdown on close; unregisters and shuts the
/// stream down when dropped.
struct Tracked {
    connections: Connections,
    id: u64,
}

impl Tracked {
    fn insert(connections: &Connections, id: u64, stream: &TcpStream) -> std::io::Result<Self> {
        let handle = stream.try_clone()?;
        connections.lock().insert(id, handle);
        Ok(Self {
            connections: connections.clone(),
            id,
        })
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        if let Some(stream) = self.connections.lock().remove(&self.id) {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

fn accept_loop(
    listener: TcpListener,
    endpoint: Arc<Endpoint>,
    shutdown: Arc<AtomicBool>,
    connections: Connections,
    config: Arc<TransportConfig>,
) {
    let next_conn = AtomicU64::new(0);
    for stream in listener.incoming() {
        if shutdown.load(Ordering::SeqCst) {
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
                debug!(error = %err, "transient accept failure");
                continue;
            }
            Err(err) => {
                error!(url = %endpoint.url(), error = %err, "accept failed");
                endpoint.mark_crashed();
                break;
            }
        };

        let conn_id = next_conn.fetch_add(1, Ordering::Relaxed);
        let tracked = match Tracked::insert(&connections, conn_id, &stream) {
            Ok(tracked) => tracked,
            Err(err) => {
                warn!(error = %err, "cannot track connection");
                continue;
            }
        };

        // The closure owns `tracked`, so a failed spawn drops it too.
        let spawned = {
            let endpoint = endpoint.clone();
            let config = config.clone();
            thread::Builder::new()
                .name(format!("socket-conn-{conn_id}"))
                .spawn(move || {
                    serve_connection(stream, &endpoint, &config);
                    drop(tracked);
                })
        };
        if let Err(err) = spawned {
            warn!(error = %err, "cannot spawn connection thread");
        }
    }
    debug!(url = %endpoint.url(), "acceptor exiting");
}

fn serve_connection(stream: TcpStream, endpoint: &Arc<Endpoint>, config: &Arc<TransportConfig>) {
    let peer = stream.peer_addr().ok();
    debug!(url = %endpoint.url(), ?peer, "connection accepted");
    let writer = match stream.try_clone() {
        Ok(writer) => Arc::new(Mutex::new(writer)),
        Err(err) => {
            warn!(error = %err, "cannot split connection");
            return;
        }
    };
    let mut reader = BufReader::new(stream);

    loop {
        let frame: RequestFrame = match read_frame(&mut reader, config.max_frame_len) {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(err) => {
                debug!(?peer, error = %err, "connection dropped");
                break;
            }
        };

        let endpoint = endpoint.clone();
        let writer = writer.clone();
        let config = config.clone();
        let spawned = thread::Builder::new()
            .name(format!("socket-call-{}", frame.id))
            .spawn(move || {
                let mapper = SocketMapper::new(config.clone(), endpoint.url().clone());
                let reply = endpoint.dispatch(frame.request, &mapper).map_err(|e| e.to_string());
                let response = ResponseFrame { id: frame.id, reply };
                let delivered = encode_reply(response, config.max_frame_len).and_then(|bytes| {
                    let mut writer = writer.lock();
                    writer.write_all(&bytes)?;
                    writer.flush()?;
                    Ok(())
                });
                if let Err(err) = delivered {
                    debug!(id = frame.id, error = %err, "cannot deliver reply");
                }
            });
        if let Err(err) = spawned {
            warn!(error = %err, "cannot spawn invocation thread");
        }
    }
    debug!(url = %endpoint.url(), ?peer, "connection closed");
}

/// Encodes a reply frame. A reply that cannot be encoded within `max_len` is
/// replaced by an error reply naming the cause.
fn encode_reply(response: ResponseFrame, max_len: u32) -> ComResult<Vec<u8>> {
    encode_frame(&response, max_len).or_else(|err| {
        warn!(id = response.id, error = %err, "reply cannot be sent as is");
        let failed = ResponseFrame {
            id: response.id,
            reply: Err(err.to_string()),
        };
        encode_frame(&failed, max_len)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn test_dropped_tracking_releases_connection() {
        let connections: Connections = Arc::new(Mutex::new(HashMap::new()));
        let (mut client, server) = connected_pair();

        let tracked = Tracked::insert(&connections, 7, &server).unwrap();
        assert!(connections.lock().contains_key(&7));

        // Same path as a connection thread that never got to run.
        let never_run = move || drop(tracked);
        drop(never_run);

        assert!(connections.lock().is_empty());
        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_unencodable_reply_becomes_error_reply() {
        let response = ResponseFrame {
            id: 3,
            reply: Ok(crate::protocol::Response::Id(corelib::Id::new(vec![0; 512]))),
        };
        let bytes = encode_reply(response, 64).unwrap();

        let frame: ResponseFrame = read_frame(&mut &bytes[..], 64).unwrap().unwrap();
        assert_eq!(frame.id, 3);
        let cause = frame.reply.unwrap_err();
        assert!(cause.contains("exceeds limit of 64"), "{cause}");
    }
}
