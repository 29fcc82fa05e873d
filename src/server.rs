use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{IpAddr, Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use fxhash::FxBuildHasher;
use indexmap::IndexMap;
use tracing::{debug, error, info, warn};

use crate::error::ProtocolParseError;
use crate::protocol::{self, Request, Response, RobotAction, MAX_LINE_BYTES};
use crate::session::{Session, SessionKey};
use crate::trainer::Trainer;
use crate::utils::lock;

/// What the server knows about one live connection.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub peer: SocketAddr,
    /// Label bound by the first message, if any arrived yet.
    pub client_id: Option<String>,
    pub connected_at: Instant,
    pub episodes: u64,
}

struct Connection {
    info: ClientInfo,
    // used to unblock the handler's read on shutdown
    control: TcpStream,
}

#[derive(Default)]
struct Shared {
    registry: Mutex<IndexMap<SessionKey, Connection, FxBuildHasher>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    stopping: AtomicBool,
}

impl Shared {
    fn update(&self, key: SessionKey, f: impl FnOnce(&mut ClientInfo)) {
        if let Some(connection) = lock(&self.registry).get_mut(&key) {
            f(&mut connection.info);
        }
    }
}

/// Line protocol front end: one thread per connection, one [`Session`] per thread.
pub struct Server {
    listener: TcpListener,
    trainer: Arc<Trainer>,
    shared: Arc<Shared>,
}

impl Server {
    pub fn bind(addr: impl ToSocketAddrs, trainer: Arc<Trainer>) -> io::Result<Self> {
        Ok(Self {
            listener: TcpListener::bind(addr)?,
            trainer,
            shared: Arc::default(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections on a background thread until [`ServerHandle::stop`].
    pub fn spawn(self) -> io::Result<ServerHandle> {
        let addr = self.local_addr()?;
        let shared = Arc::clone(&self.shared);
        let acceptor = thread::Builder::new()
            .name("acceptor".to_string())
            .spawn(move || self.serve())?;
        Ok(ServerHandle {
            addr,
            shared,
            acceptor,
        })
    }

    /// Runs the accept loop on the calling thread.
    pub fn serve(self) {
        if let Ok(addr) = self.local_addr() {
            info!(address = %addr, "listening for robots");
        }
        for stream in self.listener.incoming() {
            if self.shared.stopping.load(Ordering::Acquire) {
                break;
            }
            match stream {
                Ok(stream) => self.accept(stream),
                Err(e) => warn!(error = %e, "failed to accept connection"),
            }
        }
        debug!("accept loop stopped");
    }

    fn accept(&self, stream: TcpStream) {
        let key = self.trainer.next_session_key();
        let (peer, control) = match stream.peer_addr().and_then(|peer| Ok((peer, stream.try_clone()?))) {
            Ok(parts) => parts,
            Err(e) => {
                warn!(session = %key, error = %e, "dropping connection");
                return;
            }
        };
        let clients = {
            let mut registry = lock(&self.shared.registry);
            let info = ClientInfo {
                peer,
                client_id: None,
                connected_at: Instant::now(),
                episodes: 0,
            };
            registry.insert(key, Connection { info, control });
            registry.len()
        };
        info!(session = %key, peer = %peer, clients, "client connected");

        let trainer = Arc::clone(&self.trainer);
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(format!("client-{}", key.0))
            .spawn(move || run_connection(stream, key, &trainer, &shared));
        let mut workers = lock(&self.shared.workers);
        workers.retain(|worker| !worker.is_finished());
        match spawned {
            Ok(worker) => workers.push(worker),
            Err(e) => {
                error!(session = %key, error = %e, "could not start connection handler");
                lock(&self.shared.registry).shift_remove(&key);
            }
        }
    }
}

/// Control side of a spawned server.
pub struct ServerHandle {
    addr: SocketAddr,
    shared: Arc<Shared>,
    acceptor: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Live connections in connection order.
    pub fn clients(&self) -> Vec<(SessionKey, ClientInfo)> {
        lock(&self.shared.registry)
            .iter()
            .map(|(key, connection)| (*key, connection.info.clone()))
            .collect()
    }

    pub fn client_count(&self) -> usize {
        lock(&self.shared.registry).len()
    }

    /// Stops accepting, closes every connection and waits for the handlers to exit.
    pub fn stop(self) {
        self.shared.stopping.store(true, Ordering::Release);
        // the accept loop only notices the flag on its next connection
        let mut wake = self.addr;
        if wake.ip().is_unspecified() {
            wake.set_ip(IpAddr::V4(Ipv4Addr::LOCALHOST));
        }
        if let Err(e) = TcpStream::connect(wake) {
            warn!(error = %e, "could not wake the accept loop");
        }
        if self.acceptor.join().is_err() {
            error!("accept loop panicked");
        }

        for connection in lock(&self.shared.registry).values() {
            // already-closed sockets report an error here, which is fine
            let _ = connection.control.shutdown(Shutdown::Both);
        }
        let workers = std::mem::take(&mut *lock(&self.shared.workers));
        for worker in workers {
            if worker.join().is_err() {
                error!("connection handler panicked");
            }
        }
        info!("server stopped");
    }
}

enum Closed {
    ByPeer,
    Malformed(ProtocolParseError),
    Io(io::Error),
}

fn run_connection(stream: TcpStream, key: SessionKey, trainer: &Trainer, shared: &Shared) {
    let mut session = Session::new(key, trainer);
    let closed = match stream.try_clone() {
        Ok(read_half) => converse(BufReader::new(read_half), &stream, &mut session, trainer, shared),
        Err(e) => Closed::Io(e),
    };
    let _ = stream.shutdown(Shutdown::Both);

    let label = session.client_id().unwrap_or("?").to_string();
    match closed {
        Closed::ByPeer => {}
        Closed::Malformed(e) => {
            error!(session = %key, client = %label, error = %e, "malformed message, closing connection")
        }
        Closed::Io(e) => warn!(session = %key, client = %label, error = %e, "connection failed"),
    }
    let episodes = session.episode_index();
    session.close();
    let clients = {
        let mut registry = lock(&shared.registry);
        registry.shift_remove(&key);
        registry.len()
    };
    info!(session = %key, client = %label, episodes, clients, "client disconnected");
}

fn converse(
    mut reader: impl BufRead,
    mut writer: &TcpStream,
    session: &mut Session,
    trainer: &Trainer,
    shared: &Shared,
) -> Closed {
    let mut buf = Vec::new();
    loop {
        let line = match read_line(&mut reader, &mut buf) {
            Ok(Some(line)) => line,
            Ok(None) => return Closed::ByPeer,
            Err(closed) => return closed,
        };
        let response = match respond(line, session, trainer, shared) {
            Ok(response) => response,
            Err(e) => return Closed::Malformed(e),
        };
        if let Err(e) = writer.write_all(format!("{response}\n").as_bytes()) {
            return Closed::Io(e);
        }
    }
}

/// Reads one newline-terminated line into `buf`, never buffering more than
/// [`MAX_LINE_BYTES`] of it. `Ok(None)` means the peer closed the stream.
fn read_line<'a>(
    reader: &mut impl BufRead,
    buf: &'a mut Vec<u8>,
) -> Result<Option<&'a str>, Closed> {
    buf.clear();
    let read = reader
        .by_ref()
        .take(MAX_LINE_BYTES as u64 + 1)
        .read_until(b'\n', buf)
        .map_err(Closed::Io)?;
    if read == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
    } else if read > MAX_LINE_BYTES {
        return Err(Closed::Malformed(ProtocolParseError::LineTooLong {
            limit: MAX_LINE_BYTES,
        }));
    }
    std::str::from_utf8(buf)
        .map(Some)
        .map_err(|_| Closed::Malformed(ProtocolParseError::NotUtf8))
}

fn respond(
    line: &str,
    session: &mut Session,
    trainer: &Trainer,
    shared: &Shared,
) -> Result<Response, ProtocolParseError> {
    let request = protocol::parse(line, trainer.config().observation_dim)?;
    let first = session.client_id().is_none();
    session.bind(request.client_id())?;
    if first {
        let client_id = request.client_id().to_string();
        info!(session = %session.key(), client = %client_id, "client identified");
        shared.update(session.key(), |info| info.client_id = Some(client_id));
    }

    match request {
        Request::State { observation, .. } => {
            let action = match session.on_observation(observation.clone(), trainer) {
                Ok(action) => action,
                Err(e) => {
                    warn!(session = %session.key(), error = %e, "discarding unrewarded observation");
                    session.replace_pending(observation, trainer)
                }
            };
            debug!(
                session = %session.key(),
                action,
                meaning = ?RobotAction::from_id(action),
                "action chosen"
            );
            Ok(Response::Action(action))
        }
        Request::Reward { reward, done, .. } => {
            match session.on_reward(reward, done, trainer) {
                Ok(Some(_)) => shared.update(session.key(), |info| info.episodes += 1),
                Ok(None) => {}
                Err(e) => warn!(session = %session.key(), error = %e, "reward dropped"),
            }
            Ok(Response::Ack)
        }
    }
}
