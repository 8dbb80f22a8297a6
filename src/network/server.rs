//! Server dengan event-driven I/O
//!
//! Satu `mio::Poll`, satu `UnixListener`, banyak connection. Setiap
//! connection punya `Connection` (dan object table) sendiri; error fatal di
//! satu connection hanya menutup connection itu.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mio::net::{UnixListener, UnixStream};
use mio::{Events, Interest, Poll, Token};
use tracing::{debug, info, warn};

use super::{Connection, Dispatcher, Transport};
use crate::config::ServerConfig;
use crate::core::Role;
use crate::schema::Schema;

const SERVER_TOKEN: Token = Token(0);
const EVENTS_CAPACITY: usize = 1024;

/// Dipanggil untuk setiap connection baru: daftarkan handler, buat object
/// bootstrap.
pub type SetupHook = Box<dyn FnMut(&mut Connection) + Send>;

struct Peer {
    transport: Transport<UnixStream>,
    conn: Connection,
}

pub struct Server {
    poll: Poll,
    listener: UnixListener,
    path: PathBuf,
    connections: HashMap<Token, Peer>,
    next_token: usize,
    schema: Arc<Schema>,
    config: ServerConfig,
    setup: SetupHook,
}

impl Server {
    /// Bind ke `config.socket_path`. Socket lama di path yang sama dihapus.
    pub fn bind(config: ServerConfig, schema: Arc<Schema>, setup: SetupHook) -> io::Result<Self> {
        let path = config.socket_path.clone();
        remove_stale_socket(&path)?;

        let poll = Poll::new()?;
        let mut listener = UnixListener::bind(&path)?;
        poll.registry()
            .register(&mut listener, SERVER_TOKEN, Interest::READABLE)?;

        info!("Listening on {:?}", path);
        Ok(Self {
            poll,
            listener,
            path,
            connections: HashMap::with_capacity(config.max_connections.min(1024)),
            next_token: 1,
            schema,
            config,
            setup,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Run server event loop sampai `stop` di-set.
    pub fn run(&mut self, stop: &AtomicBool) -> io::Result<()> {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        let timeout = Duration::from_millis(self.config.poll_timeout_ms);
        while !stop.load(Ordering::Relaxed) {
            self.poll_once(&mut events, Some(timeout))?;
        }
        self.shutdown();
        Ok(())
    }

    /// Close every connection without running handlers.
    pub fn shutdown(&mut self) {
        info!("Server stopping, closing {} connections", self.connections.len());
        let tokens: Vec<Token> = self.connections.keys().copied().collect();
        for token in tokens {
            self.disconnect(token);
        }
    }

    /// One poll iteration.
    pub fn poll_once(&mut self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        match self.poll.poll(events, timeout) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        for event in events.iter() {
            match event.token() {
                SERVER_TOKEN => self.accept_connections()?,
                token => {
                    if event.is_readable() || event.is_read_closed() {
                        self.handle_read(token);
                    }
                    if event.is_writable() {
                        self.handle_write(token);
                    }
                }
            }
        }
        Ok(())
    }

    /// Accept new connections
    fn accept_connections(&mut self) -> io::Result<()> {
        loop {
            match self.listener.accept() {
                Ok((mut stream, _addr)) => {
                    if self.connections.len() >= self.config.max_connections {
                        warn!("Max connections reached, rejecting client");
                        continue;
                    }

                    let token = Token(self.next_token);
                    self.next_token += 1;
                    self.poll.registry().register(
                        &mut stream,
                        token,
                        Interest::READABLE | Interest::WRITABLE,
                    )?;

                    let dispatcher = Dispatcher::new(Arc::clone(&self.schema));
                    let mut conn =
                        Connection::new(dispatcher, Role::Server, &self.config.connection);
                    (self.setup)(&mut conn);

                    let transport = Transport::new(stream, self.config.connection.read_buffer_size);
                    self.connections.insert(token, Peer { transport, conn });
                    info!("New connection (token: {:?})", token);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Handle readable event
    fn handle_read(&mut self, token: Token) {
        let Some(peer) = self.connections.get_mut(&token) else {
            return;
        };

        match peer.transport.pump_into(&mut peer.conn) {
            Ok(n) => debug!("Dispatched {} messages on {:?}", n, token),
            Err(e) => {
                debug!("Connection {:?} failed: {}", token, e);
                close_after_read_error(&mut peer.conn, &e);
            }
        }
        self.handle_write(token);
    }

    /// Handle writable event
    fn handle_write(&mut self, token: Token) {
        let Some(peer) = self.connections.get_mut(&token) else {
            return;
        };
        if let Err(e) = peer.transport.flush_from(&mut peer.conn) {
            debug!("Write on {:?} failed: {}", token, e);
            peer.conn.close();
        }

        let drained = !peer.conn.has_outbound() && peer.transport.write_pending() == 0;
        if peer.conn.is_closed() && drained {
            self.disconnect(token);
        } else if peer.conn.is_closed() {
            // Flush error event dulu, tutup di writable berikutnya
            debug!("Connection {:?} closing, {} bytes left", token, peer.transport.write_pending());
        }
    }

    fn disconnect(&mut self, token: Token) {
        if let Some(mut peer) = self.connections.remove(&token) {
            peer.conn.close();
            if let Err(e) = self.poll.registry().deregister(peer.transport.stream_mut()) {
                debug!("Deregister {:?} failed: {}", token, e);
            }
            info!("Connection {:?} closed", token);
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Protocol error (`InvalidData`) sudah menutup connection dan error event
/// masih di outbound. Error I/O lain berarti socket tidak bisa dipakai lagi.
fn close_after_read_error(conn: &mut Connection, err: &io::Error) {
    if err.kind() != io::ErrorKind::InvalidData {
        conn.close();
    }
}

fn remove_stale_socket(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => fs::remove_file(path),
        Ok(_) => Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} exists and is not a socket", path.display()),
        )),
        Err(ref e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
