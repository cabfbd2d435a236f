//! TCP listener
//!
//! Binds a listening socket, accepts connections on a dedicated thread, and
//! tracks one [`Session`] per client. The accept loop polls a non-blocking
//! socket so it can observe the shutdown flag between attempts; `stop()`
//! joins the accept thread and then every session thread, holding the
//! client-list lock only for list mutation, never across the joins.

use crate::error::{Error, Result};
use crate::net::session::{Connection, Session, SessionHandler};
use crate::registry::Controller;
use parking_lot::Mutex;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Poll interval for the non-blocking accept loop
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Upper bound on a single push to a client before it counts as stuck
const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Creates the protocol handler for each accepted connection
pub type HandlerFactory = Box<dyn Fn() -> Box<dyn SessionHandler> + Send + Sync>;

/// Multi-client TCP server
pub struct TcpServer {
    name: String,
    bind_addr: SocketAddr,
    factory: HandlerFactory,
    clients: Mutex<Vec<Arc<Session>>>,
    shutdown: Arc<AtomicBool>,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
    self_ref: Mutex<Weak<TcpServer>>,
}

impl TcpServer {
    pub fn new(name: &str, bind_addr: SocketAddr, factory: HandlerFactory) -> Arc<Self> {
        let server = Arc::new(Self {
            name: name.to_string(),
            bind_addr,
            factory,
            clients: Mutex::new(Vec::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
            accept_thread: Mutex::new(None),
            local_addr: Mutex::new(None),
            self_ref: Mutex::new(Weak::new()),
        });
        *server.self_ref.lock() = Arc::downgrade(&server);
        server
    }

    /// Bound address; None until started. With port 0 this is where the OS
    /// assignment becomes visible.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    pub fn local_port(&self) -> u16 {
        self.local_addr().map(|a| a.port()).unwrap_or(0)
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    /// Push bytes to every connected client. Each send is best-effort and
    /// independently fails-safe: a dead client is asked to stop and never
    /// blocks delivery to the others.
    pub fn broadcast(&self, data: &[u8]) {
        let snapshot: Vec<Arc<Session>> = self.clients.lock().clone();
        for client in snapshot {
            if client.send(data).is_err() {
                log::debug!("{}: dropping frame for {}", self.name, client.peer());
                client.request_stop();
            }
        }
    }

    fn register_client(&self, session: &Arc<Session>) {
        let mut clients = self.clients.lock();
        clients.push(Arc::clone(session));
        log::debug!(
            "{}: registered client {} (#clients: {})",
            self.name,
            session.peer(),
            clients.len()
        );
    }

    pub(crate) fn unregister_client(&self, session: &Arc<Session>) {
        let mut clients = self.clients.lock();
        if let Some(pos) = clients.iter().position(|c| Arc::ptr_eq(c, session)) {
            clients.remove(pos);
            log::debug!(
                "{}: unregistered client {} (#clients: {})",
                self.name,
                session.peer(),
                clients.len()
            );
        }
    }

    fn accept_loop(&self, listener: TcpListener) {
        log::debug!("{}: accept loop running", self.name);

        while !self.shutdown.load(Ordering::Relaxed) {
            match listener.accept() {
                Ok((stream, peer)) => {
                    log::info!("{}: accepted client connection from {}", self.name, peer);
                    if let Err(e) = self.spawn_session(stream, peer) {
                        log::error!("{}: session setup for {} failed: {}", self.name, peer, e);
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) => {
                    log::error!("{}: accept failed: {}", self.name, e);
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
            }
        }

        log::debug!("{}: accept loop terminated", self.name);
    }

    fn spawn_session(&self, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        // The listener is non-blocking; session sockets must not be
        stream.set_nonblocking(false)?;

        let writer = stream.try_clone()?;
        writer.set_write_timeout(Some(WRITE_TIMEOUT))?;

        let session_shutdown = Arc::new(AtomicBool::new(false));
        let session = Arc::new(Session::new(writer, peer, Arc::clone(&session_shutdown)));
        self.register_client(&session);

        let mut handler = (self.factory)();
        let server_weak = self.self_ref.lock().clone();
        let session_weak = Arc::downgrade(&session);
        let thread_name = format!("{}-session", self.name);

        let handle = thread::Builder::new().name(thread_name).spawn(move || {
            match Connection::new(stream, peer, session_shutdown) {
                Ok(mut conn) => {
                    if let Err(e) = handler.run(&mut conn) {
                        log::debug!("session {}: handler exited with error: {}", peer, e);
                    }
                    conn.close();
                }
                Err(e) => log::error!("session {}: setup failed: {}", peer, e),
            }

            if let (Some(server), Some(session)) = (server_weak.upgrade(), session_weak.upgrade())
            {
                server.unregister_client(&session);
            }
            log::debug!("session {} terminated", peer);
        });

        match handle {
            Ok(handle) => {
                session.attach_thread(handle);
                Ok(())
            }
            Err(e) => {
                self.unregister_client(&session);
                Err(Error::Io(e))
            }
        }
    }
}

impl Controller for TcpServer {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&self) -> Result<()> {
        if self.accept_thread.lock().is_some() {
            return Err(Error::AlreadyStarted(self.name.clone()));
        }

        log::debug!("{}: starting up on {}", self.name, self.bind_addr);
        let listener = TcpListener::bind(self.bind_addr)?;
        listener.set_nonblocking(true)?;
        *self.local_addr.lock() = Some(listener.local_addr()?);
        self.shutdown.store(false, Ordering::Relaxed);

        let server = self
            .self_ref
            .lock()
            .upgrade()
            .ok_or_else(|| Error::Other("listener self reference lost".to_string()))?;
        let handle = thread::Builder::new()
            .name(format!("{}-accept", self.name))
            .spawn(move || server.accept_loop(listener))?;
        *self.accept_thread.lock() = Some(handle);

        log::info!(
            "{}: listening on {}",
            self.name,
            self.local_addr().unwrap_or(self.bind_addr)
        );
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        log::debug!("{}: stopping", self.name);
        self.shutdown.store(true, Ordering::Relaxed);

        if let Some(handle) = self.accept_thread.lock().take() {
            let _ = handle.join();
        }

        // Snapshot under the lock, join outside it: each session stop
        // blocks until that session's thread has exited.
        let clients: Vec<Arc<Session>> = self.clients.lock().clone();
        for client in clients {
            client.stop();
        }

        log::debug!("{}: stopped", self.name);
        Ok(())
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

/// Handler for clients that only consume pushed frames (camera stream
/// subscribers): discard anything they send, exit on EOF.
pub struct DrainHandler;

impl SessionHandler for DrainHandler {
    fn run(&mut self, conn: &mut Connection) -> Result<()> {
        while conn.recv(1).is_some() {}
        Ok(())
    }
}
