//! Per-connection session
//!
//! A [`Session`] is the handle the listener keeps: peer address, a cloned
//! write half for outbound pushes (command replies and stream frames share
//! the socket), its shutdown flag, and the dispatch thread's join handle.
//! The [`Connection`] is owned by the session thread itself and carries the
//! receive buffer with the exact-`n` `recv` semantics the dispatcher needs.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Socket read timeout; bounds every blocking read so the loop can check
/// the shutdown flag
pub const READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Socket read chunk size
const RECV_CHUNK: usize = 10240;

/// Protocol logic run on a session's thread
pub trait SessionHandler: Send {
    /// Process commands until EOF or shutdown. Returning an error counts
    /// as a transport failure and ends the session like EOF.
    fn run(&mut self, conn: &mut Connection) -> Result<()>;
}

/// The session thread's view of its socket
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    buffer: Vec<u8>,
    shutdown: Arc<AtomicBool>,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr, shutdown: Arc<AtomicBool>) -> Result<Self> {
        stream.set_read_timeout(Some(READ_TIMEOUT))?;
        Ok(Self {
            stream,
            peer,
            buffer: Vec::with_capacity(RECV_CHUNK),
            shutdown,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Receive exactly `n` bytes.
    ///
    /// Drains the internal buffer first, then reads from the socket until
    /// `n` bytes are available. A read timeout means "retry"; EOF,
    /// transport errors, or a shutdown request yield None.
    pub fn recv(&mut self, n: usize) -> Option<Vec<u8>> {
        while !self.is_shutdown() {
            if self.buffer.len() >= n {
                let rest = self.buffer.split_off(n);
                return Some(std::mem::replace(&mut self.buffer, rest));
            }

            let mut chunk = [0u8; RECV_CHUNK];
            match self.stream.read(&mut chunk) {
                Ok(0) => return None,
                Ok(m) => self.buffer.extend_from_slice(&chunk[..m]),
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(e) => {
                    log::debug!("{}: recv failed: {}", self.peer, e);
                    return None;
                }
            }
        }
        None
    }

    /// Write a reply to the peer
    pub fn send(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data)?;
        Ok(())
    }

    /// Shut the socket down both ways. Safe to call after the peer has
    /// already disconnected.
    pub fn close(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

/// Listener-side handle for one connected client
pub struct Session {
    peer: SocketAddr,
    /// Cloned socket handle for pushes from other threads (stream frames)
    writer: Mutex<TcpStream>,
    shutdown: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    pub fn new(writer: TcpStream, peer: SocketAddr, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            peer,
            writer: Mutex::new(writer),
            shutdown,
            thread: Mutex::new(None),
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub(crate) fn attach_thread(&self, handle: JoinHandle<()>) {
        *self.thread.lock() = Some(handle);
    }

    /// Push bytes to this client, best effort
    pub fn send(&self, data: &[u8]) -> Result<()> {
        self.writer
            .lock()
            .write_all(data)
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Ask the session thread to exit without waiting for it
    pub fn request_stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Stop the session and block until its thread has exited.
    /// Must not be called from the session's own thread.
    pub fn stop(&self) {
        log::debug!("stopping session {}", self.peer);
        self.request_stop();
        // Nudge the peer-facing socket so a blocked write unblocks too
        let _ = self.writer.lock().shutdown(Shutdown::Both);
        if let Some(thread) = self.thread.lock().take() {
            let _ = thread.join();
        }
        log::debug!("session {} stopped", self.peer);
    }
}
