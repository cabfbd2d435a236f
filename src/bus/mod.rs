//! Shared addressed-bus abstraction
//!
//! A `BusController` owns a cache of [`Slave`] handles keyed by bus address.
//! Slaves are created lazily on first access through a backend-specific
//! factory; the whole check-then-create sequence runs under one lock so two
//! concurrent callers asking for the same address never construct two
//! slaves. A closed slave unregisters itself from its owner and is never
//! reused.
//!
//! Backend I/O failures stop at the slave boundary: they are logged and
//! surfaced as empty/zero results, because the command protocol has no
//! in-band error channel and callers must tolerate degraded data rather
//! than lose the session.

pub mod fake;

pub use fake::FakeBusBackend;

use crate::error::Result;
use crate::registry::Controller;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// Raw transaction channel to one device, produced by a [`BusBackend`]
pub trait SlaveChannel: Send {
    fn write(&mut self, data: &[u8]) -> Result<()>;

    fn read(&mut self, len: usize) -> Result<Vec<u8>>;

    /// Combined write-then-read transaction (single bus stop)
    fn write_read(&mut self, request: &[u8], read_len: usize) -> Result<Vec<u8>>;

    /// Release the underlying device handle
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Backend-specific slave factory
pub trait BusBackend: Send + Sync {
    fn create_slave(&self, address: u8) -> Result<Box<dyn SlaveChannel>>;
}

/// One device at one bus address, cached by its owning [`BusController`]
pub struct Slave {
    owner: Weak<BusController>,
    address: u8,
    /// None once closed; a closed slave returns empty results
    channel: Mutex<Option<Box<dyn SlaveChannel>>>,
}

impl Slave {
    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn is_closed(&self) -> bool {
        self.channel.lock().is_none()
    }

    /// Write raw bytes; failures are logged and dropped
    pub fn write(&self, data: &[u8]) {
        let mut channel = self.channel.lock();
        match channel.as_mut() {
            Some(ch) => {
                if let Err(e) = ch.write(data) {
                    log::error!("slave {:#04x} write failed: {}", self.address, e);
                }
            }
            None => log::warn!("slave {:#04x} write after close", self.address),
        }
    }

    /// Read up to `len` bytes; failures yield an empty result
    pub fn read(&self, len: usize) -> Vec<u8> {
        let mut channel = self.channel.lock();
        match channel.as_mut() {
            Some(ch) => match ch.read(len) {
                Ok(data) => data,
                Err(e) => {
                    log::error!("slave {:#04x} read failed: {}", self.address, e);
                    Vec::new()
                }
            },
            None => {
                log::warn!("slave {:#04x} read after close", self.address);
                Vec::new()
            }
        }
    }

    /// Write-then-read transaction; failures yield an empty result
    pub fn write_read(&self, request: &[u8], read_len: usize) -> Vec<u8> {
        let mut channel = self.channel.lock();
        match channel.as_mut() {
            Some(ch) => match ch.write_read(request, read_len) {
                Ok(data) => data,
                Err(e) => {
                    log::error!("slave {:#04x} write_read failed: {}", self.address, e);
                    Vec::new()
                }
            },
            None => {
                log::warn!("slave {:#04x} write_read after close", self.address);
                Vec::new()
            }
        }
    }

    /// Write one byte to a register
    pub fn write_reg_byte(&self, reg: u8, value: u8) {
        self.write(&[reg, value]);
    }

    /// Write a little-endian word to a register
    pub fn write_reg_word(&self, reg: u8, value: u16) {
        let bytes = value.to_le_bytes();
        self.write(&[reg, bytes[0], bytes[1]]);
    }

    /// Read one register byte (0 on any failure)
    pub fn read_reg_byte(&self, reg: u8) -> u8 {
        self.write_read(&[reg], 1).first().copied().unwrap_or(0)
    }

    /// Close the channel and unregister this slave from its owner.
    /// Idempotent; after close, `get_slave` on the same address creates a
    /// fresh instance.
    pub fn close(self: &Arc<Self>) {
        let channel = self.channel.lock().take();
        match channel {
            Some(mut ch) => {
                if let Err(e) = ch.close() {
                    log::error!("slave {:#04x} close failed: {}", self.address, e);
                }
                if let Some(owner) = self.owner.upgrade() {
                    owner.remove_slave(self);
                }
                log::debug!("slave {:#04x} closed", self.address);
            }
            None => log::debug!("slave {:#04x} already closed", self.address),
        }
    }
}

/// Lazily-populated slave cache over a [`BusBackend`]
pub struct BusController {
    name: String,
    backend: Box<dyn BusBackend>,
    slaves: Mutex<HashMap<u8, Arc<Slave>>>,
}

impl BusController {
    pub fn new(name: &str, backend: Box<dyn BusBackend>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            backend,
            slaves: Mutex::new(HashMap::new()),
        })
    }

    /// Get the cached slave for `address`, creating it if absent.
    ///
    /// The lookup and the factory call run under the controller lock, so at
    /// most one slave ever exists per address. A failed factory call is not
    /// cached and returns None.
    pub fn get_slave(self: &Arc<Self>, address: u8) -> Option<Arc<Slave>> {
        let mut slaves = self.slaves.lock();
        if let Some(slave) = slaves.get(&address) {
            return Some(Arc::clone(slave));
        }

        match self.backend.create_slave(address) {
            Ok(channel) => {
                let slave = Arc::new(Slave {
                    owner: Arc::downgrade(self),
                    address,
                    channel: Mutex::new(Some(channel)),
                });
                slaves.insert(address, Arc::clone(&slave));
                log::debug!("{}: created slave {:#04x}", self.name, address);
                Some(slave)
            }
            Err(e) => {
                log::error!("{}: creating slave {:#04x} failed: {}", self.name, address, e);
                None
            }
        }
    }

    /// Remove `slave` from the cache if it is the cached instance for its
    /// address. Called by [`Slave::close`].
    pub fn remove_slave(&self, slave: &Arc<Slave>) {
        let mut slaves = self.slaves.lock();
        if let Some(cached) = slaves.get(&slave.address) {
            if Arc::ptr_eq(cached, slave) {
                slaves.remove(&slave.address);
                log::debug!("{}: removed slave {:#04x}", self.name, slave.address);
            }
        }
    }

    /// Resolve the slave and write; logs and drops the request when the
    /// slave is unavailable
    pub fn write(self: &Arc<Self>, address: u8, data: &[u8]) {
        match self.get_slave(address) {
            Some(slave) => slave.write(data),
            None => log::error!("{}: write: slave {:#04x} not available", self.name, address),
        }
    }

    /// Resolve the slave and read; a missing slave yields a zero-length
    /// result
    pub fn read(self: &Arc<Self>, address: u8, len: usize) -> Vec<u8> {
        match self.get_slave(address) {
            Some(slave) => slave.read(len),
            None => {
                log::error!("{}: read: slave {:#04x} not available", self.name, address);
                Vec::new()
            }
        }
    }

    /// Number of live cached slaves (diagnostics and tests)
    pub fn slave_count(&self) -> usize {
        self.slaves.lock().len()
    }
}

impl Controller for BusController {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&self) -> Result<()> {
        Ok(())
    }

    /// Close every cached slave. The snapshot is taken under the lock and
    /// the close calls happen outside it, since `Slave::close` re-acquires
    /// the cache lock to unregister itself.
    fn stop(&self) -> Result<()> {
        let snapshot: Vec<Arc<Slave>> = self.slaves.lock().values().cloned().collect();
        for slave in &snapshot {
            log::debug!("{}: closing slave {:#04x}", self.name, slave.address());
            slave.close();
        }
        self.slaves.lock().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    /// Counts factory invocations; channels echo their creation index
    struct CountingBackend {
        created: AtomicUsize,
        fail_address: Option<u8>,
    }

    impl CountingBackend {
        fn new() -> Self {
            Self {
                created: AtomicUsize::new(0),
                fail_address: None,
            }
        }
    }

    struct CountingChannel {
        closed: bool,
    }

    impl SlaveChannel for CountingChannel {
        fn write(&mut self, _data: &[u8]) -> Result<()> {
            Ok(())
        }

        fn read(&mut self, len: usize) -> Result<Vec<u8>> {
            Ok(vec![0xAB; len])
        }

        fn write_read(&mut self, _request: &[u8], read_len: usize) -> Result<Vec<u8>> {
            Ok(vec![0xCD; read_len])
        }

        fn close(&mut self) -> Result<()> {
            self.closed = true;
            Ok(())
        }
    }

    impl BusBackend for CountingBackend {
        fn create_slave(&self, address: u8) -> Result<Box<dyn SlaveChannel>> {
            if self.fail_address == Some(address) {
                return Err(crate::error::Error::SlaveNotAvailable(address));
            }
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(CountingChannel { closed: false }))
        }
    }

    fn counting_bus() -> (Arc<BusController>, Arc<CountingBackend>) {
        // Share the count through a second Arc wrapped in a forwarding backend
        struct Forward(Arc<CountingBackend>);
        impl BusBackend for Forward {
            fn create_slave(&self, address: u8) -> Result<Box<dyn SlaveChannel>> {
                self.0.create_slave(address)
            }
        }
        let backend = Arc::new(CountingBackend::new());
        let bus = BusController::new("test-bus", Box::new(Forward(Arc::clone(&backend))));
        (bus, backend)
    }

    #[test]
    fn concurrent_get_slave_creates_exactly_one() {
        let (bus, backend) = counting_bus();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let bus = Arc::clone(&bus);
            handles.push(thread::spawn(move || {
                bus.get_slave(0x40).expect("slave must exist")
            }));
        }

        let slaves: Vec<Arc<Slave>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(backend.created.load(Ordering::SeqCst), 1);
        for s in &slaves[1..] {
            assert!(Arc::ptr_eq(&slaves[0], s));
        }
    }

    #[test]
    fn closed_slave_is_replaced_by_a_new_instance() {
        let (bus, backend) = counting_bus();

        let first = bus.get_slave(0x40).unwrap();
        first.close();
        assert!(first.is_closed());
        assert_eq!(bus.slave_count(), 0);

        let second = bus.get_slave(0x40).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(backend.created.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn close_is_idempotent() {
        let (bus, _) = counting_bus();
        let slave = bus.get_slave(0x40).unwrap();
        slave.close();
        slave.close();
        assert_eq!(bus.slave_count(), 0);
    }

    #[test]
    fn closed_slave_yields_empty_results() {
        let (bus, _) = counting_bus();
        let slave = bus.get_slave(0x40).unwrap();
        slave.close();
        assert!(slave.read(4).is_empty());
        assert!(slave.write_read(&[0x00], 2).is_empty());
        slave.write(&[1, 2, 3]);
    }

    #[test]
    fn failed_factory_is_not_cached() {
        struct Failing;
        impl BusBackend for Failing {
            fn create_slave(&self, address: u8) -> Result<Box<dyn SlaveChannel>> {
                Err(crate::error::Error::SlaveNotAvailable(address))
            }
        }
        let bus = BusController::new("test-bus", Box::new(Failing));
        assert!(bus.get_slave(0x40).is_none());
        assert_eq!(bus.slave_count(), 0);
    }

    #[test]
    fn convenience_read_on_missing_slave_is_empty() {
        struct Failing;
        impl BusBackend for Failing {
            fn create_slave(&self, address: u8) -> Result<Box<dyn SlaveChannel>> {
                Err(crate::error::Error::SlaveNotAvailable(address))
            }
        }
        let bus = BusController::new("test-bus", Box::new(Failing));
        assert!(bus.read(0x40, 16).is_empty());
        bus.write(0x40, &[1, 2, 3]);
    }

    #[test]
    fn stop_closes_and_clears_all_slaves() {
        let (bus, _) = counting_bus();
        let a = bus.get_slave(0x40).unwrap();
        let b = bus.get_slave(0x41).unwrap();
        assert_eq!(bus.slave_count(), 2);

        bus.stop().unwrap();
        assert_eq!(bus.slave_count(), 0);
        assert!(a.is_closed());
        assert!(b.is_closed());
    }
}
