//! Digital I/O ports

use crate::error::Result;
use crate::registry::Controller;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Multi-pin digital I/O controller (GPIO chip or fake)
pub trait DigitalBackend: Send + Sync {
    fn set(&self, port: u8, state: bool) -> Result<()>;

    fn get(&self, port: u8) -> Result<bool>;
}

/// One digital port bound to a backend pin
pub struct DigitalPort {
    backend: Arc<dyn DigitalBackend>,
    port: u8,
}

impl DigitalPort {
    pub fn new(backend: Arc<dyn DigitalBackend>, port: u8) -> Self {
        Self { backend, port }
    }

    pub fn port(&self) -> u8 {
        self.port
    }

    pub fn set(&self, state: bool) -> Result<()> {
        self.backend.set(self.port, state)
    }

    pub fn get(&self) -> Result<bool> {
        self.backend.get(self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Input,
    Output,
}

#[derive(Debug, Clone, Copy)]
struct PinState {
    direction: Direction,
    level: bool,
}

/// In-memory digital controller for hardware-free deployments.
///
/// Tracks pin direction changes the way a GPIO chip driver would, and
/// remembers the last level written so set/get round-trips behave.
pub struct FakeDigitalController {
    pins: Mutex<HashMap<u8, PinState>>,
}

impl FakeDigitalController {
    pub fn new() -> Self {
        Self {
            pins: Mutex::new(HashMap::new()),
        }
    }

    fn ensure_direction(&self, port: u8, direction: Direction) {
        let mut pins = self.pins.lock();
        let pin = pins.entry(port).or_insert(PinState {
            direction,
            level: false,
        });
        if pin.direction != direction {
            log::debug!("fake digital: port {} direction -> {:?}", port, direction);
            pin.direction = direction;
        }
    }
}

impl Default for FakeDigitalController {
    fn default() -> Self {
        Self::new()
    }
}

impl DigitalBackend for FakeDigitalController {
    fn set(&self, port: u8, state: bool) -> Result<()> {
        self.ensure_direction(port, Direction::Output);
        log::debug!("fake digital: set port={} state={}", port, state);
        if let Some(pin) = self.pins.lock().get_mut(&port) {
            pin.level = state;
        }
        Ok(())
    }

    fn get(&self, port: u8) -> Result<bool> {
        self.ensure_direction(port, Direction::Input);
        let level = self
            .pins
            .lock()
            .get(&port)
            .map(|p| p.level)
            .unwrap_or(false);
        log::debug!("fake digital: get port={} => {}", port, level);
        Ok(level)
    }
}

impl Controller for FakeDigitalController {
    fn name(&self) -> &str {
        "fake-digital"
    }

    fn start(&self) -> Result<()> {
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let backend = Arc::new(FakeDigitalController::new());
        let port = DigitalPort::new(backend, 3);

        port.set(true).unwrap();
        assert!(port.get().unwrap());

        port.set(false).unwrap();
        assert!(!port.get().unwrap());
    }

    #[test]
    fn unset_port_reads_low() {
        let backend = Arc::new(FakeDigitalController::new());
        let port = DigitalPort::new(backend, 9);
        assert!(!port.get().unwrap());
    }

    #[test]
    fn ports_are_independent() {
        let backend = Arc::new(FakeDigitalController::new());
        let a = DigitalPort::new(Arc::clone(&backend) as Arc<dyn DigitalBackend>, 0);
        let b = DigitalPort::new(backend, 1);
        a.set(true).unwrap();
        assert!(a.get().unwrap());
        assert!(!b.get().unwrap());
    }
}
