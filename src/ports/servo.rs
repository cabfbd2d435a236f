//! Servo ports
//!
//! A servo port converts a position in degrees to the pulse width its
//! controller drives, clamped to the servo's calibrated min/max pulse. The
//! protocol's position byte semantics (0 = release, v = degrees v-1) live
//! in the dispatcher; this layer deals in degrees.

use crate::error::Result;
use crate::registry::Controller;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Multi-channel servo controller
pub trait ServoBackend: Send + Sync {
    /// Drive the channel to a pulse width in microseconds
    fn set_position_us(&self, port: u8, us: u32) -> Result<()>;

    fn set_speed(&self, port: u8, speed: u8) -> Result<()>;

    /// De-energize the channel
    fn release(&self, port: u8) -> Result<()>;
}

/// One servo bound to a backend channel, with its pulse-width calibration
pub struct ServoPort {
    backend: Arc<dyn ServoBackend>,
    port: u8,
    min_us: u32,
    max_us: u32,
    min_degrees: u32,
    max_degrees: u32,
}

impl ServoPort {
    /// Standard hobby-servo degree range (0-179)
    pub fn new(backend: Arc<dyn ServoBackend>, port: u8, min_us: u32, max_us: u32) -> Self {
        Self {
            backend,
            port,
            min_us,
            max_us,
            min_degrees: 0,
            max_degrees: 179,
        }
    }

    pub fn port(&self) -> u8 {
        self.port
    }

    /// Map degrees to a pulse width inside the calibrated span
    pub fn degrees_to_us(&self, degrees: u32) -> u32 {
        let degrees_span = (self.max_degrees - self.min_degrees) as f64;
        let us_span = (self.max_us - self.min_us) as f64;
        let scaled = (degrees.saturating_sub(self.min_degrees)) as f64 / degrees_span;
        self.min_us + (scaled * us_span) as u32
    }

    pub fn set_position(&self, degrees: u32) -> Result<()> {
        let us = self
            .degrees_to_us(degrees)
            .clamp(self.min_us, self.max_us);
        self.backend.set_position_us(self.port, us)
    }

    pub fn set_speed(&self, speed: u8) -> Result<()> {
        self.backend.set_speed(self.port, speed)
    }

    pub fn release(&self) -> Result<()> {
        self.backend.release(self.port)
    }
}

/// Last action observed on a fake servo channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServoAction {
    /// Pulse width in microseconds
    Position(u32),
    Speed(u8),
    Released,
}

/// Records the last action per channel
pub struct FakeServoController {
    actions: Mutex<HashMap<u8, ServoAction>>,
}

impl FakeServoController {
    pub fn new() -> Self {
        Self {
            actions: Mutex::new(HashMap::new()),
        }
    }

    pub fn last_action(&self, port: u8) -> Option<ServoAction> {
        self.actions.lock().get(&port).copied()
    }
}

impl Default for FakeServoController {
    fn default() -> Self {
        Self::new()
    }
}

impl ServoBackend for FakeServoController {
    fn set_position_us(&self, port: u8, us: u32) -> Result<()> {
        log::debug!("fake servo: port={} position={}us", port, us);
        self.actions.lock().insert(port, ServoAction::Position(us));
        Ok(())
    }

    fn set_speed(&self, port: u8, speed: u8) -> Result<()> {
        log::debug!("fake servo: port={} speed={}", port, speed);
        self.actions.lock().insert(port, ServoAction::Speed(speed));
        Ok(())
    }

    fn release(&self, port: u8) -> Result<()> {
        log::debug!("fake servo: port={} released", port);
        self.actions.lock().insert(port, ServoAction::Released);
        Ok(())
    }
}

impl Controller for FakeServoController {
    fn name(&self) -> &str {
        "fake-servo"
    }

    fn start(&self) -> Result<()> {
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        Ok(())
    }
}
