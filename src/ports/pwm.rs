//! PWM ports

use crate::error::Result;
use crate::registry::Controller;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Multi-channel PWM controller
pub trait PwmBackend: Send + Sync {
    /// Duty cycle in percent (0-100)
    fn set_duty_cycle(&self, port: u8, percent: u8) -> Result<()>;
}

/// One PWM channel bound to a backend
pub struct PwmPort {
    backend: Arc<dyn PwmBackend>,
    port: u8,
}

impl PwmPort {
    pub fn new(backend: Arc<dyn PwmBackend>, port: u8) -> Self {
        Self { backend, port }
    }

    pub fn port(&self) -> u8 {
        self.port
    }

    pub fn set_duty_cycle(&self, percent: u8) -> Result<()> {
        self.backend.set_duty_cycle(self.port, percent)
    }
}

/// Records the last duty cycle per channel
pub struct FakePwmController {
    duty: Mutex<HashMap<u8, u8>>,
}

impl FakePwmController {
    pub fn new() -> Self {
        Self {
            duty: Mutex::new(HashMap::new()),
        }
    }

    /// Last duty cycle set for `port`, if any
    pub fn last_duty(&self, port: u8) -> Option<u8> {
        self.duty.lock().get(&port).copied()
    }
}

impl Default for FakePwmController {
    fn default() -> Self {
        Self::new()
    }
}

impl PwmBackend for FakePwmController {
    fn set_duty_cycle(&self, port: u8, percent: u8) -> Result<()> {
        log::debug!("fake pwm: port={} duty={}%", port, percent);
        self.duty.lock().insert(port, percent);
        Ok(())
    }
}

impl Controller for FakePwmController {
    fn name(&self) -> &str {
        "fake-pwm"
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
    fn duty_cycle_is_recorded_per_port() {
        let backend = Arc::new(FakePwmController::new());
        let p0 = PwmPort::new(Arc::clone(&backend) as Arc<dyn PwmBackend>, 0);
        let p1 = PwmPort::new(Arc::clone(&backend) as Arc<dyn PwmBackend>, 1);

        p0.set_duty_cycle(25).unwrap();
        p1.set_duty_cycle(80).unwrap();

        assert_eq!(backend.last_duty(0), Some(25));
        assert_eq!(backend.last_duty(1), Some(80));
        assert_eq!(backend.last_duty(2), None);
    }
}
