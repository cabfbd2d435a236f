//! Fake bus backend for hardware-free deployments
//!
//! Writes are logged and discarded; reads return zero-filled buffers of the
//! requested length, or small randomized values when the backend is
//! constructed noisy (keeps streaming sources visually alive in mock mode).

use super::{BusBackend, SlaveChannel};
use crate::error::Result;
use rand::Rng;

/// Backend whose slaves always exist and never fail
pub struct FakeBusBackend {
    noisy: bool,
}

impl FakeBusBackend {
    pub fn new() -> Self {
        Self { noisy: false }
    }

    /// Reads produce randomized low bytes instead of zeros
    pub fn noisy() -> Self {
        Self { noisy: true }
    }
}

impl Default for FakeBusBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl BusBackend for FakeBusBackend {
    fn create_slave(&self, address: u8) -> Result<Box<dyn SlaveChannel>> {
        log::debug!("fake bus: opened slave {:#04x}", address);
        Ok(Box::new(FakeSlaveChannel {
            address,
            noisy: self.noisy,
        }))
    }
}

struct FakeSlaveChannel {
    address: u8,
    noisy: bool,
}

impl FakeSlaveChannel {
    fn fill(&self, len: usize) -> Vec<u8> {
        if self.noisy {
            let mut rng = rand::thread_rng();
            (0..len).map(|_| rng.gen_range(0..16)).collect()
        } else {
            vec![0; len]
        }
    }
}

impl SlaveChannel for FakeSlaveChannel {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        log::debug!("fake slave {:#04x}: write {:02x?}", self.address, data);
        Ok(())
    }

    fn read(&mut self, len: usize) -> Result<Vec<u8>> {
        log::debug!("fake slave {:#04x}: read {} bytes", self.address, len);
        Ok(self.fill(len))
    }

    fn write_read(&mut self, request: &[u8], read_len: usize) -> Result<Vec<u8>> {
        log::debug!(
            "fake slave {:#04x}: write_read req={:02x?} len={}",
            self.address,
            request,
            read_len
        );
        Ok(self.fill(read_len))
    }

    fn close(&mut self) -> Result<()> {
        log::debug!("fake slave {:#04x}: closed", self.address);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_are_zero_filled() {
        let backend = FakeBusBackend::new();
        let mut slave = backend.create_slave(0x68).unwrap();
        assert_eq!(slave.read(4).unwrap(), vec![0, 0, 0, 0]);
        assert_eq!(slave.write_read(&[0x80], 2).unwrap(), vec![0, 0]);
        slave.write(&[1, 2, 3]).unwrap();
    }

    #[test]
    fn noisy_reads_have_requested_length() {
        let backend = FakeBusBackend::noisy();
        let mut slave = backend.create_slave(0x68).unwrap();
        assert_eq!(slave.read(8).unwrap().len(), 8);
    }
}
