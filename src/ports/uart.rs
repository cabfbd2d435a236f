//! UART channels exposed through the command protocol

use crate::error::Result;
use crate::registry::Controller;
use parking_lot::Mutex;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::time::Duration;

/// Byte channel capability the dispatcher drives (uart0..uart2)
pub trait SerialChannel: Send + Sync {
    fn write(&self, data: &[u8]) -> Result<()>;

    /// Read up to `max_len` bytes; returns whatever is available within the
    /// channel's read timeout, possibly nothing
    fn read(&self, max_len: usize) -> Result<Vec<u8>>;

    /// Bytes buffered for reading
    fn available(&self) -> Result<usize>;

    fn set_baud_rate(&self, baud: u32) -> Result<()>;
}

/// Serial device channel
pub struct SerialPortChannel {
    name: String,
    port: Mutex<Box<dyn SerialPort>>,
}

impl SerialPortChannel {
    /// Open a serial device at 8N1 with a short read timeout
    pub fn open(path: &str, baud_rate: u32) -> Result<Self> {
        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(100))
            .open()?;

        log::info!("opened serial port: {} at {} baud", path, baud_rate);

        Ok(Self {
            name: path.to_string(),
            port: Mutex::new(port),
        })
    }
}

impl SerialChannel for SerialPortChannel {
    fn write(&self, data: &[u8]) -> Result<()> {
        let mut port = self.port.lock();
        port.write_all(data)?;
        port.flush()?;
        Ok(())
    }

    fn read(&self, max_len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; max_len];
        let mut port = self.port.lock();
        match port.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn available(&self) -> Result<usize> {
        Ok(self.port.lock().bytes_to_read()? as usize)
    }

    fn set_baud_rate(&self, baud: u32) -> Result<()> {
        log::debug!("{}: baud rate -> {}", self.name, baud);
        self.port.lock().set_baud_rate(baud)?;
        Ok(())
    }
}

impl Controller for SerialPortChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&self) -> Result<()> {
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        Ok(())
    }
}

/// Loopback channel: writes become readable, like a wired-back UART
pub struct LoopbackSerialChannel {
    buffer: Mutex<VecDeque<u8>>,
    baud: Mutex<u32>,
}

impl LoopbackSerialChannel {
    pub fn new() -> Self {
        Self {
            buffer: Mutex::new(VecDeque::new()),
            baud: Mutex::new(9600),
        }
    }

    pub fn baud_rate(&self) -> u32 {
        *self.baud.lock()
    }
}

impl Default for LoopbackSerialChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialChannel for LoopbackSerialChannel {
    fn write(&self, data: &[u8]) -> Result<()> {
        self.buffer.lock().extend(data.iter().copied());
        Ok(())
    }

    fn read(&self, max_len: usize) -> Result<Vec<u8>> {
        let mut buffer = self.buffer.lock();
        let n = max_len.min(buffer.len());
        Ok(buffer.drain(..n).collect())
    }

    fn available(&self) -> Result<usize> {
        Ok(self.buffer.lock().len())
    }

    fn set_baud_rate(&self, baud: u32) -> Result<()> {
        *self.baud.lock() = baud;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_echoes_writes() {
        let chan = LoopbackSerialChannel::new();
        chan.write(b"hello").unwrap();
        assert_eq!(chan.available().unwrap(), 5);
        assert_eq!(chan.read(3).unwrap(), b"hel");
        assert_eq!(chan.read(10).unwrap(), b"lo");
        assert!(chan.read(4).unwrap().is_empty());
    }

    #[test]
    fn loopback_tracks_baud() {
        let chan = LoopbackSerialChannel::new();
        chan.set_baud_rate(115200).unwrap();
        assert_eq!(chan.baud_rate(), 115200);
    }
}
