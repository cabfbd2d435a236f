//! 8x8 thermal array frame source
//!
//! Drives a grid thermal sensor over the addressed bus: a handful of
//! control registers at init, then one two-byte word per pixel per frame.
//! Raw pixel words are 12-bit two's complement in units of 0.25 degrees C.

use crate::bus::{BusController, Slave};
use crate::error::{Error, Result};
use crate::net::TcpServer;
use crate::protocol::framing::encode_sensor_frame;
use crate::streaming::{FrameProducer, StreamWorker};
use std::sync::Arc;

pub const GRID_WIDTH: u16 = 8;
pub const GRID_HEIGHT: u16 = 8;
const PIXEL_COUNT: usize = (GRID_WIDTH as usize) * (GRID_HEIGHT as usize);

/// Power control register; zero selects normal mode
const REG_POWER: u8 = 0x00;
/// Reset register
const REG_RESET: u8 = 0x01;
/// Frame rate register; zero selects the 10 fps mode
const REG_FRAME_RATE: u8 = 0x02;
/// Interrupt control register; zero disables the INT output
const REG_INT_CONTROL: u8 = 0x03;
/// Low byte of pixel 0; each pixel occupies two registers
const REG_PIXEL_BASE: u8 = 0x80;

const POWER_NORMAL: u8 = 0x00;
const RESET_INITIAL: u8 = 0x3F;
const FRAME_RATE_10FPS: u8 = 0x00;
const INT_DISABLED: u8 = 0x00;

/// Converts one raw pixel word to degrees C.
fn raw_to_celsius(lo: u8, hi: u8) -> f32 {
    let raw = u16::from(lo) | (u16::from(hi) << 8);
    let signed = i32::from(raw) - 4096 * i32::from((hi >> 3) & 1);
    signed as f32 * 0.25
}

/// One grid thermal sensor behind a bus slave.
pub struct ThermalArray {
    slave: Arc<Slave>,
}

impl ThermalArray {
    pub fn new(slave: Arc<Slave>) -> Self {
        Self { slave }
    }

    /// Program normal mode, full reset, interrupts off, 10 fps, then read
    /// the readable registers back and warn on mismatch. The reset register
    /// is write-only and is not verified.
    pub fn init(&self) {
        self.slave.write_reg_byte(REG_POWER, POWER_NORMAL);
        self.slave.write_reg_byte(REG_RESET, RESET_INITIAL);
        self.slave.write_reg_byte(REG_INT_CONTROL, INT_DISABLED);
        self.slave.write_reg_byte(REG_FRAME_RATE, FRAME_RATE_10FPS);

        for (reg, expected) in [
            (REG_POWER, POWER_NORMAL),
            (REG_INT_CONTROL, INT_DISABLED),
            (REG_FRAME_RATE, FRAME_RATE_10FPS),
        ] {
            let actual = self.slave.read_reg_byte(reg);
            if actual != expected {
                log::warn!(
                    "thermal register {:#04x}: expected {:#04x}, read {:#04x}",
                    reg,
                    expected,
                    actual
                );
            }
        }
    }

    /// Read all 64 pixels in scan order. A short or failed pixel read
    /// yields 0.0 for that pixel.
    pub fn read_pixels(&self) -> Vec<f32> {
        let mut pixels = Vec::with_capacity(PIXEL_COUNT);
        for px in 0..PIXEL_COUNT {
            let reg = REG_PIXEL_BASE + ((px as u8) << 1);
            let word = self.slave.write_read(&[reg], 2);
            if word.len() == 2 {
                pixels.push(raw_to_celsius(word[0], word[1]));
            } else {
                pixels.push(0.0);
            }
        }
        pixels
    }
}

struct ThermalProducer {
    array: ThermalArray,
}

impl FrameProducer for ThermalProducer {
    fn next_frame(&mut self) -> Result<Vec<u8>> {
        let pixels = self.array.read_pixels();
        Ok(encode_sensor_frame(GRID_WIDTH, GRID_HEIGHT, &pixels))
    }
}

/// Builds the stream worker pushing sensor frames from the thermal array
/// at `address` on `bus` to every client of `server`.
pub fn thermal_stream(
    bus: &Arc<BusController>,
    address: u8,
    fps: f64,
    server: Arc<TcpServer>,
) -> Result<Arc<StreamWorker>> {
    let slave = bus
        .get_slave(address)
        .ok_or(Error::SlaveNotAvailable(address))?;
    let array = ThermalArray::new(slave);
    array.init();
    Ok(StreamWorker::new(
        "thermal-stream",
        fps,
        server,
        Box::new(ThermalProducer { array }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_conversion_handles_both_signs() {
        // +25.0 C: raw 100
        assert_eq!(raw_to_celsius(100, 0), 25.0);
        // -0.25 C: raw 0xFFF
        assert_eq!(raw_to_celsius(0xFF, 0x0F), -0.25);
        // -5.0 C: raw 4096 - 20 = 0xFEC
        assert_eq!(raw_to_celsius(0xEC, 0x0F), -5.0);
        assert_eq!(raw_to_celsius(0, 0), 0.0);
    }

    #[test]
    fn pixel_registers_stay_in_range() {
        let last = REG_PIXEL_BASE as usize + ((PIXEL_COUNT - 1) << 1);
        assert_eq!(last, 0xFE);
    }
}
