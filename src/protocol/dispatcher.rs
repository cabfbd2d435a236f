//! Command dispatcher
//!
//! Runs the per-session command loop: read one opcode, read its parameter
//! bytes, act on the registry component it addresses, reply where the
//! command defines a reply. Commands addressing a component that is not
//! registered still consume their parameter bytes and answer with zeros so
//! the stream never falls out of step. Unknown opcodes are logged and
//! skipped; only a closed connection ends the loop.

use crate::net::session::{Connection, SessionHandler};
use crate::protocol::{commands, extended, sound};
use crate::protocol::{
    ADC_PORT_COUNT, DIGITAL_PORT_COUNT, FIRMWARE_ID, PING_REPLY, PWM_PORT_COUNT,
    SERVO_PORT_COUNT, UART_CHANNEL_COUNT,
};
use crate::registry::Registry;
use crate::Result;
use std::sync::Arc;

/// Reading used when the core temperature source is unavailable, in
/// millidegrees
const FALLBACK_CPU_TEMP_MILLI: u32 = 37_000;

/// Scale from millidegrees to the raw units clients expect
const CPU_TEMP_SCALE: f64 = 38.209699373057859 / 1000.0;

/// Raw battery reading reported per volt
const BATTERY_UNITS_PER_VOLT: u32 = 258;

/// Battery voltage reported by a gateway with no battery monitor
const BATTERY_VOLTS: u32 = 5;

fn in_range(cmd: u8, base: u8, count: u8) -> Option<u8> {
    if cmd >= base && cmd < base + count {
        Some(cmd - base)
    } else {
        None
    }
}

/// One dispatcher per session; holds no per-command state beyond the
/// registry handle.
pub struct CommandDispatcher {
    registry: Arc<Registry>,
}

impl CommandDispatcher {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    fn handle_extended(&self, conn: &mut Connection) -> Result<bool> {
        let sub = match conn.recv(1) {
            Some(d) => d[0],
            None => return Ok(false),
        };

        match sub {
            extended::SET_LIPO_PROTECTION => {
                let state = match conn.recv(1) {
                    Some(d) => d[0],
                    None => return Ok(false),
                };
                log::debug!("set lipo protection state={}", state);
            }
            extended::SET_BATTERY_MONITOR_VOLTAGE => {
                let raw = match conn.recv(2) {
                    Some(d) => u16::from_le_bytes([d[0], d[1]]),
                    None => return Ok(false),
                };
                log::debug!(
                    "set battery monitor voltage={:.2}",
                    raw as f64 / BATTERY_UNITS_PER_VOLT as f64
                );
            }
            extended::GET_BATTERY_VOLTAGE => {
                let raw = (BATTERY_UNITS_PER_VOLT * BATTERY_VOLTS) as u16;
                conn.send(&raw.to_le_bytes())?;
            }
            extended::GET_CPU_TEMPERATURE => {
                let milli = read_cpu_temp_milli();
                let raw = (milli as f64 * CPU_TEMP_SCALE) as u16;
                conn.send(&raw.to_le_bytes())?;
            }
            extended::SET_I2C_CLOCKSPEED => {
                let clock = match conn.recv(4) {
                    Some(d) => u32::from_le_bytes([d[0], d[1], d[2], d[3]]),
                    None => return Ok(false),
                };
                log::debug!("set bus clock speed={} (ignored)", clock);
            }
            extended::SET_UART_CLOCKSPEED => {
                let (baud_ix, timing) = match (conn.recv(1), conn.recv(2)) {
                    (Some(b), Some(t)) => (b[0], u16::from_le_bytes([t[0], t[1]])),
                    _ => return Ok(false),
                };
                log::debug!(
                    "set uart clock baud_ix={} timing={} (ignored)",
                    baud_ix,
                    timing
                );
            }
            _ => {
                let span = extended::UART_STRIDE * UART_CHANNEL_COUNT;
                if let Some(offset) = in_range(sub, extended::UART_BASE, span) {
                    let channel = offset / extended::UART_STRIDE;
                    let op = offset % extended::UART_STRIDE;
                    return self.handle_uart(conn, channel, op);
                }
                log::warn!("extended command {} not handled", sub);
            }
        }
        Ok(true)
    }

    fn handle_uart(&self, conn: &mut Connection, channel: u8, op: u8) -> Result<bool> {
        let uart = self.registry.uart(&format!("uart{}", channel));

        match op {
            extended::UART_INIT_OFFSET => {
                let baud = match conn.recv(4) {
                    Some(d) => u32::from_le_bytes([d[0], d[1], d[2], d[3]]),
                    None => return Ok(false),
                };
                log::debug!("uart{} init baud={}", channel, baud);
                if let Some(uart) = uart {
                    if let Err(e) = uart.set_baud_rate(baud) {
                        log::error!("uart{}: baud change failed: {}", channel, e);
                    }
                }
            }
            extended::UART_WRITE_OFFSET => {
                let len = match conn.recv(2) {
                    Some(d) => u16::from_le_bytes([d[0], d[1]]) as usize,
                    None => return Ok(false),
                };
                let data = match conn.recv(len) {
                    Some(d) => d,
                    None => return Ok(false),
                };
                log::debug!("uart{} write len={}", channel, len);
                if let Some(uart) = uart {
                    if let Err(e) = uart.write(&data) {
                        log::error!("uart{}: write failed: {}", channel, e);
                    }
                }
            }
            extended::UART_AVAILABLE_OFFSET => {
                let available = match uart {
                    Some(uart) => uart.available().unwrap_or(0),
                    None => 0,
                };
                log::debug!("uart{} available={}", channel, available);
                conn.send(&(available as u16).to_le_bytes())?;
            }
            extended::UART_READ_OFFSET => {
                let len = match conn.recv(2) {
                    Some(d) => u16::from_le_bytes([d[0], d[1]]) as usize,
                    None => return Ok(false),
                };
                let data = match uart {
                    Some(uart) => uart.read(len).unwrap_or_default(),
                    None => Vec::new(),
                };
                log::debug!("uart{} read requested={} got={}", channel, len, data.len());
                // The wire format has no way to say "zero bytes"; an empty
                // read sends nothing and the client is expected to retry.
                if !data.is_empty() {
                    conn.send(&data)?;
                }
            }
            _ => unreachable!("uart op derived from a {}-stride range", extended::UART_STRIDE),
        }
        Ok(true)
    }

    fn handle_sound(&self, conn: &mut Connection) -> Result<bool> {
        let sub = match conn.recv(1) {
            Some(d) => d[0],
            None => return Ok(false),
        };
        let player = self.registry.audio("audio_player");

        match sub {
            sound::INIT_STOP => {
                log::debug!("sound stream init");
                if let Some(player) = player {
                    if let Err(e) = player.stream_stop().and_then(|_| player.stream_init()) {
                        log::error!("audio init failed: {}", e);
                    }
                }
            }
            sound::LOAD => {
                let len = match conn.recv(2) {
                    Some(d) => u16::from_le_bytes([d[0], d[1]]) as usize,
                    None => return Ok(false),
                };
                let chunk = match conn.recv(len) {
                    Some(d) => d,
                    None => return Ok(false),
                };
                log::debug!("sound stream load len={}", len);
                if let Some(player) = player {
                    if let Err(e) = player.stream_load(&chunk) {
                        log::error!("audio load failed: {}", e);
                    }
                }
            }
            sound::PLAY => {
                log::debug!("sound stream play");
                if let Some(player) = player {
                    if let Err(e) = player.stream_play() {
                        log::error!("audio play failed: {}", e);
                    }
                }
            }
            _ => log::warn!("sound command {} not handled", sub),
        }
        Ok(true)
    }

    /// Handle one command; Ok(false) means the connection went away
    /// mid-command.
    fn handle_command(&self, conn: &mut Connection, cmd: u8) -> Result<bool> {
        match cmd {
            commands::PING => {
                log::debug!("ping");
                conn.send(&[PING_REPLY])?;
                return Ok(true);
            }
            commands::EXTENDED => return self.handle_extended(conn),
            commands::SOUND_STREAM => return self.handle_sound(conn),
            commands::GET_FIRMWARE_ID => {
                log::debug!("get firmware id");
                conn.send(&FIRMWARE_ID.to_le_bytes())?;
                return Ok(true);
            }
            commands::I2C_WRITE => {
                let (address, len) = match conn.recv(2) {
                    Some(d) => (d[0] >> 1, d[1] as usize),
                    None => return Ok(false),
                };
                let data = match conn.recv(len) {
                    Some(d) => d,
                    None => return Ok(false),
                };
                log::debug!("bus write addr={:#04x} len={}", address, len);
                if let Some(bus) = self.registry.bus("i2c") {
                    bus.write(address, &data);
                }
                return Ok(true);
            }
            commands::I2C_READ => {
                let (address, len) = match conn.recv(2) {
                    Some(d) => (d[0] >> 1, d[1] as usize),
                    None => return Ok(false),
                };
                log::debug!("bus read addr={:#04x} len={}", address, len);
                let mut data = match self.registry.bus("i2c") {
                    Some(bus) => bus.read(address, len),
                    None => Vec::new(),
                };
                // The reply must be exactly the requested length; the
                // client counts bytes, not frames.
                if data.len() < len {
                    log::warn!("bus read short: requested={} got={}", len, data.len());
                    data.resize(len, 0);
                } else {
                    data.truncate(len);
                }
                conn.send(&data)?;
                return Ok(true);
            }
            _ => {}
        }

        if let Some(port) = in_range(cmd, commands::SET_PWM_BASE, PWM_PORT_COUNT) {
            let duty = match conn.recv(1) {
                Some(d) => d[0],
                None => return Ok(false),
            };
            log::debug!("set pwm port={} duty={}", port, duty);
            if let Some(pwm) = self.registry.pwm(&format!("P{}", port)) {
                if let Err(e) = pwm.set_duty_cycle(duty) {
                    log::error!("P{}: duty change failed: {}", port, e);
                }
            }
        } else if let Some(port) = in_range(cmd, commands::SET_SERVO_SPEED_BASE, SERVO_PORT_COUNT) {
            let speed = match conn.recv(1) {
                Some(d) => d[0],
                None => return Ok(false),
            };
            log::debug!("set servo speed port={} speed={}", port, speed);
            if let Some(servo) = self.registry.servo(&format!("S{}", port)) {
                if let Err(e) = servo.set_speed(speed) {
                    log::error!("S{}: speed change failed: {}", port, e);
                }
            }
        } else if let Some(port) = in_range(cmd, commands::SET_DIGITAL_ON_BASE, DIGITAL_PORT_COUNT)
        {
            log::debug!("set digital on port={}", port);
            if let Some(digital) = self.registry.digital(&format!("D{}", port)) {
                if let Err(e) = digital.set(true) {
                    log::error!("D{}: set failed: {}", port, e);
                }
            }
        } else if let Some(port) = in_range(cmd, commands::SET_DIGITAL_OFF_BASE, DIGITAL_PORT_COUNT)
        {
            log::debug!("set digital off port={}", port);
            if let Some(digital) = self.registry.digital(&format!("D{}", port)) {
                if let Err(e) = digital.set(false) {
                    log::error!("D{}: clear failed: {}", port, e);
                }
            }
        } else if let Some(port) = in_range(cmd, commands::GET_DIGITAL_BASE, DIGITAL_PORT_COUNT) {
            let state = match self.registry.digital(&format!("D{}", port)) {
                Some(digital) => digital.get().unwrap_or(false),
                None => false,
            };
            log::debug!("get digital port={} state={}", port, state);
            conn.send(&[state as u8])?;
        } else if let Some(port) =
            in_range(cmd, commands::SET_SERVO_POSITION_BASE, SERVO_PORT_COUNT)
        {
            let value = match conn.recv(1) {
                Some(d) => d[0],
                None => return Ok(false),
            };
            log::debug!("set servo position port={} value={}", port, value);
            if let Some(servo) = self.registry.servo(&format!("S{}", port)) {
                // Zero releases; positions arrive shifted up by one so the
                // value range covers 0-179 degrees.
                let result = if value > 0 {
                    servo.set_position(u32::from(value) - 1)
                } else {
                    servo.release()
                };
                if let Err(e) = result {
                    log::error!("S{}: position change failed: {}", port, e);
                }
            }
        } else if let Some(port) = in_range(cmd, commands::GET_ADC_BASE, ADC_PORT_COUNT) {
            let mode = match conn.recv(1) {
                Some(d) => d[0],
                None => return Ok(false),
            };
            // No analog sampling hardware behind the gateway; answer zero
            // so pollers keep running.
            log::debug!("get adc port={} mode={}", port, mode);
            conn.send(&[0])?;
        } else if let Some(port) = in_range(cmd, commands::SEND_SERIAL_BASE, DIGITAL_PORT_COUNT) {
            let baud_ix = match conn.recv(1) {
                Some(d) => d[0],
                None => return Ok(false),
            };
            let len = match conn.recv(2) {
                Some(d) => u16::from_le_bytes([d[0], d[1]]) as usize,
                None => return Ok(false),
            };
            if conn.recv(len).is_none() {
                return Ok(false);
            }
            // Bit-banged serial on digital pins is not wired up; swallow
            // the payload and acknowledge.
            log::debug!("send serial port={} baud_ix={} len={}", port, baud_ix, len);
            conn.send(&[0])?;
        } else if let Some(trigger) = in_range(cmd, commands::READ_HCSR04_BASE, DIGITAL_PORT_COUNT)
        {
            let echo = match conn.recv(1) {
                Some(d) => d[0],
                None => return Ok(false),
            };
            log::debug!("read ultrasonic trigger={} echo={}", trigger, echo);
            conn.send(&[0])?;
        } else {
            log::warn!("command {} not handled", cmd);
        }

        Ok(true)
    }
}

impl SessionHandler for CommandDispatcher {
    fn run(&mut self, conn: &mut Connection) -> Result<()> {
        log::debug!("command session with {} started", conn.peer());

        loop {
            let cmd = match conn.recv(1) {
                Some(d) => d[0],
                None => break,
            };
            if !self.handle_command(conn, cmd)? {
                break;
            }
        }

        log::debug!("command session with {} finished", conn.peer());
        Ok(())
    }
}

#[cfg(target_os = "linux")]
fn read_cpu_temp_milli() -> u32 {
    std::fs::read_to_string("/sys/class/thermal/thermal_zone0/temp")
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(FALLBACK_CPU_TEMP_MILLI)
}

#[cfg(not(target_os = "linux"))]
fn read_cpu_temp_milli() -> u32 {
    FALLBACK_CPU_TEMP_MILLI
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_decoding_maps_opcodes_to_ports() {
        assert_eq!(in_range(commands::SET_DIGITAL_ON_BASE, commands::SET_DIGITAL_ON_BASE, 24), Some(0));
        assert_eq!(in_range(commands::SET_DIGITAL_ON_BASE + 23, commands::SET_DIGITAL_ON_BASE, 24), Some(23));
        assert_eq!(in_range(commands::SET_DIGITAL_ON_BASE + 24, commands::SET_DIGITAL_ON_BASE, 24), None);
        assert_eq!(in_range(commands::SET_DIGITAL_ON_BASE - 1, commands::SET_DIGITAL_ON_BASE, 24), None);
    }

    #[test]
    fn uart_range_splits_into_channel_and_op() {
        // channel 2, read
        let sub = extended::UART_BASE + 2 * extended::UART_STRIDE + extended::UART_READ_OFFSET;
        let offset = in_range(sub, extended::UART_BASE, extended::UART_STRIDE * 3).unwrap();
        assert_eq!(offset / extended::UART_STRIDE, 2);
        assert_eq!(offset % extended::UART_STRIDE, extended::UART_READ_OFFSET);
    }

    #[test]
    fn cpu_temp_scale_matches_known_reading() {
        let raw = (FALLBACK_CPU_TEMP_MILLI as f64 * CPU_TEMP_SCALE) as u16;
        assert_eq!(raw, 1413);
    }
}
