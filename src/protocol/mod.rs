//! Binary command protocol
//!
//! Single-byte opcodes, little-endian multi-byte values, no framing around
//! commands themselves. Port-addressed commands encode the port index in the
//! opcode byte as an offset from a base value; everything else is a fixed
//! opcode followed by its parameter bytes.

pub mod dispatcher;
pub mod framing;

pub use dispatcher::CommandDispatcher;

/// Number of digital ports addressable through the opcode ranges
pub const DIGITAL_PORT_COUNT: u8 = 24;
/// Number of PWM-capable ports
pub const PWM_PORT_COUNT: u8 = 24;
/// Number of servo ports
pub const SERVO_PORT_COUNT: u8 = 24;
/// Number of ADC ports
pub const ADC_PORT_COUNT: u8 = 8;
/// Number of UART channels reachable through the extended command range
pub const UART_CHANNEL_COUNT: u8 = 3;

/// Byte sent in answer to a ping
pub const PING_REPLY: u8 = 222;

/// Firmware identity reported to clients, as a little-endian u32
pub const FIRMWARE_ID: u32 = 2;

/// Top-level single-byte opcodes
pub mod commands {
    /// Liveness probe; replies [`super::PING_REPLY`]
    pub const PING: u8 = 0x55;
    /// Escape into the extended command set; next byte selects from
    /// [`super::extended`]
    pub const EXTENDED: u8 = 4;
    /// Write to a bus slave: [addr, len, data...]
    pub const I2C_WRITE: u8 = 10;
    /// Read from a bus slave: [addr, len]; reply is exactly len bytes
    pub const I2C_READ: u8 = 11;
    /// First of 24 per-port PWM duty commands: [duty 0..=100]
    pub const SET_PWM_BASE: u8 = 15;
    /// First of 24 per-port servo speed commands: [speed]
    pub const SET_SERVO_SPEED_BASE: u8 = 39;
    /// First of 24 per-port digital-high commands
    pub const SET_DIGITAL_ON_BASE: u8 = 100;
    /// First of 24 per-port digital-low commands
    pub const SET_DIGITAL_OFF_BASE: u8 = 124;
    /// First of 24 per-port digital reads; reply is one byte, 0 or 1
    pub const GET_DIGITAL_BASE: u8 = 148;
    /// First of 24 per-port servo position commands: [value]; 0 releases,
    /// otherwise position is value - 1 degrees
    pub const SET_SERVO_POSITION_BASE: u8 = 172;
    /// First of 8 per-port analog reads: [mode]; reply is one byte
    pub const GET_ADC_BASE: u8 = 196;
    /// First of 24 per-port raw serial transmits: [baud index, len u16 LE,
    /// data]; acknowledged with a zero byte
    pub const SEND_SERIAL_BASE: u8 = 204;
    /// First of 24 per-trigger-port ultrasonic reads: [echo port]; reply is
    /// one distance byte
    pub const READ_HCSR04_BASE: u8 = 228;
    /// Firmware identity query; reply is [`super::FIRMWARE_ID`] as u32 LE
    pub const GET_FIRMWARE_ID: u8 = 253;
    /// Escape into the audio sub-commands in [`super::sound`]
    pub const SOUND_STREAM: u8 = 254;
}

/// Second byte after [`commands::EXTENDED`]
pub mod extended {
    pub const SET_LIPO_PROTECTION: u8 = 0;
    /// [millivolt-threshold u16 LE]
    pub const SET_BATTERY_MONITOR_VOLTAGE: u8 = 1;
    /// Reply: raw battery reading as u16 LE
    pub const GET_BATTERY_VOLTAGE: u8 = 2;
    /// Reply: raw core temperature reading as u16 LE
    pub const GET_CPU_TEMPERATURE: u8 = 3;
    /// First of 3 per-channel groups of four: init, write, available, read.
    /// Channel c command k is UART_BASE + c * UART_STRIDE + k.
    pub const UART_BASE: u8 = 4;
    pub const UART_STRIDE: u8 = 4;
    pub const UART_INIT_OFFSET: u8 = 0;
    pub const UART_WRITE_OFFSET: u8 = 1;
    pub const UART_AVAILABLE_OFFSET: u8 = 2;
    pub const UART_READ_OFFSET: u8 = 3;
    /// [clock u32 LE]; logged and ignored
    pub const SET_I2C_CLOCKSPEED: u8 = 16;
    /// [baud index, timing u16 LE]; logged and ignored
    pub const SET_UART_CLOCKSPEED: u8 = 17;
}

/// Second byte after [`commands::SOUND_STREAM`]
pub mod sound {
    /// Reset the stream and drop any buffered audio
    pub const INIT_STOP: u8 = 0;
    /// [len u16 LE, samples]; append a chunk to the pending stream
    pub const LOAD: u8 = 1;
    /// Start playback of everything loaded so far
    pub const PLAY: u8 = 2;
}
