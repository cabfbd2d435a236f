//! Configuration for the SetuIO gateway daemon
//!
//! Loads configuration from a TOML file. Every section has defaults so the
//! daemon can run with no config file at all (mock peripherals, standard
//! ports).

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub thermal: ThermalConfig,
    #[serde(default)]
    pub uart: UartConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// TCP server endpoints
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Bind address for both TCP listeners
    pub bind_address: String,
    /// Command protocol port
    pub command_port: u16,
    /// Camera/image stream port
    pub camera_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            command_port: 10023,
            camera_port: 10024,
        }
    }
}

/// UDP discovery broadcaster
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoveryConfig {
    /// Whether discovery datagrams are sent at all
    pub enabled: bool,
    /// Destination UDP port for discovery datagrams
    pub port: u16,
    /// Seconds between broadcast rounds
    pub interval_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 4242,
            interval_secs: 3,
        }
    }
}

/// Addressed-bus backend selection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BusConfig {
    /// Backend type ("fake" is the only built-in; real backends plug in
    /// through the `BusBackend` trait)
    pub backend: String,
    /// Fake backend returns randomized bytes instead of zeros, so streaming
    /// sources show live data in mock deployments
    pub noisy_fake: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            backend: "fake".to_string(),
            noisy_fake: false,
        }
    }
}

/// Camera stream source
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CameraConfig {
    pub enabled: bool,
    pub width: u32,
    pub height: u32,
    /// Target frames per second
    pub fps: f32,
    /// JPEG quality 1-100
    pub jpeg_quality: u8,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            width: 640,
            height: 480,
            fps: 10.0,
            jpeg_quality: 95,
        }
    }
}

/// Thermal array stream source (8x8 grid sensor on the bus)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ThermalConfig {
    pub enabled: bool,
    /// Bus address of the thermal array
    pub bus_address: u8,
    /// Target frames per second
    pub fps: f32,
}

impl Default for ThermalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bus_address: 0x68,
            fps: 10.0,
        }
    }
}

/// UART channels exposed through the protocol
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UartConfig {
    /// Serial devices registered as uart0, uart1, ... in listed order
    #[serde(default)]
    pub ports: Vec<UartPortConfig>,
}

/// One serial device
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UartPortConfig {
    /// Device path (e.g. "/dev/serial0")
    pub device: String,
    /// Initial baud rate
    pub baud: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Default log level when RUST_LOG is unset (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            discovery: DiscoveryConfig::default(),
            bus: BusConfig::default(),
            camera: CameraConfig::default(),
            thermal: ThermalConfig::default(),
            uart: UartConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
