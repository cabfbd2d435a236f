//! SetuIO - Network-attached hardware control gateway
//!
//! This library provides the building blocks of the gateway daemon: the
//! component registry, peripheral port abstractions, the addressed bus with
//! its slave cache, the TCP command protocol, frame streaming, and UDP
//! service discovery.

pub mod app;
pub mod audio;
pub mod bus;
pub mod config;
pub mod error;
pub mod net;
pub mod ports;
pub mod protocol;
pub mod registry;
pub mod streaming;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{Error, Result};
pub use registry::{Component, Controller, Registry};
