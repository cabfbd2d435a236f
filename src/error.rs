//! Error types for SetuIO

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// SetuIO error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port error
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Configuration parse error
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration encode error
    #[error("Config encode error: {0}")]
    ConfigEncode(#[from] toml::ser::Error),

    /// Image encoding error
    #[error("Image encoding error: {0}")]
    Image(#[from] image::ImageError),

    /// Bus slave could not be created
    #[error("Bus slave not available at address {0:#04x}")]
    SlaveNotAvailable(u8),

    /// Length-prefixed frame violated its declared length
    #[error("Framing error: {0}")]
    Framing(String),

    /// Peer closed the connection
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// Controller started twice without an intervening stop
    #[error("Controller already started: {0}")]
    AlreadyStarted(String),

    /// Operation requires a started controller
    #[error("Controller not started: {0}")]
    NotStarted(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}
