//! SetuIO - Network-attached hardware control gateway
//!
//! Exposes digital, PWM, and servo ports, an addressed peripheral bus,
//! UART channels, and an audio sink over a binary TCP command protocol,
//! streams camera and thermal frames on a second port, and announces both
//! services over UDP so desktop clients can discover the gateway.

use setu_io::app::GatewayApp;
use setu_io::config::AppConfig;
use setu_io::Result;
use std::env;
use std::path::Path;

/// Parse config path from command line arguments.
///
/// Supports:
/// - `setu-io <path>` (positional)
/// - `setu-io --config <path>` (flag-based)
/// - `setu-io -c <path>` (short flag)
///
/// Defaults to `/etc/setuio.toml` if not specified.
fn parse_config_path() -> String {
    let args: Vec<String> = env::args().collect();

    for i in 1..args.len() {
        if (args[i] == "--config" || args[i] == "-c") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }

    if args.len() > 1 && !args[1].starts_with('-') {
        return args[1].clone();
    }

    "/etc/setuio.toml".to_string()
}

fn main() -> Result<()> {
    let config_path = parse_config_path();
    let (config, config_found) = if Path::new(&config_path).exists() {
        (AppConfig::from_file(&config_path)?, true)
    } else {
        (AppConfig::default(), false)
    };

    // RUST_LOG wins over the configured level when set
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(&config.logging.level),
    )
    .init();

    log::info!("SetuIO v{} starting...", env!("CARGO_PKG_VERSION"));
    if config_found {
        log::info!("Using config: {}", config_path);
    } else {
        log::warn!("Config {} not found, using defaults", config_path);
    }

    let app = GatewayApp::new(config)?;
    app.run()
}
