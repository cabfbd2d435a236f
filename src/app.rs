//! Application orchestration for the SetuIO daemon
//!
//! Wires ports, bus, audio, servers, broadcasters, and stream workers into
//! one registry, runs until a shutdown signal, then stops everything in
//! reverse registration order.

use crate::audio::{NullAudioSink, StreamingAudioPlayer};
use crate::bus::fake::FakeBusBackend;
use crate::bus::BusController;
use crate::config::AppConfig;
use crate::error::Result;
use crate::net::{DrainHandler, TcpServer, UdpBroadcaster};
use crate::ports::digital::{DigitalPort, FakeDigitalController};
use crate::ports::pwm::{FakePwmController, PwmPort};
use crate::ports::servo::{FakeServoController, ServoPort};
use crate::ports::uart::SerialPortChannel;
use crate::protocol::{CommandDispatcher, DIGITAL_PORT_COUNT, PWM_PORT_COUNT, SERVO_PORT_COUNT};
use crate::registry::{Component, Controller, Registry};
use crate::streaming::{camera_stream, thermal_stream, TestPatternCamera};
use log::{error, info, warn};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Standard hobby servo pulse range in microseconds
const SERVO_MIN_US: u32 = 560;
const SERVO_MAX_US: u32 = 2140;

/// Main application structure owning the component registry
pub struct GatewayApp {
    config: AppConfig,
    registry: Arc<Registry>,
    shutdown: Arc<AtomicBool>,
}

impl GatewayApp {
    /// Build and start every component described by `config`.
    pub fn new(config: AppConfig) -> Result<Self> {
        info!("Initializing SetuIO gateway");
        let registry = Arc::new(Registry::new());

        Self::setup_digital_ports(&registry)?;
        Self::setup_pwm_ports(&registry)?;
        Self::setup_servo_ports(&registry)?;
        Self::setup_bus(&registry, &config)?;
        Self::setup_uarts(&registry, &config);
        Self::setup_audio(&registry)?;
        Self::setup_command_server(&registry, &config)?;
        Self::setup_camera_server(&registry, &config)?;

        Ok(Self {
            config,
            registry,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    fn setup_digital_ports(registry: &Arc<Registry>) -> Result<()> {
        let backend = Arc::new(FakeDigitalController::new());
        backend.start()?;
        registry.register_controller(Arc::clone(&backend) as Arc<dyn Controller>);
        for port in 0..DIGITAL_PORT_COUNT {
            registry.register(
                &format!("D{}", port),
                Component::Digital(Arc::new(DigitalPort::new(backend.clone(), port))),
            );
        }
        Ok(())
    }

    fn setup_pwm_ports(registry: &Arc<Registry>) -> Result<()> {
        let backend = Arc::new(FakePwmController::new());
        backend.start()?;
        registry.register_controller(Arc::clone(&backend) as Arc<dyn Controller>);
        for port in 0..PWM_PORT_COUNT {
            registry.register(
                &format!("P{}", port),
                Component::Pwm(Arc::new(PwmPort::new(backend.clone(), port))),
            );
        }
        Ok(())
    }

    fn setup_servo_ports(registry: &Arc<Registry>) -> Result<()> {
        let backend = Arc::new(FakeServoController::new());
        backend.start()?;
        registry.register_controller(Arc::clone(&backend) as Arc<dyn Controller>);
        for port in 0..SERVO_PORT_COUNT {
            registry.register(
                &format!("S{}", port),
                Component::Servo(Arc::new(ServoPort::new(
                    backend.clone(),
                    port,
                    SERVO_MIN_US,
                    SERVO_MAX_US,
                ))),
            );
        }
        Ok(())
    }

    fn setup_bus(registry: &Arc<Registry>, config: &AppConfig) -> Result<()> {
        let backend = match config.bus.backend.as_str() {
            "fake" if config.bus.noisy_fake => Box::new(FakeBusBackend::noisy()),
            "fake" => Box::new(FakeBusBackend::new()),
            other => {
                warn!("unknown bus backend \"{}\", using fake", other);
                Box::new(FakeBusBackend::new())
            }
        };
        let bus = BusController::new("i2c", backend);
        bus.start()?;
        registry.register("i2c", Component::Bus(Arc::clone(&bus)));
        registry.register_controller(bus as Arc<dyn Controller>);
        Ok(())
    }

    /// A UART that fails to open is logged and skipped so the gateway still
    /// comes up for everything else.
    fn setup_uarts(registry: &Arc<Registry>, config: &AppConfig) {
        for (index, port) in config.uart.ports.iter().enumerate() {
            match SerialPortChannel::open(&port.device, port.baud) {
                Ok(channel) => {
                    let channel = Arc::new(channel);
                    info!("uart{}: {} at {} baud", index, port.device, port.baud);
                    registry.register(&format!("uart{}", index), Component::Uart(channel.clone()));
                    registry.register_controller(channel as Arc<dyn Controller>);
                }
                Err(e) => {
                    error!("uart{}: opening {} failed: {}", index, port.device, e);
                }
            }
        }
    }

    fn setup_audio(registry: &Arc<Registry>) -> Result<()> {
        let player = Arc::new(StreamingAudioPlayer::new(Box::new(NullAudioSink::new()))?);
        registry.register("audio_player", Component::Audio(player.clone()));
        registry.register_controller(player as Arc<dyn Controller>);
        Ok(())
    }

    fn setup_command_server(registry: &Arc<Registry>, config: &AppConfig) -> Result<()> {
        let addr = Self::bind_addr(config, config.server.command_port)?;
        let handler_registry = Arc::clone(registry);
        let server = TcpServer::new(
            "command-server",
            addr,
            Box::new(move || Box::new(CommandDispatcher::new(Arc::clone(&handler_registry)))),
        );
        server.start()?;
        registry.register_controller(server as Arc<dyn Controller>);

        if config.discovery.enabled {
            let broadcaster = UdpBroadcaster::new(
                "EZ-B",
                config.server.command_port,
                config.discovery.port,
                Duration::from_secs(config.discovery.interval_secs),
            );
            broadcaster.start()?;
            registry.register_controller(broadcaster as Arc<dyn Controller>);
        }
        Ok(())
    }

    fn setup_camera_server(registry: &Arc<Registry>, config: &AppConfig) -> Result<()> {
        if !config.camera.enabled && !config.thermal.enabled {
            return Ok(());
        }

        let addr = Self::bind_addr(config, config.server.camera_port)?;
        let server = TcpServer::new("camera-server", addr, Box::new(|| Box::new(DrainHandler)));
        server.start()?;
        registry.register_controller(Arc::clone(&server) as Arc<dyn Controller>);

        if config.discovery.enabled {
            let broadcaster = UdpBroadcaster::new(
                "Camera",
                config.server.camera_port,
                config.discovery.port,
                Duration::from_secs(config.discovery.interval_secs),
            );
            broadcaster.start()?;
            registry.register_controller(broadcaster as Arc<dyn Controller>);
        }

        if config.camera.enabled {
            let camera = Box::new(TestPatternCamera::new(
                config.camera.width,
                config.camera.height,
                config.camera.jpeg_quality,
            ));
            let worker = camera_stream(camera, f64::from(config.camera.fps), Arc::clone(&server));
            worker.start()?;
            registry.register_controller(worker as Arc<dyn Controller>);
        }

        if config.thermal.enabled {
            match registry.bus("i2c") {
                Some(bus) => {
                    let worker = thermal_stream(
                        &bus,
                        config.thermal.bus_address,
                        f64::from(config.thermal.fps),
                        Arc::clone(&server),
                    )?;
                    worker.start()?;
                    registry.register_controller(worker as Arc<dyn Controller>);
                }
                None => warn!("thermal stream enabled but no bus is registered"),
            }
        }
        Ok(())
    }

    fn bind_addr(config: &AppConfig, port: u16) -> Result<SocketAddr> {
        format!("{}:{}", config.server.bind_address, port)
            .parse()
            .map_err(|e| {
                crate::error::Error::Other(format!(
                    "bad bind address \"{}\": {}",
                    config.server.bind_address, e
                ))
            })
    }

    fn setup_signal_handler(&self) -> Result<()> {
        let mut signals = Signals::new([SIGINT, SIGTERM])?;
        let shutdown = Arc::clone(&self.shutdown);
        thread::Builder::new()
            .name("signal-handler".to_string())
            .spawn(move || {
                if let Some(signal) = signals.forever().next() {
                    info!("Received signal {}, shutting down", signal);
                    shutdown.store(true, Ordering::Relaxed);
                }
            })?;
        Ok(())
    }

    /// Block until a shutdown signal arrives, then stop every registered
    /// controller in reverse order.
    pub fn run(&self) -> Result<()> {
        self.setup_signal_handler()?;

        info!(
            "Gateway up: {} components, command port {}, camera port {}",
            self.registry.len(),
            self.config.server.command_port,
            self.config.server.camera_port
        );

        while !self.shutdown.load(Ordering::Relaxed) {
            thread::sleep(Duration::from_millis(100));
        }

        info!("Stopping controllers");
        self.registry.stop_all();
        info!("Terminated");
        Ok(())
    }

    /// Ask the main loop to exit; used by tests in place of a signal.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}
