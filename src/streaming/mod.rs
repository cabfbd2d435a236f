//! Frame sources
//!
//! A stream worker owns a producer thread that grabs one frame at a time,
//! wraps it in its wire frame, and broadcasts it to every client of the
//! stream server. Production is paced to the configured rate; a producer
//! error shuts the worker's own loop down rather than the whole gateway.

pub mod camera;
pub mod thermal;

pub use camera::{camera_stream, Camera, TestPatternCamera};
pub use thermal::{thermal_stream, ThermalArray};

use crate::error::{Error, Result};
use crate::net::TcpServer;
use crate::registry::Controller;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Sleep quantum while pacing, so stop() never waits out a whole frame
/// interval
const PACE_STEP: Duration = Duration::from_millis(20);

/// Produces one encoded wire frame per call.
pub trait FrameProducer: Send {
    fn next_frame(&mut self) -> Result<Vec<u8>>;
}

/// Paced producer thread pushing frames to a stream server.
pub struct StreamWorker {
    name: String,
    interval: Duration,
    server: Arc<TcpServer>,
    producer: Mutex<Option<Box<dyn FrameProducer>>>,
    shutdown: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl StreamWorker {
    pub fn new(
        name: &str,
        fps: f64,
        server: Arc<TcpServer>,
        producer: Box<dyn FrameProducer>,
    ) -> Arc<Self> {
        let fps = if fps > 0.0 { fps } else { 1.0 };
        Arc::new(Self {
            name: name.to_string(),
            interval: Duration::from_secs_f64(1.0 / fps),
            server,
            producer: Mutex::new(Some(producer)),
            shutdown: Arc::new(AtomicBool::new(false)),
            thread: Mutex::new(None),
        })
    }

    fn stream_loop(
        name: &str,
        interval: Duration,
        server: &TcpServer,
        producer: &mut dyn FrameProducer,
        shutdown: &AtomicBool,
    ) {
        log::debug!("{}: stream loop running every {:?}", name, interval);

        while !shutdown.load(Ordering::Relaxed) {
            let started = Instant::now();

            // Frames are produced even with no clients attached: grab cost
            // keeps the source warm and the rate steady.
            match producer.next_frame() {
                Ok(frame) => server.broadcast(&frame),
                Err(e) => {
                    log::error!("{}: frame production failed: {}", name, e);
                    break;
                }
            }

            while started.elapsed() < interval && !shutdown.load(Ordering::Relaxed) {
                thread::sleep(PACE_STEP);
            }
        }

        log::debug!("{}: stream loop terminated", name);
    }
}

impl Controller for StreamWorker {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&self) -> Result<()> {
        let mut thread = self.thread.lock();
        if thread.is_some() {
            return Err(Error::AlreadyStarted(self.name.clone()));
        }
        let mut producer = self
            .producer
            .lock()
            .take()
            .ok_or_else(|| Error::NotStarted(format!("{}: producer already consumed", self.name)))?;

        self.shutdown.store(false, Ordering::Relaxed);
        let name = self.name.clone();
        let interval = self.interval;
        let server = Arc::clone(&self.server);
        let shutdown = Arc::clone(&self.shutdown);

        let handle = thread::Builder::new().name(self.name.clone()).spawn(move || {
            Self::stream_loop(&name, interval, &server, producer.as_mut(), &shutdown)
        })?;
        *thread = Some(handle);

        log::info!("{}: streaming at {:?} per frame", self.name, self.interval);
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
        Ok(())
    }
}

impl Drop for StreamWorker {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::DrainHandler;
    use std::net::SocketAddr;
    use std::sync::atomic::AtomicUsize;

    struct CountingProducer {
        frames: Arc<AtomicUsize>,
    }

    impl FrameProducer for CountingProducer {
        fn next_frame(&mut self) -> Result<Vec<u8>> {
            self.frames.fetch_add(1, Ordering::Relaxed);
            Ok(vec![0xAB, 0xCD])
        }
    }

    struct FailingProducer;

    impl FrameProducer for FailingProducer {
        fn next_frame(&mut self) -> Result<Vec<u8>> {
            Err(Error::Other("no source".to_string()))
        }
    }

    fn test_server() -> Arc<TcpServer> {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        TcpServer::new("stream-test", addr, Box::new(|| Box::new(DrainHandler)))
    }

    #[test]
    fn frames_are_paced_to_the_configured_rate() {
        let server = test_server();
        server.start().unwrap();

        let frames = Arc::new(AtomicUsize::new(0));
        let worker = StreamWorker::new(
            "pacing-test",
            20.0,
            Arc::clone(&server),
            Box::new(CountingProducer {
                frames: Arc::clone(&frames),
            }),
        );
        worker.start().unwrap();
        thread::sleep(Duration::from_millis(500));
        worker.stop().unwrap();
        server.stop().unwrap();

        // 20 fps over 500ms is about 10 frames; allow generous scheduling
        // slack in both directions.
        let produced = frames.load(Ordering::Relaxed);
        assert!(produced >= 4, "only {} frames produced", produced);
        assert!(produced <= 14, "{} frames produced, pacing broken", produced);
    }

    #[test]
    fn producer_error_stops_only_this_worker() {
        let server = test_server();
        server.start().unwrap();

        let worker = StreamWorker::new(
            "failing-test",
            100.0,
            Arc::clone(&server),
            Box::new(FailingProducer),
        );
        worker.start().unwrap();
        thread::sleep(Duration::from_millis(100));

        // The loop has exited on its own; stop still joins cleanly.
        worker.stop().unwrap();
        server.stop().unwrap();
    }

    #[test]
    fn second_start_is_rejected() {
        let server = test_server();
        let frames = Arc::new(AtomicUsize::new(0));
        let worker = StreamWorker::new(
            "double-start",
            1.0,
            Arc::clone(&server),
            Box::new(CountingProducer { frames }),
        );
        worker.start().unwrap();
        assert!(worker.start().is_err());
        worker.stop().unwrap();
    }
}
