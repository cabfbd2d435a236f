//! Streaming audio player
//!
//! Implements the sound sub-protocol: a client initializes a stream, loads
//! it chunk by chunk, then triggers playback. Chunks travel over a channel
//! to a playback thread that owns the [`AudioSink`], so slow sinks never
//! stall the command dispatcher.

use crate::error::{Error, Result};
use crate::registry::Controller;
use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;
use std::thread::{self, JoinHandle};

/// Playback device capability (ALSA device, file writer, null)
pub trait AudioSink: Send {
    /// A new stream is starting
    fn begin(&mut self) -> Result<()>;

    /// One chunk of stream data
    fn push(&mut self, chunk: &[u8]) -> Result<()>;

    /// Stream finished or was aborted
    fn end(&mut self) -> Result<()>;
}

/// Sink that counts and discards, for deployments without audio hardware
pub struct NullAudioSink {
    bytes: usize,
}

impl NullAudioSink {
    pub fn new() -> Self {
        Self { bytes: 0 }
    }
}

impl Default for NullAudioSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSink for NullAudioSink {
    fn begin(&mut self) -> Result<()> {
        self.bytes = 0;
        Ok(())
    }

    fn push(&mut self, chunk: &[u8]) -> Result<()> {
        self.bytes += chunk.len();
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        log::debug!("null audio sink: discarded {} bytes", self.bytes);
        Ok(())
    }
}

/// Sound sub-protocol operations
pub trait AudioPlayer: Send + Sync {
    fn stream_init(&self) -> Result<()>;

    fn stream_stop(&self) -> Result<()>;

    fn stream_load(&self, chunk: &[u8]) -> Result<()>;

    fn stream_play(&self) -> Result<()>;
}

enum AudioEvent {
    Init,
    Load(Vec<u8>),
    Play,
    Stop,
    Shutdown,
}

/// Audio player backed by a playback thread and a chunk queue
pub struct StreamingAudioPlayer {
    tx: Sender<AudioEvent>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl StreamingAudioPlayer {
    pub fn new(mut sink: Box<dyn AudioSink>) -> Result<Self> {
        let (tx, rx) = unbounded::<AudioEvent>();

        let thread = thread::Builder::new()
            .name("audio-player".to_string())
            .spawn(move || {
                let mut pending: Vec<Vec<u8>> = Vec::new();
                let mut streaming = false;

                while let Ok(event) = rx.recv() {
                    match event {
                        AudioEvent::Init => {
                            pending.clear();
                            if let Err(e) = sink.begin() {
                                log::error!("audio sink begin failed: {}", e);
                            }
                            streaming = true;
                        }
                        AudioEvent::Load(chunk) => {
                            if streaming {
                                pending.push(chunk);
                            } else {
                                log::warn!("audio load before init, chunk dropped");
                            }
                        }
                        AudioEvent::Play => {
                            for chunk in pending.drain(..) {
                                if let Err(e) = sink.push(&chunk) {
                                    log::error!("audio sink push failed: {}", e);
                                    break;
                                }
                            }
                        }
                        AudioEvent::Stop => {
                            pending.clear();
                            if streaming {
                                if let Err(e) = sink.end() {
                                    log::error!("audio sink end failed: {}", e);
                                }
                            }
                            streaming = false;
                        }
                        AudioEvent::Shutdown => break,
                    }
                }

                log::debug!("audio player thread exiting");
            })?;

        Ok(Self {
            tx,
            thread: Mutex::new(Some(thread)),
        })
    }

    fn send(&self, event: AudioEvent) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|_| Error::Other("audio player thread is gone".to_string()))
    }
}

impl AudioPlayer for StreamingAudioPlayer {
    fn stream_init(&self) -> Result<()> {
        self.send(AudioEvent::Init)
    }

    fn stream_stop(&self) -> Result<()> {
        self.send(AudioEvent::Stop)
    }

    fn stream_load(&self, chunk: &[u8]) -> Result<()> {
        self.send(AudioEvent::Load(chunk.to_vec()))
    }

    fn stream_play(&self) -> Result<()> {
        self.send(AudioEvent::Play)
    }
}

impl Controller for StreamingAudioPlayer {
    fn name(&self) -> &str {
        "audio-player"
    }

    fn start(&self) -> Result<()> {
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        let _ = self.tx.send(AudioEvent::Shutdown);
        if let Some(thread) = self.thread.lock().take() {
            let _ = thread.join();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    /// Sink that shares everything it plays with the test
    struct RecordingSink {
        played: Arc<Mutex<Vec<u8>>>,
        begun: Arc<Mutex<usize>>,
    }

    impl AudioSink for RecordingSink {
        fn begin(&mut self) -> Result<()> {
            *self.begun.lock() += 1;
            Ok(())
        }

        fn push(&mut self, chunk: &[u8]) -> Result<()> {
            self.played.lock().extend_from_slice(chunk);
            Ok(())
        }

        fn end(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn wait_for<F: Fn() -> bool>(cond: F) {
        for _ in 0..100 {
            if cond() {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("condition not met within 1s");
    }

    #[test]
    fn chunks_are_assembled_in_order_and_played() {
        let played = Arc::new(Mutex::new(Vec::new()));
        let begun = Arc::new(Mutex::new(0));
        let player = StreamingAudioPlayer::new(Box::new(RecordingSink {
            played: Arc::clone(&played),
            begun: Arc::clone(&begun),
        }))
        .unwrap();

        player.stream_init().unwrap();
        player.stream_load(b"abc").unwrap();
        player.stream_load(b"def").unwrap();
        player.stream_play().unwrap();

        wait_for(|| played.lock().as_slice() == b"abcdef");
        assert_eq!(*begun.lock(), 1);
        player.stop().unwrap();
    }

    #[test]
    fn stop_discards_pending_chunks() {
        let played = Arc::new(Mutex::new(Vec::new()));
        let begun = Arc::new(Mutex::new(0));
        let player = StreamingAudioPlayer::new(Box::new(RecordingSink {
            played: Arc::clone(&played),
            begun: Arc::clone(&begun),
        }))
        .unwrap();

        player.stream_init().unwrap();
        player.stream_load(b"abc").unwrap();
        player.stream_stop().unwrap();
        player.stream_play().unwrap();

        // Give the playback thread time to drain the queue
        std::thread::sleep(Duration::from_millis(100));
        assert!(played.lock().is_empty());
        player.stop().unwrap();
    }
}
