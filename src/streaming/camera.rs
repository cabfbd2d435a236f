//! Camera frame source

use crate::error::Result;
use crate::net::TcpServer;
use crate::protocol::framing::encode_image_frame;
use crate::streaming::{FrameProducer, StreamWorker};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use std::sync::Arc;

/// Grabs one JPEG-compressed frame per call.
pub trait Camera: Send {
    fn capture_jpeg(&mut self) -> Result<Vec<u8>>;
}

/// Camera standing in for real capture hardware: renders a moving bar over
/// a flat background with a frame counter strip, so a connected viewer can
/// verify frame delivery and ordering by eye.
pub struct TestPatternCamera {
    width: u32,
    height: u32,
    quality: u8,
    frame: u64,
}

impl TestPatternCamera {
    pub fn new(width: u32, height: u32, quality: u8) -> Self {
        Self {
            width,
            height,
            quality,
            frame: 0,
        }
    }

    fn render(&self) -> RgbImage {
        let background = Rgb([73u8, 109, 137]);
        let mut img = RgbImage::from_pixel(self.width, self.height, background);

        // Vertical bar sweeping one pixel column per frame
        let bar_x = (self.frame % u64::from(self.width.max(1))) as u32;
        for y in 0..self.height {
            for dx in 0..8u32.min(self.width) {
                let x = (bar_x + dx) % self.width;
                img.put_pixel(x, y, Rgb([255, 255, 0]));
            }
        }

        // Frame counter as a strip of binary blocks along the top edge
        let blocks = 16u32.min(self.width / 4);
        for bit in 0..blocks {
            let on = (self.frame >> bit) & 1 == 1;
            let color = if on { Rgb([255, 255, 255]) } else { Rgb([0, 0, 0]) };
            for y in 0..8u32.min(self.height) {
                for x in 0..4 {
                    img.put_pixel(bit * 4 + x, y, color);
                }
            }
        }

        img
    }
}

impl Camera for TestPatternCamera {
    fn capture_jpeg(&mut self) -> Result<Vec<u8>> {
        let img = self.render();
        self.frame = self.frame.wrapping_add(1);

        let mut jpeg = Vec::new();
        let encoder = JpegEncoder::new_with_quality(&mut jpeg, self.quality);
        img.write_with_encoder(encoder)?;
        Ok(jpeg)
    }
}

struct CameraProducer {
    camera: Box<dyn Camera>,
}

impl FrameProducer for CameraProducer {
    fn next_frame(&mut self) -> Result<Vec<u8>> {
        let jpeg = self.camera.capture_jpeg()?;
        Ok(encode_image_frame(&jpeg))
    }
}

/// Builds the stream worker pushing image frames from `camera` to every
/// client of `server`.
pub fn camera_stream(camera: Box<dyn Camera>, fps: f64, server: Arc<TcpServer>) -> Arc<StreamWorker> {
    StreamWorker::new("camera-stream", fps, server, Box::new(CameraProducer { camera }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::framing::decode_image_frame;

    #[test]
    fn frames_are_valid_jpeg_and_change_over_time() {
        let mut camera = TestPatternCamera::new(64, 48, 90);
        let first = camera.capture_jpeg().unwrap();
        let second = camera.capture_jpeg().unwrap();

        // JPEG SOI marker
        assert_eq!(&first[..2], &[0xFF, 0xD8]);
        assert_ne!(first, second);

        let decoded = image::load_from_memory(&first).unwrap();
        assert_eq!(decoded.width(), 64);
        assert_eq!(decoded.height(), 48);
    }

    #[test]
    fn producer_wraps_captures_in_image_frames() {
        let mut producer = CameraProducer {
            camera: Box::new(TestPatternCamera::new(32, 32, 80)),
        };
        let frame = producer.next_frame().unwrap();
        let (payload, consumed) = decode_image_frame(&frame).unwrap();
        assert_eq!(consumed, frame.len());
        assert_eq!(&payload[..2], &[0xFF, 0xD8]);
    }
}
