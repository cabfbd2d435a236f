//! End-to-end tests for the frame streaming path.
//!
//! A stream worker pushes frames through a real camera server socket; the
//! tests subscribe like a desktop viewer would and decode what arrives.

use setu_io::bus::fake::FakeBusBackend;
use setu_io::bus::BusController;
use setu_io::net::{DrainHandler, TcpServer};
use setu_io::protocol::framing::{decode_image_frame, decode_sensor_frame};
use setu_io::registry::Controller;
use setu_io::streaming::{camera_stream, thermal_stream, TestPatternCamera};
use std::io::Read;
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

fn stream_server() -> Arc<TcpServer> {
    let server = TcpServer::new(
        "camera-test",
        "127.0.0.1:0".parse().unwrap(),
        Box::new(|| Box::new(DrainHandler)),
    );
    server.start().unwrap();
    server
}

fn subscribe(server: &TcpServer) -> TcpStream {
    let stream = TcpStream::connect(("127.0.0.1", server.local_port())).expect("connect failed");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream
}

/// Read until `buf` holds at least `n` bytes.
fn read_at_least(stream: &mut TcpStream, buf: &mut Vec<u8>, n: usize) {
    let mut chunk = [0u8; 4096];
    while buf.len() < n {
        let read = stream.read(&mut chunk).expect("stream read failed");
        assert!(read > 0, "stream closed early");
        buf.extend_from_slice(&chunk[..read]);
    }
}

#[test]
fn camera_frames_arrive_tagged_and_decodable() {
    let server = stream_server();
    let mut client = subscribe(&server);
    // Let the accept loop pick the client up before frames start
    std::thread::sleep(Duration::from_millis(300));

    let camera = Box::new(TestPatternCamera::new(64, 48, 85));
    let worker = camera_stream(camera, 10.0, Arc::clone(&server));
    worker.start().unwrap();

    // Collect two whole frames
    let mut buf = Vec::new();
    read_at_least(&mut client, &mut buf, 9);
    loop {
        match decode_image_frame(&buf) {
            Ok((payload, consumed)) => {
                assert_eq!(&payload[..2], &[0xFF, 0xD8]);
                let decoded = image::load_from_memory(&payload).expect("bad jpeg");
                assert_eq!(decoded.width(), 64);
                buf.drain(..consumed);
                break;
            }
            Err(_) => {
                let want = buf.len() + 1;
                read_at_least(&mut client, &mut buf, want);
            }
        }
    }

    worker.stop().unwrap();
    server.stop().unwrap();
}

#[test]
fn thermal_frames_carry_a_full_8x8_grid() {
    let server = stream_server();
    let mut client = subscribe(&server);
    std::thread::sleep(Duration::from_millis(300));

    let bus = BusController::new("i2c", Box::new(FakeBusBackend::new()));
    let worker = thermal_stream(&bus, 0x68, 10.0, Arc::clone(&server)).unwrap();
    worker.start().unwrap();

    let mut buf = Vec::new();
    read_at_least(&mut client, &mut buf, 6 + 64 * 4);
    let (width, height, values, _) = decode_sensor_frame(&buf).unwrap();
    assert_eq!((width, height), (8, 8));
    assert_eq!(values.len(), 64);
    // Quiet fake bus reads all-zero words
    assert!(values.iter().all(|v| *v == 0.0));

    worker.stop().unwrap();
    server.stop().unwrap();
    bus.stop().unwrap();
}

#[test]
fn broadcast_reaches_every_subscriber() {
    let server = stream_server();
    let mut first = subscribe(&server);
    let mut second = subscribe(&server);
    std::thread::sleep(Duration::from_millis(300));

    let camera = Box::new(TestPatternCamera::new(32, 32, 85));
    let worker = camera_stream(camera, 20.0, Arc::clone(&server));
    worker.start().unwrap();

    for client in [&mut first, &mut second] {
        let mut header = [0u8; 5];
        client.read_exact(&mut header).expect("no frame received");
        assert_eq!(&header, b"EZIMG");
    }

    worker.stop().unwrap();
    server.stop().unwrap();
}
