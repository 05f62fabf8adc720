//! Demo entry point exercising the capture runtime end to end: binds a
//! ring, attaches a VLAN bloom rule and an Aho–Corasick matcher, feeds
//! synthetic frames through `on_frame`, and prints the resulting status.
//!
//! This is not a capture CLI (device binding, daemonization, and real
//! network-stack attachment are out of scope); it demonstrates the library
//! the way the teacher's own `main.rs` demonstrated its ring buffer.

use ringtap::dispatch::{CaptureRuntime, Frame, FrameDirection};
use ringtap::socket::Direction;
use ringtap::RuntimeConfig;

fn eth_ipv4_udp(vlan: Option<u16>, src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![0u8; 12];
    match vlan {
        Some(id) => {
            frame.extend_from_slice(&0x8100u16.to_be_bytes());
            frame.extend_from_slice(&id.to_be_bytes());
            frame.extend_from_slice(&0x0800u16.to_be_bytes());
        }
        None => frame.extend_from_slice(&0x0800u16.to_be_bytes()),
    }
    let mut ip = vec![0u8; 20];
    ip[0] = 0x45;
    ip[9] = 17; // UDP
    ip[12..16].copy_from_slice(&[10, 0, 0, 1]);
    ip[16..20].copy_from_slice(&[10, 0, 0, 2]);
    frame.extend(ip);
    frame.extend_from_slice(&src_port.to_be_bytes());
    frame.extend_from_slice(&dst_port.to_be_bytes());
    frame.extend_from_slice(&[0, 0, 0, 0]);
    frame.extend(payload);
    frame
}

fn main() -> ringtap::Result<()> {
    ringtap::telemetry::init();

    println!("ringtap — capture ring, dispatch pipeline, Aho-Corasick matcher demo");

    let runtime = CaptureRuntime::new(
        RuntimeConfig::new()
            .with_bucket_len(512)?
            .with_num_slots(256)?,
    );
    let ring = runtime.create_ring()?;
    runtime.bind(ring, 1, Direction::RxOnly);
    runtime.set_bloom(ring, "+vlan=42")?;
    runtime.toggle_bloom_state(ring, true);
    runtime.set_string(ring, "ATTACK")?;

    let device = 1;
    let matching = eth_ipv4_udp(Some(42), 5555, 80, b"GET /ATTACK HTTP/1.0\r\n\r\n");
    let wrong_vlan = eth_ipv4_udp(Some(41), 5555, 80, b"GET /ATTACK HTTP/1.0\r\n\r\n");
    let no_match = eth_ipv4_udp(Some(42), 5555, 80, b"GET / HTTP/1.0\r\n\r\n");

    for frame in [&matching, &wrong_vlan, &no_match] {
        runtime.on_frame(&Frame {
            device,
            bytes: frame,
            direction: FrameDirection::Rx,
            real: false,
        });
    }

    println!("{}", runtime.global_status());
    if let Some(status) = runtime.status(ring) {
        println!("{status}");
    }

    Ok(())
}
