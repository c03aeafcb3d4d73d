//! End-to-end Modbus-TCP test: a real listener on an ephemeral port,
//! raw MBAP frames over a `TcpStream`.

#![cfg(not(target_os = "espidf"))]

use std::io::{Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

use smartplug::adapters::log_sink::LogEventSink;
use smartplug::adapters::nvs::NvsEeprom;
use smartplug::adapters::time::SystemClock;
use smartplug::app::service::{BootMode, Device};
use smartplug::app::shared::SharedDevice;
use smartplug::config::Capabilities;
use smartplug::modbus::{ModbusServer, ServerConfig};
use smartplug::store::ConfigStore;

fn start(max_clients: usize) -> (SharedDevice<NvsEeprom>, u16) {
    let store = ConfigStore::load(NvsEeprom::open().unwrap()).unwrap();
    let mut dev = Device::new(Capabilities::full(), store);
    dev.boot(BootMode::Run, None, &mut LogEventSink::new());
    let shared = SharedDevice::new(dev);

    let server = ModbusServer::bind(ServerConfig {
        port: 0,
        unit_id: 1,
        max_clients,
        idle_timeout: Duration::from_secs(10),
    })
    .unwrap();
    let port = server.local_addr().unwrap().port();
    let remote = shared.clone();
    thread::spawn(move || server.run(remote, SystemClock::new(), LogEventSink::new()));
    (shared, port)
}

fn connect(port: u16) -> TcpStream {
    let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    stream
}

fn frame(txn: u16, unit: u8, pdu: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&txn.to_be_bytes());
    out.extend_from_slice(&[0, 0]);
    out.extend_from_slice(&(pdu.len() as u16 + 1).to_be_bytes());
    out.push(unit);
    out.extend_from_slice(pdu);
    out
}

fn recv(stream: &mut TcpStream) -> Vec<u8> {
    let mut header = [0u8; 7];
    stream.read_exact(&mut header).unwrap();
    let len = usize::from(u16::from_be_bytes([header[4], header[5]]));
    let mut rest = vec![0u8; len - 1];
    stream.read_exact(&mut rest).unwrap();
    let mut out = header.to_vec();
    out.extend_from_slice(&rest);
    out
}

#[test]
fn write_then_read_over_tcp() {
    let (shared, port) = start(2);
    let mut stream = connect(port);

    let write = frame(1, 1, &[0x06, 0, 1, 0, 1]);
    stream.write_all(&write).unwrap();
    assert_eq!(recv(&mut stream), write);
    assert!(shared.lock(|dev| dev.switch_on()));

    stream.write_all(&frame(2, 1, &[0x03, 0, 1, 0, 1])).unwrap();
    assert_eq!(recv(&mut stream), frame(2, 1, &[0x03, 2, 0, 1]));
}

#[test]
fn foreign_unit_is_silent_and_pipelining_keeps_order() {
    let (_shared, port) = start(2);
    let mut stream = connect(port);

    // Three frames in one segment: the foreign one gets no answer.
    let mut batch = frame(7, 9, &[0x06, 0, 1, 0, 1]);
    batch.extend(frame(8, 1, &[0x42]));
    batch.extend(frame(9, 1, &[0x03, 0, 1, 0, 1]));
    stream.write_all(&batch).unwrap();

    assert_eq!(recv(&mut stream), frame(8, 1, &[0xC2, 0x07]));
    assert_eq!(recv(&mut stream), frame(9, 1, &[0x03, 2, 0, 0]));
}

#[test]
fn split_frames_are_reassembled() {
    let (_shared, port) = start(2);
    let mut stream = connect(port);
    stream.set_nodelay(true).unwrap();

    let req = frame(3, 1, &[0x03, 0, 2, 0, 1]);
    stream.write_all(&req[..4]).unwrap();
    thread::sleep(Duration::from_millis(20));
    stream.write_all(&req[4..]).unwrap();
    assert_eq!(recv(&mut stream), frame(3, 1, &[0x03, 2, 0xF8, 0x00]));
}

#[test]
fn connections_beyond_the_limit_are_closed() {
    let (_shared, port) = start(1);
    let mut first = connect(port);
    first.write_all(&frame(1, 1, &[0x03, 0, 1, 0, 1])).unwrap();
    recv(&mut first);

    let mut second = connect(port);
    // Refused connections are closed without a reply.
    thread::sleep(Duration::from_millis(200));
    let _ = second.write_all(&frame(1, 1, &[0x03, 0, 1, 0, 1]));
    let mut buf = [0u8; 16];
    let n = second.read(&mut buf).unwrap_or(0);
    assert_eq!(n, 0);

    // The admitted client is still served.
    first.write_all(&frame(2, 1, &[0x03, 0, 1, 0, 1])).unwrap();
    assert_eq!(recv(&mut first).len(), 11);
}
