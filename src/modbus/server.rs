//! Modbus-TCP server: reactor-driven multi-client I/O thread.
//!
//! Runs in a dedicated thread using `edge-executor` for cooperative
//! scheduling and `async-io-mini` timers for pacing (no busy-spinning).
//! Two concurrent futures share the client table:
//!
//! 1. **Accept**: polls the non-blocking listener every 50 ms
//! 2. **Serve**: polls every client every 1 ms, decodes MBAP frames and
//!    answers each one under the device lock
//!
//! ```text
//!  ┌──────────────────────────────────────────────────────────┐
//!  │  modbus-io thread                                        │
//!  │  ┌────────────────────────────────────────────────────┐  │
//!  │  │  edge_executor::LocalExecutor                      │  │
//!  │  │  ┌──────────┐        ┌───────────────────────────┐ │  │
//!  │  │  │ Accept   │        │ Serve                     │ │  │
//!  │  │  │ 50ms ⏱   │──────▶│ 1ms ⏱  read·decode·reply  │ │  │
//!  │  │  └──────────┘ slots  └─────────────┬─────────────┘ │  │
//!  │  └────────────────────────────────────┼───────────────┘  │
//!  └───────────────────────────────────────┼──────────────────┘
//!                                          ▼
//!                          SharedDevice::lock(|dev| engine.handle_frame)
//! ```
//!
//! Requests are answered strictly in arrival order per connection. A
//! connection beyond `max_clients` is closed straight away, and one that
//! stays silent longer than the idle timeout is dropped.

use core::cell::RefCell;
use core::time::Duration;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::rc::Rc;
use std::time::Instant;

use log::{debug, info, warn};

use crate::app::ports::{ClockPort, EventSink, PersistPort};
use crate::app::shared::SharedDevice;
use crate::config::{MAX_MODBUS_CLIENTS, SystemConfig};

use super::codec::{FrameDecoder, MAX_ADU_SIZE};
use super::engine::ModbusEngine;

const ACCEPT_POLL: Duration = Duration::from_millis(50);
const READ_POLL: Duration = Duration::from_millis(1);
const READ_BUF_SIZE: usize = 512;

/// Listener settings, taken from [`SystemConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    pub unit_id: u8,
    pub max_clients: usize,
    pub idle_timeout: Duration,
}

impl ServerConfig {
    pub fn from_system(cfg: &SystemConfig) -> Self {
        Self {
            port: cfg.modbus_port,
            unit_id: cfg.modbus_unit_id,
            max_clients: usize::from(cfg.modbus_max_clients).clamp(1, MAX_MODBUS_CLIENTS),
            idle_timeout: Duration::from_millis(u64::from(cfg.modbus_idle_timeout_ms)),
        }
    }
}

// ── Per-client state ─────────────────────────────────────────

struct Client {
    stream: TcpStream,
    peer: SocketAddr,
    decoder: FrameDecoder,
    last_activity: Instant,
}

/// What happened to a client during one poll.
enum Poll {
    Idle,
    Served,
    Closed,
}

type Clients = Rc<RefCell<heapless::Vec<Client, MAX_MODBUS_CLIENTS>>>;

// ── Request dispatch ─────────────────────────────────────────

struct Dispatcher<P: PersistPort, C, S> {
    shared: SharedDevice<P>,
    engine: ModbusEngine,
    clock: C,
    sink: S,
}

impl<P: PersistPort, C: ClockPort, S: EventSink> Dispatcher<P, C, S> {
    /// Read whatever the client sent and answer every complete frame.
    fn poll_client(&mut self, client: &mut Client, buf: &mut [u8]) -> Poll {
        let n = match client.stream.read(buf) {
            Ok(0) => {
                info!("Modbus: client {} closed the connection", client.peer);
                return Poll::Closed;
            }
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Poll::Idle,
            Err(e) => {
                warn!("Modbus: read from {} failed: {}", client.peer, e);
                return Poll::Closed;
            }
        };
        client.last_activity = Instant::now();

        let mut data = &buf[..n];
        let mut out = [0u8; MAX_ADU_SIZE];
        while !data.is_empty() {
            let (used, frame) = client.decoder.feed(data);
            data = &data[used..];
            let Some(frame) = frame else { continue };

            let now = self.clock.now();
            let engine = &self.engine;
            let sink = &mut self.sink;
            let reply = self
                .shared
                .lock(|dev| engine.handle_frame(&frame, dev, now, sink, &mut out));

            if let Some(len) = reply {
                if let Err(e) = client.stream.write_all(&out[..len]) {
                    warn!("Modbus: write to {} failed: {}", client.peer, e);
                    return Poll::Closed;
                }
            }
        }
        Poll::Served
    }
}

// ── Async loops ──────────────────────────────────────────────

/// Accept task: admits new connections at 50 ms intervals.
async fn accept_loop(listener: TcpListener, clients: Clients, max_clients: usize) {
    loop {
        loop {
            match listener.accept() {
                Ok((stream, peer)) => admit(&clients, stream, peer, max_clients),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("Modbus: accept failed: {}", e);
                    break;
                }
            }
        }
        async_io_mini::Timer::after(ACCEPT_POLL).await;
    }
}

fn admit(clients: &Clients, stream: TcpStream, peer: SocketAddr, max_clients: usize) {
    let mut slots = clients.borrow_mut();
    if slots.len() >= max_clients {
        warn!("Modbus: {} refused, {} clients already connected", peer, slots.len());
        return;
    }
    if let Err(e) = stream.set_nonblocking(true) {
        warn!("Modbus: {} refused, non-blocking mode failed: {}", peer, e);
        return;
    }
    let _ = stream.set_nodelay(true);
    let client = Client {
        stream,
        peer,
        decoder: FrameDecoder::new(),
        last_activity: Instant::now(),
    };
    if slots.push(client).is_ok() {
        info!("Modbus: client {} connected ({}/{})", peer, slots.len(), max_clients);
    }
}

/// Serve task: polls every connected client at 1 ms intervals and
/// expires idle ones.
async fn serve_loop<P, C, S>(clients: Clients, mut dispatcher: Dispatcher<P, C, S>, idle_timeout: Duration)
where
    P: PersistPort,
    C: ClockPort,
    S: EventSink,
{
    let mut buf = [0u8; READ_BUF_SIZE];
    loop {
        {
            let mut slots = clients.borrow_mut();
            let mut i = 0;
            while i < slots.len() {
                let keep = match dispatcher.poll_client(&mut slots[i], &mut buf) {
                    Poll::Closed => false,
                    Poll::Served => true,
                    Poll::Idle => {
                        let silent = slots[i].last_activity.elapsed();
                        if silent > idle_timeout {
                            info!("Modbus: client {} idle for {:?}, dropped", slots[i].peer, silent);
                            false
                        } else {
                            true
                        }
                    }
                };
                if keep {
                    i += 1;
                } else {
                    slots.swap_remove(i);
                }
            }
        }
        async_io_mini::Timer::after(READ_POLL).await;
    }
}

// ── Server ───────────────────────────────────────────────────

/// A bound, not yet running, Modbus-TCP listener.
pub struct ModbusServer {
    listener: TcpListener,
    config: ServerConfig,
}

impl ModbusServer {
    /// Bind on all interfaces. Port 0 picks an ephemeral port.
    pub fn bind(config: ServerConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", config.port))?;
        listener.set_nonblocking(true)?;
        info!(
            "Modbus: listening on {} (unit {}, {} clients, idle {:?})",
            listener.local_addr()?,
            config.unit_id,
            config.max_clients,
            config.idle_timeout
        );
        Ok(Self { listener, config })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the I/O loop on the calling thread. Never returns.
    pub fn run<P, C, S>(self, shared: SharedDevice<P>, clock: C, sink: S)
    where
        P: PersistPort,
        C: ClockPort,
        S: EventSink,
    {
        let caps = shared.lock(|dev| *dev.caps());
        let dispatcher = Dispatcher {
            shared,
            engine: ModbusEngine::new(caps, self.config.unit_id),
            clock,
            sink,
        };
        debug!("Modbus: register map ends at {}", dispatcher.engine.map().max_address());

        let executor: edge_executor::LocalExecutor<'_, 4> = edge_executor::LocalExecutor::new();
        let clients: Clients = Rc::new(RefCell::new(heapless::Vec::new()));

        executor
            .spawn(accept_loop(self.listener, clients.clone(), self.config.max_clients))
            .detach();
        executor
            .spawn(serve_loop(clients, dispatcher, self.config.idle_timeout))
            .detach();

        futures_lite::future::block_on(executor.run(core::future::pending::<()>()));
    }
}

// ── Thread spawn ─────────────────────────────────────────────

/// Bind and spawn the server thread pinned to the protocol core.
pub fn spawn<P, C, S>(
    config: ServerConfig,
    shared: SharedDevice<P>,
    clock: C,
    sink: S,
) -> io::Result<std::thread::JoinHandle<()>>
where
    P: PersistPort + Send + 'static,
    C: ClockPort + Send + 'static,
    S: EventSink + Send + 'static,
{
    let server = ModbusServer::bind(config)?;
    crate::drivers::task_pin::spawn_on_core(
        crate::drivers::task_pin::Core::Pro,
        5,
        8,
        "modbus-io\0",
        move || server.run(shared, clock, sink),
    )
}
