//! Dual-channel transport: TCP control + UDP voice
//!
//! Each connection runs a control receive loop, a voice receive loop and a
//! control writer as tokio tasks. Everything they observe is reported as a
//! [`TransportEvent`] on an unbounded channel, so emitting never blocks.
//!
//! Stopping a connection clears the running flags and signals a shutdown
//! watch that every loop selects on; loops that wake with the flag already
//! cleared exit quietly.

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{lookup_host, TcpStream, UdpSocket};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::constants::MAX_DATAGRAM_SIZE;
use crate::error::NetworkError;
use crate::network::udp::create_voice_socket;
use crate::protocol::{parse_packet, ControlMessage, VoicePacket};

/// Control lines longer than this are discarded
pub const MAX_CONTROL_LINE: usize = 64 * 1024;

const CONTROL_READ_CHUNK: usize = 4096;

/// Server address and ports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEndpoint {
    pub host: String,
    pub tcp_port: u16,
    pub udp_port: u16,
}

/// Everything the transport reports upward
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Connectivity of connection `connection` changed. Ids increase with
    /// every [`Transport::connect`] call.
    Connected { connection: u64, connected: bool },
    Control(ControlMessage),
    Voice(VoicePacket),
    Error(String),
}

/// Control/voice transport as seen by the session
pub trait Transport: Send + Sync {
    /// Start connecting and return the new connection id; the outcome
    /// arrives as `TransportEvent::Connected` carrying that id
    fn connect(&self, endpoint: ServerEndpoint, token: String) -> u64;
    /// Queue a control message; failures are reported as events
    fn send_control(&self, message: ControlMessage);
    /// Best-effort voice datagram send
    fn send_voice(&self, datagram: Bytes);
    /// Stop both loops and close both sockets. Idempotent.
    fn disconnect(&self);
}

/// Transport counters
#[derive(Debug, Default)]
pub struct TransportStats {
    control_sent: AtomicU64,
    control_received: AtomicU64,
    malformed_control: AtomicU64,
    voice_sent: AtomicU64,
    voice_received: AtomicU64,
    malformed_voice: AtomicU64,
    voice_dropped: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStatsSnapshot {
    pub control_sent: u64,
    pub control_received: u64,
    pub malformed_control: u64,
    pub voice_sent: u64,
    pub voice_received: u64,
    pub malformed_voice: u64,
    /// Frames skipped because the connection lock was busy
    pub voice_dropped: u64,
}

impl TransportStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TransportStatsSnapshot {
        TransportStatsSnapshot {
            control_sent: self.control_sent.load(Ordering::Relaxed),
            control_received: self.control_received.load(Ordering::Relaxed),
            malformed_control: self.malformed_control.load(Ordering::Relaxed),
            voice_sent: self.voice_sent.load(Ordering::Relaxed),
            voice_received: self.voice_received.load(Ordering::Relaxed),
            malformed_voice: self.malformed_voice.load(Ordering::Relaxed),
            voice_dropped: self.voice_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Live sockets of one connection
struct Connection {
    id: u64,
    peer: SocketAddr,
    control_tx: mpsc::UnboundedSender<String>,
    /// Send side of the voice socket (a dup of the receive side)
    voice_tx: Arc<std::net::UdpSocket>,
    control_running: Arc<AtomicBool>,
    voice_running: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
}

struct Shared {
    events: mpsc::UnboundedSender<TransportEvent>,
    connection: Mutex<Option<Connection>>,
    /// Bumped by every connect and disconnect; stale connects are abandoned
    generation: AtomicU64,
    active_loops: AtomicUsize,
    /// Writer task of the most recent connection
    writer: Mutex<Option<JoinHandle<()>>>,
    stats: TransportStats,
}

impl Shared {
    fn emit(&self, event: TransportEvent) {
        // The session may already be gone during shutdown
        let _ = self.events.send(event);
    }

    /// Tear down the current connection, or only connection `id` if given.
    /// Returns whether anything was torn down.
    fn teardown(&self, id: Option<u64>) -> bool {
        let connection = {
            let mut guard = self.connection.lock();
            match guard.as_ref() {
                Some(conn) if id.map_or(true, |id| id == conn.id) => guard.take(),
                _ => None,
            }
        };

        let Some(connection) = connection else {
            return false;
        };

        connection.control_running.store(false, Ordering::SeqCst);
        connection.voice_running.store(false, Ordering::SeqCst);
        let _ = connection.shutdown.send(true);
        tracing::info!(peer = %connection.peer, "Disconnected from voice server");
        let id = connection.id;
        // Dropping the connection closes the writer queue and the voice send socket
        drop(connection);

        self.emit(TransportEvent::Connected {
            connection: id,
            connected: false,
        });
        true
    }

    fn handle_control_line(&self, raw: &[u8]) {
        let line = match std::str::from_utf8(raw) {
            Ok(line) => line.trim(),
            Err(e) => {
                TransportStats::bump(&self.stats.malformed_control);
                tracing::warn!("Dropping non UTF-8 control line: {}", e);
                return;
            }
        };
        if line.is_empty() {
            return;
        }

        tracing::trace!("TCP receive from server: {}", line);
        match ControlMessage::from_line(line) {
            Ok(message) => {
                TransportStats::bump(&self.stats.control_received);
                self.emit(TransportEvent::Control(message));
            }
            Err(e) => {
                TransportStats::bump(&self.stats.malformed_control);
                tracing::warn!("Failed to process control message: {}", e);
            }
        }
    }

    fn handle_datagram(&self, data: &[u8]) {
        match parse_packet(data) {
            Some(packet) => {
                TransportStats::bump(&self.stats.voice_received);
                tracing::trace!(
                    cid = packet.cid,
                    callsign = %packet.callsign,
                    frequency = packet.frequency,
                    bytes = packet.payload.len(),
                    "Voice packet received"
                );
                self.emit(TransportEvent::Voice(packet));
            }
            None => TransportStats::bump(&self.stats.malformed_voice),
        }
    }
}

/// Decrements the live-loop counter when a loop exits
struct LoopGuard<'a>(&'a AtomicUsize);

impl<'a> LoopGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for LoopGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// tokio-backed implementation of [`Transport`]
pub struct NetworkTransport {
    shared: Arc<Shared>,
    runtime: Handle,
}

impl NetworkTransport {
    pub fn new(runtime: Handle, events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            shared: Arc::new(Shared {
                events,
                connection: Mutex::new(None),
                generation: AtomicU64::new(0),
                active_loops: AtomicUsize::new(0),
                writer: Mutex::new(None),
                stats: TransportStats::default(),
            }),
            runtime,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connection.lock().is_some()
    }

    /// Number of receive loops still running
    pub fn active_loops(&self) -> usize {
        self.shared.active_loops.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> TransportStatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Wait up to `limit` for the last connection's writer to drain its
    /// queue and close the control stream. Returns false on timeout.
    pub async fn flush(&self, limit: Duration) -> bool {
        let writer = self.shared.writer.lock().take();
        match writer {
            Some(writer) => tokio::time::timeout(limit, writer).await.is_ok(),
            None => true,
        }
    }
}

impl Transport for NetworkTransport {
    fn connect(&self, endpoint: ServerEndpoint, token: String) -> u64 {
        let shared = self.shared.clone();
        let id = shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        shared.teardown(None);

        self.runtime.spawn(async move {
            match establish(&endpoint, &token).await {
                Ok(parts) => start_connection(shared, id, parts),
                Err(e) => {
                    tracing::error!("Failed to connect to server: {}", e);
                    shared.teardown(Some(id));
                    shared.emit(TransportEvent::Error(format!("Connection failed: {}", e)));
                    shared.emit(TransportEvent::Connected {
                        connection: id,
                        connected: false,
                    });
                }
            }
        });
        id
    }

    fn send_control(&self, message: ControlMessage) {
        let line = match message.to_line() {
            Ok(line) => line,
            Err(e) => {
                self.shared
                    .emit(TransportEvent::Error(format!("Failed to send control message: {}", e)));
                return;
            }
        };

        let queued = {
            let guard = self.shared.connection.lock();
            guard.as_ref().map(|conn| conn.control_tx.send(line).is_ok())
        };
        match queued {
            Some(true) => {}
            Some(false) => self
                .shared
                .emit(TransportEvent::Error("Control channel closed".to_string())),
            None => tracing::debug!(kind = ?message.kind, "Not connected, dropping control message"),
        }
    }

    fn send_voice(&self, datagram: Bytes) {
        // Called from the capture callback: never wait for the connection lock
        let socket = match self.shared.connection.try_lock() {
            Some(guard) => guard.as_ref().map(|conn| conn.voice_tx.clone()),
            None => {
                TransportStats::bump(&self.shared.stats.voice_dropped);
                return;
            }
        };
        let Some(socket) = socket else {
            return;
        };

        match socket.send(&datagram) {
            Ok(_) => TransportStats::bump(&self.shared.stats.voice_sent),
            Err(e) => tracing::debug!("Failed to send voice packet: {}", e),
        }
    }

    fn disconnect(&self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.shared.teardown(None);
    }
}

impl Drop for NetworkTransport {
    fn drop(&mut self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        let connection = self.shared.connection.lock().take();
        if let Some(connection) = connection {
            connection.control_running.store(false, Ordering::SeqCst);
            connection.voice_running.store(false, Ordering::SeqCst);
            let _ = connection.shutdown.send(true);
        }
    }
}

/// Sockets of a freshly established connection
struct Established {
    peer: SocketAddr,
    read_half: OwnedReadHalf,
    write_half: OwnedWriteHalf,
    voice_rx: UdpSocket,
    voice_tx: std::net::UdpSocket,
}

async fn establish(endpoint: &ServerEndpoint, token: &str) -> Result<Established, NetworkError> {
    tracing::info!("Connect to tcp://{}:{}", endpoint.host, endpoint.tcp_port);
    let tcp = TcpStream::connect((endpoint.host.as_str(), endpoint.tcp_port))
        .await
        .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;
    if let Err(e) = tcp.set_nodelay(true) {
        tracing::debug!("Failed to set TCP_NODELAY: {}", e);
    }

    let peer = lookup_host((endpoint.host.as_str(), endpoint.udp_port))
        .await
        .map_err(|e| NetworkError::Resolve(e.to_string()))?
        .next()
        .ok_or_else(|| NetworkError::Resolve(endpoint.host.clone()))?;

    tracing::info!("Connect to udp://{}", peer);
    let voice_rx = create_voice_socket(peer).map_err(|e| NetworkError::BindFailed(e.to_string()))?;
    let voice_tx = voice_rx
        .try_clone()
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
    let voice_rx = UdpSocket::from_std(voice_rx).map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    let (read_half, mut write_half) = tcp.into_split();
    // The token line is the authentication handshake
    write_half
        .write_all(format!("{}\n", token).as_bytes())
        .await
        .map_err(|e| NetworkError::SendFailed(e.to_string()))?;

    Ok(Established {
        peer,
        read_half,
        write_half,
        voice_rx,
        voice_tx,
    })
}

fn start_connection(shared: Arc<Shared>, id: u64, parts: Established) {
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let control_running = Arc::new(AtomicBool::new(true));
    let voice_running = Arc::new(AtomicBool::new(true));

    {
        let mut guard = shared.connection.lock();
        if shared.generation.load(Ordering::SeqCst) != id {
            drop(guard);
            tracing::info!("Connection superseded before it was established, closing");
            shared.emit(TransportEvent::Connected {
                connection: id,
                connected: false,
            });
            return;
        }
        *guard = Some(Connection {
            id,
            peer: parts.peer,
            control_tx,
            voice_tx: Arc::new(parts.voice_tx),
            control_running: control_running.clone(),
            voice_running: voice_running.clone(),
            shutdown: shutdown_tx,
        });
    }

    // Connected goes out before any loop can report a disconnect
    tracing::info!(peer = %parts.peer, "Connected to voice server");
    shared.emit(TransportEvent::Connected {
        connection: id,
        connected: true,
    });

    let writer = tokio::spawn(control_writer(shared.clone(), id, parts.write_half, control_rx));
    *shared.writer.lock() = Some(writer);
    tokio::spawn(control_receive_loop(
        shared.clone(),
        id,
        parts.read_half,
        control_running,
        shutdown_rx.clone(),
    ));
    tokio::spawn(voice_receive_loop(
        shared,
        parts.voice_rx,
        voice_running,
        shutdown_rx,
    ));
}

async fn control_writer(
    shared: Arc<Shared>,
    id: u64,
    mut write_half: OwnedWriteHalf,
    mut queue: mpsc::UnboundedReceiver<String>,
) {
    // Runs until the connection drops its sender, flushing what was queued
    while let Some(line) = queue.recv().await {
        if let Err(e) = write_half.write_all(line.as_bytes()).await {
            tracing::error!("Failed to send control message: {}", e);
            shared.emit(TransportEvent::Error(format!("Failed to send control message: {}", e)));
            shared.teardown(Some(id));
            return;
        }
        TransportStats::bump(&shared.stats.control_sent);
    }
    let _ = write_half.shutdown().await;
}

async fn control_receive_loop(
    shared: Arc<Shared>,
    id: u64,
    mut read_half: OwnedReadHalf,
    running: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
) {
    let _guard = LoopGuard::enter(&shared.active_loops);
    let mut buffer = BytesMut::with_capacity(CONTROL_READ_CHUNK);
    let mut chunk = [0u8; CONTROL_READ_CHUNK];

    loop {
        let read = tokio::select! {
            _ = shutdown.changed() => break,
            read = read_half.read(&mut chunk) => read,
        };

        match read {
            Ok(0) => {
                if running.load(Ordering::SeqCst) {
                    tracing::info!("Control channel closed by server");
                }
                break;
            }
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let line = buffer.split_to(pos + 1);
                    shared.handle_control_line(&line);
                }
                if buffer.len() > MAX_CONTROL_LINE {
                    tracing::warn!("Control line exceeds {} bytes, discarding", MAX_CONTROL_LINE);
                    TransportStats::bump(&shared.stats.malformed_control);
                    buffer.clear();
                }
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    tracing::error!("TCP receive error: {}", e);
                }
                break;
            }
        }
    }

    shared.teardown(Some(id));
}

async fn voice_receive_loop(
    shared: Arc<Shared>,
    socket: UdpSocket,
    running: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
) {
    let _guard = LoopGuard::enter(&shared.active_loops);
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        let received = tokio::select! {
            _ = shutdown.changed() => break,
            received = socket.recv(&mut buf) => received,
        };

        match received {
            Ok(n) => shared.handle_datagram(&buf[..n]),
            // ICMP unreachable from a peer that is not listening yet
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                tracing::debug!("UDP peer unreachable: {}", e);
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    tracing::error!("UDP receive error: {}", e);
                }
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageType;

    fn shared() -> (Arc<Shared>, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            events: tx,
            connection: Mutex::new(None),
            generation: AtomicU64::new(0),
            active_loops: AtomicUsize::new(0),
            writer: Mutex::new(None),
            stats: TransportStats::default(),
        });
        (shared, rx)
    }

    #[test]
    fn test_control_line_parsing() {
        let (shared, mut rx) = shared();

        shared.handle_control_line(b"{\"type\":\"pong\",\"cid\":7}\n");
        shared.handle_control_line(b"garbage\n");
        shared.handle_control_line(b"\xff\xfe\n");
        shared.handle_control_line(b"\r\n");

        match rx.try_recv().unwrap() {
            TransportEvent::Control(msg) => {
                assert_eq!(msg.kind, MessageType::Pong);
                assert_eq!(msg.cid, 7);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(rx.try_recv().is_err());

        let stats = shared.stats.snapshot();
        assert_eq!(stats.control_received, 1);
        assert_eq!(stats.malformed_control, 2);
    }

    #[test]
    fn test_malformed_datagram_is_dropped() {
        let (shared, mut rx) = shared();

        shared.handle_datagram(&[0u8; 4]);
        assert!(rx.try_recv().is_err());
        assert_eq!(shared.stats.snapshot().malformed_voice, 1);
    }

    #[test]
    fn test_teardown_without_connection_is_noop() {
        let (shared, mut rx) = shared();
        assert!(!shared.teardown(None));
        assert!(!shared.teardown(Some(3)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_voice_send_skips_busy_connection_lock() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport = NetworkTransport::new(Handle::current(), tx);

        // Not connected: nothing to send, nothing dropped
        transport.send_voice(Bytes::from_static(b"idle"));
        assert_eq!(transport.stats().voice_dropped, 0);

        let guard = transport.shared.connection.lock();
        transport.send_voice(Bytes::from_static(b"busy"));
        transport.send_voice(Bytes::from_static(b"busy"));
        drop(guard);

        let stats = transport.stats();
        assert_eq!(stats.voice_dropped, 2);
        assert_eq!(stats.voice_sent, 0);
    }

    #[tokio::test]
    async fn test_flush_without_connection_returns_immediately() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let transport = NetworkTransport::new(Handle::current(), tx);
        assert!(transport.flush(Duration::from_millis(10)).await);
    }
}
