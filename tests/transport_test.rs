//! Network transport against a loopback server

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, UdpSocket};
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use atc_voice_client::{
    network::{NetworkTransport, ServerEndpoint, Transport, TransportEvent},
    protocol::{serialize_packet, ControlMessage, MessageType},
};

const TIMEOUT: Duration = Duration::from_secs(5);

struct TestServer {
    listener: TcpListener,
    udp: UdpSocket,
    endpoint: ServerEndpoint,
}

async fn spawn_test_server() -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let endpoint = ServerEndpoint {
        host: "127.0.0.1".to_string(),
        tcp_port: listener.local_addr().unwrap().port(),
        udp_port: udp.local_addr().unwrap().port(),
    };
    TestServer {
        listener,
        udp,
        endpoint,
    }
}

struct ServerConnection {
    lines: Lines<BufReader<OwnedReadHalf>>,
    write: OwnedWriteHalf,
}

impl ServerConnection {
    async fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = tokio::time::timeout(TIMEOUT, listener.accept())
            .await
            .unwrap()
            .unwrap();
        let (read, write) = stream.into_split();
        Self {
            lines: BufReader::new(read).lines(),
            write,
        }
    }

    async fn next_line(&mut self) -> Option<String> {
        tokio::time::timeout(TIMEOUT, self.lines.next_line())
            .await
            .unwrap()
            .unwrap()
    }
}

fn transport() -> (Arc<NetworkTransport>, mpsc::UnboundedReceiver<TransportEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(NetworkTransport::new(Handle::current(), tx)), rx)
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEvent {
    tokio::time::timeout(TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for transport event")
        .expect("event channel closed")
}

fn is_up(event: &TransportEvent, id: u64) -> bool {
    matches!(event, TransportEvent::Connected { connection, connected: true } if *connection == id)
}

fn is_down(event: &TransportEvent, id: u64) -> bool {
    matches!(event, TransportEvent::Connected { connection, connected: false } if *connection == id)
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached");
}

/// Connect and consume the handshake on both ends
async fn connected(
    server: &TestServer,
) -> (
    Arc<NetworkTransport>,
    mpsc::UnboundedReceiver<TransportEvent>,
    ServerConnection,
) {
    let (transport, mut rx) = transport();
    let id = transport.connect(server.endpoint.clone(), "jwt-token".to_string());
    assert_eq!(id, 1);

    let mut conn = ServerConnection::accept(&server.listener).await;
    assert_eq!(conn.next_line().await.as_deref(), Some("jwt-token"));
    assert!(is_up(&next_event(&mut rx).await, id));
    wait_until(|| transport.active_loops() == 2).await;

    (transport, rx, conn)
}

#[tokio::test]
async fn test_token_line_then_control_messages() {
    let server = spawn_test_server().await;
    let (transport, mut rx, mut conn) = connected(&server).await;

    transport.send_control(
        ControlMessage::new(MessageType::Switch, 1001, "CCA1234")
            .with_transmitter(1)
            .with_data("122800"),
    );
    let line = conn.next_line().await.unwrap();
    let sent = ControlMessage::from_line(&line).unwrap();
    assert_eq!(sent.kind, MessageType::Switch);
    assert_eq!(sent.transmitter, 1);
    assert_eq!(sent.data, "122800");

    // Malformed lines are skipped, split lines are reassembled
    conn.write.write_all(b"not json\n{\"type\":\"po").await.unwrap();
    conn.write.write_all(b"ng\",\"cid\":0}\n").await.unwrap();

    match next_event(&mut rx).await {
        TransportEvent::Control(message) => assert_eq!(message.kind, MessageType::Pong),
        other => panic!("unexpected event {:?}", other),
    }

    let stats = transport.stats();
    assert_eq!(stats.control_received, 1);
    assert_eq!(stats.malformed_control, 1);
    assert_eq!(stats.control_sent, 1);
}

#[tokio::test]
async fn test_voice_round_trip_through_server() {
    let server = spawn_test_server().await;
    let (transport, mut rx, _conn) = connected(&server).await;

    let datagram = serialize_packet(1001, 0, 122_800, "CCA1234", b"opus").unwrap();
    transport.send_voice(datagram.clone());

    let mut buf = [0u8; 2048];
    let (n, client) = tokio::time::timeout(TIMEOUT, server.udp.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..n], &datagram[..]);

    // Garbage first; it must be dropped without ending the loop
    server.udp.send_to(&[1, 2, 3], client).await.unwrap();
    server.udp.send_to(&datagram, client).await.unwrap();

    match next_event(&mut rx).await {
        TransportEvent::Voice(packet) => {
            assert_eq!(packet.callsign, "CCA1234");
            assert_eq!(packet.frequency, 122_800);
            assert_eq!(packet.payload, Bytes::from_static(b"opus"));
        }
        other => panic!("unexpected event {:?}", other),
    }

    let stats = transport.stats();
    assert_eq!(stats.voice_sent, 1);
    assert_eq!(stats.voice_received, 1);
    assert_eq!(stats.malformed_voice, 1);
}

#[tokio::test]
async fn test_disconnect_stops_both_loops() {
    let server = spawn_test_server().await;
    let (transport, mut rx, mut conn) = connected(&server).await;

    transport.disconnect();
    assert!(is_down(&next_event(&mut rx).await, 1));
    wait_until(|| transport.active_loops() == 0).await;
    assert!(!transport.is_connected());

    // Server sees the control channel close
    assert_eq!(conn.next_line().await, None);

    // Idempotent, and quiet the second time
    transport.disconnect();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());

    // Sending after teardown is a no-op
    transport.send_voice(Bytes::from_static(b"late"));
    transport.send_control(ControlMessage::new(MessageType::Ping, 0, ""));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_server_close_triggers_teardown() {
    let server = spawn_test_server().await;
    let (transport, mut rx, conn) = connected(&server).await;

    drop(conn);

    assert!(is_down(&next_event(&mut rx).await, 1));
    wait_until(|| transport.active_loops() == 0).await;
}

#[tokio::test]
async fn test_connect_failure_reports_error_then_down() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let (transport, mut rx) = transport();
    let id = transport.connect(
        ServerEndpoint {
            host: "127.0.0.1".to_string(),
            tcp_port: port,
            udp_port: port,
        },
        "jwt-token".to_string(),
    );

    assert!(matches!(next_event(&mut rx).await, TransportEvent::Error(_)));
    assert!(is_down(&next_event(&mut rx).await, id));
    assert_eq!(transport.active_loops(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_teardown_during_voice_sends() {
    let server = spawn_test_server().await;
    let (transport, mut rx, _conn) = connected(&server).await;

    let sender = {
        let transport = transport.clone();
        std::thread::spawn(move || {
            let datagram = serialize_packet(1001, 0, 122_800, "CCA1234", &[0u8; 60]).unwrap();
            for _ in 0..2000 {
                transport.send_voice(datagram.clone());
            }
        })
    };

    tokio::time::sleep(Duration::from_millis(1)).await;
    transport.disconnect();
    sender.join().unwrap();

    assert!(is_down(&next_event(&mut rx).await, 1));
    wait_until(|| transport.active_loops() == 0).await;
    assert!(!transport.is_connected());
}

#[tokio::test]
async fn test_reconnect_replaces_connection() {
    let server = spawn_test_server().await;
    let (transport, mut rx, _first) = connected(&server).await;

    let second_id = transport.connect(server.endpoint.clone(), "second".to_string());
    assert_eq!(second_id, 2);
    assert!(is_down(&next_event(&mut rx).await, 1));

    let mut second = ServerConnection::accept(&server.listener).await;
    assert_eq!(second.next_line().await.as_deref(), Some("second"));
    assert!(is_up(&next_event(&mut rx).await, second_id));
    wait_until(|| transport.active_loops() == 2).await;
}

#[tokio::test]
async fn test_disconnect_then_flush_delivers_queued_lines() {
    let server = spawn_test_server().await;
    let (transport, _rx, mut conn) = connected(&server).await;

    transport.send_control(ControlMessage::new(MessageType::Disconnect, 1001, "CCA1234"));
    transport.disconnect();
    assert!(transport.flush(TIMEOUT).await);

    let line = conn.next_line().await.unwrap();
    assert_eq!(ControlMessage::from_line(&line).unwrap().kind, MessageType::Disconnect);
    assert_eq!(conn.next_line().await, None);
    assert_eq!(transport.stats().control_sent, 1);
}
