//! Voice channel socket setup

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::constants::MAX_DATAGRAM_SIZE;

/// Kernel receive buffer requested for the voice socket
pub const RECV_BUFFER_SIZE: usize = MAX_DATAGRAM_SIZE * 4;

/// Create a non-blocking UDP socket connected to `peer`
pub fn create_voice_socket(peer: SocketAddr) -> io::Result<std::net::UdpSocket> {
    let (domain, local): (Domain, SocketAddr) = if peer.is_ipv4() {
        (Domain::IPV4, (Ipv4Addr::UNSPECIFIED, 0).into())
    } else {
        (Domain::IPV6, (Ipv6Addr::UNSPECIFIED, 0).into())
    };

    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    if let Err(e) = socket.set_recv_buffer_size(RECV_BUFFER_SIZE) {
        tracing::warn!("Failed to set UDP receive buffer size: {}", e);
    }
    socket.bind(&local.into())?;
    socket.connect(&peer.into())?;
    socket.set_nonblocking(true)?;

    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connected_socket_reaches_peer() {
        let peer = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let socket = create_voice_socket(peer.local_addr().unwrap()).unwrap();

        assert_eq!(socket.peer_addr().unwrap(), peer.local_addr().unwrap());
        socket.send(b"probe").unwrap();

        let mut buf = [0u8; 16];
        let (n, from) = peer.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"probe");
        assert_eq!(from.port(), socket.local_addr().unwrap().port());
    }
}
