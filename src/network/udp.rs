//! UDP socket setup for the media transport

use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

/// Socket buffer size; a few hundred milliseconds of audio
const SOCKET_BUFFER_SIZE: usize = 256 * 1024;

/// Create a non-blocking UDP socket bound to `addr`
pub fn create_socket(addr: SocketAddr) -> std::io::Result<UdpSocket> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;

    // Buffer sizes are a hint; some platforms clamp them
    if let Err(e) = socket.set_recv_buffer_size(SOCKET_BUFFER_SIZE) {
        tracing::debug!("Failed to set receive buffer size: {}", e);
    }
    if let Err(e) = socket.set_send_buffer_size(SOCKET_BUFFER_SIZE) {
        tracing::debug!("Failed to set send buffer size: {}", e);
    }

    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;

    Ok(socket.into())
}

/// Address of the interface that routes to the public internet.
///
/// Connecting a UDP socket sends nothing; it only resolves the route.
pub fn detect_local_ip() -> std::io::Result<IpAddr> {
    let route = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    route.connect((Ipv4Addr::new(8, 8, 8, 8), 80))?;
    Ok(route.local_addr()?.ip())
}
