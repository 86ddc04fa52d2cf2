//! Outbound tally transport
//!
//! Tally packets go out as plain UDP datagrams to a multicast group. The
//! socket is built with `socket2` so the multicast TTL can be set before it
//! is handed to tokio.

use socket2::{Domain, Protocol, Socket, Type};
use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use tokio::net::UdpSocket;

use crate::config::TallyConfig;
use crate::error::NetworkError;

/// Destination for rendered tally payloads
pub trait TallySink: Send + Sync {
    fn send(&self, payload: &[u8]) -> impl Future<Output = Result<(), NetworkError>> + Send;
}

impl<S: TallySink> TallySink for Arc<S> {
    fn send(&self, payload: &[u8]) -> impl Future<Output = Result<(), NetworkError>> + Send {
        (**self).send(payload)
    }
}

/// Create an unbound-port UDP socket with the given multicast TTL
pub fn create_multicast_socket(ttl: u32) -> Result<std::net::UdpSocket, NetworkError> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| NetworkError::SocketSetup(e.to_string()))?;

    socket
        .set_multicast_ttl_v4(ttl)
        .map_err(|e| NetworkError::SocketSetup(format!("multicast TTL: {}", e)))?;
    socket
        .set_nonblocking(true)
        .map_err(|e| NetworkError::SocketSetup(e.to_string()))?;

    let local = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
    socket
        .bind(&local.into())
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    Ok(socket.into())
}

/// Sends each payload as one datagram to a fixed destination
pub struct MulticastSink {
    socket: UdpSocket,
    destination: SocketAddrV4,
}

impl MulticastSink {
    /// Must be called inside a tokio runtime
    pub fn new(destination: SocketAddrV4, ttl: u32) -> Result<Self, NetworkError> {
        let socket = UdpSocket::from_std(create_multicast_socket(ttl)?)
            .map_err(|e| NetworkError::SocketSetup(e.to_string()))?;

        tracing::info!("Tally multicast socket ready for {} (ttl {})", destination, ttl);
        Ok(Self {
            socket,
            destination,
        })
    }

    pub fn from_config(config: &TallyConfig) -> Result<Self, NetworkError> {
        Self::new(SocketAddrV4::new(config.group, config.port), config.ttl)
    }

    pub fn destination(&self) -> SocketAddrV4 {
        self.destination
    }
}

impl TallySink for MulticastSink {
    async fn send(&self, payload: &[u8]) -> Result<(), NetworkError> {
        let sent = self
            .socket
            .send_to(payload, self.destination)
            .await
            .map_err(|e| NetworkError::SendFailed(e.to_string()))?;

        if sent != payload.len() {
            return Err(NetworkError::ShortSend {
                sent,
                expected: payload.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sink_sends_single_datagram() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = receiver.local_addr().unwrap().port();

        let sink = MulticastSink::new(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port), 2).unwrap();
        let mut payload = [0u8; 256];
        payload[2] = 2;
        payload[4] = 1;
        sink.send(&payload).await.unwrap();

        let mut buf = [0u8; 512];
        let (len, _) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(len, 256);
        assert_eq!(&buf[..len], &payload[..]);
    }

    #[test]
    fn test_socket_ttl() {
        let socket = create_multicast_socket(2).unwrap();
        assert_eq!(socket2::SockRef::from(&socket).multicast_ttl_v4().unwrap(), 2);
    }
}
