//! IPv4 multicast transport over UDP.
//!
//! A responder socket binds the group port with address reuse enabled and
//! joins the group, so several responders can share one host. A requester
//! socket binds an ephemeral port, never joins, and sends to the group; its
//! replies arrive by unicast on that ephemeral port.
//!
//! # Example
//!
//! ```ignore
//! use multicast_lookup::transport::{MulticastOptions, Transport, UdpTransport};
//!
//! let options = MulticastOptions::default();
//! let responder_side = UdpTransport::join(&options)?;
//! let requester_side = UdpTransport::unicast(&options)?;
//! requester_side.broadcast(b"...").await?;
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;

use super::{BoxFuture, Datagram, Transport};
use crate::error::{DiscoveryError, Result};
use crate::protocol::MAX_PACKET_SIZE;
use crate::types::Reference;

/// Default multicast group (administratively scoped).
pub const DEFAULT_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 0, 1);

/// Default multicast port.
pub const DEFAULT_PORT: u16 = 10000;

/// Receive buffer size. Larger than any packet we send so oversized
/// datagrams are seen whole and rejected by the decoder.
const RECV_BUFFER_SIZE: usize = MAX_PACKET_SIZE * 2;

/// Socket-level multicast settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MulticastOptions {
    /// Group address.
    pub group: Ipv4Addr,
    /// Group port.
    pub port: u16,
    /// Local interface used to join the group (`0.0.0.0` = kernel choice).
    pub interface: Ipv4Addr,
    /// Multicast time-to-live (1 = stay on the local subnet).
    pub ttl: u32,
    /// Deliver our own multicast datagrams back to this host.
    pub loopback: bool,
    /// Host advertised in reply references. When unset the wildcard address
    /// is advertised and responders substitute the datagram source.
    pub reply_host: Option<IpAddr>,
}

impl Default for MulticastOptions {
    fn default() -> Self {
        Self {
            group: DEFAULT_GROUP,
            port: DEFAULT_PORT,
            interface: Ipv4Addr::UNSPECIFIED,
            ttl: 1,
            loopback: true,
            reply_host: None,
        }
    }
}

impl MulticastOptions {
    /// Options for the given group and port, defaults elsewhere.
    pub fn new(group: Ipv4Addr, port: u16) -> Self {
        Self {
            group,
            port,
            ..Self::default()
        }
    }

    fn group_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.group, self.port)
    }

    fn check_group(&self) -> Result<()> {
        if !self.group.is_multicast() {
            return Err(DiscoveryError::TransportSetup(format!(
                "{} is not a multicast address",
                self.group
            )));
        }
        Ok(())
    }
}

/// UDP socket attached to a multicast group.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    group: SocketAddrV4,
    interface: Ipv4Addr,
    joined: AtomicBool,
    local: Reference,
}

impl UdpTransport {
    /// Bind the group port and join the group (responder side).
    ///
    /// Must be called from within a tokio runtime. The socket is closed on
    /// every error path.
    pub fn join(options: &MulticastOptions) -> Result<Self> {
        options.check_group()?;

        let std_socket = bind_reusable(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, options.port))
            .map_err(|e| setup_error("bind", options.port, e))?;
        let socket = into_tokio(std_socket)?;

        configure(&socket, options)?;
        socket
            .join_multicast_v4(options.group, options.interface)
            .map_err(|e| {
                DiscoveryError::TransportSetup(format!("join {}: {}", options.group, e))
            })?;

        let local = advertised_reference(&socket, options)?;
        tracing::debug!(group = %options.group, port = options.port, "Joined multicast group");

        Ok(Self {
            socket,
            group: options.group_addr(),
            interface: options.interface,
            joined: AtomicBool::new(true),
            local,
        })
    }

    /// Bind an ephemeral unicast port that sends to the group (requester
    /// side). Does not join the group.
    pub fn unicast(options: &MulticastOptions) -> Result<Self> {
        options.check_group()?;

        let std_socket = std::net::UdpSocket::bind(SocketAddrV4::new(options.interface, 0))
            .map_err(|e| setup_error("bind", 0, e))?;
        let socket = into_tokio(std_socket)?;
        configure(&socket, options)?;

        let local = advertised_reference(&socket, options)?;
        tracing::debug!(local = %local, group = %options.group, "Bound requester socket");

        Ok(Self {
            socket,
            group: options.group_addr(),
            interface: options.interface,
            joined: AtomicBool::new(false),
            local,
        })
    }

    /// Local socket address of the underlying socket.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

impl Transport for UdpTransport {
    fn local_reference(&self) -> Reference {
        self.local.clone()
    }

    fn broadcast<'a>(&'a self, data: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let n = self.socket.send_to(data, self.group).await?;
            if n != data.len() {
                return Err(DiscoveryError::TransportSetup(format!(
                    "short multicast send: {} of {} bytes",
                    n,
                    data.len()
                )));
            }
            Ok(())
        })
    }

    fn send_to<'a>(&'a self, data: &'a [u8], to: &'a Reference) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let addr = to.to_socket_addr()?;
            self.socket.send_to(data, addr).await?;
            Ok(())
        })
    }

    fn recv(&self) -> BoxFuture<'_, Result<Datagram>> {
        Box::pin(async move {
            let mut buf = vec![0u8; RECV_BUFFER_SIZE];
            let (n, from) = self.socket.recv_from(&mut buf).await?;
            buf.truncate(n);
            Ok(Datagram::new(Bytes::from(buf), Reference::from(from)))
        })
    }

    fn shutdown(&self) -> Result<()> {
        if self.joined.swap(false, Ordering::AcqRel) {
            self.socket
                .leave_multicast_v4(*self.group.ip(), self.interface)?;
            tracing::debug!(group = %self.group, "Left multicast group");
        }
        Ok(())
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        if let Err(e) = Transport::shutdown(self) {
            tracing::debug!("Leaving multicast group on drop failed: {}", e);
        }
    }
}

fn setup_error(what: &str, port: u16, e: std::io::Error) -> DiscoveryError {
    DiscoveryError::TransportSetup(format!("{} port {}: {}", what, port, e))
}

fn into_tokio(socket: std::net::UdpSocket) -> Result<UdpSocket> {
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket)
        .map_err(|e| DiscoveryError::TransportSetup(format!("register socket: {}", e)))
}

fn configure(socket: &UdpSocket, options: &MulticastOptions) -> Result<()> {
    socket
        .set_multicast_ttl_v4(options.ttl)
        .and_then(|_| socket.set_multicast_loop_v4(options.loopback))
        .map_err(|e| DiscoveryError::TransportSetup(format!("multicast options: {}", e)))
}

fn advertised_reference(socket: &UdpSocket, options: &MulticastOptions) -> Result<Reference> {
    let local = socket.local_addr()?;
    let host = options.reply_host.unwrap_or(local.ip());
    Ok(Reference::from(SocketAddr::new(host, local.port())))
}

/// Bind a UDP socket with SO_REUSEADDR (and SO_REUSEPORT where available)
/// set before `bind`, so several listeners can share the group port.
#[cfg(unix)]
fn bind_reusable(addr: SocketAddrV4) -> std::io::Result<std::net::UdpSocket> {
    use nix::sys::socket::{
        bind, setsockopt, socket, sockopt, AddressFamily, SockFlag, SockProtocol, SockType,
        SockaddrIn,
    };
    use std::os::fd::AsRawFd;

    let fd = socket(
        AddressFamily::Inet,
        SockType::Datagram,
        SockFlag::empty(),
        SockProtocol::Udp,
    )?;

    setsockopt(&fd, sockopt::ReuseAddr, &true)?;
    #[cfg(any(target_os = "linux", target_os = "android", target_os = "macos"))]
    setsockopt(&fd, sockopt::ReusePort, &true)?;

    bind(fd.as_raw_fd(), &SockaddrIn::from(addr))?;
    Ok(std::net::UdpSocket::from(fd))
}

#[cfg(not(unix))]
fn bind_reusable(addr: SocketAddrV4) -> std::io::Result<std::net::UdpSocket> {
    std::net::UdpSocket::bind(addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = MulticastOptions::default();
        assert_eq!(options.group, DEFAULT_GROUP);
        assert_eq!(options.port, DEFAULT_PORT);
        assert_eq!(options.ttl, 1);
        assert!(options.loopback);
        assert!(options.reply_host.is_none());
    }

    #[tokio::test]
    async fn test_non_multicast_group_is_setup_failure() {
        let options = MulticastOptions::new(Ipv4Addr::new(10, 0, 0, 1), 0);

        assert!(matches!(
            UdpTransport::join(&options),
            Err(DiscoveryError::TransportSetup(_))
        ));
        assert!(matches!(
            UdpTransport::unicast(&options),
            Err(DiscoveryError::TransportSetup(_))
        ));
    }

    #[tokio::test]
    async fn test_unicast_binds_ephemeral_port() {
        let options = MulticastOptions::default();
        let transport = UdpTransport::unicast(&options).unwrap();

        let addr = transport.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(
            transport.local_reference().to_socket_addr().unwrap().port(),
            addr.port()
        );
    }

    #[tokio::test]
    async fn test_reply_host_is_advertised() {
        let options = MulticastOptions {
            reply_host: Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            ..MulticastOptions::default()
        };
        let transport = UdpTransport::unicast(&options).unwrap();

        let advertised = transport.local_reference().to_socket_addr().unwrap();
        assert_eq!(advertised.ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    #[tokio::test]
    async fn test_unicast_send_and_recv() {
        let options = MulticastOptions {
            reply_host: Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            ..MulticastOptions::default()
        };
        let a = UdpTransport::unicast(&options).unwrap();
        let b = UdpTransport::unicast(&options).unwrap();

        a.send_to(b"ping", &b.local_reference()).await.unwrap();
        let datagram = b.recv().await.unwrap();

        assert_eq!(&datagram.data[..], b"ping");
        assert_eq!(
            datagram.source.to_socket_addr().unwrap().port(),
            a.local_addr().unwrap().port()
        );
    }

    #[tokio::test]
    async fn test_send_to_invalid_reference() {
        let transport = UdpTransport::unicast(&MulticastOptions::default()).unwrap();
        let result = transport.send_to(b"x", &Reference::from("no-such-host")).await;
        assert!(matches!(result, Err(DiscoveryError::InvalidReference(_))));
    }
}
