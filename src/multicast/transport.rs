//! Datagram transports a channel can run over.
//!
//! `MulticastSocket` is the real thing: a UDP socket joined to one multicast
//! group. Several peers on one host can bind the same group port because the
//! socket sets `SO_REUSEADDR` (and `SO_REUSEPORT` on unix) before binding.

use socket2::{Domain, Protocol, Socket, Type};
use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::pin::Pin;
use tokio::net::UdpSocket;

/// Boxed future returned by `Transport` methods, so the trait stays object safe.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = io::Result<T>> + Send + 'a>>;

pub trait Transport: Send + Sync {
    /// Sends one datagram to the whole group.
    fn send<'a>(&'a self, datagram: &'a [u8]) -> TransportFuture<'a, ()>;

    /// Waits for the next datagram and copies it into `buf`, returning its length.
    fn recv<'a>(&'a self, buf: &'a mut [u8]) -> TransportFuture<'a, usize>;
}

pub struct MulticastSocket {
    socket: UdpSocket,
    group: SocketAddrV4,
}

impl MulticastSocket {
    /// Binds `0.0.0.0:<group port>` and joins `group` on the default interface.
    pub fn bind(group: SocketAddrV4) -> io::Result<Self> {
        if !group.ip().is_multicast() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a multicast address", group.ip()),
            ));
        }

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        #[cfg(unix)]
        socket.set_reuse_port(true)?;

        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, group.port());
        socket.bind(&SocketAddr::V4(bind_addr).into())?;
        socket.join_multicast_v4(group.ip(), &Ipv4Addr::UNSPECIFIED)?;
        socket.set_multicast_loop_v4(true)?;
        socket.set_nonblocking(true)?;

        let socket = UdpSocket::from_std(socket.into())?;

        tracing::info!("Joined multicast group {}", group);

        Ok(Self { socket, group })
    }

    pub fn group(&self) -> SocketAddrV4 {
        self.group
    }
}

impl Transport for MulticastSocket {
    fn send<'a>(&'a self, datagram: &'a [u8]) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            self.socket.send_to(datagram, SocketAddr::V4(self.group)).await?;
            Ok(())
        })
    }

    fn recv<'a>(&'a self, buf: &'a mut [u8]) -> TransportFuture<'a, usize> {
        Box::pin(async move {
            let (len, _src) = self.socket.recv_from(buf).await?;
            Ok(len)
        })
    }
}
