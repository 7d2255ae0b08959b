//! DIFI sockets.
//!
//! UDP carries one packet per datagram. TCP is a byte stream, so the
//! receiving side splits it with [`DifiFrameCodec`] using the size field of
//! each header word.
//!
//! Every wait is bounded: a receive or connect that does not finish within
//! the configured timeout reports "nothing yet" and the work call returns.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::time::timeout;
use tokio_util::codec::{Decoder, FramedRead};

use crate::config::SocketType;
use crate::error::{DifiError, Result};
use crate::packet::MAX_PACKET_SIZE;

/// Splits a TCP stream into whole DIFI packets.
#[derive(Debug, Clone)]
pub struct DifiFrameCodec {
    max_packet_size: usize,
}

impl Default for DifiFrameCodec {
    fn default() -> Self {
        Self {
            max_packet_size: MAX_PACKET_SIZE,
        }
    }
}

impl Decoder for DifiFrameCodec {
    type Item = Bytes;
    type Error = DifiError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        if src.len() < 4 {
            return Ok(None);
        }

        let word = (&src[..4]).get_u32();
        let size = (word & 0xffff) as usize * 4;
        if size < 8 || size > self.max_packet_size {
            return Err(DifiError::Malformed(format!(
                "header {:#010x} announces a {}-byte packet",
                word, size
            )));
        }

        if src.len() < size {
            src.reserve(size - src.len());
            return Ok(None);
        }
        Ok(Some(src.split_to(size).freeze()))
    }
}

/// Sending side of a sink.
#[derive(Debug)]
pub(crate) enum Outbound {
    Udp(UdpSocket),
    Tcp {
        peer: SocketAddr,
        stream: Option<TcpStream>,
        connect_timeout: Duration,
    },
}

impl Outbound {
    pub async fn open(
        socket_type: SocketType,
        peer: SocketAddr,
        connect_timeout: Duration,
    ) -> Result<Self> {
        match socket_type {
            SocketType::Udp => {
                let local = if peer.is_ipv4() {
                    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
                } else {
                    SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
                };
                let socket = UdpSocket::bind(local).await?;
                socket.connect(peer).await?;
                Ok(Outbound::Udp(socket))
            }
            SocketType::Tcp => Ok(Outbound::Tcp {
                peer,
                stream: None,
                connect_timeout,
            }),
        }
    }

    /// UDP is always ready. TCP tries one bounded connect when it has no
    /// connection and reports whether it has one now.
    pub async fn ready(&mut self) -> bool {
        match self {
            Outbound::Udp(_) => true,
            Outbound::Tcp {
                peer,
                stream,
                connect_timeout,
            } => {
                if stream.is_some() {
                    return true;
                }
                match timeout(*connect_timeout, TcpStream::connect(*peer)).await {
                    Ok(Ok(s)) => {
                        let _ = s.set_nodelay(true);
                        tracing::info!(peer = %peer, "DIFI sink connected");
                        *stream = Some(s);
                        true
                    }
                    Ok(Err(e)) => {
                        tracing::debug!(peer = %peer, error = %e, "no DIFI receiver, will reconnect");
                        false
                    }
                    Err(_) => {
                        tracing::debug!(peer = %peer, "DIFI connect timed out, will reconnect");
                        false
                    }
                }
            }
        }
    }

    pub async fn send(&mut self, packet: &[u8]) -> Result<()> {
        match self {
            Outbound::Udp(socket) => {
                let sent = socket.send(packet).await?;
                if sent != packet.len() {
                    return Err(DifiError::ShortSend {
                        sent,
                        len: packet.len(),
                    });
                }
                Ok(())
            }
            Outbound::Tcp { peer, stream, .. } => {
                let Some(s) = stream.as_mut() else {
                    return Err(DifiError::Io(std::io::Error::new(
                        std::io::ErrorKind::NotConnected,
                        format!("not connected to {}", peer),
                    )));
                };
                if let Err(e) = s.write_all(packet).await {
                    *stream = None;
                    return Err(e.into());
                }
                Ok(())
            }
        }
    }

    pub async fn shutdown(&mut self) {
        if let Outbound::Tcp { stream, .. } = self {
            if let Some(mut s) = stream.take() {
                let _ = s.shutdown().await;
            }
        }
    }
}

/// Receiving side of a source.
#[derive(Debug)]
pub(crate) enum Inbound {
    Udp {
        socket: UdpSocket,
        scratch: Vec<u8>,
    },
    Tcp {
        listener: TcpListener,
        conn: Option<FramedRead<TcpStream, DifiFrameCodec>>,
    },
}

impl Inbound {
    pub async fn bind(socket_type: SocketType, addr: SocketAddr) -> Result<Self> {
        match socket_type {
            SocketType::Udp => Ok(Inbound::Udp {
                socket: UdpSocket::bind(addr).await?,
                scratch: vec![0u8; MAX_PACKET_SIZE],
            }),
            SocketType::Tcp => Ok(Inbound::Tcp {
                listener: TcpListener::bind(addr).await?,
                conn: None,
            }),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(match self {
            Inbound::Udp { socket, .. } => socket.local_addr()?,
            Inbound::Tcp { listener, .. } => listener.local_addr()?,
        })
    }

    /// Next whole packet, or `None` if nothing arrived within `wait`.
    pub async fn recv(&mut self, wait: Duration) -> Result<Option<Bytes>> {
        match self {
            Inbound::Udp { socket, scratch } => match timeout(wait, socket.recv(scratch)).await {
                Ok(received) => {
                    let n = received?;
                    Ok(Some(Bytes::copy_from_slice(&scratch[..n])))
                }
                Err(_) => Ok(None),
            },
            Inbound::Tcp { listener, conn } => {
                if conn.is_none() {
                    match timeout(wait, listener.accept()).await {
                        Ok(accepted) => {
                            let (stream, peer) = accepted?;
                            tracing::info!(peer = %peer, "DIFI source accepted connection");
                            *conn = Some(FramedRead::new(stream, DifiFrameCodec::default()));
                        }
                        Err(_) => return Ok(None),
                    }
                }

                let Some(framed) = conn.as_mut() else {
                    return Ok(None);
                };
                match timeout(wait, framed.next()).await {
                    Err(_) => Ok(None),
                    Ok(Some(Ok(packet))) => Ok(Some(packet)),
                    Ok(Some(Err(e))) => {
                        tracing::warn!(error = %e, "dropping DIFI connection");
                        *conn = None;
                        Ok(None)
                    }
                    Ok(None) => {
                        tracing::debug!("DIFI connection closed by peer");
                        *conn = None;
                        Ok(None)
                    }
                }
            }
        }
    }
}
