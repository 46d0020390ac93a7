use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::BytesMut;
use coap_lite::Packet;
use futures::{Sink, Stream};
use log::warn;
use pin_project::pin_project;
use tokio::net::{ToSocketAddrs, UdpSocket};
use tokio_util::codec::{Decoder, Encoder};
use tokio_util::udp::UdpFramed;

use crate::transport::{BoxedFramedBinding, FramedBinding, Transport, TransportError};

/// Plain UDP transport as defined in RFC 7252, used when the service runs in
/// `NoSec` mode.
pub struct UdpTransport<A: ToSocketAddrs> {
    addresses: A,
}

impl<A: ToSocketAddrs> UdpTransport<A> {
    pub fn new(addresses: A) -> Self {
        Self { addresses }
    }
}

#[async_trait]
impl<A: ToSocketAddrs + Sync + Send> Transport for UdpTransport<A> {
    type Endpoint = SocketAddr;

    async fn bind(self) -> Result<BoxedFramedBinding<Self::Endpoint>, TransportError> {
        let socket = UdpSocket::bind(self.addresses).await?;
        let local_addr = socket.local_addr()?;
        let framed_socket = UdpFramed::new(socket, Codec::default());
        let binding = UdpBinding {
            framed_socket,
            local_addr,
        };
        Ok(Box::pin(binding))
    }
}

#[pin_project]
struct UdpBinding {
    #[pin]
    framed_socket: UdpFramed<Codec>,
    local_addr: SocketAddr,
}

impl FramedBinding<SocketAddr> for UdpBinding {
    fn local_addr(&self) -> Option<SocketAddr> {
        Some(self.local_addr)
    }
}

impl Stream for UdpBinding {
    type Item = Result<(Packet, SocketAddr), (TransportError, Option<SocketAddr>)>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        // Errors surfacing here are socket-level: the framed wrapper cannot
        // attribute them to a peer, which makes them fatal upstream.
        self.project()
            .framed_socket
            .poll_next(cx)
            .map(|next| next.map(|result| result.map_err(|e| (e, None))))
    }
}

impl Sink<(Packet, SocketAddr)> for UdpBinding {
    type Error = TransportError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().framed_socket.poll_ready(cx)
    }

    fn start_send(self: Pin<&mut Self>, item: (Packet, SocketAddr)) -> Result<(), Self::Error> {
        self.project().framed_socket.start_send(item)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().framed_socket.poll_flush(cx)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().framed_socket.poll_close(cx)
    }
}

#[derive(Default)]
struct Codec;

impl Decoder for Codec {
    type Item = Packet;
    type Error = TransportError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Packet>, TransportError> {
        if buf.is_empty() {
            return Ok(None);
        }
        // A datagram that fails to parse is dropped here with a log line
        // rather than returned as an error: the framed stream would report it
        // without the peer address and the server loop treats peerless errors
        // as fatal.
        let result = Packet::from_bytes(buf);
        buf.clear();
        match result {
            Ok(packet) => Ok(Some(packet)),
            Err(e) => {
                warn!("Dropping malformed datagram: {e}");
                Ok(None)
            }
        }
    }
}

impl Encoder<Packet> for Codec {
    type Error = TransportError;

    fn encode(&mut self, packet: Packet, buf: &mut BytesMut) -> Result<(), TransportError> {
        buf.extend_from_slice(&packet.to_bytes()?[..]);
        Ok(())
    }
}
