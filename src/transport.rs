use std::fmt::Debug;
use std::net::SocketAddr;
use std::pin::Pin;

use async_trait::async_trait;
use coap_lite::error::MessageError;
use coap_lite::Packet;
use futures::{Sink, Stream};
use thiserror::Error;

/// Generalization of the underlying CoAP transport so that the plain UDP and
/// DTLS-secured endpoints present the same framed packet seam to the server
/// loop.  The security mode selected at startup decides which implementation
/// gets bound; nothing downstream of `bind` can tell them apart.
#[async_trait]
pub trait Transport {
    type Endpoint: Debug + Send + Clone;

    /// Perform the binding, that is, begin accepting new data from this
    /// transport.  For datagram transports there is no accept loop; framed
    /// items simply arrive from any peer.  Session-oriented transports such
    /// as DTLS are expected to spawn tasks per accepted session and funnel
    /// everything into the single returned binding.
    async fn bind(self) -> Result<BoxedFramedBinding<Self::Endpoint>, TransportError>;
}

pub type BoxedFramedBinding<Endpoint> = Pin<Box<dyn FramedBinding<Endpoint>>>;

/// A bound endpoint exposed as both a stream of inbound packets and a sink
/// for outbound ones, unifying the socket halves the way tokio's framed
/// wrappers do.
pub trait FramedBinding<Endpoint>:
    Send
    + Stream<Item = Result<FramedItem<Endpoint>, FramedReadError<Endpoint>>>
    + Sink<FramedItem<Endpoint>, Error = TransportError>
{
    /// Local address the transport actually bound, once known.  Mostly useful
    /// for logging and for tests binding to an ephemeral port.
    fn local_addr(&self) -> Option<SocketAddr>;
}

/// Parsed CoAP packet paired with the remote peer it came from (or is headed
/// to).  Delivering the endpoint with each packet avoids leaking a
/// "connection" abstraction that UDP does not have.
pub type FramedItem<Endpoint> = (Packet, Endpoint);

/// Error when receiving.  The endpoint is optional because a read error may
/// not be attributable to any peer, for example when the bound socket itself
/// fails; such errors are fatal to the server loop while per-peer errors are
/// not.
pub type FramedReadError<Endpoint> = (TransportError, Option<Endpoint>);

/// Transport-level failures: binding/context setup, socket I/O, and packets
/// that do not parse as CoAP.  Setup failures abort startup; the rest are
/// judged by whether a peer can be blamed for them.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to initialize transport: {0}")]
    Init(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed packet: {0}")]
    MalformedPacket(#[from] MessageError),
}
