use std::fmt::Debug;
use std::net::SocketAddr;
use std::pin::Pin;

use async_trait::async_trait;
use coap_lite::Packet;
use futures::stream::Fuse;
use futures::{SinkExt, StreamExt};
use log::{error, info, trace, warn};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::transport::{FramedBinding, FramedItem, FramedReadError, Transport, TransportError};

/// Handler invoked for each inbound packet, producing at most one response
/// packet for the same peer.  The server loop awaits the handler inline, so
/// at most one request is being processed at any time and an in-flight
/// request always completes before shutdown.
#[async_trait]
pub trait PacketHandler<Endpoint>: Send + Sync {
    async fn handle(&self, packet: Packet, peer: Endpoint) -> Option<Packet>;
}

/// Primary server API to bind the configured transport and run the I/O loop
/// until cancelled.
pub struct CoapServer<Endpoint> {
    binding: Fuse<Pin<Box<dyn FramedBinding<Endpoint>>>>,
}

impl<Endpoint: Debug + Send + Clone + 'static> CoapServer<Endpoint> {
    /// Bind the server to a specific source of incoming packets in a
    /// transport-agnostic way.  Whether this is plain UDP or DTLS was decided
    /// by the security configuration that picked the transport.
    pub async fn bind<T: Transport<Endpoint = Endpoint>>(
        transport: T,
    ) -> Result<Self, TransportError> {
        let binding = transport.bind().await?;
        Ok(Self {
            binding: binding.fuse(),
        })
    }

    /// Local address of the bound transport, if known.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.binding.get_ref().local_addr()
    }

    /// Process packets until the shutdown token is cancelled.  Returns a
    /// fatal error only for transport failures not attributable to any peer;
    /// everything request-scoped is handled and logged inside the loop.
    pub async fn serve(
        mut self,
        handler: impl PacketHandler<Endpoint>,
        shutdown: CancellationToken,
    ) -> Result<(), FatalServerError> {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, stopping server loop");
                    return Ok(());
                }
                event = self.binding.select_next_some() => {
                    self.handle_rx_event(&handler, event).await?;
                }
            }
        }
    }

    async fn handle_rx_event(
        &mut self,
        handler: &impl PacketHandler<Endpoint>,
        event: Result<FramedItem<Endpoint>, FramedReadError<Endpoint>>,
    ) -> Result<(), FatalServerError> {
        match event {
            Ok((packet, peer)) => {
                trace!("Incoming packet from {peer:?}: {packet:?}");
                if let Some(response) = handler.handle(packet, peer.clone()).await {
                    trace!("Outgoing packet to {peer:?}: {response:?}");
                    if let Err(e) = self.binding.send((response, peer.clone())).await {
                        error!("Error sending to {peer:?}: {e}");
                    }
                }
            }
            Err((transport_err, peer)) => {
                warn!("Error from {peer:?}: {transport_err}");
                if peer.is_none() {
                    return Err(transport_err.into());
                }
            }
        }

        Ok(())
    }
}

/// Fatal error preventing the server from starting or continuing.  Anything
/// recoverable is logged and absorbed by the loop instead.
#[derive(Debug, Error)]
pub enum FatalServerError {
    /// Transport error not related to any individual peer; no future packet
    /// exchange can succeed, so the server must abort.
    #[error("fatal transport error: {0}")]
    Transport(#[from] TransportError),
}
