use std::fmt::Debug;
use std::mem;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use coap_lite::{CoapRequest, MessageClass, Packet, RequestType, ResponseType};
use log::{debug, info, warn};

use crate::path::route;
use crate::registry::DeviceRegistry;
use crate::server::PacketHandler;
use crate::value::{decode, DecodeError};

/// Diagnostic body attached to 4.00 responses.
pub const MSG_PAYLOAD_INVALID: &str = "payload not valid";

/// Catch-all handler for the ingress resource tree.  Every request, whatever
/// its path, runs the same pipeline: method gate, path routing, type-directed
/// payload decoding, reading publication.  Failures never escape; they become
/// a response code and a log line.
pub struct IngressHandler<R> {
    registry: Arc<R>,
}

impl<R> IngressHandler<R> {
    pub fn new(registry: Arc<R>) -> Self {
        Self { registry }
    }
}

impl<R> Clone for IngressHandler<R> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

#[async_trait]
impl<R, Endpoint> PacketHandler<Endpoint> for IngressHandler<R>
where
    R: DeviceRegistry + 'static,
    Endpoint: Debug + Send + Sync + Clone + 'static,
{
    async fn handle(&self, packet: Packet, peer: Endpoint) -> Option<Packet> {
        match packet.header.code {
            MessageClass::Request(_) => {}
            MessageClass::Response(_) => {
                warn!("Spurious response message from {peer:?}, ignoring");
                return None;
            }
            _ => {
                debug!("Non-request message from {peer:?}, ignoring");
                return None;
            }
        }

        let mut request = CoapRequest::from_packet(packet, peer);
        // Take the payload out as a shared buffer so binary readings can
        // reference it without a copy.
        let payload = Bytes::from(mem::take(&mut request.message.payload));
        let (status, diagnostic) = self.process(&request, payload).await;

        let mut response = request.response?;
        response.set_status(status);
        response.message.payload = diagnostic
            .map(|d| d.as_bytes().to_vec())
            .unwrap_or_default();
        Some(response.message)
    }
}

impl<R: DeviceRegistry> IngressHandler<R> {
    async fn process<Endpoint: Debug>(
        &self,
        request: &CoapRequest<Endpoint>,
        payload: Bytes,
    ) -> (ResponseType, Option<&'static str>) {
        // PUT is the engine's default write semantic; this service only takes
        // unsolicited readings, so PUT is refused outright.  Every other
        // method is subject to the same path and payload checks.
        if *request.get_method() == RequestType::Put {
            debug!("Rejecting PUT from {:?}", request.source);
            return (ResponseType::MethodNotAllowed, None);
        }

        let path = request.get_path();
        debug!("URI /{path}");

        let target = match route(self.registry.as_ref(), &path).await {
            Ok(target) => target,
            Err(e) => {
                info!("{e}");
                return (ResponseType::NotFound, None);
            }
        };

        let resource = target.resource();
        match decode(resource.data_type, &payload) {
            Ok(value) => {
                self.registry
                    .publish_reading(target.device_name(), &resource.name, value)
                    .await;
                (ResponseType::Changed, None)
            }
            Err(DecodeError::UnsupportedType(data_type)) => {
                warn!("Unsupported resource type {data_type} for {}", resource.name);
                (ResponseType::InternalServerError, None)
            }
            Err(e) => {
                info!(
                    "Invalid payload of len {} for {}: {e}",
                    payload.len(),
                    resource.name
                );
                (ResponseType::BadRequest, Some(MSG_PAYLOAD_INVALID))
            }
        }
    }
}
