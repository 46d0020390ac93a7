//! CoAP ingress endpoint for a device-integration gateway.
//!
//! Field devices push unsolicited readings to
//! `/a1r/{device-name}/{resource-name}` over CoAP, optionally secured with
//! DTLS/PSK.  Payloads are decoded according to the target resource's
//! declared data type and forwarded to the device-management core for
//! publication.
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use device_coap::ingress::IngressHandler;
//! use device_coap::registry::MemoryRegistry;
//! use device_coap::{CoapServer, UdpTransport};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), device_coap::FatalServerError> {
//!     let registry = Arc::new(MemoryRegistry::new());
//!     let server = CoapServer::bind(UdpTransport::new("0.0.0.0:5683")).await?;
//!     server
//!         .serve(IngressHandler::new(registry), CancellationToken::new())
//!         .await
//! }
//! ```

pub use dtls::DtlsTransport;
pub use server::CoapServer;
pub use server::FatalServerError;
pub use server::PacketHandler;
pub use udp::UdpTransport;

pub mod addr;
pub mod dtls;
pub mod ingress;
pub mod path;
pub mod registry;
pub mod security;
pub mod server;
pub mod transport;
pub mod udp;
pub mod value;
