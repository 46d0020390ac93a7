use std::collections::HashMap;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use async_trait::async_trait;
use coap_lite::Packet;
use futures::{Sink, Stream};
use log::{debug, info, warn};
use tokio::sync::mpsc::{Receiver, Sender};
use tokio_stream::wrappers::ReceiverStream;
use webrtc_dtls::cipher_suite::CipherSuiteId;
use webrtc_dtls::config::{Config, ExtendedMasterSecretType};
use webrtc_dtls::listener::listen;
use webrtc_util::conn::{Conn, Listener};

use crate::transport::{
    BoxedFramedBinding, FramedBinding, FramedItem, FramedReadError, Transport, TransportError,
};

/// Largest DTLS application-data record we expect to carry a CoAP message.
const MAX_RECORD_SIZE: usize = 1500;

/// Outbound records queued per session before further responses are dropped.
const SESSION_SEND_BACKLOG: usize = 32;

type SessionMap = Arc<Mutex<HashMap<SocketAddr, Sender<Vec<u8>>>>>;
type InboundItem = Result<FramedItem<SocketAddr>, FramedReadError<SocketAddr>>;

/// DTLS-secured transport used when the service runs in PSK mode.  The
/// handshake itself belongs to the DTLS engine; this transport only supplies
/// the pre-shared key material, accepts sessions, and multiplexes their
/// decrypted records into the same framed seam the plain UDP transport uses.
pub struct DtlsTransport {
    bind_addr: SocketAddr,
    psk: Vec<u8>,
}

impl DtlsTransport {
    pub fn new(bind_addr: SocketAddr, psk: Vec<u8>) -> Self {
        Self { bind_addr, psk }
    }
}

#[async_trait]
impl Transport for DtlsTransport {
    type Endpoint = SocketAddr;

    async fn bind(self) -> Result<BoxedFramedBinding<Self::Endpoint>, TransportError> {
        let psk = self.psk;
        let config = Config {
            psk: Some(Arc::new(move |_hint: &[u8]| Ok(psk.clone()))),
            psk_identity_hint: Some(Vec::new()),
            cipher_suites: vec![CipherSuiteId::Tls_Psk_With_Aes_128_Ccm_8],
            extended_master_secret: ExtendedMasterSecretType::Require,
            ..Default::default()
        };

        let listener = listen(self.bind_addr, config)
            .await
            .map_err(|e| TransportError::Init(format!("DTLS listen failed: {e}")))?;
        let local_addr = listener
            .addr()
            .await
            .map_err(|e| TransportError::Init(format!("cannot read DTLS local address: {e}")))?;
        info!("DTLS listener ready on {local_addr}");

        let sessions: SessionMap = Arc::new(Mutex::new(HashMap::new()));
        let (packet_tx, packet_rx) = tokio::sync::mpsc::channel(32);
        tokio::spawn(accept_loop(listener, Arc::clone(&sessions), packet_tx));

        Ok(Box::pin(DtlsBinding {
            inbound: ReceiverStream::new(packet_rx),
            sessions,
            local_addr,
        }))
    }
}

async fn accept_loop(
    listener: impl Listener,
    sessions: SessionMap,
    packet_tx: Sender<InboundItem>,
) {
    loop {
        match listener.accept().await {
            Ok((conn, peer)) => {
                debug!("DTLS session established with {peer}");
                let (write_tx, write_rx) = tokio::sync::mpsc::channel(SESSION_SEND_BACKLOG);
                lock_sessions(&sessions).insert(peer, write_tx);
                tokio::spawn(session_write_loop(Arc::clone(&conn), peer, write_rx));
                tokio::spawn(session_read_loop(
                    conn,
                    peer,
                    Arc::clone(&sessions),
                    packet_tx.clone(),
                ));
            }
            Err(e) => {
                // accept() runs the handshake, so an error here is scoped to
                // the one peer that failed it (wrong key, aborted exchange).
                // The endpoint stays usable; keep accepting.
                info!("DTLS handshake failed: {e}");
                if packet_tx.is_closed() {
                    return;
                }
            }
        }
    }
}

async fn session_read_loop(
    conn: Arc<dyn Conn + Send + Sync>,
    peer: SocketAddr,
    sessions: SessionMap,
    packet_tx: Sender<InboundItem>,
) {
    let mut buf = vec![0u8; MAX_RECORD_SIZE];
    loop {
        match conn.recv(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let item = Packet::from_bytes(&buf[..n])
                    .map(|packet| (packet, peer))
                    .map_err(|e| (TransportError::from(e), Some(peer)));
                if packet_tx.send(item).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!("DTLS session with {peer} ended: {e}");
                break;
            }
        }
    }
    // Dropping the session entry also drops the writer's channel, which lets
    // the write loop drain and exit.
    lock_sessions(&sessions).remove(&peer);
    let _ = conn.close().await;
}

async fn session_write_loop(
    conn: Arc<dyn Conn + Send + Sync>,
    peer: SocketAddr,
    mut outbound: Receiver<Vec<u8>>,
) {
    while let Some(record) = outbound.recv().await {
        if let Err(e) = conn.send(&record).await {
            warn!("DTLS send to {peer} failed: {e}");
            break;
        }
    }
}

fn lock_sessions(
    sessions: &SessionMap,
) -> std::sync::MutexGuard<'_, HashMap<SocketAddr, Sender<Vec<u8>>>> {
    sessions.lock().unwrap_or_else(PoisonError::into_inner)
}

struct DtlsBinding {
    inbound: ReceiverStream<InboundItem>,
    sessions: SessionMap,
    local_addr: SocketAddr,
}

impl FramedBinding<SocketAddr> for DtlsBinding {
    fn local_addr(&self) -> Option<SocketAddr> {
        Some(self.local_addr)
    }
}

impl Stream for DtlsBinding {
    type Item = InboundItem;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().inbound).poll_next(cx)
    }
}

impl Sink<(Packet, SocketAddr)> for DtlsBinding {
    type Error = TransportError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(
        self: Pin<&mut Self>,
        (packet, peer): (Packet, SocketAddr),
    ) -> Result<(), Self::Error> {
        let record = packet.to_bytes()?;
        // Responses are queued to the owning session's writer task, which
        // preserves per-peer ordering; encryption happens inside the DTLS
        // engine.
        let sender = lock_sessions(&self.sessions).get(&peer).cloned();
        match sender {
            Some(sender) => {
                if sender.try_send(record).is_err() {
                    warn!("DTLS session with {peer} gone or backlogged, dropping response");
                }
            }
            None => warn!("No DTLS session for {peer}, dropping response"),
        }
        Ok(())
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use coap_lite::{CoapOption, MessageClass, MessageType, RequestType, ResponseType};
    use tokio::net::UdpSocket;
    use tokio::time::timeout;
    use tokio_util::sync::CancellationToken;
    use webrtc_dtls::conn::DTLSConn;

    use super::*;
    use crate::ingress::IngressHandler;
    use crate::registry::{DeviceSnapshot, MemoryRegistry, ResourceSpec, ResourceType};
    use crate::server::CoapServer;
    use crate::value::Value;

    const TEST_PSK: &[u8] = b"0123456789abcdef";

    async fn start_server() -> (SocketAddr, Arc<MemoryRegistry>, CancellationToken) {
        let mut registry = MemoryRegistry::new();
        registry.add_device(DeviceSnapshot {
            name: "dev1".to_string(),
            resources: vec![ResourceSpec {
                name: "temp".to_string(),
                data_type: ResourceType::Int32,
            }],
        });
        let registry = Arc::new(registry);

        let transport = DtlsTransport::new("127.0.0.1:0".parse().unwrap(), TEST_PSK.to_vec());
        let server = CoapServer::bind(transport).await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        tokio::spawn(server.serve(
            IngressHandler::new(Arc::clone(&registry)),
            shutdown.clone(),
        ));
        (server_addr, registry, shutdown)
    }

    async fn connect_client(
        server_addr: SocketAddr,
        key: &'static [u8],
    ) -> Result<DTLSConn, webrtc_dtls::Error> {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.connect(server_addr).await.unwrap();
        let config = Config {
            psk: Some(Arc::new(move |_hint: &[u8]| Ok(key.to_vec()))),
            // webrtc-dtls rejects an empty PSK identity when marshaling the
            // ClientKeyExchange; the server's callback ignores the identity.
            psk_identity_hint: Some(b"test-client".to_vec()),
            cipher_suites: vec![CipherSuiteId::Tls_Psk_With_Aes_128_Ccm_8],
            extended_master_secret: ExtendedMasterSecretType::Require,
            ..Default::default()
        };
        DTLSConn::new(Arc::new(socket), config, true, None).await
    }

    fn encode_request(path: &str, payload: &[u8], message_id: u16) -> Vec<u8> {
        let mut packet = Packet::new();
        packet.header.set_type(MessageType::Confirmable);
        packet.header.code = MessageClass::Request(RequestType::Post);
        packet.header.message_id = message_id;
        packet.set_token(vec![0x0f]);
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            packet.add_option(CoapOption::UriPath, segment.as_bytes().to_vec());
        }
        packet.payload = payload.to_vec();
        packet.to_bytes().unwrap()
    }

    async fn exchange(client: &DTLSConn, request: &[u8]) -> Packet {
        client.send(request).await.unwrap();
        let mut buf = [0u8; MAX_RECORD_SIZE];
        let n = timeout(Duration::from_secs(10), client.recv(&mut buf))
            .await
            .expect("no response before timeout")
            .unwrap();
        Packet::from_bytes(&buf[..n]).unwrap()
    }

    #[tokio::test]
    async fn psk_round_trip_publishes_reading() {
        let (server_addr, registry, shutdown) = start_server().await;

        let client = connect_client(server_addr, TEST_PSK)
            .await
            .expect("handshake with matching key");
        let response = exchange(&client, &encode_request("/a1r/dev1/temp", b"42", 1)).await;
        assert_eq!(
            response.header.code,
            MessageClass::Response(ResponseType::Changed)
        );

        let published = registry.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].value, Value::Int32(42));

        shutdown.cancel();
    }

    #[tokio::test]
    async fn failed_handshake_does_not_stop_the_listener() {
        let (server_addr, registry, shutdown) = start_server().await;

        let wrong = timeout(
            Duration::from_secs(10),
            connect_client(server_addr, b"not-the-right-key"),
        )
        .await;
        assert!(
            !matches!(wrong, Ok(Ok(_))),
            "handshake with the wrong key must not succeed"
        );

        // The endpoint must keep accepting: a client with the right key still
        // gets served after the failed handshake.
        let client = connect_client(server_addr, TEST_PSK)
            .await
            .expect("listener must survive a failed handshake");
        let response = exchange(&client, &encode_request("/a1r/dev1/temp", b"7", 2)).await;
        assert_eq!(
            response.header.code,
            MessageClass::Response(ResponseType::Changed)
        );
        assert_eq!(registry.published().await[0].value, Value::Int32(7));

        shutdown.cancel();
    }

    #[tokio::test]
    async fn binding_reports_actual_local_port() {
        let transport = DtlsTransport::new("127.0.0.1:0".parse().unwrap(), TEST_PSK.to_vec());
        let server = CoapServer::bind(transport).await.unwrap();
        let addr = server.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
    }
}
