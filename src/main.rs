use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use log::info;
use tokio_util::sync::CancellationToken;

use device_coap::addr::resolve_bind_address;
use device_coap::ingress::IngressHandler;
use device_coap::registry::MemoryRegistry;
use device_coap::security::{SecurityConfig, CONF_PSK_KEY, CONF_SECURITY_MODE};
use device_coap::{CoapServer, DtlsTransport, UdpTransport};

/// CoAP ingress service: accepts device readings posted to
/// /a1r/{device-name}/{resource-name} and forwards them for publication.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Host or address to bind the CoAP endpoint to.
    #[arg(long, default_value = "0.0.0.0")]
    bind_host: String,

    /// Security mode, `NoSec` or `PSK`.  Selects plain UDP on 5683 or
    /// DTLS on 5684.
    #[arg(long, default_value = "NoSec")]
    security_mode: String,

    /// Base64-encoded pre-shared key; required when --security-mode=PSK.
    #[arg(long)]
    psk_key: Option<String>,

    /// TOML file declaring known devices and their resources.
    #[arg(long, default_value = "devices.toml")]
    devices: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut conf = HashMap::new();
    conf.insert(CONF_SECURITY_MODE.to_string(), args.security_mode);
    if let Some(key) = args.psk_key {
        conf.insert(CONF_PSK_KEY.to_string(), key);
    }
    let security = SecurityConfig::from_map(&conf).context("invalid security configuration")?;

    let registry = Arc::new(
        MemoryRegistry::from_file(&args.devices).context("cannot load device registry")?,
    );
    let handler = IngressHandler::new(registry);

    let bind_addr = resolve_bind_address(&args.bind_host, security.default_port())
        .await
        .context("cannot resolve bind address")?;

    let shutdown = CancellationToken::new();
    spawn_shutdown_watcher(shutdown.clone())?;

    match security {
        SecurityConfig::NoSec => {
            let server = CoapServer::bind(UdpTransport::new(bind_addr)).await?;
            info!("CoAP nosec server started on {bind_addr}");
            server.serve(handler, shutdown).await?;
        }
        SecurityConfig::Psk { key } => {
            let server = CoapServer::bind(DtlsTransport::new(bind_addr, key)).await?;
            info!("CoAP PSK server started on {bind_addr}");
            server.serve(handler, shutdown).await?;
        }
    }

    info!("CoAP server stopped");
    Ok(())
}

/// Cancel the shutdown token on SIGINT or SIGTERM.  The server loop checks
/// the token each iteration, so an in-flight request finishes first.
fn spawn_shutdown_watcher(shutdown: CancellationToken) -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::spawn(async move {
            tokio::select! {
                _ = interrupt.recv() => {}
                _ = terminate.recv() => {}
            }
            info!("Termination signal received");
            shutdown.cancel();
        });
    }
    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Termination signal received");
            shutdown.cancel();
        });
    }
    Ok(())
}
