use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use thiserror::Error;

/// Configuration key naming the security mode, `NoSec` or `PSK`.
pub const CONF_SECURITY_MODE: &str = "SecurityMode";
/// Configuration key holding the base64-encoded pre-shared key.
pub const CONF_PSK_KEY: &str = "PskKey";

/// Longest pre-shared key the DTLS layer accepts, in decoded bytes.
pub const MAX_PSK_LEN: usize = 16;

/// Default CoAP port for the unsecured transport.
pub const COAP_PORT_NOSEC: u16 = 5683;
/// Default CoAP port for the DTLS-secured transport.
pub const COAP_PORT_DTLS: u16 = 5684;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityMode {
    NoSec,
    Psk,
}

/// Immutable security context built once at startup.  The key exists exactly
/// when the mode is PSK; there is no way to construct a PSK context without
/// one.  The mode decides which transport and default port the listener
/// binds.
#[derive(Debug, Clone)]
pub enum SecurityConfig {
    NoSec,
    Psk { key: Vec<u8> },
}

impl SecurityConfig {
    /// Build the security context from the service configuration map.  The
    /// mode string is matched case-sensitively against the two known
    /// literals; any other value, including an absent one, is fatal.  In PSK
    /// mode the key must be present, base64-decodable, and 1 to 16 bytes
    /// long once decoded.
    pub fn from_map(conf: &HashMap<String, String>) -> Result<Self, SecurityError> {
        let mode = conf.get(CONF_SECURITY_MODE).map(String::as_str);
        match mode {
            Some("NoSec") => Ok(SecurityConfig::NoSec),
            Some("PSK") => {
                let encoded = conf
                    .get(CONF_PSK_KEY)
                    .filter(|k| !k.is_empty())
                    .ok_or(SecurityError::MissingKey)?;
                let key = BASE64.decode(encoded)?;
                if key.is_empty() {
                    return Err(SecurityError::MissingKey);
                }
                if key.len() > MAX_PSK_LEN {
                    return Err(SecurityError::KeyTooLong { len: key.len() });
                }
                Ok(SecurityConfig::Psk { key })
            }
            other => Err(SecurityError::UnknownMode(
                other.unwrap_or_default().to_string(),
            )),
        }
    }

    pub fn mode(&self) -> SecurityMode {
        match self {
            SecurityConfig::NoSec => SecurityMode::NoSec,
            SecurityConfig::Psk { .. } => SecurityMode::Psk,
        }
    }

    /// Default CoAP port for the transport this context selects.
    pub fn default_port(&self) -> u16 {
        match self {
            SecurityConfig::NoSec => COAP_PORT_NOSEC,
            SecurityConfig::Psk { .. } => COAP_PORT_DTLS,
        }
    }
}

/// Fatal misconfiguration of the security context.  The server never starts
/// with a partially valid context.
#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("unknown security mode {0:?}")]
    UnknownMode(String),

    #[error("PSK mode requires a nonempty pre-shared key")]
    MissingKey,

    #[error("pre-shared key is not valid base64: {0}")]
    InvalidKey(#[from] base64::DecodeError),

    #[error("pre-shared key of {len} bytes exceeds the {MAX_PSK_LEN} byte limit")]
    KeyTooLong { len: usize },
}
