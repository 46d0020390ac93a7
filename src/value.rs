use std::str;

use bytes::Bytes;
use thiserror::Error;

use crate::registry::ResourceType;

/// Longest textual form of an i32, `-2147483648`.  Payloads past this length
/// cannot name an in-range value and are rejected before parsing.
pub const INT32_TEXT_MAXLEN: usize = 11;

/// Bound on the textual magnitude of an f64: the maximum base-10 exponent of
/// the type plus room for a sign and leading digit.
pub const FLOAT64_TEXT_MAXLEN: usize = (f64::MAX_10_EXP as usize) + 2;

/// A decoded reading value.  Produced once per successfully decoded request
/// and consumed immediately by publication.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int32(i32),
    Float64(f64),
    String(String),
    Binary(Bytes),
}

/// Why a payload was not decodable for the declared resource type.  All
/// variants except `UnsupportedType` map to 4.00; `UnsupportedType` is a
/// property of the resource declaration, not the payload, and maps to 5.00.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("empty payload")]
    Empty,

    #[error("payload of {len} bytes exceeds the {max} byte limit")]
    TooLong { len: usize, max: usize },

    #[error("payload does not parse as the declared type")]
    Malformed,

    #[error("value is outside the representable range")]
    OutOfRange,

    #[error("unsupported resource type {0}")]
    UnsupportedType(ResourceType),
}

type DecodeFn = fn(&Bytes) -> Result<Value, DecodeError>;

impl ResourceType {
    /// Decoding strategy for this declared type, if the type is supported.
    /// Exactly one decoder per type; no fallback or cross-type coercion.
    pub fn decoder(self) -> Option<DecodeFn> {
        match self {
            ResourceType::Int32 => Some(decode_int32),
            ResourceType::Float64 => Some(decode_float64),
            ResourceType::String => Some(decode_string),
            ResourceType::Binary => Some(decode_binary),
            _ => None,
        }
    }
}

/// Decode a request payload according to the resource's declared type.
pub fn decode(data_type: ResourceType, payload: &Bytes) -> Result<Value, DecodeError> {
    let decode_fn = data_type
        .decoder()
        .ok_or(DecodeError::UnsupportedType(data_type))?;
    decode_fn(payload)
}

fn numeric_text(payload: &[u8], max: usize) -> Result<&str, DecodeError> {
    if payload.is_empty() {
        return Err(DecodeError::Empty);
    }
    if payload.len() > max {
        return Err(DecodeError::TooLong {
            len: payload.len(),
            max,
        });
    }
    str::from_utf8(payload).map_err(|_| DecodeError::Malformed)
}

fn decode_int32(payload: &Bytes) -> Result<Value, DecodeError> {
    let text = numeric_text(payload, INT32_TEXT_MAXLEN)?;
    // Any numeric string within the length bound fits an i64, so a parse
    // failure here is malformed input rather than overflow.
    let wide: i64 = text.parse().map_err(|_| DecodeError::Malformed)?;
    let value = i32::try_from(wide).map_err(|_| DecodeError::OutOfRange)?;
    Ok(Value::Int32(value))
}

fn decode_float64(payload: &Bytes) -> Result<Value, DecodeError> {
    let text = numeric_text(payload, FLOAT64_TEXT_MAXLEN)?;
    let value: f64 = text.parse().map_err(|_| DecodeError::Malformed)?;
    if !value.is_finite() {
        return Err(DecodeError::Malformed);
    }
    Ok(Value::Float64(value))
}

fn decode_string(payload: &Bytes) -> Result<Value, DecodeError> {
    let text = String::from_utf8(payload.to_vec()).map_err(|_| DecodeError::Malformed)?;
    Ok(Value::String(text))
}

fn decode_binary(payload: &Bytes) -> Result<Value, DecodeError> {
    // Bytes clone shares the request buffer; no copy.
    Ok(Value::Binary(payload.clone()))
}
