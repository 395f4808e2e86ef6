//! Payload decoding.
//!
//! Decoding happens once, at the boundary between the channel and the
//! consumer, and its result is always a [`Payload`]: either the untouched
//! bytes or the decoded value. Call sites never need to guess which shape a
//! message arrived in.

use crate::error::{Error, Result};

use std::fmt::Debug;
use std::marker::PhantomData;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A message payload, either raw or decoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload<T> {
    /// Bytes exactly as received.
    Bytes(Bytes),
    /// Successfully decoded value.
    Decoded(T),
}

impl<T> Payload<T> {
    /// The decoded value, if decoding succeeded.
    pub const fn decoded(&self) -> Option<&T> {
        match self {
            Self::Decoded(value) => Some(value),
            Self::Bytes(_) => None,
        }
    }

    /// The raw bytes, if the payload was not decoded.
    pub const fn bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            Self::Decoded(_) => None,
        }
    }

    /// Consumes the payload, returning the decoded value if there is one.
    pub fn into_decoded(self) -> Option<T> {
        match self {
            Self::Decoded(value) => Some(value),
            Self::Bytes(_) => None,
        }
    }

    /// Whether the payload was decoded.
    pub const fn is_decoded(&self) -> bool {
        matches!(self, Self::Decoded(_))
    }
}

/// What to do when a payload is not valid JSON for the requested type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodePolicy {
    /// Fail with [`Error::Decode`].
    #[default]
    Strict,
    /// Keep the raw bytes as [`Payload::Bytes`].
    PassThrough,
}

/// Turns raw bytes into a [`Payload`].
pub trait Decoder<T>
where
    Self: Debug + Send + Sync + 'static,
{
    /// Decodes one payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] when the bytes cannot be decoded and the
    /// decoder is not allowed to fall back to raw bytes.
    fn decode(&self, raw: &Bytes) -> Result<Payload<T>>;
}

/// Leaves payloads untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawDecoder;

impl<T> Decoder<T> for RawDecoder {
    fn decode(&self, raw: &Bytes) -> Result<Payload<T>> {
        Ok(Payload::Bytes(raw.clone()))
    }
}

/// UTF-8 + JSON decoder.
pub struct JsonDecoder<T> {
    policy: DecodePolicy,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonDecoder<T> {
    /// Creates a decoder with the given failure policy.
    #[must_use]
    pub const fn new(policy: DecodePolicy) -> Self {
        Self {
            policy,
            _marker: PhantomData,
        }
    }

    /// A decoder that fails on invalid payloads.
    #[must_use]
    pub const fn strict() -> Self {
        Self::new(DecodePolicy::Strict)
    }

    /// A decoder that keeps invalid payloads as raw bytes.
    #[must_use]
    pub const fn pass_through() -> Self {
        Self::new(DecodePolicy::PassThrough)
    }

    /// The failure policy.
    #[must_use]
    pub const fn policy(&self) -> DecodePolicy {
        self.policy
    }
}

impl<T> Debug for JsonDecoder<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonDecoder")
            .field("policy", &self.policy)
            .finish()
    }
}

impl<T> Clone for JsonDecoder<T> {
    fn clone(&self) -> Self {
        Self::new(self.policy)
    }
}

impl<T> Decoder<T> for JsonDecoder<T>
where
    T: DeserializeOwned + 'static,
{
    fn decode(&self, raw: &Bytes) -> Result<Payload<T>> {
        match decode_json(raw) {
            Ok(value) => Ok(Payload::Decoded(value)),
            Err(_) if self.policy == DecodePolicy::PassThrough => Ok(Payload::Bytes(raw.clone())),
            Err(e) => Err(e),
        }
    }
}

/// Decodes UTF-8 JSON bytes into `T`.
///
/// # Errors
///
/// Returns [`Error::Decode`] if the bytes are not UTF-8 or not valid JSON for `T`.
pub fn decode_json<T: DeserializeOwned>(raw: &[u8]) -> Result<T> {
    let text = std::str::from_utf8(raw).map_err(|e| Error::Decode(e.to_string()))?;
    serde_json::from_str(text).map_err(|e| Error::Decode(e.to_string()))
}

/// Encodes a value as UTF-8 JSON bytes.
///
/// # Errors
///
/// Returns [`Error::Json`] if the value cannot be serialized.
pub fn encode_json<T: Serialize + ?Sized>(value: &T) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(value)?))
}
