//! Fixed-width binary encoding for scalar values.
//!
//! Numeric values that leave this crate (cached bounds, serialized model
//! data) must round-trip exactly: a value is encoded as the little-endian
//! bytes of its IEEE-754 bit pattern, so decoding reproduces the identical
//! bits. Decimal formatting is lossy and is deliberately not offered here.

use crate::interval::Interval;

/// Encodes a double as its 8 little-endian IEEE-754 bytes.
pub fn encode_scalar(value: f64) -> [u8; 8] {
    value.to_le_bytes()
}

/// Decodes a double from its 8 little-endian IEEE-754 bytes.
pub fn decode_scalar(bytes: [u8; 8]) -> f64 {
    f64::from_le_bytes(bytes)
}

/// Encodes an interval as its lower then upper endpoint bytes.
pub fn encode_interval(interval: Interval) -> [u8; 16] {
    let mut bytes = [0u8; 16];
    bytes[..8].copy_from_slice(&encode_scalar(interval.lower()));
    bytes[8..].copy_from_slice(&encode_scalar(interval.upper()));
    bytes
}

/// Decodes an interval from its endpoint bytes.
pub fn decode_interval(bytes: [u8; 16]) -> Interval {
    let mut lower = [0u8; 8];
    let mut upper = [0u8; 8];
    lower.copy_from_slice(&bytes[..8]);
    upper.copy_from_slice(&bytes[8..]);
    Interval::new(decode_scalar(lower), decode_scalar(upper))
}
