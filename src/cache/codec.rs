// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Payload encoding for cache entries.
//!
//! Strategies flagged `compress` store their payloads as zstd-compressed JSON.
//! This is real compression: large, repetitive payloads (stats tables,
//! leaderboards) shrink considerably, and decoding is transparent on read.
//! Small payloads may grow by a few header bytes, so size accounting always
//! uses the encoded length.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Zstd magic bytes (little-endian): 0xFD2FB528
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// Default compression level (3 is a good balance of speed/ratio)
const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("compression failed: {0}")]
    CompressFailed(String),

    #[error("decompression failed: {0}")]
    DecompressFailed(String),

    #[error("JSON parse failed: {0}")]
    JsonParseFailed(#[from] serde_json::Error),
}

/// A cache payload as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "encoding", content = "data", rename_all = "lowercase")]
pub enum StoredPayload {
    Json(Value),
    Zstd(Vec<u8>),
}

impl StoredPayload {
    /// Encode `value`, compressing when `compress` is set.
    pub fn encode(value: &Value, compress: bool) -> Result<Self, CodecError> {
        if compress {
            Ok(Self::Zstd(compress_json(value)?))
        } else {
            Ok(Self::Json(value.clone()))
        }
    }

    /// Decode back to the caller's JSON value.
    pub fn decode(&self) -> Result<Value, CodecError> {
        match self {
            Self::Json(value) => Ok(value.clone()),
            Self::Zstd(bytes) => decompress_json(bytes),
        }
    }

    /// Bytes this payload occupies in the cache budget.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        match self {
            Self::Json(value) => serde_json::to_vec(value).map(|v| v.len()).unwrap_or(0),
            Self::Zstd(bytes) => bytes.len(),
        }
    }

    #[must_use]
    pub fn is_compressed(&self) -> bool {
        matches!(self, Self::Zstd(_))
    }
}

/// Check if data is zstd-compressed by checking magic bytes.
#[inline]
#[must_use]
pub fn is_compressed(data: &[u8]) -> bool {
    data.len() >= 4 && data[..4] == ZSTD_MAGIC
}

/// Compress a JSON value to zstd bytes.
pub fn compress_json(value: &Value) -> Result<Vec<u8>, CodecError> {
    let json_bytes = serde_json::to_vec(value)?;
    zstd::encode_all(json_bytes.as_slice(), DEFAULT_COMPRESSION_LEVEL)
        .map_err(|e| CodecError::CompressFailed(e.to_string()))
}

/// Decompress to a JSON value. Plain JSON bytes are parsed directly.
pub fn decompress_json(data: &[u8]) -> Result<Value, CodecError> {
    if is_compressed(data) {
        let decompressed = zstd::decode_all(data)
            .map_err(|e| CodecError::DecompressFailed(e.to_string()))?;
        serde_json::from_slice(&decompressed).map_err(CodecError::from)
    } else {
        serde_json::from_slice(data).map_err(CodecError::from)
    }
}
