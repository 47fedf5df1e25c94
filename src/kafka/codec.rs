//! Envelope codec
//!
//! Encoding is a two-stage pipeline: a [`Serializer`] turns the payload into a
//! self-describing byte form, then a [`Compressor`] shrinks it. Decoding runs
//! the stages in reverse. Either stage can be swapped without touching the
//! delivery layer, which only ever sees a [`Codec`].
//!
//! ```text
//! encode: T --serialize--> bytes --compress--> wire
//! decode: wire --decompress--> bytes --deserialize--> T
//! ```

use std::io::{Read, Write};
use std::marker::PhantomData;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::constants::DEFAULT_GZIP_LEVEL;
use super::error::CodecError;

/// Encode/decode capability for one payload type, resolved at construction time
pub trait Codec<T>: Send + Sync {
    fn encode(&self, payload: &T) -> Result<Vec<u8>, CodecError>;
    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// First stage: payload <-> structured bytes
pub trait Serializer<T>: Send + Sync {
    fn serialize(&self, payload: &T) -> Result<Vec<u8>, CodecError>;
    fn deserialize(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// Second stage: lossless byte transform
pub trait Compressor: Send + Sync {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;
}

/// JSON serialization via serde
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl<T> Serializer<T> for JsonSerializer
where
    T: Serialize + DeserializeOwned,
{
    fn serialize(&self, payload: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(payload).map_err(|e| CodecError::Serialize(e.to_string()))
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Deserialize(e.to_string()))
    }
}

/// Gzip compression with a configurable level (0-9)
#[derive(Debug, Clone, Copy)]
pub struct GzipCompressor {
    level: u32,
}

impl GzipCompressor {
    pub fn new(level: u32) -> Self {
        Self {
            level: level.min(9),
        }
    }

    pub fn level(&self) -> u32 {
        self.level
    }
}

impl Default for GzipCompressor {
    fn default() -> Self {
        Self::new(DEFAULT_GZIP_LEVEL)
    }
}

impl Compressor for GzipCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::new(self.level));
        encoder
            .write_all(data)
            .map_err(|e| CodecError::Compress(e.to_string()))?;
        encoder
            .finish()
            .map_err(|e| CodecError::Compress(e.to_string()))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut decoder = GzDecoder::new(data);
        let mut output = Vec::new();
        decoder
            .read_to_end(&mut output)
            .map_err(|e| CodecError::Decompress(e.to_string()))?;
        Ok(output)
    }
}

/// Pass-through second stage
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCompression;

impl Compressor for NoCompression {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(data.to_vec())
    }
}

/// A serializer followed by a compressor
pub struct PipelineCodec<T, S, C> {
    serializer: S,
    compressor: C,
    _payload: PhantomData<fn() -> T>,
}

impl<T, S, C> PipelineCodec<T, S, C>
where
    S: Serializer<T>,
    C: Compressor,
{
    pub fn new(serializer: S, compressor: C) -> Self {
        Self {
            serializer,
            compressor,
            _payload: PhantomData,
        }
    }

    /// Swap the serialization stage, keeping compression
    pub fn with_serializer<S2: Serializer<T>>(self, serializer: S2) -> PipelineCodec<T, S2, C> {
        PipelineCodec::new(serializer, self.compressor)
    }

    /// Swap the compression stage, keeping serialization
    pub fn with_compressor<C2: Compressor>(self, compressor: C2) -> PipelineCodec<T, S, C2> {
        PipelineCodec::new(self.serializer, compressor)
    }
}

impl<T, S, C> Codec<T> for PipelineCodec<T, S, C>
where
    S: Serializer<T>,
    C: Compressor,
{
    fn encode(&self, payload: &T) -> Result<Vec<u8>, CodecError> {
        let raw = self.serializer.serialize(payload)?;
        self.compressor.compress(&raw)
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError> {
        let raw = self.compressor.decompress(bytes)?;
        self.serializer.deserialize(&raw)
    }
}

impl<T, S: Clone, C: Clone> Clone for PipelineCodec<T, S, C> {
    fn clone(&self) -> Self {
        Self {
            serializer: self.serializer.clone(),
            compressor: self.compressor.clone(),
            _payload: PhantomData,
        }
    }
}

impl<T, S: std::fmt::Debug, C: std::fmt::Debug> std::fmt::Debug for PipelineCodec<T, S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineCodec")
            .field("serializer", &self.serializer)
            .field("compressor", &self.compressor)
            .finish()
    }
}

/// JSON + gzip codec
pub type JsonGzipCodec<T> = PipelineCodec<T, JsonSerializer, GzipCompressor>;

/// Default codec: JSON serialization followed by gzip
pub fn json_gzip<T>() -> JsonGzipCodec<T>
where
    T: Serialize + DeserializeOwned,
{
    PipelineCodec::new(JsonSerializer, GzipCompressor::default())
}

/// UTF-8 text codec with no compression, for plain string payloads
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8Codec;

impl Codec<String> for Utf8Codec {
    fn encode(&self, payload: &String) -> Result<Vec<u8>, CodecError> {
        Ok(payload.as_bytes().to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> Result<String, CodecError> {
        String::from_utf8(bytes.to_vec()).map_err(|e| CodecError::Deserialize(e.to_string()))
    }
}
