use std::io::Read;

use flate2::read::GzDecoder;

use crate::error::{DecodeError, DecompressError};
use crate::log_entry::LogEntry;

pub const JSON_MEDIA_TYPE: &str = "application/json";
pub const MSGPACK_MEDIA_TYPE: &str = "application/msgpack";
pub const GZIP_ENCODING: &str = "gzip";

/// Turns a request body into a [`LogEntry`]. Selected by media type.
pub trait Codec: Send + Sync {
    fn content_type(&self) -> &str;

    fn decode(&self, body: &[u8]) -> Result<LogEntry, DecodeError>;
}

/// Undoes a `Content-Encoding`. Selected by encoding token.
pub trait Decompressor: Send + Sync {
    fn encoding(&self) -> &str;

    fn decompress(&self, body: &[u8]) -> Result<Vec<u8>, DecompressError>;
}

pub struct JsonCodec;

impl Codec for JsonCodec {
    fn content_type(&self) -> &str {
        JSON_MEDIA_TYPE
    }

    fn decode(&self, body: &[u8]) -> Result<LogEntry, DecodeError> {
        Ok(serde_json::from_slice(body)?)
    }
}

pub struct MessagePackCodec;

impl Codec for MessagePackCodec {
    fn content_type(&self) -> &str {
        MSGPACK_MEDIA_TYPE
    }

    fn decode(&self, body: &[u8]) -> Result<LogEntry, DecodeError> {
        Ok(rmp_serde::from_slice(body)?)
    }
}

pub struct GzipDecompressor;

impl Decompressor for GzipDecompressor {
    fn encoding(&self) -> &str {
        GZIP_ENCODING
    }

    fn decompress(&self, body: &[u8]) -> Result<Vec<u8>, DecompressError> {
        let mut decoder = GzDecoder::new(body);
        let mut decompressed = Vec::new();
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|source| DecompressError::Io {
                encoding: GZIP_ENCODING.to_string(),
                source,
            })?;
        Ok(decompressed)
    }
}

/// Strip parameters (`; charset=utf-8`) and surrounding whitespace from a
/// `Content-Type` header value.
pub fn media_type(content_type: &str) -> &str {
    content_type.split(';').next().unwrap_or_default().trim()
}
