//! Compression boundary.
//!
//! Each record's variable block is compressed on its own as a zlib stream
//! (2-byte header, deflate body, Adler-32 trailer) and stored verbatim in the
//! data blob. The codec is stateless, so encoders on different threads can
//! call it freely.

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{self, Read, Write};
use thiserror::Error;

/// Maximum deflate effort.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 9;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Compression error: {0}")]
    Compression(String),
    #[error("Decompression error: {0}")]
    Decompression(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Compress `data` at `level` (0-9, clamped).
pub fn compress(data: &[u8], level: u32) -> Result<Vec<u8>, CodecError> {
    let mut encoder = ZlibEncoder::new(
        Vec::with_capacity(data.len() / 2 + 16),
        Compression::new(level.min(9)),
    );
    encoder
        .write_all(data)
        .map_err(|e| CodecError::Compression(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| CodecError::Compression(e.to_string()))
}

pub fn decompress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(data.len() * 4);
    ZlibDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| CodecError::Decompression(e.to_string()))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zlib_framing() {
        let payload: Vec<u8> = (0u8..=255).cycle().take(4096).collect();
        let packed = compress(&payload, DEFAULT_COMPRESSION_LEVEL).unwrap();
        // CMF byte: deflate, 32 KiB window.
        assert_eq!(packed[0], 0x78);
        assert!(packed.len() < payload.len());
        assert_eq!(decompress(&packed).unwrap(), payload);
    }

    #[test]
    fn empty_input() {
        let packed = compress(&[], 0).unwrap();
        assert!(decompress(&packed).unwrap().is_empty());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            decompress(b"not a zlib stream"),
            Err(CodecError::Decompression(_))
        ));
    }
}
