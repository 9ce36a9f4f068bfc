use crate::codec::CodecError;
use anyhow::{Context, Result};
use std::io::{Read, Write};

/// Batch frame compression, negotiated in the connection handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Zlib,
    Lz4,
}

impl Compression {
    pub fn from_wire(flag: u32) -> Result<Self, CodecError> {
        match flag {
            0 => Ok(Self::None),
            1 => Ok(Self::Zlib),
            2 => Ok(Self::Lz4),
            other => Err(CodecError::UnknownCompression(other)),
        }
    }

    pub fn as_wire(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Zlib => 1,
            Self::Lz4 => 2,
        }
    }
}

/// Compresses a batch payload. Used by tests and load tooling; the bridge
/// only decompresses.
pub fn compress(codec: Compression, src: &[u8]) -> Result<Vec<u8>> {
    match codec {
        Compression::None => Ok(src.to_vec()),
        Compression::Zlib => {
            let mut encoder =
                flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
            encoder
                .write_all(src)
                .with_context(|| "writing to zlib encoder")?;
            encoder.finish().with_context(|| "closing zlib encoder")
        }
        Compression::Lz4 => {
            let mut compressed = Vec::new();
            let mut encoder = lz4::EncoderBuilder::new()
                .level(10)
                .build(&mut compressed)
                .with_context(|| "allocating lz4 encoder")?;
            encoder
                .write_all(src)
                .with_context(|| "writing to lz4 encoder")?;
            let (_writer, res) = encoder.finish();
            res.with_context(|| "closing lz4 encoder")?;
            Ok(compressed)
        }
    }
}

/// Decompresses a batch frame into the raw payload.
pub fn decompress(codec: Compression, src: &[u8]) -> Result<Vec<u8>> {
    match codec {
        Compression::None => Ok(src.to_vec()),
        Compression::Zlib => {
            let mut decompressed = Vec::new();
            flate2::read::ZlibDecoder::new(src)
                .read_to_end(&mut decompressed)
                .with_context(|| "reading zlib-compressed frame")?;
            Ok(decompressed)
        }
        Compression::Lz4 => {
            let mut decompressed = Vec::new();
            let mut decoder = lz4::Decoder::new(src).with_context(|| "allocating lz4 decoder")?;
            decoder
                .read_to_end(&mut decompressed)
                .with_context(|| "reading lz4-compressed frame")?;
            let (_reader, res) = decoder.finish();
            res?;
            Ok(decompressed)
        }
    }
}
