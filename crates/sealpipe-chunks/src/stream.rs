//! Chunked zstd compression and decompression
//!
//! Input is consumed at most `chunk_size` bytes at a time. The compressor
//! produces a single zstd frame; its epilogue is emitted by the encoder's
//! finish step once the reader reports EOF. Leaving that step out produces a
//! frame the decompressor rejects as truncated.
//!
//! The decompressor drives the raw zstd decoder with fixed-size input and
//! output buffers and only reports success once the frame is complete.

use std::io::{Read, Write};
use std::iter::FusedIterator;

use sealpipe_core::config::{DEFAULT_CHUNK_SIZE, DEFAULT_COMPRESSION_LEVEL};
use sealpipe_core::io::read_full;
use sealpipe_core::{SealError, SealResult};
use zstd::stream::raw::{Decoder as RawDecoder, InBuffer, Operation, OutBuffer};
use zstd::stream::write::Encoder;

/// Streaming parameters for the compressor
#[derive(Debug, Clone, Copy)]
pub struct CompressOptions {
    /// Maximum bytes read from the source per step
    pub chunk_size: usize,
    /// zstd level
    pub level: i32,
}

impl Default for CompressOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

/// Byte counts for one streaming run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub bytes_in: u64,
    pub bytes_out: u64,
}

/// Lazy sequence of compressed chunks read from `R`.
///
/// Yields `Ok(chunk)` for every non-empty piece of encoder output and ends
/// after the frame epilogue. Not restartable: once it returns `None` or an
/// error, every further call returns `None`.
pub struct Compressor<R> {
    reader: R,
    encoder: Option<Encoder<'static, Vec<u8>>>,
    buf: Vec<u8>,
    bytes_in: u64,
}

impl<R: Read> Compressor<R> {
    pub fn new(reader: R, opts: CompressOptions) -> SealResult<Self> {
        if opts.chunk_size == 0 {
            return Err(SealError::invalid_input("chunk size must be non-zero"));
        }
        let encoder = Encoder::new(Vec::new(), opts.level)?;
        Ok(Self {
            reader,
            encoder: Some(encoder),
            buf: vec![0u8; opts.chunk_size],
            bytes_in: 0,
        })
    }

    /// Uncompressed bytes consumed so far
    pub fn bytes_in(&self) -> u64 {
        self.bytes_in
    }

    fn step(&mut self) -> SealResult<Option<Vec<u8>>> {
        while self.encoder.is_some() {
            let n = read_full(&mut self.reader, &mut self.buf)?;
            if n == 0 {
                return match self.encoder.take() {
                    Some(encoder) => Ok(Some(encoder.finish()?)),
                    None => Ok(None),
                };
            }
            self.bytes_in += n as u64;

            if let Some(encoder) = self.encoder.as_mut() {
                encoder.write_all(&self.buf[..n])?;
                let out = std::mem::take(encoder.get_mut());
                if !out.is_empty() {
                    return Ok(Some(out));
                }
            }
        }
        Ok(None)
    }
}

impl<R: Read> Iterator for Compressor<R> {
    type Item = SealResult<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.step() {
            Ok(Some(chunk)) => Some(Ok(chunk)),
            Ok(None) => None,
            Err(e) => {
                self.encoder = None;
                Some(Err(e))
            }
        }
    }
}

impl<R: Read> FusedIterator for Compressor<R> {}

/// Compress everything from `reader` into `writer`.
pub fn compress_to<R: Read, W: Write>(
    reader: R,
    writer: &mut W,
    opts: CompressOptions,
) -> SealResult<StreamStats> {
    let mut compressor = Compressor::new(reader, opts)?;
    let mut bytes_out = 0u64;
    for chunk in compressor.by_ref() {
        let chunk = chunk?;
        writer.write_all(&chunk)?;
        bytes_out += chunk.len() as u64;
    }
    writer.flush()?;

    let stats = StreamStats {
        bytes_in: compressor.bytes_in(),
        bytes_out,
    };
    tracing::trace!(bytes_in = stats.bytes_in, bytes_out = stats.bytes_out, "compressed stream");
    Ok(stats)
}

/// Decompress a zstd stream from `reader` into `writer`.
///
/// Fails with `CorruptStream` if the input is empty, garbled, or ends before
/// the frame is complete. Bytes already written to `writer` at that point
/// must be discarded by the caller.
pub fn decompress_to<R: Read, W: Write>(
    mut reader: R,
    writer: &mut W,
    chunk_size: usize,
) -> SealResult<StreamStats> {
    if chunk_size == 0 {
        return Err(SealError::invalid_input("chunk size must be non-zero"));
    }

    let mut decoder = RawDecoder::new()?;
    let mut input = vec![0u8; chunk_size];
    let mut output = vec![0u8; chunk_size];
    let mut stats = StreamStats::default();
    let mut frame_complete = false;

    loop {
        let n = read_full(&mut reader, &mut input)?;
        if n == 0 {
            break;
        }
        stats.bytes_in += n as u64;

        let mut src = InBuffer::around(&input[..n]);
        loop {
            let (hint, produced) = {
                let mut dst = OutBuffer::around(&mut output[..]);
                let hint = decoder
                    .run(&mut src, &mut dst)
                    .map_err(|e| SealError::corrupt(format!("zstd decode failed: {e}")))?;
                (hint, dst.pos())
            };
            frame_complete = hint == 0;
            writer.write_all(&output[..produced])?;
            stats.bytes_out += produced as u64;

            // Keep draining while the decoder filled the whole output buffer.
            if src.pos() >= n && produced < output.len() {
                break;
            }
        }
    }

    if stats.bytes_in == 0 {
        return Err(SealError::corrupt("empty stream"));
    }
    if !frame_complete {
        return Err(SealError::corrupt(format!(
            "truncated stream: frame incomplete after {} input bytes",
            stats.bytes_in
        )));
    }
    writer.flush()?;

    tracing::trace!(bytes_in = stats.bytes_in, bytes_out = stats.bytes_out, "decompressed stream");
    Ok(stats)
}

/// Compress a byte slice in memory.
pub fn compress_bytes(data: &[u8], level: i32) -> SealResult<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() / 2 + 64);
    compress_to(
        data,
        &mut out,
        CompressOptions {
            level,
            ..CompressOptions::default()
        },
    )?;
    Ok(out)
}

/// Decompress a complete zstd frame held in memory.
pub fn decompress_bytes(data: &[u8]) -> SealResult<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() * 2);
    decompress_to(data, &mut out, DEFAULT_CHUNK_SIZE)?;
    Ok(out)
}
