//! sealpipe-chunks: bounded-memory zstd compression for the sealing pipeline
//!
//! # Overview
//! - `stream::Compressor`: lazy iterator of compressed chunks over any reader
//! - `stream::compress_to` / `stream::decompress_to`: reader → writer drivers
//! - `compress_bytes` / `decompress_bytes`: in-memory conveniences
//!
//! Peak memory is proportional to the chunk size, not the input size.

pub mod stream;

pub use stream::{
    compress_bytes, compress_to, decompress_bytes, decompress_to, CompressOptions, Compressor,
    StreamStats,
};
