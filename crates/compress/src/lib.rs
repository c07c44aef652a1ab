//! Compression and decompression with automatic format detection.
//!
//! Every document the mirror writes to disk is gzip-compressed, but upstream
//! responses, legacy caches and hand-placed files may not be. This crate wraps
//! [`flate2`] behind a small [`Compression`] enum providing:
//!
//! - **Format detection** from magic bytes ([`Compression::from_magic_bytes`])
//! - **In-memory** compression/decompression ([`Compression::compress`],
//!   [`Compression::decompress`])
//! - **Transparent decoding** of bytes in an unknown format ([`decode`])
//!
//! Compression output is deterministic (the gzip header carries no
//! timestamp), so compressing identical input twice yields identical bytes.

mod construct;
pub mod error;
mod ops;
mod util;

pub use crate::ops::decode;

/// A supported compression format. Defaults to [`None`](Self::None)
/// (uncompressed).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Compression {
    /// Uncompressed
    #[default]
    None,
    /// Gzip compression (.gz)
    Gzip,
}
