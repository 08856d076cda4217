//! luca-core
//!
//! Binary codecs for the LucaSystem engine family: the PAK archive
//! container, the CZ0..CZ4 image formats with their LZW and delta-line
//! coding layers, and the bitmap font atlas/info pair.
//!
//! All parsers own their decoded buffers; re-encoding produces a fresh
//! buffer and never mutates the source bytes.

pub mod cancel;
pub mod format;

pub use cancel::CancelToken;
