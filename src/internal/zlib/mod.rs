//! Zlib stream adapters used by the pack codec.
pub mod stream;
