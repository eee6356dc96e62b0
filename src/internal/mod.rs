//! Internal building blocks: the Git object model, the pack codec, and the
//! zlib stream adapters they share.
pub mod object;
pub mod pack;
pub mod zlib;
