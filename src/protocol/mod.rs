//! Smart-HTTP protocol v2 plumbing: pkt-line framing, the HTTP transport,
//! ls-refs and receive-pack ref operations, and the fetch request planner
//! with side-band demultiplexing.

pub mod fetch;
pub mod pkt_line;
pub mod refs;
pub mod transport;
