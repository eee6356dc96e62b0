//! Shared I/O helpers for pack streams: exact-length reads and a hashing
//! reader that keeps a running SHA-1 of everything consumed so the pack
//! trailer can be verified without buffering the whole stream twice.

use std::{
    io,
    io::{BufRead, Read},
};

use sha1::{Digest, Sha1};

use crate::hash::ObjectHash;

/// Read exactly `len` bytes into a fresh buffer.
pub fn read_bytes(file: &mut impl Read, len: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0; len];
    file.read_exact(&mut buf)?;
    Ok(buf)
}

/// Read a 20-byte SHA-1 from the stream.
pub fn read_sha(file: &mut impl Read) -> io::Result<ObjectHash> {
    ObjectHash::from_stream(file)
}

/// A reader wrapper that tracks bytes consumed and a running SHA-1 over them.
///
/// The pack trailer is the SHA-1 of every byte preceding it, so the decoder
/// reads the entire stream through this wrapper and compares `final_hash`
/// against the trailer.
pub struct HashingReader<R> {
    inner: R,
    hash: Sha1,
    bytes_read: usize,
}

impl<R> HashingReader<R>
where
    R: BufRead,
{
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hash: Sha1::new(),
            bytes_read: 0,
        }
    }

    /// Number of bytes read so far.
    pub fn bytes_read(&self) -> usize {
        self.bytes_read
    }

    /// SHA-1 of the data read so far (the internal state is not consumed).
    pub fn final_hash(&self) -> ObjectHash {
        let digest: [u8; 20] = self.hash.clone().finalize().into();
        ObjectHash(digest)
    }
}

impl<R> BufRead for HashingReader<R>
where
    R: BufRead,
{
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        let buffer = self.inner.fill_buf().expect("fill_buf after consume");
        self.hash.update(&buffer[..amt]);
        self.inner.consume(amt);
        self.bytes_read += amt;
    }
}

impl<R> Read for HashingReader<R>
where
    R: BufRead,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let o = self.inner.read(buf)?;
        self.hash.update(&buf[..o]);
        self.bytes_read += o;
        Ok(o)
    }
}
