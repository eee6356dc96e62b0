//! Buffered inflate reader that decodes Git's zlib-compressed objects while
//! simultaneously tracking the SHA-1 object digest for identity computation.

use std::{io, io::BufRead};

use flate2::{Decompress, FlushDecompress, Status};
use sha1::{Digest, Sha1};

use crate::{hash::ObjectHash, internal::object::types::ObjectType};

/// `ReadBoxed` inflates one DEFLATE stream out of a larger buffered input
/// without over-reading past the end of the stream, so the pack decoder can
/// continue with the next entry right where the compressed payload stopped.
///
/// For base objects the reader also accumulates the SHA-1 of
/// `"<type> <len>\0" + content` as bytes are produced, which becomes the
/// object id without a second pass over the data.
pub struct ReadBoxed<R> {
    /// The reader from which bytes should be decompressed.
    pub inner: R,
    /// The decompressor doing all the work.
    pub decompressor: Box<Decompress>,
    /// Whether the running object digest is maintained (false for deltas).
    count_hash: bool,
    /// Running object digest, seeded with the loose-object header.
    hash: Sha1,
}

impl<R> ReadBoxed<R>
where
    R: BufRead,
{
    /// Create a reader for a base object: the digest is seeded with the
    /// `"<type> <size>\0"` header before any content is read.
    pub fn new(inner: R, obj_type: ObjectType, size: usize) -> Self {
        let mut hash = Sha1::new();
        hash.update(obj_type.to_bytes());
        hash.update(b" ");
        hash.update(size.to_string().as_bytes());
        hash.update(b"\0");
        ReadBoxed {
            inner,
            hash,
            count_hash: true,
            decompressor: Box::new(Decompress::new(true)),
        }
    }

    /// Create a reader for delta instructions, which have no object identity
    /// of their own and skip digest maintenance.
    pub fn new_for_delta(inner: R) -> Self {
        ReadBoxed {
            inner,
            hash: Sha1::new(),
            count_hash: false,
            decompressor: Box::new(Decompress::new(true)),
        }
    }

    /// The object id accumulated so far. Only meaningful once the full
    /// content has been read through a reader created with [`ReadBoxed::new`].
    pub fn object_hash(&self) -> ObjectHash {
        let digest: [u8; 20] = self.hash.clone().finalize().into();
        ObjectHash(digest)
    }
}

impl<R> io::Read for ReadBoxed<R>
where
    R: BufRead,
{
    fn read(&mut self, into: &mut [u8]) -> io::Result<usize> {
        let o = read(&mut self.inner, &mut self.decompressor, into)?;
        if self.count_hash {
            self.hash.update(&into[..o]);
        }
        Ok(o)
    }
}

/// Read bytes from `rd` and decompress them using `state` into a pre-allocated
/// fitting buffer `dst`, returning the amount of bytes written.
fn read(rd: &mut impl BufRead, state: &mut Decompress, mut dst: &mut [u8]) -> io::Result<usize> {
    let mut total_written = 0;
    loop {
        let (written, consumed, ret, eof);
        {
            let input = rd.fill_buf()?;
            eof = input.is_empty();
            let before_out = state.total_out();
            let before_in = state.total_in();
            let flush = if eof {
                FlushDecompress::Finish
            } else {
                FlushDecompress::None
            };
            ret = state.decompress(input, dst, flush);
            written = (state.total_out() - before_out) as usize;
            total_written += written;
            dst = &mut dst[written..];
            consumed = (state.total_in() - before_in) as usize;
        }
        rd.consume(consumed);

        match ret {
            // The stream has officially ended, nothing more to do here.
            Ok(Status::StreamEnd) => return Ok(total_written),
            // Either input or output is depleted even though the stream is not done yet.
            Ok(Status::Ok | Status::BufError) if eof || dst.is_empty() => return Ok(total_written),
            // Progress was made, keep going until the stream end.
            Ok(Status::Ok | Status::BufError) if consumed != 0 || written != 0 => continue,
            Ok(Status::Ok | Status::BufError) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "deflate stream stalled without progress",
                ));
            }
            Err(..) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "corrupt deflate stream",
                ));
            }
        }
    }
}
