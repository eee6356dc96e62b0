//! Decoder for Git delta instruction streams, rebuilding target objects from
//! a base buffer plus copy/insert op codes, with the varint helpers the pack
//! layer shares for entry headers and offsets.

use std::io::{ErrorKind, Read};

use crate::errors::GitError;

const COPY_INSTRUCTION_FLAG: u8 = 1 << 7; // msb set => copy from base, otherwise inline data
const COPY_OFFSET_BYTES: u8 = 4;
const COPY_SIZE_BYTES: u8 = 3;
const COPY_ZERO_SIZE: usize = 0x10000;

const VAR_INT_ENCODING_BITS: u8 = 7;
const VAR_INT_CONTINUE_FLAG: u8 = 1 << VAR_INT_ENCODING_BITS;

/// Read exactly `N` bytes from the stream into a fixed array.
#[inline]
pub fn read_bytes<R: Read, const N: usize>(stream: &mut R) -> std::io::Result<[u8; N]> {
    let mut bytes = [0; N];
    stream.read_exact(&mut bytes)?;
    Ok(bytes)
}

/// Read one varint byte, returning (7-bit value, has_more flag).
pub fn read_var_int_byte<R: Read>(stream: &mut R) -> std::io::Result<(u8, bool)> {
    let [byte] = read_bytes(stream)?;
    let value = byte & !VAR_INT_CONTINUE_FLAG;
    let more_bytes = byte & VAR_INT_CONTINUE_FLAG != 0;
    Ok((value, more_bytes))
}

/// Read a Git-style varint: little-endian 7-bit chunks, msb as continue flag.
pub fn read_size_encoding<R: Read>(stream: &mut R) -> std::io::Result<usize> {
    let mut value = 0;
    let mut length = 0;

    loop {
        let (byte_value, more_bytes) = read_var_int_byte(stream)?;
        value |= (byte_value as usize) << length;
        if !more_bytes {
            return Ok(value);
        }
        length += VAR_INT_ENCODING_BITS;
    }
}

/// Read a partial integer according to presence bits (used by copy
/// instructions): for each bit set in `present_bytes`, consume one byte and
/// accumulate into `value`, shifting per byte index.
pub fn read_partial_int<R: Read>(
    stream: &mut R,
    bytes: u8,
    present_bytes: &mut u8,
) -> std::io::Result<usize> {
    let mut value: usize = 0;

    for byte_index in 0..bytes {
        if *present_bytes & 1 != 0 {
            let [byte] = read_bytes(stream)?;
            value |= (byte as usize) << (byte_index * 8);
        }
        *present_bytes >>= 1;
    }

    Ok(value)
}

/// Apply a delta stream to `base_info`, returning the reconstructed target
/// bytes.
///
/// The stream begins with the declared base size and result size as varints,
/// followed by ops: data instructions (msb=0, lower 7 bits = literal length)
/// or copy instructions (msb=1, following bytes encode offset/size into the
/// base). The produced length must equal the declared result size.
pub fn delta_decode(stream: &mut impl Read, base_info: &[u8]) -> Result<Vec<u8>, GitError> {
    let base_size = read_size_encoding(stream)?;
    if base_info.len() != base_size {
        return Err(GitError::Delta(format!(
            "base size mismatch: declared {base_size}, actual {}",
            base_info.len()
        )));
    }

    let result_size = read_size_encoding(stream)?;
    let mut buffer = Vec::with_capacity(result_size);
    loop {
        // Stream end means the new object is done.
        let instruction = match read_bytes(stream) {
            Ok([instruction]) => instruction,
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => break,
            Err(err) => return Err(GitError::Delta(format!("bad instruction read: {err}"))),
        };

        if instruction & COPY_INSTRUCTION_FLAG == 0 {
            // Data instruction; the byte itself is the literal length.
            if instruction == 0 {
                // Appending 0 bytes doesn't make sense, so git disallows it.
                return Err(GitError::Delta("invalid zero data instruction".to_string()));
            }
            let mut data = vec![0; instruction as usize];
            stream
                .read_exact(&mut data)
                .map_err(|err| GitError::Delta(format!("truncated data instruction: {err}")))?;
            buffer.extend_from_slice(&data);
        } else {
            // Copy instruction.
            let mut nonzero_bytes = instruction;
            let offset = read_partial_int(stream, COPY_OFFSET_BYTES, &mut nonzero_bytes)?;
            let mut size = read_partial_int(stream, COPY_SIZE_BYTES, &mut nonzero_bytes)?;
            if size == 0 {
                // Copying 0 bytes doesn't make sense, so git assumes a different size.
                size = COPY_ZERO_SIZE;
            }
            let base_data = base_info.get(offset..offset + size).ok_or_else(|| {
                GitError::Delta(format!(
                    "copy instruction out of range: offset {offset}, size {size}, base {}",
                    base_info.len()
                ))
            })?;
            buffer.extend_from_slice(base_data);
        }
    }

    if buffer.len() != result_size {
        return Err(GitError::Delta(format!(
            "result size mismatch: declared {result_size}, produced {}",
            buffer.len()
        )));
    }
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    /// Encode a usize as a Git varint (test-side mirror of read_size_encoding).
    fn write_varint(out: &mut Vec<u8>, mut value: usize) {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                out.push(byte);
                break;
            }
            out.push(byte | 0x80);
        }
    }

    /// Hand-build a delta: copy base[4..9] then insert " tool".
    #[test]
    fn test_copy_and_insert() {
        let base = b"the patch engine";
        let mut delta = Vec::new();
        write_varint(&mut delta, base.len());
        write_varint(&mut delta, 10);
        // copy: offset present (1 byte = 4), size present (1 byte = 5)
        delta.push(0b1001_0001);
        delta.push(4);
        delta.push(5);
        // insert 5 literal bytes
        delta.push(5);
        delta.extend_from_slice(b" tool");

        let result = delta_decode(&mut Cursor::new(delta), base).unwrap();
        assert_eq!(result, b"patch tool");
    }

    /// Declared base size must match the actual base buffer.
    #[test]
    fn test_base_size_mismatch() {
        let mut delta = Vec::new();
        write_varint(&mut delta, 10);
        write_varint(&mut delta, 0);
        let err = delta_decode(&mut Cursor::new(delta), b"short").unwrap_err();
        assert!(matches!(err, GitError::Delta(_)));
    }

    /// Produced output must match the declared result size.
    #[test]
    fn test_result_size_mismatch() {
        let base = b"abc";
        let mut delta = Vec::new();
        write_varint(&mut delta, base.len());
        write_varint(&mut delta, 99); // declared larger than produced
        delta.push(1);
        delta.push(b'x');
        let err = delta_decode(&mut Cursor::new(delta), base).unwrap_err();
        assert!(matches!(err, GitError::Delta(_)));
    }

    /// A zero-byte data instruction is invalid.
    #[test]
    fn test_zero_data_instruction() {
        let base = b"abc";
        let mut delta = Vec::new();
        write_varint(&mut delta, base.len());
        write_varint(&mut delta, 1);
        delta.push(0);
        let err = delta_decode(&mut Cursor::new(delta), base).unwrap_err();
        assert!(matches!(err, GitError::Delta(_)));
    }

    /// Copy instructions with size 0 copy 0x10000 bytes per Git's rule.
    #[test]
    fn test_copy_zero_size_rule() {
        let base = vec![7u8; COPY_ZERO_SIZE];
        let mut delta = Vec::new();
        write_varint(&mut delta, base.len());
        write_varint(&mut delta, COPY_ZERO_SIZE);
        // copy with no offset bytes and no size bytes: offset 0, size 0 -> 0x10000
        delta.push(0b1000_0000);
        let result = delta_decode(&mut Cursor::new(delta), &base).unwrap();
        assert_eq!(result.len(), COPY_ZERO_SIZE);
    }

    /// Copy ranges outside the base are rejected.
    #[test]
    fn test_copy_out_of_range() {
        let base = b"tiny";
        let mut delta = Vec::new();
        write_varint(&mut delta, base.len());
        write_varint(&mut delta, 8);
        delta.push(0b1001_0001);
        delta.push(2); // offset 2
        delta.push(8); // size 8 runs past the end
        let err = delta_decode(&mut Cursor::new(delta), base).unwrap_err();
        assert!(matches!(err, GitError::Delta(_)));
    }

    /// Varint byte decoding: lower 7 bits value, msb continuation.
    #[test]
    fn test_read_var_int_byte() {
        let mut cursor = Cursor::new(vec![0b1000_0001, 0b0000_0010]);
        let (v1, more1) = read_var_int_byte(&mut cursor).unwrap();
        let (v2, more2) = read_var_int_byte(&mut cursor).unwrap();
        assert_eq!((v1, more1), (1, true));
        assert_eq!((v2, more2), (2, false));
    }

    /// Full varint assembly: two-byte encoding of 300.
    #[test]
    fn test_read_size_encoding() {
        let mut cursor = Cursor::new(vec![0b1010_1100, 0b0000_0010]);
        assert_eq!(read_size_encoding(&mut cursor).unwrap(), 300);
    }

    /// Partial int assembly based on presence bits (little-endian).
    #[test]
    fn test_read_partial_int() {
        let mut present = 0b0000_1111;
        let mut cursor = Cursor::new(vec![1u8, 2, 3, 4]);
        let v = read_partial_int(&mut cursor, 4, &mut present).unwrap();
        assert_eq!(v, 0x0403_0201);
    }
}
