//! Streaming pack decoder: reads the header, walks each entry, inflates the
//! zlib payloads, and resolves OFS/REF deltas against earlier entries in the
//! same pack or an externally supplied base lookup (thin packs).
//!
//! Offset-delta bases always precede their deltas, so they resolve inline.
//! Ref-delta bases may appear later in the pack; unresolved deltas park on a
//! waitlist keyed by base hash and are replayed as soon as the base arrives.
//! Whatever is still parked when the trailer is reached is a missing base.

use std::collections::HashMap;
use std::io::{BufRead, Read};

use byteorder::{BigEndian, ReadBytesExt};

use crate::{
    delta::delta_decode,
    errors::GitError,
    hash::ObjectHash,
    internal::{
        object::types::ObjectType,
        pack::{PACK_MAGIC, PACK_VERSION, entry::Entry},
        zlib::stream::inflate::ReadBoxed,
    },
    utils::{HashingReader, read_bytes, read_sha},
};

/// Summary of one decoded pack stream.
#[derive(Debug, Clone)]
pub struct PackSummary {
    /// Object count declared in the header (and resolved, on success).
    pub object_count: u32,
    /// The verified trailing SHA-1.
    pub signature: ObjectHash,
}

/// Deltas whose ref base has not appeared yet, keyed by that base hash.
#[derive(Default)]
struct Waitlist {
    pending: HashMap<ObjectHash, Vec<(usize, Vec<u8>)>>,
}

impl Waitlist {
    fn park(&mut self, base: ObjectHash, offset: usize, instructions: Vec<u8>) {
        self.pending.entry(base).or_default().push((offset, instructions));
    }

    fn take(&mut self, base: &ObjectHash) -> Vec<(usize, Vec<u8>)> {
        self.pending.remove(base).unwrap_or_default()
    }

    fn first_missing(&self) -> Option<ObjectHash> {
        self.pending.keys().next().copied()
    }

    fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Decodes one pack stream, invoking `on_entry` for every resolved object in
/// completion order. `base_lookup` supplies out-of-pack bases for thin packs;
/// pass a closure over the object store, or one returning `None` when no
/// external bases exist.
pub struct PackDecoder<L>
where
    L: Fn(&ObjectHash) -> Option<Entry>,
{
    base_lookup: L,
    by_offset: HashMap<usize, Entry>,
    by_hash: HashMap<ObjectHash, usize>,
    waitlist: Waitlist,
}

impl<L> PackDecoder<L>
where
    L: Fn(&ObjectHash) -> Option<Entry>,
{
    pub fn new(base_lookup: L) -> Self {
        Self {
            base_lookup,
            by_offset: HashMap::new(),
            by_hash: HashMap::new(),
            waitlist: Waitlist::default(),
        }
    }

    /// Decode a full pack stream from `input`.
    pub fn decode<F>(mut self, input: &mut impl BufRead, mut on_entry: F) -> Result<PackSummary, GitError>
    where
        F: FnMut(Entry),
    {
        let mut reader = HashingReader::new(input);

        let magic = read_bytes(&mut reader, 4)?;
        if magic.as_slice() != PACK_MAGIC.as_slice() {
            return Err(GitError::InvalidPackFile(format!(
                "bad magic: {:?}",
                String::from_utf8_lossy(&magic)
            )));
        }
        let version = reader.read_u32::<BigEndian>()?;
        if version != PACK_VERSION {
            return Err(GitError::InvalidPackFile(format!(
                "unsupported version: {version}"
            )));
        }
        let object_count = reader.read_u32::<BigEndian>()?;
        tracing::debug!(object_count, "decoding pack stream");

        for _ in 0..object_count {
            let offset = reader.bytes_read();
            let (obj_type, size) = read_entry_header(&mut reader)?;

            match obj_type {
                ObjectType::OffsetDelta => {
                    let distance = read_offset_encoding(&mut reader)?;
                    let base_offset = offset.checked_sub(distance).ok_or_else(|| {
                        GitError::InvalidPackFile(format!(
                            "offset delta at {offset} points {distance} bytes before the pack start"
                        ))
                    })?;
                    let instructions = inflate_delta(&mut reader, size)?;
                    let base = self.by_offset.get(&base_offset).cloned().ok_or_else(|| {
                        GitError::Delta(format!("no pack entry at base offset {base_offset}"))
                    })?;
                    self.resolve_and_register(base, instructions, offset, &mut on_entry)?;
                }
                ObjectType::HashDelta => {
                    let base_hash = ObjectHash::from_stream(&mut reader)?;
                    let instructions = inflate_delta(&mut reader, size)?;
                    let base = self
                        .by_hash
                        .get(&base_hash)
                        .and_then(|off| self.by_offset.get(off).cloned())
                        .or_else(|| (self.base_lookup)(&base_hash));
                    match base {
                        Some(base) => {
                            self.resolve_and_register(base, instructions, offset, &mut on_entry)?
                        }
                        None => self.waitlist.park(base_hash, offset, instructions),
                    }
                }
                _ => {
                    let entry = inflate_base(&mut reader, obj_type, size)?;
                    self.register(entry, offset, &mut on_entry)?;
                }
            }
        }

        // The trailer hashes everything before itself; snapshot first.
        let computed = reader.final_hash();
        let signature = read_sha(&mut reader)?;
        if signature != computed {
            return Err(GitError::InvalidPackFile(format!(
                "trailer mismatch: declared {signature}, computed {computed}"
            )));
        }

        if !self.waitlist.is_empty() {
            let missing = self.waitlist.first_missing().expect("non-empty waitlist");
            return Err(GitError::MissingBase(missing.to_string()));
        }

        Ok(PackSummary {
            object_count,
            signature,
        })
    }

    /// Apply delta instructions to a base and register the result.
    fn resolve_and_register<F>(
        &mut self,
        base: Entry,
        instructions: Vec<u8>,
        offset: usize,
        on_entry: &mut F,
    ) -> Result<(), GitError>
    where
        F: FnMut(Entry),
    {
        let data = delta_decode(&mut instructions.as_slice(), &base.data)?;
        let hash = ObjectHash::from_type_and_data(base.obj_type, &data);
        let entry = Entry {
            obj_type: base.obj_type,
            data,
            hash,
        };
        self.register(entry, offset, on_entry)
    }

    /// Record a resolved entry, emit it, and replay any ref deltas that were
    /// waiting for it (which can recursively unlock further deltas).
    fn register<F>(&mut self, entry: Entry, offset: usize, on_entry: &mut F) -> Result<(), GitError>
    where
        F: FnMut(Entry),
    {
        self.by_hash.insert(entry.hash, offset);
        self.by_offset.insert(offset, entry.clone());
        on_entry(entry.clone());

        for (delta_offset, instructions) in self.waitlist.take(&entry.hash) {
            self.resolve_and_register(entry.clone(), instructions, delta_offset, on_entry)?;
        }
        Ok(())
    }
}

/// Read the per-entry header: 3 type bits and the uncompressed size spread
/// across continuation bytes (low 4 bits first, then 7 bits per byte).
fn read_entry_header(reader: &mut impl Read) -> Result<(ObjectType, usize), GitError> {
    let mut byte = [0u8; 1];
    reader.read_exact(&mut byte)?;
    let obj_type = ObjectType::from_u8((byte[0] >> 4) & 0x07)?;
    let mut size = (byte[0] & 0x0f) as usize;
    let mut shift = 4;
    while byte[0] & 0x80 != 0 {
        reader.read_exact(&mut byte)?;
        size |= ((byte[0] & 0x7f) as usize) << shift;
        shift += 7;
    }
    Ok((obj_type, size))
}

/// Read the offset-delta base distance. This is not the size varint: each
/// continuation step computes `((value + 1) << 7) | bits` so that distinct
/// encodings map to distinct values.
fn read_offset_encoding(reader: &mut impl Read) -> Result<usize, GitError> {
    let mut byte = [0u8; 1];
    reader.read_exact(&mut byte)?;
    let mut value = (byte[0] & 0x7f) as usize;
    while byte[0] & 0x80 != 0 {
        reader.read_exact(&mut byte)?;
        value = ((value + 1) << 7) | (byte[0] & 0x7f) as usize;
    }
    Ok(value)
}

/// Inflate a base object of the declared size, producing a finished entry.
fn inflate_base(
    reader: &mut impl BufRead,
    obj_type: ObjectType,
    size: usize,
) -> Result<Entry, GitError> {
    let mut boxed = ReadBoxed::new(reader, obj_type, size);
    let mut data = Vec::with_capacity(size);
    boxed.read_to_end(&mut data)?;
    if data.len() != size {
        return Err(GitError::InvalidPackFile(format!(
            "entry size mismatch: declared {size}, inflated {}",
            data.len()
        )));
    }
    let hash = boxed.object_hash();
    Ok(Entry {
        obj_type,
        data,
        hash,
    })
}

/// Inflate a delta instruction stream of the declared size.
fn inflate_delta(reader: &mut impl BufRead, size: usize) -> Result<Vec<u8>, GitError> {
    let mut boxed = ReadBoxed::new_for_delta(reader);
    let mut data = Vec::with_capacity(size);
    boxed.read_to_end(&mut data)?;
    if data.len() != size {
        return Err(GitError::InvalidPackFile(format!(
            "delta size mismatch: declared {size}, inflated {}",
            data.len()
        )));
    }
    Ok(data)
}
