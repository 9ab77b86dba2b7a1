//! On-disk `.fsim` fingerprint database container.
//!
//! Layout, all fields big-endian:
//!
//! ```text
//! u32 format_version          (== FORMAT_VERSION, checked at open)
//! u32 bit_count
//! u32 entry_count
//! u32 fingerprint shard count, then that many length-prefixed blocks
//! u32 smiles shard count,      then that many length-prefixed blocks
//! u32 id shard count,          then that many length-prefixed blocks
//! ```
//!
//! Fingerprint shards hold raw fixed-width bit vectors back to back; smiles
//! and id shards hold length-prefixed strings. Entry *i*'s three fields sit
//! at index *i* of each logical array. Shards rotate at a byte cap because a
//! single addressable block tops out at 2^30 bytes; an entry never spans a
//! shard boundary.

use std::fs;
use std::path::Path;

use log::debug;

use crate::codec::{ByteReader, ByteWriter};
use crate::data::{Fingerprint, FingerprintRecord};
use crate::error::Error;

pub const FORMAT_VERSION: u32 = 2;

/// Historical cap on a single shard's byte size.
pub const MAX_SHARD_BYTES: usize = 1 << 30;

/// Accumulates records into shard buffers and flushes them as one file.
#[derive(Debug)]
pub struct DatabaseWriter {
    bit_count: u32,
    entry_count: u32,
    fp_shards: Vec<ByteWriter>,
    smiles_shards: Vec<ByteWriter>,
    id_shards: Vec<ByteWriter>,
    max_shard_bytes: usize,
}

impl DatabaseWriter {
    pub fn new(bit_count: u32) -> Self {
        Self::with_shard_cap(bit_count, MAX_SHARD_BYTES)
    }

    /// Smaller caps are useful for tests and must behave identically.
    pub fn with_shard_cap(bit_count: u32, max_shard_bytes: usize) -> Self {
        Self {
            bit_count,
            entry_count: 0,
            fp_shards: vec![ByteWriter::new()],
            smiles_shards: vec![ByteWriter::new()],
            id_shards: vec![ByteWriter::new()],
            max_shard_bytes,
        }
    }

    pub fn bit_count(&self) -> u32 {
        self.bit_count
    }

    pub fn entry_count(&self) -> u32 {
        self.entry_count
    }

    fn rotate_if_full(shards: &mut Vec<ByteWriter>, incoming: usize, cap: usize) {
        let active = shards.last().map(|s| s.len()).unwrap_or(0);
        if active > 0 && active + incoming > cap {
            shards.push(ByteWriter::new());
        }
    }

    pub fn add_record(&mut self, record: &FingerprintRecord) -> Result<(), Error> {
        if record.fingerprint.bit_count() != self.bit_count as usize {
            return Err(Error::BitcountMismatch {
                found: record.fingerprint.bit_count() as u32,
                expected: self.bit_count,
            });
        }

        let fp_len = record.fingerprint.byte_len();
        let smiles_len = 4 + record.smiles.len();
        let id_len = 4 + record.id.len();
        Self::rotate_if_full(&mut self.fp_shards, fp_len, self.max_shard_bytes);
        Self::rotate_if_full(&mut self.smiles_shards, smiles_len, self.max_shard_bytes);
        Self::rotate_if_full(&mut self.id_shards, id_len, self.max_shard_bytes);

        self.fp_shards.last_mut().unwrap().write_raw(&record.fingerprint.data);
        self.smiles_shards.last_mut().unwrap().write_string(record.smiles.as_bytes());
        self.id_shards.last_mut().unwrap().write_string(record.id.as_bytes());
        self.entry_count += 1;
        Ok(())
    }

    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let mut writer = ByteWriter::new();
        writer.write_u32(FORMAT_VERSION);
        writer.write_u32(self.bit_count);
        writer.write_u32(self.entry_count);
        for shards in [&self.fp_shards, &self.smiles_shards, &self.id_shards] {
            writer.write_u32(shards.len() as u32);
            for shard in shards {
                writer.write_block(shard.as_bytes());
            }
        }
        fs::write(path.as_ref(), writer.as_bytes())?;
        debug!(
            "wrote {} with {} entries, {} bits, {} fingerprint shards",
            path.as_ref().display(),
            self.entry_count,
            self.bit_count,
            self.fp_shards.len()
        );
        Ok(())
    }
}

/// Read-only view of a `.fsim` file. Safe to share across readers.
#[derive(Debug)]
pub struct FingerprintDatabase {
    bit_count: u32,
    entry_count: u32,
    fp_shards: Vec<Vec<u8>>,
    smiles_shards: Vec<Vec<u8>>,
    id_shards: Vec<Vec<u8>>,
}

impl FingerprintDatabase {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let bytes = fs::read(path.as_ref())?;
        let mut reader = ByteReader::new(&bytes);

        let version = reader.read_u32()?;
        if version != FORMAT_VERSION {
            return Err(Error::VersionMismatch { found: version, expected: FORMAT_VERSION });
        }
        let bit_count = reader.read_u32()?;
        let entry_count = reader.read_u32()?;

        let fp_shards = read_shard_list(&mut reader)?;
        let smiles_shards = read_shard_list(&mut reader)?;
        let id_shards = read_shard_list(&mut reader)?;

        Ok(Self { bit_count, entry_count, fp_shards, smiles_shards, id_shards })
    }

    pub fn bit_count(&self) -> u32 {
        self.bit_count
    }

    pub fn entry_count(&self) -> u32 {
        self.entry_count
    }

    /// A mismatched container is unusable by a backend configured for a
    /// different width and must be rejected outright.
    pub fn expect_bit_count(&self, bit_count: u32) -> Result<(), Error> {
        if self.bit_count != bit_count {
            return Err(Error::BitcountMismatch { found: self.bit_count, expected: bit_count });
        }
        Ok(())
    }

    /// Lazy pass over all records in entry order. Restartable: every call
    /// starts again from entry 0.
    pub fn iter(&self) -> RecordIter {
        RecordIter {
            db: self,
            remaining: self.entry_count,
            fp_pos: (0, 0),
            smiles_pos: (0, 0),
            id_pos: (0, 0),
        }
    }
}

fn read_shard_list(reader: &mut ByteReader) -> Result<Vec<Vec<u8>>, Error> {
    let count = reader.read_u32()?;
    let mut shards = Vec::with_capacity(count as usize);
    for _ in 0..count {
        shards.push(reader.read_block()?.to_vec());
    }
    Ok(shards)
}

/// (shard index, byte offset) cursor into one logical array.
type ArrayPos = (usize, usize);

pub struct RecordIter<'a> {
    db: &'a FingerprintDatabase,
    remaining: u32,
    fp_pos: ArrayPos,
    smiles_pos: ArrayPos,
    id_pos: ArrayPos,
}

impl<'a> RecordIter<'a> {
    fn next_slice(shards: &'a [Vec<u8>], pos: &mut ArrayPos, fixed_len: Option<usize>) -> Result<&'a [u8], Error> {
        loop {
            let shard = shards.get(pos.0).ok_or(Error::TruncatedData)?;
            if pos.1 < shard.len() {
                let mut reader = ByteReader::new(&shard[pos.1..]);
                let slice = match fixed_len {
                    Some(n) => reader.read_raw(n)?,
                    None => reader.read_string()?,
                };
                pos.1 += match fixed_len {
                    Some(n) => n,
                    None => 4 + slice.len(),
                };
                return Ok(slice);
            }
            // active shard exhausted, move to the next one
            pos.0 += 1;
            pos.1 = 0;
        }
    }

    fn next_record(&mut self) -> Result<FingerprintRecord, Error> {
        let fp_bytes = Self::next_slice(
            &self.db.fp_shards,
            &mut self.fp_pos,
            Some(self.db.bit_count as usize / 8),
        )?;
        let smiles = Self::next_slice(&self.db.smiles_shards, &mut self.smiles_pos, None)?;
        let id = Self::next_slice(&self.db.id_shards, &mut self.id_pos, None)?;
        Ok(FingerprintRecord {
            fingerprint: Fingerprint::from_bytes(fp_bytes.to_vec()),
            smiles: String::from_utf8_lossy(smiles).into_owned(),
            id: String::from_utf8_lossy(id).into_owned(),
        })
    }
}

impl<'a> Iterator for RecordIter<'a> {
    type Item = Result<FingerprintRecord, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        match self.next_record() {
            Ok(record) => Some(Ok(record)),
            Err(e) => {
                self.remaining = 0;
                Some(Err(e))
            }
        }
    }
}

/// Concatenates the shard lists of the inputs, in command-line order, into
/// one container. Entry payloads are carried over as opaque blocks, so the
/// cost is O(shards), not O(entries). All inputs are validated before any
/// output is written.
pub fn merge<P: AsRef<Path>, Q: AsRef<Path>>(inputs: &[P], output: Q) -> Result<u32, Error> {
    let mut bit_count: Option<u32> = None;
    let mut entry_count: u32 = 0;
    let mut fp_shards: Vec<Vec<u8>> = Vec::new();
    let mut smiles_shards: Vec<Vec<u8>> = Vec::new();
    let mut id_shards: Vec<Vec<u8>> = Vec::new();

    for input in inputs {
        let bytes = fs::read(input.as_ref())?;
        let mut reader = ByteReader::new(&bytes);

        let version = reader.read_u32()?;
        if version != FORMAT_VERSION {
            return Err(Error::VersionMismatch { found: version, expected: FORMAT_VERSION });
        }
        let in_bit_count = reader.read_u32()?;
        match bit_count {
            None => bit_count = Some(in_bit_count),
            Some(expected) => {
                if in_bit_count != expected {
                    return Err(Error::BitcountMismatch { found: in_bit_count, expected });
                }
            }
        }
        entry_count += reader.read_u32()?;

        fp_shards.extend(read_shard_list(&mut reader)?);
        smiles_shards.extend(read_shard_list(&mut reader)?);
        id_shards.extend(read_shard_list(&mut reader)?);
    }

    let mut writer = ByteWriter::new();
    writer.write_u32(FORMAT_VERSION);
    writer.write_u32(bit_count.unwrap_or(0));
    writer.write_u32(entry_count);
    for shards in [&fp_shards, &smiles_shards, &id_shards] {
        writer.write_u32(shards.len() as u32);
        for shard in shards {
            writer.write_block(shard);
        }
    }
    fs::write(output.as_ref(), writer.as_bytes())?;
    Ok(entry_count)
}
