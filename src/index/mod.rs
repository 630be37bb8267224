use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::io::{self, Read, Write};

use crate::error::{ArzError, Result};
use crate::strings::{decode_string, encode_string, encoded_len};

/// One record table entry.
///
/// Wire form: `i32 name_id, (i32 len + bytes) class, i32 offset,
/// i32 compressed_len, i64 timestamp`. `offset` is relative to the start of
/// the compressed data blob, i.e. to the end of the header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordInfo {
    pub name_id:        u32,
    pub class:          String,
    pub offset:         u32,
    pub compressed_len: u32,
    /// Source file modification time in FILETIME ticks.
    pub timestamp:      i64,
}

impl RecordInfo {
    pub fn encoded_len(&self) -> usize {
        4 + encoded_len(&self.class) + 4 + 4 + 8
    }

    /// One past the last blob byte this record occupies.
    pub fn end(&self) -> u64 {
        self.offset as u64 + self.compressed_len as u64
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(self.name_id)?;
        encode_string(&mut writer, &self.class)?;
        writer.write_u32::<LittleEndian>(self.offset)?;
        writer.write_u32::<LittleEndian>(self.compressed_len)?;
        writer.write_i64::<LittleEndian>(self.timestamp)?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> Result<Self> {
        let name_id = read_u32(&mut reader)?;
        let class = decode_string(&mut reader)?;
        let offset = read_u32(&mut reader)?;
        let compressed_len = read_u32(&mut reader)?;
        let timestamp = reader
            .read_i64::<LittleEndian>()
            .map_err(|e| ArzError::truncated(e, "record entry"))?;
        if offset > i32::MAX as u32 || compressed_len > i32::MAX as u32 {
            return Err(ArzError::Format(format!(
                "record entry has negative offset {offset} or length {compressed_len}"
            )));
        }
        Ok(Self { name_id, class, offset, compressed_len, timestamp })
    }
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    reader
        .read_u32::<LittleEndian>()
        .map_err(|e| ArzError::truncated(e, "record entry"))
}
