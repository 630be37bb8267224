//! Fixed archive header.
//!
//! ```text
//! offset 0:  i32  magic (0x0003_0004)
//! offset 4:  i32  record table start
//! offset 8:  i32  record table byte size
//! offset 12: i32  record count
//! offset 16: i32  string table start
//! offset 20: i32  string table byte size
//! offset 24: ...  compressed record data
//! ```
//!
//! Record offsets stored in the index are relative to the end of the header,
//! so `record_table_start == HEADER_SIZE + data blob length` and
//! `string_table_start == record_table_start + record_table_size`.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

use crate::error::{ArzError, Result};

pub const MAGIC: i32 = 0x0003_0004;
/// Header size in bytes; also the base every record offset is relative to.
pub const HEADER_SIZE: usize = 24;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArzHeader {
    pub magic:              i32,
    pub record_table_start: i32,
    pub record_table_size:  i32,
    pub record_count:       i32,
    pub string_table_start: i32,
    pub string_table_size:  i32,
}

impl ArzHeader {
    /// Header for an archive whose compressed data blob is `data_len` bytes.
    pub fn for_layout(
        data_len:          usize,
        record_table_size: usize,
        record_count:      usize,
        string_table_size: usize,
    ) -> Result<Self> {
        let record_table_start = checked_i32(HEADER_SIZE + data_len, "record table start")?;
        let record_table_size  = checked_i32(record_table_size, "record table size")?;
        let string_table_start = record_table_start
            .checked_add(record_table_size)
            .ok_or_else(|| ArzError::Format("string table start overflows i32".into()))?;
        Ok(Self {
            magic: MAGIC,
            record_table_start,
            record_table_size,
            record_count: checked_i32(record_count, "record count")?,
            string_table_start,
            string_table_size: checked_i32(string_table_size, "string table size")?,
        })
    }

    /// Length of the compressed data blob between header and record table.
    pub fn data_len(&self) -> usize {
        (self.record_table_start as usize).saturating_sub(HEADER_SIZE)
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_i32::<LittleEndian>(self.magic)?;
        writer.write_i32::<LittleEndian>(self.record_table_start)?;
        writer.write_i32::<LittleEndian>(self.record_table_size)?;
        writer.write_i32::<LittleEndian>(self.record_count)?;
        writer.write_i32::<LittleEndian>(self.string_table_start)?;
        writer.write_i32::<LittleEndian>(self.string_table_size)?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> Result<Self> {
        let mut field = || reader.read_i32::<LittleEndian>().map_err(|e| ArzError::truncated(e, "header"));
        let header = Self {
            magic:              field()?,
            record_table_start: field()?,
            record_table_size:  field()?,
            record_count:       field()?,
            string_table_start: field()?,
            string_table_size:  field()?,
        };
        if header.magic != MAGIC {
            tracing::warn!("unexpected archive magic {:#x}", header.magic);
        }
        if header.record_table_start < HEADER_SIZE as i32
            || header.record_table_size < 0
            || header.record_count < 0
            || header.string_table_start < 0
            || header.string_table_size < 0
        {
            return Err(ArzError::Format(format!("inconsistent header {header:?}")));
        }
        Ok(header)
    }
}

fn checked_i32(value: usize, what: &str) -> Result<i32> {
    i32::try_from(value).map_err(|_| ArzError::Format(format!("{what} {value} does not fit in i32")))
}
