use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, WriteBytesExt};

use crate::error::{ArzError, Result};
use crate::header::ArzHeader;
use crate::index::RecordInfo;
use crate::strings::{encode_string, encoded_len};

/// Writes a complete archive in one pass.
///
/// The target is truncated before anything is written. A failed write leaves
/// it in an undefined state; callers keep their entries and retry.
pub struct ArzWriter {
    path: PathBuf,
}

impl ArzWriter {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self { path: path.as_ref().to_owned() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `entries` (index entry + compressed block, in caller order) and
    /// the string pool (in id order). Returns the entries with their final
    /// offsets and lengths.
    pub fn write<I, B>(&self, entries: I, strings: &[String]) -> Result<Vec<RecordInfo>>
    where
        I: IntoIterator<Item = (RecordInfo, B)>,
        B: AsRef<[u8]>,
    {
        let result = File::create(&self.path)
            .map_err(ArzError::from)
            .and_then(|file| {
                let mut out = BufWriter::new(file);
                let (header, placed) = write_archive(&mut out, entries, strings)?;
                out.flush()?;
                Ok((header, placed))
            });
        match result {
            Ok((header, placed)) => {
                tracing::info!(
                    path = %self.path.display(),
                    records = header.record_count,
                    strings = strings.len(),
                    "archive written"
                );
                Ok(placed)
            }
            Err(e) => {
                tracing::error!(path = %self.path.display(), error = %e, "failed to write archive");
                Err(e)
            }
        }
    }
}

/// Lay out and emit a whole archive: header, data blob, record table, pool.
pub fn write_archive<W, I, B>(mut writer: W, entries: I, strings: &[String]) -> Result<(ArzHeader, Vec<RecordInfo>)>
where
    W: Write,
    I: IntoIterator<Item = (RecordInfo, B)>,
    B: AsRef<[u8]>,
{
    let mut blob = Vec::new();
    let mut table = Vec::new();
    let mut placed = Vec::new();

    for (mut info, bytes) in entries {
        let bytes = bytes.as_ref();
        info.offset = blob_u32(blob.len(), "record offset")?;
        info.compressed_len = blob_u32(bytes.len(), "record length")?;
        blob.extend_from_slice(bytes);
        info.write(&mut table)?;
        placed.push(info);
    }

    let pool_size = 4 + strings.iter().map(|s| encoded_len(s)).sum::<usize>();
    let header = ArzHeader::for_layout(blob.len(), table.len(), placed.len(), pool_size)?;

    header.write(&mut writer)?;
    writer.write_all(&blob)?;
    writer.write_all(&table)?;
    let count = i32::try_from(strings.len())
        .map_err(|_| ArzError::Format(format!("{} strings do not fit in i32", strings.len())))?;
    writer.write_i32::<LittleEndian>(count)?;
    for s in strings {
        encode_string(&mut writer, s)?;
    }
    Ok((header, placed))
}

fn blob_u32(n: usize, what: &str) -> Result<u32> {
    i32::try_from(n)
        .map(|v| v as u32)
        .map_err(|_| ArzError::Format(format!("{what} {n} exceeds the 2 GiB format limit")))
}
