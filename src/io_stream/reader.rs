use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::codec;
use crate::error::{ArzError, Result};
use crate::header::{ArzHeader, HEADER_SIZE};
use crate::index::RecordInfo;
use crate::record::RawRecord;
use crate::strings::decode_string;

/// Extra strings decoded past a missed id, so nearby lookups hit the cache.
pub const STRING_READ_AHEAD: usize = 6;
/// Items decoded per refill while iterating a whole table.
const ITER_BATCH: usize = 256;

/// Cached prefix of an on-disk table plus the file offset just past it.
struct TableCursor<T> {
    cache:  Vec<T>,
    offset: u64,
    /// Item count, once known.
    total:  Option<usize>,
}

impl<T> TableCursor<T> {
    fn new() -> Self {
        Self { cache: Vec::new(), offset: 0, total: None }
    }
}

/// Read-only, lazily decoding view of an archive.
///
/// Nothing is read at open time. The string pool and record table are decoded
/// front to back on demand and cached; the file is never re-read from the
/// start of a table once the cache covers a request.
pub struct ArzReader {
    path:    PathBuf,
    file:    BufReader<File>,
    header:  Option<ArzHeader>,
    strings: TableCursor<String>,
    infos:   TableCursor<RecordInfo>,
    /// Decoded records by name, with the blob offset they were read from.
    records: HashMap<String, (u32, RawRecord)>,
}

impl ArzReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::error!(path = %path.display(), "archive not found");
                return Err(ArzError::NotFound(path));
            }
            Err(e) => return Err(e.into()),
        };
        if file.metadata()?.len() == 0 {
            tracing::error!(path = %path.display(), "archive is empty");
            return Err(ArzError::EmptyArchive(path));
        }
        Ok(Self {
            path,
            file:    BufReader::new(file),
            header:  None,
            strings: TableCursor::new(),
            infos:   TableCursor::new(),
            records: HashMap::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse the header on first call; cached afterwards.
    pub fn header(&mut self) -> Result<ArzHeader> {
        if let Some(h) = self.header {
            return Ok(h);
        }
        self.file.seek(SeekFrom::Start(0))?;
        let h = ArzHeader::read(&mut self.file).map_err(|e| {
            tracing::error!(path = %self.path.display(), error = %e, "invalid archive header");
            e
        })?;
        self.strings.offset = h.string_table_start as u64;
        self.infos.offset = h.record_table_start as u64;
        self.infos.total = Some(h.record_count as usize);
        self.header = Some(h);
        Ok(h)
    }

    // ── String pool ──────────────────────────────────────────────────────────

    pub fn string_count(&mut self) -> Result<usize> {
        if let Some(n) = self.strings.total {
            return Ok(n);
        }
        let h = self.header()?;
        self.file.seek(SeekFrom::Start(h.string_table_start as u64))?;
        let count = self
            .file
            .read_i32::<LittleEndian>()
            .map_err(|e| ArzError::truncated(e, "string pool count"))?;
        if count < 0 {
            return Err(ArzError::Format(format!("negative string count {count}")));
        }
        self.strings.offset = h.string_table_start as u64 + 4;
        self.strings.total = Some(count as usize);
        Ok(count as usize)
    }

    /// Decode forward until at least `upto` strings (capped at the pool size)
    /// are cached. On failure the cache is left as it was.
    fn fill_strings(&mut self, upto: usize) -> Result<()> {
        let upto = upto.min(self.string_count()?);
        if self.strings.cache.len() >= upto {
            return Ok(());
        }
        let before = self.strings.cache.len();
        let filled = (|| -> Result<u64> {
            self.file.seek(SeekFrom::Start(self.strings.offset))?;
            while self.strings.cache.len() < upto {
                let s = decode_string(&mut self.file)?;
                self.strings.cache.push(s);
            }
            Ok(self.file.stream_position()?)
        })();
        match filled {
            Ok(offset) => {
                self.strings.offset = offset;
                Ok(())
            }
            Err(e) => {
                self.strings.cache.truncate(before);
                Err(e)
            }
        }
    }

    fn check_string_id(&mut self, id: u32) -> Result<()> {
        let count = self.string_count()?;
        if id as usize >= count {
            tracing::error!(path = %self.path.display(), id, count, "string id out of range");
            return Err(ArzError::OutOfRange { what: "string", id, count });
        }
        Ok(())
    }

    /// Every string in the pool, in id order. Restartable; decoded strings
    /// are served from the cache.
    pub fn strings(&mut self) -> StringIter<'_> {
        StringIter { reader: self, next: 0, failed: false }
    }

    /// Resolve one string id.
    pub fn string(&mut self, id: u32) -> Result<String> {
        self.check_string_id(id)?;
        let i = id as usize;
        if i >= self.strings.cache.len() {
            self.fill_strings(i + STRING_READ_AHEAD)?;
        }
        Ok(self.strings.cache[i].clone())
    }

    /// Resolve a batch of ids with a single forward scan. Results follow the
    /// order of `ids`.
    pub fn resolve(&mut self, ids: &[u32]) -> Result<Vec<String>> {
        let mut sorted = ids.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        let Some(&max) = sorted.last() else {
            return Ok(Vec::new());
        };
        for &id in &sorted {
            self.check_string_id(id)?;
        }
        if max as usize >= self.strings.cache.len() {
            self.fill_strings(max as usize + STRING_READ_AHEAD)?;
        }
        Ok(ids.iter().map(|&id| self.strings.cache[id as usize].clone()).collect())
    }

    // ── Record table ─────────────────────────────────────────────────────────

    pub fn record_count(&mut self) -> Result<usize> {
        Ok(self.header()?.record_count as usize)
    }

    fn fill_infos(&mut self, upto: usize) -> Result<()> {
        let upto = upto.min(self.record_count()?);
        if self.infos.cache.len() >= upto {
            return Ok(());
        }
        let before = self.infos.cache.len();
        let filled = (|| -> Result<u64> {
            self.file.seek(SeekFrom::Start(self.infos.offset))?;
            while self.infos.cache.len() < upto {
                let info = RecordInfo::read(&mut self.file)?;
                self.infos.cache.push(info);
            }
            Ok(self.file.stream_position()?)
        })();
        match filled {
            Ok(offset) => {
                self.infos.offset = offset;
                Ok(())
            }
            Err(e) => {
                self.infos.cache.truncate(before);
                Err(e)
            }
        }
    }

    /// Every record table entry, in table order. Restartable and cached.
    pub fn record_infos(&mut self) -> RecordInfoIter<'_> {
        RecordInfoIter { reader: self, next: 0, failed: false }
    }

    // ── Record payloads ──────────────────────────────────────────────────────

    /// The record's compressed bytes, exactly as stored.
    pub fn compressed(&mut self, info: &RecordInfo) -> Result<Vec<u8>> {
        let start = HEADER_SIZE as u64 + info.offset as u64;
        self.file.seek(SeekFrom::Start(start))?;
        let mut buf = Vec::with_capacity(info.compressed_len as usize);
        let read = self
            .file
            .by_ref()
            .take(info.compressed_len as u64)
            .read_to_end(&mut buf)?;
        if read != info.compressed_len as usize {
            tracing::error!(path = %self.path.display(), offset = start, "record reads out of bounds");
            return Err(ArzError::Format(format!(
                "record at {start} declares {} bytes, {read} available",
                info.compressed_len
            )));
        }
        Ok(buf)
    }

    /// The record's uncompressed variable block.
    pub fn decompressed(&mut self, info: &RecordInfo) -> Result<Vec<u8>> {
        Ok(codec::decompress(&self.compressed(info)?)?)
    }

    /// Decode one record into text fields, template split out.
    pub fn record(&mut self, info: &RecordInfo) -> Result<RawRecord> {
        let name = self.string(info.name_id)?;
        if let Some((offset, cached)) = self.records.get(&name) {
            if *offset == info.offset {
                return Ok(cached.clone());
            }
            tracing::warn!(record = %name, "record re-read at a different offset than cached");
        }

        let decoded = self
            .decompressed(info)
            .and_then(|raw| RawRecord::decode(&name, &raw, |ids| self.resolve(ids)));
        match decoded {
            Ok(rec) => {
                self.records.insert(name, (info.offset, rec.clone()));
                Ok(rec)
            }
            Err(e) => {
                tracing::error!(record = %name, offset = info.offset, error = %e, "failed to read record");
                Err(e)
            }
        }
    }

    /// Decode every record. A record that fails to decode does not stop the
    /// others; its error is returned in its slot.
    pub fn records(&mut self) -> Result<Vec<(RecordInfo, Result<RawRecord>)>> {
        let infos = self.record_infos().collect::<Result<Vec<_>>>()?;
        Ok(infos
            .into_iter()
            .map(|info| {
                let rec = self.record(&info);
                (info, rec)
            })
            .collect())
    }
}

// ── Iterators ────────────────────────────────────────────────────────────────

pub struct StringIter<'a> {
    reader: &'a mut ArzReader,
    next:   usize,
    failed: bool,
}

impl Iterator for StringIter<'_> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if self.next >= self.reader.strings.cache.len() {
            let refill = self.reader.string_count().and_then(|total| {
                if self.next >= total {
                    return Ok(false);
                }
                self.reader.fill_strings(self.next + ITER_BATCH)?;
                Ok(true)
            });
            match refill {
                Ok(true) => {}
                Ok(false) => return None,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
        let s = self.reader.strings.cache[self.next].clone();
        self.next += 1;
        Some(Ok(s))
    }
}

pub struct RecordInfoIter<'a> {
    reader: &'a mut ArzReader,
    next:   usize,
    failed: bool,
}

impl Iterator for RecordInfoIter<'_> {
    type Item = Result<RecordInfo>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if self.next >= self.reader.infos.cache.len() {
            let refill = self.reader.record_count().and_then(|total| {
                if self.next >= total {
                    return Ok(false);
                }
                self.reader.fill_infos(self.next + ITER_BATCH)?;
                Ok(true)
            });
            match refill {
                Ok(true) => {}
                Ok(false) => return None,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
        let info = self.reader.infos.cache[self.next].clone();
        self.next += 1;
        Some(Ok(info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io_stream::ArzWriter;
    use tempfile::NamedTempFile;

    fn reader_over(n: usize) -> (NamedTempFile, ArzReader) {
        let file = NamedTempFile::new().unwrap();
        let strings: Vec<String> = (0..n).map(|i| format!("s{i}")).collect();
        ArzWriter::new(file.path())
            .write(Vec::<(RecordInfo, Vec<u8>)>::new(), &strings)
            .unwrap();
        let reader = ArzReader::open(file.path()).unwrap();
        (file, reader)
    }

    #[test]
    fn misses_read_a_small_window_ahead() {
        let (_file, mut reader) = reader_over(100);
        assert_eq!(reader.string(10).unwrap(), "s10");
        assert_eq!(reader.strings.cache.len(), 10 + STRING_READ_AHEAD);

        // Inside the window: served from cache, nothing more decoded.
        assert_eq!(reader.string(12).unwrap(), "s12");
        assert_eq!(reader.strings.cache.len(), 10 + STRING_READ_AHEAD);

        assert_eq!(reader.resolve(&[60, 3]).unwrap(), vec!["s60", "s3"]);
        assert_eq!(reader.strings.cache.len(), 60 + STRING_READ_AHEAD);

        assert_eq!(reader.string(98).unwrap(), "s98");
        assert_eq!(reader.strings.cache.len(), 100);
    }

    #[test]
    fn iteration_continues_from_the_cursor() {
        let (_file, mut reader) = reader_over(700);
        reader.string(5).unwrap();
        let offset = reader.strings.offset;

        let first: Vec<String> = reader.strings().take(3).map(|s| s.unwrap()).collect();
        assert_eq!(first, vec!["s0", "s1", "s2"]);
        assert_eq!(reader.strings.offset, offset);

        assert_eq!(reader.strings().count(), 700);
        assert_eq!(reader.strings.cache.len(), 700);
        assert_eq!(reader.strings().last().unwrap().unwrap(), "s699");
    }
}
