//! Archive reader and writer.
//!
//! # Writer
//! [`ArzWriter`] takes already compressed record blocks plus the string pool,
//! assigns each block the running offset inside the data blob, and emits
//! header, blob, record table and pool in one pass.
//!
//! # Reader
//! [`ArzReader`] decodes lazily: the header on first use, the string pool and
//! record table front to back as far as a request needs, each cached behind
//! an explicit cursor. Single string misses read a few entries ahead.
//!
//! # Endianness
//! Everything is little-endian; see `header.rs`, `index` and `variable.rs`
//! for field-level layouts.

mod reader;
mod writer;

pub use reader::{ArzReader, RecordInfoIter, StringIter, STRING_READ_AHEAD};
pub use writer::{write_archive, ArzWriter};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::compress;
    use crate::error::ArzError;
    use crate::header::HEADER_SIZE;
    use crate::index::RecordInfo;
    use crate::variable::{write_variables, Values, Variable};
    use tempfile::NamedTempFile;

    fn pool(n: usize) -> Vec<String> {
        let mut strings: Vec<String> = vec!["templateName".into(), "t.tpl".into(), "records/a.dbr".into()];
        strings.extend((strings.len()..n).map(|i| format!("s{i}")));
        strings
    }

    fn block(value_id: u32) -> Vec<u8> {
        let raw = write_variables(&[
            Variable { name_id: 0, values: Values::String(vec![1]) },
            Variable { name_id: 3, values: Values::String(vec![value_id]) },
            Variable { name_id: 4, values: Values::Int(vec![42]) },
        ])
        .unwrap();
        compress(&raw, 9).unwrap()
    }

    fn info(name_id: u32) -> RecordInfo {
        RecordInfo { name_id, class: "Item".into(), offset: 0, compressed_len: 0, timestamp: 5 }
    }

    #[test]
    fn written_archive_reads_back() {
        let file = NamedTempFile::new().unwrap();
        let strings = pool(40);
        let placed = ArzWriter::new(file.path())
            .write(vec![(info(2), block(30)), (info(5), block(31))], &strings)
            .unwrap();
        assert_eq!(placed[0].offset, 0);
        assert_eq!(placed[1].offset, placed[0].compressed_len);

        let mut reader = ArzReader::open(file.path()).unwrap();
        let h = reader.header().unwrap();
        assert_eq!(h.record_count, 2);
        assert_eq!(h.data_len() as u32, placed[1].end() as u32);

        let all: Vec<String> = reader.strings().collect::<Result<_, _>>().unwrap();
        assert_eq!(all, strings);
        let infos: Vec<RecordInfo> = reader.record_infos().collect::<Result<_, _>>().unwrap();
        assert_eq!(infos, placed);

        let rec = reader.record(&infos[1]).unwrap();
        assert_eq!(rec.name, "s5");
        assert_eq!(rec.template, "t.tpl");
        assert_eq!(rec.fields["s3"], "s31");
        assert_eq!(rec.fields["s4"], "42");
    }

    #[test]
    fn string_lookups() {
        let file = NamedTempFile::new().unwrap();
        let strings = pool(100);
        ArzWriter::new(file.path()).write(Vec::<(RecordInfo, Vec<u8>)>::new(), &strings).unwrap();

        let mut reader = ArzReader::open(file.path()).unwrap();
        assert_eq!(reader.string(10).unwrap(), "s10");
        assert_eq!(reader.string(12).unwrap(), "s12");
        assert_eq!(reader.resolve(&[60, 3, 60]).unwrap(), vec!["s60", "s3", "s60"]);

        assert!(matches!(reader.string(100), Err(ArzError::OutOfRange { id: 100, count: 100, .. })));
        assert_eq!(reader.strings().count(), 100);
        assert_eq!(reader.strings().count(), 100);
    }

    #[test]
    fn empty_archive_is_openable() {
        let file = NamedTempFile::new().unwrap();
        ArzWriter::new(file.path()).write(Vec::<(RecordInfo, Vec<u8>)>::new(), &[]).unwrap();
        assert_eq!(std::fs::metadata(file.path()).unwrap().len() as usize, HEADER_SIZE + 4);

        let mut reader = ArzReader::open(file.path()).unwrap();
        assert_eq!(reader.header().unwrap().record_count, 0);
        assert_eq!(reader.strings().count(), 0);
        assert_eq!(reader.record_infos().count(), 0);
    }

    #[test]
    fn open_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.arz");
        assert!(matches!(ArzReader::open(&missing), Err(ArzError::NotFound(_))));

        let empty = dir.path().join("empty.arz");
        std::fs::write(&empty, b"").unwrap();
        assert!(matches!(ArzReader::open(&empty), Err(ArzError::EmptyArchive(_))));

        let short = dir.path().join("short.arz");
        std::fs::write(&short, [4u8, 0, 3, 0, 1]).unwrap();
        let mut reader = ArzReader::open(&short).unwrap();
        assert!(matches!(reader.header(), Err(ArzError::Format(_))));
    }

    #[test]
    fn truncated_record_is_detected() {
        let file = NamedTempFile::new().unwrap();
        let strings = pool(40);
        let placed = ArzWriter::new(file.path()).write(vec![(info(2), block(30))], &strings).unwrap();

        let mut reader = ArzReader::open(file.path()).unwrap();
        let mut bogus = placed[0].clone();
        bogus.offset = 1 << 20;
        assert!(matches!(reader.compressed(&bogus), Err(ArzError::Format(_))));
    }

    #[test]
    fn record_without_template_fails_alone() {
        let file = NamedTempFile::new().unwrap();
        let strings = pool(40);
        let bad = compress(&write_variables(&[Variable { name_id: 4, values: Values::Bool(vec![1]) }]).unwrap(), 9)
            .unwrap();
        ArzWriter::new(file.path())
            .write(vec![(info(2), bad), (info(5), block(30))], &strings)
            .unwrap();

        let mut reader = ArzReader::open(file.path()).unwrap();
        let all = reader.records().unwrap();
        assert!(matches!(all[0].1, Err(ArzError::MissingSchemaReference(_))));
        assert_eq!(all[1].1.as_ref().unwrap().fields["s3"], "s30");
    }
}
