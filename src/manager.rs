//! Incremental synchronizer, the primary embedding surface.
//!
//! ```no_run
//! use std::path::Path;
//! use arzsync::manager::ArzManager;
//! use arzsync::source::ResolvedRecord;
//!
//! fn parse(path: &Path) -> arzsync::Result<ResolvedRecord> {
//!     // Resolve the loose record against its template.
//!     # unimplemented!()
//! }
//!
//! let mut arz = ArzManager::open("database/database.arz", "database")?;
//! arz.sync_many(&["database/records/item/sword.dbr"], &parse, true);
//! arz.flush()?;
//! # Ok::<(), arzsync::ArzError>(())
//! ```
//!
//! The manager loads the existing archive's string pool and record table once,
//! re-encodes only records whose source is newer than the stored timestamp,
//! and rewrites the whole archive on [`flush`](ArzManager::flush) if anything
//! changed. Unchanged records are copied from the old file as compressed
//! bytes, never decoded.

use std::collections::hash_map::Entry as MapEntry;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Component, Path, PathBuf};

use crate::codec::{self, DEFAULT_COMPRESSION_LEVEL};
use crate::encoder::{compress_record, encode_record};
use crate::error::{ArzError, Result};
use crate::index::RecordInfo;
use crate::io_stream::{ArzReader, ArzWriter};
use crate::record::RawRecord;
use crate::source::{FsTimeSource, RecordParser, TimeSource};
use crate::strings::StringTable;

// ── SyncOptions ───────────────────────────────────────────────────────────────

/// Configuration for [`ArzManager::with_options`].
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Deflate level for re-encoded records, 0-9.
    pub compression_level: u32,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self { compression_level: DEFAULT_COMPRESSION_LEVEL }
    }
}

// ── Sync results ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// Stored copy is at least as new as the source; nothing was done.
    Unchanged,
    Added,
    Updated,
    /// Parsing or encoding failed; the stored copy (if any) is untouched.
    Failed,
}

/// Per-batch tally; the counts add up to the number of sources given.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub added:      usize,
    pub updated:    usize,
    pub unchanged:  usize,
    pub failed:     usize,
    /// Encoded in a parallel batch but discarded for a newer source with the
    /// same record name.
    pub superseded: usize,
}

impl SyncReport {
    fn count(&mut self, status: SyncStatus) {
        match status {
            SyncStatus::Unchanged => self.unchanged += 1,
            SyncStatus::Added     => self.added += 1,
            SyncStatus::Updated   => self.updated += 1,
            SyncStatus::Failed    => self.failed += 1,
        }
    }
}

/// Called once per source record that was synced or found unchanged.
pub type RecordDoneFn = Box<dyn Fn(&Path) + Send + Sync>;

// ── Entries ───────────────────────────────────────────────────────────────────

struct Entry {
    info: RecordInfo,
    /// Compressed block; `None` while it still lives in the loaded archive at
    /// `info.offset`.
    blob: Option<Vec<u8>>,
}

enum Outcome {
    Unchanged,
    Failed,
    Encoded { key: String, status: SyncStatus, entry: Entry },
}

/// Read-only view handed to sync workers.
struct SyncContext<'a> {
    base_dir: &'a Path,
    entries:  &'a HashMap<String, Entry>,
    strings:  &'a StringTable,
    time:     &'a dyn TimeSource,
    on_done:  Option<&'a RecordDoneFn>,
    level:    u32,
}

impl SyncContext<'_> {
    fn done(&self, source: &Path) {
        if let Some(f) = self.on_done {
            f(source);
        }
    }

    fn process<P: RecordParser + ?Sized>(&self, source: &Path, parser: &P) -> Outcome {
        let name = match relative_name(self.base_dir, source) {
            Ok(n) => n,
            Err(e) => {
                tracing::error!(path = %source.display(), error = %e, "cannot sync record");
                return Outcome::Failed;
            }
        };
        let modified = match self.time.modified(source) {
            Ok(t) => t,
            Err(e) => {
                tracing::error!(path = %source.display(), error = %e, "cannot read modification time");
                return Outcome::Failed;
            }
        };

        let key = name.to_lowercase();
        let existing = self.entries.get(&key);
        if let Some(e) = existing {
            if e.info.timestamp >= modified {
                tracing::debug!(path = %source.display(), "record unchanged");
                self.done(source);
                return Outcome::Unchanged;
            }
        }
        let status = if existing.is_some() { SyncStatus::Updated } else { SyncStatus::Added };

        let encoded = parser
            .parse(source)
            .and_then(|record| encode_record(&record, &name, self.strings))
            .and_then(|enc| {
                let blob = compress_record(&enc.raw, self.level)?;
                Ok((enc, blob))
            });
        match encoded {
            Ok((enc, blob)) => {
                tracing::info!(
                    path = %source.display(),
                    status = if status == SyncStatus::Added { "added" } else { "updated" },
                    "record synced"
                );
                self.done(source);
                let info = RecordInfo {
                    name_id:        enc.name_id,
                    class:          enc.class,
                    offset:         0,
                    compressed_len: blob.len() as u32,
                    timestamp:      modified,
                };
                Outcome::Encoded { key, status, entry: Entry { info, blob: Some(blob) } }
            }
            Err(e) => {
                tracing::error!(path = %source.display(), error = %e, "failed to sync record");
                Outcome::Failed
            }
        }
    }
}

// ── ArzManager ────────────────────────────────────────────────────────────────

/// In-memory index of one archive plus the machinery to keep it current.
///
/// `sync_*` and `flush`/query methods take `&mut self`, so a sync batch never
/// overlaps other access to the same manager.
pub struct ArzManager {
    path:     PathBuf,
    base_dir: PathBuf,
    options:  SyncOptions,
    reader:   Option<ArzReader>,
    strings:  StringTable,
    /// Keyed by lower-cased record name.
    entries:  HashMap<String, Entry>,
    dirty:    bool,
    time:     Box<dyn TimeSource>,
    on_done:  Option<RecordDoneFn>,
}

impl ArzManager {
    // ── Constructors ─────────────────────────────────────────────────────────

    pub fn open<P: AsRef<Path>, B: AsRef<Path>>(archive: P, base_dir: B) -> Result<Self> {
        Self::with_options(archive, base_dir, SyncOptions::default())
    }

    /// Load `archive` if it exists and is non-empty; otherwise start empty
    /// (creating a placeholder file) and dirty, so the first flush writes a
    /// valid archive.
    pub fn with_options<P: AsRef<Path>, B: AsRef<Path>>(
        archive:  P,
        base_dir: B,
        options:  SyncOptions,
    ) -> Result<Self> {
        let path = archive.as_ref().to_owned();
        let mut manager = Self {
            path,
            base_dir: base_dir.as_ref().to_owned(),
            options,
            reader:   None,
            strings:  StringTable::new(),
            entries:  HashMap::new(),
            dirty:    true,
            time:     Box::new(FsTimeSource),
            on_done:  None,
        };

        let len = match std::fs::metadata(&manager.path) {
            Ok(m) => m.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                File::create(&manager.path)?;
                0
            }
            Err(e) => return Err(e.into()),
        };
        if len > 0 {
            manager.load()?;
        }
        Ok(manager)
    }

    fn load(&mut self) -> Result<()> {
        let mut reader = ArzReader::open(&self.path)?;
        let strings = StringTable::from_strings(reader.strings().collect::<Result<Vec<_>>>()?);
        let infos = reader.record_infos().collect::<Result<Vec<_>>>()?;

        let mut entries = HashMap::with_capacity(infos.len());
        for info in infos {
            let Some(name) = strings.get(info.name_id) else {
                tracing::warn!(name_id = info.name_id, "record name id out of range, skipping");
                continue;
            };
            match entries.entry(name.to_lowercase()) {
                MapEntry::Occupied(_) => {
                    tracing::warn!(record = %name, "duplicate record in archive, keeping first");
                }
                MapEntry::Vacant(slot) => {
                    slot.insert(Entry { info, blob: None });
                }
            }
        }

        tracing::info!(
            path = %self.path.display(),
            records = entries.len(),
            strings = strings.len(),
            "archive loaded"
        );
        self.strings = strings;
        self.entries = entries;
        self.reader = Some(reader);
        self.dirty = false;
        Ok(())
    }

    /// Replace the file-system clock, e.g. with a fixed one in tests.
    pub fn with_time_source(mut self, time: Box<dyn TimeSource>) -> Self {
        self.time = time;
        self
    }

    /// Register the per-record completion callback.
    pub fn on_record_done<F>(mut self, f: F) -> Self
    where
        F: Fn(&Path) + Send + Sync + 'static,
    {
        self.on_done = Some(Box::new(f));
        self
    }

    // ── Sync ─────────────────────────────────────────────────────────────────

    fn context(&self) -> SyncContext<'_> {
        SyncContext {
            base_dir: &self.base_dir,
            entries:  &self.entries,
            strings:  &self.strings,
            time:     self.time.as_ref(),
            on_done:  self.on_done.as_ref(),
            level:    self.options.compression_level,
        }
    }

    fn apply(&mut self, key: String, entry: Entry) {
        self.entries.insert(key, entry);
        self.dirty = true;
    }

    /// Bring one source record up to date.
    pub fn sync_one<S, P>(&mut self, source: S, parser: &P) -> SyncStatus
    where
        S: AsRef<Path>,
        P: RecordParser + ?Sized,
    {
        match self.context().process(source.as_ref(), parser) {
            Outcome::Unchanged => SyncStatus::Unchanged,
            Outcome::Failed => SyncStatus::Failed,
            Outcome::Encoded { key, status, entry } => {
                self.apply(key, entry);
                status
            }
        }
    }

    /// Bring a batch of source records up to date.
    ///
    /// With `parallel`, records are encoded concurrently against the shared
    /// string table and folded into the index afterwards; two sources that map
    /// to the same record keep the newer one. Otherwise records are processed
    /// strictly in order.
    pub fn sync_many<S, P>(&mut self, sources: &[S], parser: &P, parallel: bool) -> SyncReport
    where
        S: AsRef<Path> + Sync,
        P: RecordParser + ?Sized,
    {
        let mut report = SyncReport::default();
        if parallel {
            #[cfg(feature = "parallel")]
            {
                self.sync_parallel(sources, parser, &mut report);
                return report;
            }
            #[cfg(not(feature = "parallel"))]
            tracing::warn!("built without the `parallel` feature, syncing sequentially");
        }
        for source in sources {
            report.count(self.sync_one(source, parser));
        }
        report
    }

    #[cfg(feature = "parallel")]
    fn sync_parallel<S, P>(&mut self, sources: &[S], parser: &P, report: &mut SyncReport)
    where
        S: AsRef<Path> + Sync,
        P: RecordParser + ?Sized,
    {
        use rayon::prelude::*;

        let ctx = self.context();
        let outcomes: Vec<Outcome> = sources
            .par_iter()
            .map(|s| ctx.process(s.as_ref(), parser))
            .collect();

        let mut merged: HashMap<String, (SyncStatus, Entry)> = HashMap::new();
        for outcome in outcomes {
            match outcome {
                Outcome::Unchanged => report.count(SyncStatus::Unchanged),
                Outcome::Failed => report.count(SyncStatus::Failed),
                Outcome::Encoded { key, status, entry } => match merged.entry(key) {
                    MapEntry::Occupied(mut slot) => {
                        tracing::warn!(record = %slot.key(), "record synced twice in one batch, keeping newer");
                        if entry.info.timestamp > slot.get().1.info.timestamp {
                            slot.insert((status, entry));
                        }
                        report.superseded += 1;
                    }
                    MapEntry::Vacant(slot) => {
                        slot.insert((status, entry));
                    }
                },
            }
        }
        for (key, (status, entry)) in merged {
            report.count(status);
            self.apply(key, entry);
        }
    }

    // ── Removal ──────────────────────────────────────────────────────────────

    /// Drop a record by name. Its strings stay in the pool.
    pub fn remove(&mut self, name: &str) -> bool {
        let removed = self.entries.remove(&name.to_lowercase()).is_some();
        if removed {
            tracing::info!(record = name, "record removed");
            self.dirty = true;
        }
        removed
    }

    /// Drop every record whose source no longer exists under the base
    /// directory. Returns how many were dropped.
    pub fn remove_missing(&mut self) -> usize {
        let missing: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| match self.strings.get(e.info.name_id) {
                Some(name) => !self.base_dir.join(&name).exists(),
                None => true,
            })
            .map(|(key, _)| key.clone())
            .collect();
        for key in &missing {
            self.entries.remove(key);
            tracing::info!(record = %key, "source missing, record removed");
        }
        if !missing.is_empty() {
            self.dirty = true;
        }
        missing.len()
    }

    // ── Flush ────────────────────────────────────────────────────────────────

    /// Rewrite the archive if anything changed. Returns whether it wrote.
    ///
    /// Every stored block is pulled into memory before the file is truncated,
    /// so if the write fails the manager still holds everything needed to
    /// retry.
    pub fn flush(&mut self) -> Result<bool> {
        if !self.dirty {
            tracing::info!(path = %self.path.display(), "archive is up to date");
            return Ok(false);
        }

        for entry in self.entries.values_mut() {
            if entry.blob.is_none() {
                let reader = self.reader.as_mut().ok_or_else(no_archive)?;
                entry.blob = Some(reader.compressed(&entry.info)?);
            }
        }

        let mut keys: Vec<String> = self.entries.keys().cloned().collect();
        keys.sort();
        let strings = self.strings.snapshot();
        let placed = {
            let batch = keys.iter().map(|key| {
                let entry = &self.entries[key];
                (entry.info.clone(), entry.blob.as_deref().unwrap_or_default())
            });
            ArzWriter::new(&self.path).write(batch, &strings)?
        };

        for (key, info) in keys.iter().zip(placed) {
            if let Some(entry) = self.entries.get_mut(key) {
                entry.info = info;
            }
        }
        self.dirty = false;
        // The old reader now sees rewritten bytes.
        self.reader = None;
        self.attach_reader(ArzReader::open(&self.path))?;
        Ok(true)
    }

    /// Serve stored blocks from `reader` from now on. If opening failed, the
    /// blocks stay in memory and the next flush writes them from there.
    fn attach_reader(&mut self, reader: Result<ArzReader>) -> Result<()> {
        let reader = reader?;
        for entry in self.entries.values_mut() {
            entry.blob = None;
        }
        self.reader = Some(reader);
        Ok(())
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn strings(&self) -> &StringTable {
        &self.strings
    }

    /// Stored record names, sorted.
    pub fn record_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .values()
            .filter_map(|e| self.strings.get(e.info.name_id))
            .collect();
        names.sort();
        names
    }

    pub fn record_info(&self, name: &str) -> Option<&RecordInfo> {
        self.entries.get(&name.to_lowercase()).map(|e| &e.info)
    }

    /// Decode a record from wherever its block currently lives.
    pub fn read_record(&mut self, name: &str) -> Result<RawRecord> {
        let entry = self
            .entries
            .get(&name.to_lowercase())
            .ok_or_else(|| ArzError::UnknownRecord(name.to_owned()))?;
        let raw = match &entry.blob {
            Some(blob) => codec::decompress(blob)?,
            None => self.reader.as_mut().ok_or_else(no_archive)?.decompressed(&entry.info)?,
        };
        let stored_name = self.strings.get(entry.info.name_id).unwrap_or_else(|| name.to_owned());
        RawRecord::decode(&stored_name, &raw, |ids| self.strings.resolve(ids))
    }
}

fn no_archive() -> ArzError {
    ArzError::Format("record block refers to an archive that is not loaded".into())
}

/// `source` relative to `base`, `/`-separated, case preserved.
pub fn relative_name(base: &Path, source: &Path) -> Result<String> {
    let rel = source
        .strip_prefix(base)
        .map_err(|_| ArzError::OutsideBaseDir(source.to_owned()))?;
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            _ => return Err(ArzError::OutsideBaseDir(source.to_owned())),
        }
    }
    if parts.is_empty() {
        return Err(ArzError::OutsideBaseDir(source.to_owned()));
    }
    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{Field, FieldClass, FieldKind, ResolvedRecord};

    #[test]
    fn relative_names_use_forward_slashes() {
        let base = Path::new("/mod/database");
        assert_eq!(
            relative_name(base, Path::new("/mod/database/Records/Item/Sword.dbr")).unwrap(),
            "Records/Item/Sword.dbr"
        );
        assert!(matches!(
            relative_name(base, Path::new("/elsewhere/a.dbr")),
            Err(ArzError::OutsideBaseDir(_))
        ));
        assert!(relative_name(base, base).is_err());
    }

    #[test]
    fn report_counts() {
        let mut r = SyncReport::default();
        for s in [SyncStatus::Added, SyncStatus::Added, SyncStatus::Unchanged, SyncStatus::Failed] {
            r.count(s);
        }
        assert_eq!(r, SyncReport { added: 2, updated: 0, unchanged: 1, failed: 1, superseded: 0 });
    }

    struct FixedTime(i64);

    impl TimeSource for FixedTime {
        fn modified(&self, _: &Path) -> std::io::Result<i64> {
            Ok(self.0)
        }
    }

    #[test]
    fn failed_reopen_keeps_blocks_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("db");
        let parse = |p: &Path| -> Result<ResolvedRecord> {
            Ok(ResolvedRecord {
                path:     p.to_owned(),
                template: "t.tpl".into(),
                fields:   vec![Field::new("level", FieldKind::Int, FieldClass::Variable, "4")],
            })
        };
        let mut arz = ArzManager::open(dir.path().join("db.arz"), &base)
            .unwrap()
            .with_time_source(Box::new(FixedTime(7)));
        assert_eq!(arz.sync_one(base.join("records/a.dbr"), &parse), SyncStatus::Added);

        assert!(arz.attach_reader(Err(ArzError::Format("cannot reopen".into()))).is_err());
        assert!(arz.reader.is_none());
        assert_eq!(arz.read_record("records/a.dbr").unwrap().fields["level"], "4");

        assert!(arz.is_dirty());
        assert!(arz.flush().unwrap());
        assert!(arz.reader.is_some());
        assert!(arz.entries.values().all(|e| e.blob.is_none()));
        assert_eq!(arz.read_record("records/a.dbr").unwrap().fields["level"], "4");
    }
}
