//! String pool primitives and the shared interning table.
//!
//! Every string in an archive is Windows-1252 bytes behind an `i32` length.
//! The pool is `i32 count` followed by `count` such strings; a string's id is
//! its position in the pool.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use encoding_rs::WINDOWS_1252;
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{ArzError, Result};

/// Bytes `s` occupies on disk, length prefix included.
pub fn encoded_len(s: &str) -> usize {
    4 + WINDOWS_1252.encode(s).0.len()
}

pub fn encode_string<W: Write>(mut writer: W, s: &str) -> io::Result<()> {
    let (bytes, _, unmappable) = WINDOWS_1252.encode(s);
    if unmappable {
        tracing::warn!(string = s, "string has characters outside Windows-1252");
    }
    let len = i32::try_from(bytes.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "string longer than i32::MAX"))?;
    writer.write_i32::<LittleEndian>(len)?;
    writer.write_all(&bytes)
}

pub fn decode_string<R: Read>(mut reader: R) -> Result<String> {
    let len = reader
        .read_i32::<LittleEndian>()
        .map_err(|e| ArzError::truncated(e, "string length"))?;
    if len < 0 {
        return Err(ArzError::Format(format!("negative string length {len}")));
    }
    let mut bytes = Vec::new();
    let read = reader.by_ref().take(len as u64).read_to_end(&mut bytes)?;
    if read != len as usize {
        return Err(ArzError::Format(format!(
            "string of {len} bytes runs past end of stream ({read} available)"
        )));
    }
    Ok(WINDOWS_1252.decode_without_bom_handling(&bytes).0.into_owned())
}

// ── Interning ────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Pool {
    /// Keyed by the string exactly as stored.
    exact:   HashMap<String, u32>,
    /// Keyed by the lower-cased string.
    folded:  HashMap<String, u32>,
    strings: Vec<String>,
}

impl Pool {
    fn push(&mut self, s: &str) -> u32 {
        let id = self.strings.len() as u32;
        self.strings.push(s.to_owned());
        self.exact.entry(s.to_owned()).or_insert(id);
        self.folded.entry(s.to_lowercase()).or_insert(id);
        id
    }
}

/// Append-only string pool shared by concurrent record encoders.
///
/// Every lookup-or-insert happens under one lock, so a key never receives two
/// ids. [`intern`](Self::intern) matches any earlier string that differs only
/// in case and returns the first such variant's id.
/// [`intern_exact`](Self::intern_exact) only matches identical bytes.
#[derive(Default)]
pub struct StringTable {
    pool: Mutex<Pool>,
}

impl StringTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a table from a pool read off disk. Ids follow iteration order;
    /// a duplicate string keeps the id of its first occurrence.
    pub fn from_strings<I: IntoIterator<Item = String>>(strings: I) -> Self {
        let mut pool = Pool::default();
        for s in strings {
            if let Some(&older) = pool.exact.get(&s) {
                tracing::warn!(string = %s, older, id = pool.strings.len(), "duplicate string in pool, keeping first id");
            }
            pool.push(&s);
        }
        Self { pool: Mutex::new(pool) }
    }

    fn lock(&self) -> MutexGuard<'_, Pool> {
        // The pool only grows, so a panic mid-insert cannot leave it torn.
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Case-insensitive interning for field names and ordinary values.
    pub fn intern(&self, s: &str) -> u32 {
        let mut pool = self.lock();
        if let Some(&id) = pool.folded.get(&s.to_lowercase()) {
            return id;
        }
        pool.push(s)
    }

    /// Case-preserving interning for record names, template and file references.
    pub fn intern_exact(&self, s: &str) -> u32 {
        let mut pool = self.lock();
        if let Some(&id) = pool.exact.get(s) {
            return id;
        }
        pool.push(s)
    }

    pub fn len(&self) -> usize {
        self.lock().strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: u32) -> Option<String> {
        self.lock().strings.get(id as usize).cloned()
    }

    /// Resolve a batch of ids, preserving the caller's order.
    pub fn resolve(&self, ids: &[u32]) -> Result<Vec<String>> {
        let pool = self.lock();
        ids.iter()
            .map(|&id| {
                pool.strings.get(id as usize).cloned().ok_or(ArzError::OutOfRange {
                    what:  "string",
                    id,
                    count: pool.strings.len(),
                })
            })
            .collect()
    }

    /// Copy of the pool in id order.
    pub fn snapshot(&self) -> Vec<String> {
        self.lock().strings.clone()
    }
}
