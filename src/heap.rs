//! Per-table row storage: a fixed-width heap file plus a variable-length
//! text sidecar file for `Text` columns.
//!
//! Every record in the heap file is `1 + sum(column lengths)` bytes: a
//! one-byte tombstone followed by each column's fixed-width encoding in
//! declared order (`Text` columns store an 8-byte offset into the sidecar
//! file rather than their actual bytes). Records are never moved or
//! resized in place — delete flips the tombstone byte, and reclaiming
//! tombstoned space is compaction's job, not the heap's. There is no
//! in-place update: a row update is a delete of the old offset followed by
//! a fresh insert, handled one level up where indexes can be kept in sync.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::Result;

pub const RECORD_DELETED: u8 = 0x01;
pub const RECORD_LIVE: u8 = 0x02;

pub struct Heap {
    data_file: File,
    text_file: File,
    pub record_size: usize,
}

impl Heap {
    pub fn open(data_path: &Path, text_path: &Path, record_size: usize) -> Result<Self> {
        let data_file = OpenOptions::new().read(true).write(true).create(true).open(data_path)?;
        let text_file = OpenOptions::new().read(true).write(true).create(true).open(text_path)?;
        Ok(Heap { data_file, text_file, record_size })
    }

    /// Appends a new record (tombstone byte prepended) and returns its
    /// offset in the data file.
    pub fn insert(&mut self, columns: &[u8]) -> Result<u64> {
        debug_assert_eq!(columns.len(), self.record_size - 1);
        let offset = self.data_file.seek(SeekFrom::End(0))?;
        let mut buf = Vec::with_capacity(self.record_size);
        buf.push(RECORD_LIVE);
        buf.extend_from_slice(columns);
        self.data_file.write_all(&buf)?;
        Ok(offset)
    }

    /// Reads the record at `offset`. Returns `None` if it's tombstoned.
    pub fn read(&mut self, offset: u64) -> Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; self.record_size];
        self.data_file.seek(SeekFrom::Start(offset))?;
        self.data_file.read_exact(&mut buf)?;
        if buf[0] == RECORD_DELETED {
            return Ok(None);
        }
        Ok(Some(buf[1..].to_vec()))
    }

    pub fn delete(&mut self, offset: u64) -> Result<()> {
        self.data_file.seek(SeekFrom::Start(offset))?;
        self.data_file.write_all(&[RECORD_DELETED])?;
        Ok(())
    }

    /// Flips a tombstoned record's slot back to live without touching its
    /// column bytes, which `delete` never erases. Used to undo a delete on
    /// transaction rollback.
    pub fn restore(&mut self, offset: u64) -> Result<()> {
        self.data_file.seek(SeekFrom::Start(offset))?;
        self.data_file.write_all(&[RECORD_LIVE])?;
        Ok(())
    }

    /// Sequential scan over every live record, yielding `(offset, columns)`.
    pub fn scan(&mut self) -> Result<Vec<(u64, Vec<u8>)>> {
        let len = self.data_file.metadata()?.len();
        let mut out = Vec::new();
        let mut offset = 0u64;
        self.data_file.seek(SeekFrom::Start(0))?;
        let mut buf = vec![0u8; self.record_size];
        while offset < len {
            self.data_file.read_exact(&mut buf)?;
            if buf[0] != RECORD_DELETED {
                out.push((offset, buf[1..].to_vec()));
            }
            offset += self.record_size as u64;
        }
        Ok(out)
    }

    pub fn write_text(&mut self, s: &str) -> Result<u64> {
        let offset = self.text_file.seek(SeekFrom::End(0))?;
        let bytes = s.as_bytes();
        self.text_file.write_all(&(bytes.len() as u64).to_le_bytes())?;
        self.text_file.write_all(bytes)?;
        Ok(offset)
    }

    pub fn read_text(&mut self, offset: u64) -> Result<String> {
        self.text_file.seek(SeekFrom::Start(offset))?;
        let mut len_buf = [0u8; 8];
        self.text_file.read_exact(&mut len_buf)?;
        let len = u64::from_le_bytes(len_buf) as usize;
        let mut bytes = vec![0u8; len];
        self.text_file.read_exact(&mut bytes)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn open_heap(dir: &Path, record_size: usize) -> Heap {
        Heap::open(&dir.join("t.dat"), &dir.join("t.str"), record_size).unwrap()
    }

    #[test]
    fn insert_and_read_roundtrip() {
        let dir = tempdir().unwrap();
        let mut heap = open_heap(dir.path(), 9);
        let offset = heap.insert(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        assert_eq!(heap.read(offset).unwrap(), Some(vec![1, 2, 3, 4, 5, 6, 7, 8]));
    }

    #[test]
    fn delete_tombstones_and_hides_from_scan() {
        let dir = tempdir().unwrap();
        let mut heap = open_heap(dir.path(), 9);
        let a = heap.insert(&[0; 8]).unwrap();
        let _b = heap.insert(&[1; 8]).unwrap();
        heap.delete(a).unwrap();
        assert_eq!(heap.read(a).unwrap(), None);
        let rows = heap.scan().unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn restore_flips_a_tombstoned_record_back_to_live() {
        let dir = tempdir().unwrap();
        let mut heap = open_heap(dir.path(), 9);
        let offset = heap.insert(&[7; 8]).unwrap();
        heap.delete(offset).unwrap();
        assert_eq!(heap.read(offset).unwrap(), None);
        heap.restore(offset).unwrap();
        assert_eq!(heap.read(offset).unwrap(), Some(vec![7; 8]));
    }

    #[test]
    fn text_sidecar_roundtrips_variable_length_strings() {
        let dir = tempdir().unwrap();
        let mut heap = open_heap(dir.path(), 9);
        let a = heap.write_text("hello").unwrap();
        let b = heap.write_text("a much longer string goes here").unwrap();
        assert_eq!(heap.read_text(a).unwrap(), "hello");
        assert_eq!(heap.read_text(b).unwrap(), "a much longer string goes here");
    }

    proptest! {
        #[test]
        fn insert_then_read_always_returns_what_was_written(records in proptest::collection::vec(proptest::collection::vec(0u8..=255, 8), 1..50)) {
            let dir = tempdir().unwrap();
            let mut heap = open_heap(dir.path(), 9);
            let mut offsets = Vec::new();
            for record in &records {
                offsets.push(heap.insert(record).unwrap());
            }
            for (offset, record) in offsets.iter().zip(&records) {
                prop_assert_eq!(heap.read(*offset).unwrap(), Some(record.clone()));
            }
        }
    }
}
