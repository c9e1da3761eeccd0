//! On-disk paged B+tree used for secondary indexes.
//!
//! Each index lives in its own file. Pages are fixed 4096-byte slots
//! addressed by byte offset into that file, not by a page-table indirection
//! — a node's "pointer" to its parent, its children, or its leaf siblings is
//! simply the file offset of that page. The root is always at offset 0.
//! There is no page reuse: deleted entries are tombstoned in place and
//! deleted pages are never reclaimed, matching the append-only heap store's
//! own compaction story (full rebuild, not incremental GC).

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{EngineError, Result};

pub const PAGE_SIZE: usize = 4096;
/// Leaf header: kind(1) + prev(8) + next(8) + count(1).
const LEAF_HEADER_LEN: usize = 1 + 8 + 8 + 1;
/// Internal header: kind(1) + count(1). Internal nodes carry no sibling
/// links; only leaves are chained for ordered range scans.
const INTERNAL_HEADER_LEN: usize = 1 + 1;

const KIND_LEAF: u8 = 0x01;
const KIND_INTERNAL: u8 = 0x02;

const TOMBSTONE_LIVE: u8 = 0x02;
const TOMBSTONE_DEAD: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Leaf,
    Internal,
}

/// One key plus its payload: a row offset in the heap file for leaf
/// entries, or a child page offset for internal entries. `tombstone` is
/// only meaningful on leaf entries — internal entries are never tombstoned,
/// they just route to a (possibly all-tombstoned) child subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Vec<u8>,
    pub value: u64,
    pub tombstone: bool,
}

impl Entry {
    fn live(key: Vec<u8>, value: u64) -> Self {
        Entry { key, value, tombstone: false }
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub offset: u64,
    pub kind: NodeKind,
    pub entries: Vec<Entry>,
    /// Leaf doubly-linked list for range scans. `0` means "none" (page 0 is
    /// always the root and can never be a sibling).
    pub prev: u64,
    pub next: u64,
}

impl Node {
    fn min_key(&self) -> &[u8] {
        &self.entries[0].key
    }
}

pub struct BTree {
    file: File,
    key_len: usize,
    leaf_capacity: usize,
    internal_capacity: usize,
    next_free_offset: u64,
}

impl BTree {
    pub fn open(path: &Path, key_len: usize) -> Result<Self> {
        let existed = path.exists();
        let file = OpenOptions::new().read(true).write(true).create(true).open(path)?;
        let leaf_capacity = (PAGE_SIZE - LEAF_HEADER_LEN) / (key_len + 1 + 8);
        let internal_capacity = (PAGE_SIZE - INTERNAL_HEADER_LEN) / (key_len + 8);
        if leaf_capacity < 2 || internal_capacity < 2 {
            return Err(EngineError::InvariantViolation(format!(
                "index key of {} bytes leaves no room for branching in a {}-byte page",
                key_len, PAGE_SIZE
            )));
        }
        let len = file.metadata()?.len();
        let mut tree = BTree {
            file,
            key_len,
            leaf_capacity,
            internal_capacity,
            next_free_offset: len.max(PAGE_SIZE as u64),
        };
        if !existed || len == 0 {
            let root = Node { offset: 0, kind: NodeKind::Leaf, entries: Vec::new(), prev: 0, next: 0 };
            tree.write_node(&root)?;
        }
        Ok(tree)
    }

    fn capacity(&self, kind: NodeKind) -> usize {
        match kind {
            NodeKind::Leaf => self.leaf_capacity,
            NodeKind::Internal => self.internal_capacity,
        }
    }

    fn allocate_page(&mut self) -> u64 {
        let offset = self.next_free_offset;
        self.next_free_offset += PAGE_SIZE as u64;
        log::debug!("allocated page at offset {}", offset);
        offset
    }

    fn read_node(&mut self, offset: u64) -> Result<Node> {
        let mut buf = vec![0u8; PAGE_SIZE];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buf)?;

        match buf[0] {
            KIND_LEAF => {
                let prev = u64::from_le_bytes(buf[1..9].try_into().unwrap());
                let next = u64::from_le_bytes(buf[9..17].try_into().unwrap());
                let count = buf[17] as usize;
                let stride = self.key_len + 1 + 8;
                let mut entries = Vec::with_capacity(count);
                let mut pos = LEAF_HEADER_LEN;
                for _ in 0..count {
                    let key = buf[pos..pos + self.key_len].to_vec();
                    let tombstone = buf[pos + self.key_len] == TOMBSTONE_DEAD;
                    let value_start = pos + self.key_len + 1;
                    let value = u64::from_le_bytes(buf[value_start..value_start + 8].try_into().unwrap());
                    entries.push(Entry { key, value, tombstone });
                    pos += stride;
                }
                Ok(Node { offset, kind: NodeKind::Leaf, entries, prev, next })
            }
            KIND_INTERNAL => {
                let count = buf[1] as usize;
                let stride = self.key_len + 8;
                let mut entries = Vec::with_capacity(count);
                let mut pos = INTERNAL_HEADER_LEN;
                for _ in 0..count {
                    let key = buf[pos..pos + self.key_len].to_vec();
                    let value = u64::from_le_bytes(buf[pos + self.key_len..pos + stride].try_into().unwrap());
                    entries.push(Entry::live(key, value));
                    pos += stride;
                }
                Ok(Node { offset, kind: NodeKind::Internal, entries, prev: 0, next: 0 })
            }
            other => Err(EngineError::Corruption(format!("unknown B+tree node kind byte {}", other))),
        }
    }

    fn write_node(&mut self, node: &Node) -> Result<()> {
        if node.entries.len() > self.capacity(node.kind) {
            return Err(EngineError::InvariantViolation("node overflowed its page".into()));
        }
        let mut buf = vec![0u8; PAGE_SIZE];
        match node.kind {
            NodeKind::Leaf => {
                buf[0] = KIND_LEAF;
                buf[1..9].copy_from_slice(&node.prev.to_le_bytes());
                buf[9..17].copy_from_slice(&node.next.to_le_bytes());
                buf[17] = node.entries.len() as u8;
                let stride = self.key_len + 1 + 8;
                let mut pos = LEAF_HEADER_LEN;
                for entry in &node.entries {
                    buf[pos..pos + self.key_len].copy_from_slice(&entry.key);
                    buf[pos + self.key_len] = if entry.tombstone { TOMBSTONE_DEAD } else { TOMBSTONE_LIVE };
                    let value_start = pos + self.key_len + 1;
                    buf[value_start..value_start + 8].copy_from_slice(&entry.value.to_le_bytes());
                    pos += stride;
                }
            }
            NodeKind::Internal => {
                buf[0] = KIND_INTERNAL;
                buf[1] = node.entries.len() as u8;
                let stride = self.key_len + 8;
                let mut pos = INTERNAL_HEADER_LEN;
                for entry in &node.entries {
                    buf[pos..pos + self.key_len].copy_from_slice(&entry.key);
                    buf[pos + self.key_len..pos + stride].copy_from_slice(&entry.value.to_le_bytes());
                    pos += stride;
                }
            }
        }

        self.file.seek(SeekFrom::Start(node.offset))?;
        self.file.write_all(&buf)?;
        Ok(())
    }

    /// Descends from the root to the leaf that should contain `key`,
    /// recording `(node, child index taken)` for every internal node
    /// visited so callers can walk back up to fix parent keys after an
    /// insert or a split.
    fn descend(&mut self, key: &[u8]) -> Result<(Node, Vec<(Node, usize)>)> {
        let mut path = Vec::new();
        let mut current = self.read_node(0)?;
        while current.kind == NodeKind::Internal {
            let idx = match current.entries.binary_search_by(|e| e.key.as_slice().cmp(key)) {
                Ok(i) => i,
                Err(0) => 0,
                Err(i) => i - 1,
            };
            let child_offset = current.entries[idx].value;
            path.push((current.clone(), idx));
            current = self.read_node(child_offset)?;
        }
        Ok((current, path))
    }

    /// Looks up `key`, rejecting a tombstoned entry just like a missing one
    /// (I2: a tombstoned entry no longer counts as a live index hit).
    pub fn get(&mut self, key: &[u8]) -> Result<Option<u64>> {
        let (leaf, _) = self.descend(key)?;
        Ok(leaf.entries.iter().find(|e| e.key == key && !e.tombstone).map(|e| e.value))
    }

    /// Returns every *live* matching entry (tombstoned entries are skipped,
    /// matching the B+tree scan contract of yielding live entries only).
    pub fn range(&mut self, start: Option<&[u8]>) -> Result<Vec<Entry>> {
        let mut result = Vec::new();
        let mut node = match start {
            Some(key) => self.descend(key)?.0,
            None => {
                let mut n = self.read_node(0)?;
                while n.kind == NodeKind::Internal {
                    let child_offset = n.entries[0].value;
                    n = self.read_node(child_offset)?;
                }
                n
            }
        };
        loop {
            for e in &node.entries {
                if e.tombstone {
                    continue;
                }
                if start.map(|s| e.key.as_slice() >= s).unwrap_or(true) {
                    result.push(e.clone());
                }
            }
            if node.next == 0 {
                break;
            }
            node = self.read_node(node.next)?;
        }
        Ok(result)
    }

    /// Inserts `(key, value)`. A live duplicate key fails; a tombstoned
    /// duplicate is resurrected in place with the new value (I6).
    pub fn insert(&mut self, key: Vec<u8>, value: u64) -> Result<()> {
        if key.len() != self.key_len {
            return Err(EngineError::InvariantViolation("index key length mismatch".into()));
        }
        let (mut leaf, path) = self.descend(&key)?;
        let pos = leaf.entries.partition_point(|e| e.key.as_slice() < key.as_slice());
        if let Some(existing) = leaf.entries.get_mut(pos).filter(|e| e.key == key) {
            if !existing.tombstone {
                return Err(EngineError::DuplicateKey(hex_key(&key)));
            }
            existing.tombstone = false;
            existing.value = value;
            self.write_node(&leaf)?;
            self.fixup_parent_keys(leaf.offset, path)?;
            return Ok(());
        }
        leaf.entries.insert(pos, Entry::live(key, value));

        if leaf.entries.len() <= self.capacity(NodeKind::Leaf) {
            self.write_node(&leaf)?;
            self.fixup_parent_keys(leaf.offset, path)?;
            return Ok(());
        }
        self.split(leaf, path)
    }

    /// After a non-splitting insert at a leaf, earlier entries along the
    /// path may need their separator key updated if the inserted key became
    /// their child's new minimum.
    fn fixup_parent_keys(&mut self, child_offset: u64, mut path: Vec<(Node, usize)>) -> Result<()> {
        let child = self.read_node(child_offset)?;
        let mut new_min = child.min_key().to_vec();
        while let Some((mut parent, idx)) = path.pop() {
            if parent.entries[idx].key == new_min {
                break;
            }
            parent.entries[idx].key = new_min.clone();
            self.write_node(&parent)?;
            new_min = parent.min_key().to_vec();
        }
        Ok(())
    }

    fn split(&mut self, node: Node, mut path: Vec<(Node, usize)>) -> Result<()> {
        let mid = node.entries.len() / 2;
        let is_root = node.offset == 0;
        log::debug!("splitting {:?} page at offset {} ({} entries)", node.kind, node.offset, node.entries.len());

        if is_root {
            let left_offset = self.allocate_page();
            let right_offset = self.allocate_page();
            let (left_entries, right_entries) = node.entries.split_at(mid);

            let (left_prev, left_next, right_prev, right_next) = match node.kind {
                NodeKind::Leaf => (0, right_offset, left_offset, 0),
                NodeKind::Internal => (0, 0, 0, 0),
            };
            let left = Node {
                offset: left_offset,
                kind: node.kind,
                entries: left_entries.to_vec(),
                prev: left_prev,
                next: left_next,
            };
            let right = Node {
                offset: right_offset,
                kind: node.kind,
                entries: right_entries.to_vec(),
                prev: right_prev,
                next: right_next,
            };
            self.write_node(&left)?;
            self.write_node(&right)?;

            let new_root = Node {
                offset: 0,
                kind: NodeKind::Internal,
                entries: vec![
                    Entry::live(left.min_key().to_vec(), left_offset),
                    Entry::live(right.min_key().to_vec(), right_offset),
                ],
                prev: 0,
                next: 0,
            };
            self.write_node(&new_root)?;
            return Ok(());
        }

        let right_offset = self.allocate_page();
        let (left_entries, right_entries) = {
            let (l, r) = node.entries.split_at(mid);
            (l.to_vec(), r.to_vec())
        };

        let (left_next, right_prev, right_next) = match node.kind {
            NodeKind::Leaf => (right_offset, node.offset, node.next),
            NodeKind::Internal => (0, 0, 0),
        };
        if node.kind == NodeKind::Leaf && node.next != 0 {
            let mut old_sibling = self.read_node(node.next)?;
            old_sibling.prev = right_offset;
            self.write_node(&old_sibling)?;
        }

        let left = Node { offset: node.offset, kind: node.kind, entries: left_entries, prev: node.prev, next: left_next };
        let right = Node { offset: right_offset, kind: node.kind, entries: right_entries, prev: right_prev, next: right_next };
        self.write_node(&left)?;
        self.write_node(&right)?;

        let (mut parent, idx) = path.pop().expect("non-root split always has a parent");
        parent.entries[idx] = Entry::live(left.min_key().to_vec(), left.offset);
        parent.entries.insert(idx + 1, Entry::live(right.min_key().to_vec(), right.offset));

        if parent.entries.len() <= self.capacity(NodeKind::Internal) {
            self.write_node(&parent)?;
            self.fixup_parent_keys(parent.offset, path)?;
            Ok(())
        } else {
            self.split(parent, path)
        }
    }

    /// Tombstones the matching live entry rather than removing it or
    /// rebalancing the tree. The freed slot is reclaimed the next time the
    /// table is compacted.
    pub fn delete(&mut self, key: &[u8]) -> Result<bool> {
        let (mut leaf, _path) = self.descend(key)?;
        match leaf.entries.iter_mut().find(|e| e.key == key && !e.tombstone) {
            Some(entry) => entry.tombstone = true,
            None => return Ok(false),
        }
        self.write_node(&leaf)?;
        Ok(true)
    }
}

fn hex_key(key: &[u8]) -> String {
    key.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn key(n: u8) -> Vec<u8> {
        vec![0, 0, 0, 0, 0, 0, 0, n]
    }

    #[test]
    fn insert_and_get_roundtrip() {
        let dir = tempdir().unwrap();
        let mut tree = BTree::open(&dir.path().join("t.idx"), 8).unwrap();
        tree.insert(key(1), 100).unwrap();
        tree.insert(key(2), 200).unwrap();
        assert_eq!(tree.get(&key(1)).unwrap(), Some(100));
        assert_eq!(tree.get(&key(2)).unwrap(), Some(200));
        assert_eq!(tree.get(&key(3)).unwrap(), None);
    }

    #[test]
    fn duplicate_key_rejected() {
        let dir = tempdir().unwrap();
        let mut tree = BTree::open(&dir.path().join("t.idx"), 8).unwrap();
        tree.insert(key(1), 100).unwrap();
        assert!(matches!(tree.insert(key(1), 200), Err(EngineError::DuplicateKey(_))));
    }

    #[test]
    fn split_across_many_inserts_preserves_order() {
        let dir = tempdir().unwrap();
        let mut tree = BTree::open(&dir.path().join("t.idx"), 8).unwrap();
        for n in (0..200u32).rev() {
            tree.insert(n.to_le_bytes().to_vec(), n as u64).unwrap();
        }
        let scanned = tree.range(None).unwrap();
        let keys: Vec<u32> = scanned.iter().map(|e| u32::from_le_bytes(e.key.clone().try_into().unwrap())).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert_eq!(keys.len(), 200);
    }

    #[test]
    fn delete_tombstones_entry() {
        let dir = tempdir().unwrap();
        let mut tree = BTree::open(&dir.path().join("t.idx"), 8).unwrap();
        tree.insert(key(1), 100).unwrap();
        assert!(tree.delete(&key(1)).unwrap());
        assert_eq!(tree.get(&key(1)).unwrap(), None);
        assert!(!tree.delete(&key(1)).unwrap());
    }

    #[test]
    fn resurrecting_a_tombstoned_key_reuses_the_slot() {
        let dir = tempdir().unwrap();
        let mut tree = BTree::open(&dir.path().join("t.idx"), 8).unwrap();
        tree.insert(key(1), 100).unwrap();
        tree.delete(&key(1)).unwrap();
        tree.insert(key(1), 999).unwrap();
        assert_eq!(tree.get(&key(1)).unwrap(), Some(999));
    }

    #[test]
    fn large_random_insert_scans_in_order() {
        use rand::seq::SliceRandom;
        let dir = tempdir().unwrap();
        let mut tree = BTree::open(&dir.path().join("t.idx"), 8).unwrap();
        let mut order: Vec<u32> = (0..2000).collect();
        order.shuffle(&mut rand::thread_rng());
        for n in order {
            tree.insert(n.to_le_bytes().to_vec(), n as u64).unwrap();
        }
        let scanned = tree.range(None).unwrap();
        let keys: Vec<u32> = scanned.iter().map(|e| u32::from_le_bytes(e.key.clone().try_into().unwrap())).collect();
        assert_eq!(keys, (0..2000u32).collect::<Vec<_>>());
    }

    #[test]
    fn reopen_preserves_tree() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.idx");
        {
            let mut tree = BTree::open(&path, 8).unwrap();
            for n in 0..50u32 {
                tree.insert(n.to_le_bytes().to_vec(), n as u64).unwrap();
            }
        }
        let mut reopened = BTree::open(&path, 8).unwrap();
        assert_eq!(reopened.get(&30u32.to_le_bytes().to_vec()).unwrap(), Some(30));
    }

    proptest! {
        #[test]
        fn in_order_scan_is_always_ascending(mut keys in proptest::collection::vec(0u32..5000, 1..300)) {
            keys.sort_unstable();
            keys.dedup();
            let mut shuffled = keys.clone();
            use rand::seq::SliceRandom;
            shuffled.shuffle(&mut rand::thread_rng());

            let dir = tempdir().unwrap();
            let mut tree = BTree::open(&dir.path().join("t.idx"), 4).unwrap();
            for k in &shuffled {
                tree.insert(k.to_le_bytes().to_vec(), *k as u64).unwrap();
            }
            let scanned = tree.range(None).unwrap();
            let scanned_keys: Vec<u32> = scanned.iter().map(|e| u32::from_le_bytes(e.key.clone().try_into().unwrap())).collect();
            prop_assert_eq!(&scanned_keys, &keys);
            prop_assert!(scanned_keys.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
