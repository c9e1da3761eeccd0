//! Ties the catalog's schema information to the on-disk heap files and
//! B+tree index files, and does the row <-> bytes encoding between them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::btree::BTree;
use crate::catalog::{Catalog, Column, ColumnType, IndexDef, TableDef};
use crate::codec;
use crate::error::{EngineError, Result};
use crate::heap::Heap;
use crate::value::{Data, Value};

pub struct Storage {
    dir: PathBuf,
    heaps: HashMap<String, Heap>,
    indexes: HashMap<String, BTree>,
}

impl Storage {
    pub fn open(dir: &Path, catalog: &Catalog) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let mut storage = Storage { dir: dir.to_path_buf(), heaps: HashMap::new(), indexes: HashMap::new() };
        for table in &catalog.tables {
            storage.open_table(table)?;
        }
        for index in &catalog.indexes {
            let table = catalog.table(&index.table_name)?;
            storage.open_index(index, table)?;
        }
        Ok(storage)
    }

    pub fn open_table(&mut self, table: &TableDef) -> Result<()> {
        let data_path = self.dir.join(format!("{}.dat", table.name));
        let text_path = self.dir.join(format!("{}.str", table.name));
        let heap = Heap::open(&data_path, &text_path, table.record_size())?;
        self.heaps.insert(table.name.clone(), heap);
        Ok(())
    }

    pub fn open_index(&mut self, index: &IndexDef, table: &TableDef) -> Result<()> {
        let key_len = index_key_len(index, table)?;
        let path = self.dir.join(format!("{}.idx", index.name));
        let tree = BTree::open(&path, key_len)?;
        self.indexes.insert(index.name.clone(), tree);
        Ok(())
    }

    /// Drops a table's heap and sidecar files and opens fresh, empty ones
    /// in their place. Used by compaction to rewrite a table without its
    /// tombstoned rows.
    pub fn recreate_table(&mut self, table: &TableDef) -> Result<()> {
        self.heaps.remove(&table.name);
        let _ = std::fs::remove_file(self.dir.join(format!("{}.dat", table.name)));
        let _ = std::fs::remove_file(self.dir.join(format!("{}.str", table.name)));
        self.open_table(table)
    }

    /// Drops an index file and opens a fresh, empty one. Used by
    /// compaction to rebuild an index against the rewritten heap.
    pub fn recreate_index(&mut self, index: &IndexDef, table: &TableDef) -> Result<()> {
        self.indexes.remove(&index.name);
        let _ = std::fs::remove_file(self.dir.join(format!("{}.idx", index.name)));
        self.open_index(index, table)
    }

    fn heap_mut(&mut self, table: &str) -> Result<&mut Heap> {
        self.heaps.get_mut(table).ok_or_else(|| EngineError::TableNotFound(table.to_string()))
    }

    pub fn index_mut(&mut self, name: &str) -> Result<&mut BTree> {
        self.indexes.get_mut(name).ok_or_else(|| EngineError::IndexNotFound(name.to_string()))
    }

    /// Encodes column values into their fixed-width on-disk form. `Text`
    /// values are written to the table's sidecar file here, so that the
    /// returned bytes are always ready to hand straight to the heap.
    pub fn encode_row(&mut self, table: &TableDef, values: &[Value]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(table.record_size() - 1);
        for (col, val) in table.columns.iter().zip(values) {
            let coerced = val.coerce(col.ty)?;
            match (col.ty, &coerced) {
                (ColumnType::Int, Value::Typed(_, Data::Int(v))) => out.extend(codec::int64_to_bytes(*v)),
                (ColumnType::Float, Value::Typed(_, Data::Float(v))) => out.extend(codec::float64_to_bytes(*v)),
                (ColumnType::Bool, Value::Typed(_, Data::Bool(v))) => out.push(if *v { 1 } else { 0 }),
                (ColumnType::FixedStr, Value::Typed(_, Data::Str(s))) => {
                    out.extend(codec::str_to_bytes(s, col.len as usize))
                }
                (ColumnType::Text, Value::Typed(_, Data::Str(s))) => {
                    let heap = self.heap_mut(&table.name)?;
                    let text_offset = heap.write_text(s)?;
                    out.extend(codec::uint64_to_bytes(text_offset));
                }
                _ => return Err(EngineError::TypeMismatch(format!("column {} type mismatch", col.name))),
            }
        }
        Ok(out)
    }

    pub fn decode_row(&mut self, table: &TableDef, bytes: &[u8]) -> Result<Vec<Value>> {
        let mut values = Vec::with_capacity(table.columns.len());
        let mut pos = 0;
        for col in &table.columns {
            let len = col.len as usize;
            let field = &bytes[pos..pos + len];
            let value = match col.ty {
                ColumnType::Int => Value::int(codec::bytes_to_int64(field)),
                ColumnType::Float => Value::float(codec::bytes_to_float64(field)),
                ColumnType::Bool => Value::bool(field[0] != 0),
                ColumnType::FixedStr => Value::str(codec::bytes_to_str(field)),
                ColumnType::Text => {
                    let offset = codec::bytes_to_uint64(field);
                    let heap = self.heap_mut(&table.name)?;
                    Value::text(heap.read_text(offset)?)
                }
            };
            values.push(value);
            pos += len;
        }
        Ok(values)
    }

    pub fn insert_row(&mut self, table: &TableDef, values: &[Value]) -> Result<u64> {
        let bytes = self.encode_row(table, values)?;
        self.heap_mut(&table.name)?.insert(&bytes)
    }

    pub fn read_row(&mut self, table: &TableDef, offset: u64) -> Result<Option<Vec<Value>>> {
        let bytes = self.heap_mut(&table.name)?.read(offset)?;
        match bytes {
            Some(bs) => Ok(Some(self.decode_row(table, &bs)?)),
            None => Ok(None),
        }
    }

    pub fn delete_row(&mut self, table: &str, offset: u64) -> Result<()> {
        self.heap_mut(table)?.delete(offset)
    }

    pub fn restore_row(&mut self, table: &str, offset: u64) -> Result<()> {
        self.heap_mut(table)?.restore(offset)
    }

    pub fn scan_table(&mut self, table: &TableDef) -> Result<Vec<(u64, Vec<Value>)>> {
        let raw = self.heap_mut(&table.name)?.scan()?;
        raw.into_iter().map(|(offset, bytes)| Ok((offset, self.decode_row(table, &bytes)?))).collect()
    }

    pub fn index_key(&self, index: &IndexDef, table: &TableDef, values: &[Value]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for col_name in &index.columns {
            let col = table.column(col_name).ok_or_else(|| EngineError::ColumnNotFound(col_name.clone()))?;
            let value = &values[table.columns.iter().position(|c| c.name == *col_name).unwrap()];
            append_index_key_bytes(&mut out, col, value)?;
        }
        Ok(out)
    }
}

fn append_index_key_bytes(out: &mut Vec<u8>, col: &Column, value: &Value) -> Result<()> {
    let coerced = value.coerce(col.ty)?;
    match (col.ty, coerced) {
        (ColumnType::Int, Value::Typed(_, Data::Int(v))) => out.extend(codec::int64_to_bytes(v)),
        (ColumnType::Float, Value::Typed(_, Data::Float(v))) => out.extend(codec::float64_to_bytes(v)),
        (ColumnType::Bool, Value::Typed(_, Data::Bool(v))) => out.push(if v { 1 } else { 0 }),
        (ColumnType::FixedStr, Value::Typed(_, Data::Str(s))) => out.extend(codec::str_to_bytes(&s, col.len as usize)),
        (ColumnType::Text, _) => {
            return Err(EngineError::InvariantViolation("Text columns cannot be indexed".into()))
        }
        _ => return Err(EngineError::TypeMismatch(format!("column {} type mismatch", col.name))),
    }
    Ok(())
}

fn index_key_len(index: &IndexDef, table: &TableDef) -> Result<usize> {
    index
        .columns
        .iter()
        .map(|name| {
            table
                .column(name)
                .map(|c| c.len as usize)
                .ok_or_else(|| EngineError::ColumnNotFound(name.clone()))
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Column;
    use tempfile::tempdir;

    fn sample_table() -> TableDef {
        TableDef {
            name: "t".into(),
            columns: vec![
                Column::new("t.id", ColumnType::Int, 8),
                Column::new("t.name", ColumnType::FixedStr, 16),
            ],
        }
    }

    #[test]
    fn row_roundtrips_through_heap() {
        let dir = tempdir().unwrap();
        let table = sample_table();
        let catalog = Catalog { tables: vec![table.clone()], indexes: vec![] };
        let mut storage = Storage::open(dir.path(), &catalog).unwrap();

        let offset = storage.insert_row(&table, &[Value::int(1), Value::str("alice")]).unwrap();
        let row = storage.read_row(&table, offset).unwrap().unwrap();
        assert_eq!(row[0].as_int().unwrap(), 1);
        assert_eq!(row[1].as_str().unwrap(), "alice");
    }

    #[test]
    fn index_key_matches_column_order() {
        let table = sample_table();
        let index = IndexDef { name: "i".into(), table_name: "t".into(), columns: vec!["t.id".into()] };
        let dir = tempdir().unwrap();
        let catalog = Catalog { tables: vec![table.clone()], indexes: vec![] };
        let storage = Storage::open(dir.path(), &catalog).unwrap();
        let key = storage.index_key(&index, &table, &[Value::int(7), Value::str("bob")]).unwrap();
        assert_eq!(key, codec::int64_to_bytes(7).to_vec());
    }
}
