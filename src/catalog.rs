//! Process-wide schema state: tables, indexes, and built-in functions.
//!
//! Tables and indexes are persisted as flat JSON arrays (`table.catalog`,
//! `index.catalog`) under the data directory and loaded wholesale at
//! startup; there is no incremental catalog journal, matching the "no
//! schema evolution" non-goal.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::value::Value;

pub const CATALOG_TABLE_FILE: &str = "table.catalog";
pub const CATALOG_INDEX_FILE: &str = "index.catalog";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Int,
    Float,
    FixedStr,
    Text,
    Bool,
}

/// A column's declared width on disk. `len = 8` for Int/Float/Text (Text
/// stores an 8-byte offset into the table's text sidecar file); FixedStr
/// carries its declared max length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Always qualified as `"table.field"`.
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ColumnType,
    pub len: i64,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: ColumnType, len: i64) -> Self {
        Column { name: name.into(), ty, len }
    }

    pub fn unqualified_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<Column>,
}

impl TableDef {
    pub fn record_size(&self) -> usize {
        1 + self.columns.iter().map(|c| c.len as usize).sum::<usize>()
    }

    pub fn column(&self, qualified_name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == qualified_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub table_name: String,
    /// Qualified column names, in declared order; concatenated to form the
    /// B+tree key.
    pub columns: Vec<String>,
}

/// A built-in function. Not serialized — the registry is rebuilt in-process
/// at startup, the same way the source treats its function table as
/// compiled-in rather than catalog state.
pub struct Function {
    pub name: &'static str,
    pub is_aggregate: bool,
    pub ret_type: fn(&[Column]) -> Column,
    pub call: fn(&[Value]) -> Result<Value>,
}

fn max_ret_type(columns: &[Column]) -> Column {
    Column::new("max", columns[0].ty, columns[0].len)
}

fn max_call(params: &[Value]) -> Result<Value> {
    let mut best = params[0].clone();
    for p in &params[1..] {
        if p.compare(&best)? == std::cmp::Ordering::Greater {
            best = p.clone();
        }
    }
    Ok(best)
}

fn count_ret_type(_columns: &[Column]) -> Column {
    Column::new("count", ColumnType::Int, 8)
}

fn count_call(params: &[Value]) -> Result<Value> {
    Ok(Value::int(params.len() as i64))
}

fn abs_ret_type(columns: &[Column]) -> Column {
    Column::new("abs", columns[0].ty, columns[0].len)
}

fn abs_call(params: &[Value]) -> Result<Value> {
    match &params[0] {
        Value::Typed(ColumnType::Int, crate::value::Data::Int(v)) => Ok(Value::int(v.abs())),
        Value::Typed(ColumnType::Float, crate::value::Data::Float(v)) => Ok(Value::float(v.abs())),
        other => Ok(other.clone()),
    }
}

const FUNCTIONS: &[Function] = &[
    Function { name: "max", is_aggregate: true, ret_type: max_ret_type, call: max_call },
    Function { name: "count", is_aggregate: true, ret_type: count_ret_type, call: count_call },
    Function { name: "abs", is_aggregate: false, ret_type: abs_ret_type, call: abs_call },
];

pub fn get_function(name: &str) -> Result<&'static Function> {
    let lower = name.to_ascii_lowercase();
    FUNCTIONS
        .iter()
        .find(|f| f.name == lower)
        .ok_or_else(|| EngineError::FunctionNotFound(name.to_string()))
}

#[derive(Debug, Default)]
pub struct Catalog {
    pub tables: Vec<TableDef>,
    pub indexes: Vec<IndexDef>,
}

impl Catalog {
    pub fn load(dir: &Path) -> Result<Self> {
        let tables = read_json_or_default(&dir.join(CATALOG_TABLE_FILE))?;
        let indexes = read_json_or_default(&dir.join(CATALOG_INDEX_FILE))?;
        Ok(Catalog { tables, indexes })
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::write(dir.join(CATALOG_TABLE_FILE), serde_json::to_vec_pretty(&self.tables)?)?;
        fs::write(dir.join(CATALOG_INDEX_FILE), serde_json::to_vec_pretty(&self.indexes)?)?;
        Ok(())
    }

    pub fn table(&self, name: &str) -> Result<&TableDef> {
        self.tables
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| EngineError::TableNotFound(name.to_string()))
    }

    pub fn add_table(&mut self, table: TableDef) -> Result<()> {
        if self.tables.iter().any(|t| t.name == table.name) {
            return Err(EngineError::TableExists(table.name));
        }
        self.tables.push(table);
        Ok(())
    }

    pub fn index(&self, name: &str) -> Result<&IndexDef> {
        self.indexes
            .iter()
            .find(|i| i.name == name)
            .ok_or_else(|| EngineError::IndexNotFound(name.to_string()))
    }

    pub fn add_index(&mut self, index: IndexDef) -> Result<()> {
        if self.indexes.iter().any(|i| i.name == index.name) {
            return Err(EngineError::IndexExists(index.name));
        }
        self.indexes.push(index);
        Ok(())
    }

    pub fn indexes_for_table<'a>(&'a self, table: &str) -> Vec<&'a IndexDef> {
        self.indexes.iter().filter(|i| i.table_name == table).collect()
    }
}

fn read_json_or_default<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>>
where
    T: Sized,
{
    match fs::read(path) {
        Ok(bs) => Ok(serde_json::from_slice(&bs)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn catalog_roundtrips_through_disk() {
        let dir = tempdir().unwrap();
        let mut cat = Catalog::default();
        cat.add_table(TableDef {
            name: "users".into(),
            columns: vec![Column::new("users.id", ColumnType::Int, 8)],
        })
        .unwrap();
        cat.add_index(IndexDef {
            name: "u_id".into(),
            table_name: "users".into(),
            columns: vec!["users.id".into()],
        })
        .unwrap();
        cat.save(dir.path()).unwrap();

        let loaded = Catalog::load(dir.path()).unwrap();
        assert_eq!(loaded.tables.len(), 1);
        assert_eq!(loaded.indexes.len(), 1);
        assert_eq!(loaded.table("users").unwrap().columns[0].name, "users.id");
    }

    #[test]
    fn loading_missing_catalog_is_empty() {
        let dir = tempdir().unwrap();
        let cat = Catalog::load(dir.path()).unwrap();
        assert!(cat.tables.is_empty());
        assert!(cat.indexes.is_empty());
    }

    #[test]
    fn duplicate_table_rejected() {
        let mut cat = Catalog::default();
        let t = TableDef { name: "t".into(), columns: vec![] };
        cat.add_table(t.clone()).unwrap();
        assert!(matches!(cat.add_table(t), Err(EngineError::TableExists(_))));
    }

    #[test]
    fn builtin_max_and_count() {
        let f = get_function("MAX").unwrap();
        assert!(f.is_aggregate);
        let result = (f.call)(&[Value::int(3), Value::int(9), Value::int(5)]).unwrap();
        assert_eq!(result.as_int().unwrap(), 9);

        let f = get_function("count").unwrap();
        let result = (f.call)(&[Value::int(1), Value::int(2), Value::int(3)]).unwrap();
        assert_eq!(result.as_int().unwrap(), 3);
    }
}
