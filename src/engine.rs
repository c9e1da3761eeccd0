//! Ties catalog, storage, and the transaction log into one handle, and
//! drives a parsed statement through the planner and its operator tree.
//!
//! Operators hold a shared `Rc<RefCell<Engine>>` rather than a borrowed
//! reference: the pull model calls back into storage from deep inside a
//! nested operator tree (a join's inner scan, an update's per-row
//! re-insert), and a single-threaded engine has no need for `Arc`/`Mutex`
//! to get there safely.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::ast::Statement;
use crate::catalog::{Catalog, IndexDef, TableDef};
use crate::error::{EngineError, Result};
use crate::expr::Tuple;
use crate::operators::Operator;
use crate::parser::Parser;
use crate::planner::Planner;
use crate::storage::Storage;
use crate::transaction::{TransactionLog, UndoRecord};
use crate::value::Value;

pub struct Engine {
    pub catalog: Catalog,
    pub storage: Storage,
    pub txlog: TransactionLog,
    dir: PathBuf,
}

pub type SharedEngine = Rc<RefCell<Engine>>;

impl Engine {
    pub fn open(dir: &Path) -> Result<Self> {
        let catalog = Catalog::load(dir)?;
        let storage = Storage::open(dir, &catalog)?;
        Ok(Engine { catalog, storage, txlog: TransactionLog::default(), dir: dir.to_path_buf() })
    }

    pub fn create_table(&mut self, table: TableDef) -> Result<()> {
        self.catalog.add_table(table.clone())?;
        self.storage.open_table(&table)?;
        self.catalog.save(&self.dir)?;
        log::info!("created table '{}' ({} columns)", table.name, table.columns.len());
        Ok(())
    }

    /// Installs the index, then backfills it from every live row currently
    /// in the table. Returns the number of rows indexed.
    pub fn create_index(&mut self, index: IndexDef) -> Result<usize> {
        let table = self.catalog.table(&index.table_name)?.clone();
        self.catalog.add_index(index.clone())?;
        self.storage.open_index(&index, &table)?;
        self.catalog.save(&self.dir)?;

        let rows = self.storage.scan_table(&table)?;
        for (offset, values) in &rows {
            let key = self.storage.index_key(&index, &table, values)?;
            self.storage.index_mut(&index.name)?.insert(key, *offset)?;
        }
        log::info!("created index '{}' on '{}', backfilled {} rows", index.name, table.name, rows.len());
        Ok(rows.len())
    }

    fn indexes_for(&self, table: &str) -> Vec<IndexDef> {
        self.catalog.indexes_for_table(table).into_iter().cloned().collect()
    }

    /// Appends `values` to the table's heap and arms every index on it.
    /// Logs an `UndoRecord::Insert` if a transaction is open.
    pub fn do_insert(&mut self, table_name: &str, values: Vec<Value>) -> Result<u64> {
        let table = self.catalog.table(table_name)?.clone();
        let offset = self.storage.insert_row(&table, &values)?;
        for index in self.indexes_for(table_name) {
            let key = self.storage.index_key(&index, &table, &values)?;
            self.storage.index_mut(&index.name)?.insert(key, offset)?;
        }
        self.txlog.log_insert(table_name, offset);
        Ok(offset)
    }

    /// Tombstones the record at `offset` and every index entry pointing at
    /// it. Logs an `UndoRecord::Delete` (carrying the row's prior values,
    /// so rollback can resurrect it) if a transaction is open.
    pub fn do_delete(&mut self, table_name: &str, offset: u64) -> Result<()> {
        let table = self.catalog.table(table_name)?.clone();
        let values = self.storage.read_row(&table, offset)?.ok_or_else(|| {
            log::warn!("delete of a tombstoned offset {} in '{}'", offset, table_name);
            EngineError::Corruption(format!("delete of a tombstoned offset {} in '{}'", offset, table_name))
        })?;
        for index in self.indexes_for(table_name) {
            let key = self.storage.index_key(&index, &table, &values)?;
            self.storage.index_mut(&index.name)?.delete(&key)?;
        }
        self.storage.delete_row(table_name, offset)?;
        self.txlog.log_delete(table_name, offset, values);
        Ok(())
    }

    pub fn begin(&mut self) -> Result<()> {
        self.txlog.begin()?;
        log::info!("transaction started");
        Ok(())
    }

    pub fn commit(&mut self) -> Result<()> {
        self.txlog.commit()?;
        log::info!("transaction committed");
        Ok(())
    }

    /// Replays the UNDO log newest-first. An `Insert` record is undone by
    /// deleting the row it created; a `Delete` record is undone by
    /// resurrecting the tombstoned heap row and re-arming its index
    /// entries in place, rather than inserting a fresh copy — this keeps
    /// the row at its original offset (I1) and exercises the same
    /// tombstone-resurrection path a live re-insert would (I6).
    pub fn rollback(&mut self) -> Result<()> {
        let records = self.txlog.take_for_rollback()?;
        log::info!("rolling back {} undo record(s)", records.len());
        for record in records {
            match record {
                UndoRecord::Insert { table, offset } => {
                    self.do_delete(&table, offset)?;
                }
                UndoRecord::Delete { table, offset, values } => {
                    self.storage.restore_row(&table, offset)?;
                    let table_def = self.catalog.table(&table)?.clone();
                    for index in self.indexes_for(&table) {
                        let key = self.storage.index_key(&index, &table_def, &values)?;
                        self.storage.index_mut(&index.name)?.insert(key, offset)?;
                    }
                }
            }
        }
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        self.txlog.is_active()
    }

    /// Offline rebuild: rewrite a table's heap (dropping tombstoned rows,
    /// which reassigns offsets) and every index registered against it.
    pub fn compact(&mut self, table_name: &str) -> Result<()> {
        let table = self.catalog.table(table_name)?.clone();
        let rows = self.storage.scan_table(&table)?;
        let indexes = self.indexes_for(table_name);

        self.storage.recreate_table(&table)?;
        for index in &indexes {
            self.storage.recreate_index(index, &table)?;
        }
        for (_, values) in &rows {
            let offset = self.storage.insert_row(&table, values)?;
            for index in &indexes {
                let key = self.storage.index_key(index, &table, values)?;
                self.storage.index_mut(&index.name)?.insert(key, offset)?;
            }
        }
        log::info!("compacted '{}': {} live rows rewritten, {} index(es) rebuilt", table_name, rows.len(), indexes.len());
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        self.catalog.save(&self.dir)
    }
}

#[derive(Debug, Default)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// Thin handle wrapping a shared `Engine`: parses and plans a statement,
/// runs its operator tree to completion, and collects the output rows.
pub struct Database {
    pub handle: SharedEngine,
}

impl Database {
    pub fn open(dir: &Path) -> Result<Self> {
        Ok(Database { handle: Rc::new(RefCell::new(Engine::open(dir)?)) })
    }

    pub fn execute(&self, sql: &str) -> Result<QueryResult> {
        let stmt = Parser::parse(sql)?;
        match stmt {
            Statement::Begin => {
                self.handle.borrow_mut().begin()?;
                Ok(QueryResult::default())
            }
            Statement::Commit => {
                self.handle.borrow_mut().commit()?;
                Ok(QueryResult::default())
            }
            Statement::Rollback => {
                self.handle.borrow_mut().rollback()?;
                Ok(QueryResult::default())
            }
            other => {
                let mut op = Planner::plan(other, &self.handle)?;
                run_to_completion(op.as_mut())
            }
        }
    }

    pub fn compact(&self, table: &str) -> Result<()> {
        self.handle.borrow_mut().compact(table)
    }

    pub fn close(&self) -> Result<()> {
        self.handle.borrow_mut().close()
    }

    pub fn in_transaction(&self) -> bool {
        self.handle.borrow().in_transaction()
    }
}

fn run_to_completion(op: &mut dyn Operator) -> Result<QueryResult> {
    op.open()?;
    let columns = op.columns().into_iter().map(|c| c.name).collect();
    let mut rows = Vec::new();
    while let Some(tuple) = next_row(op)? {
        rows.push(tuple.values);
    }
    op.close()?;
    Ok(QueryResult { columns, rows })
}

fn next_row(op: &mut dyn Operator) -> Result<Option<Tuple>> {
    op.next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Column, ColumnType};
    use tempfile::tempdir;

    fn users_table() -> TableDef {
        TableDef {
            name: "users".into(),
            columns: vec![
                Column::new("users.id", ColumnType::Int, 8),
                Column::new("users.height", ColumnType::Float, 8),
                Column::new("users.name", ColumnType::FixedStr, 16),
            ],
        }
    }

    #[test]
    fn ddl_and_crud_end_to_end() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();
        db.execute("CREATE TABLE users(id INT, height FLOAT, name VARCHAR(16));").unwrap();
        db.execute("INSERT INTO users VALUES (1, 1.8, 'tom');").unwrap();
        db.execute("INSERT INTO users VALUES (2, 1.7, 'bob');").unwrap();

        let result = db.execute("SELECT * FROM users WHERE id > 1;").unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0][0].as_int().unwrap(), 2);
        assert_eq!(result.rows[0][2].as_str().unwrap(), "bob");
        let _ = users_table();
    }

    #[test]
    fn rollback_restores_snapshot() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();
        db.execute("CREATE TABLE t(id INT);").unwrap();
        db.execute("INSERT INTO t VALUES (1);").unwrap();

        let before = db.execute("SELECT * FROM t;").unwrap();

        db.execute("BEGIN;").unwrap();
        db.execute("INSERT INTO t VALUES (2);").unwrap();
        db.execute("DELETE FROM t WHERE id = 1;").unwrap();
        db.execute("ROLLBACK;").unwrap();

        let after = db.execute("SELECT * FROM t;").unwrap();
        assert_eq!(before.rows, after.rows);
    }

    #[test]
    fn index_path_deletes_tombstone_entry() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();
        db.execute("CREATE TABLE users(id INT, height FLOAT, name VARCHAR(16));").unwrap();
        db.execute("INSERT INTO users VALUES (1, 1.8, 'tom');").unwrap();
        db.execute("INSERT INTO users VALUES (2, 1.7, 'bob');").unwrap();
        db.execute("CREATE INDEX u_id ON users(id);").unwrap();
        db.execute("DELETE FROM users WHERE id = 2;").unwrap();

        let result = db.execute("SELECT * FROM users;").unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0][0].as_int().unwrap(), 1);
    }
}
