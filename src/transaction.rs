//! Session-local UNDO log. There is one writer session; `BEGIN` starts
//! recording inverse operations for every heap mutation, `COMMIT` discards
//! them, and `ROLLBACK` replays them in reverse to restore the
//! pre-transaction state. No locking, no cross-crash atomicity — a
//! rollback after a process restart is simply not possible, matching the
//! "single-writer session, no crash-safe durability" non-goal.

use crate::value::Value;

/// One inverse of a heap-store mutation. Insert is undone by deleting the
/// row it created; delete is undone by resurrecting the tombstoned row and
/// re-arming its index entries, never by inserting a fresh copy — the
/// deleted bytes are still sitting on disk, tombstone resurrection is
/// exactly what the B+tree already does for a re-inserted key (I6).
#[derive(Debug, Clone)]
pub enum UndoRecord {
    Insert { table: String, offset: u64 },
    Delete { table: String, offset: u64, values: Vec<Value> },
}

#[derive(Debug, Default)]
pub struct TransactionLog {
    in_transaction: bool,
    records: Vec<UndoRecord>,
}

impl TransactionLog {
    pub fn is_active(&self) -> bool {
        self.in_transaction
    }

    pub fn begin(&mut self) -> Result<(), crate::error::EngineError> {
        if self.in_transaction {
            return Err(crate::error::EngineError::AlreadyInTransaction);
        }
        self.in_transaction = true;
        self.records.clear();
        Ok(())
    }

    pub fn commit(&mut self) -> Result<(), crate::error::EngineError> {
        if !self.in_transaction {
            return Err(crate::error::EngineError::NotInTransaction);
        }
        self.in_transaction = false;
        self.records.clear();
        Ok(())
    }

    /// Disarms `in_transaction` before returning the records to replay, so
    /// that the caller's inverse operations don't themselves get logged
    /// (the source's known off-by-one in the reverse loop is corrected
    /// here: records replay strictly newest-first).
    pub fn take_for_rollback(&mut self) -> Result<Vec<UndoRecord>, crate::error::EngineError> {
        if !self.in_transaction {
            return Err(crate::error::EngineError::NotInTransaction);
        }
        self.in_transaction = false;
        let mut records = std::mem::take(&mut self.records);
        records.reverse();
        Ok(records)
    }

    pub fn log_insert(&mut self, table: impl Into<String>, offset: u64) {
        if self.in_transaction {
            self.records.push(UndoRecord::Insert { table: table.into(), offset });
        }
    }

    pub fn log_delete(&mut self, table: impl Into<String>, offset: u64, values: Vec<Value>) {
        if self.in_transaction {
            self.records.push(UndoRecord::Delete { table: table.into(), offset, values });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    #[test]
    fn begin_twice_fails() {
        let mut log = TransactionLog::default();
        log.begin().unwrap();
        assert!(matches!(log.begin(), Err(EngineError::AlreadyInTransaction)));
    }

    #[test]
    fn commit_without_begin_fails() {
        let mut log = TransactionLog::default();
        assert!(matches!(log.commit(), Err(EngineError::NotInTransaction)));
    }

    #[test]
    fn records_only_accumulate_inside_a_transaction() {
        let mut log = TransactionLog::default();
        log.log_insert("t", 0);
        assert!(log.take_for_rollback().is_err());

        log.begin().unwrap();
        log.log_insert("t", 8);
        log.log_delete("t", 0, vec![Value::int(1)]);
        let records = log.take_for_rollback().unwrap();
        assert_eq!(records.len(), 2);
        // reverse order: the delete-undo (most recent write) replays first
        assert!(matches!(records[0], UndoRecord::Delete { .. }));
        assert!(matches!(records[1], UndoRecord::Insert { .. }));
    }

    #[test]
    fn commit_discards_records() {
        let mut log = TransactionLog::default();
        log.begin().unwrap();
        log.log_insert("t", 8);
        log.commit().unwrap();
        assert!(!log.is_active());
    }
}
