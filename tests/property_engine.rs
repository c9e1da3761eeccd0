//! Property tests driving `Database` with randomized operation sequences:
//! index-agreement (every live row is reachable through its index and
//! every tombstoned offset is not) and rollback-inverts (a transaction's
//! net effect vanishes after `ROLLBACK`).

use proptest::prelude::*;
use tempfile::tempdir;
use tinysql::Database;

#[derive(Debug, Clone)]
enum Op {
    Insert(i64),
    DeleteExisting(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0i64..200).prop_map(Op::Insert),
        (0usize..50).prop_map(Op::DeleteExisting),
    ]
}

proptest! {
    #[test]
    fn index_agreement_after_mixed_insert_delete(ops in proptest::collection::vec(op_strategy(), 1..80)) {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();
        db.execute("CREATE TABLE t(id INT);").unwrap();
        db.execute("CREATE INDEX t_id ON t(id);").unwrap();

        let mut live: Vec<i64> = Vec::new();
        for op in ops {
            match op {
                Op::Insert(v) => {
                    if db.execute(&format!("INSERT INTO t VALUES ({});", v)).is_ok() {
                        live.push(v);
                    }
                }
                Op::DeleteExisting(idx) => {
                    if live.is_empty() {
                        continue;
                    }
                    let v = live[idx % live.len()];
                    db.execute(&format!("DELETE FROM t WHERE id = {};", v)).unwrap();
                    if let Some(pos) = live.iter().position(|&x| x == v) {
                        live.remove(pos);
                    }
                }
            }
        }

        let via_scan = db.execute("SELECT id FROM t;").unwrap();
        let mut scanned: Vec<i64> = via_scan.rows.iter().map(|r| r[0].as_int().unwrap()).collect();
        scanned.sort();
        let mut expected = live.clone();
        expected.sort();
        prop_assert_eq!(scanned, expected);

        // every surviving row must still resolve through the index path
        for v in &live {
            let via_index = db.execute(&format!("SELECT id FROM t WHERE id = {};", v)).unwrap();
            prop_assert_eq!(via_index.rows.len(), 1);
        }
    }

    #[test]
    fn rollback_always_inverts_a_transaction(inserts in proptest::collection::vec(0i64..100, 0..10), tx_inserts in proptest::collection::vec(0i64..100, 0..10)) {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();
        db.execute("CREATE TABLE t(id INT);").unwrap();
        for v in &inserts {
            db.execute(&format!("INSERT INTO t VALUES ({});", v)).unwrap();
        }

        let mut before = db.execute("SELECT id FROM t;").unwrap().rows;
        before.sort_by_key(|r| r[0].as_int().unwrap());

        db.execute("BEGIN;").unwrap();
        for v in &tx_inserts {
            db.execute(&format!("INSERT INTO t VALUES ({});", v)).unwrap();
        }
        if !inserts.is_empty() {
            db.execute(&format!("DELETE FROM t WHERE id = {};", inserts[0])).unwrap();
        }
        db.execute("ROLLBACK;").unwrap();

        let mut after = db.execute("SELECT id FROM t;").unwrap().rows;
        after.sort_by_key(|r| r[0].as_int().unwrap());

        prop_assert_eq!(before, after);
    }
}
