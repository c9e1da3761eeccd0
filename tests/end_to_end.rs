//! End-to-end scenarios driving `Database::execute` directly: DDL/CRUD,
//! index maintenance, joins, grouping, sorting, B+tree split correctness,
//! and transaction rollback.

use tempfile::tempdir;
use tinysql::Database;

#[test]
fn ddl_and_crud() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path()).unwrap();
    db.execute("CREATE TABLE users(id INT, height FLOAT, name VARCHAR(16), bio TEXT);").unwrap();
    db.execute("INSERT INTO users VALUES (1, 1.8, 'tom', 'hi');").unwrap();
    db.execute("INSERT INTO users VALUES (2, 1.7, 'bob', 'hey');").unwrap();

    let result = db.execute("SELECT * FROM users WHERE id > 1;").unwrap();
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0][0].as_int().unwrap(), 2);
    assert_eq!(result.rows[0][1].as_float().unwrap(), 1.7);
    assert_eq!(result.rows[0][2].as_str().unwrap(), "bob");
    assert_eq!(result.rows[0][3].as_str().unwrap(), "hey");
}

#[test]
fn index_path_tombstones_rather_than_erases() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path()).unwrap();
    db.execute("CREATE TABLE users(id INT, height FLOAT, name VARCHAR(16), bio TEXT);").unwrap();
    db.execute("INSERT INTO users VALUES (1, 1.8, 'tom', 'hi');").unwrap();
    db.execute("INSERT INTO users VALUES (2, 1.7, 'bob', 'hey');").unwrap();
    db.execute("CREATE INDEX u_id ON users(id);").unwrap();
    db.execute("DELETE FROM users WHERE id = 2;").unwrap();

    let result = db.execute("SELECT * FROM users;").unwrap();
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0][0].as_int().unwrap(), 1);

    // The deleted key must still resolve through the index path (it's
    // tombstoned in place, not scrubbed from the page).
    let via_index = db.execute("SELECT * FROM users WHERE id = 2;").unwrap();
    assert!(via_index.rows.is_empty());
}

#[test]
fn join_preserves_outer_loop_order() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path()).unwrap();
    db.execute("CREATE TABLE a(x INT, y INT);").unwrap();
    db.execute("CREATE TABLE b(x INT, z INT);").unwrap();
    db.execute("INSERT INTO a VALUES (1, 10);").unwrap();
    db.execute("INSERT INTO a VALUES (2, 20);").unwrap();
    db.execute("INSERT INTO b VALUES (1, 100);").unwrap();
    db.execute("INSERT INTO b VALUES (2, 200);").unwrap();
    db.execute("INSERT INTO b VALUES (3, 300);").unwrap();

    let result = db.execute("SELECT a.y, b.z FROM a JOIN b ON a.x = b.x;").unwrap();
    let rows: Vec<(i64, i64)> =
        result.rows.iter().map(|r| (r[0].as_int().unwrap(), r[1].as_int().unwrap())).collect();
    assert_eq!(rows, vec![(10, 100), (20, 200)]);
}

#[test]
fn left_join_is_rejected_rather_than_silently_run_as_inner() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path()).unwrap();
    db.execute("CREATE TABLE a(x INT, y INT);").unwrap();
    db.execute("CREATE TABLE b(x INT, z INT);").unwrap();

    let err = db.execute("SELECT a.y, b.z FROM a LEFT JOIN b ON a.x = b.x;").unwrap_err();
    assert!(matches!(err, tinysql::EngineError::Syntax(_)));
}

#[test]
fn group_by_with_aggregate() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path()).unwrap();
    db.execute("CREATE TABLE t(k INT, v INT);").unwrap();
    db.execute("INSERT INTO t VALUES (1, 3);").unwrap();
    db.execute("INSERT INTO t VALUES (1, 5);").unwrap();
    db.execute("INSERT INTO t VALUES (2, 7);").unwrap();

    let result = db.execute("SELECT k, MAX(v) FROM t GROUP BY k;").unwrap();
    let mut rows: Vec<(i64, i64)> =
        result.rows.iter().map(|r| (r[0].as_int().unwrap(), r[1].as_int().unwrap())).collect();
    rows.sort();
    assert_eq!(rows, vec![(1, 5), (2, 7)]);
}

#[test]
fn sort_desc_with_limit_and_offset() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path()).unwrap();
    db.execute("CREATE TABLE t(x INT);").unwrap();
    for x in 0..100 {
        db.execute(&format!("INSERT INTO t VALUES ({});", x)).unwrap();
    }

    let result = db.execute("SELECT x FROM t ORDER BY x DESC LIMIT 3 OFFSET 2;").unwrap();
    let xs: Vec<i64> = result.rows.iter().map(|r| r[0].as_int().unwrap()).collect();
    assert_eq!(xs, vec![97, 96, 95]);
}

#[test]
fn large_index_split_preserves_order() {
    use rand::seq::SliceRandom;

    let dir = tempdir().unwrap();
    let db = Database::open(dir.path()).unwrap();
    db.execute("CREATE TABLE t(x INT);").unwrap();
    db.execute("CREATE INDEX t_x ON t(x);").unwrap();

    let mut order: Vec<i64> = (0..2000).collect();
    order.shuffle(&mut rand::thread_rng());
    for x in order {
        db.execute(&format!("INSERT INTO t VALUES ({});", x)).unwrap();
    }

    let result = db.execute("SELECT x FROM t WHERE x > -1;").unwrap();
    let mut xs: Vec<i64> = result.rows.iter().map(|r| r[0].as_int().unwrap()).collect();
    xs.sort();
    assert_eq!(xs, (0..2000i64).collect::<Vec<_>>());
}

#[test]
fn rollback_restores_pre_transaction_snapshot() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path()).unwrap();
    db.execute("CREATE TABLE t(id INT);").unwrap();
    db.execute("INSERT INTO t VALUES (1);").unwrap();
    db.execute("INSERT INTO t VALUES (2);").unwrap();

    let before = db.execute("SELECT * FROM t;").unwrap();

    db.execute("BEGIN;").unwrap();
    db.execute("INSERT INTO t VALUES (3);").unwrap();
    db.execute("DELETE FROM t WHERE id = 1;").unwrap();
    db.execute("ROLLBACK;").unwrap();

    let after = db.execute("SELECT * FROM t;").unwrap();
    assert_eq!(before.rows, after.rows);
}
