use skills::db;
use skills::db::migrations::{get_schema_version, CURRENT_SCHEMA_VERSION};
use tempfile::TempDir;

/// A database as the first release created it: base schema only, version 1.
fn v1_database(path: &std::path::Path) {
    let conn = rusqlite::Connection::open(path).unwrap();
    db::schema::init_schema(&conn).unwrap();
    assert_eq!(get_schema_version(&conn).unwrap(), 1);
}

#[test]
fn open_upgrades_old_database() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("state.db");
    v1_database(&path);

    let conn = db::open_database(&path).unwrap();
    assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);

    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM run_log", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 0);
}

#[test]
fn concurrent_opens_migrate_once() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("state.db");
    v1_database(&path);

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let path = path.clone();
            std::thread::spawn(move || {
                let conn = db::open_database(&path).unwrap();
                get_schema_version(&conn).unwrap()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), CURRENT_SCHEMA_VERSION);
    }
}

#[test]
fn run_log_rejects_unknown_outcome() {
    let conn = {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        db::schema::init_schema(&conn).unwrap();
        db::migrations::run_migrations(&conn).unwrap();
        conn
    };

    let result = conn.execute(
        "INSERT INTO run_log (project, pass, outcome, created_at) VALUES ('/p', 1, 'exploded', 'now')",
        [],
    );
    assert!(result.is_err());
}
