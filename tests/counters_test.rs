mod helpers;

use chrono::Utc;
use helpers::{test_db, TestEnv};
use skills::error::SkillsError;
use skills::state::counters::{self, Counters};

#[test]
fn concurrent_increments_on_one_session_are_not_lost() {
    let env = TestEnv::new();
    env.open();

    const THREADS: usize = 8;
    const PROMPTS_EACH: usize = 25;

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let path = env.db_path.clone();
            std::thread::spawn(move || {
                let conn = skills::db::open_database(&path).unwrap();
                for _ in 0..PROMPTS_EACH {
                    counters::record_prompt(&conn, "/p", "shared", 3, Utc::now()).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let conn = env.open();
    let total = (THREADS * PROMPTS_EACH) as u64;
    assert_eq!(
        counters::read_counters(&conn, "/p", "shared").unwrap(),
        Some(Counters {
            tokens: total * 3,
            prompts: total
        })
    );
}

#[test]
fn sessions_of_one_project_are_independent() {
    let conn = test_db();
    let now = Utc::now();

    counters::record_prompt(&conn, "/p", "a", 100, now).unwrap();
    counters::record_prompt(&conn, "/p", "a", 100, now).unwrap();
    counters::record_prompt(&conn, "/p", "b", 7, now).unwrap();
    counters::reset(&conn, "/p", "a", now).unwrap();

    assert_eq!(
        counters::read_counters(&conn, "/p", "a").unwrap(),
        Some(Counters::default())
    );
    assert_eq!(
        counters::read_counters(&conn, "/p", "b").unwrap(),
        Some(Counters { tokens: 7, prompts: 1 })
    );
}

#[test]
fn same_session_id_in_two_projects_is_two_sessions() {
    let conn = test_db();
    let now = Utc::now();

    counters::record_prompt(&conn, "/p1", "s", 10, now).unwrap();
    counters::record_prompt(&conn, "/p2", "s", 20, now).unwrap();

    assert_eq!(counters::read_counters(&conn, "/p1", "s").unwrap().unwrap().tokens, 10);
    assert_eq!(counters::read_counters(&conn, "/p2", "s").unwrap().unwrap().tokens, 20);
    assert_eq!(counters::project_sessions(&conn, "/p1").unwrap().len(), 1);
}

#[test]
fn record_tokens_does_not_count_a_prompt() {
    let conn = test_db();
    let now = Utc::now();

    let counters = counters::record_tokens(&conn, "/p", "s", 1500, now).unwrap();
    assert_eq!(counters, Counters { tokens: 1500, prompts: 0 });
}

#[test]
fn oversized_estimate_never_decrements() {
    let conn = test_db();
    let now = Utc::now();

    counters::record_prompt(&conn, "/p", "s", 10, now).unwrap();
    let counters = counters::record_prompt(&conn, "/p", "s", u64::MAX, now).unwrap();
    assert!(counters.tokens >= 10, "{counters:?}");
    assert_eq!(counters.prompts, 2);

    let session = &counters::project_sessions(&conn, "/p").unwrap()[0];
    assert_eq!(session.total_tokens, i64::MAX as u64);
}

#[test]
fn responses_are_counted_separately() {
    let conn = test_db();
    let now = Utc::now();

    assert_eq!(counters::record_response(&conn, "/p", "s", now).unwrap(), 1);
    assert_eq!(counters::record_response(&conn, "/p", "s", now).unwrap(), 2);
    assert_eq!(
        counters::read_counters(&conn, "/p", "s").unwrap(),
        Some(Counters::default())
    );
}

#[test]
fn missing_tables_surface_as_storage_unavailable() {
    // A database that was never initialized
    let conn = rusqlite::Connection::open_in_memory().unwrap();

    let err = counters::record_prompt(&conn, "/p", "s", 1, Utc::now()).unwrap_err();
    assert!(matches!(err, SkillsError::StorageUnavailable(_)));
}

#[test]
fn sessions_list_most_recent_first() {
    let conn = test_db();
    let earlier = Utc::now() - chrono::Duration::minutes(5);
    let later = Utc::now();

    counters::record_prompt(&conn, "/p", "old", 1, earlier).unwrap();
    counters::record_prompt(&conn, "/p", "new", 1, later).unwrap();

    let ids: Vec<_> = counters::project_sessions(&conn, "/p")
        .unwrap()
        .into_iter()
        .map(|s| s.session_id)
        .collect();
    assert_eq!(ids, vec!["new", "old"]);
}
