use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use mystnode_sessions::{
    Database, Direction, Identity, Query, QueryError, SessionHistory, SessionStorage, Stats,
    StoreError,
};
use tempfile::TempDir;

fn record(
    id: &str,
    direction: Direction,
    consumer: &str,
    sent: u64,
    received: u64,
    tokens: u64,
    duration_secs: i64,
) -> SessionHistory {
    let started = Utc.with_ymd_and_hms(2020, 3, 1, 12, 0, 0).unwrap();
    SessionHistory {
        session_id: id.to_string(),
        consumer_id: Identity::new(consumer),
        provider_id: Identity::new("0xprovider"),
        direction,
        data_sent: sent,
        data_received: received,
        tokens,
        started,
        ended: Some(started + chrono::Duration::seconds(duration_secs)),
    }
}

fn r1() -> SessionHistory {
    record("r1", Direction::Export, "A", 100, 50, 10, 60)
}

fn r2() -> SessionHistory {
    record("r2", Direction::Import, "A", 10, 5, 1, 5)
}

fn r3() -> SessionHistory {
    record("r3", Direction::Export, "B", 200, 150, 20, 120)
}

/// Helper: in-memory database holding R1, R2, R3 in that order.
fn scenario_db() -> Database {
    let db = Database::open_in_memory().unwrap();
    for session in [r1(), r2(), r3()] {
        db.sessions().save(&session).unwrap();
    }
    db
}

/// A store that yields some records and then fails.
struct FailingStore {
    records: Vec<SessionHistory>,
}

impl SessionStorage for FailingStore {
    fn scan(
        &self,
        visit: &mut dyn FnMut(SessionHistory) -> ControlFlow<()>,
    ) -> Result<(), StoreError> {
        for record in &self.records {
            if visit(record.clone()).is_break() {
                return Ok(());
            }
        }
        Err(StoreError::Corrupt {
            id: "broken".to_string(),
            reason: "truncated row".to_string(),
        })
    }
}

/// A store that raises a cancel flag once it has yielded `cancel_after` records.
struct CancellingStore {
    records: Vec<SessionHistory>,
    cancel_after: usize,
    cancel: Arc<AtomicBool>,
}

impl SessionStorage for CancellingStore {
    fn scan(
        &self,
        visit: &mut dyn FnMut(SessionHistory) -> ControlFlow<()>,
    ) -> Result<(), StoreError> {
        for (index, record) in self.records.iter().enumerate() {
            if index == self.cancel_after {
                self.cancel.store(true, Ordering::SeqCst);
            }
            if visit(record.clone()).is_break() {
                return Ok(());
            }
        }
        Ok(())
    }
}

// ============================================================
// Aggregation
// ============================================================

#[test]
fn test_export_stats_scenario() {
    let db = scenario_db();

    let mut query = Query::new();
    query.filter_direction(Direction::Export).collect_stats();
    query.execute(&db).unwrap();

    let stats = query.stats().unwrap();
    assert_eq!(stats.count, 2);
    assert_eq!(stats.consumer_counts.len(), 2);
    assert_eq!(stats.consumer_counts[&Identity::new("A")], 1);
    assert_eq!(stats.consumer_counts[&Identity::new("B")], 1);
    assert_eq!(stats.sum_data_sent, 300);
    assert_eq!(stats.sum_data_received, 200);
    assert_eq!(stats.sum_duration, Duration::from_secs(180));
    assert_eq!(stats.sum_tokens, 30);
}

#[test]
fn test_unfiltered_stats_cover_every_record() {
    let db = scenario_db();

    let mut query = Query::new();
    query.collect_stats();
    query.execute(&db).unwrap();

    let stats = query.stats().unwrap();
    assert_eq!(stats.count, 3);
    assert_eq!(stats.consumer_counts[&Identity::new("A")], 2);
    assert_eq!(stats.consumer_counts.values().sum::<usize>(), stats.count);
    assert_eq!(stats.sum_data_sent, 310);
    assert_eq!(stats.sum_data_received, 205);
    assert_eq!(stats.sum_duration, Duration::from_secs(185));
    assert_eq!(stats.sum_tokens, 31);
}

#[test]
fn test_open_session_adds_no_duration() {
    let db = Database::open_in_memory().unwrap();
    let mut open = r1();
    open.ended = None;
    db.sessions().start(&open).unwrap();
    db.sessions().save(&r3()).unwrap();

    let mut query = Query::new();
    query.collect_stats();
    query.execute(&db).unwrap();

    let stats = query.stats().unwrap();
    assert_eq!(stats.count, 2);
    assert_eq!(stats.sum_duration, Duration::from_secs(120));
    assert_eq!(stats.sum_data_sent, 300);
}

// ============================================================
// Collection
// ============================================================

#[test]
fn test_export_sessions_scenario_keeps_store_order() {
    let db = scenario_db();

    let mut query = Query::new();
    query.filter_direction(Direction::Export).collect_sessions();
    query.execute(&db).unwrap();

    assert_eq!(query.sessions().unwrap(), &[r1(), r3()]);
}

#[test]
fn test_sessions_and_stats_from_one_scan() {
    let db = scenario_db();

    let mut query = Query::new();
    query
        .filter_consumer(Identity::new("A"))
        .collect_sessions()
        .collect_stats();
    query.execute(&db).unwrap();

    let sessions = query.sessions().unwrap();
    let stats = query.stats().unwrap();
    assert_eq!(sessions, &[r1(), r2()]);
    assert_eq!(stats.count, sessions.len());
    assert_eq!(stats.sum_tokens, 11);
}

#[test]
fn test_empty_store_yields_zero_stats_and_empty_list() {
    let db = Database::open_in_memory().unwrap();

    let mut query = Query::new();
    query.collect_sessions().collect_stats();
    query.execute(&db).unwrap();

    assert_eq!(query.stats(), Some(&Stats::default()));
    assert_eq!(query.sessions().map(|s| s.len()), Some(0));

    let results = query.into_results();
    assert_eq!(results.sessions, Some(Vec::new()));
    assert_eq!(results.stats.unwrap().count, 0);
}

#[test]
fn test_filter_matching_nothing() {
    let db = scenario_db();

    let mut query = Query::new();
    query
        .filter_direction(Direction::Import)
        .filter_consumer(Identity::new("B"))
        .collect_sessions()
        .collect_stats();
    query.execute(&db).unwrap();

    assert!(query.sessions().unwrap().is_empty());
    assert_eq!(query.stats().unwrap().count, 0);
}

// ============================================================
// Re-registration
// ============================================================

#[test]
fn test_collect_stats_twice_only_second_destination_updates() {
    let db = scenario_db();

    let mut query = Query::new();
    query
        .filter_direction(Direction::Export)
        .collect_stats()
        .collect_stats();
    query.execute(&db).unwrap();

    // The second registration replaces the first, so the single remaining
    // destination sees each match exactly once.
    let stats = query.stats().unwrap();
    assert_eq!(stats.count, 2);
    assert_eq!(stats.sum_data_sent, 300);
}

#[test]
fn test_reregistering_after_execute_orphans_previous_results() {
    let db = scenario_db();

    let mut query = Query::new();
    query.collect_stats().collect_sessions();
    query.execute(&db).unwrap();
    assert_eq!(query.stats().unwrap().count, 3);

    query.collect_stats().collect_sessions();
    assert_eq!(query.stats(), Some(&Stats::default()));
    assert!(query.sessions().unwrap().is_empty());
}

#[test]
fn test_execute_twice_does_not_accumulate() {
    let db = scenario_db();

    let mut query = Query::new();
    query.collect_stats().collect_sessions();
    query.execute(&db).unwrap();
    query.execute(&db).unwrap();

    assert_eq!(query.stats().unwrap().count, 3);
    assert_eq!(query.sessions().unwrap().len(), 3);
}

// ============================================================
// Failures
// ============================================================

#[test]
fn test_store_failure_discards_partial_outputs() {
    let store = FailingStore {
        records: vec![r1(), r3()],
    };

    let mut query = Query::new();
    query.collect_sessions().collect_stats();
    let err = query.execute(&store).unwrap_err();

    assert!(matches!(err, QueryError::Store(StoreError::Corrupt { .. })));
    assert!(query.sessions().unwrap().is_empty());
    assert_eq!(query.stats(), Some(&Stats::default()));
}

#[test]
fn test_corrupt_row_aborts_query() {
    let dir = TempDir::new().unwrap();
    let path = Database::path_in(dir.path());
    {
        let db = Database::open_at(&path).unwrap();
        db.sessions().save(&r1()).unwrap();
        db.sessions().save(&r2()).unwrap();
    }
    {
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute(
            "UPDATE session_history SET started_at = 'yesterday' WHERE session_id = 'r2'",
            [],
        )
        .unwrap();
    }

    let db = Database::open_at(&path).unwrap();
    let mut query = Query::new();
    query.collect_stats();

    let err = query.execute(&db).unwrap_err();
    assert!(err.to_string().contains("r2"));
    assert_eq!(query.stats().unwrap().count, 0);
}

#[test]
fn test_cancelled_query_reports_cancellation() {
    let db = scenario_db();
    let cancel = AtomicBool::new(true);

    let mut query = Query::new();
    query.collect_stats();
    let err = query.execute_until(&db, &cancel).unwrap_err();

    assert!(matches!(err, QueryError::Cancelled));
    assert_eq!(query.stats().unwrap().count, 0);
}

#[test]
fn test_cancel_mid_scan_discards_accumulated_outputs() {
    let cancel = Arc::new(AtomicBool::new(false));
    let store = CancellingStore {
        records: vec![r1(), r2(), r3()],
        cancel_after: 2,
        cancel: Arc::clone(&cancel),
    };

    let mut query = Query::new();
    query.collect_sessions().collect_stats();
    let err = query.execute_until(&store, &cancel).unwrap_err();

    assert!(matches!(err, QueryError::Cancelled));
    assert!(query.sessions().unwrap().is_empty());
    assert_eq!(query.stats(), Some(&Stats::default()));
}

#[test]
fn test_uncancelled_query_runs_to_completion() {
    let db = scenario_db();
    let cancel = AtomicBool::new(false);

    let mut query = Query::new();
    query.collect_stats();
    query.execute_until(&db, &cancel).unwrap();

    assert_eq!(query.stats().unwrap().count, 3);
    assert!(!cancel.load(Ordering::SeqCst));
}

// ============================================================
// Concurrency
// ============================================================

#[test]
fn test_independent_queries_from_many_threads() {
    let db = Arc::new(scenario_db());

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                let direction = if i % 2 == 0 {
                    Direction::Export
                } else {
                    Direction::Import
                };
                let mut query = Query::new();
                query.filter_direction(direction).collect_stats();
                query.execute(db.as_ref()).unwrap();
                (direction, query.into_results().stats.unwrap().count)
            })
        })
        .collect();

    for handle in handles {
        let (direction, count) = handle.join().unwrap();
        match direction {
            Direction::Export => assert_eq!(count, 2),
            Direction::Import => assert_eq!(count, 1),
        }
    }
}
