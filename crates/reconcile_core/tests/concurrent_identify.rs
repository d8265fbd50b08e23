use reconcile_core::db::{open_db, open_db_with_timeout};
use reconcile_core::{IdentifyRequest, IdentifyService, ResolveError, RetryPolicy};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

const WORKERS: usize = 8;

#[test]
fn racing_requests_for_the_same_new_pair_create_one_primary() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("race.db");
    let connections: Vec<_> = (0..WORKERS).map(|_| open_db(&path).unwrap()).collect();
    let barrier = Arc::new(Barrier::new(WORKERS));

    let handles: Vec<_> = connections
        .into_iter()
        .map(|mut conn| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                IdentifyService::new(&mut conn)
                    .identify(&IdentifyRequest::new(
                        Some("race@hillvalley.edu"),
                        Some("880088"),
                    ))
                    .unwrap()
                    .contact
            })
        })
        .collect();

    let identities: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();
    for identity in &identities {
        assert_eq!(identity, &identities[0]);
    }

    let conn = open_db(&path).unwrap();
    let rows: i64 = conn
        .query_row("SELECT COUNT(*) FROM contacts;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(rows, 1);
}

#[test]
fn racing_merges_leave_a_single_canonical_primary() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("merge.db");
    {
        let mut conn = open_db(&path).unwrap();
        let mut service = IdentifyService::new(&mut conn);
        for (email, phone) in [
            ("one@hillvalley.edu", "100001"),
            ("two@hillvalley.edu", "200002"),
            ("three@hillvalley.edu", "300003"),
        ] {
            service
                .identify(&IdentifyRequest::new(Some(email), Some(phone)))
                .unwrap();
        }
    }

    let requests = [
        ("one@hillvalley.edu", "200002"),
        ("two@hillvalley.edu", "300003"),
        ("three@hillvalley.edu", "100001"),
        ("one@hillvalley.edu", "300003"),
    ];
    let barrier = Arc::new(Barrier::new(requests.len()));
    let handles: Vec<_> = requests
        .iter()
        .map(|&(email, phone)| {
            let mut conn = open_db(&path).unwrap();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                IdentifyService::new(&mut conn)
                    .identify(&IdentifyRequest::new(Some(email), Some(phone)))
                    .unwrap()
                    .contact
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let mut conn = open_db(&path).unwrap();
    let primaries: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM contacts WHERE link_precedence = 'primary';",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(primaries, 1);

    let mut service = IdentifyService::new(&mut conn);
    assert!(service.verify_integrity().unwrap().is_clean());
    let identity = service.lookup(1).unwrap().unwrap();
    assert_eq!(identity.primary_contact_id, 1);
    assert_eq!(identity.secondary_contact_ids.len(), 2);
}

#[test]
fn held_write_lock_ends_in_timeout_after_bounded_retries() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("locked.db");
    let blocker = open_db(&path).unwrap();
    blocker.execute_batch("BEGIN IMMEDIATE;").unwrap();

    let mut conn = open_db_with_timeout(&path, Duration::from_millis(10)).unwrap();
    let policy = RetryPolicy {
        max_attempts: 3,
        backoff: Duration::from_millis(5),
        overall_timeout: Duration::from_secs(5),
    };
    let err = IdentifyService::with_retry_policy(&mut conn, policy)
        .identify(&IdentifyRequest::new(Some("lock@hillvalley.edu"), None))
        .unwrap_err();

    match err {
        ResolveError::RetriesExhausted { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("unexpected error: {other}"),
    }

    blocker.execute_batch("ROLLBACK;").unwrap();
}

#[test]
fn held_write_lock_past_the_time_budget_is_a_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("slow.db");
    let blocker = open_db(&path).unwrap();
    blocker.execute_batch("BEGIN IMMEDIATE;").unwrap();

    let mut conn = open_db_with_timeout(&path, Duration::from_millis(10)).unwrap();
    let policy = RetryPolicy {
        max_attempts: 1_000,
        backoff: Duration::from_millis(5),
        overall_timeout: Duration::from_millis(60),
    };
    let err = IdentifyService::with_retry_policy(&mut conn, policy)
        .identify(&IdentifyRequest::new(Some("slow@hillvalley.edu"), None))
        .unwrap_err();

    match &err {
        ResolveError::Timeout { attempts, .. } => assert!(*attempts < 1_000),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.error_code(), "resolve_timeout");

    blocker.execute_batch("ROLLBACK;").unwrap();
}
