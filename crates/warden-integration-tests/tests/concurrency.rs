//! Many threads hammering the lockout store and the audit chain at once.

#![allow(clippy::arithmetic_side_effects)]

use std::sync::Arc;
use std::thread;

use warden_audit::{AuditLogger, AuditLoggerConfig, ChainConfig, ChainProtector};
use warden_lockout::{LockoutError, LockoutPolicy, LockoutStore};
use warden_test::prelude::*;

const THREADS: usize = 8;
const EVENTS_PER_THREAD: u64 = 25;

#[test]
fn test_shared_identifier_never_exceeds_max_attempts() {
    let home = TestHome::new();
    let store = Arc::new(
        LockoutStore::open(
            &home.home().lockout_dir(),
            home.lockout_keys(),
            LockoutPolicy::default(),
        )
        .unwrap(),
    );

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let own = format!("user-{t}");
                let mut locked_errors = 0usize;
                for _ in 0..10 {
                    for id in ["shared", own.as_str()] {
                        match store.record_attempt(id, false) {
                            Ok(()) => {},
                            Err(LockoutError::Locked { .. }) => locked_errors += 1,
                            Err(e) => panic!("unexpected lockout error: {e}"),
                        }
                    }
                }
                locked_errors
            })
        })
        .collect();

    let refused: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

    let shared = store.status("shared").unwrap();
    assert!(shared.locked);
    assert_eq!(shared.count, 3);
    assert_eq!(shared.lockout_count, 1);
    for t in 0..THREADS {
        let own = store.status(&format!("user-{t}")).unwrap();
        assert_eq!(own.count, 3);
        assert!(own.locked);
    }
    // Every thread made 20 attempts; 3 per identifier were counted.
    assert_eq!(refused, THREADS * 20 - (THREADS + 1) * 3);

    let stats = store.stats();
    assert_eq!(stats.total_tracked, THREADS + 1);
    assert_eq!(stats.currently_locked, THREADS + 1);
    assert!(!stats.paranoid);
    drop(store);

    // What reached disk agrees with what was decided in memory.
    let reopened = LockoutStore::open(
        &home.home().lockout_dir(),
        home.lockout_keys(),
        LockoutPolicy::default(),
    )
    .unwrap();
    assert!(!reopened.is_paranoid());
    assert_eq!(reopened.list_locked().len(), THREADS + 1);
}

#[test]
fn test_concurrent_logging_produces_one_valid_chain() {
    let home = TestHome::new();
    let audit_dir = home.home().audit_dir();
    let chain = Arc::new(
        ChainProtector::open(&audit_dir, home.audit_keys(), ChainConfig::default()).unwrap(),
    );
    let logger = Arc::new(
        AuditLogger::open(audit_dir.join("audit.log"), AuditLoggerConfig::default())
            .unwrap()
            .with_chain(Arc::clone(&chain)),
    );

    let handles: Vec<_> = (0..THREADS as u64)
        .map(|t| {
            let logger = Arc::clone(&logger);
            thread::spawn(move || {
                for n in 0..EVENTS_PER_THREAD {
                    logger.log(test_event(t * 1000 + n)).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let expected = THREADS * EVENTS_PER_THREAD as usize;
    assert_eq!(chain.len(), expected);
    let verification = chain.verify_chain().unwrap();
    assert!(verification.valid, "{:?}", verification.first_issue());
    assert!(chain.verify_witness().is_empty());
    assert!(chain.detect_tampering().unwrap().clean);

    let log = std::fs::read_to_string(audit_dir.join("audit.log")).unwrap();
    assert_eq!(log.lines().count(), expected);
    let indices: Vec<u64> = chain.entries().iter().map(|e| e.index).collect();
    assert_eq!(indices, (0..expected as u64).collect::<Vec<_>>());
}

#[test]
fn test_lockout_events_from_many_threads_stay_chained() {
    let home = TestHome::new();
    let audit_dir = home.home().audit_dir();
    let chain = Arc::new(
        ChainProtector::open(&audit_dir, home.audit_keys(), ChainConfig::default()).unwrap(),
    );
    let logger = Arc::new(
        AuditLogger::open(audit_dir.join("audit.log"), AuditLoggerConfig::default())
            .unwrap()
            .with_chain(Arc::clone(&chain)),
    );
    let store = Arc::new(
        LockoutStore::open(
            &home.home().lockout_dir(),
            home.lockout_keys(),
            LockoutPolicy::default(),
        )
        .unwrap()
        .with_audit_sink(logger.clone()),
    );

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let id = format!("worker-{t}");
                store.record_attempt(&id, false).unwrap();
                store.record_attempt(&id, true).unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // Two AUTH_ATTEMPT events per thread.
    assert_eq!(chain.len(), THREADS * 2);
    assert!(chain.verify_chain().unwrap().valid);
    assert_eq!(store.stats().currently_locked, 0);
    let log = std::fs::read_to_string(audit_dir.join("audit.log")).unwrap();
    assert!(!log.contains("worker-"));
}
