//! Multi-threaded optimistic concurrency tests
//!
//! Validates revision checks and update retry behavior with several writers
//! racing on the same documents.

use kipu_core::{CollectionSchema, FieldType, Fields, Revision, Value};
use kipu_engine::{Changes, Collection, Database, RetryConfig};
use std::sync::{Arc, Barrier};
use std::thread;

fn counters(db: &Arc<Database>) -> Collection {
    db.register_collection(
        CollectionSchema::builder("counters")
            .required("n", FieldType::Int)
            .optional("by", FieldType::String)
            .build()
            .unwrap(),
    )
    .unwrap()
}

fn counter(n: i64) -> Fields {
    let mut f = Fields::new();
    f.insert("n".to_string(), Value::Int(n));
    f
}

// ============================================================================
// Update Races
// ============================================================================

/// Two updates read revision 1; one commits revision 2, the other conflicts,
/// re-reads and commits revision 3.
#[test]
fn test_stale_update_retries_to_next_revision() {
    let db = Database::ephemeral().unwrap();
    let counters = counters(&db);
    let doc = counters.insert(counter(0)).unwrap();
    assert_eq!(doc.revision, Revision::FIRST);

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = ["t1", "t2"]
        .into_iter()
        .map(|name| {
            let counters = counters.clone();
            let barrier = Arc::clone(&barrier);
            let id = doc.id.clone();
            thread::spawn(move || {
                let mut attempts = 0;
                let result = counters.modify(&id, |fields| {
                    attempts += 1;
                    if attempts == 1 {
                        // Both threads hold revision 1 before either commits
                        barrier.wait();
                    }
                    fields.insert("by".to_string(), Value::from(name));
                    Ok(())
                });
                (result.unwrap(), attempts)
            })
        })
        .collect();

    let mut outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    outcomes.sort_by_key(|(doc, _)| doc.revision);

    assert_eq!(outcomes[0].0.revision, Revision::new(2));
    assert_eq!(outcomes[0].1, 1);
    assert_eq!(outcomes[1].0.revision, Revision::new(3));
    assert_eq!(outcomes[1].1, 2);

    let last = counters.get(&doc.id).unwrap().unwrap();
    assert_eq!(last, outcomes[1].0);
}

/// Concurrent increments never lose an update
#[test]
fn test_concurrent_increments_are_atomic() {
    let db = Database::ephemeral().unwrap();
    db.set_retry_config(
        RetryConfig::new()
            .with_max_retries(10_000)
            .with_base_delay_ms(0)
            .with_max_delay_ms(0),
    );
    let counters = counters(&db);
    let doc = counters.insert(counter(0)).unwrap();

    let threads = 4;
    let per_thread = 50;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let counters = counters.clone();
            let barrier = Arc::clone(&barrier);
            let id = doc.id.clone();
            thread::spawn(move || {
                barrier.wait();
                let mut revisions = Vec::new();
                for _ in 0..per_thread {
                    let updated = counters
                        .modify(&id, |fields| {
                            let n = fields.get("n").and_then(Value::as_int).unwrap_or(0);
                            fields.insert("n".to_string(), Value::Int(n + 1));
                            Ok(())
                        })
                        .unwrap();
                    revisions.push(updated.revision.as_u64());
                }
                revisions
            })
        })
        .collect();

    let mut all: Vec<u64> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    all.sort_unstable();

    // Every successful update got its own revision, densely
    let expected: Vec<u64> = (2..=(1 + threads * per_thread) as u64).collect();
    assert_eq!(all, expected);

    let last = counters.get(&doc.id).unwrap().unwrap();
    assert_eq!(last.get_int("n"), Some((threads * per_thread) as i64));
}

/// Without retries the loser sees the conflict
#[test]
fn test_no_retry_surfaces_conflict() {
    let db = Database::ephemeral().unwrap();
    db.set_retry_config(RetryConfig::no_retry());
    let counters = counters(&db);
    let doc = counters.insert(counter(0)).unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let counters = counters.clone();
            let barrier = Arc::clone(&barrier);
            let id = doc.id.clone();
            thread::spawn(move || {
                let mut waited = false;
                counters.modify(&id, |fields| {
                    if !waited {
                        waited = true;
                        barrier.wait();
                    }
                    fields.insert("n".to_string(), Value::Int(1));
                    Ok(())
                })
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| e.is_conflict()));
}

/// Compare-and-set from the same revision: exactly one winner
#[test]
fn test_update_if_single_winner() {
    let db = Database::ephemeral().unwrap();
    let counters = counters(&db);
    let doc = counters.insert(counter(0)).unwrap();

    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let counters = counters.clone();
            let barrier = Arc::clone(&barrier);
            let id = doc.id.clone();
            thread::spawn(move || {
                barrier.wait();
                counters.update_if(&id, Revision::FIRST, &Changes::new().set("n", t as i64))
            })
        })
        .collect();

    let winners = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|r| r.is_ok())
        .count();
    assert_eq!(winners, 1);
    assert_eq!(
        counters.get(&doc.id).unwrap().unwrap().revision,
        Revision::new(2)
    );
}

/// Removal racing with updates: updates after the removal see NotFound
#[test]
fn test_update_after_remove_is_not_found() {
    let db = Database::ephemeral().unwrap();
    let counters = counters(&db);
    let doc = counters.insert(counter(0)).unwrap();
    counters.remove(&doc.id).unwrap();

    let err = counters
        .update(&doc.id, &Changes::new().set("n", 1))
        .unwrap_err();
    assert!(err.is_not_found());
}
