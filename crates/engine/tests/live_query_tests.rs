//! Live query delivery tests
//!
//! Subscriptions observed through the public Database API while writers
//! commit from other threads.

use kipu_core::{CollectionSchema, FieldType, Fields, Predicate, Query, Value};
use kipu_engine::{Changes, Collection, Database};
use std::sync::{Arc, Barrier};
use std::thread;

fn tasks(db: &Arc<Database>) -> Collection {
    db.register_collection(
        CollectionSchema::builder("tasks")
            .required("title", FieldType::String)
            .required("done", FieldType::Bool)
            .optional("priority", FieldType::Int)
            .index("priority")
            .build()
            .unwrap(),
    )
    .unwrap()
}

fn task(title: &str, priority: i64) -> Fields {
    let mut f = Fields::new();
    f.insert("title".to_string(), Value::from(title));
    f.insert("done".to_string(), Value::Bool(false));
    f.insert("priority".to_string(), Value::Int(priority));
    f
}

fn drain(sub: &mut kipu_engine::Subscription) -> Vec<kipu_engine::Snapshot> {
    let mut out = Vec::new();
    while let Some(snapshot) = sub.try_next() {
        out.push(snapshot);
    }
    out
}

// ============================================================================
// Delivery
// ============================================================================

#[test]
fn test_initial_snapshot_then_changes() {
    let db = Database::ephemeral().unwrap();
    let tasks = tasks(&db);
    tasks.insert(task("existing", 1)).unwrap();

    let mut sub = tasks.subscribe(Query::all("tasks")).unwrap();
    let initial = sub.try_next().unwrap();
    assert_eq!(initial.len(), 1);

    let doc = tasks.insert(task("new", 2)).unwrap();
    let next = sub.try_next().unwrap();
    assert_eq!(next.len(), 2);
    assert!(next.version > initial.version);

    tasks
        .update(&doc.id, &Changes::new().set("done", true))
        .unwrap();
    let updated = sub.try_next().unwrap();
    let seen = updated.iter().find(|d| d.id == doc.id).unwrap();
    assert_eq!(seen.fields.get("done"), Some(&Value::Bool(true)));
}

#[test]
fn test_unrelated_write_not_delivered() {
    let db = Database::ephemeral().unwrap();
    let tasks = tasks(&db);
    let q = tasks
        .query()
        .filter(Predicate::gte("priority", 5))
        .build();
    let mut sub = tasks.subscribe(q).unwrap();
    assert!(sub.try_next().unwrap().is_empty());

    // Outside the filter: result unchanged
    tasks.insert(task("low", 1)).unwrap();
    assert!(sub.try_next().is_none());

    tasks.insert(task("high", 9)).unwrap();
    assert_eq!(sub.try_next().unwrap().len(), 1);
}

#[test]
fn test_other_collection_not_delivered() {
    let db = Database::ephemeral().unwrap();
    let tasks = tasks(&db);
    let notes = db
        .register_collection(
            CollectionSchema::builder("notes")
                .required("body", FieldType::String)
                .build()
                .unwrap(),
        )
        .unwrap();

    let mut sub = tasks.subscribe(Query::all("tasks")).unwrap();
    sub.try_next().unwrap();

    let mut body = Fields::new();
    body.insert("body".to_string(), Value::from("hello"));
    notes.insert(body).unwrap();
    assert!(sub.try_next().is_none());
}

#[test]
fn test_versions_increase_under_concurrent_writers() {
    let db = Database::ephemeral().unwrap();
    let tasks = tasks(&db);
    let mut sub = tasks.subscribe(Query::all("tasks")).unwrap();

    let writers = 4;
    let per_writer = 25;
    let barrier = Arc::new(Barrier::new(writers));
    let handles: Vec<_> = (0..writers)
        .map(|w| {
            let tasks = tasks.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..per_writer {
                    tasks.insert(task(&format!("w{}-{}", w, i), i as i64)).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let snapshots = drain(&mut sub);
    assert!(!snapshots.is_empty());
    for pair in snapshots.windows(2) {
        assert!(pair[0].version < pair[1].version);
        assert!(pair[0].len() <= pair[1].len());
    }

    // The last commit's own evaluation always lands
    let last = snapshots.last().unwrap();
    assert_eq!(last.len(), writers * per_writer);
    assert_eq!(last.version, tasks.all().unwrap().version);
}

#[test]
fn test_sorted_limited_live_query() {
    let db = Database::ephemeral().unwrap();
    let tasks = tasks(&db);
    let q = tasks.query().sort_desc("priority").limit(2).build();
    let mut sub = tasks.subscribe(q).unwrap();
    sub.try_next().unwrap();

    for (title, priority) in [("a", 1), ("b", 3), ("c", 2)] {
        tasks.insert(task(title, priority)).unwrap();
    }
    let top = sub.latest().unwrap();
    let titles: Vec<_> = top.iter().filter_map(|d| d.get_str("title")).collect();
    assert_eq!(titles, vec!["b", "c"]);

    // Below the cut-off: no new result
    tasks.insert(task("d", 0)).unwrap();
    assert!(sub.try_next().is_none());
}

// ============================================================================
// Ending
// ============================================================================

#[test]
fn test_nothing_delivered_after_unsubscribe() {
    let db = Database::ephemeral().unwrap();
    let tasks = tasks(&db);
    let mut sub = tasks.subscribe(Query::all("tasks")).unwrap();
    tasks.insert(task("before", 1)).unwrap();
    assert_eq!(db.active_subscriptions(), 1);

    assert!(db.unsubscribe(sub.id()));
    assert_eq!(db.active_subscriptions(), 0);
    tasks.insert(task("late", 2)).unwrap();
    tasks.insert(task("later", 3)).unwrap();

    // Initial snapshot and the one write before unsubscribe, then the end
    let sizes: Vec<usize> = drain(&mut sub).iter().map(|s| s.len()).collect();
    assert_eq!(sizes, vec![0, 1]);
    assert!(sub.blocking_next().is_none());
}

#[test]
fn test_unsubscribe_races_concurrent_writer() {
    let db = Database::ephemeral().unwrap();
    let tasks = tasks(&db);
    let mut sub = tasks.subscribe(Query::all("tasks")).unwrap();

    let writer = {
        let tasks = tasks.clone();
        thread::spawn(move || {
            for i in 0..100 {
                tasks.insert(task(&format!("t{}", i), i)).unwrap();
            }
        })
    };

    while tasks.all().unwrap().len() < 10 {
        thread::yield_now();
    }
    assert!(db.unsubscribe(sub.id()));
    let cutoff = tasks.all().unwrap().version;
    writer.join().unwrap();

    let snapshots = drain(&mut sub);
    assert!(!snapshots.is_empty());
    for pair in snapshots.windows(2) {
        assert!(pair[0].version < pair[1].version);
    }
    assert!(snapshots.iter().all(|s| s.version <= cutoff));
    assert!(sub.blocking_next().is_none());
    assert_eq!(tasks.all().unwrap().len(), 100);
}

#[test]
fn test_dropped_handle_unsubscribes() {
    let db = Database::ephemeral().unwrap();
    let tasks = tasks(&db);
    {
        let _sub = tasks.subscribe(Query::all("tasks")).unwrap();
        let _other = tasks.subscribe(Query::all("tasks")).unwrap();
        assert_eq!(db.active_subscriptions(), 2);
    }
    assert_eq!(db.active_subscriptions(), 0);
}

#[test]
fn test_close_ends_streams() {
    let db = Database::ephemeral().unwrap();
    let tasks = tasks(&db);
    let mut sub = tasks.subscribe(Query::all("tasks")).unwrap();
    tasks.insert(task("queued", 1)).unwrap();

    db.close().unwrap();

    // Already queued snapshots are still readable, then the stream ends
    assert!(sub.blocking_next().is_some());
    assert!(sub.blocking_next().is_some());
    assert!(sub.blocking_next().is_none());

    assert!(tasks.subscribe(Query::all("tasks")).is_err());
}

#[test]
fn test_invalid_live_query_rejected() {
    let db = Database::ephemeral().unwrap();
    let tasks = tasks(&db);
    let q = tasks.query().filter(Predicate::eq("nope", 1)).build();
    assert!(tasks.subscribe(q).is_err());
    assert_eq!(db.active_subscriptions(), 0);
}

// ============================================================================
// Async
// ============================================================================

#[tokio::test]
async fn test_async_next_receives_commits() {
    let db = Database::ephemeral().unwrap();
    let tasks = tasks(&db);
    let mut sub = tasks.subscribe(Query::all("tasks")).unwrap();
    assert!(sub.next().await.unwrap().is_empty());

    let writer = {
        let tasks = tasks.clone();
        thread::spawn(move || {
            tasks.insert(task("from thread", 1)).unwrap();
        })
    };

    let snapshot = sub.next().await.unwrap();
    assert_eq!(snapshot.len(), 1);
    writer.join().unwrap();

    drop(sub);
    assert_eq!(db.active_subscriptions(), 0);
}
