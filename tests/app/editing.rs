//! Concurrent edits on one node

use crate::common::*;
use kipudb::{AuthorId, Changes, Revision};
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn concurrent_set_text_keeps_every_revision() {
    let t = TestApp::new();
    let nodes = t.app.nodes().clone();
    let node = nodes
        .init_text_node("start", &AuthorId::from("alice"))
        .unwrap();
    t.app.database().set_retry_config(
        kipudb::RetryConfig::new()
            .with_max_retries(1_000)
            .with_base_delay_ms(0)
            .with_max_delay_ms(1),
    );

    let writers = 4;
    let barrier = Arc::new(Barrier::new(writers));
    let handles: Vec<_> = (0..writers)
        .map(|w| {
            let nodes = nodes.clone();
            let barrier = Arc::clone(&barrier);
            let id = node.id().clone();
            thread::spawn(move || {
                barrier.wait();
                nodes.set_text(&id, &format!("writer {}", w)).unwrap()
            })
        })
        .collect();

    let mut revisions: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().unwrap().revision())
        .collect();
    revisions.sort();
    let expected: Vec<_> = (2..=1 + writers as u64).map(Revision::new).collect();
    assert_eq!(revisions, expected);

    // Final text is one of the attempted edits, applied whole
    let last = nodes.get(node.id()).unwrap().unwrap();
    assert_eq!(last.revision(), Revision::new(1 + writers as u64));
    assert!(last.text().unwrap().starts_with("writer "));
}

#[test]
fn stale_compare_and_set_is_rejected() {
    let t = TestApp::new();
    let nodes = t.app.nodes();
    let node = nodes.init_text_node("v1", &AuthorId::from("alice")).unwrap();
    nodes.set_text(node.id(), "v2").unwrap();

    let err = nodes
        .collection()
        .update_if(node.id(), node.revision(), &Changes::new().set("text", "v3"))
        .unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(nodes.get(node.id()).unwrap().unwrap().text(), Some("v2"));
}

#[test]
fn invalid_edit_is_rejected_whole() {
    let t = TestApp::new();
    let nodes = t.app.nodes();
    let node = nodes.init_text_node("keep", &AuthorId::from("alice")).unwrap();

    let err = nodes
        .collection()
        .update(
            node.id(),
            &Changes::new().set("text", "changed").unset("authorId"),
        )
        .unwrap_err();
    assert!(err.is_schema_violation());

    let stored = nodes.get(node.id()).unwrap().unwrap();
    assert_eq!(stored.text(), Some("keep"));
    assert_eq!(stored.revision(), Revision::FIRST);
}
