//! Live newest-first feed of nodes

use crate::common::*;
use kipudb::{nodes_of, AuthorId, NodeType};
use std::time::Duration;

fn author() -> AuthorId {
    AuthorId::from("HARDCODED AUTHOR")
}

#[test]
fn feed_starts_empty_and_follows_inserts() {
    let t = TestApp::new();
    let nodes = t.app.nodes();
    let mut feed = nodes.newest_first().unwrap();
    assert!(feed.try_next().unwrap().is_empty());

    let mut created = Vec::new();
    for text in ["one", "two", "three"] {
        created.push(nodes.init_text_node(text, &author()).unwrap());
        std::thread::sleep(Duration::from_millis(2));
    }

    let list = nodes_of(feed.latest().unwrap()).unwrap();
    let texts: Vec<_> = list.iter().filter_map(|n| n.text()).collect();
    assert_eq!(texts, vec!["three", "two", "one"]);
    assert!(list.iter().all(|n| n.author_id() == author()));
}

#[test]
fn feed_mixes_node_types() {
    let t = TestApp::new();
    let nodes = t.app.nodes();
    let mut feed = nodes.newest_first().unwrap();

    nodes.init_text_node("note", &author()).unwrap();
    nodes
        .init_image_node("pic", "file:///pic.jpg", "https://cdn/pic.jpg", &author())
        .unwrap();
    nodes
        .init_file_node("paper", "file:///p.pdf", "https://cdn/p.pdf", "pdf", &author())
        .unwrap();

    let list = nodes_of(feed.latest().unwrap()).unwrap();
    let mut kinds: Vec<_> = list.iter().map(|n| n.node_type()).collect();
    kinds.sort_by_key(|k| k.as_str());
    assert_eq!(kinds, vec![NodeType::File, NodeType::Image, NodeType::Text]);
}

#[test]
fn edit_reaches_feed_without_reordering() {
    let t = TestApp::new();
    let nodes = t.app.nodes();
    let older = nodes.init_text_node("older", &author()).unwrap();
    std::thread::sleep(Duration::from_millis(2));
    let newer = nodes.init_text_node("newer", &author()).unwrap();

    let mut feed = nodes.newest_first().unwrap();
    feed.try_next().unwrap();

    nodes.set_text(older.id(), "older, edited").unwrap();
    let list = nodes_of(feed.try_next().unwrap()).unwrap();
    assert_eq!(list[0].id(), newer.id());
    assert_eq!(list[1].text(), Some("older, edited"));
}

#[test]
fn removed_node_leaves_feed() {
    let t = TestApp::new();
    let nodes = t.app.nodes();
    let node = nodes.init_text_node("temp", &author()).unwrap();
    let mut feed = nodes.newest_first().unwrap();
    assert_eq!(feed.try_next().unwrap().len(), 1);

    nodes.remove(node.id()).unwrap();
    assert!(feed.try_next().unwrap().is_empty());
    assert!(nodes.get(node.id()).unwrap().is_none());
}

#[test]
fn dropping_feed_unsubscribes() {
    let t = TestApp::new();
    let nodes = t.app.nodes();
    let feed = nodes.newest_first().unwrap();
    assert_eq!(t.app.database().active_subscriptions(), 1);
    drop(feed);
    assert_eq!(t.app.database().active_subscriptions(), 0);
}
