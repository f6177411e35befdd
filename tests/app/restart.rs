//! State surviving close, reopen and compaction

use crate::common::*;
use kipudb::{AppDatabase, AuthorId, Database, Revision};

#[test]
fn nodes_survive_reopen() {
    let mut t = TestApp::new();
    let author = AuthorId::from("alice");
    let text = t.app.nodes().init_text_node("hello", &author).unwrap();
    let file = t
        .app
        .nodes()
        .init_file_node("f", "file:///f.txt", "https://x/f.txt", "txt", &author)
        .unwrap();
    let text = t.app.nodes().set_text(text.id(), "hello again").unwrap();

    t.reopen();

    let nodes = t.app.nodes();
    assert_eq!(nodes.get(text.id()).unwrap().unwrap(), text);
    assert_eq!(nodes.get(file.id()).unwrap().unwrap(), file);

    let next = nodes.set_text(text.id(), "third").unwrap();
    assert_eq!(next.revision(), Revision::new(3));
}

#[test]
fn compaction_keeps_feed_contents() {
    let mut t = TestApp::new();
    let author = AuthorId::from("alice");
    let node = t.app.nodes().init_text_node("0", &author).unwrap();
    for i in 1..=30 {
        t.app.nodes().set_text(node.id(), &i.to_string()).unwrap();
    }
    let info = t.app.database().compact().unwrap().unwrap();
    assert!(info.reclaimed_bytes() > 0);

    t.reopen();
    let mut feed = t.app.nodes().newest_first().unwrap();
    let list = kipudb::nodes_of(feed.try_next().unwrap()).unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].text(), Some("30"));
    assert_eq!(list[0].revision(), Revision::new(31));
}

#[test]
fn standard_durability_flushes_on_close() {
    init_tracing();
    let root = tempfile::TempDir::new().unwrap();
    let dir = kipudb::database_dir(root.path(), "bob").unwrap();

    let id = {
        let db = Database::open_with_config(&dir, standard_config()).unwrap();
        let app = AppDatabase::create(root.path(), "bob").unwrap();
        assert!(std::sync::Arc::ptr_eq(&db, app.database()));
        let node = app
            .nodes()
            .init_text_node("buffered", &AuthorId::from("bob"))
            .unwrap();
        app.close().unwrap();
        node.id().clone()
    };

    let app = AppDatabase::create(root.path(), "bob").unwrap();
    assert_eq!(app.database().config().durability, "standard");
    assert!(app.nodes().get(&id).unwrap().is_some());
}

#[test]
fn writes_after_close_fail() {
    let t = TestApp::new();
    t.app.close().unwrap();
    let err = t
        .app
        .nodes()
        .init_text_node("late", &AuthorId::from("alice"))
        .unwrap_err();
    assert!(matches!(err, kipudb::Error::Closed));
}
