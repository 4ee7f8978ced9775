use fullgrab::protocol::Frame;
use fullgrab::storage::{CaptureRecord, FileStore, Store};

fn frames() -> Vec<Frame> {
    vec![
        Frame { image: vec![0x89, b'P', b'N', b'G'], captured_at_scroll_y: 0.0 },
        Frame { image: vec![1, 2, 3, 4], captured_at_scroll_y: 720.0 },
    ]
}

#[test]
fn file_store_round_trips_and_overwrites() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::open(dir.path().join("state")).unwrap();
    assert!(store.load().unwrap().is_none());

    let first = CaptureRecord::new(Some(&[9u8, 9, 9][..]), &frames(), "First", "https://a.test/");
    store.replace(&first).unwrap();
    assert_eq!(store.load().unwrap(), Some(first));

    let second = CaptureRecord::new(None, &frames()[..1], "Second", "https://b.test/");
    store.replace(&second).unwrap();
    let loaded = store.load().unwrap().unwrap();
    assert_eq!(loaded, second);
    assert_eq!(loaded.image_bytes().unwrap(), None);
}

#[test]
fn persisted_json_uses_downstream_field_names() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::open(dir.path()).unwrap();
    store
        .replace(&CaptureRecord::new(Some(&[1u8][..]), &frames(), "Page", "https://c.test/"))
        .unwrap();

    let raw = std::fs::read_to_string(store.path()).unwrap();
    let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(v["capturedImage"], "data:image/png;base64,AQ==");
    assert_eq!(v["originalCaptures"].as_array().unwrap().len(), 2);
    assert_eq!(v["originalCaptures"][1]["offset"], 720.0);
    assert_eq!(v["pageTitle"], "Page");
    assert_eq!(v["pageUrl"], "https://c.test/");
}

#[test]
fn clear_removes_the_record() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::open(dir.path()).unwrap();
    store.clear().unwrap();
    store
        .save(&CaptureRecord::new(None, &frames(), "Page", "https://c.test/"))
        .unwrap();
    assert!(store.path().exists());
    store.clear().unwrap();
    assert!(!store.path().exists());
    assert!(store.load().unwrap().is_none());
}

#[test]
fn corrupt_state_is_a_storage_error() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::open(dir.path()).unwrap();
    std::fs::write(store.path(), "{not json").unwrap();
    assert!(matches!(store.load(), Err(fullgrab::Error::Storage(_))));
}
