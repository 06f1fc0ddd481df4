//! End-to-end behavior of stores, watchers and delivery.

use parking_lot::Mutex;
use reactdb_core::{
    ChangeOptions, CoreError, DiagnosticReason, MergeAction, StoreOptions, TestOutcome, Watcher,
};
use reactdb_testkit::prelude::*;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn drafts_store() -> TestStore {
    TestStore::with_schema("s", &drafts_schema())
}

#[test]
fn create_then_update_same_value() {
    let t = TestStore::new();
    t.register_store(
        "s",
        StoreOptions::new().schema(schema_node(&json!({ "x": { "count": "INT" } }))),
        Some(json!({})),
    )
    .unwrap();

    assert!(t.create_data(&["s", "x"], json!({ "count": 5 })).unwrap());
    assert_eq!(t.get(&["s", "x", "count"]).unwrap(), Some(json!(5)));
    assert!(!t.update_data(&["s", "x", "count"], json!(5)).unwrap());
}

#[test]
fn watcher_sees_new_value_once() {
    let t = drafts_store();
    let w = RecordingWatcher::new(0);
    t.get_data(Some(w.watcher()), &["s", "x"], &Mask::Full, None).unwrap();

    t.update_data(&["s", "x", "count"], json!(6)).unwrap();
    assert_eq!(w.call_count(), 0);
    t.tick();
    assert_eq!(w.call_count(), 1);
    assert_eq!(w.last_values(), vec![Some(json!({ "count": 6 }))]);
}

#[test]
fn remove_twice_is_a_quiet_noop() {
    let t = drafts_store();
    t.upsert_data(&["s", "drafts", "d1"], json!({ "editCount": 1 })).unwrap();
    assert!(t.remove_data(&["s", "drafts", "d1"]).unwrap());
    assert!(!t.remove_data(&["s", "drafts", "d1"]).unwrap());
    assert!(t.sink.is_empty());
}

#[test]
fn create_fills_schema_defaults() {
    let t = drafts_store();
    assert!(t.create_data(&["s", "drafts", "d1"], json!({ "editCount": 3 })).unwrap());
    assert_eq!(
        t.get(&["s", "drafts", "d1"]).unwrap(),
        Some(json!({ "editCount": 3, "firstOpen": false, "title": "" }))
    );

    // a second create at the same path is refused
    assert!(!t.create_data(&["s", "drafts", "d1"], json!({ "editCount": 4 })).unwrap());
    assert_eq!(t.sink.reasons(), vec![DiagnosticReason::PathAlreadyExists]);
}

#[test]
fn mutations_within_a_tick_are_batched() {
    let t = drafts_store();
    let w = RecordingWatcher::new(0);
    t.get_data(Some(w.watcher()), &["s", "x", "count"], &Mask::Full, None).unwrap();

    for n in 1..=3 {
        t.update_data(&["s", "x", "count"], json!(n)).unwrap();
    }
    assert_eq!(t.ticker.pending_count(), 1);
    t.tick();
    assert_eq!(w.call_count(), 1);
    assert_eq!(w.last_values(), vec![Some(json!(3))]);
}

#[test]
fn change_and_revert_within_a_tick_is_silent() {
    let t = drafts_store();
    let w = RecordingWatcher::new(0);
    t.get_data(Some(w.watcher()), &["s", "x", "count"], &Mask::Full, None).unwrap();

    t.update_data(&["s", "x", "count"], json!(1)).unwrap();
    t.update_data(&["s", "x", "count"], json!(0)).unwrap();
    t.tick();
    assert_eq!(w.call_count(), 0);
}

#[test]
fn key_set_watch_ignores_nested_edits() {
    let t = drafts_store();
    t.upsert_data(&["s", "drafts", "d1"], json!({ "editCount": 1 })).unwrap();
    t.tick();

    let w = RecordingWatcher::new(0);
    assert_eq!(
        t.get_data(Some(w.watcher()), &["s", "drafts"], &Mask::Ids, None).unwrap(),
        Some(json!({ "d1": 1 }))
    );

    t.update_data(&["s", "drafts", "d1", "editCount"], json!(2)).unwrap();
    t.tick();
    assert_eq!(w.call_count(), 0);

    t.upsert_data(&["s", "drafts", "d2"], json!({ "editCount": 1 })).unwrap();
    t.tick();
    assert_eq!(w.last_values(), vec![Some(json!({ "d1": 1, "d2": 1 }))]);

    t.remove_data(&["s", "drafts", "d1"]).unwrap();
    t.tick();
    assert_eq!(w.call_count(), 2);
    assert_eq!(w.last_values(), vec![Some(json!({ "d2": 1 }))]);
}

#[test]
fn key_set_early_out_is_reported() {
    let t = drafts_store();
    t.upsert_data(&["s", "drafts", "d1"], json!({ "editCount": 1 })).unwrap();
    t.tick();

    let w = RecordingWatcher::new(0);
    t.get_data(Some(w.watcher()), &["s", "drafts"], &Mask::Ids, None).unwrap();
    t.update_data(&["s", "drafts", "d1", "editCount"], json!(9)).unwrap();

    let mut info = Vec::new();
    let triggers = t.triggered_watches(false, &mut info);
    assert!(triggers.is_empty());
    assert_eq!(info.len(), 1);
    assert_eq!(info[0].watch_path, "s/drafts");
    assert_eq!(info[0].outcome, TestOutcome::EarlyUnchanged);
}

#[test]
fn outer_watcher_is_delivered_first() {
    let t = drafts_store();
    let log = DeliveryLog::default();
    let outer = RecordingWatcher::labeled("outer", 0, &log);
    let inner = RecordingWatcher::labeled("inner", 0, &log);
    t.get_data(Some(outer.watcher()), &["s", "x"], &Mask::Full, None).unwrap();
    t.get_data(Some(inner.watcher()), &["s", "x", "count"], &Mask::Full, None).unwrap();

    t.update_data(&["s", "x", "count"], json!(1)).unwrap();
    t.tick();
    assert_eq!(*log.lock(), vec!["outer".to_string(), "inner".to_string()]);
}

#[test]
fn lower_priority_is_delivered_first() {
    let t = drafts_store();
    let log = DeliveryLog::default();
    let late = RecordingWatcher::labeled("late", 5, &log);
    let early = RecordingWatcher::labeled("early", 1, &log);
    t.get_data(Some(late.watcher()), &["s", "x"], &Mask::Full, None).unwrap();
    t.get_data(Some(early.watcher()), &["s", "x"], &Mask::Full, None).unwrap();

    t.update_data(&["s", "x", "count"], json!(1)).unwrap();
    t.tick();
    assert_eq!(*log.lock(), vec!["early".to_string(), "late".to_string()]);
}

#[test]
fn batch_changes_are_ordered_shallow_first() {
    let t = drafts_store();
    let w = RecordingWatcher::new(0);
    t.get_data(Some(w.watcher()), &["s", "x", "count"], &Mask::Full, None).unwrap();
    t.get_data(Some(w.watcher()), &["s", "x"], &Mask::Full, None).unwrap();

    t.update_data(&["s", "x", "count"], json!(4)).unwrap();
    t.tick();
    let batches = w.batches();
    let paths: Vec<&str> = batches[0].iter().map(|c| c.path.as_str()).collect();
    assert_eq!(paths, vec!["s/x", "s/x/count"]);
}

#[test]
fn immediate_watchers_fire_synchronously() {
    let t = drafts_store();
    let w = RecordingWatcher::immediate();
    t.get_data(Some(w.watcher()), &["s", "x", "count"], &Mask::Full, None).unwrap();

    t.update_data(&["s", "x", "count"], json!(2)).unwrap();
    assert_eq!(w.call_count(), 1);
    assert_eq!(w.last_values(), vec![Some(json!(2))]);
    t.tick();
    assert_eq!(w.call_count(), 1);
}

#[test]
fn writes_from_callbacks_land_in_the_next_tick() {
    let t = drafts_store();
    let writer = t.store.clone();
    let reacting = Watcher::new(0, false, move |_, _| {
        writer
            .replace_data(&["s", "tags"], json!(["from-callback"]))
            .unwrap();
    });
    t.get_data(Some(&reacting), &["s", "x"], &Mask::Full, None).unwrap();

    let tags = RecordingWatcher::new(1);
    t.get_data(Some(tags.watcher()), &["s", "tags"], &Mask::Full, None).unwrap();

    t.update_data(&["s", "x", "count"], json!(1)).unwrap();
    assert!(t.ticker.step());
    assert_eq!(tags.call_count(), 0);
    assert!(t.ticker.step());
    assert_eq!(tags.last_values(), vec![Some(json!(["from-callback"]))]);
}

#[test]
fn no_watch_trigger_defers_delivery() {
    let t = drafts_store();
    let w = RecordingWatcher::new(0);
    t.get_data(Some(w.watcher()), &["s", "x"], &Mask::Full, None).unwrap();

    let quiet = ChangeOptions::new().no_watch_trigger(true);
    t.change_data(MergeAction::Update, &["s", "x", "count"], json!(8), &quiet)
        .unwrap();
    assert_eq!(t.tick(), 0);
    assert!(t.scheduler().has_pending());

    t.flush_now();
    assert_eq!(w.last_values(), vec![Some(json!({ "count": 8 }))]);
}

#[test]
fn flush_runs_after_delivery() {
    let t = drafts_store();
    let w = RecordingWatcher::new(0);
    t.get_data(Some(w.watcher()), &["s", "x"], &Mask::Full, None).unwrap();
    t.update_data(&["s", "x", "count"], json!(1)).unwrap();

    let flushed = Arc::new(AtomicUsize::new(0));
    let counter = flushed.clone();
    t.flush(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();
    assert!(matches!(t.flush(|| {}), Err(CoreError::FlushInProgress)));
    assert_eq!(flushed.load(Ordering::SeqCst), 0);

    t.tick();
    assert_eq!(w.call_count(), 1);
    assert_eq!(flushed.load(Ordering::SeqCst), 1);
    assert!(t.flush(|| {}).is_ok());
}

#[test]
fn flush_now_supersedes_the_scheduled_tick() {
    let t = drafts_store();
    let w = RecordingWatcher::new(0);
    t.get_data(Some(w.watcher()), &["s", "x"], &Mask::Full, None).unwrap();
    t.update_data(&["s", "x", "count"], json!(1)).unwrap();

    t.flush_now();
    assert_eq!(w.call_count(), 1);
    t.tick();
    assert_eq!(w.call_count(), 1);
}

#[test]
fn wildcard_watch_sees_every_entry() {
    let t = drafts_store();
    let w = RecordingWatcher::new(0);
    t.add_watch(w.watcher(), &["s", "drafts", "_ids", "editCount"], &Mask::Full, None)
        .unwrap();

    t.upsert_data(&["s", "drafts", "a"], json!({ "editCount": 1 })).unwrap();
    t.upsert_data(&["s", "drafts", "b"], json!({ "editCount": 2 })).unwrap();
    t.tick();

    assert_eq!(
        w.batches()[0],
        vec![
            RecordedChange {
                path: "s/drafts/a/editCount".to_string(),
                data: Some(json!(1)),
            },
            RecordedChange {
                path: "s/drafts/b/editCount".to_string(),
                data: Some(json!(2)),
            },
        ]
    );
}

#[test]
fn soft_failures_keep_existing_values() {
    let t = drafts_store();
    t.update_data(&["s", "x", "count"], json!(2)).unwrap();

    assert!(!t.update_data(&["s", "x"], json!({ "count": "many" })).unwrap());
    assert!(!t.update_data(&["s", "x"], json!({ "bogus": 1 })).unwrap());
    assert!(!t.update_data(&["s", "drafts", "missing", "editCount"], json!(1)).unwrap());
    assert_eq!(t.get(&["s", "x"]).unwrap(), Some(json!({ "count": 2 })));
    assert_eq!(
        t.sink.reasons(),
        vec![
            DiagnosticReason::TypeMismatch,
            DiagnosticReason::UnknownField,
            DiagnosticReason::MissingPath,
        ]
    );
    assert!(t.sink.snapshot()[0].path.starts_with("s/x"));
}

#[test]
fn one_bad_field_does_not_block_the_rest() {
    let t = drafts_store();
    assert!(t
        .update_data(&["s", "settings"], json!({ "theme": "PURPLE", "volume": 0.5 }))
        .unwrap());
    assert_eq!(
        t.get(&["s", "settings"]).unwrap(),
        Some(json!({ "theme": "LIGHT", "volume": 0.5 }))
    );
    assert_eq!(t.sink.reasons(), vec![DiagnosticReason::TypeMismatch]);
}

#[test]
fn forward_feed_accepts_unknown_data() {
    let t = TestStore::new();
    t.register_store(
        "s",
        StoreOptions::new()
            .schema(schema_node(&drafts_schema()))
            .forward_feed(true),
        None,
    )
    .unwrap();
    assert!(t
        .update_data(&["s", "settings"], json!({ "theme": "SEPIA", "newField": 1 }))
        .unwrap());
    assert_eq!(t.get(&["s", "settings", "theme"]).unwrap(), Some(json!("SEPIA")));
    assert_eq!(t.get(&["s", "settings", "newField"]).unwrap(), Some(json!(1)));
    assert!(t.sink.is_empty());
}

#[test]
fn replace_with_object_on_remove() {
    let t = drafts_store();
    t.upsert_data(&["s", "blob"], json!({ "a": { "b": 1 } })).unwrap();
    assert!(t
        .change_data(
            MergeAction::Remove,
            &["s", "blob", "a"],
            json!({ "_replaceWithObject": true }),
            &ChangeOptions::default(),
        )
        .unwrap());
    assert_eq!(t.get(&["s", "blob"]).unwrap(), Some(json!({ "a": {} })));
}

#[test]
fn lists_replace_and_prune() {
    let t = drafts_store();
    t.replace_data(&["s", "tags"], json!(["a", "b", "c"])).unwrap();
    assert_eq!(t.get(&["s", "tags", "1"]).unwrap(), Some(json!("b")));
    assert!(t.replace_data(&["s", "tags"], json!(["a"])).unwrap());
    assert_eq!(t.get(&["s", "tags"]).unwrap(), Some(json!(["a"])));
}

#[test]
fn removing_a_list_element_notifies_shifted_indices() {
    let t = drafts_store();
    t.replace_data(&["s", "tags"], json!(["a", "b", "c"])).unwrap();
    t.tick();

    let w = RecordingWatcher::new(0);
    assert_eq!(
        t.get_data(Some(w.watcher()), &["s", "tags", "1"], &Mask::Full, None).unwrap(),
        Some(json!("b"))
    );

    assert!(t.remove_data(&["s", "tags", "0"]).unwrap());
    t.tick();
    assert_eq!(w.call_count(), 1);
    assert_eq!(w.last_values(), vec![Some(json!("c"))]);
    assert_eq!(t.get(&["s", "tags", "1"]).unwrap(), Some(json!("c")));
}

#[test]
fn nested_json_blob_objects_need_permission() {
    let t = TestStore::with_schema("s", &json!({ "obj": "OBJECT", "blob": "JSONBLOB" }));
    assert!(!t.update_data(&["s"], json!({ "blob": { "a": 1 } })).unwrap());
    assert_eq!(t.sink.reasons(), vec![DiagnosticReason::SubObjectNotAllowed]);

    assert!(t.update_data(&["s"], json!({ "obj": { "a": 1 } })).unwrap());
    assert_eq!(t.get(&["s", "obj"]).unwrap(), Some(json!({ "a": 1 })));

    let allow = ChangeOptions {
        allow_sub_object_create: true,
        ..ChangeOptions::default()
    };
    assert!(t
        .change_data(MergeAction::Update, &["s"], json!({ "blob": { "a": 1 } }), &allow)
        .unwrap());
    assert!(t.replace_data(&["s", "blob"], json!({ "b": 2 })).unwrap());
    assert_eq!(t.get(&["s", "blob"]).unwrap(), Some(json!({ "b": 2 })));
    assert_eq!(t.sink.len(), 1);
}

#[test]
fn code_watch_lifecycle() {
    let t = drafts_store();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let (handle, current) = t
        .add_code_watch(&["s", "x", "count"], &Mask::Full, 0, move |value| {
            sink.lock().push(value.cloned());
        })
        .unwrap();
    assert_eq!(current, Some(json!(0)));

    t.update_data(&["s", "x", "count"], json!(3)).unwrap();
    t.tick();
    assert_eq!(*seen.lock(), vec![Some(json!(3))]);

    t.remove_code_watch(handle);
    assert!(!t.has_watches(&["s", "x", "count"]));
    t.update_data(&["s", "x", "count"], json!(4)).unwrap();
    t.tick();
    assert_eq!(seen.lock().len(), 1);
}

#[test]
fn masked_watch_ignores_unselected_fields() {
    let t = drafts_store();
    t.upsert_data(&["s", "drafts", "d1"], json!({ "editCount": 1, "title": "a" }))
        .unwrap();
    t.tick();

    let w = RecordingWatcher::new(0);
    let mask = Mask::leaves(["title"]);
    assert_eq!(
        t.get_data(Some(w.watcher()), &["s", "drafts", "d1"], &mask, None).unwrap(),
        Some(json!({ "title": "a" }))
    );

    t.update_data(&["s", "drafts", "d1", "editCount"], json!(2)).unwrap();
    t.tick();
    assert_eq!(w.call_count(), 0);

    t.update_data(&["s", "drafts", "d1", "title"], json!("b")).unwrap();
    t.tick();
    assert_eq!(w.last_values(), vec![Some(json!({ "title": "b" }))]);
}

#[test]
fn repeated_reads_share_one_watch() {
    let t = drafts_store();
    let w = RecordingWatcher::new(0);
    for _ in 0..3 {
        t.get_data(Some(w.watcher()), &["s", "x"], &Mask::Full, None).unwrap();
    }
    assert_eq!(w.watcher().watch_count(), 1);
    assert_eq!(t.count_watches(&["s", "x"]), 1);

    w.watcher().remove_watch(&["s", "x"], &Mask::Full);
    assert_eq!(t.count_watches(&["s", "x"]), 0);
}

#[test]
fn defaults_stand_in_for_missing_data() {
    let t = TestStore::new();
    t.register("free", None);
    let defaults = json!({ "name": "anon", "age": 0 });
    assert_eq!(
        t.get_data(None, &["free", "user"], &Mask::Full, Some(&defaults)).unwrap(),
        Some(defaults.clone())
    );
}
