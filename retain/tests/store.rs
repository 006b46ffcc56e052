#![cfg(feature = "macros")]

mod common;

use std::sync::{Arc, Mutex};

use common::*;
use retain::{
    codec::Envelope,
    prelude::*,
    store::{ApplyReport, FlushReport},
};

/// Records the order in which its delegates are written.
#[derive(Debug, Host)]
struct LedgerObject {
    id: String,
    log: Arc<Mutex<Vec<&'static str>>>,
}

struct Ledger;

impl Model for Ledger {
    const TYPE_TAG: &'static str = "Ledger";

    type Host = LedgerObject;

    fn declare(schema: &mut SchemaBuilder<LedgerObject>) {
        schema
            .delegate::<i32>("late", |_| 0, |ledger, _| ledger.log.lock().unwrap().push("late"))
            .priority(Priority::LOW);
        schema.delegate::<i32>("mid", |_| 0, |ledger, _| ledger.log.lock().unwrap().push("mid"));
        schema
            .delegate::<i32>("early", |_| 0, |ledger, _| ledger.log.lock().unwrap().push("early"))
            .priority(Priority::HIGH);
    }
}

fn ledger_world() -> (Arc<Mutex<Vec<&'static str>>>, Session) {
    init_tracing();

    let log = Arc::new(Mutex::new(Vec::new()));
    let directory = Arc::new(MemoryDirectory::new());
    directory.insert(LedgerObject {
        id: "l".to_owned(),
        log: log.clone(),
    });
    let session = Session::builder(directory)
        .model::<Ledger>()
        .unwrap()
        .build();

    (log, session)
}

fn packed(priority: Priority, codec: &str, payload: &str) -> String {
    Envelope::new(priority, codec, payload).pack()
}

#[test]
fn test_flush_writes_dirty_once() {
    let (_, session) = world(&["a"]);
    let owner = session.lookup::<Hero>("a").unwrap().unwrap();

    owner.set::<i32>("gold", 42).unwrap();

    assert_eq!(session.flush(), FlushReport { written: 1, failed: 0 });
    assert_eq!(
        session.store().get("Hero:a:gold:i32").as_deref(),
        Some("pv1|0|scalar|42")
    );
    assert!(!owner.attr::<i32>("gold").unwrap().is_dirty());
    assert!(owner.attr::<i32>("gold").unwrap().is_persisted());

    assert_eq!(session.flush(), FlushReport::default());
    assert!(session.store().get("Hero:a:gold:i32").is_some());

    assert!(session.store().remove("Hero:a:gold:i32").is_some());
    assert!(session.store().is_empty());
}

#[test]
fn test_local_value_round_trip() {
    let (_, session) = world(&["a"]);
    let owner = session.lookup::<Hero>("a").unwrap().unwrap();
    assert_eq!(owner.get::<i32>("wage").unwrap(), 10);

    owner.set::<i32>("wage", 25).unwrap();
    session.flush();
    let entries = session.store().entries();
    assert_eq!(entries["Hero:a:wage:i32"], "pv1|500|scalar|25");

    let (_, restored) = world(&["a"]);
    let owner = restored.lookup::<Hero>("a").unwrap().unwrap();
    let wage = owner.attr::<i32>("wage").unwrap();
    restored.store().attach(entries);

    assert_eq!(restored.apply_loaded().applied, 1);
    assert_eq!(wage.get(), 25);
}

#[test]
fn test_host_id_is_escaped_in_keys() {
    let (_, session) = world(&["lord 1"]);
    let owner = session.lookup::<Hero>("lord 1").unwrap().unwrap();

    owner.set::<i32>("gold", 1).unwrap();
    session.flush();

    assert!(session.store().get("Hero:lord%201:gold:i32").is_some());
}

#[test]
fn test_dropped_detached_owner_is_still_flushed() {
    let (_, session) = world(&[]);
    let key = {
        let owner = session.detached::<Hero>(hero("")).unwrap();
        owner.set::<i32>("xp", 8).unwrap();
        owner.attribute("xp").unwrap().key().to_owned()
    };

    assert_eq!(session.flush().written, 1);
    assert!(key.starts_with("Hero#"));
    assert_eq!(session.store().get(&key).as_deref(), Some("pv1|500|scalar|8"));
}

#[test]
fn test_flush_forgets_dropped_owners() {
    let (_, session) = world(&[]);
    let owner = session.detached::<Hero>(hero("")).unwrap();
    owner.set::<i32>("xp", 8).unwrap();
    assert_eq!(session.store().registered_len(), 1);

    drop(owner);
    assert_eq!(session.flush().written, 1);
    assert_eq!(session.store().registered_len(), 0);
}

#[test]
fn test_eager_applies_to_present_hosts() {
    let ids = (0..70).map(|i| format!("h{i}")).collect::<Vec<_>>();
    let (directory, session) = world(&ids.iter().map(String::as_str).collect::<Vec<_>>());

    for i in 0..100 {
        session.store().insert(
            format!("Hero:h{i}:gold:i32"),
            packed(Priority::HIGH, "scalar", &i.to_string()),
        );
    }

    let report = session.apply_loaded_eager();
    assert_eq!(report, ApplyReport { applied: 70, skipped: 30, failed: 0 });
    assert_eq!(directory.get::<HeroObject>("h42").unwrap().read().unwrap().gold, 42);

    // Already applied keys are not applied twice.
    assert_eq!(session.apply_loaded_eager(), ApplyReport { applied: 0, skipped: 30, failed: 0 });
}

#[test]
fn test_eager_falls_back_to_slots_and_locals() {
    let (directory, session) = world(&["a"]);
    session
        .store()
        .insert("Scout:a:gold:i32", packed(Priority::NORMAL, "scalar", "7"));
    session
        .store()
        .insert("Scout:a:mana:i32", packed(Priority::NORMAL, "scalar", "3"));

    assert_eq!(session.apply_loaded_eager().applied, 2);
    assert_eq!(directory.get::<HeroObject>("a").unwrap().read().unwrap().gold, 7);

    let locals = session.locals();
    assert!(locals.is_encoded("Scout:a:mana:i32"));
    let mana = locals.get_or_init::<i32>(
        "Scout:a:mana:i32",
        || 0,
        |payload| i32::decode(payload, &session),
    );
    assert_eq!(mana, 3);
    assert!(!locals.is_encoded("Scout:a:mana:i32"));
}

#[test]
fn test_eager_writes_declared_locals() {
    let (_, session) = world(&["a"]);
    session
        .store()
        .insert("Hero:a:xp:i32", packed(Priority::NORMAL, "scalar", "12"));

    assert_eq!(session.apply_loaded_eager().applied, 1);
    assert!(session.store().is_applied("Hero:a:xp:i32"));

    let owner = session.lookup::<Hero>("a").unwrap().unwrap();
    let xp = owner.attr::<i32>("xp").unwrap();
    assert_eq!(xp.get(), 12);
    assert!(!xp.is_dirty());
    assert!(xp.is_persisted());
}

#[test]
fn test_eager_skips_mismatches_and_counts_failures() {
    let (directory, session) = world(&["a"]);
    let store = session.store();
    store.insert("Hero:a:gold:i32", packed(Priority::NORMAL, "text", "5"));
    store.insert("Hero:a:gold:string", packed(Priority::NORMAL, "scalar", "5"));
    store.insert("Hero:a:morale:f64", packed(Priority::NORMAL, "scalar", "many"));
    store.insert("Dragon:a:gold:i32", packed(Priority::NORMAL, "scalar", "5"));
    store.insert("Hero:a:name:string", "garbage");
    store.insert("Hero#3:xp:i32", packed(Priority::NORMAL, "scalar", "5"));

    let report = session.apply_loaded_eager();

    assert_eq!(report, ApplyReport { applied: 0, skipped: 3, failed: 2 });
    assert_eq!(directory.get::<HeroObject>("a").unwrap().read().unwrap().gold, 0);
}

#[test]
fn test_eager_follows_priority() {
    let (log, session) = ledger_world();
    let store = session.store();
    store.insert("Ledger:l:late:i32", packed(Priority::LOW, "scalar", "1"));
    store.insert("Ledger:l:mid:i32", packed(Priority::NORMAL, "scalar", "1"));
    store.insert("Ledger:l:early:i32", packed(Priority::HIGH, "scalar", "1"));

    assert_eq!(session.apply_loaded_eager().applied, 3);
    assert_eq!(*log.lock().unwrap(), ["early", "mid", "late"]);
}

#[test]
fn test_fragment_follows_priority() {
    let (log, session) = ledger_world();
    let owner = session.lookup::<Ledger>("l").unwrap().unwrap();

    let applied = owner.deserialize(
        r#"{"v":"1","type":"Ledger","id":"l","attrs":{"late":"1","mid":"1","early":"1","gone":"1"}}"#,
    );

    assert_eq!(applied, 3);
    assert_eq!(*log.lock().unwrap(), ["early", "mid", "late"]);
    assert!(!owner.is_dirty());
}

#[test]
fn test_registration_applies_stored_value() {
    let (_, session) = world(&["a"]);
    session
        .store()
        .insert("Hero:a:xp:i32", packed(Priority::NORMAL, "scalar", "12"));

    let owner = session.lookup::<Hero>("a").unwrap().unwrap();
    let xp = owner.attr::<i32>("xp").unwrap();

    assert_eq!(xp.get(), 12);
    assert!(!xp.is_dirty());
    assert!(xp.is_persisted());
    assert_eq!(session.apply_loaded(), ApplyReport::default());
}

#[test]
fn test_lazy_pass_reaches_accessors_created_before_load() {
    let (_, session) = world(&["a"]);
    let owner = session.lookup::<Hero>("a").unwrap().unwrap();
    let xp = owner.attr::<i32>("xp").unwrap();

    session.store().attach([(
        "Hero:a:xp:i32".to_owned(),
        packed(Priority::NORMAL, "scalar", "12"),
    )]);

    assert_eq!(session.apply_loaded().applied, 1);
    assert_eq!(xp.get(), 12);
    assert!(!xp.is_dirty());
}

#[test]
fn test_detached_keys_are_lazy_only() {
    let (_, session) = world(&[]);
    let owner = session.detached::<Hero>(hero("")).unwrap();
    let xp = owner.attr::<i32>("xp").unwrap();
    let key = owner.attribute("xp").unwrap().key().to_owned();

    session
        .store()
        .insert(key, packed(Priority::NORMAL, "scalar", "6"));

    assert_eq!(session.apply_loaded_eager(), ApplyReport::default());
    assert_eq!(session.apply_loaded().applied, 1);
    assert_eq!(xp.get(), 6);
}

#[test]
fn test_lazy_pass_rejects_foreign_codec() {
    let (_, session) = world(&["a"]);
    let owner = session.lookup::<Hero>("a").unwrap().unwrap();
    let xp = owner.attr::<i32>("xp").unwrap();

    session
        .store()
        .insert("Hero:a:xp:i32", packed(Priority::NORMAL, "text", "12"));

    assert_eq!(session.apply_loaded().failed, 1);
    assert_eq!(xp.get(), 0);
}
