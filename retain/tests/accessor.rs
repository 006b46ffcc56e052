#![cfg(feature = "macros")]

mod common;

use std::sync::Arc;

use common::*;
use retain::prelude::*;

struct Loop;

impl Model for Loop {
    const TYPE_TAG: &'static str = "Loop";

    type Host = HeroObject;

    fn declare(schema: &mut SchemaBuilder<HeroObject>) {
        schema.local::<i32>("ping", 0).depends_on(["pong"]);
        schema.local::<i32>("pong", 0).depends_on(["ping"]);
    }
}

struct Tally;

impl Model for Tally {
    const TYPE_TAG: &'static str = "Tally";

    type Host = HeroObject;

    fn declare(schema: &mut SchemaBuilder<HeroObject>) {
        schema.local::<i32>("count", 0).persistent(false);
        schema.local::<i32>("total", 0).depends_on(["count"]);
    }
}

#[test]
fn test_slot_accessor_reads_and_writes_host() {
    let (directory, session) = world(&["a"]);
    let host = directory.get::<HeroObject>("a").unwrap();
    let owner = session.wrap::<Hero>(&host).unwrap();

    let gold = owner.attr::<i32>("gold").unwrap();
    gold.set(42);
    assert_eq!(host.read().unwrap().gold, 42);
    assert!(gold.is_dirty());

    host.write().unwrap().gold = 7;
    assert_eq!(gold.get(), 7);

    gold.update(|gold| *gold += 1);
    assert_eq!(host.read().unwrap().gold, 8);
}

#[test]
fn test_delegate_and_local_bindings() {
    let (directory, session) = world(&["a"]);
    let owner = session.lookup::<Hero>("a").unwrap().unwrap();

    owner.set::<i64>("renown", 9).unwrap();
    assert_eq!(directory.get::<HeroObject>("a").unwrap().read().unwrap().renown, 9);

    assert_eq!(owner.get::<i32>("wage").unwrap(), 10);
    assert_eq!(session.locals().get::<i32>("Hero:a:wage:i32"), Some(10));

    owner.set::<i32>("wage", 12).unwrap();
    assert_eq!(owner.get::<i32>("wage").unwrap(), 12);
}

#[test]
fn test_accessors_are_created_once() {
    let (_, session) = world(&["a"]);
    let owner = session.lookup::<Hero>("a").unwrap().unwrap();

    let first = owner.attr::<i32>("xp").unwrap();
    let second = owner.attr::<i32>("xp").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn test_type_conflict_and_unknown_attribute() {
    let (_, session) = world(&["a"]);
    let owner = session.lookup::<Hero>("a").unwrap().unwrap();

    assert!(matches!(
        owner.attr::<String>("gold").err(),
        Some(ConfigError::TypeConflict { attr, .. }) if attr == "gold"
    ));
    assert_eq!(
        owner.attr::<i32>("mana").err(),
        Some(ConfigError::UnknownAttribute {
            owner: "Hero",
            attr: "mana".to_owned(),
        })
    );
}

#[test]
fn test_dirty_propagates_to_dependents() {
    let (_, session) = world(&["a"]);
    let owner = session.lookup::<Hero>("a").unwrap().unwrap();

    let wage = owner.attr::<i32>("wage").unwrap();
    let gold = owner.attr::<i32>("gold").unwrap();
    assert!(!wage.is_dirty());

    gold.set(5);
    assert!(wage.is_dirty());
    assert_eq!(session.store().dirty_len(), 2);
}

#[test]
fn test_dependent_created_late_catches_up() {
    let (_, session) = world(&["a"]);
    let owner = session.lookup::<Hero>("a").unwrap().unwrap();

    owner.set::<Tier>("tier", Tier::Veteran).unwrap();
    let wage = owner.attr::<i32>("wage").unwrap();

    assert!(wage.is_dirty());
}

#[test]
fn test_dependency_cycle_terminates() {
    init_tracing();

    let directory = Arc::new(MemoryDirectory::new());
    let host = directory.insert(hero("a"));
    let session = Session::builder(directory.clone())
        .model::<Loop>()
        .unwrap()
        .build();
    let owner = session.wrap::<Loop>(&host).unwrap();

    let ping = owner.attr::<i32>("ping").unwrap();
    let pong = owner.attr::<i32>("pong").unwrap();
    ping.set(1);

    assert!(ping.is_dirty());
    assert!(pong.is_dirty());
    assert_eq!(session.flush().written, 2);
}

#[test]
fn test_apply_scope_suppresses_dirty() {
    let (_, session) = world(&["a"]);
    let owner = session.lookup::<Hero>("a").unwrap().unwrap();
    let gold = owner.attr::<i32>("gold").unwrap();

    {
        let _scope = session.store().begin_applying();
        gold.set(3);
    }
    assert!(!gold.is_dirty());
    assert_eq!(gold.get(), 3);

    gold.set(4);
    assert!(gold.is_dirty());
}

#[test]
fn test_non_persistent_attribute_never_reaches_the_store() {
    let (_, session) = world(&["a"]);
    let owner = session.lookup::<Hero>("a").unwrap().unwrap();

    owner.set::<i32>("scratch", 3).unwrap();

    assert!(owner.attr::<i32>("scratch").unwrap().is_dirty());
    assert_eq!(session.flush().written, 0);
    assert!(session.store().is_empty());
    assert!(!owner.attr::<i32>("scratch").unwrap().is_dirty());
}

#[test]
fn test_non_persistent_upstream_dirties_dependents_after_flush() {
    init_tracing();

    let directory = Arc::new(MemoryDirectory::new());
    let host = directory.insert(hero("a"));
    let session = Session::builder(directory.clone())
        .model::<Tally>()
        .unwrap()
        .build();
    let owner = session.wrap::<Tally>(&host).unwrap();

    let count = owner.attr::<i32>("count").unwrap();
    let total = owner.attr::<i32>("total").unwrap();

    count.set(1);
    assert!(total.is_dirty());
    assert_eq!(session.flush().written, 1);
    assert!(!count.is_dirty());
    assert!(!total.is_dirty());

    count.set(2);
    assert!(count.is_dirty());
    assert!(total.is_dirty());
    assert_eq!(session.flush().written, 1);
}
