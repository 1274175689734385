
use entitymap::{Entity, MapperConfig, TableDescriptor, Value};
use fake_db::{CallKind, Harness, user_row};
use std::sync::Arc;

#[test]
fn test_repeated_lookup_returns_same_instance() {
    let h = Harness::new();
    h.seed_user(1, "a@x.com", "Alice");

    let first = h.users.get_by_unique_field("email", "a@x.com", false).unwrap().unwrap();
    let calls_after_first = h.db.call_count();
    let second = h.users.get_by_unique_field("email", "a@x.com", false).unwrap().unwrap();
    let by_id = h.users.get_by_id(1, false).unwrap().unwrap();

    assert!(first.same_instance(&second));
    assert!(first.same_instance(&by_id));
    assert_eq!(h.db.call_count(), calls_after_first);
}

#[test]
fn test_case_folded_email_resolves_to_live_entity() {
    let h = Harness::new();

    let user = h.users.create();
    user.set("email", "A@x.com").unwrap();
    user.set("name", "Alice").unwrap();
    user.save().unwrap();

    let id = user.id().unwrap();
    let stored = h.db.row("users", id).unwrap();
    assert_eq!(stored.get("email"), Some(&Value::from("a@x.com")));

    h.db.clear_calls();
    let found = h.users.get_by_unique_field("email", "A@X.com", false).unwrap().unwrap();
    assert!(found.same_instance(&user));
    assert_eq!(h.db.call_count(), 0);
}

#[test]
fn test_missing_row_returns_none() {
    let h = Harness::new();
    assert!(h.users.get_by_unique_field("email", "ghost@x.com", false).unwrap().is_none());
    assert!(h.users.get_by_id(404, true).unwrap().is_none());
}

#[test]
fn test_dropped_entity_is_not_kept_alive() {
    let h = Harness::with_config(MapperConfig::new().use_cache(false));
    h.seed_user(1, "a@x.com", "Alice");

    let first = h.users.get_by_id(1, false).unwrap().unwrap();
    let weak_probe = h.users.lookup_by_id(1).unwrap();
    assert!(weak_probe.is_some());
    drop(weak_probe);
    drop(first);

    assert!(h.users.lookup_by_id(1).unwrap().is_none());
    h.db.clear_calls();
    let again = h.users.get_by_id(1, false).unwrap().unwrap();
    assert_eq!(again.get("name").unwrap(), Value::from("Alice"));
    assert_eq!(h.db.calls()[0].kind, CallKind::FetchRow);
}

#[test]
fn test_load_keeps_existing_in_memory_values() {
    let h = Harness::with_config(MapperConfig::new().use_cache(false));
    h.seed_user(1, "a@x.com", "Alice");

    let live = h.users.get_by_id(1, false).unwrap().unwrap();
    live.set("name", "Alicia").unwrap();

    let reloaded = Entity::load(&h.users, user_row(1, "a@x.com", "Someone Else")).unwrap();
    assert!(reloaded.same_instance(&live));
    assert_eq!(reloaded.get("name").unwrap(), Value::from("Alicia"));
    assert!(reloaded.is_modified());
}

#[test]
fn test_update_identity_map_first_writer_wins() {
    let h = Harness::new();
    let first = h.users.create();
    let second = h.users.create();

    h.users
        .update_identity_map("email", &Value::from("Dup@x.com"), Some(&first))
        .unwrap();
    h.users
        .update_identity_map("email", &Value::from("dup@x.com"), Some(&second))
        .unwrap();

    let mapped = h.users.get_by_unique_field("email", "DUP@x.com", false).unwrap().unwrap();
    assert!(mapped.same_instance(&first));

    h.users
        .update_identity_map("email", &Value::from("dup@x.com"), None)
        .unwrap();
    assert!(h.users.get_by_unique_field("email", "dup@x.com", false).unwrap().is_none());
}

#[test]
fn test_prune_evicts_dead_slots() {
    let h = Harness::with_config(MapperConfig::new().use_cache(false));
    h.db.seed("users", vec![user_row(1, "a@x.com", "A"), user_row(2, "b@x.com", "B")]);

    let kept = h.users.get_by_id(1, false).unwrap().unwrap();
    drop(h.users.get_by_id(2, false).unwrap().unwrap());

    assert_eq!(h.users.prune_identity_maps().unwrap(), 2);
    assert_eq!(h.users.live_entities(), 1);
    drop(kept);
}

#[test]
fn test_concurrent_hydration_yields_one_instance() {
    let h = Harness::with_config(MapperConfig::new().use_cache(false));
    h.seed_user(7, "race@x.com", "Racer");
    let users: Arc<TableDescriptor> = h.users.clone();

    let entities: Vec<Entity> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let users = users.clone();
                scope.spawn(move || {
                    if i % 2 == 0 {
                        users.get_by_id(7, false).unwrap().unwrap()
                    } else {
                        users.get_by_unique_field("email", "RACE@x.com", false).unwrap().unwrap()
                    }
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for entity in &entities[1..] {
        assert!(entity.same_instance(&entities[0]));
    }
    assert_eq!(users.live_entities(), 1);
}
