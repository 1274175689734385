
use entitymap::{CacheHandle, EntitySnapshot, MapperConfig, Value};
use fake_db::{CallKind, Harness};

fn redirect_target(bytes: &[u8]) -> i64 {
    rmp_serde::from_slice(bytes).unwrap()
}

#[test]
fn test_save_publishes_snapshot_and_redirects() {
    let h = Harness::new();
    let user = h.users.create();
    user.set("email", "Pub@x.com").unwrap();
    user.set("name", "Pub").unwrap();
    user.save().unwrap();

    let snapshot = EntitySnapshot::from_bytes(&h.cache.get("users:id:1").unwrap()).unwrap();
    assert_eq!(snapshot.id, Some(1));
    assert_eq!(snapshot.values.get("email"), Some(&Value::from("pub@x.com")));
    assert_eq!(snapshot.values.get("name"), Some(&Value::from("Pub")));

    let redirect = h.cache.get("users:email:pub@x.com").unwrap();
    assert_eq!(redirect_target(&redirect), 1);
}

#[test]
fn test_changed_unique_value_moves_cache_entry() {
    let h = Harness::new();
    h.seed_user(1, "old@x.com", "Olga");
    let user = h.users.get_by_id(1, false).unwrap().unwrap();
    assert!(h.cache.contains("users:email:old@x.com"));

    user.set("email", "New@x.com").unwrap();
    assert!(!h.cache.contains("users:email:old@x.com"));
    user.save().unwrap();

    assert!(h.cache.get("users:email:old@x.com").is_none());
    assert_eq!(redirect_target(&h.cache.get("users:email:new@x.com").unwrap()), 1);
    assert!(h.users.get_by_unique_field("email", "old@x.com", false).unwrap().is_none());

    let found = h.users.get_by_unique_field("email", "NEW@x.com", false).unwrap().unwrap();
    assert!(found.same_instance(&user));
}

#[test]
fn test_other_process_resolves_through_cache_redirect() {
    let writer = Harness::new();
    writer.seed_user(1, "shared@x.com", "Sam");
    let original = writer.users.get_by_id(1, false).unwrap().unwrap();

    let reader = Harness::sharing(writer.db.clone(), writer.cache.clone(), MapperConfig::default());
    writer.db.clear_calls();

    let seen = reader
        .users
        .get_by_unique_field("email", "Shared@X.com", false)
        .unwrap()
        .unwrap();
    assert_eq!(writer.db.call_count(), 0);
    assert!(!seen.same_instance(&original));
    assert_eq!(seen.id(), Some(1));
    assert_eq!(seen.get("name").unwrap(), Value::from("Sam"));
    assert_eq!(writer.db.call_count(), 0);

    let by_id = reader.users.get_by_id(1, false).unwrap().unwrap();
    assert!(by_id.same_instance(&seen));
}

#[test]
fn test_snapshot_holds_only_cached_fields() {
    let writer = Harness::new();
    writer.seed_user(1, "a@x.com", "Alice");
    let original = writer.users.get_by_id(1, true).unwrap().unwrap();
    assert!(original.is_loaded("bio"));

    let snapshot = original.snapshot();
    assert!(snapshot.values.contains_key("name"));
    assert!(!snapshot.values.contains_key("bio"));
    assert!(!snapshot.values.contains_key("login_count"));

    let reader = Harness::sharing(writer.db.clone(), writer.cache.clone(), MapperConfig::default());
    let restored = reader.users.get_by_id(1, false).unwrap().unwrap();
    writer.db.clear_calls();

    assert!(!restored.is_loaded("login_count"));
    assert_eq!(restored.get("login_count").unwrap(), Value::Integer(0));
    let calls = writer.db.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].kind, CallKind::FetchOne);
}

#[test]
fn test_unreadable_cache_entry_falls_back_to_database() {
    let h = Harness::new();
    h.seed_user(1, "a@x.com", "Alice");
    h.cache.put("users:id:1", vec![0xc1, 0xc1]);
    h.cache.put("users:email:a@x.com", vec![0xc1]);

    let user = h.users.get_by_unique_field("email", "a@x.com", false).unwrap().unwrap();
    assert_eq!(user.get("name").unwrap(), Value::from("Alice"));
    assert_eq!(h.db.calls()[0].kind, CallKind::FetchRow);

    let snapshot = EntitySnapshot::from_bytes(&h.cache.get("users:id:1").unwrap()).unwrap();
    assert_eq!(snapshot.id, Some(1));
}

#[test]
fn test_stale_redirect_without_snapshot_queries_database() {
    let h = Harness::new();
    h.seed_user(2, "b@x.com", "Bea");
    h.cache.put("users:email:b@x.com", rmp_serde::to_vec(&2i64).unwrap());

    let user = h.users.get_by_unique_field("email", "b@x.com", false).unwrap().unwrap();
    assert_eq!(user.id(), Some(2));
    assert_eq!(
        h.db.statements(),
        vec!["SELECT `id`,`email`,`name`,`login_count`,`created_at`,`updated_at` FROM `users` WHERE `email`=:email"]
    );
}

#[test]
fn test_disabled_cache_is_never_touched() {
    let h = Harness::with_config(MapperConfig::new().use_cache(false));
    h.seed_user(1, "a@x.com", "Alice");
    let user = h.users.get_by_id(1, false).unwrap().unwrap();
    user.set("name", "Alicia").unwrap();
    user.save().unwrap();

    assert!(h.cache.is_empty());
}

#[test]
fn test_refresh_drops_cached_snapshot() {
    let h = Harness::new();
    h.seed_user(1, "a@x.com", "Alice");
    let user = h.users.get_by_id(1, false).unwrap().unwrap();
    assert!(h.cache.contains("users:id:1"));

    user.refresh().unwrap();
    assert!(!h.cache.contains("users:id:1"));
}

#[test]
fn test_unsaved_changes_stay_out_of_cache() {
    let writer = Harness::new();
    writer.seed_user(1, "a@x.com", "Alice");
    let user = writer.users.get_by_id(1, false).unwrap().unwrap();

    user.set("email", "b@x.com").unwrap();
    user.set("name", "Alicia").unwrap();
    assert_eq!(user.get("bio").unwrap(), Value::from("bio of Alice"));

    assert!(!writer.cache.contains("users:email:b@x.com"));
    let snapshot = user.snapshot();
    assert!(!snapshot.values.contains_key("email"));
    assert!(!snapshot.values.contains_key("name"));
    let cached = EntitySnapshot::from_bytes(&writer.cache.get("users:id:1").unwrap()).unwrap();
    assert!(!cached.values.contains_key("name"));

    let reader = Harness::sharing(writer.db.clone(), writer.cache.clone(), MapperConfig::default());
    writer.db.clear_calls();
    assert!(reader.users.get_by_unique_field("email", "b@x.com", false).unwrap().is_none());
    assert_eq!(writer.db.call_count(), 1);

    user.save().unwrap();
    assert_eq!(redirect_target(&writer.cache.get("users:email:b@x.com").unwrap()), 1);
    let cached = EntitySnapshot::from_bytes(&writer.cache.get("users:id:1").unwrap()).unwrap();
    assert_eq!(cached.values.get("name"), Some(&Value::from("Alicia")));
}
