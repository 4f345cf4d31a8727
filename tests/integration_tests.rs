//! End-to-end tests over the SQLite backend

mod common;

use common::{open_test_db, Character, Item, Profile};
use gamedb::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn new_character(name: &str, level: i32, stamina: i32) -> Arc<Character> {
    let character = Character::construct();
    character.set_name(name);
    character.set_level(level);
    character.set_stamina(stamina);
    character
}

fn new_item(owner: Uuid, name: &str, quantity: i32) -> Arc<Item> {
    let item = Item::construct();
    item.set_owner(owner);
    item.set_name(name);
    item.set_quantity(quantity);
    item
}

#[tokio::test]
async fn round_trip_through_change_set() {
    let (db, _store) = open_test_db().await;

    let character = new_character("alice", 12, 100);
    let mut cs = ChangeSet::new();
    cs.insert(character.clone());
    db.process_change_set(cs).await.unwrap();

    let uid = character.state().uuid();
    assert!(!uid.is_nil());
    assert!(!character.state().has_changes());

    // Drop the live instance so the next retrieve hits the database
    drop(character);
    let loaded = db.retrieve::<Character>(uid).await.unwrap().unwrap();
    assert_eq!(loaded.name(), "alice");
    assert_eq!(loaded.level(), 12);
    assert_eq!(loaded.stamina(), 100);
}

#[tokio::test]
async fn cache_returns_one_instance_per_uid() {
    let (db, store) = open_test_db().await;

    let character = new_character("bob", 1, 10);
    let mut cs = ChangeSet::new();
    cs.insert(character.clone());
    db.process_change_set(cs).await.unwrap();
    let uid = character.state().uuid();

    let by_uid = db.retrieve::<Character>(uid).await.unwrap().unwrap();
    let by_name = db
        .retrieve_one_by::<Character>("Name", "bob")
        .await
        .unwrap()
        .unwrap();
    assert!(Arc::ptr_eq(&by_uid, &character));
    assert!(Arc::ptr_eq(&by_name, &character));
    assert_eq!(store.cached_count(), 1);
}

#[tokio::test]
async fn lookup_key_filters_rows() {
    let (db, _store) = open_test_db().await;

    let owner = new_character("carol", 5, 50);
    let mut cs = ChangeSet::new();
    cs.insert(owner.clone());
    db.process_change_set(cs).await.unwrap();
    let owner_uid = owner.state().uuid();

    let mut cs = ChangeSet::new();
    cs.insert(new_item(owner_uid, "Sword", 1));
    cs.insert(new_item(owner_uid, "Shield", 1));
    cs.insert(new_item(Uuid::new_v4(), "Potion", 3));
    db.process_change_set(cs).await.unwrap();

    let owned = db.retrieve_by::<Item>("Owner", owner_uid).await.unwrap();
    assert_eq!(owned.len(), 2);
    assert!(owned.iter().all(|item| item.owner() == owner_uid));
}

#[tokio::test]
async fn standard_change_set_batches_deletes() {
    let (db, _store) = open_test_db().await;

    let owner = Uuid::new_v4();
    let items: Vec<Arc<Item>> = (0..4)
        .map(|i| new_item(owner, &format!("trinket{i}"), 1))
        .collect();
    let mut cs = ChangeSet::new();
    for item in &items {
        cs.insert(item.clone());
    }
    db.process_change_set(cs).await.unwrap();

    // Delete two in one set; the other two survive
    let mut cs = ChangeSet::new();
    cs.delete(items[0].clone());
    cs.delete(items[2].clone());
    db.process_change_set(cs).await.unwrap();

    assert!(items[0].state().is_deleted());
    assert!(items[2].state().is_deleted());
    let remaining = db.retrieve_by::<Item>("Owner", owner).await.unwrap();
    assert_eq!(remaining.len(), 2);
}

#[tokio::test]
async fn standard_change_set_runs_inserts_before_deletes() {
    let (db, _store) = open_test_db().await;

    let old = new_character("zoe", 1, 1);
    let mut cs = ChangeSet::new();
    cs.insert(old.clone());
    db.process_change_set(cs).await.unwrap();

    // Delete queued first, insert second; inserts still run first, so the
    // replacement collides with the old row's unique Name and the set fails
    let replacement = new_character("zoe", 2, 2);
    let mut cs = ChangeSet::new();
    cs.delete(old.clone());
    cs.insert(replacement);
    assert!(db.process_change_set(cs).await.is_err());

    // The rollback left the original row in place
    let survivors = db.retrieve_by::<Character>("Name", "zoe").await.unwrap();
    assert_eq!(survivors.len(), 1);
    assert_eq!(survivors[0].level(), 1);
}

#[tokio::test]
async fn update_writes_only_changed_members() {
    let (db, _store) = open_test_db().await;

    let character = new_character("dave", 1, 10);
    let mut cs = ChangeSet::new();
    cs.insert(character.clone());
    db.process_change_set(cs).await.unwrap();
    let uid = character.state().uuid();

    // Another writer changes Level behind this instance's back
    let mut raw = Statement::prepare("UPDATE \"Character\" SET \"Level\" = :level WHERE \"UID\" = :uid");
    raw.bind("level", 99).unwrap();
    raw.bind("uid", uid).unwrap();
    assert_eq!(db.execute_statement(&raw).await.unwrap(), 1);

    // Saving a Stamina change must not clobber the foreign Level write
    character.set_stamina(50);
    let mut cs = ChangeSet::new();
    cs.update(character.clone());
    db.process_change_set(cs).await.unwrap();

    let mut select = Statement::prepare("SELECT * FROM \"Character\" WHERE \"UID\" = :uid");
    select.bind("uid", uid).unwrap();
    let mut rows = db.query_statement(&select).await.unwrap();
    rows.next().unwrap();
    assert_eq!(rows.get::<i32>("Level").unwrap(), 99);
    assert_eq!(rows.get::<i32>("Stamina").unwrap(), 50);
}

#[tokio::test]
async fn explicit_update_loses_the_second_race() {
    let (db, _store) = open_test_db().await;

    let sword = new_item(Uuid::new_v4(), "Sword", 1);
    let mut cs = ChangeSet::new();
    cs.insert(sword.clone());
    db.process_change_set(cs).await.unwrap();

    // Two consumers both expect a quantity of 1
    let mut first = ExplicitUpdate::new(sword.clone());
    first.apply("Quantity", UpdateOp::Subtract, 1).unwrap();
    let mut second = ExplicitUpdate::new(sword.clone());
    second.apply("Quantity", UpdateOp::Subtract, 1).unwrap();

    let mut cs = ChangeSet::operational(Uuid::nil());
    if let ChangeSet::Operational(ref mut ops) = cs {
        ops.explicit(first);
    }
    db.process_change_set(cs).await.unwrap();
    // The committed conditional write reloads the instance
    assert_eq!(sword.quantity(), 0);

    let mut cs = ChangeSet::operational(Uuid::nil());
    if let ChangeSet::Operational(ref mut ops) = cs {
        ops.explicit(second);
    }
    let err = db.process_change_set(cs).await.unwrap_err();
    assert!(err.is_concurrent_modification());
    assert_eq!(sword.quantity(), 0);
}

#[tokio::test]
async fn reload_failure_after_commit_surfaces() {
    let (db, _store) = open_test_db().await;

    let sword = new_item(Uuid::new_v4(), "Sword", 1);
    let mut cs = ChangeSet::new();
    cs.insert(sword.clone());
    db.process_change_set(cs).await.unwrap();
    let uid = sword.state().uuid();

    // Overdraw: the conditional write commits a quantity the loader rejects
    let mut overdraw = ExplicitUpdate::new(sword.clone());
    overdraw.apply("Quantity", UpdateOp::Subtract, 2).unwrap();
    let mut cs = ChangeSet::operational(Uuid::nil());
    if let ChangeSet::Operational(ref mut ops) = cs {
        ops.explicit(overdraw);
    }
    assert!(db.process_change_set(cs).await.is_err());

    // The commit stood; only the post-commit reload failed
    let mut select = Statement::prepare("SELECT * FROM \"Item\" WHERE \"UID\" = :uid");
    select.bind("uid", uid).unwrap();
    let mut rows = db.query_statement(&select).await.unwrap();
    rows.next().unwrap();
    assert_eq!(rows.get::<i32>("Quantity").unwrap(), -1);
    // The in-memory member is stale, which is exactly what the error reports
    assert_eq!(sword.quantity(), 1);
}

#[tokio::test]
async fn operational_failure_rolls_back_earlier_operations() {
    let (db, _store) = open_test_db().await;

    let character = new_character("erin", 3, 30);
    let mut cs = ChangeSet::new();
    cs.insert(character.clone());
    db.process_change_set(cs).await.unwrap();
    let uid = character.state().uuid();

    let item = new_item(uid, "Gem", 2);
    let mut insert = ChangeSet::new();
    insert.insert(item.clone());
    db.process_change_set(insert).await.unwrap();

    // Update then a conditional write with a stale expectation
    character.set_stamina(90);
    let mut doomed = ExplicitUpdate::new(item.clone());
    doomed
        .apply_from("Quantity", UpdateOp::Set, 5, 7)
        .unwrap();
    let mut cs = ChangeSet::operational(Uuid::nil());
    cs.update(character.clone());
    if let ChangeSet::Operational(ref mut ops) = cs {
        ops.explicit(doomed);
    }
    let err = db.process_change_set(cs).await.unwrap_err();
    assert!(err.is_concurrent_modification());

    // The stamina update that preceded the failure was rolled back
    let mut select = Statement::prepare("SELECT * FROM \"Character\" WHERE \"UID\" = :uid");
    select.bind("uid", uid).unwrap();
    let mut rows = db.query_statement(&select).await.unwrap();
    rows.next().unwrap();
    assert_eq!(rows.get::<i32>("Stamina").unwrap(), 30);
}

#[tokio::test]
async fn queue_commits_everything_in_one_pass() {
    let (db, _store) = open_test_db().await;

    let group = Uuid::new_v4();
    let a = new_character("fay", 1, 1);
    let b = new_character("gus", 2, 2);
    let c = new_character("hal", 3, 3);

    let mut uncorrelated = ChangeSet::new();
    uncorrelated.insert(a.clone());
    let mut grouped1 = ChangeSet::with_group(group);
    grouped1.insert(b.clone());
    let mut grouped2 = ChangeSet::with_group(group);
    grouped2.insert(c.clone());

    db.queue_change_set(grouped1);
    db.queue_change_set(uncorrelated);
    db.queue_change_set(grouped2);
    // grouped1 and grouped2 share a correlation group and merge into one set
    assert_eq!(db.transaction_queue().len(), 2);

    let outcome = db.process_transaction_queue().await;
    assert!(outcome.is_clean());
    assert_eq!(outcome.committed, 2);
    assert!(db.transaction_queue().is_empty());

    let all = db.retrieve_all::<Character>().await.unwrap();
    assert_eq!(all.len(), 3);
}

#[tokio::test]
async fn queueing_the_same_object_twice_inserts_once() {
    let (db, _store) = open_test_db().await;

    let group = Uuid::new_v4();
    let hero = new_character("ida", 5, 5);
    db.queue_insert(hero.clone(), group);
    db.queue_insert(hero.clone(), group);

    let outcome = db.process_transaction_queue().await;
    assert!(outcome.is_clean());
    assert_eq!(outcome.committed, 1);
    assert_eq!(db.retrieve_all::<Character>().await.unwrap().len(), 1);
}

#[tokio::test]
async fn queue_failure_does_not_stop_the_pass() {
    let (db, _store) = open_test_db().await;

    let sword = new_item(Uuid::new_v4(), "Sword", 1);
    let mut insert = ChangeSet::new();
    insert.insert(sword.clone());
    db.process_change_set(insert).await.unwrap();

    let mut stale = ExplicitUpdate::new(sword.clone());
    stale.apply_from("Quantity", UpdateOp::Set, 9, 42).unwrap();
    let mut failing = ChangeSet::operational(Uuid::new_v4());
    if let ChangeSet::Operational(ref mut ops) = failing {
        ops.explicit(stale);
    }

    let survivor = new_character("ivy", 1, 1);
    let mut ok = ChangeSet::with_group(Uuid::new_v4());
    ok.insert(survivor.clone());

    db.queue_change_set(failing);
    db.queue_change_set(ok);
    let outcome = db.process_transaction_queue().await;
    assert_eq!(outcome.committed, 1);
    assert_eq!(outcome.failures.len(), 1);
    assert!(outcome.failures[0].1.is_concurrent_modification());
    assert!(!survivor.state().uuid().is_nil());
}

#[tokio::test]
async fn foreign_rollback_cannot_erase_a_bystander_write() {
    let (db, _store) = open_test_db().await;
    let db = Arc::new(db);

    db.begin_transaction().await.unwrap();
    let doomed = Uuid::new_v4();
    let mut insert = Statement::prepare(
        "INSERT INTO \"Character\" (\"UID\", \"Name\", \"Level\", \"Stamina\") \
         VALUES (:uid, 'doomed', 1, 1)",
    );
    insert.bind("uid", doomed).unwrap();
    db.execute_statement(&insert).await.unwrap();

    // A write from another task must not land inside the open transaction
    let bystander = new_character("lena", 1, 1);
    let writer = {
        let db = Arc::clone(&db);
        let object: Arc<dyn Persistent> = bystander.clone();
        tokio::spawn(async move { db.insert_object(&object).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!writer.is_finished());

    db.rollback_transaction().await.unwrap();
    writer.await.unwrap().unwrap();

    // The bystander's row survived the rollback that erased the owner's
    let survivors = db.retrieve_by::<Character>("Name", "lena").await.unwrap();
    assert_eq!(survivors.len(), 1);
    let mut select = Statement::prepare("SELECT * FROM \"Character\" WHERE \"UID\" = :uid");
    select.bind("uid", doomed).unwrap();
    assert!(db.query_statement(&select).await.unwrap().is_empty());
}

#[tokio::test]
async fn every_column_type_round_trips() {
    let (db, _store) = open_test_db().await;

    let clan = Uuid::new_v4();
    let profile = Profile::construct();
    profile.set_alias("nyx");
    profile.set_portrait(vec![0u8, 159, 146, 150]);
    profile.set_luck(0.25);
    profile.set_winrate(0.875);
    profile.set_premium(true);
    profile.set_playtime(9_000_000_000);
    profile.set_rank(-3);
    profile.set_clan(clan);

    let mut cs = ChangeSet::new();
    cs.insert(profile.clone());
    db.process_change_set(cs).await.unwrap();
    let uid = profile.state().uuid();

    // Drop the live instance so the next retrieve reads the stored row
    drop(profile);
    let loaded = db.retrieve::<Profile>(uid).await.unwrap().unwrap();
    assert_eq!(loaded.alias(), "nyx");
    assert_eq!(loaded.portrait(), vec![0u8, 159, 146, 150]);
    assert_eq!(loaded.luck(), 0.25);
    assert_eq!(loaded.winrate(), 0.875);
    assert!(loaded.premium());
    assert_eq!(loaded.playtime(), 9_000_000_000);
    assert_eq!(loaded.rank(), -3);
    assert_eq!(loaded.clan(), clan);
}

#[tokio::test]
async fn insert_with_preassigned_uid_enters_the_cache() {
    let (db, store) = open_test_db().await;

    let uid = Uuid::new_v4();
    let character = new_character("mia", 1, 1);
    character.state().set_uuid(uid);
    let object: Arc<dyn Persistent> = character.clone();
    db.insert_object(&object).await.unwrap();

    assert!(store.get_cached(uid).is_some());
    let loaded = db.retrieve::<Character>(uid).await.unwrap().unwrap();
    assert!(Arc::ptr_eq(&loaded, &character));
}

#[tokio::test]
async fn references_resolve_lazily() {
    let (db, store) = open_test_db().await;

    let owner = new_character("jan", 4, 40);
    let mut cs = ChangeSet::new();
    cs.insert(owner.clone());
    db.process_change_set(cs).await.unwrap();
    let owner_uid = owner.state().uuid();

    let item = new_item(owner_uid, "Cape", 1);
    let mut cs = ChangeSet::new();
    cs.insert(item.clone());
    db.process_change_set(cs).await.unwrap();

    // Live owner resolves without touching the database
    let reference = item.owner_ref(&store);
    let resolved = reference.get().unwrap();
    assert!(Arc::ptr_eq(&resolved, &owner));

    // Once the owner drops out of the cache, only a load brings it back
    drop(resolved);
    drop(owner);
    assert!(reference.get().is_none());
    let loaded = reference.load(&db).await.unwrap().unwrap();
    assert_eq!(loaded.name(), "jan");
    assert_eq!(loaded.state().uuid(), owner_uid);
}

#[tokio::test]
async fn failed_reference_load_is_sticky() {
    let (db, store) = open_test_db().await;

    let ghost = Uuid::new_v4();
    let reference: ObjectRef<Character> = ObjectRef::with_uuid(&store, ghost);
    assert!(reference.load(&db).await.unwrap().is_none());

    // The row appearing later does not resurrect the reference
    let mut insert = Statement::prepare(
        "INSERT INTO \"Character\" (\"UID\", \"Name\", \"Level\", \"Stamina\") \
         VALUES (:uid, 'ghost', 1, 1)",
    );
    insert.bind("uid", ghost).unwrap();
    db.execute_statement(&insert).await.unwrap();
    assert!(reference.load(&db).await.unwrap().is_none());

    // A fresh reference shares no state with the failed one
    drop(reference);
    let fresh: ObjectRef<Character> = ObjectRef::with_uuid(&store, ghost);
    assert!(fresh.load(&db).await.unwrap().is_some());
}

#[tokio::test]
async fn deleted_object_cannot_be_saved_again() {
    let (db, _store) = open_test_db().await;

    let character = new_character("kim", 1, 1);
    let mut cs = ChangeSet::new();
    cs.insert(character.clone());
    db.process_change_set(cs).await.unwrap();

    let mut cs = ChangeSet::new();
    cs.delete(character.clone());
    db.process_change_set(cs).await.unwrap();

    character.set_level(2);
    let mut cs = ChangeSet::new();
    cs.update(character.clone());
    let err = db.process_change_set(cs).await.unwrap_err();
    assert!(matches!(err, DatabaseError::ObjectDeleted(_)));
}

#[tokio::test]
async fn migrations_apply_once() {
    let (db, _store) = open_test_db().await;

    let mut manager = MigrationManager::new();
    manager
        .add(Migration::reversible(
            1,
            "guild table",
            "CREATE TABLE \"Guild\" (\"UID\" varchar(36) PRIMARY KEY, \"Name\" text)",
            "DROP TABLE \"Guild\"",
        ))
        .unwrap();

    assert_eq!(manager.migrate_up(&db).await.unwrap(), 1);
    assert_eq!(manager.migrate_up(&db).await.unwrap(), 0);
    assert_eq!(manager.applied_versions(&db).await.unwrap(), vec![1]);

    assert_eq!(manager.rollback_last(&db).await.unwrap(), Some(1));
    assert!(manager.applied_versions(&db).await.unwrap().is_empty());
}
