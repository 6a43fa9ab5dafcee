//! The mutation pipeline end to end: validation, meta stamping, history,
//! hooks, schema lifecycle and configuration switches.

use proptest::prelude::*;
use serde_json::{json, Value};
use sis_core::manager::apply_update;
use sis_core::schema::SchemaCompiler;
use sis_core::{Config, DeleteOptions, Event, Registry};
use sis_storage::{Document, DocumentStore, Filter, Page};
use std::sync::Arc;
use std::time::Duration;
use sis_testkit::prelude::*;

async fn hosts_registry() -> TestRegistry {
    sis_testkit::logging::init();
    let t = TestRegistry::new().await;
    t.add_schema(schema(
        "hosts",
        &[GROUP_1],
        json!({
            "hostname": { "type": "String", "required": true, "unique": true },
            "port": { "type": "Number", "min": 1, "max": 65535, "default": 22 },
            "env": { "type": "String", "enum": ["dev", "prod"] },
            "location": { "rack": "String", "row": "Number" }
        }),
    ))
    .await;
    t
}

#[tokio::test]
async fn inserts_are_validated_and_stamped() {
    let t = hosts_registry().await;
    let admin = admin_of("admin1", &[GROUP_1]);

    let saved = t
        .add_entity(
            "hosts",
            json!({ "hostname": "web01", "env": "dev", "junk": true }),
            &admin,
        )
        .await
        .unwrap();

    assert_eq!(saved["port"], 22);
    assert!(saved.get("junk").is_none());
    assert_eq!(saved["_v"], 0);
    assert_eq!(saved["_sis"]["_created_by"], "admin1");
    assert_eq!(saved["_sis"]["_version"], "v1.1");

    for (entity, message) in [
        (json!({ "env": "dev" }), "Bad request: hostname is required"),
        (json!({ "hostname": "x", "_secret": 1 }), "Bad request: _secret is a reserved field"),
        (
            json!({ "hostname": "x", "_sis": { "_created_by": "me" } }),
            "Bad request: _sis._created_by is a reserved field",
        ),
    ] {
        let err = t.add_entity("hosts", entity, &admin).await.unwrap_err();
        assert_eq!(err.to_string(), message);
    }

    let err = t
        .add_entity("hosts", json!({ "hostname": "x", "env": "qa" }), &admin)
        .await
        .unwrap_err();
    assert_eq!(err.status(), 400);
    let err = t
        .add_entity("hosts", json!({ "hostname": "x", "port": 70000 }), &admin)
        .await
        .unwrap_err();
    assert_eq!(err.status(), 400);
}

#[tokio::test]
async fn unique_collisions_are_bad_requests() {
    let t = hosts_registry().await;
    let root = superman();
    t.add_entity("hosts", json!({ "hostname": "web01" }), &root)
        .await
        .unwrap();
    let err = t
        .add_entity("hosts", json!({ "hostname": "web01" }), &root)
        .await
        .unwrap_err();
    assert_eq!(err.status(), 400);
    assert_eq!(err.code(), 1001);
}

#[tokio::test]
async fn updates_merge_field_by_field() {
    let t = hosts_registry().await;
    let root = superman();
    let saved = t
        .add_entity(
            "hosts",
            json!({ "hostname": "web01", "env": "dev", "location": { "rack": "r1", "row": 2 } }),
            &root,
        )
        .await
        .unwrap();
    let hosts = t.entities("hosts").unwrap();

    let updated = hosts
        .update(
            &id_of(&saved),
            doc(json!({
                "env": null,
                "location": { "row": "3" },
                "unknown": 1,
                "_v": 99
            })),
            Some(&root),
        )
        .await
        .unwrap();

    assert!(updated.get("env").is_none());
    assert_eq!(updated["location"], json!({ "rack": "r1", "row": 3 }));
    assert!(updated.get("unknown").is_none());
    assert_eq!(updated["_v"], 1);
    assert_eq!(updated["_sis"]["_created_by"], "superman");
    assert_eq!(updated["_sis"]["_updated_by"], "superman");

    let err = hosts
        .update(&id_of(&saved), doc(json!({ "hostname": null })), Some(&root))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Bad request: hostname is required");
}

#[tokio::test]
async fn unknown_ids_are_not_found() {
    let t = hosts_registry().await;
    let hosts = t.entities("hosts").unwrap();
    let root = superman();

    let err = hosts.get("not-an-id").await.unwrap_err();
    assert_eq!(err.status(), 404);
    assert_eq!(err.to_string(), "hosts not-an-id does not exist");

    let missing = sis_storage::DocumentId::new().to_string();
    let err = hosts
        .update(&missing, doc(json!({ "env": "dev" })), Some(&root))
        .await
        .unwrap_err();
    assert_eq!(err.status(), 404);
    assert_eq!(hosts.delete(&missing, Some(&root)).await.unwrap_err().status(), 404);
    assert!(!hosts.exists(&missing).await.unwrap());

    let err = t.entities("nope").unwrap_err();
    assert_eq!(err.to_string(), "sis_schemas nope does not exist");
}

#[tokio::test]
async fn locked_and_immutable_entities_resist_changes() {
    let t = hosts_registry().await;
    let root = superman();
    let hosts = t.entities("hosts").unwrap();

    let locked = t
        .add_entity("hosts", json!({ "hostname": "a", "_sis": { "locked": true } }), &root)
        .await
        .unwrap();
    hosts
        .update(&id_of(&locked), doc(json!({ "env": "prod" })), Some(&root))
        .await
        .unwrap();
    let err = hosts.delete(&id_of(&locked), Some(&root)).await.unwrap_err();
    assert_eq!(err.status(), 400);

    let frozen = t
        .add_entity("hosts", json!({ "hostname": "b", "_sis": { "immutable": true } }), &root)
        .await
        .unwrap();
    let id = id_of(&frozen);
    let err = hosts
        .update(&id, doc(json!({ "env": "prod" })), Some(&root))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), format!("Bad request: hosts {id} is immutable"));
    assert_eq!(hosts.delete(&id, Some(&root)).await.unwrap_err().status(), 400);

    hosts
        .update(&id, doc(json!({ "env": "prod", "_sis": { "immutable": false } })), Some(&root))
        .await
        .unwrap();
    hosts.delete(&id, Some(&root)).await.unwrap();
}

#[tokio::test]
async fn commits_record_every_mutation() {
    let t = hosts_registry().await;
    let root = superman();
    let hosts = t.entities("hosts").unwrap();
    let saved = t
        .add_entity("hosts", json!({ "hostname": "web01", "env": "dev" }), &root)
        .await
        .unwrap();
    let id = id_of(&saved);
    hosts
        .update(&id, doc(json!({ "env": "prod" })), Some(&root))
        .await
        .unwrap();
    hosts.delete(&id, Some(&root)).await.unwrap();

    let history = t.history("hosts", &id).await.unwrap();
    let actions: Vec<Event> = history.iter().map(|c| c.action).collect();
    assert_eq!(actions, [Event::Insert, Event::Update, Event::Delete]);
    assert_eq!(history[0].commit_data["hostname"], "web01");
    assert_eq!(history[1].commit_data["env"], json!(["dev", "prod"]));
    assert_eq!(history[1].entity_oid, id);
    assert!(history.iter().all(|c| c.modified_by.as_deref() == Some("superman")));

    let schema_history = t.history("sis_schemas", "hosts").await.unwrap();
    assert_eq!(schema_history.len(), 1);
}

#[tokio::test]
async fn history_is_skipped_when_disabled() {
    let t = TestRegistry::new().await;
    let mut quiet = schema("quiet", &[GROUP_1], json!({ "name": "String" }));
    quiet.track_history = false;
    t.add_schema(quiet).await;
    let saved = t
        .add_entity("quiet", json!({ "name": "q" }), &superman())
        .await
        .unwrap();
    assert!(t.history("quiet", &id_of(&saved)).await.unwrap().is_empty());

    let off = TestRegistry::with_config(Config::default().log_commits(false)).await;
    off.add_schema(schema("loud", &[GROUP_1], json!({ "name": "String" })))
        .await;
    assert!(off.store.snapshot("sis_commits").is_empty());
}

#[tokio::test]
async fn hooks_fire_for_matching_events() {
    let t = hosts_registry().await;
    let root = superman();
    t.hooks()
        .add(
            doc(json!({
                "name": "host_changes",
                "target": { "url": "http://hooks.test/hosts", "action": "POST" },
                "events": ["insert", "update"],
                "entity_type": "hosts",
                "retry_count": 3,
                "_sis": { "owner": [GROUP_1] }
            })),
            Some(&root),
        )
        .await
        .unwrap();

    let saved = t
        .add_entity("hosts", json!({ "hostname": "web01" }), &root)
        .await
        .unwrap();
    t.entities("hosts")
        .unwrap()
        .delete(&id_of(&saved), Some(&root))
        .await
        .unwrap();

    let fired = t.hooks.firings();
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].hook.retry_count, 3);
    assert_eq!(fired[0].hook.retry_delay, 1);
    assert_eq!(fired[0].payload.event, Event::Insert);
    assert_eq!(fired[0].payload.entity_type, "hosts");
    assert_eq!(fired[0].payload.data["hostname"], "web01");
    assert_eq!(fired[0].payload.actor.as_deref(), Some("superman"));
    assert!(t.hooks.firings_of(Event::Delete).is_empty());

    let err = t
        .hooks()
        .add(
            doc(json!({
                "name": "nowhere",
                "target": { "url": "http://hooks.test", "action": "POST" },
                "events": ["insert"],
                "entity_type": "missing",
                "_sis": { "owner": [GROUP_1] }
            })),
            Some(&root),
        )
        .await
        .unwrap_err();
    assert_eq!(err.status(), 400);
}

#[tokio::test]
async fn failed_dispatch_keeps_the_write() {
    let t = TestRegistry::with_failing_hooks(Config::default()).await;
    let root = superman();
    t.add_schema(schema("hosts", &[GROUP_1], json!({ "hostname": "String" })))
        .await;
    t.hooks()
        .add(
            doc(json!({
                "name": "broken",
                "target": { "url": "http://down.test", "action": "PUT" },
                "events": ["insert"],
                "entity_type": "hosts",
                "_sis": { "owner": [GROUP_1] }
            })),
            Some(&root),
        )
        .await
        .unwrap();

    let saved = t
        .add_entity("hosts", json!({ "hostname": "web01" }), &root)
        .await
        .unwrap();
    assert_eq!(t.hooks.firings().len(), 1);
    assert!(t.entities("hosts").unwrap().exists(&id_of(&saved)).await.unwrap());
}

#[tokio::test]
async fn schema_lifecycle() {
    let t = TestRegistry::new().await;
    let root = superman();
    let schemas = t.schemas();

    let mut hosts = schema("hosts", &[GROUP_1], json!({ "name": "String", "ip": "String" }));
    hosts.locked_fields = vec!["name".into()];
    let saved = schemas.add(hosts.to_document(), Some(&root)).await.unwrap();
    assert_eq!(saved["_references"], json!([]));

    let err = schemas
        .update("hosts", doc(json!({ "definition": { "ip": "String" } })), Some(&root))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Bad request: Cannot remove locked field name");

    let updated = schemas
        .update(
            "hosts",
            doc(json!({ "definition": { "name": "String", "ip": "String", "rack": "Number" } })),
            Some(&root),
        )
        .await
        .unwrap();
    assert_eq!(updated["_v"], 1);
    let compiled = t.catalog().get("hosts").unwrap();
    assert_eq!(compiled.version, 1);
    assert!(compiled.model.field("rack").is_some());

    let rejected = [
        ("sis_things", vec![GROUP_1]),
        ("Bad-Name", vec![GROUP_1]),
        ("ownerless", vec![]),
    ];
    for (name, owners) in rejected {
        let err = schemas
            .add(schema(name, &owners, json!({ "a": "String" })).to_document(), Some(&root))
            .await
            .unwrap_err();
        assert_eq!(err.status(), 400, "{name}");
    }
    let err = schemas
        .add(schema("hosts", &[GROUP_1], json!({ "a": "String" })).to_document(), Some(&root))
        .await
        .unwrap_err();
    assert_eq!(err.status(), 400);

    t.add_entity("hosts", json!({ "name": "web01" }), &root)
        .await
        .unwrap();
    let err = schemas.delete("hosts", Some(&root)).await.unwrap_err();
    assert_eq!(err.status(), 400);

    schemas
        .delete_with("hosts", Some(&root), DeleteOptions::forced())
        .await
        .unwrap();
    assert!(!t.catalog().contains("hosts"));
    assert!(t.store.snapshot("hosts").is_empty());
    assert_eq!(t.entities("hosts").unwrap_err().status(), 404);
}

#[tokio::test]
async fn locked_schemas_cannot_be_deleted() {
    let t = TestRegistry::new().await;
    let mut pinned = schema("pinned", &[GROUP_1], json!({ "name": "String" }));
    pinned.sis_locked = true;
    t.add_schema(pinned).await;
    let err = t
        .schemas()
        .delete_with("pinned", Some(&superman()), DeleteOptions::forced())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Bad request: Schema pinned is locked");
}

#[tokio::test]
async fn unique_fields_over_colliding_entities_are_rejected() {
    let t = TestRegistry::new().await;
    let root = superman();
    t.add_schema(schema("dups", &[GROUP_1], json!({ "name": "String" })))
        .await;
    for _ in 0..2 {
        t.add_entity("dups", json!({ "name": "a" }), &root)
            .await
            .unwrap();
    }

    let writes = t.writes();
    let err = t
        .schemas()
        .update(
            "dups",
            doc(json!({ "definition": { "name": { "type": "String", "unique": true } } })),
            Some(&root),
        )
        .await
        .unwrap_err();
    assert_eq!(err.status(), 400);
    assert_eq!(t.writes(), writes);

    let stored = t.schemas().get("dups").await.unwrap();
    assert_eq!(stored["definition"], json!({ "name": "String" }));
    assert_eq!(stored["_v"], 0);
    assert_eq!(t.catalog().get("dups").unwrap().version, 0);
    t.add_entity("dups", json!({ "name": "a" }), &root)
        .await
        .unwrap();

    t.add_schema(schema("fresh", &[GROUP_1], json!({ "name": "String" })))
        .await;
    t.add_entity("fresh", json!({ "name": "a" }), &root)
        .await
        .unwrap();
    t.schemas()
        .update(
            "fresh",
            doc(json!({ "definition": { "name": { "type": "String", "unique": true } } })),
            Some(&root),
        )
        .await
        .unwrap();
    assert_eq!(t.catalog().get("fresh").unwrap().version, 1);
    let err = t
        .add_entity("fresh", json!({ "name": "a" }), &root)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Bad request: duplicate value \"a\" for unique field name");
}

#[tokio::test]
async fn references_need_registered_targets() {
    let t = TestRegistry::new().await;
    let err = t
        .schemas()
        .add(
            schema("ref_2", &[GROUP_1], json!({ "refs": [{ "type": "ObjectId", "ref": "ref_1" }] }))
                .to_document(),
            Some(&superman()),
        )
        .await
        .unwrap_err();
    assert_eq!(err.status(), 400);
}

#[tokio::test]
async fn reopening_reloads_stored_schemas() {
    let t = TestRegistry::new().await;
    let root = superman();
    t.add_schema(schema("ref_1", &[GROUP_1], json!({ "name": "String" })))
        .await;
    t.add_schema(schema(
        "ref_2",
        &[GROUP_1],
        json!({ "one": { "type": "ObjectId", "ref": "ref_1" } }),
    ))
    .await;
    let target = t
        .add_entity("ref_1", json!({ "name": "foo" }), &root)
        .await
        .unwrap();

    let backend: Arc<dyn DocumentStore> = t.store.clone();
    let reopened = Registry::open(backend).await.unwrap();
    assert_eq!(reopened.catalog().names(), ["ref_1", "ref_2"]);
    assert_eq!(reopened.catalog().dependents("ref_1"), ["ref_2"]);

    reopened
        .entities("ref_2")
        .unwrap()
        .add(doc(json!({ "one": id_of(&target) })), Some(&root))
        .await
        .unwrap();
}

#[tokio::test]
async fn lists_are_paged_and_capped() {
    let t = TestRegistry::with_config(Config::default().max_results(2)).await;
    let root = superman();
    t.add_schema(schema("items", &[GROUP_1], json!({ "n": "Number", "kind": "String" })))
        .await;
    for n in 0..5 {
        let kind = if n % 2 == 0 { "even" } else { "odd" };
        t.add_entity("items", json!({ "n": n, "kind": kind }), &root)
            .await
            .unwrap();
    }
    let items = t.entities("items").unwrap();

    let page = items.list(&Filter::new(), Page::all()).await.unwrap();
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.total, 5);

    let odd = items
        .list(&Filter::new().eq("kind", "odd"), Page::new(1, 10))
        .await
        .unwrap();
    assert_eq!(odd.total, 2);
    assert_eq!(odd.items.len(), 1);
    assert_eq!(odd.items[0]["n"], 3);
}

#[tokio::test]
async fn readonly_rejects_every_mutation() {
    let t = TestRegistry::with_config(Config::default().readonly(true)).await;
    let writes = t.writes();
    let err = t
        .schemas()
        .add(
            schema("hosts", &[GROUP_1], json!({ "name": "String" })).to_document(),
            Some(&superman()),
        )
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Bad request: SIS is in readonly mode");
    assert_eq!(t.writes(), writes);
}

#[tokio::test]
async fn timeouts_abort_before_persist() {
    let config = Config::default().operation_timeout(Duration::from_millis(20));
    let t = TestRegistry::delayed(config, Duration::from_millis(200)).await;
    let root = superman();
    t.add_schema(schema("hosts", &[GROUP_1], json!({ "name": "String" })))
        .await;
    let saved = t
        .add_entity("hosts", json!({ "name": "web01" }), &root)
        .await
        .unwrap();

    let writes = t.writes();
    let err = t
        .entities("hosts")
        .unwrap()
        .update(&id_of(&saved), doc(json!({ "name": "web02" })), Some(&root))
        .await
        .unwrap_err();
    assert_eq!(err.status(), 500);
    assert_eq!(t.writes(), writes);
    assert_eq!(t.store.snapshot("hosts")[0]["name"], "web01");
}

#[tokio::test]
async fn hiera_entries_are_owner_scoped() {
    let t = TestRegistry::new().await;
    let hiera = t.hiera();
    let admin1 = admin_of("admin1", &[GROUP_1]);
    let admin2 = admin_of("admin2", &[GROUP_2]);

    hiera
        .add(
            doc(json!({
                "name": "common",
                "hieradata": { "ntp": "pool.ntp.org" },
                "_sis": { "owner": [GROUP_1] }
            })),
            Some(&admin1),
        )
        .await
        .unwrap();
    let err = hiera
        .update("common", doc(json!({ "hieradata": { "ntp": "x" } })), Some(&admin2))
        .await
        .unwrap_err();
    assert_eq!(err.status(), 401);

    let updated = hiera
        .update("common", doc(json!({ "hieradata": { "dns": "1.1.1.1" } })), Some(&admin1))
        .await
        .unwrap();
    assert_eq!(updated["hieradata"], json!({ "dns": "1.1.1.1" }));
}

fn strip_stamps(mut doc: Document) -> Document {
    doc.remove("_v");
    if let Some(Value::Object(meta)) = doc.get_mut("_sis") {
        meta.remove("_updated_at");
    }
    doc
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn merging_a_partial_twice_equals_once(partial in partial_update_strategy()) {
        let known = |_: &str| false;
        let model = SchemaCompiler::new(&known, 8)
            .compile(&update_schema_definition())
            .unwrap();
        let seed = update_schema_seed();
        let once = apply_update(&model, &seed, &partial);
        let twice = apply_update(&model, &once, &partial);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn stored_updates_are_idempotent(partial in partial_update_strategy()) {
        prop_assume!(!partial.is_empty());
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let (once, twice) = runtime.block_on(async {
            let t = TestRegistry::new().await;
            t.add_schema(schema("things", &[GROUP_1], update_schema_definition())).await;
            let root = superman();
            let things = t.entities("things").unwrap();
            let saved = things.add(update_schema_seed(), Some(&root)).await.unwrap();
            let id = id_of(&saved);
            let once = things.update(&id, partial.clone(), Some(&root)).await.unwrap();
            let twice = things.update(&id, partial.clone(), Some(&root)).await.unwrap();
            (once, twice)
        });
        prop_assert_eq!(strip_stamps(once), strip_stamps(twice));
    }
}
