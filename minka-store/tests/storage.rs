//! End-to-end storage semantics against an in-memory SQLite database.
use assert_json_diff::assert_json_eq;
use minka_core::{
    params::VersionMatch, ApiResource, DeleteOptions, DynamicObject, ListOptions, Preconditions,
};
use minka_store::{error::Error, Factory, ResourceStore, DefaultStrategy, Store, TableDefinition};
use serde_json::json;

fn widgets_resource() -> ApiResource {
    ApiResource::namespaced("example.com", "v1", "Widget", "widgets")
}

async fn open() -> (Factory, Store) {
    let factory = Factory::open("sqlite://:memory:").await.unwrap();
    let def = TableDefinition::new(widgets_resource()).index_field("status.phase");
    let store = factory.store(def).await.unwrap();
    (factory, store)
}

fn widget(namespace: &str, name: &str, data: serde_json::Value) -> DynamicObject {
    DynamicObject::new(name, &widgets_resource())
        .within(namespace)
        .data(data)
}

fn rv(obj: &DynamicObject) -> i64 {
    obj.resource_version().unwrap().parse().unwrap()
}

#[tokio::test]
async fn create_then_get_roundtrips_the_payload() {
    let (_factory, store) = open().await;
    let created = store
        .create(widget("default", "w1", json!({"spec": {"color": "blue"}})))
        .await
        .unwrap();
    assert!(rv(&created) > 0);
    assert!(created.uid().is_some());
    assert_eq!(created.metadata.generation, Some(1));
    assert!(created.metadata.creation_timestamp.is_some());

    let fetched = store.get("default", "w1").await.unwrap();
    assert_json_eq!(fetched.data["spec"], json!({"color": "blue"}));
    assert_eq!(fetched.resource_version(), created.resource_version());
    assert_eq!(fetched.uid(), created.uid());
}

#[tokio::test]
async fn create_collides_with_a_live_object() {
    let (_factory, store) = open().await;
    store
        .create(widget("default", "w1", json!({"spec": {}})))
        .await
        .unwrap();
    let err = store
        .create(widget("default", "w1", json!({"spec": {}})))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AlreadyExists { .. }));
}

#[tokio::test]
async fn stale_update_loses_with_a_conflict() {
    let (_factory, store) = open().await;
    let created = store
        .create(widget("default", "w1", json!({"spec": {"color": "blue"}})))
        .await
        .unwrap();

    // two updaters read the same revision; the first one wins
    let mut first = created.clone();
    first.data["spec"]["color"] = json!("green");
    let winner = store.update(first).await.unwrap();
    assert!(rv(&winner) > rv(&created));

    let mut second = created.clone();
    second.data["spec"]["color"] = json!("red");
    let err = store.update(second).await.unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));

    let current = store.get("default", "w1").await.unwrap();
    assert_eq!(current.data["spec"]["color"], "green");
}

#[tokio::test]
async fn updates_preserve_identity_and_track_generation() {
    let (_factory, store) = open().await;
    let created = store
        .create(widget("default", "w1", json!({"spec": {"size": 1}})))
        .await
        .unwrap();

    let mut spec_change = created.clone();
    spec_change.data["spec"]["size"] = json!(2);
    let updated = store.update(spec_change).await.unwrap();
    assert_eq!(updated.uid(), created.uid());
    assert_eq!(updated.metadata.generation, Some(2));
    assert_eq!(
        updated.metadata.creation_timestamp,
        created.metadata.creation_timestamp
    );

    // a write that does not change the desired state keeps the generation
    let noop = store.update(updated.clone()).await.unwrap();
    assert_eq!(noop.metadata.generation, Some(2));
    assert!(rv(&noop) > rv(&updated));
}

#[tokio::test]
async fn status_updates_merge_only_the_status_subtree() {
    let (_factory, store) = open().await;
    let created = store
        .create(widget("default", "w1", json!({"spec": {"color": "blue"}})))
        .await
        .unwrap();

    let mut status = created.clone();
    status.data = json!({"spec": {"color": "ignored"}, "status": {"phase": "Running"}});
    let updated = store.update_status(status).await.unwrap();
    assert_eq!(updated.data["spec"]["color"], "blue");
    assert_eq!(updated.data["status"]["phase"], "Running");
    // status writes never bump the generation
    assert_eq!(updated.metadata.generation, Some(1));
}

#[tokio::test]
async fn delete_then_recreate_starts_a_fresh_chain() {
    let (_factory, store) = open().await;
    let created = store
        .create(widget("default", "w1", json!({"spec": {"color": "blue"}})))
        .await
        .unwrap();
    let old_uid = created.uid().unwrap().to_string();

    let deleted = store
        .delete("default", "w1", &DeleteOptions::default())
        .await
        .unwrap();
    assert_eq!(deleted.resource_version(), created.resource_version());
    assert!(matches!(
        store.get("default", "w1").await.unwrap_err(),
        Error::NotFound { .. }
    ));

    let recreated = store
        .create(widget("default", "w1", json!({"spec": {"color": "red"}})))
        .await
        .unwrap();
    assert_ne!(recreated.uid().unwrap(), old_uid);
    assert!(rv(&recreated) > rv(&created) + 1); // past the tombstone too
    assert_eq!(
        store.get("default", "w1").await.unwrap().data["spec"]["color"],
        "red"
    );
}

#[tokio::test]
async fn delete_preconditions_are_enforced() {
    let (_factory, store) = open().await;
    let created = store
        .create(widget("default", "w1", json!({"spec": {}})))
        .await
        .unwrap();

    let stale = DeleteOptions::at_version("1909");
    assert!(matches!(
        store.delete("default", "w1", &stale).await.unwrap_err(),
        Error::Conflict(_)
    ));

    let wrong_uid = DeleteOptions {
        preconditions: Some(Preconditions {
            resource_version: None,
            uid: Some("someone-else".into()),
        }),
    };
    assert!(matches!(
        store.delete("default", "w1", &wrong_uid).await.unwrap_err(),
        Error::Conflict(_)
    ));

    let ok = DeleteOptions::at_version(created.resource_version().unwrap());
    store.delete("default", "w1", &ok).await.unwrap();
    assert!(matches!(
        store
            .delete("default", "w1", &DeleteOptions::default())
            .await
            .unwrap_err(),
        Error::NotFound { .. }
    ));
}

#[tokio::test]
async fn indexed_field_selector_returns_exact_matches() {
    let (_factory, store) = open().await;
    for i in 0..300 {
        let phase = if i % 30 == 0 { "Running" } else { "Pending" };
        store
            .create(widget(
                "default",
                &format!("w{i:03}"),
                json!({"spec": {}, "status": {"phase": phase}}),
            ))
            .await
            .unwrap();
    }
    let opts = ListOptions::default().fields("status.phase=Running");
    let list = store.list("default", &opts).await.unwrap();
    assert_eq!(list.items.len(), 10);
    assert!(list
        .iter()
        .all(|obj| obj.data["status"]["phase"] == "Running"));
    assert!(list.metadata.resource_version.is_some());

    // inequality is filtered in-process but still correct
    let opts = ListOptions::default().fields("status.phase!=Running");
    let rest = store.list("default", &opts).await.unwrap();
    assert_eq!(rest.items.len(), 290);
}

#[tokio::test]
async fn label_selectors_filter_lists() {
    let (_factory, store) = open().await;
    for i in 0..10 {
        let mut obj = widget("default", &format!("w{i}"), json!({"spec": {}}));
        let tier = if i < 3 { "frontend" } else { "backend" };
        obj.metadata.labels.insert("tier".into(), tier.into());
        store.create(obj).await.unwrap();
    }
    let opts = ListOptions::default().labels("tier in (frontend)");
    let list = store.list("default", &opts).await.unwrap();
    assert_eq!(list.items.len(), 3);
}

#[tokio::test]
async fn paginated_lists_form_one_consistent_cut() {
    let (_factory, store) = open().await;
    for i in 0..300 {
        store
            .create(widget("default", &format!("w{i:03}"), json!({"spec": {"n": i}})))
            .await
            .unwrap();
    }

    let mut seen = Vec::new();
    let mut snapshot_rv = None;
    let mut opts = ListOptions::default().limit(100);
    let mut pages = 0;
    loop {
        let page = store.list("default", &opts).await.unwrap();
        pages += 1;
        if let Some(rv) = &snapshot_rv {
            assert_eq!(page.metadata.resource_version.as_ref(), Some(rv));
        } else {
            snapshot_rv = page.metadata.resource_version.clone();
        }
        seen.extend(page.iter().map(|o| o.name().to_string()));

        // a write between pages must not leak into the pinned snapshot
        if pages == 1 {
            store
                .create(widget("default", "w999", json!({"spec": {}})))
                .await
                .unwrap();
        }
        match page.metadata.continue_ {
            Some(token) => {
                opts = ListOptions::default().limit(100).continue_token(&token);
            }
            None => break,
        }
    }
    assert_eq!(pages, 3);
    assert_eq!(seen.len(), 300);
    let mut deduped = seen.clone();
    deduped.sort();
    deduped.dedup();
    assert_eq!(deduped.len(), 300, "no duplicates across pages");
    assert!(!seen.iter().any(|n| n == "w999"));
}

#[tokio::test]
async fn exact_lists_pin_to_the_requested_revision() {
    let (_factory, store) = open().await;
    let created = store
        .create(widget("default", "w1", json!({"spec": {"color": "blue"}})))
        .await
        .unwrap();
    let mut update = created.clone();
    update.data["spec"]["color"] = json!("red");
    store.update(update).await.unwrap();

    let opts = ListOptions::default()
        .at(created.resource_version().unwrap())
        .matching(VersionMatch::Exact);
    let list = store.list("default", &opts).await.unwrap();
    assert_eq!(list.items.len(), 1);
    assert_eq!(list.items[0].data["spec"]["color"], "blue");
    assert_eq!(
        list.metadata.resource_version.as_deref(),
        created.resource_version()
    );
}

#[tokio::test]
async fn compaction_expires_old_revisions_but_keeps_current_state() {
    let (_factory, store) = open().await;
    let created = store
        .create(widget("default", "w1", json!({"spec": {"v": 1}})))
        .await
        .unwrap();
    let mut obj = created.clone();
    obj.data["spec"]["v"] = json!(2);
    let obj = store.update(obj).await.unwrap();
    let mut obj2 = obj.clone();
    obj2.data["spec"]["v"] = json!(3);
    store.update(obj2).await.unwrap();

    let watermark = store.compact().await.unwrap();
    assert_eq!(watermark, rv(&obj));
    // the watermark never decreases
    assert_eq!(store.compact().await.unwrap(), watermark);

    // current state is untouched
    assert_eq!(store.get("default", "w1").await.unwrap().data["spec"]["v"], 3);

    // an exact list at a reclaimed revision is gone
    let opts = ListOptions::default()
        .at(created.resource_version().unwrap())
        .matching(VersionMatch::Exact);
    assert!(matches!(
        store.list("default", &opts).await.unwrap_err(),
        Error::Expired(_)
    ));
}

#[tokio::test]
async fn continue_tokens_expire_once_compaction_passes_their_snapshot() {
    let (_factory, store) = open().await;
    let mut created = Vec::new();
    for i in 0..4 {
        created.push(
            store
                .create(widget("default", &format!("w{i}"), json!({"spec": {"v": 0}})))
                .await
                .unwrap(),
        );
    }
    let page = store
        .list("default", &ListOptions::default().limit(2))
        .await
        .unwrap();
    let token = page.metadata.continue_.unwrap();

    // supersede everything so the watermark passes the page's snapshot
    for obj in created {
        let mut update = obj.clone();
        update.data["spec"]["v"] = json!(1);
        let updated = store.update(update).await.unwrap();
        let mut again = updated.clone();
        again.data["spec"]["v"] = json!(2);
        store.update(again).await.unwrap();
    }
    store.compact().await.unwrap();

    let opts = ListOptions::default().limit(2).continue_token(&token);
    assert!(matches!(
        store.list("default", &opts).await.unwrap_err(),
        Error::Expired(_)
    ));
}

#[tokio::test]
async fn not_older_than_serves_latest_and_rejects_the_future() {
    let (_factory, store) = open().await;
    let created = store
        .create(widget("default", "w1", json!({"spec": {}})))
        .await
        .unwrap();

    let opts = ListOptions::default()
        .at(created.resource_version().unwrap())
        .matching(VersionMatch::NotOlderThan);
    let list = store.list("default", &opts).await.unwrap();
    assert_eq!(list.items.len(), 1);

    let opts = ListOptions::default().at("99999");
    assert!(matches!(
        store.list("default", &opts).await.unwrap_err(),
        Error::Timeout(_)
    ));
}

#[tokio::test]
async fn malformed_continue_tokens_are_invalid() {
    let (_factory, store) = open().await;
    let opts = ListOptions::default().continue_token("definitely not a token");
    assert!(matches!(
        store.list("default", &opts).await.unwrap_err(),
        Error::Invalid(_)
    ));
}

#[tokio::test]
async fn namespace_scope_is_projected() {
    let factory = Factory::open("sqlite://:memory:").await.unwrap();
    let nodes = ApiResource::cluster("example.com", "v1", "Node", "nodes");
    let store = factory
        .store(TableDefinition::new(nodes.clone()))
        .await
        .unwrap();

    let err = store
        .create(DynamicObject::new("n1", &nodes).within("default").data(json!({"spec": {}})))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Invalid(_)));
    store
        .create(DynamicObject::new("n1", &nodes).data(json!({"spec": {}})))
        .await
        .unwrap();
    assert!(store.get("", "n1").await.is_ok());

    let (_factory, widgets) = open().await;
    let err = widgets
        .create(widget("", "w1", json!({"spec": {}})))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Invalid(_)));
}

#[tokio::test]
async fn lists_span_namespaces_only_when_recursive() {
    let (_factory, store) = open().await;
    store
        .create(widget("team-a", "w1", json!({"spec": {}})))
        .await
        .unwrap();
    store
        .create(widget("team-b", "w2", json!({"spec": {}})))
        .await
        .unwrap();

    let scoped = store.list("team-a", &ListOptions::default()).await.unwrap();
    assert_eq!(scoped.items.len(), 1);

    let pinned = store.list("", &ListOptions::default()).await.unwrap();
    assert_eq!(pinned.items.len(), 0);

    let all = store
        .list("", &ListOptions::default().recursive())
        .await
        .unwrap();
    assert_eq!(all.items.len(), 2);
}

#[tokio::test]
async fn resource_store_applies_strategy_hooks() {
    let factory = Factory::open("sqlite://:memory:").await.unwrap();
    let def = TableDefinition::new(widgets_resource());
    let store = ResourceStore::new(factory.store(def).await.unwrap(), DefaultStrategy);

    // client-supplied status is dropped on create
    let created = store
        .create(widget(
            "default",
            "w1",
            json!({"spec": {"color": "blue"}, "status": {"phase": "Forged"}}),
        ))
        .await
        .unwrap();
    assert!(created.data.get("status").is_none());

    // spec writes cannot smuggle status changes in
    let mut update = created.clone();
    update.data = json!({"spec": {"color": "red"}, "status": {"phase": "Forged"}});
    let updated = store.update(update).await.unwrap();
    assert!(updated.data.get("status").is_none());

    // names must be DNS subdomains
    let err = store
        .create(widget("default", "Not_A_Name", json!({"spec": {}})))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Invalid(_)));

    // generateName fills in missing names
    let mut generated = widget("default", "", json!({"spec": {}}));
    generated.metadata.name = None;
    generated.metadata.generate_name = Some("w-".into());
    let obj = store.create(generated).await.unwrap();
    assert!(obj.name().starts_with("w-"));
    assert!(obj.name().len() > 2);

    // writes addressed to another kind are rejected
    let gadgets = ApiResource::namespaced("example.com", "v1", "Gadget", "gadgets");
    let stray = DynamicObject::new("g1", &gadgets)
        .within("default")
        .data(json!({"spec": {}}));
    let err = store.create(stray).await.unwrap_err();
    assert!(matches!(err, Error::Invalid(_)));

    store.destroy();
}

#[tokio::test]
async fn sqlite_files_persist_across_factories() {
    let dir = tempfile::tempdir().unwrap();
    let dsn = format!("sqlite://{}/minka.db", dir.path().display());

    let factory = Factory::open(&dsn).await.unwrap();
    let def = TableDefinition::new(widgets_resource());
    let store = factory.store(def.clone()).await.unwrap();
    store
        .create(widget("default", "w1", json!({"spec": {"color": "blue"}})))
        .await
        .unwrap();
    factory.destroy().await;

    let reopened = Factory::open(&dsn).await.unwrap();
    let store = reopened.store(def).await.unwrap();
    let fetched = store.get("default", "w1").await.unwrap();
    assert_eq!(fetched.data["spec"]["color"], "blue");
    reopened.destroy().await;
}
