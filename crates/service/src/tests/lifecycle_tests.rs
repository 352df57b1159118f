use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};

use models::{Patch, Projection, Query, RequestContext};

use crate::errors::into_reply;
use crate::facade::EntityService;
use crate::notifications::Notifier;
use crate::resources::professors::Professors;
use crate::router::{Operation, ServiceRegistry};
use crate::store::{Collection, CollectionProvider, MemoryStore};
use crate::test_support::monolith;

async fn seed_school_user(store: &MemoryStore, tenant: &str, id: &str, name: &str) {
    let copy = json!({"id": id, "type": "school-user", "name": name, "email": format!("{id}@school.test"), "status": "active"});
    store.collection(Some(tenant), "school-users").insert(id, copy).await.unwrap();
}

struct CountingProvider {
    inner: Arc<MemoryStore>,
    resolved: AtomicUsize,
}

impl CollectionProvider for CountingProvider {
    fn collection(&self, tenant: Option<&str>, name: &str) -> Arc<dyn Collection> {
        self.resolved.fetch_add(1, Ordering::SeqCst);
        self.inner.collection(tenant, name)
    }
}

#[tokio::test]
async fn missing_tenant_is_rejected_before_storage() {
    let provider = Arc::new(CountingProvider { inner: MemoryStore::new(), resolved: AtomicUsize::new(0) });
    let registry = ServiceRegistry::new();
    let svc = EntityService::new(Arc::new(Professors::new()), provider.clone(), registry, Notifier::silent("professors"));
    let ctx = RequestContext::new();

    let calls = [
        svc.create(json!({"id": "p1", "classes": []}), &ctx).await,
        svc.read("p1", &Projection::all(), &ctx).await,
        svc.list(Query::default(), &ctx).await,
        svc.remove("p1", &ctx).await,
    ];
    for result in calls {
        assert_eq!(result.unwrap_err().status(), 400);
    }
    assert_eq!(provider.resolved.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn professor_requires_resolved_user() -> Result<(), anyhow::Error> {
    let app = monolith();
    seed_school_user(&app.store, "s1", "p1", "Grace Hopper").await;
    let ctx = RequestContext::for_tenant("s1");

    // no school user `p2` in this school: nothing to embed
    let rejected = app.registry.invoke("professors", Operation::Create { body: json!({"id": "p2", "classes": []}) }, &ctx).await;
    let rejected = into_reply(rejected);
    assert_eq!(rejected.status, 400);
    assert_eq!(rejected.value["error"]["path"], "user");

    let created = app.registry.invoke("professors", Operation::Create { body: json!({"id": "p1", "classes": []}) }, &ctx).await?;
    assert_eq!(created.status, 201);
    assert_eq!(
        created.value,
        json!({"id": "p1", "user": {"id": "p1", "name": "Grace Hopper"}, "classes": [], "displayName": "Grace Hopper"})
    );

    // the stored document keeps the full snapshot
    let stored = app.store.collection(Some("s1"), "professors").find_one("p1").await?.unwrap();
    assert_eq!(stored["user"]["email"], "p1@school.test");
    assert_eq!(stored["type"], "professor");
    Ok(())
}

#[tokio::test]
async fn same_id_in_other_tenant_is_separate() -> Result<(), anyhow::Error> {
    let app = monolith();
    seed_school_user(&app.store, "s1", "p1", "Grace").await;
    let create = Operation::Create { body: json!({"id": "p1", "classes": []}) };
    app.registry.invoke("professors", create.clone(), &RequestContext::for_tenant("s1")).await?;

    let elsewhere = app.registry.invoke("professors", create, &RequestContext::for_tenant("s2")).await;
    assert_eq!(elsewhere.unwrap_err().status(), 400);
    let read = Operation::Read { id: "p1".into(), projection: Projection::all() };
    assert_eq!(app.registry.invoke("professors", read, &RequestContext::for_tenant("s2")).await.unwrap_err().status(), 404);
    Ok(())
}

#[tokio::test]
async fn student_crud_round() -> Result<(), anyhow::Error> {
    let app = monolith();
    seed_school_user(&app.store, "s1", "st1", "Alan").await;
    seed_school_user(&app.store, "s1", "st2", "Barbara").await;
    let ctx = RequestContext::for_tenant("s1");
    let call = |op: Operation| {
        let registry = app.registry.clone();
        let ctx = ctx.clone();
        async move { registry.invoke("students", op, &ctx).await }
    };

    call(Operation::Create { body: json!({"id": "st1", "grade": 3, "classes": [{"id": "c1", "name": "Math"}]}) }).await?;
    call(Operation::Create { body: json!({"id": "st2", "grade": 4}) }).await?;

    let patch = Patch::from_value(json!({
        "set": {"grade": 5},
        "add": {"classes": [{"id": "c2", "name": "Physics"}]},
        "remove": {"classes": ["c1"]},
    }))?;
    let patched = call(Operation::PartialUpdate { id: "st1".into(), patch }).await?;
    assert_eq!(patched.value["grade"], 5);
    assert_eq!(patched.value["classes"], json!([{"id": "c2", "name": "Physics"}]));
    assert_eq!(patched.value["user"]["name"], "Alan");

    let bad_patch = Patch::from_value(json!({"set": {"grade": "fifth"}}))?;
    let err = call(Operation::PartialUpdate { id: "st1".into(), patch: bad_patch }).await.unwrap_err();
    assert_eq!(err.body()["error"]["path"], "grade");

    let replaced = call(Operation::Replace { id: "st2".into(), body: json!({"boarding": true}) }).await?;
    assert_eq!(replaced.value["boarding"], true);
    assert!(replaced.value.get("grade").is_none());
    assert_eq!(replaced.value["user"]["id"], "st2");

    let query = Query::default().with_sort("-id").with_projection(Projection::parse("grade"));
    let listed = call(Operation::List { query }).await?;
    assert_eq!(listed.value["meta"]["count"], 2);
    assert_eq!(listed.value["data"], json!([{"id": "st2"}, {"id": "st1", "grade": 5}]));

    let many = call(Operation::ReadMany { ids: vec!["st1".into(), "nope".into()], projection: Projection::parse("grade") }).await?;
    assert_eq!(many.value, json!([{"id": "st1", "grade": 5}]));

    let removed = call(Operation::Remove { id: "st1".into() }).await?;
    assert_eq!(removed.value["id"], "st1");
    assert_eq!(call(Operation::Remove { id: "st1".into() }).await.unwrap_err().status(), 404);
    Ok(())
}

#[test]
fn copies_cannot_be_written_directly() {
    let app = monolith();
    let result = tokio_test::block_on(app.registry.invoke(
        "school-users",
        Operation::Create { body: json!({"id": "u1"}) },
        &RequestContext::for_tenant("s1"),
    ));
    let reply = into_reply(result);
    assert_eq!(reply.status, 400);
    assert!(reply.value["message"].as_str().is_some_and(|m| m.contains("notifications")));
}

#[tokio::test]
async fn storage_only_fields_are_hidden() -> Result<(), anyhow::Error> {
    let app = monolith();
    let ctx = RequestContext::new();
    let created = app.registry.invoke("users", Operation::Create { body: json!({"id": "u1", "name": "Ada"}) }, &ctx).await?;
    assert!(created.value.get("_search").is_none());
    assert_eq!(created.value["status"], "active");

    let stored = app.store.collection(None, "users").find_one("u1").await?.unwrap();
    assert_eq!(stored["_search"], Value::String("ada".into()));

    let listed = app.registry.invoke("users", Operation::List { query: Query::default().with_filter("_search", json!("ada")) }, &ctx).await?;
    assert_eq!(listed.value["meta"]["count"], 1);
    assert!(listed.value["data"][0].get("_search").is_none());
    Ok(())
}
