use autocrud::config::{IncludedSpec, ResourceConfig, Schema};
use autocrud::resource::LinkedRecords;
use autocrud::{schema_from_json, AppError, AppState, FetchPlan, FieldValue, MemoryStore, Predicate, RequestContext, ResourceHooks};
use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn schema() -> Arc<Schema> {
    Arc::new(
        schema_from_json(json!({"models": [
            {"name": "team", "table": "teams", "primary_key": "id",
             "columns": [{"name": "id", "type": "integer"},
                         {"name": "name", "type": "text", "nullable": false, "unique": true},
                         {"name": "founded", "type": "date"}],
             "relationships": [{"name": "characters", "target": "character", "cardinality": "to_many", "remote_column": "team_id"}]},
            {"name": "character", "table": "characters", "primary_key": "id", "version_column": "version",
             "columns": [{"name": "id", "type": "integer"}, {"name": "name", "type": "text"},
                         {"name": "owner", "type": "text"}, {"name": "joined", "type": "timestamp"},
                         {"name": "team_id", "type": "integer"}, {"name": "version", "type": "integer"}],
             "relationships": [{"name": "team", "target": "team", "cardinality": "to_one", "local_column": "team_id"}]}
        ]}))
        .unwrap(),
    )
}

/// Only lets a PATCH through while the character has no owner.
struct OwnerUnset;

impl ResourceHooks for OwnerUnset {
    fn patch_precondition(&self, _ctx: &RequestContext, plan: FetchPlan) -> Result<FetchPlan, AppError> {
        Ok(plan.filter(Predicate::is_null("owner")))
    }
}

/// Refuses to delete characters that still have an owner.
struct OwnedStays;

impl ResourceHooks for OwnedStays {
    fn delete_precondition(&self, _ctx: &RequestContext, plan: FetchPlan) -> Result<FetchPlan, AppError> {
        Ok(plan.filter(Predicate::is_null("owner")))
    }
}

struct Harness {
    app: Router,
    store: MemoryStore,
}

fn harness_with(
    characters: impl FnOnce(ResourceConfig) -> ResourceConfig,
    teams: impl FnOnce(ResourceConfig) -> ResourceConfig,
) -> Harness {
    let schema = schema();
    let store = MemoryStore::new(schema.clone());
    let state = AppState::new(schema.clone(), Arc::new(store.clone()));

    let character_single = state
        .resource("character")
        .unwrap()
        .include("team", IncludedSpec::new(Arc::new(LinkedRecords::new(&schema, "character", "team").unwrap())));
    let character_single = characters(character_single);
    let character_collection = state.resource("character").unwrap();
    let team_single = teams(state.resource("team").unwrap());
    let team_collection = state.resource("team").unwrap().allow_subresources(true);

    let app = Router::new()
        .merge(state.routes("/characters", "/characters/:id", character_collection, character_single))
        .merge(state.routes("/teams", "/teams/:id", team_collection, team_single));
    Harness { app, store }
}

fn harness() -> Harness {
    harness_with(|c| c, |c| c)
}

impl Harness {
    async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
            .unwrap();
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn post(&self, uri: &str, body: Value) -> Value {
        let (status, value) = self.send(Method::POST, uri, Some(body)).await;
        assert_eq!(status, StatusCode::CREATED, "{}", value);
        value
    }

    async fn names(&self, uri: &str) -> Vec<String> {
        let (status, body) = self.send(Method::GET, uri, None).await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["name"].as_str().unwrap_or_default().to_string())
            .collect()
    }
}

fn error_message(body: &Value) -> &str {
    body["error"]["message"].as_str().unwrap_or_default()
}

#[tokio::test]
async fn posted_record_reads_back_with_other_columns_null() {
    let h = harness();
    let created = h.post("/characters", json!({"id": 1, "name": "John"})).await;
    assert_eq!(created["data"]["id"], json!(1));

    let (status, body) = h.send(Method::GET, "/characters", None).await;
    assert_eq!(status, StatusCode::OK);
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["name"], json!("John"));
    assert_eq!(data[0]["owner"], Value::Null);
    assert_eq!(data[0]["joined"], Value::Null);
    assert_eq!(data[0]["team_id"], Value::Null);
    assert!(body.get("meta").is_none());
}

#[tokio::test]
async fn filters_reject_unknown_attributes_and_bad_lists() {
    let h = harness();
    h.post("/characters", json!([{"name": "Barry"}, {"name": "Iris"}, {"name": "Cisco"}])).await;

    for uri in [
        "/characters?nope=1",
        "/characters?team=1",
        "/characters?name__in=%5B%5D",
        "/characters?name__in=%5BBarry",
        "/characters?name__in=Barry%5D",
        "/characters?name__startswith__x=B",
    ] {
        let (status, body) = h.send(Method::GET, uri, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
        assert!(!error_message(&body).is_empty());
    }
    let (_, body) = h.send(Method::GET, "/characters?nope=1", None).await;
    assert_eq!(error_message(&body), "An attribute provided for filtering is invalid");

    let mut names = h.names("/characters?name__in=%5BBarry,Iris%5D").await;
    names.sort();
    assert_eq!(names, vec!["Barry", "Iris"]);
    assert_eq!(h.names("/characters?name__istartswith=ci").await, vec!["Cisco"]);
    assert_eq!(h.names("/characters?name__contains=r").await, vec!["Barry", "Iris"]);
}

#[tokio::test]
async fn null_operator_polarity() {
    let h = harness();
    h.post("/characters", json!([{"name": "Barry", "owner": "Joe"}, {"name": "Iris"}])).await;
    assert_eq!(h.names("/characters?owner__null=1").await, vec!["Iris"]);
    assert_eq!(h.names("/characters?owner__null=true").await, vec!["Iris"]);
    assert_eq!(h.names("/characters?owner__null=0").await, vec!["Barry"]);
}

#[tokio::test]
async fn sort_and_pagination() {
    let h = harness();
    h.post(
        "/characters",
        json!([{"name": "Cisco"}, {"name": "Barry"}, {"name": "Iris"}, {"name": "Eobard"}, {"name": "Joe"}]),
    )
    .await;

    let ascending = h.names("/characters?__sort=name").await;
    let mut descending = h.names("/characters?__sort=-name").await;
    descending.reverse();
    assert_eq!(ascending, descending);
    assert_eq!(ascending[0], "Barry");

    let (status, body) = h.send(Method::GET, "/characters?__sort=name&__limit=2&__offset=4", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["meta"], json!({"total": 5, "offset": 4, "limit": 2}));

    let (_, body) = h.send(Method::GET, "/characters?__limit=0", None).await;
    assert_eq!(body["data"], json!([]));
    assert_eq!(body["meta"], json!({"total": 5, "limit": 0}));

    let (status, body) = h.send(Method::GET, "/characters?__sort=team", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_message(&body), "An attribute provided for sorting is invalid");

    let (status, _) = h.send(Method::GET, "/characters?__limit=-1", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn patch_precondition_keeps_first_owner() {
    let h = harness_with(|c| c.hooks(Arc::new(OwnerUnset)), |c| c);
    h.post("/characters", json!({"name": "Barry"})).await;

    let (status, body) = h.send(Method::PATCH, "/characters/1", Some(json!({"owner": "Joe"}))).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["owner"], json!("Joe"));
    assert_eq!(body["data"]["version"], json!(2));

    let (status, body) = h.send(Method::PATCH, "/characters/1", Some(json!({"owner": "Henry"}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error_message(&body), "Resource found but conditions violated");

    let (_, body) = h.send(Method::GET, "/characters/1", None).await;
    assert_eq!(body["data"]["owner"], json!("Joe"));

    let (status, _) = h.send(Method::PATCH, "/characters/99", Some(json!({"owner": "Henry"}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, body) = h.send(Method::PATCH, "/characters/1", Some(json!([{"owner": "Henry"}]))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_message(&body), "Array bodies are only allowed with POST requests");
}

#[tokio::test]
async fn delete_with_failing_precondition_keeps_record() {
    let h = harness();
    h.post("/characters", json!({"name": "Barry"})).await;

    let (status, body) = h.send(Method::DELETE, "/characters/1?name=Wally", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error_message(&body), "Resource found but conditions violated");
    assert_eq!(h.store.snapshot("character").len(), 1);

    let (status, _) = h.send(Method::DELETE, "/characters/1?name=Barry", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(h.store.snapshot("character").is_empty());

    let (status, _) = h.send(Method::DELETE, "/characters/1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_precondition_hook_protects_owned_records() {
    let h = harness_with(|c| c.hooks(Arc::new(OwnedStays)), |c| c);
    h.post("/characters", json!({"name": "Barry", "owner": "Joe"})).await;

    let (status, body) = h.send(Method::DELETE, "/characters/1", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error_message(&body), "Resource found but conditions violated");
    assert_eq!(h.store.snapshot("character").len(), 1);

    let (status, _) = h.send(Method::PATCH, "/characters/1", Some(json!({"owner": null}))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = h.send(Method::DELETE, "/characters/1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(h.store.snapshot("character").is_empty());
}

#[tokio::test]
async fn lookup_matching_several_records_is_a_server_error() {
    let schema = schema();
    let store = MemoryStore::new(schema.clone());
    let state = AppState::new(schema, Arc::new(store.clone()));
    let app = state.routes(
        "/characters",
        "/squads/:team_id/character",
        state.resource("character").unwrap(),
        state.resource("character").unwrap(),
    );
    let app = app.merge(state.routes(
        "/teams",
        "/teams/:id",
        state.resource("team").unwrap(),
        state.resource("team").unwrap(),
    ));
    let h = Harness { app, store };
    h.post("/teams", json!({"name": "Flash"})).await;
    h.post("/characters", json!([{"name": "Barry", "team_id": 1}, {"name": "Iris", "team_id": 1}])).await;

    for (method, body) in [
        (Method::GET, None),
        (Method::PUT, Some(json!({"name": "Wally"}))),
        (Method::PATCH, Some(json!({"name": "Wally"}))),
        (Method::DELETE, None),
    ] {
        let (status, response) = h.send(method.clone(), "/squads/1/character", body).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR, "{}", method);
        assert_eq!(error_message(&response), "An internal server error occurred");
    }
    let names: Vec<FieldValue> = h.store.snapshot("character").iter().map(|r| r.get("name").clone()).collect();
    assert_eq!(names, vec![FieldValue::from("Barry"), FieldValue::from("Iris")]);
}

#[tokio::test]
async fn included_team_on_single_get() {
    let h = harness();
    h.post("/teams", json!({"name": "Team Flash", "founded": "2014-10-07"})).await;
    h.post("/characters", json!({"name": "Barry", "team_id": 1})).await;

    let (status, body) = h.send(Method::GET, "/characters/1?__included=team", None).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(
        body["included"],
        json!([{"id": 1, "type": "team", "attributes": {"id": 1, "name": "Team Flash", "founded": "2014-10-07"}}])
    );

    let (status, _) = h.send(Method::GET, "/characters/1?__included=characters", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = h.send(Method::GET, "/characters/1", None).await;
    assert!(body.get("included").is_none());
}

#[tokio::test]
async fn methods_outside_the_route_set_are_405() {
    let h = harness();
    let (status, _) = h.send(Method::DELETE, "/characters", None).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    let (status, _) = h.send(Method::POST, "/characters/1", Some(json!({}))).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn put_inserts_only_when_allowed() {
    let h = harness();
    let (status, _) = h.send(Method::PUT, "/teams/7", Some(json!({"name": "Flash"}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let h = harness_with(|c| c, |c| c.allow_put_insert(true));
    let (status, body) = h.send(Method::PUT, "/teams/7", Some(json!({"name": "Flash"}))).await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["data"], json!({"id": 7, "name": "Flash", "founded": null}));

    let (status, body) = h.send(Method::PUT, "/teams/7", Some(json!({"name": "Legends"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], json!("Legends"));
    assert_eq!(h.store.snapshot("team").len(), 1);
}

#[tokio::test]
async fn constraint_conflicts_have_fixed_messages() {
    let h = harness();
    h.post("/teams", json!({"name": "Flash"})).await;
    let (status, body) = h.send(Method::POST, "/teams", Some(json!({"name": "Flash"}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error_message(&body), "Unique constraint violated");

    let (status, body) = h.send(Method::POST, "/characters", Some(json!({"name": "Barry", "team_id": 9}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error_message(&body), "Foreign key constraint violated");

    h.post("/characters", json!({"name": "Barry", "team_id": 1})).await;
    let (status, body) = h.send(Method::DELETE, "/teams/1", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error_message(&body), "Other content links to this");
    assert_eq!(h.store.snapshot("team").len(), 1);
}

#[tokio::test]
async fn nested_records_are_linked() {
    let h = harness();
    let created = h
        .post("/teams", json!({"name": "Legends", "characters": [{"name": "Sara"}, {"name": "Ray"}]}))
        .await;
    let id = created["data"]["id"].as_i64().unwrap();
    let mut names = h.names(&format!("/characters?team_id={}", id)).await;
    names.sort();
    assert_eq!(names, vec!["Ray", "Sara"]);
}

#[tokio::test]
async fn collection_patch_adds_records() {
    let h = harness();
    let patch = json!({"patches": [
        {"op": "add", "path": "/", "value": {"name": "Cisco"}},
        {"op": "add", "path": "/", "value": {"name": "Caitlin"}}
    ]});
    let (status, body) = h.send(Method::PATCH, "/characters", Some(patch)).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(h.store.snapshot("character").len(), 2);

    for bad in [
        json!({"patches": [{"op": "remove", "path": "/", "value": {"name": "Cisco"}}]}),
        json!({"patches": [{"op": "add", "path": "/elsewhere", "value": {"name": "Cisco"}}]}),
        json!({"patches": [{"op": "add", "path": "/", "value": 3}]}),
        json!({"nothing": []}),
    ] {
        let (status, _) = h.send(Method::PATCH, "/characters", Some(bad)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
    assert_eq!(h.store.snapshot("character").len(), 2);
}

#[tokio::test]
async fn malformed_bodies_are_client_errors() {
    let h = harness();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/characters")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"name\": "))
        .unwrap();
    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let (status, _) = h
        .send(Method::POST, "/characters", Some(json!({"name": "Barry", "joined": "yesterday"})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(h.store.snapshot("character").is_empty());
}
