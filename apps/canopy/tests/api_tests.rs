//! Integration tests for the Canopy HTTP API.
//!
//! Uses axum-test to drive the router against an in-memory store without
//! starting a real server.

// Allow holding MutexGuard across await - tests are serialized
// intentionally to avoid env var conflicts
#![allow(clippy::await_holding_lock)]

use axum::http::{HeaderName, HeaderValue, StatusCode, header};
use axum_test::{TestRequest, TestResponse, TestServer};
use canopy::api::{
    AppState, CreateEntityResponse, DeleteEntityResponse, ErrorBody, HealthResponse,
    PermittedIdsResponse, ROLE_HEADER, TreeResponse, USER_ID_HEADER, UpdateEntityResponse,
    VersionsResponse, create_router,
};
use canopy_core::{
    CallContext, Capability, Entity, EntityId, HierarchyConfig, HierarchyCore, KnowledgeService,
    ListItem, Publication, SqliteStore, VersionNumber,
};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Mutex to serialize tests since router construction reads env vars.
static ENV_TEST_MUTEX: Mutex<()> = Mutex::new(());

const ADMIN: u128 = 1;
const ALICE: u128 = 2;
const BOB: u128 = 3;

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Guard wrapper that holds the mutex and ensures cleanup on drop.
struct TestGuard {
    _guard: std::sync::MutexGuard<'static, ()>,
}

impl Drop for TestGuard {
    fn drop(&mut self) {
        // SAFETY: Tests run sequentially under ENV_TEST_MUTEX, so no concurrent env access.
        unsafe { std::env::remove_var("CANOPY_API_KEY") };
    }
}

struct Harness {
    server: TestServer,
    store: Arc<SqliteStore>,
    _guard: TestGuard,
}

/// Fresh server over an in-memory store with `max_depth = 2`, an `admin`
/// role and an `editor` role without grants.
fn harness_with_key(api_key: Option<&str>) -> Harness {
    let guard = ENV_TEST_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    // SAFETY: Tests run sequentially under ENV_TEST_MUTEX, so no concurrent env access.
    unsafe {
        match api_key {
            Some(key) => std::env::set_var("CANOPY_API_KEY", key),
            None => std::env::remove_var("CANOPY_API_KEY"),
        }
    }

    let ctx = CallContext::background();
    let store = Arc::new(SqliteStore::open_in_memory().expect("open"));
    store.upsert_role(&ctx, "admin", true).expect("admin role");
    store.upsert_role(&ctx, "editor", false).expect("editor role");

    let config = HierarchyConfig::new(2, 64).expect("config");
    let core = Arc::new(HierarchyCore::new(Arc::clone(&store), config).expect("core"));
    let service = Arc::new(KnowledgeService::new(core, Arc::clone(&store)));
    let router = create_router(AppState::new(service, Duration::from_secs(5)));

    Harness {
        server: TestServer::new(router).expect("test server"),
        store,
        _guard: TestGuard { _guard: guard },
    }
}

fn harness() -> Harness {
    harness_with_key(None)
}

fn user_id(n: u128) -> String {
    Uuid::from_u128(n).to_string()
}

/// Attach gateway identity headers.
fn as_caller(request: TestRequest, user: u128, role: &str) -> TestRequest {
    request
        .add_header(
            HeaderName::from_static(USER_ID_HEADER),
            HeaderValue::from_str(&user_id(user)).expect("header"),
        )
        .add_header(
            HeaderName::from_static(ROLE_HEADER),
            HeaderValue::from_str(role).expect("header"),
        )
}

async fn create(
    server: &TestServer,
    user: u128,
    role: &str,
    body: serde_json::Value,
) -> TestResponse {
    as_caller(server.post("/entities"), user, role).json(&body).await
}

async fn create_ok(
    server: &TestServer,
    entity_type: &str,
    name: &str,
    parent: Option<EntityId>,
) -> EntityId {
    let response = create(
        server,
        ADMIN,
        "admin",
        json!({ "entity_type": entity_type, "name": name, "parent_id": parent }),
    )
    .await;
    response.assert_status(StatusCode::CREATED);
    response.json::<CreateEntityResponse>().id
}

fn error_of(response: &TestResponse) -> ErrorBody {
    response.json::<ErrorBody>()
}

// =============================================================================
// HEALTH AND IDENTITY
// =============================================================================

#[tokio::test]
async fn health_needs_no_identity() {
    let h = harness();

    let response = h.server.get("/health").await;

    response.assert_status_ok();
    let health: HealthResponse = response.json();
    assert_eq!(health.status, "ok");
    assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn missing_identity_is_unauthorized() {
    let h = harness();

    let response = h.server.get("/tree").await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(error_of(&response).error.kind, "unauthorized");

    let response = h
        .server
        .get("/tree")
        .add_header(
            HeaderName::from_static(USER_ID_HEADER),
            HeaderValue::from_static("not-a-uuid"),
        )
        .add_header(
            HeaderName::from_static(ROLE_HEADER),
            HeaderValue::from_static("admin"),
        )
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_role_is_unauthorized() {
    let h = harness();

    let response = as_caller(h.server.get("/tree"), ALICE, "nobody").await;

    response.assert_status(StatusCode::UNAUTHORIZED);
}

// =============================================================================
// CREATE AND TREE
// =============================================================================

#[tokio::test]
async fn admin_builds_and_reads_tree() {
    let h = harness();
    let root = create_ok(&h.server, "department", "Handbook", None).await;
    let team = create_ok(&h.server, "department", "Team", Some(root)).await;
    create_ok(&h.server, "article", "Onboarding", Some(team)).await;

    let response = as_caller(h.server.get("/tree"), ADMIN, "admin").await;

    response.assert_status_ok();
    let tree: TreeResponse = response.json();
    assert_eq!(tree.total, 3);
    assert_eq!(tree.roots.len(), 1);
    assert_eq!(tree.roots[0].item.name, "Handbook");
    assert_eq!(tree.roots[0].children[0].children[0].item.name, "Onboarding");
}

#[tokio::test]
async fn unknown_entity_type_is_a_validation_error() {
    let h = harness();

    let response = create(
        &h.server,
        ADMIN,
        "admin",
        json!({ "entity_type": "folder", "name": "X" }),
    )
    .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body = error_of(&response);
    assert_eq!(body.error.kind, "validation_failed");
    assert_eq!(body.error.details["field"], "entity_type");
}

#[tokio::test]
async fn article_without_parent_is_rejected() {
    let h = harness();

    let response = create(
        &h.server,
        ADMIN,
        "admin",
        json!({ "entity_type": "article", "name": "Loose" }),
    )
    .await;

    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error_of(&response).error.kind, "parent_required");
}

#[tokio::test]
async fn depth_limit_maps_to_unprocessable() {
    let h = harness();
    let r = create_ok(&h.server, "department", "R", None).await;
    let c = create_ok(&h.server, "department", "C", Some(r)).await;
    let g = create_ok(&h.server, "department", "G", Some(c)).await;

    let response = create(
        &h.server,
        ADMIN,
        "admin",
        json!({ "entity_type": "article", "name": "Too deep", "parent_id": g }),
    )
    .await;

    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    let body = error_of(&response);
    assert_eq!(body.error.kind, "max_hierarchy_depth_exceeded");
    assert_eq!(body.error.details["max_depth"], 2);
}

// =============================================================================
// UPDATE, MOVE AND DELETE
// =============================================================================

#[tokio::test]
async fn moving_under_own_child_is_a_cycle() {
    let h = harness();
    let a = create_ok(&h.server, "department", "A", None).await;
    let b = create_ok(&h.server, "department", "B", Some(a)).await;

    let response = as_caller(h.server.put(&format!("/entities/{}", a)), ADMIN, "admin")
        .json(&json!({ "name": "A", "parent_changed": true, "parent_id": b }))
        .await;

    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    let body = error_of(&response);
    assert_eq!(body.error.kind, "parent_cycle");
    assert_eq!(body.error.details["entity"], a.to_string());
}

#[tokio::test]
async fn delete_cascades_through_subtree() {
    let h = harness();
    let r = create_ok(&h.server, "department", "R", None).await;
    let c = create_ok(&h.server, "department", "C", Some(r)).await;
    let g = create_ok(&h.server, "article", "G", Some(c)).await;

    let response = as_caller(h.server.delete(&format!("/entities/{}", r)), ADMIN, "admin").await;

    response.assert_status_ok();
    let mut deleted = response.json::<DeleteEntityResponse>().deleted;
    deleted.sort();
    let mut expected = vec![r, c, g];
    expected.sort();
    assert_eq!(deleted, expected);

    let response = as_caller(h.server.get(&format!("/entities/{}", c)), ADMIN, "admin").await;
    response.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(error_of(&response).error.kind, "entity_not_found");
}

#[tokio::test]
async fn malformed_path_id_is_bad_request() {
    let h = harness();

    let response = as_caller(h.server.get("/entities/not-a-uuid"), ADMIN, "admin").await;

    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(error_of(&response).error.details["field"], "id");
}

// =============================================================================
// VERSIONS
// =============================================================================

#[tokio::test]
async fn publishing_appends_versions() {
    let h = harness();
    let root = create_ok(&h.server, "department", "Handbook", None).await;

    let response = as_caller(h.server.put(&format!("/entities/{}", root)), ADMIN, "admin")
        .json(&json!({ "name": "Handbook v2", "content": "edited" }))
        .await;
    response.assert_status_ok();
    let update: UpdateEntityResponse = response.json();
    assert_eq!(update.publication.version(), VersionNumber::new(2));

    let response = as_caller(
        h.server.get(&format!("/entities/{}/versions", root)),
        ADMIN,
        "admin",
    )
    .await;
    response.assert_status_ok();
    let history: VersionsResponse = response.json();
    let names: Vec<&str> = history.versions.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["Handbook v2", "Handbook"]);

    let response = as_caller(
        h.server.get(&format!("/entities/{}/versions/1", root)),
        ADMIN,
        "admin",
    )
    .await;
    response.assert_status_ok();
    let first: Entity = response.json();
    assert_eq!(first.name, "Handbook");
    assert_eq!(first.publication, Publication::Published(VersionNumber::FIRST));
}

#[tokio::test]
async fn invalid_version_numbers_are_rejected() {
    let h = harness();
    let root = create_ok(&h.server, "department", "Handbook", None).await;

    for version in ["0", "-3", "latest"] {
        let response = as_caller(
            h.server.get(&format!("/entities/{}/versions/{}", root, version)),
            ADMIN,
            "admin",
        )
        .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }
}

#[tokio::test]
async fn list_item_has_no_content() {
    let h = harness();
    let root = create_ok(&h.server, "department", "Handbook", None).await;

    let response = as_caller(h.server.get(&format!("/entities/{}/item", root)), ADMIN, "admin").await;

    response.assert_status_ok();
    let item: ListItem = response.json();
    assert_eq!(item.id, root);
    assert!(item.parent_id.is_none());
    let raw: serde_json::Value = response.json();
    assert!(raw.get("content").is_none());
}

// =============================================================================
// PERMISSIONS AND DRAFTS
// =============================================================================

#[tokio::test]
async fn editor_needs_a_write_grant() {
    let h = harness();
    let root = create_ok(&h.server, "department", "Handbook", None).await;
    let body = json!({ "entity_type": "article", "name": "Notes", "parent_id": root });

    let response = create(&h.server, ALICE, "editor", body.clone()).await;
    response.assert_status(StatusCode::FORBIDDEN);
    assert_eq!(error_of(&response).error.kind, "forbidden");

    let response = create(
        &h.server,
        ALICE,
        "editor",
        json!({ "entity_type": "department", "name": "Rogue root" }),
    )
    .await;
    response.assert_status(StatusCode::FORBIDDEN);
    assert_eq!(error_of(&response).error.kind, "admin_required");

    h.store
        .grant(&CallContext::background(), "editor", root, Capability::Write)
        .expect("grant");
    let response = create(&h.server, ALICE, "editor", body).await;
    response.assert_status(StatusCode::CREATED);
    let article = response.json::<CreateEntityResponse>().id;

    let response = as_caller(
        h.server.get("/permitted-ids").add_query_param("capability", "write"),
        ALICE,
        "editor",
    )
    .await;
    response.assert_status_ok();
    let permitted: PermittedIdsResponse = response.json();
    assert_eq!(permitted.capability, Capability::Write);
    assert!(permitted.ids.contains(&root));
    assert!(permitted.ids.contains(&article));
}

#[tokio::test]
async fn unknown_capability_is_bad_request() {
    let h = harness();

    let response = as_caller(
        h.server.get("/permitted-ids").add_query_param("capability", "delete"),
        ADMIN,
        "admin",
    )
    .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(error_of(&response).error.details["field"], "capability");
}

#[tokio::test]
async fn drafts_stay_private_to_their_author() {
    let h = harness();
    let root = create_ok(&h.server, "department", "Handbook", None).await;
    h.store
        .grant(&CallContext::background(), "editor", root, Capability::Write)
        .expect("grant");

    let response = create(
        &h.server,
        ALICE,
        "editor",
        json!({ "entity_type": "article", "name": "Draft", "parent_id": root, "is_draft": true }),
    )
    .await;
    response.assert_status(StatusCode::CREATED);
    let draft = response.json::<CreateEntityResponse>().id;
    let path = format!("/entities/{}", draft);

    let response = as_caller(h.server.get(&path), ALICE, "editor").await;
    response.assert_status_ok();
    assert_eq!(response.json::<Entity>().publication, Publication::Draft);

    let response = as_caller(h.server.get(&path), BOB, "editor").await;
    response.assert_status(StatusCode::NOT_FOUND);

    let response = as_caller(h.server.get("/tree"), BOB, "editor").await;
    response.assert_status_ok();
    assert_eq!(response.json::<TreeResponse>().total, 1);

    let response = as_caller(h.server.get("/tree"), ALICE, "editor").await;
    assert_eq!(response.json::<TreeResponse>().total, 2);

    let response = as_caller(h.server.put(&path), BOB, "editor")
        .json(&json!({ "name": "Hijacked" }))
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
    let response = as_caller(h.server.delete(&path), BOB, "editor").await;
    response.assert_status(StatusCode::NOT_FOUND);

    let response = as_caller(
        h.server.get("/permitted-ids").add_query_param("capability", "write"),
        BOB,
        "editor",
    )
    .await;
    let permitted: PermittedIdsResponse = response.json();
    assert_eq!(permitted.ids, vec![root]);

    let response = as_caller(h.server.get(&path), ALICE, "editor").await;
    let entity = response.json::<Entity>();
    assert_eq!(entity.name, "Draft");
    assert_eq!(entity.publication, Publication::Draft);
}

// =============================================================================
// API KEY
// =============================================================================

#[tokio::test]
async fn api_key_guards_everything_but_health() {
    let api_key = "test-secret-key-12345";
    let h = harness_with_key(Some(api_key));

    h.server.get("/health").await.assert_status_ok();

    let response = as_caller(h.server.get("/tree"), ADMIN, "admin").await;
    response.assert_status(StatusCode::UNAUTHORIZED);

    let response = as_caller(h.server.get("/tree"), ADMIN, "admin")
        .add_header(
            header::AUTHORIZATION,
            HeaderValue::from_str("Bearer wrong-key").expect("header"),
        )
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);

    let response = as_caller(h.server.get("/tree"), ADMIN, "admin")
        .add_header(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key)).expect("header"),
        )
        .await;
    response.assert_status_ok();

    let response = as_caller(h.server.get("/tree"), ADMIN, "admin")
        .add_header(
            header::AUTHORIZATION,
            HeaderValue::from_str(api_key).expect("header"),
        )
        .await;
    response.assert_status_ok();
}
