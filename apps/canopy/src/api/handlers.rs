//! # API Endpoint Handlers
//!
//! Each handler extracts the caller, then runs one service call through
//! `AppState::run`, which bounds it by the request deadline.

use super::{
    AppState,
    auth::CallerIdentity,
    types::{
        ApiError, CreateEntityRequest, CreateEntityResponse, DeleteEntityResponse,
        HealthResponse, PermittedIdsQuery, PermittedIdsResponse, TreeResponse,
        UpdateEntityRequest, UpdateEntityResponse, VersionsResponse,
    },
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use canopy_core::{Capability, CreateInput, Entity, EntityId, ListItem, UpdateInput};

/// Parse an entity id path segment.
fn parse_id(raw: &str) -> Result<EntityId, ApiError> {
    raw.parse::<EntityId>()
        .map_err(|_| ApiError::invalid_param("id", raw))
}

/// Parse a version path segment. Range checks happen in the engine.
fn parse_version(raw: &str) -> Result<i64, ApiError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| ApiError::invalid_param("version", raw))
}

// =============================================================================
// HEALTH HANDLER
// =============================================================================

/// Health check endpoint.
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse::default())
}

// =============================================================================
// TREE HANDLERS
// =============================================================================

/// The forest visible to the caller.
pub async fn tree_handler(
    State(state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
) -> Result<Json<TreeResponse>, ApiError> {
    let roots = state
        .run(move |service, ctx| service.get_tree(ctx, &caller))
        .await?;
    Ok(Json(TreeResponse::new(roots)))
}

/// Every entity the caller holds a capability on.
pub async fn permitted_ids_handler(
    State(state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
    Query(query): Query<PermittedIdsQuery>,
) -> Result<Json<PermittedIdsResponse>, ApiError> {
    let capability = match query.capability.as_deref() {
        Some(raw) => raw.parse::<Capability>()?,
        None => Capability::Read,
    };
    let ids = state
        .run(move |service, ctx| service.get_permitted_ids(ctx, &caller, capability))
        .await?;
    Ok(Json(PermittedIdsResponse { capability, ids }))
}

// =============================================================================
// ENTITY HANDLERS
// =============================================================================

/// Create an entity. Answers 201 with the new id.
pub async fn create_entity_handler(
    State(state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
    Json(request): Json<CreateEntityRequest>,
) -> Result<(StatusCode, Json<CreateEntityResponse>), ApiError> {
    let id = state
        .run(move |service, ctx| {
            let entity_type = service
                .core()
                .validator()
                .parse_entity_type(&request.entity_type)?;
            service.create(
                ctx,
                &caller,
                CreateInput {
                    entity_type,
                    name: request.name,
                    content: request.content,
                    parent_id: request.parent_id,
                    is_draft: request.is_draft,
                },
            )
        })
        .await?;
    Ok((StatusCode::CREATED, Json(CreateEntityResponse { id })))
}

pub async fn get_entity_handler(
    State(state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
    Path(raw_id): Path<String>,
) -> Result<Json<Entity>, ApiError> {
    let id = parse_id(&raw_id)?;
    let entity = state
        .run(move |service, ctx| service.get(ctx, &caller, id))
        .await?;
    Ok(Json(entity))
}

/// Update or publish an entity, optionally moving it.
pub async fn update_entity_handler(
    State(state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
    Path(raw_id): Path<String>,
    Json(request): Json<UpdateEntityRequest>,
) -> Result<Json<UpdateEntityResponse>, ApiError> {
    let id = parse_id(&raw_id)?;
    let publication = state
        .run(move |service, ctx| {
            service.update(
                ctx,
                &caller,
                id,
                UpdateInput {
                    name: request.name,
                    content: request.content,
                    parent_changed: request.parent_changed,
                    parent_id: request.parent_id,
                    is_draft: request.is_draft,
                },
            )
        })
        .await?;
    Ok(Json(UpdateEntityResponse { id, publication }))
}

/// Soft-delete an entity and its whole subtree.
pub async fn delete_entity_handler(
    State(state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
    Path(raw_id): Path<String>,
) -> Result<Json<DeleteEntityResponse>, ApiError> {
    let id = parse_id(&raw_id)?;
    let deleted = state
        .run(move |service, ctx| service.delete(ctx, &caller, id))
        .await?;
    Ok(Json(DeleteEntityResponse { deleted }))
}

/// The content-free projection of an entity.
pub async fn get_list_item_handler(
    State(state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
    Path(raw_id): Path<String>,
) -> Result<Json<ListItem>, ApiError> {
    let id = parse_id(&raw_id)?;
    let item = state
        .run(move |service, ctx| service.get_list_item(ctx, &caller, id))
        .await?;
    Ok(Json(item))
}

// =============================================================================
// VERSION HANDLERS
// =============================================================================

pub async fn list_versions_handler(
    State(state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
    Path(raw_id): Path<String>,
) -> Result<Json<VersionsResponse>, ApiError> {
    let id = parse_id(&raw_id)?;
    let versions = state
        .run(move |service, ctx| service.get_versions_list(ctx, &caller, id))
        .await?;
    Ok(Json(VersionsResponse { id, versions }))
}

/// One immutable snapshot.
pub async fn get_version_handler(
    State(state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
    Path((raw_id, raw_version)): Path<(String, String)>,
) -> Result<Json<Entity>, ApiError> {
    let id = parse_id(&raw_id)?;
    let version = parse_version(&raw_version)?;
    let entity = state
        .run(move |service, ctx| service.get_version(ctx, &caller, id, version))
        .await?;
    Ok(Json(entity))
}
