use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, Query, State, rejection::JsonRejection},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
    routing::get,
};

use crate::config::MembershipConfig;
use crate::error::{ErrorKind, LibError};
use crate::identity::ActingIdentity;
use crate::models::{AddMemberPayload, BatchQuery};
use crate::operations::MembershipOperations;
use crate::store::GraphStore;

#[derive(Debug)]
pub struct AppError(pub LibError);

impl From<LibError> for AppError {
    fn from(value: LibError) -> Self {
        Self(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self.0.kind {
            ErrorKind::Database => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::EmptyResult => StatusCode::BAD_REQUEST,
            ErrorKind::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(kind = ?self.0.kind, error = %self.0.source, "membership request failed");
        } else {
            tracing::warn!(kind = ?self.0.kind, error = %self.0.source, "membership request rejected");
        }
        (status, self.0.public).into_response()
    }
}

/// Reads the identity an authentication layer stored in the request extensions.
/// Requests without one proceed as anonymous.
impl<S> FromRequestParts<S> for ActingIdentity
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<ActingIdentity>()
            .cloned()
            .unwrap_or_default())
    }
}

pub trait HasStore {
    type Store: GraphStore;

    fn store(&self) -> Arc<Self::Store>;
}

pub trait MembershipApp: HasStore {
    /// Shared configuration, built once at startup.
    fn config(&self) -> Arc<MembershipConfig>;

    fn operations(&self) -> MembershipOperations<Self::Store> {
        MembershipOperations::new(self.store(), self.config())
    }
}

async fn get_entity_handler<S>(
    State(app): State<S>,
    actor: ActingIdentity,
    Path(entity_id): Path<String>,
) -> Result<impl IntoResponse, AppError>
where
    S: MembershipApp + Clone + Send + Sync + 'static,
{
    let entity = app.operations().get_entity(&actor, Some(entity_id.as_str())).await?;
    Ok(Json(entity))
}

async fn list_group_members_handler<S>(
    State(app): State<S>,
    Path(group_id): Path<String>,
    Query(query): Query<BatchQuery>,
) -> Result<impl IntoResponse, AppError>
where
    S: MembershipApp + Clone + Send + Sync + 'static,
{
    let envelope = app
        .operations()
        .list_group_members(Some(group_id.as_str()), &query)
        .await?;
    Ok(Json(envelope))
}

async fn add_member_handler<S>(
    State(app): State<S>,
    actor: ActingIdentity,
    Path(group_id): Path<String>,
    payload: Result<Json<AddMemberPayload>, JsonRejection>,
) -> Result<impl IntoResponse, AppError>
where
    S: MembershipApp + Clone + Send + Sync + 'static,
{
    // An unreadable body carries no user id; it is rejected like a missing one.
    let user_id = match payload {
        Ok(Json(payload)) => payload.user_id,
        Err(rejection) => {
            tracing::debug!(error = %rejection, "add member body rejected");
            None
        }
    };
    let group = app
        .operations()
        .add_member(&actor, Some(group_id.as_str()), user_id.as_deref())
        .await?;
    Ok(Json(group))
}

async fn remove_member_handler<S>(
    State(app): State<S>,
    actor: ActingIdentity,
    Path((group_id, entity_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError>
where
    S: MembershipApp + Clone + Send + Sync + 'static,
{
    let group = app
        .operations()
        .remove_member(&actor, Some(group_id.as_str()), Some(entity_id.as_str()))
        .await?;
    Ok(Json(group))
}

async fn list_entity_groups_handler<S>(
    State(app): State<S>,
    actor: ActingIdentity,
    Path(entity_id): Path<String>,
    Query(query): Query<BatchQuery>,
) -> Result<impl IntoResponse, AppError>
where
    S: MembershipApp + Clone + Send + Sync + 'static,
{
    let envelope = app
        .operations()
        .list_entity_groups(&actor, Some(entity_id.as_str()), &query)
        .await?;
    Ok(Json(envelope))
}

async fn list_ungrouped_handler<S>(
    State(app): State<S>,
    Query(query): Query<BatchQuery>,
) -> Result<impl IntoResponse, AppError>
where
    S: MembershipApp + Clone + Send + Sync + 'static,
{
    let envelope = app.operations().list_ungrouped(&query).await?;
    Ok(Json(envelope))
}

pub fn routes<S>() -> Router<S>
where
    S: MembershipApp + Clone + Send + Sync + 'static,
{
    tracing::info!("Registering route /entity/{{entity_id}} [GET]");
    tracing::info!("Registering route /entity/{{entity_id}}/groups [GET]");
    tracing::info!("Registering route /entities/ungrouped [GET]");
    tracing::info!("Registering route /group/{{group_id}}/members [GET,POST]");
    tracing::info!("Registering route /group/{{group_id}}/members/{{entity_id}} [DELETE]");

    Router::new()
        .route("/entity/{entity_id}", get(get_entity_handler::<S>))
        .route(
            "/entity/{entity_id}/groups",
            get(list_entity_groups_handler::<S>),
        )
        .route("/entities/ungrouped", get(list_ungrouped_handler::<S>))
        .route(
            "/group/{group_id}/members",
            get(list_group_members_handler::<S>).post(add_member_handler::<S>),
        )
        .route(
            "/group/{group_id}/members/{entity_id}",
            axum::routing::delete(remove_member_handler::<S>),
        )
}
