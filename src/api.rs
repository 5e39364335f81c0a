use std::sync::Arc;

use anyhow::anyhow;
use axum::{
    Json, Router,
    extract::{FromRequest, FromRequestParts, Path, State, rejection::JsonRejection},
    http::{StatusCode, header::AUTHORIZATION, request::Parts},
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::json;

use crate::auth::{Authenticator, Credential, Identity};
use crate::error::{ErrorKind, LibError, Result as LibResult};
use crate::models::{CreateMindMapPayload, MindMapId, ReplaceGraphPayload};
use crate::operations::MindMapOperations;

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
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(kind = ?self.0.kind, error = %self.0.source, "mind map api request failed");
        } else {
            tracing::debug!(kind = ?self.0.kind, error = %self.0.source, "mind map api request rejected");
        }

        let mut error = json!({
            "code": self.0.code,
            "message": self.0.public,
        });
        if !self.0.violations.is_empty() {
            error["violations"] = json!(self.0.violations);
        }
        (status, Json(json!({ "error": error }))).into_response()
    }
}

pub trait HasOperations {
    fn operations(&self) -> MindMapOperations;
}

pub trait MindMapApp: HasOperations + Authenticator + Clone + Send + Sync + 'static {}

/// Ready-made application state: a store behind [`MindMapOperations`] plus an authenticator.
#[derive(Clone)]
pub struct AppState {
    operations: MindMapOperations,
    authenticator: Arc<dyn Authenticator>,
}

impl AppState {
    pub fn new(operations: MindMapOperations, authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            operations,
            authenticator,
        }
    }
}

impl HasOperations for AppState {
    fn operations(&self) -> MindMapOperations {
        self.operations.clone()
    }
}

impl Authenticator for AppState {
    fn authenticate(&self, credential: &Credential) -> LibResult<Identity> {
        self.authenticator.authenticate(credential)
    }
}

impl MindMapApp for AppState {}

/// JSON body extractor whose rejections use the API error envelope (400) instead of
/// axum's plain-text 415/422 responses.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(
        req: axum::extract::Request,
        state: &S,
    ) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(AppError(LibError::invalid(
                "Invalid mind map request",
                anyhow!("{}", rejection.body_text()),
            ))),
        }
    }
}

/// Ids that are not UUIDs cannot name a stored mind map, so they read as missing.
fn parse_mind_map_id(raw: &str) -> LibResult<MindMapId> {
    raw.parse::<MindMapId>()
        .map_err(|_| LibError::not_found("Mind map not found", anyhow!("mind map {raw} not found")))
}

/// The caller identity, resolved from the `Authorization: Bearer` header on every request.
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedUser(pub Identity);

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: MindMapApp,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let credential = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(Credential::from_authorization_header)
            .ok_or_else(|| {
                LibError::unauthenticated(
                    "Authentication required",
                    anyhow!("missing or malformed bearer credential"),
                )
            })?;
        let identity = state.authenticate(&credential)?;
        Ok(Self(identity))
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now(),
    }))
}

async fn whoami_handler(AuthenticatedUser(identity): AuthenticatedUser) -> impl IntoResponse {
    Json(json!({
        "userId": identity.user_id(),
    }))
}

async fn list_mind_maps_handler<S>(
    State(app): State<S>,
    AuthenticatedUser(identity): AuthenticatedUser,
) -> Result<impl IntoResponse, AppError>
where
    S: MindMapApp,
{
    let summaries = app.operations().list_mind_maps(&identity).await?;
    Ok(Json(summaries))
}

async fn create_mind_map_handler<S>(
    State(app): State<S>,
    AuthenticatedUser(identity): AuthenticatedUser,
    ApiJson(payload): ApiJson<CreateMindMapPayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: MindMapApp,
{
    let mind_map = app
        .operations()
        .create_mind_map(&identity, payload)
        .await?;
    Ok((StatusCode::CREATED, Json(mind_map)))
}

async fn get_mind_map_handler<S>(
    State(app): State<S>,
    AuthenticatedUser(identity): AuthenticatedUser,
    Path(mind_map_id): Path<String>,
) -> Result<impl IntoResponse, AppError>
where
    S: MindMapApp,
{
    let mind_map_id = parse_mind_map_id(&mind_map_id)?;
    let mind_map = app
        .operations()
        .get_mind_map(&identity, mind_map_id)
        .await?;
    Ok(Json(mind_map))
}

async fn replace_mind_map_handler<S>(
    State(app): State<S>,
    AuthenticatedUser(identity): AuthenticatedUser,
    Path(mind_map_id): Path<String>,
    ApiJson(payload): ApiJson<ReplaceGraphPayload>,
) -> Result<impl IntoResponse, AppError>
where
    S: MindMapApp,
{
    let mind_map_id = parse_mind_map_id(&mind_map_id)?;
    let mind_map = app
        .operations()
        .replace_mind_map_graph(&identity, mind_map_id, payload)
        .await?;
    Ok(Json(mind_map))
}

async fn delete_mind_map_handler<S>(
    State(app): State<S>,
    AuthenticatedUser(identity): AuthenticatedUser,
    Path(mind_map_id): Path<String>,
) -> Result<impl IntoResponse, AppError>
where
    S: MindMapApp,
{
    let mind_map_id = parse_mind_map_id(&mind_map_id)?;
    app.operations()
        .delete_mind_map(&identity, mind_map_id)
        .await?;
    Ok(Json(json!({ "message": "Mind map deleted" })))
}

pub fn routes<S>() -> Router<S>
where
    S: MindMapApp,
{
    tracing::info!("Registering route /health [GET]");
    tracing::info!("Registering route /auth/me [GET]");
    tracing::info!("Registering route /mindmaps [GET,POST]");
    tracing::info!("Registering route /mindmaps/{{mind_map_id}} [GET,PUT,DELETE]");

    Router::new()
        .route("/health", get(health_handler))
        .route("/auth/me", get(whoami_handler))
        .route(
            "/mindmaps",
            get(list_mind_maps_handler::<S>).post(create_mind_map_handler::<S>),
        )
        .route(
            "/mindmaps/{mind_map_id}",
            get(get_mind_map_handler::<S>)
                .put(replace_mind_map_handler::<S>)
                .delete(delete_mind_map_handler::<S>),
        )
}
