use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::{
    models::{ContributorStats, RepoStatsResponse},
    AppState,
};

pub enum AppError {
    Status(StatusCode),
    Internal(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            Self::Status(status) => status.into_response(),
            Self::Internal(err) => {
                tracing::error!("{:?}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, format!("Something went wrong: {}", err))
                    .into_response()
            }
        }
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(err: E) -> Self {
        Self::Internal(err.into())
    }
}

pub fn build_router() -> Router<AppState> {
    Router::new()
        .route("/", get(redirect_home))
        .route("/stats", get(get_stats))
        .route("/contributors", get(get_contributors))
        .route("/{repo}", get(redirect_repo))
}

async fn get_stats(State(state): State<AppState>) -> Result<Json<RepoStatsResponse>, AppError> {
    Ok(Json(state.service.repo_stats().await?))
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ContributorsQuery {
    limit: Option<String>,
}

async fn get_contributors(
    State(state): State<AppState>,
    Query(query): Query<ContributorsQuery>,
) -> Result<Json<Vec<ContributorStats>>, AppError> {
    // An invalid or negative limit means "all contributors".
    let limit = query
        .limit
        .and_then(|value| value.parse::<i64>().ok())
        .filter(|&limit| limit > 0)
        .unwrap_or(0) as usize;
    Ok(Json(state.service.contributors(limit).await?))
}

async fn redirect_home(State(state): State<AppState>) -> Redirect {
    Redirect::permanent(state.config.github.base_url.as_str())
}

async fn redirect_repo(
    State(state): State<AppState>,
    Path(repo): Path<String>,
) -> Result<Redirect, AppError> {
    let url = state
        .config
        .github
        .base_url
        .join(&repo)
        .map_err(|_| AppError::Status(StatusCode::BAD_REQUEST))?;
    Ok(Redirect::permanent(url.as_str()))
}
