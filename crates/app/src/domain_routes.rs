use axum::{
    extract::{
        rejection::{PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use tracing::debug;

use admin_service_core::types::{Domain, DomainCreate, DomainId, DomainUpdate};

use crate::auth::CurrentUser;
use crate::extract::{PageQuery, ValidJson};
use crate::problem::ProblemResponse;
use crate::router::{respond, AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/domains/create_domain/", post(create_domain))
        .route("/domains/get_domain/:domain_id", get(get_domain))
        .route("/domains/get_all_domains/", get(list_domains))
        .route("/domains/update_domain/:domain_id", put(update_domain))
        .route("/domains/delete_domain/:domain_id", delete(delete_domain))
}

async fn create_domain(
    State(state): State<AppState>,
    user: CurrentUser,
    ValidJson(input): ValidJson<DomainCreate>,
) -> Result<(StatusCode, Json<Domain>), ProblemResponse> {
    debug!(stage = "app", subject = %user.subject, domain_name = %input.domain_name, "create domain");
    let domain = respond("create_domain", state.domains().create(input).await)?;
    Ok((StatusCode::CREATED, Json(domain)))
}

async fn get_domain(
    State(state): State<AppState>,
    _user: CurrentUser,
    path: Result<Path<DomainId>, PathRejection>,
) -> Result<Json<Domain>, ProblemResponse> {
    let Path(domain_id) = path?;
    let domain = respond("get_domain", state.domains().get(domain_id).await)?;
    Ok(Json(domain))
}

async fn list_domains(
    State(state): State<AppState>,
    _user: CurrentUser,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> Result<Json<Vec<Domain>>, ProblemResponse> {
    let Query(query) = query?;
    let domains = respond("get_all_domains", state.domains().list(query.page()).await)?;
    Ok(Json(domains))
}

async fn update_domain(
    State(state): State<AppState>,
    user: CurrentUser,
    path: Result<Path<DomainId>, PathRejection>,
    ValidJson(update): ValidJson<DomainUpdate>,
) -> Result<Json<Domain>, ProblemResponse> {
    let Path(domain_id) = path?;
    debug!(stage = "app", subject = %user.subject, domain_id, "update domain");
    let domain = respond(
        "update_domain",
        state.domains().update(domain_id, update).await,
    )?;
    Ok(Json(domain))
}

async fn delete_domain(
    State(state): State<AppState>,
    user: CurrentUser,
    path: Result<Path<DomainId>, PathRejection>,
) -> Result<StatusCode, ProblemResponse> {
    let Path(domain_id) = path?;
    debug!(stage = "app", subject = %user.subject, domain_id, "delete domain");
    respond("delete_domain", state.domains().delete(domain_id).await)?;
    Ok(StatusCode::NO_CONTENT)
}
