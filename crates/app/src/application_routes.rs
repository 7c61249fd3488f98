use axum::{
    extract::{
        rejection::{PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use tracing::debug;

use admin_service_core::types::{
    Application, ApplicationCreate, ApplicationId, ApplicationUpdate, Page,
};

use crate::auth::CurrentUser;
use crate::extract::{PageQuery, ValidJson};
use crate::problem::ProblemResponse;
use crate::router::{respond, AppState};

const DOMAIN_HAS_NO_APPLICATIONS: &str = "Applications domain name not found";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/applications/create_application/",
            post(create_application),
        )
        .route(
            "/applications/get_application/:application_id",
            get(get_application),
        )
        .route(
            "/applications/get_applications_by_domain_name/:domain_name",
            get(list_by_domain_name),
        )
        .route(
            "/applications/get_all_applications",
            get(list_applications),
        )
        .route(
            "/applications/update_application/:application_id",
            put(update_application),
        )
        .route(
            "/applications/delete_application/:application_id",
            delete(delete_application),
        )
}

#[derive(Debug, Deserialize)]
struct DomainApplicationsQuery {
    #[serde(default)]
    skip: Option<i64>,
    #[serde(default)]
    limit: Option<i64>,
    #[serde(default)]
    application_name: Option<String>,
}

async fn create_application(
    State(state): State<AppState>,
    user: CurrentUser,
    ValidJson(input): ValidJson<ApplicationCreate>,
) -> Result<(StatusCode, Json<Application>), ProblemResponse> {
    debug!(
        stage = "app",
        subject = %user.subject,
        application_name = %input.application_name,
        domain_name = %input.domain_name,
        "create application"
    );
    let application = respond(
        "create_application",
        state.applications().create(input).await,
    )?;
    Ok((StatusCode::CREATED, Json(application)))
}

async fn get_application(
    State(state): State<AppState>,
    _user: CurrentUser,
    path: Result<Path<ApplicationId>, PathRejection>,
) -> Result<Json<Application>, ProblemResponse> {
    let Path(application_id) = path?;
    let application = respond(
        "get_application",
        state.applications().get(application_id).await,
    )?;
    Ok(Json(application))
}

async fn list_by_domain_name(
    State(state): State<AppState>,
    _user: CurrentUser,
    path: Result<Path<String>, PathRejection>,
    query: Result<Query<DomainApplicationsQuery>, QueryRejection>,
) -> Result<Json<Vec<Application>>, ProblemResponse> {
    let Path(domain_name) = path?;
    let Query(query) = query?;
    let page = Page::from_query(query.skip, query.limit);
    let applications = respond(
        "get_applications_by_domain_name",
        state
            .applications()
            .list_by_domain(&domain_name, query.application_name.as_deref(), page)
            .await,
    )?;
    if applications.is_empty() {
        return Err(ProblemResponse::new(
            StatusCode::NOT_FOUND,
            "not_found",
            DOMAIN_HAS_NO_APPLICATIONS,
        ));
    }
    Ok(Json(applications))
}

async fn list_applications(
    State(state): State<AppState>,
    _user: CurrentUser,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> Result<Json<Vec<Application>>, ProblemResponse> {
    let Query(query) = query?;
    let applications = respond(
        "get_all_applications",
        state.applications().list(query.page()).await,
    )?;
    Ok(Json(applications))
}

async fn update_application(
    State(state): State<AppState>,
    user: CurrentUser,
    path: Result<Path<ApplicationId>, PathRejection>,
    ValidJson(update): ValidJson<ApplicationUpdate>,
) -> Result<Json<Application>, ProblemResponse> {
    let Path(application_id) = path?;
    debug!(stage = "app", subject = %user.subject, application_id, "update application");
    let application = respond(
        "update_application",
        state
            .applications()
            .update(application_id, update)
            .await,
    )?;
    Ok(Json(application))
}

async fn delete_application(
    State(state): State<AppState>,
    user: CurrentUser,
    path: Result<Path<ApplicationId>, PathRejection>,
) -> Result<StatusCode, ProblemResponse> {
    let Path(application_id) = path?;
    debug!(stage = "app", subject = %user.subject, application_id, "delete application");
    respond(
        "delete_application",
        state.applications().delete(application_id).await,
    )?;
    Ok(StatusCode::NO_CONTENT)
}
