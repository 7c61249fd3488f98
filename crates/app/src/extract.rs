use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Request},
    http::StatusCode,
    Json,
};
use serde::{de::DeserializeOwned, Deserialize};

use admin_service_core::{types::Page, Validate};

use crate::problem::ProblemResponse;

/// JSON body that has passed field validation.
#[derive(Debug)]
pub struct ValidJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ValidJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ProblemResponse;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(body_rejection)?;
        value.validate().map_err(|err| {
            ProblemResponse::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "validation_error",
                err.to_string(),
            )
        })?;
        Ok(Self(value))
    }
}

fn body_rejection(rejection: JsonRejection) -> ProblemResponse {
    let status = match rejection {
        JsonRejection::MissingJsonContentType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    };
    ProblemResponse::new(status, "invalid_body", rejection.body_text())
}

/// `?skip=&limit=` query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub skip: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
}

impl PageQuery {
    pub fn page(&self) -> Page {
        Page::from_query(self.skip, self.limit)
    }
}
