use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

#[derive(Debug, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy(Option<String>),
}

pub trait HealthCheckable {
    fn health_status(&self) -> HealthStatus;
}

impl IntoResponse for HealthStatus {
    fn into_response(self) -> Response {
        match self {
            HealthStatus::Healthy => StatusCode::OK.into_response(),
            HealthStatus::Unhealthy(message) => {
                let message = message.unwrap_or_else(|| "balance indexer unhealthy".to_string());
                let body = json!({ "message": message });
                (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_status_codes_test() {
        assert_eq!(HealthStatus::Healthy.into_response().status(), StatusCode::OK);
        assert_eq!(
            HealthStatus::Unhealthy(None).into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
