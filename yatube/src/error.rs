use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use thiserror::Error;

/// Key used for errors that belong to the whole form rather than one field.
pub const NON_FIELD_ERRORS: &str = "__all__";

/// Rejected form input echoed back with per-field messages.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct FormErrors {
    pub form: serde_json::Value,
    pub errors: BTreeMap<String, Vec<String>>,
}

impl FormErrors {
    pub fn new(form: serde_json::Value) -> Self {
        Self {
            form,
            errors: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.errors
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Form-level error with no echoed input.
    pub fn non_field(message: impl Into<String>) -> Self {
        let mut errors = Self::new(json!({}));
        errors.add(NON_FIELD_ERRORS, message);
        errors
    }
}

/// Every failure a request can end in.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found")]
    NotFound,
    #[error("validation failed")]
    ValidationFailed(FormErrors),
    #[error("login required")]
    Unauthorized { next: String },
    #[error("owner only")]
    Forbidden { redirect: String },
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type AppResult<T> = Result<T, AppError>;

/// 302 redirect, the status browsers follow with a GET.
pub fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

/// Characters escaped in a `next` return path; `/` stays readable.
const NEXT_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// Login URL that brings the user back to `next` afterwards.
pub fn login_url(next: &str) -> String {
    format!(
        "/auth/login/?next={}",
        utf8_percent_encode(next, NEXT_ESCAPE)
    )
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::NotFound => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": "not_found" }))).into_response()
            }
            AppError::ValidationFailed(errors) => {
                (StatusCode::BAD_REQUEST, Json(errors)).into_response()
            }
            AppError::Unauthorized { next } => found(&login_url(&next)),
            AppError::Forbidden { redirect } => found(&redirect),
            AppError::Database(e) => server_fault(e.to_string()),
            AppError::Pool(e) => server_fault(e.to_string()),
            AppError::Internal(e) => server_fault(format!("{:#}", e)),
        }
    }
}

fn server_fault(detail: String) -> Response {
    tracing::error!(error = %detail, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "server_error" })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_url_keeps_slashes() {
        assert_eq!(login_url("/new/"), "/auth/login/?next=/new/");
        assert_eq!(
            login_url("/follow/?page=2"),
            "/auth/login/?next=/follow/%3Fpage%3D2"
        );
    }

    #[test]
    fn unauthorized_redirects_to_login() {
        let resp = AppError::Unauthorized {
            next: "/a/1/edit/".into(),
        }
        .into_response();
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(
            resp.headers()[header::LOCATION],
            "/auth/login/?next=/a/1/edit/"
        );
    }

    #[test]
    fn forbidden_redirects_to_view() {
        let resp = AppError::Forbidden {
            redirect: "/a/1/".into(),
        }
        .into_response();
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(resp.headers()[header::LOCATION], "/a/1/");
    }

    #[test]
    fn faults_hide_detail() {
        let resp = AppError::Internal(anyhow::anyhow!("disk on fire")).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn form_errors_collect_per_field() {
        let mut errors = FormErrors::new(json!({"text": ""}));
        assert!(errors.is_empty());
        errors.add("text", "This field is required.");
        errors.add("text", "second");
        assert_eq!(errors.errors["text"].len(), 2);
    }
}
