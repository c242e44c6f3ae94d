//! Administrator endpoints for managing groups, users and posts.

use crate::{
    access::CurrentUser,
    api::AppState,
    error::{AppError, AppResult, FormErrors},
    feed::{self, Feed},
    forms, groups, posts, users, views,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize, Default)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub page: Option<String>,
}

impl SearchQuery {
    fn term(&self) -> Option<&str> {
        self.q.as_deref().map(str::trim).filter(|q| !q.is_empty())
    }
}

pub async fn list_groups(
    State(state): State<AppState>,
    Query(q): Query<SearchQuery>,
) -> AppResult<Json<Value>> {
    let conn = state.conn()?;
    let groups = groups::list_groups(&conn, q.term())?;
    Ok(Json(json!({ "groups": groups })))
}

#[derive(Debug, Deserialize)]
pub struct NewGroup {
    #[serde(default)]
    pub title: String,
    pub slug: Option<String>,
    #[serde(default)]
    pub description: String,
}

pub async fn create_group(
    State(state): State<AppState>,
    CurrentUser(admin): CurrentUser,
    Json(input): Json<NewGroup>,
) -> AppResult<Response> {
    let conn = state.conn()?;
    let slug = input.slug.as_deref().filter(|s| !s.trim().is_empty());
    match groups::create_group(&conn, &input.title, slug, input.description.trim()) {
        Ok(group) => {
            tracing::info!(slug = %group.slug, admin = %admin.username, "group created");
            Ok((StatusCode::CREATED, Json(group)).into_response())
        }
        Err(e) => {
            let (field, message) = match e.to_string().as_str() {
                "empty_title" => ("title", forms::REQUIRED),
                "invalid_slug" => (
                    "slug",
                    "Enter a valid slug consisting of letters, numbers, underscores or hyphens.",
                ),
                "duplicate_slug" => ("slug", "Group with this Slug already exists."),
                _ => return Err(e.into()),
            };
            let mut errors = FormErrors::new(json!({
                "title": input.title,
                "slug": input.slug,
                "description": input.description,
            }));
            errors.add(field, message);
            Err(AppError::ValidationFailed(errors))
        }
    }
}

pub async fn delete_group(
    State(state): State<AppState>,
    CurrentUser(admin): CurrentUser,
    Path(slug): Path<String>,
) -> AppResult<StatusCode> {
    let conn = state.conn()?;
    if !groups::delete_group(&conn, &slug)? {
        return Err(AppError::NotFound);
    }
    tracing::info!(%slug, admin = %admin.username, "group deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Posts whose text contains `q`, newest first; every post without `q`.
pub async fn search_posts(
    State(state): State<AppState>,
    Query(q): Query<SearchQuery>,
) -> AppResult<Json<Value>> {
    let conn = state.conn()?;
    let selection = match q.term() {
        Some(term) => Feed::Search(term.to_string()),
        None => Feed::Global,
    };
    let number = feed::parse_page(q.page.as_deref());
    let page = feed::load(&conn, &selection, number, state.config.page_size)?;
    Ok(Json(json!({ "q": q.term(), "page": page })))
}

pub async fn delete_user(
    State(state): State<AppState>,
    CurrentUser(admin): CurrentUser,
    Path(username): Path<String>,
) -> AppResult<StatusCode> {
    let images = {
        let conn = state.conn()?;
        let user = users::get_user_by_username(&conn, &username)?.ok_or(AppError::NotFound)?;
        let images = posts::image_ids_by_author(&conn, user.id)?;
        users::delete_user(&conn, user.id)?;
        images
    };
    tracing::warn!(%username, admin = %admin.username, "user deleted");
    views::prune_images(&state, images).await;
    Ok(StatusCode::NO_CONTENT)
}
