use crate::{
    access::{ensure_owner, post_url, profile_url, CurrentUser, Identity},
    api::AppState,
    comments,
    error::{found, AppError, AppResult},
    feed::{self, Feed},
    files, follows, forms, groups,
    model::{Post, User},
    posts::{self, PostFields, StoredImage},
    users,
};
use axum::{
    extract::{Multipart, Path, Query, State},
    response::Response,
    Form, Json,
};
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize, Default)]
pub struct PageQuery {
    pub page: Option<String>,
}

impl PageQuery {
    fn number(&self) -> usize {
        feed::parse_page(self.page.as_deref())
    }
}

fn author_or_404(conn: &Connection, username: &str) -> AppResult<User> {
    users::get_user_by_username(conn, username)?.ok_or(AppError::NotFound)
}

/// Resolve `/<username>/<post_id>/`: the post must exist and belong to that user.
fn post_of_author(conn: &Connection, username: &str, post_id: &str) -> AppResult<(User, Post)> {
    let post_id: i64 = post_id.parse().map_err(|_| AppError::NotFound)?;
    let author = author_or_404(conn, username)?;
    let post = posts::get_post(conn, post_id)?.ok_or(AppError::NotFound)?;
    if post.author_id != author.id {
        return Err(AppError::NotFound);
    }
    Ok((author, post))
}

async fn store_image(state: &AppState, clean: &forms::CleanPost) -> AppResult<Option<StoredImage>> {
    match &clean.image {
        Some((data, mime)) => {
            let id = files::save_file(&state.media_dir, data.clone()).await?;
            Ok(Some(StoredImage {
                id,
                mime: mime.to_string(),
            }))
        }
        None => Ok(None),
    }
}

/// Remove stored images that no post references any more.
pub(crate) async fn prune_images(state: &AppState, ids: Vec<String>) {
    for id in ids {
        let in_use = state
            .conn()
            .and_then(|conn| Ok(posts::image_in_use(&conn, &id)?));
        match in_use {
            Ok(false) => {
                if let Err(e) = files::remove_file(&state.media_dir, &id).await {
                    tracing::warn!(image = %id, error = %e, "could not remove image");
                }
            }
            Ok(true) => {}
            Err(e) => tracing::warn!(image = %id, error = %e, "could not check image use"),
        }
    }
}

/// Run a database write that stores `image`, dropping the file again when
/// the write fails.
async fn write_with_image<T>(
    state: &AppState,
    image: &Option<StoredImage>,
    write: impl FnOnce(&Connection) -> anyhow::Result<T>,
) -> AppResult<T> {
    let res = state.conn().and_then(|conn| Ok(write(&conn)?));
    if res.is_err() {
        if let Some(img) = image {
            prune_images(state, vec![img.id.clone()]).await;
        }
    }
    res
}

pub async fn index(
    State(state): State<AppState>,
    Query(q): Query<PageQuery>,
) -> AppResult<Json<Value>> {
    let conn = state.conn()?;
    let page = feed::load(&conn, &Feed::Global, q.number(), state.config.page_size)?;
    Ok(Json(json!({ "page": page })))
}

pub async fn group_posts(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Query(q): Query<PageQuery>,
) -> AppResult<Json<Value>> {
    let conn = state.conn()?;
    let group = groups::get_group_by_slug(&conn, &slug)?.ok_or(AppError::NotFound)?;
    let page = feed::load(&conn, &Feed::Group(group.id), q.number(), state.config.page_size)?;
    Ok(Json(json!({ "group": group, "page": page })))
}

pub async fn profile(
    State(state): State<AppState>,
    identity: Identity,
    Path(username): Path<String>,
    Query(q): Query<PageQuery>,
) -> AppResult<Json<Value>> {
    let conn = state.conn()?;
    let author = author_or_404(&conn, &username)?;
    let page = feed::load(&conn, &Feed::Author(author.id), q.number(), state.config.page_size)?;
    let following = match identity.user() {
        Some(viewer) => follows::is_following(&conn, viewer.id, author.id)?,
        None => false,
    };
    Ok(Json(json!({
        "author": author,
        "full_name": author.full_name(),
        "posts_count": page.count,
        "followers_count": follows::followers_count(&conn, author.id)?,
        "following_count": follows::following_count(&conn, author.id)?,
        "following": following,
        "page": page,
    })))
}

pub async fn post_view(
    State(state): State<AppState>,
    Path((username, post_id)): Path<(String, String)>,
) -> AppResult<Json<Value>> {
    let conn = state.conn()?;
    let (author, post) = post_of_author(&conn, &username, &post_id)?;
    let view = posts::get_post_view(&conn, post.id)?.ok_or(AppError::NotFound)?;
    let comments = comments::list_comments(&conn, post.id)?;
    Ok(Json(json!({
        "author": author,
        "posts_count": posts::count_posts_by_author(&conn, author.id)?,
        "post": view,
        "comments": comments,
        "form": forms::comment_form(),
    })))
}

pub async fn new_post_form(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
) -> AppResult<Json<Value>> {
    let conn = state.conn()?;
    let groups = groups::list_groups(&conn, None)?;
    Ok(Json(json!({ "form": forms::post_form(&groups, None) })))
}

pub async fn create_post(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    multipart: Multipart,
) -> AppResult<Response> {
    let input = forms::PostInput::from_multipart(multipart).await?;
    let clean = {
        let conn = state.conn()?;
        forms::clean_post(&conn, &input, state.config.max_upload_bytes())?
    };
    let image = store_image(&state, &clean).await?;
    let fields = PostFields {
        text: clean.text,
        group_id: clean.group_id,
        image,
        image_name: clean.image_name,
    };
    let post = write_with_image(&state, &fields.image, |conn| {
        posts::create_post(conn, user.id, &fields)
    })
    .await?;
    tracing::info!(post_id = post.id, author = %user.username, "post created");
    Ok(found("/"))
}

pub async fn edit_post_form(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((username, post_id)): Path<(String, String)>,
) -> AppResult<Json<Value>> {
    let conn = state.conn()?;
    let (author, post) = post_of_author(&conn, &username, &post_id)?;
    ensure_owner(&user, &author, &post)?;
    let groups = groups::list_groups(&conn, None)?;
    Ok(Json(json!({
        "form": forms::post_form(&groups, Some(&post)),
        "post": post,
    })))
}

pub async fn edit_post(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((username, post_id)): Path<(String, String)>,
    multipart: Multipart,
) -> AppResult<Response> {
    let post = {
        let conn = state.conn()?;
        let (author, post) = post_of_author(&conn, &username, &post_id)?;
        ensure_owner(&user, &author, &post)?;
        post
    };
    let input = forms::PostInput::from_multipart(multipart).await?;
    let clean = {
        let conn = state.conn()?;
        forms::clean_post(&conn, &input, state.config.max_upload_bytes())?
    };
    let image = store_image(&state, &clean).await?;
    let fields = PostFields {
        text: clean.text,
        group_id: clean.group_id,
        image,
        image_name: clean.image_name,
    };
    write_with_image(&state, &fields.image, |conn| {
        posts::update_post(conn, post.id, &fields)
    })
    .await?;
    if let (Some(old), Some(new)) = (&post.image, &fields.image) {
        if *old != new.id {
            prune_images(&state, vec![old.clone()]).await;
        }
    }
    tracing::info!(post_id = post.id, author = %user.username, "post edited");
    Ok(found(&post_url(&username, post.id)))
}

pub async fn comment_form(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    Path((username, post_id)): Path<(String, String)>,
) -> AppResult<Json<Value>> {
    let conn = state.conn()?;
    let (_, post) = post_of_author(&conn, &username, &post_id)?;
    let view = posts::get_post_view(&conn, post.id)?.ok_or(AppError::NotFound)?;
    Ok(Json(json!({ "post": view, "form": forms::comment_form() })))
}

pub async fn add_comment(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((username, post_id)): Path<(String, String)>,
    Form(input): Form<forms::CommentInput>,
) -> AppResult<Response> {
    let conn = state.conn()?;
    let (_, post) = post_of_author(&conn, &username, &post_id)?;
    let text = forms::clean_comment(&input)?;
    let comment = comments::create_comment(&conn, post.id, user.id, &text)?;
    tracing::info!(comment_id = comment.id, post_id = post.id, author = %user.username, "comment created");
    Ok(found(&post_url(&username, post.id)))
}

pub async fn follow_index(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(q): Query<PageQuery>,
) -> AppResult<Json<Value>> {
    let conn = state.conn()?;
    let page = feed::load(&conn, &Feed::Followed(user.id), q.number(), state.config.page_size)?;
    Ok(Json(json!({ "page": page })))
}

pub async fn profile_follow(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(username): Path<String>,
) -> AppResult<Response> {
    let conn = state.conn()?;
    let author = author_or_404(&conn, &username)?;
    let change = follows::follow(&conn, user.id, author.id)?;
    tracing::info!(user = %user.username, author = %author.username, ?change, "follow");
    Ok(found(&profile_url(&author.username)))
}

pub async fn profile_unfollow(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(username): Path<String>,
) -> AppResult<Response> {
    let conn = state.conn()?;
    let author = author_or_404(&conn, &username)?;
    let change = follows::unfollow(&conn, user.id, author.id)?;
    tracing::info!(user = %user.username, author = %author.username, ?change, "unfollow");
    Ok(found(&profile_url(&author.username)))
}
