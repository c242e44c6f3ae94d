use crate::{
    access::{self, Identity},
    admin, auth,
    config::Config,
    db::{self, DbPool},
    embed::about_router,
    error::{found, AppError, AppResult, FormErrors},
    files, forms, posts, users, views,
};
use anyhow::Result;
use axum::{
    body::StreamBody,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode, Uri},
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get},
    Form, Json, Router,
};
use axum_extra::extract::CookieJar;
use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use serde::Deserialize;
use serde_json::json;
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tokio_util::io::ReaderStream;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub media_dir: PathBuf,
    pub config: Config,
    pub secret: Arc<Vec<u8>>,
    pub login_limiter: auth::LoginRateLimiter,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Self> {
        let media_dir = config.data_dir.join("media").join("posts");
        tokio::fs::create_dir_all(&media_dir).await?;
        let pool = db::open_pool(config.data_dir.join("yatube.db"))?;
        let secret = auth::load_or_create_secret(&config.data_dir.join("secret.key")).await?;
        if let Some(bootstrap) = &config.bootstrap {
            let conn = pool.get()?;
            if users::ensure_bootstrap_admin(&conn, &bootstrap.username, &bootstrap.password)? {
                tracing::info!(username = %bootstrap.username, "created bootstrap administrator");
            }
        }
        Ok(Self {
            pool,
            media_dir,
            config,
            secret: Arc::new(secret),
            login_limiter: auth::LoginRateLimiter::new(5, std::time::Duration::from_secs(60)),
        })
    }

    /// Borrow a pooled connection for the duration of one request step.
    pub fn conn(&self) -> AppResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Issue a session token for `user`.
    pub fn session_for(&self, user: &crate::model::User) -> AppResult<String> {
        Ok(auth::issue_jwt(
            &self.secret,
            user.id,
            &user.username,
            auth::SESSION_TTL,
        )?)
    }
}

/// Build the HTTP application router.
pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/new/", get(views::new_post_form).post(views::create_post))
        .route("/follow/", get(views::follow_index))
        .route(
            "/:username/:post_id/edit/",
            get(views::edit_post_form).post(views::edit_post),
        )
        .route(
            "/:username/:post_id/comment/",
            get(views::comment_form).post(views::add_comment),
        )
        .route(
            "/:username/follow/",
            get(views::profile_follow).post(views::profile_follow),
        )
        .route(
            "/:username/unfollow/",
            get(views::profile_unfollow).post(views::profile_unfollow),
        )
        .layer(middleware::from_fn(access::login_required))
        .layer(DefaultBodyLimit::max(
            state.config.max_upload_bytes() as usize + 64 * 1024,
        ));
    let admin_routes = Router::new()
        .route(
            "/admin/groups/",
            get(admin::list_groups).post(admin::create_group),
        )
        .route("/admin/groups/:slug/", delete(admin::delete_group))
        .route("/admin/posts/", get(admin::search_posts))
        .route("/admin/users/:username/", delete(admin::delete_user))
        .layer(middleware::from_fn(access::admin_required));
    let about: Router<AppState> = about_router().with_state(());
    Router::new()
        .route("/", get(views::index))
        .route("/health", get(health))
        .route("/group/:slug/", get(views::group_posts))
        .route("/auth/login/", get(login_form).post(login))
        .route("/auth/logout/", get(logout).post(logout))
        .route("/auth/signup/", get(signup_form).post(signup))
        .route("/media/posts/:id", get(media))
        .route("/:username/", get(views::profile))
        .route("/:username/:post_id/", get(views::post_view))
        .merge(protected)
        .merge(admin_routes)
        .merge(about)
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            access::identity,
        ))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn not_found(uri: Uri) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "not_found", "path": uri.path() })),
    )
}

fn panic_response(_: Box<dyn std::any::Any + Send + 'static>) -> Response {
    tracing::error!("handler panicked");
    AppError::Internal(anyhow::anyhow!("panic")).into_response()
}

#[derive(Deserialize, Default)]
struct NextQuery {
    next: Option<String>,
}

async fn login_form(Query(q): Query<NextQuery>) -> impl IntoResponse {
    Json(json!({
        "form": { "fields": { "username": { "required": true }, "password": { "required": true } } },
        "next": forms::safe_next(q.next.as_deref()),
    }))
}

async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(input): Form<forms::LoginInput>,
) -> AppResult<Response> {
    if !state.login_limiter.check(&input.username).await {
        tracing::warn!(username = %input.username, "login rate limited");
        return Ok((
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "error": "rate_limited" })),
        )
            .into_response());
    }
    let user = {
        let conn = state.conn()?;
        users::authenticate(&conn, &input.username, &input.password)?
    };
    let Some(user) = user else {
        state.login_limiter.record_failure(&input.username).await;
        tracing::info!(username = %input.username, "login failed");
        let mut errors = FormErrors::new(json!({ "username": input.username }));
        errors.add(
            crate::error::NON_FIELD_ERRORS,
            "Please enter a correct username and password. Note that both fields may be case-sensitive.",
        );
        return Err(AppError::ValidationFailed(errors));
    };
    state.login_limiter.clear(&input.username).await;
    tracing::info!(username = %user.username, "logged in");
    let token = state.session_for(&user)?;
    let next = forms::safe_next(input.next.as_deref());
    Ok((jar.add(auth::session_cookie(&token)), found(&next)).into_response())
}

async fn logout(jar: CookieJar) -> Response {
    (jar.add(auth::clear_session_cookie()), found("/")).into_response()
}

async fn signup_form(identity: Identity) -> impl IntoResponse {
    Json(json!({
        "form": { "fields": {
            "username": { "required": true, "max_length": 150 },
            "first_name": { "required": false },
            "last_name": { "required": false },
            "password": { "required": true, "min_length": users::MIN_PASSWORD_LEN },
        } },
        "user": identity.user(),
    }))
}

async fn signup(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(input): Form<forms::SignupInput>,
) -> AppResult<Response> {
    forms::clean_signup(&input)?;
    let created = {
        let conn = state.conn()?;
        users::create_user(
            &conn,
            &input.username,
            input.first_name.trim(),
            input.last_name.trim(),
            &input.password,
            false,
        )
    };
    let user = match created {
        Ok(user) => user,
        Err(e) if e.to_string() == "duplicate_user" => {
            let mut errors = FormErrors::new(input.echo());
            errors.add("username", "A user with that username already exists.");
            return Err(AppError::ValidationFailed(errors));
        }
        Err(e) => return Err(e.into()),
    };
    tracing::info!(username = %user.username, "signed up");
    let token = state.session_for(&user)?;
    Ok((jar.add(auth::session_cookie(&token)), found("/")).into_response())
}

async fn media(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Response> {
    let path = files::file_path(&state.media_dir, &id).ok_or(AppError::NotFound)?;
    let mime = {
        let conn = state.conn()?;
        posts::image_mime(&conn, &id)?.ok_or(AppError::NotFound)?
    };
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|_| AppError::NotFound)?;
    let body = StreamBody::new(ReaderStream::new(file));
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&mime).map_err(anyhow::Error::from)?,
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=31536000, immutable"),
    );
    Ok((headers, body).into_response())
}

/// Run the HTTP server until Ctrl+C.
pub async fn run_http_server(config: Config) -> Result<()> {
    let addr: SocketAddr = config.bind.parse()?;
    let state = AppState::new(config).await?;
    tracing::info!(%addr, "listening");
    axum::Server::bind(&addr)
        .serve(build_router(state).into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
