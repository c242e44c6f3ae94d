//! Who is asking, and may they do it.
//!
//! `identity` runs on every request and attaches an [`Identity`].
//! `login_required` and `admin_required` are layered on the route groups
//! that need them, so handlers behind them never see an anonymous caller.
//! Ownership is checked per resource with [`ensure_owner`].

use crate::{
    api::AppState,
    auth,
    error::AppError,
    model::{Post, User},
    users,
};
use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{request::Parts, Request, Uri},
    middleware::Next,
    response::Response,
};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// The caller of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Anonymous,
    User(User),
}

impl Identity {
    pub fn user(&self) -> Option<&User> {
        match self {
            Identity::Anonymous => None,
            Identity::User(user) => Some(user),
        }
    }
}

/// Path plus query, used as the return address after logging in.
pub fn path_and_query(uri: &Uri) -> String {
    uri.path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string())
}

/// Characters escaped in one path segment.
const SEGMENT_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'@')
    .remove(b'+');

/// Canonical URL of a profile.
pub fn profile_url(username: &str) -> String {
    format!("/{}/", utf8_percent_encode(username, SEGMENT_ESCAPE))
}

/// Canonical URL of a single post.
pub fn post_url(username: &str, post_id: i64) -> String {
    format!("{}{}/", profile_url(username), post_id)
}

fn resolve(state: &AppState, req_headers: &axum::http::HeaderMap) -> Identity {
    let Some(token) = auth::token_from_headers(req_headers) else {
        return Identity::Anonymous;
    };
    let claims = match auth::verify_jwt(&state.secret, &token) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::debug!(error = %e, "ignoring invalid session token");
            return Identity::Anonymous;
        }
    };
    let user = state
        .pool
        .get()
        .map_err(anyhow::Error::from)
        .and_then(|conn| users::get_user_by_id(&conn, claims.uid));
    match user {
        Ok(Some(user)) if user.username == claims.sub => Identity::User(user),
        Ok(_) => Identity::Anonymous,
        Err(e) => {
            tracing::warn!(error = %e, "could not resolve session user");
            Identity::Anonymous
        }
    }
}

/// Attach the caller's [`Identity`] to the request.
pub async fn identity<B>(
    State(state): State<AppState>,
    mut req: Request<B>,
    next: Next<B>,
) -> Response {
    let identity = resolve(&state, req.headers());
    req.extensions_mut().insert(identity);
    next.run(req).await
}

/// Send anonymous callers to the login page, remembering where they were going.
pub async fn login_required<B>(req: Request<B>, next: Next<B>) -> Result<Response, AppError> {
    match req.extensions().get::<Identity>() {
        Some(Identity::User(_)) => Ok(next.run(req).await),
        _ => Err(AppError::Unauthorized {
            next: path_and_query(req.uri()),
        }),
    }
}

/// Admin routes: anonymous callers log in first, everyone else gets a 404.
pub async fn admin_required<B>(req: Request<B>, next: Next<B>) -> Result<Response, AppError> {
    match req.extensions().get::<Identity>() {
        Some(Identity::User(user)) if user.is_admin => Ok(next.run(req).await),
        Some(Identity::User(_)) => Err(AppError::NotFound),
        _ => Err(AppError::Unauthorized {
            next: path_and_query(req.uri()),
        }),
    }
}

/// Editing is reserved to the author; anyone else is sent to the read view.
pub fn ensure_owner(actor: &User, author: &User, post: &Post) -> Result<(), AppError> {
    if actor.username == author.username && post.author_id == author.id {
        Ok(())
    } else {
        Err(AppError::Forbidden {
            redirect: post_url(&author.username, post.id),
        })
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Identity {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<Identity>()
            .cloned()
            .unwrap_or(Identity::Anonymous))
    }
}

/// The authenticated caller; extraction fails with a login redirect.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.extensions.get::<Identity>() {
            Some(Identity::User(user)) => Ok(CurrentUser(user.clone())),
            _ => Err(AppError::Unauthorized {
                next: path_and_query(&parts.uri),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: i64, name: &str) -> User {
        User {
            id,
            username: name.into(),
            first_name: String::new(),
            last_name: String::new(),
            is_admin: false,
            date_joined: 0,
        }
    }

    fn post_by(author: &User) -> Post {
        Post {
            id: 1,
            text: "t".into(),
            created_at: 0,
            author_id: author.id,
            group_id: None,
            image: None,
            image_mime: None,
            image_name: None,
        }
    }

    #[test]
    fn owner_may_edit() {
        let a = user(1, "a");
        assert!(ensure_owner(&a, &a, &post_by(&a)).is_ok());
    }

    #[test]
    fn non_owner_sent_to_post_view() {
        let a = user(1, "a");
        let b = user(2, "b");
        match ensure_owner(&b, &a, &post_by(&a)) {
            Err(AppError::Forbidden { redirect }) => assert_eq!(redirect, "/a/1/"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn urls_escape_usernames() {
        assert_eq!(profile_url("leo"), "/leo/");
        assert_eq!(post_url("a.b@c+d-e_f", 3), "/a.b@c+d-e_f/3/");
        assert_eq!(profile_url("лев"), "/%D0%BB%D0%B5%D0%B2/");
        assert_eq!(post_url("лев", 1), "/%D0%BB%D0%B5%D0%B2/1/");
    }

    #[test]
    fn return_path_keeps_query() {
        let uri: Uri = "/follow/?page=2".parse().unwrap();
        assert_eq!(path_and_query(&uri), "/follow/?page=2");
        assert_eq!(Identity::Anonymous.user(), None);
    }
}
