use anyhow::Result;
use argon2::password_hash::{
    rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::Argon2;
use axum::http::{header, HeaderMap};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    path::Path,
    sync::Arc,
    time::{Duration as StdDuration, Instant},
};
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;

/// Name of the cookie carrying the session token.
pub const SESSION_COOKIE: &str = "sessionid";

/// Lifetime of an issued session.
pub const SESSION_TTL: Duration = Duration::days(14);

/// Hash a password using argon2id.
pub fn hash_password(pass: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(pass.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!(e))?
        .to_string();
    Ok(hash)
}

/// Verify a password against an encoded hash.
pub fn verify_password(pass: &str, hash: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        Argon2::default()
            .verify_password(pass.as_bytes(), &parsed)
            .is_ok()
    } else {
        false
    }
}

/// Claims stored within issued JWTs.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Claims {
    pub sub: String,
    pub uid: i64,
    pub exp: usize,
}

/// Issue a JWT for a given user valid for the provided duration.
pub fn issue_jwt(secret: &[u8], uid: i64, sub: &str, valid_for: Duration) -> Result<String> {
    let exp = (OffsetDateTime::now_utc() + valid_for).unix_timestamp() as usize;
    let claims = Claims {
        sub: sub.into(),
        uid,
        exp,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret),
    )?;
    Ok(token)
}

/// Verify a JWT and return its claims if valid.
pub fn verify_jwt(secret: &[u8], token: &str) -> Result<Claims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    validation.leeway = 0;
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)?;
    if data.claims.exp < OffsetDateTime::now_utc().unix_timestamp() as usize {
        anyhow::bail!("expired");
    }
    Ok(data.claims)
}

/// Read the signing secret from `path`, generating and persisting one on first use.
pub async fn load_or_create_secret(path: &Path) -> Result<Vec<u8>> {
    if let Ok(bytes) = tokio::fs::read(path).await {
        let text = String::from_utf8_lossy(&bytes);
        let secret = STANDARD.decode(text.trim())?;
        if !secret.is_empty() {
            return Ok(secret);
        }
    }
    let mut secret = vec![0u8; 32];
    rand::thread_rng().fill_bytes(&mut secret);
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::write(path, STANDARD.encode(&secret)).await?;
    Ok(secret)
}

/// Extract a session token from the bearer header or the session cookie.
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if let Some(token) = bearer {
        return Some(token.to_string());
    }
    CookieJar::from_headers(headers)
        .get(SESSION_COOKIE)
        .map(|c| c.value().to_string())
}

fn session_cookie_with(value: String, max_age: Duration) -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE, value)
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(max_age)
        .finish()
}

/// Cookie installing a session token.
pub fn session_cookie(token: &str) -> Cookie<'static> {
    session_cookie_with(token.to_string(), SESSION_TTL)
}

/// Cookie that makes the browser drop the session token.
pub fn clear_session_cookie() -> Cookie<'static> {
    session_cookie_with(String::new(), Duration::ZERO)
}

/// In-memory limiter on failed logins per username.
///
/// Only failures are counted; a successful login clears the username's
/// history. Usernames without a failure inside the window are dropped.
#[derive(Clone)]
pub struct LoginRateLimiter {
    inner: Arc<Mutex<HashMap<String, Vec<Instant>>>>,
    max: usize,
    window: StdDuration,
}

impl LoginRateLimiter {
    pub fn new(max: usize, window: StdDuration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            max,
            window,
        }
    }

    /// Returns false once `key` has `max` failures inside the window.
    pub async fn check(&self, key: &str) -> bool {
        let mut guard = self.inner.lock().await;
        let now = Instant::now();
        let Some(entry) = guard.get_mut(key) else {
            return true;
        };
        entry.retain(|t| now.duration_since(*t) < self.window);
        let allowed = entry.len() < self.max;
        if entry.is_empty() {
            guard.remove(key);
        }
        allowed
    }

    /// Count a failed attempt for `key`, forgetting expired usernames.
    pub async fn record_failure(&self, key: &str) {
        let mut guard = self.inner.lock().await;
        let now = Instant::now();
        let window = self.window;
        guard.retain(|_, attempts| {
            attempts.retain(|t| now.duration_since(*t) < window);
            !attempts.is_empty()
        });
        guard.entry(key.to_string()).or_default().push(now);
    }

    /// Forget the failures of `key` after it logged in.
    pub async fn clear(&self, key: &str) {
        self.inner.lock().await.remove(key);
    }

    /// Number of usernames currently tracked.
    pub async fn tracked(&self) -> usize {
        self.inner.lock().await.len()
    }
}
