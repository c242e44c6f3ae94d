use crate::{auth, db, model::User};
use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension};
use time::OffsetDateTime;

static USERNAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\w.@+-]{1,150}$").unwrap());

pub const MIN_PASSWORD_LEN: usize = 8;

const USER_COLUMNS: &str = "id, username, first_name, last_name, is_admin, date_joined";

/// First path segments owned by fixed routes. A profile under one of these
/// names would be shadowed by the route.
pub const RESERVED_USERNAMES: &[&str] = &[
    "about", "admin", "auth", "follow", "group", "health", "media", "new",
];

/// Check that a username is made of letters, digits and `@.+-_` only.
pub fn valid_username(username: &str) -> bool {
    USERNAME_RE.is_match(username)
}

pub fn is_reserved_username(username: &str) -> bool {
    RESERVED_USERNAMES
        .iter()
        .any(|r| r.eq_ignore_ascii_case(username))
}

pub(crate) fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    row_to_user_at(row, 0)
}

/// Read a user from six consecutive columns starting at `offset`.
pub(crate) fn row_to_user_at(row: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(offset)?,
        username: row.get(offset + 1)?,
        first_name: row.get(offset + 2)?,
        last_name: row.get(offset + 3)?,
        is_admin: row.get::<_, i64>(offset + 4)? != 0,
        date_joined: row.get(offset + 5)?,
    })
}

/// Create a user with a hashed password.
pub fn create_user(
    conn: &Connection,
    username: &str,
    first_name: &str,
    last_name: &str,
    password: &str,
    is_admin: bool,
) -> Result<User> {
    if !valid_username(username) {
        return Err(anyhow!("invalid_username"));
    }
    if is_reserved_username(username) {
        return Err(anyhow!("reserved_username"));
    }
    let hash = auth::hash_password(password)?;
    let now = OffsetDateTime::now_utc().unix_timestamp();
    let res = conn.execute(
        "INSERT INTO users (username, first_name, last_name, password_hash, is_admin, date_joined) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![username, first_name, last_name, hash, is_admin as i64, now],
    );
    match res {
        Ok(_) => Ok(User {
            id: conn.last_insert_rowid(),
            username: username.into(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            is_admin,
            date_joined: now,
        }),
        Err(e) if db::is_constraint_violation(&e) => Err(anyhow!("duplicate_user")),
        Err(e) => Err(e.into()),
    }
}

pub fn get_user_by_username(conn: &Connection, username: &str) -> Result<Option<User>> {
    let user = conn
        .query_row(
            &format!("SELECT {} FROM users WHERE username = ?1", USER_COLUMNS),
            [username],
            row_to_user,
        )
        .optional()?;
    Ok(user)
}

pub fn get_user_by_id(conn: &Connection, id: i64) -> Result<Option<User>> {
    let user = conn
        .query_row(
            &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
            [id],
            row_to_user,
        )
        .optional()?;
    Ok(user)
}

/// Return the user when the password matches.
pub fn authenticate(conn: &Connection, username: &str, password: &str) -> Result<Option<User>> {
    let found = conn
        .query_row(
            &format!(
                "SELECT {}, password_hash FROM users WHERE username = ?1",
                USER_COLUMNS
            ),
            [username],
            |row| Ok((row_to_user(row)?, row.get::<_, String>(6)?)),
        )
        .optional()?;
    Ok(match found {
        Some((user, hash)) if auth::verify_password(password, &hash) => Some(user),
        _ => None,
    })
}

pub fn count_users(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?)
}

/// Delete a user; their posts, comments and follow edges go with them.
pub fn delete_user(conn: &Connection, id: i64) -> Result<bool> {
    let changed = conn.execute("DELETE FROM users WHERE id = ?1", [id])?;
    Ok(changed > 0)
}

/// Create the configured administrator when the database has no users yet.
pub fn ensure_bootstrap_admin(conn: &Connection, username: &str, password: &str) -> Result<bool> {
    if count_users(conn)? > 0 {
        return Ok(false);
    }
    create_user(conn, username, "", "", password, true)?;
    Ok(true)
}
