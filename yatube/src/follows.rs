use crate::model::Follow;
use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};

/// What a follow/unfollow request actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowChange {
    Created,
    Removed,
    Unchanged,
}

/// Make `user_id` follow `author_id`.
///
/// Following yourself and following twice are no-ops. The pair's UNIQUE
/// constraint decides the race between two concurrent requests, so the
/// insert is `OR IGNORE` rather than check-then-insert.
pub fn follow(conn: &Connection, user_id: i64, author_id: i64) -> Result<FollowChange> {
    if user_id == author_id {
        return Ok(FollowChange::Unchanged);
    }
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO follows (user_id, author_id) VALUES (?1, ?2)",
        params![user_id, author_id],
    )?;
    Ok(if inserted > 0 {
        FollowChange::Created
    } else {
        FollowChange::Unchanged
    })
}

/// Remove the edge if there is one.
pub fn unfollow(conn: &Connection, user_id: i64, author_id: i64) -> Result<FollowChange> {
    if user_id == author_id {
        return Ok(FollowChange::Unchanged);
    }
    let removed = conn.execute(
        "DELETE FROM follows WHERE user_id = ?1 AND author_id = ?2",
        params![user_id, author_id],
    )?;
    Ok(if removed > 0 {
        FollowChange::Removed
    } else {
        FollowChange::Unchanged
    })
}

pub fn is_following(conn: &Connection, user_id: i64, author_id: i64) -> Result<bool> {
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM follows WHERE user_id = ?1 AND author_id = ?2",
            params![user_id, author_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(exists.is_some())
}

pub fn get_follow(conn: &Connection, user_id: i64, author_id: i64) -> Result<Option<Follow>> {
    let edge = conn
        .query_row(
            "SELECT f.id, f.user_id, f.author_id, u.username, a.username FROM follows f \
             JOIN users u ON u.id = f.user_id JOIN users a ON a.id = f.author_id \
             WHERE f.user_id = ?1 AND f.author_id = ?2",
            params![user_id, author_id],
            |row| {
                Ok(Follow {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    author_id: row.get(2)?,
                    user: row.get(3)?,
                    author: row.get(4)?,
                })
            },
        )
        .optional()?;
    Ok(edge)
}

/// Number of users following `author_id`.
pub fn followers_count(conn: &Connection, author_id: i64) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM follows WHERE author_id = ?1",
        [author_id],
        |row| row.get(0),
    )?)
}

/// Number of authors `user_id` follows.
pub fn following_count(conn: &Connection, user_id: i64) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM follows WHERE user_id = ?1",
        [user_id],
        |row| row.get(0),
    )?)
}
