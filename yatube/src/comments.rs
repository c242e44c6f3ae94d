use crate::{
    model::{Comment, CommentView},
    users,
};
use anyhow::{anyhow, Result};
use rusqlite::{params, Connection};
use time::OffsetDateTime;

/// Attach a comment by `author_id` to a post.
pub fn create_comment(
    conn: &Connection,
    post_id: i64,
    author_id: i64,
    text: &str,
) -> Result<Comment> {
    if text.trim().is_empty() {
        return Err(anyhow!("empty_comment"));
    }
    let now = OffsetDateTime::now_utc().unix_timestamp();
    conn.execute(
        "INSERT INTO comments (post_id, author_id, text, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![post_id, author_id, text, now],
    )?;
    Ok(Comment {
        id: conn.last_insert_rowid(),
        post_id,
        author_id,
        text: text.into(),
        created_at: now,
    })
}

/// Comments of a post, oldest first.
pub fn list_comments(conn: &Connection, post_id: i64) -> Result<Vec<CommentView>> {
    let mut stmt = conn.prepare(
        "SELECT c.id, c.text, c.created_at, \
         u.id, u.username, u.first_name, u.last_name, u.is_admin, u.date_joined \
         FROM comments c JOIN users u ON u.id = c.author_id \
         WHERE c.post_id = ?1 ORDER BY c.created_at, c.id",
    )?;
    let comments = stmt
        .query_map([post_id], |row| {
            Ok(CommentView {
                id: row.get(0)?,
                text: row.get(1)?,
                created_at: row.get(2)?,
                author: users::row_to_user_at(row, 3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(comments)
}
