use crate::{
    model::{Group, Post, PostView},
    users,
};
use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};
use time::OffsetDateTime;

/// Image already written to the media store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    pub id: String,
    pub mime: String,
}

/// Fields a post is created or edited with. Author and timestamp are not
/// part of it: they are fixed when the post is first stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostFields {
    pub text: String,
    pub group_id: Option<i64>,
    pub image: Option<StoredImage>,
    pub image_name: Option<String>,
}

/// Joined select used by every feed; columns are read by `row_to_post_view`.
pub(crate) const POST_VIEW_SELECT: &str = "SELECT p.id, p.text, p.created_at, p.image, p.image_name, \
     u.id, u.username, u.first_name, u.last_name, u.is_admin, u.date_joined, \
     g.id, g.title, g.slug, g.description, \
     (SELECT COUNT(*) FROM comments c WHERE c.post_id = p.id) \
     FROM posts p JOIN users u ON u.id = p.author_id LEFT JOIN groups g ON g.id = p.group_id";

/// Newest first; the id breaks ties between posts stored in the same second.
pub(crate) const NEWEST_FIRST: &str = "ORDER BY p.created_at DESC, p.id DESC";

pub fn image_url(image_id: &str) -> String {
    format!("/media/posts/{}", image_id)
}

pub(crate) fn row_to_post_view(row: &rusqlite::Row<'_>) -> rusqlite::Result<PostView> {
    let group = match row.get::<_, Option<i64>>(11)? {
        Some(id) => Some(Group {
            id,
            title: row.get(12)?,
            slug: row.get(13)?,
            description: row.get(14)?,
        }),
        None => None,
    };
    Ok(PostView {
        id: row.get(0)?,
        text: row.get(1)?,
        created_at: row.get(2)?,
        image_url: row.get::<_, Option<String>>(3)?.map(|id| image_url(&id)),
        image_name: row.get(4)?,
        author: users::row_to_user_at(row, 5)?,
        group,
        comments_count: row.get(15)?,
    })
}

fn row_to_post(row: &rusqlite::Row<'_>) -> rusqlite::Result<Post> {
    Ok(Post {
        id: row.get(0)?,
        text: row.get(1)?,
        created_at: row.get(2)?,
        author_id: row.get(3)?,
        group_id: row.get(4)?,
        image: row.get(5)?,
        image_mime: row.get(6)?,
        image_name: row.get(7)?,
    })
}

/// Store a new post authored by `author_id`, stamped with the current time.
pub fn create_post(conn: &Connection, author_id: i64, fields: &PostFields) -> Result<Post> {
    if fields.text.trim().is_empty() {
        return Err(anyhow!("empty_post"));
    }
    let now = OffsetDateTime::now_utc().unix_timestamp();
    conn.execute(
        "INSERT INTO posts (text, created_at, author_id, group_id, image, image_mime, image_name) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            fields.text,
            now,
            author_id,
            fields.group_id,
            fields.image.as_ref().map(|i| i.id.as_str()),
            fields.image.as_ref().map(|i| i.mime.as_str()),
            fields.image_name,
        ],
    )?;
    Ok(Post {
        id: conn.last_insert_rowid(),
        text: fields.text.clone(),
        created_at: now,
        author_id,
        group_id: fields.group_id,
        image: fields.image.as_ref().map(|i| i.id.clone()),
        image_mime: fields.image.as_ref().map(|i| i.mime.clone()),
        image_name: fields.image_name.clone(),
    })
}

/// Replace text and group of a post. Image and image name are only replaced
/// when new ones are supplied.
pub fn update_post(conn: &Connection, post_id: i64, fields: &PostFields) -> Result<Post> {
    if fields.text.trim().is_empty() {
        return Err(anyhow!("empty_post"));
    }
    let changed = conn.execute(
        "UPDATE posts SET text = ?2, group_id = ?3, \
         image = COALESCE(?4, image), image_mime = COALESCE(?5, image_mime), \
         image_name = COALESCE(?6, image_name) WHERE id = ?1",
        params![
            post_id,
            fields.text,
            fields.group_id,
            fields.image.as_ref().map(|i| i.id.as_str()),
            fields.image.as_ref().map(|i| i.mime.as_str()),
            fields.image_name,
        ],
    )?;
    if changed == 0 {
        anyhow::bail!("not_found");
    }
    get_post(conn, post_id)?.ok_or_else(|| anyhow!("not_found"))
}

pub fn get_post(conn: &Connection, post_id: i64) -> Result<Option<Post>> {
    let post = conn
        .query_row(
            "SELECT id, text, created_at, author_id, group_id, image, image_mime, image_name FROM posts WHERE id = ?1",
            [post_id],
            row_to_post,
        )
        .optional()?;
    Ok(post)
}

pub fn get_post_view(conn: &Connection, post_id: i64) -> Result<Option<PostView>> {
    let sql = format!("{} WHERE p.id = ?1", POST_VIEW_SELECT);
    let post = conn
        .query_row(&sql, [post_id], row_to_post_view)
        .optional()?;
    Ok(post)
}

/// Mime type of a stored image, if any post references it.
pub fn image_mime(conn: &Connection, image_id: &str) -> Result<Option<String>> {
    let mime = conn
        .query_row(
            "SELECT image_mime FROM posts WHERE image = ?1 LIMIT 1",
            [image_id],
            |row| row.get::<_, Option<String>>(0),
        )
        .optional()?;
    Ok(mime.flatten())
}

/// Whether any post still references the stored image `image_id`.
pub fn image_in_use(conn: &Connection, image_id: &str) -> Result<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM posts WHERE image = ?1)",
        [image_id],
        |row| row.get(0),
    )?)
}

/// Distinct image ids attached to the posts of one author.
pub fn image_ids_by_author(conn: &Connection, author_id: i64) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT image FROM posts WHERE author_id = ?1 AND image IS NOT NULL",
    )?;
    let ids = stmt
        .query_map([author_id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(ids)
}

pub fn count_posts_by_author(conn: &Connection, author_id: i64) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM posts WHERE author_id = ?1",
        [author_id],
        |row| row.get(0),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, groups, users};

    fn text(t: &str) -> PostFields {
        PostFields {
            text: t.into(),
            ..Default::default()
        }
    }

    #[test]
    fn create_and_validate() {
        let conn = db::init_db(":memory:").unwrap();
        let a = users::create_user(&conn, "a", "", "", "password1", false).unwrap();
        assert!(create_post(&conn, a.id, &text("   ")).is_err());
        let p = create_post(&conn, a.id, &text("hello")).unwrap();
        assert_eq!(p.author_id, a.id);
        let view = get_post_view(&conn, p.id).unwrap().unwrap();
        assert_eq!(view.text, "hello");
        assert_eq!(view.author.username, "a");
        assert!(view.group.is_none());
        assert_eq!(view.comments_count, 0);
    }

    #[test]
    fn unknown_author_rejected_by_storage() {
        let conn = db::init_db(":memory:").unwrap();
        assert!(create_post(&conn, 42, &text("orphan")).is_err());
    }

    #[test]
    fn update_keeps_author_timestamp_and_image() {
        let conn = db::init_db(":memory:").unwrap();
        let a = users::create_user(&conn, "a", "", "", "password1", false).unwrap();
        let g = groups::create_group(&conn, "Cats", Some("cats"), "").unwrap();
        let p = create_post(
            &conn,
            a.id,
            &PostFields {
                text: "before".into(),
                group_id: None,
                image: Some(StoredImage {
                    id: "ab12".into(),
                    mime: "image/gif".into(),
                }),
                image_name: Some("small.gif".into()),
            },
        )
        .unwrap();
        let edited = update_post(
            &conn,
            p.id,
            &PostFields {
                text: "after".into(),
                group_id: Some(g.id),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(edited.text, "after");
        assert_eq!(edited.group_id, Some(g.id));
        assert_eq!(edited.author_id, p.author_id);
        assert_eq!(edited.created_at, p.created_at);
        assert_eq!(edited.image.as_deref(), Some("ab12"));
        assert_eq!(edited.image_name.as_deref(), Some("small.gif"));
        assert_eq!(image_mime(&conn, "ab12").unwrap().as_deref(), Some("image/gif"));
        assert!(update_post(&conn, 999, &text("x")).is_err());
    }

    #[test]
    fn group_delete_keeps_post() {
        let conn = db::init_db(":memory:").unwrap();
        let a = users::create_user(&conn, "a", "", "", "password1", false).unwrap();
        let g = groups::create_group(&conn, "G", Some("g"), "").unwrap();
        let p = create_post(
            &conn,
            a.id,
            &PostFields {
                text: "P".into(),
                group_id: Some(g.id),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(groups::delete_group(&conn, "g").unwrap());
        let p = get_post(&conn, p.id).unwrap().unwrap();
        assert_eq!(p.group_id, None);
    }

    #[test]
    fn author_delete_cascades() {
        let conn = db::init_db(":memory:").unwrap();
        let a = users::create_user(&conn, "a", "", "", "password1", false).unwrap();
        let p = create_post(&conn, a.id, &text("bye")).unwrap();
        assert_eq!(count_posts_by_author(&conn, a.id).unwrap(), 1);
        assert!(users::delete_user(&conn, a.id).unwrap());
        assert!(get_post(&conn, p.id).unwrap().is_none());
    }
}
