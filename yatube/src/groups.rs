pub use crate::model::Group;
use crate::db;
use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};

/// Sanitize an input string into a URL-friendly slug.
pub fn sanitize_slug(input: &str) -> String {
    let mut slug = String::new();
    let mut prev_dash = false;
    for c in input.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            slug.push(c);
            prev_dash = false;
        } else if !prev_dash {
            slug.push('-');
            prev_dash = true;
        }
    }
    slug.trim_matches('-').to_string()
}

fn row_to_group(row: &rusqlite::Row<'_>) -> rusqlite::Result<Group> {
    Ok(Group {
        id: row.get(0)?,
        title: row.get(1)?,
        slug: row.get(2)?,
        description: row.get(3)?,
    })
}

/// Create a group ensuring unique slug. The slug falls back to the title.
pub fn create_group(
    conn: &Connection,
    title: &str,
    slug_input: Option<&str>,
    description: &str,
) -> Result<Group> {
    let title = title.trim();
    if title.is_empty() {
        return Err(anyhow!("empty_title"));
    }
    let slug = sanitize_slug(slug_input.unwrap_or(title));
    if slug.is_empty() {
        return Err(anyhow!("invalid_slug"));
    }
    let res = conn.execute(
        "INSERT INTO groups (title, slug, description) VALUES (?1, ?2, ?3)",
        params![title, slug, description],
    );
    match res {
        Ok(_) => Ok(Group {
            id: conn.last_insert_rowid(),
            title: title.into(),
            slug,
            description: description.into(),
        }),
        Err(e) if db::is_constraint_violation(&e) => Err(anyhow!("duplicate_slug")),
        Err(e) => Err(e.into()),
    }
}

pub fn get_group_by_slug(conn: &Connection, slug: &str) -> Result<Option<Group>> {
    let group = conn
        .query_row(
            "SELECT id, title, slug, description FROM groups WHERE slug = ?1",
            [slug],
            row_to_group,
        )
        .optional()?;
    Ok(group)
}

pub fn get_group_by_id(conn: &Connection, id: i64) -> Result<Option<Group>> {
    let group = conn
        .query_row(
            "SELECT id, title, slug, description FROM groups WHERE id = ?1",
            [id],
            row_to_group,
        )
        .optional()?;
    Ok(group)
}

/// List groups ordered by title, optionally filtered by a title substring.
pub fn list_groups(conn: &Connection, title_query: Option<&str>) -> Result<Vec<Group>> {
    let pattern = format!("%{}%", db::escape_like(title_query.unwrap_or("")));
    let mut stmt = conn.prepare(
        "SELECT id, title, slug, description FROM groups WHERE title LIKE ?1 ESCAPE '\\' ORDER BY title, id",
    )?;
    let groups = stmt
        .query_map([pattern], row_to_group)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(groups)
}

/// Delete a group. Posts that referenced it keep existing without a group.
pub fn delete_group(conn: &Connection, slug: &str) -> Result<bool> {
    let changed = conn.execute("DELETE FROM groups WHERE slug = ?1", [slug])?;
    Ok(changed > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_unique_and_list() {
        let conn = db::init_db(":memory:").unwrap();
        create_group(&conn, "Cats", Some("cats"), "all about cats").unwrap();
        let err = create_group(&conn, "Other", Some("cats"), "").unwrap_err();
        assert_eq!(err.to_string(), "duplicate_slug");
        create_group(&conn, "Dogs and Wolves", None, "").unwrap();
        let all = list_groups(&conn, None).unwrap();
        assert_eq!(all.len(), 2);
        let dogs = list_groups(&conn, Some("Dogs")).unwrap();
        assert_eq!(dogs.len(), 1);
        assert_eq!(dogs[0].slug, "dogs-and-wolves");
    }

    #[test]
    fn title_search_is_literal() {
        let conn = db::init_db(":memory:").unwrap();
        create_group(&conn, "100% cats", Some("cats"), "").unwrap();
        create_group(&conn, "1000 dogs", Some("dogs"), "").unwrap();
        create_group(&conn, "snake_case", Some("snakes"), "").unwrap();
        create_group(&conn, "snakeXcase", Some("snakes-x"), "").unwrap();
        let hits = list_groups(&conn, Some("100%")).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].slug, "cats");
        let hits = list_groups(&conn, Some("e_c")).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].slug, "snakes");
    }

    #[test]
    fn lookup_by_slug_and_id() {
        let conn = db::init_db(":memory:").unwrap();
        let g = create_group(&conn, "Cats", Some("cats"), "").unwrap();
        assert_eq!(get_group_by_slug(&conn, "cats").unwrap(), Some(g.clone()));
        assert_eq!(get_group_by_id(&conn, g.id).unwrap(), Some(g));
        assert!(get_group_by_slug(&conn, "dogs").unwrap().is_none());
    }

    #[test]
    fn slug_sanitized() {
        assert_eq!(sanitize_slug("  Hello, World! "), "hello-world");
        assert_eq!(sanitize_slug("test_slug"), "test_slug");
        assert_eq!(sanitize_slug("!!!"), "");
    }

    #[test]
    fn delete_reports_missing() {
        let conn = db::init_db(":memory:").unwrap();
        create_group(&conn, "Cats", Some("cats"), "").unwrap();
        assert!(delete_group(&conn, "cats").unwrap());
        assert!(!delete_group(&conn, "cats").unwrap());
    }
}
