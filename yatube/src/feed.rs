use crate::{db, model::PostView, posts};
use anyhow::Result;
use rusqlite::{params_from_iter, types::Value, Connection};
use serde::Serialize;

/// Which posts a feed selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feed {
    /// Every post.
    Global,
    /// Posts tagged with one group.
    Group(i64),
    /// Posts written by one author.
    Author(i64),
    /// Posts by the authors a user follows.
    Followed(i64),
    /// Posts whose text contains the query.
    Search(String),
}

/// One page of a feed with enough totals to render a paginator.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub number: usize,
    pub num_pages: usize,
    pub count: i64,
    pub has_next: bool,
    pub has_previous: bool,
}

/// Parse a 1-based page number; anything missing or invalid means page 1.
pub fn parse_page(raw: Option<&str>) -> usize {
    raw.and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|n| *n >= 1)
        .unwrap_or(1)
}

impl Feed {
    fn filter(&self) -> (&'static str, Option<Value>) {
        match self {
            Feed::Global => ("", None),
            Feed::Group(id) => ("WHERE p.group_id = ?", Some(Value::Integer(*id))),
            Feed::Author(id) => ("WHERE p.author_id = ?", Some(Value::Integer(*id))),
            Feed::Followed(id) => (
                "WHERE p.author_id IN (SELECT author_id FROM follows WHERE user_id = ?)",
                Some(Value::Integer(*id)),
            ),
            Feed::Search(q) => (
                "WHERE p.text LIKE ? ESCAPE '\\'",
                Some(Value::Text(format!("%{}%", db::escape_like(q)))),
            ),
        }
    }
}

/// Load page `number` of a feed, newest posts first. A page past the end
/// comes back empty, not as an error.
pub fn load(conn: &Connection, feed: &Feed, number: usize, page_size: usize) -> Result<Page<PostView>> {
    let number = number.max(1);
    let page_size = page_size.max(1);
    let (filter, param) = feed.filter();

    let count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM posts p {}", filter),
        params_from_iter(param.iter()),
        |row| row.get(0),
    )?;

    let offset = (number - 1).saturating_mul(page_size).min(i64::MAX as usize) as i64;
    let sql = format!(
        "{} {} {} LIMIT ? OFFSET ?",
        posts::POST_VIEW_SELECT,
        filter,
        posts::NEWEST_FIRST
    );
    let mut values: Vec<Value> = param.into_iter().collect();
    values.push(Value::Integer(page_size as i64));
    values.push(Value::Integer(offset));
    let mut stmt = conn.prepare(&sql)?;
    let items = stmt
        .query_map(params_from_iter(values.iter()), posts::row_to_post_view)?
        .collect::<Result<Vec<_>, _>>()?;

    let num_pages = ((count as usize + page_size - 1) / page_size).max(1);
    Ok(Page {
        items,
        number,
        num_pages,
        count,
        has_next: number < num_pages,
        has_previous: number > 1,
    })
}
