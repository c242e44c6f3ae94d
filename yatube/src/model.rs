use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub is_admin: bool,
    pub date_joined: i64,
}

impl User {
    /// First and last name joined by a space, trimmed.
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.username)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Group {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub description: String,
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.title)
    }
}

/// A stored post row.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Post {
    pub id: i64,
    pub text: String,
    pub created_at: i64,
    pub author_id: i64,
    pub group_id: Option<i64>,
    pub image: Option<String>,
    pub image_mime: Option<String>,
    pub image_name: Option<String>,
}

impl fmt::Display for Post {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&preview(&self.text))
    }
}

/// A post joined with its author and group for feeds and detail pages.
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct PostView {
    pub id: i64,
    pub text: String,
    pub created_at: i64,
    pub author: User,
    pub group: Option<Group>,
    pub image_url: Option<String>,
    pub image_name: Option<String>,
    pub comments_count: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    pub author_id: i64,
    pub text: String,
    pub created_at: i64,
}

impl fmt::Display for Comment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&preview(&self.text))
    }
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct CommentView {
    pub id: i64,
    pub text: String,
    pub created_at: i64,
    pub author: User,
}

/// Directed edge: `user` follows `author`.
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct Follow {
    pub id: i64,
    pub user_id: i64,
    pub author_id: i64,
    pub user: String,
    pub author: String,
}

impl fmt::Display for Follow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} follows {}", self.user, self.author)
    }
}

/// First 15 characters, counted as chars so multi-byte text is never split.
fn preview(text: &str) -> String {
    text.chars().take(15).collect()
}
