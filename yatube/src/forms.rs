//! Form parsing and validation for the write endpoints.
//!
//! Cleaning either yields typed values ready for storage or an
//! [`AppError::ValidationFailed`] carrying the submitted input and one list
//! of messages per offending field. Nothing is persisted on failure.

use crate::{
    error::{AppError, AppResult, FormErrors},
    files, groups,
    model::{Group, Post},
};
use axum::extract::{multipart::MultipartError, Multipart};
use bytes::Bytes;
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::{json, Value};

pub const REQUIRED: &str = "This field is required.";
pub const INVALID_CHOICE: &str =
    "Select a valid choice. That choice is not one of the available choices.";
pub const INVALID_IMAGE: &str =
    "Upload a valid image. The file you uploaded was either not an image or a corrupted image.";
pub const FILE_TOO_LARGE: &str = "The uploaded file is too large.";
pub const MAX_IMAGE_NAME: usize = 100;

/// An uploaded file as received.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: Option<String>,
    pub data: Bytes,
}

/// Raw post form fields.
#[derive(Debug, Clone, Default)]
pub struct PostInput {
    pub text: String,
    pub group: Option<String>,
    pub image_name: Option<String>,
    pub image: Option<Upload>,
}

/// Validated post form.
#[derive(Debug, Clone)]
pub struct CleanPost {
    pub text: String,
    pub group_id: Option<i64>,
    pub image: Option<(Bytes, &'static str)>,
    pub image_name: Option<String>,
}

fn malformed(e: MultipartError) -> AppError {
    tracing::debug!(error = %e, "unreadable multipart body");
    AppError::ValidationFailed(FormErrors::non_field("Malformed form data."))
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

impl PostInput {
    /// Read the `text`, `group`, `image_name` and `image` parts of a
    /// multipart body. Unknown parts are ignored; an empty file part counts
    /// as no upload.
    pub async fn from_multipart(mut multipart: Multipart) -> AppResult<Self> {
        let mut input = Self::default();
        while let Some(field) = multipart.next_field().await.map_err(malformed)? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "text" => input.text = field.text().await.map_err(malformed)?,
                "group" => input.group = non_blank(field.text().await.map_err(malformed)?),
                "image_name" => {
                    input.image_name = non_blank(field.text().await.map_err(malformed)?)
                }
                "image" => {
                    let file_name = field.file_name().map(str::to_string);
                    let data = field.bytes().await.map_err(malformed)?;
                    if !data.is_empty() {
                        input.image = Some(Upload { file_name, data });
                    }
                }
                _ => {}
            }
        }
        Ok(input)
    }

    fn echo(&self) -> Value {
        json!({
            "text": self.text,
            "group": self.group,
            "image_name": self.image_name,
            "image": self.image.as_ref().and_then(|u| u.file_name.clone()),
        })
    }
}

/// Validate a post form against the stored groups and the upload limit.
pub fn clean_post(conn: &Connection, input: &PostInput, max_upload: u64) -> AppResult<CleanPost> {
    let mut errors = FormErrors::new(input.echo());

    let text = input.text.trim();
    if text.is_empty() {
        errors.add("text", REQUIRED);
    }

    let mut group_id = None;
    if let Some(raw) = &input.group {
        match raw.parse::<i64>() {
            Ok(id) if groups::get_group_by_id(conn, id)?.is_some() => group_id = Some(id),
            _ => errors.add("group", INVALID_CHOICE),
        }
    }

    if let Some(name) = &input.image_name {
        let len = name.chars().count();
        if len > MAX_IMAGE_NAME {
            errors.add(
                "image_name",
                format!(
                    "Ensure this value has at most {} characters (it has {}).",
                    MAX_IMAGE_NAME, len
                ),
            );
        }
    }

    let mut image = None;
    if let Some(upload) = &input.image {
        if upload.data.len() as u64 > max_upload {
            errors.add("image", FILE_TOO_LARGE);
        } else {
            match files::sniff_image(&upload.data) {
                Some(mime) => image = Some((upload.data.clone(), mime)),
                None => errors.add("image", INVALID_IMAGE),
            }
        }
    }

    if !errors.is_empty() {
        return Err(AppError::ValidationFailed(errors));
    }
    Ok(CleanPost {
        text: text.to_string(),
        group_id,
        image,
        image_name: input.image_name.clone(),
    })
}

/// Describe the post form, prefilled from `initial` when editing.
pub fn post_form(groups: &[Group], initial: Option<&Post>) -> Value {
    json!({
        "fields": {
            "text": {
                "label": "Text",
                "help_text": "Write what is on your mind",
                "required": true,
                "initial": initial.map(|p| p.text.as_str()),
            },
            "group": {
                "label": "Group",
                "help_text": "Pick a group if you like",
                "required": false,
                "initial": initial.and_then(|p| p.group_id),
                "choices": groups
                    .iter()
                    .map(|g| json!({ "value": g.id, "label": g.title }))
                    .collect::<Vec<_>>(),
            },
            "image": {
                "label": "Image",
                "required": false,
                "initial": initial.and_then(|p| p.image.as_deref()).map(crate::posts::image_url),
            },
            "image_name": {
                "label": "Image name",
                "required": false,
                "max_length": MAX_IMAGE_NAME,
                "initial": initial.and_then(|p| p.image_name.as_deref()),
            },
        }
    })
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommentInput {
    #[serde(default)]
    pub text: String,
}

pub fn clean_comment(input: &CommentInput) -> AppResult<String> {
    if input.text.trim().is_empty() {
        let mut errors = FormErrors::new(json!({ "text": input.text }));
        errors.add("text", REQUIRED);
        return Err(AppError::ValidationFailed(errors));
    }
    Ok(input.text.trim().to_string())
}

pub fn comment_form() -> Value {
    json!({ "fields": { "text": { "label": "Comment", "required": true } } })
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginInput {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SignupInput {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub password: String,
}

impl SignupInput {
    pub fn echo(&self) -> Value {
        json!({
            "username": self.username,
            "first_name": self.first_name,
            "last_name": self.last_name,
        })
    }
}

/// Check sign-up fields that do not need the database.
pub fn clean_signup(input: &SignupInput) -> AppResult<()> {
    let mut errors = FormErrors::new(input.echo());
    if input.username.is_empty() {
        errors.add("username", REQUIRED);
    } else if !crate::users::valid_username(&input.username) {
        errors.add(
            "username",
            "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters.",
        );
    } else if crate::users::is_reserved_username(&input.username) {
        errors.add("username", "This username is reserved.");
    }
    if input.password.chars().count() < crate::users::MIN_PASSWORD_LEN {
        errors.add(
            "password",
            format!(
                "This password is too short. It must contain at least {} characters.",
                crate::users::MIN_PASSWORD_LEN
            ),
        );
    }
    if !errors.is_empty() {
        return Err(AppError::ValidationFailed(errors));
    }
    Ok(())
}

/// Only local absolute paths are accepted as a post-login destination.
pub fn safe_next(next: Option<&str>) -> String {
    match next {
        Some(n) if n.starts_with('/') && !n.starts_with("//") && !n.contains('\\') => n.to_string(),
        _ => "/".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, groups};

    const SMALL_GIF: &[u8] = b"\x47\x49\x46\x38\x39\x61\x01\x00\x01\x00\x00\x00\x00\x21\xf9\x04\x01\x0a\x00\x01\x00\x2c\x00\x00\x00\x00\x01\x00\x01\x00\x00\x02\x02\x4c\x01\x00\x3b";

    fn errors_of<T: std::fmt::Debug>(res: AppResult<T>) -> FormErrors {
        match res {
            Err(AppError::ValidationFailed(errors)) => errors,
            other => panic!("expected validation failure, got {:?}", other),
        }
    }

    #[test]
    fn post_requires_text() {
        let conn = db::init_db(":memory:").unwrap();
        let input = PostInput {
            text: "   ".into(),
            ..Default::default()
        };
        let errors = errors_of(clean_post(&conn, &input, 1024));
        assert_eq!(errors.errors["text"], vec![REQUIRED.to_string()]);
        assert_eq!(errors.form["text"], "   ");
    }

    #[test]
    fn post_group_must_exist() {
        let conn = db::init_db(":memory:").unwrap();
        let g = groups::create_group(&conn, "Cats", Some("cats"), "").unwrap();
        let mut input = PostInput {
            text: "hi".into(),
            group: Some("999".into()),
            ..Default::default()
        };
        let errors = errors_of(clean_post(&conn, &input, 1024));
        assert_eq!(errors.errors["group"], vec![INVALID_CHOICE.to_string()]);
        input.group = Some("cats".into());
        assert!(clean_post(&conn, &input, 1024).is_err());
        input.group = Some(g.id.to_string());
        let clean = clean_post(&conn, &input, 1024).unwrap();
        assert_eq!(clean.group_id, Some(g.id));
    }

    #[test]
    fn post_image_checked() {
        let conn = db::init_db(":memory:").unwrap();
        let mut input = PostInput {
            text: "pic".into(),
            image: Some(Upload {
                file_name: Some("notes.txt".into()),
                data: Bytes::from_static(b"just text"),
            }),
            ..Default::default()
        };
        let errors = errors_of(clean_post(&conn, &input, 1024));
        assert_eq!(errors.errors["image"], vec![INVALID_IMAGE.to_string()]);

        input.image = Some(Upload {
            file_name: Some("small.gif".into()),
            data: Bytes::from_static(SMALL_GIF),
        });
        let errors = errors_of(clean_post(&conn, &input, 8));
        assert_eq!(errors.errors["image"], vec![FILE_TOO_LARGE.to_string()]);

        let clean = clean_post(&conn, &input, 1024).unwrap();
        assert_eq!(clean.image.unwrap().1, "image/gif");
    }

    #[test]
    fn image_name_length_bounded() {
        let conn = db::init_db(":memory:").unwrap();
        let input = PostInput {
            text: "pic".into(),
            image_name: Some("x".repeat(101)),
            ..Default::default()
        };
        let errors = errors_of(clean_post(&conn, &input, 1024));
        assert!(errors.errors["image_name"][0].contains("(it has 101)"));
    }

    #[test]
    fn comment_requires_text() {
        let errors = errors_of(clean_comment(&CommentInput { text: "\n".into() }));
        assert_eq!(errors.errors["text"], vec![REQUIRED.to_string()]);
        assert_eq!(
            clean_comment(&CommentInput { text: "nice".into() }).unwrap(),
            "nice"
        );
    }

    #[test]
    fn signup_checks_username_and_password() {
        let errors = errors_of(clean_signup(&SignupInput {
            username: "no spaces".into(),
            password: "short".into(),
            ..Default::default()
        }));
        assert!(errors.errors.contains_key("username"));
        assert!(errors.errors.contains_key("password"));
        assert!(errors.form.get("password").is_none());
    }

    #[test]
    fn signup_rejects_route_names() {
        let errors = errors_of(clean_signup(&SignupInput {
            username: "follow".into(),
            password: "password123".into(),
            ..Default::default()
        }));
        assert_eq!(
            errors.errors["username"],
            vec!["This username is reserved.".to_string()]
        );
    }

    #[test]
    fn next_must_be_local() {
        assert_eq!(safe_next(Some("/new/")), "/new/");
        assert_eq!(safe_next(Some("//evil.example")), "/");
        assert_eq!(safe_next(Some("https://evil.example")), "/");
        assert_eq!(safe_next(None), "/");
    }

    #[test]
    fn edit_form_is_prefilled() {
        let g = Group {
            id: 1,
            title: "Cats".into(),
            slug: "cats".into(),
            description: String::new(),
        };
        let post = Post {
            id: 1,
            text: "draft".into(),
            created_at: 0,
            author_id: 1,
            group_id: Some(1),
            image: None,
            image_mime: None,
            image_name: None,
        };
        let form = post_form(&[g], Some(&post));
        assert_eq!(form["fields"]["text"]["initial"], "draft");
        assert_eq!(form["fields"]["group"]["initial"], 1);
        assert_eq!(form["fields"]["group"]["choices"][0]["label"], "Cats");
    }
}
