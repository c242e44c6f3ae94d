use anyhow::Result;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Store `data` under its SHA-256 digest and return that digest as the id.
/// Identical uploads share one file.
pub async fn save_file<P: AsRef<Path>>(base: P, data: Bytes) -> Result<String> {
    let id = format!("{:x}", Sha256::digest(&data));
    let dir = base.as_ref().join(&id[..2]);
    fs::create_dir_all(&dir).await?;
    let path = dir.join(&id);
    if fs::try_exists(&path).await.unwrap_or(false) {
        return Ok(id);
    }
    fs::write(path, data).await?;
    Ok(id)
}

/// On-disk location of a stored file. `None` unless `id` is a 64 digit hex
/// digest, so request paths stay inside the store.
pub fn file_path<P: AsRef<Path>>(base: P, id: &str) -> Option<PathBuf> {
    if id.len() != 64 || !id.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Some(base.as_ref().join(&id[..2]).join(id))
}

/// Delete a stored file. Returns false when it was already gone.
pub async fn remove_file<P: AsRef<Path>>(base: P, id: &str) -> Result<bool> {
    let Some(path) = file_path(base, id) else {
        return Ok(false);
    };
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Mime type of `data` when it is a recognised image format.
pub fn sniff_image(data: &[u8]) -> Option<&'static str> {
    infer::get(data)
        .filter(|kind| kind.matcher_type() == infer::MatcherType::Image)
        .map(|kind| kind.mime_type())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SMALL_GIF: &[u8] = b"\x47\x49\x46\x38\x39\x61\x01\x00\x01\x00\x00\x00\x00\x21\xf9\x04\x01\x0a\x00\x01\x00\x2c\x00\x00\x00\x00\x01\x00\x01\x00\x00\x02\x02\x4c\x01\x00\x3b";

    #[tokio::test]
    async fn same_bytes_same_id() {
        let tmp = tempfile::tempdir().unwrap();
        let id = save_file(tmp.path(), Bytes::from_static(SMALL_GIF)).await.unwrap();
        let again = save_file(tmp.path(), Bytes::from_static(SMALL_GIF)).await.unwrap();
        assert_eq!(id, again);
        let path = file_path(tmp.path(), &id).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), SMALL_GIF);
        assert!(path.parent().unwrap().ends_with(&id[..2]));
    }

    #[tokio::test]
    async fn removes_stored_file_once() {
        let tmp = tempfile::tempdir().unwrap();
        let id = save_file(tmp.path(), Bytes::from_static(b"bye")).await.unwrap();
        assert!(remove_file(tmp.path(), &id).await.unwrap());
        assert!(!file_path(tmp.path(), &id).unwrap().exists());
        assert!(!remove_file(tmp.path(), &id).await.unwrap());
        assert!(!remove_file(tmp.path(), "../secret.key").await.unwrap());
    }

    #[test]
    fn rejects_foreign_ids() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(file_path(tmp.path(), "../../etc/passwd").is_none());
        assert!(file_path(tmp.path(), "ab").is_none());
    }

    #[test]
    fn recognises_images_only() {
        assert_eq!(sniff_image(SMALL_GIF), Some("image/gif"));
        assert_eq!(sniff_image(b"plain text"), None);
    }
}
