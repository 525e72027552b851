use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;
use unicode_normalization::UnicodeNormalization;

pub const ALLOWED_IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("filename has no usable characters")]
    EmptyFilename,
    #[error("uploaded file is empty")]
    EmptyFile,
    #[error("unsupported image type: {0}")]
    UnsupportedType(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Reduce a client-supplied filename to something safe to join onto a
/// directory. The name is NFKD-folded to ASCII (`é` becomes `e`), path
/// separators become spaces, whitespace runs become `_`, anything outside
/// `[A-Za-z0-9_.-]` is dropped, and leading or trailing `.`/`_` are stripped.
pub fn sanitize_filename(name: &str) -> String {
    let ascii: String = name
        .nfkd()
        .filter(char::is_ascii)
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();

    let joined = ascii.split_whitespace().collect::<Vec<_>>().join("_");

    joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect::<String>()
        .trim_matches(|c: char| c == '.' || c == '_')
        .to_string()
}

fn image_extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Profile images on local disk, served back under `/uploads`.
pub struct UploadStore {
    dir: PathBuf,
}

impl UploadStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn ensure_dir(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await
    }

    /// Name under which `original` is stored for `account_id`. Prefixing the
    /// account id keeps two accounts from overwriting each other's files.
    pub fn stored_name(account_id: i64, original: &str) -> Result<String, UploadError> {
        let clean = sanitize_filename(original);
        if clean.is_empty() {
            return Err(UploadError::EmptyFilename);
        }

        match image_extension(&clean) {
            Some(ext) if ALLOWED_IMAGE_EXTENSIONS.contains(&ext.as_str()) => {}
            Some(ext) => return Err(UploadError::UnsupportedType(ext)),
            None => return Err(UploadError::UnsupportedType(String::new())),
        }

        Ok(format!("{}_{}", account_id, clean))
    }

    pub async fn save_profile_image(
        &self,
        account_id: i64,
        original: &str,
        bytes: &[u8],
    ) -> Result<String, UploadError> {
        let name = Self::stored_name(account_id, original)?;
        if bytes.is_empty() {
            return Err(UploadError::EmptyFile);
        }

        self.ensure_dir().await?;
        tokio::fs::write(self.dir.join(&name), bytes).await?;
        info!("Stored profile image {} ({} bytes)", name, bytes.len());

        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod sanitize_tests {
        use super::*;

        #[test]
        fn test_spaces_become_underscores() {
            assert_eq!(sanitize_filename("My cool movie.mov"), "My_cool_movie.mov");
        }

        #[test]
        fn test_path_traversal_removed() {
            assert_eq!(sanitize_filename("../../../etc/passwd"), "etc_passwd");
            assert_eq!(sanitize_filename("..\\..\\boot.ini"), "boot.ini");
        }

        #[test]
        fn test_non_ascii_folded() {
            assert_eq!(sanitize_filename("café.png"), "cafe.png");
            assert_eq!(sanitize_filename("photo é.png"), "photo_e.png");
            assert_eq!(sanitize_filename("Ångström ﬁle.jpg"), "Angstrom_file.jpg");
            assert_eq!(sanitize_filename("日本.png"), "png");
        }

        #[test]
        fn test_special_characters_dropped() {
            assert_eq!(sanitize_filename("a<b>c|d?.png"), "abcd.png");
        }

        #[test]
        fn test_leading_dots_stripped() {
            assert_eq!(sanitize_filename(".hidden.png"), "hidden.png");
            assert_eq!(sanitize_filename("__init__"), "init");
        }

        #[test]
        fn test_nothing_left() {
            assert_eq!(sanitize_filename("../.."), "");
            assert_eq!(sanitize_filename(""), "");
        }
    }

    mod stored_name_tests {
        use super::*;

        #[test]
        fn test_prefixes_account_id() {
            let name = UploadStore::stored_name(7, "My Photo.PNG").unwrap();
            assert_eq!(name, "7_My_Photo.PNG");
        }

        #[test]
        fn test_rejects_unknown_extension() {
            let result = UploadStore::stored_name(7, "script.sh");
            assert!(matches!(result, Err(UploadError::UnsupportedType(ext)) if ext == "sh"));
        }

        #[test]
        fn test_rejects_missing_extension() {
            let result = UploadStore::stored_name(7, "avatar");
            assert!(matches!(result, Err(UploadError::UnsupportedType(_))));
        }

        #[test]
        fn test_rejects_empty_name() {
            let result = UploadStore::stored_name(7, "///");
            assert!(matches!(result, Err(UploadError::EmptyFilename)));
        }
    }

    #[tokio::test]
    async fn test_save_profile_image_writes_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(temp_dir.path().join("uploads"));

        let name = store
            .save_profile_image(3, "../me.jpg", b"jpeg-bytes")
            .await
            .unwrap();

        assert_eq!(name, "3_me.jpg");
        let written = tokio::fs::read(store.dir().join(&name)).await.unwrap();
        assert_eq!(written, b"jpeg-bytes");
    }

    #[tokio::test]
    async fn test_save_rejects_empty_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(temp_dir.path());

        let result = store.save_profile_image(3, "me.jpg", b"").await;
        assert!(matches!(result, Err(UploadError::EmptyFile)));
    }
}
