use std::path::{Component, Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use reqwest::Url;
use ring::hmac;
use tokio::fs;
use tracing::{debug, info};

use crate::error::ApiError;

/// Result of a successful [`BlobStore::put`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    /// `container/name`, the key used by every other method.
    pub path: String,
    pub size: usize,
    pub blake3_hash: String,
}

/// Resolve a relative blob path under `base`, rejecting anything that is not
/// a plain sequence of named components.
fn ensure_within(base: &Path, relative: &str) -> Result<PathBuf, ApiError> {
    let mut resolved = base.to_path_buf();
    let mut depth = 0;
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(c) => {
                resolved.push(c);
                depth += 1;
            }
            _ => return Err(ApiError::Validation("Path traversal detected".to_string())),
        }
    }
    if depth == 0 || relative.contains('\\') {
        return Err(ApiError::Validation("Invalid file path".to_string()));
    }
    Ok(resolved)
}

/// Reduce a client-supplied file name to a single safe path segment.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_control() { '_' } else { c })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "upload".to_string(),
        _ => cleaned,
    }
}

/// Filesystem blob store organized as `<base>/<container>/<name...>`.
///
/// Reads from outside the server go through signed URLs: an HMAC-SHA256
/// over the path and expiry, checked by [`BlobStore::verify_signature`].
pub struct BlobStore {
    base_path: PathBuf,
    max_size: usize,
    signing_key: hmac::Key,
    public_base: Url,
}

impl BlobStore {
    pub async fn new(
        base_path: PathBuf,
        max_size: usize,
        signing_key: &[u8],
        public_base_url: &str,
    ) -> Result<Self, ApiError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ApiError::Upstream(format!(
                "Failed to create blob directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        let public_base = Url::parse(public_base_url)
            .ok()
            .filter(|u| !u.cannot_be_a_base())
            .ok_or_else(|| {
                ApiError::Upstream(format!("Invalid public base URL '{public_base_url}'"))
            })?;

        info!(path = %base_path.display(), "Blob store initialized");

        Ok(Self {
            base_path,
            max_size,
            signing_key: hmac::Key::new(hmac::HMAC_SHA256, signing_key),
            public_base,
        })
    }

    pub async fn put(&self, container: &str, name: &str, data: &[u8]) -> Result<StoredBlob, ApiError> {
        if data.is_empty() {
            return Err(ApiError::Validation("Empty file".to_string()));
        }
        if data.len() > self.max_size {
            return Err(ApiError::Validation(format!(
                "File too large: {} bytes (max {})",
                data.len(),
                self.max_size
            )));
        }

        let path = format!("{container}/{name}");
        let target = ensure_within(&self.base_path, &path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                ApiError::Upstream(format!("Failed to create directory for {path}: {e}"))
            })?;
        }

        fs::write(&target, data)
            .await
            .map_err(|e| ApiError::Upstream(format!("Failed to write blob {path}: {e}")))?;

        let blake3_hash = blake3::hash(data).to_hex().to_string();
        debug!(path = %path, size = data.len(), "Stored blob");
        Ok(StoredBlob {
            path,
            size: data.len(),
            blake3_hash,
        })
    }

    pub async fn get(&self, path: &str) -> Result<Vec<u8>, ApiError> {
        let target = ensure_within(&self.base_path, path)?;
        if !fs::try_exists(&target).await.unwrap_or(false) {
            return Err(ApiError::NotFound("File not found".to_string()));
        }

        let data = fs::read(&target)
            .await
            .map_err(|e| ApiError::Upstream(format!("Failed to read blob {path}: {e}")))?;

        debug!(path = %path, size = data.len(), "Retrieved blob");
        Ok(data)
    }

    pub async fn exists(&self, path: &str) -> Result<bool, ApiError> {
        let target = ensure_within(&self.base_path, path)?;
        Ok(fs::metadata(&target).await.map(|m| m.is_file()).unwrap_or(false))
    }

    /// Unsigned reference URL, stored on lesson records.
    pub fn reference_url(&self, path: &str) -> String {
        self.url_for(path).to_string()
    }

    /// Read URL valid until `now + ttl_secs`.
    pub fn signed_url(&self, path: &str, ttl_secs: i64, now: i64) -> String {
        let expires = now + ttl_secs;
        let mut url = self.url_for(path);
        url.query_pairs_mut()
            .append_pair("expires", &expires.to_string())
            .append_pair("sig", &self.signature(path, expires));
        url.to_string()
    }

    pub fn verify_signature(&self, path: &str, expires: i64, sig: &str, now: i64) -> Result<(), ApiError> {
        let denied = || ApiError::Forbidden("Invalid or expired link".to_string());
        if now > expires {
            return Err(denied());
        }
        let tag = URL_SAFE_NO_PAD.decode(sig).map_err(|_| denied())?;
        hmac::verify(&self.signing_key, signing_input(path, expires).as_bytes(), &tag)
            .map_err(|_| denied())
    }

    fn signature(&self, path: &str, expires: i64) -> String {
        let tag = hmac::sign(&self.signing_key, signing_input(path, expires).as_bytes());
        URL_SAFE_NO_PAD.encode(tag.as_ref())
    }

    fn url_for(&self, path: &str) -> Url {
        let mut url = self.public_base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("files").extend(path.split('/'));
        }
        url
    }
}

fn signing_input(path: &str, expires: i64) -> String {
    format!("{path}\n{expires}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_store() -> (BlobStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::new(
            dir.path().to_path_buf(),
            1024 * 1024,
            b"signing-key",
            "http://localhost:8080",
        )
        .await
        .unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let (store, _dir) = test_store().await;

        let blob = store
            .put("lesson-files", "lessons/year4/maths/1_sheet.pdf", b"pdf-bytes")
            .await
            .unwrap();
        assert_eq!(blob.path, "lesson-files/lessons/year4/maths/1_sheet.pdf");
        assert_eq!(blob.blake3_hash, blake3::hash(b"pdf-bytes").to_hex().to_string());

        assert_eq!(store.get(&blob.path).await.unwrap(), b"pdf-bytes");
        assert!(store.exists(&blob.path).await.unwrap());
        assert!(!store.exists("lesson-files/missing.pdf").await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_traversal_and_oversize() {
        let (store, _dir) = test_store().await;

        assert!(store.put("lesson-files", "../escape.txt", b"x").await.is_err());
        assert!(store.get("lesson-files/../../etc/passwd").await.is_err());
        assert!(store.get("/etc/passwd").await.is_err());

        let big = vec![0u8; 1024 * 1024 + 1];
        assert!(matches!(
            store.put("lesson-files", "big.bin", &big).await,
            Err(ApiError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_signed_urls() {
        let (store, _dir) = test_store().await;
        let now = 1_700_000_000;

        let url = Url::parse(&store.signed_url("lesson-files/1_my notes.pdf", 900, now)).unwrap();
        assert_eq!(url.path(), "/files/lesson-files/1_my%20notes.pdf");

        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        let expires: i64 = pairs["expires"].parse().unwrap();
        let sig = &pairs["sig"];
        assert_eq!(expires, now + 900);

        assert!(store.verify_signature("lesson-files/1_my notes.pdf", expires, sig, now).is_ok());
        // Tampered path, expired link, garbage signature.
        assert!(store.verify_signature("lesson-files/other.pdf", expires, sig, now).is_err());
        assert!(store
            .verify_signature("lesson-files/1_my notes.pdf", expires, sig, expires + 1)
            .is_err());
        assert!(store
            .verify_signature("lesson-files/1_my notes.pdf", expires, "not-base64!", now)
            .is_err());
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("C:\\Users\\me\\plan.xlsx"), "plan.xlsx");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name(".."), "upload");
        assert_eq!(sanitize_file_name("week 1.pdf"), "week 1.pdf");
    }
}
