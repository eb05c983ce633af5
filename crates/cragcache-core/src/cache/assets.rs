use std::path::PathBuf;

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, warn};

/// Name of the single cache partition. Bump to invalidate everything.
const PARTITION: &str = "assets-v1";

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// A whole HTTP response held in the asset cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl CachedResponse {
    pub fn new(status: u16, headers: Vec<(String, String)>, body: Vec<u8>) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn content_type(&self) -> &str {
        self.header("content-type").unwrap_or(DEFAULT_CONTENT_TYPE)
    }
}

/// Everything but the body, stored next to it as JSON.
#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    url: String,
    status: u16,
    headers: Vec<(String, String)>,
    stored_at: DateTime<Utc>,
}

/// Cache of whole responses keyed by request URL. Entries never expire;
/// callers delete what they no longer need.
pub struct AssetCache {
    dir: PathBuf,
}

impl AssetCache {
    pub fn new(cache_dir: PathBuf) -> Result<Self> {
        let dir = cache_dir.join(PARTITION);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create asset cache at {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn key(url: &str) -> String {
        hex::encode(Sha256::digest(url.as_bytes()))
    }

    fn meta_path(&self, url: &str) -> PathBuf {
        self.dir.join(format!("{}.json", Self::key(url)))
    }

    fn body_path(&self, url: &str) -> PathBuf {
        self.dir.join(format!("{}.body", Self::key(url)))
    }

    /// Store `response` under `url`, replacing any previous entry.
    pub async fn put(&self, url: &str, response: &CachedResponse) -> bool {
        match self.try_put(url, response).await {
            Ok(()) => {
                debug!(url = url, bytes = response.body.len(), "Asset cached");
                true
            }
            Err(e) => {
                warn!(url = url, error = %e, "Failed to cache asset");
                false
            }
        }
    }

    async fn try_put(&self, url: &str, response: &CachedResponse) -> Result<()> {
        // Body first: a meta file only exists for complete entries
        fs::write(self.body_path(url), &response.body).await?;
        let meta = EntryMeta {
            url: url.to_string(),
            status: response.status,
            headers: response.headers.clone(),
            stored_at: Utc::now(),
        };
        fs::write(self.meta_path(url), serde_json::to_vec(&meta)?).await?;
        Ok(())
    }

    /// The cached response for `url`, if any.
    pub async fn match_url(&self, url: &str) -> Option<CachedResponse> {
        match self.try_match(url).await {
            Ok(response) => response,
            Err(e) => {
                warn!(url = url, error = %e, "Failed to read cached asset");
                None
            }
        }
    }

    async fn try_match(&self, url: &str) -> Result<Option<CachedResponse>> {
        let raw = match fs::read(self.meta_path(url)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).context("Failed to read asset metadata"),
        };
        let meta: EntryMeta = serde_json::from_slice(&raw).context("Failed to parse asset metadata")?;
        if meta.url != url {
            anyhow::bail!("cache key collision for {}", url);
        }
        let body = fs::read(self.body_path(url)).await.context("Failed to read asset body")?;
        Ok(Some(CachedResponse::new(meta.status, meta.headers, body)))
    }

    /// Remove the entry for `url`. Returns true when an entry was removed.
    pub async fn delete(&self, url: &str) -> bool {
        let mut removed = false;
        for path in [self.meta_path(url), self.body_path(url)] {
            match fs::remove_file(&path).await {
                Ok(()) => removed = true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(url = url, error = %e, "Failed to delete cached asset"),
            }
        }
        removed
    }

    /// A `data:` URL for the cached entry, usable directly as an image source.
    pub async fn object_url(&self, url: &str) -> Option<String> {
        let response = self.match_url(url).await?;
        Some(format!(
            "data:{};base64,{}",
            response.content_type(),
            STANDARD.encode(&response.body)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png() -> CachedResponse {
        CachedResponse::new(
            200,
            vec![("Content-Type".to_string(), "image/png".to_string())],
            vec![0x89, b'P', b'N', b'G'],
        )
    }

    #[tokio::test]
    async fn test_put_match_delete() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AssetCache::new(dir.path().to_path_buf()).unwrap();
        let url = "https://tiles.test/14/8000/5600.png";

        assert!(cache.match_url(url).await.is_none());
        assert!(cache.put(url, &png()).await);
        assert_eq!(cache.match_url(url).await, Some(png()));

        assert!(cache.delete(url).await);
        assert!(cache.match_url(url).await.is_none());
        assert!(!cache.delete(url).await);
    }

    #[tokio::test]
    async fn test_object_url() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AssetCache::new(dir.path().to_path_buf()).unwrap();
        let url = "https://img.test/shot.png";

        assert!(cache.object_url(url).await.is_none());
        cache.put(url, &png()).await;
        assert_eq!(cache.object_url(url).await.unwrap(), "data:image/png;base64,iVBORw==");
    }

    #[test]
    fn test_missing_content_type_defaults() {
        let response = CachedResponse::new(200, vec![], vec![]);
        assert_eq!(response.content_type(), "application/octet-stream");
    }
}
