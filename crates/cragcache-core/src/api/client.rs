//! API client for the hosted backend.
//!
//! This module provides the `BackendClient` struct for table reads and
//! inserts, remote procedure calls, storage signing and raw asset fetches.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{header, Client};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::cache::CachedResponse;
use crate::models::{
    CragRecord, CragReport, DeletionRequest, ImageFlag, ImageRecord, RatingSummary, Region,
    SearchResult, SearchResultKind, SignedUpload,
};

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) reads.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Results returned per entity type by search.
const SEARCH_LIMIT: usize = 10;

/// Columns selected for image downloads, embedding route lines and their climbs.
const IMAGE_SELECT: &str = "id,crag_id,url,latitude,longitude,width,height,verification_count,flag_count,\
route_lines(id,points,color,climbs(id,name,grade,route_type))";

/// The authenticated user behind a bearer token.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CragSearchRow {
    id: String,
    name: String,
    slug: Option<String>,
    region_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClimbSearchRow {
    id: String,
    name: String,
    slug: Option<String>,
    grade: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SignUploadResponse {
    url: String,
}

/// API client for the backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct BackendClient {
    client: Client,
    base_url: Arc<String>,
    anon_key: Arc<String>,
    token: Option<Arc<String>>,
}

impl BackendClient {
    /// Create a new client for the backend at `base_url`
    pub fn new(base_url: &str, anon_key: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: Arc::new(base_url.trim_end_matches('/').to_string()),
            anon_key: Arc::new(anon_key.to_string()),
            token: None,
        })
    }

    /// Create a client acting as the given user, sharing the connection pool.
    pub fn with_token(&self, token: impl Into<Arc<String>>) -> Self {
        Self {
            client: self.client.clone(),
            base_url: Arc::clone(&self.base_url),
            anon_key: Arc::clone(&self.anon_key),
            token: Some(token.into()),
        }
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn rpc_url(&self, function: &str) -> String {
        format!("{}/rest/v1/rpc/{}", self.base_url, function)
    }

    fn auth_headers(&self) -> Result<header::HeaderMap> {
        let mut headers = header::HeaderMap::new();
        headers.insert("apikey", header::HeaderValue::from_str(&self.anon_key)?);
        let bearer = match self.token {
            Some(ref token) => token.as_str(),
            None => self.anon_key.as_str(),
        };
        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&format!("Bearer {}", bearer))?,
        );
        Ok(headers)
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(response: reqwest::Response) -> Result<Option<reqwest::Response>> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body).into())
        }
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body).into())
        }
    }

    /// GET a table with PostgREST query parameters, retrying on 429.
    async fn select<T: DeserializeOwned>(&self, table: &str, query: &[(&str, String)]) -> Result<T> {
        let url = self.rest_url(table);
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = self
                .client
                .get(&url)
                .headers(self.auth_headers()?)
                .query(query)
                .send()
                .await
                .with_context(|| format!("Failed to send GET request to {}", url))?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => {
                    return response
                        .json()
                        .await
                        .with_context(|| format!("Failed to parse JSON response from {}", url));
                }
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited.into());
                    }
                    warn!(url = %url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2;
                }
            }
        }
    }

    /// Insert one row without asking for it back.
    async fn insert<B: Serialize>(&self, table: &str, row: &B) -> Result<()> {
        let url = self.rest_url(table);
        let response = self
            .client
            .post(&url)
            .headers(self.auth_headers()?)
            .header("Prefer", "return=minimal")
            .json(row)
            .send()
            .await
            .with_context(|| format!("Failed to insert into {}", table))?;

        Self::check_response(response).await?;
        debug!(table = table, "Row inserted");
        Ok(())
    }

    /// Call a remote procedure and decode its JSON result.
    async fn rpc<T: DeserializeOwned, B: Serialize>(&self, function: &str, args: &B) -> Result<T> {
        let url = self.rpc_url(function);
        let response = self
            .client
            .post(&url)
            .headers(self.auth_headers()?)
            .json(args)
            .send()
            .await
            .with_context(|| format!("Failed to call {}", function))?;

        let response = Self::check_response(response).await?;
        response
            .json()
            .await
            .with_context(|| format!("Failed to parse result of {}", function))
    }

    /// Call a remote procedure that returns nothing useful.
    async fn rpc_void<B: Serialize>(&self, function: &str, args: &B) -> Result<()> {
        let url = self.rpc_url(function);
        let response = self
            .client
            .post(&url)
            .headers(self.auth_headers()?)
            .json(args)
            .send()
            .await
            .with_context(|| format!("Failed to call {}", function))?;

        Self::check_response(response).await?;
        Ok(())
    }

    // ===== Auth =====

    /// Resolve the user behind a bearer token. Fails with `ApiError::Unauthorized`
    /// when the backend rejects the token.
    pub async fn current_user(&self, token: &str) -> Result<BackendUser> {
        let url = format!("{}/auth/v1/user", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("apikey", self.anon_key.as_str())
            .bearer_auth(token)
            .send()
            .await
            .context("Failed to fetch current user")?;

        let response = Self::check_response(response).await?;
        response.json().await.context("Failed to parse user response")
    }

    // ===== Reads =====

    /// Search crags and climbs by name.
    pub async fn search(&self, query: &str) -> Result<Vec<SearchResult>> {
        let pattern = format!("*{}*", sanitize_search_term(query));
        let limit = SEARCH_LIMIT.to_string();

        let crag_query = [
            ("select", "id,name,slug,region_name".to_string()),
            ("name", format!("ilike.{}", pattern)),
            ("order", "name.asc".to_string()),
            ("limit", limit.clone()),
        ];
        let climb_query = [
            ("select", "id,name,slug,grade".to_string()),
            ("name", format!("ilike.{}", pattern)),
            ("deleted_at", "is.null".to_string()),
            ("order", "name.asc".to_string()),
            ("limit", limit),
        ];

        let (crags, climbs) = tokio::join!(
            self.select::<Vec<CragSearchRow>>("crags", &crag_query),
            self.select::<Vec<ClimbSearchRow>>("climbs", &climb_query),
        );

        let mut results: Vec<SearchResult> = crags?
            .into_iter()
            .map(|row| SearchResult {
                kind: SearchResultKind::Crag,
                id: row.id,
                name: row.name,
                slug: row.slug,
                subtitle: row.region_name,
            })
            .collect();
        results.extend(climbs?.into_iter().map(|row| SearchResult {
            kind: SearchResultKind::Climb,
            id: row.id,
            name: row.name,
            slug: row.slug,
            subtitle: row.grade,
        }));

        debug!(query = query, count = results.len(), "Search complete");
        Ok(results)
    }

    /// Fetch a single crag, `None` when no row matches.
    pub async fn fetch_crag(&self, crag_id: &str) -> Result<Option<CragRecord>> {
        let query = [
            ("select", "*".to_string()),
            ("id", format!("eq.{}", crag_id)),
            ("limit", "1".to_string()),
        ];
        let rows: Vec<CragRecord> = self.select("crags", &query).await?;
        Ok(rows.into_iter().next())
    }

    /// Fetch all images of a crag with their route lines.
    pub async fn fetch_crag_images(&self, crag_id: &str) -> Result<Vec<ImageRecord>> {
        let query = [
            ("select", IMAGE_SELECT.to_string()),
            ("crag_id", format!("eq.{}", crag_id)),
            ("order", "created_at.asc".to_string()),
        ];
        self.select("images", &query).await
    }

    /// Existing crag slugs starting with `prefix`.
    pub async fn crag_slugs_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        #[derive(Deserialize)]
        struct SlugRow {
            slug: Option<String>,
        }

        let query = [
            ("select", "slug".to_string()),
            ("slug", format!("like.{}*", sanitize_search_term(prefix))),
        ];
        let rows: Vec<SlugRow> = self.select("crags", &query).await?;
        Ok(rows.into_iter().filter_map(|row| row.slug).collect())
    }

    pub async fn star_rating_summary(&self, climb_id: &str) -> Result<RatingSummary> {
        let rows: Vec<RatingSummary> = self
            .rpc("get_star_rating_summary", &json!({ "climb_id": climb_id }))
            .await?;
        Ok(rows.into_iter().next().unwrap_or_default())
    }

    pub async fn find_region_by_location(&self, lat: f64, lng: f64) -> Result<Option<Region>> {
        let rows: Vec<Region> = self
            .rpc("find_region_by_location", &json!({ "lat": lat, "lng": lng }))
            .await?;
        Ok(rows.into_iter().next())
    }

    // ===== Writes =====

    /// Record a crag report and bump the crag's report counter.
    pub async fn submit_crag_report(&self, report: &CragReport) -> Result<()> {
        self.insert("crag_reports", report).await?;
        self.rpc_void("increment_crag_report_count", &json!({ "crag_id": report.crag_id }))
            .await
    }

    pub async fn submit_image_flag(&self, flag: &ImageFlag) -> Result<()> {
        self.insert("image_flags", flag).await
    }

    pub async fn submit_deletion_request(&self, request: &DeletionRequest) -> Result<()> {
        self.insert("deletion_requests", request).await
    }

    /// Soft-delete a community comment. Returns false when the comment does
    /// not exist or does not belong to the caller.
    pub async fn soft_delete_comment(&self, comment_id: &str) -> Result<bool> {
        self.rpc("soft_delete_comment", &json!({ "comment_id": comment_id }))
            .await
    }

    pub async fn increment_gear_click(&self, gear_id: &str) -> Result<()> {
        self.rpc_void("increment_gear_click", &json!({ "gear_id": gear_id }))
            .await
    }

    // ===== Storage =====

    /// Mint a signed URL allowing a single upload to `bucket/path`.
    pub async fn create_signed_upload_url(&self, bucket: &str, path: &str) -> Result<SignedUpload> {
        let url = format!("{}/storage/v1/object/upload/sign/{}/{}", self.base_url, bucket, path);
        let response = self
            .client
            .post(&url)
            .headers(self.auth_headers()?)
            .json(&json!({}))
            .send()
            .await
            .context("Failed to request signed upload URL")?;

        let response = Self::check_response(response).await?;
        let signed: SignUploadResponse = response
            .json()
            .await
            .context("Failed to parse signed upload response")?;

        let token = signed
            .url
            .split_once("token=")
            .map(|(_, rest)| rest.split('&').next().unwrap_or_default().to_string());

        Ok(SignedUpload {
            signed_url: format!("{}/storage/v1{}", self.base_url, signed.url),
            path: path.to_string(),
            token,
        })
    }

    /// Fetch an arbitrary asset (photo, tile, screenshot) as a whole response.
    pub async fn fetch_asset(&self, url: &str) -> Result<CachedResponse> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch asset {}", url))?;

        let response = Self::check_response(response).await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .with_context(|| format!("Failed to read asset body {}", url))?;

        Ok(CachedResponse::new(status, headers, body.to_vec()))
    }
}

/// Strip characters with meaning in PostgREST filter syntax.
fn sanitize_search_term(query: &str) -> String {
    query
        .trim()
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '\''))
        .collect()
}
