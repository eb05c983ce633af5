//! HTTP handlers.
//!
//! Handlers validate input, call the backend and shape the response. Guards
//! (`CsrfVerified`, `AuthUser`) run as extractors ahead of the body.

use std::collections::HashSet;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use cragcache_core::auth::CsrfTokens;
use cragcache_core::geocode::{validate_coordinates, GeocodeResult, RateDecision};
use cragcache_core::models::{
    CragReport, DeletionRequest, ImageFlag, Point, RatingSummary, Region, ReportReason,
    SearchResult, SignedUpload,
};
use cragcache_core::models::moderation::normalize_details;
use cragcache_core::render::RoutePreview;
use cragcache_core::utils::{make_unique_slug, slugify};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::error::AppError;
use crate::extract::{AuthUser, ClientKey, CsrfVerified, ValidJson, ValidQuery};
use crate::state::AppState;

/// Shortest query accepted by search.
const MIN_SEARCH_LENGTH: usize = 2;

/// Upper bound on points in a route line preview.
const MAX_PREVIEW_POINTS: usize = 500;

/// Storage bucket for user photo uploads.
const UPLOAD_BUCKET: &str = "route-uploads";

const UPLOAD_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "heic"];

const DELETION_TARGETS: &[&str] = &["crag", "climb", "image", "comment"];

// ============================================================================
// Public endpoints
// ============================================================================

pub async fn health() -> &'static str {
    "ok"
}

#[derive(Serialize)]
pub struct CsrfResponse {
    pub token: String,
}

/// Issue a CSRF token, both in the body and as an HttpOnly cookie.
pub async fn issue_csrf(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let token = state
        .csrf
        .issue()
        .map_err(|e| AppError::Unknown(anyhow::anyhow!(e)))?;
    let cookie = CsrfTokens::set_cookie_header(&token, state.secure_cookies);

    Ok((
        [
            (header::SET_COOKIE, cookie),
            (header::CACHE_CONTROL, "no-store".to_string()),
        ],
        Json(CsrfResponse { token }),
    ))
}

#[derive(Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
}

pub async fn search(
    State(state): State<AppState>,
    ValidQuery(params): ValidQuery<SearchParams>,
) -> Result<Json<Vec<SearchResult>>, AppError> {
    let query = params.q.trim();
    if query.chars().count() < MIN_SEARCH_LENGTH {
        return Err(AppError::Validation(format!(
            "query must be at least {} characters",
            MIN_SEARCH_LENGTH
        )));
    }
    Ok(Json(state.backend.search(query).await?))
}

#[derive(Debug, Deserialize)]
pub struct LocationParams {
    pub lat: f64,
    pub lng: f64,
}

pub async fn reverse_geocode(
    State(state): State<AppState>,
    ClientKey(client): ClientKey,
    ValidQuery(params): ValidQuery<LocationParams>,
) -> Result<impl IntoResponse, AppError> {
    match state.geocode_limiter.check(&client) {
        RateDecision::Limited { retry_after } => {
            info!(client = %client, "Geocoding rate limit hit");
            // Round up so clients never retry early
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            return Err(AppError::RateLimited {
                retry_after_secs: secs.max(1),
            });
        }
        RateDecision::Allowed { remaining } => {
            debug!(client = %client, remaining = remaining, "Geocoding request allowed");
        }
    }

    let result: GeocodeResult = state.geocoder.reverse(params.lat, params.lng).await?;
    Ok(Json(result))
}

pub async fn region_lookup(
    State(state): State<AppState>,
    ValidQuery(params): ValidQuery<LocationParams>,
) -> Result<Json<Region>, AppError> {
    validate_coordinates(params.lat, params.lng)?;
    state
        .backend
        .find_region_by_location(params.lat, params.lng)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("No region at this location".to_string()))
}

pub async fn climb_rating(
    State(state): State<AppState>,
    Path(climb_id): Path<String>,
) -> Result<Json<RatingSummary>, AppError> {
    Ok(Json(state.backend.star_rating_summary(&climb_id).await?))
}

#[derive(Deserialize)]
pub struct SlugParams {
    #[serde(default)]
    pub name: String,
}

/// Suggest a crag slug not yet taken.
pub async fn suggest_slug(
    State(state): State<AppState>,
    ValidQuery(params): ValidQuery<SlugParams>,
) -> Result<impl IntoResponse, AppError> {
    let name = params.name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("name is required".to_string()));
    }
    let existing: HashSet<String> = state
        .backend
        .crag_slugs_with_prefix(&slugify(name))
        .await?
        .into_iter()
        .collect();
    Ok(Json(json!({ "slug": make_unique_slug(name, &existing) })))
}

#[derive(Deserialize)]
pub struct PreviewRequest {
    pub points: Vec<Point>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

/// Render a route line without storing it.
pub async fn route_line_preview(ValidJson(request): ValidJson<PreviewRequest>) -> Result<Json<RoutePreview>, AppError> {
    if request.points.len() > MAX_PREVIEW_POINTS {
        return Err(AppError::Validation(format!(
            "at most {} points allowed",
            MAX_PREVIEW_POINTS
        )));
    }
    if request.points.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
        return Err(AppError::Validation("points must be finite numbers".to_string()));
    }
    let dimensions = request.width.zip(request.height);
    let color = request.color.as_deref().unwrap_or("#ff0000");
    Ok(Json(RoutePreview::new(&request.points, color, dimensions)))
}

// ============================================================================
// Guarded endpoints
// ============================================================================

#[derive(Deserialize)]
pub struct ReportBody {
    pub reason: ReportReason,
    #[serde(default)]
    pub details: Option<String>,
}

pub async fn report_crag(
    _csrf: CsrfVerified,
    user: AuthUser,
    Path(crag_id): Path<String>,
    ValidJson(body): ValidJson<ReportBody>,
) -> Result<impl IntoResponse, AppError> {
    let details = normalize_details(body.details.as_deref()).map_err(AppError::Validation)?;
    let report = CragReport {
        crag_id,
        user_id: user.id,
        reason: body.reason,
        details,
    };
    user.backend.submit_crag_report(&report).await?;
    info!(crag_id = %report.crag_id, reason = ?report.reason, "Crag reported");
    Ok((StatusCode::CREATED, Json(json!({ "status": "reported" }))))
}

#[derive(Deserialize)]
pub struct FlagBody {
    pub reason: ReportReason,
    #[serde(default)]
    pub comment: Option<String>,
}

pub async fn flag_image(
    _csrf: CsrfVerified,
    user: AuthUser,
    Path(image_id): Path<String>,
    ValidJson(body): ValidJson<FlagBody>,
) -> Result<impl IntoResponse, AppError> {
    let comment = normalize_details(body.comment.as_deref()).map_err(AppError::Validation)?;
    let flag = ImageFlag {
        image_id,
        user_id: user.id,
        reason: body.reason,
        comment,
    };
    user.backend.submit_image_flag(&flag).await?;
    info!(image_id = %flag.image_id, "Image flagged");
    Ok((StatusCode::CREATED, Json(json!({ "status": "flagged" }))))
}

pub async fn delete_comment(
    _csrf: CsrfVerified,
    user: AuthUser,
    Path(comment_id): Path<String>,
) -> Result<StatusCode, AppError> {
    if !user.backend.soft_delete_comment(&comment_id).await? {
        return Err(AppError::NotFound("Comment not found".to_string()));
    }
    info!(comment_id = %comment_id, "Comment deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct DeletionBody {
    pub target_type: String,
    pub target_id: String,
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn request_deletion(
    _csrf: CsrfVerified,
    user: AuthUser,
    ValidJson(body): ValidJson<DeletionBody>,
) -> Result<impl IntoResponse, AppError> {
    if !DELETION_TARGETS.contains(&body.target_type.as_str()) {
        return Err(AppError::Validation(format!(
            "target_type must be one of {}",
            DELETION_TARGETS.join(", ")
        )));
    }
    if body.target_id.trim().is_empty() {
        return Err(AppError::Validation("target_id is required".to_string()));
    }
    let reason = normalize_details(body.reason.as_deref()).map_err(AppError::Validation)?;

    let request = DeletionRequest {
        user_id: user.id,
        target_type: body.target_type,
        target_id: body.target_id,
        reason,
    };
    user.backend.submit_deletion_request(&request).await?;
    Ok((StatusCode::CREATED, Json(json!({ "status": "requested" }))))
}

#[derive(Deserialize)]
pub struct UploadBody {
    pub file_name: String,
}

pub async fn sign_upload(
    _csrf: CsrfVerified,
    user: AuthUser,
    ValidJson(body): ValidJson<UploadBody>,
) -> Result<Json<SignedUpload>, AppError> {
    let path = upload_path(&user.id, &body.file_name, Utc::now().timestamp_millis())?;
    let signed = user.backend.create_signed_upload_url(UPLOAD_BUCKET, &path).await?;
    debug!(path = %path, "Upload URL signed");
    Ok(Json(signed))
}

/// Object path for an upload: `<user>/<millis>-<slugified stem>.<ext>`.
fn upload_path(user_id: &str, file_name: &str, millis: i64) -> Result<String, AppError> {
    let (stem, ext) = file_name
        .rsplit_once('.')
        .ok_or_else(|| AppError::Validation("file name needs an extension".to_string()))?;
    let ext = ext.to_ascii_lowercase();
    if !UPLOAD_EXTENSIONS.contains(&ext.as_str()) {
        return Err(AppError::Validation(format!("unsupported file type: {}", ext)));
    }
    let stem = match slugify(stem) {
        s if s.is_empty() => "photo".to_string(),
        s => s,
    };
    Ok(format!("{}/{}-{}.{}", user_id, millis, stem, ext))
}

pub async fn gear_click(
    _csrf: CsrfVerified,
    State(state): State<AppState>,
    Path(gear_id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.backend.increment_gear_click(&gear_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_path() {
        assert_eq!(
            upload_path("u1", "My Photo.JPG", 1700).unwrap(),
            "u1/1700-my-photo.jpg"
        );
        assert_eq!(upload_path("u1", "!!!.png", 5).unwrap(), "u1/5-photo.png");
        assert!(upload_path("u1", "script.sh", 5).is_err());
        assert!(upload_path("u1", "noextension", 5).is_err());
    }
}
