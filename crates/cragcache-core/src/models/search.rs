//! Lookup and search result types.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchResultKind {
    Crag,
    Climb,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub kind: SearchResultKind,
    pub id: String,
    pub name: String,
    pub slug: Option<String>,
    /// Grade for climbs, region for crags.
    pub subtitle: Option<String>,
}

/// Result of `get_star_rating_summary`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RatingSummary {
    #[serde(default)]
    pub average_rating: Option<f64>,
    #[serde(default)]
    pub rating_count: i64,
}

/// Result of `find_region_by_location`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Region {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub country_code: Option<String>,
}

/// A signed URL granting a one-off upload into object storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedUpload {
    pub signed_url: String,
    pub path: String,
    pub token: Option<String>,
}
