//! User-submitted reports, flags and deletion requests.

use serde::{Deserialize, Serialize};

/// Maximum length of free-text details on a report or flag.
pub const MAX_DETAILS_LENGTH: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportReason {
    IncorrectLocation,
    Duplicate,
    AccessIssue,
    Inappropriate,
    Other,
}

/// A row in `crag_reports`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CragReport {
    pub crag_id: String,
    pub user_id: String,
    pub reason: ReportReason,
    #[serde(default)]
    pub details: Option<String>,
}

/// A row in `image_flags`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageFlag {
    pub image_id: String,
    pub user_id: String,
    pub reason: ReportReason,
    #[serde(default)]
    pub comment: Option<String>,
}

/// A row in `deletion_requests`: a user asking moderators to remove content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionRequest {
    pub user_id: String,
    pub target_type: String,
    pub target_id: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Check free text against the length limit. Returns the trimmed text,
/// or `None` when it is blank.
pub fn normalize_details(details: Option<&str>) -> Result<Option<String>, String> {
    let Some(text) = details.map(str::trim).filter(|t| !t.is_empty()) else {
        return Ok(None);
    };
    if text.chars().count() > MAX_DETAILS_LENGTH {
        return Err(format!("details must be at most {} characters", MAX_DETAILS_LENGTH));
    }
    Ok(Some(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_wire_format() {
        let json = serde_json::to_string(&ReportReason::IncorrectLocation).unwrap();
        assert_eq!(json, "\"incorrect_location\"");
    }

    #[test]
    fn test_normalize_details() {
        assert_eq!(normalize_details(None).unwrap(), None);
        assert_eq!(normalize_details(Some("   ")).unwrap(), None);
        assert_eq!(normalize_details(Some(" loose block ")).unwrap().as_deref(), Some("loose block"));
        let long = "x".repeat(MAX_DETAILS_LENGTH + 1);
        assert!(normalize_details(Some(&long)).is_err());
    }
}
