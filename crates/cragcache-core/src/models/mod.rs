//! Data models for climbing entities.
//!
//! This module contains the data structures shared by the backend client,
//! the offline store and the HTTP layer:
//!
//! - `CragMeta`, `CragRecord`, `BoundingBox`: a crag and its offline metadata
//! - `ImageRecord`, `RouteLine`, `ClimbSummary`, `Point`: route photos and overlays
//! - Moderation and lookup types: `CragReport`, `ImageFlag`, `DeletionRequest`, etc.

pub mod crag;
pub mod image;
pub mod moderation;
pub mod search;

pub use crag::{BoundingBox, CragMeta, CragRecord};
pub use image::{ClimbSummary, ImageRecord, Point, RouteLine};
pub use moderation::{CragReport, DeletionRequest, ImageFlag, ReportReason};
pub use search::{RatingSummary, Region, SearchResult, SearchResultKind, SignedUpload};
