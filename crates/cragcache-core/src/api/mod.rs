//! REST client module for the hosted backend.
//!
//! This module provides the `BackendClient` for the backend-as-a-service
//! that owns crags, climbs, images and moderation tables, plus its remote
//! procedures and object storage.
//!
//! Requests carry the project's anon key; user-scoped requests also carry
//! the user's bearer token so row-level security applies.

pub mod client;
pub mod error;

pub use client::{BackendClient, BackendUser};
pub use error::ApiError;
