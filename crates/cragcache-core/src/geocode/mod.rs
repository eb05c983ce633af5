//! Reverse geocoding proxy.
//!
//! This module provides the `Geocoder` for a Nominatim-compatible upstream
//! and the rate limiting applied to callers of the proxy.

pub mod client;
pub mod limiter;

pub use client::{validate_coordinates, GeocodeError, GeocodeResult, Geocoder};
pub use limiter::{FixedWindowLimiter, RateDecision, RateLimiter};
