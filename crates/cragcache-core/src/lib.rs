//! Core library for cragcache.
//!
//! Offline access and request plumbing for a climbing-route discovery
//! app: a client for the hosted backend, the offline crag store and asset
//! cache, CSRF tokens, the reverse-geocoding proxy and route-line rendering.

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod download;
pub mod geocode;
pub mod models;
pub mod render;
pub mod utils;

pub use config::Config;
