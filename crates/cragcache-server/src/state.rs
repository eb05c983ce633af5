use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use cragcache_core::api::BackendClient;
use cragcache_core::auth::CsrfTokens;
use cragcache_core::geocode::{FixedWindowLimiter, Geocoder, RateLimiter};
use cragcache_core::Config;
use tracing::warn;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub backend: BackendClient,
    pub csrf: CsrfTokens,
    pub geocoder: Geocoder,
    pub geocode_limiter: Arc<dyn RateLimiter>,
    pub secure_cookies: bool,
    pub trust_proxy: bool,
}

impl AppState {
    pub fn from_config(config: &Config) -> Result<Self> {
        let (backend_url, anon_key) = config.backend()?;
        let backend = BackendClient::new(backend_url, anon_key)?;

        let secret = match config.csrf_secret {
            Some(ref secret) => secret.clone(),
            None => {
                warn!("CRAGCACHE_CSRF_SECRET not set, using a random secret; tokens will not survive restarts");
                CsrfTokens::generate_secret()
            }
        };

        let geocoder = Geocoder::new(&config.geocode_url, &config.geocode_user_agent)
            .context("Failed to create geocoding client")?;
        let limiter = FixedWindowLimiter::new(
            config.geocode_limit,
            Duration::from_secs(config.geocode_window_secs),
        );

        Ok(Self {
            backend,
            csrf: CsrfTokens::new(secret.as_bytes()),
            geocoder,
            geocode_limiter: Arc::new(limiter),
            secure_cookies: config.secure_cookies,
            trust_proxy: config.trust_proxy,
        })
    }
}
