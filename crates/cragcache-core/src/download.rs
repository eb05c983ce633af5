//! Offline download orchestration.
//!
//! `Downloader` copies a crag, its images and their route lines into the
//! local store, and the photos plus an optional map screenshot into the
//! asset cache. Progress is reported per phase through an MPSC channel.
//!
//! The store has no foreign keys, so ordering matters: crag metadata and
//! the crag record are written before any image, and removal cascades from
//! images up to the metadata entry.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::api::{ApiError, BackendClient};
use crate::cache::{AssetCache, LocalStore};
use crate::models::{BoundingBox, CragMeta, ImageRecord};

/// Concurrent photo fetches per download.
const MAX_CONCURRENT_ASSETS: usize = 4;

/// Padding added around a crag's extent, in degrees (~200 m).
const BOUNDS_PADDING_DEG: f64 = 0.002;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadPhase {
    Crag,
    Images,
    Meta,
    Assets,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DownloadProgress {
    pub phase: DownloadPhase,
    pub completed: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadSummary {
    pub crag_id: String,
    pub name: String,
    pub images: usize,
    pub assets_cached: usize,
    pub assets_failed: usize,
}

pub struct Downloader {
    backend: BackendClient,
    store: LocalStore,
    assets: Arc<AssetCache>,
    screenshot_template: Option<String>,
}

impl Downloader {
    pub fn new(backend: BackendClient, store: LocalStore, assets: Arc<AssetCache>) -> Self {
        Self {
            backend,
            store,
            assets,
            screenshot_template: None,
        }
    }

    /// Also cache a static map image for each crag, built from `template`.
    pub fn with_screenshot_template(mut self, template: Option<String>) -> Self {
        self.screenshot_template = template;
        self
    }

    /// Helper to send progress, logging any channel errors
    async fn report(
        progress: Option<&mpsc::Sender<DownloadProgress>>,
        phase: DownloadPhase,
        completed: usize,
        total: usize,
    ) {
        if let Some(tx) = progress {
            let update = DownloadProgress {
                phase,
                completed,
                total,
            };
            if let Err(e) = tx.send(update).await {
                error!(error = %e, "Failed to send download progress - channel closed");
            }
        }
    }

    /// Download a crag for offline use, replacing any previous copy.
    ///
    /// Photos and the screenshot of the previous copy that the new one no
    /// longer references are deleted from the asset cache. A screenshot that
    /// fails to refresh keeps the previous one.
    pub async fn download_crag(
        &self,
        crag_id: &str,
        progress: Option<&mpsc::Sender<DownloadProgress>>,
    ) -> Result<DownloadSummary> {
        info!(crag = crag_id, "Offline download started");

        Self::report(progress, DownloadPhase::Crag, 0, 1).await;
        let crag = self
            .backend
            .fetch_crag(crag_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("crag {}", crag_id)))?;
        Self::report(progress, DownloadPhase::Crag, 1, 1).await;

        Self::report(progress, DownloadPhase::Images, 0, 1).await;
        let images = self
            .backend
            .fetch_crag_images(crag_id)
            .await
            .context("Failed to fetch crag images")?;
        Self::report(progress, DownloadPhase::Images, 1, 1).await;
        debug!(crag = crag_id, count = images.len(), "Fetched image records");

        Self::report(progress, DownloadPhase::Meta, 0, 1).await;
        let bounds = crag
            .bounds()
            .or_else(|| BoundingBox::from_coords(images.iter().filter_map(ImageRecord::coordinates)))
            .ok_or_else(|| anyhow::anyhow!("Crag {} has no location to download around", crag_id))?
            .padded(BOUNDS_PADDING_DEG);

        let previous_meta = self.store.get_meta(crag_id).await;
        let previous_urls: Vec<String> = self
            .store
            .images_by_crag(crag_id)
            .await
            .into_iter()
            .map(|image| image.url)
            .collect();

        let mut meta = CragMeta {
            id: crag.id.clone(),
            name: crag.name.clone(),
            downloaded_at: Utc::now(),
            bounds,
            projected_bounds: bounds.to_web_mercator(),
            screenshot_url: previous_meta.as_ref().and_then(|m| m.screenshot_url.clone()),
            screenshot_updated_at: previous_meta.as_ref().and_then(|m| m.screenshot_updated_at),
        };

        // Drop images from an earlier download that may no longer exist
        if !self.store.delete_images_by_crag(crag_id).await {
            anyhow::bail!("Failed to clear previous images of crag {}", crag_id);
        }
        let current: HashSet<&str> = images.iter().map(|image| image.url.as_str()).collect();
        let mut stale = 0;
        for url in previous_urls.iter().filter(|url| !current.contains(url.as_str())) {
            if self.assets.delete(url).await {
                stale += 1;
            }
        }
        if stale > 0 {
            debug!(crag = crag_id, count = stale, "Deleted photos of removed images");
        }

        if !self.store.put_meta(&meta).await {
            anyhow::bail!("Failed to write crag {} to the local store", crag_id);
        }
        if !self.store.put_crag(&crag).await {
            // Metadata must never outlive its crag record
            remove_offline_crag(&self.store, &self.assets, crag_id).await;
            for url in &previous_urls {
                self.assets.delete(url).await;
            }
            anyhow::bail!("Failed to write crag {} to the local store", crag_id);
        }
        Self::report(progress, DownloadPhase::Meta, 1, 1).await;

        let total = images.len();
        Self::report(progress, DownloadPhase::Assets, 0, total).await;

        let mut stored_images = 0;
        for image in &images {
            if self.store.put_image(image).await {
                stored_images += 1;
            } else {
                warn!(image = %image.id, "Skipping image that could not be stored");
            }
        }

        let mut assets_cached = 0;
        let mut assets_failed = 0;
        let mut fetches = stream::iter(images.iter())
            .map(|image| async move { (image, self.cache_asset(&image.url).await) })
            .buffer_unordered(MAX_CONCURRENT_ASSETS);

        let mut completed = 0;
        while let Some((image, cached)) = fetches.next().await {
            completed += 1;
            if cached {
                assets_cached += 1;
            } else {
                assets_failed += 1;
                debug!(image = %image.id, "Photo not cached");
            }
            Self::report(progress, DownloadPhase::Assets, completed, total).await;
        }

        if let Some(url) = self.screenshot_url(&bounds) {
            if self.cache_asset(&url).await {
                assets_cached += 1;
                self.record_screenshot(&mut meta, url).await;
            } else {
                assets_failed += 1;
                if meta.screenshot_url.is_some() {
                    debug!(crag = crag_id, "Keeping previous screenshot");
                }
            }
        }

        Self::report(progress, DownloadPhase::Done, 1, 1).await;
        info!(
            crag = crag_id,
            images = stored_images,
            assets_cached = assets_cached,
            assets_failed = assets_failed,
            "Offline download complete"
        );

        Ok(DownloadSummary {
            crag_id: crag.id,
            name: crag.name,
            images: stored_images,
            assets_cached,
            assets_failed,
        })
    }

    /// Point `meta` at a freshly cached screenshot and drop the one it replaces.
    async fn record_screenshot(&self, meta: &mut CragMeta, url: String) {
        let previous = meta.screenshot_url.replace(url.clone());
        let previous_at = meta.screenshot_updated_at.replace(Utc::now());

        if self.store.put_meta(meta).await {
            if let Some(old) = previous.filter(|old| *old != url) {
                self.assets.delete(&old).await;
            }
        } else {
            warn!(crag = %meta.id, "Failed to record cached screenshot");
            if previous.as_deref() != Some(url.as_str()) {
                self.assets.delete(&url).await;
            }
            meta.screenshot_url = previous;
            meta.screenshot_updated_at = previous_at;
        }
    }

    /// Fetch `url` into the asset cache. Failures are logged and skipped.
    async fn cache_asset(&self, url: &str) -> bool {
        match self.backend.fetch_asset(url).await {
            Ok(response) => self.assets.put(url, &response).await,
            Err(e) => {
                warn!(url = url, error = %e, "Failed to fetch asset");
                false
            }
        }
    }

    fn screenshot_url(&self, bounds: &BoundingBox) -> Option<String> {
        let template = self.screenshot_template.as_ref()?;
        Some(
            template
                .replace("{west}", &bounds.west.to_string())
                .replace("{south}", &bounds.south.to_string())
                .replace("{east}", &bounds.east.to_string())
                .replace("{north}", &bounds.north.to_string()),
        )
    }

    pub async fn remove_crag(&self, crag_id: &str) -> bool {
        remove_offline_crag(&self.store, &self.assets, crag_id).await
    }

    pub async fn list_downloaded(&self) -> Vec<CragMeta> {
        self.store.all_meta().await
    }
}

/// Remove the offline copy of a crag: images and their photos, the crag
/// record, the cached screenshot and finally the metadata entry. Needs no
/// backend access. Returns false if any step failed.
pub async fn remove_offline_crag(store: &LocalStore, assets: &AssetCache, crag_id: &str) -> bool {
    let images = store.images_by_crag(crag_id).await;
    for image in &images {
        assets.delete(&image.url).await;
    }

    let mut ok = store.delete_images_by_crag(crag_id).await;
    ok &= store.delete_crag(crag_id).await;

    if let Some(meta) = store.get_meta(crag_id).await {
        if let Some(ref url) = meta.screenshot_url {
            assets.delete(url).await;
        }
    }
    ok &= store.delete_meta(crag_id).await;

    info!(crag = crag_id, images = images.len(), ok = ok, "Offline copy removed");
    ok
}
