//! Offline cache commands: download, remove and list crags.

use std::sync::Arc;

use anyhow::{Context, Result};
use cragcache_core::api::BackendClient;
use cragcache_core::cache::{AssetCache, LocalStore};
use cragcache_core::download::{remove_offline_crag, DownloadPhase, DownloadProgress, Downloader};
use cragcache_core::utils::{format_coordinates, truncate_string};
use cragcache_core::Config;
use tokio::sync::mpsc;

/// Width of the name column in `list` output.
const NAME_WIDTH: usize = 32;

const PROGRESS_CHANNEL_SIZE: usize = 32;

async fn open_store(config: &Config) -> Result<LocalStore> {
    let store = match config.db_path() {
        Some(path) => LocalStore::open(path).await,
        None => LocalStore::shared().await,
    };
    store.context("Failed to open offline store")
}

async fn build_downloader(config: &Config) -> Result<Downloader> {
    let (url, anon_key) = config.backend()?;
    let backend = BackendClient::new(url, anon_key)?;
    let store = open_store(config).await?;
    let assets = Arc::new(AssetCache::new(config.cache_dir()?)?);
    Ok(Downloader::new(backend, store, assets)
        .with_screenshot_template(config.screenshot_url_template.clone()))
}

fn phase_label(phase: DownloadPhase) -> &'static str {
    match phase {
        DownloadPhase::Crag => "Fetching crag",
        DownloadPhase::Images => "Fetching images",
        DownloadPhase::Meta => "Saving",
        DownloadPhase::Assets => "Caching photos",
        DownloadPhase::Done => "Done",
    }
}

pub async fn download(config: &Config, crag_id: &str) -> Result<()> {
    let downloader = build_downloader(config).await?;

    let (tx, mut rx) = mpsc::channel::<DownloadProgress>(PROGRESS_CHANNEL_SIZE);
    let printer = tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            eprintln!(
                "{} ({}/{})",
                phase_label(update.phase),
                update.completed,
                update.total
            );
        }
    });

    let result = downloader.download_crag(crag_id, Some(&tx)).await;
    drop(tx);
    let _ = printer.await;

    let summary = result?;
    println!(
        "Downloaded {}: {} images, {} photos cached, {} failed",
        summary.name, summary.images, summary.assets_cached, summary.assets_failed
    );
    Ok(())
}

/// Remove the offline copy of a crag. Needs no backend access.
pub async fn remove(config: &Config, crag_id: &str) -> Result<()> {
    let store = open_store(config).await?;
    let assets = AssetCache::new(config.cache_dir()?)?;
    if store.get_meta(crag_id).await.is_none() {
        anyhow::bail!("{} is not downloaded", crag_id);
    }
    if !remove_offline_crag(&store, &assets, crag_id).await {
        anyhow::bail!("Failed to fully remove offline copy of {}", crag_id);
    }
    println!("Removed {}", crag_id);
    Ok(())
}

/// List offline crags, newest first. Needs no backend access.
pub async fn list(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let metas = store.all_meta().await;
    if metas.is_empty() {
        println!("No crags downloaded");
        return Ok(());
    }

    for meta in metas {
        let location = match store.get_crag(&meta.id).await {
            Some(crag) => match (crag.latitude, crag.longitude) {
                (Some(lat), Some(lng)) => format_coordinates(lat, lng),
                _ => String::new(),
            },
            None => String::new(),
        };
        println!(
            "{:<38} {:<width$} {:>10}  {}",
            meta.id,
            truncate_string(&meta.name, NAME_WIDTH),
            meta.age_display(),
            location,
            width = NAME_WIDTH
        );
    }
    Ok(())
}
