//! `droidup check [app]` – latest release vs. installed release.

use anyhow::Result;
use droidup_core::apps::App;
use droidup_core::cache::{MetadataCache, SystemClock};
use droidup_core::config::DroidupConfig;
use droidup_core::fetch::{MetadataSource, RemoteMetadataSource};
use droidup_core::installed::InstalledReleases;
use droidup_core::kv::KeyValueStore;
use droidup_core::release::Metadata;
use std::sync::Arc;

use super::open_store;

pub async fn run_check(cfg: &DroidupConfig, app: Option<App>, refresh: bool) -> Result<()> {
    let store = open_store().await?;
    let cache = MetadataCache::with_clock(Arc::clone(&store), Arc::new(SystemClock), cfg.cache_ttl());
    let installed = InstalledReleases::new(store);
    let source = RemoteMetadataSource::new(cfg.fetch_timeout());

    let apps = match app {
        Some(app) => vec![app],
        None => App::ALL.to_vec(),
    };
    println!("{:<8} {:<28} {:<28} {}", "APP", "LATEST", "INSTALLED", "UPDATE");
    for app in apps {
        let have = installed
            .get(app)
            .await?
            .map(|r| r.to_string())
            .unwrap_or_else(|| "-".to_string());
        let (latest, update) = match latest_release(&cache, &source, app, refresh).await {
            Ok(Some(meta)) => {
                let update = installed.is_update_available(app, &meta).await?;
                (
                    meta.release_id().to_string(),
                    if update { "yes" } else { "no" }.to_string(),
                )
            }
            Ok(None) => ("-".to_string(), "no release found".to_string()),
            Err(e) => {
                tracing::warn!(%app, "release lookup failed: {:#}", e);
                ("-".to_string(), format!("error: {:#}", e))
            }
        };
        println!("{:<8} {:<28} {:<28} {}", app.key(), latest, have, update);
    }
    Ok(())
}

/// Fresh cached metadata, or a remote lookup whose result is cached.
async fn latest_release(
    cache: &MetadataCache<dyn KeyValueStore>,
    source: &RemoteMetadataSource,
    app: App,
    refresh: bool,
) -> Result<Option<Metadata>> {
    if !refresh {
        match cache.lookup(app).await {
            Ok(Some(meta)) => return Ok(Some(meta)),
            Ok(None) => {}
            Err(e) => tracing::warn!(%app, "ignoring cached metadata: {}", e),
        }
    }
    let found = source.fetch(app).await?;
    if let Some(meta) = &found {
        cache.store(app, meta).await?;
    }
    Ok(found)
}
