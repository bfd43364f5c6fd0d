//! `droidup status` – installed releases and cache state.

use anyhow::Result;
use droidup_core::apps::App;
use droidup_core::cache::{Clock, MetadataCache, SystemClock};
use droidup_core::config::DroidupConfig;
use droidup_core::installed::InstalledReleases;
use std::sync::Arc;

use super::open_store;

pub async fn run_status(cfg: &DroidupConfig) -> Result<()> {
    let store = open_store().await?;
    let cache = MetadataCache::with_clock(Arc::clone(&store), Arc::new(SystemClock), cfg.cache_ttl());
    let installed = InstalledReleases::new(store);
    let now = SystemClock.now_millis();

    println!("{:<8} {:<28} {:<28} {}", "APP", "INSTALLED", "CACHED", "CACHE AGE");
    for app in App::ALL {
        let have = installed
            .get(app)
            .await?
            .map(|r| r.to_string())
            .unwrap_or_else(|| "-".to_string());
        let cached = match cache.lookup(app).await {
            Ok(Some(meta)) => meta.release_id().to_string(),
            Ok(None) => "-".to_string(),
            Err(e) => {
                tracing::warn!(%app, "cached metadata unreadable: {}", e);
                "corrupted".to_string()
            }
        };
        let age = match cache.created_at_millis(app).await? {
            Some(created) => {
                let mins = (now - created).max(0) / 60_000;
                let stale = if cache.is_fresh(app).await? { "" } else { " (expired)" };
                format!("{}m{}", mins, stale)
            }
            None => "-".to_string(),
        };
        println!("{:<8} {:<28} {:<28} {}", app.key(), have, cached, age);
    }
    Ok(())
}
