//! CLI command handlers, one file per command.

mod apps;
mod check;
mod fingerprint;
mod status;
mod update;

use anyhow::Result;
use droidup_core::kv::{KeyValueStore, SqliteStore};
use std::sync::Arc;

pub use apps::run_apps;
pub use check::run_check;
pub use fingerprint::run_fingerprint;
pub use status::run_status;
pub use update::{run_update, UpdateArgs};

/// The persistent state database shared by the cache and installed-release records.
async fn open_store() -> Result<Arc<dyn KeyValueStore>> {
    let store = SqliteStore::open_default().await?;
    Ok(Arc::new(store))
}
