//! TTL-gated cache of the last resolved release metadata per app.
//!
//! Each app has three fields in the key-value store: download URL, release id
//! and the creation time in epoch milliseconds. An entry older than the TTL is
//! not returned but stays in the store until the next `store` overwrites it.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use url::Url;

use crate::apps::App;
use crate::kv::{KeyValueStore, KvError, KvValue};
use crate::release::{Metadata, ReleaseId};

pub const DEFAULT_TTL: Duration = Duration::from_secs(10 * 60);

/// Source of "now" in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock(Arc<AtomicI64>);

impl ManualClock {
    pub fn new(start_millis: i64) -> Self {
        Self(Arc::new(AtomicI64::new(start_millis)))
    }

    pub fn set(&self, millis: i64) {
        self.0.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.0.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheField {
    DownloadUrl,
    ReleaseId,
    CreatedEpochMs,
}

impl CacheField {
    fn suffix(self) -> &'static str {
        match self {
            CacheField::DownloadUrl => "download_url",
            CacheField::ReleaseId => "release_id",
            CacheField::CreatedEpochMs => "created_epoch_ms",
        }
    }

    pub fn key(self, app: App) -> String {
        format!("download_metadata_{}_{}", app.key(), self.suffix())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// A cached value exists but cannot be decoded. Refetch and `store` over it.
    #[error("cached {field:?} for {app} is corrupted ('{value}'): {reason}")]
    Corrupted {
        app: App,
        field: CacheField,
        value: String,
        reason: String,
    },
    #[error(transparent)]
    Store(#[from] KvError),
}

pub struct MetadataCache<S: ?Sized> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl<S: ?Sized> Clone for MetadataCache<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            ttl: self.ttl,
        }
    }
}

impl<S: KeyValueStore + ?Sized> MetadataCache<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock), DEFAULT_TTL)
    }

    pub fn with_clock(store: Arc<S>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { store, clock, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached metadata if present and within TTL. Missing and expired both give `None`.
    ///
    /// All three fields are read in one batch, so a concurrent `store` is seen
    /// whole or not at all.
    pub async fn lookup(&self, app: App) -> Result<Option<Metadata>, CacheError> {
        let keys = [
            CacheField::CreatedEpochMs.key(app),
            CacheField::DownloadUrl.key(app),
            CacheField::ReleaseId.key(app),
        ];
        let [created, raw_url, raw_id]: [Option<KvValue>; 3] = self
            .store
            .get_many(&keys)
            .await?
            .try_into()
            .map_err(|got: Vec<_>| {
                KvError::Malformed(format!("asked for 3 keys, got {} values", got.len()))
            })?;

        let Some(created) = created.map(|v| v.into_long(&keys[0])).transpose()? else {
            return Ok(None);
        };
        if !self.within_ttl(created) {
            return Ok(None);
        }
        let Some(raw_url) = raw_url.map(|v| v.into_text(&keys[1])).transpose()? else {
            return Ok(None);
        };
        let Some(raw_id) = raw_id.map(|v| v.into_text(&keys[2])).transpose()? else {
            return Ok(None);
        };

        let url = Url::parse(&raw_url).map_err(|e| CacheError::Corrupted {
            app,
            field: CacheField::DownloadUrl,
            value: raw_url.clone(),
            reason: e.to_string(),
        })?;
        let release_id =
            ReleaseId::parse(app.release_id_kind(), &raw_id).map_err(|e| CacheError::Corrupted {
                app,
                field: CacheField::ReleaseId,
                value: raw_id.clone(),
                reason: e.to_string(),
            })?;
        Ok(Some(Metadata::new(url, release_id)))
    }

    fn within_ttl(&self, created_millis: i64) -> bool {
        self.clock.now_millis() - created_millis <= self.ttl.as_millis() as i64
    }

    /// True if the entry was written no longer than TTL ago. Does not decode the entry.
    pub async fn is_fresh(&self, app: App) -> Result<bool, CacheError> {
        let Some(created) = self.created_at_millis(app).await? else {
            return Ok(false);
        };
        Ok(self.within_ttl(created))
    }

    /// When the entry for `app` was last stored, fresh or not.
    pub async fn created_at_millis(&self, app: App) -> Result<Option<i64>, CacheError> {
        Ok(self
            .store
            .get_long(&CacheField::CreatedEpochMs.key(app))
            .await?)
    }

    /// Overwrite the entry for `app` and reset its age to zero.
    pub async fn store(&self, app: App, metadata: &Metadata) -> Result<(), CacheError> {
        let now = self.clock.now_millis();
        self.store
            .put_many(vec![
                (CacheField::CreatedEpochMs.key(app), KvValue::Long(now)),
                (
                    CacheField::DownloadUrl.key(app),
                    KvValue::Text(metadata.download_url().to_string()),
                ),
                (
                    CacheField::ReleaseId.key(app),
                    KvValue::Text(metadata.release_id().as_stored()),
                ),
            ])
            .await?;
        tracing::debug!(%app, release = %metadata.release_id(), "cached release metadata");
        Ok(())
    }
}
