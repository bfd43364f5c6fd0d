//! Which release of each app is currently installed, as recorded after a successful install.

use std::sync::Arc;

use crate::apps::App;
use crate::kv::{KeyValueStore, KvError};
use crate::release::{Metadata, ReleaseId};

fn installed_key(app: App) -> String {
    format!("installed_release_{}", app.key())
}

pub struct InstalledReleases<S: ?Sized> {
    store: Arc<S>,
}

impl<S: ?Sized> Clone for InstalledReleases<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: KeyValueStore + ?Sized> InstalledReleases<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Recorded release for `app`. A value that no longer parses counts as unknown.
    pub async fn get(&self, app: App) -> Result<Option<ReleaseId>, KvError> {
        let Some(raw) = self.store.get_string(&installed_key(app)).await? else {
            return Ok(None);
        };
        match ReleaseId::parse(app.release_id_kind(), &raw) {
            Ok(id) => Ok(Some(id)),
            Err(e) => {
                tracing::warn!(%app, value = %raw, "ignoring unparsable installed release: {}", e);
                Ok(None)
            }
        }
    }

    pub async fn record(&self, app: App, release: &ReleaseId) -> Result<(), KvError> {
        self.store
            .put_string(&installed_key(app), &release.as_stored())
            .await?;
        tracing::info!(%app, release = %release, "recorded installed release");
        Ok(())
    }

    /// Whether `latest` differs from (or, for timestamps, is newer than) what is installed.
    pub async fn is_update_available(&self, app: App, latest: &Metadata) -> Result<bool, KvError> {
        let installed = self.get(app).await?;
        Ok(match (installed, latest.release_id()) {
            (None, _) => true,
            (Some(ReleaseId::Timestamp(have)), ReleaseId::Timestamp(new)) => new > &have,
            (Some(have), new) => &have != new,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;
    use crate::release::ReleaseIdKind;
    use url::Url;

    fn meta(id: ReleaseId) -> Metadata {
        Metadata::new(Url::parse("https://example/app.apk").unwrap(), id)
    }

    #[tokio::test]
    async fn nothing_recorded_means_update_available() {
        let installed = InstalledReleases::new(Arc::new(MemoryStore::new()));
        assert_eq!(installed.get(App::Brave).await.unwrap(), None);
        assert!(installed
            .is_update_available(App::Brave, &meta(ReleaseId::Version("1".into())))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn version_compare_is_equality() {
        let installed = InstalledReleases::new(Arc::new(MemoryStore::new()));
        installed
            .record(App::Brave, &ReleaseId::Version("1.60.1".into()))
            .await
            .unwrap();
        assert!(!installed
            .is_update_available(App::Brave, &meta(ReleaseId::Version("1.60.1".into())))
            .await
            .unwrap());
        // Versions are opaque: any difference counts, including "older" strings.
        assert!(installed
            .is_update_available(App::Brave, &meta(ReleaseId::Version("1.59.0".into())))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn timestamps_compare_by_instant() {
        let installed = InstalledReleases::new(Arc::new(MemoryStore::new()));
        let ts = |s: &str| ReleaseId::parse(ReleaseIdKind::Timestamp, s).unwrap();
        installed
            .record(App::Bromite, &ts("2022-01-01T12:00:00+01:00"))
            .await
            .unwrap();
        assert!(!installed
            .is_update_available(App::Bromite, &meta(ts("2022-01-01T11:00:00Z")))
            .await
            .unwrap());
        assert!(installed
            .is_update_available(App::Bromite, &meta(ts("2022-01-02T00:00:00Z")))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn unparsable_record_is_unknown() {
        let store = Arc::new(MemoryStore::new());
        store
            .put_string("installed_release_bromite", "garbage")
            .await
            .unwrap();
        let installed = InstalledReleases::new(store);
        assert_eq!(installed.get(App::Bromite).await.unwrap(), None);
    }
}
