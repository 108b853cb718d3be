//! Tenant app registry.
//!
//! Keeps an immutable dual-index snapshot (by id, by numeric key) of every
//! configured app. A background loop rebuilds the snapshot from the config
//! store every 45 s plus up to 30 s of jitter and swaps it in wholesale;
//! readers clone the current `Arc` and never observe a partial refresh. A
//! failed refresh keeps the previous snapshot.
use crate::model::{App, AppSpec, Permission};
use anyhow::Context;
use async_trait::async_trait;
use parking_lot::RwLock;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const REFRESH_INTERVAL: Duration = Duration::from_secs(45);
const REFRESH_JITTER_MS: u64 = 30_000;
const REFRESH_TIMEOUT: Duration = Duration::from_secs(10);

/// Interface to the config store's `apps` collection (unique on `key`).
#[async_trait]
pub trait AppConfigStore: Send + Sync {
    async fn fetch_apps(&self) -> anyhow::Result<Vec<AppSpec>>;
}

/// In-memory config store for tests, local development and seed files.
#[derive(Debug, Default)]
pub struct MemoryAppConfigStore {
    apps: RwLock<Vec<AppSpec>>,
}

impl MemoryAppConfigStore {
    pub fn new(apps: Vec<AppSpec>) -> Self {
        Self {
            apps: RwLock::new(apps),
        }
    }

    pub fn put(&self, spec: AppSpec) {
        let mut apps = self.apps.write();
        apps.retain(|existing| existing.id != spec.id);
        apps.push(spec);
    }
}

#[async_trait]
impl AppConfigStore for MemoryAppConfigStore {
    async fn fetch_apps(&self) -> anyhow::Result<Vec<AppSpec>> {
        Ok(self.apps.read().clone())
    }
}

#[derive(Debug, Default)]
struct AppIndex {
    by_id: HashMap<String, Arc<App>>,
    by_key: HashMap<u32, Arc<App>>,
}

impl AppIndex {
    fn build(apps: Vec<App>) -> anyhow::Result<Self> {
        let mut index = AppIndex::default();
        for app in apps {
            let app = Arc::new(app);
            anyhow::ensure!(
                index.by_id.insert(app.id.clone(), app.clone()).is_none(),
                "duplicate app id: {}",
                app.id
            );
            anyhow::ensure!(
                index.by_key.insert(app.key, app.clone()).is_none(),
                "duplicate app key: {}",
                app.key
            );
        }
        Ok(index)
    }
}

pub struct AppRegistry {
    store: Arc<dyn AppConfigStore>,
    common: Vec<Permission>,
    snapshot: RwLock<Arc<AppIndex>>,
}

impl AppRegistry {
    pub fn new(store: Arc<dyn AppConfigStore>, common_patterns: &[String]) -> anyhow::Result<Self> {
        let mut common = Vec::with_capacity(common_patterns.len());
        for pattern in common_patterns {
            common.push(Permission::compile(pattern)?);
        }
        Ok(Self {
            store,
            common,
            snapshot: RwLock::new(Arc::new(AppIndex::default())),
        })
    }

    pub fn find_by_id(&self, id: &str) -> Option<Arc<App>> {
        self.snapshot.read().by_id.get(id).cloned()
    }

    pub fn find_by_key(&self, key: u32) -> Option<Arc<App>> {
        self.snapshot.read().by_key.get(&key).cloned()
    }

    /// Fetch, parse and validate all apps, then atomically swap the snapshot.
    pub async fn refresh(&self) -> anyhow::Result<()> {
        let specs = tokio::time::timeout(REFRESH_TIMEOUT, self.store.fetch_apps())
            .await
            .context("app refresh timed out")??;
        let mut apps = Vec::with_capacity(specs.len());
        for spec in specs {
            apps.push(App::parse(spec, &self.common)?);
        }
        let index = AppIndex::build(apps)?;
        *self.snapshot.write() = Arc::new(index);
        Ok(())
    }

    /// Periodic refresh loop; the first refresh is expected to have been run
    /// by the caller. Returns when `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..REFRESH_JITTER_MS));
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(REFRESH_INTERVAL + jitter) => {}
            }
            if let Err(err) = self.refresh().await {
                tracing::warn!(error = %err, "failed to refresh apps");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: &str, key: u32) -> AppSpec {
        AppSpec {
            id: id.to_string(),
            key,
            secret: "s".to_string(),
            fingerprint: "fp".to_string(),
            permissions: Vec::new(),
        }
    }

    fn registry(specs: Vec<AppSpec>) -> AppRegistry {
        AppRegistry::new(Arc::new(MemoryAppConfigStore::new(specs)), &[]).expect("registry")
    }

    #[tokio::test]
    async fn refresh_indexes_by_id_and_key() {
        let registry = registry(vec![spec("alpha", 7), spec("beta", 9)]);
        registry.refresh().await.expect("refresh");
        assert_eq!(registry.find_by_id("alpha").expect("alpha").key, 7);
        assert_eq!(registry.find_by_key(9).expect("beta").id, "beta");
        assert!(registry.find_by_id("gamma").is_none());
        assert!(registry.find_by_key(1).is_none());
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_snapshot() {
        let store = Arc::new(MemoryAppConfigStore::new(vec![spec("alpha", 7)]));
        let registry = AppRegistry::new(store.clone(), &[]).expect("registry");
        registry.refresh().await.expect("refresh");

        // A zero key fails validation; the old snapshot must survive.
        store.put(spec("bad", 0));
        assert!(registry.refresh().await.is_err());
        assert!(registry.find_by_id("alpha").is_some());
    }

    #[tokio::test]
    async fn duplicate_keys_fail_validation() {
        let registry = registry(vec![spec("alpha", 7), spec("beta", 7)]);
        assert!(registry.refresh().await.is_err());
    }

    #[tokio::test]
    async fn snapshot_swap_replaces_removed_apps() {
        let store = Arc::new(MemoryAppConfigStore::new(vec![spec("alpha", 7)]));
        let registry = AppRegistry::new(store.clone(), &[]).expect("registry");
        registry.refresh().await.expect("refresh");

        *store.apps.write() = vec![spec("beta", 9)];
        registry.refresh().await.expect("refresh");
        assert!(registry.find_by_id("alpha").is_none());
        assert!(registry.find_by_id("beta").is_some());
    }
}
