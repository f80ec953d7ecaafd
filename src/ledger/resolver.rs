use super::{EngineFactory, LedgerEngine};
use crate::context::Context;
use crate::error::Result;
use crate::storage::Driver;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

/// Hands out one engine per ledger, creating the ledger on first use.
///
/// Building an engine and deleting a ledger serialize on a per-ledger lock,
/// so a delete never interleaves with a build of the same ledger.
pub struct Resolver {
    driver: Arc<Driver>,
    factory: Arc<dyn EngineFactory>,
    engines: DashMap<String, Arc<dyn LedgerEngine>>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Resolver {
    pub fn new(driver: Arc<Driver>, factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            driver,
            factory,
            engines: DashMap::new(),
            locks: DashMap::new(),
        }
    }

    pub fn driver(&self) -> &Arc<Driver> {
        &self.driver
    }

    pub async fn get(&self, ctx: &Context, ledger: &str) -> Result<Arc<dyn LedgerEngine>> {
        if let Some(engine) = self.cached(ledger) {
            return Ok(engine);
        }

        let _guard = self.lock(ctx, ledger).await?;

        // Another request may have built it while we waited.
        if let Some(engine) = self.cached(ledger) {
            return Ok(engine);
        }

        let (store, created) = self.driver.get_store(ctx, ledger, true).await?;
        if created {
            info!("Ledger {} initialized", ledger);
        }
        let engine = self.factory.build(store);
        self.engines.insert(ledger.to_string(), engine.clone());
        Ok(engine)
    }

    fn cached(&self, ledger: &str) -> Option<Arc<dyn LedgerEngine>> {
        self.engines.get(ledger).map(|entry| entry.value().clone())
    }

    async fn lock(&self, ctx: &Context, ledger: &str) -> Result<OwnedMutexGuard<()>> {
        let lock = self.locks.entry(ledger.to_string()).or_default().clone();
        ctx.run(async move { Ok(lock.lock_owned().await) }).await
    }

    pub fn is_cached(&self, ledger: &str) -> bool {
        self.engines.contains_key(ledger)
    }

    /// Drops the cached engine for `ledger`, if any.
    pub async fn evict(&self, ledger: &str) -> Result<()> {
        let removed = self.engines.remove(ledger);
        if let Some((_, engine)) = removed {
            engine.close().await?;
        }
        Ok(())
    }

    /// Evicts the ledger and deletes its storage. Engines still held by
    /// in-flight requests are closed by the eviction and fail from then on.
    pub async fn delete(&self, ctx: &Context, ledger: &str) -> Result<()> {
        let _guard = self.lock(ctx, ledger).await?;
        self.evict(ledger).await?;
        self.driver.delete_store(ctx, ledger).await
    }

    pub async fn close_all(&self) {
        let ledgers: Vec<String> = self.engines.iter().map(|e| e.key().clone()).collect();

        for ledger in ledgers {
            if let Err(e) = self.evict(&ledger).await {
                warn!("Failed to close ledger {}: {}", ledger, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SqliteBackend;
    use crate::error::StorageError;
    use crate::ledger::{ScriptData, UnconfiguredEngineFactory};
    use crate::storage::Store;
    use async_trait::async_trait;
    use tempfile::TempDir;

    async fn resolver(dir: &TempDir) -> Resolver {
        let driver = Driver::new("sqlite3", Arc::new(SqliteBackend::new(dir.path())));
        driver.initialize(&Context::background()).await.unwrap();
        Resolver::new(Arc::new(driver), Arc::new(UnconfiguredEngineFactory))
    }

    #[tokio::test]
    async fn test_engine_is_cached() {
        let temp_dir = TempDir::new().unwrap();
        let resolver = resolver(&temp_dir).await;
        let ctx = Context::background();

        let first = resolver.get(&ctx, "quickstart").await.unwrap();
        let second = resolver.get(&ctx, "quickstart").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(resolver.is_cached("quickstart"));
        assert!(resolver.driver().exists(&ctx, "quickstart").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_evicts_and_drops_storage() {
        let temp_dir = TempDir::new().unwrap();
        let resolver = resolver(&temp_dir).await;
        let ctx = Context::background();

        resolver.get(&ctx, "quickstart").await.unwrap();
        resolver.delete(&ctx, "quickstart").await.unwrap();

        assert!(!resolver.is_cached("quickstart"));
        assert!(!resolver.driver().exists(&ctx, "quickstart").await.unwrap());
    }

    #[tokio::test]
    async fn test_close_all_empties_cache() {
        let temp_dir = TempDir::new().unwrap();
        let resolver = resolver(&temp_dir).await;
        let ctx = Context::background();

        resolver.get(&ctx, "a").await.unwrap();
        resolver.get(&ctx, "b").await.unwrap();
        resolver.close_all().await;

        assert!(!resolver.is_cached("a"));
        assert!(!resolver.is_cached("b"));
    }

    /// Engine that writes one row per script into its store.
    struct WritingEngine {
        store: Store,
    }

    #[async_trait]
    impl LedgerEngine for WritingEngine {
        fn name(&self) -> &str {
            self.store.name()
        }

        async fn execute_script(
            &self,
            ctx: &Context,
            _preview: bool,
            _script: ScriptData,
        ) -> std::result::Result<crate::ledger::ExpandedTransaction, crate::ledger::ExecutionError> {
            self.store
                .schema()
                .execute(ctx, "CREATE TABLE IF NOT EXISTS writes (id integer)", &[])
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            Ok(Default::default())
        }

        async fn close(&self) -> Result<()> {
            self.store.close().await
        }
    }

    struct WritingEngineFactory;

    impl EngineFactory for WritingEngineFactory {
        fn build(&self, store: Store) -> Arc<dyn LedgerEngine> {
            Arc::new(WritingEngine { store })
        }
    }

    async fn writing_resolver(dir: &TempDir) -> Arc<Resolver> {
        let driver = Driver::new("sqlite3", Arc::new(SqliteBackend::new(dir.path())));
        driver.initialize(&Context::background()).await.unwrap();
        Arc::new(Resolver::new(Arc::new(driver), Arc::new(WritingEngineFactory)))
    }

    #[tokio::test]
    async fn test_engine_held_across_delete_cannot_write() {
        let temp_dir = TempDir::new().unwrap();
        let resolver = writing_resolver(&temp_dir).await;
        let ctx = Context::background();

        let engine = resolver.get(&ctx, "quickstart").await.unwrap();
        resolver.delete(&ctx, "quickstart").await.unwrap();

        let result = engine.execute_script(&ctx, false, ScriptData::default()).await;
        assert!(result.is_err());
        assert!(!temp_dir.path().join("quickstart.db").exists());
        assert!(!resolver.driver().exists(&ctx, "quickstart").await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_get_and_delete_stay_consistent() {
        let temp_dir = TempDir::new().unwrap();
        let resolver = writing_resolver(&temp_dir).await;
        let path = temp_dir.path().join("shared.db");

        for _ in 0..20 {
            let getter = {
                let resolver = resolver.clone();
                tokio::spawn(async move { resolver.get(&Context::background(), "shared").await.map(|_| ()) })
            };
            let deleter = {
                let resolver = resolver.clone();
                tokio::spawn(async move { resolver.delete(&Context::background(), "shared").await })
            };
            getter.await.unwrap().unwrap();
            deleter.await.unwrap().unwrap();

            let ctx = Context::background();
            let listed = resolver.driver().exists(&ctx, "shared").await.unwrap();
            if resolver.is_cached("shared") {
                // A cached engine always has its ledger listed and usable.
                assert!(listed);
                let engine = resolver.get(&ctx, "shared").await.unwrap();
                engine.execute_script(&ctx, false, ScriptData::default()).await.unwrap();
                assert!(path.exists());
            } else {
                assert!(!listed);
                assert!(!path.exists());
            }
        }
    }

    #[tokio::test]
    async fn test_cancelled_get_waits_for_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let resolver = resolver(&temp_dir).await;
        let (ctx, handle) = Context::background().with_cancel();
        handle.cancel();

        let result = resolver.get(&ctx, "quickstart").await;
        assert!(matches!(result, Err(StorageError::Cancelled)));
        assert!(!resolver.is_cached("quickstart"));
    }
}
