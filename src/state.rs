use std::sync::Arc;

use crate::auth::SessionManager;
use crate::cache::Caches;
use crate::clock::{Clock, SystemClock};
use crate::config::AppConfig;
use crate::error::Result;
use crate::gateway::{ExpiryNotifier, HttpTransport, RestClient, Transport};
use crate::kv::{FileStore, KeyValueStore};
use crate::storage::{BlobStore, RestBlobStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub rest: RestClient,
    pub storage: Arc<dyn BlobStore>,
    pub caches: Arc<Caches>,
    pub session: SessionManager,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn init(config: AppConfig) -> Result<Self> {
        let cache_store = Arc::new(FileStore::new(config.data_dir.join("cache"))?) as Arc<dyn KeyValueStore>;
        let durable = Arc::new(FileStore::new(config.data_dir.join("session"))?) as Arc<dyn KeyValueStore>;
        let transport = Arc::new(HttpTransport::new()) as Arc<dyn Transport>;

        Ok(Self::from_parts(
            Arc::new(config),
            transport,
            cache_store,
            durable,
            Arc::new(SystemClock),
        ))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        transport: Arc<dyn Transport>,
        cache_store: Arc<dyn KeyValueStore>,
        durable: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let rest = RestClient::new(config.api.clone(), transport, ExpiryNotifier::new(clock.clone()));
        let storage = Arc::new(RestBlobStore::new(rest.clone())) as Arc<dyn BlobStore>;
        let caches = Arc::new(Caches::new(cache_store, clock.clone()));
        let session = SessionManager::new(rest.clone(), durable, clock.clone());
        Self {
            config,
            rest,
            storage,
            caches,
            session,
            clock,
        }
    }
}

#[cfg(test)]
pub const TEST_NOW_MS: i64 = 1_700_000_000_000;

#[cfg(test)]
impl AppState {
    fn fake_from(
        config: AppConfig,
        backend: Arc<crate::gateway::fake::FakeBackend>,
        store: Arc<dyn KeyValueStore>,
    ) -> (Self, Arc<crate::clock::ManualClock>) {
        let clock = Arc::new(crate::clock::ManualClock::new(TEST_NOW_MS));
        let st = Self::from_parts(Arc::new(config), backend, store.clone(), store, clock.clone());
        (st, clock)
    }

    pub fn fake(backend: Arc<crate::gateway::fake::FakeBackend>) -> (Self, Arc<crate::clock::ManualClock>) {
        Self::fake_with_store(backend, Arc::new(crate::kv::MemoryStore::new()))
    }

    /// Shares `store` between the persisted cache tier and the session, like a reload would.
    pub fn fake_with_store(
        backend: Arc<crate::gateway::fake::FakeBackend>,
        store: Arc<dyn KeyValueStore>,
    ) -> (Self, Arc<crate::clock::ManualClock>) {
        Self::fake_from(AppConfig::with_api("https://db.test", "anon"), backend, store)
    }

    pub fn fake_admin(backend: Arc<crate::gateway::fake::FakeBackend>) -> (Self, Arc<crate::clock::ManualClock>) {
        let (st, clock) = Self::fake(backend);
        st.session.sign_in_for_test(true);
        (st, clock)
    }

    pub fn fake_unconfigured() -> (Self, Arc<crate::clock::ManualClock>) {
        let config = AppConfig {
            api: None,
            data_dir: ".sleepdex".into(),
        };
        Self::fake_from(
            config,
            Arc::new(crate::gateway::fake::FakeBackend::new()),
            Arc::new(crate::kv::MemoryStore::new()),
        )
    }
}
