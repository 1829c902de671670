//! Infrastructure wiring: store, cache and event bus behind one catalog service.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use prodreview_catalog::{NewProduct, NewReview, Product, ProductPatch, Review, ReviewPatch};
use prodreview_events::{EventBus, InMemoryEventBus};
use prodreview_infra::{
    CatalogResult, CatalogService, CatalogStore, Deadline, InMemoryCatalogStore, PostgresCatalogStore,
    ReadThroughCache, ServiceConfig,
};

#[cfg(feature = "redis")]
use prodreview_infra::event_bus::RedisPubSubEventBus;

/// The catalog service, monomorphized per event bus.
pub enum CatalogBackend {
    InMemory(CatalogService<InMemoryEventBus<String>>),
    #[cfg(feature = "redis")]
    Redis(CatalogService<RedisPubSubEventBus>),
}

macro_rules! with_catalog {
    ($services:expr, $svc:ident => $body:expr) => {
        match &$services.catalog {
            CatalogBackend::InMemory($svc) => $body,
            #[cfg(feature = "redis")]
            CatalogBackend::Redis($svc) => $body,
        }
    };
}

pub struct AppServices {
    catalog: CatalogBackend,
    request_timeout: Duration,
}

impl AppServices {
    pub fn new(catalog: CatalogBackend, request_timeout: Duration) -> Self {
        Self {
            catalog,
            request_timeout,
        }
    }

    /// Deadline for a request that starts now.
    pub fn deadline(&self) -> Deadline {
        Deadline::after(self.request_timeout)
    }

    pub fn cache(&self) -> &Arc<ReadThroughCache> {
        with_catalog!(self, svc => svc.cache())
    }

    pub async fn create_product(&self, input: NewProduct) -> CatalogResult<Product> {
        let deadline = self.deadline();
        with_catalog!(self, svc => svc.create_product(input, deadline).await)
    }

    pub async fn get_product(&self, id: &str) -> CatalogResult<Arc<Product>> {
        let deadline = self.deadline();
        with_catalog!(self, svc => svc.get_product(id, deadline).await)
    }

    pub async fn list_products(&self) -> CatalogResult<Vec<Product>> {
        let deadline = self.deadline();
        with_catalog!(self, svc => svc.list_products(deadline).await)
    }

    pub async fn edit_product(&self, id: &str, patch: ProductPatch) -> CatalogResult<Product> {
        let deadline = self.deadline();
        with_catalog!(self, svc => svc.edit_product(id, patch, deadline).await)
    }

    pub async fn delete_product(&self, id: &str) -> CatalogResult<()> {
        let deadline = self.deadline();
        with_catalog!(self, svc => svc.delete_product(id, deadline).await)
    }

    pub async fn create_review(&self, input: NewReview) -> CatalogResult<Review> {
        let deadline = self.deadline();
        with_catalog!(self, svc => svc.create_review(input, deadline).await)
    }

    pub async fn get_review(&self, id: &str) -> CatalogResult<Arc<Review>> {
        let deadline = self.deadline();
        with_catalog!(self, svc => svc.get_review(id, deadline).await)
    }

    pub async fn get_reviews_by_product(&self, product_id: &str) -> CatalogResult<Arc<Vec<Review>>> {
        let deadline = self.deadline();
        with_catalog!(self, svc => svc.get_reviews_by_product(product_id, deadline).await)
    }

    pub async fn edit_review(&self, id: &str, patch: ReviewPatch) -> CatalogResult<Review> {
        let deadline = self.deadline();
        with_catalog!(self, svc => svc.edit_review(id, patch, deadline).await)
    }

    pub async fn delete_review(&self, id: &str) -> CatalogResult<Review> {
        let deadline = self.deadline();
        with_catalog!(self, svc => svc.delete_review(id, deadline).await)
    }
}

pub async fn build_services(config: &ServiceConfig) -> anyhow::Result<AppServices> {
    let store: Arc<dyn CatalogStore> = match &config.database_url {
        Some(url) => {
            let store = PostgresCatalogStore::connect(url, config.db_max_connections)
                .await
                .context("failed to connect to Postgres")?;
            store.migrate().await.context("failed to apply catalog schema")?;
            tracing::info!(max_connections = config.db_max_connections, "using Postgres catalog store");
            Arc::new(store)
        }
        None => Arc::new(InMemoryCatalogStore::new()),
    };

    let cache = Arc::new(ReadThroughCache::new(config.cache));
    tracing::info!(
        ttl_secs = config.cache.ttl.as_secs(),
        max_entries = config.cache.max_entries,
        "read-through cache ready"
    );

    let catalog = match &config.redis_url {
        #[cfg(feature = "redis")]
        Some(url) => {
            let bus = RedisPubSubEventBus::new(url, config.event_channel.clone())
                .context("failed to create Redis event bus")?;
            tracing::info!(channel = %config.event_channel, "publishing review events to Redis");
            CatalogBackend::Redis(CatalogService::new(store, cache, Arc::new(bus)))
        }
        #[cfg(not(feature = "redis"))]
        Some(_) => {
            tracing::warn!("REDIS_URL is set but the redis feature is disabled; using the in-memory event bus");
            in_memory_backend(store, cache)
        }
        None => in_memory_backend(store, cache),
    };

    Ok(AppServices::new(catalog, config.request_timeout))
}

/// In-process bus; a background subscriber logs every notification.
fn in_memory_backend(store: Arc<dyn CatalogStore>, cache: Arc<ReadThroughCache>) -> CatalogBackend {
    let bus: Arc<InMemoryEventBus<String>> = Arc::new(InMemoryEventBus::new());
    let subscription = bus.subscribe();

    // Ends when the bus (and with it the sender) is dropped.
    std::thread::spawn(move || {
        while let Ok(message) = subscription.recv() {
            tracing::info!(%message, "review event");
        }
    });

    CatalogBackend::InMemory(CatalogService::new(store, cache, bus))
}
