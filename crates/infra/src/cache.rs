//! Read-through cache for products, single reviews and per-product review lists.
//!
//! Entries are disposable snapshots of committed state. Writers invalidate (never
//! update) them after commit, and the next read repopulates from the store.
//!
//! Backed by `moka::sync::Cache`: internally synchronized, TTL from insertion, bounded
//! entry count with TinyLFU admission/eviction. Every entry weighs 1.
//!
//! A read that misses takes a [`CacheGeneration`] before going to the store and
//! populates with [`ReadThroughCache::set_if_generation`]. A `delete` that lands in
//! between bumps the generation, so the snapshot loaded before it is dropped instead
//! of outliving the write.

use std::hash::{BuildHasher, RandomState};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use moka::sync::Cache;

use prodreview_catalog::{Product, Review};
use prodreview_core::{ProductId, ReviewId};

/// Default entry time-to-live.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// Default maximum number of entries.
pub const DEFAULT_MAX_ENTRIES: u64 = 1_000;

/// Invalidation counters are striped over this many slots by key hash.
const GENERATION_SLOTS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

/// Cache key: entity kind plus identity, or the reviews-of-a-product collection.
///
/// `Product(id)` and `ReviewsForProduct(id)` are independent entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Product(ProductId),
    Review(ReviewId),
    ReviewsForProduct(ProductId),
}

#[derive(Debug, Clone)]
pub enum CacheValue {
    Product(Arc<Product>),
    Review(Arc<Review>),
    Reviews(Arc<Vec<Review>>),
}

/// Invalidation stamp of a key, taken before a store load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheGeneration(u64);

/// Per-slot invalidation counters. A slot's mutex is held across "compare and insert"
/// and across "bump and invalidate", which orders a populate against a delete.
struct Generations {
    slots: Box<[Mutex<u64>]>,
    hasher: RandomState,
}

impl Generations {
    fn new() -> Self {
        Self {
            slots: (0..GENERATION_SLOTS).map(|_| Mutex::new(0)).collect(),
            hasher: RandomState::new(),
        }
    }

    fn slot(&self, key: &CacheKey) -> MutexGuard<'_, u64> {
        let index = (self.hasher.hash_one(key) % self.slots.len() as u64) as usize;
        self.slots[index].lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Injected, explicitly constructed read-through cache.
#[derive(Clone)]
pub struct ReadThroughCache {
    entries: Cache<CacheKey, CacheValue>,
    generations: Arc<Generations>,
    config: CacheConfig,
}

impl core::fmt::Debug for ReadThroughCache {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ReadThroughCache")
            .field("config", &self.config)
            .field("entry_count", &self.entries.entry_count())
            .finish()
    }
}

impl ReadThroughCache {
    pub fn new(config: CacheConfig) -> Self {
        let entries = Cache::builder()
            .max_capacity(config.max_entries)
            .time_to_live(config.ttl)
            .weigher(|_key: &CacheKey, _value: &CacheValue| 1)
            .build();
        Self {
            entries,
            generations: Arc::new(Generations::new()),
            config,
        }
    }

    pub fn config(&self) -> CacheConfig {
        self.config
    }

    /// Look up a key. `None` covers never-populated, expired and evicted entries alike.
    pub fn get(&self, key: &CacheKey) -> Option<CacheValue> {
        self.entries.get(key)
    }

    /// Insert or overwrite; restarts the entry's TTL.
    pub fn set(&self, key: CacheKey, value: CacheValue) {
        self.entries.insert(key, value);
    }

    /// Remove a key. Absent keys are a no-op.
    ///
    /// Also advances the key's generation, so loads that started earlier cannot
    /// repopulate it.
    pub fn delete(&self, key: &CacheKey) {
        let mut generation = self.generations.slot(key);
        *generation = generation.wrapping_add(1);
        self.entries.invalidate(key);
    }

    /// Current generation of `key`. Take it before loading the value from the store.
    pub fn generation(&self, key: &CacheKey) -> CacheGeneration {
        CacheGeneration(*self.generations.slot(key))
    }

    /// Insert only if `key` has not been deleted since `generation` was taken.
    ///
    /// Returns whether the value was stored. Keys sharing a slot can cause a spurious
    /// skip, which only costs a later miss.
    pub fn set_if_generation(&self, key: CacheKey, generation: CacheGeneration, value: CacheValue) -> bool {
        let current = self.generations.slot(&key);
        if *current != generation.0 {
            return false;
        }
        self.entries.insert(key, value);
        true
    }

    pub fn get_product(&self, id: &ProductId) -> Option<Arc<Product>> {
        match self.get(&CacheKey::Product(id.clone()))? {
            CacheValue::Product(product) => Some(product),
            _ => None,
        }
    }

    pub fn set_product(&self, product: Arc<Product>) {
        self.set(CacheKey::Product(product.id.clone()), CacheValue::Product(product));
    }

    pub fn delete_product(&self, id: &ProductId) {
        self.delete(&CacheKey::Product(id.clone()));
    }

    pub fn get_review(&self, id: &ReviewId) -> Option<Arc<Review>> {
        match self.get(&CacheKey::Review(id.clone()))? {
            CacheValue::Review(review) => Some(review),
            _ => None,
        }
    }

    pub fn set_review(&self, review: Arc<Review>) {
        self.set(CacheKey::Review(review.id.clone()), CacheValue::Review(review));
    }

    pub fn delete_review(&self, id: &ReviewId) {
        self.delete(&CacheKey::Review(id.clone()));
    }

    pub fn get_reviews(&self, product_id: &ProductId) -> Option<Arc<Vec<Review>>> {
        match self.get(&CacheKey::ReviewsForProduct(product_id.clone()))? {
            CacheValue::Reviews(reviews) => Some(reviews),
            _ => None,
        }
    }

    pub fn set_reviews(&self, product_id: ProductId, reviews: Arc<Vec<Review>>) {
        self.set(CacheKey::ReviewsForProduct(product_id), CacheValue::Reviews(reviews));
    }

    pub fn delete_reviews(&self, product_id: &ProductId) {
        self.delete(&CacheKey::ReviewsForProduct(product_id.clone()));
    }

    /// Approximate number of live entries (exact after [`Self::run_pending_tasks`]).
    pub fn entry_count(&self) -> u64 {
        self.entries.entry_count()
    }

    /// Flush moka's pending maintenance (evictions, expirations, counters).
    pub fn run_pending_tasks(&self) {
        self.entries.run_pending_tasks();
    }

    pub fn clear(&self) {
        let mut slots: Vec<MutexGuard<'_, u64>> = self
            .generations
            .slots
            .iter()
            .map(|slot| slot.lock().unwrap_or_else(PoisonError::into_inner))
            .collect();
        for generation in &mut slots {
            **generation = generation.wrapping_add(1);
        }
        self.entries.invalidate_all();
    }
}

impl Default for ReadThroughCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}
