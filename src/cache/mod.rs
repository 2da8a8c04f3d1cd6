pub mod enrichment;
pub mod store;

pub use enrichment::{EnrichmentCache, FetchError, Fetched};
pub use store::{CacheEntry, CacheStore, cache_key};
