//! Thread-safe in-memory [`CredentialStore`] implementation.

// self
use crate::{
	_prelude::*,
	cache::{CacheKey, CredentialStore, StoreError, StoreFuture},
	creds::ResolvedCredentials,
};

type StoreMap = Arc<RwLock<HashMap<CacheKey, ResolvedCredentials>>>;

/// Process-scoped storage backend keeping resolved credentials in memory.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(StoreMap);
impl MemoryStore {
	fn save_now(
		map: StoreMap,
		key: CacheKey,
		credentials: ResolvedCredentials,
	) -> Result<(), StoreError> {
		map.write().insert(key, credentials);

		Ok(())
	}

	fn fetch_now(map: StoreMap, key: CacheKey) -> Option<ResolvedCredentials> {
		map.read().get(&key).cloned()
	}

	fn invalidate_now(map: StoreMap, key: CacheKey) -> Option<ResolvedCredentials> {
		map.write().remove(&key)
	}
}
impl CredentialStore for MemoryStore {
	fn save<'a>(
		&'a self,
		key: &'a CacheKey,
		credentials: ResolvedCredentials,
	) -> StoreFuture<'a, ()> {
		let map = self.0.clone();
		let key = key.clone();

		Box::pin(async move { Self::save_now(map, key, credentials) })
	}

	fn fetch<'a>(&'a self, key: &'a CacheKey) -> StoreFuture<'a, Option<ResolvedCredentials>> {
		let map = self.0.clone();
		let key = key.clone();

		Box::pin(async move { Ok(Self::fetch_now(map, key)) })
	}

	fn invalidate<'a>(
		&'a self,
		key: &'a CacheKey,
	) -> StoreFuture<'a, Option<ResolvedCredentials>> {
		let map = self.0.clone();
		let key = key.clone();

		Box::pin(async move { Ok(Self::invalidate_now(map, key)) })
	}
}
