//! Cache-or-refresh coordination between the credential store and the plugins.
//!
//! [`CredentialManager::resolve`] serves the cached holder while it is fresh and
//! otherwise funnels same-key callers through a per-key flight gate, so each refresh
//! runs the plugin at most once. Callers that queued behind a flight receive that
//! flight's outcome verbatim, failures included; the error tree is `Clone` for exactly
//! this handoff. Keys refresh independently: the flight map itself is only locked long
//! enough to look up a gate, never across an await.

// std
use std::sync::atomic::{AtomicU64, Ordering};
// self
use crate::{
	_prelude::*,
	cache::{CacheKey, CredentialStore, MemoryStore},
	creds::ResolvedCredentials,
	obs::{self, FlowKind},
	plugin::IdpPlugin,
};

/// Per-key refresh state.
///
/// `generation` counts completed flights. A caller that observed an older value while
/// queueing knows the outcome behind the gate is from the flight it waited on and takes
/// it instead of invoking the plugin again.
#[derive(Default)]
struct Flight {
	generation: AtomicU64,
	gate: AsyncMutex<Option<Result<ResolvedCredentials>>>,
}

/// Cache owner and refresh coordinator.
///
/// Holds the store handle plus the per-key flight map; clones share both, so one
/// manager per process covers every connection drawing on the same identity sources.
#[derive(Clone)]
pub struct CredentialManager {
	store: Arc<dyn CredentialStore>,
	flights: Arc<Mutex<HashMap<CacheKey, Arc<Flight>>>>,
}
impl CredentialManager {
	/// Coordinator over the provided store.
	pub fn new(store: Arc<dyn CredentialStore>) -> Self {
		Self { store, flights: Arc::new(Mutex::new(HashMap::new())) }
	}

	/// Coordinator over a fresh process-local [`MemoryStore`].
	pub fn in_memory() -> Self {
		Self::new(Arc::new(MemoryStore::default()))
	}

	/// Serves credentials for the plugin's cache key.
	///
	/// A cached, unexpired holder is returned unchanged. A missing or expired entry
	/// triggers a refresh through the plugin; concurrent callers on the same key await
	/// the refresh already in flight and share its result. Expiry itself never surfaces
	/// to the caller, only as the refresh trigger.
	pub async fn resolve(&self, plugin: &dyn IdpPlugin) -> Result<ResolvedCredentials> {
		self.serve(plugin, false).await
	}

	/// Refreshes unconditionally, bypassing the freshness check but not the flight
	/// gate; concurrent callers on the same key still collapse onto one invocation.
	pub async fn force_refresh(&self, plugin: &dyn IdpPlugin) -> Result<ResolvedCredentials> {
		self.serve(plugin, true).await
	}

	/// Drops the store entry under `key`, returning whatever was cached.
	///
	/// A flight already in progress is unaffected and saves its fresh result as usual.
	pub async fn invalidate(&self, key: &CacheKey) -> Result<Option<ResolvedCredentials>> {
		Ok(self.store.invalidate(key).await?)
	}

	async fn serve(&self, plugin: &dyn IdpPlugin, force: bool) -> Result<ResolvedCredentials> {
		let key = plugin.cache_key();

		obs::observe_flow(
			FlowKind::Resolve,
			plugin.kind().as_str(),
			self.coordinate(plugin, &key, force),
		)
		.await
	}

	async fn coordinate(
		&self,
		plugin: &dyn IdpPlugin,
		key: &CacheKey,
		force: bool,
	) -> Result<ResolvedCredentials> {
		if !force {
			let now = OffsetDateTime::now_utc();

			if let Some(current) =
				self.store.fetch(key).await?.filter(|current| !current.is_expired_at(now))
			{
				return Ok(current);
			}
		}

		let flight = self.flight(key);
		let observed = flight.generation.load(Ordering::Relaxed);
		let mut outcome = flight.gate.lock().await;

		if flight.generation.load(Ordering::Relaxed) != observed {
			// A flight completed while this caller queued; its outcome, error
			// included, is what the caller came for.
			if let Some(shared) = outcome.clone() {
				return shared;
			}
		}

		if !force {
			// Second look under the gate: a leader may have saved between this
			// caller's miss and its generation snapshot.
			let now = OffsetDateTime::now_utc();

			if let Some(current) =
				self.store.fetch(key).await?.filter(|current| !current.is_expired_at(now))
			{
				return Ok(current);
			}
		}

		let result = self.refresh(plugin, key).await;

		*outcome = Some(result.clone());
		flight.generation.fetch_add(1, Ordering::Relaxed);

		result
	}

	/// Runs the plugin and saves its holder; failures propagate unsaved, so the next
	/// caller retries with a fresh invocation.
	async fn refresh(&self, plugin: &dyn IdpPlugin, key: &CacheKey) -> Result<ResolvedCredentials> {
		let fresh = plugin.fetch_credentials().await?;

		self.store.save(key, fresh.clone()).await?;

		Ok(fresh)
	}

	fn flight(&self, key: &CacheKey) -> Arc<Flight> {
		let mut flights = self.flights.lock();

		flights.entry(key.clone()).or_default().clone()
	}
}
impl Debug for CredentialManager {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CredentialManager").finish_non_exhaustive()
	}
}
