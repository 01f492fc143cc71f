// crates.io
use time::macros;
// self
use warehouse_iam::{
	cache::{CacheKey, CredentialStore, MemoryStore},
	creds::{ResolvedCredentials, TemporaryCredentials},
	plugin::PluginKind,
};

fn profile_key(qualifier: &str) -> CacheKey {
	CacheKey::new(PluginKind::Profile, qualifier)
}

fn holder(tag: &str) -> ResolvedCredentials {
	let expiration = macros::datetime!(2030-01-01 00:00 UTC);

	TemporaryCredentials::new(format!("ASIA{tag}"), "secret", None, Some(expiration)).into()
}

#[tokio::test]
async fn save_and_fetch_round_trip() {
	let store = MemoryStore::default();
	let key = profile_key("analytics");

	store.save(&key, holder("A")).await.expect("Saving into the memory store should succeed.");

	let fetched = store
		.fetch(&key)
		.await
		.expect("Fetching from the memory store should succeed.")
		.expect("The saved entry should remain present.");

	assert_eq!(fetched, holder("A"));
}

#[tokio::test]
async fn save_replaces_the_previous_entry() {
	let store = MemoryStore::default();
	let key = profile_key("analytics");

	store.save(&key, holder("A")).await.expect("The first save should succeed.");
	store.save(&key, holder("B")).await.expect("The second save should succeed.");

	let fetched = store
		.fetch(&key)
		.await
		.expect("Fetching from the memory store should succeed.")
		.expect("The replaced entry should remain present.");

	assert_eq!(fetched, holder("B"));
}

#[tokio::test]
async fn fetch_misses_for_unknown_keys() {
	let store = MemoryStore::default();
	let fetched = store
		.fetch(&profile_key("absent"))
		.await
		.expect("Fetching from the memory store should succeed.");

	assert!(fetched.is_none());
}

#[tokio::test]
async fn invalidate_removes_and_returns_the_entry() {
	let store = MemoryStore::default();
	let key = profile_key("analytics");

	store.save(&key, holder("A")).await.expect("Saving into the memory store should succeed.");

	let removed = store
		.invalidate(&key)
		.await
		.expect("Invalidation should succeed.")
		.expect("Invalidation should return the removed entry.");

	assert_eq!(removed, holder("A"));
	assert!(store.fetch(&key).await.expect("The follow-up fetch should succeed.").is_none());
	assert!(store.invalidate(&key).await.expect("A repeated invalidation should succeed.").is_none());
}

#[tokio::test]
async fn entries_isolate_by_kind_and_qualifier() {
	let store = MemoryStore::default();
	let profile = profile_key("corp.okta.example");
	let okta = CacheKey::new(PluginKind::OktaBrowser, "corp.okta.example");

	store.save(&profile, holder("PROFILE")).await.expect("The profile save should succeed.");
	store.save(&okta, holder("OKTA")).await.expect("The okta save should succeed.");

	let fetched = store
		.fetch(&profile)
		.await
		.expect("Fetching the profile entry should succeed.")
		.expect("The profile entry should remain present.");

	assert_eq!(fetched, holder("PROFILE"));
	assert!(
		store
			.fetch(&profile_key("other-profile"))
			.await
			.expect("Fetching an unrelated qualifier should succeed.")
			.is_none()
	);
}

#[tokio::test]
async fn clones_share_the_backing_map() {
	let store = MemoryStore::default();
	let view = store.clone();
	let key = profile_key("analytics");

	store.save(&key, holder("A")).await.expect("Saving through the original should succeed.");

	let fetched = view
		.fetch(&key)
		.await
		.expect("Fetching through the clone should succeed.")
		.expect("The clone should observe the saved entry.");

	assert_eq!(fetched, holder("A"));

	view.invalidate(&key).await.expect("Invalidation through the clone should succeed.");

	assert!(store.fetch(&key).await.expect("The follow-up fetch should succeed.").is_none());
}

#[tokio::test]
async fn expired_entries_are_returned_as_stored() {
	let store = MemoryStore::default();
	let key = profile_key("stale");
	let expired: ResolvedCredentials = TemporaryCredentials::new(
		"ASIASTALE",
		"secret",
		None,
		Some(macros::datetime!(2020-01-01 00:00 UTC)),
	)
	.into();

	store.save(&key, expired.clone()).await.expect("Saving an expired holder should succeed.");

	// Freshness filtering belongs to the refresh coordinator; the store itself keeps
	// whatever it was given.
	let fetched = store
		.fetch(&key)
		.await
		.expect("Fetching the expired entry should succeed.")
		.expect("The expired entry should remain present.");

	assert_eq!(fetched, expired);
	assert!(fetched.is_expired_at(macros::datetime!(2026-01-01 00:00 UTC)));
}
