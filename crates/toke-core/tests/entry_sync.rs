//! Entry synchronizer behaviour against the scripted backend.

mod support;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use tokio::sync::broadcast::error::TryRecvError;

use support::{
    cached_entries, entry, ids, seed_entries, session_expiring_in, settle, signed_in, FakeGateway,
    FlakyCacheStore, USER_ID,
};
use toke_core::auth::SessionState;
use toke_core::cache::{read_json, CacheKey, CacheStore, MemoryCacheStore};
use toke_core::models::{Rating, Size, SizeUnit};
use toke_core::remote::{RemoteError, ENTRY_IMAGES_BUCKET};
use toke_core::sync::{Freshness, SyncEvent};
use toke_core::{Entry, EntryDraft, EntryId, EntryPatch, ErrorKind};

fn network_down() -> RemoteError {
    RemoteError::Network("connection refused".to_string())
}

#[tokio::test]
async fn empty_cache_fetches_sorts_and_notifies_once() {
    let e1 = entry("e1", "2024-01-01");
    let e2 = entry("e2", "2024-02-01");
    let fake = FakeGateway::with_rows(vec![e1.clone(), e2.clone()]);
    let cache = Arc::new(MemoryCacheStore::new());
    let ctx = signed_in(&fake, cache.clone(), &session_expiring_in(3600));
    let mut events = ctx.entries().subscribe();

    let listing = ctx.entries().list_entries().await.unwrap();

    assert_eq!(listing.freshness, Freshness::Fresh);
    assert_eq!(ids(&listing.entries), vec!["e2", "e1"]);
    assert_eq!(cached_entries(cache.as_ref()), Some(vec![e2.clone(), e1.clone()]));
    assert_eq!(
        events.try_recv().unwrap(),
        SyncEvent::EntriesRefreshed {
            user_id: USER_ID.to_string(),
            entries: vec![e2, e1],
        }
    );
    assert_eq!(events.try_recv().unwrap_err(), TryRecvError::Empty);
}

#[tokio::test]
async fn network_failure_keeps_stale_cache_and_warns() {
    let e1 = entry("e1", "2024-01-01");
    let fake = FakeGateway::new();
    fake.fail_queries(Some(network_down()));
    let cache = Arc::new(MemoryCacheStore::new());
    seed_entries(cache.as_ref(), &[e1.clone()]);
    let ctx = signed_in(&fake, cache.clone(), &session_expiring_in(3600));
    let mut events = ctx.entries().subscribe();

    let listing = ctx.entries().list_entries().await.unwrap();
    assert_eq!(listing.freshness, Freshness::Cached);
    assert_eq!(listing.entries, vec![e1.clone()]);
    listing.refresh.unwrap().await.unwrap();

    assert!(matches!(events.try_recv().unwrap(), SyncEvent::Warning(_)));
    assert_eq!(events.try_recv().unwrap_err(), TryRecvError::Empty);
    assert_eq!(cached_entries(cache.as_ref()), Some(vec![e1]));
    assert_eq!(ctx.session().state(), SessionState::Authenticated);
}

#[tokio::test]
async fn network_failure_without_cache_reports_unavailable() {
    let fake = FakeGateway::new();
    fake.fail_queries(Some(network_down()));
    let cache = Arc::new(MemoryCacheStore::new());
    let ctx = signed_in(&fake, cache.clone(), &session_expiring_in(3600));

    let listing = ctx.entries().list_entries().await.unwrap();

    assert_eq!(listing.freshness, Freshness::Unavailable);
    assert!(listing.entries.is_empty());
    assert!(listing.warning.is_some());
    assert_eq!(cached_entries(cache.as_ref()), None);
}

#[tokio::test]
async fn cached_listing_returns_before_slow_remote_and_converges() {
    let e1 = entry("e1", "2024-01-01");
    let e2 = entry("e2", "2024-02-01");
    let fake = FakeGateway::with_rows(vec![e1.clone(), e2.clone()]);
    fake.query_gate.hold();
    let cache = Arc::new(MemoryCacheStore::new());
    seed_entries(cache.as_ref(), &[e1.clone()]);
    let ctx = signed_in(&fake, cache.clone(), &session_expiring_in(3600));
    let mut events = ctx.entries().subscribe();

    let listing = ctx.entries().list_entries().await.unwrap();
    assert_eq!(listing.freshness, Freshness::Cached);
    assert_eq!(listing.entries, vec![e1.clone()]);

    fake.wait_for_query_calls(1).await;
    assert_eq!(cached_entries(cache.as_ref()), Some(vec![e1.clone()]));

    fake.query_gate.release();
    listing.refresh.unwrap().await.unwrap();

    assert_eq!(cached_entries(cache.as_ref()), Some(vec![e2.clone(), e1.clone()]));
    assert_eq!(
        events.try_recv().unwrap(),
        SyncEvent::EntriesRefreshed {
            user_id: USER_ID.to_string(),
            entries: vec![e2, e1],
        }
    );
}

#[tokio::test]
async fn delete_beats_refresh_issued_before_it() {
    let e1 = entry("e1", "2024-01-01");
    let e2 = entry("e2", "2024-02-01");
    let fake = FakeGateway::with_rows(vec![e1.clone(), e2.clone()]);
    let cache = Arc::new(MemoryCacheStore::new());
    let ctx = signed_in(&fake, cache.clone(), &session_expiring_in(3600));

    fake.query_gate.hold();
    let entries = Arc::clone(ctx.entries());
    let pending = tokio::spawn(async move { entries.list_entries().await });
    fake.wait_for_query_calls(1).await;

    ctx.entries().delete_entry(&EntryId::from("e1")).await.unwrap();
    fake.query_gate.release();

    let listing = pending.await.unwrap().unwrap();
    assert!(!ids(&listing.entries).contains(&"e1".to_string()));
    let cached = cached_entries(cache.as_ref()).unwrap_or_default();
    assert_eq!(ids(&cached), vec!["e2"]);
}

#[tokio::test]
async fn delete_beats_background_refresh_of_cached_list() {
    let e1 = entry("e1", "2024-01-01");
    let e2 = entry("e2", "2024-02-01");
    let fake = FakeGateway::with_rows(vec![e1.clone(), e2.clone()]);
    let cache = Arc::new(MemoryCacheStore::new());
    seed_entries(cache.as_ref(), &[e2.clone(), e1.clone()]);
    let ctx = signed_in(&fake, cache.clone(), &session_expiring_in(3600));

    fake.query_gate.hold();
    let listing = ctx.entries().list_entries().await.unwrap();
    fake.wait_for_query_calls(1).await;

    ctx.entries().delete_entry(&EntryId::from("e1")).await.unwrap();
    assert_eq!(ids(&cached_entries(cache.as_ref()).unwrap()), vec!["e2"]);

    fake.query_gate.release();
    listing.refresh.unwrap().await.unwrap();
    assert_eq!(ids(&cached_entries(cache.as_ref()).unwrap()), vec!["e2"]);

    let next = ctx.entries().list_entries().await.unwrap();
    assert_eq!(ids(&next.entries), vec!["e2"]);
    next.refresh.unwrap().await.unwrap();
}

#[tokio::test]
async fn aborted_refresh_never_writes() {
    let e1 = entry("e1", "2024-01-01");
    let e2 = entry("e2", "2024-02-01");
    let fake = FakeGateway::with_rows(vec![e1.clone(), e2]);
    let cache = Arc::new(MemoryCacheStore::new());
    seed_entries(cache.as_ref(), &[e1.clone()]);
    let ctx = signed_in(&fake, cache.clone(), &session_expiring_in(3600));

    fake.query_gate.hold();
    let listing = ctx.entries().list_entries().await.unwrap();
    fake.wait_for_query_calls(1).await;
    let refresh = listing.refresh.unwrap();
    refresh.abort();
    assert!(refresh.await.unwrap_err().is_cancelled());
    fake.query_gate.release();
    settle().await;

    assert_eq!(cached_entries(cache.as_ref()), Some(vec![e1]));
}

#[tokio::test]
async fn create_is_cached_only_after_remote_ack() {
    let e1 = entry("e1", "2024-01-01");
    let fake = FakeGateway::with_rows(vec![e1.clone()]);
    let cache = Arc::new(MemoryCacheStore::new());
    seed_entries(cache.as_ref(), &[e1.clone()]);
    let ctx = signed_in(&fake, cache.clone(), &session_expiring_in(3600));

    fake.fail_writes(Some(network_down()));
    let mut draft = EntryDraft::new("Blue Dream");
    draft.date = support::date("2024-03-01");
    let error = ctx.entries().create_entry(draft.clone()).await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Network);
    assert_eq!(cached_entries(cache.as_ref()), Some(vec![e1.clone()]));

    fake.fail_writes(None);
    let created = ctx.entries().create_entry(draft).await.unwrap();
    assert_eq!(created.user_id, USER_ID);
    assert_eq!(
        ids(&cached_entries(cache.as_ref()).unwrap()),
        vec![created.id.to_string(), "e1".to_string()]
    );
    let per_entry: Option<Entry> =
        read_json(cache.as_ref(), &CacheKey::entry(&created.id)).unwrap();
    assert_eq!(per_entry, Some(created.clone()));
    assert!(fake.rows().contains(&created));
}

#[tokio::test]
async fn invalid_draft_never_reaches_remote_or_cache() {
    let fake = FakeGateway::new();
    let cache = Arc::new(MemoryCacheStore::new());
    let ctx = signed_in(&fake, cache.clone(), &session_expiring_in(3600));

    let mut draft = EntryDraft::new("   ");
    draft.size = Size::new(3.5, SizeUnit::Gram);
    let error = ctx.entries().create_entry(draft).await.unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Validation);
    assert!(fake.rows().is_empty());
    assert_eq!(cached_entries(cache.as_ref()), None);
}

#[tokio::test]
async fn remote_rejection_leaves_cache_untouched() {
    let e1 = entry("e1", "2024-01-01");
    let fake = FakeGateway::with_rows(vec![e1.clone()]);
    let cache = Arc::new(MemoryCacheStore::new());
    seed_entries(cache.as_ref(), &[e1.clone()]);
    let ctx = signed_in(&fake, cache.clone(), &session_expiring_in(3600));

    fake.fail_writes(Some(RemoteError::Validation("check constraint".to_string())));
    let patch = EntryPatch {
        strain: Some("Renamed".to_string()),
        ..Default::default()
    };
    let error = ctx
        .entries()
        .update_entry(&EntryId::from("e1"), patch)
        .await
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Validation);
    assert_eq!(cached_entries(cache.as_ref()), Some(vec![e1]));
}

#[tokio::test]
async fn update_replaces_cached_row() {
    let e1 = entry("e1", "2024-01-01");
    let fake = FakeGateway::with_rows(vec![e1.clone()]);
    let cache = Arc::new(MemoryCacheStore::new());
    seed_entries(cache.as_ref(), &[e1]);
    let ctx = signed_in(&fake, cache.clone(), &session_expiring_in(3600));
    let mut events = ctx.entries().subscribe();

    let updated = ctx
        .entries()
        .update_entry(
            &EntryId::from("e1"),
            EntryPatch {
                high_rating: Some(Rating::new(9.5).unwrap()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.high_rating.value(), 9.5);
    assert_eq!(cached_entries(cache.as_ref()), Some(vec![updated.clone()]));
    assert_eq!(events.try_recv().unwrap(), SyncEvent::EntryRefreshed(updated));
}

#[tokio::test]
async fn empty_patch_is_rejected() {
    let fake = FakeGateway::with_rows(vec![entry("e1", "2024-01-01")]);
    let ctx = signed_in(&fake, Arc::new(MemoryCacheStore::new()), &session_expiring_in(3600));

    let error = ctx
        .entries()
        .update_entry(&EntryId::from("e1"), EntryPatch::default())
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn get_entry_serves_cache_then_drops_rows_gone_remotely() {
    let e1 = entry("e1", "2024-01-01");
    let e2 = entry("e2", "2024-02-01");
    let fake = FakeGateway::with_rows(vec![e2.clone()]);
    let cache = Arc::new(MemoryCacheStore::new());
    seed_entries(cache.as_ref(), &[e2.clone(), e1.clone()]);
    toke_core::cache::write_json(cache.as_ref(), &CacheKey::entry(&e1.id), &e1).unwrap();
    let ctx = signed_in(&fake, cache.clone(), &session_expiring_in(3600));

    let view = ctx.entries().get_entry(&e1.id).await.unwrap();
    assert_eq!(view.freshness, Freshness::Cached);
    assert_eq!(view.entry, e1);
    view.refresh.unwrap().await.unwrap();

    assert_eq!(cache.get(&CacheKey::entry(&e1.id)).unwrap(), None);
    assert_eq!(cached_entries(cache.as_ref()), Some(vec![e2.clone()]));

    let error = ctx.entries().get_entry(&e1.id).await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::NotFound);

    let fresh = ctx.entries().get_entry(&e2.id).await.unwrap();
    assert_eq!(fresh.freshness, Freshness::Fresh);
    assert_eq!(fresh.entry, e2);
}

#[tokio::test]
async fn sign_out_purges_entries_cached_outside_the_list() {
    let e9 = entry("e9", "2024-01-09");
    let fake = FakeGateway::with_rows(vec![e9.clone()]);
    let cache = Arc::new(MemoryCacheStore::new());
    let ctx = signed_in(&fake, cache.clone(), &session_expiring_in(3600));

    let fresh = ctx.entries().get_entry(&e9.id).await.unwrap();
    assert_eq!(fresh.freshness, Freshness::Fresh);
    let created = ctx
        .entries()
        .create_entry(EntryDraft::new("Blue Dream"))
        .await
        .unwrap();
    assert_eq!(cached_entries(cache.as_ref()), None);
    assert!(cache.get(&CacheKey::entry(&e9.id)).unwrap().is_some());
    assert!(cache.get(&CacheKey::entry(&created.id)).unwrap().is_some());

    ctx.session().sign_out().await;

    assert_eq!(cache.get(&CacheKey::entry(&e9.id)).unwrap(), None);
    assert_eq!(cache.get(&CacheKey::entry(&created.id)).unwrap(), None);
    assert_eq!(cache.get(&CacheKey::entry_index(USER_ID)).unwrap(), None);
}

#[tokio::test]
async fn deleted_entries_leave_no_index_or_gates_behind() {
    let e1 = entry("e1", "2024-01-01");
    let e2 = entry("e2", "2024-02-01");
    let fake = FakeGateway::with_rows(vec![e2.clone(), e1.clone()]);
    let cache = Arc::new(MemoryCacheStore::new());
    let ctx = signed_in(&fake, cache.clone(), &session_expiring_in(3600));

    ctx.entries().list_entries().await.unwrap();
    ctx.entries().get_entry(&e1.id).await.unwrap();
    ctx.entries().get_entry(&e2.id).await.unwrap();
    let cached = ctx.entries().list_entries().await.unwrap();
    cached.refresh.unwrap().await.unwrap();
    ctx.entries().delete_entry(&e1.id).await.unwrap();

    let indexed: Option<Vec<EntryId>> =
        read_json(cache.as_ref(), &CacheKey::entry_index(USER_ID)).unwrap();
    assert_eq!(indexed, Some(vec![e2.id.clone()]));
    assert_eq!(ctx.entries().tracked_keys(), 0);
}

#[tokio::test]
async fn search_filters_by_strain_and_brand() {
    let mut haze = entry("e1", "2024-01-01");
    haze.strain = "Super Lemon Haze".to_string();
    let mut kush = entry("e2", "2024-02-01");
    kush.strain = "OG Kush".to_string();
    kush.brand = Some("Lemonade".to_string());
    let mut diesel = entry("e3", "2024-03-01");
    diesel.strain = "Sour Diesel".to_string();
    let fake = FakeGateway::with_rows(vec![haze, kush, diesel]);
    let ctx = signed_in(&fake, Arc::new(MemoryCacheStore::new()), &session_expiring_in(3600));

    let listing = ctx.entries().search_entries("lemon").await.unwrap();
    assert_eq!(ids(&listing.entries), vec!["e2", "e1"]);
}

#[tokio::test]
async fn storage_failures_degrade_to_network_only() {
    let e1 = entry("e1", "2024-01-01");
    let fake = FakeGateway::with_rows(vec![e1.clone()]);
    let cache = Arc::new(FlakyCacheStore::default());
    let ctx = signed_in(&fake, cache.clone(), &session_expiring_in(3600));
    cache.fail_reads.store(true, Ordering::SeqCst);
    cache.fail_writes.store(true, Ordering::SeqCst);

    let listing = ctx.entries().list_entries().await.unwrap();
    assert_eq!(listing.freshness, Freshness::Fresh);
    assert_eq!(listing.entries, vec![e1]);

    let created = ctx
        .entries()
        .create_entry(EntryDraft::new("Gelato"))
        .await
        .unwrap();
    assert!(fake.rows().contains(&created));
}

#[tokio::test]
async fn rejected_token_expires_session_and_purges() {
    let e1 = entry("e1", "2024-01-01");
    let fake = FakeGateway::with_rows(vec![e1.clone()]);
    let cache = Arc::new(MemoryCacheStore::new());
    seed_entries(cache.as_ref(), &[e1]);
    let ctx = signed_in(&fake, cache.clone(), &session_expiring_in(3600));

    fake.fail_writes(Some(RemoteError::Auth("JWT expired".to_string())));
    let error = ctx
        .entries()
        .delete_entry(&EntryId::from("e1"))
        .await
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Auth);
    assert_eq!(ctx.session().state(), SessionState::Unauthenticated);
    assert_eq!(cached_entries(cache.as_ref()), None);
    assert_eq!(cache.get(CacheKey::SESSION).unwrap(), None);
}

#[tokio::test]
async fn attach_image_uploads_then_updates_entry() {
    let e1 = entry("e1", "2024-01-01");
    let fake = FakeGateway::with_rows(vec![e1.clone()]);
    let ctx = signed_in(&fake, Arc::new(MemoryCacheStore::new()), &session_expiring_in(3600));

    let updated = ctx
        .entries()
        .attach_image(&e1.id, vec![0xFF, 0xD8, 0xFF], ".JPG")
        .await
        .unwrap();

    let expected_path = format!("{USER_ID}/e1.jpg");
    assert_eq!(
        fake.uploads(),
        vec![(ENTRY_IMAGES_BUCKET.to_string(), expected_path.clone(), 3)]
    );
    assert_eq!(
        updated.image,
        Some(format!("https://storage.test/{ENTRY_IMAGES_BUCKET}/{expected_path}"))
    );
}

#[tokio::test]
async fn oversized_image_is_rejected_before_upload() {
    let fake = FakeGateway::with_rows(vec![entry("e1", "2024-01-01")]);
    let ctx = signed_in(&fake, Arc::new(MemoryCacheStore::new()), &session_expiring_in(3600));

    let bytes = vec![0; toke_core::sync::MAX_IMAGE_BYTES + 1];
    let error = ctx
        .entries()
        .attach_image(&EntryId::from("e1"), bytes, "png")
        .await
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Validation);
    assert!(fake.uploads().is_empty());
}

#[tokio::test]
async fn signed_out_calls_fail_with_auth_error() {
    let fake = FakeGateway::new();
    let ctx = toke_core::ClientContext::new(
        support::config(),
        Arc::clone(&fake),
        Arc::new(MemoryCacheStore::new()),
    );

    let error = ctx.entries().list_entries().await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Auth);
    assert_eq!(fake.query_calls(), 0);
}
