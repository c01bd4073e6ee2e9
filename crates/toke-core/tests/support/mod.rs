//! Shared fixtures: a scripted in-memory backend and cache helpers.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::Notify;

use toke_core::auth::{AuthSession, AuthUser, UserMetadata};
use toke_core::cache::{
    read_json, write_json, CacheKey, CacheStore, MemoryCacheStore, StorageError, StorageResult,
};
use toke_core::remote::{RemoteError, RemoteGateway, RemoteResult, SignUpOutcome, UserUpdate};
use toke_core::util::unix_timestamp_now;
use toke_core::{ClientConfig, ClientContext, Entry, EntryDraft, EntryId};

pub const USER_ID: &str = "user-1";
pub const EMAIL: &str = "taster@example.com";
pub const PASSWORD: &str = "correct horse";

/// Blocks callers while held. Release wakes every waiter.
#[derive(Default)]
pub struct Gate {
    held: AtomicBool,
    notify: Notify,
}

impl Gate {
    pub fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    async fn pass(&self) {
        loop {
            let notified = self.notify.notified();
            if !self.held.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }
}

#[derive(Default)]
struct Script {
    rows: Vec<Entry>,
    query_failure: Option<RemoteError>,
    write_failure: Option<RemoteError>,
    refresh_failure: Option<RemoteError>,
    sign_in_failure: Option<RemoteError>,
    uploads: Vec<(String, String, usize)>,
    issued_tokens: usize,
}

/// Remote gateway double. Queries snapshot the rows when issued, then wait
/// on `query_gate`, so a held query returns what the remote had at issue time.
#[derive(Default)]
pub struct FakeGateway {
    script: Mutex<Script>,
    pub query_gate: Gate,
    pub refresh_gate: Gate,
    query_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    sign_out_calls: AtomicUsize,
}

impl FakeGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_rows(rows: Vec<Entry>) -> Arc<Self> {
        let fake = Self::new();
        fake.set_rows(rows);
        fake
    }

    pub fn set_rows(&self, rows: Vec<Entry>) {
        self.script().rows = rows;
    }

    pub fn rows(&self) -> Vec<Entry> {
        self.script().rows.clone()
    }

    pub fn fail_queries(&self, failure: Option<RemoteError>) {
        self.script().query_failure = failure;
    }

    pub fn fail_writes(&self, failure: Option<RemoteError>) {
        self.script().write_failure = failure;
    }

    pub fn fail_refresh(&self, failure: Option<RemoteError>) {
        self.script().refresh_failure = failure;
    }

    pub fn fail_sign_in(&self, failure: Option<RemoteError>) {
        self.script().sign_in_failure = failure;
    }

    /// `(bucket, path, size)` of every upload.
    pub fn uploads(&self) -> Vec<(String, String, usize)> {
        self.script().uploads.clone()
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn sign_out_calls(&self) -> usize {
        self.sign_out_calls.load(Ordering::SeqCst)
    }

    pub async fn wait_for_query_calls(&self, count: usize) {
        wait_until(|| self.query_calls() >= count).await;
    }

    pub async fn wait_for_refresh_calls(&self, count: usize) {
        wait_until(|| self.refresh_calls() >= count).await;
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }

    fn next_session(&self) -> AuthSession {
        let mut script = self.script();
        script.issued_tokens += 1;
        let mut session = session_expiring_in(3600);
        session.access_token = format!("access-{}", script.issued_tokens);
        session.refresh_token = format!("refresh-{}", script.issued_tokens);
        session
    }

    fn write_check(&self) -> RemoteResult<()> {
        self.script().write_failure.clone().map_or(Ok(()), Err)
    }
}

impl RemoteGateway for FakeGateway {
    async fn query_entries(&self, _access_token: &str, user_id: &str) -> RemoteResult<Vec<Entry>> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        let snapshot = {
            let script = self.script();
            script.query_failure.clone().map_or_else(
                || {
                    Ok(script
                        .rows
                        .iter()
                        .filter(|entry| entry.user_id == user_id)
                        .cloned()
                        .collect::<Vec<_>>())
                },
                Err,
            )
        };
        self.query_gate.pass().await;
        snapshot
    }

    async fn get_entry(&self, _access_token: &str, id: &EntryId) -> RemoteResult<Entry> {
        let script = self.script();
        if let Some(failure) = script.query_failure.clone() {
            return Err(failure);
        }
        script
            .rows
            .iter()
            .find(|entry| &entry.id == id)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(format!("entry {id}")))
    }

    async fn insert_entry(&self, _access_token: &str, entry: &Entry) -> RemoteResult<Entry> {
        self.write_check()?;
        self.script().rows.push(entry.clone());
        Ok(entry.clone())
    }

    async fn update_entry(&self, _access_token: &str, entry: &Entry) -> RemoteResult<Entry> {
        self.write_check()?;
        let mut script = self.script();
        let row = script
            .rows
            .iter_mut()
            .find(|row| row.id == entry.id)
            .ok_or_else(|| RemoteError::NotFound(format!("entry {}", entry.id)))?;
        *row = entry.clone();
        Ok(entry.clone())
    }

    async fn delete_entry(&self, _access_token: &str, id: &EntryId) -> RemoteResult<()> {
        self.write_check()?;
        self.script().rows.retain(|row| &row.id != id);
        Ok(())
    }

    async fn upload_blob(
        &self,
        _access_token: &str,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> RemoteResult<String> {
        self.write_check()?;
        self.script()
            .uploads
            .push((bucket.to_string(), path.to_string(), bytes.len()));
        Ok(format!("https://storage.test/{bucket}/{path}"))
    }

    async fn sign_in(&self, email: &str, password: &str) -> RemoteResult<AuthSession> {
        if let Some(failure) = self.script().sign_in_failure.clone() {
            return Err(failure);
        }
        if email != EMAIL || password != PASSWORD {
            return Err(RemoteError::Auth("Invalid login credentials".to_string()));
        }
        Ok(self.next_session())
    }

    async fn sign_up(&self, _email: &str, _password: &str) -> RemoteResult<SignUpOutcome> {
        Ok(SignUpOutcome::SignedIn(self.next_session()))
    }

    async fn sign_out(&self, _access_token: &str) -> RemoteResult<()> {
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn update_user(&self, _access_token: &str, update: &UserUpdate) -> RemoteResult<AuthUser> {
        self.write_check()?;
        Ok(AuthUser {
            id: USER_ID.to_string(),
            email: update.email.clone().or_else(|| Some(EMAIL.to_string())),
            metadata: UserMetadata {
                avatar_url: update.avatar_url.clone(),
            },
        })
    }

    async fn refresh_token(&self, _refresh_token: &str) -> RemoteResult<AuthSession> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        let failure = self.script().refresh_failure.clone();
        self.refresh_gate.pass().await;
        match failure {
            Some(failure) => Err(failure),
            None => Ok(self.next_session()),
        }
    }
}

/// Memory store whose reads or writes can be made to fail.
#[derive(Default)]
pub struct FlakyCacheStore {
    inner: MemoryCacheStore,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
}

impl FlakyCacheStore {
    fn failure(&self, flag: &AtomicBool) -> StorageResult<()> {
        if flag.load(Ordering::SeqCst) {
            Err(StorageError::Unavailable("disk unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

impl CacheStore for FlakyCacheStore {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.failure(&self.fail_reads)?;
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        self.failure(&self.fail_writes)?;
        self.inner.set(key, value)
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        self.failure(&self.fail_writes)?;
        self.inner.delete(key)
    }
}

pub fn session_expiring_in(seconds: i64) -> AuthSession {
    AuthSession {
        access_token: "access-0".to_string(),
        refresh_token: "refresh-0".to_string(),
        expires_at: unix_timestamp_now() + seconds,
        user: AuthUser {
            id: USER_ID.to_string(),
            email: Some(EMAIL.to_string()),
            metadata: UserMetadata::default(),
        },
    }
}

pub fn date(raw: &str) -> DateTime<Utc> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
        .and_utc()
}

pub fn entry(id: &str, on: &str) -> Entry {
    let mut entry = EntryDraft::new(format!("Strain {id}"))
        .into_entry(USER_ID)
        .unwrap();
    entry.id = EntryId::from(id);
    entry.date = date(on);
    entry
}

pub fn ids(entries: &[Entry]) -> Vec<String> {
    entries.iter().map(|entry| entry.id.to_string()).collect()
}

pub fn config() -> ClientConfig {
    ClientConfig {
        supabase_url: Some("https://project.supabase.co".to_string()),
        supabase_anon_key: Some("anon".to_string()),
        ..ClientConfig::default()
    }
}

/// Context whose persisted session is restored at startup.
pub fn signed_in(
    fake: &Arc<FakeGateway>,
    cache: Arc<dyn CacheStore>,
    session: &AuthSession,
) -> ClientContext<FakeGateway> {
    write_json(cache.as_ref(), CacheKey::SESSION, session).unwrap();
    ClientContext::new(config(), Arc::clone(fake), cache)
}

pub fn cached_entries(cache: &dyn CacheStore) -> Option<Vec<Entry>> {
    read_json(cache, &CacheKey::entries(USER_ID)).unwrap()
}

pub fn seed_entries(cache: &dyn CacheStore, entries: &[Entry]) {
    write_json(cache, &CacheKey::entries(USER_ID), entries).unwrap();
}

/// Let spawned tasks run until `condition` holds.
pub async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Give every runnable task a chance to reach its next suspension point.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}
