//! Process-wide client wiring.

use std::sync::Arc;
use std::time::Duration;

use crate::auth::SessionManager;
use crate::cache::{CacheStore, FileCacheStore};
use crate::config::ClientConfig;
use crate::favorites::FavoritesManager;
use crate::remote::{RemoteGateway, SupabaseGateway};
use crate::sync::EntrySynchronizer;
use crate::Result;

/// Owns the session, entry, and favorites managers for one client process.
///
/// Build it once at startup and pass references to the shells that need it.
pub struct ClientContext<R: RemoteGateway> {
    config: ClientConfig,
    session: Arc<SessionManager<R>>,
    entries: Arc<EntrySynchronizer<R>>,
    favorites: Arc<FavoritesManager<R>>,
}

impl ClientContext<SupabaseGateway> {
    /// Wire the Supabase gateway and the on-disk cache from `config`.
    pub fn from_config(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let endpoint = config.supabase()?;
        let remote = SupabaseGateway::new(
            &endpoint.url,
            endpoint.anon_key,
            Duration::from_secs(config.request_timeout_secs),
        )?;
        let cache = FileCacheStore::open(config.resolved_cache_dir()?)?;
        Ok(Self::new(config, Arc::new(remote), Arc::new(cache)))
    }
}

impl<R: RemoteGateway> ClientContext<R> {
    pub fn new(config: ClientConfig, remote: Arc<R>, cache: Arc<dyn CacheStore>) -> Self {
        let session = Arc::new(SessionManager::start(
            Arc::clone(&remote),
            Arc::clone(&cache),
            config.refresh_margin_secs,
        ));
        let entries = Arc::new(EntrySynchronizer::new(
            remote,
            Arc::clone(&cache),
            Arc::clone(&session),
        ));
        let favorites = Arc::new(FavoritesManager::new(cache, Arc::clone(&session)));

        Self {
            config,
            session,
            entries,
            favorites,
        }
    }

    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub const fn session(&self) -> &Arc<SessionManager<R>> {
        &self.session
    }

    pub const fn entries(&self) -> &Arc<EntrySynchronizer<R>> {
        &self.entries
    }

    pub const fn favorites(&self) -> &Arc<FavoritesManager<R>> {
        &self.favorites
    }
}
