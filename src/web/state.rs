use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::Client;
use sqlx::{PgPool, postgres::PgPoolOptions};
use tracing::info;

use crate::{
    cache::ViewCache,
    compression::CompressionOptions,
    config::AppConfig,
    content::ContentService,
    feed::ChangeFeed,
    gateway::{AuthClient, AuthProvider, ObjectStore, PgRowStore, RowStore, StorageClient},
    moderation::ModerationEngine,
    session::SessionStore,
    web::in_flight::InFlight,
};

#[derive(Clone)]
pub struct AppState {
    pool: PgPool,
    rows: Arc<dyn RowStore>,
    auth: Arc<dyn AuthProvider>,
    sessions: SessionStore,
    cache: ViewCache,
    engine: ModerationEngine,
    content: ContentService,
    feed: ChangeFeed,
    in_flight: InFlight,
}

impl AppState {
    pub async fn new(config: &AppConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await
            .context("failed to connect to Postgres")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run database migrations")?;

        let http = Client::builder()
            .timeout(config.http_timeout)
            .build()
            .context("failed to build HTTP client")?;

        let sessions = SessionStore::new();
        let rows: Arc<dyn RowStore> = Arc::new(PgRowStore::new(pool.clone()));
        let objects: Arc<dyn ObjectStore> = Arc::new(StorageClient::new(
            http.clone(),
            config.backend_url.clone(),
            config.anon_key.clone(),
            config.service_key.clone(),
        ));
        let auth: Arc<dyn AuthProvider> = Arc::new(AuthClient::new(
            http,
            config.backend_url.clone(),
            config.anon_key.clone(),
            rows.clone(),
        ));

        info!(backend = %config.backend_url, "backend clients ready");
        Ok(Self::from_parts(
            pool,
            rows,
            objects,
            auth,
            sessions,
            ViewCache::with_max_age(config.cache_ttl),
            config.compression,
        ))
    }

    fn from_parts(
        pool: PgPool,
        rows: Arc<dyn RowStore>,
        objects: Arc<dyn ObjectStore>,
        auth: Arc<dyn AuthProvider>,
        sessions: SessionStore,
        cache: ViewCache,
        compression: CompressionOptions,
    ) -> Self {
        let engine = ModerationEngine::new(
            rows.clone(),
            objects.clone(),
            cache.clone(),
            compression,
        );
        let content = ContentService::new(rows.clone(), objects, cache.clone(), compression);

        Self {
            pool,
            rows,
            auth,
            sessions,
            cache,
            engine,
            content,
            feed: ChangeFeed::new(),
            in_flight: InFlight::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests(
        rows: Arc<dyn RowStore>,
        objects: Arc<dyn ObjectStore>,
        auth: Arc<dyn AuthProvider>,
    ) -> Self {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/portal_admin_test")
            .expect("lazy pool");
        Self::from_parts(
            pool,
            rows,
            objects,
            auth,
            SessionStore::new(),
            ViewCache::new(),
            CompressionOptions::default(),
        )
    }

    /// Test state with an auth provider that refuses every sign-in.
    #[cfg(test)]
    pub(crate) fn with_stores(rows: Arc<dyn RowStore>, objects: Arc<dyn ObjectStore>) -> Self {
        Self::for_tests(rows, objects, Arc::new(test_support::RefuseAuth))
    }

    /// Start a staff session directly and return a cookie jar carrying it.
    #[cfg(test)]
    pub(crate) fn admin_cookie(&self) -> axum_extra::extract::cookie::CookieJar {
        use axum_extra::extract::cookie::{Cookie, CookieJar};

        let session = self.sessions.insert(crate::session::Session::new(
            "clerk",
            None,
            "token",
            chrono::Utc::now() + chrono::Duration::hours(1),
        ));
        CookieJar::new().add(Cookie::new(
            crate::web::auth::SESSION_COOKIE,
            session.id.to_string(),
        ))
    }

    pub fn pool(&self) -> PgPool {
        self.pool.clone()
    }

    pub fn rows(&self) -> Arc<dyn RowStore> {
        self.rows.clone()
    }

    pub fn auth(&self) -> &dyn AuthProvider {
        self.auth.as_ref()
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn cache(&self) -> ViewCache {
        self.cache.clone()
    }

    pub fn engine(&self) -> &ModerationEngine {
        &self.engine
    }

    pub fn content(&self) -> &ContentService {
        &self.content
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }
}
