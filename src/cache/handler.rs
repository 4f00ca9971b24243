//! Lifecycle event handler for the offline cache
//!
//! The host (see `Registration`) decides when each event fires and which
//! generation is current; the handler itself keeps no notion of "current" and
//! receives the version tag with every call.

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::store::CacheStorage;
use super::types::{Manifest, RequestKey, VersionTag};
use crate::error::CacheError;
use crate::fetch::{Fetcher, Request, Response};
use crate::notify::{ClickOutcome, Notification, NotificationAction};

/// One method per event delivered by the hosting environment
#[async_trait]
pub trait LifecycleHandler: Send + Sync {
    /// Precache every manifest asset into generation `tag`, all or nothing
    async fn install(&self, tag: &VersionTag, manifest: &Manifest) -> Result<(), CacheError>;

    /// Answer an outgoing fetch from generation `current`, falling back to the network
    async fn intercept(
        &self,
        current: &VersionTag,
        request: &Request,
    ) -> Result<Response, CacheError>;

    /// Make `current` the only generation, scheduling deletion of the others
    async fn activate(&self, current: &VersionTag) -> Result<(), CacheError>;

    /// Build the notification to display for a push
    fn push(&self, payload: &[u8]) -> Notification;

    /// Decide what happens when the user clicks the notification or one of its actions
    fn notification_click(
        &self,
        notification: &Notification,
        action: Option<NotificationAction>,
    ) -> ClickOutcome;
}

/// Cache handler over a generation store and a network fetcher
///
/// Opportunistic cache writes and stale-generation deletions run as
/// background tasks; `settle` waits for them.
pub struct CacheHandler<S, F> {
    storage: Arc<S>,
    fetcher: Arc<F>,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl<S: CacheStorage, F: Fetcher> CacheHandler<S, F> {
    pub fn new(storage: Arc<S>, fetcher: Arc<F>) -> Self {
        Self {
            storage,
            fetcher,
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    pub fn fetcher(&self) -> &Arc<F> {
        &self.fetcher
    }

    /// Wait for every background write and delete scheduled so far
    pub async fn settle(&self) {
        loop {
            let handles = std::mem::take(&mut *self.lock_pending());
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    warn!(error = %e, "background cache task did not complete");
                }
            }
        }
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn spawn_background<T>(&self, task: T)
    where
        T: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        let mut pending = self.lock_pending();
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }

    async fn fetch_asset(&self, url: &str) -> Result<(RequestKey, Response), CacheError> {
        let request = Request::get(url);
        let partial = |reason: String| CacheError::PartialInstall {
            url: url.to_string(),
            reason,
        };

        match self.fetcher.fetch(&request).await {
            Ok(response) if response.is_ok() => {
                Ok((request.cache_key(&*self.fetcher), response))
            }
            Ok(response) => Err(partial(format!(
                "status {} ({:?} response)",
                response.status, response.response_type
            ))),
            Err(e) => Err(partial(e.to_string())),
        }
    }
}

#[async_trait]
impl<S: CacheStorage, F: Fetcher> LifecycleHandler for CacheHandler<S, F> {
    async fn install(&self, tag: &VersionTag, manifest: &Manifest) -> Result<(), CacheError> {
        let existed = self.storage.has(tag).await?;
        self.storage.open(tag).await?;
        info!(version = %tag, assets = manifest.len(), "installing cache generation");

        // Spellings of the same asset are fetched once.
        let mut seen = HashSet::new();
        let assets: Vec<&String> = manifest
            .assets()
            .iter()
            .filter(|url| seen.insert(self.fetcher.normalize(url)))
            .collect();

        let results = join_all(assets.into_iter().map(|url| self.fetch_asset(url))).await;
        let fetched: Result<Vec<_>, CacheError> = results.into_iter().collect();

        let outcome = match fetched {
            Ok(entries) => self.storage.put_all(tag, entries).await,
            Err(e) => Err(e),
        };

        if let Err(e) = &outcome {
            warn!(version = %tag, error = %e, "install failed");
            if !existed {
                if let Err(cleanup) = self.storage.delete(tag).await {
                    debug!(version = %tag, error = %cleanup, "could not remove failed generation");
                }
            }
        } else {
            info!(version = %tag, "install complete");
        }
        outcome
    }

    async fn intercept(
        &self,
        current: &VersionTag,
        request: &Request,
    ) -> Result<Response, CacheError> {
        let key = request.cache_key(&*self.fetcher);

        match self.storage.lookup(current, &key).await {
            Ok(Some(response)) => {
                debug!(%key, version = %current, "cache hit");
                return Ok(response);
            }
            Ok(None) => debug!(%key, version = %current, "cache miss"),
            Err(e) => warn!(%key, error = %e, "cache lookup failed, using network"),
        }

        let response = self.fetcher.fetch(request).await?;
        if !response.is_cacheable() || !key.is_get() {
            return Ok(response);
        }

        let copy = response.clone();
        let storage = Arc::clone(&self.storage);
        let tag = current.clone();
        self.spawn_background(async move {
            // The generation may have been deleted by a later activation.
            match storage.has(&tag).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(%key, version = %tag, "generation gone, skipping cache write");
                    return;
                }
                Err(e) => {
                    warn!(%key, version = %tag, error = %e, "opportunistic cache write failed");
                    return;
                }
            }
            if let Err(e) = storage.put(&tag, &key, &copy).await {
                warn!(%key, version = %tag, error = %e, "opportunistic cache write failed");
            }
        });

        Ok(response)
    }

    async fn activate(&self, current: &VersionTag) -> Result<(), CacheError> {
        let tags = self.storage.keys().await?;

        for tag in tags.into_iter().filter(|t| t != current) {
            let storage = Arc::clone(&self.storage);
            info!(version = %tag, "deleting stale cache generation");
            self.spawn_background(async move {
                if let Err(e) = storage.delete(&tag).await {
                    warn!(version = %tag, error = %e, "failed to delete stale generation");
                }
            });
        }

        info!(version = %current, "cache generation active");
        Ok(())
    }

    fn push(&self, payload: &[u8]) -> Notification {
        debug!(bytes = payload.len(), "push received");
        Notification::reminder()
    }

    fn notification_click(
        &self,
        notification: &Notification,
        action: Option<NotificationAction>,
    ) -> ClickOutcome {
        let open_url = match action {
            Some(NotificationAction::Open) => Some(notification.url.clone()),
            _ => None,
        };
        ClickOutcome {
            close: true,
            open_url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{DiskStorage, MemoryStorage};
    use crate::fetch::ResponseType;
    use std::collections::HashMap;
    use tempfile::TempDir;

    /// Fetcher that answers from a fixed table and counts calls
    ///
    /// With an origin set, paths normalize to absolute URLs on that origin
    /// and absolute URLs on it are routed by their path.
    #[derive(Default)]
    struct ScriptedFetcher {
        routes: HashMap<String, Response>,
        calls: Mutex<Vec<String>>,
        origin: Option<String>,
    }

    impl ScriptedFetcher {
        fn with(mut self, url: &str, response: Response) -> Self {
            self.routes.insert(url.to_string(), response);
            self
        }

        fn with_origin(mut self, origin: &str) -> Self {
            self.origin = Some(origin.to_string());
            self
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Fetcher for ScriptedFetcher {
        async fn fetch(&self, request: &Request) -> Result<Response, CacheError> {
            self.calls.lock().unwrap().push(request.url.clone());
            let path: &str = match &self.origin {
                Some(origin) => request.url.strip_prefix(origin.as_str()).unwrap_or(&request.url),
                None => &request.url,
            };
            self.routes
                .get(path)
                .cloned()
                .ok_or_else(|| CacheError::Network {
                    url: request.url.clone(),
                    reason: "offline".to_string(),
                })
        }

        fn normalize(&self, url: &str) -> String {
            match &self.origin {
                Some(origin) if url.starts_with('/') => format!("{}{}", origin, url),
                _ => url.to_string(),
            }
        }
    }

    /// Storage whose single-entry writes always fail
    #[derive(Default)]
    struct ReadOnlyStorage(MemoryStorage);

    #[async_trait]
    impl CacheStorage for ReadOnlyStorage {
        async fn open(&self, tag: &VersionTag) -> Result<(), CacheError> {
            self.0.open(tag).await
        }
        async fn keys(&self) -> Result<Vec<VersionTag>, CacheError> {
            self.0.keys().await
        }
        async fn lookup(
            &self,
            tag: &VersionTag,
            key: &RequestKey,
        ) -> Result<Option<Response>, CacheError> {
            self.0.lookup(tag, key).await
        }
        async fn put(&self, _: &VersionTag, _: &RequestKey, _: &Response) -> Result<(), CacheError> {
            Err(CacheError::CacheStore("quota exceeded".to_string()))
        }
        async fn put_all(
            &self,
            tag: &VersionTag,
            entries: Vec<(RequestKey, Response)>,
        ) -> Result<(), CacheError> {
            self.0.put_all(tag, entries).await
        }
        async fn delete(&self, tag: &VersionTag) -> Result<bool, CacheError> {
            self.0.delete(tag).await
        }
        async fn entries(&self, tag: &VersionTag) -> Result<Vec<RequestKey>, CacheError> {
            self.0.entries(tag).await
        }
    }

    fn handler(fetcher: ScriptedFetcher) -> CacheHandler<MemoryStorage, ScriptedFetcher> {
        CacheHandler::new(Arc::new(MemoryStorage::new()), Arc::new(fetcher))
    }

    fn v1() -> VersionTag {
        VersionTag::new("v1")
    }

    #[tokio::test]
    async fn test_install_then_intercept_hits_without_network() {
        let fetcher = ScriptedFetcher::default()
            .with("/a.js", Response::basic(200, "let a = 1;"))
            .with("/b.css", Response::basic(200, "body {}"));
        let handler = handler(fetcher);
        let manifest = Manifest::new(["/a.js", "/b.css"]).unwrap();

        handler.install(&v1(), &manifest).await.unwrap();
        let calls_after_install = handler.fetcher.call_count();

        let response = handler.intercept(&v1(), &Request::get("/a.js")).await.unwrap();

        assert_eq!(response.body, b"let a = 1;");
        assert_eq!(handler.fetcher.call_count(), calls_after_install);
    }

    #[tokio::test]
    async fn test_install_with_missing_asset_stores_nothing() {
        let fetcher = ScriptedFetcher::default()
            .with("/a.js", Response::basic(200, "let a = 1;"))
            .with("/b.css", Response::basic(404, "not found"));
        let handler = handler(fetcher);
        let manifest = Manifest::new(["/a.js", "/b.css"]).unwrap();

        let err = handler.install(&v1(), &manifest).await.unwrap_err();

        assert!(matches!(err, CacheError::PartialInstall { ref url, .. } if url == "/b.css"));
        assert!(handler.storage.entries(&v1()).await.unwrap().is_empty());
        assert!(!handler.storage.has(&v1()).await.unwrap());
    }

    #[tokio::test]
    async fn test_install_network_failure_is_partial_install() {
        let fetcher = ScriptedFetcher::default().with("/a.js", Response::basic(200, "a"));
        let handler = handler(fetcher);
        let manifest = Manifest::new(["/a.js", "/offline.css"]).unwrap();

        let err = handler.install(&v1(), &manifest).await.unwrap_err();

        assert!(matches!(err, CacheError::PartialInstall { ref url, .. } if url == "/offline.css"));
    }

    #[tokio::test]
    async fn test_failed_reinstall_keeps_existing_entries() {
        let storage = Arc::new(MemoryStorage::new());
        storage.open(&v1()).await.unwrap();
        storage
            .put(&v1(), &RequestKey::get("/a.js"), &Response::basic(200, "old"))
            .await
            .unwrap();
        let fetcher = ScriptedFetcher::default().with("/a.js", Response::basic(500, "boom"));
        let handler = CacheHandler::new(storage, Arc::new(fetcher));

        let manifest = Manifest::new(["/a.js"]).unwrap();
        assert!(handler.install(&v1(), &manifest).await.is_err());

        let cached = handler.intercept(&v1(), &Request::get("/a.js")).await.unwrap();
        assert_eq!(cached.body, b"old");
    }

    #[tokio::test]
    async fn test_install_with_repeated_asset_on_disk() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let storage = Arc::new(DiskStorage::with_dir(temp_dir.path().to_path_buf()));
        let fetcher = ScriptedFetcher::default()
            .with("/", Response::basic(200, "<html>"))
            .with("/app.js", Response::basic(200, "app"));
        let handler = CacheHandler::new(Arc::clone(&storage), Arc::new(fetcher));
        let manifest = Manifest::new(["/", "/app.js", "/"]).unwrap();

        handler.install(&v1(), &manifest).await.expect("Install should succeed");

        assert_eq!(
            storage.entries(&v1()).await.unwrap(),
            vec![RequestKey::get("/"), RequestKey::get("/app.js")]
        );
        assert_eq!(handler.fetcher.call_count(), 2);
    }

    #[tokio::test]
    async fn test_install_fetches_each_normalized_asset_once() {
        let fetcher = ScriptedFetcher::default()
            .with_origin("http://localhost:8080")
            .with("/app.js", Response::basic(200, "app"));
        let handler = handler(fetcher);
        let manifest = Manifest::new(["/app.js", "http://localhost:8080/app.js"]).unwrap();

        handler.install(&v1(), &manifest).await.unwrap();

        assert_eq!(handler.fetcher.call_count(), 1);
        assert_eq!(
            handler.storage.entries(&v1()).await.unwrap(),
            vec![RequestKey::get("http://localhost:8080/app.js")]
        );
    }

    #[tokio::test]
    async fn test_failed_reinstall_on_disk_keeps_previous_content() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let storage = Arc::new(DiskStorage::with_dir(temp_dir.path().to_path_buf()));
        let manifest = Manifest::new(["/", "/app.js"]).unwrap();

        let first = ScriptedFetcher::default()
            .with("/", Response::basic(200, "old page"))
            .with("/app.js", Response::basic(200, "old app"));
        CacheHandler::new(Arc::clone(&storage), Arc::new(first))
            .install(&v1(), &manifest)
            .await
            .unwrap();

        let second = ScriptedFetcher::default()
            .with("/", Response::basic(200, "new page"))
            .with("/app.js", Response::basic(500, "boom"));
        let handler = CacheHandler::new(Arc::clone(&storage), Arc::new(second));
        let err = handler.install(&v1(), &manifest).await.unwrap_err();

        assert!(matches!(err, CacheError::PartialInstall { ref url, .. } if url == "/app.js"));
        assert!(storage.has(&v1()).await.unwrap());
        let page = storage.lookup(&v1(), &RequestKey::get("/")).await.unwrap().unwrap();
        let app = storage.lookup(&v1(), &RequestKey::get("/app.js")).await.unwrap().unwrap();
        assert_eq!(page.body, b"old page");
        assert_eq!(app.body, b"old app");
    }

    #[tokio::test]
    async fn test_absolute_url_hits_entry_installed_by_path() {
        let fetcher = ScriptedFetcher::default()
            .with_origin("http://localhost:8080")
            .with("/app.js", Response::basic(200, "app"));
        let handler = handler(fetcher);
        handler.install(&v1(), &Manifest::new(["/app.js"]).unwrap()).await.unwrap();
        let calls_after_install = handler.fetcher.call_count();

        let response = handler
            .intercept(&v1(), &Request::get("http://localhost:8080/app.js"))
            .await
            .unwrap();
        handler.settle().await;

        assert_eq!(response.body, b"app");
        assert_eq!(handler.fetcher.call_count(), calls_after_install);
        assert_eq!(handler.storage.entries(&v1()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_late_write_does_not_recreate_deleted_generation() {
        let fetcher = ScriptedFetcher::default().with("/data.json", Response::basic(200, "{}"));
        let handler = handler(fetcher);
        handler.storage.open(&v1()).await.unwrap();

        let response = handler.intercept(&v1(), &Request::get("/data.json")).await.unwrap();
        handler.storage.delete(&v1()).await.unwrap();
        handler.settle().await;

        assert_eq!(response.body, b"{}");
        assert!(!handler.storage.has(&v1()).await.unwrap());
        assert!(handler.storage.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_miss_caches_basic_200_response() {
        let fetcher =
            ScriptedFetcher::default().with("/data.json", Response::basic(200, "{\"n\":1}"));
        let handler = handler(fetcher);
        handler.storage.open(&v1()).await.unwrap();

        let first = handler.intercept(&v1(), &Request::get("/data.json")).await.unwrap();
        handler.settle().await;
        let second = handler.intercept(&v1(), &Request::get("/data.json")).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(handler.fetcher.call_count(), 1);
        assert!(handler
            .storage
            .lookup(&v1(), &RequestKey::get("/data.json"))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_miss_does_not_cache_cross_origin_or_non_200() {
        let fetcher = ScriptedFetcher::default()
            .with(
                "https://cdn.example/lib.js",
                Response::basic(200, "lib").with_type(ResponseType::Opaque),
            )
            .with("/missing", Response::basic(404, "nope"))
            .with("/redirect", Response::basic(301, ""));
        let handler = handler(fetcher);

        let statuses = [
            ("https://cdn.example/lib.js", 200),
            ("/missing", 404),
            ("/redirect", 301),
        ];
        for (url, status) in statuses {
            let response = handler.intercept(&v1(), &Request::get(url)).await.unwrap();
            assert_eq!(response.status, status, "response for {} returned unmodified", url);
        }
        handler.settle().await;

        assert!(handler.storage.entries(&v1()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_miss_does_not_cache_non_get() {
        let fetcher = ScriptedFetcher::default().with("/api", Response::basic(200, "ok"));
        let handler = handler(fetcher);

        let request = Request::get("/api").with_method("POST");
        handler.intercept(&v1(), &request).await.unwrap();
        handler.settle().await;

        assert!(handler.storage.entries(&v1()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_network_failure_without_cache_propagates() {
        let handler = handler(ScriptedFetcher::default());

        let err = handler.intercept(&v1(), &Request::get("/data.json")).await.unwrap_err();

        assert!(matches!(err, CacheError::Network { .. }));
    }

    #[tokio::test]
    async fn test_store_failure_does_not_affect_response() {
        let fetcher = ScriptedFetcher::default().with("/data.json", Response::basic(200, "fresh"));
        let handler = CacheHandler::new(Arc::new(ReadOnlyStorage::default()), Arc::new(fetcher));
        handler.storage.open(&v1()).await.unwrap();

        let response = handler.intercept(&v1(), &Request::get("/data.json")).await.unwrap();
        handler.settle().await;

        assert_eq!(response.body, b"fresh");
    }

    #[tokio::test]
    async fn test_activate_deletes_other_generations() {
        let handler = handler(ScriptedFetcher::default());
        let v2 = VersionTag::new("v2");
        handler.storage.open(&v1()).await.unwrap();
        handler
            .storage
            .put(&v1(), &RequestKey::get("/old.js"), &Response::basic(200, "old"))
            .await
            .unwrap();
        handler.storage.open(&v2).await.unwrap();

        handler.activate(&v2).await.unwrap();
        handler.settle().await;

        assert_eq!(handler.storage.keys().await.unwrap(), vec![v2.clone()]);
        let err = handler.intercept(&v2, &Request::get("/old.js")).await.unwrap_err();
        assert!(matches!(err, CacheError::Network { .. }));
    }

    #[test]
    fn test_notification_click_open_returns_url() {
        let handler = handler(ScriptedFetcher::default());
        let notification = handler.push(b"");

        let open = handler.notification_click(&notification, Some(NotificationAction::Open));
        assert!(open.close);
        assert_eq!(open.open_url.as_deref(), Some("/"));

        let close = handler.notification_click(&notification, Some(NotificationAction::Close));
        assert!(close.close);
        assert!(close.open_url.is_none());

        let body = handler.notification_click(&notification, None);
        assert!(body.open_url.is_none());
    }
}
