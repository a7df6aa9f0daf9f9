use super::{readable_resources, AuthorizationService};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    Uncached,
    Valid,
    Expired,
}

#[derive(Debug, Clone)]
struct AuthScopeEntry {
    resources: Vec<String>,
    expires_at: Instant,
}

/// Per-credential readable resource paths with a fixed time to live.
///
/// The entry map is only locked to read or store an entry. Fetches run
/// under a per-credential refresh lock, so concurrent lookups for one
/// expired credential trigger a single refresh while other credentials
/// proceed.
pub struct AuthScopeCache {
    service: Arc<dyn AuthorizationService>,
    service_name: String,
    ttl: Duration,
    entries: Mutex<HashMap<String, AuthScopeEntry>>,
    refresh_locks: DashMap<String, Arc<Mutex<()>>>,
    fetches: AtomicU64,
}

impl AuthScopeCache {
    pub fn new(service: Arc<dyn AuthorizationService>, service_name: impl Into<String>, ttl: Duration) -> Self {
        Self {
            service,
            service_name: service_name.into(),
            ttl,
            entries: Mutex::new(HashMap::new()),
            refresh_locks: DashMap::new(),
            fetches: AtomicU64::new(0),
        }
    }

    /// Readable resource paths for `credential`, sorted. Empty when the
    /// authorization service cannot be reached; such failures are not cached.
    pub async fn lookup(&self, credential: &str) -> Vec<String> {
        if credential.is_empty() {
            tracing::debug!("No credential supplied, using empty scope");
            return Vec::new();
        }

        if let Some(resources) = self.cached(credential).await {
            return resources;
        }

        let refresh_lock = self
            .refresh_locks
            .entry(credential.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _refresh = refresh_lock.lock().await;

        // another lookup may have refreshed while this one waited
        if let Some(resources) = self.cached(credential).await {
            return resources;
        }

        self.fetches.fetch_add(1, Ordering::Relaxed);
        match self.service.resource_mapping(credential).await {
            Ok(mapping) => {
                let resources = readable_resources(&mapping, &self.service_name);
                tracing::debug!("Refreshed authorization scope: {} readable resources", resources.len());
                self.entries.lock().await.insert(
                    credential.to_string(),
                    AuthScopeEntry {
                        resources: resources.clone(),
                        expires_at: Instant::now() + self.ttl,
                    },
                );
                resources
            }
            Err(e) => {
                tracing::warn!("Authorization fetch failed, continuing with empty scope: {}", e);
                Vec::new()
            }
        }
    }

    async fn cached(&self, credential: &str) -> Option<Vec<String>> {
        let entries = self.entries.lock().await;
        entries
            .get(credential)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.resources.clone())
    }

    pub async fn state(&self, credential: &str) -> ScopeState {
        let entries = self.entries.lock().await;
        match entries.get(credential) {
            None => ScopeState::Uncached,
            Some(entry) if entry.expires_at > Instant::now() => ScopeState::Valid,
            Some(_) => ScopeState::Expired,
        }
    }

    /// Number of calls made to the authorization service.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{HttpAuthorizationService, Permission, ResourceMapping};
    use crate::error::AuthError;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct MockAuthorization {
        calls: AtomicUsize,
        paths: std::sync::Mutex<Vec<&'static str>>,
        fail: bool,
    }

    impl MockAuthorization {
        fn granting(paths: Vec<&'static str>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                paths: std::sync::Mutex::new(paths),
                fail: false,
            }
        }
    }

    #[async_trait]
    impl AuthorizationService for MockAuthorization {
        async fn resource_mapping(&self, _credential: &str) -> Result<ResourceMapping, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AuthError::Status {
                    status: 500,
                    body: "boom".into(),
                });
            }
            let read = Permission {
                service: "*".into(),
                method: "read".into(),
            };
            Ok(self
                .paths
                .lock()
                .unwrap()
                .iter()
                .map(|p| (p.to_string(), vec![read.clone()]))
                .collect())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_until_expiry() {
        let service = Arc::new(MockAuthorization::granting(vec!["/programs/b", "/programs/a"]));
        let cache = AuthScopeCache::new(service.clone(), "peregrine", Duration::from_secs(3600));

        assert_eq!(cache.state("token").await, ScopeState::Uncached);
        let first = cache.lookup("token").await;
        assert_eq!(first, vec!["/programs/a".to_string(), "/programs/b".to_string()]);
        assert_eq!(cache.state("token").await, ScopeState::Valid);

        tokio::time::advance(Duration::from_secs(1800)).await;
        assert_eq!(cache.lookup("token").await, first);
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);

        *service.paths.lock().unwrap() = vec!["/programs/c"];
        tokio::time::advance(Duration::from_secs(1801)).await;
        assert_eq!(cache.state("token").await, ScopeState::Expired);
        assert_eq!(cache.lookup("token").await, vec!["/programs/c".to_string()]);
        assert_eq!(service.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_credentials_are_cached_separately() {
        let service = Arc::new(MockAuthorization::granting(vec!["/a"]));
        let cache = AuthScopeCache::new(service.clone(), "peregrine", Duration::from_secs(60));

        cache.lookup("alice").await;
        cache.lookup("bob").await;
        cache.lookup("alice").await;
        assert_eq!(service.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let service = Arc::new(MockAuthorization {
            calls: AtomicUsize::new(0),
            paths: std::sync::Mutex::new(vec![]),
            fail: true,
        });
        let cache = AuthScopeCache::new(service.clone(), "peregrine", Duration::from_secs(60));

        assert!(cache.lookup("token").await.is_empty());
        assert!(cache.lookup("token").await.is_empty());
        assert_eq!(service.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.state("token").await, ScopeState::Uncached);
    }

    /// Takes three seconds to answer for `slow`, answers immediately otherwise.
    struct SlowFor {
        slow: &'static str,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AuthorizationService for SlowFor {
        async fn resource_mapping(&self, credential: &str) -> Result<ResourceMapping, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if credential == self.slow {
                tokio::time::sleep(Duration::from_secs(3)).await;
            }
            let mut mapping = ResourceMapping::new();
            mapping.insert(
                format!("/programs/{}", credential),
                vec![Permission {
                    service: "*".into(),
                    method: "*".into(),
                }],
            );
            Ok(mapping)
        }
    }

    fn slow_cache() -> (Arc<SlowFor>, Arc<AuthScopeCache>) {
        let service = Arc::new(SlowFor {
            slow: "slow",
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(AuthScopeCache::new(service.clone(), "peregrine", Duration::from_secs(60)));
        (service, cache)
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_fetch_does_not_block_other_credentials() {
        let (_service, cache) = slow_cache();

        let slow = tokio::spawn({
            let cache = cache.clone();
            async move { cache.lookup("slow").await }
        });
        // let the slow fetch start
        tokio::task::yield_now().await;

        let started = Instant::now();
        assert_eq!(cache.lookup("fast").await, vec!["/programs/fast".to_string()]);
        assert!(started.elapsed() < Duration::from_secs(1), "took {:?}", started.elapsed());

        assert_eq!(slow.await.unwrap(), vec!["/programs/slow".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_refreshes_of_one_credential_coalesce() {
        let (service, cache) = slow_cache();

        let first = tokio::spawn({
            let cache = cache.clone();
            async move { cache.lookup("slow").await }
        });
        let second = tokio::spawn({
            let cache = cache.clone();
            async move { cache.lookup("slow").await }
        });

        assert_eq!(first.await.unwrap(), vec!["/programs/slow".to_string()]);
        assert_eq!(second.await.unwrap(), vec!["/programs/slow".to_string()]);
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_credential_skips_fetch() {
        let service = Arc::new(MockAuthorization::granting(vec!["/a"]));
        let cache = AuthScopeCache::new(service.clone(), "peregrine", Duration::from_secs(60));

        assert!(cache.lookup("").await.is_empty());
        assert_eq!(service.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_service_unavailable_yields_empty_scope() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/auth/mapping"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&mock_server)
            .await;

        let service = HttpAuthorizationService::new(
            format!("{}/auth/mapping", mock_server.uri()),
            Duration::from_secs(5),
        );
        let cache = AuthScopeCache::new(Arc::new(service), "peregrine", Duration::from_secs(3600));

        assert!(cache.lookup("token").await.is_empty());
        // not cached, so the next request asks again
        assert!(cache.lookup("token").await.is_empty());
        assert_eq!(cache.state("token").await, ScopeState::Uncached);
    }
}
