//! Signed-policy loading.
//!
//! The loader fetches a policy blob and its detached signature from the
//! policy store, verifies the signature against the configured signing
//! identity, parses and validates the document, and caches the result per
//! profile with a short TTL. Verification failure is fatal for the request:
//! when signing is configured the broker never evaluates an unverified
//! policy, and a failed verification is never downgraded to unsigned.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use sentinel_core::{escape_for_log, SentinelError, SentinelResult};

use crate::model::Policy;
use crate::parse::parse_and_validate;

/// Failure fetching a blob from the policy store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    /// No such policy object.
    #[error("policy object not found")]
    NotFound,
    /// Recoverable store failure; the loader retries once.
    #[error("transient store failure: {0}")]
    Transient(String),
    /// Anything else; not retried.
    #[error("store failure: {0}")]
    Other(String),
}

/// Read-only view of the external policy store.
#[async_trait]
pub trait PolicySource: Send + Sync {
    /// Fetch the raw policy document for a profile.
    async fn fetch_policy(&self, profile: &str) -> Result<Vec<u8>, FetchError>;

    /// Fetch the detached signature for a profile's policy, `None` when the
    /// store holds no signature object.
    async fn fetch_signature(&self, profile: &str) -> Result<Option<Vec<u8>>, FetchError>;
}

/// Failure verifying a detached signature.
#[derive(Debug, Clone, thiserror::Error)]
pub enum VerifyError {
    /// The signature does not verify, or the key id is not the trusted one.
    #[error("signature invalid")]
    Invalid,
    /// The verifier backend is unavailable. Fails closed.
    #[error("verifier unavailable: {0}")]
    Unavailable(String),
}

/// Detached-signature verification capability.
///
/// Key management is opaque to the broker; it trusts exactly the configured
/// `key_id`.
#[async_trait]
pub trait SignatureVerifier: Send + Sync {
    /// Verify `signature` over `blob` with the key named `key_id`.
    async fn verify(&self, key_id: &str, blob: &[u8], signature: &[u8])
        -> Result<(), VerifyError>;
}

/// Ed25519 verifier over a locally held public key.
///
/// The production deployment fronts a KMS; this implementation serves
/// self-hosted deployments and tests, which is why the key lives in memory.
#[derive(Debug, Clone)]
pub struct Ed25519Verifier {
    key_id: String,
    public_key: VerifyingKey,
}

impl Ed25519Verifier {
    /// Create a verifier trusting `public_key` under the name `key_id`.
    pub fn new(key_id: impl Into<String>, public_key: VerifyingKey) -> Self {
        Self {
            key_id: key_id.into(),
            public_key,
        }
    }
}

#[async_trait]
impl SignatureVerifier for Ed25519Verifier {
    async fn verify(
        &self,
        key_id: &str,
        blob: &[u8],
        signature: &[u8],
    ) -> Result<(), VerifyError> {
        if key_id != self.key_id {
            return Err(VerifyError::Invalid);
        }
        let signature = Signature::from_slice(signature).map_err(|_| VerifyError::Invalid)?;
        self.public_key
            .verify(blob, &signature)
            .map_err(|_| VerifyError::Invalid)
    }
}

/// Loader settings.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// How long a cached policy stays fresh.
    pub ttl: Duration,
    /// Whether a detached signature is mandatory.
    pub signature_required: bool,
    /// Trusted signing identity; required when signatures are.
    pub public_key_id: Option<String>,
    /// Delay before the single retry of a transient fetch.
    pub retry_backoff: Duration,
}

impl LoaderConfig {
    /// Server flavor: short TTL so policy edits land quickly.
    pub fn server(signature_required: bool, public_key_id: Option<String>) -> Self {
        Self {
            ttl: Duration::from_secs(30),
            signature_required,
            public_key_id,
            retry_backoff: Duration::from_millis(200),
        }
    }

    /// CLI flavor: longer TTL, one process rarely outlives it.
    pub fn cli(signature_required: bool, public_key_id: Option<String>) -> Self {
        Self {
            ttl: Duration::from_secs(300),
            signature_required,
            public_key_id,
            retry_backoff: Duration::from_millis(200),
        }
    }
}

/// Cache hit/miss counters, readable for diagnostics.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    /// Cache hits since construction.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Cache misses since construction.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

struct CacheEntry {
    policy: Arc<Policy>,
    loaded_at: Instant,
}

/// TTL-cached, signature-verifying policy loader.
pub struct PolicyLoader {
    config: LoaderConfig,
    source: Arc<dyn PolicySource>,
    verifier: Arc<dyn SignatureVerifier>,
    cache: RwLock<HashMap<String, CacheEntry>>,
    // One guard per profile so concurrent misses coalesce on a single fetch.
    fetch_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    stats: CacheStats,
}

impl PolicyLoader {
    /// Create a loader over the given source and verifier.
    pub fn new(
        config: LoaderConfig,
        source: Arc<dyn PolicySource>,
        verifier: Arc<dyn SignatureVerifier>,
    ) -> SentinelResult<Self> {
        if config.signature_required
            && config.public_key_id.as_deref().map_or(true, str::is_empty)
        {
            return Err(SentinelError::configuration(
                "loader requires signatures but has no public_key_id",
            ));
        }
        Ok(Self {
            config,
            source,
            verifier,
            cache: RwLock::new(HashMap::new()),
            fetch_locks: Mutex::new(HashMap::new()),
            stats: CacheStats::default(),
        })
    }

    /// Load the policy for `profile`, from cache when fresh.
    ///
    /// Negative results (fetch, verify, or parse failures) are never cached;
    /// the admission rate limiter absorbs repeated failing loads.
    pub async fn load(&self, profile: &str) -> SentinelResult<Arc<Policy>> {
        if let Some(policy) = self.cached(profile).await {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(policy);
        }

        let guard = self.fetch_lock(profile).await;
        let _held = guard.lock().await;

        // A coalesced waiter may find the cache already refreshed.
        if let Some(policy) = self.cached(profile).await {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(policy);
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);

        let policy = Arc::new(self.fetch_verified(profile).await?);
        let mut cache = self.cache.write().await;
        cache.insert(
            profile.to_string(),
            CacheEntry {
                policy: Arc::clone(&policy),
                loaded_at: Instant::now(),
            },
        );
        Ok(policy)
    }

    /// Drop the cached entry for `profile`, forcing the next load to fetch.
    pub async fn invalidate(&self, profile: &str) {
        let mut cache = self.cache.write().await;
        if cache.remove(profile).is_some() {
            debug!(profile = %escape_for_log(profile), "policy cache invalidated");
        }
    }

    /// Cache statistics.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    async fn cached(&self, profile: &str) -> Option<Arc<Policy>> {
        let cache = self.cache.read().await;
        cache
            .get(profile)
            .filter(|entry| entry.loaded_at.elapsed() < self.config.ttl)
            .map(|entry| Arc::clone(&entry.policy))
    }

    async fn fetch_lock(&self, profile: &str) -> Arc<Mutex<()>> {
        let mut locks = self.fetch_locks.lock().await;
        Arc::clone(
            locks
                .entry(profile.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    async fn fetch_verified(&self, profile: &str) -> SentinelResult<Policy> {
        let blob = self.fetch_with_retry(profile).await?;

        if self.config.signature_required {
            let key_id = self
                .config
                .public_key_id
                .as_deref()
                .ok_or_else(|| SentinelError::configuration("public_key_id missing"))?;
            let signature = match self.source.fetch_signature(profile).await {
                Ok(Some(sig)) => sig,
                Ok(None) | Err(FetchError::NotFound) => {
                    return Err(SentinelError::policy(format!(
                        "SignatureMissing: no detached signature for {}",
                        escape_for_log(profile)
                    )));
                }
                Err(e) => {
                    return Err(SentinelError::policy(format!(
                        "signature fetch failed: {e}"
                    )));
                }
            };
            match self.verifier.verify(key_id, &blob, &signature).await {
                Ok(()) => {}
                Err(VerifyError::Invalid) => {
                    warn!(
                        profile = %escape_for_log(profile),
                        "policy signature verification failed"
                    );
                    return Err(SentinelError::integrity(format!(
                        "SignatureInvalid: policy signature for {} does not verify",
                        escape_for_log(profile)
                    )));
                }
                Err(VerifyError::Unavailable(detail)) => {
                    return Err(SentinelError::policy(format!(
                        "signature verifier unavailable: {detail}"
                    )));
                }
            }
        }

        parse_and_validate(&blob)
    }

    async fn fetch_with_retry(&self, profile: &str) -> SentinelResult<Vec<u8>> {
        match self.source.fetch_policy(profile).await {
            Ok(blob) => Ok(blob),
            Err(FetchError::Transient(first)) => {
                debug!(
                    profile = %escape_for_log(profile),
                    error = %first,
                    "transient policy fetch failure, retrying once"
                );
                tokio::time::sleep(self.config.retry_backoff).await;
                self.source.fetch_policy(profile).await.map_err(|second| {
                    SentinelError::policy(format!(
                        "policy fetch failed after retry: {second}"
                    ))
                })
            }
            Err(FetchError::NotFound) => Err(SentinelError::policy(format!(
                "no policy for profile {}",
                escape_for_log(profile)
            ))),
            Err(FetchError::Other(detail)) => {
                Err(SentinelError::policy(format!("policy fetch failed: {detail}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use std::sync::atomic::AtomicUsize;

    const DOC: &str = r#"
version: "1"
rules:
  - name: allow-alice
    effect: allow
    condition:
      users: [alice]
"#;

    struct StaticSource {
        policy: Vec<u8>,
        signature: Option<Vec<u8>>,
        fetches: AtomicUsize,
        transient_failures: AtomicUsize,
    }

    impl StaticSource {
        fn new(policy: &[u8], signature: Option<Vec<u8>>) -> Self {
            Self {
                policy: policy.to_vec(),
                signature,
                fetches: AtomicUsize::new(0),
                transient_failures: AtomicUsize::new(0),
            }
        }

        fn failing_first(policy: &[u8], failures: usize) -> Self {
            let source = Self::new(policy, None);
            source.transient_failures.store(failures, Ordering::SeqCst);
            source
        }
    }

    #[async_trait]
    impl PolicySource for StaticSource {
        async fn fetch_policy(&self, _profile: &str) -> Result<Vec<u8>, FetchError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let remaining = self.transient_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.transient_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(FetchError::Transient("store blip".into()));
            }
            Ok(self.policy.clone())
        }

        async fn fetch_signature(&self, _profile: &str) -> Result<Option<Vec<u8>>, FetchError> {
            Ok(self.signature.clone())
        }
    }

    struct NoopVerifier;

    #[async_trait]
    impl SignatureVerifier for NoopVerifier {
        async fn verify(&self, _: &str, _: &[u8], _: &[u8]) -> Result<(), VerifyError> {
            Ok(())
        }
    }

    fn unsigned_loader(source: Arc<dyn PolicySource>) -> PolicyLoader {
        PolicyLoader::new(
            LoaderConfig::server(false, None),
            source,
            Arc::new(NoopVerifier),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn caches_within_ttl() {
        let source = Arc::new(StaticSource::new(DOC.as_bytes(), None));
        let loader = unsigned_loader(Arc::clone(&source) as Arc<dyn PolicySource>);

        let first = loader.load("staging").await.unwrap();
        let second = loader.load("staging").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(loader.stats().hits(), 1);
        assert_eq!(loader.stats().misses(), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_refetch() {
        let source = Arc::new(StaticSource::new(DOC.as_bytes(), None));
        let loader = unsigned_loader(Arc::clone(&source) as Arc<dyn PolicySource>);

        loader.load("staging").await.unwrap();
        loader.invalidate("staging").await;
        loader.load("staging").await.unwrap();
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn transient_failure_retries_once_then_succeeds() {
        let source = Arc::new(StaticSource::failing_first(DOC.as_bytes(), 1));
        let loader = unsigned_loader(Arc::clone(&source) as Arc<dyn PolicySource>);
        assert!(loader.load("staging").await.is_ok());
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn two_transient_failures_fail_closed() {
        let source = Arc::new(StaticSource::failing_first(DOC.as_bytes(), 2));
        let loader = unsigned_loader(Arc::clone(&source) as Arc<dyn PolicySource>);
        let err = loader.load("staging").await.unwrap_err();
        assert!(matches!(err, SentinelError::Policy { .. }));
        // Failure was not cached: a later load fetches again and succeeds.
        assert!(loader.load("staging").await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_loads_coalesce_to_one_fetch() {
        let source = Arc::new(StaticSource::new(DOC.as_bytes(), None));
        let loader = Arc::new(unsigned_loader(Arc::clone(&source) as Arc<dyn PolicySource>));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let loader = Arc::clone(&loader);
            handles.push(tokio::spawn(async move { loader.load("staging").await }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn verified_load_round_trip() {
        let signing = SigningKey::from_bytes(&[42u8; 32]);
        let signature = signing.sign(DOC.as_bytes()).to_bytes().to_vec();
        let source = Arc::new(StaticSource::new(DOC.as_bytes(), Some(signature)));
        let verifier = Arc::new(Ed25519Verifier::new("sentinel-signing-1", signing.verifying_key()));
        let loader = PolicyLoader::new(
            LoaderConfig::server(true, Some("sentinel-signing-1".into())),
            source,
            verifier,
        )
        .unwrap();

        assert!(loader.load("staging").await.is_ok());
    }

    #[tokio::test]
    async fn tampered_blob_is_integrity_failure() {
        let signing = SigningKey::from_bytes(&[42u8; 32]);
        let signature = signing.sign(DOC.as_bytes()).to_bytes().to_vec();
        let tampered = DOC.replace("allow", "deny");
        let source = Arc::new(StaticSource::new(tampered.as_bytes(), Some(signature)));
        let verifier = Arc::new(Ed25519Verifier::new("sentinel-signing-1", signing.verifying_key()));
        let loader = PolicyLoader::new(
            LoaderConfig::server(true, Some("sentinel-signing-1".into())),
            source,
            verifier,
        )
        .unwrap();

        let err = loader.load("staging").await.unwrap_err();
        assert!(matches!(err, SentinelError::Integrity { .. }));
    }

    #[tokio::test]
    async fn missing_signature_fails_when_required() {
        let source = Arc::new(StaticSource::new(DOC.as_bytes(), None));
        let verifier = Arc::new(NoopVerifier);
        let loader = PolicyLoader::new(
            LoaderConfig::server(true, Some("sentinel-signing-1".into())),
            source,
            verifier,
        )
        .unwrap();

        let err = loader.load("staging").await.unwrap_err();
        assert!(err.to_string().contains("SignatureMissing"));
    }
}
