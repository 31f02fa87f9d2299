//! Symmetric key lifecycle.
//!
//! The key manager owns the only copy of the current key in memory and is the
//! only writer of the credential store. Rotation is single-flight: concurrent
//! callers that find the key missing or expired queue behind one exchange and
//! share its outcome.
//!
//! ```text
//! MISSING ──acquire──▶ ACQUIRING ──ok──▶ VALID ──expiry──▶ EXPIRED
//!    ▲                     │                ▲                 │
//!    └──────failure────────┘                └──ok── REFRESHING◀┘
//! ```
//!
//! A failed exchange puts the state back where it was. The exchange runs on
//! its own task, so a caller that is cancelled while waiting does not abort
//! it; the outcome is kept for the next caller.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::GatewayConfig;
use crate::crypto::{open_json, KeyUnwrap, PayloadCipher};
use crate::envelope::{DataBlock, Envelope, Interface};
use crate::error::{GatewayError, GatewayResult};
use crate::http::AuthorityHttp;
use crate::store::CredentialStore;
use crate::types::{
    Credentials, KeyMaterial, KeyPhase, KeyStatus, KeyStatusReport, ReturnClass,
};

/// A key issued by the Authority.
#[derive(Debug, Clone)]
pub struct IssuedKey {
    pub key: KeyMaterial,
    /// Lifetime stated by the Authority, if any.
    pub ttl: Option<Duration>,
}

/// Obtains a new key from the Authority.
#[async_trait]
pub trait KeyExchange: Debug + Send + Sync {
    async fn exchange(&self) -> GatewayResult<IssuedKey>;
}

/// T104 key exchange over the Authority endpoint.
#[derive(Debug)]
pub(crate) struct AuthorityKeyExchange {
    http: AuthorityHttp,
    cipher: Arc<dyn PayloadCipher>,
    unwrap: Arc<dyn KeyUnwrap>,
}

impl AuthorityKeyExchange {
    pub(crate) fn new(
        http: AuthorityHttp,
        cipher: Arc<dyn PayloadCipher>,
        unwrap: Arc<dyn KeyUnwrap>,
    ) -> Self {
        Self {
            http,
            cipher,
            unwrap,
        }
    }
}

#[async_trait]
impl KeyExchange for AuthorityKeyExchange {
    async fn exchange(&self) -> GatewayResult<IssuedKey> {
        let envelope = Envelope::request(
            self.http.config(),
            Interface::KeyExchange,
            DataBlock::default(),
            self.http.clock().now(),
        );
        let reply = self
            .http
            .exchange(Interface::KeyExchange, &envelope, None)
            .await?;

        let info = &reply.envelope.return_state_info;
        match reply.class {
            ReturnClass::Success => {}
            ReturnClass::Retriable => {
                return Err(GatewayError::busy(
                    info.return_code.clone(),
                    info.return_message.clone(),
                ));
            }
            _ => {
                return Err(GatewayError::KeyStale {
                    code: info.return_code.clone(),
                    message: info.return_message.clone(),
                });
            }
        }

        let payload = open_json(self.cipher.as_ref(), None, &reply.envelope.data)?
            .ok_or_else(|| GatewayError::integrity("key exchange reply has no content"))?;
        let wrapped = payload
            .get("passowrdDes")
            .and_then(serde_json::Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| GatewayError::integrity("key exchange reply carries no key"))?;

        let key = self.unwrap.unwrap_key(wrapped)?;
        let ttl = payload
            .get("expiresIn")
            .and_then(|v| v.as_i64().or_else(|| v.as_str()?.trim().parse().ok()))
            .filter(|secs| *secs > 0)
            .map(Duration::seconds);

        Ok(IssuedKey { key, ttl })
    }
}

#[derive(Debug)]
struct KeyState {
    credentials: Credentials,
    phase: KeyPhase,
    /// Completed exchanges, successful or not.
    attempt: u64,
    last_outcome: Option<GatewayResult<KeyMaterial>>,
}

#[derive(Debug)]
struct Inner {
    state: RwLock<KeyState>,
    flight: Arc<Mutex<()>>,
    exchange: Arc<dyn KeyExchange>,
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
    margin: Duration,
    default_ttl: Duration,
    exchanges: AtomicU64,
}

/// Key manager. Clones share state.
#[derive(Debug, Clone)]
pub struct KeyManager {
    inner: Arc<Inner>,
}

fn phase_for(status: KeyStatus) -> KeyPhase {
    match status {
        KeyStatus::Missing => KeyPhase::Missing,
        KeyStatus::Valid => KeyPhase::Valid,
        KeyStatus::Expired => KeyPhase::Expired,
    }
}

/// Config seconds as a duration, capped at a century.
fn secs(value: u64) -> Duration {
    const MAX_SECS: u64 = 100 * 365 * 24 * 60 * 60;
    Duration::seconds(value.min(MAX_SECS) as i64)
}

impl KeyManager {
    /// Start from the persisted credentials, if any.
    ///
    /// A stored key issued for another device number is discarded.
    pub async fn load(
        config: &GatewayConfig,
        exchange: Arc<dyn KeyExchange>,
        store: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
    ) -> GatewayResult<Self> {
        let credentials = match store.load().await? {
            Some(stored) if stored.device_no == config.device_no => Credentials {
                server_url: config.server_url.clone(),
                ..stored
            },
            Some(stored) => {
                warn!(
                    stored_device = %stored.device_no,
                    device = %config.device_no,
                    "stored key belongs to another device, discarding"
                );
                Credentials::empty(&config.server_url, &config.device_no)
            }
            None => Credentials::empty(&config.server_url, &config.device_no),
        };

        let phase = phase_for(credentials.status_at(clock.now()));
        debug!(phase = ?phase, "key manager loaded");

        Ok(Self {
            inner: Arc::new(Inner {
                state: RwLock::new(KeyState {
                    credentials,
                    phase,
                    attempt: 0,
                    last_outcome: None,
                }),
                flight: Arc::new(Mutex::new(())),
                exchange,
                store,
                clock,
                margin: secs(config.key_refresh_margin_secs),
                default_ttl: secs(config.key_ttl_secs),
                exchanges: AtomicU64::new(0),
            }),
        })
    }

    /// Return a usable key, acquiring or refreshing it first if needed.
    ///
    /// A fresh key is returned without any coordination. Otherwise exactly
    /// one exchange runs and every concurrent caller gets its outcome.
    pub async fn ensure_fresh_key(&self) -> GatewayResult<KeyMaterial> {
        let observed = {
            let state = self.inner.read_state();
            let now = self.inner.clock.now();
            if state.credentials.is_fresh_at(now, self.inner.margin) {
                if let Some(key) = &state.credentials.key {
                    return Ok(key.clone());
                }
            }
            state.attempt
        };
        self.rotate(observed, false).await
    }

    /// Replace the key regardless of its expiry.
    pub async fn force_refresh(&self) -> GatewayResult<KeyMaterial> {
        let observed = self.inner.read_state().attempt;
        self.rotate(observed, true).await
    }

    /// Refresh after the Authority rejected `rejected`.
    ///
    /// When the key has already been replaced since `rejected` was handed
    /// out, the current key is returned without another exchange.
    pub async fn replace_rejected(&self, rejected: &KeyMaterial) -> GatewayResult<KeyMaterial> {
        let observed = {
            let state = self.inner.read_state();
            match &state.credentials.key {
                Some(current) if current != rejected => {
                    debug!("rejected key already replaced");
                    return Ok(current.clone());
                }
                _ => state.attempt,
            }
        };
        self.rotate(observed, true).await
    }

    /// Current key state. Never includes key bytes.
    pub fn status(&self) -> KeyStatusReport {
        let state = self.inner.read_state();
        let status = state.credentials.status_at(self.inner.clock.now());
        let phase = match state.phase {
            KeyPhase::Acquiring | KeyPhase::Refreshing => state.phase,
            _ => phase_for(status),
        };
        KeyStatusReport {
            status,
            phase,
            issued_at: state.credentials.issued_at,
            expires_at: state.credentials.expires_at,
            fingerprint: state.credentials.key.as_ref().map(KeyMaterial::fingerprint),
        }
    }

    /// Number of key exchanges started so far.
    pub fn exchange_count(&self) -> u64 {
        self.inner.exchanges.load(Ordering::SeqCst)
    }

    async fn rotate(&self, observed: u64, forced: bool) -> GatewayResult<KeyMaterial> {
        let guard = self.inner.flight.clone().lock_owned().await;

        {
            let state = self.inner.read_state();
            if state.attempt != observed {
                if let Some(outcome) = &state.last_outcome {
                    debug!(forced, "sharing outcome of concurrent key exchange");
                    return outcome.clone();
                }
            }
        }

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let _guard = guard;
            inner.run_exchange(forced).await
        });

        task.await.unwrap_or_else(|e| {
            Err(GatewayError::KeyStale {
                code: String::new(),
                message: format!("key exchange task failed: {}", e),
            })
        })
    }
}

impl Inner {
    fn read_state(&self) -> RwLockReadGuard<'_, KeyState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, KeyState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Runs with the flight lock held.
    async fn run_exchange(&self, forced: bool) -> GatewayResult<KeyMaterial> {
        let base = {
            let mut state = self.write_state();
            state.phase = if state.credentials.key.is_some() {
                KeyPhase::Refreshing
            } else {
                KeyPhase::Acquiring
            };
            info!(phase = ?state.phase, forced, "requesting new key");
            state.credentials.clone()
        };
        self.exchanges.fetch_add(1, Ordering::SeqCst);

        let result = self.exchange.exchange().await.map_err(as_key_failure);
        let now = self.clock.now();

        let outcome = result.map(|issued| {
            let ttl = issued.ttl.unwrap_or(self.default_ttl);
            Credentials {
                key: Some(issued.key),
                issued_at: Some(now),
                expires_at: Some(now + ttl),
                ..base
            }
        });

        let published = {
            let mut state = self.write_state();
            state.attempt += 1;
            let published = match outcome {
                Ok(credentials) => {
                    state.credentials = credentials.clone();
                    state.phase = KeyPhase::Valid;
                    Ok(credentials)
                }
                Err(e) => {
                    state.phase = phase_for(state.credentials.status_at(now));
                    Err(e)
                }
            };
            state.last_outcome = Some(match &published {
                Ok(credentials) => key_of(credentials),
                Err(e) => Err(e.clone()),
            });
            published
        };

        match published {
            Ok(credentials) => {
                info!(
                    fingerprint = %credentials.key.as_ref().map(KeyMaterial::fingerprint).unwrap_or_default(),
                    expires_at = ?credentials.expires_at,
                    "key rotated"
                );
                if let Err(e) = self.store.save(&credentials).await {
                    warn!(error = %e, "failed to persist new key; keeping it in memory");
                }
                key_of(&credentials)
            }
            Err(e) => {
                warn!(error = %e, "key exchange failed");
                Err(e)
            }
        }
    }
}

fn key_of(credentials: &Credentials) -> GatewayResult<KeyMaterial> {
    credentials.key.clone().ok_or_else(|| GatewayError::KeyStale {
        code: String::new(),
        message: "no key issued".to_string(),
    })
}

/// Exchange failures surface as `KeyStale`; transport failures keep their kind.
fn as_key_failure(err: GatewayError) -> GatewayError {
    match err {
        GatewayError::Transport { .. } | GatewayError::KeyStale { .. } => err,
        other => GatewayError::KeyStale {
            code: other.code().unwrap_or_default().to_string(),
            message: format!("key exchange failed: {}", other),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryCredentialStore;
    use chrono::Utc;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    #[derive(Debug, Default)]
    struct FakeExchange {
        calls: AtomicUsize,
        fail: AtomicBool,
        delay_ms: u64,
        ttl: Option<Duration>,
    }

    #[async_trait]
    impl KeyExchange for FakeExchange {
        async fn exchange(&self) -> GatewayResult<IssuedKey> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.delay_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(GatewayError::AuthorityRejected {
                    code: "2100".into(),
                    message: "device not registered".into(),
                });
            }
            Ok(IssuedKey {
                key: KeyMaterial::new(vec![n as u8; 16]),
                ttl: self.ttl,
            })
        }
    }

    #[derive(Debug)]
    struct BrokenStore;

    #[async_trait]
    impl CredentialStore for BrokenStore {
        async fn load(&self) -> GatewayResult<Option<Credentials>> {
            Ok(None)
        }

        async fn save(&self, _credentials: &Credentials) -> GatewayResult<()> {
            Err(GatewayError::store("disk full"))
        }
    }

    fn config() -> GatewayConfig {
        GatewayConfig::default().with_device("TCS0001", "1000000000")
    }

    async fn manager(
        exchange: Arc<FakeExchange>,
        store: Arc<dyn CredentialStore>,
        clock: &ManualClock,
    ) -> KeyManager {
        KeyManager::load(&config(), exchange, store, Arc::new(clock.clone()))
            .await
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_exchange() {
        let exchange = Arc::new(FakeExchange {
            delay_ms: 100,
            ..FakeExchange::default()
        });
        let clock = ManualClock::new(Utc::now());
        let keys = manager(exchange.clone(), Arc::new(MemoryCredentialStore::new()), &clock).await;

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let keys = keys.clone();
                tokio::spawn(async move { keys.ensure_fresh_key().await })
            })
            .collect();

        let mut fingerprints = Vec::new();
        for handle in handles {
            fingerprints.push(handle.await.unwrap().unwrap().fingerprint());
        }

        assert_eq!(exchange.calls.load(Ordering::SeqCst), 1);
        assert!(fingerprints.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(keys.status().phase, KeyPhase::Valid);
    }

    #[tokio::test]
    async fn test_refresh_only_after_expiry() {
        let exchange = Arc::new(FakeExchange {
            ttl: Some(Duration::hours(1)),
            ..FakeExchange::default()
        });
        let clock = ManualClock::new(Utc::now());
        let keys = manager(exchange.clone(), Arc::new(MemoryCredentialStore::new()), &clock).await;

        let first = keys.ensure_fresh_key().await.unwrap();
        clock.advance(Duration::minutes(1));
        assert_eq!(keys.ensure_fresh_key().await.unwrap(), first);
        assert_eq!(exchange.calls.load(Ordering::SeqCst), 1);

        clock.advance(Duration::minutes(60));
        assert_eq!(keys.status().status, KeyStatus::Expired);
        let second = keys.ensure_fresh_key().await.unwrap();
        assert_ne!(second, first);
        assert_eq!(exchange.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_key() {
        let exchange = Arc::new(FakeExchange::default());
        let clock = ManualClock::new(Utc::now());
        let store = MemoryCredentialStore::new();
        let keys = manager(exchange.clone(), Arc::new(store.clone()), &clock).await;

        let first = keys.ensure_fresh_key().await.unwrap();
        exchange.fail.store(true, Ordering::SeqCst);

        let err = keys.force_refresh().await.unwrap_err();
        assert!(matches!(err, GatewayError::KeyStale { ref code, .. } if code == "2100"));
        assert_eq!(keys.status().phase, KeyPhase::Valid);
        assert_eq!(keys.ensure_fresh_key().await.unwrap(), first);
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_acquire_returns_to_missing() {
        let exchange = Arc::new(FakeExchange::default());
        exchange.fail.store(true, Ordering::SeqCst);
        let clock = ManualClock::new(Utc::now());
        let keys = manager(exchange.clone(), Arc::new(MemoryCredentialStore::new()), &clock).await;

        assert!(keys.ensure_fresh_key().await.is_err());
        let status = keys.status();
        assert_eq!(status.phase, KeyPhase::Missing);
        assert_eq!(status.fingerprint, None);

        // the next caller tries again rather than reusing the failure
        exchange.fail.store(false, Ordering::SeqCst);
        assert!(keys.ensure_fresh_key().await.is_ok());
        assert_eq!(exchange.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_store_failure_does_not_fail_rotation() {
        let exchange = Arc::new(FakeExchange::default());
        let clock = ManualClock::new(Utc::now());
        let keys = manager(exchange, Arc::new(BrokenStore), &clock).await;

        assert!(keys.ensure_fresh_key().await.is_ok());
        assert_eq!(keys.status().status, KeyStatus::Valid);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancelled_caller_does_not_abort_exchange() {
        let exchange = Arc::new(FakeExchange {
            delay_ms: 200,
            ..FakeExchange::default()
        });
        let clock = ManualClock::new(Utc::now());
        let store = MemoryCredentialStore::new();
        let keys = manager(exchange.clone(), Arc::new(store.clone()), &clock).await;

        let caller = {
            let keys = keys.clone();
            tokio::spawn(async move { keys.ensure_fresh_key().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        caller.abort();

        assert!(keys.ensure_fresh_key().await.is_ok());
        assert_eq!(exchange.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn test_replace_rejected_skips_already_rotated_key() {
        let exchange = Arc::new(FakeExchange::default());
        let clock = ManualClock::new(Utc::now());
        let keys = manager(exchange.clone(), Arc::new(MemoryCredentialStore::new()), &clock).await;

        let first = keys.ensure_fresh_key().await.unwrap();
        let second = keys.replace_rejected(&first).await.unwrap();
        assert_ne!(first, second);

        // a late rejection of the old key does not rotate again
        let again = keys.replace_rejected(&first).await.unwrap();
        assert_eq!(again, second);
        assert_eq!(exchange.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_load_discards_key_of_other_device() {
        let now = Utc::now();
        let mut stored = Credentials::empty("https://efris.example", "OTHER01");
        stored.key = Some(KeyMaterial::new(vec![1; 16]));
        stored.expires_at = Some(now + Duration::hours(1));

        let clock = ManualClock::new(now);
        let keys = manager(
            Arc::new(FakeExchange::default()),
            Arc::new(MemoryCredentialStore::with_credentials(stored.clone())),
            &clock,
        )
        .await;
        assert_eq!(keys.status().status, KeyStatus::Missing);

        stored.device_no = "TCS0001".into();
        let keys = manager(
            Arc::new(FakeExchange::default()),
            Arc::new(MemoryCredentialStore::with_credentials(stored)),
            &clock,
        )
        .await;
        assert_eq!(keys.status().status, KeyStatus::Valid);
        assert_eq!(keys.exchange_count(), 0);
    }
}
