//! Issuance and verification state machine.
//!
//! Flow Overview:
//! 1) `check_restrictions`: lockout, spam lock, cooldown (in that order).
//! 2) `track_request`: count requests in a sliding window; escalate to spam lock.
//! 3) `issue_code`: claim the cooldown, dispatch, then store the code.
//! 4) `verify_code`: compare, count failures, escalate to lockout.
//!
//! `request_code` runs all three issuance steps but claims the cooldown before
//! counting, so a request that loses the claim is not counted.
//! `authorize_reset` and `consume_reset` manage the one-shot marker between a
//! verified password-reset code and the reset itself.
//!
//! The engine keeps no in-process state; everything lives in the store.

use anyhow::Context;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tracing::{debug, error, info, instrument, warn};

use super::dispatch::{Dispatcher, OtpMessage, OtpTemplate};
use super::error::OtpError;
use super::policy::{OtpKeys, OtpPolicy};
use super::store::ThrottleStore;

const CODE_MIN: u32 = 1000;
const CODE_MAX: u32 = 9999;
const FLAG_LOCKED: &str = "locked";
const FLAG_COOLDOWN: &str = "true";
const FLAG_RESET_OK: &str = "true";

/// Generate a 4-digit numeric code, uniform in `[1000, 9999]`.
#[must_use]
pub fn generate_code() -> String {
    rand::thread_rng().gen_range(CODE_MIN..=CODE_MAX).to_string()
}

pub struct OtpEngine {
    store: Arc<dyn ThrottleStore>,
    dispatcher: Arc<dyn Dispatcher>,
    policy: OtpPolicy,
}

impl OtpEngine {
    #[must_use]
    pub fn new(
        store: Arc<dyn ThrottleStore>,
        dispatcher: Arc<dyn Dispatcher>,
        policy: OtpPolicy,
    ) -> Self {
        Self {
            store,
            dispatcher,
            policy: policy.normalize(),
        }
    }

    #[must_use]
    pub fn policy(&self) -> &OtpPolicy {
        &self.policy
    }

    pub(crate) fn store(&self) -> &dyn ThrottleStore {
        self.store.as_ref()
    }

    /// Gate that must pass before any issuance. Has no side effects.
    ///
    /// # Errors
    /// `Locked`, `SpamLocked` or `CooldownActive` for the first flag found,
    /// `Store` if the store cannot be read.
    #[instrument(skip(self))]
    pub async fn check_restrictions(&self, identifier: &str) -> Result<(), OtpError> {
        let keys = OtpKeys::new(identifier);

        if self.is_set(&keys.lock).await? {
            debug!("issuance blocked by failed-attempt lock");
            return Err(OtpError::Locked {
                retry_after: self.policy.lock(),
            });
        }
        if self.is_set(&keys.spam_lock).await? {
            debug!("issuance blocked by spam lock");
            return Err(OtpError::SpamLocked {
                retry_after: self.policy.spam_lock(),
            });
        }
        if self.is_set(&keys.cooldown).await? {
            debug!("issuance blocked by cooldown");
            return Err(OtpError::CooldownActive {
                retry_after: self.policy.cooldown(),
            });
        }

        Ok(())
    }

    /// Count an issuance request; the request after `request_limit` prior
    /// ones sets the spam lock instead of incrementing.
    ///
    /// # Errors
    /// `SpamLocked` when the limit is reached, `Store` on store failure.
    #[instrument(skip(self))]
    pub async fn track_request(&self, identifier: &str) -> Result<(), OtpError> {
        let keys = OtpKeys::new(identifier);

        // Every increment refreshes the TTL, so the window slides with the latest request.
        let counted = self
            .store
            .incr_capped(
                &keys.request_count,
                self.policy.request_limit(),
                self.policy.request_window(),
            )
            .await
            .map_err(OtpError::Store)?;

        if counted.is_none() {
            self.store
                .set_if_absent(&keys.spam_lock, FLAG_LOCKED, self.policy.spam_lock())
                .await
                .map_err(OtpError::Store)?;
            warn!("otp spam lock set");
            return Err(OtpError::SpamLocked {
                retry_after: self.policy.spam_lock(),
            });
        }

        Ok(())
    }

    /// Generate, dispatch and store a new code, replacing any previous one.
    ///
    /// The cooldown flag is claimed atomically before dispatch so concurrent
    /// requests for the same identifier cannot both send a code. A dispatch
    /// failure releases the claim and stores nothing.
    ///
    /// # Errors
    /// `CooldownActive` if the claim is lost, `Dispatch` if delivery fails,
    /// `Store` on store failure.
    #[instrument(skip(self, display_name))]
    pub async fn issue_code(
        &self,
        identifier: &str,
        display_name: &str,
        template: OtpTemplate,
    ) -> Result<(), OtpError> {
        let keys = OtpKeys::new(identifier);
        self.claim_cooldown(&keys).await?;
        self.deliver(&keys, identifier, display_name, template).await
    }

    /// Restriction check, request tracking and issuance in one call.
    ///
    /// The cooldown is claimed before the request is counted and released
    /// again if tracking fails.
    ///
    /// # Errors
    /// Any error of the three steps; later steps do not run after a failure.
    pub async fn request_code(
        &self,
        identifier: &str,
        display_name: &str,
        template: OtpTemplate,
    ) -> Result<(), OtpError> {
        self.check_restrictions(identifier).await?;

        let keys = OtpKeys::new(identifier);
        self.claim_cooldown(&keys).await?;
        if let Err(err) = self.track_request(identifier).await {
            self.release_cooldown(&keys).await;
            return Err(err);
        }
        self.deliver(&keys, identifier, display_name, template).await
    }

    async fn claim_cooldown(&self, keys: &OtpKeys) -> Result<(), OtpError> {
        let claimed = self
            .store
            .set_if_absent(&keys.cooldown, FLAG_COOLDOWN, self.policy.cooldown())
            .await
            .map_err(OtpError::Store)?;
        if claimed {
            Ok(())
        } else {
            Err(OtpError::CooldownActive {
                retry_after: self.policy.cooldown(),
            })
        }
    }

    async fn release_cooldown(&self, keys: &OtpKeys) {
        if let Err(err) = self.store.delete(&[keys.cooldown.as_str()]).await {
            error!("Failed to release otp cooldown: {err}");
        }
    }

    /// Dispatch a fresh code under an already claimed cooldown, then store it.
    async fn deliver(
        &self,
        keys: &OtpKeys,
        identifier: &str,
        display_name: &str,
        template: OtpTemplate,
    ) -> Result<(), OtpError> {
        let code = generate_code();
        let message = OtpMessage::new(identifier, display_name, template, &code);

        if let Err(err) = self.dispatcher.send(&message).await {
            self.release_cooldown(keys).await;
            return Err(OtpError::Dispatch(err));
        }

        self.store
            .set(&keys.code, &code, self.policy.code_ttl())
            .await
            .map_err(OtpError::Store)?;
        // A new code starts with a clean failure count.
        self.store
            .delete(&[keys.attempts.as_str()])
            .await
            .map_err(OtpError::Store)?;

        info!(template = template.as_str(), "otp issued");
        Ok(())
    }

    /// Check a submitted code against the active one.
    ///
    /// Success deletes the code and the failure counter. The wrong submission
    /// after `max_failed_attempts` prior ones sets the lockout and deletes both.
    ///
    /// # Errors
    /// `Locked` while locked out, `Expired` without an active code,
    /// `Incorrect` with the attempts left, `LockedOut` on escalation,
    /// `Store` on store failure.
    #[instrument(skip(self, submitted))]
    pub async fn verify_code(&self, identifier: &str, submitted: &str) -> Result<(), OtpError> {
        let keys = OtpKeys::new(identifier);

        if self.is_set(&keys.lock).await? {
            return Err(OtpError::Locked {
                retry_after: self.policy.lock(),
            });
        }

        let Some(stored) = self.store.get(&keys.code).await.map_err(OtpError::Store)? else {
            debug!("no active otp");
            return Err(OtpError::Expired);
        };

        if codes_match(&stored, submitted) {
            self.store
                .delete(&[keys.code.as_str(), keys.attempts.as_str()])
                .await
                .map_err(OtpError::Store)?;
            info!("otp verified");
            return Ok(());
        }

        let failed = self.read_counter(&keys.attempts).await?;
        let max_failed = self.policy.max_failed_attempts();

        if failed >= max_failed {
            self.store
                .set(&keys.lock, FLAG_LOCKED, self.policy.lock())
                .await
                .map_err(OtpError::Store)?;
            self.store
                .delete(&[keys.code.as_str(), keys.attempts.as_str()])
                .await
                .map_err(OtpError::Store)?;
            warn!(failed = failed + 1, "otp lockout set");
            return Err(OtpError::LockedOut {
                retry_after: self.policy.lock(),
            });
        }

        self.store
            .set(
                &keys.attempts,
                &(failed + 1).to_string(),
                self.policy.code_ttl(),
            )
            .await
            .map_err(OtpError::Store)?;

        Err(OtpError::Incorrect {
            remaining: max_failed - failed - 1,
        })
    }

    /// Allow one password reset for `identifier` within the reset window.
    ///
    /// # Errors
    /// `Store` on store failure.
    #[instrument(skip(self))]
    pub async fn authorize_reset(&self, identifier: &str) -> Result<(), OtpError> {
        let keys = OtpKeys::new(identifier);
        self.store
            .set(&keys.reset_ok, FLAG_RESET_OK, self.policy.reset_window())
            .await
            .map_err(OtpError::Store)
    }

    /// `true` while a reset authorization is pending; does not consume it.
    ///
    /// # Errors
    /// `Store` on store failure.
    pub async fn reset_authorized(&self, identifier: &str) -> Result<bool, OtpError> {
        self.is_set(&OtpKeys::new(identifier).reset_ok).await
    }

    /// Consume the reset authorization. Only one caller gets `true`.
    ///
    /// # Errors
    /// `Store` on store failure.
    #[instrument(skip(self))]
    pub async fn consume_reset(&self, identifier: &str) -> Result<bool, OtpError> {
        let keys = OtpKeys::new(identifier);
        self.store
            .take(&keys.reset_ok)
            .await
            .map(|marker| marker.is_some())
            .map_err(OtpError::Store)
    }

    async fn is_set(&self, key: &str) -> Result<bool, OtpError> {
        self.store
            .get(key)
            .await
            .map(|value| value.is_some())
            .map_err(OtpError::Store)
    }

    /// Absent counters read as zero.
    async fn read_counter(&self, key: &str) -> Result<u32, OtpError> {
        let value = self.store.get(key).await.map_err(OtpError::Store)?;
        value
            .map(|raw| {
                raw.trim()
                    .parse::<u32>()
                    .with_context(|| format!("corrupt counter at {key}: {raw:?}"))
            })
            .transpose()
            .map(Option::unwrap_or_default)
            .map_err(OtpError::Store)
    }
}

impl std::fmt::Debug for OtpEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OtpEngine")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

fn codes_match(stored: &str, submitted: &str) -> bool {
    stored.as_bytes().ct_eq(submitted.trim().as_bytes()).into()
}

/// Remaining lifetime helper for callers that surface `Retry-After`.
#[must_use]
pub fn retry_after_seconds(duration: Duration) -> u64 {
    duration.as_secs().max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::otp::dispatch::DispatchFuture;
    use crate::otp::store::MemoryThrottleStore;
    use anyhow::{Result, anyhow};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingDispatcher {
        sent: Mutex<Vec<OtpMessage>>,
        fail: bool,
    }

    impl RecordingDispatcher {
        fn failing() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        fn last_code(&self) -> Option<String> {
            self.sent
                .lock()
                .ok()
                .and_then(|sent| sent.last().map(|m| m.variables.otp.clone()))
        }

        fn count(&self) -> usize {
            self.sent.lock().map(|sent| sent.len()).unwrap_or(0)
        }
    }

    impl Dispatcher for RecordingDispatcher {
        fn send<'a>(&'a self, message: &'a OtpMessage) -> DispatchFuture<'a> {
            Box::pin(async move {
                if self.fail {
                    return Err(anyhow!("smtp down"));
                }
                self.sent
                    .lock()
                    .map_err(|_| anyhow!("poisoned"))?
                    .push(message.clone());
                Ok(())
            })
        }
    }

    fn engine() -> (OtpEngine, Arc<MemoryThrottleStore>, Arc<RecordingDispatcher>) {
        let store = Arc::new(MemoryThrottleStore::new());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let engine = OtpEngine::new(store.clone(), dispatcher.clone(), OtpPolicy::new());
        (engine, store, dispatcher)
    }

    const ID: &str = "a@x.com";

    #[test]
    fn generated_codes_are_four_digits() {
        for _ in 0..1000 {
            let code = generate_code();
            assert_eq!(code.len(), 4);
            let value: u32 = code.parse().unwrap_or(0);
            assert!((CODE_MIN..=CODE_MAX).contains(&value));
        }
    }

    #[test]
    fn codes_match_ignores_surrounding_whitespace() {
        assert!(codes_match("4821", " 4821\n"));
        assert!(!codes_match("4821", "4822"));
        assert!(!codes_match("4821", "48210"));
        assert!(!codes_match("4821", ""));
    }

    #[tokio::test]
    async fn issue_stores_code_and_cooldown() -> Result<()> {
        let (engine, store, dispatcher) = engine();
        engine
            .issue_code(ID, "Alice", OtpTemplate::UserActivation)
            .await?;

        let keys = OtpKeys::new(ID);
        assert_eq!(store.get(&keys.code).await?, dispatcher.last_code());
        assert_eq!(store.ttl(&keys.code).await, Some(Duration::from_secs(300)));
        assert_eq!(store.ttl(&keys.cooldown).await, Some(Duration::from_secs(60)));
        Ok(())
    }

    #[tokio::test]
    async fn second_issue_within_cooldown_fails() -> Result<()> {
        let (engine, store, dispatcher) = engine();
        engine
            .issue_code(ID, "Alice", OtpTemplate::UserActivation)
            .await?;

        let err = engine
            .issue_code(ID, "Alice", OtpTemplate::UserActivation)
            .await;
        assert!(matches!(err, Err(OtpError::CooldownActive { .. })));
        assert!(matches!(
            engine.check_restrictions(ID).await,
            Err(OtpError::CooldownActive { .. })
        ));
        assert_eq!(dispatcher.count(), 1);

        store.advance(Duration::from_secs(60)).await;
        engine.check_restrictions(ID).await?;
        engine
            .issue_code(ID, "Alice", OtpTemplate::UserActivation)
            .await?;
        assert_eq!(dispatcher.count(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn dispatch_failure_leaves_no_state() -> Result<()> {
        let store = Arc::new(MemoryThrottleStore::new());
        let engine = OtpEngine::new(
            store.clone(),
            Arc::new(RecordingDispatcher::failing()),
            OtpPolicy::new(),
        );

        let result = engine
            .issue_code(ID, "Alice", OtpTemplate::UserActivation)
            .await;
        assert!(matches!(result, Err(OtpError::Dispatch(_))));
        assert!(store.is_empty().await);
        engine.check_restrictions(ID).await?;
        Ok(())
    }

    #[tokio::test]
    async fn third_request_in_window_sets_spam_lock() -> Result<()> {
        let (engine, store, _dispatcher) = engine();
        let keys = OtpKeys::new(ID);

        engine.track_request(ID).await?;
        engine.track_request(ID).await?;
        assert_eq!(store.get(&keys.request_count).await?.as_deref(), Some("2"));

        let result = engine.track_request(ID).await;
        assert!(matches!(result, Err(OtpError::SpamLocked { .. })));
        // The counter is not incremented once the lock takes over.
        assert_eq!(store.get(&keys.request_count).await?.as_deref(), Some("2"));
        assert_eq!(store.ttl(&keys.spam_lock).await, Some(Duration::from_secs(3600)));
        Ok(())
    }

    #[tokio::test]
    async fn request_window_slides_with_each_request() -> Result<()> {
        let (engine, store, _dispatcher) = engine();
        let keys = OtpKeys::new(ID);

        engine.track_request(ID).await?;
        store.advance(Duration::from_secs(3000)).await;
        engine.track_request(ID).await?;
        store.advance(Duration::from_secs(3000)).await;

        // 6000s after the first request the counter is still alive.
        assert_eq!(store.get(&keys.request_count).await?.as_deref(), Some("2"));
        store.advance(Duration::from_secs(600)).await;
        assert_eq!(store.get(&keys.request_count).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn restriction_order_is_lock_spam_cooldown() -> Result<()> {
        let (engine, store, _dispatcher) = engine();
        let keys = OtpKeys::new(ID);
        let ttl = Duration::from_secs(600);

        store.set(&keys.cooldown, "true", ttl).await?;
        assert!(matches!(
            engine.check_restrictions(ID).await,
            Err(OtpError::CooldownActive { .. })
        ));

        store.set(&keys.spam_lock, "locked", ttl).await?;
        assert!(matches!(
            engine.check_restrictions(ID).await,
            Err(OtpError::SpamLocked { .. })
        ));

        store.set(&keys.lock, "locked", ttl).await?;
        assert!(matches!(
            engine.check_restrictions(ID).await,
            Err(OtpError::Locked { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn verify_success_clears_code_and_failures() -> Result<()> {
        let (engine, store, dispatcher) = engine();
        engine
            .issue_code(ID, "Alice", OtpTemplate::UserActivation)
            .await?;
        let code = dispatcher.last_code().unwrap_or_default();

        engine.verify_code(ID, &code).await?;

        let keys = OtpKeys::new(ID);
        assert!(!store.contains(&keys.code).await);
        assert!(!store.contains(&keys.attempts).await);
        assert!(matches!(
            engine.verify_code(ID, &code).await,
            Err(OtpError::Expired)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn verify_without_code_is_expired() {
        let (engine, _store, _dispatcher) = engine();
        assert!(matches!(
            engine.verify_code(ID, "1234").await,
            Err(OtpError::Expired)
        ));
    }

    #[tokio::test]
    async fn wrong_codes_escalate_to_lockout() -> Result<()> {
        let (engine, store, dispatcher) = engine();
        engine
            .issue_code(ID, "Alice", OtpTemplate::UserActivation)
            .await?;
        let code = dispatcher.last_code().unwrap_or_default();
        let wrong = if code == "1000" { "1001" } else { "1000" };

        assert!(matches!(
            engine.verify_code(ID, wrong).await,
            Err(OtpError::Incorrect { remaining: 1 })
        ));
        assert!(matches!(
            engine.verify_code(ID, wrong).await,
            Err(OtpError::Incorrect { remaining: 0 })
        ));
        assert!(matches!(
            engine.verify_code(ID, wrong).await,
            Err(OtpError::LockedOut { .. })
        ));

        let keys = OtpKeys::new(ID);
        assert!(!store.contains(&keys.code).await);
        assert!(!store.contains(&keys.attempts).await);
        assert_eq!(store.ttl(&keys.lock).await, Some(Duration::from_secs(1800)));

        // Locked even with the right code, and for issuance.
        assert!(matches!(
            engine.verify_code(ID, &code).await,
            Err(OtpError::Locked { .. })
        ));
        assert!(matches!(
            engine.check_restrictions(ID).await,
            Err(OtpError::Locked { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_counter_is_a_store_error() -> Result<()> {
        let (engine, store, _dispatcher) = engine();
        let keys = OtpKeys::new(ID);
        store
            .set(&keys.request_count, "many", Duration::from_secs(60))
            .await?;
        assert!(matches!(
            engine.track_request(ID).await,
            Err(OtpError::Store(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_requests_count_once() -> Result<()> {
        let store = Arc::new(MemoryThrottleStore::new());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let engine = Arc::new(OtpEngine::new(
            store.clone(),
            dispatcher.clone(),
            OtpPolicy::new(),
        ));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .request_code(ID, "Alice", OtpTemplate::UserActivation)
                    .await
            }));
        }
        for handle in handles {
            match handle.await? {
                Ok(()) | Err(OtpError::CooldownActive { .. }) => {}
                Err(other) => return Err(anyhow!("unexpected error: {other}")),
            }
        }

        let keys = OtpKeys::new(ID);
        assert_eq!(dispatcher.count(), 1);
        assert_eq!(store.get(&keys.request_count).await?.as_deref(), Some("1"));
        Ok(())
    }

    #[tokio::test]
    async fn spam_locked_request_releases_cooldown_claim() -> Result<()> {
        let (engine, store, dispatcher) = engine();
        let keys = OtpKeys::new(ID);
        store.set(&keys.request_count, "2", Duration::from_secs(3600)).await?;

        let result = engine
            .request_code(ID, "Alice", OtpTemplate::UserActivation)
            .await;
        assert!(matches!(result, Err(OtpError::SpamLocked { .. })));
        assert!(!store.contains(&keys.cooldown).await);
        assert!(store.contains(&keys.spam_lock).await);
        assert_eq!(dispatcher.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn reset_authorization_is_single_use() -> Result<()> {
        let (engine, store, _dispatcher) = engine();
        assert!(!engine.reset_authorized(ID).await?);
        assert!(!engine.consume_reset(ID).await?);

        engine.authorize_reset(ID).await?;
        let keys = OtpKeys::new(ID);
        assert_eq!(store.ttl(&keys.reset_ok).await, Some(Duration::from_secs(600)));
        assert!(engine.reset_authorized(ID).await?);
        assert!(engine.consume_reset(ID).await?);
        assert!(!engine.consume_reset(ID).await?);

        engine.authorize_reset(ID).await?;
        store.advance(Duration::from_secs(600)).await;
        assert!(!engine.reset_authorized(ID).await?);
        Ok(())
    }

    #[test]
    fn retry_after_seconds_is_positive() {
        assert_eq!(retry_after_seconds(Duration::ZERO), 1);
        assert_eq!(retry_after_seconds(Duration::from_secs(60)), 60);
    }
}
