//! Admission control for messaging traffic
//!
//! Per-identity quotas over a minute window and an hour window. The shared
//! store keeps quotas global across gateway instances; when it is unreachable
//! the controller keeps admitting against process-local counters instead of
//! failing requests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{config::GatewayConfig, models::RateWindowState};

/// Rate limiter configuration
#[derive(Debug, Clone)]
pub struct RatePolicy {
    pub max_requests_per_minute: u32,
    pub max_requests_per_hour: u32,
    /// Idle gap after which the minute counter restarts
    pub minute_window: Duration,
    /// Lifetime of a window record from its first request
    pub hour_window: Duration,
    /// Retry hint handed to rejected callers
    pub retry_after_secs: u64,
}

impl Default for RatePolicy {
    fn default() -> Self {
        Self {
            max_requests_per_minute: 10,
            max_requests_per_hour: 100,
            minute_window: Duration::seconds(60),
            hour_window: Duration::seconds(3600),
            retry_after_secs: 60,
        }
    }
}

impl From<&GatewayConfig> for RatePolicy {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            max_requests_per_minute: config.max_requests_per_minute,
            max_requests_per_hour: config.max_requests_per_hour,
            minute_window: Duration::seconds(config.minute_window_secs),
            hour_window: Duration::seconds(config.hour_window_secs),
            retry_after_secs: config.retry_after_secs,
        }
    }
}

/// Which quota a rejected request ran into, with the count that tripped it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exceeded {
    Minute(u32),
    Hour(u32),
}

/// Verdict for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Denied { reason: String, retry_after: u64 },
}

impl Admission {
    pub fn denied(exceeded: Exceeded, policy: &RatePolicy) -> Self {
        let reason = match exceeded {
            Exceeded::Minute(count) => format!(
                "Rate limited: {}/{} requests/min",
                count, policy.max_requests_per_minute
            ),
            Exceeded::Hour(count) => format!(
                "Rate limited: {}/{} requests/hour",
                count, policy.max_requests_per_hour
            ),
        };

        Admission::Denied {
            reason,
            retry_after: policy.retry_after_secs,
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }
}

/// Apply the quota policy to the stored state
///
/// Returns the state to write back, or the quota that was exceeded. A
/// rejected request leaves the state untouched.
pub fn evaluate(
    state: Option<RateWindowState>,
    now: DateTime<Utc>,
    policy: &RatePolicy,
) -> Result<RateWindowState, Exceeded> {
    let Some(state) = state else {
        return Ok(RateWindowState::first(now));
    };

    let minute_count = if now - state.last_request > policy.minute_window {
        1
    } else if state.minute_count >= policy.max_requests_per_minute {
        return Err(Exceeded::Minute(state.minute_count));
    } else {
        state.minute_count + 1
    };

    if state.hour_count >= policy.max_requests_per_hour {
        return Err(Exceeded::Hour(state.hour_count));
    }

    Ok(RateWindowState {
        minute_count,
        hour_count: state.hour_count + 1,
        last_request: now,
    })
}

/// Backing store for rate windows
#[async_trait]
pub trait RateWindowStore: Send + Sync {
    /// Current window for `identity`; `None` once its record has expired
    async fn get(&self, identity: &str, now: DateTime<Utc>) -> Result<Option<RateWindowState>>;

    /// Evaluate the policy and record the request as one atomic step
    async fn increment(
        &self,
        identity: &str,
        now: DateTime<Utc>,
        policy: &RatePolicy,
    ) -> Result<Admission>;

    async fn reset(&self, identity: &str) -> Result<()>;
}

/// Rate window entry with its TTL
#[derive(Debug)]
struct RateWindowEntry {
    state: RateWindowState,
    /// Set once when the record is created, like the cache TTL
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct RateWindows {
    entries: HashMap<String, RateWindowEntry>,
    /// Expired entries are purged in bulk no more than once per minute window
    next_sweep: Option<DateTime<Utc>>,
}

impl RateWindows {
    fn evict_expired(&mut self, now: DateTime<Utc>, policy: &RatePolicy) {
        if self.next_sweep.is_none_or(|at| now >= at) {
            self.entries.retain(|_, entry| entry.expires_at > now);
            self.next_sweep = Some(now + policy.minute_window);
        }
    }
}

/// Process-local rate windows
///
/// Consistent within one process only.
#[derive(Debug, Clone, Default)]
pub struct MemoryRateWindowStore {
    windows: Arc<Mutex<RateWindows>>,
}

impl MemoryRateWindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Infallible form of [`RateWindowStore::increment`]
    pub async fn record(&self, identity: &str, now: DateTime<Utc>, policy: &RatePolicy) -> Admission {
        let mut windows = self.windows.lock().await;
        windows.evict_expired(now, policy);

        let live = match windows
            .entries
            .get(identity)
            .map(|entry| (entry.state, entry.expires_at))
        {
            Some((_, expires_at)) if expires_at <= now => {
                windows.entries.remove(identity);
                None
            }
            live => live,
        };

        match evaluate(live.map(|(state, _)| state), now, policy) {
            Ok(state) => {
                let expires_at = live
                    .map(|(_, expires_at)| expires_at)
                    .unwrap_or(now + policy.hour_window);
                windows
                    .entries
                    .insert(identity.to_string(), RateWindowEntry { state, expires_at });
                Admission::Allowed
            }
            Err(exceeded) => Admission::denied(exceeded, policy),
        }
    }

    #[cfg(test)]
    async fn tracked_identities(&self) -> usize {
        self.windows.lock().await.entries.len()
    }
}

#[async_trait]
impl RateWindowStore for MemoryRateWindowStore {
    async fn get(&self, identity: &str, now: DateTime<Utc>) -> Result<Option<RateWindowState>> {
        let windows = self.windows.lock().await;
        Ok(windows
            .entries
            .get(identity)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.state))
    }

    async fn increment(
        &self,
        identity: &str,
        now: DateTime<Utc>,
        policy: &RatePolicy,
    ) -> Result<Admission> {
        Ok(self.record(identity, now, policy).await)
    }

    async fn reset(&self, identity: &str) -> Result<()> {
        self.windows.lock().await.entries.remove(identity);
        Ok(())
    }
}

/// Admission controller
#[derive(Clone)]
pub struct AdmissionController {
    /// Shared store; `None` runs in single-instance mode
    primary: Option<Arc<dyn RateWindowStore>>,
    fallback: MemoryRateWindowStore,
    policy: RatePolicy,
    degraded: Arc<AtomicBool>,
}

impl AdmissionController {
    /// Enforce quotas in a shared store, degrading to local counters on failure
    pub fn new(primary: Arc<dyn RateWindowStore>, policy: RatePolicy) -> Self {
        Self {
            primary: Some(primary),
            fallback: MemoryRateWindowStore::new(),
            policy,
            degraded: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Enforce quotas in this process only
    pub fn local(policy: RatePolicy) -> Self {
        Self {
            primary: None,
            fallback: MemoryRateWindowStore::new(),
            policy,
            degraded: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Decide whether a request from `identity` may proceed
    pub async fn check(&self, identity: &str, now: DateTime<Utc>) -> Admission {
        if let Some(primary) = &self.primary {
            match primary.increment(identity, now, &self.policy).await {
                Ok(admission) => {
                    if self.degraded.swap(false, Ordering::SeqCst) {
                        info!("Shared rate limit store recovered, quotas are global again");
                    }
                    return admission;
                }
                Err(e) => {
                    if !self.degraded.swap(true, Ordering::SeqCst) {
                        warn!(
                            "Shared rate limit store unavailable, quotas now enforced per instance only: {}",
                            e
                        );
                    } else {
                        debug!("Shared rate limit store still unavailable: {}", e);
                    }
                }
            }
        }

        self.fallback.record(identity, now, &self.policy).await
    }

    /// Whether the last shared-store call failed
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// Get the rate limiter configuration
    pub fn policy(&self) -> &RatePolicy {
        &self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn start() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    struct FailingStore {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RateWindowStore for FailingStore {
        async fn get(
            &self,
            _identity: &str,
            _now: DateTime<Utc>,
        ) -> Result<Option<RateWindowState>> {
            anyhow::bail!("connection refused")
        }

        async fn increment(
            &self,
            _identity: &str,
            _now: DateTime<Utc>,
            _policy: &RatePolicy,
        ) -> Result<Admission> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("connection refused")
        }

        async fn reset(&self, _identity: &str) -> Result<()> {
            anyhow::bail!("connection refused")
        }
    }

    #[test]
    fn test_first_request_initializes_counters() {
        let state = evaluate(None, start(), &RatePolicy::default()).unwrap();
        assert_eq!(state, RateWindowState::first(start()));
    }

    #[test]
    fn test_minute_limit_rejects_without_touching_state() {
        let policy = RatePolicy::default();
        let state = RateWindowState {
            minute_count: 10,
            hour_count: 10,
            last_request: start(),
        };

        let verdict = evaluate(Some(state), start() + Duration::seconds(30), &policy);
        assert_eq!(verdict, Err(Exceeded::Minute(10)));
        assert_eq!(
            Admission::denied(Exceeded::Minute(10), &policy),
            Admission::Denied {
                reason: "Rate limited: 10/10 requests/min".to_string(),
                retry_after: 60,
            }
        );
    }

    #[test]
    fn test_minute_counter_resets_after_idle_window() {
        let policy = RatePolicy::default();
        let state = RateWindowState {
            minute_count: 10,
            hour_count: 10,
            last_request: start(),
        };

        // exactly 60s is still inside the window
        let at_boundary = evaluate(Some(state), start() + Duration::seconds(60), &policy);
        assert_eq!(at_boundary, Err(Exceeded::Minute(10)));

        let later = start() + Duration::seconds(61);
        let next = evaluate(Some(state), later, &policy).unwrap();
        assert_eq!(next.minute_count, 1);
        assert_eq!(next.hour_count, 11);
        assert_eq!(next.last_request, later);
    }

    #[test]
    fn test_hour_limit_applies_even_after_minute_reset() {
        let policy = RatePolicy::default();
        let state = RateWindowState {
            minute_count: 3,
            hour_count: 100,
            last_request: start(),
        };

        let verdict = evaluate(Some(state), start() + Duration::seconds(120), &policy);
        assert_eq!(verdict, Err(Exceeded::Hour(100)));
        assert_eq!(
            Admission::denied(Exceeded::Hour(100), &policy),
            Admission::Denied {
                reason: "Rate limited: 100/100 requests/hour".to_string(),
                retry_after: 60,
            }
        );
    }

    #[tokio::test]
    async fn test_memory_store_admits_ten_then_rejects() {
        let store = MemoryRateWindowStore::new();
        let policy = RatePolicy::default();

        for i in 0..10 {
            let now = start() + Duration::seconds(i);
            assert!(store.record("+90555", now, &policy).await.is_allowed());
        }

        let eleventh = store
            .record("+90555", start() + Duration::seconds(10), &policy)
            .await;
        assert!(!eleventh.is_allowed());

        // other identities are unaffected
        assert!(store.record("+90556", start(), &policy).await.is_allowed());
    }

    #[tokio::test]
    async fn test_memory_store_evicts_record_after_hour_ttl() {
        let store = MemoryRateWindowStore::new();
        let policy = RatePolicy {
            max_requests_per_hour: 2,
            ..RatePolicy::default()
        };

        assert!(store.record("p", start(), &policy).await.is_allowed());
        assert!(store.record("p", start() + Duration::seconds(70), &policy).await.is_allowed());
        assert!(!store.record("p", start() + Duration::seconds(140), &policy).await.is_allowed());

        let after_ttl = start() + Duration::seconds(3601);
        assert!(store.record("p", after_ttl, &policy).await.is_allowed());
    }

    #[tokio::test]
    async fn test_reset_clears_identity() {
        let store = MemoryRateWindowStore::new();
        let policy = RatePolicy::default();

        store.record("p", start(), &policy).await;
        assert!(store.get("p", start()).await.unwrap().is_some());

        store.reset("p").await.unwrap();
        assert!(store.get("p", start()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_follows_caller_clock() {
        let store = MemoryRateWindowStore::new();
        let policy = RatePolicy::default();

        store.record("p", start(), &policy).await;
        assert!(store.get("p", start() + Duration::seconds(3599)).await.unwrap().is_some());
        assert!(store.get("p", start() + Duration::seconds(3600)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_windows_are_dropped_from_memory() {
        let store = MemoryRateWindowStore::new();
        let policy = RatePolicy::default();

        for i in 0..1000 {
            store.record(&format!("+90{}", i), start(), &policy).await;
        }
        assert_eq!(store.tracked_identities().await, 1000);

        store
            .record("+90late", start() + Duration::hours(5), &policy)
            .await;
        assert_eq!(store.tracked_identities().await, 1);
    }

    #[tokio::test]
    async fn test_expired_window_is_replaced_on_lookup() {
        let store = MemoryRateWindowStore::new();
        let policy = RatePolicy::default();

        store.record("p", start(), &policy).await;
        store.record("q", start() + Duration::seconds(3599), &policy).await;
        // no bulk sweep is due yet; the stale key is dropped on lookup
        store.record("p", start() + Duration::seconds(3630), &policy).await;

        let state = store
            .get("p", start() + Duration::seconds(3630))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state, RateWindowState::first(start() + Duration::seconds(3630)));
    }

    #[tokio::test]
    async fn test_controller_degrades_to_local_counters() {
        let failing = Arc::new(FailingStore {
            calls: AtomicUsize::new(0),
        });
        let controller = AdmissionController::new(failing.clone(), RatePolicy::default());

        for i in 0..10 {
            let admission = controller.check("p", start() + Duration::seconds(i)).await;
            assert!(admission.is_allowed());
        }
        assert!(controller.is_degraded());

        let eleventh = controller.check("p", start() + Duration::seconds(11)).await;
        assert!(!eleventh.is_allowed());
        assert_eq!(failing.calls.load(Ordering::SeqCst), 11);
    }

    #[tokio::test]
    async fn test_local_controller_is_never_degraded() {
        let controller = AdmissionController::local(RatePolicy::default());
        assert!(controller.check("p", start()).await.is_allowed());
        assert!(!controller.is_degraded());
    }
}
