// Rollout Controller - feature flags with stable percentage cohorts and canary monitoring

mod canary;

pub use canary::MonitorError;

use crate::application::constants::DEFAULT_PROBE_TIMEOUT;
use crate::application::outbox::NotificationOutbox;
use crate::domain::{CallerContext, RolloutFlag, TargetingRule};
use crate::error::{AppError, Result};
use crate::port::{ErrorRateFeed, FlagStore, HealthProbe, TimeProvider};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

use canary::CanaryEntry;

/// Deterministic bucket in [0, 1) for a (flag, caller) pair
pub fn stable_bucket(flag: &str, caller_id: &str) -> f64 {
    let digest = Sha256::digest(format!("{}:{}", flag, caller_id).as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    // Top 53 bits fit an f64 mantissa exactly
    (u64::from_be_bytes(prefix) >> 11) as f64 / (1u64 << 53) as f64
}

/// Owns rollout flags (write-through cache over the flag store) and active canaries
pub struct RolloutController {
    flags: RwLock<HashMap<String, RolloutFlag>>,
    store: Arc<dyn FlagStore>,
    health_probe: Arc<dyn HealthProbe>,
    error_rate: Arc<dyn ErrorRateFeed>,
    outbox: NotificationOutbox,
    time_provider: Arc<dyn TimeProvider>,
    probe_timeout: Duration,
    canaries: Mutex<HashMap<String, CanaryEntry>>,
    /// Serializes canary start/finish against each other
    transition: tokio::sync::Mutex<()>,
}

impl RolloutController {
    pub fn new(
        store: Arc<dyn FlagStore>,
        health_probe: Arc<dyn HealthProbe>,
        error_rate: Arc<dyn ErrorRateFeed>,
        outbox: NotificationOutbox,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            flags: RwLock::new(HashMap::new()),
            store,
            health_probe,
            error_rate,
            outbox,
            time_provider,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            canaries: Mutex::new(HashMap::new()),
            transition: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    /// Restore flags and canary records from the store (daemon startup). Canaries
    /// still monitoring lost their window and are rolled back. Returns the number of
    /// flags loaded.
    pub async fn load(&self) -> Result<usize> {
        let stored = self.store.list().await?;
        let count = {
            let mut flags = self.flags.write().await;
            flags.clear();
            for flag in stored {
                flags.insert(flag.name.clone(), flag);
            }
            flags.len()
        };
        info!(count = count, "Rollout flags loaded");

        let interrupted = self.restore_canaries().await?;
        if interrupted > 0 {
            warn!(count = interrupted, "Interrupted canaries rolled back");
        }
        Ok(count)
    }

    /// Create or replace a flag's percentage and targeting; the flag ends up enabled
    pub async fn create_or_update_flag(
        &self,
        name: &str,
        rollout_percentage: u32,
        targeting_rules: Vec<TargetingRule>,
    ) -> Result<RolloutFlag> {
        let now = self.time_provider.now_millis();
        let mut flags = self.flags.write().await;

        let flag = match flags.get(name) {
            Some(existing) => {
                let mut updated = existing.clone();
                updated.update(rollout_percentage, targeting_rules, now)?;
                updated
            }
            None => RolloutFlag::new(name, rollout_percentage, targeting_rules, now)?,
        };

        self.store.upsert(&flag).await?;
        flags.insert(flag.name.clone(), flag.clone());

        info!(
            flag = %flag.name,
            rollout_percentage = flag.rollout_percentage,
            rules = flag.targeting_rules.len(),
            "Rollout flag saved"
        );
        Ok(flag)
    }

    /// Whether `ctx` is inside the flag's cohort. Missing or disabled flags are off.
    pub async fn is_enabled(&self, name: &str, ctx: &CallerContext) -> bool {
        let flags = self.flags.read().await;
        let Some(flag) = flags.get(name) else {
            return false;
        };

        let bucket = match ctx.caller_id.as_deref() {
            Some(caller_id) => stable_bucket(name, caller_id),
            None => rand::random::<f64>(),
        };
        flag.admits(bucket, ctx)
    }

    pub async fn get_flag(&self, name: &str) -> Option<RolloutFlag> {
        self.flags.read().await.get(name).cloned()
    }

    /// All flags, sorted by name
    pub async fn list_flags(&self) -> Vec<RolloutFlag> {
        let mut flags: Vec<RolloutFlag> = self.flags.read().await.values().cloned().collect();
        flags.sort_by(|a, b| a.name.cmp(&b.name));
        flags
    }

    /// Full rollout; store failure leaves the cache untouched
    async fn promote_flag(&self, name: &str) -> Result<RolloutFlag> {
        let now = self.time_provider.now_millis();
        let mut flags = self.flags.write().await;
        let mut flag = flags
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("flag {}", name)))?;

        flag.promote(now);
        self.store.upsert(&flag).await?;
        flags.insert(name.to_string(), flag.clone());
        Ok(flag)
    }

    /// Disable the flag. The cache is updated even if persisting fails, so callers
    /// stop seeing the rolled-back path immediately.
    async fn roll_back_flag(&self, name: &str) -> Result<()> {
        let now = self.time_provider.now_millis();
        let mut flags = self.flags.write().await;
        let Some(flag) = flags.get_mut(name) else {
            return Err(AppError::NotFound(format!("flag {}", name)));
        };

        flag.roll_back(now);
        let snapshot = flag.clone();
        drop(flags);

        if let Err(e) = self.store.upsert(&snapshot).await {
            warn!(flag = name, error = %e, "Rollback not persisted");
            return Err(e);
        }
        Ok(())
    }

    fn canaries(&self) -> MutexGuard<'_, HashMap<String, CanaryEntry>> {
        self.canaries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RuleOperator;
    use crate::port::flag_store::mocks::InMemoryFlagStore;
    use crate::port::health::mocks::{FixedErrorRate, ScriptedHealthProbe};
    use crate::port::time_provider::mocks::ManualTimeProvider;

    fn controller(store: Arc<InMemoryFlagStore>) -> RolloutController {
        let (outbox, _relay) = NotificationOutbox::new(8);
        RolloutController::new(
            store,
            Arc::new(ScriptedHealthProbe::healthy()),
            Arc::new(FixedErrorRate::new(0.0)),
            outbox,
            Arc::new(ManualTimeProvider::new(0)),
        )
    }

    #[test]
    fn test_bucket_is_stable_and_in_range() {
        let a = stable_bucket("new_checkout", "tech-17");
        assert_eq!(a, stable_bucket("new_checkout", "tech-17"));
        assert!((0.0..1.0).contains(&a));

        // Keyed by flag as well as caller
        let buckets: Vec<f64> = (0..20)
            .map(|i| stable_bucket(&format!("flag_{}", i), "tech-17"))
            .collect();
        assert!(buckets.iter().any(|b| (b - a).abs() > f64::EPSILON));
    }

    #[test]
    fn test_bucket_distribution_is_roughly_uniform() {
        let inside = (0..10_000)
            .filter(|i| stable_bucket("parts_lookup", &format!("caller-{}", i)) < 0.25)
            .count();
        assert!((2_200..2_800).contains(&inside), "inside = {}", inside);
    }

    #[tokio::test]
    async fn test_missing_flag_is_disabled() {
        let rollout = controller(Arc::new(InMemoryFlagStore::new()));
        assert!(!rollout.is_enabled("nope", &CallerContext::new("u1")).await);
    }

    #[tokio::test]
    async fn test_is_enabled_is_stable() {
        let rollout = controller(Arc::new(InMemoryFlagStore::new()));
        rollout
            .create_or_update_flag("new_invoice", 50, vec![])
            .await
            .unwrap();

        for i in 0..50 {
            let ctx = CallerContext::new(format!("shop-{}", i));
            let first = rollout.is_enabled("new_invoice", &ctx).await;
            for _ in 0..5 {
                assert_eq!(rollout.is_enabled("new_invoice", &ctx).await, first);
            }
        }
    }

    #[tokio::test]
    async fn test_raising_percentage_keeps_enabled_callers() {
        let rollout = controller(Arc::new(InMemoryFlagStore::new()));
        rollout.create_or_update_flag("f", 10, vec![]).await.unwrap();

        let callers: Vec<CallerContext> =
            (0..500).map(|i| CallerContext::new(format!("c{}", i))).collect();
        let mut enabled_at_10 = Vec::new();
        for ctx in &callers {
            if rollout.is_enabled("f", ctx).await {
                enabled_at_10.push(ctx.clone());
            }
        }
        assert!(!enabled_at_10.is_empty());

        rollout.create_or_update_flag("f", 40, vec![]).await.unwrap();
        for ctx in &enabled_at_10 {
            assert!(rollout.is_enabled("f", ctx).await);
        }
    }

    #[tokio::test]
    async fn test_targeting_and_anonymous_callers() {
        let rollout = controller(Arc::new(InMemoryFlagStore::new()));
        rollout
            .create_or_update_flag(
                "north_only",
                100,
                vec![TargetingRule {
                    attribute: "shop".into(),
                    operator: RuleOperator::Equals,
                    values: vec!["north".into()],
                }],
            )
            .await
            .unwrap();

        let north = CallerContext::anonymous().with_attribute("shop", "north");
        let south = CallerContext::new("u2").with_attribute("shop", "south");
        assert!(rollout.is_enabled("north_only", &north).await);
        assert!(!rollout.is_enabled("north_only", &south).await);
    }

    #[tokio::test]
    async fn test_write_through_and_load() {
        let store = Arc::new(InMemoryFlagStore::new());
        let rollout = controller(store.clone());
        rollout.create_or_update_flag("a", 30, vec![]).await.unwrap();

        assert!(matches!(
            rollout.create_or_update_flag("a", 130, vec![]).await,
            Err(AppError::Domain(_))
        ));

        store.fail_writes(true);
        assert!(rollout.create_or_update_flag("a", 60, vec![]).await.is_err());
        assert_eq!(rollout.get_flag("a").await.unwrap().rollout_percentage, 30);
        store.fail_writes(false);

        let restarted = controller(store);
        assert_eq!(restarted.load().await.unwrap(), 1);
        assert_eq!(restarted.list_flags().await[0].rollout_percentage, 30);
    }
}
