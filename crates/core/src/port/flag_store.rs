// Flag Store Port (rollout flag and canary persistence)

use crate::domain::{CanaryState, RolloutFlag};
use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait FlagStore: Send + Sync {
    /// Insert or replace a flag by name
    async fn upsert(&self, flag: &RolloutFlag) -> Result<()>;

    async fn find(&self, name: &str) -> Result<Option<RolloutFlag>>;

    async fn list(&self) -> Result<Vec<RolloutFlag>>;

    /// Insert or replace the canary record for its flag
    async fn save_canary(&self, state: &CanaryState) -> Result<()>;

    /// Every recorded canary, oldest first
    async fn list_canaries(&self) -> Result<Vec<CanaryState>>;
}

pub mod mocks {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct InMemoryFlagStore {
        flags: Mutex<BTreeMap<String, RolloutFlag>>,
        canaries: Mutex<BTreeMap<String, CanaryState>>,
        fail_writes: AtomicBool,
        fail_canary_writes: AtomicBool,
    }

    impl InMemoryFlagStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every subsequent write fail
        pub fn fail_writes(&self, fail: bool) {
            self.fail_writes.store(fail, Ordering::SeqCst);
        }

        /// Make only canary record writes fail
        pub fn fail_canary_writes(&self, fail: bool) {
            self.fail_canary_writes.store(fail, Ordering::SeqCst);
        }

        fn check_writable(&self) -> Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(crate::AppError::Database("flag store unavailable".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl FlagStore for InMemoryFlagStore {
        async fn upsert(&self, flag: &RolloutFlag) -> Result<()> {
            self.check_writable()?;
            self.flags
                .lock()
                .unwrap()
                .insert(flag.name.clone(), flag.clone());
            Ok(())
        }

        async fn find(&self, name: &str) -> Result<Option<RolloutFlag>> {
            Ok(self.flags.lock().unwrap().get(name).cloned())
        }

        async fn list(&self) -> Result<Vec<RolloutFlag>> {
            Ok(self.flags.lock().unwrap().values().cloned().collect())
        }

        async fn save_canary(&self, state: &CanaryState) -> Result<()> {
            self.check_writable()?;
            if self.fail_canary_writes.load(Ordering::SeqCst) {
                return Err(crate::AppError::Database("canary table locked".into()));
            }
            self.canaries
                .lock()
                .unwrap()
                .insert(state.flag_name.clone(), state.clone());
            Ok(())
        }

        async fn list_canaries(&self) -> Result<Vec<CanaryState>> {
            let mut states: Vec<CanaryState> =
                self.canaries.lock().unwrap().values().cloned().collect();
            states.sort_by_key(|s| s.started_at);
            Ok(states)
        }
    }
}
