//! Account collaborator
//!
//! Storage, network accounting and log submission belong to the account
//! layer. The call context only threads values through to it.

use crate::types::{CallId, DerivedState, NetworkUsageDelta};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Account-scoped services used during call setup and teardown
#[async_trait]
pub trait CallAccount: Send + Sync {
    /// Root directory of the account's local storage
    fn base_path(&self) -> PathBuf;

    /// Add traffic produced by a call to the account's usage statistics
    async fn record_call_network_usage(&self, delta: NetworkUsageDelta) -> anyhow::Result<()>;

    /// Replace the stored engine derived state
    async fn store_derived_state(&self, state: DerivedState) -> anyhow::Result<()>;

    /// Submit a call's stats log to the server for diagnostics
    async fn submit_call_debug_log(&self, call_id: CallId, log: String) -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
struct MemoryAccountState {
    usage: NetworkUsageDelta,
    usage_reports: usize,
    derived_state: Option<DerivedState>,
    submitted_logs: Vec<(CallId, String)>,
}

/// Account keeping everything in memory, rooted at a directory on disk
#[derive(Debug, Clone)]
pub struct MemoryAccount {
    base_path: PathBuf,
    state: Arc<Mutex<MemoryAccountState>>,
}

impl MemoryAccount {
    /// Create an account rooted at `base_path`
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
            state: Arc::new(Mutex::new(MemoryAccountState::default())),
        }
    }

    /// Accumulated call traffic
    pub fn network_usage(&self) -> NetworkUsageDelta {
        self.state.lock().usage
    }

    /// Number of usage reports received
    pub fn usage_reports(&self) -> usize {
        self.state.lock().usage_reports
    }

    /// Last stored derived state
    pub fn derived_state(&self) -> Option<DerivedState> {
        self.state.lock().derived_state.clone()
    }

    /// Logs submitted so far
    pub fn submitted_logs(&self) -> Vec<(CallId, String)> {
        self.state.lock().submitted_logs.clone()
    }
}

#[async_trait]
impl CallAccount for MemoryAccount {
    fn base_path(&self) -> PathBuf {
        self.base_path.clone()
    }

    async fn record_call_network_usage(&self, delta: NetworkUsageDelta) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        state.usage.wifi.incoming += delta.wifi.incoming;
        state.usage.wifi.outgoing += delta.wifi.outgoing;
        state.usage.cellular.incoming += delta.cellular.incoming;
        state.usage.cellular.outgoing += delta.cellular.outgoing;
        state.usage_reports += 1;
        Ok(())
    }

    async fn store_derived_state(&self, derived_state: DerivedState) -> anyhow::Result<()> {
        self.state.lock().derived_state = Some(derived_state);
        Ok(())
    }

    async fn submit_call_debug_log(&self, call_id: CallId, log: String) -> anyhow::Result<()> {
        self.state.lock().submitted_logs.push((call_id, log));
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::DirectionUsage;

    #[tokio::test]
    async fn test_memory_account_accumulates_usage() {
        let account = MemoryAccount::new("/tmp/account");
        let delta = NetworkUsageDelta {
            cellular: DirectionUsage { incoming: 10, outgoing: 20 },
            wifi: DirectionUsage { incoming: 1, outgoing: 2 },
        };
        account.record_call_network_usage(delta).await.unwrap();
        account.record_call_network_usage(delta).await.unwrap();

        let usage = account.network_usage();
        assert_eq!(usage.cellular.incoming, 20);
        assert_eq!(usage.wifi.outgoing, 4);
        assert_eq!(account.usage_reports(), 2);
        assert_eq!(account.base_path(), PathBuf::from("/tmp/account"));
    }

    #[tokio::test]
    async fn test_memory_account_stores_derived_state() {
        let account = MemoryAccount::new("/tmp/account");
        assert!(account.derived_state().is_none());
        account
            .store_derived_state(DerivedState::new(vec![1u8, 2, 3]))
            .await
            .unwrap();
        assert_eq!(account.derived_state(), Some(DerivedState::new(vec![1u8, 2, 3])));
    }
}
