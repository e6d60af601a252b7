use crate::model::{AgentId, Capability};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

#[cfg_attr(test, mockall::automock)]
pub trait Directory: Send + Sync {
    /// Idempotent.
    fn register(&self, agent: &AgentId, capability: Capability);

    /// Snapshot of every agent currently offering `capability`.
    fn discover(&self, capability: Capability) -> Vec<AgentId>;
}

#[derive(Clone, Default)]
pub struct DiscoveryService {
    registry: Arc<RwLock<BTreeMap<Capability, BTreeSet<AgentId>>>>,
}

impl DiscoveryService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deregister(&self, agent: &AgentId, capability: Capability) -> bool {
        let mut registry = self.registry.write();
        let removed = registry
            .get_mut(&capability)
            .map(|agents| agents.remove(agent))
            .unwrap_or(false);
        if removed {
            tracing::info!(%agent, %capability, "Agent removed from discovery");
        }
        removed
    }
}

impl Directory for DiscoveryService {
    fn register(&self, agent: &AgentId, capability: Capability) {
        let inserted = self
            .registry
            .write()
            .entry(capability)
            .or_default()
            .insert(agent.clone());
        if inserted {
            tracing::info!(%agent, %capability, "Agent registered");
        }
    }

    fn discover(&self, capability: Capability) -> Vec<AgentId> {
        self.registry
            .read()
            .get(&capability)
            .map(|agents| agents.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DiscoveryPolicy {
    pub recheck_delay: Option<Duration>,
    pub expected: Option<usize>,
}

impl DiscoveryPolicy {
    pub fn once() -> Self {
        Self::default()
    }

    fn wants_recheck(&self, found: usize) -> Option<Duration> {
        let delay = self.recheck_delay?;
        match self.expected {
            Some(expected) if found >= expected => None,
            _ => Some(delay),
        }
    }
}

/// Takes one snapshot and, if the policy says it may be incomplete, a single
/// delayed second snapshot merged into the first.
pub async fn discover_with_recheck(
    directory: &dyn Directory,
    capability: Capability,
    policy: &DiscoveryPolicy,
) -> Vec<AgentId> {
    let mut found: BTreeSet<AgentId> = directory.discover(capability).into_iter().collect();

    if let Some(delay) = policy.wants_recheck(found.len()) {
        tracing::debug!(%capability, found = found.len(), "Re-checking discovery in {:?}", delay);
        tokio::time::sleep(delay).await;
        found.extend(directory.discover(capability));
    }

    found.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_idempotent() {
        let discovery = DiscoveryService::new();
        let market = AgentId::new("MarketA");
        discovery.register(&market, Capability::Market);
        discovery.register(&market, Capability::Market);

        assert_eq!(discovery.discover(Capability::Market), vec![market.clone()]);
        assert!(discovery.discover(Capability::Delivery).is_empty());

        assert!(discovery.deregister(&market, Capability::Market));
        assert!(discovery.discover(Capability::Market).is_empty());
    }

    #[tokio::test]
    async fn test_no_recheck_without_delay() {
        let mut mock = MockDirectory::new();
        mock.expect_discover()
            .times(1)
            .returning(|_| vec![AgentId::new("MarketA")]);

        let found = discover_with_recheck(&mock, Capability::Market, &DiscoveryPolicy::once()).await;
        assert_eq!(found.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_recheck_merges_results() {
        let mut calls = 0;
        let mut mock = MockDirectory::new();
        mock.expect_discover().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                vec![AgentId::new("MarketA")]
            } else {
                vec![AgentId::new("MarketB")]
            }
        });

        let policy = DiscoveryPolicy {
            recheck_delay: Some(Duration::from_millis(200)),
            expected: Some(3),
        };
        let found = discover_with_recheck(&mock, Capability::Market, &policy).await;
        assert_eq!(found, vec![AgentId::new("MarketA"), AgentId::new("MarketB")]);
    }

    #[tokio::test]
    async fn test_recheck_skipped_when_expected_count_met() {
        let mut mock = MockDirectory::new();
        mock.expect_discover()
            .times(1)
            .returning(|_| vec![AgentId::new("DeliveryBolt"), AgentId::new("DeliveryUber")]);

        let policy = DiscoveryPolicy {
            recheck_delay: Some(Duration::from_secs(5)),
            expected: Some(2),
        };
        let found = discover_with_recheck(&mock, Capability::Delivery, &policy).await;
        assert_eq!(found.len(), 2);
    }
}
