use std::sync::atomic::{AtomicUsize, Ordering};

use tessera_api::{LoadBalancer, NodeId};

/// Cycles through the known nodes in order.
#[derive(Debug, Default)]
pub struct RoundRobin {
    next: AtomicUsize,
}

impl LoadBalancer for RoundRobin {
    fn pick(&self, nodes: &[NodeId]) -> Option<NodeId> {
        if nodes.is_empty() {
            return None;
        }
        let i = self.next.fetch_add(1, Ordering::Relaxed);
        Some(nodes[i % nodes.len()])
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use super::*;

    #[test]
    fn cycles_and_handles_empty() {
        let nodes: Vec<NodeId> = (1..=3)
            .map(|i| SocketAddr::from(([10, 0, 0, i], 9042)))
            .collect();
        let policy = RoundRobin::default();
        let picked: Vec<_> = (0..6).filter_map(|_| policy.pick(&nodes)).collect();
        assert_eq!(picked, [nodes.clone(), nodes.clone()].concat());
        assert_eq!(policy.pick(&[]), None);
    }
}
