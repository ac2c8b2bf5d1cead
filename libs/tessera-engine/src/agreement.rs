use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;

use tessera_api::{NodeId, SchemaVersion, Transport, TransportError};

use crate::config::SchemaAgreementConfig;

/// Terminal state of one agreement wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaAgreement {
    /// Every reachable node reported this version.
    Converged(SchemaVersion),
    /// The wait ran out; `divergent` lists the nodes that disagreed with the
    /// majority at the last poll.
    TimedOut { divergent: Vec<NodeId> },
}

impl SchemaAgreement {
    pub fn is_converged(&self) -> bool {
        matches!(self, SchemaAgreement::Converged(_))
    }
}

enum Poll {
    Agreed(SchemaVersion),
    Divergent(Vec<NodeId>),
}

/// Polls the schema version of every known node until they agree.
///
/// The first poll is immediate; later polls follow `interval` until
/// `timeout` has elapsed. Unreachable nodes are left out of the comparison.
#[derive(Clone)]
pub struct SchemaAgreementWaiter {
    transport: Arc<dyn Transport>,
    interval: Duration,
    timeout: Duration,
}

impl SchemaAgreementWaiter {
    pub fn new(transport: Arc<dyn Transport>, interval: Duration, timeout: Duration) -> Self {
        Self {
            transport,
            interval,
            timeout,
        }
    }

    pub fn from_config(transport: Arc<dyn Transport>, config: &SchemaAgreementConfig) -> Self {
        Self::new(transport, config.interval(), config.timeout())
    }

    pub async fn wait(&self) -> SchemaAgreement {
        let started = Instant::now();
        let deadline = started + self.timeout;
        let mut divergent = Vec::new();
        let mut polls = 0u32;

        loop {
            polls += 1;
            match tokio::time::timeout_at(deadline, self.poll()).await {
                Ok(Poll::Agreed(version)) => {
                    tracing::info!(%version, polls, elapsed = ?started.elapsed(), "schema agreement reached");
                    return SchemaAgreement::Converged(version);
                }
                Ok(Poll::Divergent(nodes)) => {
                    tracing::debug!(divergent = nodes.len(), polls, "schema versions differ");
                    divergent = nodes;
                }
                Err(_) => break,
            }

            let next = Instant::now() + self.interval;
            if next >= deadline {
                break;
            }
            tokio::time::sleep_until(next).await;
        }

        tracing::warn!(
            timeout = ?self.timeout,
            polls,
            divergent = ?divergent,
            "schema agreement not reached"
        );
        SchemaAgreement::TimedOut { divergent }
    }

    async fn poll(&self) -> Poll {
        let mut tasks = JoinSet::new();
        for node in self.transport.known_nodes() {
            let transport = self.transport.clone();
            tasks.spawn(async move { (node, transport.schema_version(node).await) });
        }

        let mut by_version: HashMap<SchemaVersion, Vec<NodeId>> = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((node, Ok(version))) => by_version.entry(version).or_default().push(node),
                Ok((node, Err(TransportError::Unreachable(_)))) => {
                    tracing::debug!(%node, "node unreachable, excluded from schema agreement");
                }
                Ok((node, Err(e))) => {
                    tracing::debug!(%node, error = %e, "schema version query failed");
                }
                Err(e) => tracing::warn!(error = %e, "schema version poll task failed"),
            }
        }

        if by_version.len() == 1 {
            if let Some(version) = by_version.keys().next() {
                return Poll::Agreed(*version);
            }
        }

        // Majority version wins; ties go to the smaller version for stable output.
        let majority = by_version
            .iter()
            .max_by(|(va, a), (vb, b)| a.len().cmp(&b.len()).then(vb.cmp(va)))
            .map(|(version, _)| *version);
        let mut divergent: Vec<NodeId> = by_version
            .into_iter()
            .filter(|(version, _)| Some(*version) != majority)
            .flat_map(|(_, nodes)| nodes)
            .collect();
        divergent.sort();
        Poll::Divergent(divergent)
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tessera_api::{BoxFuture, Frame};
    use uuid::Uuid;

    use super::*;

    /// Nodes with scripted versions; `None` means unreachable.
    struct Scripted {
        versions: Mutex<Vec<(NodeId, Option<Uuid>)>>,
        polls: AtomicUsize,
    }

    impl Scripted {
        fn new(versions: Vec<Option<Uuid>>) -> Arc<Self> {
            let versions = versions
                .into_iter()
                .enumerate()
                .map(|(i, v)| (SocketAddr::from(([127, 0, 0, i as u8 + 1], 9042)), v))
                .collect();
            Arc::new(Self {
                versions: Mutex::new(versions),
                polls: AtomicUsize::new(0),
            })
        }

        fn set(&self, i: usize, version: Option<Uuid>) {
            self.versions.lock().unwrap()[i].1 = version;
        }
    }

    impl Transport for Scripted {
        fn send(&self, node: NodeId, _frame: Frame) -> BoxFuture<'_, Result<Frame, TransportError>> {
            Box::pin(async move { Err(TransportError::Unreachable(node)) })
        }

        fn known_nodes(&self) -> Vec<NodeId> {
            self.versions.lock().unwrap().iter().map(|(n, _)| *n).collect()
        }

        fn schema_version(&self, node: NodeId) -> BoxFuture<'_, Result<SchemaVersion, TransportError>> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            let version = self
                .versions
                .lock()
                .unwrap()
                .iter()
                .find(|(n, _)| *n == node)
                .and_then(|(_, v)| *v);
            Box::pin(async move { version.ok_or(TransportError::Unreachable(node)) })
        }
    }

    fn waiter(transport: Arc<Scripted>) -> SchemaAgreementWaiter {
        SchemaAgreementWaiter::new(transport, Duration::from_millis(200), Duration::from_secs(10))
    }

    #[tokio::test(start_paused = true)]
    async fn agreeing_nodes_converge_on_first_poll() {
        let v = Uuid::new_v4();
        let cluster = Scripted::new(vec![Some(v), Some(v), Some(v)]);
        let started = Instant::now();

        assert_eq!(waiter(cluster.clone()).wait().await, SchemaAgreement::Converged(v));
        assert_eq!(cluster.polls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_nodes_are_excluded() {
        let v = Uuid::new_v4();
        let cluster = Scripted::new(vec![Some(v), None, Some(v)]);
        assert!(waiter(cluster).wait().await.is_converged());
    }

    #[tokio::test(start_paused = true)]
    async fn converges_once_the_lagging_node_catches_up() {
        let (old, new) = (Uuid::new_v4(), Uuid::new_v4());
        let cluster = Scripted::new(vec![Some(new), Some(old), Some(new)]);

        let catch_up = {
            let cluster = cluster.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(500)).await;
                cluster.set(1, Some(new));
            })
        };

        let started = Instant::now();
        assert_eq!(waiter(cluster).wait().await, SchemaAgreement::Converged(new));
        assert!(started.elapsed() >= Duration::from_millis(500));
        assert!(started.elapsed() < Duration::from_secs(1));
        catch_up.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_with_the_divergent_nodes() {
        let (old, new) = (Uuid::new_v4(), Uuid::new_v4());
        let cluster = Scripted::new(vec![Some(new), Some(old), Some(new)]);
        let started = Instant::now();

        match waiter(cluster.clone()).wait().await {
            SchemaAgreement::TimedOut { divergent } => {
                assert_eq!(divergent, vec![SocketAddr::from(([127, 0, 0, 2], 9042))]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(started.elapsed() <= Duration::from_secs(10));
        // 10s / 200ms, first poll included
        assert_eq!(cluster.polls.load(Ordering::SeqCst), 50 * 3);
    }
}
