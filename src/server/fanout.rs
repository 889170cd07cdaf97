//! Fan-out of artifacts to every connected consumer
//!
//! Used in broadcast delivery mode. A single pump task drains the artifact
//! channel and publishes each artifact on a tokio broadcast channel:
//! - when the broadcast buffer is full, the oldest artifact is dropped
//! - slow consumers lag behind and skip ahead instead of blocking fast ones
//! - artifacts share one `Bytes` buffer, so publishing is zero-copy

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::BoundedChannel;
use crate::frame::Artifact;

/// Statistics for monitoring artifact distribution
#[derive(Debug, Clone, serde::Serialize)]
pub struct FanoutStats {
    pub published: u64,
    pub unobserved: u64,
    pub subscribers: usize,
}

/// Broadcast distributor for artifacts
pub struct ArtifactDistributor {
    tx: RwLock<Option<broadcast::Sender<Artifact>>>,
    published: AtomicU64,
    unobserved: AtomicU64,
}

impl ArtifactDistributor {
    /// Create a new distributor buffering at most `capacity` artifacts per
    /// subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);

        info!("Artifact distributor created with capacity {}", capacity);

        Self {
            tx: RwLock::new(Some(tx)),
            published: AtomicU64::new(0),
            unobserved: AtomicU64::new(0),
        }
    }

    /// Publish an artifact to all current subscribers.
    ///
    /// Returns the number of subscribers it was delivered to; an artifact
    /// published with no subscribers is simply dropped.
    pub fn publish(&self, artifact: Artifact) -> usize {
        let guard = self.tx.read();
        let Some(tx) = guard.as_ref() else {
            return 0;
        };

        match tx.send(artifact) {
            Ok(n) => {
                self.published.fetch_add(1, Ordering::Relaxed);
                debug!("Artifact published to {} subscribers", n);
                n
            }
            Err(_) => {
                self.unobserved.fetch_add(1, Ordering::Relaxed);
                0
            }
        }
    }

    /// Subscribe to artifacts published from now on.
    ///
    /// Returns `None` once the distributor is closed.
    pub fn subscribe(&self) -> Option<ArtifactReceiver> {
        let rx = self.tx.read().as_ref()?.subscribe();
        debug!("New subscriber added, total subscribers: {}", self.subscriber_count());
        Some(ArtifactReceiver { rx })
    }

    /// Get current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx
            .read()
            .as_ref()
            .map_or(0, broadcast::Sender::receiver_count)
    }

    /// Drops the sender so every subscriber observes the end of the stream
    pub fn close(&self) {
        self.tx.write().take();
    }

    pub fn stats(&self) -> FanoutStats {
        FanoutStats {
            published: self.published.load(Ordering::Relaxed),
            unobserved: self.unobserved.load(Ordering::Relaxed),
            subscribers: self.subscriber_count(),
        }
    }

    /// Spawns the pump that moves artifacts from `artifacts` to subscribers
    /// until the channel is closed.
    pub fn spawn_pump(
        self: &Arc<Self>,
        artifacts: Arc<BoundedChannel<Artifact>>,
    ) -> JoinHandle<()> {
        let distributor = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(artifact) = artifacts.take().await {
                distributor.publish(artifact);
            }
            distributor.close();
            info!("Artifact distributor stopped");
        })
    }
}

/// One consumer's view of the broadcast
pub struct ArtifactReceiver {
    rx: broadcast::Receiver<Artifact>,
}

impl ArtifactReceiver {
    /// Receives the next artifact, skipping over any the consumer lagged past.
    ///
    /// Returns `None` when the distributor is closed.
    pub async fn recv(&mut self) -> Option<Artifact> {
        loop {
            match self.rx.recv().await {
                Ok(artifact) => return Some(artifact),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Consumer lagged {} artifacts", n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn artifact(seq: u64) -> Artifact {
        Artifact::new(seq, Bytes::from(format!("jpeg {}", seq)))
    }

    #[tokio::test]
    async fn test_every_subscriber_gets_every_artifact() {
        let distributor = ArtifactDistributor::new(4);
        let mut rx1 = distributor.subscribe().unwrap();
        let mut rx2 = distributor.subscribe().unwrap();

        assert_eq!(distributor.publish(artifact(1)), 2);

        let a1 = rx1.recv().await.unwrap();
        let a2 = rx2.recv().await.unwrap();
        assert_eq!(a1.sequence(), 1);
        // Both receivers share the same buffer
        assert_eq!(a1.jpeg().as_ptr(), a2.jpeg().as_ptr());
    }

    #[tokio::test]
    async fn test_slow_subscriber_skips_ahead() {
        let distributor = ArtifactDistributor::new(2);
        let mut slow = distributor.subscribe().unwrap();

        for seq in 1..=5 {
            distributor.publish(artifact(seq));
        }

        // Lagged past 1..=3, resumes at the oldest retained artifact
        assert_eq!(slow.recv().await.unwrap().sequence(), 4);
        assert_eq!(slow.recv().await.unwrap().sequence(), 5);
    }

    #[test]
    fn test_no_subscribers() {
        let distributor = ArtifactDistributor::new(4);

        assert_eq!(distributor.publish(artifact(1)), 0);
        assert_eq!(distributor.stats().unobserved, 1);
    }

    #[tokio::test]
    async fn test_pump_closes_subscribers() {
        let distributor = Arc::new(ArtifactDistributor::new(4));
        let artifacts = Arc::new(BoundedChannel::new(3));
        let mut rx = distributor.subscribe().unwrap();

        let pump = distributor.spawn_pump(Arc::clone(&artifacts));
        artifacts.put(artifact(1));
        assert_eq!(rx.recv().await.unwrap().sequence(), 1);

        artifacts.close();
        pump.await.unwrap();

        assert!(rx.recv().await.is_none());
        assert!(distributor.subscribe().is_none());
    }
}
