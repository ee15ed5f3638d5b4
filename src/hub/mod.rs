//! Live fan-out of execution events to dashboard subscribers
//!
//! The hub owns the registry of connected sessions and delivers each
//! outbound payload to all of them, isolating per-subscriber failures from
//! each other and from the caller. It is an explicitly constructed object
//! handed around by `Arc`, never process-global state: tests build as many
//! independent hubs as they need.

mod follower;
mod server;

pub use follower::{FollowTarget, PartitionFollower};
pub use server::{HubServer, HubServerConfig};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Opaque subscriber session id, monotonically increasing in registration
/// order.
pub type SessionId = u64;

/// Hub tuning knobs
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// A session whose heartbeat is older than this at sweep time is
    /// considered dead and removed.
    pub heartbeat_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(30),
        }
    }
}

/// One live subscriber.
///
/// The outbox sender is the session's transport handle: the hub owns it
/// exclusively once registered, and the receiving half lives in the
/// connection's pump task. `last_heartbeat` is refreshed on registration,
/// on every successful delivery and on transport-level liveness signals.
struct ConnectionSession {
    id: SessionId,
    outbox: mpsc::UnboundedSender<String>,
    last_heartbeat: Instant,
}

/// Counters published by the hub
#[derive(Debug, Default)]
pub struct HubStats {
    pub sessions_accepted: AtomicU64,
    pub active_sessions: AtomicU64,
    pub messages_delivered: AtomicU64,
    pub delivery_failures: AtomicU64,
    pub sessions_swept: AtomicU64,
}

impl HubStats {
    pub fn snapshot(&self) -> HubStatsSnapshot {
        HubStatsSnapshot {
            sessions_accepted: self.sessions_accepted.load(Ordering::Relaxed),
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
            messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            sessions_swept: self.sessions_swept.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`HubStats`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubStatsSnapshot {
    pub sessions_accepted: u64,
    pub active_sessions: u64,
    pub messages_delivered: u64,
    pub delivery_failures: u64,
    pub sessions_swept: u64,
}

/// Result of one broadcast call. Never an error: per-subscriber failures
/// are folded into the counts and the failing sessions removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastOutcome {
    /// Registry was empty; nothing was attempted
    NoSubscribers,
    Delivered {
        delivered: usize,
        /// Sessions dropped because their delivery failed
        dropped: usize,
        /// Sessions removed by the heartbeat sweep before delivery
        swept: usize,
    },
}

/// Registry of live subscriber sessions with heartbeat-swept best-effort
/// fan-out.
pub struct BroadcastHub {
    config: HubConfig,
    sessions: RwLock<HashMap<SessionId, ConnectionSession>>,
    next_session_id: AtomicU64,
    stats: HubStats,
}

impl BroadcastHub {
    pub fn new(config: HubConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            sessions: RwLock::new(HashMap::new()),
            next_session_id: AtomicU64::new(1),
            stats: HubStats::default(),
        })
    }

    pub fn stats(&self) -> &HubStats {
        &self.stats
    }

    /// Register a new subscriber session.
    ///
    /// The transport handshake happens before this call and must not hold
    /// any hub lock; `subscribe` itself only touches the registry. The
    /// session starts with a fresh heartbeat.
    pub async fn subscribe(&self, outbox: mpsc::UnboundedSender<String>) -> SessionId {
        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let session = ConnectionSession {
            id,
            outbox,
            last_heartbeat: Instant::now(),
        };

        let mut sessions = self.sessions.write().await;
        sessions.insert(id, session);
        self.stats.sessions_accepted.fetch_add(1, Ordering::Relaxed);
        self.stats
            .active_sessions
            .store(sessions.len() as u64, Ordering::Relaxed);

        info!(session_id = id, active = sessions.len(), "Subscriber registered");
        id
    }

    /// Remove a session. Idempotent: removing an absent session is a no-op.
    pub async fn unsubscribe(&self, id: SessionId) {
        let mut sessions = self.sessions.write().await;
        if sessions.remove(&id).is_some() {
            self.stats
                .active_sessions
                .store(sessions.len() as u64, Ordering::Relaxed);
            info!(session_id = id, active = sessions.len(), "Subscriber removed");
        }
    }

    /// Refresh a session's heartbeat (driven by transport pongs). Unknown
    /// ids are ignored.
    pub async fn touch(&self, id: SessionId) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(&id) {
            session.last_heartbeat = Instant::now();
        }
    }

    /// Current number of registered sessions
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Deliver `payload` to every live session.
    ///
    /// Sweeps stale sessions first, then fans out over a point-in-time
    /// snapshot in registration order, so a removal triggered mid-broadcast
    /// can never corrupt the iteration. Delivery is a non-blocking channel
    /// send into the session's pump task; a slow socket delays nobody else.
    /// A failed send closes only that session.
    pub async fn broadcast(&self, payload: &str) -> BroadcastOutcome {
        let now = Instant::now();

        // Sweep and snapshot under one write lock
        let (snapshot, swept) = {
            let mut sessions = self.sessions.write().await;
            if sessions.is_empty() {
                debug!("Broadcast skipped: no subscribers");
                return BroadcastOutcome::NoSubscribers;
            }

            let stale: Vec<SessionId> = sessions
                .values()
                .filter(|s| now.duration_since(s.last_heartbeat) > self.config.heartbeat_timeout)
                .map(|s| s.id)
                .collect();
            for id in &stale {
                sessions.remove(id);
                warn!(session_id = id, "Sweeping stale subscriber");
            }
            if !stale.is_empty() {
                self.stats
                    .sessions_swept
                    .fetch_add(stale.len() as u64, Ordering::Relaxed);
                self.stats
                    .active_sessions
                    .store(sessions.len() as u64, Ordering::Relaxed);
            }

            let mut snapshot: Vec<(SessionId, mpsc::UnboundedSender<String>)> = sessions
                .values()
                .map(|s| (s.id, s.outbox.clone()))
                .collect();
            snapshot.sort_by_key(|(id, _)| *id);
            (snapshot, stale.len())
        };

        let mut delivered: Vec<SessionId> = Vec::with_capacity(snapshot.len());
        let mut failed: Vec<SessionId> = Vec::new();
        for (id, outbox) in &snapshot {
            if outbox.send(payload.to_string()).is_ok() {
                delivered.push(*id);
            } else {
                failed.push(*id);
            }
        }

        // Apply removals and heartbeat refreshes to the authoritative
        // registry after iteration
        {
            let mut sessions = self.sessions.write().await;
            for id in &failed {
                if sessions.remove(id).is_some() {
                    warn!(session_id = id, "Dropping subscriber after failed delivery");
                }
            }
            for id in &delivered {
                if let Some(session) = sessions.get_mut(id) {
                    session.last_heartbeat = now;
                }
            }
            self.stats
                .active_sessions
                .store(sessions.len() as u64, Ordering::Relaxed);
        }

        self.stats
            .messages_delivered
            .fetch_add(delivered.len() as u64, Ordering::Relaxed);
        if !failed.is_empty() {
            self.stats
                .delivery_failures
                .fetch_add(failed.len() as u64, Ordering::Relaxed);
        }

        debug!(
            delivered = delivered.len(),
            dropped = failed.len(),
            swept,
            "Broadcast complete"
        );
        BroadcastOutcome::Delivered {
            delivered: delivered.len(),
            dropped: failed.len(),
            swept,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hub_with_timeout(timeout: Duration) -> Arc<BroadcastHub> {
        BroadcastHub::new(HubConfig {
            heartbeat_timeout: timeout,
        })
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers() {
        let hub = BroadcastHub::new(HubConfig::default());
        assert_eq!(hub.broadcast("X").await, BroadcastOutcome::NoSubscribers);
    }

    #[tokio::test]
    async fn test_failed_delivery_drops_only_that_session() {
        let hub = BroadcastHub::new(HubConfig::default());

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, rx2) = mpsc::unbounded_channel();
        let (tx3, mut rx3) = mpsc::unbounded_channel();
        hub.subscribe(tx1).await;
        hub.subscribe(tx2).await;
        hub.subscribe(tx3).await;

        // Second subscriber's transport is gone
        drop(rx2);

        let outcome = hub.broadcast("X").await;
        assert_eq!(
            outcome,
            BroadcastOutcome::Delivered {
                delivered: 2,
                dropped: 1,
                swept: 0
            }
        );
        assert_eq!(rx1.recv().await.unwrap(), "X");
        assert_eq!(rx3.recv().await.unwrap(), "X");
        assert_eq!(hub.session_count().await, 2);

        // Survivors keep receiving
        let outcome = hub.broadcast("Y").await;
        assert_eq!(
            outcome,
            BroadcastOutcome::Delivered {
                delivered: 2,
                dropped: 0,
                swept: 0
            }
        );
        assert_eq!(rx1.recv().await.unwrap(), "Y");
        assert_eq!(rx3.recv().await.unwrap(), "Y");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_session_swept_without_delivery() {
        let hub = hub_with_timeout(Duration::from_millis(40));

        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.subscribe(tx).await;
        tokio::time::sleep(Duration::from_millis(80)).await;

        let outcome = hub.broadcast("X").await;
        assert_eq!(
            outcome,
            BroadcastOutcome::Delivered {
                delivered: 0,
                dropped: 0,
                swept: 1
            }
        );
        assert_eq!(hub.session_count().await, 0);
        // The swept session never saw the payload
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivery_refreshes_heartbeat() {
        let hub = hub_with_timeout(Duration::from_millis(200));

        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.subscribe(tx).await;

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(matches!(
            hub.broadcast("X").await,
            BroadcastOutcome::Delivered { delivered: 1, .. }
        ));

        // Without the refresh from the first delivery this session would
        // now be past the timeout
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(matches!(
            hub.broadcast("Y").await,
            BroadcastOutcome::Delivered { delivered: 1, swept: 0, .. }
        ));
        assert_eq!(rx.recv().await.unwrap(), "X");
        assert_eq!(rx.recv().await.unwrap(), "Y");
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_keeps_session_alive() {
        let hub = hub_with_timeout(Duration::from_millis(200));

        let (tx, _rx) = mpsc::unbounded_channel();
        let id = hub.subscribe(tx).await;

        tokio::time::sleep(Duration::from_millis(120)).await;
        hub.touch(id).await;
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(matches!(
            hub.broadcast("X").await,
            BroadcastOutcome::Delivered { delivered: 1, swept: 0, .. }
        ));
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let hub = BroadcastHub::new(HubConfig::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = hub.subscribe(tx).await;

        hub.unsubscribe(id).await;
        hub.unsubscribe(id).await;
        hub.unsubscribe(9999).await;
        assert_eq!(hub.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_stats_counters() {
        let hub = BroadcastHub::new(HubConfig::default());
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, rx2) = mpsc::unbounded_channel();
        hub.subscribe(tx1).await;
        hub.subscribe(tx2).await;
        drop(rx2);

        hub.broadcast("X").await;

        let stats = hub.stats().snapshot();
        assert_eq!(stats.sessions_accepted, 2);
        assert_eq!(stats.active_sessions, 1);
        assert_eq!(stats.messages_delivered, 1);
        assert_eq!(stats.delivery_failures, 1);
    }
}
