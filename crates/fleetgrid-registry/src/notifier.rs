//! Change notifier — pushes process group configuration to online workers.
//!
//! Mutations call [`ChangeNotifier::notify_group_changed`] after their
//! transaction commits. That only enqueues the group id on a bounded channel;
//! it never waits for delivery. A [`Dispatcher`] running on its own task
//! drains the queue, loads the group's current snapshot from the state store
//! and fans it out to every online, active worker bound to the group through
//! a [`WorkerTransport`].
//!
//! Delivery is best-effort. Failures are logged and never retried here; the
//! transport owns reliability. Re-delivering the same snapshot is harmless.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use fleetgrid_state::*;

/// Configuration snapshot delivered to a worker when its group changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupUpdate {
    pub group: ProcessGroup,
    /// Distinct environments the group is bound to.
    pub environment_ids: Vec<EnvironmentId>,
}

/// Errors a transport reports for a single delivery.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("worker not connected: {0}")]
    NotConnected(String),

    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    #[error("transport error: {0}")]
    Transport(String),
}

pub type DeliveryFuture<'a> = Pin<Box<dyn Future<Output = Result<(), DeliveryError>> + Send + 'a>>;

/// Delivers group updates to connected workers.
pub trait WorkerTransport: Send + Sync + 'static {
    fn deliver<'a>(&'a self, worker_id: &'a str, update: &'a GroupUpdate) -> DeliveryFuture<'a>;
}

// ── Queue ──────────────────────────────────────────────────────────

/// Sending half of the notification queue. Cheap to clone.
#[derive(Clone)]
pub struct ChangeNotifier {
    tx: mpsc::Sender<ProcessGroupId>,
}

impl ChangeNotifier {
    /// Create a notifier and the queue a [`Dispatcher`] consumes.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ProcessGroupId>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueue a change notification for a group.
    ///
    /// Never blocks. Returns false if the notification was dropped because
    /// the queue is full or no dispatcher is running.
    pub fn notify_group_changed(&self, group_id: &str) -> bool {
        match self.tx.try_send(group_id.to_string()) {
            Ok(()) => {
                debug!(%group_id, "group change queued");
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!(%group_id, "notification queue full, dropping group change");
                false
            }
            Err(TrySendError::Closed(_)) => {
                warn!(%group_id, "notification dispatcher not running, dropping group change");
                false
            }
        }
    }
}

// ── Dispatcher ─────────────────────────────────────────────────────

/// Outcome of one group fan-out.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    /// Online workers the update was sent to.
    pub targeted: usize,
    pub delivered: usize,
    pub failed: usize,
}

/// Consumes the notification queue and fans snapshots out to workers.
pub struct Dispatcher {
    state: StateStore,
    transport: Arc<dyn WorkerTransport>,
    queue: mpsc::Receiver<ProcessGroupId>,
}

impl Dispatcher {
    pub fn new(
        state: StateStore,
        transport: Arc<dyn WorkerTransport>,
        queue: mpsc::Receiver<ProcessGroupId>,
    ) -> Self {
        Self {
            state,
            transport,
            queue,
        }
    }

    /// Process notifications until shutdown is signalled or every
    /// [`ChangeNotifier`] is dropped. Notifications already queued at
    /// shutdown are still dispatched.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("change dispatcher started");
        loop {
            let next = tokio::select! {
                group_id = self.queue.recv() => group_id,
                _ = shutdown.changed() => None,
            };
            let Some(group_id) = next else { break };
            self.dispatch(&group_id).await;
        }

        self.queue.close();
        while let Ok(group_id) = self.queue.try_recv() {
            self.dispatch(&group_id).await;
        }
        info!("change dispatcher stopped");
    }

    /// Deliver the current snapshot of a group to its online workers.
    pub async fn dispatch(&self, group_id: &str) -> DispatchReport {
        let (update, targets) = match self.load_targets(group_id) {
            Ok(Some(loaded)) => loaded,
            Ok(None) => {
                debug!(%group_id, "group no longer exists, nothing to notify");
                return DispatchReport::default();
            }
            Err(e) => {
                warn!(%group_id, error = %e, "failed to load group for notification");
                return DispatchReport::default();
            }
        };

        let mut report = DispatchReport {
            targeted: targets.len(),
            ..Default::default()
        };
        let update = Arc::new(update);
        let mut deliveries = JoinSet::new();
        for worker_id in targets {
            let transport = Arc::clone(&self.transport);
            let update = Arc::clone(&update);
            deliveries.spawn(async move {
                let result = transport.deliver(&worker_id, &update).await;
                (worker_id, result)
            });
        }

        while let Some(joined) = deliveries.join_next().await {
            match joined {
                Ok((worker_id, Ok(()))) => {
                    report.delivered += 1;
                    debug!(%group_id, %worker_id, "group update delivered");
                }
                Ok((worker_id, Err(e))) => {
                    report.failed += 1;
                    warn!(%group_id, %worker_id, error = %e, "group update delivery failed");
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(%group_id, error = %e, "group update delivery task failed");
                }
            }
        }

        info!(
            %group_id,
            targeted = report.targeted,
            delivered = report.delivered,
            failed = report.failed,
            "group change dispatched"
        );
        report
    }

    /// Snapshot of the group plus the ids of its online, active workers.
    fn load_targets(&self, group_id: &str) -> StateResult<Option<(GroupUpdate, Vec<WorkerId>)>> {
        let Some(group) = self.state.get_process_group(group_id)? else {
            return Ok(None);
        };
        let bindings = self.state.bindings_for_group(group_id)?;

        let environment_ids: BTreeSet<EnvironmentId> =
            bindings.iter().map(|b| b.environment_id.clone()).collect();
        let worker_ids: BTreeSet<&str> = bindings
            .iter()
            .filter(|b| b.has_worker())
            .map(|b| b.worker_id.as_str())
            .collect();

        let mut targets = Vec::new();
        for worker_id in worker_ids {
            if let Some(worker) = self.state.get_worker(worker_id)? {
                if worker.active && worker.status == WorkerStatus::Online {
                    targets.push(worker.id);
                }
            }
        }

        let update = GroupUpdate {
            group,
            environment_ids: environment_ids.into_iter().collect(),
        };
        Ok(Some((update, targets)))
    }
}

// ── In-process transport ───────────────────────────────────────────

/// In-process transport: each connected worker holds the receiving end of
/// an unbounded channel of [`GroupUpdate`]s.
#[derive(Clone, Default)]
pub struct ConnectionHub {
    connections: Arc<RwLock<HashMap<WorkerId, mpsc::UnboundedSender<GroupUpdate>>>>,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker connection, replacing any previous one.
    pub async fn connect(&self, worker_id: &str) -> mpsc::UnboundedReceiver<GroupUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut connections = self.connections.write().await;
        if connections.insert(worker_id.to_string(), tx).is_some() {
            debug!(%worker_id, "replaced existing worker connection");
        }
        info!(%worker_id, "worker connected");
        rx
    }

    /// Drop a worker connection. Returns true if it was connected.
    pub async fn disconnect(&self, worker_id: &str) -> bool {
        let mut connections = self.connections.write().await;
        let existed = connections.remove(worker_id).is_some();
        if existed {
            info!(%worker_id, "worker disconnected");
        }
        existed
    }

    pub async fn connected(&self) -> Vec<WorkerId> {
        let connections = self.connections.read().await;
        let mut ids: Vec<WorkerId> = connections.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl WorkerTransport for ConnectionHub {
    fn deliver<'a>(&'a self, worker_id: &'a str, update: &'a GroupUpdate) -> DeliveryFuture<'a> {
        Box::pin(async move {
            let connections = self.connections.read().await;
            let sender = connections
                .get(worker_id)
                .ok_or_else(|| DeliveryError::NotConnected(worker_id.to_string()))?;
            sender
                .send(update.clone())
                .map_err(|_| DeliveryError::ConnectionClosed(worker_id.to_string()))
        })
    }
}
