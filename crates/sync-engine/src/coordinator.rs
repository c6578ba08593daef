/// Sync coordinator
///
/// Owns the connected users, lock table, recent-operation windows and version
/// counter of one shared workspace. User edits enter through
/// [`SyncCoordinator::push_operation`], which validates them, enforces locks
/// and runs conflict detection and resolution before handing them to a single
/// apply task. That task is the only place versions are assigned, so every
/// subscriber of a path sees operations in the same order.
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{
    build_message, commit_message, detect_conflict, resolve_conflict, Conflict, ConflictMessage,
    ConflictRecord, LockTable, MetricsSnapshot, OperationId, OperationStore, RecentOperations,
    RecordId, Result, SubscriberRegistry, Subscription, SubscriptionId, SyncConfig, SyncError,
    SyncEvent, SyncMetrics, SyncOperation, UserId, VersionControl, Workspace,
};

/// External services the coordinator depends on
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn OperationStore>,
    pub version_control: Arc<dyn VersionControl>,
    pub workspace: Arc<dyn Workspace>,
}

impl Collaborators {
    pub fn new(
        store: Arc<dyn OperationStore>,
        version_control: Arc<dyn VersionControl>,
        workspace: Arc<dyn Workspace>,
    ) -> Self {
        Self {
            store,
            version_control,
            workspace,
        }
    }
}

/// Result of a push that passed validation and lock checks
#[derive(Debug, Clone)]
pub enum PushOutcome {
    /// An operation was accepted for application: the submitted one, or the
    /// operation synthesized to resolve `conflict`
    Queued {
        operation: SyncOperation,
        conflict: Option<Conflict>,
    },

    /// A conflict could not be resolved automatically; nothing was queued
    Blocked {
        conflict: Conflict,
        message: ConflictMessage,
        conflict_id: RecordId,
    },
}

impl PushOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, PushOutcome::Queued { .. })
    }

    pub fn conflict(&self) -> Option<&Conflict> {
        match self {
            PushOutcome::Queued { conflict, .. } => conflict.as_ref(),
            PushOutcome::Blocked { conflict, .. } => Some(conflict),
        }
    }
}

#[derive(Default)]
struct SyncState {
    version: u64,
    users: HashSet<UserId>,
    locks: LockTable,
    recent: HashMap<String, RecentOperations>,
    /// Accepted operations not yet committed to version control, per submitter
    pending: HashMap<UserId, Vec<SyncOperation>>,
}

struct Shared {
    config: SyncConfig,
    state: Mutex<SyncState>,
    subscribers: Mutex<SubscriberRegistry>,
    /// Serializes check-and-enqueue so lock and registry checks stay valid
    intake: tokio::sync::Mutex<()>,
    /// Operations handed to the apply loop so far
    enqueued: AtomicU64,
    /// Latest version assigned by the apply loop
    applied: watch::Receiver<u64>,
    store: Arc<dyn OperationStore>,
    version_control: Arc<dyn VersionControl>,
    workspace: Arc<dyn Workspace>,
    metrics: SyncMetrics,
}

impl Shared {
    fn publish_path(&self, path: &str, event: &SyncEvent) {
        let delivery = self.subscribers.lock().publish_path(path, event);
        SyncMetrics::add(&self.metrics.events_dropped, delivery.dropped);
    }

    fn publish_user(&self, user_id: &UserId, event: &SyncEvent) {
        let delivery = self.subscribers.lock().publish_user(user_id, event);
        SyncMetrics::add(&self.metrics.events_dropped, delivery.dropped);
    }

    fn publish_all_users(&self, event: &SyncEvent, exclude: Option<&UserId>) {
        let delivery = self.subscribers.lock().publish_all_users(event, exclude);
        SyncMetrics::add(&self.metrics.events_dropped, delivery.dropped);
    }

    /// Wait until the apply loop has versioned `target` operations
    async fn wait_applied(&self, target: u64) {
        let mut applied = self.applied.clone();
        if applied.wait_for(|version| *version >= target).await.is_err() {
            warn!("Apply loop stopped before reaching version {}", target);
        }
    }
}

pub struct SyncCoordinator {
    shared: Arc<Shared>,
    queue_tx: mpsc::Sender<SyncOperation>,
    apply_task: JoinHandle<()>,
}

impl SyncCoordinator {
    /// Create a coordinator and start its apply loop on the current tokio runtime
    pub fn new(config: SyncConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;

        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity);
        let (applied_tx, applied_rx) = watch::channel(0);

        let shared = Arc::new(Shared {
            subscribers: Mutex::new(SubscriberRegistry::new(config.subscriber_buffer)),
            config,
            state: Mutex::new(SyncState::default()),
            intake: tokio::sync::Mutex::new(()),
            enqueued: AtomicU64::new(0),
            applied: applied_rx,
            store: collaborators.store,
            version_control: collaborators.version_control,
            workspace: collaborators.workspace,
            metrics: SyncMetrics::new(),
        });

        let apply_task = tokio::spawn(apply_loop(shared.clone(), queue_rx, applied_tx));

        info!(
            "Sync coordinator started (window {}, queue {})",
            shared.config.recent_ops_limit, shared.config.queue_capacity
        );

        Ok(Self {
            shared,
            queue_tx,
            apply_task,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.shared.config
    }

    /// Register a user and return their personal event channel
    pub async fn connect_user(&self, user_id: UserId) -> Result<Subscription> {
        if user_id.is_system() {
            return Err(SyncError::InvalidOperation(format!(
                "{} is reserved and cannot connect",
                user_id
            )));
        }

        let _intake = self.shared.intake.lock().await;

        {
            let mut state = self.shared.state.lock();
            if !state.users.insert(user_id.clone()) {
                return Err(SyncError::AlreadyConnected(user_id));
            }
            state.pending.insert(user_id.clone(), Vec::new());
        }

        let subscription = self.shared.subscribers.lock().register_user(&user_id);

        let event = SyncEvent::UserConnected {
            user_id: user_id.clone(),
            timestamp: chrono::Utc::now(),
        };
        self.shared.publish_all_users(&event, Some(&user_id));

        info!("User {} connected", user_id);
        Ok(subscription)
    }

    /// Commit the user's pending work, release their locks and remove them
    ///
    /// Version-control failures are logged and counted; the user is removed
    /// regardless.
    pub async fn disconnect_user(&self, user_id: &UserId) -> Result<()> {
        let intake = self.shared.intake.lock().await;

        let (pending, released, target) = {
            let mut state = self.shared.state.lock();

            if !state.users.remove(user_id) {
                return Err(SyncError::NotConnected(user_id.clone()));
            }

            let pending = state.pending.remove(user_id).unwrap_or_default();
            let released = state.locks.release_all(user_id);
            (pending, released, self.shared.enqueued.load(Ordering::SeqCst))
        };

        // Intake stays held until the release is announced, so the user's
        // queued operations land first and nobody can take a freed lock
        // ahead of the announcement.
        self.shared.wait_applied(target).await;

        let now = chrono::Utc::now();
        for path in &released {
            let event = SyncEvent::LockReleased {
                path: path.clone(),
                user_id: user_id.clone(),
                timestamp: now,
            };
            self.shared.publish_path(path, &event);
        }
        drop(intake);

        if !pending.is_empty() {
            if let Err(e) = self.commit_pending(user_id, &pending).await {
                SyncMetrics::incr(&self.shared.metrics.commit_errors);
                warn!(
                    "Failed to commit {} operations for {}: {}",
                    pending.len(),
                    user_id,
                    e
                );
            }
        }

        let removed = self.shared.subscribers.lock().remove_user(user_id);

        let event = SyncEvent::UserDisconnected {
            user_id: user_id.clone(),
            timestamp: chrono::Utc::now(),
        };
        self.shared.publish_all_users(&event, None);

        info!(
            "User {} disconnected ({} locks released, {} subscriptions closed)",
            user_id,
            released.len(),
            removed
        );
        Ok(())
    }

    /// Commit a connected user's pending operations now
    ///
    /// Returns the commit hash, or `None` when there was nothing to commit.
    /// On failure the operations stay pending for the next flush.
    pub async fn flush_user(&self, user_id: &UserId) -> Result<Option<String>> {
        let (pending, target) = {
            let _intake = self.shared.intake.lock().await;
            let mut state = self.shared.state.lock();

            if !state.users.contains(user_id) {
                return Err(SyncError::NotConnected(user_id.clone()));
            }

            let pending = state
                .pending
                .get_mut(user_id)
                .map(std::mem::take)
                .unwrap_or_default();
            (pending, self.shared.enqueued.load(Ordering::SeqCst))
        };

        if pending.is_empty() {
            return Ok(None);
        }

        self.shared.wait_applied(target).await;

        match self.commit_pending(user_id, &pending).await {
            Ok(hash) => Ok(hash),
            Err(e) => {
                SyncMetrics::incr(&self.shared.metrics.commit_errors);
                warn!("Flush for {} failed, keeping {} operations", user_id, pending.len());

                let mut state = self.shared.state.lock();
                if let Some(list) = state.pending.get_mut(user_id) {
                    let newer = std::mem::replace(list, pending);
                    list.extend(newer);
                }
                Err(e)
            }
        }
    }

    async fn commit_pending(
        &self,
        user_id: &UserId,
        operations: &[SyncOperation],
    ) -> Result<Option<String>> {
        let vcs = &self.shared.version_control;

        if !vcs.stage_changes(operations).await? {
            return Ok(None);
        }

        let message = commit_message(operations);
        let branch = self.shared.config.branch_for(user_id);
        let Some(hash) = vcs.commit_changes(&message, user_id, &branch).await? else {
            debug!("Nothing to commit for {}", user_id);
            return Ok(None);
        };

        SyncMetrics::incr(&self.shared.metrics.commits);

        let mut files: Vec<String> = Vec::new();
        for op in operations {
            if !files.contains(&op.path) {
                files.push(op.path.clone());
            }
        }

        let event = SyncEvent::Commit {
            user_id: user_id.clone(),
            commit_hash: hash.clone(),
            timestamp: chrono::Utc::now(),
            files: files.clone(),
        };
        for path in &files {
            self.shared.publish_path(path, &event);
        }
        self.shared.publish_all_users(&event, None);

        info!("Committed {} for {} on {}: {}", hash, user_id, branch, message);
        Ok(Some(hash))
    }

    /// Receive every later operation, lock, conflict and commit event for `path`
    pub fn subscribe(&self, user_id: &UserId, path: &str) -> Subscription {
        self.shared.subscribers.lock().subscribe_path(user_id, path)
    }

    pub fn unsubscribe(&self, path: &str, id: SubscriptionId) -> bool {
        self.shared.subscribers.lock().unsubscribe(path, id)
    }

    /// Take the exclusive lock on `path`
    ///
    /// Fails if anyone holds it already, including `user_id`, or if the user
    /// is not connected.
    pub async fn acquire_lock(&self, path: &str, user_id: &UserId) -> bool {
        let _intake = self.shared.intake.lock().await;

        let acquired = {
            let mut state = self.shared.state.lock();
            state.users.contains(user_id) && state.locks.acquire(path, user_id)
        };

        if acquired {
            let event = SyncEvent::LockAcquired {
                path: path.to_string(),
                user_id: user_id.clone(),
                timestamp: chrono::Utc::now(),
            };
            self.shared.publish_path(path, &event);
            debug!("{} locked {}", user_id, path);
        }
        acquired
    }

    pub async fn release_lock(&self, path: &str, user_id: &UserId) -> bool {
        let _intake = self.shared.intake.lock().await;

        let released = self.shared.state.lock().locks.release(path, user_id);

        if released {
            let event = SyncEvent::LockReleased {
                path: path.to_string(),
                user_id: user_id.clone(),
                timestamp: chrono::Utc::now(),
            };
            self.shared.publish_path(path, &event);
            debug!("{} unlocked {}", user_id, path);
        }
        released
    }

    /// Submit a user operation
    ///
    /// Errors mean nothing was persisted or queued. A conflict that cannot be
    /// resolved is reported as [`PushOutcome::Blocked`].
    pub async fn push_operation(&self, operation: SyncOperation) -> Result<PushOutcome> {
        let shared = &self.shared;
        let _intake = shared.intake.lock().await;

        if let Err(e) = self.validate(&operation).await {
            SyncMetrics::incr(&shared.metrics.invalid_operations);
            debug!("Rejected {} on {}: {}", operation.kind, operation.path, e);
            return Err(e);
        }

        let recent = {
            let state = shared.state.lock();
            if let Some(holder) = state.locks.holder(&operation.path) {
                if holder != &operation.user_id {
                    let reason = format!("{} is locked by {}", operation.path, holder);
                    drop(state);
                    SyncMetrics::incr(&shared.metrics.permission_denied);
                    return Err(SyncError::PermissionDenied(reason));
                }
            }
            state
                .recent
                .get(&operation.path)
                .map(RecentOperations::to_vec)
                .unwrap_or_default()
        };

        let submitter = operation.user_id.clone();

        let (mut queued, conflict) = match detect_conflict(&operation, &recent) {
            None => (operation, None),
            Some(mut conflict) => {
                SyncMetrics::incr(&shared.metrics.conflicts_detected);
                match resolve_conflict(&mut conflict) {
                    Some(resolution) => {
                        SyncMetrics::incr(&shared.metrics.conflicts_resolved);
                        debug!(
                            "Resolved {} conflict on {} between {:?}",
                            conflict.kind(),
                            conflict.path(),
                            conflict.users()
                        );
                        (resolution, Some(conflict))
                    }
                    None => return self.block(conflict).await,
                }
            }
        };
        queued.version = None;

        if let Err(e) = shared.store.record_operation(&queued).await {
            SyncMetrics::incr(&shared.metrics.persistence_errors);
            warn!("Failed to persist operation on {}: {}", queued.path, e);
            return Err(e.into());
        }

        self.queue_tx
            .send(queued.clone())
            .await
            .map_err(|_| SyncError::Stopped)?;
        shared.enqueued.fetch_add(1, Ordering::SeqCst);

        if let Some(pending) = shared.state.lock().pending.get_mut(&submitter) {
            pending.push(queued.clone());
        }

        SyncMetrics::incr(&shared.metrics.operations_pushed);
        debug!("Queued {} on {} from {}", queued.kind, queued.path, submitter);

        Ok(PushOutcome::Queued {
            operation: queued,
            conflict,
        })
    }

    async fn validate(&self, operation: &SyncOperation) -> Result<()> {
        if operation.is_synthetic() {
            return Err(SyncError::InvalidOperation(
                "operations by the system user cannot be pushed".to_string(),
            ));
        }

        operation.check_shape()?;

        if !self.shared.state.lock().users.contains(&operation.user_id) {
            return Err(SyncError::InvalidOperation(format!(
                "user {} is not connected",
                operation.user_id
            )));
        }

        if !self.shared.workspace.exists(&operation.path).await {
            return Err(SyncError::InvalidOperation(format!(
                "{} does not exist",
                operation.path
            )));
        }

        Ok(())
    }

    async fn block(&self, conflict: Conflict) -> Result<PushOutcome> {
        let shared = &self.shared;
        let operation_ids: Vec<OperationId> = conflict.operations().iter().map(|op| op.id).collect();

        let conflict_id = match shared
            .store
            .record_conflict(conflict.path(), &operation_ids)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                SyncMetrics::incr(&shared.metrics.persistence_errors);
                warn!("Failed to record conflict on {}: {}", conflict.path(), e);
                return Err(e.into());
            }
        };

        let message = build_message(&conflict);
        let event = SyncEvent::Conflict {
            path: conflict.path().to_string(),
            users: conflict.users().to_vec(),
            timestamp: conflict.detected_at,
            message: message.clone(),
            conflict_id,
        };

        shared.publish_path(conflict.path(), &event);
        for user_id in conflict.users() {
            shared.publish_user(user_id, &event);
        }

        SyncMetrics::incr(&shared.metrics.conflicts_blocked);
        warn!(
            "Unresolved {} conflict on {} between {:?}",
            conflict.kind(),
            conflict.path(),
            conflict.users()
        );

        Ok(PushOutcome::Blocked {
            conflict,
            message,
            conflict_id,
        })
    }

    pub async fn unresolved_conflicts(&self) -> Result<Vec<ConflictRecord>> {
        Ok(self.shared.store.unresolved_conflicts().await?)
    }

    /// Mark a stored conflict as handled by its users
    pub async fn mark_conflict_resolved(&self, id: RecordId) -> Result<()> {
        self.shared.store.mark_resolved(id).await?;
        SyncMetrics::incr(&self.shared.metrics.conflicts_resolved);
        Ok(())
    }

    /// Wait until every operation accepted so far has been applied
    pub async fn wait_applied(&self) {
        let target = self.shared.enqueued.load(Ordering::SeqCst);
        self.shared.wait_applied(target).await;
    }

    pub fn version(&self) -> u64 {
        self.shared.state.lock().version
    }

    pub fn connected_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.shared.state.lock().users.iter().cloned().collect();
        users.sort();
        users
    }

    pub fn is_connected(&self, user_id: &UserId) -> bool {
        self.shared.state.lock().users.contains(user_id)
    }

    pub fn lock_holder(&self, path: &str) -> Option<UserId> {
        self.shared.state.lock().locks.holder(path).cloned()
    }

    pub fn locked_paths(&self) -> Vec<String> {
        self.shared.state.lock().locks.paths()
    }

    /// The path's recent-operations window, oldest first
    pub fn recent_operations(&self, path: &str) -> Vec<SyncOperation> {
        self.shared
            .state
            .lock()
            .recent
            .get(path)
            .map(RecentOperations::to_vec)
            .unwrap_or_default()
    }

    pub fn pending_operations(&self, user_id: &UserId) -> Vec<SyncOperation> {
        self.shared
            .state
            .lock()
            .pending
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn path_subscriber_count(&self, path: &str) -> usize {
        self.shared.subscribers.lock().path_subscriber_count(path)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Stop accepting operations and wait for queued ones to be applied
    pub async fn shutdown(self) {
        let SyncCoordinator {
            shared,
            queue_tx,
            apply_task,
        } = self;

        drop(queue_tx);
        if let Err(e) = apply_task.await {
            error!("Apply loop failed: {}", e);
        }

        info!("Sync coordinator stopped at version {}", shared.state.lock().version);
    }
}

/// Single consumer of the intake queue; the only writer of versions and windows
async fn apply_loop(
    shared: Arc<Shared>,
    mut queue: mpsc::Receiver<SyncOperation>,
    applied: watch::Sender<u64>,
) {
    while let Some(mut operation) = queue.recv().await {
        if let Err(e) = shared.workspace.apply(&operation).await {
            SyncMetrics::incr(&shared.metrics.apply_errors);
            warn!(
                "Failed to apply {} to {}: {}",
                operation.kind, operation.path, e
            );
        }

        let version = {
            let mut state = shared.state.lock();
            state.version += 1;
            let version = state.version;
            operation.version = Some(version);

            let limit = shared.config.recent_ops_limit;
            state
                .recent
                .entry(operation.path.clone())
                .or_insert_with(|| RecentOperations::new(limit))
                .push(operation.clone());
            version
        };

        SyncMetrics::incr(&shared.metrics.operations_applied);
        debug!(
            "Applied {} on {} at version {}",
            operation.kind, operation.path, version
        );

        let path = operation.path.clone();
        shared.publish_path(&path, &SyncEvent::Operation(operation));
        applied.send_replace(version);
    }

    debug!("Apply loop drained");
}
