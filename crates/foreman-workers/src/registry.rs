use crate::roles::{WorkerRole, COORDINATOR_CAPABILITY};
use crate::worker::{Worker, WorkerDescriptor};
use chrono::{DateTime, Utc};
use foreman_core::{Executor, ForemanError, ForemanResult};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{info, warn};

/// Lifecycle status of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    /// Ready for work.
    Idle,
    /// At least one invocation is running.
    Working,
    /// The last task failed.
    Error,
    /// Out of service; never selected.
    Offline,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerStatus::Idle => write!(f, "idle"),
            WorkerStatus::Working => write!(f, "working"),
            WorkerStatus::Error => write!(f, "error"),
            WorkerStatus::Offline => write!(f, "offline"),
        }
    }
}

#[derive(Debug)]
struct WorkerState {
    status: WorkerStatus,
    tasks_completed: u64,
    tasks_failed: u64,
    in_flight: u32,
    last_activity: Option<DateTime<Utc>>,
}

/// Serializable point-in-time view of a registered worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatusRecord {
    /// Unique worker id.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Role, for the built-in domain workers.
    pub role: Option<WorkerRole>,
    /// Lifecycle status.
    pub status: WorkerStatus,
    /// Advertised capabilities, sorted.
    pub capabilities: Vec<String>,
    /// Tasks finished successfully.
    pub tasks_completed: u64,
    /// Tasks that failed.
    pub tasks_failed: u64,
    /// Invocations currently running.
    pub in_flight: u32,
    /// When the worker was created.
    pub created_at: DateTime<Utc>,
    /// Last invocation start or settle.
    pub last_activity: Option<DateTime<Utc>>,
    /// Seconds since creation.
    pub uptime_secs: i64,
}

/// A registered worker together with its mutable runtime state.
///
/// The worker owns its status and counters; they change only through an
/// [`Invocation`] opened by the dispatcher, under a worker-scoped mutex.
pub struct WorkerHandle {
    worker: Arc<dyn Worker>,
    state: Mutex<WorkerState>,
}

impl WorkerHandle {
    fn new(worker: Arc<dyn Worker>) -> Self {
        Self {
            worker,
            state: Mutex::new(WorkerState {
                status: WorkerStatus::Idle,
                tasks_completed: 0,
                tasks_failed: 0,
                in_flight: 0,
                last_activity: None,
            }),
        }
    }

    /// Static identity and capabilities of the worker.
    pub fn descriptor(&self) -> &WorkerDescriptor {
        self.worker.descriptor()
    }

    /// Unique worker id.
    pub fn id(&self) -> &str {
        self.descriptor().id()
    }

    /// Human-readable worker name.
    pub fn name(&self) -> &str {
        self.descriptor().name()
    }

    /// Identity used when stamping task results.
    pub fn executor(&self) -> Executor<'_> {
        Executor {
            id: self.id(),
            name: self.name(),
        }
    }

    /// The wrapped worker.
    pub fn worker(&self) -> &Arc<dyn Worker> {
        &self.worker
    }

    /// Current lifecycle status.
    pub fn status(&self) -> WorkerStatus {
        self.state.lock().status
    }

    /// Tasks finished successfully.
    pub fn tasks_completed(&self) -> u64 {
        self.state.lock().tasks_completed
    }

    /// Tasks that errored, panicked, or timed out.
    pub fn tasks_failed(&self) -> u64 {
        self.state.lock().tasks_failed
    }

    /// Invocations currently running.
    pub fn in_flight(&self) -> u32 {
        self.state.lock().in_flight
    }

    /// When an invocation last started or settled.
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.state.lock().last_activity
    }

    /// Take the worker out of (or back into) service.
    pub fn set_offline(&self, offline: bool) {
        let mut state = self.state.lock();
        state.status = match (offline, state.in_flight) {
            (true, _) => WorkerStatus::Offline,
            (false, 0) => WorkerStatus::Idle,
            (false, _) => WorkerStatus::Working,
        };
    }

    /// Whether the worker has been taken out of service.
    pub fn is_offline(&self) -> bool {
        self.status() == WorkerStatus::Offline
    }

    /// Open an invocation: marks the worker busy until the returned guard settles.
    ///
    /// An `error` status is kept until the next successful task. An `offline`
    /// status is kept until [`set_offline(false)`](Self::set_offline).
    pub fn begin(self: &Arc<Self>) -> Invocation {
        {
            let mut state = self.state.lock();
            state.in_flight += 1;
            if !matches!(state.status, WorkerStatus::Error | WorkerStatus::Offline) {
                state.status = WorkerStatus::Working;
            }
            state.last_activity = Some(Utc::now());
        }
        Invocation {
            handle: Arc::clone(self),
            settled: false,
        }
    }

    fn settle(&self, success: bool) {
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        state.last_activity = Some(Utc::now());
        let offline = state.status == WorkerStatus::Offline;
        if success {
            state.tasks_completed += 1;
        } else {
            state.tasks_failed += 1;
        }
        if offline {
            return;
        }
        if success {
            state.status = if state.in_flight == 0 {
                WorkerStatus::Idle
            } else {
                WorkerStatus::Working
            };
        } else {
            state.status = WorkerStatus::Error;
        }
    }

    /// Snapshot of identity, status, and counters.
    pub fn status_record(&self) -> WorkerStatusRecord {
        let desc = self.descriptor();
        let state = self.state.lock();
        WorkerStatusRecord {
            id: desc.id().to_string(),
            name: desc.name().to_string(),
            role: desc.role(),
            status: state.status,
            capabilities: desc.capabilities().iter().cloned().collect(),
            tasks_completed: state.tasks_completed,
            tasks_failed: state.tasks_failed,
            in_flight: state.in_flight,
            created_at: desc.created_at(),
            last_activity: state.last_activity,
            uptime_secs: (Utc::now() - desc.created_at()).num_seconds(),
        }
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("state", &*self.state.lock())
            .finish()
    }
}

/// Bookkeeping guard for a single worker invocation.
///
/// Exactly one of [`succeed`](Invocation::succeed) or [`fail`](Invocation::fail)
/// is applied. Dropping an unsettled guard (an abandoned or cancelled call)
/// counts as a failure.
#[must_use = "an invocation must be settled"]
pub struct Invocation {
    handle: Arc<WorkerHandle>,
    settled: bool,
}

impl Invocation {
    /// Settle as a success.
    pub fn succeed(mut self) {
        self.settled = true;
        self.handle.settle(true);
    }

    /// Settle as a failure.
    pub fn fail(mut self) {
        self.settled = true;
        self.handle.settle(false);
    }
}

impl Drop for Invocation {
    fn drop(&mut self) {
        if !self.settled {
            warn!(worker_id = %self.handle.id(), "Invocation dropped before settling; counting as failure");
            self.handle.settle(false);
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    workers: Vec<Arc<WorkerHandle>>,
    by_id: HashMap<String, usize>,
    by_capability: HashMap<String, Vec<usize>>,
}

/// Maps capability names to the workers able to perform them.
///
/// Candidate order is registration order. Writes take an exclusive lock, so
/// registration can safely happen while dispatch is live.
#[derive(Default)]
pub struct CapabilityRegistry {
    inner: RwLock<RegistryInner>,
}

impl CapabilityRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker keyed by its id and index its capabilities.
    pub fn register(&self, worker: Arc<dyn Worker>) -> ForemanResult<Arc<WorkerHandle>> {
        let desc = worker.descriptor();
        if desc.id().is_empty() {
            return Err(ForemanError::InvalidWorker("worker id is empty".into()));
        }
        if desc.capabilities().is_empty() {
            return Err(ForemanError::InvalidWorker(format!(
                "worker '{}' declares no capabilities",
                desc.id()
            )));
        }

        let mut inner = self.inner.write();
        if inner.by_id.contains_key(desc.id()) {
            return Err(ForemanError::DuplicateWorker(desc.id().to_string()));
        }

        let handle = Arc::new(WorkerHandle::new(Arc::clone(&worker)));
        let idx = inner.workers.len();
        inner.workers.push(Arc::clone(&handle));
        inner.by_id.insert(desc.id().to_string(), idx);
        for capability in desc.capabilities() {
            // The set has no duplicates and idx is fresh, so no entry repeats.
            inner
                .by_capability
                .entry(capability.clone())
                .or_default()
                .push(idx);
        }

        info!(
            worker_id = %desc.id(),
            worker = %desc.name(),
            capabilities = desc.capabilities().len(),
            "Registered worker"
        );
        Ok(handle)
    }

    /// Workers supporting `capability`, first-registered first. Empty if none.
    pub fn find_by_capability(&self, capability: &str) -> Vec<Arc<WorkerHandle>> {
        let inner = self.inner.read();
        inner
            .by_capability
            .get(capability)
            .map(|idxs| idxs.iter().map(|&i| Arc::clone(&inner.workers[i])).collect())
            .unwrap_or_default()
    }

    /// Exact-match lookup by human name; the first registered match wins.
    pub fn find_by_name(&self, name: &str) -> Option<Arc<WorkerHandle>> {
        self.inner
            .read()
            .workers
            .iter()
            .find(|w| w.name() == name)
            .cloned()
    }

    /// Worker registered under `id`.
    pub fn find_by_id(&self, id: &str) -> Option<Arc<WorkerHandle>> {
        let inner = self.inner.read();
        inner.by_id.get(id).map(|&i| Arc::clone(&inner.workers[i]))
    }

    /// The first registered worker declaring the coordinator capability.
    pub fn coordinator(&self) -> Option<Arc<WorkerHandle>> {
        self.find_by_capability(COORDINATOR_CAPABILITY)
            .into_iter()
            .next()
    }

    /// Union of every registered worker's capabilities.
    pub fn all_capabilities(&self) -> BTreeSet<String> {
        self.inner.read().by_capability.keys().cloned().collect()
    }

    /// All workers in registration order.
    pub fn workers(&self) -> Vec<Arc<WorkerHandle>> {
        self.inner.read().workers.clone()
    }

    /// Status records in registration order.
    pub fn status_snapshot(&self) -> Vec<WorkerStatusRecord> {
        self.workers().iter().map(|w| w.status_record()).collect()
    }

    /// Number of registered workers.
    pub fn len(&self) -> usize {
        self.inner.read().workers.len()
    }

    /// Whether no worker is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
