//! Loopback transport for testing.
//!
//! [`LoopbackTransport`] answers batches in-process. By default every item
//! succeeds and the verdict echoes the submitted snapshot; tests can take
//! the remote offline, make submissions fail wholesale, or script a
//! per-task verdict. Every submitted batch is recorded for inspection.

use std::collections::HashMap;

use parking_lot::Mutex;
use tasksync_proto::batch::{BatchRequest, BatchResponse, ItemStatus, ProcessedItem};
use tasksync_proto::mutation::MutationPayload;
use tasksync_proto::task::{TaskId, TaskSnapshot};

use super::{BatchTransport, TransportError};

/// Scripted verdict for every item of one task.
#[derive(Debug, Clone)]
pub enum ScriptedVerdict {
    /// Report a conflict carrying this server version.
    Conflict(TaskSnapshot),
    /// Reject the item with this message.
    Error(String),
    /// Return no verdict at all for the item.
    Omit,
}

#[derive(Debug)]
struct LoopbackState {
    reachable: bool,
    failing: bool,
    scripts: HashMap<TaskId, ScriptedVerdict>,
    submitted: Vec<BatchRequest>,
    health_checks: usize,
}

/// In-process [`BatchTransport`] with switchable failure modes.
#[derive(Debug)]
pub struct LoopbackTransport {
    state: Mutex<LoopbackState>,
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackTransport {
    /// A reachable remote that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LoopbackState {
                reachable: true,
                failing: false,
                scripts: HashMap::new(),
                submitted: Vec::new(),
                health_checks: 0,
            }),
        }
    }

    /// Toggle whether the health probe succeeds.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().reachable = reachable;
    }

    /// Toggle wholesale failure of batch submissions.
    pub fn set_failing(&self, failing: bool) {
        self.state.lock().failing = failing;
    }

    /// Script the verdict for every later item of `task_id`.
    pub fn script(&self, task_id: TaskId, verdict: ScriptedVerdict) {
        self.state.lock().scripts.insert(task_id, verdict);
    }

    /// Remove a scripted verdict so the task is accepted again.
    pub fn clear_script(&self, task_id: &TaskId) {
        self.state.lock().scripts.remove(task_id);
    }

    /// Every batch submitted so far, including failed submissions.
    #[must_use]
    pub fn submitted(&self) -> Vec<BatchRequest> {
        self.state.lock().submitted.clone()
    }

    /// Number of health probes received.
    #[must_use]
    pub fn health_checks(&self) -> usize {
        self.state.lock().health_checks
    }
}

impl BatchTransport for LoopbackTransport {
    async fn health_check(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.health_checks += 1;
        if state.reachable {
            Ok(())
        } else {
            Err(TransportError::Unreachable("loopback offline".to_string()))
        }
    }

    async fn submit_batch(&self, request: &BatchRequest) -> Result<BatchResponse, TransportError> {
        let mut state = self.state.lock();
        state.submitted.push(request.clone());
        if !state.reachable {
            return Err(TransportError::Unreachable("loopback offline".to_string()));
        }
        if state.failing {
            return Err(TransportError::Timeout);
        }

        let processed_items = request
            .items
            .iter()
            .filter_map(|item| match state.scripts.get(&item.task_id) {
                Some(ScriptedVerdict::Conflict(server)) => Some(ProcessedItem::conflict(
                    item.task_id,
                    server_id_for(&item.task_id),
                    server.clone(),
                )),
                Some(ScriptedVerdict::Error(message)) => {
                    Some(ProcessedItem::error(item.task_id, message.clone()))
                }
                Some(ScriptedVerdict::Omit) => None,
                None => Some(accept(&item.payload)),
            })
            .collect();

        Ok(BatchResponse { processed_items })
    }
}

fn server_id_for(task_id: &TaskId) -> String {
    format!("srv-{task_id}")
}

fn accept(payload: &MutationPayload) -> ProcessedItem {
    let task_id = payload.task_id();
    let resolved_data = match payload {
        MutationPayload::Create(snapshot) | MutationPayload::Update(snapshot) => {
            Some(snapshot.clone())
        }
        MutationPayload::Delete { .. } => None,
    };
    ProcessedItem {
        client_id: task_id,
        server_id: Some(server_id_for(&task_id)),
        status: ItemStatus::Success,
        resolved_data,
        error: None,
    }
}
