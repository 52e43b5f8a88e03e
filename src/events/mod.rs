//! Typed progress events and the notification bus.
//!
//! Every observable moment of a workflow (node transitions, streamed
//! content chunks, tool exchanges, terminal outcomes) is a
//! [`ProgressEvent`]. The [`NotificationBus`] fans events out to
//! subscribers keyed by workflow id (equivalently task id).
//!
//! Delivery policy: each subscriber owns a bounded buffer. A subscriber
//! whose buffer is full is dropped on the spot; the producer never blocks
//! and never slows the workflow for a lagging SSE client. Drops are counted
//! and logged.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::types::{TaskStatus, WorkflowStep};

/// Default per-subscriber buffer capacity.
const DEFAULT_BUFFER_CAPACITY: usize = 1024;

/// A progress event published during workflow execution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    NodeStarted {
        workflow_id: String,
        step: WorkflowStep,
    },
    NodeCompleted {
        workflow_id: String,
        step: WorkflowStep,
    },
    NodeFailed {
        workflow_id: String,
        step: WorkflowStep,
        error: String,
    },
    /// A streamed token of generated content, forwarded to SSE clients.
    ContentChunk {
        workflow_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        concept_id: Option<String>,
        chunk: String,
    },
    ToolCall {
        workflow_id: String,
        name: String,
        arguments: Value,
    },
    ToolResult {
        workflow_id: String,
        name: String,
        summary: String,
    },
    WorkflowCompleted {
        workflow_id: String,
        status: TaskStatus,
    },
    WorkflowSuspended {
        workflow_id: String,
        step: WorkflowStep,
    },
}

impl ProgressEvent {
    /// The workflow this event belongs to.
    #[must_use]
    pub fn workflow_id(&self) -> &str {
        match self {
            ProgressEvent::NodeStarted { workflow_id, .. }
            | ProgressEvent::NodeCompleted { workflow_id, .. }
            | ProgressEvent::NodeFailed { workflow_id, .. }
            | ProgressEvent::ContentChunk { workflow_id, .. }
            | ProgressEvent::ToolCall { workflow_id, .. }
            | ProgressEvent::ToolResult { workflow_id, .. }
            | ProgressEvent::WorkflowCompleted { workflow_id, .. }
            | ProgressEvent::WorkflowSuspended { workflow_id, .. } => workflow_id,
        }
    }

    /// Whether a progress stream should close after forwarding this event.
    #[must_use]
    pub fn closes_stream(&self) -> bool {
        matches!(
            self,
            ProgressEvent::WorkflowCompleted { .. } | ProgressEvent::WorkflowSuspended { .. }
        )
    }
}

/// Counters exposed for monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusMetrics {
    pub subscribers: usize,
    pub dropped_subscribers: usize,
}

struct Subscriber {
    id: u64,
    tx: flume::Sender<ProgressEvent>,
}

/// Fan-out hub for [`ProgressEvent`]s.
pub struct NotificationBus {
    subscribers: Mutex<FxHashMap<String, Vec<Subscriber>>>,
    capacity: usize,
    next_id: AtomicU64,
    dropped: AtomicUsize,
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationBus {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_CAPACITY)
    }

    /// `capacity` is the per-subscriber buffer size, clamped to at least 1.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(FxHashMap::default()),
            capacity: capacity.max(1),
            next_id: AtomicU64::new(0),
            dropped: AtomicUsize::new(0),
        }
    }

    /// Subscribe to one workflow's events.
    pub fn subscribe(&self, workflow_id: &str) -> ProgressStream {
        let (tx, rx) = flume::bounded(self.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subscribers = self.subscribers.lock().expect("bus mutex poisoned");
        subscribers
            .entry(workflow_id.to_string())
            .or_default()
            .push(Subscriber { id, tx });
        ProgressStream { rx }
    }

    /// Publish to every subscriber of the event's workflow.
    ///
    /// Subscribers that are gone or whose buffer is full are removed here;
    /// the publish itself never waits.
    pub fn publish(&self, event: ProgressEvent) {
        let mut subscribers = self.subscribers.lock().expect("bus mutex poisoned");
        let Some(entries) = subscribers.get_mut(event.workflow_id()) else {
            return;
        };
        let mut evicted = 0usize;
        entries.retain(|subscriber| match subscriber.tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(flume::TrySendError::Disconnected(_)) => false,
            Err(flume::TrySendError::Full(_)) => {
                evicted += 1;
                tracing::warn!(
                    target: "roadweave::events",
                    workflow_id = %event.workflow_id(),
                    subscriber = subscriber.id,
                    "subscriber buffer full; dropping subscriber"
                );
                false
            }
        });
        if evicted > 0 {
            self.dropped.fetch_add(evicted, Ordering::Relaxed);
        }
        if entries.is_empty() {
            subscribers.remove(event.workflow_id());
        }
    }

    /// Drop every subscriber of a finished workflow. Their streams see a
    /// disconnect after draining buffered events.
    pub fn close_workflow(&self, workflow_id: &str) {
        self.subscribers
            .lock()
            .expect("bus mutex poisoned")
            .remove(workflow_id);
    }

    #[must_use]
    pub fn metrics(&self) -> BusMetrics {
        let subscribers = self
            .subscribers
            .lock()
            .expect("bus mutex poisoned")
            .values()
            .map(Vec::len)
            .sum();
        BusMetrics {
            subscribers,
            dropped_subscribers: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Receiving half of a subscription.
pub struct ProgressStream {
    rx: flume::Receiver<ProgressEvent>,
}

impl ProgressStream {
    /// Next event, or `None` once the bus side is gone and the buffer is
    /// drained.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.rx.recv_async().await.ok()
    }

    /// Non-blocking variant for polling consumers.
    pub fn try_recv(&mut self) -> Option<ProgressEvent> {
        self.rx.try_recv().ok()
    }

    /// Drain everything buffered right now.
    pub fn drain(&mut self) -> Vec<ProgressEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            out.push(event);
        }
        out
    }
}
