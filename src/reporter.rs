//! Event Reporters
//!
//! Implementations of the [`EventReporter`] port plus the per-cycle
//! [`EventContext`] that pairs every event with its owner.

use crate::crd::LocalVolume;
use crate::domain::ports::{DiskEvent, EventKind, EventReporter, OwnerReference};
use crate::error::{Error, Result};
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Api, Client, Resource};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Component name events are published under
pub const EVENT_COMPONENT: &str = "local-storage-diskmaker";

// =============================================================================
// Event Context
// =============================================================================

/// Reporter and owner for one cycle, passed down explicitly
#[derive(Clone, Copy)]
pub struct EventContext<'a> {
    reporter: &'a dyn EventReporter,
    owner: &'a OwnerReference,
}

impl<'a> EventContext<'a> {
    pub fn new(reporter: &'a dyn EventReporter, owner: &'a OwnerReference) -> Self {
        Self { reporter, owner }
    }

    /// Log and report an event
    pub fn emit(&self, event: DiskEvent) {
        match event.kind {
            EventKind::Warning => error!(reason = %event.reason, "{}", event.message),
            EventKind::Normal => debug!(reason = %event.reason, "{}", event.message),
        }
        self.reporter.report(&event, self.owner);
    }

    /// Report a failure as a warning event
    pub fn emit_error(&self, err: &Error, device: Option<String>) {
        self.emit(DiskEvent::from_error(err, device));
    }
}

// =============================================================================
// Simple Reporters
// =============================================================================

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl EventReporter for NoopReporter {
    fn report(&self, _event: &DiskEvent, _owner: &OwnerReference) {}
}

/// Writes events to the process log only, for standalone runs
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl EventReporter for LogReporter {
    fn report(&self, event: &DiskEvent, owner: &OwnerReference) {
        info!(
            owner = %owner.key(),
            kind = %event.kind,
            reason = %event.reason,
            device = event.device.as_deref().unwrap_or(""),
            "{}",
            event.message
        );
    }
}

/// Keeps every reported event in memory
#[derive(Debug, Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<(DiskEvent, OwnerReference)>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded events in report order
    pub fn events(&self) -> Vec<DiskEvent> {
        self.events.lock().iter().map(|(e, _)| e.clone()).collect()
    }

    /// Recorded events with their owners
    pub fn entries(&self) -> Vec<(DiskEvent, OwnerReference)> {
        self.events.lock().clone()
    }

    /// Number of events carrying `reason`
    pub fn count(&self, reason: crate::domain::ports::EventReason) -> usize {
        self.events.lock().iter().filter(|(e, _)| e.reason == reason).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventReporter for RecordingReporter {
    fn report(&self, event: &DiskEvent, owner: &OwnerReference) {
        self.events.lock().push((event.clone(), owner.clone()));
    }
}

// =============================================================================
// Kubernetes Event Reporter
// =============================================================================

/// Events waiting for the publisher; further events are dropped when full
pub const EVENT_QUEUE_CAPACITY: usize = 256;

/// Upper bound on publishing queued events after shutdown was requested
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

type QueuedEvent = (DiskEvent, OwnerReference);

/// Publishes events against the owning LocalVolume.
///
/// `report` only enqueues; a background task does the API calls, so a slow
/// or unreachable API server never stalls a cycle. When the queue is full
/// the event is dropped.
pub struct KubeEventReporter {
    tx: mpsc::Sender<QueuedEvent>,
}

impl KubeEventReporter {
    /// Spawn the publishing task on the current runtime
    pub fn start(
        client: Client,
        instance: Option<String>,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let sink = KubeEventSink::new(
            client,
            Reporter {
                controller: EVENT_COMPONENT.into(),
                instance,
            },
        );
        let handle = tokio::spawn(publish_loop(sink, rx, shutdown));
        (Self { tx }, handle)
    }
}

impl EventReporter for KubeEventReporter {
    fn report(&self, event: &DiskEvent, owner: &OwnerReference) {
        match self.tx.try_send((event.clone(), owner.clone())) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("Event queue full, dropping event {}", event.reason);
            }
            Err(TrySendError::Closed(_)) => {
                warn!("Event publisher stopped, dropping event {}", event.reason);
            }
        }
    }
}

/// Destination of queued events
trait EventSink: Send {
    fn publish(
        &mut self,
        event: DiskEvent,
        owner: OwnerReference,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Delivers events through the API server, one recorder per owner
struct KubeEventSink {
    client: Client,
    reporter: Reporter,
    recorders: HashMap<String, Recorder>,
}

impl KubeEventSink {
    fn new(client: Client, reporter: Reporter) -> Self {
        Self {
            client,
            reporter,
            recorders: HashMap::new(),
        }
    }

    /// Recorder for `owner`, cached once the owner's UID is known
    async fn recorder(&mut self, owner: &OwnerReference) -> Recorder {
        let key = owner.key();
        if let Some(recorder) = self.recorders.get(&key) {
            return recorder.clone();
        }

        let api: Api<LocalVolume> = Api::namespaced(self.client.clone(), &owner.namespace);
        match api.get(&owner.name).await {
            Ok(lv) => {
                let recorder =
                    Recorder::new(self.client.clone(), self.reporter.clone(), lv.object_ref(&()));
                self.recorders.insert(key, recorder.clone());
                recorder
            }
            Err(e) => {
                debug!("Unable to fetch owner {}: {}", key, e);
                Recorder::new(
                    self.client.clone(),
                    self.reporter.clone(),
                    bare_object_reference(owner),
                )
            }
        }
    }
}

impl EventSink for KubeEventSink {
    fn publish(
        &mut self,
        event: DiskEvent,
        owner: OwnerReference,
    ) -> impl Future<Output = Result<()>> + Send {
        async move {
            let recorder = self.recorder(&owner).await;
            recorder
                .publish(Event {
                    type_: match event.kind {
                        EventKind::Normal => EventType::Normal,
                        EventKind::Warning => EventType::Warning,
                    },
                    reason: event.reason.to_string(),
                    note: Some(event.message),
                    action: "Reconcile".into(),
                    secondary: None,
                })
                .await
                .map_err(Error::from)
        }
    }
}

/// Publish until shutdown, then flush what is still queued
async fn publish_loop<S: EventSink>(
    mut sink: S,
    mut rx: mpsc::Receiver<QueuedEvent>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            queued = rx.recv() => match queued {
                Some((event, owner)) => deliver(&mut sink, event, owner).await,
                None => {
                    debug!("Event publisher exiting");
                    return;
                }
            },
        }
    }

    rx.close();
    let drain = async {
        while let Some((event, owner)) = rx.recv().await {
            deliver(&mut sink, event, owner).await;
        }
    };
    if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
        warn!("Timed out flushing queued events");
    }
    debug!("Event publisher exiting");
}

async fn deliver<S: EventSink>(sink: &mut S, event: DiskEvent, owner: OwnerReference) {
    let reason = event.reason;
    let key = owner.key();
    if let Err(e) = sink.publish(event, owner).await {
        warn!("Failed to publish event {} for {}: {}", reason, key, e);
    }
}

fn bare_object_reference(owner: &OwnerReference) -> ObjectReference {
    ObjectReference {
        api_version: Some(owner.api_version.clone()),
        kind: Some(owner.kind.clone()),
        name: Some(owner.name.clone()),
        namespace: Some(owner.namespace.clone()),
        ..Default::default()
    }
}
