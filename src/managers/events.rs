//! Kubernetes Events for session outcomes
//!
//! Events are fire-and-forget: a failed publish is logged and never turns
//! into a session error. Every event is logged as well, so outcomes are
//! visible even when the API server rejects the event.

use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use std::fmt;
use tokio::runtime::Handle;
use tracing::{info, warn};

pub const REPORTING_COMPONENT: &str = "stash-backup";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Normal,
    Warning,
}

/// Reasons shown under REASON in `kubectl get events`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventReason {
    FailedSetup,
    FailedToBackup,
    FailedToRetention,
    FailedCheckJobCreation,
    CheckJobCreated,
    SuccessfulBackup,
}

impl EventReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventReason::FailedSetup => "FailedSetup",
            EventReason::FailedToBackup => "FailedToBackup",
            EventReason::FailedToRetention => "FailedToRetention",
            EventReason::FailedCheckJobCreation => "FailedCheckJobCreation",
            EventReason::CheckJobCreated => "CheckJobCreated",
            EventReason::SuccessfulBackup => "SuccessfulBackup",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            EventReason::CheckJobCreated | EventReason::SuccessfulBackup => Severity::Normal,
            _ => Severity::Warning,
        }
    }

    /// Action reported alongside the reason
    fn action(&self) -> &'static str {
        match self {
            EventReason::FailedSetup => "Setup",
            EventReason::FailedToBackup | EventReason::SuccessfulBackup => "Backup",
            EventReason::FailedToRetention => "Retention",
            EventReason::FailedCheckJobCreation | EventReason::CheckJobCreated => "CreateCheckJob",
        }
    }
}

impl fmt::Display for EventReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Publishes events against an object reference
pub trait EventRecorder: Send + Sync {
    /// Deliver one event; implementations swallow their own failures
    fn record(&self, reference: &ObjectReference, reason: EventReason, message: &str);

    /// Log the event, then deliver it
    fn report(&self, reference: &ObjectReference, reason: EventReason, message: &str) {
        let object = reference.name.as_deref().unwrap_or_default();
        match reason.severity() {
            Severity::Normal => info!(object, reason = %reason, "{}", message),
            Severity::Warning => warn!(object, reason = %reason, "{}", message),
        }
        self.record(reference, reason, message);
    }
}

/// Production recorder wrapping `kube::runtime::events::Recorder`
pub struct KubeEventRecorder {
    recorder: Recorder,
    handle: Handle,
}

impl KubeEventRecorder {
    /// `instance` becomes the reporting instance, usually the pod name
    pub fn new(client: Client, handle: Handle, instance: Option<String>) -> Self {
        let reporter = Reporter {
            controller: REPORTING_COMPONENT.to_string(),
            instance,
        };
        Self {
            recorder: Recorder::new(client, reporter),
            handle,
        }
    }
}

impl EventRecorder for KubeEventRecorder {
    fn record(&self, reference: &ObjectReference, reason: EventReason, message: &str) {
        let event = Event {
            type_: match reason.severity() {
                Severity::Normal => EventType::Normal,
                Severity::Warning => EventType::Warning,
            },
            reason: reason.as_str().to_string(),
            note: Some(message.to_string()),
            action: reason.action().to_string(),
            secondary: None,
        };
        if let Err(e) = self.handle.block_on(self.recorder.publish(&event, reference)) {
            warn!(
                reason = %reason,
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// Recording implementation for tests
/// Available for use in external test crates
pub mod mock {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Debug, PartialEq)]
    pub struct RecordedEvent {
        pub object: String,
        pub reason: EventReason,
        pub message: String,
    }

    #[derive(Clone, Default)]
    pub struct MockEventRecorder {
        pub events: Arc<Mutex<Vec<RecordedEvent>>>,
    }

    impl MockEventRecorder {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn get_events(&self) -> Vec<RecordedEvent> {
            self.events.lock().unwrap().clone()
        }

        pub fn count(&self, reason: EventReason) -> usize {
            self.get_events().iter().filter(|e| e.reason == reason).count()
        }

        pub fn warnings(&self) -> Vec<RecordedEvent> {
            self.get_events()
                .into_iter()
                .filter(|e| e.reason.severity() == Severity::Warning)
                .collect()
        }

        pub fn reasons(&self) -> Vec<EventReason> {
            self.get_events().iter().map(|e| e.reason).collect()
        }
    }

    impl EventRecorder for MockEventRecorder {
        fn record(&self, reference: &ObjectReference, reason: EventReason, message: &str) {
            self.events.lock().unwrap().push(RecordedEvent {
                object: reference.name.clone().unwrap_or_default(),
                reason,
                message: message.to_string(),
            });
        }
    }
}
