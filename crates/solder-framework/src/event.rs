//! Service, bundle, and framework events.
//!
//! Every event type here is delivered the same way: a snapshot of the
//! interested listeners is taken under the owning lock, the lock is released,
//! and the callbacks run lock-free.  A failing callback is contained — it is
//! logged (and, for user code, surfaced as a framework error event) and never
//! prevents delivery to the remaining listeners.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::error;

use solder_core::ServiceError;

use crate::bundle::Bundle;
use crate::registry::ServiceReference;

// ─── Service events ───────────────────────────────────────────────────────────

/// What happened to a registration.
///
/// For a single registration the kinds are totally ordered:
/// `Registered` < any `Modified`/`ModifiedEndmatch` < `Unregistering`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceEventKind {
    /// The registration was just published.
    Registered,
    /// The registration's properties changed and still match the listener.
    Modified,
    /// The registration's properties changed and no longer match a filter
    /// they previously matched.
    ModifiedEndmatch,
    /// The registration is about to be removed.
    Unregistering,
}

/// A change to one service registration, as observed through one interface.
#[derive(Debug, Clone)]
pub struct ServiceEvent {
    /// The kind of change.
    pub kind: ServiceEventKind,
    /// Reference to the affected registration.
    pub reference: ServiceReference,
}

/// Callback invoked for matching service events.
pub type ServiceListener = Arc<dyn Fn(&ServiceEvent) + Send + Sync>;

// ─── Bundle events ────────────────────────────────────────────────────────────

/// Lifecycle notifications for bundles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleEventKind {
    /// The bundle was installed and resolved.
    Installed,
    /// The bundle reached `Active`.
    Started,
    /// The bundle is about to stop; components must tear down now.
    Stopping,
    /// The bundle finished stopping.
    Stopped,
}

/// A bundle lifecycle event.
#[derive(Clone)]
pub struct BundleEvent {
    /// The kind of transition.
    pub kind: BundleEventKind,
    /// The affected bundle.
    pub bundle: Arc<Bundle>,
}

/// Callback invoked for bundle lifecycle events.
pub type BundleListener = Arc<dyn Fn(&BundleEvent) + Send + Sync>;

// ─── Framework events ─────────────────────────────────────────────────────────

/// Severity of a framework event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameworkEventKind {
    /// A user callback failed or an internal invariant was violated.
    Error,
    /// Something suspicious that the framework recovered from.
    Warning,
    /// Informational.
    Info,
}

/// An out-of-band notification from the framework, typically carrying a
/// user-code failure that must not propagate to unrelated callers.
#[derive(Clone)]
pub struct FrameworkEvent {
    /// Severity.
    pub kind: FrameworkEventKind,
    /// The bundle the event is attributed to, when known.
    pub bundle: Option<Arc<Bundle>>,
    /// Human-readable description.
    pub message: String,
    /// The original error, when one exists.
    pub error: Option<ServiceError>,
}

/// Callback invoked for framework events.
pub type FrameworkListener = Arc<dyn Fn(&FrameworkEvent) + Send + Sync>;

/// Token-indexed fan-out of [`FrameworkEvent`]s.
///
/// Shared between the framework handle (which exposes listener registration)
/// and the registry (which reports user-callback failures).
#[derive(Default)]
pub struct EventHub {
    listeners: RwLock<Vec<(u64, FrameworkListener)>>,
    next_token: AtomicU64,
}

impl EventHub {
    /// Creates an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `listener`; the returned token unsubscribes it.
    pub fn add_listener(&self, listener: FrameworkListener) -> u64 {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.listeners.write().push((token, listener));
        token
    }

    /// Removes the listener registered under `token`.
    pub fn remove_listener(&self, token: u64) {
        self.listeners.write().retain(|(t, _)| *t != token);
    }

    /// Delivers `event` to a snapshot of the current listeners.
    ///
    /// A panicking listener is logged and skipped; it cannot suppress
    /// delivery to the others.
    pub fn post(&self, event: FrameworkEvent) {
        if let (FrameworkEventKind::Error, Some(err)) = (event.kind, &event.error) {
            error!(
                bundle = event.bundle.as_ref().map(|b| b.symbolic_name()).unwrap_or("<none>"),
                error = %err,
                "{}", event.message
            );
        }
        let snapshot: Vec<FrameworkListener> =
            self.listeners.read().iter().map(|(_, l)| Arc::clone(l)).collect();
        for listener in snapshot {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener(&event);
            }));
            if result.is_err() {
                error!("framework event listener panicked");
            }
        }
    }

    /// Convenience for the common error case.
    pub fn post_error(&self, bundle: Option<Arc<Bundle>>, message: impl Into<String>, error: ServiceError) {
        self.post(FrameworkEvent {
            kind: FrameworkEventKind::Error,
            bundle,
            message: message.into(),
            error: Some(error),
        });
    }
}
