//! The bundle model.
//!
//! A bundle is a unit of code plus metadata that can be installed, started,
//! and stopped independently.  Loading actual code is the job of an external
//! loader; inside the platform a bundle is its identity, its parsed manifest,
//! and a state machine:
//!
//! ```text
//! install ──► Installed ──► Resolved ──► Starting ──► Active
//!                              ▲                        │
//!                              └──────── Stopping ◄─────┘
//! ```

use std::fmt;

use parking_lot::RwLock;

use solder_core::BundleManifest;

/// Lifecycle states of a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleState {
    /// Installed but not yet resolved.
    Installed,
    /// Metadata validated; the bundle can be started.
    Resolved,
    /// Start in progress.
    Starting,
    /// Running; its services and components are live.
    Active,
    /// Stop in progress; listeners and registrations are being evicted.
    Stopping,
}

/// A unit of code plus metadata hosted by the framework.
///
/// `Bundle` is handed out as `Arc<Bundle>`; registrations and listener
/// entries hold only weak edges back to it, so a bundle's teardown is driven
/// by the framework and never by reference counting.
pub struct Bundle {
    id: u64,
    symbolic_name: String,
    manifest: Option<BundleManifest>,
    state: RwLock<BundleState>,
}

impl Bundle {
    pub(crate) fn new(id: u64, symbolic_name: String, manifest: Option<BundleManifest>) -> Self {
        Self {
            id,
            symbolic_name,
            manifest,
            state: RwLock::new(BundleState::Installed),
        }
    }

    /// Process-unique bundle id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The bundle's symbolic name.
    pub fn symbolic_name(&self) -> &str {
        &self.symbolic_name
    }

    /// Parsed component metadata, when the bundle carries any.
    pub fn manifest(&self) -> Option<&BundleManifest> {
        self.manifest.as_ref()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> BundleState {
        *self.state.read()
    }

    pub(crate) fn set_state(&self, state: BundleState) {
        *self.state.write() = state;
    }

    /// Whether the bundle can currently use its context — services may only
    /// be registered and consumed from a starting, active, or stopping
    /// bundle.
    pub fn is_usable(&self) -> bool {
        matches!(
            self.state(),
            BundleState::Starting | BundleState::Active | BundleState::Stopping
        )
    }
}

impl fmt::Debug for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bundle")
            .field("id", &self.id)
            .field("symbolic_name", &self.symbolic_name)
            .field("state", &self.state())
            .finish()
    }
}
