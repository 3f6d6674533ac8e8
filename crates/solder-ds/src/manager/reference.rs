//! Per-reference dependency tracking.
//!
//! One [`ReferenceManager`] exists per declared reference.  It subscribes to
//! the registry for the target interface (narrowed by the reference's target
//! filter, which rides the listener set's `objectClass` index), keeps the
//! matching candidates in rank order, and maintains the bound set according
//! to cardinality and policy option:
//!
//! - unary (`0..1` / `1..1`): at most one bound target, the highest ranked;
//!   greedy managers rebind when a better candidate appears, reluctant ones
//!   keep what they have;
//! - multiple (`0..n` / `1..n`): every matching candidate is bound.
//!
//! The manager itself never touches the component — it reports
//! [`ReferenceShift`]s to its sink *after* releasing its own lock, and the
//! component configuration decides what the shift means under its policy.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use solder_core::metadata::{PolicyOption, ReferenceMetadata};
use solder_core::ServiceResult;
use solder_framework::{
    BundleContext, ServiceEvent, ServiceEventKind, ServiceReference,
};

use crate::manager::configuration::ComponentConfiguration;

/// A change to a reference's bound set, delivered to the owning component.
#[derive(Default)]
pub(crate) struct ReferenceShift {
    /// Targets that entered the bound set.
    pub(crate) newly_bound: Vec<ServiceReference>,
    /// Targets that left the bound set.
    pub(crate) newly_unbound: Vec<ServiceReference>,
    /// Satisfaction before the change.
    pub(crate) was_satisfied: bool,
    /// Satisfaction after the change.
    pub(crate) is_satisfied: bool,
}

impl ReferenceShift {
    fn is_meaningful(&self) -> bool {
        !self.newly_bound.is_empty()
            || !self.newly_unbound.is_empty()
            || self.was_satisfied != self.is_satisfied
    }
}

#[derive(Default)]
struct RefState {
    /// Candidates matching interface and target filter, rank order.
    matched: Vec<ServiceReference>,
    /// Currently bound targets, rank order.
    bound: Vec<ServiceReference>,
}

impl RefState {
    fn insert_sorted(list: &mut Vec<ServiceReference>, reference: ServiceReference) {
        let position = list
            .binary_search_by(|existing| existing.cmp(&reference))
            .unwrap_or_else(|p| p);
        list.insert(position, reference);
    }
}

/// Tracks one declared reference of one component configuration.
pub(crate) struct ReferenceManager {
    metadata: ReferenceMetadata,
    /// Listener filter: `(&(objectClass=<interface>)<target>)`.
    listen_filter: String,
    context: BundleContext,
    state: Mutex<RefState>,
    listener_token: Mutex<Option<u64>>,
    /// The owning component configuration; weak to break the cycle through
    /// the registry listener closure.
    sink: Mutex<Option<Weak<ComponentConfiguration>>>,
}

impl ReferenceManager {
    pub(crate) fn new(metadata: ReferenceMetadata, context: BundleContext) -> Arc<Self> {
        let listen_filter = match &metadata.target {
            Some(target) => format!("(&(objectClass={}){target})", metadata.interface),
            None => format!("(objectClass={})", metadata.interface),
        };
        Arc::new(Self {
            metadata,
            listen_filter,
            context,
            state: Mutex::new(RefState::default()),
            listener_token: Mutex::new(None),
            sink: Mutex::new(None),
        })
    }

    pub(crate) fn metadata(&self) -> &ReferenceMetadata {
        &self.metadata
    }

    /// Whether enough targets are bound.
    pub(crate) fn is_satisfied(&self) -> bool {
        self.state.lock().bound.len() >= self.metadata.cardinality.min()
    }

    /// Snapshot of the bound targets, best first.
    pub(crate) fn bound(&self) -> Vec<ServiceReference> {
        self.state.lock().bound.clone()
    }

    /// Subscribes to the registry and seeds the candidate set.
    ///
    /// Subscription happens before seeding so no registration slips through
    /// the gap; duplicates are collapsed by identity.
    pub(crate) fn open(
        self: &Arc<Self>,
        sink: Weak<ComponentConfiguration>,
    ) -> ServiceResult<()> {
        *self.sink.lock() = Some(sink);

        let manager = Arc::clone(self);
        let token = self.context.add_service_listener(
            Some(&self.listen_filter),
            Arc::new(move |event| manager.on_service_event(event)),
        )?;
        *self.listener_token.lock() = Some(token);

        let seeds = self
            .context
            .get_service_references(&self.metadata.interface, self.metadata.target.as_deref())?;
        for reference in seeds {
            self.on_service_event(&ServiceEvent {
                kind: ServiceEventKind::Registered,
                reference,
            });
        }
        Ok(())
    }

    /// Unsubscribes and drops all tracked state.
    pub(crate) fn close(&self) {
        if let Some(token) = self.listener_token.lock().take() {
            self.context.remove_service_listener(token);
        }
        *self.sink.lock() = None;
        let mut state = self.state.lock();
        state.matched.clear();
        state.bound.clear();
    }

    fn on_service_event(&self, event: &ServiceEvent) {
        let Some(reference) = event.reference.for_interface(&self.metadata.interface) else {
            return;
        };

        let shift = {
            let mut state = self.state.lock();
            let was_satisfied = state.bound.len() >= self.metadata.cardinality.min();
            let mut shift = ReferenceShift {
                was_satisfied,
                ..ReferenceShift::default()
            };
            match event.kind {
                ServiceEventKind::Registered | ServiceEventKind::Modified => {
                    self.candidate_up(&mut state, reference, &mut shift);
                }
                ServiceEventKind::ModifiedEndmatch | ServiceEventKind::Unregistering => {
                    self.candidate_down(&mut state, &reference, &mut shift);
                }
            }
            shift.is_satisfied = state.bound.len() >= self.metadata.cardinality.min();
            shift
        };

        // The sink takes the component's transition lock; ours is released.
        if shift.is_meaningful()
            && let Some(sink) = self.sink.lock().clone()
            && let Some(component) = sink.upgrade()
        {
            debug!(
                reference = %self.metadata.name,
                bound = shift.newly_bound.len(),
                unbound = shift.newly_unbound.len(),
                satisfied = shift.is_satisfied,
                "Reference shift"
            );
            component.on_reference_shift(&self.metadata, shift);
        }
    }

    fn candidate_up(
        &self,
        state: &mut RefState,
        reference: ServiceReference,
        shift: &mut ReferenceShift,
    ) {
        // Re-insert to pick up ranking changes carried by Modified events.
        state.matched.retain(|r| r != &reference);
        RefState::insert_sorted(&mut state.matched, reference.clone());

        if self.metadata.cardinality.is_multiple() {
            if !state.bound.contains(&reference) {
                RefState::insert_sorted(&mut state.bound, reference.clone());
                shift.newly_bound.push(reference);
            }
            return;
        }

        // Unary: bind when empty; displace only under the greedy option.
        // The best candidate is recomputed from the sorted set so ranking
        // changes on either side of the comparison are honoured.
        let Some(best) = state.matched.first().cloned() else {
            return;
        };
        match state.bound.first().cloned() {
            None => {
                state.bound.push(best.clone());
                shift.newly_bound.push(best);
            }
            Some(current) => {
                if self.metadata.policy_option == PolicyOption::Greedy && best != current {
                    state.bound.clear();
                    state.bound.push(best.clone());
                    shift.newly_unbound.push(current);
                    shift.newly_bound.push(best);
                }
            }
        }
    }

    fn candidate_down(
        &self,
        state: &mut RefState,
        reference: &ServiceReference,
        shift: &mut ReferenceShift,
    ) {
        state.matched.retain(|r| r != reference);
        if !state.bound.contains(reference) {
            return;
        }
        state.bound.retain(|r| r != reference);
        shift.newly_unbound.push(reference.clone());

        // Unary references re-pick the best remaining candidate.
        if !self.metadata.cardinality.is_multiple()
            && let Some(replacement) = state.matched.first().cloned()
        {
            state.bound.push(replacement.clone());
            shift.newly_bound.push(replacement);
        }
    }
}
