//! Filter-indexed service listener set.
//!
//! Listeners whose filter pins `objectClass` with an equality test are
//! indexed by that interface name, so event emission only evaluates the
//! filters that can possibly match.  Everything else lands in the unindexed
//! pool and is evaluated on every event.
//!
//! All lookups return snapshots; callbacks never run under the set's lock.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use solder_core::constants::OBJECT_CLASS;
use solder_core::{Filter, Properties};

use crate::bundle::Bundle;
use crate::event::ServiceListener;

/// One subscribed listener: origin bundle, compiled filter, callback, token.
pub(crate) struct ListenerEntry {
    pub(crate) token: u64,
    pub(crate) bundle: Weak<Bundle>,
    pub(crate) filter: Option<Filter>,
    pub(crate) listener: ServiceListener,
}

impl ListenerEntry {
    fn matches(&self, props: &Properties) -> bool {
        self.filter.as_ref().is_none_or(|f| f.matches(props))
    }
}

#[derive(Default)]
struct SetState {
    entries: HashMap<u64, Arc<ListenerEntry>>,
    /// Tokens of listeners pinned to one interface via their filter.
    by_objectclass: HashMap<String, HashSet<u64>>,
    /// Tokens of listeners that must be evaluated on every event.
    unindexed: HashSet<u64>,
}

/// The registry's subscriber table.
#[derive(Default)]
pub(crate) struct ListenerSet {
    state: RwLock<SetState>,
    next_token: AtomicU64,
}

impl ListenerSet {
    /// Subscribes a listener owned by `bundle`.  Returns its token.
    pub(crate) fn add(
        &self,
        bundle: &Arc<Bundle>,
        filter: Option<Filter>,
        listener: ServiceListener,
    ) -> u64 {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let hint = filter
            .as_ref()
            .and_then(|f| f.objectclass_hint())
            .map(str::to_string);
        let entry = Arc::new(ListenerEntry {
            token,
            bundle: Arc::downgrade(bundle),
            filter,
            listener,
        });

        let mut state = self.state.write();
        match hint {
            Some(interface) => {
                state.by_objectclass.entry(interface).or_default().insert(token);
            }
            None => {
                state.unindexed.insert(token);
            }
        }
        state.entries.insert(token, entry);
        token
    }

    /// Removes the listener registered under `token`.
    pub(crate) fn remove(&self, token: u64) -> bool {
        let mut state = self.state.write();
        let removed = state.entries.remove(&token).is_some();
        if removed {
            state.unindexed.remove(&token);
            state.by_objectclass.retain(|_, tokens| {
                tokens.remove(&token);
                !tokens.is_empty()
            });
        }
        removed
    }

    /// Evicts every listener the given bundle registered.
    pub(crate) fn remove_bundle(&self, bundle_id: u64) {
        let tokens: Vec<u64> = {
            let state = self.state.read();
            state
                .entries
                .values()
                .filter(|e| e.bundle.upgrade().is_some_and(|b| b.id() == bundle_id))
                .map(|e| e.token)
                .collect()
        };
        for token in tokens {
            self.remove(token);
        }
    }

    /// Candidate tokens for an event with the given `objectClass` values:
    /// the unindexed pool plus every per-interface bucket the event touches.
    fn candidates(&self, state: &SetState, props: &Properties) -> Vec<u64> {
        let mut tokens: Vec<u64> = state.unindexed.iter().copied().collect();
        if let Ok(classes) = props.get_vec(OBJECT_CLASS) {
            for class in classes {
                if let Some(name) = class.as_str()
                    && let Some(bucket) = state.by_objectclass.get(name)
                {
                    tokens.extend(bucket.iter().copied());
                }
            }
        }
        tokens
    }

    /// Snapshot of the listeners matching `props`.
    pub(crate) fn matching(&self, props: &Properties) -> Vec<Arc<ListenerEntry>> {
        let state = self.state.read();
        self.candidates(&state, props)
            .into_iter()
            .filter_map(|token| state.entries.get(&token))
            .filter(|entry| entry.matches(props))
            .map(Arc::clone)
            .collect()
    }

    /// Snapshot of the filtered listeners that matched `before` but no longer
    /// match `after` — the `ModifiedEndmatch` audience.
    pub(crate) fn matching_endmatch(
        &self,
        before: &Properties,
        after: &Properties,
    ) -> Vec<Arc<ListenerEntry>> {
        let state = self.state.read();
        self.candidates(&state, before)
            .into_iter()
            .filter_map(|token| state.entries.get(&token))
            .filter(|entry| {
                entry.filter.is_some() && entry.matches(before) && !entry.matches(after)
            })
            .map(Arc::clone)
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.state.read().entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn bundle() -> Arc<Bundle> {
        Arc::new(Bundle::new(1, "test.bundle".into(), None))
    }

    fn noop() -> ServiceListener {
        Arc::new(|_| {})
    }

    fn props(value: serde_json::Value) -> Properties {
        Properties::from_json(value).unwrap()
    }

    #[test]
    fn objectclass_pinned_listener_only_sees_its_interface() {
        let set = ListenerSet::default();
        let owner = bundle();
        set.add(
            &owner,
            Some(Filter::parse("(objectClass=a.A)").unwrap()),
            noop(),
        );

        let hit = set.matching(&props(json!({"objectClass": ["a.A"]})));
        let miss = set.matching(&props(json!({"objectClass": ["b.B"]})));
        assert_eq!(hit.len(), 1);
        assert!(miss.is_empty());
    }

    #[test]
    fn unfiltered_listener_sees_everything() {
        let set = ListenerSet::default();
        let owner = bundle();
        set.add(&owner, None, noop());

        assert_eq!(set.matching(&props(json!({"objectClass": ["x"]}))).len(), 1);
        assert_eq!(set.matching(&props(json!({}))).len(), 1);
    }

    #[test]
    fn endmatch_targets_only_listeners_losing_their_match() {
        let set = ListenerSet::default();
        let owner = bundle();
        set.add(&owner, Some(Filter::parse("(color=red)").unwrap()), noop());
        set.add(&owner, None, noop());

        let before = props(json!({"objectClass": ["a"], "color": "red"}));
        let after = props(json!({"objectClass": ["a"], "color": "blue"}));

        let endmatch = set.matching_endmatch(&before, &after);
        assert_eq!(endmatch.len(), 1, "unfiltered listener is not an endmatch target");
    }

    #[test]
    fn remove_bundle_evicts_all_of_its_listeners() {
        let set = ListenerSet::default();
        let owner = bundle();
        let count = Arc::new(AtomicUsize::new(0));
        let probe = Arc::clone(&count);
        set.add(
            &owner,
            None,
            Arc::new(move |_| {
                probe.fetch_add(1, Ordering::SeqCst);
            }),
        );
        set.add(&owner, Some(Filter::parse("(objectClass=a)").unwrap()), noop());
        assert_eq!(set.len(), 2);

        set.remove_bundle(owner.id());
        assert_eq!(set.len(), 0);
    }
}
