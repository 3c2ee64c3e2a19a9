//! Listener registry
//!
//! Keeps exactly one handler per `(element, slot)` pair. Binding a slot that
//! is already bound detaches the old host listener before the new one is
//! attached, so a double registration is never observable by the host.

use crate::host::{EventKind, ListenerKey, MediaRef};
use crate::looper::LoopWindow;
use crate::types::MediaId;
use std::collections::{BTreeMap, HashMap};
use tracing::trace;

/// Logical owner of a listener on an element
///
/// Several slots may listen to the same host event (progress reporting and
/// the AB-loop watcher both follow `timeupdate`). Dispatch runs them in slot
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ListenerSlot {
    Progress,
    Play,
    Visibility,
    AbLoop,
    RateWatch,
    LoopWatch,
    PipWatch,
    AdSignal,
}

impl ListenerSlot {
    /// Host event the slot listens to
    pub fn event_kind(&self) -> EventKind {
        match self {
            ListenerSlot::Progress | ListenerSlot::AbLoop => EventKind::TimeUpdate,
            ListenerSlot::Play => EventKind::Play,
            ListenerSlot::Visibility => EventKind::Visibility,
            ListenerSlot::RateWatch => EventKind::RateChange,
            ListenerSlot::LoopWatch => EventKind::LoopAttribute,
            ListenerSlot::PipWatch => EventKind::PictureInPicture,
            ListenerSlot::AdSignal => EventKind::AdState,
        }
    }
}

/// Work a session listener performs when its event fires
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Handler {
    /// Refresh the candidate's progress in the badge
    Progress,
    /// Promote the element to real player
    Promote,
    TrackVisibility,
    /// Seek back to `a` once `b` is crossed
    Loop(LoopWindow),
    /// Copy an element property back into the config
    SyncConfig,
    /// Fast-forward while the site shows an ad
    SkipAd,
}

struct Binding<H> {
    element: MediaRef,
    key: ListenerKey,
    handler: H,
}

impl<H> Binding<H> {
    fn detach(self, slot: ListenerSlot) {
        self.element.unlisten(slot.event_kind(), self.key);
    }
}

/// Per-element listener bookkeeping
pub struct ListenerRegistry<H> {
    bindings: HashMap<MediaId, BTreeMap<ListenerSlot, Binding<H>>>,
}

impl<H> Default for ListenerRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> ListenerRegistry<H> {
    pub fn new() -> Self {
        Self {
            bindings: HashMap::new(),
        }
    }

    /// Bind `handler` to `slot` on `element`, replacing any previous handler
    ///
    /// Returns true when a previous handler was replaced.
    pub fn bind(&mut self, id: &MediaId, element: &MediaRef, slot: ListenerSlot, handler: H) -> bool {
        let slots = self.bindings.entry(id.clone()).or_default();
        let replaced = match slots.remove(&slot) {
            Some(previous) => {
                previous.detach(slot);
                true
            }
            None => false,
        };

        let key = element.listen(slot.event_kind());
        slots.insert(
            slot,
            Binding {
                element: element.clone(),
                key,
                handler,
            },
        );
        trace!(media = %id, ?slot, replaced, "Listener bound");
        replaced
    }

    /// Detach one slot; returns false when it was not bound
    pub fn unbind(&mut self, id: &MediaId, slot: ListenerSlot) -> bool {
        let Some(slots) = self.bindings.get_mut(id) else {
            return false;
        };
        let removed = match slots.remove(&slot) {
            Some(binding) => {
                binding.detach(slot);
                true
            }
            None => false,
        };
        if slots.is_empty() {
            self.bindings.remove(id);
        }
        removed
    }

    /// Detach every slot of one element; returns the number detached
    pub fn unbind_all(&mut self, id: &MediaId) -> usize {
        let Some(slots) = self.bindings.remove(id) else {
            return 0;
        };
        let count = slots.len();
        for (slot, binding) in slots {
            binding.detach(slot);
        }
        trace!(media = %id, count, "Listeners cleared");
        count
    }

    /// Detach everything; returns the number detached
    pub fn unbind_everything(&mut self) -> usize {
        let ids: Vec<MediaId> = self.bindings.keys().cloned().collect();
        ids.iter().map(|id| self.unbind_all(id)).sum()
    }

    pub fn is_bound(&self, id: &MediaId, slot: ListenerSlot) -> bool {
        self.bindings
            .get(id)
            .map(|slots| slots.contains_key(&slot))
            .unwrap_or(false)
    }

    pub fn handler(&self, id: &MediaId, slot: ListenerSlot) -> Option<&H> {
        self.bindings
            .get(id)
            .and_then(|slots| slots.get(&slot))
            .map(|binding| &binding.handler)
    }

    /// Bound slots of `id` that listen to `kind`, in dispatch order
    pub fn slots_for(&self, id: &MediaId, kind: EventKind) -> Vec<ListenerSlot> {
        self.bindings
            .get(id)
            .map(|slots| {
                slots
                    .keys()
                    .copied()
                    .filter(|slot| slot.event_kind() == kind)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of bindings held for one element
    pub fn bindings_for(&self, id: &MediaId) -> usize {
        self.bindings.get(id).map(BTreeMap::len).unwrap_or(0)
    }

    /// Number of elements with at least one binding
    pub fn element_count(&self) -> usize {
        self.bindings.len()
    }

    /// Total number of bindings
    pub fn len(&self) -> usize {
        self.bindings.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl<H> Drop for ListenerRegistry<H> {
    fn drop(&mut self) {
        self.unbind_everything();
    }
}
