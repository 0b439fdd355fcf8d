//! Broadcast point owned by an attribute holder.
//!
//! A [`Tracker`] owns one [`HandleTable`]. Each attribute it guards gets a
//! layer, and every listener of that attribute (plain callbacks and effect
//! bodies alike) is bound on that layer. Layer 0 is reserved for the bodies
//! of effects hosted on this tracker.
//!
//! Trackers are not clonable: whoever owns the tracker decides how long it
//! lives. Effects only ever keep a [`WeakTracker`], so a dropped tracker is
//! simply skipped.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::trace;

use crate::handle::{EFFECT_LAYER, Handle, LayerId};
use crate::runtime::Runtime;
use crate::table::{Callback, HandleTable, LayerOverflow};

pub(crate) struct TrackerInner {
    id: u64,
    runtime: Runtime,
    table: RefCell<HandleTable>,
}

pub struct Tracker {
    inner: Rc<TrackerInner>,
}

impl Tracker {
    pub fn new(runtime: &Runtime) -> Self {
        let mut table = HandleTable::with_serials(runtime.serials());
        // A fresh table always has room for the effect layer.
        let effect_layer = table.allocate(1);
        debug_assert_eq!(effect_layer, Ok(EFFECT_LAYER));

        Self {
            inner: Rc::new(TrackerInner {
                id: runtime.next_tracker_id(),
                runtime: runtime.clone(),
                table: RefCell::new(table),
            }),
        }
    }

    /// Id unique within the tracker's runtime, stable for its lifetime.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    pub fn allocate(&self, count: usize) -> Result<LayerId, LayerOverflow> {
        self.inner.table.borrow_mut().allocate(count)
    }

    pub fn layer_count(&self) -> usize {
        self.inner.table.borrow().layer_count()
    }

    pub fn bind(&self, layer: LayerId, f: impl Fn() + 'static) -> Handle {
        self.bind_callback(layer, Some(Rc::new(f)))
    }

    pub fn bind_callback(&self, layer: LayerId, callback: Option<Callback>) -> Handle {
        self.inner.table.borrow_mut().add_callback(layer, callback)
    }

    pub fn copy_callback_into(&self, layer: LayerId, callback: &Callback) -> Handle {
        self.inner.table.borrow_mut().copy_callback_into(layer, callback)
    }

    pub fn unbind(&self, handle: Handle) -> bool {
        self.inner.table.borrow_mut().remove_callback(handle)
    }

    pub fn is_bound(&self, handle: Handle) -> bool {
        self.inner.table.borrow().contains(handle)
    }

    pub fn callback(&self, handle: Handle) -> Option<Callback> {
        self.inner.table.borrow().callback(handle)
    }

    /// Call the callback behind `handle`, if it is still bound.
    pub fn invoke(&self, handle: Handle) -> bool {
        // Release the table before calling out; the callback may bind.
        let callback = self.callback(handle);
        match callback {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }

    /// Call every listener on `layer` and return how many ran.
    ///
    /// Listeners are snapshotted first, so binds and unbinds made by a
    /// listener apply from the next broadcast on. Reads made by listeners are
    /// not attributed to whichever effect triggered the broadcast.
    pub fn broadcast(&self, layer: LayerId) -> usize {
        let listeners = self.inner.table.borrow().callbacks(layer);
        if listeners.is_empty() {
            return 0;
        }
        trace!(tracker = self.id(), %layer, listeners = listeners.len(), "broadcast");
        self.inner.runtime.untracked(|| {
            for listener in &listeners {
                listener();
            }
        });
        listeners.len()
    }

    pub fn clear_layer(&self, layer: LayerId) {
        self.inner.table.borrow_mut().clear_layer(layer);
    }

    pub fn clear_all(&self) {
        self.inner.table.borrow_mut().clear_all();
    }

    pub fn listener_count(&self, layer: LayerId) -> usize {
        self.inner.table.borrow().len(layer)
    }

    /// Tracked-read hook: tell the runtime the current effect read `layer`.
    pub fn track(&self, layer: LayerId) {
        self.inner.runtime.update_dependency(self, layer);
    }

    pub fn downgrade(&self) -> WeakTracker {
        WeakTracker {
            id: self.inner.id,
            inner: Rc::downgrade(&self.inner),
        }
    }
}

impl fmt::Debug for Tracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracker")
            .field("id", &self.inner.id)
            .field("table", &self.inner.table.borrow())
            .finish()
    }
}

/// Non-owning reference to a [`Tracker`].
#[derive(Clone)]
pub struct WeakTracker {
    id: u64,
    inner: Weak<TrackerInner>,
}

impl WeakTracker {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_live(&self) -> bool {
        self.inner.strong_count() > 0
    }

    pub fn points_to(&self, tracker: &Tracker) -> bool {
        self.inner.as_ptr() == Rc::as_ptr(&tracker.inner)
    }

    pub(crate) fn upgrade(&self) -> Option<Tracker> {
        self.inner.upgrade().map(|inner| Tracker { inner })
    }
}

impl fmt::Debug for WeakTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakTracker")
            .field("id", &self.id)
            .field("live", &self.is_live())
            .finish()
    }
}
