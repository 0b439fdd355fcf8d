//! Single reactive value guarded by a tracker layer.

use std::cell::RefCell;
use std::fmt;

use crate::handle::{Handle, LayerId};
use crate::table::LayerOverflow;
use crate::tracker::Tracker;

/// A value whose reads can be tracked and whose writes notify listeners.
///
/// The attribute does not hold its tracker; the owner passes the same tracker
/// to every call, typically because both live in the same struct.
pub struct Attribute<T> {
    layer: LayerId,
    owner: u64,
    value: RefCell<T>,
}

impl<T> Attribute<T> {
    /// Allocate a layer on `tracker` for this value.
    pub fn new(tracker: &Tracker, initial: T) -> Result<Self, LayerOverflow> {
        Ok(Self {
            layer: tracker.allocate(1)?,
            owner: tracker.id(),
            value: RefCell::new(initial),
        })
    }

    pub fn layer(&self) -> LayerId {
        self.layer
    }

    fn check_owner(&self, tracker: &Tracker) {
        debug_assert_eq!(
            self.owner,
            tracker.id(),
            "attribute on {} used with a different tracker",
            self.layer
        );
    }

    /// Tracked read through a closure, without cloning.
    pub fn with<R>(&self, tracker: &Tracker, f: impl FnOnce(&T) -> R) -> R {
        self.check_owner(tracker);
        tracker.track(self.layer);
        f(&self.value.borrow())
    }

    /// Replace the value and notify listeners even if nothing changed.
    pub fn set_always(&self, tracker: &Tracker, value: T) {
        self.check_owner(tracker);
        *self.value.borrow_mut() = value;
        tracker.broadcast(self.layer);
    }

    pub fn update(&self, tracker: &Tracker, f: impl FnOnce(&mut T)) {
        self.check_owner(tracker);
        f(&mut self.value.borrow_mut());
        tracker.broadcast(self.layer);
    }

    /// Notify listeners without touching the value.
    pub fn mark_dirty(&self, tracker: &Tracker) {
        self.check_owner(tracker);
        tracker.broadcast(self.layer);
    }

    /// Listen for writes.
    pub fn bind(&self, tracker: &Tracker, f: impl Fn() + 'static) -> Handle {
        self.check_owner(tracker);
        tracker.bind(self.layer, f)
    }
}

impl<T: Clone> Attribute<T> {
    /// Read the value and record the read on the running effect.
    pub fn get(&self, tracker: &Tracker) -> T {
        self.with(tracker, T::clone)
    }

    pub fn get_untracked(&self) -> T {
        self.value.borrow().clone()
    }
}

impl<T: PartialEq> Attribute<T> {
    /// Store `value` and notify listeners if it differs from the current one.
    pub fn set(&self, tracker: &Tracker, value: T) -> bool {
        self.check_owner(tracker);
        {
            let mut current = self.value.borrow_mut();
            if *current == value {
                return false;
            }
            *current = value;
        }
        tracker.broadcast(self.layer);
        true
    }
}

impl<T: fmt::Debug> fmt::Debug for Attribute<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attribute")
            .field("layer", &self.layer)
            .field("value", &self.value.borrow())
            .finish()
    }
}
