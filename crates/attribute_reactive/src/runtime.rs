//! Reactive context.
//!
//! A [`Runtime`] owns the state that has to be shared by everything that
//! can observe everything else: the handle serial counter and the stack of
//! effects currently running. Create one per isolated domain (a world, a
//! test); cloning it shares the same context.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::effect::EffectState;
use crate::handle::LayerId;
use crate::table::SerialSource;
use crate::tracker::Tracker;

/// One entry of the active-effect stack.
pub(crate) enum Frame {
    Effect(Rc<RefCell<EffectState>>),
    /// Reads inside this frame are not recorded.
    Untracked,
}

struct RuntimeInner {
    serials: Rc<SerialSource>,
    stack: RefCell<Vec<Frame>>,
    next_tracker_id: Cell<u64>,
}

#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

impl Runtime {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RuntimeInner {
                serials: Rc::new(SerialSource::new()),
                stack: RefCell::new(Vec::new()),
                next_tracker_id: Cell::new(1),
            }),
        }
    }

    pub(crate) fn serials(&self) -> Rc<SerialSource> {
        Rc::clone(&self.inner.serials)
    }

    pub(crate) fn next_tracker_id(&self) -> u64 {
        let id = self.inner.next_tracker_id.get();
        self.inner.next_tracker_id.set(id + 1);
        id
    }

    /// Record that the running effect read `layer` of `tracker`.
    ///
    /// Nothing happens outside an effect or inside [`Runtime::untracked`].
    pub fn update_dependency(&self, tracker: &Tracker, layer: LayerId) {
        let top = match self.inner.stack.borrow().last() {
            Some(Frame::Effect(state)) => Rc::clone(state),
            Some(Frame::Untracked) | None => return,
        };
        EffectState::capture(&top, tracker, layer);
    }

    /// Run `f` without recording any reads it makes.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _frame = self.enter(Frame::Untracked);
        f()
    }

    /// Whether a read right now would be recorded.
    pub fn is_tracking(&self) -> bool {
        matches!(self.inner.stack.borrow().last(), Some(Frame::Effect(_)))
    }

    /// Number of frames on the stack, tracked or not.
    pub fn depth(&self) -> usize {
        self.inner.stack.borrow().len()
    }

    pub(crate) fn enter(&self, frame: Frame) -> FrameGuard<'_> {
        self.inner.stack.borrow_mut().push(frame);
        FrameGuard { runtime: self }
    }

    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime").field("depth", &self.depth()).finish()
    }
}

/// Pops the frame it was created for, also when the body panics.
pub(crate) struct FrameGuard<'a> {
    runtime: &'a Runtime,
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        self.runtime.inner.stack.borrow_mut().pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untracked_frame() {
        let runtime = Runtime::new();
        assert!(!runtime.is_tracking());
        let depth = runtime.untracked(|| {
            assert!(!runtime.is_tracking());
            runtime.depth()
        });
        assert_eq!(depth, 1);
        assert_eq!(runtime.depth(), 0);
    }

    #[test]
    fn test_clones_share_context() {
        let runtime = Runtime::new();
        let other = runtime.clone();
        assert!(runtime.ptr_eq(&other));
        assert!(!runtime.ptr_eq(&Runtime::new()));
        other.untracked(|| assert_eq!(runtime.depth(), 1));
    }

    #[test]
    fn test_update_dependency_outside_effect_is_noop() {
        let runtime = Runtime::new();
        let tracker = Tracker::new(&runtime);
        let layer = tracker.allocate(1).unwrap();
        runtime.update_dependency(&tracker, layer);
        assert_eq!(tracker.listener_count(layer), 0);
    }
}
