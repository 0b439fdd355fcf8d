//! Effects with automatic dependency tracking.
//!
//! An [`Effect`] is a body bound on its host tracker's [`EFFECT_LAYER`].
//! [`Effect::run`] executes the body with the effect on top of the runtime
//! stack; every tracked read made meanwhile copies the body into the layer
//! that was read, so a later write to that attribute re-invokes the body.
//! Dependencies that a run did not read again are pruned at the end of it.
//!
//! A broadcast invokes the forwarded body directly. Only `run` re-records the
//! dependency set, so a body whose reads are conditional should be `run`
//! again when the condition changes.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use attribute_types::BitSet;
use tracing::{debug, trace, warn};

use crate::handle::{EFFECT_LAYER, Handle, LayerId};
use crate::runtime::{Frame, Runtime};
use crate::tracker::{Tracker, WeakTracker};

/// Edge from an effect to one layer it reads.
struct Dependency {
    tracker: WeakTracker,
    layer: LayerId,
    /// Copy of the effect body bound on `tracker`'s `layer`.
    handle: Handle,
}

pub(crate) struct EffectState {
    runtime: Runtime,
    host: Option<WeakTracker>,
    handle: Handle,
    deps: Vec<Dependency>,
    /// Bit `i` set while dependency `i` has not been read during this run.
    uncaptured: BitSet,
}

impl EffectState {
    /// Record a read of `layer` on `tracker` by the effect owning `state`.
    pub(crate) fn capture(state: &Rc<RefCell<EffectState>>, tracker: &Tracker, layer: LayerId) {
        let mut state = state.borrow_mut();

        let existing = state
            .deps
            .iter()
            .position(|dep| dep.layer == layer && dep.tracker.points_to(tracker));
        if let Some(index) = existing {
            if index < state.uncaptured.len() {
                state.uncaptured.remove(index);
            }
            return;
        }

        let Some(host) = state.host.as_ref().and_then(WeakTracker::upgrade) else {
            warn!(tracker = tracker.id(), %layer, "read tracked for an effect whose host is gone");
            return;
        };
        let Some(body) = host.callback(state.handle) else {
            warn!(handle = ?state.handle, "effect body no longer bound on its host");
            return;
        };

        let handle = tracker.copy_callback_into(layer, &body);
        trace!(tracker = tracker.id(), %layer, ?handle, "effect captured dependency");
        state.deps.push(Dependency {
            tracker: tracker.downgrade(),
            layer,
            handle,
        });
    }
}

pub struct Effect {
    state: Rc<RefCell<EffectState>>,
}

impl Effect {
    /// Bind `body` on `host`. The body does not run until [`Effect::run`].
    pub fn new(host: &Tracker, body: impl Fn() + 'static) -> Self {
        let handle = host.bind(EFFECT_LAYER, body);
        Self::from_parts(host.runtime().clone(), Some(host.downgrade()), handle)
    }

    fn from_parts(runtime: Runtime, host: Option<WeakTracker>, handle: Handle) -> Self {
        Self {
            state: Rc::new(RefCell::new(EffectState {
                runtime,
                host,
                handle,
                deps: Vec::new(),
                uncaptured: BitSet::new(0),
            })),
        }
    }

    /// Run the body and re-record what it reads.
    ///
    /// Returns `false` without doing anything when the host tracker is gone
    /// or the effect was cleared.
    pub fn run(&self) -> bool {
        let (host, handle, runtime) = {
            let mut state = self.state.borrow_mut();
            let Some(host) = state.host.as_ref().and_then(WeakTracker::upgrade) else {
                debug!("effect run skipped: host tracker is gone");
                return false;
            };
            let mut uncaptured = BitSet::new(state.deps.len());
            uncaptured.mark_all();
            state.uncaptured = uncaptured;
            (host, state.handle, state.runtime.clone())
        };

        let invoked = {
            let _frame = runtime.enter(Frame::Effect(Rc::clone(&self.state)));
            host.invoke(handle)
        };

        self.prune();
        invoked
    }

    /// Drop every dependency the last run did not read.
    fn prune(&self) {
        let stale: Vec<Dependency> = {
            let mut state = self.state.borrow_mut();
            let marked: Vec<usize> = state.uncaptured.iter().collect();
            state.uncaptured = BitSet::new(0);
            marked
                .into_iter()
                .rev()
                .map(|index| state.deps.remove(index))
                .collect()
        };

        if stale.is_empty() {
            return;
        }
        debug!(pruned = stale.len(), "effect dropped stale dependencies");
        for dep in stale {
            if let Some(tracker) = dep.tracker.upgrade() {
                tracker.unbind(dep.handle);
            }
        }
    }

    /// Unbind the body from its host and from every dependency, and detach.
    pub fn clear(&self) {
        let (host, handle, deps) = {
            let mut state = self.state.borrow_mut();
            let host = state.host.take();
            let handle = std::mem::replace(&mut state.handle, Handle::INVALID);
            state.uncaptured = BitSet::new(0);
            (host, handle, std::mem::take(&mut state.deps))
        };

        if let Some(host) = host.as_ref().and_then(WeakTracker::upgrade) {
            host.unbind(handle);
        }
        for dep in deps {
            if let Some(tracker) = dep.tracker.upgrade() {
                tracker.unbind(dep.handle);
            }
        }
    }

    /// Attached, holding a valid handle, and the host is still alive.
    pub fn is_valid(&self) -> bool {
        let state = self.state.borrow();
        state.handle.is_valid() && state.host.as_ref().is_some_and(WeakTracker::is_live)
    }

    pub fn is_attached(&self) -> bool {
        self.state.borrow().host.is_some()
    }

    pub fn dependency_count(&self) -> usize {
        self.state.borrow().deps.len()
    }

    pub fn handle(&self) -> Handle {
        self.state.borrow().handle
    }

    /// Whether the last run left this effect listening to `layer` of `tracker`.
    pub fn depends_on(&self, tracker: &Tracker, layer: LayerId) -> bool {
        self.state
            .borrow()
            .deps
            .iter()
            .any(|dep| dep.layer == layer && dep.tracker.points_to(tracker))
    }
}

impl Clone for Effect {
    /// Bind the same body once more on the same host, with no dependencies.
    fn clone(&self) -> Self {
        let state = self.state.borrow();
        let host = state.host.as_ref().and_then(WeakTracker::upgrade);
        let handle = host.as_ref().map_or(Handle::INVALID, |host| {
            host.bind_callback(EFFECT_LAYER, host.callback(state.handle))
        });
        let host = host.filter(|_| handle.is_valid()).map(|host| host.downgrade());
        Self::from_parts(state.runtime.clone(), host, handle)
    }
}

impl Drop for Effect {
    fn drop(&mut self) {
        self.clear();
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Effect")
            .field("handle", &state.handle)
            .field("host", &state.host)
            .field("dependencies", &state.deps.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::Attribute;
    use std::cell::Cell;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }

    struct Fixture {
        runtime: Runtime,
        tracker: Rc<Tracker>,
    }

    impl Fixture {
        fn new() -> Self {
            init_tracing();
            let runtime = Runtime::new();
            let tracker = Rc::new(Tracker::new(&runtime));
            Self { runtime, tracker }
        }

        fn attribute<T: 'static>(&self, value: T) -> Rc<Attribute<T>> {
            Rc::new(Attribute::new(&self.tracker, value).unwrap())
        }
    }

    fn counter() -> Rc<Cell<u32>> {
        Rc::new(Cell::new(0))
    }

    #[test]
    fn test_new_does_not_run() {
        let fx = Fixture::new();
        let runs = counter();
        let effect = Effect::new(&fx.tracker, {
            let runs = Rc::clone(&runs);
            move || runs.set(runs.get() + 1)
        });
        assert_eq!(runs.get(), 0);
        assert!(effect.is_valid());
        assert!(effect.is_attached());
        assert!(effect.run());
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn test_write_reinvokes_reader() {
        let fx = Fixture::new();
        let health = fx.attribute(100);
        let seen = Rc::new(Cell::new(0));
        let effect = Effect::new(&fx.tracker, {
            let (health, tracker, seen) = (
                Rc::clone(&health),
                Rc::downgrade(&fx.tracker),
                Rc::clone(&seen),
            );
            move || {
                if let Some(tracker) = tracker.upgrade() {
                    seen.set(health.get(&tracker));
                }
            }
        });

        effect.run();
        assert_eq!(seen.get(), 100);
        assert_eq!(effect.dependency_count(), 1);
        assert!(effect.depends_on(&fx.tracker, health.layer()));

        health.set(&fx.tracker, 75);
        assert_eq!(seen.get(), 75);
        // Unchanged writes do not broadcast.
        assert!(!health.set(&fx.tracker, 75));
    }

    #[test]
    fn test_dependency_pruning() {
        let fx = Fixture::new();
        let use_x = fx.attribute(true);
        let x = fx.attribute(0);
        let y = fx.attribute(0);
        let runs = counter();

        let effect = Effect::new(&fx.tracker, {
            let (use_x, x, y) = (Rc::clone(&use_x), Rc::clone(&x), Rc::clone(&y));
            let tracker = Rc::downgrade(&fx.tracker);
            let runs = Rc::clone(&runs);
            move || {
                runs.set(runs.get() + 1);
                let Some(tracker) = tracker.upgrade() else { return };
                if use_x.get(&tracker) {
                    x.get(&tracker);
                } else {
                    y.get(&tracker);
                }
            }
        });

        effect.run();
        assert_eq!(runs.get(), 1);
        assert_eq!(effect.dependency_count(), 2);

        x.set(&fx.tracker, 1);
        assert_eq!(runs.get(), 2);
        y.set(&fx.tracker, 1);
        assert_eq!(runs.get(), 2);

        // The forwarded body runs but does not re-record.
        use_x.set(&fx.tracker, false);
        assert_eq!(runs.get(), 3);
        assert!(effect.depends_on(&fx.tracker, x.layer()));

        effect.run();
        assert_eq!(runs.get(), 4);
        assert_eq!(effect.dependency_count(), 2);
        assert!(!effect.depends_on(&fx.tracker, x.layer()));
        assert!(effect.depends_on(&fx.tracker, y.layer()));
        assert_eq!(fx.tracker.listener_count(x.layer()), 0);

        x.set(&fx.tracker, 2);
        assert_eq!(runs.get(), 4);
        y.set(&fx.tracker, 2);
        assert_eq!(runs.get(), 5);
    }

    #[test]
    fn test_first_run_reads_x_later_runs_read_y() {
        let fx = Fixture::new();
        let x = fx.attribute(0);
        let y = fx.attribute(0);
        let runs = counter();

        let effect = Effect::new(&fx.tracker, {
            let (x, y) = (Rc::clone(&x), Rc::clone(&y));
            let tracker = Rc::downgrade(&fx.tracker);
            let runs = Rc::clone(&runs);
            move || {
                runs.set(runs.get() + 1);
                let Some(tracker) = tracker.upgrade() else { return };
                if runs.get() == 1 {
                    x.get(&tracker);
                } else {
                    y.get(&tracker);
                }
            }
        });

        effect.run();
        assert!(effect.depends_on(&fx.tracker, x.layer()));
        x.set(&fx.tracker, 1);
        assert_eq!(runs.get(), 2);

        effect.run();
        assert_eq!(runs.get(), 3);
        assert!(!effect.depends_on(&fx.tracker, x.layer()));

        x.set(&fx.tracker, 2);
        assert_eq!(runs.get(), 3);
        y.set(&fx.tracker, 1);
        assert_eq!(runs.get(), 4);
    }

    #[test]
    fn test_repeated_reads_bind_once() {
        let fx = Fixture::new();
        let x = fx.attribute(1);
        let effect = Effect::new(&fx.tracker, {
            let x = Rc::clone(&x);
            let tracker = Rc::downgrade(&fx.tracker);
            move || {
                if let Some(tracker) = tracker.upgrade() {
                    x.get(&tracker);
                    x.get(&tracker);
                }
            }
        });
        effect.run();
        effect.run();
        assert_eq!(effect.dependency_count(), 1);
        assert_eq!(fx.tracker.listener_count(x.layer()), 1);
    }

    #[test]
    fn test_nested_runs_track_separately() {
        let fx = Fixture::new();
        let outer_attr = fx.attribute(0);
        let inner_attr = fx.attribute(0);

        let inner = Rc::new(Effect::new(&fx.tracker, {
            let attr = Rc::clone(&inner_attr);
            let tracker = Rc::downgrade(&fx.tracker);
            move || {
                if let Some(tracker) = tracker.upgrade() {
                    attr.get(&tracker);
                }
            }
        }));

        let outer = Effect::new(&fx.tracker, {
            let attr = Rc::clone(&outer_attr);
            let inner = Rc::downgrade(&inner);
            let tracker = Rc::downgrade(&fx.tracker);
            move || {
                if let Some(inner) = inner.upgrade() {
                    inner.run();
                }
                if let Some(tracker) = tracker.upgrade() {
                    attr.get(&tracker);
                }
            }
        });

        outer.run();
        assert_eq!(fx.runtime.depth(), 0);
        assert!(outer.depends_on(&fx.tracker, outer_attr.layer()));
        assert!(!outer.depends_on(&fx.tracker, inner_attr.layer()));
        assert!(inner.depends_on(&fx.tracker, inner_attr.layer()));
        assert!(!inner.depends_on(&fx.tracker, outer_attr.layer()));
    }

    #[test]
    fn test_untracked_reads_are_not_recorded() {
        let fx = Fixture::new();
        let x = fx.attribute(0);
        let effect = Effect::new(&fx.tracker, {
            let x = Rc::clone(&x);
            let tracker = Rc::downgrade(&fx.tracker);
            let runtime = fx.runtime.clone();
            move || {
                if let Some(tracker) = tracker.upgrade() {
                    runtime.untracked(|| x.get(&tracker));
                }
            }
        });
        effect.run();
        assert_eq!(effect.dependency_count(), 0);
    }

    #[test]
    fn test_reads_from_other_tracker() {
        let fx = Fixture::new();
        let other = Rc::new(Tracker::new(&fx.runtime));
        let remote = Rc::new(Attribute::new(&other, 5).unwrap());
        let seen = counter();

        let effect = Effect::new(&fx.tracker, {
            let (remote, other, seen) = (
                Rc::clone(&remote),
                Rc::downgrade(&other),
                Rc::clone(&seen),
            );
            move || {
                if let Some(other) = other.upgrade() {
                    seen.set(remote.get(&other));
                }
            }
        });
        effect.run();
        assert_eq!(seen.get(), 5);
        assert_eq!(other.listener_count(remote.layer()), 1);

        remote.set(&other, 9);
        assert_eq!(seen.get(), 9);
    }

    #[test]
    fn test_dead_dependency_tracker_is_skipped() {
        let fx = Fixture::new();
        let other = Rc::new(Tracker::new(&fx.runtime));
        let remote = Rc::new(Attribute::new(&other, 1).unwrap());
        let alive = Rc::new(Cell::new(true));

        let effect = Effect::new(&fx.tracker, {
            let (remote, other, alive) = (
                Rc::clone(&remote),
                Rc::downgrade(&other),
                Rc::clone(&alive),
            );
            move || {
                if !alive.get() {
                    return;
                }
                if let Some(other) = other.upgrade() {
                    remote.get(&other);
                }
            }
        });
        effect.run();
        assert_eq!(effect.dependency_count(), 1);

        drop(other);
        alive.set(false);
        // The edge to the dropped tracker is pruned without touching it.
        assert!(effect.run());
        assert_eq!(effect.dependency_count(), 0);
        effect.clear();
        assert!(!effect.is_attached());
    }

    #[test]
    fn test_dead_host_aborts_run() {
        let runtime = Runtime::new();
        let host = Tracker::new(&runtime);
        let runs = counter();
        let effect = Effect::new(&host, {
            let runs = Rc::clone(&runs);
            move || runs.set(runs.get() + 1)
        });
        drop(host);
        assert!(!effect.is_valid());
        assert!(effect.is_attached());
        assert!(!effect.run());
        assert_eq!(runs.get(), 0);
    }

    #[test]
    fn test_clear_unbinds_everywhere() {
        let fx = Fixture::new();
        let x = fx.attribute(0);
        let runs = counter();
        let effect = Effect::new(&fx.tracker, {
            let (x, runs) = (Rc::clone(&x), Rc::clone(&runs));
            let tracker = Rc::downgrade(&fx.tracker);
            move || {
                runs.set(runs.get() + 1);
                if let Some(tracker) = tracker.upgrade() {
                    x.get(&tracker);
                }
            }
        });
        effect.run();
        assert_eq!(fx.tracker.listener_count(EFFECT_LAYER), 1);
        assert_eq!(fx.tracker.listener_count(x.layer()), 1);

        effect.clear();
        assert!(!effect.is_valid());
        assert!(!effect.is_attached());
        assert_eq!(effect.dependency_count(), 0);
        assert_eq!(fx.tracker.listener_count(EFFECT_LAYER), 0);
        assert_eq!(fx.tracker.listener_count(x.layer()), 0);

        x.set(&fx.tracker, 3);
        assert!(!effect.run());
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn test_drop_clears() {
        let fx = Fixture::new();
        let x = fx.attribute(0);
        {
            let effect = Effect::new(&fx.tracker, {
                let x = Rc::clone(&x);
                let tracker = Rc::downgrade(&fx.tracker);
                move || {
                    if let Some(tracker) = tracker.upgrade() {
                        x.get(&tracker);
                    }
                }
            });
            effect.run();
            assert_eq!(fx.tracker.listener_count(x.layer()), 1);
        }
        assert_eq!(fx.tracker.listener_count(EFFECT_LAYER), 0);
        assert_eq!(fx.tracker.listener_count(x.layer()), 0);
    }

    #[test]
    fn test_clone_copies_registration_only() {
        let fx = Fixture::new();
        let x = fx.attribute(0);
        let runs = counter();
        let effect = Effect::new(&fx.tracker, {
            let (x, runs) = (Rc::clone(&x), Rc::clone(&runs));
            let tracker = Rc::downgrade(&fx.tracker);
            move || {
                runs.set(runs.get() + 1);
                if let Some(tracker) = tracker.upgrade() {
                    x.get(&tracker);
                }
            }
        });
        effect.run();

        let copy = effect.clone();
        assert_ne!(copy.handle(), effect.handle());
        assert_eq!(copy.dependency_count(), 0);
        assert_eq!(fx.tracker.listener_count(EFFECT_LAYER), 2);

        copy.run();
        assert_eq!(runs.get(), 2);
        assert_eq!(fx.tracker.listener_count(x.layer()), 2);

        drop(effect);
        assert_eq!(fx.tracker.listener_count(x.layer()), 1);
        x.set(&fx.tracker, 1);
        assert_eq!(runs.get(), 3);
    }

    #[test]
    fn test_broadcast_listener_reads_stay_with_listener() {
        let fx = Fixture::new();
        let trigger = fx.attribute(0);
        let side = fx.attribute(0);

        // A plain listener on `trigger` that reads `side`.
        trigger.bind(&fx.tracker, {
            let side = Rc::clone(&side);
            let tracker = Rc::downgrade(&fx.tracker);
            move || {
                if let Some(tracker) = tracker.upgrade() {
                    side.get(&tracker);
                }
            }
        });

        let writer = Effect::new(&fx.tracker, {
            let trigger = Rc::clone(&trigger);
            let tracker = Rc::downgrade(&fx.tracker);
            move || {
                if let Some(tracker) = tracker.upgrade() {
                    trigger.update(&tracker, |v| *v += 1);
                }
            }
        });
        writer.run();
        assert_eq!(writer.dependency_count(), 0);
        assert_eq!(fx.tracker.listener_count(side.layer()), 0);
    }
}
