//! Attribute Reactive - Callback registry and automatic dependency tracking
//!
//! The pieces, bottom up:
//!
//! - [`Handle`] / [`LayerId`] - generation-checked references to a bound callback
//! - [`HandleTable`] - per-layer slot storage for callbacks with stale-handle rejection
//! - [`Tracker`] - the broadcast point an attribute (or a whole bag) owns
//! - [`Runtime`] - the reactive context: handle serials and the active-effect stack
//! - [`Effect`] - a body that re-runs when anything it read changes
//! - [`Attribute`] - a single reactive value stored next to a tracker
//!
//! Everything here is single-threaded: shared state is `Rc`/`RefCell` and the
//! types are `!Send`.
//!
//! ## Example
//!
//! ```ignore
//! let runtime = Runtime::new();
//! let tracker = Rc::new(Tracker::new(&runtime));
//! let health = Rc::new(Attribute::new(&tracker, 100)?);
//!
//! let effect = Effect::new(&tracker, {
//!     let (health, tracker) = (health.clone(), Rc::downgrade(&tracker));
//!     move || {
//!         if let Some(tracker) = tracker.upgrade() {
//!             println!("health: {}", health.get(&tracker));
//!         }
//!     }
//! });
//! effect.run(); // prints and records the read
//! health.set(&tracker, 90); // prints again
//! ```

pub mod attribute;
pub mod effect;
pub mod handle;
pub mod runtime;
pub mod table;
pub mod tracker;

pub use attribute::Attribute;
pub use effect::Effect;
pub use handle::{EFFECT_LAYER, Handle, LayerId, MAX_LAYERS};
pub use runtime::Runtime;
pub use table::{Callback, HandleTable, LayerOverflow, SerialSource};
pub use tracker::{Tracker, WeakTracker};
