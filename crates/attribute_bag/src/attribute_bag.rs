//! Attribute Bag - Dirty-bit replicated field records
//!
//! A bag is a record of typed fields that remembers which of them changed
//! and ships only those over the wire:
//!
//! - [`Bag`] - raw and per-frame snapshot dirty sets
//! - [`BagSchema`] / [`SchemaRegistry`] - shared field layouts that own the
//!   field-to-bit mapping
//! - [`DeltaBag`] - the delta codec, written once over any bag flavour
//! - [`FieldAccess`] - typed reads and writes that mark dirty and notify
//! - [`EntityBag`] - a bag over storage owned by an entity system
//! - [`DynamicBag`] - a bag that owns its values and can change layout
//! - [`SchemaConfig`] - bag layouts declared in TOML
//!
//! Observing a bag attaches a [`Tracker`](attribute_reactive::Tracker) with
//! one layer per field, so effects reading through a [`BagView`] re-run when
//! the fields they read are written or received.

pub mod access;
pub mod bag;
pub mod buffer;
pub mod config;
pub mod delta;
pub mod dynamic;
pub mod entity;
pub mod error;
pub mod schema;

pub use access::FieldAccess;
pub use bag::Bag;
pub use buffer::{BagView, FieldBuffer, SharedBuffer};
pub use config::{BagConfig, SchemaConfig};
pub use delta::DeltaBag;
pub use dynamic::DynamicBag;
pub use entity::{EntityBag, EntityHandle, EntityStorage, StorageProvider};
pub use error::{BagError, Result};
pub use schema::{BagSchema, SchemaRegistry};
