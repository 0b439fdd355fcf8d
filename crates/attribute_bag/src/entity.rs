//! Bags over externally owned entity storage.
//!
//! An [`EntityBag`] keeps only dirty bits. Its values live in a buffer the
//! [`StorageProvider`] hands out for a `(schema, entity)` pair, so several
//! bags (one per replication channel, say) can front the same record.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::access::FieldAccess;
use crate::bag::Bag;
use crate::buffer::{FieldBuffer, SharedBuffer};
use crate::delta::DeltaBag;
use crate::error::{BagError, Result};
use crate::schema::BagSchema;

/// Opaque id of an entity in the host's entity system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityHandle(pub u64);

impl fmt::Display for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity:{}", self.0)
    }
}

/// Source of per-entity field buffers.
pub trait StorageProvider {
    /// Buffer laid out by `schema` for `entity`, if the entity has one.
    fn buffer(&self, schema: &Rc<BagSchema>, entity: EntityHandle) -> Option<SharedBuffer>;
}

type StorageKey = (*const BagSchema, EntityHandle);

/// In-memory [`StorageProvider`].
///
/// Each buffer keeps its schema alive, so a schema's address cannot be
/// reused while a key built from it is still in the map.
#[derive(Debug, Default)]
pub struct EntityStorage {
    buffers: HashMap<StorageKey, SharedBuffer>,
}

impl EntityStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the buffer for `entity` if needed and return it.
    pub fn spawn(&mut self, schema: &Rc<BagSchema>, entity: EntityHandle) -> SharedBuffer {
        let buffer = self
            .buffers
            .entry((Rc::as_ptr(schema), entity))
            .or_insert_with(|| {
                debug!(%entity, fields = schema.field_count(), "spawned entity storage");
                FieldBuffer::shared(Rc::clone(schema))
            });
        Rc::clone(buffer)
    }

    pub fn despawn(&mut self, schema: &Rc<BagSchema>, entity: EntityHandle) -> bool {
        self.buffers.remove(&(Rc::as_ptr(schema), entity)).is_some()
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

impl StorageProvider for EntityStorage {
    fn buffer(&self, schema: &Rc<BagSchema>, entity: EntityHandle) -> Option<SharedBuffer> {
        self.buffers.get(&(Rc::as_ptr(schema), entity)).cloned()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Entity bag
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct EntityBag {
    bag: Bag,
    entity: EntityHandle,
    buffer: SharedBuffer,
}

impl EntityBag {
    /// Front the storage `provider` holds for `(schema, entity)`.
    pub fn new(
        schema: &Rc<BagSchema>,
        entity: EntityHandle,
        provider: &impl StorageProvider,
    ) -> Result<Self> {
        Self::with_id(Uuid::new_v4(), schema, entity, provider)
    }

    pub fn with_id(
        id: Uuid,
        schema: &Rc<BagSchema>,
        entity: EntityHandle,
        provider: &impl StorageProvider,
    ) -> Result<Self> {
        let buffer = provider
            .buffer(schema, entity)
            .ok_or(BagError::MissingStorage(entity))?;
        let fields = buffer.borrow().schema().field_count();
        if fields != schema.field_count() {
            return Err(BagError::SchemaMismatch {
                bits: schema.field_count(),
                fields,
            });
        }
        Ok(Self {
            bag: Bag::with_id(id, fields),
            entity,
            buffer,
        })
    }

    pub fn id(&self) -> Uuid {
        self.bag.id()
    }

    pub fn entity(&self) -> EntityHandle {
        self.entity
    }
}

impl DeltaBag for EntityBag {
    fn bag(&self) -> &Bag {
        &self.bag
    }

    fn bag_mut(&mut self) -> &mut Bag {
        &mut self.bag
    }

    fn buffer(&self) -> &SharedBuffer {
        &self.buffer
    }
}

impl FieldAccess for EntityBag {}
