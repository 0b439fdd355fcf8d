//! Bags whose field list can change at runtime.

use std::rc::Rc;

use attribute_types::{
    ContainerKind, FieldDesc, FieldId, FieldType, FieldValue, WireReader, WireWriter,
};
use tracing::debug;
use uuid::Uuid;

use crate::access::FieldAccess;
use crate::bag::Bag;
use crate::buffer::{FieldBuffer, SharedBuffer};
use crate::delta::DeltaBag;
use crate::error::{BagError, Result};
use crate::schema::{BagSchema, SchemaRegistry};

/// A bag that owns its values and may switch schema.
///
/// Switching schema migrates values by field id and marks every field dirty,
/// since a receiver has to learn the new layout in full. An observed bag
/// gets a fresh tracker sized to the new schema; effects bound to the old
/// one stop being woken and pick up the new tracker on their next run.
#[derive(Debug)]
pub struct DynamicBag {
    bag: Bag,
    buffer: SharedBuffer,
}

impl DynamicBag {
    pub fn new(registry: &mut SchemaRegistry, descs: &[FieldDesc]) -> Self {
        Self::from_schema(registry.get_or_create(descs))
    }

    pub fn from_schema(schema: Rc<BagSchema>) -> Self {
        Self::with_id(Uuid::new_v4(), schema)
    }

    pub fn with_id(id: Uuid, schema: Rc<BagSchema>) -> Self {
        Self {
            bag: Bag::with_id(id, schema.field_count()),
            buffer: FieldBuffer::shared(schema),
        }
    }

    pub fn id(&self) -> Uuid {
        self.bag.id()
    }

    /// Switch to the schema for `descs`. Returns `false` when the bag
    /// already uses it.
    pub fn set_schema(
        &mut self,
        registry: &mut SchemaRegistry,
        descs: &[FieldDesc],
    ) -> Result<bool> {
        let schema = registry.get_or_create(descs);
        if Rc::ptr_eq(&schema, &self.schema()) {
            return Ok(false);
        }

        let field_count = schema.field_count();
        self.buffer.borrow_mut().migrate(schema)?;
        self.bag.resize(field_count);
        self.bag.mark_all_dirty();
        debug!(bag = %self.bag.id(), fields = field_count, "dynamic bag schema changed");
        Ok(true)
    }

    /// Append a field with a fresh id.
    pub fn add_field(
        &mut self,
        registry: &mut SchemaRegistry,
        name: &str,
        field_type: FieldType,
        container: ContainerKind,
    ) -> Result<FieldId> {
        let schema = self.schema();
        if schema.find_by_name(name).is_some() {
            return Err(BagError::DuplicateField(name.to_string()));
        }

        let id = schema.next_field_id();
        let mut descs = schema.fields().to_vec();
        descs.push(FieldDesc {
            container,
            ..FieldDesc::new(id.0, name, field_type)
        });
        self.set_schema(registry, &descs)?;
        Ok(id)
    }

    /// Drop a field, returning the value it held.
    pub fn remove_field(
        &mut self,
        registry: &mut SchemaRegistry,
        name: &str,
    ) -> Result<FieldValue> {
        let schema = self.schema();
        let index = schema.index_of(name)?;
        let value = self.read_field(index)?;

        let descs: Vec<FieldDesc> = schema
            .fields()
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != index)
            .map(|(_, desc)| desc.clone())
            .collect();
        self.set_schema(registry, &descs)?;
        Ok(value)
    }

    /// Write the whole bag: id, field descriptors and every value.
    pub fn write_full<W: WireWriter + ?Sized>(&self, writer: &mut W) {
        let buffer = self.buffer.borrow();
        let schema = buffer.schema();

        writer.write_bytes(self.bag.id().as_bytes());
        writer.write_varint(schema.field_count() as u64);
        for desc in schema.fields() {
            desc.encode(writer);
        }
        for (desc, value) in schema.fields().iter().zip(buffer.values()) {
            desc.encode_value(value, writer);
        }
    }

    /// Rebuild a bag written by [`DynamicBag::write_full`]. The result starts
    /// clean.
    pub fn read_full<R: WireReader + ?Sized>(
        registry: &mut SchemaRegistry,
        reader: &mut R,
    ) -> Result<Self> {
        let id = Uuid::from_slice(&reader.read_bytes(16)?)
            .map_err(|err| BagError::Parse(err.to_string()))?;

        let count = reader.read_len()?;
        let mut descs = Vec::with_capacity(count);
        for _ in 0..count {
            descs.push(FieldDesc::decode(reader)?);
        }

        let schema = registry.get_or_create(&descs);
        if schema.field_count() != descs.len() {
            return Err(BagError::SchemaMismatch {
                bits: descs.len(),
                fields: schema.field_count(),
            });
        }
        let values = schema
            .fields()
            .iter()
            .map(|desc| desc.decode_value(reader))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let bag = Self::with_id(id, schema);
        bag.buffer.borrow_mut().replace_values(values)?;
        Ok(bag)
    }
}

impl DeltaBag for DynamicBag {
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

impl FieldAccess for DynamicBag {}
