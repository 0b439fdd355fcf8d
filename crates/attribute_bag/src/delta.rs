//! Delta codec shared by every bag flavour.
//!
//! Payload layout:
//!
//! ```text
//! bool            empty
//! bitset          changes          (only when not empty)
//! value*          one per marked field, in field order
//! ```
//!
//! The encoder sends the bag's snapshot for the frame; the decoder applies
//! the values, folds `changes` into its own dirty sets so it can relay them,
//! and notifies listeners of the changed fields once every value is in.

use std::rc::Rc;

use attribute_types::{FieldValue, WireReader, WireWriter};
use tracing::trace;

use crate::bag::Bag;
use crate::buffer::{self, SharedBuffer};
use crate::error::Result;
use crate::schema::BagSchema;

pub trait DeltaBag {
    fn bag(&self) -> &Bag;

    fn bag_mut(&mut self) -> &mut Bag;

    fn buffer(&self) -> &SharedBuffer;

    fn schema(&self) -> Rc<BagSchema> {
        Rc::clone(self.buffer().borrow().schema())
    }

    fn read_field(&self, index: usize) -> Result<FieldValue> {
        self.buffer().borrow().value(index).cloned()
    }

    /// Store a value without marking it dirty or notifying anyone.
    fn write_field(&mut self, index: usize, value: FieldValue) -> Result<bool> {
        self.buffer().borrow_mut().store(index, value)
    }

    /// Encode the changes of `frame`. Returns whether any field was sent.
    fn encode_delta<W: WireWriter + ?Sized>(&mut self, frame: u32, writer: &mut W) -> Result<bool> {
        self.bag_mut().update_snapshot(frame);
        let changes = self.bag().snapshot_dirty().clone();
        let schema = self.schema();
        schema.check_bits(&changes)?;

        if changes.is_empty() {
            writer.write_bool(true);
            return Ok(false);
        }
        writer.write_bool(false);
        changes.encode(writer);

        let buffer = self.buffer().borrow();
        schema.walk(&changes, |index, desc| {
            trace!(field = %desc.name, index, "encode field");
            desc.encode_value(buffer.value(index)?, writer);
            Ok(())
        })?;
        Ok(true)
    }

    /// Apply a payload produced by [`DeltaBag::encode_delta`]. Returns
    /// whether any field was received.
    fn decode_delta<R: WireReader + ?Sized>(&mut self, reader: &mut R) -> Result<bool> {
        if reader.read_bool()? {
            return Ok(false);
        }

        let schema = self.schema();
        let mut changes = schema.new_dirty_set();
        changes.decode_into(reader)?;

        // Nothing is stored unless the whole payload decodes.
        let mut received = Vec::with_capacity(changes.count());
        schema.walk(&changes, |index, desc| {
            let value = desc.decode_value(reader)?;
            trace!(field = %desc.name, index, "decode field");
            received.push((index, value));
            Ok(())
        })?;
        for (index, value) in received {
            self.write_field(index, value)?;
        }

        self.bag_mut().merge_changes(&changes);
        buffer::notify(self.buffer(), &changes);
        Ok(true)
    }
}
