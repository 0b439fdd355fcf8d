//! Typed, name-based access to bag fields.

use std::rc::Rc;

use attribute_reactive::{Runtime, Tracker};
use attribute_types::{FieldDesc, FieldType, FieldValue};

use crate::buffer::{BagView, describe_shape, describe_value};
use crate::delta::DeltaBag;
use crate::error::{BagError, Result};

fn mismatch(desc: &FieldDesc, found: &FieldValue) -> BagError {
    BagError::TypeMismatch {
        field: desc.name.clone(),
        expected: describe_shape(desc),
        found: describe_value(found),
    }
}

/// Getters and setters shared by [`EntityBag`](crate::EntityBag) and
/// [`DynamicBag`](crate::DynamicBag).
///
/// Setters mark the field dirty and notify its listeners only when the
/// stored value actually changes.
pub trait FieldAccess: DeltaBag {
    fn field_index(&self, name: &str) -> Result<usize> {
        self.buffer().borrow().schema().index_of(name)
    }

    fn get(&self, name: &str) -> Result<FieldValue> {
        self.read_field(self.field_index(name)?)
    }

    fn get_i64(&self, name: &str) -> Result<i64> {
        let buffer = self.buffer().borrow();
        let index = buffer.schema().index_of(name)?;
        let value = buffer.value(index)?;
        value.as_i64().ok_or_else(|| BagError::TypeMismatch {
            field: name.to_string(),
            expected: "integer".to_string(),
            found: describe_value(value),
        })
    }

    fn get_f64(&self, name: &str) -> Result<f64> {
        let buffer = self.buffer().borrow();
        let index = buffer.schema().index_of(name)?;
        let value = buffer.value(index)?;
        value.as_f64().ok_or_else(|| BagError::TypeMismatch {
            field: name.to_string(),
            expected: "number".to_string(),
            found: describe_value(value),
        })
    }

    fn get_bool(&self, name: &str) -> Result<bool> {
        let buffer = self.buffer().borrow();
        let index = buffer.schema().index_of(name)?;
        let value = buffer.value(index)?;
        value.as_bool().ok_or_else(|| BagError::TypeMismatch {
            field: name.to_string(),
            expected: "bool".to_string(),
            found: describe_value(value),
        })
    }

    fn get_str(&self, name: &str) -> Result<String> {
        let buffer = self.buffer().borrow();
        let index = buffer.schema().index_of(name)?;
        let value = buffer.value(index)?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| BagError::TypeMismatch {
                field: name.to_string(),
                expected: "string".to_string(),
                found: describe_value(value),
            })
    }

    /// Store `value` in field `index`, mark it dirty and notify listeners.
    fn set_index(&mut self, index: usize, value: FieldValue) -> Result<bool> {
        if !self.write_field(index, value)? {
            return Ok(false);
        }
        self.bag_mut().mark_dirty(index);

        // Clone the tracker out so the buffer is free while listeners run.
        let target = self.buffer().borrow().field_layer(index);
        if let Some((tracker, layer)) = target {
            tracker.broadcast(layer);
        }
        Ok(true)
    }

    fn set_value(&mut self, name: &str, value: FieldValue) -> Result<bool> {
        let index = self.field_index(name)?;
        self.set_index(index, value)
    }

    /// Set a numeric field from an integer, converting to the field's type.
    fn set_i64(&mut self, name: &str, value: i64) -> Result<bool> {
        let index = self.field_index(name)?;
        let converted = {
            let schema = self.schema();
            let desc = schema.field(index)?;
            desc.adopt(&FieldValue::Int64(value))
                .ok_or_else(|| mismatch(desc, &FieldValue::Int64(value)))?
        };
        self.set_index(index, converted)
    }

    fn set_f64(&mut self, name: &str, value: f64) -> Result<bool> {
        let index = self.field_index(name)?;
        let converted = {
            let schema = self.schema();
            let desc = schema.field(index)?;
            desc.adopt(&FieldValue::Double(value))
                .ok_or_else(|| mismatch(desc, &FieldValue::Double(value)))?
        };
        self.set_index(index, converted)
    }

    fn set_bool(&mut self, name: &str, value: bool) -> Result<bool> {
        self.set_value(name, FieldValue::Bool(value))
    }

    /// Set a `string` or `name` field.
    fn set_str(&mut self, name: &str, value: &str) -> Result<bool> {
        let index = self.field_index(name)?;
        let value = match self.schema().field(index)?.field_type {
            FieldType::Name => FieldValue::Name(value.to_string()),
            _ => FieldValue::String(value.to_string()),
        };
        self.set_index(index, value)
    }

    /// Attach a tracker to the bag's values so writes notify listeners and
    /// reads through [`FieldAccess::view`] are recorded by running effects.
    fn observe(&self, runtime: &Runtime) -> Result<Rc<Tracker>> {
        self.buffer().borrow_mut().observe(runtime)
    }

    fn tracker(&self) -> Option<Rc<Tracker>> {
        self.buffer().borrow().tracker().cloned()
    }

    fn view(&self) -> BagView {
        BagView::new(self.buffer())
    }

    /// Tracked read: records a dependency on the running effect.
    fn get_tracked(&self, name: &str) -> Result<FieldValue> {
        self.view().get(name)
    }
}
