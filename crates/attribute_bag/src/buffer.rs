//! Field storage and its reactive hook-up.
//!
//! A [`FieldBuffer`] holds the values of one record laid out by a schema,
//! plus, once observed, the tracker whose layer `i` guards field `i`. Bags
//! never own values directly: an entity bag borrows its buffer from a
//! storage provider, a dynamic bag owns a private one.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use attribute_reactive::{LayerId, Runtime, Tracker};
use attribute_types::{BitSet, ContainerKind, FieldDesc, FieldValue};
use tracing::debug;

use crate::error::{BagError, Result};
use crate::schema::BagSchema;

pub type SharedBuffer = Rc<RefCell<FieldBuffer>>;

#[derive(Debug)]
struct Observer {
    tracker: Rc<Tracker>,
    first_layer: LayerId,
}

impl Observer {
    fn attach(runtime: &Runtime, field_count: usize) -> Result<Self> {
        let tracker = Tracker::new(runtime);
        let first_layer = tracker.allocate(field_count)?;
        Ok(Self {
            tracker: Rc::new(tracker),
            first_layer,
        })
    }

    fn layer(&self, index: usize) -> LayerId {
        LayerId(self.first_layer.0 + index as u8)
    }
}

#[derive(Debug)]
pub struct FieldBuffer {
    schema: Rc<BagSchema>,
    values: Vec<FieldValue>,
    observer: Option<Observer>,
}

impl FieldBuffer {
    /// Buffer with every field at its initial value.
    pub fn new(schema: Rc<BagSchema>) -> Self {
        Self {
            values: schema.initial_values(),
            schema,
            observer: None,
        }
    }

    pub fn shared(schema: Rc<BagSchema>) -> SharedBuffer {
        Rc::new(RefCell::new(Self::new(schema)))
    }

    pub fn schema(&self) -> &Rc<BagSchema> {
        &self.schema
    }

    pub fn values(&self) -> &[FieldValue] {
        &self.values
    }

    pub fn value(&self, index: usize) -> Result<&FieldValue> {
        self.values.get(index).ok_or(BagError::IndexOutOfBounds {
            index,
            count: self.values.len(),
        })
    }

    /// Store `value` at `index`. Returns whether the stored value changed.
    pub fn store(&mut self, index: usize, value: FieldValue) -> Result<bool> {
        let desc = self.schema.field(index)?;
        if !desc.conforms(&value) {
            return Err(BagError::TypeMismatch {
                field: desc.name.clone(),
                expected: describe_shape(desc),
                found: describe_value(&value),
            });
        }
        if self.values[index] == value {
            return Ok(false);
        }
        self.values[index] = value;
        Ok(true)
    }

    /// Attach a tracker with one layer per field, or return the attached one.
    pub fn observe(&mut self, runtime: &Runtime) -> Result<Rc<Tracker>> {
        if let Some(observer) = &self.observer {
            return Ok(Rc::clone(&observer.tracker));
        }
        let observer = Observer::attach(runtime, self.schema.field_count())?;
        let tracker = Rc::clone(&observer.tracker);
        self.observer = Some(observer);
        Ok(tracker)
    }

    pub fn tracker(&self) -> Option<&Rc<Tracker>> {
        self.observer.as_ref().map(|observer| &observer.tracker)
    }

    /// Tracker and layer guarding field `index`, when observed.
    pub fn field_layer(&self, index: usize) -> Option<(Rc<Tracker>, LayerId)> {
        let observer = self.observer.as_ref()?;
        (index < self.values.len()).then(|| (Rc::clone(&observer.tracker), observer.layer(index)))
    }

    /// Re-lay the buffer out for `schema`, carrying values across by field id.
    ///
    /// Values whose field is gone are dropped, new fields start at their
    /// initial value, and numeric values convert when a field changed type.
    /// An attached tracker is replaced by a fresh one sized to the new
    /// schema, so listeners of the old layout stop firing.
    pub fn migrate(&mut self, schema: Rc<BagSchema>) -> Result<()> {
        let observer = match &self.observer {
            Some(old) => Some(Observer::attach(old.tracker.runtime(), schema.field_count())?),
            None => None,
        };

        let values = schema
            .fields()
            .iter()
            .map(|desc| {
                self.schema
                    .find_by_id(desc.id)
                    .and_then(|(index, _)| desc.adopt(&self.values[index]))
                    .unwrap_or_else(|| desc.initial_value())
            })
            .collect();

        debug!(
            from = self.schema.field_count(),
            to = schema.field_count(),
            "migrated field buffer"
        );
        self.values = values;
        self.schema = schema;
        self.observer = observer;
        Ok(())
    }

    /// Overwrite every value, e.g. after a full transfer.
    pub(crate) fn replace_values(&mut self, values: Vec<FieldValue>) -> Result<()> {
        if values.len() != self.values.len() {
            return Err(BagError::SchemaMismatch {
                bits: values.len(),
                fields: self.values.len(),
            });
        }
        for (index, value) in values.into_iter().enumerate() {
            self.store(index, value)?;
        }
        Ok(())
    }
}

pub(crate) fn describe_shape(desc: &FieldDesc) -> String {
    match desc.container {
        ContainerKind::Single => desc.field_type.to_string(),
        ContainerKind::Array => format!("array of {}", desc.field_type),
    }
}

pub(crate) fn describe_value(value: &FieldValue) -> String {
    match value.field_type() {
        Some(field_type) => field_type.to_string(),
        None => "array".to_string(),
    }
}

/// Broadcast the layer of every field marked in `changes`.
///
/// The buffer is released before any listener runs.
pub(crate) fn notify(buffer: &SharedBuffer, changes: &BitSet) -> usize {
    let targets: Vec<(Rc<Tracker>, LayerId)> = {
        let buffer = buffer.borrow();
        changes
            .iter()
            .filter_map(|index| buffer.field_layer(index))
            .collect()
    };
    targets
        .iter()
        .map(|(tracker, layer)| tracker.broadcast(*layer))
        .sum()
}

// ─────────────────────────────────────────────────────────────────────────────
// Views
// ─────────────────────────────────────────────────────────────────────────────

/// Read-only handle on a bag's values for use inside effect bodies.
///
/// A view does not keep the values alive; reading through a view whose bag
/// was dropped fails with [`BagError::Detached`].
#[derive(Debug, Clone)]
pub struct BagView {
    buffer: Weak<RefCell<FieldBuffer>>,
}

impl BagView {
    pub(crate) fn new(buffer: &SharedBuffer) -> Self {
        Self {
            buffer: Rc::downgrade(buffer),
        }
    }

    fn read<R>(&self, name: &str, tracked: bool, f: impl FnOnce(&FieldValue) -> R) -> Result<R> {
        let buffer = self.buffer.upgrade().ok_or(BagError::Detached)?;
        let buffer = buffer.borrow();
        let index = buffer.schema.index_of(name)?;
        if tracked {
            if let Some((tracker, layer)) = buffer.field_layer(index) {
                tracker.track(layer);
            }
        }
        Ok(f(&buffer.values[index]))
    }

    /// Tracked read of `name`.
    pub fn get(&self, name: &str) -> Result<FieldValue> {
        self.read(name, true, FieldValue::clone)
    }

    pub fn get_untracked(&self, name: &str) -> Result<FieldValue> {
        self.read(name, false, FieldValue::clone)
    }

    pub fn get_i64(&self, name: &str) -> Result<i64> {
        self.read(name, true, FieldValue::as_i64)?
            .ok_or_else(|| self.mismatch(name, "integer"))
    }

    pub fn get_f64(&self, name: &str) -> Result<f64> {
        self.read(name, true, FieldValue::as_f64)?
            .ok_or_else(|| self.mismatch(name, "number"))
    }

    pub fn is_attached(&self) -> bool {
        self.buffer.strong_count() > 0
    }

    fn mismatch(&self, name: &str, expected: &str) -> BagError {
        let found = self
            .get_untracked(name)
            .map(|value| describe_value(&value))
            .unwrap_or_default();
        BagError::TypeMismatch {
            field: name.to_string(),
            expected: expected.to_string(),
            found,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attribute_types::FieldType;

    fn schema() -> Rc<BagSchema> {
        Rc::new(BagSchema::new(vec![
            FieldDesc::new(0, "hp", FieldType::Int32).with_default(FieldValue::Int32(10)),
            FieldDesc::new(1, "tag", FieldType::Name),
        ]))
    }

    #[test]
    fn test_store_checks_shape() {
        let mut buffer = FieldBuffer::new(schema());
        assert_eq!(buffer.value(0).unwrap(), &FieldValue::Int32(10));
        assert!(buffer.store(0, FieldValue::Int32(11)).unwrap());
        assert!(!buffer.store(0, FieldValue::Int32(11)).unwrap());
        assert!(matches!(
            buffer.store(1, FieldValue::String("x".into())),
            Err(BagError::TypeMismatch { .. })
        ));
        assert!(matches!(
            buffer.store(4, FieldValue::Int32(1)),
            Err(BagError::IndexOutOfBounds { index: 4, count: 2 })
        ));
    }

    #[test]
    fn test_migrate_by_id() {
        let mut buffer = FieldBuffer::new(schema());
        buffer.store(0, FieldValue::Int32(42)).unwrap();
        buffer.store(1, FieldValue::Name("boss".into())).unwrap();

        // hp turns into a double and moves to the back; tag is removed.
        let next = Rc::new(BagSchema::new(vec![
            FieldDesc::new(5, "mana", FieldType::Byte),
            FieldDesc::new(0, "hp", FieldType::Double),
        ]));
        buffer.migrate(next).unwrap();
        assert_eq!(
            buffer.values(),
            &[FieldValue::Byte(0), FieldValue::Double(42.0)]
        );
    }

    #[test]
    fn test_migrate_replaces_tracker() {
        let runtime = Runtime::new();
        let mut buffer = FieldBuffer::new(schema());
        let old = Rc::downgrade(&buffer.observe(&runtime).unwrap());
        assert_eq!(old.upgrade().unwrap().layer_count(), 3);

        buffer
            .migrate(Rc::new(BagSchema::new(vec![FieldDesc::new(0, "hp", FieldType::Int32)])))
            .unwrap();
        assert!(old.upgrade().is_none());
        assert_eq!(buffer.tracker().unwrap().layer_count(), 2);
    }

    #[test]
    fn test_view_detaches() {
        let buffer = FieldBuffer::shared(schema());
        let view = BagView::new(&buffer);
        assert_eq!(view.get_i64("hp").unwrap(), 10);
        assert!(matches!(view.get_i64("tag"), Err(BagError::TypeMismatch { .. })));
        drop(buffer);
        assert!(!view.is_attached());
        assert!(matches!(view.get("hp"), Err(BagError::Detached)));
    }
}
