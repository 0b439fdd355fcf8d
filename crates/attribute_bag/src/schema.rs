//! Bag schemas and the registry that shares them.
//!
//! A [`BagSchema`] owns the ordered field list together with the bit-index
//! space derived from it: field `i` is bit `i` of every dirty set and layer
//! `i` of the bag's tracker. Nothing outside the schema maps between the two,
//! and walking a bit set refuses one whose length does not match.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};

use attribute_types::{BitSet, FieldDesc, FieldId, FieldValue};
use tracing::{debug, warn};

use crate::config::SchemaConfig;
use crate::error::{BagError, Result};

#[derive(Debug)]
pub struct BagSchema {
    fields: Vec<FieldDesc>,
    by_name: HashMap<String, usize>,
    by_id: HashMap<FieldId, usize>,
    content_hash: u64,
}

impl BagSchema {
    /// Build a schema from `descs`. A field repeating an earlier field's
    /// name or id is dropped.
    pub fn new(descs: impl IntoIterator<Item = FieldDesc>) -> Self {
        let mut fields = Vec::new();
        let mut by_name = HashMap::new();
        let mut by_id = HashMap::new();

        for desc in descs {
            if by_name.contains_key(&desc.name) || by_id.contains_key(&desc.id) {
                warn!(field = %desc.name, id = %desc.id, "dropping duplicate field");
                continue;
            }
            by_name.insert(desc.name.clone(), fields.len());
            by_id.insert(desc.id, fields.len());
            fields.push(desc);
        }

        let content_hash = content_hash(&fields);
        Self {
            fields,
            by_name,
            by_id,
            content_hash,
        }
    }

    pub fn fields(&self) -> &[FieldDesc] {
        &self.fields
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, index: usize) -> Result<&FieldDesc> {
        self.fields.get(index).ok_or(BagError::IndexOutOfBounds {
            index,
            count: self.fields.len(),
        })
    }

    pub fn find_by_name(&self, name: &str) -> Option<(usize, &FieldDesc)> {
        let index = *self.by_name.get(name)?;
        Some((index, &self.fields[index]))
    }

    pub fn find_by_id(&self, id: FieldId) -> Option<(usize, &FieldDesc)> {
        let index = *self.by_id.get(&id)?;
        Some((index, &self.fields[index]))
    }

    pub fn index_of(&self, name: &str) -> Result<usize> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| BagError::FieldNotFound(name.to_string()))
    }

    /// Clear dirty set sized to this schema.
    pub fn new_dirty_set(&self) -> BitSet {
        BitSet::new(self.fields.len())
    }

    pub fn initial_values(&self) -> Vec<FieldValue> {
        self.fields.iter().map(FieldDesc::initial_value).collect()
    }

    /// Smallest id not used by any field.
    pub fn next_field_id(&self) -> FieldId {
        let next = self.fields.iter().map(|f| f.id.0 + 1).max().unwrap_or(0);
        FieldId(next)
    }

    pub fn check_bits(&self, bits: &BitSet) -> Result<()> {
        if bits.len() != self.fields.len() {
            return Err(BagError::SchemaMismatch {
                bits: bits.len(),
                fields: self.fields.len(),
            });
        }
        Ok(())
    }

    /// Visit the fields marked in `bits`, in field order.
    pub fn walk(
        &self,
        bits: &BitSet,
        mut f: impl FnMut(usize, &FieldDesc) -> Result<()>,
    ) -> Result<()> {
        self.check_bits(bits)?;
        for (mark, desc) in bits.full_iter().zip(&self.fields) {
            if mark.is_marked() {
                f(mark.index, desc)?;
            }
        }
        Ok(())
    }

    fn same_fields(&self, descs: &[FieldDesc]) -> bool {
        self.fields.as_slice() == descs
    }
}

fn content_hash(fields: &[FieldDesc]) -> u64 {
    let mut hasher = DefaultHasher::new();
    fields.len().hash(&mut hasher);
    for field in fields {
        field.id.hash(&mut hasher);
        field.name.hash(&mut hasher);
        field.field_type.hash(&mut hasher);
        field.container.hash(&mut hasher);
    }
    hasher.finish()
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Hands out one shared [`BagSchema`] per distinct field list.
///
/// Anonymous schemas are cached weakly and disappear once no bag uses them;
/// named schemas are held for the registry's lifetime.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    cache: HashMap<u64, Vec<Weak<BagSchema>>>,
    named: HashMap<String, Rc<BagSchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the shared schema for `descs`, creating it on first use.
    pub fn get_or_create(&mut self, descs: &[FieldDesc]) -> Rc<BagSchema> {
        let candidate = BagSchema::new(descs.iter().cloned());
        let bucket = self.cache.entry(candidate.content_hash).or_default();
        bucket.retain(|schema| schema.strong_count() > 0);

        if let Some(existing) = bucket
            .iter()
            .filter_map(Weak::upgrade)
            .find(|schema| schema.same_fields(&candidate.fields))
        {
            return existing;
        }

        debug!(fields = candidate.field_count(), "created bag schema");
        let schema = Rc::new(candidate);
        bucket.push(Rc::downgrade(&schema));
        schema
    }

    /// Register `descs` under `name`, keeping the schema alive.
    pub fn register_named(&mut self, name: &str, descs: &[FieldDesc]) -> Result<Rc<BagSchema>> {
        if self.named.contains_key(name) {
            return Err(BagError::DuplicateSchema(name.to_string()));
        }
        let mut ids = HashSet::new();
        if let Some(dup) = descs.iter().find(|desc| !ids.insert(desc.id)) {
            return Err(BagError::DuplicateFieldId(dup.id));
        }

        let schema = self.get_or_create(descs);
        self.named.insert(name.to_string(), Rc::clone(&schema));
        debug!(name, fields = schema.field_count(), "registered named bag schema");
        Ok(schema)
    }

    pub fn named(&self, name: &str) -> Result<Rc<BagSchema>> {
        self.named
            .get(name)
            .cloned()
            .ok_or_else(|| BagError::UnknownSchema(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.named.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Register every bag declared in `config`.
    pub fn register_config(&mut self, config: &SchemaConfig) -> Result<Vec<Rc<BagSchema>>> {
        config
            .bags
            .iter()
            .map(|bag| self.register_named(&bag.name, &bag.fields))
            .collect()
    }

    /// Number of distinct schemas still in use.
    pub fn live_count(&self) -> usize {
        self.cache
            .values()
            .flatten()
            .filter(|schema| schema.strong_count() > 0)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attribute_types::FieldType;

    fn hero_fields() -> Vec<FieldDesc> {
        vec![
            FieldDesc::new(0, "health", FieldType::Int32),
            FieldDesc::new(1, "speed", FieldType::Float),
            FieldDesc::new(2, "name", FieldType::String),
        ]
    }

    #[test]
    fn test_lookup_by_name_and_id() {
        let schema = BagSchema::new(hero_fields());
        assert_eq!(schema.field_count(), 3);
        assert_eq!(schema.index_of("speed").unwrap(), 1);
        assert_eq!(schema.find_by_id(FieldId(2)).unwrap().1.name, "name");
        assert!(matches!(schema.index_of("mana"), Err(BagError::FieldNotFound(_))));
        assert_eq!(schema.next_field_id(), FieldId(3));
    }

    #[test]
    fn test_duplicate_names_keep_first() {
        let mut descs = hero_fields();
        descs.push(FieldDesc::new(9, "health", FieldType::Double));
        let schema = BagSchema::new(descs);
        assert_eq!(schema.field_count(), 3);
        assert_eq!(schema.find_by_name("health").unwrap().1.field_type, FieldType::Int32);
    }

    #[test]
    fn test_walk_visits_marked_fields_in_order() {
        let schema = BagSchema::new(hero_fields());
        let mut bits = schema.new_dirty_set();
        bits.add(2);
        bits.add(0);

        let mut seen = Vec::new();
        schema
            .walk(&bits, |index, desc| {
                seen.push((index, desc.name.clone()));
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec![(0, "health".to_string()), (2, "name".to_string())]);
    }

    #[test]
    fn test_walk_rejects_mismatched_bits() {
        let schema = BagSchema::new(hero_fields());
        let bits = BitSet::new(5);
        assert!(matches!(
            schema.walk(&bits, |_, _| Ok(())),
            Err(BagError::SchemaMismatch { bits: 5, fields: 3 })
        ));
    }

    #[test]
    fn test_registry_shares_identical_lists() {
        let mut registry = SchemaRegistry::new();
        let a = registry.get_or_create(&hero_fields());
        let b = registry.get_or_create(&hero_fields());
        assert!(Rc::ptr_eq(&a, &b));

        let mut other = hero_fields();
        other[1].field_type = FieldType::Double;
        let c = registry.get_or_create(&other);
        assert!(!Rc::ptr_eq(&a, &c));
        assert_eq!(registry.live_count(), 2);
    }

    #[test]
    fn test_registry_drops_unused_schemas() {
        let mut registry = SchemaRegistry::new();
        let a = registry.get_or_create(&hero_fields());
        drop(a);
        assert_eq!(registry.live_count(), 0);
        let b = registry.get_or_create(&hero_fields());
        assert_eq!(b.field_count(), 3);
        assert_eq!(registry.live_count(), 1);
    }

    #[test]
    fn test_named_schemas() {
        let mut registry = SchemaRegistry::new();
        let hero = registry.register_named("hero", &hero_fields()).unwrap();
        assert!(Rc::ptr_eq(&hero, &registry.named("hero").unwrap()));
        assert!(matches!(
            registry.register_named("hero", &hero_fields()),
            Err(BagError::DuplicateSchema(_))
        ));
        assert!(matches!(registry.named("villain"), Err(BagError::UnknownSchema(_))));
        assert_eq!(registry.names(), vec!["hero"]);
    }

    #[test]
    fn test_named_rejects_duplicate_ids() {
        let mut registry = SchemaRegistry::new();
        let descs = vec![
            FieldDesc::new(0, "a", FieldType::Bool),
            FieldDesc::new(0, "b", FieldType::Bool),
        ];
        assert!(matches!(
            registry.register_named("broken", &descs),
            Err(BagError::DuplicateFieldId(FieldId(0)))
        ));
    }
}
