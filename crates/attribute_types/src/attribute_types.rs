//! Attribute Types - Leaf data structures for the attribute replication core
//!
//! This crate holds the pieces that have no notion of trackers or bags:
//!
//! - [`BitSet`] - packed-word dirty/dependency masks with range operations
//!   and two iteration strategies
//! - [`WireWriter`] / [`WireReader`] - the byte transport every encoder in the
//!   workspace is written against, plus in-memory implementations
//! - [`FieldType`], [`FieldValue`], [`FieldDesc`] - field descriptors and the
//!   typed values stored in bags

pub mod bitset;
pub mod field;
pub mod wire;

pub use bitset::{BitSet, FullIter, Iter, Mark, WORD_BITS, Word};
pub use field::{ContainerKind, FieldDesc, FieldId, FieldType, FieldValue, ParseFieldTypeError};
pub use wire::{ByteReader, ByteWriter, WireError, WireReader, WireWriter};
