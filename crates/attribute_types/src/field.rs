//! Field descriptors and the typed values stored in bags.
//!
//! A [`FieldDesc`] is what a schema is made of: a stable [`FieldId`] used to
//! carry values across schema changes, a name, the element [`FieldType`] and
//! whether the field holds one value or an array of them. Values are held as
//! [`FieldValue`], and the descriptor knows how to put one on the wire and
//! read it back.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::wire::{WireError, WireReader, WireWriter};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid field type: {0}")]
pub struct ParseFieldTypeError(pub String);

/// Element type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Bool,
    Byte,
    Int32,
    Int64,
    Float,
    Double,
    /// Interned-style identifier. Stored and sent like a string.
    Name,
    String,
}

impl FieldType {
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            Self::Bool | Self::Byte | Self::Int32 | Self::Int64 | Self::Float | Self::Double
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::Float | Self::Double)
    }

    pub fn tag(self) -> u8 {
        match self {
            Self::Bool => 0,
            Self::Byte => 1,
            Self::Int32 => 2,
            Self::Int64 => 3,
            Self::Float => 4,
            Self::Double => 5,
            Self::Name => 6,
            Self::String => 7,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self, WireError> {
        Ok(match tag {
            0 => Self::Bool,
            1 => Self::Byte,
            2 => Self::Int32,
            3 => Self::Int64,
            4 => Self::Float,
            5 => Self::Double,
            6 => Self::Name,
            7 => Self::String,
            _ => {
                return Err(WireError::InvalidTag {
                    what: "field type",
                    tag: u64::from(tag),
                });
            }
        })
    }
}

impl FromStr for FieldType {
    type Err = ParseFieldTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bool" | "boolean" => Ok(Self::Bool),
            "byte" | "u8" => Ok(Self::Byte),
            "int32" | "i32" | "int" | "integer" => Ok(Self::Int32),
            "int64" | "i64" | "long" => Ok(Self::Int64),
            "float" | "f32" => Ok(Self::Float),
            "double" | "f64" | "number" => Ok(Self::Double),
            "name" => Ok(Self::Name),
            "string" | "str" => Ok(Self::String),
            _ => Err(ParseFieldTypeError(s.to_string())),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bool => "bool",
            Self::Byte => "byte",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Float => "float",
            Self::Double => "double",
            Self::Name => "name",
            Self::String => "string",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    #[default]
    Single,
    Array,
}

// ─────────────────────────────────────────────────────────────────────────────
// Values
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Bool(bool),
    Byte(u8),
    Int32(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
    Name(String),
    String(String),
    Array(Vec<FieldValue>),
}

impl FieldValue {
    /// Zero value for a field of the given shape.
    pub fn default_for(field_type: FieldType, container: ContainerKind) -> Self {
        if container == ContainerKind::Array {
            return Self::Array(Vec::new());
        }
        match field_type {
            FieldType::Bool => Self::Bool(false),
            FieldType::Byte => Self::Byte(0),
            FieldType::Int32 => Self::Int32(0),
            FieldType::Int64 => Self::Int64(0),
            FieldType::Float => Self::Float(0.0),
            FieldType::Double => Self::Double(0.0),
            FieldType::Name => Self::Name(String::new()),
            FieldType::String => Self::String(String::new()),
        }
    }

    /// Element type, or `None` for arrays.
    pub fn field_type(&self) -> Option<FieldType> {
        Some(match self {
            Self::Bool(_) => FieldType::Bool,
            Self::Byte(_) => FieldType::Byte,
            Self::Int32(_) => FieldType::Int32,
            Self::Int64(_) => FieldType::Int64,
            Self::Float(_) => FieldType::Float,
            Self::Double(_) => FieldType::Double,
            Self::Name(_) => FieldType::Name,
            Self::String(_) => FieldType::String,
            Self::Array(_) => return None,
        })
    }

    /// Numeric view, truncating floats toward zero.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Bool(v) => Some(i64::from(*v)),
            Self::Byte(v) => Some(i64::from(*v)),
            Self::Int32(v) => Some(i64::from(*v)),
            Self::Int64(v) => Some(*v),
            Self::Float(v) => Some(*v as i64),
            Self::Double(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            Self::Byte(v) => Some(f64::from(*v)),
            Self::Int32(v) => Some(f64::from(*v)),
            Self::Int64(v) => Some(*v as f64),
            Self::Float(v) => Some(f64::from(*v)),
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Name(v) | Self::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[FieldValue]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Build a numeric value of `field_type` from an integer.
    ///
    /// Narrowing wraps the way an integer cast does; non-numeric targets
    /// yield `None`.
    pub fn from_i64(field_type: FieldType, value: i64) -> Option<Self> {
        Some(match field_type {
            FieldType::Bool => Self::Bool(value != 0),
            FieldType::Byte => Self::Byte(value as u8),
            FieldType::Int32 => Self::Int32(value as i32),
            FieldType::Int64 => Self::Int64(value),
            FieldType::Float => Self::Float(value as f32),
            FieldType::Double => Self::Double(value as f64),
            FieldType::Name | FieldType::String => return None,
        })
    }

    pub fn from_f64(field_type: FieldType, value: f64) -> Option<Self> {
        Some(match field_type {
            FieldType::Bool => Self::Bool(value != 0.0),
            FieldType::Byte => Self::Byte(value as u8),
            FieldType::Int32 => Self::Int32(value as i32),
            FieldType::Int64 => Self::Int64(value as i64),
            FieldType::Float => Self::Float(value as f32),
            FieldType::Double => Self::Double(value),
            FieldType::Name | FieldType::String => return None,
        })
    }

    /// Convert a single value to another element type.
    ///
    /// Same-type values are cloned. Numeric values convert through `f64` when
    /// the target is a float type and through `i64` otherwise. Anything else
    /// does not convert.
    pub fn convert_to(&self, target: FieldType) -> Option<Self> {
        let source = self.field_type()?;
        if source == target {
            return Some(self.clone());
        }
        if !(source.is_numeric() && target.is_numeric()) {
            return None;
        }
        if target.is_float() {
            Self::from_f64(target, self.as_f64()?)
        } else {
            Self::from_i64(target, self.as_i64()?)
        }
    }

    /// Build a value from loosely typed JSON, e.g. a default declared in a
    /// config file.
    pub fn from_json(
        field_type: FieldType,
        container: ContainerKind,
        value: &serde_json::Value,
    ) -> Option<Self> {
        if container == ContainerKind::Array {
            let items = value
                .as_array()?
                .iter()
                .map(|item| Self::from_json(field_type, ContainerKind::Single, item))
                .collect::<Option<Vec<_>>>()?;
            return Some(Self::Array(items));
        }
        match field_type {
            FieldType::Bool => value.as_bool().map(Self::Bool),
            FieldType::Name => value.as_str().map(|s| Self::Name(s.to_string())),
            FieldType::String => value.as_str().map(|s| Self::String(s.to_string())),
            _ if field_type.is_float() => Self::from_f64(field_type, value.as_f64()?),
            _ => Self::from_i64(field_type, value.as_i64()?),
        }
    }

    /// Write the payload of this value. The shape is implied by the field
    /// descriptor on the reading side, so no tag is written.
    pub fn encode<W: WireWriter + ?Sized>(&self, writer: &mut W) {
        match self {
            Self::Bool(v) => writer.write_bool(*v),
            Self::Byte(v) => writer.write_u8(*v),
            Self::Int32(v) => writer.write_signed_varint(i64::from(*v)),
            Self::Int64(v) => writer.write_signed_varint(*v),
            Self::Float(v) => writer.write_f32(*v),
            Self::Double(v) => writer.write_f64(*v),
            Self::Name(v) | Self::String(v) => writer.write_str(v),
            Self::Array(items) => {
                writer.write_varint(items.len() as u64);
                for item in items {
                    item.encode(writer);
                }
            }
        }
    }

    fn decode_single<R: WireReader + ?Sized>(
        field_type: FieldType,
        reader: &mut R,
    ) -> Result<Self, WireError> {
        Ok(match field_type {
            FieldType::Bool => Self::Bool(reader.read_bool()?),
            FieldType::Byte => Self::Byte(reader.read_u8()?),
            FieldType::Int32 => {
                let raw = reader.read_signed_varint()?;
                let value = i32::try_from(raw).map_err(|_| WireError::InvalidTag {
                    what: "int32 value",
                    tag: raw as u64,
                })?;
                Self::Int32(value)
            }
            FieldType::Int64 => Self::Int64(reader.read_signed_varint()?),
            FieldType::Float => Self::Float(reader.read_f32()?),
            FieldType::Double => Self::Double(reader.read_f64()?),
            FieldType::Name => Self::Name(reader.read_str()?),
            FieldType::String => Self::String(reader.read_str()?),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldId(pub u32);

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Descriptors
// ─────────────────────────────────────────────────────────────────────────────

/// Description of one field of a bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDesc {
    /// Identity used to match fields across schema changes
    pub id: FieldId,
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub container: ContainerKind,
    /// Initial value; the type's zero value when absent
    #[serde(default)]
    pub default: Option<FieldValue>,
}

impl FieldDesc {
    pub fn new(id: u32, name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            id: FieldId(id),
            name: name.into(),
            field_type,
            container: ContainerKind::Single,
            default: None,
        }
    }

    pub fn array(id: u32, name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            container: ContainerKind::Array,
            ..Self::new(id, name, field_type)
        }
    }

    pub fn with_default(mut self, value: FieldValue) -> Self {
        self.default = Some(value);
        self
    }

    /// Whether `value` has the shape this field stores.
    pub fn conforms(&self, value: &FieldValue) -> bool {
        match (self.container, value) {
            (ContainerKind::Array, FieldValue::Array(items)) => items
                .iter()
                .all(|item| item.field_type() == Some(self.field_type)),
            (ContainerKind::Single, value) => value.field_type() == Some(self.field_type),
            _ => false,
        }
    }

    /// Value a freshly created slot for this field starts with.
    pub fn initial_value(&self) -> FieldValue {
        match &self.default {
            Some(value) if self.conforms(value) => value.clone(),
            _ => FieldValue::default_for(self.field_type, self.container),
        }
    }

    /// Carry a value from another field into this one, converting numbers
    /// where possible.
    pub fn adopt(&self, value: &FieldValue) -> Option<FieldValue> {
        if self.conforms(value) {
            return Some(value.clone());
        }
        match (self.container, value) {
            (ContainerKind::Single, FieldValue::Array(_)) | (ContainerKind::Array, _) => None,
            (ContainerKind::Single, value) => value.convert_to(self.field_type),
        }
    }

    pub fn encode_value<W: WireWriter + ?Sized>(&self, value: &FieldValue, writer: &mut W) {
        debug_assert!(
            self.conforms(value),
            "value {value:?} does not conform to field '{}'",
            self.name
        );
        value.encode(writer);
    }

    pub fn decode_value<R: WireReader + ?Sized>(
        &self,
        reader: &mut R,
    ) -> Result<FieldValue, WireError> {
        match self.container {
            ContainerKind::Single => FieldValue::decode_single(self.field_type, reader),
            ContainerKind::Array => {
                let count = reader.read_varint()?;
                let max = reader.remaining();
                if count > max as u64 {
                    return Err(WireError::LengthTooLarge { len: count, max });
                }
                let mut items = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    items.push(FieldValue::decode_single(self.field_type, reader)?);
                }
                Ok(FieldValue::Array(items))
            }
        }
    }

    /// Write the descriptor itself, for full (non-delta) bag transfers.
    pub fn encode<W: WireWriter + ?Sized>(&self, writer: &mut W) {
        writer.write_varint(u64::from(self.id.0));
        writer.write_str(&self.name);
        writer.write_u8(self.field_type.tag());
        writer.write_bool(self.container == ContainerKind::Array);
        match &self.default {
            Some(value) if self.conforms(value) => {
                writer.write_bool(true);
                value.encode(writer);
            }
            _ => writer.write_bool(false),
        }
    }

    pub fn decode<R: WireReader + ?Sized>(reader: &mut R) -> Result<Self, WireError> {
        let raw_id = reader.read_varint()?;
        let id = u32::try_from(raw_id).map_err(|_| WireError::InvalidTag {
            what: "field id",
            tag: raw_id,
        })?;
        let name = reader.read_str()?;
        let field_type = FieldType::from_tag(reader.read_u8()?)?;
        let container = if reader.read_bool()? {
            ContainerKind::Array
        } else {
            ContainerKind::Single
        };
        let mut desc = Self {
            id: FieldId(id),
            name,
            field_type,
            container,
            default: None,
        };
        if reader.read_bool()? {
            desc.default = Some(desc.decode_value(reader)?);
        }
        Ok(desc)
    }
}
